use std::path::PathBuf;

use super::{types::Config, ConfigError};

/// The three storage locations, all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAreas {
    pub processing: PathBuf,
    pub done: PathBuf,
    pub rejected: PathBuf,
}

/// Validate configuration
///
/// Missing storage locations are reported as [`ConfigError::MissingStorage`];
/// the process must not start in that case.
pub fn validate_config(config: &Config) -> Result<StorageAreas, ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.tick_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.tick_interval_ms cannot be 0".to_string(),
        ));
    }
    if scheduler.max_parallel_harvests == 0 || scheduler.max_parallel_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler parallelism must be at least 1".to_string(),
        ));
    }
    if scheduler.queue_page_size == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.queue_page_size cannot be 0".to_string(),
        ));
    }

    let errorflow = &config.errorflow;
    if errorflow.max_consecutive_harvest_failures == 0
        || errorflow.max_consecutive_download_failures == 0
    {
        return Err(ConfigError::ValidationError(
            "errorflow thresholds must be at least 1".to_string(),
        ));
    }

    let storage = &config.storage;
    Ok(StorageAreas {
        processing: storage
            .processing
            .clone()
            .ok_or(ConfigError::MissingStorage("processing"))?,
        done: storage
            .done
            .clone()
            .ok_or(ConfigError::MissingStorage("done"))?,
        rejected: storage
            .rejected
            .clone()
            .ok_or(ConfigError::MissingStorage("rejected"))?,
    })
}
