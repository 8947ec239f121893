//! Scheduler daemon types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Snapshot of a daemon, published whenever it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub daemon: String,
    /// Intake is accepting new work.
    pub running: bool,
    pub active: usize,
    pub max_parallel: usize,
    /// Estimate of the work waiting to be claimed.
    pub queue_depth: usize,
}

/// Tuning of one daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub name: String,
    pub tick: Duration,
    pub max_parallel: usize,
    /// Minimum time between two refills.
    pub refill_delay: Duration,
    /// Wall-clock budget of one worker.
    pub worker_budget: Duration,
}

impl DaemonConfig {
    pub fn identifier_harvester(config: &SchedulerConfig) -> Self {
        Self {
            name: "identifier-harvester".to_string(),
            tick: Duration::from_millis(config.tick_interval_ms),
            max_parallel: config.max_parallel_harvests,
            refill_delay: Duration::ZERO,
            worker_budget: Duration::from_secs(config.harvest_budget_secs),
        }
    }

    pub fn object_harvester(config: &SchedulerConfig) -> Self {
        Self {
            name: "object-harvester".to_string(),
            tick: Duration::from_millis(config.tick_interval_ms),
            max_parallel: config.max_parallel_downloads,
            refill_delay: Duration::from_millis(config.download_queue_fill_delay_ms),
            worker_budget: Duration::from_secs(config.download_budget_secs),
        }
    }
}

/// How a worker ended.
#[derive(Debug)]
pub enum Completion<O> {
    Finished(O),
    /// The worker exceeded its budget and was dropped.
    TimedOut,
    /// The worker task panicked.
    Panicked(String),
}

/// Supplies work to a [`SchedulerDaemon`](super::SchedulerDaemon) and
/// settles its results.
#[async_trait]
pub trait WorkSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Outcome: Send + 'static;

    /// Identity of an item; at most one worker per key is active.
    fn key(item: &Self::Item) -> String;

    /// Claim up to `limit` items whose keys are not in `active`. Claimed
    /// items are owned by the daemon until [`complete`](Self::complete).
    async fn claim(&self, limit: usize, active: &HashSet<String>) -> Vec<Self::Item>;

    /// The worker body, run in its own task.
    async fn run(&self, item: Self::Item) -> Self::Outcome;

    /// Settle a finished worker. Called from the control loop.
    async fn complete(&self, item: Self::Item, completion: Completion<Self::Outcome>);

    async fn queue_depth(&self) -> usize;
}
