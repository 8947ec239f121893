//! GetRecord download of one record into the storage areas.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::errorflow::WorkerFailure;
use crate::fetcher::HttpFetcher;
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::oai;
use crate::record::{ProcessStatus, Record, RecordError, RecordStore};
use crate::repository::Repository;
use crate::storage::{FileStorage, StorageArea, MANIFEST_FILE, METADATA_FILE, ORIGINAL_FILE};
use crate::transform::{ManifestFinalizer, ManifestMetadata, Transformer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// Stored in DONE with its manifest.
    Archived,
    /// The object itself is bad; kept in REJECTED.
    Rejected(WorkerFailure),
    /// Could not be fetched or stored; nothing kept.
    Failed(WorkerFailure),
}

impl ObjectOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectOutcome::Archived => "archived",
            ObjectOutcome::Rejected(_) => "rejected",
            ObjectOutcome::Failed(_) => "failed",
        }
    }
}

enum Step {
    Reject { raw: Vec<u8>, failure: WorkerFailure },
    Fail(WorkerFailure),
}

/// Fetches, transforms and archives records.
///
/// An object only ever leaves PROCESSING as a whole: it lands in DONE with
/// its manifest, in REJECTED with the original response, or nowhere.
pub struct ObjectHarvester {
    fetcher: Arc<dyn HttpFetcher>,
    records: Arc<dyn RecordStore>,
    storage: Arc<FileStorage>,
    transformer: Arc<dyn Transformer>,
    finalizer: ManifestFinalizer,
    notifier: Notifier,
}

impl ObjectHarvester {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        records: Arc<dyn RecordStore>,
        storage: Arc<FileStorage>,
        transformer: Arc<dyn Transformer>,
        notifier: Notifier,
    ) -> Self {
        Self {
            fetcher,
            records,
            storage,
            transformer,
            finalizer: ManifestFinalizer::new(),
            notifier,
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// PENDING or FAILED -> PROCESSING. False when someone else got there first.
    pub fn claim(&self, record: &Record) -> Result<bool, RecordError> {
        let claimed = self.records.claim(record.id)?;
        if claimed {
            self.publish(record, ProcessStatus::Processing);
        }
        Ok(claimed)
    }

    /// Run the whole pipeline for a claimed record and settle its status.
    pub async fn process(&self, record: &Record, repository: &Repository) -> ObjectOutcome {
        let started = Instant::now();
        let outcome = match self.archive(record, repository).await {
            Ok(()) => {
                self.finish(record, ProcessStatus::Done, None);
                ObjectOutcome::Archived
            }
            Err(Step::Reject { raw, failure }) => match self.reject(record, &raw).await {
                Ok(()) => {
                    self.finish(record, ProcessStatus::Rejected, Some(&failure.message));
                    ObjectOutcome::Rejected(failure)
                }
                Err(storage_failure) => {
                    self.discard(record, &storage_failure).await;
                    ObjectOutcome::Failed(storage_failure)
                }
            },
            Err(Step::Fail(failure)) => {
                self.discard(record, &failure).await;
                ObjectOutcome::Failed(failure)
            }
        };

        metrics::DOWNLOAD_DURATION
            .with_label_values(&[outcome.as_str()])
            .observe(started.elapsed().as_secs_f64());
        metrics::DOWNLOADS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    /// Settle a record whose worker never returned.
    ///
    /// The worker may have been dropped after moving the object out of
    /// PROCESSING, so every area is cleared before the record is marked FAILED.
    pub async fn abandon(&self, record: &Record, failure: &WorkerFailure) {
        if let Err(e) = self.storage.clear(&record.object_id).await {
            error!(record_id = record.id, error = %e, "Failed to clear abandoned object");
        }
        self.finish(record, ProcessStatus::Failed, Some(&failure.to_string()));
        metrics::DOWNLOADS_TOTAL.with_label_values(&["failed"]).inc();
    }

    async fn archive(&self, record: &Record, repository: &Repository) -> Result<(), Step> {
        let object_id = record.object_id.as_str();
        self.storage
            .clear(object_id)
            .await
            .map_err(|e| Step::Fail(WorkerFailure::storage(e.to_string())))?;

        let url = oai::get_record_url(&repository.url, &record.identifier, &repository.metadata_prefix);
        let response = self
            .fetcher
            .fetch(&url, &[])
            .await
            .map_err(|e| Step::Fail(WorkerFailure::from_fetch(&e)))?;
        let raw = response.body;

        if let Err(e) = oai::check_response(&raw) {
            return Err(Step::Reject {
                failure: WorkerFailure::validation(e.to_string()).with_url(url),
                raw,
            });
        }

        let transformed = match self
            .transformer
            .transform(&raw, repository.stylesheet.as_deref())
        {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(Step::Reject {
                    failure: WorkerFailure::validation(e.to_string()).with_url(url),
                    raw,
                })
            }
        };

        let store = |e: crate::storage::StorageError| Step::Fail(WorkerFailure::storage(e.to_string()));
        self.storage
            .write(StorageArea::Processing, object_id, METADATA_FILE, &transformed)
            .await
            .map_err(store)?;

        let finalized = self.finalizer.finalize(
            &transformed,
            &ManifestMetadata {
                repository_id: record.repository_id.clone(),
                record_id: record.id,
                identifier: record.identifier.clone(),
                object_id: record.object_id.clone(),
            },
        );
        if !finalized.accept {
            let reason = finalized
                .reason
                .unwrap_or_else(|| "object not accepted".to_string());
            return Err(Step::Reject {
                failure: WorkerFailure::validation(reason).with_url(url),
                raw,
            });
        }

        let manifest = serde_json::to_vec_pretty(&finalized.manifest)
            .map_err(|e| Step::Fail(WorkerFailure::storage(e.to_string())))?;
        self.storage
            .write(StorageArea::Processing, object_id, MANIFEST_FILE, &manifest)
            .await
            .map_err(store)?;
        self.storage
            .relocate(object_id, StorageArea::Processing, StorageArea::Done)
            .await
            .map_err(store)?;

        info!(
            record_id = record.id,
            identifier = %record.identifier,
            object_id,
            "Object archived"
        );
        Ok(())
    }

    /// Keep the untransformed response in REJECTED.
    async fn reject(&self, record: &Record, raw: &[u8]) -> Result<(), WorkerFailure> {
        let object_id = record.object_id.as_str();
        self.storage
            .write(StorageArea::Processing, object_id, ORIGINAL_FILE, raw)
            .await
            .map_err(|e| WorkerFailure::storage(e.to_string()))?;
        self.storage
            .relocate(object_id, StorageArea::Processing, StorageArea::Rejected)
            .await
            .map_err(|e| WorkerFailure::storage(e.to_string()))?;
        warn!(record_id = record.id, identifier = %record.identifier, "Object rejected");
        Ok(())
    }

    async fn discard(&self, record: &Record, failure: &WorkerFailure) {
        if let Err(e) = self
            .storage
            .remove(StorageArea::Processing, &record.object_id)
            .await
        {
            error!(record_id = record.id, error = %e, "Failed to clean processing area");
        }
        self.finish(record, ProcessStatus::Failed, Some(&failure.to_string()));
    }

    fn finish(&self, record: &Record, status: ProcessStatus, detail: Option<&str>) {
        match self.records.finish(record.id, status, detail) {
            Ok(true) => self.publish(record, status),
            Ok(false) => debug!(
                record_id = record.id,
                %status,
                "Record no longer processing, status left alone"
            ),
            Err(e) => error!(record_id = record.id, error = %e, "Failed to store record status"),
        }
    }

    fn publish(&self, record: &Record, status: ProcessStatus) {
        self.notifier.publish(Notification::RecordUpdate {
            record_id: record.id,
            repository_id: record.repository_id.clone(),
            status,
        });
    }
}
