//! Turns harvested identifier pages into record changes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    fingerprint, HarvestedEntry, NewRecord, ProcessStatus, RecordBatch, RecordError, RecordStore,
    Withdrawal,
};

/// Counts for one or more loaded pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub considered: usize,
    pub inserted: usize,
    pub withdrawn: usize,
    pub skipped: usize,
    /// Greatest datestamp among the considered entries.
    pub latest_datestamp: Option<String>,
    /// Records moved to REJECTED by deleted entries.
    pub withdrawals: Vec<Withdrawal>,
}

impl LoadSummary {
    pub fn absorb(&mut self, other: LoadSummary) {
        self.considered += other.considered;
        self.inserted += other.inserted;
        self.withdrawn += other.withdrawn;
        self.skipped += other.skipped;
        self.observe_datestamp(other.latest_datestamp.as_deref());
        self.withdrawals.extend(other.withdrawals);
    }

    fn observe_datestamp(&mut self, datestamp: Option<&str>) {
        if let Some(candidate) = datestamp {
            // OAI datestamps are ISO 8601 and order lexically
            if self
                .latest_datestamp
                .as_deref()
                .map_or(true, |current| candidate > current)
            {
                self.latest_datestamp = Some(candidate.to_string());
            }
        }
    }
}

/// Applies harvested entries to the record store.
///
/// New identifiers become PENDING records, deleted headers withdraw the
/// matching record, known identifiers are left untouched. In sample mode the
/// loader only logs what it would consider and never touches the store.
pub struct RecordBatchLoader {
    store: Arc<dyn RecordStore>,
    sample_mode: Option<usize>,
}

impl RecordBatchLoader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            sample_mode: None,
        }
    }

    /// Limit each harvest to `limit` entries and write nothing.
    pub fn with_sample_mode(mut self, limit: Option<usize>) -> Self {
        self.sample_mode = limit;
        self
    }

    pub fn is_sampling(&self) -> bool {
        self.sample_mode.is_some()
    }

    /// Start loading pages for one harvest of `repository_id`.
    pub fn session(&self, repository_id: &str) -> LoaderSession<'_> {
        LoaderSession {
            loader: self,
            repository_id: repository_id.to_string(),
            remaining: self.sample_mode,
        }
    }

    /// Load one page outside of any sampling budget.
    pub fn load(
        &self,
        repository_id: &str,
        entries: &[HarvestedEntry],
    ) -> Result<LoadSummary, RecordError> {
        let fingerprints: Vec<String> = entries
            .iter()
            .map(|e| fingerprint(repository_id, &e.identifier))
            .collect();
        let existing = self.store.find_by_fingerprints(&fingerprints)?;

        let mut summary = LoadSummary {
            considered: entries.len(),
            ..Default::default()
        };
        let mut batch = RecordBatch::default();
        let mut seen = HashSet::new();

        for (entry, fp) in entries.iter().zip(fingerprints) {
            summary.observe_datestamp(entry.datestamp.as_deref());

            if !seen.insert(fp.clone()) {
                summary.skipped += 1;
                continue;
            }

            match (existing.get(&fp), entry.deleted) {
                (Some(record), true)
                    if !matches!(
                        record.status,
                        ProcessStatus::Processing | ProcessStatus::Rejected
                    ) =>
                {
                    batch.withdrawals.push(record.id);
                }
                (Some(record), true) if record.status == ProcessStatus::Processing => {
                    debug!(
                        record_id = record.id,
                        identifier = %entry.identifier,
                        "Deleted at source while processing, leaving to worker"
                    );
                    summary.skipped += 1;
                }
                (None, false) => batch.inserts.push(NewRecord {
                    repository_id: repository_id.to_string(),
                    identifier: entry.identifier.clone(),
                    object_id: uuid::Uuid::new_v4().to_string(),
                    fingerprint: fp,
                    datestamp: entry.datestamp.clone(),
                }),
                _ => summary.skipped += 1,
            }
        }

        let outcome = self.store.apply_batch(&batch)?;
        summary.inserted = outcome.inserted;
        summary.withdrawn = outcome.withdrawn.len();
        // Lost conditional updates count as skipped
        summary.skipped += batch.inserts.len() - outcome.inserted;
        summary.skipped += batch.withdrawals.len() - outcome.withdrawn.len();
        summary.withdrawals = existing
            .into_values()
            .filter(|record| outcome.withdrawn.contains(&record.id))
            .map(|record| Withdrawal {
                record_id: record.id,
                identifier: record.identifier,
                object_id: record.object_id,
            })
            .collect();

        debug!(
            repository_id,
            considered = summary.considered,
            inserted = summary.inserted,
            withdrawn = summary.withdrawn,
            "Loaded identifier page"
        );
        Ok(summary)
    }
}

/// Loading state for one harvest.
pub struct LoaderSession<'a> {
    loader: &'a RecordBatchLoader,
    repository_id: String,
    remaining: Option<usize>,
}

impl LoaderSession<'_> {
    pub fn load(&mut self, entries: &[HarvestedEntry]) -> Result<LoadSummary, RecordError> {
        let Some(remaining) = self.remaining else {
            return self.loader.load(&self.repository_id, entries);
        };

        let sample = &entries[..entries.len().min(remaining)];
        self.remaining = Some(remaining - sample.len());

        let mut summary = LoadSummary {
            considered: sample.len(),
            ..Default::default()
        };
        for entry in sample {
            summary.observe_datestamp(entry.datestamp.as_deref());
            info!(
                repository_id = %self.repository_id,
                identifier = %entry.identifier,
                deleted = entry.deleted,
                "Sample mode entry"
            );
        }
        summary.skipped = sample.len();
        Ok(summary)
    }

    /// The sampling budget is used up; further pages would be ignored.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}
