//! ListIdentifiers harvest of one repository.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::errorflow::{ErrorFlowHandler, WorkerFailure};
use crate::fetcher::HttpFetcher;
use crate::metrics;
use crate::oai;
use crate::record::{LoadSummary, RecordBatchLoader, Withdrawal};
use crate::repository::Repository;
use crate::storage::{FileStorage, StorageArea};

/// Totals of one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub pages: usize,
    pub load: LoadSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// The listing ran to its last page.
    Completed(HarvestSummary),
    /// Stopped by an operator between pages.
    Interrupted(HarvestSummary),
    Failed {
        failure: WorkerFailure,
        summary: HarvestSummary,
    },
}

/// Pages through ListIdentifiers and loads every page.
///
/// Pages already loaded stay loaded when a later page fails; reloading them
/// on the next harvest is a no-op.
pub struct IdentifierHarvester {
    fetcher: Arc<dyn HttpFetcher>,
    loader: Arc<RecordBatchLoader>,
    withdrawals: Option<WithdrawalHandling>,
}

/// Where withdrawn records leave their archived copies and reports.
struct WithdrawalHandling {
    storage: Arc<FileStorage>,
    errorflow: Arc<ErrorFlowHandler>,
}

impl IdentifierHarvester {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, loader: Arc<RecordBatchLoader>) -> Self {
        Self {
            fetcher,
            loader,
            withdrawals: None,
        }
    }

    /// Move archived copies of withdrawn records to REJECTED and report each
    /// withdrawal. Without this, withdrawals only change the record status.
    pub fn with_withdrawal_handling(
        mut self,
        storage: Arc<FileStorage>,
        errorflow: Arc<ErrorFlowHandler>,
    ) -> Self {
        self.withdrawals = Some(WithdrawalHandling { storage, errorflow });
        self
    }

    /// Sampling harvests write nothing and must not advance the datestamp.
    pub fn is_sampling(&self) -> bool {
        self.loader.is_sampling()
    }

    pub async fn harvest(&self, repository: &Repository, interrupt: &AtomicBool) -> HarvestOutcome {
        let mut session = self.loader.session(&repository.id);
        let mut summary = HarvestSummary::default();
        let mut url = oai::list_identifiers_url(repository);

        info!(repository_id = %repository.id, from = ?repository.datestamp, "Listing identifiers");

        loop {
            let response = match self.fetcher.fetch(&url, &[]).await {
                Ok(response) => response,
                Err(e) => {
                    return HarvestOutcome::Failed {
                        failure: WorkerFailure::from_fetch(&e),
                        summary,
                    }
                }
            };

            let page = match oai::parse_list_identifiers(&response.body) {
                Ok(page) => page,
                Err(e) => {
                    // Lenient fetches hand back error pages; blame the status first
                    let failure = if response.status >= 500 || response.status == 429 {
                        WorkerFailure::transient(format!("HTTP {}: {}", response.status, e))
                    } else {
                        WorkerFailure::protocol(e.to_string())
                    };
                    return HarvestOutcome::Failed {
                        failure: failure.with_url(url),
                        summary,
                    };
                }
            };
            summary.pages += 1;
            metrics::HARVEST_PAGES.inc();

            match session.load(&page.entries) {
                Ok(load) => {
                    self.settle_withdrawals(&repository.id, &load.withdrawals).await;
                    summary.load.absorb(load);
                }
                Err(e) => {
                    return HarvestOutcome::Failed {
                        failure: WorkerFailure::storage(e.to_string()),
                        summary,
                    }
                }
            }

            debug!(
                repository_id = %repository.id,
                page = summary.pages,
                entries = page.entries.len(),
                "Loaded page"
            );

            let token = match page.resumption_token {
                Some(token) if !session.is_exhausted() => token,
                _ => return HarvestOutcome::Completed(summary),
            };
            if interrupt.load(Ordering::Acquire) {
                info!(repository_id = %repository.id, pages = summary.pages, "Harvest interrupted");
                return HarvestOutcome::Interrupted(summary);
            }
            url = oai::resume_url(&repository.url, &token);
        }
    }

    async fn settle_withdrawals(&self, repository_id: &str, withdrawals: &[Withdrawal]) {
        let Some(handling) = &self.withdrawals else {
            return;
        };

        for withdrawal in withdrawals {
            let object_id = withdrawal.object_id.as_str();
            if handling.storage.exists(StorageArea::Done, object_id).await {
                match handling
                    .storage
                    .relocate(object_id, StorageArea::Done, StorageArea::Rejected)
                    .await
                {
                    Ok(_) => info!(
                        record_id = withdrawal.record_id,
                        object_id,
                        "Archived object withdrawn at source"
                    ),
                    Err(e) => error!(
                        record_id = withdrawal.record_id,
                        object_id,
                        error = %e,
                        "Failed to move withdrawn object out of done"
                    ),
                }
            }
            handling.errorflow.on_withdrawal(repository_id, withdrawal);
        }
    }
}
