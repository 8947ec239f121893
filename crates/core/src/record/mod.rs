//! Harvested records, their lifecycle and batch loading.

mod batch_loader;
mod sqlite_store;
mod store;
mod types;

pub use batch_loader::{LoadSummary, LoaderSession, RecordBatchLoader};
pub use sqlite_store::{SqliteRecordStore, WITHDRAWN_DETAIL};
pub use store::{RecordError, RecordFilter, RecordStore};
pub use types::{
    fingerprint, BatchOutcome, HarvestedEntry, NewRecord, ProcessStatus, Record, RecordBatch,
    StatusCounts, Withdrawal,
};
