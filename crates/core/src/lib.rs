pub mod config;
pub mod errorflow;
pub mod fetcher;
pub mod harvest;
pub mod mail;
pub mod metrics;
pub mod notify;
pub mod oai;
pub mod record;
pub mod recovery;
pub mod report;
pub mod repository;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod transform;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    StorageAreas,
};
pub use errorflow::{
    Decision, ErrorFlowHandler, FailureContext, FailureKind, WorkerFailure, WorkerKind,
};
pub use fetcher::{FetchError, FetchResponse, HttpFetcher, LenientHttpFetcher};
pub use harvest::{
    HarvestOutcome, HarvestSummary, IdentifierHarvestSource, IdentifierHarvester,
    ObjectHarvestSource, ObjectHarvester, ObjectJob, ObjectOutcome,
};
pub use mail::{LogMailer, MailError, Mailer};
pub use notify::{Notification, Notifier};
pub use record::{
    HarvestedEntry, LoadSummary, ProcessStatus, Record, RecordBatchLoader, RecordError,
    RecordFilter, RecordStore, SqliteRecordStore, StatusCounts, Withdrawal,
};
pub use recovery::{recover_interrupted_work, RecoveryReport};
pub use report::{ErrorReport, ReportError, ReportFilter, ReportStore, SqliteReportStore};
pub use repository::{
    ControllerError, HarvestState, NewRepository, Repository, RepositoryController,
    RepositoryError, RepositoryFilter, RepositoryStore, RepositoryValidator, Schedule,
    SqliteRepositoryStore, ValidationError,
};
pub use scheduler::{CalendarScheduler, Completion, DaemonConfig, RunState, SchedulerDaemon, WorkSource};
pub use storage::{FileStorage, StorageArea, StorageError};
pub use transform::{ManifestFinalizer, StylesheetTransformer, TransformError, Transformer};
