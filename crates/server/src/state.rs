use std::sync::Arc;

use harvester_core::{
    CalendarScheduler, Config, IdentifierHarvestSource, Notifier, ObjectHarvestSource,
    RecordStore, ReportStore, RepositoryController, RepositoryStore, RepositoryValidator,
    SanitizedConfig, SchedulerDaemon,
};

/// Shared application state
pub struct AppState {
    config: Config,
    repositories: Arc<dyn RepositoryStore>,
    records: Arc<dyn RecordStore>,
    reports: Arc<dyn ReportStore>,
    controller: Arc<RepositoryController>,
    notifier: Notifier,
    identifier_daemon: Arc<SchedulerDaemon<IdentifierHarvestSource>>,
    object_daemon: Arc<SchedulerDaemon<ObjectHarvestSource>>,
    calendar: Arc<CalendarScheduler>,
    validator: Arc<RepositoryValidator>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        repositories: Arc<dyn RepositoryStore>,
        records: Arc<dyn RecordStore>,
        reports: Arc<dyn ReportStore>,
        controller: Arc<RepositoryController>,
        notifier: Notifier,
        identifier_daemon: Arc<SchedulerDaemon<IdentifierHarvestSource>>,
        object_daemon: Arc<SchedulerDaemon<ObjectHarvestSource>>,
        calendar: Arc<CalendarScheduler>,
        validator: Arc<RepositoryValidator>,
    ) -> Self {
        Self {
            config,
            repositories,
            records,
            reports,
            controller,
            notifier,
            identifier_daemon,
            object_daemon,
            calendar,
            validator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn repositories(&self) -> &Arc<dyn RepositoryStore> {
        &self.repositories
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    pub fn controller(&self) -> &Arc<RepositoryController> {
        &self.controller
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn identifier_daemon(&self) -> &Arc<SchedulerDaemon<IdentifierHarvestSource>> {
        &self.identifier_daemon
    }

    pub fn object_daemon(&self) -> &Arc<SchedulerDaemon<ObjectHarvestSource>> {
        &self.object_daemon
    }

    pub fn calendar(&self) -> &Arc<CalendarScheduler> {
        &self.calendar
    }

    pub fn validator(&self) -> &Arc<RepositoryValidator> {
        &self.validator
    }

    /// Close intake on both daemons, then wait for their workers together.
    pub async fn shutdown(&self) {
        self.calendar.stop();
        self.identifier_daemon.pause_intake().await;
        self.object_daemon.pause_intake().await;
        tokio::join!(self.identifier_daemon.stop(), self.object_daemon.stop());
    }
}
