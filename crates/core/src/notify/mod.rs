//! Fan-out of status changes to the operator UI.
//!
//! Publishing never blocks and never fails: a notification nobody listens
//! to is simply dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errorflow::{FailureKind, WorkerKind};
use crate::record::ProcessStatus;
use crate::repository::HarvestState;
use crate::scheduler::RunState;

/// A status change pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A repository changed state, counter or flags.
    RepositoryUpdate {
        repository_id: String,
        state: HarvestState,
        enabled: bool,
        harvest_requested: bool,
        consecutive_failures: u32,
    },
    /// A repository crossed its failure threshold.
    RepositoryPaused {
        repository_id: String,
        consecutive_failures: u32,
        message: String,
    },
    /// An identifier harvest ended.
    HarvestFinished {
        repository_id: String,
        outcome: String,
        pages: usize,
        inserted: usize,
        withdrawn: usize,
    },
    /// A record changed processing status.
    RecordUpdate {
        record_id: i64,
        repository_id: String,
        status: ProcessStatus,
    },
    /// A worker failure was recorded.
    ErrorReported {
        repository_id: String,
        record_id: Option<i64>,
        worker: WorkerKind,
        kind: FailureKind,
        message: String,
    },
    /// A scheduler daemon's run state changed.
    RunState(RunState),
}

impl Notification {
    /// Event type as it appears in the serialized `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::RepositoryUpdate { .. } => "repository_update",
            Notification::RepositoryPaused { .. } => "repository_paused",
            Notification::HarvestFinished { .. } => "harvest_finished",
            Notification::RecordUpdate { .. } => "record_update",
            Notification::ErrorReported { .. } => "error_reported",
            Notification::RunState(_) => "run_state",
        }
    }
}

/// Broadcast sink for [`Notification`]s.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Create a notifier with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, notification: Notification) {
        // No receivers is not an error
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let notifier = Notifier::default();
        notifier.publish(Notification::RecordUpdate {
            record_id: 1,
            repository_id: "repo".to_string(),
            status: ProcessStatus::Done,
        });
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.publish(Notification::RepositoryPaused {
            repository_id: "repo".to_string(),
            consecutive_failures: 3,
            message: "timeout".to_string(),
        });
        notifier.publish(Notification::RunState(RunState {
            daemon: "object-harvester".to_string(),
            running: true,
            active: 1,
            max_parallel: 4,
            queue_depth: 10,
        }));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "repository_paused");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "run_state");
    }

    #[test]
    fn test_serialized_type_tag_matches_event_type() {
        let notification = Notification::RunState(RunState {
            daemon: "identifier-harvester".to_string(),
            running: false,
            active: 0,
            max_parallel: 2,
            queue_depth: 0,
        });
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], notification.event_type());
        assert_eq!(json["daemon"], "identifier-harvester");

        let update = Notification::RepositoryUpdate {
            repository_id: "repo".to_string(),
            state: HarvestState::PausedOnError,
            enabled: true,
            harvest_requested: false,
            consecutive_failures: 3,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "repository_update");
        assert_eq!(json["state"], "paused_on_error");
    }
}
