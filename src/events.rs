//! Domain events emitted after ledger writes commit.
//!
//! Publishing never blocks a ledger operation: events go into a bounded
//! queue with `try_send`, and an event that does not fit is logged and
//! dropped. A dispatcher task drains the queue into an [`EventSink`].

use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EntryBatchCreated,
    SettlementCompleted,
    TemplateCreated,
    TemplateUpdated,
    TemplateDeleted,
    LoanCreated,
    LoanDeleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EntryBatchCreated => "entry_batch_created",
            Self::SettlementCompleted => "settlement_completed",
            Self::TemplateCreated => "template_created",
            Self::TemplateUpdated => "template_updated",
            Self::TemplateDeleted => "template_deleted",
            Self::LoanCreated => "loan_created",
            Self::LoanDeleted => "loan_deleted",
        };
        f.write_str(name)
    }
}

/// A committed change, scoped to one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub workspace_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub payload: BTreeMap<String, String>,
}

impl DomainEvent {
    #[must_use]
    pub fn new(kind: EventKind, workspace_id: i64) -> Self {
        Self {
            kind,
            workspace_id,
            occurred_at: Utc::now(),
            payload: BTreeMap::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }
}

/// Fire-and-forget handle for emitting events. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    sender: Option<mpsc::Sender<DomainEvent>>,
}

impl EventPublisher {
    /// Creates a publisher and the receiving end of its queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A publisher that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn publish(&self, event: DomainEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Event queue full, dropping {} for workspace {}",
                    event.kind, event.workspace_id
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Event queue closed, dropping {}", event.kind);
            }
        }
    }
}

/// Destination for dispatched events, such as a notification service.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &DomainEvent) -> Result<()>;
}

/// Sink that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: &DomainEvent) -> Result<()> {
        info!(
            kind = %event.kind,
            workspace_id = event.workspace_id,
            payload = ?event.payload,
            "domain event"
        );
        Ok(())
    }
}

/// Drains `receiver` into `sink` until every publisher is dropped.
///
/// Sink failures are logged and the event is discarded.
pub fn spawn_dispatcher(
    mut receiver: mpsc::Receiver<DomainEvent>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(event) = receiver.recv().await {
            match sink.deliver(&event) {
                Ok(()) => delivered += 1,
                Err(e) => error!("Failed to deliver {} event: {}", event.kind, e),
            }
        }
        debug!("Event dispatcher stopped after {} events", delivered);
        delivered
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::errors::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<EventKind>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, event: &DomainEvent) -> Result<()> {
            if event.kind == EventKind::LoanDeleted {
                return Err(Error::validation("sink rejected event"));
            }
            self.seen.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    #[test]
    fn test_event_payload() {
        let event = DomainEvent::new(EventKind::SettlementCompleted, 3)
            .with("settled_count", 2)
            .with("total_amount", "80.00");
        assert_eq!(event.workspace_id, 3);
        assert_eq!(event.payload["settled_count"], "2");
        assert_eq!(event.kind.to_string(), "settlement_completed");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (publisher, mut receiver) = EventPublisher::channel(1);
        publisher.publish(DomainEvent::new(EventKind::LoanCreated, 1));
        publisher.publish(DomainEvent::new(EventKind::LoanDeleted, 1));

        assert_eq!(receiver.recv().await.unwrap().kind, EventKind::LoanCreated);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        EventPublisher::disabled().publish(DomainEvent::new(EventKind::TemplateCreated, 1));
    }

    #[tokio::test]
    async fn test_dispatcher_survives_sink_errors() {
        let (publisher, receiver) = EventPublisher::channel(8);
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_dispatcher(receiver, Arc::clone(&sink) as Arc<dyn EventSink>);

        publisher.publish(DomainEvent::new(EventKind::TemplateCreated, 1));
        publisher.publish(DomainEvent::new(EventKind::LoanDeleted, 1));
        publisher.publish(DomainEvent::new(EventKind::EntryBatchCreated, 1));
        drop(publisher);

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec![EventKind::TemplateCreated, EventKind::EntryBatchCreated]
        );
    }
}
