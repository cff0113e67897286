//! Progress bus: in-process broadcast of task lifecycle events.
//!
//! Every subscriber sees every event. Delivery is best-effort: the channel
//! keeps a bounded backlog per subscriber and slow consumers lose the oldest
//! events, which is acceptable for progress reporting.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::tasks::TaskStatus;

/// Per-subscriber backlog before old events are dropped.
pub const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress { task_id: i64, progress: i64 },
    Status { task_id: i64, status: TaskStatus },
    NewTask { task_id: i64 },
}

#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: TaskEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(_) => debug!("Event published with no subscribers"),
        }
    }

    pub fn progress(&self, task_id: i64, progress: i64) {
        self.publish(TaskEvent::Progress { task_id, progress });
    }

    pub fn status(&self, task_id: i64, status: TaskStatus) {
        self.publish(TaskEvent::Status { task_id, status });
    }

    pub fn new_task(&self, task_id: i64) {
        self.publish(TaskEvent::NewTask { task_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_fan_out_to_all_subscribers() {
        let bus = ProgressBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.progress(7, 42);

        let expected = TaskEvent::Progress {
            task_id: 7,
            progress: 42,
        };
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = ProgressBus::default();
        bus.new_task(1);
    }

    #[test]
    fn test_wire_format() {
        let progress = serde_json::to_value(TaskEvent::Progress {
            task_id: 3,
            progress: 95,
        })
        .unwrap();
        assert_eq!(
            progress,
            serde_json::json!({"type": "progress", "task_id": 3, "progress": 95})
        );

        let status = serde_json::to_value(TaskEvent::Status {
            task_id: 3,
            status: TaskStatus::Processing,
        })
        .unwrap();
        assert_eq!(
            status,
            serde_json::json!({"type": "status", "task_id": 3, "status": "processing"})
        );

        let new_task = serde_json::to_value(TaskEvent::NewTask { task_id: 9 }).unwrap();
        assert_eq!(new_task, serde_json::json!({"type": "new_task", "task_id": 9}));
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let bus = ProgressBus::new(4);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.progress(1, i);
        }
        // The first recv reports the lag, subsequent events still arrive in order.
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_))
        ));
        let next = rx.try_recv().unwrap();
        assert!(matches!(next, TaskEvent::Progress { progress, .. } if progress >= 6));
    }
}
