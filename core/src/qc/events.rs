use crate::prelude::{Classification, QcResult};
use crate::processing::classifier::VoteTally;
use crate::qc::session::{QcState, SessionOutcome};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Notifications for observers (operator bridge, logs); never fed back into the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QcEvent {
    StateChanged {
        state: QcState,
        sensor_id: u32,
    },
    ClassificationUpdated {
        classification: Classification,
        tally: VoteTally,
    },
    AveragingProgress {
        current: u32,
        desired: u32,
    },
    QcUpdated {
        result: QcResult,
    },
    SensorSkipped {
        sensor_id: u32,
        reason: String,
    },
    RobotMessage {
        line: String,
    },
    SessionFinished {
        outcome: SessionOutcome,
        report: Option<PathBuf>,
    },
}

/// Typed broadcast bus. Publishing never blocks and never fails when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QcEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QcEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: QcEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(QcEvent::AveragingProgress {
            current: 1,
            desired: 2,
        });
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(QcEvent::AveragingProgress { current: 1, desired: 2 });
        bus.publish(QcEvent::AveragingProgress { current: 2, desired: 2 });
        for expected in 1..=2 {
            match rx.recv().await.unwrap() {
                QcEvent::AveragingProgress { current, .. } => assert_eq!(current, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
