use serde::Serialize;
use thzcore::processing::VoteTally;
use thzcore::qc::SessionStatus;
use thzcore::{Classification, QcEvent, QcResult, SessionOutcome};

/// What the operator view shows, folded from the session's event stream.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StationModel {
    pub status: Option<SessionStatus>,
    pub results: Vec<QcResult>,
    pub averaging: Option<AveragingProgress>,
    pub classification: Option<Classification>,
    pub votes: Option<VoteTally>,
    pub last_robot_message: Option<String>,
    pub skipped: Vec<u32>,
    pub outcome: Option<SessionOutcome>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AveragingProgress {
    pub current: u32,
    pub desired: u32,
    pub percent: f64,
}

impl StationModel {
    pub fn apply(&mut self, event: &QcEvent) {
        match event {
            QcEvent::StateChanged { .. } => {}
            QcEvent::ClassificationUpdated {
                classification,
                tally,
            } => {
                self.classification = Some(*classification);
                self.votes = Some(*tally);
            }
            QcEvent::AveragingProgress { current, desired } => {
                let percent = if *desired == 0 {
                    0.0
                } else {
                    f64::from(*current) * 100.0 / f64::from(*desired)
                };
                self.averaging = Some(AveragingProgress {
                    current: *current,
                    desired: *desired,
                    percent,
                });
            }
            QcEvent::QcUpdated { result } => self.results.push(result.clone()),
            QcEvent::SensorSkipped { sensor_id, .. } => self.skipped.push(*sensor_id),
            QcEvent::RobotMessage { line } => self.last_robot_message = Some(line.clone()),
            QcEvent::SessionFinished { outcome, .. } => self.outcome = Some(outcome.clone()),
        }
    }
}
