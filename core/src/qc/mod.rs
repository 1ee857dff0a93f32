pub mod events;
pub mod report;
pub mod session;

pub use events::{EventBus, QcEvent};
pub use session::{QcCommand, QcHandle, QcSession, QcState, SessionOutcome, SessionStatus, SessionSummary};
