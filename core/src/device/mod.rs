pub mod averaging;
pub mod robot;
pub mod scan_control;

pub use averaging::{AveragingController, AveragingSession};
pub use robot::{LastMessage, LineRouter, RobotCommand, RobotLink};
pub use scan_control::{DeviceError, DeviceEvent, DeviceStatus, ScanControl};
