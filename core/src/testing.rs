//! Synthetic pulses, configuration and fake hardware shared by the unit tests.

use crate::config::{
    ClassificationConfig, PathsConfig, QcConfig, QcParams, RobotConfig, ScanConfig,
};
use crate::device::scan_control::{DeviceError, DeviceEvent, ScanControl};
use crate::prelude::PulseWaveform;
use crate::processing::compare::DbScale;
use crate::qc::session::QcHandle;
use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

const SAMPLES: usize = 400;
const DT_PS: f64 = 0.1;

fn time_axis() -> Vec<f64> {
    (0..SAMPLES).map(|i| i as f64 * DT_PS).collect()
}

/// Single clean Gaussian pulse centred at 12 ps.
pub fn sensor_pulse() -> PulseWaveform {
    let amplitude = (0..SAMPLES)
        .map(|i| {
            let offset = i as f64 - 120.0;
            (-offset * offset / 32.0).exp()
        })
        .collect();
    PulseWaveform {
        time_ps: time_axis(),
        amplitude,
    }
}

/// Slowly decaying ringing from the first sample on, as seen through an empty slot.
pub fn air_pulse() -> PulseWaveform {
    let amplitude = (0..SAMPLES)
        .map(|i| {
            let i = i as f64;
            (2.0 * PI * i / 8.0).sin() * (-i / 200.0).exp()
        })
        .collect();
    PulseWaveform {
        time_ps: time_axis(),
        amplitude,
    }
}

pub fn test_config() -> QcConfig {
    QcConfig {
        scan: ScanConfig {
            begin_ps: 0.0,
            window_ps: 39.9,
        },
        classification: ClassificationConfig {
            window_start_ps: 0.0,
            window_end_ps: 20.0,
            distance: 10.0,
            prominence: 0.25,
            width: 5.0,
            threshold: 0.005,
            pulse_position: 40,
            max_prominent_peaks: 2,
            max_wide_peaks: 2,
            max_threshold_peaks: 3,
        },
        qc: QcParams {
            lower_freq_thz: 0.2,
            upper_freq_thz: 1.5,
            allowed_error_db: 3.0,
            max_violations: 5,
            num_avgs: 5,
            handling_time_s: 0.0,
            chips_per_wafer: 0,
            db_scale: DbScale::Natural,
            averaging_timeout_s: 30.0,
            max_consecutive_skips: 3,
        },
        robot: RobotConfig {
            port: None,
            baudrate: 9600,
            timeout_s: 5.0,
            poll_interval_s: 1.0,
        },
        paths: PathsConfig {
            std_ref_file: PathBuf::from("std_ref.txt"),
            reference_dir: PathBuf::from("resources/references"),
            qc_save_dir: PathBuf::from("output/qc"),
            export_dir: PathBuf::from("output/export"),
            export_filename: "average.txt".to_string(),
        },
    }
}

/// Spectrometer stand-in. In streaming mode it emits a pulse every `period` while
/// started: a sensor pulse when `present` is set, otherwise an air trace.
pub struct FakeSpectrometer {
    ready: bool,
    events: Option<mpsc::Sender<DeviceEvent>>,
    period: Duration,
    present: Arc<AtomicBool>,
    emitter: Option<JoinHandle<()>>,
    pub begin_ps: f64,
    pub end_ps: f64,
    pub desired: u32,
}

impl FakeSpectrometer {
    /// No emitter; pulses are pushed by the test.
    pub fn manual(ready: bool) -> Self {
        Self {
            ready,
            events: None,
            period: Duration::from_millis(10),
            present: Arc::new(AtomicBool::new(true)),
            emitter: None,
            begin_ps: 0.0,
            end_ps: 0.0,
            desired: 0,
        }
    }

    pub fn streaming(events: mpsc::Sender<DeviceEvent>, period: Duration) -> Self {
        Self::with_presence(events, period, Arc::new(AtomicBool::new(true)))
    }

    pub fn with_presence(
        events: mpsc::Sender<DeviceEvent>,
        period: Duration,
        present: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ready: true,
            events: Some(events),
            period,
            present,
            emitter: None,
            begin_ps: 0.0,
            end_ps: 0.0,
            desired: 0,
        }
    }
}

impl ScanControl for FakeSpectrometer {
    fn set_begin(&mut self, begin_ps: f64) -> Result<(), DeviceError> {
        self.begin_ps = begin_ps;
        Ok(())
    }

    fn set_end(&mut self, end_ps: f64) -> Result<(), DeviceError> {
        self.end_ps = end_ps;
        Ok(())
    }

    fn set_desired_averages(&mut self, averages: u32) -> Result<(), DeviceError> {
        self.desired = averages;
        Ok(())
    }

    fn reset_averaging(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeviceError> {
        if !self.ready {
            return Err(DeviceError::NotReady("scan control not running".into()));
        }
        let running = self.emitter.as_ref().is_some_and(|task| !task.is_finished());
        if let (Some(tx), false) = (self.events.clone(), running) {
            let period = self.period;
            let present = self.present.clone();
            self.emitter = Some(tokio::spawn(async move {
                let mut ticker = time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let pulse = if present.load(Ordering::SeqCst) {
                        sensor_pulse()
                    } else {
                        air_pulse()
                    };
                    // a full queue drops the pulse, like hardware that keeps triggering
                    if let Err(mpsc::error::TrySendError::Closed(_)) =
                        tx.try_send(DeviceEvent::PulseReady(pulse))
                    {
                        break;
                    }
                }
            }));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.emitter.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for FakeSpectrometer {
    fn drop(&mut self) {
        if let Some(task) = self.emitter.take() {
            task.abort();
        }
    }
}

/// Which commands the fake robot acknowledges and what they do to the slot.
#[derive(Debug, Clone)]
pub struct RobotScript {
    pub ack_home: bool,
    /// Stop acknowledging HOME after this many acknowledgements.
    pub home_ack_limit: Option<u32>,
    pub ack_insert: bool,
    pub ack_eject: bool,
    pub insert_places_sensor: bool,
    /// Ask the session to finish when the first sensor is ejected.
    pub finish_on_eject: bool,
}

impl Default for RobotScript {
    fn default() -> Self {
        Self {
            ack_home: true,
            home_ack_limit: None,
            ack_insert: true,
            ack_eject: true,
            insert_places_sensor: true,
            finish_on_eject: true,
        }
    }
}

/// Robot controller on the far end of an in-memory serial port.
pub struct FakeRobot {
    port: DuplexStream,
    script: RobotScript,
    present: Arc<AtomicBool>,
    handle: QcHandle,
}

impl FakeRobot {
    pub fn new(port: DuplexStream, script: RobotScript, present: Arc<AtomicBool>, handle: QcHandle) -> Self {
        Self {
            port,
            script,
            present,
            handle,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let FakeRobot {
                port,
                script,
                present,
                handle,
            } = self;
            let (reader, mut writer) = tokio::io::split(port);
            let mut lines = BufReader::new(reader).lines();
            let mut homes_acked = 0u32;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => line,
                        _ => break,
                    },
                };
                let ack = match line.trim() {
                    "HOME" => {
                        let _ = writer.write_all(b"Chamber 21.7 deg C\n").await;
                        let within_limit = script.home_ack_limit.map_or(true, |limit| homes_acked < limit);
                        let ack = script.ack_home && within_limit;
                        if ack {
                            homes_acked += 1;
                        }
                        ack
                    }
                    "INSERT" => {
                        if script.insert_places_sensor {
                            present.store(true, Ordering::SeqCst);
                        }
                        script.ack_insert
                    }
                    "EJECT" => {
                        present.store(false, Ordering::SeqCst);
                        if script.finish_on_eject {
                            handle.finish();
                        }
                        script.ack_eject
                    }
                    _ => false,
                };
                if ack && writer.write_all(b"ACK\n").await.is_err() {
                    break;
                }
            }
        })
    }
}
