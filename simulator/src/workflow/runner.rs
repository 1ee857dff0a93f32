use crate::devices::robot::SimulatedRobot;
use crate::devices::spectrometer::SimulatedSpectrometer;
use crate::gui_bridge::bridge::OperatorBridge;
use crate::workflow::config::AppConfig;
use anyhow::Context;
use chrono::Local;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thzcore::device::{AveragingController, LastMessage, LineRouter, RobotLink};
use thzcore::qc::SessionSummary;
use thzcore::reference::{export_averaged, ExportHeader, StandardReference};
use thzcore::{EventBus, QcEvent, QcHandle, QcSession};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

type PortWriter = Box<dyn AsyncWrite + Unpin + Send>;
type PortReader = Box<dyn AsyncRead + Unpin + Send>;

/// Options for one QC batch.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub wafer_id: String,
    pub sensor_id: u32,
    /// Finish automatically after this many inspected sensors.
    pub sensors: Option<usize>,
    pub serve: bool,
}

/// Wires the station hardware (simulated or serial) to the core and runs one action.
#[derive(Clone)]
pub struct Runner {
    config: AppConfig,
    bus: EventBus,
}

impl Runner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            bus: EventBus::default(),
        }
    }

    fn averaging(&self, present: Arc<AtomicBool>) -> AveragingController<SimulatedSpectrometer> {
        let (tx, rx) = mpsc::channel(64);
        let sim = &self.config.simulator;
        let device = SimulatedSpectrometer::new(tx, sim.pulse.clone(), present, sim.trigger_period());
        let device = if sim.scan_control_running {
            device
        } else {
            device.offline()
        };
        AveragingController::new(device, rx)
    }

    /// Opens the configured serial port, or starts a simulated robot when none is set.
    fn connect_robot(
        &self,
        present: Arc<AtomicBool>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<(PortReader, PortWriter)> {
        let robot = &self.config.qc.robot;
        match &robot.port {
            Some(port) => {
                let stream = tokio_serial::new(port, robot.baudrate)
                    .open_native_async()
                    .with_context(|| format!("opening robot serial port {port}"))?;
                info!("robot connected on {port} at {} baud", robot.baudrate);
                let (reader, writer) = tokio::io::split(stream);
                Ok((Box::new(reader), Box::new(writer)))
            }
            None => {
                let (station, robot_side) = tokio::io::duplex(1024);
                SimulatedRobot::new(robot_side, present, self.config.simulator.robot_delay())
                    .spawn(cancel.child_token());
                info!("no robot port configured; using the simulated robot");
                let (reader, writer) = tokio::io::split(station);
                Ok((Box::new(reader), Box::new(writer)))
            }
        }
    }

    fn spawn_line_router(&self, reader: PortReader, last: LastMessage, cancel: CancellationToken) {
        let (temperature_tx, mut temperature_rx) = mpsc::unbounded_channel();
        let router = LineRouter::new(last)
            .with_temperature(temperature_tx)
            .with_events(self.bus.clone());
        tokio::spawn(async move {
            if let Err(err) = router.run(BufReader::new(reader), cancel).await {
                warn!("serial reader stopped: {err}");
            }
        });
        tokio::spawn(async move {
            while let Some(reading) = temperature_rx.recv().await {
                info!("temperature: {reading}");
            }
        });
    }

    /// Runs a QC batch until the operator finishes or cancels it.
    pub async fn run_qc(&self, options: RunOptions, interrupt: CancellationToken) -> anyhow::Result<SessionSummary> {
        let present = Arc::new(AtomicBool::new(self.config.simulator.start_with_sensor));
        let scope = CancellationToken::new();
        let _stop_robot = scope.clone().drop_guard();
        let (reader, writer) = self.connect_robot(present.clone(), &scope)?;

        let last = LastMessage::new();
        let link = RobotLink::new(writer, last.clone()).with_poll_interval(self.config.qc.robot.poll_interval());
        let (mut session, handle) = QcSession::new(
            self.averaging(present),
            link,
            self.config.qc.clone(),
            options.wafer_id.clone(),
            options.sensor_id,
            self.bus.clone(),
        );
        session
            .load_reference()
            .context("loading standard reference; run with --measure-reference first")?;

        let session_scope = session.cancel_token();
        self.spawn_line_router(reader, last, session_scope.clone());
        forward_cancel(interrupt, handle.clone(), session_scope.clone());
        if let Some(limit) = options.sensors {
            finish_after(limit, self.bus.subscribe(), handle.clone(), session_scope.clone());
        }

        let mut bridge = None;
        if options.serve {
            let mut operator = OperatorBridge::new(&handle, &self.bus, session_scope.clone());
            operator.serve(handle.clone(), self.config.bridge.address, session_scope.clone())?;
            bridge = Some(operator);
        }

        let summary = session.run().await.context("running QC session")?;
        drop(bridge);
        Ok(summary)
    }

    /// Averages the chip currently in the beam and stores it as the new standard reference.
    pub async fn measure_reference(
        &self,
        wafer_id: &str,
        sensor_id: u32,
        interrupt: CancellationToken,
    ) -> anyhow::Result<StandardReference> {
        let present = Arc::new(AtomicBool::new(true));
        let robot = RobotLink::new(tokio::io::sink(), LastMessage::new());
        let (mut session, handle) = QcSession::new(
            self.averaging(present),
            robot,
            self.config.qc.clone(),
            wafer_id,
            sensor_id,
            self.bus.clone(),
        );
        forward_cancel(interrupt, handle, session.cancel_token());
        session
            .measure_new_reference()
            .await
            .context("measuring standard reference")
    }

    /// Averages `averages` pulses and exports them under the configured export folder.
    pub async fn average_and_export(&self, averages: u32, interrupt: CancellationToken) -> anyhow::Result<PathBuf> {
        let present = Arc::new(AtomicBool::new(true));
        let qc = &self.config.qc;
        let mut averaging = self
            .averaging(present)
            .with_timeout(qc.qc.averaging_timeout())
            .with_events(self.bus.clone());
        averaging.configure(&qc.scan).await.context("configuring spectrometer")?;
        let acquired = averaging.acquire(averages, &interrupt).await;
        if let Err(err) = averaging.stop().await {
            warn!("failed to stop spectrometer: {err}");
        }
        let waveform = acquired.context("averaging pulses")?;

        let header = ExportHeader::qc(averages, qc.scan.begin_ps, Local::now());
        let path = export_averaged(
            &qc.paths.export_dir,
            &qc.paths.export_filename,
            &waveform,
            &header,
        )
        .context("exporting averaged pulse")?;
        Ok(path)
    }
}

/// Relays an external interrupt (Ctrl+C) into the session.
fn forward_cancel(interrupt: CancellationToken, handle: QcHandle, scope: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = scope.cancelled() => {}
            _ = interrupt.cancelled() => handle.cancel(),
        }
    });
}

/// Requests finish once `limit` sensors have a verdict.
fn finish_after(
    limit: usize,
    mut events: broadcast::Receiver<QcEvent>,
    handle: QcHandle,
    scope: CancellationToken,
) {
    tokio::spawn(async move {
        let mut inspected = 0usize;
        loop {
            let event = tokio::select! {
                _ = scope.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(QcEvent::QcUpdated { .. }) => {
                    inspected += 1;
                    if inspected >= limit {
                        info!("{inspected} sensors inspected; finishing");
                        handle.finish();
                        break;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use thzcore::{SessionOutcome, Verdict};

    fn station(dir: &tempfile::TempDir) -> AppConfig {
        let mut config =
            AppConfig::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("config/tqc.yml")).unwrap();
        config.qc.paths.reference_dir = dir.path().join("refs");
        config.qc.paths.qc_save_dir = dir.path().join("qc");
        config.qc.paths.export_dir = dir.path().join("export");
        config.qc.qc.num_avgs = 5;
        config.qc.qc.handling_time_s = 0.1;
        config.simulator.pulse.noise = 0.0;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn measured_reference_then_batch_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = station(&dir);

        let runner = Runner::new(config.clone());
        let reference = runner
            .measure_reference("W3", 1, CancellationToken::new())
            .await
            .unwrap();
        config.qc.paths.std_ref_file = reference.source.clone();

        let runner = Runner::new(config);
        let options = RunOptions {
            wafer_id: "W3".into(),
            sensor_id: 10,
            sensors: Some(2),
            serve: false,
        };
        let summary = runner.run_qc(options, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, SessionOutcome::Completed);
        assert_eq!(summary.results.len(), 2);
        assert!(summary.results.iter().all(|r| r.verdict == Verdict::Pass));
        assert_eq!(summary.results[0].sensor_id, 10);
        assert_eq!(summary.results[1].sensor_id, 11);
        assert!((summary.results[0].resonance_min_thz - 0.76).abs() < 0.03);
        assert!(summary.report.unwrap().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reference_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(station(&dir));
        let options = RunOptions {
            wafer_id: "W3".into(),
            sensor_id: 1,
            sensors: Some(1),
            serve: false,
        };
        let err = runner
            .run_qc(options, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("standard reference"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scan_control_fails_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = station(&dir);
        config.simulator.scan_control_running = false;
        let err = Runner::new(config)
            .average_and_export(3, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("not ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn export_lands_in_dated_folder() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(station(&dir));
        let path = runner
            .average_and_export(3, CancellationToken::new())
            .await
            .unwrap();
        assert!(path.starts_with(dir.path().join("export")));
        assert!(path.to_string_lossy().ends_with("average_0001.txt"));
    }
}
