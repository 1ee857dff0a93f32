use crate::config::QcConfig;
use crate::device::averaging::AveragingController;
use crate::device::robot::{RobotCommand, RobotLink};
use crate::device::scan_control::ScanControl;
use crate::math::fft::SpectrumAnalyzer;
use crate::prelude::{Classification, CoreError, CoreResult, PulseWaveform, QcResult, Verdict};
use crate::processing::classifier::Classifier;
use crate::processing::compare::{resonance_minimum, ComparisonParams, ReferenceBand};
use crate::qc::events::{EventBus, QcEvent};
use crate::qc::report;
use crate::reference::{save_reference, ExportHeader, StandardReference};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{Metrics, MetricsRecorder};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QcState {
    Idle,
    Homing,
    CheckingSensor,
    VerifyingSensor,
    SensorError,
    Averaging,
    Comparing,
    Ejecting,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Operator finished the batch.
    Completed,
    Cancelled,
    /// Unrecoverable failure (homing, device, repeated verification failures).
    Aborted(String),
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: QcState,
    pub running: bool,
    pub complete: bool,
    pub sensor_id: u32,
    pub run_count: u32,
    pub classification: Classification,
    pub last_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcCommand {
    /// Stop after the current sensor has been ejected.
    Finish,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub results: Vec<QcResult>,
    pub metrics: Metrics,
    pub report: Option<PathBuf>,
}

/// Operator-side handle: the only way to influence a running session.
#[derive(Debug, Clone)]
pub struct QcHandle {
    commands: mpsc::Sender<QcCommand>,
    cancel: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl QcHandle {
    pub fn finish(&self) {
        let _ = self.commands.try_send(QcCommand::Finish);
    }

    /// Idempotent; safe to call after the session has ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

/// Batch QC actor. Owns the spectrometer controller and the robot link exclusively;
/// state changes only happen inside its own methods.
pub struct QcSession<D, W> {
    averaging: AveragingController<D>,
    robot: RobotLink<W>,
    classifier: Classifier,
    analyzer: SpectrumAnalyzer,
    config: QcConfig,
    wafer_id: String,
    reference: Option<StandardReference>,
    reference_band: Option<ReferenceBand>,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    commands: mpsc::Receiver<QcCommand>,
    cancel: CancellationToken,
    results: Vec<QcResult>,
    metrics: MetricsRecorder,
    bus: EventBus,
    logger: LogManager,
}

impl<D, W> QcSession<D, W>
where
    D: ScanControl,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        averaging: AveragingController<D>,
        robot: RobotLink<W>,
        config: QcConfig,
        wafer_id: impl Into<String>,
        sensor_id: u32,
        bus: EventBus,
    ) -> (Self, QcHandle) {
        let status = SessionStatus {
            state: QcState::Idle,
            running: false,
            complete: false,
            sensor_id,
            run_count: 0,
            classification: Classification::Sensor,
            last_message: robot.last_message().get(),
        };
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (command_tx, command_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let session = Self {
            averaging: averaging
                .with_timeout(config.qc.averaging_timeout())
                .with_events(bus.clone()),
            robot,
            classifier: Classifier::new(config.classification.clone()).with_events(bus.clone()),
            analyzer: SpectrumAnalyzer::new(),
            config,
            wafer_id: wafer_id.into(),
            reference: None,
            reference_band: None,
            status,
            status_tx,
            commands: command_rx,
            cancel: cancel.clone(),
            results: Vec::new(),
            metrics: MetricsRecorder::new(),
            bus,
            logger: LogManager::new("qc"),
        };
        let handle = QcHandle {
            commands: command_tx,
            cancel,
            status: status_rx,
        };
        (session, handle)
    }

    pub fn with_reference(mut self, reference: StandardReference) -> CoreResult<Self> {
        self.install_reference(reference)?;
        Ok(self)
    }

    /// Loads the standard reference named in the configuration.
    pub fn load_reference(&mut self) -> CoreResult<()> {
        let path = self.config.paths.std_ref_path();
        let reference = StandardReference::load(&path, self.config.scan.window_ps, &self.analyzer)?;
        self.install_reference(reference)
    }

    fn install_reference(&mut self, reference: StandardReference) -> CoreResult<()> {
        let band = reference.band(ComparisonParams::from(&self.config.qc))?;
        self.reference = Some(reference);
        self.reference_band = Some(band);
        Ok(())
    }

    pub fn reference(&self) -> Option<&StandardReference> {
        self.reference.as_ref()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn results(&self) -> &[QcResult] {
        &self.results
    }

    /// Cancellation token scoping every task spawned for this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent; never fails.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs the batch until the operator finishes, cancels, or an unrecoverable
    /// failure occurs. Only a missing reference is reported as `Err`; every other
    /// ending is described by the returned outcome.
    pub async fn run(&mut self) -> CoreResult<SessionSummary> {
        if self.reference_band.is_none() {
            let err = CoreError::Config("no standard reference loaded; QC cannot start".into());
            self.logger.error(&err.to_string());
            return Err(err);
        }

        let started_at = Local::now();
        self.status.running = true;
        self.status.complete = false;
        self.logger.record(&format!(
            "QC session started for wafer {} at sensor {}",
            self.wafer_id, self.status.sensor_id
        ));

        let outcome = match self.drive().await {
            Ok(()) => SessionOutcome::Completed,
            Err(CoreError::Cancelled) => SessionOutcome::Cancelled,
            Err(err) => {
                self.logger.error(&format!("session aborted: {err}"));
                SessionOutcome::Aborted(err.to_string())
            }
        };
        self.teardown(outcome, started_at).await
    }

    async fn drive(&mut self) -> CoreResult<()> {
        self.averaging.configure(&self.config.scan).await?;
        self.home().await?;

        let mut consecutive_skips = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.poll_commands();
            if self.status.complete {
                return Ok(());
            }

            match self.inspect_slot().await {
                Ok(()) => consecutive_skips = 0,
                Err(CoreError::SensorVerification(reason)) => {
                    consecutive_skips += 1;
                    self.metrics.record_skip();
                    self.logger.warn(&format!(
                        "skipping sensor {}: {reason}",
                        self.status.sensor_id
                    ));
                    self.bus.publish(QcEvent::SensorSkipped {
                        sensor_id: self.status.sensor_id,
                        reason: reason.clone(),
                    });
                    if consecutive_skips >= self.config.qc.max_consecutive_skips {
                        return Err(CoreError::SensorVerification(format!(
                            "{consecutive_skips} consecutive slots failed verification, last: {reason}"
                        )));
                    }
                    match self.eject().await {
                        Ok(()) => {}
                        Err(CoreError::AckTimeout(detail)) => self.recover_robot(detail).await?,
                        Err(err) => return Err(err),
                    }
                }
                Err(CoreError::AckTimeout(detail)) => self.recover_robot(detail).await?,
                Err(err) => return Err(err),
            }
        }
    }

    /// One slot: presence check, averaging, comparison, eject.
    async fn inspect_slot(&mut self) -> CoreResult<()> {
        self.status.run_count += 1;
        self.check_sensor().await?;

        self.set_state(QcState::Averaging);
        let averaged = self
            .averaging
            .acquire(self.config.qc.num_avgs, &self.cancel)
            .await?
            .windowed(self.config.scan.window_ps);

        self.set_state(QcState::Comparing);
        let result = self.compare(&averaged)?;
        self.record_result(result);

        self.eject().await
    }

    async fn home(&mut self) -> CoreResult<()> {
        self.set_state(QcState::Homing);
        self.robot_command(RobotCommand::Home).await
    }

    async fn check_sensor(&mut self) -> CoreResult<()> {
        self.set_state(QcState::CheckingSensor);
        if self.quick_scan().await? == Classification::Sensor {
            return Ok(());
        }

        self.robot_command(RobotCommand::Insert).await?;
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(CoreError::Cancelled),
            _ = time::sleep(self.config.qc.handling_time()) => {}
        }

        self.set_state(QcState::VerifyingSensor);
        if self.quick_scan().await? == Classification::Air {
            self.set_state(QcState::SensorError);
            return Err(CoreError::SensorVerification(format!(
                "sensor {} still reads as air after INSERT",
                self.status.sensor_id
            )));
        }
        Ok(())
    }

    /// Single-shot acquisition followed by classification.
    async fn quick_scan(&mut self) -> CoreResult<Classification> {
        let pulse = self
            .averaging
            .acquire(1, &self.cancel)
            .await?
            .windowed(self.config.scan.window_ps);
        let classification = self.classifier.classify(&pulse);
        self.status.classification = classification;
        self.publish_status();
        Ok(classification)
    }

    fn compare(&self, averaged: &PulseWaveform) -> CoreResult<QcResult> {
        let band = self
            .reference_band
            .as_ref()
            .ok_or_else(|| CoreError::Config("no standard reference loaded".into()))?;
        let spectrum = self.analyzer.compute(averaged)?;
        let comparison = band.compare(&spectrum)?;
        let resonance_min_thz = resonance_minimum(&spectrum, self.config.qc.db_scale)?;
        Ok(QcResult {
            sensor_id: self.status.sensor_id,
            wafer_id: self.wafer_id.clone(),
            verdict: comparison.verdict,
            resonance_min_thz,
            violations: comparison.violations,
            timestamp: Local::now(),
        })
    }

    fn record_result(&mut self, result: QcResult) {
        match result.verdict {
            Verdict::Pass => self.metrics.record_pass(),
            Verdict::Fail => self.metrics.record_fail(),
        }
        self.logger.record(&format!(
            "sensor {}: {} ({} violations, resonance {:.4} THz)",
            result.sensor_id, result.verdict, result.violations, result.resonance_min_thz
        ));
        self.bus.publish(QcEvent::QcUpdated {
            result: result.clone(),
        });
        self.results.push(result);
    }

    async fn eject(&mut self) -> CoreResult<()> {
        self.set_state(QcState::Ejecting);
        self.robot_command(RobotCommand::Eject).await?;
        self.advance_slot();
        Ok(())
    }

    /// Abandons the current slot after a missing ACK. A robot that answers HOME keeps
    /// the session alive; one that does not ends it.
    async fn recover_robot(&mut self, detail: String) -> CoreResult<()> {
        self.logger.warn(&format!(
            "abandoning sensor {} after robot timeout ({detail}); re-homing",
            self.status.sensor_id
        ));
        self.advance_slot();
        self.home().await
    }

    async fn robot_command(&mut self, command: RobotCommand) -> CoreResult<()> {
        let outcome = self
            .robot
            .command(command, self.config.robot.ack_timeout(), &self.cancel)
            .await;
        self.status.last_message = self.robot.last_message().get();
        self.publish_status();
        outcome
    }

    fn advance_slot(&mut self) {
        self.status.sensor_id += 1;
        self.publish_status();
    }

    fn poll_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                QcCommand::Finish => {
                    self.logger.record("finish requested by operator");
                    self.status.complete = true;
                }
            }
        }
    }

    fn set_state(&mut self, state: QcState) {
        if self.status.state != state {
            self.logger
                .debug(&format!("{:?} -> {:?}", self.status.state, state));
        }
        self.status.state = state;
        self.publish_status();
        self.bus.publish(QcEvent::StateChanged {
            state,
            sensor_id: self.status.sensor_id,
        });
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    async fn teardown(&mut self, outcome: SessionOutcome, started_at: DateTime<Local>) -> CoreResult<SessionSummary> {
        if let Err(err) = self.averaging.stop().await {
            self.logger.warn(&format!("failed to stop spectrometer: {err}"));
        }
        self.status.running = false;
        let final_state = if outcome == SessionOutcome::Completed {
            QcState::Complete
        } else {
            QcState::Cancelled
        };
        self.set_state(final_state);

        let metrics = self.metrics.snapshot();
        let report = if outcome == SessionOutcome::Completed || !self.results.is_empty() {
            match report::write_report(
                &self.config.paths.qc_save_dir,
                &started_at,
                &self.results,
                &self.config.qc,
                &metrics,
            ) {
                Ok(path) => {
                    self.logger.record(&format!("report written to {}", path.display()));
                    Some(path)
                }
                Err(err) => {
                    self.logger.error(&format!("failed to write report: {err}"));
                    None
                }
            }
        } else {
            None
        };

        self.logger.record(&format!(
            "session ended ({outcome:?}): {} passed, {} failed, {} skipped",
            metrics.passed, metrics.failed, metrics.skipped
        ));
        self.bus.publish(QcEvent::SessionFinished {
            outcome: outcome.clone(),
            report: report.clone(),
        });
        // ends child tasks spawned under this session's token
        self.cancel.cancel();
        Ok(SessionSummary {
            outcome,
            results: self.results.clone(),
            metrics,
            report,
        })
    }

    /// Averages `num_avgs` pulses at the current slot, saves them as the new standard
    /// reference and switches the session over to it.
    pub async fn measure_new_reference(&mut self) -> CoreResult<StandardReference> {
        self.averaging.configure(&self.config.scan).await?;
        let acquired = self
            .averaging
            .acquire(self.config.qc.num_avgs, &self.cancel)
            .await;
        if let Err(err) = self.averaging.stop().await {
            self.logger.warn(&format!("failed to stop spectrometer: {err}"));
        }
        let waveform = acquired?.windowed(self.config.scan.window_ps);

        let header = ExportHeader::qc(self.config.qc.num_avgs, self.config.scan.begin_ps, Local::now());
        let path = save_reference(
            &self.config.paths.reference_dir,
            &waveform,
            &header,
            &self.wafer_id,
            self.status.sensor_id,
        )?;
        if let Some(name) = path.file_name() {
            self.config.paths.std_ref_file = PathBuf::from(name);
        }
        self.load_reference()?;
        self.logger
            .record(&format!("new standard reference {}", path.display()));

        self.reference
            .clone()
            .ok_or_else(|| CoreError::Config("reference did not load".into()))
    }
}

impl<D, W> Drop for QcSession<D, W> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
