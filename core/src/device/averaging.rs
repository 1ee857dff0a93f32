use crate::config::ScanConfig;
use crate::device::scan_control::{DeviceEvent, DeviceStatus, ScanControl};
use crate::prelude::{CoreError, CoreResult, PulseWaveform};
use crate::qc::events::{EventBus, QcEvent};
use crate::telemetry::log::LogManager;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Accumulation state of the current averaging cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AveragingSession {
    pub desired: u32,
    pub current: u32,
    pub is_acquiring: bool,
    pub last_result: Option<PulseWaveform>,
}

impl AveragingSession {
    pub fn is_done(&self) -> bool {
        self.desired > 0 && self.current == self.desired
    }
}

/// Owns the spectrometer driver and its pulse channel; turns pulse-ready
/// notifications into coherent averages.
pub struct AveragingController<D> {
    device: D,
    events: mpsc::Receiver<DeviceEvent>,
    session: AveragingSession,
    accumulator: Vec<f64>,
    time_axis: Vec<f64>,
    status: DeviceStatus,
    timeout: Option<Duration>,
    bus: Option<EventBus>,
    logger: LogManager,
}

impl<D: ScanControl> AveragingController<D> {
    pub fn new(device: D, events: mpsc::Receiver<DeviceEvent>) -> Self {
        Self {
            device,
            events,
            session: AveragingSession::default(),
            accumulator: Vec::new(),
            time_axis: Vec::new(),
            status: DeviceStatus::Idle,
            timeout: None,
            bus: None,
            logger: LogManager::new("averaging"),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn session(&self) -> &AveragingSession {
        &self.session
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Puts the driver in a known state: stopped, averaging cleared, scan range applied.
    pub async fn configure(&mut self, scan: &ScanConfig) -> CoreResult<()> {
        self.stop().await?;
        self.reset_averaging()?;
        self.device.set_begin(scan.begin_ps)?;
        self.device.set_end(scan.begin_ps + scan.window_ps)?;
        self.logger.record(&format!(
            "scan range {:.1}-{:.1} ps",
            scan.begin_ps,
            scan.begin_ps + scan.window_ps
        ));
        Ok(())
    }

    pub fn set_desired_averages(&mut self, averages: u32) -> CoreResult<()> {
        if averages == 0 {
            return Err(CoreError::InvalidInput(
                "desired averages must be at least 1".into(),
            ));
        }
        self.device.set_desired_averages(averages)?;
        self.session.desired = averages;
        Ok(())
    }

    /// Zeroes the counters and drops pulses queued before the reset.
    pub fn reset_averaging(&mut self) -> CoreResult<()> {
        self.device.reset_averaging()?;
        self.session.current = 0;
        self.session.last_result = None;
        self.accumulator.clear();
        self.time_axis.clear();

        let mut stale = 0usize;
        while let Ok(event) = self.events.try_recv() {
            match event {
                DeviceEvent::PulseReady(_) => stale += 1,
                DeviceEvent::StatusChanged(status) => self.status = status,
            }
        }
        if stale > 0 {
            self.logger
                .debug(&format!("discarded {stale} pulses queued before reset"));
        }
        Ok(())
    }

    pub async fn start(&mut self) -> CoreResult<()> {
        self.reset_averaging()?;
        match self.device.start().await {
            Ok(()) => {
                self.session.is_acquiring = true;
                self.logger.record("receiving pulses");
                Ok(())
            }
            Err(err) => {
                self.logger.error(&format!(
                    "spectrometer is not ready ({err}); start the vendor scan control before QC"
                ));
                Err(err.into())
            }
        }
    }

    pub async fn stop(&mut self) -> CoreResult<()> {
        self.device.stop().await?;
        if self.session.is_acquiring {
            self.logger.record("acquisition stopped");
        }
        self.session.is_acquiring = false;
        Ok(())
    }

    pub fn is_averaging_done(&self) -> bool {
        self.session.is_done()
    }

    /// Folds one pulse into the running mean. Pulses arriving while idle or after
    /// completion are ignored so the count never overshoots.
    pub fn record_pulse(&mut self, pulse: PulseWaveform) {
        if !self.session.is_acquiring || self.session.desired == 0 || self.is_averaging_done() {
            return;
        }
        if self.session.current > 0 && pulse.len() != self.accumulator.len() {
            self.logger.warn(&format!(
                "dropping pulse with {} samples, expected {}",
                pulse.len(),
                self.accumulator.len()
            ));
            return;
        }

        if self.session.current == 0 {
            self.accumulator = pulse.amplitude;
            self.time_axis = pulse.time_ps;
        } else {
            let n = f64::from(self.session.current + 1);
            for (acc, sample) in self.accumulator.iter_mut().zip(pulse.amplitude) {
                *acc += (sample - *acc) / n;
            }
        }
        self.session.current += 1;

        if let Some(bus) = &self.bus {
            bus.publish(QcEvent::AveragingProgress {
                current: self.session.current,
                desired: self.session.desired,
            });
        }
        if self.is_averaging_done() {
            self.session.last_result = Some(PulseWaveform {
                time_ps: self.time_axis.clone(),
                amplitude: self.accumulator.clone(),
            });
            self.logger.debug(&format!(
                "averaging done {}/{}",
                self.session.current, self.session.desired
            ));
        }
    }

    /// Waits on the pulse channel until the desired count is reached.
    ///
    /// Cancellation is checked at every suspension point. When it fires, the
    /// averaging counters are left as they were; callers must reset before trusting
    /// `last_result` again.
    pub async fn do_averaging_task(&mut self, cancel: &CancellationToken) -> CoreResult<PulseWaveform> {
        let limit = self.timeout;
        let outcome = match limit {
            Some(limit) => tokio::select! {
                _ = cancel.cancelled() => Err(CoreError::Cancelled),
                collected = time::timeout(limit, self.collect_until_done()) => {
                    collected.unwrap_or(Err(CoreError::AveragingTimeout {
                        current: 0,
                        desired: 0,
                    }))
                }
            },
            None => tokio::select! {
                _ = cancel.cancelled() => Err(CoreError::Cancelled),
                collected = self.collect_until_done() => collected,
            },
        };

        match outcome {
            Err(CoreError::AveragingTimeout { .. }) => {
                let (current, desired) = (self.session.current, self.session.desired);
                self.logger
                    .error(&format!("averaging stalled at {current}/{desired} pulses"));
                Err(CoreError::AveragingTimeout { current, desired })
            }
            other => other,
        }
    }

    async fn collect_until_done(&mut self) -> CoreResult<PulseWaveform> {
        loop {
            if self.is_averaging_done() {
                if let Some(result) = &self.session.last_result {
                    return Ok(result.clone());
                }
            }
            match self.events.recv().await {
                Some(DeviceEvent::PulseReady(pulse)) => self.record_pulse(pulse),
                Some(DeviceEvent::StatusChanged(status)) => {
                    self.logger.debug(&format!("device status {status:?}"));
                    self.status = status;
                }
                None => {
                    return Err(CoreError::Device("pulse channel closed".into()));
                }
            }
        }
    }

    /// Reset, configure `averages`, start if needed, then wait for completion.
    pub async fn acquire(&mut self, averages: u32, cancel: &CancellationToken) -> CoreResult<PulseWaveform> {
        self.reset_averaging()?;
        self.set_desired_averages(averages)?;
        if !self.session.is_acquiring {
            self.start().await?;
        }
        self.do_averaging_task(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sensor_pulse, FakeSpectrometer};

    fn controller(ready: bool) -> (AveragingController<FakeSpectrometer>, mpsc::Sender<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let device = FakeSpectrometer::manual(ready);
        (AveragingController::new(device, rx), tx)
    }

    #[tokio::test]
    async fn done_exactly_when_count_reaches_desired() {
        for n in 1..=6u32 {
            let (mut ctl, _tx) = controller(true);
            ctl.reset_averaging().unwrap();
            ctl.set_desired_averages(n).unwrap();
            ctl.start().await.unwrap();
            for i in 1..=n {
                assert!(!ctl.is_averaging_done());
                ctl.record_pulse(sensor_pulse());
                assert_eq!(ctl.session().current, i);
            }
            assert!(ctl.is_averaging_done());
            ctl.record_pulse(sensor_pulse());
            assert_eq!(ctl.session().current, n);
        }
    }

    #[test]
    fn zero_averages_is_invalid() {
        let (mut ctl, _tx) = controller(true);
        assert!(matches!(
            ctl.set_desired_averages(0),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(!ctl.is_averaging_done());
    }

    #[tokio::test]
    async fn average_is_the_mean_of_pulses() {
        let (mut ctl, _tx) = controller(true);
        ctl.set_desired_averages(2).unwrap();
        ctl.start().await.unwrap();
        let a = PulseWaveform::new(vec![0.0, 1.0], vec![1.0, 3.0]).unwrap();
        let b = PulseWaveform::new(vec![0.0, 1.0], vec![3.0, 5.0]).unwrap();
        ctl.record_pulse(a);
        ctl.record_pulse(b);
        let result = ctl.session().last_result.clone().unwrap();
        assert_eq!(result.amplitude, vec![2.0, 4.0]);
    }

    #[tokio::test]
    async fn start_on_uninitialised_driver_is_recoverable() {
        let (mut ctl, _tx) = controller(false);
        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotReady(_)));
        assert!(!ctl.session().is_acquiring);
    }

    #[tokio::test]
    async fn reset_drops_queued_pulses() {
        let (mut ctl, tx) = controller(true);
        ctl.set_desired_averages(1).unwrap();
        ctl.start().await.unwrap();
        tx.send(DeviceEvent::PulseReady(sensor_pulse())).await.unwrap();
        ctl.reset_averaging().unwrap();
        assert_eq!(ctl.session().current, 0);

        let cancel = CancellationToken::new();
        tx.send(DeviceEvent::PulseReady(sensor_pulse())).await.unwrap();
        let result = ctl.do_averaging_task(&cancel).await.unwrap();
        assert_eq!(result, sensor_pulse());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_hardware_times_out() {
        let (ctl, _tx) = controller(true);
        let mut ctl = ctl.with_timeout(Some(Duration::from_secs(5)));
        ctl.set_desired_averages(3).unwrap();
        ctl.start().await.unwrap();
        let cancel = CancellationToken::new();
        let err = ctl.do_averaging_task(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::AveragingTimeout {
                current: 0,
                desired: 3
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_unblocks_the_wait() {
        let (mut ctl, _tx) = controller(true);
        ctl.set_desired_averages(3).unwrap();
        ctl.start().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ctl.do_averaging_task(&cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_runs_against_streaming_device() {
        let (tx, rx) = mpsc::channel(64);
        let device = FakeSpectrometer::streaming(tx, Duration::from_millis(10));
        let mut ctl = AveragingController::new(device, rx);
        let cancel = CancellationToken::new();
        let result = ctl.acquire(5, &cancel).await.unwrap();
        assert_eq!(ctl.session().current, 5);
        assert_eq!(result.len(), sensor_pulse().len());
        ctl.stop().await.unwrap();
    }
}
