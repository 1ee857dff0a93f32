use crate::generator::profile::{PulseGenerator, PulseProfile};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thzcore::device::{DeviceError, DeviceEvent, DeviceStatus, ScanControl};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

/// Offline stand-in for the TeraSmart scan control. While started it triggers
/// every `period` and pushes a sensor or air pulse depending on the slot state.
pub struct SimulatedSpectrometer {
    events: mpsc::Sender<DeviceEvent>,
    generator: Arc<Mutex<PulseGenerator>>,
    present: Arc<AtomicBool>,
    period: Duration,
    ready: bool,
    begin_ps: f64,
    end_ps: f64,
    emitter: Option<JoinHandle<()>>,
}

impl SimulatedSpectrometer {
    pub fn new(
        events: mpsc::Sender<DeviceEvent>,
        profile: PulseProfile,
        present: Arc<AtomicBool>,
        period: Duration,
    ) -> Self {
        Self {
            events,
            generator: Arc::new(Mutex::new(PulseGenerator::new(profile))),
            present,
            period,
            ready: true,
            begin_ps: 0.0,
            end_ps: 0.0,
            emitter: None,
        }
    }

    /// Simulates vendor software that has not been started.
    pub fn offline(mut self) -> Self {
        self.ready = false;
        self
    }

    fn spawn_emitter(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        let generator = self.generator.clone();
        let present = self.present.clone();
        let period = self.period;
        let begin_ps = self.begin_ps;
        let end_ps = self.end_ps;

        tokio::spawn(async move {
            let _ = events.try_send(DeviceEvent::StatusChanged(DeviceStatus::Acquiring));
            let mut ticker = time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pulse = {
                    let mut generator = match generator.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    let samples = generator.sample_count(begin_ps, end_ps);
                    if present.load(Ordering::SeqCst) {
                        generator.sensor(begin_ps, samples)
                    } else {
                        generator.air(begin_ps, samples)
                    }
                };
                match events.try_send(DeviceEvent::PulseReady(pulse)) {
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    // nobody is draining the queue; the trigger is lost as on the real device
                    Err(mpsc::error::TrySendError::Full(_)) | Ok(()) => {}
                }
            }
        })
    }
}

impl ScanControl for SimulatedSpectrometer {
    fn set_begin(&mut self, begin_ps: f64) -> Result<(), DeviceError> {
        if !begin_ps.is_finite() {
            return Err(DeviceError::Rejected(format!("begin {begin_ps} ps")));
        }
        self.begin_ps = begin_ps;
        Ok(())
    }

    fn set_end(&mut self, end_ps: f64) -> Result<(), DeviceError> {
        if !(end_ps.is_finite() && end_ps > self.begin_ps) {
            return Err(DeviceError::Rejected(format!(
                "end {end_ps} ps is not after begin {} ps",
                self.begin_ps
            )));
        }
        self.end_ps = end_ps;
        Ok(())
    }

    fn set_desired_averages(&mut self, averages: u32) -> Result<(), DeviceError> {
        debug!("desired averages set to {averages}");
        Ok(())
    }

    fn reset_averaging(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeviceError> {
        if !self.ready {
            return Err(DeviceError::NotReady(
                "scan control is not running; start the acquisition software first".into(),
            ));
        }
        let running = self
            .emitter
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if !running {
            self.emitter = Some(self.spawn_emitter());
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.emitter.take() {
            task.abort();
            let _ = self
                .events
                .try_send(DeviceEvent::StatusChanged(DeviceStatus::Idle));
        }
        Ok(())
    }
}

impl Drop for SimulatedSpectrometer {
    fn drop(&mut self) {
        if let Some(task) = self.emitter.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrometer(present: bool) -> (SimulatedSpectrometer, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let device = SimulatedSpectrometer::new(
            tx,
            PulseProfile::default(),
            Arc::new(AtomicBool::new(present)),
            Duration::from_millis(20),
        );
        (device, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn emits_pulses_covering_the_scan_range() {
        let (mut device, mut rx) = spectrometer(true);
        device.set_begin(1200.0).unwrap();
        device.set_end(1239.9).unwrap();
        device.start().await.unwrap();

        let pulse = loop {
            match rx.recv().await.unwrap() {
                DeviceEvent::PulseReady(pulse) => break pulse,
                DeviceEvent::StatusChanged(_) => continue,
            }
        };
        assert_eq!(pulse.len(), 400);
        assert_eq!(pulse.time_ps[0], 1200.0);
        device.stop().await.unwrap();
    }

    #[tokio::test]
    async fn offline_device_is_not_ready() {
        let (device, _rx) = spectrometer(true);
        let mut device = device.offline();
        assert!(matches!(
            device.start().await,
            Err(DeviceError::NotReady(_))
        ));
    }

    #[test]
    fn end_before_begin_is_rejected() {
        let (mut device, _rx) = spectrometer(true);
        device.set_begin(10.0).unwrap();
        assert!(device.set_end(5.0).is_err());
    }
}
