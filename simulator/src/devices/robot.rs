use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Handling robot on the far side of an in-memory serial port. Acknowledges every
/// command after `delay` and moves a chip in or out of the beam.
pub struct SimulatedRobot {
    port: DuplexStream,
    present: Arc<AtomicBool>,
    delay: Duration,
    temperature_c: f64,
}

impl SimulatedRobot {
    pub fn new(port: DuplexStream, present: Arc<AtomicBool>, delay: Duration) -> Self {
        Self {
            port,
            present,
            delay,
            temperature_c: 21.5,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let SimulatedRobot {
                port,
                present,
                delay,
                temperature_c,
            } = self;
            let (reader, mut writer) = tokio::io::split(port);
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => line,
                        _ => break,
                    },
                };
                let command = line.trim();
                debug!("[sim-robot] received {command}");
                match command {
                    "INSERT" => present.store(true, Ordering::SeqCst),
                    "EJECT" => present.store(false, Ordering::SeqCst),
                    "HOME" => {
                        let reading = format!("Chamber {temperature_c:.1} deg C\n");
                        if writer.write_all(reading.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    other => {
                        info!("[sim-robot] ignoring unknown command {other:?}");
                        continue;
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(delay) => {}
                }
                if writer.write_all(b"ACK\n").await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn insert_places_a_chip_and_acks() {
        let (station, robot_side) = tokio::io::duplex(64);
        let present = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        SimulatedRobot::new(robot_side, present.clone(), Duration::from_millis(300))
            .spawn(cancel.clone());

        let (mut rx, mut tx) = tokio::io::split(station);
        tx.write_all(b"INSERT\n").await.unwrap();
        let mut buf = [0u8; 8];
        let n = rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ACK\n");
        assert!(present.load(Ordering::SeqCst));
        cancel.cancel();
    }
}
