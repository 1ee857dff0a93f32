use crate::prelude::{CoreError, CoreResult};
use crate::qc::events::{EventBus, QcEvent};
use crate::telemetry::log::LogManager;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const ACK: &str = "ACK";
/// Placeholder written into the message buffer before every acknowledged command.
pub const BLANK: &str = " ";
const TEMPERATURE_MARKER: &str = "deg C";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCommand {
    Home,
    Insert,
    Eject,
}

impl fmt::Display for RobotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RobotCommand::Home => "HOME",
            RobotCommand::Insert => "INSERT",
            RobotCommand::Eject => "EJECT",
        };
        f.write_str(text)
    }
}

/// Most recent line received from the robot. Written by the line router,
/// read by ACK waits.
#[derive(Debug, Clone)]
pub struct LastMessage {
    tx: Arc<watch::Sender<String>>,
}

impl LastMessage {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BLANK.to_string());
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, line: &str) {
        self.tx.send_replace(line.to_string());
    }

    pub fn clear(&self) {
        self.set(BLANK);
    }

    pub fn get(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn is_ack(&self) -> bool {
        self.tx.borrow().as_str() == ACK
    }

    pub fn watch(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for LastMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of the robot's serial link.
pub struct RobotLink<W> {
    port: W,
    last_message: LastMessage,
    poll_interval: Duration,
    logger: LogManager,
}

impl<W: AsyncWrite + Unpin + Send> RobotLink<W> {
    pub fn new(port: W, last_message: LastMessage) -> Self {
        Self {
            port,
            last_message,
            poll_interval: Duration::from_secs(1),
            logger: LogManager::new("robot"),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn last_message(&self) -> &LastMessage {
        &self.last_message
    }

    /// Fire-and-forget newline terminated command.
    pub async fn send_command(&mut self, command: RobotCommand) -> CoreResult<()> {
        let line = format!("{command}\n");
        self.port.write_all(line.as_bytes()).await?;
        self.port.flush().await?;
        self.logger.debug(&format!("sent {command}"));
        Ok(())
    }

    /// Polls the message buffer until it reads `ACK`. The caller owns any retry.
    pub async fn wait_for_ack(&self, timeout: Duration, cancel: &CancellationToken) -> CoreResult<()> {
        let poll = async {
            let mut ticker = time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.last_message.is_ack() {
                    return;
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            waited = time::timeout(timeout, poll) => waited.map_err(|_| {
                CoreError::AckTimeout(format!(
                    "no ACK within {:.1} s (last message {:?})",
                    timeout.as_secs_f64(),
                    self.last_message.get()
                ))
            }),
        }
    }

    /// Clear, send, then wait. Clearing first keeps a stale ACK from answering the new command.
    pub async fn command(
        &mut self,
        command: RobotCommand,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.last_message.clear();
        self.send_command(command).await?;
        match self.wait_for_ack(timeout, cancel).await {
            Ok(()) => {
                self.logger.record(&format!("{command} acknowledged"));
                Ok(())
            }
            Err(err) => {
                if !matches!(err, CoreError::Cancelled) {
                    self.logger.warn(&format!("{command}: {err}"));
                }
                Err(err)
            }
        }
    }
}

/// Read half of the serial link: every line becomes the last message, temperature
/// readings are forwarded separately.
pub struct LineRouter {
    last_message: LastMessage,
    temperature: Option<mpsc::UnboundedSender<String>>,
    bus: Option<EventBus>,
    logger: LogManager,
}

impl LineRouter {
    pub fn new(last_message: LastMessage) -> Self {
        Self {
            last_message,
            temperature: None,
            bus: None,
            logger: LogManager::new("serial"),
        }
    }

    pub fn with_temperature(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.temperature = Some(tx);
        self
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn route(&self, raw: &str) {
        let line = raw.trim();
        if line.contains(TEMPERATURE_MARKER) {
            self.logger.debug(&format!("temperature {line}"));
            if let Some(tx) = &self.temperature {
                let _ = tx.send(line.to_string());
            }
        }
        self.last_message.set(line);
        if let Some(bus) = &self.bus {
            bus.publish(QcEvent::RobotMessage {
                line: line.to_string(),
            });
        }
    }

    /// Routes lines until EOF or cancellation.
    pub async fn run<R: AsyncBufRead + Unpin>(self, reader: R, cancel: CancellationToken) -> CoreResult<()> {
        let mut lines = reader.lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = lines.next_line() => match next? {
                    Some(line) => self.route(&line),
                    None => {
                        self.logger.warn("serial port closed");
                        return Ok(());
                    }
                },
            }
        }
    }
}
