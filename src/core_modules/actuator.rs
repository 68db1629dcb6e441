// THEORY:
// The `actuator` module is the seam between the sequential frame loop and the
// pan servo that lives on the far side of a message bus.
//
// Key architectural principles:
// 1.  **One Trait, Many Links**: The tracking controller only sees
//     `ActuatorLink`. The bus-backed link, the in-memory recorder used for dry
//     runs, and any future broker client all plug in behind it.
// 2.  **Fire And Forget**: Commands are publishes. Nothing in the frame loop
//     ever waits for the servo to acknowledge a move.
// 3.  **Snapshot Cell For Feedback**: Status messages arrive on a separate task.
//     They are folded into an `ActuatorSnapshot` and swapped into a
//     `tokio::sync::watch` cell as one record. The frame loop takes whole
//     snapshots, never individual fields, so it can never observe a half-applied
//     update.
// 4.  **Disconnected Is Not Fatal**: Every command on a disconnected link
//     returns `ActuatorUnavailable` and the caller carries on.

use crate::config::ActuatorConfig;
use crate::core_modules::bus::MessageBus;
use crate::error::{Result, TrackerError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Discrete commands understood by the servo firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanCommand {
    Left,
    Right,
    Center,
}

impl PanCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            PanCommand::Left => "left",
            PanCommand::Right => "right",
            PanCommand::Center => "center",
        }
    }

    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim() {
            "left" => Some(PanCommand::Left),
            "right" => Some(PanCommand::Right),
            "center" => Some(PanCommand::Center),
            _ => None,
        }
    }
}

impl fmt::Display for PanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the frame loop knows about the servo at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuatorSnapshot {
    pub connected: bool,
    /// Last angle the servo reported, if any status has arrived.
    pub angle: Option<i32>,
    /// The full last status object.
    pub last_status: Option<Value>,
    /// Bumped on every applied status message.
    pub sequence: u64,
}

pub trait ActuatorLink {
    fn is_connected(&self) -> bool;
    fn publish_angle(&self, angle: i32) -> Result<()>;
    fn publish_command(&self, command: PanCommand) -> Result<()>;
    fn status(&self) -> ActuatorSnapshot;
}

/// Single-writer cell holding the latest `ActuatorSnapshot`.
pub struct StatusCell {
    tx: watch::Sender<ActuatorSnapshot>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ActuatorSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> ActuatorSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActuatorSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_modify(|snapshot| snapshot.connected = connected);
    }

    /// Parses a JSON status payload and swaps it in. A payload without an
    /// integer `angle` keeps the previous angle.
    pub fn apply_status(&self, payload: &str) -> Result<()> {
        let status: Value = serde_json::from_str(payload)?;
        if !status.is_object() {
            return Err(TrackerError::InvalidInput(format!("status is not an object: {payload}")));
        }
        let angle = status.get("angle").and_then(Value::as_i64).map(|a| a as i32);
        self.tx.send_modify(|snapshot| {
            if angle.is_some() {
                snapshot.angle = angle;
            }
            snapshot.last_status = Some(status);
            snapshot.sequence += 1;
        });
        Ok(())
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// An actuator reached over the in-process `MessageBus`.
pub struct BusActuator {
    bus: MessageBus,
    config: ActuatorConfig,
    status: Arc<StatusCell>,
    listener: Option<JoinHandle<()>>,
}

impl BusActuator {
    /// Subscribes to the status topic and marks the link connected.
    /// Must be called from within a tokio runtime.
    pub fn connect(bus: MessageBus, config: ActuatorConfig) -> Self {
        let status = Arc::new(StatusCell::new());
        let listener = Self::spawn_status_listener(&bus, config.status_topic.clone(), Arc::clone(&status));
        status.set_connected(true);
        tracing::info!(status_topic = %config.status_topic, "actuator link connected");
        Self {
            bus,
            config,
            status,
            listener: Some(listener),
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.status.set_connected(false);
        tracing::info!("actuator link disconnected");
    }

    pub fn status_cell(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    fn spawn_status_listener(bus: &MessageBus, topic: String, status: Arc<StatusCell>) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) if message.topic == topic => {
                        if let Err(e) = status.apply_status(&message.payload) {
                            tracing::warn!("ignoring malformed status message: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        status.set_connected(false);
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for BusActuator {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl ActuatorLink for BusActuator {
    fn is_connected(&self) -> bool {
        self.status.snapshot().connected
    }

    fn publish_angle(&self, angle: i32) -> Result<()> {
        if !self.is_connected() {
            return Err(TrackerError::ActuatorUnavailable);
        }
        self.bus.publish(&self.config.angle_topic, angle.to_string());
        tracing::debug!(angle, "published pan angle");
        Ok(())
    }

    fn publish_command(&self, command: PanCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(TrackerError::ActuatorUnavailable);
        }
        self.bus.publish(&self.config.command_topic, command.as_str());
        tracing::debug!(%command, "published pan command");
        Ok(())
    }

    fn status(&self) -> ActuatorSnapshot {
        self.status.snapshot()
    }
}

/// What a `MemoryActuator` was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Angle(i32),
    Command(PanCommand),
}

struct MemoryInner {
    connected: AtomicBool,
    published: Mutex<Vec<Published>>,
    status: StatusCell,
}

/// Records every publish in memory. Used for dry runs and tests; clones share
/// one recording.
#[derive(Clone)]
pub struct MemoryActuator {
    inner: Arc<MemoryInner>,
}

impl MemoryActuator {
    pub fn new(connected: bool) -> Self {
        let status = StatusCell::new();
        status.set_connected(connected);
        Self {
            inner: Arc::new(MemoryInner {
                connected: AtomicBool::new(connected),
                published: Mutex::new(Vec::new()),
                status,
            }),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
        self.inner.status.set_connected(connected);
    }

    /// Simulates a status message arriving from the servo.
    pub fn report_status(&self, payload: &str) -> Result<()> {
        self.inner.status.apply_status(payload)
    }

    pub fn published(&self) -> Vec<Published> {
        self.inner
            .published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn angles(&self) -> Vec<i32> {
        self.published()
            .into_iter()
            .filter_map(|p| match p {
                Published::Angle(a) => Some(a),
                Published::Command(_) => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<PanCommand> {
        self.published()
            .into_iter()
            .filter_map(|p| match p {
                Published::Command(c) => Some(c),
                Published::Angle(_) => None,
            })
            .collect()
    }

    fn record(&self, published: Published) -> Result<()> {
        if !self.is_connected() {
            return Err(TrackerError::ActuatorUnavailable);
        }
        if let Ok(mut log) = self.inner.published.lock() {
            log.push(published);
        }
        Ok(())
    }
}

impl ActuatorLink for MemoryActuator {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn publish_angle(&self, angle: i32) -> Result<()> {
        self.record(Published::Angle(angle))
    }

    fn publish_command(&self, command: PanCommand) -> Result<()> {
        self.record(Published::Command(command))
    }

    fn status(&self) -> ActuatorSnapshot {
        self.inner.status.snapshot()
    }
}

/// A stand-in for the servo firmware: listens for angle and command topics and
/// answers each with a JSON status carrying the resulting angle.
pub fn spawn_simulated_servo(bus: MessageBus, config: ActuatorConfig) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let mut angle = config.center_angle;
        loop {
            let message = match rx.recv().await {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let next = if message.topic == config.angle_topic {
                message.payload.trim().parse::<i32>().ok()
            } else if message.topic == config.command_topic {
                PanCommand::parse(&message.payload).map(|command| match command {
                    PanCommand::Left => angle - config.nudge_step,
                    PanCommand::Right => angle + config.nudge_step,
                    PanCommand::Center => config.center_angle,
                })
            } else {
                None
            };
            if let Some(next) = next {
                angle = config.clamp(next);
                let status = serde_json::json!({ "angle": angle, "state": "moved" });
                bus.publish(&config.status_topic, status.to_string());
            }
        }
    })
}
