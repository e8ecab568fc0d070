use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    coordinator::RefreshCoordinator,
    entities::{Control, Entities, CHLORINATOR_INDEX},
    poolsync::{models::as_f64, DeviceError, DeviceSnapshot, HeatMode},
};

/// A user action against one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetValue(f64),
    TurnOn,
    TurnOff,
    SetHvacMode(HeatMode),
    SetTemperature(f64),
    Press,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetValue(_) => "set_value",
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::SetHvacMode(_) => "set_hvac_mode",
            Self::SetTemperature(_) => "set_temperature",
            Self::Press => "press",
        }
    }

    /// Parse an `{action, value}` pair.
    pub fn from_action(action: &str, value: Option<&Value>) -> Result<Self, CommandError> {
        let number = || {
            value
                .and_then(as_f64)
                .filter(|v| v.is_finite())
                .ok_or_else(|| CommandError::InvalidValue(format!("{action} needs a numeric value")))
        };

        match action {
            "set_value" => Ok(Self::SetValue(number()?)),
            "set_temperature" => Ok(Self::SetTemperature(number()?)),
            "turn_on" => Ok(Self::TurnOn),
            "turn_off" => Ok(Self::TurnOff),
            "press" => Ok(Self::Press),
            "set_hvac_mode" => value
                .and_then(Value::as_str)
                .ok_or_else(|| CommandError::InvalidValue("set_hvac_mode needs a mode".into()))?
                .parse()
                .map(Self::SetHvacMode)
                .map_err(|e: anyhow::Error| CommandError::InvalidValue(e.to_string())),
            other => Err(CommandError::UnknownAction(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("entity {key} does not support {action}")]
    Unsupported { key: String, action: &'static str },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Write path: entity command → device PATCH → coordinator refresh.
#[derive(Debug, Clone)]
pub struct ControlService {
    coordinator: RefreshCoordinator,
    entities: Arc<RwLock<Arc<Entities>>>,
}

impl ControlService {
    pub fn new(coordinator: RefreshCoordinator, entities: Entities) -> Self {
        Self {
            coordinator,
            entities: Arc::new(RwLock::new(Arc::new(entities))),
        }
    }

    /// Current binding. May grow once after startup, see [`Self::watch_discovery`].
    pub async fn entities(&self) -> Arc<Entities> {
        Arc::clone(&*self.entities.read().await)
    }

    /// Bind again against `snapshot` if it reports devices the current
    /// binding lacks. Returns whether the binding changed.
    pub async fn rebind(&self, snapshot: &DeviceSnapshot) -> bool {
        if !self.entities.read().await.needs_rebind(snapshot) {
            return false;
        }

        let mut entities = self.entities.write().await;
        if !entities.needs_rebind(snapshot) {
            return false;
        }
        let rebound = Entities::discover(Some(snapshot), entities.unit());
        info!(
            before = entities.len(),
            after = rebound.len(),
            "Entities rebound after discovery"
        );
        *entities = Arc::new(rebound);
        true
    }

    /// Rebind whenever a refresh brings a snapshot with new devices. Covers a
    /// hub that was unreachable when the first binding was made.
    pub fn watch_discovery(&self) -> JoinHandle<()> {
        let this = self.clone();
        let mut rx = self.coordinator.subscribe();
        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().snapshot.clone();
                if let Some(snapshot) = snapshot {
                    this.rebind(&snapshot).await;
                }
                if rx.changed().await.is_err() {
                    debug!("Coordinator dropped; discovery watcher stopping");
                    break;
                }
            }
        })
    }

    /// Apply `command` to entity `key`.
    ///
    /// A successful write is followed by a coalesced refresh. A failed write
    /// is returned as is and does not refresh.
    pub async fn execute(&self, key: &str, command: Command) -> Result<(), CommandError> {
        let entities = self.entities().await;
        let entity = entities
            .get(key)
            .ok_or_else(|| CommandError::UnknownEntity(key.to_owned()))?;
        let unsupported = || CommandError::Unsupported {
            key: key.to_owned(),
            action: command.name(),
        };
        let control = entity.control().ok_or_else(unsupported)?;
        let index = entity.device_index().unwrap_or(CHLORINATOR_INDEX);
        let client = self.coordinator.client();

        info!(entity = %key, action = command.name(), "Executing command");

        match (control, command) {
            (Control::Ping, Command::Press) => {
                self.ping().await;
                return Ok(());
            }
            (Control::ChlorOutput, Command::SetValue(pct)) => {
                client.set_chlor_output(index, pct).await?;
            }
            (Control::Boost, Command::TurnOn) => {
                client.set_boost_mode(index, true).await?;
            }
            (Control::Boost, Command::TurnOff) => {
                client.set_boost_mode(index, false).await?;
            }
            (Control::HeatSetpoint, Command::SetValue(temp))
            | (Control::Climate, Command::SetTemperature(temp)) => {
                if let Some(range) = entity.range() {
                    if !range.contains(temp) {
                        return Err(CommandError::OutOfRange {
                            value: temp,
                            min: range.min,
                            max: range.max,
                        });
                    }
                }
                client.set_heat_setpoint(index, temp).await?;
            }
            (Control::HeatMode, Command::SetValue(code)) => {
                let mode = HeatMode::from_code(code.trunc() as i64).ok_or(
                    CommandError::OutOfRange {
                        value: code,
                        min: 0.0,
                        max: 2.0,
                    },
                )?;
                client.set_heat_mode(index, mode).await?;
            }
            (Control::Climate, Command::SetHvacMode(mode)) => {
                client.set_heat_mode(index, mode).await?;
            }
            _ => return Err(unsupported()),
        }

        self.coordinator.request_refresh().await;
        Ok(())
    }

    /// Best-effort ping: fetch directly, ignore failure, then refresh.
    pub async fn ping(&self) {
        if let Err(e) = self.coordinator.client().fetch_all().await {
            warn!(error = %e, "Ping fetch failed");
        }
        self.coordinator.request_refresh().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
