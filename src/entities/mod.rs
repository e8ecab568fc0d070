//! Entities: typed views of snapshot fields.
//!
//! Every entity is a row in [`table`]: a path into the snapshot, a [`Read`]
//! transform, a unit and optional attributes. Reading never fails; a missing
//! or mistyped field reads as `None` and the entity reports unavailable.

pub mod table;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    config::TemperatureUnit,
    coordinator::CoordinatorState,
    poolsync::{models::as_f64, DeviceSnapshot, HeatMode},
};

/// Index of the chlorinator in `devices`.
pub const CHLORINATOR_INDEX: u32 = 0;

const UNIQUE_ID_FALLBACK: &str = "poolsync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sensor,
    BinarySensor,
    Switch,
    Number,
    Climate,
    Button,
}

/// Root of an entity's paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Hub,
    /// `devices.0`
    Chlorinator,
    /// `devices.{i}` where `deviceType.{i} == "heatPump"`
    HeatPump,
}

/// How the raw field becomes the entity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Raw,
    /// Numeric (numeric strings accepted), as a float.
    Number,
    /// Thousandths to units, 3 decimals. mV to V, mA to A.
    Milli,
    /// First element of an array, `0` when missing or empty.
    FirstOrZero,
    /// `"online"` / `"offline"`.
    OnlineLabel,
    /// Non-empty string or the fallback.
    TextOr(&'static str),
    /// Fixed value; data lives in the attributes.
    Label(&'static str),
    Truthy,
    /// Any non-zero array element.
    AnyNonZero,
    AtLeast(i64),
    OneOf(&'static [i64]),
    Positive,
    /// `0`/`1`/`2` as `off`/`heat`/`cool`; unknown codes read as `off`.
    HvacMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Fixed(&'static str),
    /// Follows the configured [`TemperatureUnit`].
    Temperature,
}

/// Write path attached to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ChlorOutput,
    Boost,
    HeatSetpoint,
    HeatMode,
    Climate,
    Ping,
}

/// Extra attribute: name and path relative to the entity scope.
pub type Attribute = (&'static str, &'static [&'static str]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityDef {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: EntityKind,
    pub scope: Scope,
    pub path: &'static [&'static str],
    pub read: Read,
    pub unit: Unit,
    pub device_class: Option<&'static str>,
    pub attributes: &'static [Attribute],
    pub control: Option<Control>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl NumberRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Rendered entity, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub unique_id: String,
    pub key: String,
    pub name: String,
    pub kind: EntityKind,
    pub device_index: Option<u32>,
    pub unit: Option<String>,
    pub device_class: Option<String>,
    pub value: Option<Value>,
    pub attributes: Map<String, Value>,
    pub range: Option<NumberRange>,
    pub available: bool,
    /// Value comes from an older snapshot because the last refresh failed.
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A table row bound to a concrete device index.
#[derive(Debug, Clone)]
pub struct Entity {
    def: &'static EntityDef,
    device_index: Option<u32>,
    key: String,
    unit: TemperatureUnit,
}

impl Entity {
    fn bind(def: &'static EntityDef, device_index: Option<u32>, unit: TemperatureUnit) -> Self {
        // Writable device entities carry their index in the key.
        let key = match (def.control, device_index) {
            (Some(control), Some(idx)) if control != Control::Ping => {
                format!("{}_{idx}", def.key)
            }
            _ => def.key.to_owned(),
        };
        Self {
            def,
            device_index,
            key,
            unit,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn def(&self) -> &'static EntityDef {
        self.def
    }

    pub fn kind(&self) -> EntityKind {
        self.def.kind
    }

    pub fn device_index(&self) -> Option<u32> {
        self.device_index
    }

    pub fn control(&self) -> Option<Control> {
        self.def.control
    }

    /// Accepted range for number and climate entities.
    pub fn range(&self) -> Option<NumberRange> {
        let (min, max, step) = match self.def.control? {
            Control::ChlorOutput => (0.0, 100.0, 1.0),
            Control::HeatMode => (0.0, 2.0, 1.0),
            Control::HeatSetpoint | Control::Climate => self.unit.setpoint_range(),
            Control::Boost | Control::Ping => return None,
        };
        Some(NumberRange { min, max, step })
    }

    pub fn unit_symbol(&self) -> Option<&'static str> {
        match self.def.unit {
            Unit::None => None,
            Unit::Fixed(symbol) => Some(symbol),
            Unit::Temperature => Some(self.unit.symbol()),
        }
    }

    fn lookup<'a>(&self, snapshot: &'a DeviceSnapshot, rel: &[&str]) -> Option<&'a Value> {
        let value = match self.device_index {
            None => snapshot.get(rel)?,
            Some(idx) => {
                let idx = idx.to_string();
                let mut path = vec!["devices", idx.as_str()];
                path.extend_from_slice(rel);
                snapshot.get(path.as_slice())?
            }
        };
        (!value.is_null()).then_some(value)
    }

    /// Current value, `None` when the field is absent or unusable.
    pub fn read(&self, snapshot: &DeviceSnapshot) -> Option<Value> {
        let raw = || self.lookup(snapshot, self.def.path);
        match self.def.read {
            Read::Raw => raw().cloned(),
            Read::Number => raw().and_then(as_f64).map(|v| json!(v)),
            Read::Milli => raw()
                .and_then(as_f64)
                .map(|v| json!(v.round() / 1000.0)),
            Read::FirstOrZero => Some(
                raw()
                    .and_then(Value::as_array)
                    .and_then(|items| items.first())
                    .cloned()
                    .unwrap_or_else(|| json!(0)),
            ),
            Read::OnlineLabel => raw()
                .and_then(truthy)
                .map(|on| json!(if on { "online" } else { "offline" })),
            Read::TextOr(fallback) => Some(json!(raw()
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback))),
            Read::Label(label) => Some(json!(label)),
            Read::Truthy => raw().and_then(truthy).map(Value::Bool),
            Read::AnyNonZero => raw().and_then(Value::as_array).map(|items| {
                Value::Bool(items.iter().any(|f| as_f64(f).is_some_and(|v| v != 0.0)))
            }),
            Read::AtLeast(n) => raw().and_then(as_i64).map(|v| Value::Bool(v >= n)),
            Read::OneOf(set) => raw()
                .and_then(as_i64)
                .map(|v| Value::Bool(set.contains(&v))),
            Read::Positive => raw().and_then(as_f64).map(|v| Value::Bool(v > 0.0)),
            Read::HvacMode => raw().map(|v| {
                let mode = as_i64(v).and_then(HeatMode::from_code).unwrap_or(HeatMode::Off);
                json!(mode.as_str())
            }),
        }
    }

    pub fn attributes(&self, snapshot: &DeviceSnapshot) -> Map<String, Value> {
        self.def
            .attributes
            .iter()
            .map(|(name, path)| {
                let value = self.lookup(snapshot, path).cloned().unwrap_or(Value::Null);
                ((*name).to_owned(), value)
            })
            .collect()
    }

    /// Render against the coordinator state. `mac` prefixes the unique id.
    pub fn state(&self, coordinator: &CoordinatorState, mac: Option<&str>) -> EntityState {
        let snapshot = coordinator.snapshot.as_deref();
        let value = snapshot.and_then(|s| self.read(s));
        let attributes = snapshot.map(|s| self.attributes(s)).unwrap_or_default();

        // The ping button stays usable while the hub is unreachable.
        let always_available = self.def.control == Some(Control::Ping);
        let available = always_available || value.is_some();
        let stale = !always_available && value.is_some() && coordinator.is_stale();

        EntityState {
            unique_id: format!("{}_{}", mac.unwrap_or(UNIQUE_ID_FALLBACK), self.key),
            key: self.key.clone(),
            name: self.def.name.to_owned(),
            kind: self.def.kind,
            device_index: self.device_index,
            unit: self.unit_symbol().map(str::to_owned),
            device_class: self.def.device_class.map(str::to_owned),
            value,
            attributes,
            range: self.range(),
            available,
            stale,
        }
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    as_f64(value).map(|v| v as i64)
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => Some(!s.is_empty()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// All entities bound for one hub.
#[derive(Debug, Clone, Default)]
pub struct Entities {
    entities: Vec<Entity>,
    unit: TemperatureUnit,
    heat_pump: Option<u32>,
}

impl Entities {
    /// Bind the tables. Heat pump rows are only bound when `snapshot` lists a
    /// heat pump; the lowest matching device index wins.
    pub fn discover(snapshot: Option<&DeviceSnapshot>, unit: TemperatureUnit) -> Self {
        let heat_pump = snapshot.and_then(DeviceSnapshot::heat_pump_index);
        match heat_pump {
            Some(idx) => info!(device_index = idx, "Heat pump discovered"),
            None => info!("No heat pump reported; skipping heat pump entities"),
        }

        let entities = [table::HUB, table::CHLORINATOR, table::HEAT_PUMP]
            .into_iter()
            .flatten()
            .filter_map(|def| {
                let device_index = match def.scope {
                    Scope::Hub => None,
                    Scope::Chlorinator => Some(CHLORINATOR_INDEX),
                    Scope::HeatPump => Some(heat_pump?),
                };
                Some(Entity::bind(def, device_index, unit))
            })
            .collect();

        Self {
            entities,
            unit,
            heat_pump,
        }
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Device index the heat pump rows are bound to.
    pub fn heat_pump_index(&self) -> Option<u32> {
        self.heat_pump
    }

    /// `snapshot` reports a heat pump but none is bound, e.g. because the
    /// binding was made before the first successful refresh.
    pub fn needs_rebind(&self, snapshot: &DeviceSnapshot) -> bool {
        self.heat_pump.is_none() && snapshot.heat_pump_index().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.key == key)
    }

    pub fn states(&self, coordinator: &CoordinatorState, mac: Option<&str>) -> Vec<EntityState> {
        self.entities
            .iter()
            .map(|e| e.state(coordinator, mac))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
