use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::{
    coordinator::CoordinatorState,
    entities::{EntityKind, EntityState, NumberRange},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthDto {
    pub status: String,
    /// Last refresh succeeded.
    pub available: bool,
    /// Serving data from before a failed refresh.
    pub stale: bool,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EntityDto {
    /// `{mac}_{key}`
    pub unique_id: String,
    pub key: String,
    pub name: String,
    pub kind: EntityKind,
    pub device_index: Option<u32>,
    pub unit: Option<String>,
    pub device_class: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    pub range: Option<NumberRange>,
    pub available: bool,
    pub stale: bool,
}

impl From<EntityState> for EntityDto {
    fn from(s: EntityState) -> Self {
        Self {
            unique_id: s.unique_id,
            key: s.key,
            name: s.name,
            kind: s.kind,
            device_index: s.device_index,
            unit: s.unit,
            device_class: s.device_class,
            value: s.value,
            attributes: s.attributes,
            range: s.range,
            available: s.available,
            stale: s.stale,
        }
    }
}

/// `{"action": "set_value", "value": 57}`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandRequest {
    /// `set_value`, `turn_on`, `turn_off`, `set_hvac_mode`, `set_temperature` or `press`
    pub action: String,
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotDto {
    pub available: bool,
    pub stale: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Raw hub JSON from the last successful refresh.
    #[schema(value_type = Option<Object>)]
    pub snapshot: Option<Value>,
}

impl From<&CoordinatorState> for SnapshotDto {
    fn from(state: &CoordinatorState) -> Self {
        Self {
            available: state.last_update_success,
            stale: state.is_stale(),
            last_attempt_at: state.last_attempt_at,
            last_success_at: state.last_success_at,
            last_error: state.last_error.as_ref().map(ToString::to_string),
            snapshot: state
                .snapshot
                .as_ref()
                .map(|s| Value::Object(s.as_map().clone())),
        }
    }
}
