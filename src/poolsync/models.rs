use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// DeviceSnapshot - GET /api/poolsync?cmd=poolSync&all
//
// The hub returns one large nested object. Its layout depends on the
// firmware and on which modules are installed, so nothing here is required:
//
//   {
//     "poolSync":   { "system": { "macAddr", "fwVersion", ... },
//                     "status": { "boardTemp", "rssi", "online", ... },
//                     "stats":  { "upTimeSecs", ... },
//                     "config": { "name", ... } },
//     "deviceType": { "0": "chlorSync", "1": "heatPump" },
//     "devices":    { "0": { "status", "config", "nodeAttr", "system",
//                            "faults": [..], "stats": [..] }, ... }
//   }
// ---------------------------------------------------------------------------

/// One immutable status/config blob returned by the hub for a single poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSnapshot(Map<String, Value>);

impl DeviceSnapshot {
    /// Accepts only JSON objects; anything else is not a snapshot.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Walk `path` through nested objects and arrays.
    ///
    /// A segment applied to an array is parsed as an index. Missing keys,
    /// out-of-range indices and scalar intermediates all yield `None`.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.0.get(first.as_ref())?;
        for seg in rest {
            cur = match cur {
                Value::Object(map) => map.get(seg.as_ref())?,
                Value::Array(items) => items.get(seg.as_ref().parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Numeric field; numeric strings are accepted because some firmware
    /// revisions quote them.
    pub fn get_f64<S: AsRef<str>>(&self, path: &[S]) -> Option<f64> {
        as_f64(self.get(path)?)
    }

    pub fn get_i64<S: AsRef<str>>(&self, path: &[S]) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Booleans, or integers where non-zero means `true`.
    pub fn get_bool<S: AsRef<str>>(&self, path: &[S]) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            _ => None,
        }
    }

    pub fn get_str<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Hub MAC address (`poolSync.system.macAddr`), if reported and non-empty.
    pub fn mac_address(&self) -> Option<&str> {
        self.get_str(&["poolSync", "system", "macAddr"])
            .filter(|mac| !mac.is_empty())
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.get_str(&["poolSync", "system", "fwVersion"])
    }

    /// Lowest device index whose `deviceType` entry equals `kind`.
    pub fn device_index_of(&self, kind: &str) -> Option<u32> {
        self.get(&["deviceType"])?
            .as_object()?
            .iter()
            .filter(|(_, v)| v.as_str() == Some(kind))
            .filter_map(|(idx, _)| idx.parse::<u32>().ok())
            .min()
    }

    pub fn heat_pump_index(&self) -> Option<u32> {
        self.device_index_of("heatPump")
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Push-link status - GET /api/poolsync?cmd=pushLink&status
//
// Observed fields:
//   macAddress | mac             String
//   password | pass | token      String   present once the button is pressed
//   timeRemaining                i64      seconds left in the pairing window
// ---------------------------------------------------------------------------

const SECRET_KEYS: [&str; 3] = ["password", "pass", "token"];

#[derive(Clone, Default, PartialEq, Eq)]
pub struct PushLinkStatus {
    pub mac_address: Option<String>,
    pub password: Option<String>,
    pub time_remaining: Option<i64>,
}

impl PushLinkStatus {
    /// Reads the first non-empty value among each field's aliases.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .find(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Some(Self {
            mac_address: first(&["macAddress", "mac"]),
            password: first(&SECRET_KEYS),
            time_remaining: map.get("timeRemaining").and_then(Value::as_i64),
        })
    }
}

impl fmt::Debug for PushLinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushLinkStatus")
            .field("mac_address", &self.mac_address)
            .field("password_len", &self.password.as_ref().map(String::len))
            .field("time_remaining", &self.time_remaining)
            .finish()
    }
}

/// Copy of `value` with secret-bearing keys replaced by `"<redacted>"`.
pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if SECRET_KEYS.contains(&lower.as_str()) {
                        (k.clone(), Value::from("<redacted>"))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Bearer token plus the lower-case `user` header value the firmware expects.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

impl Credentials {
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            user_id: user_id.filter(|u| !u.is_empty()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token_len", &self.token.as_ref().map(String::len))
            .field("user_id", &self.user_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Device settings - PATCH /api/poolsync?cmd=devices&device={index}
// ---------------------------------------------------------------------------

/// Wire shape of PATCH bodies. Depends on firmware revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PatchStyle {
    /// `{"chlorOutput": 57}`
    Flat,
    /// `{"config": {"chlorOutput": 57}}`
    #[default]
    Nested,
}

impl FromStr for PatchStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "nested" | "config" => Ok(Self::Nested),
            other => Err(anyhow!("unknown patch style: {other:?}")),
        }
    }
}

/// Heat pump operating mode as encoded in `devices.{i}.config.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatMode {
    Off,
    Heat,
    Cool,
}

impl HeatMode {
    pub fn code(self) -> i64 {
        match self {
            Self::Off => 0,
            Self::Heat => 1,
            Self::Cool => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
        }
    }
}

impl FromStr for HeatMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            other => Err(anyhow!("unsupported hvac mode: {other:?}")),
        }
    }
}

/// A single writable device field.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceField {
    /// Chlorinator output percentage, already clamped to `0..=100`.
    ChlorOutput(u8),
    /// 24h salt boost.
    BoostMode(bool),
    /// Heat pump target temperature in the hub's configured unit.
    HeatSetpoint(f64),
    HeatMode(HeatMode),
}

impl DeviceField {
    /// Rounds and clamps `value` into the `0..=100` percentage range.
    pub fn chlor_output(value: f64) -> Self {
        Self::ChlorOutput(clamp_percent(value))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChlorOutput(_) => "chlorOutput",
            Self::BoostMode(_) => "boostMode",
            Self::HeatSetpoint(_) => "setpoint",
            Self::HeatMode(_) => "mode",
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Self::ChlorOutput(pct) => json!(pct),
            Self::BoostMode(on) => json!(on),
            Self::HeatSetpoint(temp) => json!(temp),
            Self::HeatMode(mode) => json!(mode.code()),
        }
    }

    /// Request body holding exactly this field.
    pub fn payload(&self, style: PatchStyle) -> Value {
        let mut field = Map::new();
        field.insert(self.name().to_owned(), self.value());
        match style {
            PatchStyle::Flat => Value::Object(field),
            PatchStyle::Nested => json!({ "config": Value::Object(field) }),
        }
    }
}

pub fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Body of a successful PATCH. Older firmware answers with an empty body.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchResponse {
    Json(Value),
    Ack { raw: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceSnapshot {
        DeviceSnapshot::from_value(json!({
            "poolSync": {
                "system": { "macAddr": "AA:BB:CC:DD:EE:FF", "fwVersion": "1.2.3" },
                "status": { "boardTemp": 41, "online": true, "rssi": "-61" }
            },
            "deviceType": { "0": "chlorSync", "3": "heatPump", "1": "heatPump" },
            "devices": {
                "0": {
                    "config": { "chlorOutput": 40 },
                    "faults": [0, 4],
                    "status": { "ctrlFlags": 1 }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(DeviceSnapshot::from_value(json!([1, 2])).is_none());
        assert!(DeviceSnapshot::from_value(json!("x")).is_none());
        assert!(DeviceSnapshot::from_value(Value::Null).is_none());
    }

    #[test]
    fn get_walks_objects_and_array_indices() {
        let s = sample();
        assert_eq!(s.get_i64(&["devices", "0", "config", "chlorOutput"]), Some(40));
        assert_eq!(s.get_i64(&["devices", "0", "faults", "1"]), Some(4));
        assert_eq!(s.get_str(&["poolSync", "system", "fwVersion"]), Some("1.2.3"));
    }

    #[test]
    fn get_missing_paths_are_none() {
        let s = sample();
        assert!(s.get(&["devices", "7", "config"]).is_none());
        assert!(s.get(&["devices", "0", "faults", "9"]).is_none());
        assert!(s.get(&["devices", "0", "faults", "x"]).is_none());
        assert!(s.get(&["poolSync", "status", "boardTemp", "deeper"]).is_none());
        assert!(s.get::<&str>(&[]).is_none());
    }

    #[test]
    fn typed_accessors_coerce_loosely() {
        let s = sample();
        assert_eq!(s.get_f64(&["poolSync", "status", "rssi"]), Some(-61.0));
        assert_eq!(s.get_bool(&["poolSync", "status", "online"]), Some(true));
        assert_eq!(s.get_bool(&["devices", "0", "status", "ctrlFlags"]), Some(true));
        assert_eq!(s.get_str(&["poolSync", "status", "boardTemp"]), None);
    }

    #[test]
    fn mac_and_heat_pump_discovery() {
        let s = sample();
        assert_eq!(s.mac_address(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(s.heat_pump_index(), Some(1));
        assert_eq!(DeviceSnapshot::default().heat_pump_index(), None);
    }

    #[test]
    fn empty_mac_is_ignored() {
        let s = DeviceSnapshot::from_value(json!({"poolSync": {"system": {"macAddr": ""}}})).unwrap();
        assert_eq!(s.mac_address(), None);
    }

    #[test]
    fn push_link_status_reads_aliases() {
        let st = PushLinkStatus::from_json(&json!({"mac": "11:22", "pass": "pw"})).unwrap();
        assert_eq!(st.mac_address.as_deref(), Some("11:22"));
        assert_eq!(st.password.as_deref(), Some("pw"));

        let st = PushLinkStatus::from_json(&json!({"password": "", "token": "tk"})).unwrap();
        assert_eq!(st.password.as_deref(), Some("tk"));
    }

    #[test]
    fn push_link_status_time_remaining_only() {
        let st = PushLinkStatus::from_json(&json!({"timeRemaining": 0})).unwrap();
        assert_eq!(st.password, None);
        assert_eq!(st.time_remaining, Some(0));
        assert!(PushLinkStatus::from_json(&json!([])).is_none());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let st = PushLinkStatus {
            mac_address: None,
            password: Some("secret123".into()),
            time_remaining: None,
        };
        assert!(!format!("{st:?}").contains("secret123"));

        let creds = Credentials::new(Some("secret123".into()), Some("u1".into()));
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret123"));
        assert!(dbg.contains("u1"));
    }

    #[test]
    fn redact_secrets_masks_only_secret_keys() {
        let red = redact_secrets(&json!({"Password": "x", "token": "y", "timeRemaining": 5}));
        assert_eq!(red["Password"], "<redacted>");
        assert_eq!(red["token"], "<redacted>");
        assert_eq!(red["timeRemaining"], 5);
    }

    #[test]
    fn credentials_drop_empty_values() {
        let creds = Credentials::new(Some(String::new()), Some(String::new()));
        assert_eq!(creds, Credentials::default());
        assert!(!creds.has_token());
    }

    #[test]
    fn chlor_output_is_clamped() {
        assert_eq!(DeviceField::chlor_output(143.0), DeviceField::ChlorOutput(100));
        assert_eq!(DeviceField::chlor_output(-5.0), DeviceField::ChlorOutput(0));
        assert_eq!(DeviceField::chlor_output(56.6), DeviceField::ChlorOutput(57));
        assert_eq!(DeviceField::chlor_output(f64::NAN), DeviceField::ChlorOutput(0));
    }

    #[test]
    fn payload_shapes() {
        let field = DeviceField::chlor_output(57.0);
        assert_eq!(field.payload(PatchStyle::Flat), json!({"chlorOutput": 57}));
        assert_eq!(
            field.payload(PatchStyle::Nested),
            json!({"config": {"chlorOutput": 57}})
        );
        assert_eq!(
            DeviceField::HeatMode(HeatMode::Cool).payload(PatchStyle::Flat),
            json!({"mode": 2})
        );
        assert_eq!(
            DeviceField::BoostMode(true).payload(PatchStyle::Flat),
            json!({"boostMode": true})
        );
    }

    #[test]
    fn patch_style_and_heat_mode_parse() {
        assert_eq!("flat".parse::<PatchStyle>().unwrap(), PatchStyle::Flat);
        assert_eq!("Nested".parse::<PatchStyle>().unwrap(), PatchStyle::Nested);
        assert!("wrapped".parse::<PatchStyle>().is_err());

        assert_eq!("heat".parse::<HeatMode>().unwrap(), HeatMode::Heat);
        assert!("auto".parse::<HeatMode>().is_err());
        assert_eq!(HeatMode::from_code(2), Some(HeatMode::Cool));
        assert_eq!(HeatMode::from_code(9), None);
    }
}
