//! Declarative entity descriptors.
//!
//! Paths are relative to the entity's [`Scope`]: the snapshot root for hub
//! entities, `devices.{index}` for device entities.

use super::{Attribute, Control, EntityDef, EntityKind, Read, Scope, Unit};

const fn sensor(
    key: &'static str,
    name: &'static str,
    scope: Scope,
    path: &'static [&'static str],
) -> EntityDef {
    EntityDef {
        key,
        name,
        kind: EntityKind::Sensor,
        scope,
        path,
        read: Read::Raw,
        unit: Unit::None,
        device_class: None,
        attributes: &[],
        control: None,
    }
}

const fn binary(
    key: &'static str,
    name: &'static str,
    path: &'static [&'static str],
    read: Read,
) -> EntityDef {
    EntityDef {
        key,
        name,
        kind: EntityKind::BinarySensor,
        scope: Scope::HeatPump,
        path,
        read,
        unit: Unit::None,
        device_class: None,
        attributes: &[],
        control: None,
    }
}

impl EntityDef {
    const fn read(mut self, read: Read) -> Self {
        self.read = read;
        self
    }

    const fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    const fn class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    const fn attrs(mut self, attributes: &'static [Attribute]) -> Self {
        self.attributes = attributes;
        self
    }

    const fn control(mut self, control: Control) -> Self {
        self.control = Some(control);
        self
    }

    const fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }
}

// ---------------------------------------------------------------------------
// Hub (poolSync.*)
// ---------------------------------------------------------------------------

pub static HUB: &[EntityDef] = &[
    sensor("board_temp_c", "PoolSync Board Temperature", Scope::Hub, &["poolSync", "status", "boardTemp"])
        .unit(Unit::Fixed("°C"))
        .class("temperature"),
    sensor("rssi_dbm", "PoolSync RSSI", Scope::Hub, &["poolSync", "status", "rssi"])
        .read(Read::Number)
        .unit(Unit::Fixed("dBm"))
        .class("signal_strength"),
    sensor("uptime_secs", "PoolSync Uptime", Scope::Hub, &["poolSync", "stats", "upTimeSecs"])
        .unit(Unit::Fixed("s"))
        .class("duration"),
    sensor("device_info", "PoolSync System Details", Scope::Hub, &["poolSync", "config", "name"])
        .attrs(&[
            ("macAddr", &["poolSync", "system", "macAddr"]),
            ("bssid", &["poolSync", "system", "bssid"]),
            ("fwVersion", &["poolSync", "system", "fwVersion"]),
            ("hwVersion", &["poolSync", "system", "hwVersion"]),
        ]),
    sensor("status_info", "PoolSync Status", Scope::Hub, &["poolSync", "status", "online"])
        .read(Read::OnlineLabel)
        .attrs(&[
            ("online", &["poolSync", "status", "online"]),
            ("flags", &["poolSync", "status", "flags"]),
            ("dateTime", &["poolSync", "status", "dateTime"]),
        ]),
    sensor("diagnostics", "PoolSync Diagnostics", Scope::Hub, &[])
        .read(Read::Label("diagnostics"))
        .attrs(&[
            ("wifiDisconnects", &["poolSync", "stats", "wifiDisconnects"]),
            ("awsDisconnects", &["poolSync", "stats", "awsDisconnects"]),
            ("minRssi", &["poolSync", "stats", "minRssi"]),
            ("maxRssi", &["poolSync", "stats", "maxRssi"]),
            ("minBoardTemp", &["poolSync", "stats", "minBoardTemp"]),
            ("maxBoardTemp", &["poolSync", "stats", "maxBoardTemp"]),
            ("systemRestarts", &["poolSync", "stats", "systemRestarts"]),
            ("numDeviceMsgNoResp", &["poolSync", "stats", "numDeviceMsgNoResp"]),
        ]),
    EntityDef {
        key: "ping",
        name: "Ping",
        kind: EntityKind::Button,
        scope: Scope::Hub,
        path: &[],
        read: Read::Label("ping"),
        unit: Unit::None,
        device_class: None,
        attributes: &[],
        control: Some(Control::Ping),
    },
];

// ---------------------------------------------------------------------------
// ChlorSync (devices.0)
// ---------------------------------------------------------------------------

pub static CHLORINATOR: &[EntityDef] = &[
    sensor("water_temp_c", "Pool Water Temperature", Scope::Chlorinator, &["status", "waterTemp"])
        .unit(Unit::Fixed("°C"))
        .class("temperature"),
    sensor("flow_rate_gpm", "Salt Cell Flow Rate", Scope::Chlorinator, &["status", "flowRate"])
        .unit(Unit::Fixed("gal/min")),
    sensor("salt_ppm", "Salt PPM", Scope::Chlorinator, &["status", "saltPPM"])
        .unit(Unit::Fixed("ppm")),
    sensor("chlor_output_pct", "Chlor Output", Scope::Chlorinator, &["config", "chlorOutput"])
        .unit(Unit::Fixed("%")),
    sensor("boost_remaining_min", "Chlor Boost Remaining", Scope::Chlorinator, &["status", "boostRemaining"])
        .unit(Unit::Fixed("min"))
        .class("duration"),
    sensor("raw_salt_adc", "Cell Raw Salt ADC", Scope::Chlorinator, &["status", "cellRawSaltADC"]),
    sensor("cell_rail_voltage_v", "Cell Rail Voltage", Scope::Chlorinator, &["status", "cellRailVoltage"])
        .read(Read::Milli)
        .unit(Unit::Fixed("V"))
        .class("voltage"),
    sensor("fwd_current_a", "Cell Forward Current", Scope::Chlorinator, &["status", "fwdCurrent"])
        .read(Read::Milli)
        .unit(Unit::Fixed("A"))
        .class("current"),
    sensor("rev_current_a", "Cell Reverse Current", Scope::Chlorinator, &["status", "revCurrent"])
        .read(Read::Milli)
        .unit(Unit::Fixed("A"))
        .class("current"),
    sensor("out_voltage_v", "Cell Output Voltage", Scope::Chlorinator, &["status", "outVoltage"])
        .read(Read::Milli)
        .unit(Unit::Fixed("V"))
        .class("voltage"),
    sensor("device_config", "ChlorSync Config", Scope::Chlorinator, &["nodeAttr", "name"])
        .read(Read::TextOr("ChlorSync"))
        .attrs(&[
            ("poolCoverCtrl", &["config", "poolCoverCtrl"]),
            ("gallons", &["config", "gallons"]),
            ("polarityChangeTime", &["config", "polarityChangeTime"]),
            ("userSaltCalib", &["config", "userSaltCalib"]),
        ]),
    sensor("cell_system", "Cell System", Scope::Chlorinator, &["nodeAttr", "name"])
        .read(Read::TextOr("ChlorSync"))
        .attrs(&[
            ("drvFwVersion", &["system", "drvFwVersion"]),
            ("cellFwVersion", &["system", "cellFwVersion"]),
            ("cellHwVersion", &["system", "cellHwVersion"]),
            ("cellCalib", &["system", "cellCalib"]),
            ("numBlades", &["system", "numBlades"]),
            ("cellSerialNum", &["system", "cellSerialNum"]),
        ]),
    sensor("cell_faults", "Cell Faults", Scope::Chlorinator, &["faults"])
        .read(Read::FirstOrZero),
    sensor("device_stats", "ChlorSync Stats", Scope::Chlorinator, &[])
        .read(Read::Label("stats"))
        .attrs(&[
            ("stat0", &["stats", "0"]),
            ("stat1", &["stats", "1"]),
            ("stat2", &["stats", "2"]),
            ("stat3", &["stats", "3"]),
            ("stat4", &["stats", "4"]),
            ("stat5", &["stats", "5"]),
            ("stat6", &["stats", "6"]),
            ("stat7", &["stats", "7"]),
            ("stat8", &["stats", "8"]),
            ("stat9", &["stats", "9"]),
        ]),
    sensor("boost", "Salt Boost (24h)", Scope::Chlorinator, &["status", "boostRemaining"])
        .kind(EntityKind::Switch)
        .read(Read::Positive)
        .control(Control::Boost),
    sensor("chlor_output", "Chlor Output", Scope::Chlorinator, &["config", "chlorOutput"])
        .kind(EntityKind::Number)
        .read(Read::Number)
        .unit(Unit::Fixed("%"))
        .control(Control::ChlorOutput),
];

// ---------------------------------------------------------------------------
// Heat pump (devices.{index of deviceType == "heatPump"})
// ---------------------------------------------------------------------------

pub static HEAT_PUMP: &[EntityDef] = &[
    sensor("hp_water_temp_c", "Heat Pump Water Temperature", Scope::HeatPump, &["status", "waterTemp"])
        .unit(Unit::Fixed("°C"))
        .class("temperature"),
    sensor("hp_air_temp_c", "Heat Pump Air Temperature", Scope::HeatPump, &["status", "airTemp"])
        .unit(Unit::Fixed("°C"))
        .class("temperature"),
    sensor("hp_mode", "Heat Pump Mode", Scope::HeatPump, &["config", "mode"]),
    sensor("hp_setpoint_temp_c", "Heat Pump SetPoint Temperature", Scope::HeatPump, &["config", "setpoint"])
        .unit(Unit::Fixed("°C"))
        .class("temperature"),
    binary("heatpump_online", "Heat Pump Online", &["nodeAttr", "online"], Read::Truthy)
        .class("connectivity"),
    binary("heatpump_fault", "Heat Pump Fault", &["faults"], Read::AnyNonZero)
        .class("problem"),
    binary("heatpump_flow", "Heat Pump Flow", &["status", "ctrlFlags"], Read::AtLeast(1)),
    binary("heatpump_compressor", "Heat Pump Compressor", &["status", "stateFlags"], Read::OneOf(&[8])),
    binary("heatpump_fan", "Heat Pump Fan", &["status", "stateFlags"], Read::OneOf(&[8, 520])),
    sensor("heat_setpoint", "Heat Pump Setpoint", Scope::HeatPump, &["config", "setpoint"])
        .kind(EntityKind::Number)
        .read(Read::Number)
        .unit(Unit::Temperature)
        .control(Control::HeatSetpoint),
    sensor("heat_mode", "Heat Pump Mode", Scope::HeatPump, &["config", "mode"])
        .kind(EntityKind::Number)
        .read(Read::Number)
        .control(Control::HeatMode),
    sensor("heat_pump", "Heat Pump", Scope::HeatPump, &["config", "mode"])
        .kind(EntityKind::Climate)
        .read(Read::HvacMode)
        .unit(Unit::Temperature)
        .attrs(&[
            ("current_temperature", &["status", "waterTemp"]),
            ("target_temperature", &["config", "setpoint"]),
        ])
        .control(Control::Climate),
];
