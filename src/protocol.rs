//! Wire contract with the lamp controllers
//!
//! All payloads are UTF-8 JSON. Inbound payloads are decoded into domain
//! types on the 0-100 scale, outbound commands are encoded on the device
//! scale. [`DeviceScale`] is the only place where the two scales meet.
//!
//! ```text
//! status topic       → {intensity, mode, threshold, led, lamp1_status?, lamp2_status?}
//! threshold echo     → {threshold}
//! room status topic  → {lamp1?, lamp2?, lamp3?}
//! command topic      ← {mode} | {led: "toggle"|"ON"|"OFF"}
//! threshold topic    ← {threshold}
//! room command topic ← {toggle_lampN: true} | {command: "all_on"|"all_off"}
//! ```

use crate::config::TopicConfig;
use crate::device::{LampId, TerraceMode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unexpected payload shape: {0}")]
    Shape(String),

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Linear conversion between the device scale and the 0-100 UI scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceScale {
    max: u16,
}

impl DeviceScale {
    pub fn new(max: u16) -> Self {
        Self { max: max.max(1) }
    }

    pub fn to_device(&self, ui_value: u8) -> u16 {
        let ui_value = f64::from(ui_value.min(100));
        (ui_value / 100.0 * f64::from(self.max)).round() as u16
    }

    pub fn to_ui(&self, device_value: f64) -> u8 {
        if !device_value.is_finite() {
            return 0;
        }
        (device_value / f64::from(self.max) * 100.0)
            .round()
            .clamp(0.0, 100.0) as u8
    }
}

impl Default for DeviceScale {
    fn default() -> Self {
        Self::new(1023)
    }
}

/// Authoritative status broadcast of the terrace controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub intensity: u8,
    pub mode: TerraceMode,
    /// `None` keeps the last known threshold
    pub threshold: Option<u8>,
    pub terrace_lamp: Option<bool>,
    pub room_lamps: Vec<(LampId, bool)>,
}

/// Decoded inbound message, tagged by the topic it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Status(StatusReport),
    ThresholdEcho(u8),
    RoomStatus(Vec<(LampId, bool)>),
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    intensity: Option<f64>,
    mode: Option<String>,
    threshold: Option<f64>,
    led: Option<String>,
    lamp1_status: Option<bool>,
    lamp2_status: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ThresholdPayload {
    threshold: f64,
}

#[derive(Debug, Deserialize)]
struct RoomStatusPayload {
    lamp1: Option<bool>,
    lamp2: Option<bool>,
    lamp3: Option<bool>,
}

fn parse_object<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    if !value.is_object() {
        return Err(ProtocolError::Shape(format!("expected a JSON object, got {value}")));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Shape(e.to_string()))
}

fn parse_led(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

pub fn decode_status(payload: &[u8], scale: DeviceScale) -> Result<Inbound, ProtocolError> {
    let raw: StatusPayload = parse_object(payload)?;

    let mode = match raw.mode.as_deref() {
        Some(text) => TerraceMode::parse(text).unwrap_or_else(|| {
            debug!("Unknown mode {:?} in status, assuming auto", text);
            TerraceMode::Auto
        }),
        None => TerraceMode::Auto,
    };

    let mut room_lamps = Vec::new();
    if let Some(on) = raw.lamp1_status {
        room_lamps.push((LampId::Room1, on));
    }
    if let Some(on) = raw.lamp2_status {
        room_lamps.push((LampId::Room2, on));
    }

    Ok(Inbound::Status(StatusReport {
        intensity: raw.intensity.map(|v| scale.to_ui(v)).unwrap_or(0),
        mode,
        threshold: raw.threshold.map(|v| scale.to_ui(v)),
        terrace_lamp: raw.led.as_deref().and_then(parse_led),
        room_lamps,
    }))
}

pub fn decode_threshold_echo(payload: &[u8], scale: DeviceScale) -> Result<Inbound, ProtocolError> {
    let raw: ThresholdPayload = parse_object(payload)?;
    Ok(Inbound::ThresholdEcho(scale.to_ui(raw.threshold)))
}

pub fn decode_room_status(payload: &[u8]) -> Result<Inbound, ProtocolError> {
    let raw: RoomStatusPayload = parse_object(payload)?;
    let lamps = [
        (LampId::Room1, raw.lamp1),
        (LampId::Room2, raw.lamp2),
        (LampId::Room3, raw.lamp3),
    ]
    .into_iter()
    .filter_map(|(lamp, on)| on.map(|on| (lamp, on)))
    .collect();
    Ok(Inbound::RoomStatus(lamps))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedAction {
    Toggle,
    On,
    Off,
}

impl LedAction {
    pub fn from_state(on: bool) -> Self {
        if on {
            LedAction::On
        } else {
            LedAction::Off
        }
    }

    fn as_wire(self) -> &'static str {
        match self {
            LedAction::Toggle => "toggle",
            LedAction::On => "ON",
            LedAction::Off => "OFF",
        }
    }
}

/// Outbound command to one of the controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetMode(TerraceMode),
    Terrace(LedAction),
    /// Threshold already converted to the device scale
    SetThreshold(u16),
    ToggleRoom(LampId),
    AllRooms(bool),
}

impl Command {
    pub fn topic<'a>(&self, topics: &'a TopicConfig) -> &'a str {
        match self {
            Command::SetMode(_) | Command::Terrace(_) => &topics.command,
            Command::SetThreshold(_) => &topics.threshold_set,
            Command::ToggleRoom(_) | Command::AllRooms(_) => &topics.room_command,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let value = match self {
            Command::SetMode(mode) => json!({ "mode": mode.as_wire() }),
            Command::Terrace(action) => json!({ "led": action.as_wire() }),
            Command::SetThreshold(value) => json!({ "threshold": value }),
            Command::ToggleRoom(lamp) => {
                let index = lamp.room_index().ok_or_else(|| {
                    ProtocolError::Shape(format!("{lamp} is not a room lamp"))
                })?;
                let mut object = serde_json::Map::new();
                object.insert(format!("toggle_lamp{index}"), serde_json::Value::Bool(true));
                serde_json::Value::Object(object)
            }
            Command::AllRooms(true) => json!({ "command": "all_on" }),
            Command::AllRooms(false) => json!({ "command": "all_off" }),
        };
        serde_json::to_vec(&value).map_err(ProtocolError::Encode)
    }
}
