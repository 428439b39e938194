use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lamps known to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LampId {
    Terrace,
    Room1,
    Room2,
    Room3,
}

impl LampId {
    pub const ROOMS: [LampId; 3] = [LampId::Room1, LampId::Room2, LampId::Room3];

    pub fn is_room(self) -> bool {
        !matches!(self, LampId::Terrace)
    }

    /// Index used by the room controller (`lamp1`, `toggle_lamp1`, ...)
    pub fn room_index(self) -> Option<u8> {
        match self {
            LampId::Terrace => None,
            LampId::Room1 => Some(1),
            LampId::Room2 => Some(2),
            LampId::Room3 => Some(3),
        }
    }

    pub fn from_room_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(LampId::Room1),
            2 => Some(LampId::Room2),
            3 => Some(LampId::Room3),
            _ => None,
        }
    }
}

impl fmt::Display for LampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LampId::Terrace => write!(f, "terrace lamp"),
            LampId::Room1 => write!(f, "room 1 lamp"),
            LampId::Room2 => write!(f, "room 2 lamp"),
            LampId::Room3 => write!(f, "room 3 lamp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerraceMode {
    #[default]
    Auto,
    Manual,
}

impl TerraceMode {
    /// Case-insensitive parse; anything unrecognised is `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(TerraceMode::Auto),
            "manual" => Some(TerraceMode::Manual),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            TerraceMode::Auto => "auto",
            TerraceMode::Manual => "manual",
        }
    }
}

impl fmt::Display for TerraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire().to_uppercase())
    }
}

/// Synchronized view of the remote devices.
///
/// Intensity and threshold are kept on the 0-100 scale; conversion to the
/// device scale happens only in [`crate::protocol`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub light_intensity: u8,
    pub terrace_mode: TerraceMode,
    pub terrace_threshold: u8,
    pub lamp_status: BTreeMap<LampId, bool>,
}

impl DeviceSnapshot {
    /// Conservative session-start state: auto mode, every lamp off
    pub fn initial(threshold: u8, room3_enabled: bool) -> Self {
        let mut lamp_status = BTreeMap::new();
        lamp_status.insert(LampId::Terrace, false);
        for lamp in LampId::ROOMS {
            if lamp != LampId::Room3 || room3_enabled {
                lamp_status.insert(lamp, false);
            }
        }

        Self {
            light_intensity: 0,
            terrace_mode: TerraceMode::Auto,
            terrace_threshold: threshold.min(100),
            lamp_status,
        }
    }

    pub fn lamp(&self, lamp: LampId) -> bool {
        self.lamp_status.get(&lamp).copied().unwrap_or(false)
    }

    pub fn has_lamp(&self, lamp: LampId) -> bool {
        self.lamp_status.contains_key(&lamp)
    }

    pub fn room_lamps(&self) -> impl Iterator<Item = LampId> + '_ {
        self.lamp_status.keys().copied().filter(|lamp| lamp.is_room())
    }
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self::initial(40, true)
    }
}
