use super::error::SessionError;
use crate::device::{LampId, TerraceMode};
use std::str::FromStr;

/// A discrete control request, whether it came from a button, a gesture
/// recognizer or a voice command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    SetMode(TerraceMode),
    ToggleLamp(LampId),
    /// Threshold on the 0-100 scale
    SetThreshold(u8),
    SetDelayTimer { lamp: LampId, minutes: u32 },
    CancelDelayTimer(LampId),
    AllOn,
    AllOff,
}

impl Intent {
    /// Maps the finger count reported by a hand gesture recognizer.
    ///
    /// ```text
    /// 0 → all off, 1..=3 → toggle room lamp N, 5 → all on
    /// ```
    pub fn from_finger_count(fingers: u8) -> Option<Self> {
        match fingers {
            0 => Some(Intent::AllOff),
            1..=3 => LampId::from_room_index(fingers).map(Intent::ToggleLamp),
            5 => Some(Intent::AllOn),
            _ => None,
        }
    }
}

fn parse_lamp(raw: &str) -> Option<LampId> {
    match raw.to_ascii_lowercase().as_str() {
        "terrace" | "teras" => Some(LampId::Terrace),
        "room1" | "kamar1" | "1" => Some(LampId::Room1),
        "room2" | "kamar2" | "2" => Some(LampId::Room2),
        "room3" | "kamar3" | "3" => Some(LampId::Room3),
        _ => None,
    }
}

/// Console syntax:
///
/// ```text
/// mode auto|manual     toggle <lamp>      threshold <0-100>
/// delay <lamp> <min>   cancel <lamp>      all on|off
/// fingers <count>
/// ```
impl FromStr for Intent {
    type Err = SessionError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || SessionError::InvalidIntent(line.trim().to_string());
        let lamp = |raw: Option<&str>| raw.and_then(parse_lamp).ok_or_else(invalid);
        let mut words = line.split_whitespace();

        let intent = match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("mode") => Intent::SetMode(
                words
                    .next()
                    .and_then(TerraceMode::parse)
                    .ok_or_else(invalid)?,
            ),
            Some("toggle") => Intent::ToggleLamp(lamp(words.next())?),
            Some("threshold") => {
                let value: u8 = words
                    .next()
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v <= 100)
                    .ok_or_else(invalid)?;
                Intent::SetThreshold(value)
            }
            Some("delay") => {
                let lamp = lamp(words.next())?;
                let minutes = words
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(invalid)?;
                Intent::SetDelayTimer { lamp, minutes }
            }
            Some("cancel") => Intent::CancelDelayTimer(lamp(words.next())?),
            Some("all") => match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("on") => Intent::AllOn,
                Some("off") => Intent::AllOff,
                _ => return Err(invalid()),
            },
            Some("fingers") => words
                .next()
                .and_then(|v| v.parse().ok())
                .and_then(Intent::from_finger_count)
                .ok_or_else(invalid)?,
            _ => return Err(invalid()),
        };

        if words.next().is_some() {
            return Err(invalid());
        }
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finger_counts_map_to_room_intents() {
        assert_eq!(Intent::from_finger_count(0), Some(Intent::AllOff));
        assert_eq!(
            Intent::from_finger_count(2),
            Some(Intent::ToggleLamp(LampId::Room2))
        );
        assert_eq!(
            Intent::from_finger_count(3),
            Some(Intent::ToggleLamp(LampId::Room3))
        );
        assert_eq!(Intent::from_finger_count(4), None);
        assert_eq!(Intent::from_finger_count(5), Some(Intent::AllOn));
        assert_eq!(Intent::from_finger_count(9), None);
    }

    #[test]
    fn parses_console_lines() {
        assert_eq!(
            "mode MANUAL".parse::<Intent>().unwrap(),
            Intent::SetMode(TerraceMode::Manual)
        );
        assert_eq!(
            "delay kamar1 10".parse::<Intent>().unwrap(),
            Intent::SetDelayTimer {
                lamp: LampId::Room1,
                minutes: 10
            }
        );
        assert_eq!(
            "threshold 60".parse::<Intent>().unwrap(),
            Intent::SetThreshold(60)
        );
        assert_eq!("all off".parse::<Intent>().unwrap(), Intent::AllOff);
        assert_eq!(
            "fingers 1".parse::<Intent>().unwrap(),
            Intent::ToggleLamp(LampId::Room1)
        );
    }

    #[test]
    fn rejects_malformed_console_lines() {
        for line in ["", "threshold 150", "toggle garage", "all maybe", "mode auto now", "fingers 4"] {
            assert!(line.parse::<Intent>().is_err(), "accepted {:?}", line);
        }
    }
}
