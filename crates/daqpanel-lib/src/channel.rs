use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DaqError;

pub const ANALOG_CHANNELS: usize = 8;
pub const DIGITAL_LINES: usize = 8;
/// AI0..AI3 can be paired with AI4..AI7 for differential measurements.
pub const DIFFERENTIAL_PAIRS: usize = 4;

/// A single physical line on the device, named the way the operator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    Analog(u8),
    Digital(u8),
}

impl ChannelId {
    pub fn index(&self) -> usize {
        match self {
            ChannelId::Analog(n) | ChannelId::Digital(n) => *n as usize,
        }
    }

    pub fn is_digital(&self) -> bool {
        matches!(self, ChannelId::Digital(_))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Analog(n) => write!(f, "AI{n}"),
            ChannelId::Digital(n) => write!(f, "DIO{n}"),
        }
    }
}

impl FromStr for ChannelId {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (kind, digits, limit) = if let Some(rest) = upper.strip_prefix("DIO") {
            ("DIO", rest, DIGITAL_LINES)
        } else if let Some(rest) = upper.strip_prefix("AI") {
            ("AI", rest, ANALOG_CHANNELS)
        } else {
            return Err(DaqError::UnknownChannel(s.to_string()));
        };
        let index: usize = digits
            .parse()
            .map_err(|_| DaqError::UnknownChannel(s.to_string()))?;
        if index >= limit {
            return Err(DaqError::UnknownChannel(s.to_string()));
        }
        Ok(match kind {
            "AI" => ChannelId::Analog(index as u8),
            _ => ChannelId::Digital(index as u8),
        })
    }
}

/// Terminal configuration of an analog input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalogMode {
    /// Referenced single-ended measurement against ground.
    #[default]
    Ground,
    /// Differential measurement against the paired channel AI(n+4).
    Reference,
}

impl AnalogMode {
    pub fn label(&self) -> &'static str {
        match self {
            AnalogMode::Ground => "Ground",
            AnalogMode::Reference => "Reference",
        }
    }

    /// Modes selectable for the given analog channel.
    pub fn choices(channel: usize) -> &'static [AnalogMode] {
        if channel < DIFFERENTIAL_PAIRS {
            &[AnalogMode::Ground, AnalogMode::Reference]
        } else {
            &[AnalogMode::Ground]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigitalMode {
    #[default]
    Input,
    Output,
}

impl DigitalMode {
    pub fn label(&self) -> &'static str {
        match self {
            DigitalMode::Input => "Input",
            DigitalMode::Output => "Output",
        }
    }

    pub fn all() -> [DigitalMode; 2] {
        [DigitalMode::Input, DigitalMode::Output]
    }
}
