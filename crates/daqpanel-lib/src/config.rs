use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::channel::{
    AnalogMode, ChannelId, DigitalMode, ANALOG_CHANNELS, DIFFERENTIAL_PAIRS, DIGITAL_LINES,
};
use crate::error::{DaqError, Result};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalogChannel {
    pub enabled: bool,
    pub mode: AnalogMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DigitalChannel {
    pub enabled: bool,
    pub mode: DigitalMode,
}

/// Per-channel enable/mode settings for the whole device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaqConfig {
    pub analog: [AnalogChannel; ANALOG_CHANNELS],
    pub digital: [DigitalChannel; DIGITAL_LINES],
}

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    version: u32,
    #[serde(flatten)]
    config: DaqConfig,
}

impl DaqConfig {
    /// Enforce the pairing rules: AI4..AI7 are always ground referenced, and
    /// AI(n+4) is unavailable while AI(n) measures differentially.
    pub fn normalize(&mut self) {
        for channel in self.analog.iter_mut().skip(DIFFERENTIAL_PAIRS) {
            channel.mode = AnalogMode::Ground;
        }
        for n in 0..DIFFERENTIAL_PAIRS {
            if self.analog[n].mode == AnalogMode::Reference {
                self.analog[n + DIFFERENTIAL_PAIRS].enabled = false;
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn analog_locked(&self, channel: usize) -> bool {
        channel >= DIFFERENTIAL_PAIRS
            && channel < ANALOG_CHANNELS
            && self.analog[channel - DIFFERENTIAL_PAIRS].mode == AnalogMode::Reference
    }

    pub fn enable(&mut self, channel: ChannelId) {
        match channel {
            ChannelId::Analog(n) => self.analog[n as usize].enabled = true,
            ChannelId::Digital(n) => self.digital[n as usize].enabled = true,
        }
    }

    pub fn enabled_analog(&self) -> Vec<u8> {
        self.analog
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled)
            .map(|(i, _)| i as u8)
            .collect()
    }

    pub fn enabled_digital(&self) -> Vec<u8> {
        self.digital
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled)
            .map(|(i, _)| i as u8)
            .collect()
    }

    fn digital_with_mode(&self, mode: DigitalMode) -> Vec<u8> {
        self.digital
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled && ch.mode == mode)
            .map(|(i, _)| i as u8)
            .collect()
    }

    pub fn digital_inputs(&self) -> Vec<u8> {
        self.digital_with_mode(DigitalMode::Input)
    }

    pub fn digital_outputs(&self) -> Vec<u8> {
        self.digital_with_mode(DigitalMode::Output)
    }

    /// Columns written by the recorder: every enabled analog channel followed
    /// by every enabled digital line regardless of direction.
    pub fn recorded_columns(&self) -> Vec<ChannelId> {
        self.enabled_analog()
            .into_iter()
            .map(ChannelId::Analog)
            .chain(self.enabled_digital().into_iter().map(ChannelId::Digital))
            .collect()
    }

    pub fn plan(&self, generation: u64) -> ChannelPlan {
        ChannelPlan {
            generation,
            analog_inputs: self
                .enabled_analog()
                .into_iter()
                .map(|n| (n, self.analog[n as usize].mode))
                .collect(),
            digital_inputs: self.digital_inputs(),
            digital_outputs: self.digital_outputs(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = ConfigFile {
            version: CONFIG_VERSION,
            config: self.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| DaqError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|e| DaqError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DaqError::io(path, e))?;
        Self::from_json(&text).map_err(|err| match err {
            DaqError::ConfigParse { source, .. } => DaqError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_json::from_str(text).map_err(|source| DaqError::ConfigParse {
                path: Default::default(),
                source,
            })?;
        if file.version != CONFIG_VERSION {
            return Err(DaqError::UnsupportedVersion {
                found: file.version,
                expected: CONFIG_VERSION,
            });
        }
        Ok(file.config.normalized())
    }
}

/// The channel lists every observer derives from a config, stamped with the
/// broadcast generation that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelPlan {
    pub generation: u64,
    pub analog_inputs: Vec<(u8, AnalogMode)>,
    pub digital_inputs: Vec<u8>,
    pub digital_outputs: Vec<u8>,
}

impl ChannelPlan {
    /// Channels read from the device on every scan, in scan order.
    pub fn inputs(&self) -> Vec<ChannelId> {
        self.analog_inputs
            .iter()
            .map(|(n, _)| ChannelId::Analog(*n))
            .chain(self.digital_inputs.iter().map(|n| ChannelId::Digital(*n)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.analog_inputs.is_empty()
            && self.digital_inputs.is_empty()
            && self.digital_outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DaqConfig {
        let mut config = DaqConfig::default();
        config.analog[0].enabled = true;
        config.analog[2].enabled = true;
        config.digital[1] = DigitalChannel {
            enabled: true,
            mode: DigitalMode::Input,
        };
        config.digital[4] = DigitalChannel {
            enabled: true,
            mode: DigitalMode::Output,
        };
        config
    }

    #[test]
    fn reference_mode_disables_paired_channel() {
        let mut config = DaqConfig::default();
        config.analog[1].mode = AnalogMode::Reference;
        config.analog[5].enabled = true;
        config.normalize();
        assert!(!config.analog[5].enabled);
        assert!(config.analog_locked(5));
        assert!(!config.analog_locked(4));
        assert!(!config.analog_locked(1));
    }

    #[test]
    fn upper_analog_channels_are_forced_to_ground() {
        let mut config = DaqConfig::default();
        config.analog[6].mode = AnalogMode::Reference;
        config.normalize();
        assert_eq!(config.analog[6].mode, AnalogMode::Ground);
    }

    #[test]
    fn derived_lists_follow_channel_order() {
        let config = sample_config();
        assert_eq!(config.digital_inputs(), vec![1]);
        assert_eq!(config.digital_outputs(), vec![4]);
        let names: Vec<String> = config
            .recorded_columns()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, ["AI0", "AI2", "DIO1", "DIO4"]);

        let plan = config.plan(7);
        assert_eq!(plan.generation, 7);
        assert_eq!(
            plan.inputs(),
            vec![
                ChannelId::Analog(0),
                ChannelId::Analog(2),
                ChannelId::Digital(1)
            ]
        );
        assert_eq!(plan.digital_outputs, vec![4]);
    }

    #[test]
    fn save_and_load_preserve_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = sample_config();
        config.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": 1"));
        assert_eq!(DaqConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn load_normalizes_and_checks_version() {
        let mut config = DaqConfig::default();
        config.analog[0].mode = AnalogMode::Reference;
        config.analog[4].enabled = true;
        let mut value = serde_json::to_value(ConfigFile {
            version: CONFIG_VERSION,
            config,
        })
        .unwrap();
        let loaded = DaqConfig::from_json(&value.to_string()).unwrap();
        assert!(!loaded.analog[4].enabled);

        value["version"] = serde_json::json!(99);
        match DaqConfig::from_json(&value.to_string()) {
            Err(DaqError::UnsupportedVersion { found: 99, .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_reports_missing_file_with_path() {
        let err = DaqConfig::load(Path::new("/nonexistent/daq.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/daq.json"));
    }
}
