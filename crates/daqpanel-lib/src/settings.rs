use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::{DaqError, Result};
use crate::sample::DEFAULT_QUEUE_CAPACITY;

/// Which driver the acquisition loop talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// NI-DAQmx when the runtime loads, the simulator otherwise.
    #[default]
    Auto,
    Simulated,
    Nidaqmx,
}

impl FromStr for Backend {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "simulated" | "sim" => Ok(Backend::Simulated),
            "nidaqmx" | "ni" => Ok(Backend::Nidaqmx),
            other => Err(DaqError::InvalidSetting(format!("unknown backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: String,
    pub backend: Backend,
    pub sample_rate_hz: f64,
    pub queue_capacity: usize,
    pub plot_max_points: usize,
    pub plot_refresh_ms: u64,
    pub recorder_poll_ms: u64,
}

/// Period between scans at `rate_hz`. Rates whose period cannot be scheduled
/// are rejected.
pub fn interval_for_rate(rate_hz: f64) -> Result<Duration> {
    let invalid = || DaqError::InvalidSetting(format!("sample rate must be positive, got {rate_hz}"));
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(invalid());
    }
    let interval = Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|_| invalid())?;
    // The pacing loop adds two periods to a deadline.
    Instant::now()
        .checked_add(interval.saturating_mul(2))
        .map(|_| interval)
        .ok_or_else(|| {
            DaqError::InvalidSetting(format!("sample rate {rate_hz} Hz is too low to schedule"))
        })
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: "Dev1".into(),
            backend: Backend::Auto,
            sample_rate_hz: 50.0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            plot_max_points: 500,
            plot_refresh_ms: 20,
            recorder_poll_ms: 10,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `DAQPANEL_SETTINGS` when no path is
    /// given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("DAQPANEL_SETTINGS").map(PathBuf::from));
        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DaqError::io(path, e))?;
        toml::from_str(&text).map_err(|source| DaqError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `DAQPANEL_DEVICE`, `DAQPANEL_BACKEND` and `DAQPANEL_SAMPLE_RATE`
    /// as found by `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(device) = lookup("DAQPANEL_DEVICE") {
            self.device = device;
        }
        if let Some(backend) = lookup("DAQPANEL_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(rate) = lookup("DAQPANEL_SAMPLE_RATE") {
            self.sample_rate_hz = rate.trim().parse().map_err(|_| {
                DaqError::InvalidSetting(format!("DAQPANEL_SAMPLE_RATE is not a number: {rate}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        interval_for_rate(self.sample_rate_hz)?;
        if self.queue_capacity == 0 {
            return Err(DaqError::InvalidSetting("queue capacity must be > 0".into()));
        }
        if self.plot_max_points < 2 {
            return Err(DaqError::InvalidSetting(
                "plot must keep at least two points".into(),
            ));
        }
        if self.device.trim().is_empty() {
            return Err(DaqError::InvalidSetting("device name is empty".into()));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Result<Duration> {
        interval_for_rate(self.sample_rate_hz)
    }

    pub fn plot_refresh(&self) -> Duration {
        Duration::from_millis(self.plot_refresh_ms.max(1))
    }

    pub fn recorder_poll(&self) -> Duration {
        Duration::from_millis(self.recorder_poll_ms.max(1))
    }
}
