use std::path::PathBuf;

/// Errors surfaced by the acquisition pipeline and its persistence helpers.
#[derive(Debug, thiserror::Error)]
pub enum DaqError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("unknown channel name '{0}'")]
    UnknownChannel(String),

    #[error("NI-DAQmx error {code}: {message}")]
    Driver { code: i32, message: String },

    #[error("device backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("recorder already active ({path})")]
    RecorderBusy { path: PathBuf },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("acquisition worker is not running")]
    WorkerGone,
}

impl DaqError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaqError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaqError>;
