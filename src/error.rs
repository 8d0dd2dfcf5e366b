use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum number of pinned items reached ({capacity})")]
    CapacityExceeded { capacity: usize },
    #[error("'{0}' is not pinned")]
    NotFound(String),
}

/// Failures of the configuration backend. Callers log these and keep the
/// in-memory state; the next successful write re-syncs.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("settings file unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is malformed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("settings could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("key '{key}' expects a {expected} value")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("unknown settings key '{0}'")]
    UnknownKey(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorError {
    #[error("invalid accelerator '{0}'")]
    Invalid(String),
}
