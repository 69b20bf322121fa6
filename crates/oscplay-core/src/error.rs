//! Error types for oscplay-core
//!
//! Only configuration and storage operations return these to the caller.
//! The runtime paths (proxy receive, scheduler dispatch, playback) log
//! routing, transport and script failures and keep going.

use thiserror::Error;

/// Result type alias for oscplay-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in oscplay-core
#[derive(Debug, Error)]
pub enum Error {
    /// Bad node arity, unparsable numeric argument, invalid regex or unknown node type
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Target output id not found
    #[error("Routing error: {0}")]
    Routing(String),

    /// Socket or OSC encoding failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// User script failed to compile or run
    #[error("Script error: {0}")]
    Script(String),

    /// Recording session missing or unusable
    #[error("Session error: {0}")]
    Session(String),

    /// No platform directory could be determined
    #[error("Could not determine the oscplay config directory")]
    NoConfigDir,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

impl From<rosc::OscError> for Error {
    fn from(e: rosc::OscError) -> Self {
        Error::Transport(format!("{:?}", e))
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Configuration(format!("invalid regex: {}", e))
    }
}
