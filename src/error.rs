//! Error types for a3s-recon

use thiserror::Error;

/// Errors that can occur while reconciling a batch
///
/// `Directory` errors raised inside a row are converted into row outcomes by
/// the engine and never abort a run. `Connection` and `Cryptographic` are
/// fatal to session open.
#[derive(Debug, Error)]
pub enum ReconError {
    /// A caller-supplied value was rejected (e.g., a malformed vault key id)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The directory rejected the session open attempt
    #[error("Connection error {code}: {message}")]
    Connection { code: i32, message: String },

    /// A directory call failed after the session was opened
    #[error("Directory error {code}: {message}")]
    Directory { code: i32, message: String },

    /// A protected credential could not be unprotected or protected
    #[error("Cryptographic error: {0}")]
    Cryptographic(String),

    /// Configuration load/save failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sanitized connection failure messages, keyed by directory error code
///
/// Internal codes and messages never reach an end user verbatim; the full
/// detail goes to the run logger instead.
const CONNECTION_MESSAGES: &[(i32, &str)] = &[
    (-111, "The company database could not be reached. Check the server and database settings."),
    (-119, "The configured database server type is not supported by the directory."),
    (-132, "The directory rejected the application user name or password."),
    (-4008, "The database user name or password was rejected."),
    (-8037, "The license server could not be reached."),
];

const GENERIC_CONNECTION_MESSAGE: &str =
    "Could not connect to the directory. Check the connection settings and the log for details.";

impl ReconError {
    /// Directory-side error code, if this error carries one
    pub fn code(&self) -> Option<i32> {
        match self {
            ReconError::Connection { code, .. } | ReconError::Directory { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Message safe to show an end user
    ///
    /// Connection failures map through a fixed lookup table. Other variants
    /// fall back to a generic message naming only the error category.
    pub fn user_message(&self) -> &'static str {
        match self {
            ReconError::Connection { code, .. } => CONNECTION_MESSAGES
                .iter()
                .find(|(c, _)| c == code)
                .map(|(_, msg)| *msg)
                .unwrap_or(GENERIC_CONNECTION_MESSAGE),
            ReconError::Cryptographic(_) => {
                "Stored credentials could not be decrypted for this user or machine. Re-enter and save them."
            }
            ReconError::Config(_) | ReconError::Serialization(_) => {
                "The configuration file could not be read or written."
            }
            ReconError::Validation(_) => "A supplied setting was rejected.",
            ReconError::Directory { .. } => "The directory reported an error. Check the log for details.",
        }
    }
}

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconError>;
