//! Error types for the stresslink crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio adapter is switched off or missing.
    #[error("Bluetooth adapter disabled")]
    AdapterDisabled,

    /// Pause or stop was requested with no connection to release.
    #[error("No active connection")]
    NoActiveConnection,

    /// Some interested services or characteristics were not found on the peripheral.
    #[error("Discovery incomplete: {missing} interest(s) not present")]
    DiscoveryIncomplete {
        /// Number of interests that could not be matched.
        missing: usize,
    },

    /// The connectivity probe reported the network as unreachable.
    #[error("Upload service unreachable")]
    Unreachable,

    /// The remote service rejected the batch with a negative outcome code.
    #[error("Remote service rejected request with code {code}")]
    RemoteRejected {
        /// The outcome code returned by the service.
        code: i32,
    },

    /// Transport-level failure talking to the remote service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP failure from the upload transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration could not be parsed or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Heart-rate readings and timestamps must pair up one to one.
    #[error("Heartbeat/timestamp length mismatch: {heartbeats} readings, {timestamps} timestamps")]
    LengthMismatch {
        /// Number of heart-rate readings supplied.
        heartbeats: usize,
        /// Number of timestamps supplied.
        timestamps: usize,
    },

    /// An operation did not complete within its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::RemoteRejected { code: -1 }.to_string(),
            "Remote service rejected request with code -1"
        );
        assert_eq!(
            Error::LengthMismatch {
                heartbeats: 3,
                timestamps: 2
            }
            .to_string(),
            "Heartbeat/timestamp length mismatch: 3 readings, 2 timestamps"
        );
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err: Error = toml::from_str::<toml::Value>("port = ")
            .map_err(Error::from)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
