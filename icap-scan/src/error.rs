use std::io;
use thiserror::Error;

/// Error type of the ICAP scanning client.
#[derive(Error, Debug)]
pub enum IcapError {
    /// Every connection attempt failed at the network level (refused, reset, timeout).
    /// Carries the error of the last attempt.
    #[error("ICAP connection failed after {attempts} attempt(s): {source}")]
    ConnectionFailure {
        attempts: usize,
        #[source]
        source: io::Error,
    },

    /// Every attempt connected but the server sent nothing back.
    #[error("ICAP server refused to respond")]
    EmptyResponse,

    /// OPTIONS answered with something other than `ICAP/1.0 200`.
    #[error("Unexpected OPTIONS response: {0}")]
    ProtocolViolation(String),

    /// RESPMOD response too short to carry any verdict headers.
    #[error("Invalid result from ICAP server ({lines} line(s)): {response}")]
    MalformedVerdictResponse { lines: usize, response: String },

    /// The server kept sending past the response cap.
    #[error("ICAP response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local I/O (reading a file to scan, reading a config file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl IcapError {
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error came from talking to the server rather than from local input.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. }
                | Self::EmptyResponse
                | Self::ProtocolViolation(_)
                | Self::MalformedVerdictResponse { .. }
                | Self::ResponseTooLarge { .. }
        )
    }
}

impl From<serde_yaml::Error> for IcapError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result of ICAP client operations.
pub type IcapResult<T> = Result<T, IcapError>;

/// Build an [`IcapError::Configuration`] with `format!` arguments.
#[macro_export]
macro_rules! icap_config_error {
    ($($arg:tt)*) => {
        $crate::error::IcapError::configuration(format!($($arg)*))
    };
}

/// Build an [`IcapError::InvalidEndpoint`] with `format!` arguments.
#[macro_export]
macro_rules! icap_endpoint_error {
    ($($arg:tt)*) => {
        $crate::error::IcapError::endpoint(format!($($arg)*))
    };
}
