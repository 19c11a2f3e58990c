//! This module provides common data structures and error types for the `tokio`
//! based clients.
//!
//! It defines the `Error` enum, which encapsulates all possible communication
//! errors, the [`ConnectError`] returned by a failed connection attempt, and the
//! [`ConnectionConfig`] describing one PLC endpoint.
use crate::protocol as proto;
use std::time::Duration;

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),

    /// The session was already closed when a request was issued.
    #[error("The PLC session is closed")]
    SessionClosed,

    /// No session could be established.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl Error {
    /// A short machine readable reason for the error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ProtocolError(err) => match err {
                proto::Error::NonAscii { .. } => "non_ascii",
                _ => "decode",
            },
            Error::TokioExceptionError(_) => "exception",
            Error::TokioError(tokio_modbus::Error::Transport(err))
                if err.kind() == std::io::ErrorKind::TimedOut =>
            {
                "timeout"
            }
            Error::TokioError(_) => "transport",
            Error::SessionClosed => "session_closed",
            Error::Connect(err) => err.reason(),
        }
    }

    /// Returns `true` if the request ran into the configured timeout.
    pub fn is_timeout(&self) -> bool {
        self.reason() == "timeout"
    }
}

/// The result type for tokio operations.
pub(crate) type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// Why a single connection attempt to the PLC failed.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    /// The endpoint could not be resolved or no route to it exists.
    #[error("PLC at {endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not complete within the timeout.
    #[error("Connecting to PLC at {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// The endpoint actively refused the connection.
    #[error("PLC at {endpoint} refused the connection: {source}")]
    Refused {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectError {
    /// Classifies the I/O error of a failed connect call.
    pub fn from_io(endpoint: impl Into<String>, timeout: Duration, err: std::io::Error) -> Self {
        let endpoint = endpoint.into();
        match err.kind() {
            std::io::ErrorKind::TimedOut => ConnectError::Timeout { endpoint, timeout },
            std::io::ErrorKind::ConnectionRefused => ConnectError::Refused {
                endpoint,
                source: err,
            },
            _ => ConnectError::Unreachable {
                endpoint,
                source: err,
            },
        }
    }

    /// One of `"unreachable"`, `"timeout"` or `"refused"`.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectError::Unreachable { .. } => "unreachable",
            ConnectError::Timeout { .. } => "timeout",
            ConnectError::Refused { .. } => "refused",
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ConnectError::Unreachable { endpoint, .. }
            | ConnectError::Timeout { endpoint, .. }
            | ConnectError::Refused { endpoint, .. } => endpoint,
        }
    }
}

/// The address of the PLC on the plant network.
pub const DEFAULT_HOST: &str = "192.168.5.1";
/// Used for connecting as well as for every single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how to reach the PLC.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port`, as used in log and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: proto::DEFAULT_PORT,
            unit_id: proto::DEFAULT_UNIT_ID,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
