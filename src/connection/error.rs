//! Result codes and error definitions.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// LDAP result code, including the client-side codes used by this SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    NoSuchObject,
    InvalidCredentials,
    Busy,
    Unavailable,
    UnwillingToPerform,
    /// The client lost its connection to the server.
    ClientSideServerDown,
    /// The client gave up waiting for the server.
    ClientSideTimeout,
    /// The client abandoned the operation, usually by closing the connection.
    ClientSideUserCancelled,
    /// The client could not establish a connection.
    ClientSideConnectError,
    Other(u32),
}

impl ResultCode {
    /// Numeric value as carried on the wire (client-side codes are in the 80-97 range).
    pub fn value(&self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::TimeLimitExceeded => 3,
            ResultCode::NoSuchObject => 32,
            ResultCode::InvalidCredentials => 49,
            ResultCode::Busy => 51,
            ResultCode::Unavailable => 52,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::ClientSideServerDown => 81,
            ResultCode::ClientSideTimeout => 85,
            ResultCode::ClientSideUserCancelled => 88,
            ResultCode::ClientSideConnectError => 91,
            ResultCode::Other(v) => *v,
        }
    }

    /// Return true if this code indicates that the connection, not the operation, failed.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ResultCode::ClientSideServerDown
                | ResultCode::ClientSideConnectError
                | ResultCode::ClientSideUserCancelled
        )
    }
}

impl From<u32> for ResultCode {
    fn from(val: u32) -> Self {
        match val {
            0 => ResultCode::Success,
            1 => ResultCode::OperationsError,
            2 => ResultCode::ProtocolError,
            3 => ResultCode::TimeLimitExceeded,
            32 => ResultCode::NoSuchObject,
            49 => ResultCode::InvalidCredentials,
            51 => ResultCode::Busy,
            52 => ResultCode::Unavailable,
            53 => ResultCode::UnwillingToPerform,
            81 => ResultCode::ClientSideServerDown,
            85 => ResultCode::ClientSideTimeout,
            88 => ResultCode::ClientSideUserCancelled,
            91 => ResultCode::ClientSideConnectError,
            other => ResultCode::Other(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.value(), self)
    }
}

/// Errors surfaced by connections, factories and load balancers.
#[derive(Debug, Clone, Error)]
pub enum LdapError {
    /// No usable connection could be obtained.
    #[error("Connect error: {message}")]
    Connect {
        message: String,
        #[source]
        cause: Option<Box<LdapError>>,
    },

    /// The connection is no longer usable (timed out, disconnected, or heartbeat failed).
    #[error("Server down: {message}")]
    ServerDown {
        message: String,
        #[source]
        cause: Option<Box<LdapError>>,
    },

    /// The operation was abandoned on the client side.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The server answered with a non-success result code.
    #[error("Operation failed with result {code}: {message}")]
    Result { code: ResultCode, message: String },
}

/// Result type for directory operations.
pub type LdapResult<T> = Result<T, LdapError>;

impl LdapError {
    /// Create a connect error without a cause.
    pub fn connect(message: impl Into<String>) -> Self {
        LdapError::Connect {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a connect error caused by `cause`.
    pub fn connect_caused_by(message: impl Into<String>, cause: LdapError) -> Self {
        LdapError::Connect {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create a server-down error without a cause.
    pub fn server_down(message: impl Into<String>) -> Self {
        LdapError::ServerDown {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a server-down error caused by `cause`.
    pub fn server_down_caused_by(message: impl Into<String>, cause: LdapError) -> Self {
        LdapError::ServerDown {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The liveness-timeout error raised when a heartbeat does not complete in time.
    pub fn heartbeat_timeout(timeout: Duration) -> Self {
        LdapError::server_down(format!(
            "Heartbeat timed out after {} ms",
            timeout.as_millis()
        ))
    }

    /// Error handed to requests that were pending when their connection was closed.
    pub fn closed_by_client() -> Self {
        LdapError::Cancelled("Connection closed by client".to_string())
    }

    /// Create an error from a server result.
    pub fn from_result(code: ResultCode, message: impl Into<String>) -> Self {
        LdapError::Result {
            code,
            message: message.into(),
        }
    }

    /// The result code this error maps to.
    pub fn result_code(&self) -> ResultCode {
        match self {
            LdapError::Connect { .. } => ResultCode::ClientSideConnectError,
            LdapError::ServerDown { .. } => ResultCode::ClientSideServerDown,
            LdapError::Cancelled(_) => ResultCode::ClientSideUserCancelled,
            LdapError::Result { code, .. } => *code,
        }
    }

    /// Return true if the error describes the connection rather than a single operation.
    ///
    /// A response carrying any server result code still proves the server is alive,
    /// so only connection-level errors do not count as activity.
    pub fn is_connection_error(&self) -> bool {
        match self {
            LdapError::Result { code, .. } => code.is_connection_level(),
            _ => true,
        }
    }

    /// The directly wrapped cause, if any.
    pub fn cause(&self) -> Option<&LdapError> {
        match self {
            LdapError::Connect { cause, .. } | LdapError::ServerDown { cause, .. } => {
                cause.as_deref()
            }
            _ => None,
        }
    }
}
