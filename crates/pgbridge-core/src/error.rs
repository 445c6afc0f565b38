use std::time::Duration;
use thiserror::Error;

/// Severity reported in the `S`/`V` fields of an error or notice response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Notice,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A well-formed message whose contents do not fit the statement or
    /// portal it names. Reported without closing the connection.
    #[error("{0}")]
    InvalidMessage(String),
    #[error("unsupported frontend protocol {major}.{minor}: server supports 3.0 to 3.0")]
    UnsupportedProtocol { major: u16, minor: u16 },
    #[error("{message}")]
    Authentication { code: &'static str, message: String },
    #[error("{message}")]
    Backend { code: String, message: String },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("connection pool exhausted: no backend connection available within {}ms", .0.as_millis())]
    PoolExhausted(Duration),
    #[error("canceling statement due to statement timeout")]
    Timeout,
    #[error("canceling statement due to user request")]
    Cancelled,
    #[error("unsupported catalog query: {0}")]
    UnsupportedCatalog(String),
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    InFailedTransaction,
    #[error("prepared statement \"{0}\" does not exist")]
    UnknownStatement(String),
    #[error("portal \"{0}\" does not exist")]
    UnknownPortal(String),
    #[error("prepared statement \"{0}\" already exists")]
    DuplicateStatement(String),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn auth_failed(user: &str) -> Self {
        GatewayError::Authentication {
            code: "28P01",
            message: format!("password authentication failed for user \"{user}\""),
        }
    }

    /// SQLSTATE reported in the `C` field.
    pub fn sqlstate(&self) -> &str {
        match self {
            GatewayError::Protocol(_) | GatewayError::InvalidMessage(_) => "08P01",
            GatewayError::UnsupportedProtocol { .. } => "0A000",
            GatewayError::Authentication { code, .. } => code,
            GatewayError::Backend { code, .. } => code,
            GatewayError::BackendUnavailable(_) => "08006",
            GatewayError::PoolExhausted(_) => "53300",
            GatewayError::Timeout | GatewayError::Cancelled => "57014",
            GatewayError::UnsupportedCatalog(_) => "0A000",
            GatewayError::InFailedTransaction => "25P02",
            GatewayError::UnknownStatement(_) => "26000",
            GatewayError::UnknownPortal(_) => "34000",
            GatewayError::DuplicateStatement(_) => "42P05",
            GatewayError::InvalidParameter(_) => "22P02",
            GatewayError::NotSupported(_) => "0A000",
            GatewayError::Internal(_) => "XX000",
        }
    }

    pub fn severity(&self) -> Severity {
        if self.is_fatal() {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }

    /// Fatal errors terminate the client connection after being reported.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Protocol(_)
                | GatewayError::UnsupportedProtocol { .. }
                | GatewayError::Authentication { .. }
        )
    }
}
