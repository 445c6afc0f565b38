use crate::codec::FormatCode;
use pgbridge_core::{GatewayError, Severity};
use std::collections::HashMap;

pub const PROTOCOL_VERSION_3: i32 = 196608;
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Startup {
        protocol: i32,
        params: HashMap<String, String>,
    },
    SslRequest,
    GssEncRequest,
    CancelRequest {
        pid: i32,
        secret: i32,
    },
    Query {
        sql: String,
    },
    /// Raw `p` payload. Its meaning (cleartext password, SASL initial
    /// response, SASL response) depends on the authentication phase.
    Password {
        data: Vec<u8>,
    },
    Terminate,
    Unsupported {
        code: u8,
    },
    /// Extended query: Parse (P)
    Parse {
        statement_name: String,
        query: String,
        param_oids: Vec<u32>,
    },
    /// Extended query: Bind (B)
    Bind {
        portal_name: String,
        statement_name: String,
        param_format_codes: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_format_codes: Vec<i16>,
    },
    /// Extended query: Describe (D)
    Describe {
        target: DescribeTarget,
        name: String,
    },
    /// Extended query: Execute (E)
    Execute {
        portal_name: String,
        max_rows: i32,
    },
    /// Extended query: Sync (S)
    Sync,
    /// Extended query: Flush (H)
    Flush,
    /// Extended query: Close (C)
    Close {
        target: CloseTarget,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    Statement,
    Portal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTarget {
    Statement,
    Portal,
}

/// Transaction state for ReadyForQuery.
/// - Idle: not in transaction block
/// - Transaction: in transaction block (after BEGIN)
/// - Error: in failed transaction, must ROLLBACK before new commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Transaction,
    Error,
}

impl TransactionState {
    pub fn wire_byte(self) -> u8 {
        match self {
            TransactionState::Idle => b'I',
            TransactionState::Transaction => b'T',
            TransactionState::Error => b'E',
        }
    }
}

/// A single field in a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescriptionField {
    pub name: String,
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl RowDescriptionField {
    pub fn new(name: impl Into<String>, type_oid: u32, type_len: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_len,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }

    pub fn with_format(mut self, format: FormatCode) -> Self {
        self.format = format;
        self
    }
}

/// Fields of an ErrorResponse / NoticeResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorFields {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<&GatewayError> for ErrorFields {
    fn from(err: &GatewayError) -> Self {
        ErrorFields::new(err.severity(), err.sqlstate(), err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationSasl { mechanisms: Vec<String> },
    AuthenticationSaslContinue { data: Vec<u8> },
    AuthenticationSaslFinal { data: Vec<u8> },
    ParameterStatus { key: String, value: String },
    BackendKeyData { pid: i32, secret: i32 },
    ReadyForQuery { state: TransactionState },
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    EmptyQueryResponse,
    ParameterDescription { type_oids: Vec<u32> },
    RowDescription { fields: Vec<RowDescriptionField> },
    DataRow { values: Vec<Option<Vec<u8>>> },
    CommandComplete { tag: String },
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
}

impl BackendMessage {
    pub fn error(err: &GatewayError) -> Self {
        BackendMessage::ErrorResponse(ErrorFields::from(err))
    }

    pub fn notice(code: &str, message: impl Into<String>) -> Self {
        BackendMessage::NoticeResponse(ErrorFields::new(Severity::Warning, code, message))
    }
}

/// Splits a SASLInitialResponse payload into mechanism name and client data.
pub fn parse_sasl_initial_response(data: &[u8]) -> Result<(String, Vec<u8>), GatewayError> {
    let nul = data
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| GatewayError::Protocol("malformed SASLInitialResponse".into()))?;
    let mechanism = String::from_utf8_lossy(&data[..nul]).to_string();
    let rest = &data[nul + 1..];
    if rest.len() < 4 {
        return Err(GatewayError::Protocol("malformed SASLInitialResponse".into()));
    }
    let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let body = &rest[4..];
    let payload = if len < 0 {
        Vec::new()
    } else {
        let len = len as usize;
        if len > body.len() {
            return Err(GatewayError::Protocol("SASL payload length exceeds message".into()));
        }
        body[..len].to_vec()
    };
    Ok((mechanism, payload))
}

/// Cleartext PasswordMessage payload: a single NUL-terminated string.
pub fn parse_password(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}
