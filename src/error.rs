//! Error types shared by the BER codec, the LDAP protocol decoder and the LDIF reader.

use std::fmt;
use thiserror::Error;

/// Boxed low-level cause attached to protocol and LDIF errors.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the BER primitive layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BerError {
    #[error("BER truncated: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("indefinite length not supported")]
    IndefiniteLength,
    #[error("length too large: {0} length bytes")]
    LengthTooLarge(usize),
    #[error("integer too large: {0} bytes")]
    IntegerTooLarge(usize),
    #[error("invalid boolean length: {0}")]
    InvalidBooleanLength(usize),
    #[error("invalid null length: {0}")]
    InvalidNullLength(usize),
    #[error("no sequence is open")]
    NoOpenSequence,
    #[error("invalid UTF-8 in octet string")]
    InvalidUtf8,
}

/// LDAP result codes (RFC 4511 section 4.1.9) used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const AUTH_METHOD_NOT_SUPPORTED: ResultCode = ResultCode(7);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: ResultCode = ResultCode(12);
    pub const NO_SUCH_ATTRIBUTE: ResultCode = ResultCode(16);
    pub const UNDEFINED_ATTRIBUTE_TYPE: ResultCode = ResultCode(17);
    pub const CONSTRAINT_VIOLATION: ResultCode = ResultCode(19);
    pub const ATTRIBUTE_OR_VALUE_EXISTS: ResultCode = ResultCode(20);
    pub const INVALID_ATTRIBUTE_SYNTAX: ResultCode = ResultCode(21);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_DN_SYNTAX: ResultCode = ResultCode(34);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const NAMING_VIOLATION: ResultCode = ResultCode(64);
    pub const OBJECT_CLASS_VIOLATION: ResultCode = ResultCode(65);
    pub const NOT_ALLOWED_ON_NON_LEAF: ResultCode = ResultCode(66);
    pub const NOT_ALLOWED_ON_RDN: ResultCode = ResultCode(67);
    pub const ENTRY_ALREADY_EXISTS: ResultCode = ResultCode(68);
    pub const OTHER: ResultCode = ResultCode(80);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wire decoding failure. Carries the step-specific diagnostic and the
/// lower-level cause when there is one.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProtocolError {
    pub result_code: ResultCode,
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            result_code: ResultCode::PROTOCOL_ERROR,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_code(result_code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap `cause` under `step`, producing "step: cause".
    pub fn wrap<E>(step: &str, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            result_code: ResultCode::PROTOCOL_ERROR,
            message: format!("{}: {}", step, cause),
            cause: Some(Box::new(cause)),
        }
    }

    /// Prefix the message with an outer decoding step, keeping the result code.
    pub fn within(self, step: &str) -> Self {
        Self {
            result_code: self.result_code,
            message: format!("{}: {}", step, self.message),
            cause: Some(Box::new(self)),
        }
    }
}

/// Extension used by the decoder to tag every sub-step failure.
pub(crate) trait DecodeStep<T> {
    fn step(self, step: &str) -> Result<T, ProtocolError>;
}

impl<T, E> DecodeStep<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn step(self, step: &str) -> Result<T, ProtocolError> {
        self.map_err(|e| ProtocolError::wrap(step, e))
    }
}

/// A directory operation refused by the entry model or the backend; maps
/// directly onto an LDAPResult.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (result code {result_code})")]
pub struct OperationError {
    pub result_code: ResultCode,
    pub message: String,
}

impl OperationError {
    pub fn new(result_code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result_code,
            message: message.into(),
        }
    }
}

/// A DN or RDN that does not follow RFC 4514.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid DN \"{dn}\": {reason}")]
pub struct DnError {
    pub dn: String,
    pub reason: String,
}

impl DnError {
    pub fn new(dn: &str, reason: impl Into<String>) -> Self {
        Self {
            dn: dn.to_string(),
            reason: reason.into(),
        }
    }
}

/// A search filter string that does not follow RFC 4515.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid search filter \"{filter}\": {reason}")]
pub struct FilterError {
    pub filter: String,
    pub reason: String,
}

impl FilterError {
    pub fn new(filter: &str, reason: impl Into<String>) -> Self {
        Self {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }
}

/// A format or semantic error in LDIF input.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LdifError {
    pub message: String,
    /// Line number of the offending line (or of the first line of the record).
    pub line_number: u64,
    /// `true` when the reader can resynchronize on the next record.
    pub can_continue_reading: bool,
    #[source]
    pub cause: Option<Cause>,
}

impl LdifError {
    pub fn new(message: impl Into<String>, line_number: u64, can_continue_reading: bool) -> Self {
        Self {
            message: message.into(),
            line_number,
            can_continue_reading,
            cause: None,
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Everything `read_entry`/`read_change_record` can fail with.
#[derive(Debug, Error)]
pub enum LdifReadError {
    #[error("I/O error reading LDIF: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] LdifError),
}

impl LdifReadError {
    /// I/O failures are always fatal; format errors say so themselves.
    pub fn can_continue_reading(&self) -> bool {
        match self {
            LdifReadError::Io(_) => false,
            LdifReadError::Format(e) => e.can_continue_reading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_wrap_keeps_step_and_cause() {
        let err = ProtocolError::wrap("could not decode message ID", BerError::IndefiniteLength);
        assert_eq!(err.result_code, ResultCode::PROTOCOL_ERROR);
        assert!(err.message.starts_with("could not decode message ID"));
        assert!(err.message.contains("indefinite length"));
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_decode_step_maps_error() {
        let r: Result<(), BerError> = Err(BerError::Truncated { needed: 4, remaining: 1 });
        let err = r.step("could not decode protocol op").unwrap_err();
        assert!(err.to_string().contains("could not decode protocol op"));
        assert!(err.to_string().contains("need 4 bytes"));
    }

    #[test]
    fn test_ldif_read_error_continuation_flag() {
        let io = LdifReadError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!io.can_continue_reading());
        let fmt = LdifReadError::Format(LdifError::new("bad dn", 3, true));
        assert!(fmt.can_continue_reading());
        let fatal = LdifReadError::Format(LdifError::new("invalid leading space", 1, false));
        assert!(!fatal.can_continue_reading());
    }
}
