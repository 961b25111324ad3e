//! Compile-time error and warning reporting.
//!
//! Errors are raised as `"[code] message"`, matching the small enumerated set of
//! codes the host-facing contract promises. There is no partial-module recovery:
//! the first error propagates straight to the top of [`crate::compile`].

use std::fmt;

/// The enumerated error/warning codes the compiler ever raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownId,
    TypeError,
    ArrayAlias,
    ConstReassign,
    UnknownMethod,
    ParseRegex,
    Arity,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownId => "unknown-id",
            ErrorCode::TypeError => "type-error",
            ErrorCode::ArrayAlias => "array-alias",
            ErrorCode::ConstReassign => "const-reassign",
            ErrorCode::UnknownMethod => "unknown-method",
            ErrorCode::ParseRegex => "parse-regex",
            ErrorCode::Arity => "arity",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compile-time error, fatal to the current `compile()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub code: ErrorCode,
    pub message: String,
}

impl CompileError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CompileError {
            code,
            message: message.into(),
        }
    }

    pub fn unknown_id(name: &str) -> Self {
        CompileError::new(ErrorCode::UnknownId, format!("unresolved identifier `{name}`"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        CompileError::new(ErrorCode::TypeError, message)
    }

    pub fn array_alias(message: impl Into<String>) -> Self {
        CompileError::new(ErrorCode::ArrayAlias, message)
    }

    pub fn const_reassign(name: &str) -> Self {
        CompileError::new(ErrorCode::ConstReassign, format!("cannot reassign const `{name}`"))
    }

    pub fn unknown_method(receiver_kind: &str, method: &str) -> Self {
        CompileError::new(
            ErrorCode::UnknownMethod,
            format!("`{receiver_kind}` has no method `{method}` accepting these argument kinds"),
        )
    }

    pub fn parse_regex(message: impl Into<String>) -> Self {
        CompileError::new(ErrorCode::ParseRegex, message)
    }

    pub fn arity(what: &str, expected: usize, got: usize) -> Self {
        CompileError::new(
            ErrorCode::Arity,
            format!("{what} expects {expected} argument(s), got {got}"),
        )
    }

    pub fn malformed(shape: impl fmt::Debug) -> Self {
        CompileError::new(ErrorCode::TypeError, format!("malformed AST node: {shape:?}"))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CompileError {}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::new(ErrorCode::TypeError, format!("WAT formatting error: {e}"))
    }
}

/// A non-fatal diagnostic emitted on [`crate::context::Context::warn`].
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

pub type CResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_bracketed_code_contract() {
        let e = CompileError::unknown_id("foo");
        assert_eq!(e.to_string(), "[unknown-id] unresolved identifier `foo`");
    }

    #[test]
    fn const_reassign_names_the_code() {
        let e = CompileError::const_reassign("x");
        assert_eq!(e.code, ErrorCode::ConstReassign);
    }
}
