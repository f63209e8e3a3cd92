use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const RESOURCE_NOT_FOUND: i64 = -32001;
    pub const UNAUTHORIZED: i64 = -32002;
    pub const VALIDATION: i64 = -32003;
    pub const SERVICE_UNAVAILABLE: i64 = -32004;
    pub const RATE_LIMITED: i64 = -32005;

    /// Inclusive bounds of the implementation-defined server range.
    pub const SERVER_RANGE_START: i64 = -32099;
    pub const SERVER_RANGE_END: i64 = -32000;

    pub fn is_standard(code: i64) -> bool {
        matches!(
            code,
            PARSE_ERROR | INVALID_REQUEST | METHOD_NOT_FOUND | INVALID_PARAMS | INTERNAL_ERROR
        )
    }

    pub fn is_server_range(code: i64) -> bool {
        (SERVER_RANGE_START..=SERVER_RANGE_END).contains(&code)
    }

    /// Canonical `message` text for a code.
    pub fn default_message(code: i64) -> &'static str {
        match code {
            PARSE_ERROR => "Parse error",
            INVALID_REQUEST => "Invalid Request",
            METHOD_NOT_FOUND => "Method not found",
            INVALID_PARAMS => "Invalid params",
            INTERNAL_ERROR => "Internal error",
            RESOURCE_NOT_FOUND => "Resource not found",
            UNAUTHORIZED => "Unauthorized",
            VALIDATION => "Validation error",
            SERVICE_UNAVAILABLE => "Service unavailable",
            RATE_LIMITED => "Rate limit exceeded",
            _ => "Server error",
        }
    }
}

/// Message used when an error cannot be classified. The raw cause never
/// appears in `message`; it goes to `data` after masking.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// A JSON-RPC error object as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error with the canonical message for `code` and a string detail in `data`.
    pub fn with_detail(code: i64, detail: impl Into<String>) -> Self {
        Self::new(code, codes::default_message(code)).with_data(Value::String(detail.into()))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::PARSE_ERROR, detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::INVALID_REQUEST, detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::with_detail(
            codes::METHOD_NOT_FOUND,
            format!("Method '{method}' not found"),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::INVALID_PARAMS, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::INTERNAL_ERROR, detail)
    }

    pub fn resource_not_found(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::RESOURCE_NOT_FOUND, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::UNAUTHORIZED, detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::VALIDATION, detail)
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::SERVICE_UNAVAILABLE, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::with_detail(codes::RATE_LIMITED, detail)
    }

    /// Code is one of the five standard codes or inside the server range.
    pub fn has_known_code(&self) -> bool {
        codes::is_standard(self.code) || codes::is_server_range(self.code)
    }
}

/// Typed failures raised by domain collaborators. The error mapper turns
/// these into exact codes without looking at their text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal: {0}")]
    Internal(String),
}

/// What a method handler may fail with.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Already a wire-level error; passed through unchanged.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Anything else, classified best-effort by message.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_not_found_carries_method_name_in_data() {
        let err = RpcError::method_not_found("missing");
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert_eq!(err.message, "Method not found");
        assert_eq!(err.data, Some(json!("Method 'missing' not found")));
    }

    #[test]
    fn data_is_omitted_when_absent() {
        let err = RpcError::new(codes::INTERNAL_ERROR, "Internal error");
        let encoded = serde_json::to_value(&err).unwrap();
        assert_eq!(encoded, json!({"code": -32603, "message": "Internal error"}));
    }

    #[test]
    fn custom_codes_sit_inside_server_range() {
        for code in [
            codes::RESOURCE_NOT_FOUND,
            codes::UNAUTHORIZED,
            codes::VALIDATION,
            codes::SERVICE_UNAVAILABLE,
            codes::RATE_LIMITED,
        ] {
            assert!(codes::is_server_range(code), "{code} outside server range");
            assert!(!codes::is_standard(code));
        }
        assert!(!codes::is_server_range(-32100));
        assert!(!RpcError::new(42, "odd").has_known_code());
    }

    #[test]
    fn handler_error_from_str_is_other() {
        let err = HandlerError::other("database connection refused");
        assert!(matches!(err, HandlerError::Other(_)));
        assert_eq!(err.to_string(), "database connection refused");
    }
}
