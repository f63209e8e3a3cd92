//! Upstream error → JSON-RPC error object.
//!
//! Wire errors pass through unchanged. Typed domain errors map by identity
//! and never fall through to text matching. Opaque errors are classified by
//! substring when the fallback is enabled, otherwise they are internal.

use serde_json::Value;

use crate::error::{DomainError, HandlerError, RpcError, UNEXPECTED_ERROR_MESSAGE, codes};
use crate::redact::mask_sensitive;

const NOT_FOUND_PATTERNS: [&str; 2] = ["not found", "does not exist"];
const UNAUTHORIZED_PATTERNS: [&str; 3] = ["unauthorized", "access denied", "forbidden"];
const RATE_LIMIT_PATTERNS: [&str; 3] = ["rate limit", "too many requests", "quota exceeded"];
const VALIDATION_PATTERNS: [&str; 4] = ["validation", "invalid", "required", "constraint"];
const UNAVAILABLE_PATTERNS: [&str; 3] = ["timeout", "connection", "database"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMapper {
    pattern_fallback: bool,
}

impl Default for ErrorMapper {
    fn default() -> Self {
        Self {
            pattern_fallback: true,
        }
    }
}

impl ErrorMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity dispatch only; opaque errors always map to internal.
    pub fn strict() -> Self {
        Self {
            pattern_fallback: false,
        }
    }

    pub fn pattern_fallback(&self) -> bool {
        self.pattern_fallback
    }

    pub fn map(&self, err: &HandlerError) -> RpcError {
        match err {
            HandlerError::Rpc(rpc) => rpc.clone(),
            HandlerError::Domain(domain) => map_domain(domain),
            HandlerError::Other(other) => {
                let text = other.to_string();
                let code = if self.pattern_fallback {
                    classify_message(&text)
                } else {
                    None
                };
                match code {
                    Some(code) => RpcError::new(code, codes::default_message(code))
                        .with_data(sanitized(&text)),
                    None => internal(&text),
                }
            }
        }
    }
}

/// Map a typed domain error to its fixed code.
pub fn map_domain(err: &DomainError) -> RpcError {
    let code = match err {
        DomainError::NotFound(_) => codes::RESOURCE_NOT_FOUND,
        DomainError::AlreadyExists(_) | DomainError::Constraint(_) | DomainError::Validation(_) => {
            codes::VALIDATION
        }
        DomainError::Unauthorized(_) | DomainError::InvalidToken | DomainError::Forbidden(_) => {
            codes::UNAUTHORIZED
        }
        DomainError::RateLimited(_) => codes::RATE_LIMITED,
        DomainError::Unavailable(_) | DomainError::Timeout(_) => codes::SERVICE_UNAVAILABLE,
        DomainError::Internal(detail) => return internal(detail),
    };
    RpcError::new(code, codes::default_message(code)).with_data(sanitized(&err.to_string()))
}

/// Case-insensitive substring classification for errors of unknown type.
pub fn classify_message(text: &str) -> Option<i64> {
    let lower = text.to_lowercase();

    if contains_any(&lower, &NOT_FOUND_PATTERNS) {
        Some(codes::RESOURCE_NOT_FOUND)
    } else if contains_any(&lower, &UNAUTHORIZED_PATTERNS) {
        Some(codes::UNAUTHORIZED)
    } else if contains_any(&lower, &RATE_LIMIT_PATTERNS) {
        Some(codes::RATE_LIMITED)
    } else if contains_any(&lower, &VALIDATION_PATTERNS) {
        Some(codes::VALIDATION)
    } else if contains_any(&lower, &UNAVAILABLE_PATTERNS) {
        Some(codes::SERVICE_UNAVAILABLE)
    } else {
        None
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(*p))
}

fn internal(detail: &str) -> RpcError {
    RpcError::new(codes::INTERNAL_ERROR, UNEXPECTED_ERROR_MESSAGE).with_data(sanitized(detail))
}

fn sanitized(detail: &str) -> Value {
    Value::String(mask_sensitive(detail).into_owned())
}
