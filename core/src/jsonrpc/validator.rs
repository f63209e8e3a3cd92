//! Structural checks for requests, responses and batches.

use serde_json::{Map, Value};

use crate::error::{RpcError, codes};
use crate::jsonrpc::message::{JSONRPC_VERSION, MessageError, RequestId};

pub const RESERVED_METHOD_PREFIX: &str = "rpc.";

/// Id to echo when a request fails validation: the request's own id if it is
/// well-typed, `Null` otherwise.
pub fn recover_id(value: &Value) -> RequestId {
    value
        .get("id")
        .and_then(|id| RequestId::from_value(id).ok())
        .unwrap_or(RequestId::Null)
}

/// Single-message rules, first failure wins: object shape, id type,
/// `jsonrpc == "2.0"`, method present and non-empty, method not reserved,
/// method character class.
pub fn validate_request(value: &Value) -> Result<(), MessageError> {
    let Some(obj) = value.as_object() else {
        return Err(RpcError::invalid_request("Request must be a JSON object").into());
    };

    if let Some(id) = obj.get("id") {
        RequestId::from_value(id)?;
    }
    let id = recover_id(value);

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        _ => {
            return Err(MessageError::new(
                id,
                RpcError::invalid_request(format!("jsonrpc must be '{JSONRPC_VERSION}'")),
            ));
        }
    }

    let method = match obj.get("method") {
        Some(Value::String(method)) => method,
        Some(_) => {
            return Err(MessageError::new(
                id,
                RpcError::invalid_request("method must be a string"),
            ));
        }
        None => {
            return Err(MessageError::new(
                id,
                RpcError::invalid_request("method is required"),
            ));
        }
    };

    validate_method_name(method).map_err(|error| MessageError::new(id, error))
}

/// Non-empty, not `rpc.`-prefixed, ASCII letters, digits, `_`, `/` and `.`.
pub fn validate_method_name(method: &str) -> Result<(), RpcError> {
    if method.is_empty() {
        return Err(RpcError::invalid_request("method must not be empty"));
    }
    if method.starts_with(RESERVED_METHOD_PREFIX) {
        return Err(RpcError::invalid_request(format!(
            "method '{method}' uses the reserved 'rpc.' prefix"
        )));
    }
    if let Some(bad) = method
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.')))
    {
        return Err(RpcError::invalid_request(format!(
            "method '{method}' contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Response-shape check: version, id type, result/error XOR, error code in
/// the standard set or server range, non-empty message.
pub fn validate_response(value: &Value) -> Result<(), RpcError> {
    let Some(obj) = value.as_object() else {
        return Err(RpcError::invalid_request("Response must be a JSON object"));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(RpcError::invalid_request(format!(
            "jsonrpc must be '{JSONRPC_VERSION}'"
        )));
    }
    match obj.get("id") {
        Some(id) => {
            RequestId::from_value(id)?;
        }
        None => return Err(RpcError::invalid_request("response must carry an id")),
    }

    match (obj.get("result"), obj.get("error")) {
        (Some(_), None) => Ok(()),
        (None, Some(error)) => validate_error_object(error),
        (Some(_), Some(_)) => Err(RpcError::invalid_request(
            "response must not carry both result and error",
        )),
        (None, None) => Err(RpcError::invalid_request(
            "response must carry result or error",
        )),
    }
}

fn validate_error_object(error: &Value) -> Result<(), RpcError> {
    let Some(error) = error.as_object() else {
        return Err(RpcError::invalid_request("error must be an object"));
    };
    let Some(code) = error.get("code").and_then(Value::as_i64) else {
        return Err(RpcError::invalid_request("error.code must be an integer"));
    };
    if code == 0 || !(codes::is_standard(code) || codes::is_server_range(code)) {
        return Err(RpcError::invalid_request(format!(
            "error.code {code} is neither a standard code nor in the server range"
        )));
    }
    match error.get("message").and_then(Value::as_str) {
        Some(message) if !message.is_empty() => Ok(()),
        _ => Err(RpcError::invalid_request(
            "error.message must be a non-empty string",
        )),
    }
}

/// An element of a batch that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementIssue {
    pub index: usize,
    pub error: MessageError,
}

/// Batch rules: the payload must be a non-empty array. Element failures are
/// reported per index instead of failing the batch.
pub fn validate_batch(value: &Value) -> Result<Vec<ElementIssue>, RpcError> {
    let Some(items) = value.as_array() else {
        return Err(RpcError::invalid_request("Batch must be a JSON array"));
    };
    if items.is_empty() {
        return Err(RpcError::invalid_request("Batch request must not be empty"));
    }
    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            validate_request(item)
                .err()
                .map(|error| ElementIssue { index, error })
        })
        .collect())
}

/// Convenience for handlers that received `params` as an object.
pub fn params_object(params: Option<&Value>) -> Result<Map<String, Value>, RpcError> {
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(RpcError::invalid_params("params must be an object")),
    }
}
