use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{RpcError, codes};
use crate::jsonrpc::validator;

pub const JSONRPC_VERSION: &str = "2.0";

/// Serialized when a response cannot be encoded at all.
pub const FALLBACK_INTERNAL_ERROR: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Request identifier. Keeps the JSON type it arrived with so the response
/// echoes `1` as `1` and `"1"` as `"1"`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestId {
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Str(String),
    Float(f64),
    Null,
}

impl RequestId {
    /// Integer, then string, then floating point. Arrays, objects and
    /// booleans are invalid requests.
    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        if let Some(n) = value.as_i64() {
            return Ok(RequestId::Int(n));
        }
        if let Some(n) = value.as_u64() {
            return Ok(RequestId::UInt(n));
        }
        if let Some(s) = value.as_str() {
            return Ok(RequestId::Str(s.to_string()));
        }
        if let Some(f) = value.as_f64() {
            return Ok(RequestId::Float(f));
        }
        if value.is_null() {
            return Ok(RequestId::Null);
        }
        Err(RpcError::invalid_request(
            "id must be an integer, a string, a number or null",
        ))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RequestId::Null)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Int(n) => write!(f, "{n}"),
            RequestId::UInt(n) => write!(f, "{n}"),
            RequestId::Str(s) => write!(f, "{s:?}"),
            RequestId::Float(x) => write!(f, "{x}"),
            RequestId::Null => f.write_str("null"),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Int(n) => serializer.serialize_i64(*n),
            RequestId::UInt(n) => serializer.serialize_u64(*n),
            RequestId::Str(s) => serializer.serialize_str(s),
            RequestId::Float(x) => serializer.serialize_f64(*x),
            RequestId::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RequestId::from_value(&value).map_err(|e| de::Error::custom(e.data_text()))
    }
}

/// Deserialize a field that may be absent (`None`) or explicitly null
/// (`Some(null)`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A request or notification. `id == None` or `id == Some(Null)` is a
/// notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "jsonrpc")]
    pub version: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.as_ref().is_none_or(RequestId::is_null)
    }

    /// Id to echo in a response; `Null` for notifications.
    pub fn response_id(&self) -> RequestId {
        self.id.clone().unwrap_or(RequestId::Null)
    }

    /// Validate an already-decoded JSON value and convert it.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        validator::validate_request(&value)?;
        let id = validator::recover_id(&value);
        serde_json::from_value(value).map_err(|e| MessageError {
            id,
            error: RpcError::invalid_request(e.to_string()),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A request that carries no id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// Why a payload could not become a [`Request`]. `id` is whatever could be
/// recovered from the payload, `Null` otherwise.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct MessageError {
    pub id: RequestId,
    pub error: RpcError,
}

impl MessageError {
    pub fn new(id: RequestId, error: RpcError) -> Self {
        Self { id, error }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.id, self.error)
    }
}

impl From<RpcError> for MessageError {
    fn from(error: RpcError) -> Self {
        Self {
            id: RequestId::Null,
            error,
        }
    }
}

pub fn parse_request(bytes: &[u8]) -> Result<Request, MessageError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| RpcError::parse_error(e.to_string()))?;
    Request::from_value(value)
}

pub fn parse_notification(bytes: &[u8]) -> Result<Notification, MessageError> {
    let request = parse_request(bytes)?;
    if !request.is_notification() {
        return Err(MessageError::new(
            request.response_id(),
            RpcError::invalid_request("notification must not carry an id"),
        ));
    }
    Ok(Notification {
        method: request.method,
        params: request.params,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// A response. Exactly one of result or error, by construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawResponse")]
pub struct Response {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn rpc_error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(err) => Some(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Compact wire encoding; never pretty-printed so one response stays on
    /// one line.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        map.serialize_entry("id", &self.id)?;
        match &self.outcome {
            Outcome::Result(value) => map.serialize_entry("result", value)?,
            Outcome::Error(err) => map.serialize_entry("error", err)?,
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawResponse {
    jsonrpc: String,
    #[serde(default, deserialize_with = "present")]
    id: Option<RequestId>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl TryFrom<RawResponse> for Response {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        if raw.jsonrpc != JSONRPC_VERSION {
            return Err(format!("jsonrpc must be '{JSONRPC_VERSION}'"));
        }
        let id = raw.id.ok_or("response must carry an id")?;
        let outcome = match (raw.result, raw.error) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(error),
            (Some(_), Some(_)) => return Err("response carries both result and error".into()),
            (None, None) => return Err("response carries neither result nor error".into()),
        };
        Ok(Response { id, outcome })
    }
}

pub fn parse_response(bytes: &[u8]) -> Result<Response, serde_json::Error> {
    serde_json::from_slice(bytes)
}

impl RpcError {
    fn data_text(&self) -> String {
        match &self.data {
            Some(Value::String(text)) => text.clone(),
            _ => codes::default_message(self.code).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_keeps_its_json_type() {
        let int = parse_request(br#"{"jsonrpc":"2.0","id":1,"method":"a"}"#).unwrap();
        assert_eq!(int.id, Some(RequestId::Int(1)));

        let string = parse_request(br#"{"jsonrpc":"2.0","id":"1","method":"a"}"#).unwrap();
        assert_eq!(string.id, Some(RequestId::Str("1".into())));

        let float = parse_request(br#"{"jsonrpc":"2.0","id":1.5,"method":"a"}"#).unwrap();
        assert_eq!(float.id, Some(RequestId::Float(1.5)));

        let big = parse_request(br#"{"jsonrpc":"2.0","id":18446744073709551615,"method":"a"}"#)
            .unwrap();
        assert_eq!(big.id, Some(RequestId::UInt(u64::MAX)));

        let zero = parse_request(br#"{"jsonrpc":"2.0","id":0,"method":"a"}"#).unwrap();
        assert_eq!(zero.id, Some(RequestId::Int(0)));

        let empty = parse_request(br#"{"jsonrpc":"2.0","id":"","method":"a"}"#).unwrap();
        assert_eq!(empty.id, Some(RequestId::Str(String::new())));
    }

    #[test]
    fn absent_and_null_ids_are_notifications() {
        let absent = parse_request(br#"{"jsonrpc":"2.0","method":"a"}"#).unwrap();
        assert_eq!(absent.id, None);
        assert!(absent.is_notification());

        let null = parse_request(br#"{"jsonrpc":"2.0","id":null,"method":"a"}"#).unwrap();
        assert_eq!(null.id, Some(RequestId::Null));
        assert!(null.is_notification());
    }

    #[test]
    fn structured_ids_are_invalid_requests() {
        for raw in [
            br#"{"jsonrpc":"2.0","id":[1],"method":"a"}"#.as_slice(),
            br#"{"jsonrpc":"2.0","id":{"n":1},"method":"a"}"#.as_slice(),
            br#"{"jsonrpc":"2.0","id":true,"method":"a"}"#.as_slice(),
        ] {
            let err = parse_request(raw).unwrap_err();
            assert_eq!(err.error.code, codes::INVALID_REQUEST);
            assert_eq!(err.id, RequestId::Null);
        }
    }

    #[test]
    fn truncated_json_is_a_parse_error_with_null_id() {
        let err = parse_request(br#"{"jsonrpc":"2.0","id":1,"method":"x""#).unwrap_err();
        assert_eq!(err.error.code, codes::PARSE_ERROR);
        assert_eq!(err.error.message, "Parse error");
        assert_eq!(err.id, RequestId::Null);
    }

    #[test]
    fn parse_notification_rejects_requests_with_ids() {
        let note = parse_notification(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert_eq!(note.method, "notifications/initialized");

        let err = parse_notification(br#"{"jsonrpc":"2.0","id":4,"method":"a"}"#).unwrap_err();
        assert_eq!(err.id, RequestId::Int(4));
        assert_eq!(err.error.code, codes::INVALID_REQUEST);
    }

    #[test]
    fn response_serializes_id_verbatim_including_null() {
        let ok = Response::success(RequestId::Int(1), json!({"ok": true}));
        assert_eq!(
            String::from_utf8(ok.to_bytes().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#
        );

        let err = Response::error(RequestId::Null, RpcError::new(-32603, "Internal error"));
        assert_eq!(
            String::from_utf8(err.to_bytes().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
        );
    }

    #[test]
    fn response_decoding_enforces_result_error_xor() {
        let both = br#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":-32603,"message":"x"}}"#;
        assert!(parse_response(both).is_err());

        let neither = br#"{"jsonrpc":"2.0","id":1}"#;
        assert!(parse_response(neither).is_err());

        let null_result = parse_response(br#"{"jsonrpc":"2.0","id":"a","result":null}"#).unwrap();
        assert_eq!(null_result.result(), Some(&Value::Null));
        assert_eq!(null_result.id, RequestId::Str("a".into()));
    }

    #[test]
    fn request_and_response_reencode_identically() {
        let raw = r#"{"jsonrpc":"2.0","id":"req-9","method":"tools/call","params":{"name":"x"}}"#;
        let request = parse_request(raw.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(request.to_bytes().unwrap()).unwrap(), raw);

        let raw = r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32001,"message":"Resource not found","data":"EP-001"}}"#;
        let response = parse_response(raw.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(response.to_bytes().unwrap()).unwrap(), raw);
    }

    #[test]
    fn fallback_payload_is_a_valid_error_response() {
        let response = parse_response(FALLBACK_INTERNAL_ERROR).unwrap();
        assert_eq!(response.rpc_error().map(|e| e.code), Some(codes::INTERNAL_ERROR));
    }
}
