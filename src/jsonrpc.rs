//! Wire model, see https://www.jsonrpc.org/specification

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

pub const VERSION: &str = "2.0";

/// Reserved error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // implementation-defined server errors
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}

/// Call identifier. Compared structurally and echoed back, never interpreted:
/// `1` and `"1"` are different identifiers. Any JSON number is kept as sent,
/// so `2.5` or `18446744073709551615` come back unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Id {
    #[default]
    Null,
    Number(serde_json::Number),
    String(String),
}

impl Id {
    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n.into())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// A single method invocation. `params` stays undecoded until the handler
/// asks for it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Call {
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>, // tolerated when missing, must be "2.0" when present
    #[serde(default)]
    pub id: Id, // a missing id is a notification, same as null
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl Call {
    pub fn new<P: Serialize>(id: Id, method: &str, params: P) -> serde_json::Result<Self> {
        Ok(Self {
            version: Some(VERSION.to_string()),
            id,
            method: method.to_string(),
            params: Some(serde_json::value::to_raw_value(&params)?),
        })
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// Decode the params. Absent params decode as `null`.
    pub fn params<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match self.params {
            Some(ref raw) => serde_json::from_str(raw.get()),
            None => serde_json::from_value(Value::Null),
        }
    }

    /// Same as [`Call::params`] but fails with an `Invalid params` error.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        self.params()
            .map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    pub(crate) fn has_valid_version(&self) -> bool {
        self.version.as_deref().map_or(true, |v| v == VERSION)
    }
}

/// Error envelope. Also the failure a client sees when the peer answers with
/// an error.
#[serde_with::skip_serializing_none]
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[error("jsonrpc: {message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64),
    Application(i64),
}

impl RpcError {
    pub fn new<S: Into<String>>(code: i64, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data<S: Into<String>>(mut self, data: S) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error<S: Into<String>>(message: S) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("method with name {method} not registered"),
        )
    }

    pub fn invalid_params<S: Into<String>>(message: S) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::PARSE_ERROR => ErrorKind::ParseError,
            codes::INVALID_REQUEST => ErrorKind::InvalidRequest,
            codes::METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            codes::INVALID_PARAMS => ErrorKind::InvalidParams,
            codes::INTERNAL_ERROR => ErrorKind::InternalError,
            code @ codes::SERVER_ERROR_START..=codes::SERVER_ERROR_END => {
                ErrorKind::ServerError(code)
            }
            code => ErrorKind::Application(code),
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Application(_))
    }
}

/// Outcome of one call. Terminal responses carry exactly one of
/// `result` / `error`, see [`Response::finish`].
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    #[serde(rename = "jsonrpc")]
    pub version: String,
    #[serde(default)]
    pub id: Id,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn new(id: Id) -> Self {
        Self {
            version: VERSION.to_string(),
            id,
            result: None,
            error: None,
        }
    }

    pub fn for_call(call: &Call) -> Self {
        Self::new(call.id.clone())
    }

    pub fn error(id: Id, error: RpcError) -> Self {
        let mut resp = Self::new(id);
        resp.error = Some(error);
        resp
    }

    pub fn set_result<T: Serialize>(&mut self, result: T) {
        match serde_json::to_value(result) {
            Ok(value) => self.result = Some(value),
            Err(e) => self.set_error(RpcError::internal(e.to_string())),
        }
    }

    pub fn set_error(&mut self, error: RpcError) {
        self.error = Some(error);
    }

    pub fn code(&self) -> Option<i64> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Enforce the one-of rule: an error wins over a result, and a response
    /// with neither gets a `null` result.
    pub(crate) fn finish(&mut self) {
        if self.error.is_some() {
            self.result = None;
        } else if self.result.is_none() {
            self.result = Some(Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_variants() {
        let ids: Vec<Id> = serde_json::from_str(r#"[null, 7, "7"]"#).unwrap();
        assert_eq!(ids, vec![Id::Null, Id::from(7), Id::from("7")]);
        assert_ne!(Id::from(7), Id::from("7"));
        assert_eq!(serde_json::to_string(&Id::Null).unwrap(), "null");
    }

    #[test]
    fn id_keeps_any_number() {
        let ids: Vec<Id> = serde_json::from_str("[2.5, 18446744073709551615, -3]").unwrap();
        assert!(matches!(ids[0], Id::Number(_)));
        assert_eq!(
            serde_json::to_string(&ids).unwrap(),
            "[2.5,18446744073709551615,-3]"
        );
        assert_eq!(ids[2], Id::from(-3));
    }

    #[test]
    fn call_without_id_is_notification() {
        let call: Call = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(call.is_notification());
        assert!(call.params.is_none());
        assert_eq!(call.params::<Option<u8>>().unwrap(), None);
    }

    #[test]
    fn call_params_are_deferred() {
        let call: Call =
            serde_json::from_str(r#"{"id":"a","method":"m","params":{"foo": "bar"}}"#).unwrap();

        #[derive(serde::Deserialize)]
        struct Params {
            foo: String,
        }
        let params: Params = call.params().unwrap();
        assert_eq!(params.foo, "bar");
        assert!(call.params::<Vec<i64>>().is_err());

        let err = call.parse_params::<Vec<i64>>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }

    #[test]
    fn version_check() {
        let missing: Call = serde_json::from_str(r#"{"id":1,"method":"m"}"#).unwrap();
        let wrong: Call = serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"method":"m"}"#).unwrap();
        assert!(missing.has_valid_version());
        assert!(!wrong.has_valid_version());
    }

    #[test]
    fn error_display() {
        let err = RpcError::invalid_params("number1 is not a number").with_data("number1 == \"abc\"");
        assert_eq!(err.to_string(), "jsonrpc: number1 is not a number (-32602)");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(RpcError::parse_error("x").kind(), ErrorKind::ParseError);
        assert_eq!(RpcError::new(-32000, "x").kind(), ErrorKind::ServerError(-32000));
        assert_eq!(RpcError::new(42, "x").kind(), ErrorKind::Application(42));
        assert!(RpcError::method_not_found("x").is_reserved());
        assert!(!RpcError::new(42, "x").is_reserved());
    }

    #[test]
    fn response_wire_shape() {
        let mut resp = Response::new(Id::from("1"));
        resp.set_result(6);
        resp.finish();
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"jsonrpc": "2.0", "id": "1", "result": 6})
        );

        let resp = Response::error(Id::Null, RpcError::parse_error("bad"));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "bad"}})
        );
    }

    #[test]
    fn finish_keeps_exactly_one() {
        let mut empty = Response::new(Id::from(1));
        empty.finish();
        assert_eq!(empty.result, Some(Value::Null));
        assert!(empty.error.is_none());

        let mut both = Response::new(Id::from(1));
        both.set_result("ok");
        both.set_error(RpcError::internal("boom"));
        both.finish();
        assert!(both.result.is_none());
        assert_eq!(both.code(), Some(codes::INTERNAL_ERROR));
    }
}
