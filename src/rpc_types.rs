/// Relay RPC types
///
/// JSON-RPC 2.0 frames spoken between relay clients and the relay server.
/// Requests carry an integer id and one of three methods; responses echo the
/// id with either a result or an error; notifications carry no id and are
/// pushed by the relay to subscribers.
///
use std::fmt::Display;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{JSONRPC_VERSION, MAX_TTL_SECS, NOTIFICATION_METHOD};

/// Protocol-level error codes. Clients branch on these values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidParams,
    MethodNotFound,
    SubscriptionFailure,
    UnsubscriptionFailure,
    PublishFailure,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::SubscriptionFailure => -32000,
            ErrorCode::UnsubscriptionFailure => -32001,
            ErrorCode::PublishFailure => -32002,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::SubscriptionFailure => "Subscription error",
            ErrorCode::UnsubscriptionFailure => "Unsubscription error",
            ErrorCode::PublishFailure => "Publish error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RelayMethod {
    #[serde(rename = "subscribe")]
    Subscribe,

    #[serde(rename = "publish")]
    Publish,

    #[serde(rename = "unsubscribe")]
    Unsubscribe,
}

impl Display for RelayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_plain::to_string(self) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl FromStr for RelayMethod {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_plain::from_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub topic: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishParams {
    pub topic: String,
    pub message: String,
    pub ttl: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub topic: String,
}

/// A decoded relay request, one variant per method.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayRequest {
    Subscribe(SubscribeParams),
    Publish(PublishParams),
    Unsubscribe(UnsubscribeParams),
}

impl RelayRequest {
    pub fn method(&self) -> RelayMethod {
        match self {
            RelayRequest::Subscribe(_) => RelayMethod::Subscribe,
            RelayRequest::Publish(_) => RelayMethod::Publish,
            RelayRequest::Unsubscribe(_) => RelayMethod::Unsubscribe,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            RelayRequest::Subscribe(p) => &p.topic,
            RelayRequest::Publish(p) => &p.topic,
            RelayRequest::Unsubscribe(p) => &p.topic,
        }
    }

    fn params(&self) -> serde_json::Result<Value> {
        match self {
            RelayRequest::Subscribe(p) => serde_json::to_value(p),
            RelayRequest::Publish(p) => serde_json::to_value(p),
            RelayRequest::Unsubscribe(p) => serde_json::to_value(p),
        }
    }

    /// Decodes `params` into the shape `method` expects.
    fn decode(
        method: &RelayMethod,
        params: Value,
    ) -> serde_json::Result<Self> {
        Ok(match method {
            RelayMethod::Subscribe => {
                RelayRequest::Subscribe(serde_json::from_value(params)?)
            }
            RelayMethod::Publish => {
                RelayRequest::Publish(serde_json::from_value(params)?)
            }
            RelayMethod::Unsubscribe => {
                RelayRequest::Unsubscribe(serde_json::from_value(params)?)
            }
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest<ParamType = Value> {
    pub id: u64,
    pub jsonrpc: String,
    pub method: RelayMethod,
    pub params: ParamType,
}

impl JsonRpcRequest {
    pub fn new(id: u64, request: &RelayRequest) -> serde_json::Result<Self> {
        Ok(Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: request.method(),
            params: request.params()?,
        })
    }
}

/// Loosest shape a frame must have before method dispatch.
#[derive(Deserialize)]
struct RawRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Parses one inbound relay frame. On failure the returned response is the
/// error frame to send back.
pub fn parse_request(
    text: &str,
) -> Result<(u64, RelayRequest), JsonRpcResponse> {
    let raw = serde_json::from_str::<RawRequest>(text)
        .map_err(|_| JsonRpcResponse::error(0, ErrorCode::ParseError))?;

    let method = RelayMethod::from_str(&raw.method).map_err(|_| {
        JsonRpcResponse::error(raw.id, ErrorCode::MethodNotFound)
    })?;

    let request = RelayRequest::decode(&method, raw.params).map_err(|_| {
        JsonRpcResponse::error(raw.id, ErrorCode::InvalidParams)
    })?;

    if request.topic().is_empty() {
        return Err(JsonRpcResponse::error_with_message(
            raw.id,
            ErrorCode::InvalidParams,
            "topic must not be empty",
        ));
    }
    if let RelayRequest::Publish(params) = &request {
        if params.ttl > MAX_TTL_SECS {
            return Err(JsonRpcResponse::error_with_message(
                raw.id,
                ErrorCode::InvalidParams,
                format!("ttl must not exceed {MAX_TTL_SECS} seconds"),
            ));
        }
    }

    Ok((raw.id, request))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse<ResultType = Value> {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: ErrorCode) -> Self {
        Self::error_with_message(id, code, code.message())
    }

    pub fn error_with_message(
        id: u64,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code: code.code(),
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    pub fn decode_result<T: DeserializeOwned>(self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.into_result()?)?)
    }
}

/// A JSON-RPC error object (code, message, and optional data).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationParams {
    pub topic: String,
    pub message: String,
}

/// Relay → subscriber push. Has no id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: NotificationParams,
}

impl Notification {
    pub fn new(topic: &str, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: NOTIFICATION_METHOD.to_string(),
            params: NotificationParams {
                topic: topic.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Anything a relay client can receive.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerFrame {
    Response(JsonRpcResponse),
    Notification(Notification),
}

pub fn parse_server_frame(text: &str) -> crate::Result<ServerFrame> {
    let value = serde_json::from_str::<Value>(text)?;
    let is_notification = value
        .get("method")
        .and_then(Value::as_str)
        .is_some_and(|m| m == NOTIFICATION_METHOD);

    if is_notification {
        Ok(ServerFrame::Notification(serde_json::from_value(value)?))
    } else if value.get("id").is_some() {
        Ok(ServerFrame::Response(serde_json::from_value(value)?))
    } else {
        Err(format!("unrecognised relay frame: {text}").into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let req = "{\"id\":7,\"jsonrpc\":\"2.0\",\"method\":\"subscribe\",\"params\":{\"topic\":\"abcd\"}}";
        let (id, request) = parse_request(req).unwrap();
        assert_eq!(id, 7);
        assert_eq!(
            request,
            RelayRequest::Subscribe(SubscribeParams {
                topic: "abcd".to_string()
            })
        );
    }

    #[test]
    fn test_parse_publish() {
        let req = "{\"id\":2,\"jsonrpc\":\"2.0\",\"method\":\"publish\",\"params\":{\"topic\":\"abcd\",\"message\":\"aGVsbG8=\",\"ttl\":300}}";
        let (_, request) = parse_request(req).unwrap();
        assert_eq!(
            request,
            RelayRequest::Publish(PublishParams {
                topic: "abcd".to_string(),
                message: "aGVsbG8=".to_string(),
                ttl: 300,
            })
        );
    }

    #[test]
    fn test_parse_error_is_addressed_to_id_zero() {
        let err = parse_request("{\"not\":\"json\"").unwrap_err();
        assert_eq!(err.id, 0);
        assert!(err.error.unwrap().is(ErrorCode::ParseError));

        // valid JSON but not a request frame
        let err = parse_request("{\"not\":\"json\"}").unwrap_err();
        assert_eq!(err.id, 0);
        assert!(err.error.unwrap().is(ErrorCode::ParseError));
    }

    #[test]
    fn test_unknown_method() {
        let req = "{\"id\":9,\"jsonrpc\":\"2.0\",\"method\":\"irn_fetchMessages\",\"params\":{}}";
        let err = parse_request(req).unwrap_err();
        assert_eq!(err.id, 9);
        let error = err.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
    }

    #[test]
    fn test_invalid_params() {
        let missing_ttl = "{\"id\":3,\"jsonrpc\":\"2.0\",\"method\":\"publish\",\"params\":{\"topic\":\"abcd\",\"message\":\"m\"}}";
        let err = parse_request(missing_ttl).unwrap_err();
        assert_eq!(err.id, 3);
        assert_eq!(err.error.unwrap().code, -32602);

        let wrong_type = "{\"id\":4,\"jsonrpc\":\"2.0\",\"method\":\"subscribe\",\"params\":{\"topic\":42}}";
        let err = parse_request(wrong_type).unwrap_err();
        assert_eq!(err.id, 4);
        assert!(err.error.unwrap().is(ErrorCode::InvalidParams));

        let empty_topic = "{\"id\":5,\"jsonrpc\":\"2.0\",\"method\":\"unsubscribe\",\"params\":{\"topic\":\"\"}}";
        let err = parse_request(empty_topic).unwrap_err();
        assert!(err.error.unwrap().is(ErrorCode::InvalidParams));
    }

    #[test]
    fn test_ttl_above_maximum_is_rejected() {
        let req = format!(
            "{{\"id\":6,\"jsonrpc\":\"2.0\",\"method\":\"publish\",\"params\":{{\"topic\":\"abcd\",\"message\":\"m\",\"ttl\":{}}}}}",
            u64::MAX
        );
        let err = parse_request(&req).unwrap_err();
        assert_eq!(err.id, 6);
        assert!(err.error.unwrap().is(ErrorCode::InvalidParams));

        let at_limit =
            req.replace(&u64::MAX.to_string(), &MAX_TTL_SECS.to_string());
        assert!(parse_request(&at_limit).is_ok());
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let codes = [
            ErrorCode::ParseError,
            ErrorCode::InvalidParams,
            ErrorCode::MethodNotFound,
            ErrorCode::SubscriptionFailure,
            ErrorCode::UnsubscriptionFailure,
            ErrorCode::PublishFailure,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_encode_request() {
        let request = JsonRpcRequest::new(
            1,
            &RelayRequest::Subscribe(SubscribeParams {
                topic: "abcd".to_string(),
            }),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "id": 1,
                "jsonrpc": "2.0",
                "method": "subscribe",
                "params": {"topic": "abcd"}
            })
        );
    }

    #[test]
    fn test_encode_responses() {
        let ok = JsonRpcResponse::success(5, Value::Bool(true));
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            "{\"id\":5,\"jsonrpc\":\"2.0\",\"result\":true}"
        );

        let err = JsonRpcResponse::error(5, ErrorCode::SubscriptionFailure);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "id": 5,
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Subscription error"}
            })
        );
    }

    #[test]
    fn test_encode_notification() {
        let notification = Notification::new("deadbeef", "hello");
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "method": "message",
                "params": {"topic": "deadbeef", "message": "hello"}
            })
        );
    }

    #[test]
    fn test_parse_server_frame() {
        let frame =
            parse_server_frame("{\"id\":5,\"jsonrpc\":\"2.0\",\"result\":true}")
                .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Response(JsonRpcResponse::success(
                5,
                Value::Bool(true)
            ))
        );

        let frame = parse_server_frame(
            "{\"jsonrpc\":\"2.0\",\"method\":\"message\",\"params\":{\"topic\":\"t\",\"message\":\"m\"}}",
        )
        .unwrap();
        assert_eq!(frame, ServerFrame::Notification(Notification::new("t", "m")));

        assert!(parse_server_frame("{\"jsonrpc\":\"2.0\"}").is_err());
    }

    #[test]
    fn test_method_display_round_trip() {
        assert_eq!(RelayMethod::Unsubscribe.to_string(), "unsubscribe");
        assert_eq!(
            RelayMethod::from_str("publish").unwrap(),
            RelayMethod::Publish
        );
        assert!(RelayMethod::from_str("message").is_err());
    }
}
