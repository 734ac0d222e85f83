use std::{fmt::Display, str::FromStr};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{JSONRPC_VERSION, SIGN_REQUEST_TTL};

/// Session-level JSON-RPC message as it travels, encrypted, inside a relay
/// envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WcMethod {
    #[serde(rename = "wc_sessionSettle")]
    SessionSettle,

    #[serde(rename = "wc_sessionRequest")]
    SessionRequest,

    #[serde(rename = "wc_sessionDelete")]
    SessionDelete,
}

impl Display for WcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_plain::to_string(self) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl FromStr for WcMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s)
            .map_err(|_| crate::Error::InternalError(format!("unknown method {s}")))
    }
}

/// Wallet approval of a pairing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub peer_id: String,
    pub public_key: String,
    pub accounts: Vec<Address>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub chain_id: String,
    pub request: RequestPayload,
}

impl SessionRequestParams {
    pub fn personal_sign(chain_id: &str, message: &str, address: Address) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            request: RequestPayload {
                method: "personal_sign".to_string(),
                params: vec![
                    Value::String(message.to_string()),
                    Value::String(address.to_string()),
                ],
            },
        }
    }

    /// The message of a `personal_sign` request.
    pub fn message(&self) -> Option<&str> {
        self.request.params.first().and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDeleteParams {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WcData {
    SessionSettle(SessionSettleParams),
    SessionRequest(SessionRequestParams),
    SessionDelete(SessionDeleteParams),

    Result(Value),
    Error { code: i64, message: String },
}

impl WcData {
    pub fn method(&self) -> Option<WcMethod> {
        match self {
            Self::SessionSettle(_) => Some(WcMethod::SessionSettle),
            Self::SessionRequest(_) => Some(WcMethod::SessionRequest),
            Self::SessionDelete(_) => Some(WcMethod::SessionDelete),
            Self::Result(_) | Self::Error { .. } => None,
        }
    }

    pub fn is_response(&self) -> bool {
        self.method().is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WcMessage {
    pub id: u64,
    pub data: WcData,
}

impl Display for WcMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl WcMessage {
    pub fn new(id: u64, data: WcData) -> Self {
        Self { id, data }
    }

    pub fn method(&self) -> Option<WcMethod> {
        self.data.method()
    }

    pub fn create_response(&self, data: WcData) -> WcMessage {
        WcMessage { id: self.id, data }
    }

    pub fn ttl(&self) -> u64 {
        match &self.data {
            WcData::SessionDelete(_) => 86400,
            _ => SIGN_REQUEST_TTL,
        }
    }

    pub fn into_raw(&self) -> crate::Result<Message> {
        let mut raw = Message {
            id: self.id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: self.method().map(|m| m.to_string()),
            params: None,
            result: None,
            error: None,
        };
        match &self.data {
            WcData::SessionSettle(p) => raw.params = Some(serde_json::to_value(p)?),
            WcData::SessionRequest(p) => raw.params = Some(serde_json::to_value(p)?),
            WcData::SessionDelete(p) => raw.params = Some(serde_json::to_value(p)?),
            WcData::Result(v) => raw.result = Some(v.clone()),
            WcData::Error { code, message } => {
                raw.error = Some(MessageError {
                    code: *code,
                    message: message.clone(),
                })
            }
        }
        Ok(raw)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.into_raw()?)?)
    }
}

impl FromStr for WcMessage {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        WcMessage::try_from(serde_json::from_str::<Message>(s)?)
    }
}

impl TryFrom<Message> for WcMessage {
    type Error = crate::Error;

    fn try_from(msg: Message) -> std::result::Result<Self, Self::Error> {
        let method = msg.method.as_deref().map(WcMethod::from_str).transpose()?;

        let data = match method {
            Some(method) => {
                let params = msg.params.ok_or_else(|| {
                    crate::Error::InternalError(format!("{method} without params"))
                })?;
                match method {
                    WcMethod::SessionSettle => {
                        WcData::SessionSettle(serde_json::from_value(params)?)
                    }
                    WcMethod::SessionRequest => {
                        WcData::SessionRequest(serde_json::from_value(params)?)
                    }
                    WcMethod::SessionDelete => {
                        WcData::SessionDelete(serde_json::from_value(params)?)
                    }
                }
            }
            None => match (msg.error, msg.result) {
                (Some(error), _) => WcData::Error {
                    code: error.code,
                    message: error.message,
                },
                (None, Some(result)) => WcData::Result(result),
                (None, None) => {
                    return Err(crate::Error::InternalError(format!(
                        "message {} has neither method nor result",
                        msg.id
                    )));
                }
            },
        };

        Ok(WcMessage { id: msg.id, data })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_session_settle() {
        let json = r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionSettle","params":{"peerId":"wallet-1","publicKey":"04ab","accounts":["0x0000000000000000000000000000000000000123"]}}"#;
        let message = WcMessage::from_str(json).unwrap();

        assert_eq!(message.method(), Some(WcMethod::SessionSettle));
        let WcData::SessionSettle(params) = &message.data else {
            panic!("expected settle, got {message}");
        };
        assert_eq!(params.peer_id, "wallet-1");
        assert_eq!(
            params.accounts,
            vec![
                "0x0000000000000000000000000000000000000123"
                    .parse::<Address>()
                    .unwrap()
            ]
        );
    }

    #[test]
    fn test_personal_sign_request_shape() {
        let address: Address =
            "0x0000000000000000000000000000000000000123".parse().unwrap();
        let message = WcMessage::new(
            42,
            WcData::SessionRequest(SessionRequestParams::personal_sign(
                "eip155:1", "hello", address,
            )),
        );

        let value: Value =
            serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 42,
                "jsonrpc": "2.0",
                "method": "wc_sessionRequest",
                "params": {
                    "chainId": "eip155:1",
                    "request": {
                        "method": "personal_sign",
                        "params": ["hello", address.to_string()]
                    }
                }
            })
        );
        assert_eq!(message.ttl(), 300);
    }

    #[test]
    fn test_responses() {
        let ok = WcMessage::from_str(r#"{"id":42,"jsonrpc":"2.0","result":"0xabcd"}"#)
            .unwrap();
        assert_eq!(ok.data, WcData::Result(json!("0xabcd")));
        assert!(ok.data.is_response());

        let err = WcMessage::from_str(
            r#"{"id":42,"jsonrpc":"2.0","error":{"code":5000,"message":"User rejected."}}"#,
        )
        .unwrap();
        assert_eq!(
            err.data,
            WcData::Error {
                code: 5000,
                message: "User rejected.".to_string()
            }
        );

        // a response built from a request keeps the id
        let response = err.create_response(WcData::Result(Value::Bool(true)));
        assert_eq!(response.id, 42);
    }

    #[test]
    fn test_session_delete_round_trip() {
        let message = WcMessage::new(
            7,
            WcData::SessionDelete(SessionDeleteParams {
                code: 6000,
                message: "User disconnected.".to_string(),
            }),
        );
        let decoded = WcMessage::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.ttl(), 86400);
    }

    #[test]
    fn test_invalid_messages() {
        assert!(WcMessage::from_str(r#"{"id":1,"jsonrpc":"2.0"}"#).is_err());
        assert!(
            WcMessage::from_str(
                r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionPing","params":{}}"#
            )
            .is_err()
        );
        assert!(
            WcMessage::from_str(
                r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionSettle"}"#
            )
            .is_err()
        );
    }
}
