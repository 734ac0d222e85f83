use std::fmt::{self, Display};

use crate::rpc_types::JsonRpcError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    // URI
    InvalidUri,
    PathEndNotFound,
    SymKeyNotMentioned,
    RelayProtocolNotMentioned,
    ParseInt(std::num::ParseIntError),

    // Crypto
    InvalidKey(String),
    Decryption,
    Encryption,
    MalformedSignature(usize),
    SignatureMismatch {
        expected: alloy::primitives::Address,
        recovered: alloy::primitives::Address,
    },
    SignatureError(alloy::primitives::SignatureError),
    SignerError(alloy::signers::Error),
    FromHexError(alloy::hex::FromHexError),

    // Session state
    SessionNotFound(String),
    SessionNotActive(String),
    WalletRejected { code: i64, message: String },

    // Relay and transport
    JsonRpc(JsonRpcError),
    WebSocket(tokio_tungstenite::tungstenite::Error),
    ConnectionClosed,
    Timeout(&'static str),

    InvalidConfig(String),
    InternalError(String),
    SerdeJsonError(serde_json::Error),
    FromUtf8Error(std::string::FromUtf8Error),
    TimeError(time::error::Format),
    Io(std::io::Error),
}

impl Error {
    /// Whether the failure came from the relay transport rather than the
    /// caller's input or session state.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_)
                | Error::ConnectionClosed
                | Error::JsonRpc(_)
                | Error::Io(_)
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUri => write!(f, "invalid pairing uri"),
            Error::PathEndNotFound => write!(f, "pairing uri has no query"),
            Error::SymKeyNotMentioned => {
                write!(f, "pairing uri does not carry symKey")
            }
            Error::RelayProtocolNotMentioned => {
                write!(f, "pairing uri does not carry relay-protocol")
            }
            Error::ParseInt(e) => write!(f, "{e}"),
            Error::InvalidKey(reason) => {
                write!(f, "invalid symmetric key: {reason}")
            }
            Error::Decryption => write!(f, "failed to decrypt payload"),
            Error::Encryption => write!(f, "failed to encrypt payload"),
            Error::MalformedSignature(len) => {
                write!(f, "malformed signature: expected 65 bytes, got {len}")
            }
            Error::SignatureMismatch {
                expected,
                recovered,
            } => write!(
                f,
                "signature recovered {recovered}, expected {expected}"
            ),
            Error::SignatureError(e) => write!(f, "{e}"),
            Error::SignerError(e) => write!(f, "{e}"),
            Error::FromHexError(e) => write!(f, "{e}"),
            Error::SessionNotFound(id) => write!(f, "session {id} not found"),
            Error::SessionNotActive(id) => {
                write!(f, "session {id} is not active")
            }
            Error::WalletRejected { code, message } => {
                write!(f, "wallet rejected request ({code}): {message}")
            }
            Error::JsonRpc(e) => {
                write!(f, "relay error ({}): {}", e.code, e.message)
            }
            Error::WebSocket(e) => write!(f, "websocket: {e}"),
            Error::ConnectionClosed => write!(f, "relay connection closed"),
            Error::Timeout(what) => write!(f, "timed out waiting for {what}"),
            Error::InvalidConfig(reason) => {
                write!(f, "invalid configuration: {reason}")
            }
            Error::InternalError(msg) => write!(f, "{msg}"),
            Error::SerdeJsonError(e) => write!(f, "{e}"),
            Error::FromUtf8Error(e) => write!(f, "{e}"),
            Error::TimeError(e) => write!(f, "{e}"),
            Error::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::InternalError(e)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::ParseInt(e)
    }
}

impl From<JsonRpcError> for Error {
    fn from(e: JsonRpcError) -> Self {
        Error::JsonRpc(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerdeJsonError(e)
    }
}

impl From<alloy::hex::FromHexError> for Error {
    fn from(e: alloy::hex::FromHexError) -> Self {
        Error::FromHexError(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::FromUtf8Error(e)
    }
}

impl From<alloy::primitives::SignatureError> for Error {
    fn from(e: alloy::primitives::SignatureError) -> Self {
        Error::SignatureError(e)
    }
}

impl From<alloy::signers::Error> for Error {
    fn from(e: alloy::signers::Error) -> Self {
        Error::SignerError(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<time::error::Format> for Error {
    fn from(e: time::error::Format) -> Self {
        Error::TimeError(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
