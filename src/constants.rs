pub const JSONRPC_VERSION: &str = "2.0";

pub const URI_SCHEME: &str = "wc";
pub const URI_VERSION: u32 = 2;
pub const RELAY_PROTOCOL: &str = "irn";

pub const TOPIC_BYTES: usize = 32;
pub const SYM_KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const SIGNATURE_LENGTH: usize = 65;

pub const RELAY_PATH: &str = "/relay";
pub const NOTIFICATION_METHOD: &str = "message";

// Relay liveness
pub const PING_INTERVAL_SECS: u64 = 30;
pub const PONG_TIMEOUT_SECS: u64 = 60;
pub const WRITE_TIMEOUT_SECS: u64 = 10;
pub const PUBLISH_TIMEOUT_SECS: u64 = 5;
pub const MESSAGE_QUEUE_CAPACITY: usize = 100;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
pub const MAX_TTL_SECS: u64 = 2_592_000; // THIRTY_DAYS

// Session manager
pub const DIAL_TIMEOUT_SECS: u64 = 10;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
pub const SIGN_TIMEOUT_SECS: u64 = 120;
pub const SIGN_REQUEST_TTL: u64 = 300; // FIVE_MINUTES
pub const SESSION_TTL_SECS: u64 = 86400; // ONE_DAY
pub const CLEANUP_INTERVAL_SECS: u64 = 3600; // ONE_HOUR

pub const DEFAULT_CHAIN_ID: &str = "eip155:1";
