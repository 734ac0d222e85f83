//! # walletconnect-relay
//!
//! A minimal WalletConnect v2 style relay with a pairing and session client.
//!
//! ## Features
//! - Topic based publish/subscribe relay over websockets, framed as JSON-RPC
//! - AES-256-GCM envelopes keyed per session
//! - Pairing URIs, session settle/delete and `personal_sign` requests
//! - EIP-191 signature verification by address recovery
//!
//! ## Example
//!
//! ```no_run
//! use walletconnect_relay::config::{ManagerConfig, RelayConfig};
//! use walletconnect_relay::{SessionManager, relay, relay::RelayServer};
//!
//! # async fn run() -> walletconnect_relay::Result<()> {
//! let server = RelayServer::spawn(RelayConfig::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! tokio::spawn(async move {
//!     let _ = axum::serve(listener, relay::router(server)).await;
//! });
//!
//! let manager = SessionManager::new(ManagerConfig::default());
//! let (session, uri) = manager.create_session();
//! manager.connect_to_relay(&session.id).await?;
//!
//! // show `uri` to the wallet, then once it settles:
//! let details = manager.sign_message(&session.id, "hello").await?;
//! println!("{uri} signed by {}", details.recovered_address);
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//! MIT OR Apache-2.0

pub mod api;
pub mod config;
pub mod connection;
pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod relay;
pub mod rpc_types;
pub mod session;
pub mod subscription;
pub mod utils;
pub mod wc_message;

/// Exposed for easy access
pub use connection::Connection;
pub use error::{Error, Result};
pub use manager::SessionManager;
pub use relay::RelayServer;
pub use session::{Session, SessionStatus};
