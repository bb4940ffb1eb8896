//! Connections for grouplink: a server that admits many clients and fans
//! messages out to them, and a client that talks to one server.
//!
//! Both roles implement [`Connection`]: a validity state machine
//! (`Invalid -> Pending -> Valid`), state subscriptions, an invalidation
//! handler, a payload [`AllowList`](grouplink_message::AllowList) and a weakly
//! held [`MessageObserver`]. Nothing blocks on the transport; each link runs
//! its own reader and writer threads and sends report through completions.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use grouplink_connection::{
//!     Admission, AdmissionPolicy, ClientConnection, Connection, EndpointConfig, ServerConnection,
//! };
//! use grouplink_message::{Message, ProcessIdentity};
//!
//! let server = ServerConnection::new(EndpointConfig::new("group.example", 0));
//! let policy: Arc<dyn AdmissionPolicy> = Arc::new(|_: &ProcessIdentity| Admission::Accept);
//! server.set_admission_policy(&policy);
//! server.start();
//!
//! let client = ClientConnection::new(EndpointConfig::new("group.example", 0));
//! client.start();
//! client.send_message(&Message::new("ping"), |result| {
//!     if let Err(err) = result {
//!         eprintln!("ping failed: {err}");
//!     }
//! });
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod observer;
pub mod server;

mod link;
mod sync;

#[cfg(test)]
mod testutil;

pub use client::ClientConnection;
pub use config::{EndpointConfig, DEFAULT_NAMESPACE, NAMESPACE_ENV};
pub use connection::{Connection, ConnectionCore};
pub use error::{BroadcastFailure, MessagingError, Result};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeRequest, HandshakeResponse,
    PROTOCOL_NAME, PROTOCOL_VERSION,
};
pub use lifecycle::ConnectionState;
pub use link::Completion;
pub use observer::{Admission, AdmissionPolicy, MessageObserver};
pub use server::ServerConnection;
