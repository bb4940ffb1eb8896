//! Local IPC messaging for a group of cooperating processes.
//!
//! One process runs a [`ServerConnection`](connection::ServerConnection) and
//! admits the others as they connect with a
//! [`ClientConnection`](connection::ClientConnection). Either side sends named
//! [`Message`](message::Message)s whose payload kinds are limited by an
//! allow-list; the server can address one peer or broadcast to all of them.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain sockets addressed by namespace and connection id
//! - [`frame`]: length-prefixed frames tagged with a frame kind
//! - [`message`]: identities, messages, values, allow-lists and the envelope codec
//! - [`connection`]: lifecycle, handshake and admission, server and client

/// Re-export transport types.
pub mod transport {
    pub use grouplink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use grouplink_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use grouplink_message::*;
}

/// Re-export connection types.
pub mod connection {
    pub use grouplink_connection::*;
}
