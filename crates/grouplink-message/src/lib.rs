//! Messages, process identities and the envelope codec.
//!
//! A [`Message`] is a name plus a map of [`Value`]s. Values form a closed set
//! of kinds; which kinds a connection accepts is decided by its
//! [`AllowList`], checked independently when encoding and when decoding.
//! Each encoded message travels in an envelope that also names the sending
//! [`ProcessIdentity`].

pub mod allow_list;
pub mod codec;
pub mod error;
pub mod identity;
pub mod message;
pub mod value;

pub use allow_list::AllowList;
pub use codec::{decode_envelope, decode_identity, encode_envelope, encode_identity, Envelope};
pub use error::{CodecError, Result};
pub use identity::ProcessIdentity;
pub use message::Message;
pub use value::{CustomValue, Value, ValueKind};
