//! Binary envelope codec.
//!
//! Layout (integers little-endian):
//!
//! ```text
//! 0x01 IDENTITY  0x10 u32 len name   0x11 i64 pid
//! 0x02 NAME      u32 len name
//! 0x03 PAYLOAD   u32 count
//!                count × ( u32 len key   kind-tag   value )
//!
//! value by kind tag:
//!   0x10 string   u32 len utf8
//!   0x11 integer  i64
//!   0x12 float    f64 bits
//!   0x13 bool     u8 (0 | 1)
//!   0x14 bytes    u32 len raw
//!   0x15 custom   u32 len kind-name   u32 len raw
//! ```
//!
//! Decoding never allocates on the strength of a length field alone: every
//! length is checked against the bytes actually remaining first.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::allow_list::AllowList;
use crate::error::{CodecError, Result};
use crate::identity::{ProcessIdentity, MAX_PROCESS_NAME_LEN};
use crate::message::Message;
use crate::value::{CustomValue, Value, ValueKind};

const TAG_IDENTITY: u8 = 0x01;
const TAG_NAME: u8 = 0x02;
const TAG_PAYLOAD: u8 = 0x03;

/// Maximum message name length in bytes.
pub const MAX_NAME_LEN: usize = 1024;
/// Maximum payload key length in bytes.
pub const MAX_KEY_LEN: usize = 1024;
/// Maximum custom kind name length in bytes.
pub const MAX_CUSTOM_KIND_LEN: usize = 128;
/// Maximum number of payload entries.
pub const MAX_ENTRIES: usize = 4096;

/// A decoded message together with the identity its sender stamped on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: ProcessIdentity,
    pub message: Message,
}

/// Encode `message` from `sender`, refusing anything `allow_list` does not permit.
pub fn encode_envelope(
    sender: &ProcessIdentity,
    message: &Message,
    allow_list: &AllowList,
) -> Result<Bytes> {
    validate_message(message, allow_list)?;

    let mut dst = BytesMut::with_capacity(64 + message.name.len());
    encode_identity(sender, &mut dst)?;

    dst.put_u8(TAG_NAME);
    put_str(&mut dst, &message.name);

    dst.put_u8(TAG_PAYLOAD);
    dst.put_u32_le(message.payload.len() as u32);
    for (key, value) in &message.payload {
        put_str(&mut dst, key);
        put_value(&mut dst, value);
    }

    Ok(dst.freeze())
}

/// Decode an envelope, refusing any value kind `allow_list` does not permit.
pub fn decode_envelope(src: &[u8], allow_list: &AllowList) -> Result<Envelope> {
    let mut input = Input::new(src);

    let sender = read_identity(&mut input)?;

    input.expect_tag(TAG_NAME, "message name")?;
    let name = input.read_str("message name", MAX_NAME_LEN)?;
    if name.is_empty() {
        return Err(CodecError::EmptyName);
    }

    input.expect_tag(TAG_PAYLOAD, "payload")?;
    let count = input.read_u32()? as usize;
    if count > MAX_ENTRIES {
        return Err(CodecError::TooManyEntries {
            count,
            max: MAX_ENTRIES,
        });
    }

    let mut payload = BTreeMap::new();
    for _ in 0..count {
        let key = input.read_str("payload key", MAX_KEY_LEN)?;
        let value = read_value(&mut input, &key, allow_list)?;
        if payload.contains_key(&key) {
            return Err(CodecError::DuplicateKey(key));
        }
        payload.insert(key, value);
    }

    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.remaining()));
    }

    Ok(Envelope {
        sender,
        message: Message { name, payload },
    })
}

/// Append the tagged form of `identity` to `dst`.
///
/// Identities use only string and integer fields, whatever allow-list the
/// surrounding message is subject to.
pub fn encode_identity(identity: &ProcessIdentity, dst: &mut BytesMut) -> Result<()> {
    identity.validate()?;
    dst.put_u8(TAG_IDENTITY);
    dst.put_u8(ValueKind::String.tag());
    put_str(dst, identity.name());
    dst.put_u8(ValueKind::Integer.tag());
    dst.put_i64_le(i64::from(identity.pid()));
    Ok(())
}

/// Decode a standalone identity produced by [`encode_identity`].
pub fn decode_identity(src: &[u8]) -> Result<ProcessIdentity> {
    let mut input = Input::new(src);
    let identity = read_identity(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.remaining()));
    }
    Ok(identity)
}

fn validate_message(message: &Message, allow_list: &AllowList) -> Result<()> {
    if message.name.is_empty() {
        return Err(CodecError::EmptyName);
    }
    check_len("message name", message.name.len(), MAX_NAME_LEN)?;
    if message.payload.len() > MAX_ENTRIES {
        return Err(CodecError::TooManyEntries {
            count: message.payload.len(),
            max: MAX_ENTRIES,
        });
    }
    for (key, value) in &message.payload {
        check_len("payload key", key.len(), MAX_KEY_LEN)?;
        if let Value::Custom(custom) = value {
            check_len("custom kind", custom.kind().len(), MAX_CUSTOM_KIND_LEN)?;
        }
        allow_list.check(key, value)?;
        check_len("value", value_len(value), u32::MAX as usize)?;
    }
    Ok(())
}

fn check_len(what: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(CodecError::TooLong { what, len, max });
    }
    Ok(())
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::Custom(c) => c.data().len(),
        Value::Integer(_) | Value::Float(_) | Value::Bool(_) => 8,
    }
}

fn put_str(dst: &mut BytesMut, s: &str) {
    put_blob(dst, s.as_bytes());
}

fn put_blob(dst: &mut BytesMut, bytes: &[u8]) {
    dst.put_u32_le(bytes.len() as u32);
    dst.put_slice(bytes);
}

fn put_value(dst: &mut BytesMut, value: &Value) {
    dst.put_u8(value.kind().tag());
    match value {
        Value::String(s) => put_str(dst, s),
        Value::Integer(n) => dst.put_i64_le(*n),
        Value::Float(n) => dst.put_u64_le(n.to_bits()),
        Value::Bool(b) => dst.put_u8(u8::from(*b)),
        Value::Bytes(b) => put_blob(dst, b),
        Value::Custom(custom) => {
            put_str(dst, custom.kind());
            put_blob(dst, custom.data());
        }
    }
}

fn read_identity(input: &mut Input<'_>) -> Result<ProcessIdentity> {
    input.expect_tag(TAG_IDENTITY, "identity")?;

    input.expect_tag(ValueKind::String.tag(), "identity name (string)")?;
    let name = input.read_str("process name", MAX_PROCESS_NAME_LEN)?;

    input.expect_tag(ValueKind::Integer.tag(), "identity pid (integer)")?;
    let raw_pid = input.read_i64()?;
    let pid = u32::try_from(raw_pid)
        .map_err(|_| CodecError::InvalidIdentity(format!("pid {raw_pid} out of range")))?;

    let identity = ProcessIdentity::new(name, pid);
    identity.validate()?;
    Ok(identity)
}

fn read_value(input: &mut Input<'_>, key: &str, allow_list: &AllowList) -> Result<Value> {
    let tag = input.read_u8()?;
    let kind = ValueKind::from_tag(tag).ok_or(CodecError::UnknownValueKind(tag))?;

    let disallowed = |kind: String| CodecError::DisallowedKind {
        key: key.to_string(),
        kind,
    };

    if kind != ValueKind::Custom && !allow_list.permits_builtin(kind) {
        return Err(disallowed(kind.as_str().to_string()));
    }

    let value = match kind {
        ValueKind::Custom => {
            let custom_kind = input.read_str("custom kind", MAX_CUSTOM_KIND_LEN)?;
            if !allow_list.permits_custom(&custom_kind) {
                return Err(disallowed(format!("custom:{custom_kind}")));
            }
            let data = input.read_blob()?;
            Value::Custom(CustomValue::new(custom_kind, Bytes::copy_from_slice(data)))
        }
        ValueKind::String => Value::String(input.read_str("string value", usize::MAX)?),
        ValueKind::Integer => Value::Integer(input.read_i64()?),
        ValueKind::Float => Value::Float(f64::from_bits(input.read_u64()?)),
        ValueKind::Bool => match input.read_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(CodecError::InvalidBool(other)),
        },
        ValueKind::Bytes => Value::Bytes(Bytes::copy_from_slice(input.read_blob()?)),
    };
    Ok(value)
}

/// Bounds-checked cursor over untrusted input.
struct Input<'a> {
    buf: &'a [u8],
}

impl<'a> Input<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    fn expect_tag(&mut self, expected_tag: u8, expected: &'static str) -> Result<()> {
        let tag = self.read_u8()?;
        if tag != expected_tag {
            return Err(CodecError::UnexpectedTag { tag, expected });
        }
        Ok(())
    }

    fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    fn read_str(&mut self, what: &'static str, max: usize) -> Result<String> {
        let len = self.read_u32()? as usize;
        check_len(what, len, max)?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8(what))
    }
}
