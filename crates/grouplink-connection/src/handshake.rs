use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use grouplink_frame::{kind_name, FrameConfig, FrameError, FrameReader, FrameWriter, CONTROL};
use grouplink_message::ProcessIdentity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MessagingError, Result};

/// Protocol name announced by both sides.
pub const PROTOCOL_NAME: &str = "grouplink";
/// Local protocol version.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_REASON_LEN: usize = 1024;

/// Client handshake request sent as a CONTROL frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `grouplink` by default.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// Identity the client announces for itself.
    pub identity: ProcessIdentity,
}

/// Server handshake response sent as a CONTROL frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol name. Must match request protocol.
    pub protocol: String,
    /// Server protocol version.
    pub version: String,
    /// Whether the admission policy let the client in.
    pub accepted: bool,
    /// Why the client was turned away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Identity of the server process.
    pub identity: ProcessIdentity,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for each blocking handshake operation.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl HandshakeConfig {
    /// Frame limits to apply while the peer is still unauthenticated.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig::handshake(self.max_handshake_payload, self.timeout)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: grouplink_frame::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        }
    }
}

/// Announce `local` to the server and wait for its admission decision.
///
/// Returns the server's identity when admitted. A refusal surfaces as
/// [`MessagingError::AdmissionRejected`] carrying the server's reason.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local: &ProcessIdentity,
    config: &HandshakeConfig,
) -> Result<ProcessIdentity> {
    check_protocol(&config.protocol_name, &config.protocol_version)?;
    validate_identity(local)?;

    send_control(
        writer,
        &HandshakeRequest {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            identity: local.clone(),
        },
    )?;

    let resp: HandshakeResponse = recv_control(reader, config)?;
    check_protocol(&resp.protocol, &resp.version)?;
    ensure_compatible(config, &resp.protocol, &config.protocol_version, &resp.version)?;

    if !resp.accepted {
        let reason = resp
            .reason
            .unwrap_or_else(|| "rejected by server".to_string());
        return Err(MessagingError::AdmissionRejected(reason));
    }

    validate_identity(&resp.identity)?;
    Ok(resp.identity)
}

/// Read the client's announce, let `admit` decide, and answer.
///
/// `admit` runs only for a well-formed request of a compatible protocol
/// version. Returning `Err(reason)` sends a negative response and yields
/// [`MessagingError::AdmissionRejected`]; protocol violations close without
/// a response.
pub fn handshake_server<R, W, F>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local: &ProcessIdentity,
    config: &HandshakeConfig,
    admit: F,
) -> Result<ProcessIdentity>
where
    R: Read,
    W: Write,
    F: FnOnce(&ProcessIdentity) -> std::result::Result<(), String>,
{
    check_protocol(&config.protocol_name, &config.protocol_version)?;

    let req: HandshakeRequest = recv_control(reader, config)?;
    check_protocol(&req.protocol, &req.version)?;
    validate_identity(&req.identity)?;
    ensure_compatible(config, &req.protocol, &req.version, &config.protocol_version)?;

    let reason = admit(&req.identity).err().map(|mut reason| {
        truncate_reason(&mut reason);
        reason
    });
    send_control(
        writer,
        &HandshakeResponse {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            accepted: reason.is_none(),
            reason: reason.clone(),
            identity: local.clone(),
        },
    )?;

    match reason {
        None => Ok(req.identity),
        Some(reason) => Err(MessagingError::AdmissionRejected(reason)),
    }
}

fn send_control<T: Serialize, W: Write>(writer: &mut FrameWriter<W>, value: &T) -> Result<()> {
    writer.send(CONTROL, &serde_json::to_vec(value)?)?;
    Ok(())
}

/// Wait for one CONTROL frame and parse it, giving up at `config.timeout`.
fn recv_control<T: DeserializeOwned, R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<T> {
    let deadline = Instant::now() + config.timeout;
    let frame = loop {
        if Instant::now() >= deadline {
            return Err(MessagingError::Timeout(config.timeout));
        }
        match reader.read_frame() {
            Ok(frame) => break frame,
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(FrameError::ConnectionClosed) => {
                return Err(MessagingError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        }
    };

    if frame.kind != CONTROL {
        return Err(MessagingError::HandshakeFailed(format!(
            "got {} frame before handshake completed",
            kind_name(frame.kind)
        )));
    }
    if frame.payload.len() > config.max_handshake_payload {
        return Err(MessagingError::HandshakeFailed(format!(
            "handshake payload of {} bytes exceeds {}",
            frame.payload.len(),
            config.max_handshake_payload
        )));
    }
    Ok(serde_json::from_slice(&frame.payload)?)
}

/// Same protocol name; same major version; client minor at least the server's.
fn ensure_compatible(
    config: &HandshakeConfig,
    protocol: &str,
    client_version: &str,
    server_version: &str,
) -> Result<()> {
    if protocol != config.protocol_name {
        return Err(MessagingError::HandshakeFailed(format!(
            "peer speaks '{protocol}', not '{}'",
            config.protocol_name
        )));
    }
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;
    if client_major != server_major || client_minor < server_minor {
        return Err(MessagingError::HandshakeFailed(format!(
            "client version {client_version} cannot talk to server version {server_version}"
        )));
    }
    Ok(())
}

fn truncate_reason(reason: &mut String) {
    if reason.len() <= MAX_REASON_LEN {
        return;
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.truncate(end);
}

fn validate_identity(identity: &ProcessIdentity) -> Result<()> {
    identity
        .validate()
        .map_err(|err| MessagingError::HandshakeFailed(format!("invalid identity: {err}")))
}

/// Reject protocol names and versions that are empty, oversized or malformed.
fn check_protocol(protocol: &str, version: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(MessagingError::HandshakeFailed(format!(
            "protocol name must be 1..={MAX_PROTOCOL_LEN} bytes, got {}",
            protocol.len()
        )));
    }
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(MessagingError::HandshakeFailed(format!(
            "protocol version must be 1..={MAX_VERSION_LEN} bytes, got {}",
            version.len()
        )));
    }
    parse_version(version).map(|_| ())
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |what: &str| {
        MessagingError::HandshakeFailed(format!("invalid version '{version}': {what}"))
    };

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;

    Ok((major, minor))
}
