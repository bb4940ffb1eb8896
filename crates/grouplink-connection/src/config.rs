use std::path::PathBuf;

use grouplink_frame::FrameConfig;
use grouplink_message::ProcessIdentity;
use grouplink_transport::{resolve_runtime_dir, socket_path};

use crate::error::Result;
use crate::handshake::HandshakeConfig;

/// Environment variable naming the default namespace.
pub const NAMESPACE_ENV: &str = "GROUPLINK_NAMESPACE";

/// Namespace used when neither caller nor environment provides one.
pub const DEFAULT_NAMESPACE: &str = "grouplink";

/// Where an endpoint lives and how it behaves on the wire.
///
/// A server and its clients meet at the socket for
/// `(namespace, connection_id)` under `runtime_dir`.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Shared-group identifier; one directory per namespace.
    pub namespace: String,
    /// Distinguishes several endpoints within one namespace.
    pub connection_id: u8,
    /// Base directory for namespace directories.
    pub runtime_dir: PathBuf,
    /// Identity this endpoint stamps on outgoing messages and handshakes.
    pub local_identity: ProcessIdentity,
    /// Handshake protocol, version and limits.
    pub handshake: HandshakeConfig,
    /// Frame limits after the handshake.
    pub frame: FrameConfig,
}

impl EndpointConfig {
    pub fn new(namespace: impl Into<String>, connection_id: u8) -> Self {
        Self {
            namespace: namespace.into(),
            connection_id,
            runtime_dir: resolve_runtime_dir(),
            local_identity: ProcessIdentity::current(),
            handshake: HandshakeConfig::default(),
            frame: FrameConfig::default(),
        }
    }

    /// Namespace from `GROUPLINK_NAMESPACE` (default `grouplink`), runtime
    /// directory from `GROUPLINK_RUNTIME_DIR` / `XDG_RUNTIME_DIR`.
    pub fn from_env(connection_id: u8) -> Self {
        let namespace = std::env::var(NAMESPACE_ENV)
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Self::new(namespace, connection_id)
    }

    pub fn with_runtime_dir(mut self, runtime_dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = runtime_dir.into();
        self
    }

    pub fn with_local_identity(mut self, identity: ProcessIdentity) -> Self {
        self.local_identity = identity;
        self
    }

    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake = config;
        self
    }

    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame = config;
        self
    }

    /// Socket path this endpoint binds or connects to.
    pub fn socket_path(&self) -> Result<PathBuf> {
        Ok(socket_path(
            &self.runtime_dir,
            &self.namespace,
            self.connection_id,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_layout() {
        let config = EndpointConfig::new("group.example", 3).with_runtime_dir("/run/user/1000");
        assert_eq!(
            config.socket_path().unwrap(),
            PathBuf::from("/run/user/1000/group.example/3.sock")
        );
    }

    #[test]
    fn invalid_namespace_surfaces_as_transport_error() {
        let config = EndpointConfig::new("../escape", 0).with_runtime_dir("/tmp");
        assert!(matches!(
            config.socket_path(),
            Err(crate::MessagingError::Transport(_))
        ));
    }

    // The only test in this crate that touches GROUPLINK_NAMESPACE.
    #[test]
    fn namespace_from_environment() {
        std::env::set_var(NAMESPACE_ENV, "env.group");
        assert_eq!(EndpointConfig::from_env(2).namespace, "env.group");

        std::env::set_var(NAMESPACE_ENV, "");
        assert_eq!(EndpointConfig::from_env(2).namespace, DEFAULT_NAMESPACE);

        std::env::remove_var(NAMESPACE_ENV);
        let config = EndpointConfig::from_env(9);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.connection_id, 9);
    }

    #[test]
    fn builders_replace_wire_settings() {
        let frame = FrameConfig::handshake(512, std::time::Duration::from_secs(1));
        let handshake = HandshakeConfig {
            protocol_name: "other".to_string(),
            ..HandshakeConfig::default()
        };
        let config = EndpointConfig::new("ns", 1)
            .with_frame_config(frame)
            .with_handshake_config(handshake);

        assert_eq!(config.frame.max_payload_size, 512);
        assert_eq!(config.handshake.protocol_name, "other");
    }

    #[test]
    fn defaults_describe_this_process() {
        let config = EndpointConfig::new("ns", 0);
        assert_eq!(config.local_identity.pid(), std::process::id());
        assert_eq!(config.handshake.protocol_name, "grouplink");
        assert_eq!(config.frame.max_payload_size, grouplink_frame::DEFAULT_MAX_PAYLOAD);
    }
}
