use clap::{Args, Subcommand};
use std::path::PathBuf;

use grouplink_connection::{EndpointConfig, DEFAULT_NAMESPACE, NAMESPACE_ENV};
use grouplink_message::{AllowList, ProcessIdentity};
use grouplink_transport::RUNTIME_DIR_ENV;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server and print the messages peers send.
    Listen(ListenArgs),
    /// Connect as a client and send a single message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Where the server lives and who this process claims to be.
#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// Group namespace shared by server and clients.
    #[arg(long, env = NAMESPACE_ENV, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
    /// Endpoint number within the namespace.
    #[arg(long, default_value = "0")]
    pub connection_id: u8,
    /// Base directory for namespace sockets.
    #[arg(long, env = RUNTIME_DIR_ENV, value_name = "DIR")]
    pub runtime_dir: Option<PathBuf>,
    /// Process name announced to peers (pid is always this process's).
    #[arg(long, value_name = "NAME")]
    pub identity: Option<String>,
    /// Additional custom value kinds to accept and send (comma-separated).
    #[arg(long, value_name = "KIND", value_delimiter = ',')]
    pub allow_custom: Vec<String>,
}

impl EndpointArgs {
    pub fn config(&self) -> EndpointConfig {
        let mut config = EndpointConfig::new(self.namespace.clone(), self.connection_id);
        if let Some(dir) = &self.runtime_dir {
            config = config.with_runtime_dir(dir.clone());
        }
        if let Some(name) = &self.identity {
            config = config.with_local_identity(ProcessIdentity::new(
                name.clone(),
                std::process::id(),
            ));
        }
        config
    }

    pub fn allow_list(&self) -> AllowList {
        self.allow_custom
            .iter()
            .fold(AllowList::standard(), |list, kind| list.with_custom(kind.clone()))
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Refuse peers announcing these process names (comma-separated).
    #[arg(long, value_name = "NAME", value_delimiter = ',')]
    pub reject: Vec<String>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Message name.
    #[arg(long)]
    pub name: String,
    /// Payload entry as `key=value` or `key:kind=value`; kinds are
    /// str, int, float, bool, bytes (hex) and json (needs --json-kind).
    #[arg(long = "field", short = 'f', value_name = "KEY[:KIND]=VALUE")]
    pub fields: Vec<String>,
    /// Custom kind name used for `json` fields.
    #[arg(long, value_name = "KIND")]
    pub json_kind: Option<String>,
    /// Maximum time to wait for admission and delivery (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
