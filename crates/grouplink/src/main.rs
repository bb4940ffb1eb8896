mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "grouplink", version, about = "Group IPC messaging CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "grouplink",
            "send",
            "--name",
            "add-name",
            "--field",
            "name=Ada",
            "--field",
            "age:int=36",
            "--namespace",
            "group.example",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.name, "add-name");
        assert_eq!(args.fields.len(), 2);
        assert_eq!(args.endpoint.namespace, "group.example");
    }

    #[test]
    fn send_requires_a_name() {
        let err = Cli::try_parse_from(["grouplink", "send", "--field", "a=b"])
            .expect_err("missing --name should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_listen_with_rejections() {
        let cli = Cli::try_parse_from([
            "grouplink",
            "listen",
            "--count",
            "2",
            "--reject",
            "intruder,mallory",
            "--connection-id",
            "7",
        ])
        .expect("listen args should parse");

        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.count, Some(2));
        assert_eq!(args.reject, vec!["intruder", "mallory"]);
        assert_eq!(args.endpoint.connection_id, 7);
    }

    #[test]
    fn rejects_out_of_range_connection_id() {
        let err = Cli::try_parse_from(["grouplink", "listen", "--connection-id", "256"])
            .expect_err("connection id is a u8");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
