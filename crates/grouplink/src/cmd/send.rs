use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use grouplink_connection::{ClientConnection, Connection, ConnectionState, MessagingError};
use grouplink_message::{CustomValue, Message, Value};
use tracing::{debug, info};

use crate::cmd::SendArgs;
use crate::exit::{messaging_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let message = build_message(&args)?;

    let client = ClientConnection::new(args.endpoint.config());
    client.set_allow_list(args.endpoint.allow_list());

    let states = client.subscribe();
    client.start();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match states.recv_timeout(remaining) {
            Ok(ConnectionState::Valid) => break,
            Ok(ConnectionState::Invalid) => {
                let err = client
                    .last_error()
                    .map(|err| messaging_error("connect failed", &err))
                    .unwrap_or_else(|| CliError::new(crate::exit::FAILURE, "connect failed"));
                return Err(err);
            }
            Ok(ConnectionState::Pending) => continue,
            Err(RecvTimeoutError::Timeout) => {
                client.invalidate();
                return Err(messaging_error(
                    "connect failed",
                    &MessagingError::Timeout(timeout),
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(
                    crate::exit::INTERNAL,
                    "state subscription closed",
                ));
            }
        }
    }

    if let Some(server) = client.server_identity() {
        debug!(server = %server, "admitted");
    }

    let (done_tx, done_rx) = mpsc::channel();
    client.send_message(&message, move |result| {
        let _ = done_tx.send(result);
    });

    let remaining = deadline.saturating_duration_since(Instant::now());
    let outcome = done_rx
        .recv_timeout(remaining)
        .map_err(|_| MessagingError::Timeout(timeout))
        .and_then(|result| result);
    client.invalidate();

    outcome.map_err(|err| messaging_error("send failed", &err))?;
    info!(name = %message.name, fields = message.payload.len(), "message sent");
    Ok(SUCCESS)
}

fn build_message(args: &SendArgs) -> CliResult<Message> {
    if args.name.is_empty() {
        return Err(CliError::new(USAGE, "--name must not be empty"));
    }

    let mut message = Message::new(args.name.clone());
    for field in &args.fields {
        let (key, value) = parse_field(field, args.json_kind.as_deref())?;
        if message.payload.insert(key.clone(), value).is_some() {
            return Err(CliError::new(USAGE, format!("duplicate field '{key}'")));
        }
    }
    Ok(message)
}

/// Parse `key=value` or `key:kind=value`.
fn parse_field(input: &str, json_kind: Option<&str>) -> CliResult<(String, Value)> {
    let (lhs, raw) = input
        .split_once('=')
        .ok_or_else(|| CliError::new(USAGE, format!("field '{input}' is missing '='")))?;

    let (key, kind) = match lhs.rsplit_once(':') {
        Some((key, kind)) if is_field_kind(kind) => (key, kind),
        _ => (lhs, "str"),
    };
    if key.is_empty() {
        return Err(CliError::new(USAGE, format!("field '{input}' has an empty key")));
    }

    let invalid = |what: &str| CliError::new(USAGE, format!("field '{key}': {what}"));
    let value = match kind {
        "str" => Value::String(raw.to_string()),
        "int" => Value::Integer(raw.parse().map_err(|_| invalid("not an integer"))?),
        "float" => Value::Float(raw.parse().map_err(|_| invalid("not a float"))?),
        "bool" => Value::Bool(raw.parse().map_err(|_| invalid("not true or false"))?),
        "bytes" => Value::Bytes(parse_hex(raw).ok_or_else(|| invalid("not hex"))?.into()),
        "json" => {
            let kind = json_kind.ok_or_else(|| invalid("json fields need --json-kind"))?;
            let body: serde_json::Value =
                serde_json::from_str(raw).map_err(|err| invalid(&err.to_string()))?;
            Value::Custom(
                CustomValue::from_serde(kind, &body).map_err(|err| invalid(&err.to_string()))?,
            )
        }
        _ => return Err(invalid("unknown kind")),
    };
    Ok((key.to_string(), value))
}

fn is_field_kind(kind: &str) -> bool {
    matches!(kind, "str" | "int" | "float" | "bool" | "bytes" | "json")
}

fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let input = input.strip_prefix("0x").unwrap_or(input);
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(input.get(i..i + 2)?, 16).ok())
        .collect()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
