use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use grouplink_message::{Message, ProcessIdentity, Value};
use serde::Serialize;
use serde_json::{json, Map};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    name: &'a str,
    sender: &'a ProcessIdentity,
    payload: Map<String, serde_json::Value>,
    timestamp: String,
}

/// One line (or table) per received message.
pub fn print_message(message: &Message, sender: &ProcessIdentity, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                name: &message.name,
                sender,
                payload: message
                    .payload
                    .iter()
                    .map(|(key, value)| (key.clone(), value_json(value)))
                    .collect(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MESSAGE", "SENDER", "KEY", "KIND", "VALUE"]);
            if message.payload.is_empty() {
                table.add_row(vec![
                    message.name.clone(),
                    sender.to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]);
            }
            for (key, value) in &message.payload {
                table.add_row(vec![
                    message.name.clone(),
                    sender.to_string(),
                    key.clone(),
                    value.kind_label(),
                    value_preview(value),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let fields: Vec<String> = message
                .payload
                .iter()
                .map(|(key, value)| format!("{key}={}", value_preview(value)))
                .collect();
            println!(
                "message={} sender={} fields=[{}]",
                message.name,
                sender,
                fields.join(", ")
            );
        }
    }
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => json!(s),
        Value::Integer(n) => json!(n),
        Value::Float(n) => json!(n),
        Value::Bool(b) => json!(b),
        Value::Bytes(bytes) => json!({ "bytes": hex(bytes) }),
        Value::Custom(custom) => {
            let data = serde_json::from_slice::<serde_json::Value>(custom.data())
                .unwrap_or_else(|_| json!({ "bytes": hex(custom.data()) }));
            json!({ "kind": custom.kind(), "data": data })
        }
    }
}

fn value_preview(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Bytes(bytes) => format!("0x{}", hex(bytes)),
        Value::Custom(custom) => match std::str::from_utf8(custom.data()) {
            Ok(text) => text.to_string(),
            Err(_) => format!("<binary {} bytes>", custom.data().len()),
        },
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
