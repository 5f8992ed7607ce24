use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ctrlwire_client::InboundMessage;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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
struct FrameOutput<'a> {
    tag: i32,
    message_type: &'a str,
    sequence: u64,
    compressed: bool,
    payload_size: usize,
    payload_hex: String,
    endpoint: &'a str,
    timestamp: String,
}

pub fn print_frame(msg: &InboundMessage, endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                tag: msg.tag,
                message_type: type_name(msg),
                sequence: msg.sequence,
                compressed: msg.compressed,
                payload_size: msg.payload.len(),
                payload_hex: hex(msg.payload.as_ref()),
                endpoint,
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
                .set_header(vec!["TYPE", "SEQ", "SIZE", "ENDPOINT", "PAYLOAD"])
                .add_row(vec![
                    type_name(msg).to_string(),
                    msg.sequence.to_string(),
                    msg.payload.len().to_string(),
                    endpoint.to_string(),
                    hex(msg.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} ({}) seq={} size={} compressed={} endpoint={} payload={}",
                msg.tag,
                type_name(msg),
                msg.sequence,
                msg.payload.len(),
                msg.compressed,
                endpoint,
                hex(msg.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(msg.payload.as_ref());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn type_name(msg: &InboundMessage) -> &'static str {
    msg.message_type().map_or("UNKNOWN", |t| t.name())
}

fn hex(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len() * 2);
    for byte in payload {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
