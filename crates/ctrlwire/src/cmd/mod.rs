use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod sync;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect, request a sync and print inbound frames.
    Sync(SyncArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Sync(args) => sync::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Controller host name or address.
    pub host: String,
    /// Controller TCP port.
    pub port: u16,
    /// Request changes since this Unix time (seconds). Default: now.
    #[arg(long, value_name = "EPOCH", allow_negative_numbers = true)]
    pub since: Option<i64>,
    /// How long to keep printing frames (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub duration: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Limit for a single connect attempt.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Reconnect attempts before giving up.
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `150ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
