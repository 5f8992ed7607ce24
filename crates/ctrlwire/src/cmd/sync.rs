use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ctrlwire_client::{Client, ClientConfig, InboundMessage, StateChange};
use ctrlwire_frame::{MessageType, SyncRequest};
use ctrlwire_transport::Endpoint;
use tracing::{info, warn};

use crate::cmd::{parse_duration, SyncArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT, TRANSPORT_ERROR};
use crate::output::{print_frame, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const PRINTED_TYPES: [MessageType; 5] = [
    MessageType::ConnectRequest,
    MessageType::SyncRequest,
    MessageType::SyncBusRequest,
    MessageType::SyncPointRequest,
    MessageType::SyncRouteResponse,
];

#[derive(Debug)]
enum SyncEvent {
    Connected,
    GaveUp(u32),
    Frame(InboundMessage),
}

pub fn run(args: SyncArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    let mut config = ClientConfig::new(Endpoint::new(args.host.clone(), args.port));
    config.connect_timeout = Some(parse_duration(&args.connect_timeout)?);
    if let Some(max_retries) = args.max_retries {
        config.backoff.max_retries = Some(max_retries);
    }

    let (tx, events) = mpsc::channel();
    let mut builder = Client::builder(config);
    for message_type in PRINTED_TYPES {
        let tx = tx.clone();
        builder = builder.on_message(message_type, move |msg| {
            let _ = tx.send(SyncEvent::Frame(msg.clone()));
        });
    }
    let client = builder
        .on_state_change(move |change| match change {
            StateChange::Connected { .. } => {
                let _ = tx.send(SyncEvent::Connected);
            }
            StateChange::GaveUp { attempts } => {
                let _ = tx.send(SyncEvent::GaveUp(*attempts));
            }
            _ => {}
        })
        .build()
        .map_err(|err| client_error("client start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let endpoint = client.endpoint().to_string();
    let deadline = Instant::now() + duration;
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }

        match events.recv_timeout(left.min(POLL_INTERVAL)) {
            Ok(SyncEvent::Connected) => request_sync(&client, args.since),
            Ok(SyncEvent::Frame(msg)) => {
                print_frame(&msg, &endpoint, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    client.shutdown();
                    return Ok(SUCCESS);
                }
            }
            Ok(SyncEvent::GaveUp(attempts)) => {
                return Err(CliError::new(
                    TRANSPORT_ERROR,
                    format!("gave up on {endpoint} after {attempts} reconnect attempts"),
                ));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    client.shutdown();
    finish(running.load(Ordering::SeqCst), args.count, printed)
}

/// Sent on every (re)connect so a dropped stream does not lose the sync.
fn request_sync(client: &Client, since: Option<i64>) {
    let request = match since {
        Some(last_sync_time) => SyncRequest { last_sync_time },
        None => SyncRequest::now(),
    };
    let last_sync_time = request.last_sync_time;
    match client.send(request) {
        Ok(sequence) => info!(sequence, last_sync_time, "sync requested"),
        // The next Connected event retries.
        Err(err) => warn!(error = %err, "sync request failed"),
    }
}

fn finish(still_running: bool, count: Option<usize>, printed: usize) -> CliResult<i32> {
    match count {
        Some(count) if still_running && printed < count => Err(CliError::new(
            TIMEOUT,
            format!("received {printed} of {count} frames before the deadline"),
        )),
        _ => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
