//! End-to-end client behavior against an in-process fake controller.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use ctrlwire_client::{
    BackoffConfig, Client, ClientBuilder, ClientConfig, ClientError, ConnectionState,
    InboundMessage, LifecycleSignal, StateChange,
};
use ctrlwire_frame::{encode_frame, MessageType, OutboundMessage, SyncRequest, WrapperMessage};
use ctrlwire_transport::Endpoint;

const WAIT: Duration = Duration::from_secs(5);

fn controller() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut config = ClientConfig::new(Endpoint::new("127.0.0.1", port));
    config.connect_timeout = Some(Duration::from_millis(500));
    config.backoff = BackoffConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        multiplier: 2,
        max_retries: Some(5),
    };
    (listener, config)
}

fn frame(tag: i32, payload: &'static [u8], sequence: u64) -> BytesMut {
    let wrapper = WrapperMessage {
        tag,
        payload: Bytes::from_static(payload),
        compressed: false,
        sequence,
    };
    let mut buf = BytesMut::new();
    encode_frame(&wrapper, &mut buf).unwrap();
    buf
}

fn route_frame(payload: &'static [u8], sequence: u64) -> BytesMut {
    frame(MessageType::SyncRouteResponse.tag(), payload, sequence)
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream
}

/// Sends filler messages until one fails. The controller side never reads,
/// so the socket buffers eventually fill up.
fn send_until_error(client: &Client) -> ClientError {
    let filler = OutboundMessage::Raw {
        tag: MessageType::SyncRequest.tag(),
        payload: Bytes::from(vec![0u8; 200]),
    };
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        assert!(Instant::now() < deadline, "send never failed");
        if let Err(err) = client.send(filler.clone()) {
            return err;
        }
    }
}

/// Waits for a matching state change, skipping others.
fn expect_change(
    rx: &mpsc::Receiver<StateChange>,
    mut matches: impl FnMut(&StateChange) -> bool,
) -> StateChange {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let change = rx.recv_timeout(left).expect("state change not observed");
        if matches(&change) {
            return change;
        }
    }
}

#[test]
fn inbound_frames_reach_registered_handler() {
    let (listener, config) = controller();
    let (tx, rx) = mpsc::channel::<InboundMessage>();
    let client = ClientBuilder::new(config)
        .on_message(MessageType::SyncRouteResponse, move |msg| {
            let _ = tx.send(msg.clone());
        })
        .build()
        .unwrap();

    let mut server = accept(&listener);
    server.write_all(&route_frame(b"\x0a\x02ok", 7)).unwrap();

    let msg = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(msg.message_type(), Some(MessageType::SyncRouteResponse));
    assert_eq!(msg.payload.as_ref(), b"\x0a\x02ok");
    assert_eq!(msg.sequence, 7);
    assert!(client.is_connected());
}

#[test]
fn unknown_tag_is_dropped_without_disconnecting() {
    let (listener, config) = controller();
    let (tx, rx) = mpsc::channel::<u64>();
    let (changes_tx, changes) = mpsc::channel();
    let _client = ClientBuilder::new(config)
        .on_message(MessageType::SyncRouteResponse, move |msg| {
            let _ = tx.send(msg.sequence);
        })
        .on_state_change(move |change| {
            let _ = changes_tx.send(*change);
        })
        .build()
        .unwrap();

    let mut server = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));

    let mut wire = frame(99, b"\x01", 1);
    wire.extend_from_slice(&route_frame(b"", 2));
    server.write_all(&wire).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
    assert!(changes.try_recv().is_err());
}

#[test]
fn frame_split_across_reads_is_reassembled() {
    let (listener, config) = controller();
    let (tx, rx) = mpsc::channel::<Bytes>();
    let _client = ClientBuilder::new(config)
        .on_message(MessageType::SyncRouteResponse, move |msg| {
            let _ = tx.send(msg.payload.clone());
        })
        .build()
        .unwrap();

    let mut server = accept(&listener);
    server.set_nodelay(true).unwrap();
    for byte in route_frame(b"split-payload", 3).iter() {
        server.write_all(&[*byte]).unwrap();
        server.flush().unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(rx.recv_timeout(WAIT).unwrap().as_ref(), b"split-payload");
}

#[test]
fn reconnects_after_controller_drops_connection() {
    let (listener, config) = controller();
    let (tx, changes) = mpsc::channel();
    let client = ClientBuilder::new(config)
        .on_state_change(move |change| {
            let _ = tx.send(*change);
        })
        .build()
        .unwrap();

    let first = accept(&listener);
    let StateChange::Connected { connection: first_id } =
        expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }))
    else {
        unreachable!()
    };
    drop(first);

    let reconnecting =
        expect_change(&changes, |c| matches!(c, StateChange::Reconnecting { .. }));
    assert_eq!(
        reconnecting,
        StateChange::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(20)
        }
    );

    let _second = accept(&listener);
    let StateChange::Connected { connection: second_id } =
        expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }))
    else {
        unreachable!()
    };
    assert_ne!(first_id, second_id);
    assert!(wait_for(|| client.is_connected()));
}

#[test]
fn malformed_frame_triggers_reconnect() {
    let (listener, config) = controller();
    let (tx, changes) = mpsc::channel();
    let _client = ClientBuilder::new(config)
        .on_state_change(move |change| {
            let _ = tx.send(*change);
        })
        .build()
        .unwrap();

    let mut server = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));

    // Body is an unterminated varint key.
    server.write_all(&[0x03, 0xff, 0xff, 0xff]).unwrap();

    expect_change(&changes, |c| matches!(c, StateChange::Reconnecting { .. }));
    let mut buf = [0u8; 1];
    server.set_read_timeout(Some(WAIT)).unwrap();
    assert_eq!(server.read(&mut buf).unwrap(), 0);

    let _second = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));
}

#[test]
fn suspend_holds_off_reconnects_until_resume() {
    let (listener, config) = controller();
    let client = Client::connect(config).unwrap();
    let mut server = accept(&listener);
    assert!(wait_for(|| client.is_connected()));

    client.handle_lifecycle(LifecycleSignal::EnteredBackground);
    assert!(wait_for(|| client.state() == ConnectionState::Disconnected));
    server.set_read_timeout(Some(WAIT)).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(server.read(&mut buf).unwrap(), 0);

    listener.set_nonblocking(true).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(listener.accept().is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let err = client.send(SyncRequest::now()).unwrap_err();
    assert!(err.is_not_connected());

    listener.set_nonblocking(false).unwrap();
    client.handle_lifecycle(LifecycleSignal::BecameActive);
    let _second = accept(&listener);
    assert!(wait_for(|| client.is_connected()));
}

#[test]
fn gives_up_after_retry_budget() {
    let (listener, mut config) = controller();
    drop(listener);
    config.backoff.max_retries = Some(2);

    let (tx, changes) = mpsc::channel();
    let client = ClientBuilder::new(config)
        .on_state_change(move |change| {
            let _ = tx.send(*change);
        })
        .build()
        .unwrap();

    let gave_up = expect_change(&changes, |c| matches!(c, StateChange::GaveUp { .. }));
    assert_eq!(gave_up, StateChange::GaveUp { attempts: 2 });
    assert!(wait_for(|| client.state() == ConnectionState::Disconnected));
}

#[test]
fn send_without_connection_fails_and_leaves_state_alone() {
    let (_listener, mut config) = controller();
    config.connect_on_start = false;
    let client = Client::connect(config).unwrap();

    let err = client.send(SyncRequest { last_sync_time: 5 }).unwrap_err();
    assert!(err.is_not_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn shutdown_reports_terminated() {
    let (listener, config) = controller();
    let (tx, changes) = mpsc::channel();
    let client = ClientBuilder::new(config)
        .on_state_change(move |change| {
            let _ = tx.send(*change);
        })
        .build()
        .unwrap();
    let _server = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));

    client.shutdown();
    expect_change(&changes, |c| *c == StateChange::Terminated);
}

#[test]
fn failed_write_triggers_reconnect() {
    let (listener, mut config) = controller();
    config.write_timeout = Some(Duration::from_millis(200));
    let (tx, changes) = mpsc::channel();
    let client = ClientBuilder::new(config)
        .on_state_change(move |change| {
            let _ = tx.send(*change);
        })
        .build()
        .unwrap();

    let _stalled = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));

    let err = send_until_error(&client);
    assert!(!err.is_not_connected(), "unexpected error: {err}");

    expect_change(&changes, |c| matches!(c, StateChange::Reconnecting { .. }));
    let _second = accept(&listener);
    expect_change(&changes, |c| matches!(c, StateChange::Connected { .. }));
    assert!(wait_for(|| client.is_connected()));
    client.send(SyncRequest::now()).unwrap();
}

#[test]
fn suspend_does_not_wait_for_blocked_send() {
    let (listener, mut config) = controller();
    config.write_timeout = Some(Duration::from_secs(10));
    let client = Arc::new(Client::connect(config).unwrap());
    let _stalled = accept(&listener);
    assert!(wait_for(|| client.is_connected()));

    let sender = {
        let client = Arc::clone(&client);
        thread::spawn(move || send_until_error(&client))
    };
    // Long enough for the sender to block on a full buffer.
    thread::sleep(Duration::from_millis(1500));

    let started = Instant::now();
    client.suspend();
    assert!(started.elapsed() < Duration::from_secs(1));

    let _err = sender.join().unwrap();
    assert!(wait_for(|| client.state() == ConnectionState::Disconnected));
    let err = client.send(SyncRequest::now()).unwrap_err();
    assert!(err.is_not_connected());

    // A suspended client stays down even though the send failed mid-write.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
