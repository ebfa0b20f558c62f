//! Whole-session acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A single-pass replay feeds every record exactly once, then retires
//!   its device and kills the daemon
//! - Client commands reach the daemon and every response is reported
//! - The threaded worker produces the same session

use super::common::{serial, FakeInstall, CAPTURE};
use gpsfake_nmea::capture::LogDigester;
use gpsfake_nmea::framer::LineFramer;
use gpsfake_session::{single_pass, DeviceFeed, MemoryTransport, SessionScheduler};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn replay_feed(transport: &MemoryTransport) -> DeviceFeed {
    let capture = LogDigester::new()
        .digest("acceptance", &mut LineFramer::new(CAPTURE.as_bytes()))
        .unwrap();
    DeviceFeed::replay(capture, Duration::ZERO, Box::new(transport.clone()))
}

/// Accept one client, wait for its command batch, answer with two
/// responses and hang up. Returns the batch.
fn fake_client_port() -> (u16, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut batch = String::new();
        reader.read_line(&mut batch).unwrap();
        let mut stream = stream;
        stream
            .write_all(b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\r\n{\"class\":\"DEVICES\"}\r\n")
            .unwrap();
        batch
    });
    (port, server)
}

#[test]
fn test_single_pass_replay() {
    let _guard = serial();
    let install = FakeInstall::healthy();
    let config = install.config();

    let mut scheduler = SessionScheduler::spawn(&config).unwrap();
    let handle = scheduler.handle();
    handle.set_predicate(single_pass());

    let transport = MemoryTransport::new("/dev/pts/acceptance");
    assert_eq!(handle.add_device(replay_feed(&transport)).unwrap(), "/dev/pts/acceptance");

    let summary = scheduler.run().unwrap();
    assert!(!summary.stopped);
    assert_eq!(summary.records_fed, 3);
    assert_eq!(summary.devices_retired, 1);
    assert_eq!(handle.writers(), 0);

    let writes = transport.writes();
    let writes = writes.lock();
    assert_eq!(writes.len(), 3);
    assert!(writes[0].starts_with(b"$GPRMC,073123.000"));
    assert!(writes[2].starts_with(b"$GPRMC,073125.000"));
    assert!(transport.was_drained());

    // The daemon was killed on the way out.
    assert!(!install.path().join(format!("gpsfake_pid-{}", std::process::id())).exists());
}

#[test]
fn test_client_responses_reported() {
    let _guard = serial();
    let install = FakeInstall::healthy();
    let config = install.config();
    let (port, server) = fake_client_port();

    let mut scheduler = SessionScheduler::spawn(&config).unwrap();
    let responses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&responses);
    scheduler.set_reporter(move |id: u32, response: &str| {
        sink.lock().unwrap().push((id, response.to_string()));
    });

    let handle = scheduler.handle();
    handle.set_predicate(single_pass());
    let transport = MemoryTransport::new("/dev/pts/client");
    handle.add_device(replay_feed(&transport)).unwrap();
    let id = handle
        .add_client("127.0.0.1", port, Some("?WATCH={\"enable\":true};\n"))
        .unwrap();
    assert_eq!(id, 1);

    let summary = scheduler.run().unwrap();
    assert_eq!(server.join().unwrap(), "?WATCH={\"enable\":true};\n");
    assert_eq!(summary.responses, 2);

    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].0, 1);
    assert!(responses[0].1.contains("VERSION"));
    assert_eq!(responses[1].1, "{\"class\":\"DEVICES\"}");
}

#[test]
fn test_threaded_session() {
    let _guard = serial();
    let install = FakeInstall::healthy();
    let config = install.config();

    let scheduler = SessionScheduler::spawn(&config).unwrap();
    let handle = scheduler.handle();
    handle.set_predicate(single_pass());
    let transport = MemoryTransport::new("/dev/pts/threaded");
    handle.add_device(replay_feed(&transport)).unwrap();

    let worker = scheduler.start().unwrap();
    let summary = worker.join().unwrap();
    assert_eq!(summary.records_fed, 3);
    assert_eq!(summary.devices_retired, 1);
    assert_eq!(transport.writes().lock().len(), 3);
}
