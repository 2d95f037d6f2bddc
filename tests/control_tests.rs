//! # Control Channel Tests
//!
//! Three adinnet servers pause the capture client and resume it again;
//! under loose synchronization the client unblocks once every server has
//! sent at least one resume.

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use adinnet_protocol::{Command, Connection};
use lvcsr::audio::segmenter::ControlFlow;
use lvcsr::output::adinnet::AdinnetSink;
use lvcsr::output::control::SyncMode;
use lvcsr::audio::segmenter::SegmentHandler;
use lvcsr::output::SegmentSink;

#[test]
fn loose_sync_resumes_after_one_resume_from_each_server() {
    let mut endpoints = Vec::new();
    let mut listeners = Vec::new();
    for _ in 0..3 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        endpoints.push(("127.0.0.1".to_string(), listener.local_addr().unwrap().port()));
        listeners.push(listener);
    }

    let servers: Vec<_> = listeners
        .into_iter()
        .enumerate()
        .map(|(i, listener)| {
            thread::spawn(move || {
                let (stream, _) = listener.accept().unwrap();
                let mut conn = Connection::new(stream).unwrap();
                if i == 0 {
                    // one server pauses the client after the segment
                    conn.send_command(Command::Pause).unwrap();
                }
                // servers resume at slightly different times
                thread::sleep(Duration::from_millis(30 * (i as u64 + 1)));
                conn.send_command(Command::Resume).unwrap();
                // keep the socket open until the client is done
                thread::sleep(Duration::from_millis(500));
            })
        })
        .collect();

    let mut sink = AdinnetSink::new(endpoints, SyncMode::Loose);
    sink.open_session().unwrap();

    // drain the pause command
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match sink.poll_control() {
            ControlFlow::StopAfterSegment => break,
            ControlFlow::Continue => {
                assert!(std::time::Instant::now() < deadline, "pause never arrived");
                thread::sleep(Duration::from_millis(5));
            }
            other => panic!("unexpected control flow {:?}", other),
        }
    }
    assert!(sink.pause_pending());

    // blocks until all three servers sent their resume
    let flow = sink.wait_resume();
    assert_eq!(flow, ControlFlow::Continue);
    assert!(!sink.pause_pending());

    sink.close_session().unwrap();
    for s in servers {
        s.join().unwrap();
    }
}
