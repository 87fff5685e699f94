// Copyright © 2024 Nathaniel Hardesty
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the “Software”), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

//! Session scenarios over loopback TCP: selection from both sides, data
//! correlation, linktest, teardown, and misbehaving raw-socket peers.

use secs_hsms::generic::Client;
use secs_hsms::{ConnectionMode, Error, ParameterSettings};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn free_entity() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);
  format!("127.0.0.1:{port}")
}

fn settings(mode: ConnectionMode) -> ParameterSettings {
  ParameterSettings {
    connect_mode: mode,
    session_id: 1,
    t3: Duration::from_secs(2),
    t5: Duration::from_secs(2),
    t6: Duration::from_secs(2),
    t7: Duration::from_secs(2),
    t8: Duration::from_secs(2),
    ..ParameterSettings::default()
  }
}

/// Polls a condition for up to `limit`.
fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + limit;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(10));
  }
  false
}

/// Raw-peer helper: reads one whole frame, returning header and body.
fn read_frame(stream: &mut TcpStream) -> ([u8; 10], Vec<u8>) {
  let mut length_bytes = [0u8; 4];
  stream.read_exact(&mut length_bytes).unwrap();
  let length = u32::from_be_bytes(length_bytes) as usize;
  let mut payload = vec![0u8; length];
  stream.read_exact(&mut payload).unwrap();
  let header: [u8; 10] = payload[0..10].try_into().unwrap();
  (header, payload[10..].to_vec())
}

/// Raw-peer helper: writes one whole frame.
fn write_frame(stream: &mut TcpStream, header: [u8; 10], body: &[u8]) {
  let length = (10 + body.len()) as u32;
  stream.write_all(&length.to_be_bytes()).unwrap();
  stream.write_all(&header).unwrap();
  stream.write_all(body).unwrap();
}

/// Raw-peer helper: answers a Select.req header with Select.rsp carrying
/// the given status.
fn select_response(request_header: [u8; 10], status: u8) -> [u8; 10] {
  let mut header = request_header;
  header[2] = status;
  header[3] = 0;
  header[5] = 2; // SType Select.rsp
  header
}

#[test]
fn select_then_request_response_roundtrip() {
  let entity = free_entity();
  let passive = Client::new(settings(ConnectionMode::Passive));
  let active = Client::new(settings(ConnectionMode::Active));

  let passive_clone = passive.clone();
  let entity_clone = entity.clone();
  let passive_thread = thread::spawn(move || {
    passive_clone.connect(&entity_clone).unwrap();
    // Answer the first inbound primary with its secondary, echoing the
    // body and system bytes.
    let primary = passive_clone.receive_data(Some(Duration::from_secs(2))).unwrap();
    assert!(primary.w_bit);
    assert_eq!((primary.stream, primary.function), (1, 13));
    passive_clone
      .send_data(secs_core::DataMessage {
        stream: primary.stream,
        function: primary.function + 1,
        w_bit: false,
        system_bytes: primary.system_bytes,
        body: primary.body.clone(),
      })
      .unwrap();
  });

  thread::sleep(Duration::from_millis(100));
  active.connect(&entity).unwrap();
  assert!(active.is_selected());

  let body = vec![0x01, 0x03, 0xB1, 0x04, 0x00, 0x00, 0x00, 0x7B];
  let reply = active
    .request_data(1, 13, body.clone(), Some(Duration::from_secs(2)))
    .unwrap();
  assert_eq!(reply.stream, 1);
  assert_eq!(reply.function, 14);
  assert!(!reply.w_bit);
  assert_ne!(reply.system_bytes, 0);
  assert_eq!(reply.body, body);

  passive_thread.join().unwrap();
  assert!(passive.is_selected());
  active.stop();
  passive.stop();
}

#[test]
fn linktest_round_trips_between_clients() {
  let entity = free_entity();
  let passive = Client::new(settings(ConnectionMode::Passive));
  let active = Client::new(settings(ConnectionMode::Active));

  let passive_clone = passive.clone();
  let entity_clone = entity.clone();
  let passive_thread = thread::spawn(move || {
    passive_clone.connect(&entity_clone).unwrap();
  });
  thread::sleep(Duration::from_millis(100));
  active.connect(&entity).unwrap();
  passive_thread.join().unwrap();

  active.linktest().unwrap();
  passive.linktest().unwrap();

  active.stop();
  passive.stop();
}

#[test]
fn separate_tears_down_the_peer_session() {
  let entity = free_entity();
  let passive = Client::new(settings(ConnectionMode::Passive));
  let active = Client::new(settings(ConnectionMode::Active));

  let passive_clone = passive.clone();
  let entity_clone = entity.clone();
  let passive_thread = thread::spawn(move || {
    passive_clone.connect(&entity_clone).unwrap();
  });
  thread::sleep(Duration::from_millis(100));
  active.connect(&entity).unwrap();
  passive_thread.join().unwrap();

  active.separate().unwrap();
  assert!(eventually(Duration::from_secs(2), || !passive.is_selected()));
  // The flushed session cancels blocked receivers.
  assert_eq!(
    passive.receive_data(Some(Duration::from_millis(200))),
    Err(Error::Core(secs_core::Error::Cancelled))
  );
  passive.stop();
  active.stop();
}

#[test]
fn deselect_completes_and_tears_both_sessions_down() {
  let entity = free_entity();
  let passive = Client::new(settings(ConnectionMode::Passive));
  let active = Client::new(settings(ConnectionMode::Active));

  let passive_clone = passive.clone();
  let entity_clone = entity.clone();
  let passive_thread = thread::spawn(move || {
    passive_clone.connect(&entity_clone).unwrap();
  });
  thread::sleep(Duration::from_millis(100));
  active.connect(&entity).unwrap();
  passive_thread.join().unwrap();

  active.deselect().unwrap();
  assert!(!active.is_selected());
  assert!(eventually(Duration::from_secs(2), || !passive.is_selected()));
  active.stop();
  passive.stop();
}

#[test]
fn send_before_selection_is_refused_locally() {
  let active = Client::new(settings(ConnectionMode::Active));
  let result = active.send_data(secs_core::DataMessage {
    stream: 1,
    function: 1,
    w_bit: false,
    system_bytes: 1,
    body: vec![],
  });
  assert_eq!(result, Err(Error::NotSelected));
}

#[test]
fn request_with_even_or_reserved_function_is_refused() {
  let active = Client::new(settings(ConnectionMode::Active));
  // Selection is checked first, so drive the checks through a raw peer.
  let entity = free_entity();
  let listener = TcpListener::bind(&entity).unwrap();
  let peer = thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let (header, _) = read_frame(&mut stream);
    write_frame(&mut stream, select_response(header, 0), &[]);
    // Hold the socket open while the client exercises its local checks.
    thread::sleep(Duration::from_millis(500));
  });
  active.connect(&entity).unwrap();
  assert_eq!(
    active.request_data(1, 14, vec![], Some(Duration::from_millis(100))),
    Err(Error::Core(secs_core::Error::InvalidArgument))
  );
  assert_eq!(
    active.request_data(1, 0xFF, vec![], Some(Duration::from_millis(100))),
    Err(Error::Core(secs_core::Error::InvalidArgument))
  );
  active.stop();
  peer.join().unwrap();
}

#[test]
fn nonzero_select_status_fails_the_connect() {
  let entity = free_entity();
  let listener = TcpListener::bind(&entity).unwrap();
  let peer = thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let (header, _) = read_frame(&mut stream);
    assert_eq!(header[5], 1); // SType Select.req
    write_frame(&mut stream, select_response(header, 2), &[]);
  });

  let active = Client::new(settings(ConnectionMode::Active));
  assert_eq!(active.connect(&entity), Err(Error::SelectFailed(2)));
  assert!(!active.is_selected());
  peer.join().unwrap();
}

#[test]
fn linktest_failures_reach_threshold_and_disconnect() {
  let entity = free_entity();
  let listener = TcpListener::bind(&entity).unwrap();
  let peer = thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let (header, _) = read_frame(&mut stream);
    write_frame(&mut stream, select_response(header, 0), &[]);
    // Silently discard everything else, Linktest.req included.
    let mut sink = [0u8; 256];
    while let Ok(n) = stream.read(&mut sink) {
      if n == 0 {
        break;
      }
    }
  });

  let active = Client::new(ParameterSettings {
    linktest_interval: Duration::from_millis(50),
    linktest_max_consecutive_failures: 3,
    t6: Duration::from_millis(100),
    ..settings(ConnectionMode::Active)
  });
  active.connect(&entity).unwrap();
  assert!(active.is_selected());
  // Three failed linktests at ~150 ms apiece.
  assert!(eventually(Duration::from_secs(3), || !active.is_selected()));
  assert_eq!(
    active.receive_data(Some(Duration::from_millis(200))),
    Err(Error::Core(secs_core::Error::Cancelled))
  );
  active.stop();
  peer.join().unwrap();
}

#[test]
fn t8_expiry_within_a_frame_closes_the_connection() {
  let entity = free_entity();
  let listener = TcpListener::bind(&entity).unwrap();
  let peer = thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let (header, _) = read_frame(&mut stream);
    write_frame(&mut stream, select_response(header, 0), &[]);
    // Start a frame and stall: 20 bytes promised, 5 delivered.
    stream.write_all(&20u32.to_be_bytes()).unwrap();
    stream.write_all(&[0u8; 5]).unwrap();
    thread::sleep(Duration::from_secs(2));
  });

  let active = Client::new(ParameterSettings {
    t8: Duration::from_millis(100),
    ..settings(ConnectionMode::Active)
  });
  active.connect(&entity).unwrap();
  assert!(eventually(Duration::from_secs(2), || !active.is_connected()));
  active.stop();
  peer.join().unwrap();
}

#[test]
fn passive_connect_times_out_without_select() {
  let entity = free_entity();
  let passive = Client::new(ParameterSettings {
    t7: Duration::from_millis(200),
    ..settings(ConnectionMode::Passive)
  });

  let entity_clone = entity.clone();
  let peer = thread::spawn(move || {
    // Connect but never select.
    thread::sleep(Duration::from_millis(100));
    let stream = TcpStream::connect(&entity_clone).unwrap();
    thread::sleep(Duration::from_secs(1));
    drop(stream);
  });

  assert_eq!(
    passive.connect(&entity),
    Err(Error::Core(secs_core::Error::Timeout))
  );
  peer.join().unwrap();
}

#[test]
fn mismatched_session_id_is_refused_and_closed() {
  let entity = free_entity();
  let passive = Client::new(settings(ConnectionMode::Passive));

  let entity_clone = entity.clone();
  let peer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(100));
    let mut stream = TcpStream::connect(&entity_clone).unwrap();
    // Select.req with session id 2 against a passive entity expecting 1.
    let header: [u8; 10] = [0x00, 0x02, 0, 0, 0, 1, 0, 0, 0, 1];
    write_frame(&mut stream, header, &[]);
    let (response, _) = read_frame(&mut stream);
    assert_eq!(response[5], 2); // Select.rsp
    assert_ne!(response[2], 0); // nonzero status
  });

  assert!(passive.connect(&entity).is_err());
  peer.join().unwrap();
  passive.stop();
}
