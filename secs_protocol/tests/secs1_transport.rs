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

//! The protocol session is transport-agnostic: the same request/response
//! and routing semantics hold over the SECS-I serial transport as over
//! HSMS, half-duplex handshaking and block segmentation included.

use secs_core::{DataMessage, Error as CoreError, Link};
use secs_i::{Client, ParameterSettings, Role};
use secs_protocol::{Options, Session};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A crossed pair of byte channels standing in for the serial line.
struct ChannelLink {
  tx: Sender<u8>,
  rx: Receiver<u8>,
}
impl Link for ChannelLink {
  fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
    for byte in bytes {
      self.tx.send(*byte).map_err(|_| CoreError::Cancelled)?;
    }
    Ok(())
  }

  fn read_byte(&mut self, timeout: Option<Duration>) -> Result<u8, CoreError> {
    match timeout {
      Some(duration) => self.rx.recv_timeout(duration).map_err(|error| match error {
        RecvTimeoutError::Timeout => CoreError::Timeout,
        RecvTimeoutError::Disconnected => CoreError::Cancelled,
      }),
      None => self.rx.recv().map_err(|_| CoreError::Cancelled),
    }
  }
}

fn link_pair() -> (ChannelLink, ChannelLink) {
  let (a_tx, b_rx) = channel::<u8>();
  let (b_tx, a_rx) = channel::<u8>();
  (ChannelLink { tx: a_tx, rx: a_rx }, ChannelLink { tx: b_tx, rx: b_rx })
}

fn secs1_settings(role: Role) -> ParameterSettings {
  ParameterSettings {
    role,
    device_id: 1,
    t2: Duration::from_secs(2),
    t4: Duration::from_secs(2),
    poll_interval: Duration::from_millis(5),
    ..ParameterSettings::default()
  }
}

fn session_pair() -> (
  Arc<Session<Arc<Client>>>,
  Arc<Session<Arc<Client>>>,
  Vec<thread::JoinHandle<()>>,
) {
  let (host_link, equipment_link) = link_pair();
  let host = Client::spawn(host_link, secs1_settings(Role::Host));
  let equipment = Client::spawn(equipment_link, secs1_settings(Role::Equipment));

  let options = Options {
    t3: Some(Duration::from_secs(2)),
    poll_interval: Some(Duration::from_millis(10)),
    ..Options::default()
  };
  let host_session = Session::new(host, options.clone());
  let equipment_session = Session::new(equipment, options);

  let mut loops = vec![];
  for session in [host_session.clone(), equipment_session.clone()] {
    loops.push(thread::spawn(move || {
      let _ = session.run();
    }));
  }
  (host_session, equipment_session, loops)
}

#[test]
fn request_response_roundtrip_over_the_serial_line() {
  let (host, equipment, loops) = session_pair();
  equipment
    .router()
    .set(1, 13, Arc::new(|message| Ok(Some(message.body.clone()))));

  let body = vec![0xDE, 0xAD, 0xBE, 0xEF];
  let reply = host
    .request(1, 13, body.clone(), Some(Duration::from_secs(2)))
    .unwrap();
  assert_eq!(reply.stream, 1);
  assert_eq!(reply.function, 14);
  assert!(!reply.w_bit);
  assert_eq!(reply.body, body);

  host.stop();
  equipment.stop();
  for handle in loops {
    handle.join().unwrap();
  }
}

#[test]
fn multi_block_bodies_cross_the_protocol_layer_intact() {
  let (host, equipment, loops) = session_pair();
  // The 600-byte request crosses as three blocks; the echoed reply
  // crosses back the same way.
  equipment
    .router()
    .set(2, 1, Arc::new(|message| Ok(Some(message.body.clone()))));

  let body: Vec<u8> = (0..600u16).map(|i| i as u8).collect();
  let reply = host
    .request(2, 1, body.clone(), Some(Duration::from_secs(5)))
    .unwrap();
  assert_eq!(reply.body, body);

  host.stop();
  equipment.stop();
  for handle in loops {
    handle.join().unwrap();
  }
}

#[test]
fn requests_cross_in_both_directions() {
  let (host, equipment, loops) = session_pair();
  host.router().set(5, 1, Arc::new(|_| Ok(Some(vec![0x00]))));
  equipment.router().set(1, 1, Arc::new(|_| Ok(Some(vec![0x01]))));

  let to_equipment = host
    .request(1, 1, vec![], Some(Duration::from_secs(2)))
    .unwrap();
  assert_eq!(to_equipment.body, vec![0x01]);

  let to_host = equipment
    .request(5, 1, vec![], Some(Duration::from_secs(2)))
    .unwrap();
  assert_eq!(to_host.body, vec![0x00]);

  host.stop();
  equipment.stop();
  for handle in loops {
    handle.join().unwrap();
  }
}

#[test]
fn unanswered_request_times_out_over_the_serial_line() {
  let (host, equipment, loops) = session_pair();
  // Equipment routes nothing: the send transaction completes at the link
  // layer, then the host waits out its reply deadline.
  let result = host.request(9, 1, vec![0xAA], Some(Duration::from_millis(200)));
  assert_eq!(result, Err(secs_protocol::Error::Core(CoreError::Timeout)));
  assert_eq!(host.outstanding_requests(), 0);

  host.stop();
  equipment.stop();
  for handle in loops {
    handle.join().unwrap();
  }
}

/// Sanity check at the transport boundary: the data message a session
/// transmits is what the peer session's transport hands back up.
#[test]
fn transport_preserves_header_fields() {
  let (host_link, equipment_link) = link_pair();
  let host = Client::spawn(host_link, secs1_settings(Role::Host));
  let equipment = Client::spawn(equipment_link, secs1_settings(Role::Equipment));

  host
    .send(DataMessage {
      stream: 7,
      function: 25,
      w_bit: true,
      system_bytes: 0x01020304,
      body: vec![0x42],
    })
    .unwrap();
  let received = equipment.receive(Some(Duration::from_secs(2))).unwrap();
  assert_eq!(received.message.stream, 7);
  assert_eq!(received.message.function, 25);
  assert!(received.message.w_bit);
  assert_eq!(received.message.system_bytes, 0x01020304);
  assert_eq!(received.message.body, vec![0x42]);

  host.stop();
  equipment.stop();
}
