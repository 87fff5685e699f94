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

//! A declarative HSMS peer: loads an SML document, answers inbound
//! messages through its condition rules, and drives its timer rules.
//!
//! ```text
//! sml-peer passive 127.0.0.1:5000 peer.sml
//! sml-peer active  127.0.0.1:5000 peer.sml
//! ```

use secs_hsms::generic::Client;
use secs_hsms::{ConnectionMode, ParameterSettings};
use secs_protocol::{Options, Session};
use secs_sml::{RenderContext, Runtime};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let mut args = std::env::args().skip(1);
  let (mode, entity, sml_path) = match (args.next(), args.next(), args.next()) {
    (Some(mode), Some(entity), Some(path)) => (mode, entity, path),
    _ => {
      eprintln!("usage: sml-peer <active|passive> <host:port> <file.sml>");
      std::process::exit(2);
    },
  };
  let connect_mode = match mode.as_str() {
    "active" => ConnectionMode::Active,
    "passive" => ConnectionMode::Passive,
    other => {
      eprintln!("unknown mode: {other}");
      std::process::exit(2);
    },
  };

  let source = match std::fs::read_to_string(&sml_path) {
    Ok(source) => source,
    Err(read_error) => {
      eprintln!("cannot read {sml_path}: {read_error}");
      std::process::exit(1);
    },
  };
  let runtime = match Runtime::load(&source) {
    Ok(runtime) => Arc::new(runtime),
    Err(load_error) => {
      eprintln!("cannot load {sml_path}: {load_error}");
      std::process::exit(1);
    },
  };
  info!(
    messages = runtime.messages().len(),
    conditions = runtime.conditions().len(),
    timers = runtime.timers().len(),
    "document loaded"
  );

  let client = Client::new(ParameterSettings {
    connect_mode,
    session_id: 0,
    linktest_interval: Duration::from_secs(30),
    ..ParameterSettings::default()
  });
  let session = Session::new(client.clone(), Options::default());

  // Every inbound message consults the condition rules; a match renders
  // the named response and, for W-bit primaries, replies automatically.
  let rules = runtime.clone();
  session.router().set_default(Arc::new(move |message| {
    let limits = secs_ii::DecodeLimits::default();
    let item = if message.body.is_empty() {
      secs_ii::Item::List(vec![])
    } else {
      secs_ii::decode(&message.body, &limits).map_err(secs_protocol::Error::from)?
    };
    match rules.match_response(message.stream, message.function, &item) {
      Some(response) => {
        info!(
          stream = message.stream,
          function = message.function,
          response,
          "condition matched"
        );
        let body = rules
          .encode_message_body(response, &RenderContext::new())
          .map_err(|render_error| {
            error!(%render_error, response, "response failed to render");
            secs_protocol::Error::Core(secs_core::Error::InvalidArgument)
          })?;
        Ok(Some(body))
      },
      None => {
        warn!(
          stream = message.stream,
          function = message.function,
          "no rule matched"
        );
        Err(secs_protocol::Error::Core(secs_core::Error::InvalidArgument))
      },
    }
  }));

  // Timer rules transmit their message on a fixed period once connected.
  for timer in runtime.timers() {
    let session = session.clone();
    let runtime = runtime.clone();
    let rule = timer.clone();
    thread::spawn(move || loop {
      thread::sleep(Duration::from_secs(u64::from(rule.interval_seconds)));
      let Some(message) = runtime.get_message(&rule.message_name) else {
        error!(name = %rule.message_name, "timer names an unknown message");
        return;
      };
      let body = match runtime.encode_message_body(&rule.message_name, &RenderContext::new()) {
        Ok(body) => body,
        Err(render_error) => {
          error!(%render_error, name = %rule.message_name, "timer message failed to render");
          return;
        },
      };
      if let Err(send_error) = session.send(message.stream, message.function, body) {
        warn!(%send_error, name = %rule.message_name, "timer send failed");
      }
    });
  }

  let dispatch = {
    let session = session.clone();
    thread::spawn(move || session.run())
  };

  let outcome = match connect_mode {
    ConnectionMode::Active => client.run_active(&entity).err(),
    ConnectionMode::Passive => loop {
      match client.connect(&entity) {
        Ok(socket) => {
          info!(%socket, "peer connected");
          // Serve until the session ends, then listen again.
          while client.is_connected() {
            thread::sleep(Duration::from_millis(250));
          }
        },
        Err(connect_error) => break Some(connect_error),
      }
    },
  };
  if let Some(session_error) = outcome {
    error!(%session_error, "session ended");
  }
  session.stop();
  let _ = dispatch.join();
}
