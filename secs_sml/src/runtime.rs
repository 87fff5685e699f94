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

//! # RUNTIME

use crate::ast::{AsciiBody, Condition, Document, ItemTemplate, MessageDef, TimerRule, ValueExpr};
use crate::{parse_sf, LoadError, RenderError};
use secs_ii::Item;
use std::collections::HashMap;
use tracing::trace;

/// Absolute tolerance for floating point comparison in condition matching.
const FLOAT_TOLERANCE: f64 = 1e-4;

/// ## RENDER CONTEXT
///
/// The variables available to template rendering: name to typed [Item].
/// Array-typed values splice into the literal array surrounding the
/// reference.
///
/// [Item]: secs_ii::Item
#[derive(Clone, Debug, Default)]
pub struct RenderContext {
  vars: HashMap<String, Item>,
}
impl RenderContext {
  /// ### NEW CONTEXT
  pub fn new() -> Self {
    RenderContext::default()
  }

  /// ### SET VARIABLE
  pub fn set(&mut self, name: impl Into<String>, value: Item) {
    self.vars.insert(name.into(), value);
  }

  /// ### GET VARIABLE
  pub fn get(&self, name: &str) -> Option<&Item> {
    self.vars.get(name)
  }

  /// ### CLEAR
  pub fn clear(&mut self) {
    self.vars.clear();
  }
}

/// ## RENDER ITEM
///
/// Substitutes variables into a template, producing a concrete [Item].
/// Literal values pass through unchanged; each variable reference must
/// resolve to an item of the surrounding array's type, whose values are
/// concatenated with the literals in declared order.
///
/// [Item]: secs_ii::Item
pub fn render_item(template: &ItemTemplate, ctx: &RenderContext) -> Result<Item, RenderError> {
  fn splice<T: Clone>(
    values: &[ValueExpr<T>],
    ctx: &RenderContext,
    extract: impl Fn(&Item) -> Option<&Vec<T>>,
  ) -> Result<Vec<T>, RenderError> {
    let mut out: Vec<T> = vec![];
    for value in values {
      match value {
        ValueExpr::Literal(value) => out.push(value.clone()),
        ValueExpr::Var(name) => {
          let item = ctx
            .get(name)
            .ok_or_else(|| RenderError::MissingVariable(name.clone()))?;
          let values = extract(item).ok_or_else(|| RenderError::TypeMismatch(name.clone()))?;
          out.extend(values.iter().cloned());
        },
      }
    }
    Ok(out)
  }

  Ok(match template {
    ItemTemplate::List(items) => Item::List(
      items
        .iter()
        .map(|item| render_item(item, ctx))
        .collect::<Result<Vec<Item>, RenderError>>()?,
    ),
    ItemTemplate::Ascii(None) => Item::Ascii(vec![]),
    ItemTemplate::Ascii(Some(AsciiBody::Literal(bytes))) => Item::Ascii(bytes.clone()),
    ItemTemplate::Ascii(Some(AsciiBody::Var(name))) => {
      let item = ctx
        .get(name)
        .ok_or_else(|| RenderError::MissingVariable(name.clone()))?;
      match item {
        Item::Ascii(bytes) => Item::Ascii(bytes.clone()),
        _ => return Err(RenderError::TypeMismatch(name.clone())),
      }
    },
    ItemTemplate::Bin(values) => Item::Bin(splice(values, ctx, |item| match item {
      Item::Bin(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::Bool(values) => Item::Bool(splice(values, ctx, |item| match item {
      Item::Bool(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::I1(values) => Item::I1(splice(values, ctx, |item| match item {
      Item::I1(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::I2(values) => Item::I2(splice(values, ctx, |item| match item {
      Item::I2(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::I4(values) => Item::I4(splice(values, ctx, |item| match item {
      Item::I4(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::I8(values) => Item::I8(splice(values, ctx, |item| match item {
      Item::I8(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::U1(values) => Item::U1(splice(values, ctx, |item| match item {
      Item::U1(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::U2(values) => Item::U2(splice(values, ctx, |item| match item {
      Item::U2(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::U4(values) => Item::U4(splice(values, ctx, |item| match item {
      Item::U4(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::U8(values) => Item::U8(splice(values, ctx, |item| match item {
      Item::U8(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::F4(values) => Item::F4(splice(values, ctx, |item| match item {
      Item::F4(values) => Some(values),
      _ => None,
    })?),
    ItemTemplate::F8(values) => Item::F8(splice(values, ctx, |item| match item {
      Item::F8(values) => Some(values),
      _ => None,
    })?),
  })
}

/// ## RUNTIME
///
/// A loaded [Document] with indices for constant-time message lookup, plus
/// condition matching and template rendering.
///
/// [Document]: Document
#[derive(Clone, Debug, Default)]
pub struct Runtime {
  document: Document,
  name_index: HashMap<String, usize>,
  sf_index: HashMap<u16, usize>,
}

impl Runtime {
  /// ### LOAD FROM SOURCE
  ///
  /// Lexes, parses, and indexes SML source text.
  pub fn load(source: &str) -> Result<Self, LoadError> {
    Ok(Self::from_document(crate::parse_sml(source)?))
  }

  /// ### LOAD FROM DOCUMENT
  pub fn from_document(document: Document) -> Self {
    let mut name_index = HashMap::new();
    let mut sf_index = HashMap::new();
    for (position, message) in document.messages.iter().enumerate() {
      match &message.name {
        Some(name) => {
          name_index.insert(name.clone(), position);
        },
        // Anonymous messages are reachable by their (stream, function).
        None => {
          let key = (u16::from(message.stream) << 8) | u16::from(message.function);
          sf_index.insert(key, position);
        },
      }
    }
    trace!(
      target: "secs_sml",
      messages = document.messages.len(),
      conditions = document.conditions.len(),
      timers = document.timers.len(),
      "runtime loaded"
    );
    Runtime {
      document,
      name_index,
      sf_index,
    }
  }

  /// ### MESSAGES
  pub fn messages(&self) -> &[MessageDef] {
    &self.document.messages
  }

  /// ### CONDITION RULES
  pub fn conditions(&self) -> &[crate::ConditionRule] {
    &self.document.conditions
  }

  /// ### TIMER RULES
  pub fn timers(&self) -> &[TimerRule] {
    &self.document.timers
  }

  /// ### GET MESSAGE BY NAME
  pub fn get_message(&self, name: &str) -> Option<&MessageDef> {
    self
      .name_index
      .get(name)
      .map(|position| &self.document.messages[*position])
  }

  /// ### GET MESSAGE BY STREAM AND FUNCTION
  ///
  /// Anonymous messages first through the index, named messages by scan.
  pub fn get_message_by_sf(&self, stream: u8, function: u8) -> Option<&MessageDef> {
    let key = (u16::from(stream) << 8) | u16::from(function);
    if let Some(position) = self.sf_index.get(&key) {
      return Some(&self.document.messages[*position]);
    }
    self
      .document
      .messages
      .iter()
      .find(|message| message.stream == stream && message.function == function)
  }

  /// ### MATCH RESPONSE
  ///
  /// Runs the condition rules in declared order against an inbound
  /// message; the first match names the response. A condition matches
  /// when its message name resolves to the inbound (stream, function),
  /// or is itself an `SxFy` form equal to it, and, when an index and
  /// expected item are present, the inbound body's list element at the
  /// 1-based index deep-equals the expected item (floats compared with
  /// absolute tolerance).
  pub fn match_response(&self, stream: u8, function: u8, item: &Item) -> Option<&str> {
    for rule in &self.document.conditions {
      if self.match_condition(&rule.condition, stream, function, item) {
        return Some(&rule.response_name);
      }
    }
    None
  }

  fn match_condition(
    &self,
    condition: &Condition,
    stream: u8,
    function: u8,
    item: &Item,
  ) -> bool {
    // The condition name may directly be an SxFy form.
    match parse_sf(&condition.message_name) {
      Some((condition_stream, condition_function)) => {
        if u32::from(stream) != condition_stream || u32::from(function) != condition_function {
          return false;
        }
      },
      None => match self.get_message(&condition.message_name) {
        Some(message) => {
          if message.stream != stream || message.function != function {
            return false;
          }
        },
        None => return false,
      },
    }
    if let (Some(index), Some(expected)) = (&condition.index, &condition.expected) {
      let Item::List(elements) = item else {
        return false;
      };
      if *index < 1 || *index > elements.len() {
        return false;
      }
      if !items_equal(&elements[*index - 1], expected) {
        return false;
      }
    }
    true
  }

  /// ### RENDER MESSAGE BODY
  ///
  /// Substitutes `ctx` into the named message's body template. A message
  /// without a body renders to [None].
  pub fn render_message_body(
    &self,
    name: &str,
    ctx: &RenderContext,
  ) -> Result<Option<Item>, RenderError> {
    let message = self
      .get_message(name)
      .ok_or_else(|| RenderError::UnknownMessage(name.to_string()))?;
    match &message.template {
      Some(template) => Ok(Some(render_item(template, ctx)?)),
      None => Ok(None),
    }
  }

  /// ### ENCODE MESSAGE BODY
  ///
  /// As [Render Message Body], encoded to the on-wire byte form. A message
  /// without a body encodes to no bytes.
  ///
  /// [Render Message Body]: Runtime::render_message_body
  pub fn encode_message_body(
    &self,
    name: &str,
    ctx: &RenderContext,
  ) -> Result<Vec<u8>, RenderError> {
    match self.render_message_body(name, ctx)? {
      Some(item) => Ok(item.encode()?),
      None => Ok(vec![]),
    }
  }
}

/// Deep equality with absolute float tolerance.
fn items_equal(a: &Item, b: &Item) -> bool {
  fn floats_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= FLOAT_TOLERANCE
  }
  match (a, b) {
    (Item::List(a), Item::List(b)) => {
      a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| items_equal(a, b))
    },
    (Item::Ascii(a), Item::Ascii(b)) => a == b,
    (Item::Bin(a), Item::Bin(b)) => a == b,
    (Item::Bool(a), Item::Bool(b)) => a == b,
    (Item::I1(a), Item::I1(b)) => a == b,
    (Item::I2(a), Item::I2(b)) => a == b,
    (Item::I4(a), Item::I4(b)) => a == b,
    (Item::I8(a), Item::I8(b)) => a == b,
    (Item::U1(a), Item::U1(b)) => a == b,
    (Item::U2(a), Item::U2(b)) => a == b,
    (Item::U4(a), Item::U4(b)) => a == b,
    (Item::U8(a), Item::U8(b)) => a == b,
    (Item::F4(a), Item::F4(b)) => {
      a.len() == b.len()
        && a.iter()
          .zip(b.iter())
          .all(|(a, b)| floats_equal(f64::from(*a), f64::from(*b)))
    },
    (Item::F8(a), Item::F8(b)) => {
      a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| floats_equal(*a, *b))
    },
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = "\
s1f1: S1F1 W <L>.
s1f2: S1F2 <L <A \"Hello\">>.
if (s1f1) s1f2.
";

  #[test]
  fn conditional_response_matches_and_renders() {
    let runtime = Runtime::load(SAMPLE).unwrap();

    let response = runtime.match_response(1, 1, &Item::List(vec![]));
    assert_eq!(response, Some("s1f2"));

    let message = runtime.get_message("s1f2").unwrap();
    assert_eq!((message.stream, message.function, message.w_bit), (1, 2, false));

    let rendered = runtime
      .render_message_body("s1f2", &RenderContext::new())
      .unwrap();
    assert_eq!(
      rendered,
      Some(Item::List(vec![Item::Ascii(b"Hello".to_vec())]))
    );
    let encoded = runtime
      .encode_message_body("s1f2", &RenderContext::new())
      .unwrap();
    assert_eq!(encoded, vec![0x01, 0x01, 0x41, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F]);
  }

  #[test]
  fn condition_name_may_be_a_stream_function_form() {
    let runtime = Runtime::load(
      "s9f3: S9F3 <L>.\n\
       if (S5F1) s9f3.\n",
    )
    .unwrap();
    assert_eq!(runtime.match_response(5, 1, &Item::List(vec![])), Some("s9f3"));
    assert_eq!(runtime.match_response(5, 3, &Item::List(vec![])), None);
  }

  #[test]
  fn indexed_condition_compares_the_listed_element() {
    let runtime = Runtime::load(
      "alarm: S5F1 <L>.\n\
       ack: S5F2 <B 0>.\n\
       if (alarm(2) == <U4 1001>) ack.\n",
    )
    .unwrap();
    let matching = Item::List(vec![Item::bin(1), Item::U4(vec![1001])]);
    assert_eq!(runtime.match_response(5, 1, &matching), Some("ack"));
    let wrong_value = Item::List(vec![Item::bin(1), Item::U4(vec![1002])]);
    assert_eq!(runtime.match_response(5, 1, &wrong_value), None);
    let too_short = Item::List(vec![Item::bin(1)]);
    assert_eq!(runtime.match_response(5, 1, &too_short), None);
    let not_a_list = Item::u4(1001);
    assert_eq!(runtime.match_response(5, 1, &not_a_list), None);
  }

  #[test]
  fn float_conditions_compare_with_tolerance() {
    let runtime = Runtime::load(
      "m: S2F1 <L>.\n\
       if (m(1) == <F4 1.5>) m.\n",
    )
    .unwrap();
    let near = Item::List(vec![Item::F4(vec![1.500_05])]);
    assert_eq!(runtime.match_response(2, 1, &near), Some("m"));
    let far = Item::List(vec![Item::F4(vec![1.51])]);
    assert_eq!(runtime.match_response(2, 1, &far), None);
  }

  #[test]
  fn first_matching_rule_wins() {
    let runtime = Runtime::load(
      "a: S1F1 <L>.\n\
       b: S1F2 <L>.\n\
       c: S1F2 <L>.\n\
       if (a) b.\n\
       if (a) c.\n",
    )
    .unwrap();
    assert_eq!(runtime.match_response(1, 1, &Item::List(vec![])), Some("b"));
  }

  #[test]
  fn anonymous_messages_index_by_stream_function() {
    let runtime = Runtime::load("S2F17.\nnamed: S2F25 <L>.\n").unwrap();
    assert!(runtime.get_message_by_sf(2, 17).is_some());
    // Named messages are still reachable by a scan.
    assert_eq!(
      runtime.get_message_by_sf(2, 25).and_then(|m| m.name.as_deref()),
      Some("named")
    );
    assert!(runtime.get_message_by_sf(2, 99).is_none());
  }

  #[test]
  fn variables_splice_into_literal_arrays_in_order() {
    let runtime = Runtime::load("m: S2F13 <L <U2 1 SVIDS 9> <A NAME>>.").unwrap();
    let mut ctx = RenderContext::new();
    ctx.set("SVIDS", Item::U2(vec![5, 6]));
    ctx.set("NAME", Item::ascii("TOOL-7"));
    let rendered = runtime.render_message_body("m", &ctx).unwrap().unwrap();
    assert_eq!(
      rendered,
      Item::List(vec![
        Item::U2(vec![1, 5, 6, 9]),
        Item::Ascii(b"TOOL-7".to_vec()),
      ])
    );
  }

  #[test]
  fn missing_variable_and_type_mismatch_are_reported_by_name() {
    let runtime = Runtime::load("m: S2F13 <U2 SVIDS>.").unwrap();
    assert_eq!(
      runtime.render_message_body("m", &RenderContext::new()),
      Err(RenderError::MissingVariable("SVIDS".to_string()))
    );
    let mut ctx = RenderContext::new();
    ctx.set("SVIDS", Item::ascii("oops"));
    assert_eq!(
      runtime.render_message_body("m", &ctx),
      Err(RenderError::TypeMismatch("SVIDS".to_string()))
    );
  }

  #[test]
  fn unknown_message_is_reported() {
    let runtime = Runtime::load("").unwrap();
    assert_eq!(
      runtime.encode_message_body("nope", &RenderContext::new()),
      Err(RenderError::UnknownMessage("nope".to_string()))
    );
  }

  #[test]
  fn bodyless_message_encodes_to_no_bytes() {
    let runtime = Runtime::load("m: S1F13 W.").unwrap();
    assert_eq!(
      runtime.encode_message_body("m", &RenderContext::new()),
      Ok(vec![])
    );
  }
}
