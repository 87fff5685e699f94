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

//! # ABSTRACT SYNTAX TREE

use secs_ii::Item;

/// ## VALUE EXPRESSION
///
/// One element position in an item template body: either a literal value
/// or a reference to a variable resolved at render time. An array-typed
/// variable splices all of its values into the surrounding array.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueExpr<T> {
  /// ### LITERAL
  Literal(T),

  /// ### VARIABLE REFERENCE
  Var(String),
}

/// ## ASCII BODY
///
/// The body of an `<A ...>` template: a literal string, a variable
/// reference, or nothing (the empty string).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsciiBody {
  /// ### LITERAL
  Literal(Vec<u8>),

  /// ### VARIABLE REFERENCE
  Var(String),
}

/// ## ITEM TEMPLATE
///
/// The template form of a SECS-II item: structure and literals fixed at
/// parse time, values possibly deferred to variables.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemTemplate {
  /// ### LIST
  List(Vec<ItemTemplate>),

  /// ### ASCII
  Ascii(Option<AsciiBody>),

  /// ### BINARY
  Bin(Vec<ValueExpr<u8>>),

  /// ### BOOLEAN
  Bool(Vec<ValueExpr<bool>>),

  /// ### SIGNED INTEGERS
  I1(Vec<ValueExpr<i8>>),
  I2(Vec<ValueExpr<i16>>),
  I4(Vec<ValueExpr<i32>>),
  I8(Vec<ValueExpr<i64>>),

  /// ### UNSIGNED INTEGERS
  U1(Vec<ValueExpr<u8>>),
  U2(Vec<ValueExpr<u16>>),
  U4(Vec<ValueExpr<u32>>),
  U8(Vec<ValueExpr<u64>>),

  /// ### FLOATING POINT NUMBERS
  F4(Vec<ValueExpr<f32>>),
  F8(Vec<ValueExpr<f64>>),
}

/// ## MESSAGE DEFINITION
///
/// `[name ":"] SxFy [W] [<item>] "."`: a message template, optionally
/// named, optionally carrying a body template.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageDef {
  /// ### NAME
  ///
  /// Anonymous messages are indexed by (stream, function) instead.
  pub name: Option<String>,

  /// ### STREAM
  pub stream: u8,

  /// ### FUNCTION
  pub function: u8,

  /// ### REPLY BIT
  pub w_bit: bool,

  /// ### BODY TEMPLATE
  pub template: Option<ItemTemplate>,
}

/// ## CONDITION
///
/// `name[(index)][== <item>]`: matches an inbound message by name or
/// `SxFy` shape, optionally requiring the list element at the 1-based
/// index to deep-equal the expected item.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
  /// ### MESSAGE NAME
  ///
  /// A message name, or directly an `SxFy` form.
  pub message_name: String,

  /// ### INDEX
  ///
  /// 1-based position into the inbound message's list body.
  pub index: Option<usize>,

  /// ### EXPECTED ITEM
  pub expected: Option<Item>,
}

/// ## CONDITION RULE
///
/// `if (condition) response.`: names the message template to answer with
/// when the condition matches.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionRule {
  pub condition: Condition,
  pub response_name: String,
}

/// ## TIMER RULE
///
/// `every N send name.`: periodic transmission of a named message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerRule {
  pub interval_seconds: u32,
  pub message_name: String,
}

/// ## DOCUMENT
///
/// Everything one SML source declares.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
  pub messages: Vec<MessageDef>,
  pub conditions: Vec<ConditionRule>,
  pub timers: Vec<TimerRule>,
}
impl Document {
  /// ### FIND MESSAGE BY NAME
  pub fn find_message(&self, name: &str) -> Option<&MessageDef> {
    self
      .messages
      .iter()
      .find(|message| message.name.as_deref() == Some(name))
  }

  /// ### FIND ANONYMOUS MESSAGE BY STREAM AND FUNCTION
  pub fn find_by_sf(&self, stream: u8, function: u8) -> Option<&MessageDef> {
    self.messages.iter().find(|message| {
      message.name.is_none() && message.stream == stream && message.function == function
    })
  }
}
