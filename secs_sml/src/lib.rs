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

//! # SECS MESSAGE LANGUAGE (SML)
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! SML is a human-readable text form for SECS-II ([SEMI E5]) messages, used
//! here both to author messages and as a template format with variable
//! substitution:
//!
//! ```text
//! s1f1: S1F1 W <L>.
//! s1f2: S1F2 <L <A "Hello">>.
//! if (s1f1) s1f2.
//! every 30 send s1f1.
//! ```
//!
//! This crate provides:
//!
//! - The [Lexer], producing a token stream with source coordinates.
//! - The [Parser], a recursive descent over the token stream producing a
//!   [Document] of message definitions, condition rules, and timer rules.
//! - The [Runtime], indexing a [Document] for message lookup by name or by
//!   (stream, function), matching inbound messages against condition rules,
//!   and rendering item templates with typed variable substitution.
//!
//! [SEMI E5]: https://store-us.semi.org/products/e00500-semi-e5-specification-for-semi-equipment-communications-standard-2-message-content-secs-ii
//!
//! [Lexer]:    Lexer
//! [Parser]:   Parser
//! [Document]: Document
//! [Runtime]:  Runtime

mod ast;
mod lexer;
mod parser;
mod runtime;
mod token;

pub use ast::{
  AsciiBody, Condition, ConditionRule, Document, ItemTemplate, MessageDef, TimerRule, ValueExpr,
};
pub use lexer::Lexer;
pub use parser::Parser;
pub use runtime::{render_item, RenderContext, Runtime};
pub use token::{Token, TokenKind};

use thiserror::Error;

/// ## LEX ERROR
///
/// A failure in the character stream, located by 1-based source
/// coordinates.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("lex error at {line}:{column}: {message}")]
pub struct LexError {
  pub line: u32,
  pub column: u32,
  pub message: String,
}

/// ## PARSE ERROR KIND
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
  UnexpectedToken,
  ExpectedItem,
  ExpectedIdentifier,
  ExpectedNumber,
  InvalidStreamFunction,
  UnclosedItem,
  InvalidCondition,
}

/// ## PARSE ERROR
///
/// A failure in the token stream, located by the 1-based source
/// coordinates of the offending token.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
  pub kind: ParseErrorKind,
  pub line: u32,
  pub column: u32,
  pub message: String,
}

/// ## LOAD ERROR
///
/// Either stage of turning SML source into a loaded [Runtime].
///
/// [Runtime]: Runtime
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoadError {
  #[error(transparent)]
  Lex(#[from] LexError),

  #[error(transparent)]
  Parse(#[from] ParseError),
}

/// ## RENDER ERROR
///
/// A failure substituting variables into an item template.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RenderError {
  /// ### MISSING VARIABLE
  ///
  /// The template references a variable the context does not provide.
  #[error("missing variable: {0}")]
  MissingVariable(String),

  /// ### TYPE MISMATCH
  ///
  /// A provided variable's item type differs from the array it would be
  /// spliced into.
  #[error("type mismatch for variable: {0}")]
  TypeMismatch(String),

  /// ### UNKNOWN MESSAGE
  ///
  /// No message of the requested name is loaded.
  #[error("unknown message: {0}")]
  UnknownMessage(String),

  /// ### ITEM
  ///
  /// The rendered item failed to encode.
  #[error(transparent)]
  Item(#[from] secs_ii::Error),
}

/// ## PARSE SML SOURCE
///
/// Convenience over the [Lexer] and [Parser]: source text to [Document].
///
/// [Lexer]:    Lexer
/// [Parser]:   Parser
/// [Document]: Document
pub fn parse_sml(source: &str) -> Result<Document, LoadError> {
  let tokens = Lexer::new(source).tokenize()?;
  Ok(Parser::new(tokens).parse()?)
}

/// ## STREAM-FUNCTION TOKEN
///
/// Parses an `S<n>F<m>` form, case-insensitively. Returns [None] when the
/// text is not of that shape; values beyond 127 streams or 255 functions
/// are the caller's to reject.
pub(crate) fn parse_sf(text: &str) -> Option<(u32, u32)> {
  let bytes = text.as_bytes();
  if bytes.len() < 4 || (bytes[0] != b'S' && bytes[0] != b's') {
    return None;
  }
  let f_pos = text[1..]
    .find(['F', 'f'])
    .map(|position| position + 1)?;
  if f_pos < 2 || f_pos + 1 >= text.len() {
    return None;
  }
  let stream: u32 = text[1..f_pos].parse().ok()?;
  let function: u32 = text[f_pos + 1..].parse().ok()?;
  Some((stream, function))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sf_token_shapes() {
    assert_eq!(parse_sf("S1F1"), Some((1, 1)));
    assert_eq!(parse_sf("s99f105"), Some((99, 105)));
    assert_eq!(parse_sf("S255F1"), Some((255, 1)));
    assert_eq!(parse_sf("SF1"), None);
    assert_eq!(parse_sf("S1F"), None);
    assert_eq!(parse_sf("hello"), None);
    assert_eq!(parse_sf("S1G2"), None);
  }
}
