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

//! # TOKENS

/// ## TOKEN KIND
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
  // Literals
  /// `name`, `S1F1`, variable references
  Identifier,
  /// `"..."` or `'...'`
  String,
  /// `123`, `-5`, `0x1F`
  Integer,
  /// `0.5`, `-1.5e3`
  Float,

  // Keywords
  KwIf,
  KwEvery,
  KwSend,
  KwW,

  // Item types
  KwL,
  KwA,
  KwB,
  KwBoolean,
  KwU1,
  KwU2,
  KwU4,
  KwU8,
  KwI1,
  KwI2,
  KwI4,
  KwI8,
  KwF4,
  KwF8,

  // Punctuation
  Colon,
  Dot,
  LAngle,
  RAngle,
  LParen,
  RParen,
  LBracket,
  RBracket,
  Equals,

  Eof,
}
impl TokenKind {
  /// ### ITEM TYPE KEYWORD
  pub fn is_item_type(self) -> bool {
    matches!(
      self,
      TokenKind::KwL
        | TokenKind::KwA
        | TokenKind::KwB
        | TokenKind::KwBoolean
        | TokenKind::KwU1
        | TokenKind::KwU2
        | TokenKind::KwU4
        | TokenKind::KwU8
        | TokenKind::KwI1
        | TokenKind::KwI2
        | TokenKind::KwI4
        | TokenKind::KwI8
        | TokenKind::KwF4
        | TokenKind::KwF8
    )
  }
}

/// ## TOKEN
///
/// A lexeme and its 1-based source coordinates. String tokens carry their
/// unescaped content; numbers carry their literal spelling for the parser
/// to interpret against the item type they appear in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub line: u32,
  pub column: u32,
}
impl Token {
  pub fn is(&self, kind: TokenKind) -> bool {
    self.kind == kind
  }
}
