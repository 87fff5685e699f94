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

//! # LEXER

use crate::token::{Token, TokenKind};
use crate::LexError;

/// ## LEXER
///
/// Turns SML source text into a token stream. Source is UTF-8 with ASCII
/// punctuation; line endings may be LF or CRLF. Whitespace, `//` line
/// comments, and `/* */` block comments are skipped. Every failure carries
/// 1-based line and column coordinates.
pub struct Lexer<'a> {
  source: &'a [u8],
  position: usize,
  line: u32,
  column: u32,
}

impl<'a> Lexer<'a> {
  /// ### NEW LEXER
  pub fn new(source: &'a str) -> Self {
    Lexer {
      source: source.as_bytes(),
      position: 0,
      line: 1,
      column: 1,
    }
  }

  /// ### TOKENIZE
  ///
  /// Consumes the whole source, ending with an [Eof] token.
  ///
  /// [Eof]: TokenKind::Eof
  pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
    let mut tokens: Vec<Token> = vec![];
    loop {
      self.skip_trivia()?;
      let (line, column) = (self.line, self.column);
      let byte = match self.peek() {
        None => {
          tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line,
            column,
          });
          return Ok(tokens);
        },
        Some(byte) => byte,
      };
      let token = match byte {
        b'"' | b'\'' => self.lex_string(byte)?,
        b'0'..=b'9' => self.lex_number(false)?,
        b'+' | b'-' => {
          if matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.lex_number(true)?
          } else {
            return Err(self.error("unexpected character"));
          }
        },
        b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.lex_identifier(),
        b':' => self.lex_punct(TokenKind::Colon),
        b'.' => self.lex_punct(TokenKind::Dot),
        b'<' => self.lex_punct(TokenKind::LAngle),
        b'>' => self.lex_punct(TokenKind::RAngle),
        b'(' => self.lex_punct(TokenKind::LParen),
        b')' => self.lex_punct(TokenKind::RParen),
        b'[' => self.lex_punct(TokenKind::LBracket),
        b']' => self.lex_punct(TokenKind::RBracket),
        b'=' => {
          if self.peek_at(1) == Some(b'=') {
            self.advance();
            self.advance();
            Token {
              kind: TokenKind::Equals,
              text: "==".to_string(),
              line,
              column,
            }
          } else {
            return Err(self.error("expected '=='"));
          }
        },
        _ => return Err(self.error("unexpected character")),
      };
      tokens.push(token);
    }
  }

  fn peek(&self) -> Option<u8> {
    self.source.get(self.position).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<u8> {
    self.source.get(self.position + offset).copied()
  }

  fn advance(&mut self) -> Option<u8> {
    let byte = self.peek()?;
    self.position += 1;
    if byte == b'\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(byte)
  }

  fn error(&self, message: &str) -> LexError {
    LexError {
      line: self.line,
      column: self.column,
      message: message.to_string(),
    }
  }

  fn error_at(&self, line: u32, column: u32, message: &str) -> LexError {
    LexError {
      line,
      column,
      message: message.to_string(),
    }
  }

  /// Skips whitespace and both comment forms.
  fn skip_trivia(&mut self) -> Result<(), LexError> {
    loop {
      match self.peek() {
        Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
          self.advance();
        },
        Some(b'/') => match self.peek_at(1) {
          Some(b'/') => {
            while let Some(byte) = self.peek() {
              if byte == b'\n' {
                break;
              }
              self.advance();
            }
          },
          Some(b'*') => {
            let (line, column) = (self.line, self.column);
            self.advance();
            self.advance();
            loop {
              match self.peek() {
                None => return Err(self.error_at(line, column, "unterminated block comment")),
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                  self.advance();
                  self.advance();
                  break;
                },
                Some(_) => {
                  self.advance();
                },
              }
            }
          },
          _ => return Err(self.error("unexpected character")),
        },
        _ => return Ok(()),
      }
    }
  }

  /// Strings take either quote style; the token text is the unescaped
  /// content. Unknown escapes take the escaped character literally.
  fn lex_string(&mut self, quote: u8) -> Result<Token, LexError> {
    let (line, column) = (self.line, self.column);
    self.advance();
    let mut text = String::new();
    loop {
      match self.peek() {
        None | Some(b'\n') => return Err(self.error_at(line, column, "unterminated string")),
        Some(byte) if byte == quote => {
          self.advance();
          return Ok(Token {
            kind: TokenKind::String,
            text,
            line,
            column,
          });
        },
        Some(b'\\') => {
          self.advance();
          let escaped = self
            .advance()
            .ok_or_else(|| self.error_at(line, column, "unterminated string"))?;
          text.push(match escaped {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'0' => '\0',
            other => other as char,
          });
        },
        Some(byte) => {
          self.advance();
          text.push(byte as char);
        },
      }
    }
  }

  /// Numbers: decimal or `0x` hex integers with an optional sign, and
  /// floats with a fractional part, an exponent, or both. A dot is only
  /// part of the number when a digit follows, so `5.` lexes as an integer
  /// and the statement terminator.
  fn lex_number(&mut self, signed: bool) -> Result<Token, LexError> {
    let (line, column) = (self.line, self.column);
    let mut text = String::new();
    if signed {
      text.push(self.advance().unwrap() as char);
    }
    if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
      text.push(self.advance().unwrap() as char);
      text.push(self.advance().unwrap() as char);
      let digits_start = text.len();
      while matches!(self.peek(), Some(b'0'..=b'9') | Some(b'a'..=b'f') | Some(b'A'..=b'F')) {
        text.push(self.advance().unwrap() as char);
      }
      if text.len() == digits_start {
        return Err(self.error_at(line, column, "missing hexadecimal digits"));
      }
      return Ok(Token {
        kind: TokenKind::Integer,
        text,
        line,
        column,
      });
    }
    let mut is_float = false;
    while matches!(self.peek(), Some(b'0'..=b'9')) {
      text.push(self.advance().unwrap() as char);
    }
    if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
      is_float = true;
      text.push(self.advance().unwrap() as char);
      while matches!(self.peek(), Some(b'0'..=b'9')) {
        text.push(self.advance().unwrap() as char);
      }
    }
    if matches!(self.peek(), Some(b'e') | Some(b'E')) {
      let mut lookahead = 1;
      if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
        lookahead = 2;
      }
      if matches!(self.peek_at(lookahead), Some(b'0'..=b'9')) {
        is_float = true;
        for _ in 0..lookahead {
          text.push(self.advance().unwrap() as char);
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
          text.push(self.advance().unwrap() as char);
        }
      }
    }
    Ok(Token {
      kind: if is_float {
        TokenKind::Float
      } else {
        TokenKind::Integer
      },
      text,
      line,
      column,
    })
  }

  fn lex_identifier(&mut self) -> Token {
    let (line, column) = (self.line, self.column);
    let mut text = String::new();
    while matches!(
      self.peek(),
      Some(b'A'..=b'Z') | Some(b'a'..=b'z') | Some(b'0'..=b'9') | Some(b'_')
    ) {
      text.push(self.advance().unwrap() as char);
    }
    let kind = match text.as_str() {
      "if" => TokenKind::KwIf,
      "every" => TokenKind::KwEvery,
      "send" => TokenKind::KwSend,
      "W" => TokenKind::KwW,
      "L" => TokenKind::KwL,
      "A" => TokenKind::KwA,
      "B" => TokenKind::KwB,
      "Boolean" => TokenKind::KwBoolean,
      "U1" => TokenKind::KwU1,
      "U2" => TokenKind::KwU2,
      "U4" => TokenKind::KwU4,
      "U8" => TokenKind::KwU8,
      "I1" => TokenKind::KwI1,
      "I2" => TokenKind::KwI2,
      "I4" => TokenKind::KwI4,
      "I8" => TokenKind::KwI8,
      "F4" => TokenKind::KwF4,
      "F8" => TokenKind::KwF8,
      _ => TokenKind::Identifier,
    };
    Token {
      kind,
      text,
      line,
      column,
    }
  }

  fn lex_punct(&mut self, kind: TokenKind) -> Token {
    let (line, column) = (self.line, self.column);
    let byte = self.advance().unwrap();
    Token {
      kind,
      text: (byte as char).to_string(),
      line,
      column,
    }
  }
}
