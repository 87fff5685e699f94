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

//! # PARSER
//!
//! Recursive descent over the token stream:
//!
//! ```text
//! document   := statement*
//! statement  := message_def | if_rule | every_rule
//! message_def:= [Ident ":"] SFToken [W] [item] "."
//! if_rule    := "if" "(" condition ")" Ident "."
//! every_rule := "every" Integer "send" Ident "."
//! condition  := Ident ["(" Integer ")"] ["==" item]
//! item       := "<" type body ">"
//! ```

use crate::ast::{
  AsciiBody, Condition, ConditionRule, Document, ItemTemplate, MessageDef, TimerRule, ValueExpr,
};
use crate::token::{Token, TokenKind};
use crate::{parse_sf, ParseError, ParseErrorKind};
use secs_ii::Item;

/// ## PARSER
///
/// Consumes the token stream produced by the [Lexer] into a [Document].
/// The first failure aborts the parse with the offending token's source
/// coordinates.
///
/// [Lexer]:    crate::Lexer
/// [Document]: Document
pub struct Parser {
  tokens: Vec<Token>,
  position: usize,
}

impl Parser {
  /// ### NEW PARSER
  pub fn new(tokens: Vec<Token>) -> Self {
    let mut tokens = tokens;
    if tokens.is_empty() {
      tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        line: 1,
        column: 1,
      });
    }
    Parser {
      tokens,
      position: 0,
    }
  }

  /// ### PARSE
  pub fn parse(mut self) -> Result<Document, ParseError> {
    let mut document = Document::default();
    while !self.check(TokenKind::Eof) {
      self.parse_statement(&mut document)?;
    }
    Ok(document)
  }

  fn peek(&self) -> &Token {
    &self.tokens[self.position.min(self.tokens.len() - 1)]
  }

  fn check(&self, kind: TokenKind) -> bool {
    self.peek().kind == kind
  }

  fn advance(&mut self) -> Token {
    let token = self.peek().clone();
    if !token.is(TokenKind::Eof) {
      self.position += 1;
    }
    token
  }

  fn error_at(token: &Token, kind: ParseErrorKind, message: &str) -> ParseError {
    ParseError {
      kind,
      line: token.line,
      column: token.column,
      message: message.to_string(),
    }
  }

  fn expect(
    &mut self,
    kind: TokenKind,
    error_kind: ParseErrorKind,
    message: &str,
  ) -> Result<Token, ParseError> {
    if self.check(kind) {
      Ok(self.advance())
    } else {
      Err(Self::error_at(self.peek(), error_kind, message))
    }
  }

  fn parse_statement(&mut self, document: &mut Document) -> Result<(), ParseError> {
    match self.peek().kind {
      TokenKind::KwIf => {
        document.conditions.push(self.parse_if_rule()?);
        Ok(())
      },
      TokenKind::KwEvery => {
        document.timers.push(self.parse_every_rule()?);
        Ok(())
      },
      TokenKind::Identifier => {
        document.messages.push(self.parse_message_def()?);
        Ok(())
      },
      _ => Err(Self::error_at(
        self.peek(),
        ParseErrorKind::UnexpectedToken,
        "expected a message definition, 'if' rule, or 'every' rule",
      )),
    }
  }

  fn parse_message_def(&mut self) -> Result<MessageDef, ParseError> {
    let first = self.expect(
      TokenKind::Identifier,
      ParseErrorKind::ExpectedIdentifier,
      "expected message name or stream-function",
    )?;
    let (name, sf_token) = if self.check(TokenKind::Colon) {
      self.advance();
      let sf_token = self.expect(
        TokenKind::Identifier,
        ParseErrorKind::ExpectedIdentifier,
        "expected stream-function after message name",
      )?;
      (Some(first.text), sf_token)
    } else {
      (None, first)
    };
    let (stream, function) = parse_sf(&sf_token.text).ok_or_else(|| {
      Self::error_at(
        &sf_token,
        ParseErrorKind::UnexpectedToken,
        "expected a stream-function of the form SxFy",
      )
    })?;
    if stream > 127 || function > 255 {
      return Err(Self::error_at(
        &sf_token,
        ParseErrorKind::InvalidStreamFunction,
        "stream must be 0..=127 and function 0..=255",
      ));
    }
    let w_bit = if self.check(TokenKind::KwW) {
      self.advance();
      true
    } else {
      false
    };
    let template = if self.check(TokenKind::LAngle) {
      Some(self.parse_item()?)
    } else {
      None
    };
    self.expect(
      TokenKind::Dot,
      ParseErrorKind::UnexpectedToken,
      "expected '.' ending the message definition",
    )?;
    Ok(MessageDef {
      name,
      stream: stream as u8,
      function: function as u8,
      w_bit,
      template,
    })
  }

  fn parse_if_rule(&mut self) -> Result<ConditionRule, ParseError> {
    self.advance(); // if
    self.expect(
      TokenKind::LParen,
      ParseErrorKind::UnexpectedToken,
      "expected '(' after 'if'",
    )?;
    let condition = self.parse_condition()?;
    self.expect(
      TokenKind::RParen,
      ParseErrorKind::UnexpectedToken,
      "expected ')' closing the condition",
    )?;
    let response = self.expect(
      TokenKind::Identifier,
      ParseErrorKind::ExpectedIdentifier,
      "expected response message name",
    )?;
    self.expect(
      TokenKind::Dot,
      ParseErrorKind::UnexpectedToken,
      "expected '.' ending the 'if' rule",
    )?;
    Ok(ConditionRule {
      condition,
      response_name: response.text,
    })
  }

  fn parse_every_rule(&mut self) -> Result<TimerRule, ParseError> {
    self.advance(); // every
    let interval_token = self.expect(
      TokenKind::Integer,
      ParseErrorKind::ExpectedNumber,
      "expected interval in seconds",
    )?;
    let interval = parse_integer(&interval_token.text)
      .and_then(|value| u32::try_from(value).ok())
      .ok_or_else(|| {
        Self::error_at(
          &interval_token,
          ParseErrorKind::ExpectedNumber,
          "interval out of range",
        )
      })?;
    self.expect(
      TokenKind::KwSend,
      ParseErrorKind::UnexpectedToken,
      "expected 'send'",
    )?;
    let message = self.expect(
      TokenKind::Identifier,
      ParseErrorKind::ExpectedIdentifier,
      "expected message name",
    )?;
    self.expect(
      TokenKind::Dot,
      ParseErrorKind::UnexpectedToken,
      "expected '.' ending the 'every' rule",
    )?;
    Ok(TimerRule {
      interval_seconds: interval,
      message_name: message.text,
    })
  }

  fn parse_condition(&mut self) -> Result<Condition, ParseError> {
    let name = self.expect(
      TokenKind::Identifier,
      ParseErrorKind::ExpectedIdentifier,
      "expected message name in condition",
    )?;
    let index = if self.check(TokenKind::LParen) {
      self.advance();
      let index_token = self.expect(
        TokenKind::Integer,
        ParseErrorKind::ExpectedNumber,
        "expected 1-based index",
      )?;
      let index = parse_integer(&index_token.text)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| {
          Self::error_at(
            &index_token,
            ParseErrorKind::ExpectedNumber,
            "index out of range",
          )
        })?;
      self.expect(
        TokenKind::RParen,
        ParseErrorKind::UnexpectedToken,
        "expected ')' after index",
      )?;
      Some(index)
    } else {
      None
    };
    let expected = if self.check(TokenKind::Equals) {
      let equals = self.advance();
      let template = self.parse_item()?;
      Some(template_to_item(&template).ok_or_else(|| {
        Self::error_at(
          &equals,
          ParseErrorKind::InvalidCondition,
          "condition items must be fully literal",
        )
      })?)
    } else {
      None
    };
    Ok(Condition {
      message_name: name.text,
      index,
      expected,
    })
  }

  /// Parses one `<type body>` item. The opening angle's coordinates anchor
  /// the unclosed-item diagnostic.
  fn parse_item(&mut self) -> Result<ItemTemplate, ParseError> {
    let open = self.expect(
      TokenKind::LAngle,
      ParseErrorKind::ExpectedItem,
      "expected item",
    )?;
    let type_token = self.advance();
    if !type_token.kind.is_item_type() {
      return Err(Self::error_at(
        &type_token,
        ParseErrorKind::ExpectedItem,
        "expected an item type",
      ));
    }
    let template = match type_token.kind {
      TokenKind::KwL => {
        // The size hint is advisory and not enforced.
        if self.check(TokenKind::LBracket) {
          self.advance();
          self.expect(
            TokenKind::Integer,
            ParseErrorKind::ExpectedNumber,
            "expected list size hint",
          )?;
          self.expect(
            TokenKind::RBracket,
            ParseErrorKind::UnexpectedToken,
            "expected ']' after size hint",
          )?;
        }
        let mut items = vec![];
        while self.check(TokenKind::LAngle) {
          items.push(self.parse_item()?);
        }
        ItemTemplate::List(items)
      },
      TokenKind::KwA => {
        let body = if self.check(TokenKind::String) {
          Some(AsciiBody::Literal(self.advance().text.into_bytes()))
        } else if self.check(TokenKind::Identifier) {
          Some(AsciiBody::Var(self.advance().text))
        } else {
          None
        };
        ItemTemplate::Ascii(body)
      },
      TokenKind::KwB => ItemTemplate::Bin(self.parse_integer_values::<u8>()?),
      TokenKind::KwBoolean => ItemTemplate::Bool(self.parse_boolean_values()?),
      TokenKind::KwI1 => ItemTemplate::I1(self.parse_integer_values::<i8>()?),
      TokenKind::KwI2 => ItemTemplate::I2(self.parse_integer_values::<i16>()?),
      TokenKind::KwI4 => ItemTemplate::I4(self.parse_integer_values::<i32>()?),
      TokenKind::KwI8 => ItemTemplate::I8(self.parse_integer_values::<i64>()?),
      TokenKind::KwU1 => ItemTemplate::U1(self.parse_integer_values::<u8>()?),
      TokenKind::KwU2 => ItemTemplate::U2(self.parse_integer_values::<u16>()?),
      TokenKind::KwU4 => ItemTemplate::U4(self.parse_integer_values::<u32>()?),
      TokenKind::KwU8 => ItemTemplate::U8(self.parse_integer_values::<u64>()?),
      TokenKind::KwF4 => {
        ItemTemplate::F4(self.parse_float_values()?.into_iter().map(to_f4).collect())
      },
      TokenKind::KwF8 => ItemTemplate::F8(self.parse_float_values()?),
      _ => unreachable!("guarded by is_item_type"),
    };
    if !self.check(TokenKind::RAngle) {
      return Err(Self::error_at(
        &open,
        ParseErrorKind::UnclosedItem,
        "unclosed item",
      ));
    }
    self.advance();
    Ok(template)
  }

  /// Integer-typed bodies: literals and variable references until the
  /// closing angle.
  fn parse_integer_values<T: TryFrom<i64>>(
    &mut self,
  ) -> Result<Vec<ValueExpr<T>>, ParseError> {
    let mut values = vec![];
    loop {
      if self.check(TokenKind::Identifier) {
        values.push(ValueExpr::Var(self.advance().text));
      } else if self.check(TokenKind::Integer) {
        let token = self.advance();
        let value = parse_integer(&token.text)
          .and_then(|value| T::try_from(value).ok())
          .ok_or_else(|| {
            Self::error_at(&token, ParseErrorKind::ExpectedNumber, "value out of range")
          })?;
        values.push(ValueExpr::Literal(value));
      } else {
        return Ok(values);
      }
    }
  }

  /// Boolean bodies: integer literals, zero meaning false, and variable
  /// references.
  fn parse_boolean_values(&mut self) -> Result<Vec<ValueExpr<bool>>, ParseError> {
    let mut values = vec![];
    loop {
      if self.check(TokenKind::Identifier) {
        values.push(ValueExpr::Var(self.advance().text));
      } else if self.check(TokenKind::Integer) {
        let token = self.advance();
        let value = parse_integer(&token.text).ok_or_else(|| {
          Self::error_at(&token, ParseErrorKind::ExpectedNumber, "value out of range")
        })?;
        values.push(ValueExpr::Literal(value != 0));
      } else {
        return Ok(values);
      }
    }
  }

  /// Float bodies: integer and float literals, and variable references.
  fn parse_float_values(&mut self) -> Result<Vec<ValueExpr<f64>>, ParseError> {
    let mut values = vec![];
    loop {
      if self.check(TokenKind::Identifier) {
        values.push(ValueExpr::Var(self.advance().text));
      } else if self.check(TokenKind::Integer) || self.check(TokenKind::Float) {
        let token = self.advance();
        let value = token.text.parse::<f64>().ok().or_else(|| {
          // Hex integers are valid float-item literals too.
          parse_integer(&token.text).map(|value| value as f64)
        });
        let value = value.ok_or_else(|| {
          Self::error_at(&token, ParseErrorKind::ExpectedNumber, "value out of range")
        })?;
        values.push(ValueExpr::Literal(value));
      } else {
        return Ok(values);
      }
    }
  }
}

fn to_f4(value: ValueExpr<f64>) -> ValueExpr<f32> {
  match value {
    ValueExpr::Literal(value) => ValueExpr::Literal(value as f32),
    ValueExpr::Var(name) => ValueExpr::Var(name),
  }
}

/// Decimal or `0x` hexadecimal, with an optional sign.
fn parse_integer(text: &str) -> Option<i64> {
  let (negative, rest) = match text.as_bytes().first() {
    Some(b'-') => (true, &text[1..]),
    Some(b'+') => (false, &text[1..]),
    _ => (false, text),
  };
  let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
    i64::from_str_radix(hex, 16).ok()?
  } else {
    rest.parse::<i64>().ok()?
  };
  Some(if negative { -magnitude } else { magnitude })
}

/// A condition's expected item must be fully literal; any variable
/// reference makes the conversion fail.
fn template_to_item(template: &ItemTemplate) -> Option<Item> {
  fn literals<T: Clone>(values: &[ValueExpr<T>]) -> Option<Vec<T>> {
    values
      .iter()
      .map(|value| match value {
        ValueExpr::Literal(value) => Some(value.clone()),
        ValueExpr::Var(_) => None,
      })
      .collect()
  }
  Some(match template {
    ItemTemplate::List(items) => Item::List(
      items
        .iter()
        .map(template_to_item)
        .collect::<Option<Vec<Item>>>()?,
    ),
    ItemTemplate::Ascii(None) => Item::Ascii(vec![]),
    ItemTemplate::Ascii(Some(AsciiBody::Literal(bytes))) => Item::Ascii(bytes.clone()),
    ItemTemplate::Ascii(Some(AsciiBody::Var(_))) => return None,
    ItemTemplate::Bin(values) => Item::Bin(literals(values)?),
    ItemTemplate::Bool(values) => Item::Bool(literals(values)?),
    ItemTemplate::I1(values) => Item::I1(literals(values)?),
    ItemTemplate::I2(values) => Item::I2(literals(values)?),
    ItemTemplate::I4(values) => Item::I4(literals(values)?),
    ItemTemplate::I8(values) => Item::I8(literals(values)?),
    ItemTemplate::U1(values) => Item::U1(literals(values)?),
    ItemTemplate::U2(values) => Item::U2(literals(values)?),
    ItemTemplate::U4(values) => Item::U4(literals(values)?),
    ItemTemplate::U8(values) => Item::U8(literals(values)?),
    ItemTemplate::F4(values) => Item::F4(literals(values)?),
    ItemTemplate::F8(values) => Item::F8(literals(values)?),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Lexer;

  fn parse(source: &str) -> Result<Document, ParseError> {
    Parser::new(Lexer::new(source).tokenize().unwrap()).parse()
  }

  #[test]
  fn named_and_anonymous_messages_parse() {
    let document = parse(
      "s1f1: S1F1 W <L>.\n\
       S2F17.\n",
    )
    .unwrap();
    assert_eq!(document.messages.len(), 2);
    let named = &document.messages[0];
    assert_eq!(named.name.as_deref(), Some("s1f1"));
    assert_eq!((named.stream, named.function, named.w_bit), (1, 1, true));
    assert_eq!(named.template, Some(ItemTemplate::List(vec![])));
    let anonymous = &document.messages[1];
    assert_eq!(anonymous.name, None);
    assert_eq!((anonymous.stream, anonymous.function), (2, 17));
    assert_eq!(anonymous.template, None);
  }

  #[test]
  fn nested_items_with_all_bodies_parse() {
    let document = parse(
      "m: S6F11 <L [3] <A \"id\"> <B 0x01 0x02> <U4 10 20 VALUES> <F8 0.5 -1.5e3>>.\n",
    )
    .unwrap();
    let template = document.messages[0].template.as_ref().unwrap();
    let ItemTemplate::List(items) = template else {
      panic!("expected list");
    };
    assert_eq!(items.len(), 4);
    assert_eq!(
      items[0],
      ItemTemplate::Ascii(Some(AsciiBody::Literal(b"id".to_vec())))
    );
    assert_eq!(
      items[1],
      ItemTemplate::Bin(vec![ValueExpr::Literal(1), ValueExpr::Literal(2)])
    );
    assert_eq!(
      items[2],
      ItemTemplate::U4(vec![
        ValueExpr::Literal(10),
        ValueExpr::Literal(20),
        ValueExpr::Var("VALUES".to_string()),
      ])
    );
    assert_eq!(
      items[3],
      ItemTemplate::F8(vec![ValueExpr::Literal(0.5), ValueExpr::Literal(-1.5e3)])
    );
  }

  #[test]
  fn if_and_every_rules_parse() {
    let document = parse(
      "if (s1f1) s1f2.\n\
       if (S1F3(2) == <U4 7>) s1f4.\n\
       every 30 send s1f1.\n",
    )
    .unwrap();
    assert_eq!(document.conditions.len(), 2);
    assert_eq!(document.conditions[0].condition.message_name, "s1f1");
    assert_eq!(document.conditions[0].condition.index, None);
    assert_eq!(document.conditions[0].response_name, "s1f2");
    let second = &document.conditions[1];
    assert_eq!(second.condition.index, Some(2));
    assert_eq!(second.condition.expected, Some(Item::U4(vec![7])));
    assert_eq!(
      document.timers,
      vec![TimerRule {
        interval_seconds: 30,
        message_name: "s1f1".to_string(),
      }]
    );
  }

  #[test]
  fn out_of_range_stream_function_is_rejected() {
    let error = parse("S200F1.").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::InvalidStreamFunction);
    let error = parse("S1F300.").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::InvalidStreamFunction);
  }

  #[test]
  fn unclosed_item_points_at_the_opening_angle() {
    let error = parse("S1F1 <L <A \"x\"> .").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::UnclosedItem);
    assert_eq!((error.line, error.column), (1, 6));
  }

  #[test]
  fn condition_items_must_be_literal() {
    let error = parse("if (s1f1 == <U4 VAR>) s1f2.").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::InvalidCondition);
  }

  #[test]
  fn out_of_range_values_are_rejected_with_position() {
    let error = parse("m: S1F1 <B 256>.").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::ExpectedNumber);
    assert_eq!((error.line, error.column), (1, 12));
  }

  #[test]
  fn statement_garbage_is_an_unexpected_token() {
    let error = parse("<L>.").unwrap_err();
    assert_eq!(error.kind, ParseErrorKind::UnexpectedToken);
  }
}
