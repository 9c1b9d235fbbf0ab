//! Reader for `ecosystem.config.js` modules.
//!
//! Only the declarative subset of JavaScript that ecosystem files use is
//! understood: one object literal, assigned to `module.exports` or
//! exported with `export default`. Object keys may be bare identifiers
//! or quoted, strings may use any of the three quote styles (without
//! `${}` interpolation), and comments and trailing commas are allowed
//! anywhere whitespace is.

use std::fmt;

use serde_json::{Map, Number, Value};

/// Error raised when the module text is outside the supported subset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    /// 1-based line of the offending character.
    pub line: usize,

    /// 1-based column (in characters) of the offending character.
    pub column: usize,

    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {} column {}",
            self.message, self.line, self.column
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Parses an ecosystem module and returns the exported object.
pub fn parse(text: &str) -> Result<Value, SyntaxError> {
    let mut parser = Parser::new(text);

    parser.skip_trivia()?;
    parser.directive()?;
    parser.export_prefix()?;

    let value = parser.value()?;

    parser.skip_trivia()?;
    if parser.eat(';') {
        parser.skip_trivia()?;
    }

    if parser.peek().is_some() {
        return Err(parser.error("Unexpected content after the exported object"));
    }

    Ok(value)
}

#[derive(Copy, Clone, Debug)]
struct Position {
    offset: usize,
    line: usize,
    column: usize,
}

struct Parser<'a> {
    text: &'a str,
    pos: Position,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: Position {
                offset: 0,
                line: 1,
                column: 1,
            },
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos.offset += c.len_utf8();
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("Expected `{expected}`")))
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        error_at(self.pos, message)
    }

    /// Skips whitespace and both comment styles.
    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(error_at(start, "Unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Consumes a leading `'use strict';` directive, if there is one.
    fn directive(&mut self) -> Result<(), SyntaxError> {
        if !matches!(self.peek(), Some('\'' | '"')) {
            return Ok(());
        }

        let saved = self.pos;
        if self.string()? == "use strict" {
            self.skip_trivia()?;
            self.eat(';');
            self.skip_trivia()?;
        } else {
            self.pos = saved;
        }

        Ok(())
    }

    fn export_prefix(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        match self.identifier().as_deref() {
            Some("module") => {
                self.skip_trivia()?;
                self.expect('.')?;
                self.skip_trivia()?;
                if self.identifier().as_deref() != Some("exports") {
                    return Err(self.error("Expected `exports`"));
                }
                self.skip_trivia()?;
                self.expect('=')?;
            }
            Some("export") => {
                self.skip_trivia()?;
                if self.identifier().as_deref() != Some("default") {
                    return Err(self.error("Expected `default`"));
                }
            }
            _ => {
                return Err(error_at(
                    start,
                    "Expected `module.exports =` or `export default`",
                ))
            }
        }

        Ok(())
    }

    fn identifier(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !is_identifier_start(first) {
            return None;
        }

        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if !is_identifier_part(c) {
                break;
            }
            ident.push(c);
            self.bump();
        }

        Some(ident)
    }

    fn value(&mut self) -> Result<Value, SyntaxError> {
        self.skip_trivia()?;

        match self.peek() {
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"' | '\'' | '`') => self.string().map(Value::String),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(c) if is_identifier_start(c) => {
                let start = self.pos;
                match self.identifier().as_deref() {
                    Some("true") => Ok(Value::Bool(true)),
                    Some("false") => Ok(Value::Bool(false)),
                    Some("null") => Ok(Value::Null),
                    Some(other) => Err(error_at(
                        start,
                        format!("Unsupported expression `{other}`; only literal values are allowed"),
                    )),
                    None => Err(error_at(start, "Expected a value")),
                }
            }
            Some(_) => Err(self.error("Expected a value")),
            None => Err(self.error("Unexpected end of input")),
        }
    }

    fn object(&mut self) -> Result<Value, SyntaxError> {
        self.expect('{')?;
        let mut map = Map::new();

        loop {
            self.skip_trivia()?;
            if self.eat('}') {
                break;
            }

            let key = match self.peek() {
                Some('"' | '\'' | '`') => self.string()?,
                Some(c) if c.is_ascii_digit() => self.number()?.to_string(),
                Some(c) if is_identifier_start(c) => self.identifier().unwrap_or_default(),
                Some(_) => return Err(self.error("Expected a property name")),
                None => return Err(self.error("Unterminated object")),
            };

            self.skip_trivia()?;
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_trivia()?;
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                break;
            }
            return Err(self.error("Expected `,` or `}`"));
        }

        Ok(Value::Object(map))
    }

    fn array(&mut self) -> Result<Value, SyntaxError> {
        self.expect('[')?;
        let mut items = Vec::new();

        loop {
            self.skip_trivia()?;
            if self.eat(']') {
                break;
            }

            items.push(self.value()?);

            self.skip_trivia()?;
            if self.eat(',') {
                continue;
            }
            if self.eat(']') {
                break;
            }
            return Err(self.error("Expected `,` or `]`"));
        }

        Ok(Value::Array(items))
    }

    fn string(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        let quote = match self.bump() {
            Some(q @ ('"' | '\'' | '`')) => q,
            _ => return Err(error_at(start, "Expected a string")),
        };

        let mut s = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => return Err(error_at(start, "Unterminated string")),
            };

            match c {
                c if c == quote => break,
                '\n' if quote != '`' => return Err(error_at(start, "Unterminated string")),
                '$' if quote == '`' && self.peek() == Some('{') => {
                    return Err(self.error("Template interpolation is not supported"));
                }
                '\\' => {
                    if let Some(escaped) = self.escape()? {
                        s.push(escaped);
                    }
                }
                c => s.push(c),
            }
        }

        Ok(s)
    }

    /// Decodes the character after a backslash. Returns `None` for a
    /// line continuation.
    fn escape(&mut self) -> Result<Option<char>, SyntaxError> {
        let start = self.pos;
        let c = match self.bump() {
            Some(c) => c,
            None => return Err(error_at(start, "Unterminated escape sequence")),
        };

        Ok(Some(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            '\n' => return Ok(None),
            'x' => {
                let code = self.hex_digits(2, start)?;
                char::from_u32(code).ok_or_else(|| error_at(start, "Invalid hex escape"))?
            }
            'u' => self.unicode_escape(start)?,
            other => other,
        }))
    }

    /// Decodes the rest of a `\u` escape: `XXXX`, `{X...}`, or a
    /// surrogate pair written as two `\uXXXX` escapes.
    fn unicode_escape(&mut self, start: Position) -> Result<char, SyntaxError> {
        let invalid = || error_at(start, "Invalid unicode escape");

        if self.eat('{') {
            let mut code = 0u32;
            let mut digits = 0;
            while let Some(digit) = self.peek().and_then(|c| c.to_digit(16)) {
                self.bump();
                digits += 1;
                if digits > 6 {
                    return Err(invalid());
                }
                code = code * 16 + digit;
            }
            if digits == 0 || !self.eat('}') {
                return Err(invalid());
            }
            return char::from_u32(code).ok_or_else(invalid);
        }

        let code = self.hex_digits(4, start)?;
        if (0xD800..=0xDBFF).contains(&code) {
            if !(self.eat('\\') && self.eat('u')) {
                return Err(invalid());
            }
            let low = self.hex_digits(4, start)?;
            if !(0xDC00..=0xDFFF).contains(&low) {
                return Err(invalid());
            }
            let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(combined).ok_or_else(invalid);
        }

        char::from_u32(code).ok_or_else(invalid)
    }

    fn hex_digits(&mut self, count: usize, start: Position) -> Result<u32, SyntaxError> {
        let mut code = 0u32;
        for _ in 0..count {
            let digit = self
                .bump()
                .and_then(|d| d.to_digit(16))
                .ok_or_else(|| error_at(start, "Invalid hex escape"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn number(&mut self) -> Result<Value, SyntaxError> {
        let start = self.pos;
        let mut negative = false;

        if let Some(sign @ ('-' | '+')) = self.peek() {
            negative = sign == '-';
            self.bump();
        }

        let radix = match (self.peek(), self.peek_second()) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('o' | 'O')) => 8,
            (Some('0'), Some('b' | 'B')) => 2,
            _ => 10,
        };

        let mut literal = String::new();
        if radix == 10 {
            while let Some(c) = self.peek() {
                let exponent_sign =
                    matches!(c, '-' | '+') && matches!(literal.chars().last(), Some('e' | 'E'));
                if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_') || exponent_sign {
                    if c != '_' {
                        literal.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
        } else {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if !(c.is_ascii_alphanumeric() || c == '_') {
                    break;
                }
                if c != '_' {
                    literal.push(c);
                }
                self.bump();
            }
        }

        let invalid = || error_at(start, format!("Invalid number `{literal}`"));

        if radix == 10 && literal.contains(['.', 'e', 'E']) {
            let float: f64 = literal.parse().map_err(|_| invalid())?;
            let float = if negative { -float } else { float };
            return Number::from_f64(float).map(Value::Number).ok_or_else(invalid);
        }

        if literal.is_empty() || !literal.chars().all(|c| c.is_digit(radix)) {
            return Err(invalid());
        }

        // Integers past the 64-bit range become floats, as in JavaScript.
        let integer = u64::from_str_radix(&literal, radix).ok().and_then(|magnitude| {
            if negative {
                i64::try_from(-i128::from(magnitude)).ok().map(Number::from)
            } else {
                Some(Number::from(magnitude))
            }
        });

        match integer {
            Some(number) => Ok(Value::Number(number)),
            None => {
                let magnitude = if radix == 10 {
                    literal.parse().map_err(|_| invalid())?
                } else {
                    literal
                        .chars()
                        .filter_map(|c| c.to_digit(radix))
                        .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d))
                };
                let float = if negative { -magnitude } else { magnitude };
                Number::from_f64(float).map(Value::Number).ok_or_else(invalid)
            }
        }
    }
}

fn error_at(pos: Position, message: impl Into<String>) -> SyntaxError {
    SyntaxError {
        line: pos.line,
        column: pos.column,
        message: message.into(),
    }
}

pub(crate) fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
