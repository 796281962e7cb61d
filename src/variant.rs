use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::alarm::countdown::coerce_integer;

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Variant>),
    Tuple(Vec<Variant>),
    Dict(Vec<(Variant, Variant)>),
    Maybe(Option<Box<Variant>>),
    Boxed(Box<Variant>),
}

impl Variant {
    pub fn unpack(&self) -> &Variant {
        let mut current = self;
        loop {
            match current {
                Variant::Boxed(inner) => current = &**inner,
                Variant::Maybe(Some(inner)) => current = &**inner,
                _ => return current,
            }
        }
    }

    pub fn deep_unpack(&self) -> Variant {
        match self.unpack() {
            Variant::Array(items) => Variant::Array(items.iter().map(Variant::deep_unpack).collect()),
            Variant::Tuple(items) => Variant::Tuple(items.iter().map(Variant::deep_unpack).collect()),
            Variant::Dict(entries) => Variant::Dict(
                entries
                    .iter()
                    .map(|(key, value)| (key.deep_unpack(), value.deep_unpack()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Variant> {
        match self.unpack() {
            Variant::Dict(entries) => entries
                .iter()
                .find(|(candidate, _)| candidate.as_str() == Some(key))
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unpack() {
            Variant::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unpack() {
            Variant::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Variant]> {
        match self.unpack() {
            Variant::Array(items) | Variant::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.unpack() {
            Variant::Int(value) => Some(*value),
            Variant::Double(value) if value.is_finite() => Some(value.trunc() as i64),
            Variant::Double(_) => Some(0),
            Variant::Bool(value) => Some(i64::from(*value)),
            Variant::Str(text) => Some(coerce_integer(text)),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self.unpack() {
            Variant::Bool(value) => *value,
            Variant::Int(value) => *value != 0,
            Variant::Double(value) => *value != 0.0 && !value.is_nan(),
            Variant::Str(text) => !text.is_empty(),
            Variant::Maybe(None) => false,
            _ => true,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Bool(value) => write!(f, "{value}"),
            Variant::Int(value) => write!(f, "{value}"),
            Variant::Double(value) => write!(f, "{value}"),
            Variant::Str(text) => f.write_str(text),
            Variant::Array(items) => write_sequence(f, "[", items, "]"),
            Variant::Tuple(items) => write_sequence(f, "(", items, ")"),
            Variant::Dict(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Variant::Maybe(None) => f.write_str("nothing"),
            Variant::Maybe(Some(inner)) => write!(f, "just {inner}"),
            Variant::Boxed(inner) => write!(f, "<{inner}>"),
        }
    }
}

fn write_sequence(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: &[Variant],
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

impl From<Value> for Variant {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Variant::Maybe(None),
            Value::Bool(value) => Variant::Bool(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => Variant::Int(value),
                None => Variant::Double(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Variant::Str(text),
            Value::Array(items) => Variant::Array(items.into_iter().map(Variant::from).collect()),
            Value::Object(map) => Variant::Dict(
                map.into_iter()
                    .map(|(key, value)| (Variant::Str(key), Variant::from(value)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariantParseError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },
    #[error("unknown keyword '{word}' at offset {offset}")]
    UnknownKeyword { word: String, offset: usize },
    #[error("trailing input at offset {offset}")]
    TrailingInput { offset: usize },
    #[error("value nested too deeply at offset {offset}")]
    TooDeep { offset: usize },
}

// Type annotations and type keywords are dropped; the value shape carries the data.
pub fn parse_variant_text(input: &str) -> Result<Variant, VariantParseError> {
    let mut parser = TextParser {
        input,
        pos: 0,
        depth: 0,
    };
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.pos < input.len() {
        return Err(VariantParseError::TrailingInput { offset: parser.pos });
    }
    Ok(value)
}

pub const MAX_NESTING_DEPTH: usize = 128;

const INTEGER_KEYWORDS: [&str; 8] = [
    "byte", "int16", "uint16", "int32", "uint32", "int64", "uint64", "handle",
];

struct TextParser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl TextParser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn unexpected(&self) -> VariantParseError {
        match self.peek() {
            Some(found) => VariantParseError::UnexpectedChar {
                found,
                offset: self.pos,
            },
            None => VariantParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), VariantParseError> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_value(&mut self) -> Result<Variant, VariantParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(VariantParseError::TooDeep { offset: self.pos });
        }
        self.depth += 1;
        let value = self.parse_nested_value();
        self.depth -= 1;
        value
    }

    fn parse_nested_value(&mut self) -> Result<Variant, VariantParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(VariantParseError::UnexpectedEnd),
            Some('@') => {
                self.bump();
                self.skip_type(0)?;
                self.parse_value()
            }
            Some('<') => {
                self.bump();
                let inner = self.parse_value()?;
                self.expect('>')?;
                Ok(Variant::Boxed(Box::new(inner)))
            }
            Some('[') => self.parse_array(),
            Some('{') => self.parse_dict(),
            Some('(') => self.parse_tuple(),
            Some('\'' | '"') => self.parse_string().map(Variant::Str),
            Some(ch) if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.') => {
                self.parse_number()
            }
            Some(ch) if ch.is_ascii_alphabetic() => self.parse_keyword(),
            Some(_) => Err(self.unexpected()),
        }
    }

    // Consumes exactly one complete type string.
    fn skip_type(&mut self, depth: usize) -> Result<(), VariantParseError> {
        let offset = self.pos;
        if depth >= MAX_NESTING_DEPTH {
            return Err(VariantParseError::TooDeep { offset });
        }
        match self.bump() {
            Some('a' | 'm') => self.skip_type(depth + 1),
            Some('(') => {
                while self.peek() != Some(')') {
                    if self.peek().is_none() {
                        return Err(VariantParseError::UnexpectedEnd);
                    }
                    self.skip_type(depth + 1)?;
                }
                self.bump();
                Ok(())
            }
            Some('{') => {
                self.skip_type(depth + 1)?;
                self.skip_type(depth + 1)?;
                let offset = self.pos;
                match self.bump() {
                    Some('}') => Ok(()),
                    Some(found) => Err(VariantParseError::UnexpectedChar { found, offset }),
                    None => Err(VariantParseError::UnexpectedEnd),
                }
            }
            Some(ch) if "bynqiuxthdsogv*?r".contains(ch) => Ok(()),
            Some(found) => Err(VariantParseError::UnexpectedChar { found, offset }),
            None => Err(VariantParseError::UnexpectedEnd),
        }
    }

    fn parse_array(&mut self) -> Result<Variant, VariantParseError> {
        self.bump();
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Variant::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    return Ok(Variant::Array(items));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_tuple(&mut self) -> Result<Variant, VariantParseError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.bump();
                return Ok(Variant::Tuple(items));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Variant, VariantParseError> {
        self.bump();
        let mut entries = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Variant::Dict(entries));
        }

        let key = self.parse_value()?;
        self.skip_whitespace();
        // `{key, value}` is a lone dict entry rather than a dictionary.
        if self.peek() == Some(',') {
            self.bump();
            let value = self.parse_value()?;
            self.expect('}')?;
            entries.push((key, value));
            return Ok(Variant::Dict(entries));
        }

        self.expect(':')?;
        entries.push((key, self.parse_value()?));
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    let key = self.parse_value()?;
                    self.expect(':')?;
                    entries.push((key, self.parse_value()?));
                }
                Some('}') => {
                    self.bump();
                    return Ok(Variant::Dict(entries));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, VariantParseError> {
        let quote = self.bump().ok_or(VariantParseError::UnexpectedEnd)?;
        let mut text = String::new();
        loop {
            let escape_offset = self.pos;
            match self.bump() {
                None => return Err(VariantParseError::UnexpectedEnd),
                Some(ch) if ch == quote => return Ok(text),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('v') => '\u{b}',
                        Some('a') => '\u{7}',
                        Some('u') => self.parse_unicode_escape(4, escape_offset)?,
                        Some('U') => self.parse_unicode_escape(8, escape_offset)?,
                        Some(ch @ ('\\' | '\'' | '"')) => ch,
                        Some(_) => {
                            return Err(VariantParseError::InvalidEscape {
                                offset: escape_offset,
                            });
                        }
                        None => return Err(VariantParseError::UnexpectedEnd),
                    };
                    text.push(escaped);
                }
                Some(ch) => text.push(ch),
            }
        }
    }

    fn parse_unicode_escape(
        &mut self,
        digits: usize,
        offset: usize,
    ) -> Result<char, VariantParseError> {
        let end = self.pos + digits;
        let hex = self
            .input
            .get(self.pos..end)
            .ok_or(VariantParseError::InvalidEscape { offset })?;
        let code =
            u32::from_str_radix(hex, 16).map_err(|_| VariantParseError::InvalidEscape { offset })?;
        let ch = char::from_u32(code).ok_or(VariantParseError::InvalidEscape { offset })?;
        self.pos = end;
        Ok(ch)
    }

    fn parse_number(&mut self) -> Result<Variant, VariantParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '+' | '.'))
        {
            self.bump();
        }
        let text = &self.input[start..self.pos];
        let invalid = || VariantParseError::InvalidNumber {
            text: text.to_string(),
            offset: start,
        };

        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        if let Some(hex) = unsigned
            .strip_prefix("0x")
            .or_else(|| unsigned.strip_prefix("0X"))
        {
            let magnitude = i64::from_str_radix(hex, 16).map_err(|_| invalid())?;
            return Ok(Variant::Int(if negative { -magnitude } else { magnitude }));
        }

        if let Ok(value) = text.parse::<i64>() {
            return Ok(Variant::Int(value));
        }
        text.parse::<f64>()
            .map(Variant::Double)
            .map_err(|_| invalid())
    }

    fn parse_keyword(&mut self) -> Result<Variant, VariantParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            self.bump();
        }
        let word = &self.input[start..self.pos];
        match word {
            "true" => Ok(Variant::Bool(true)),
            "false" => Ok(Variant::Bool(false)),
            "nothing" => Ok(Variant::Maybe(None)),
            "just" => Ok(Variant::Maybe(Some(Box::new(self.parse_value()?)))),
            "double" => self.parse_value(),
            "objectpath" | "signature" => {
                self.skip_whitespace();
                self.parse_string().map(Variant::Str)
            }
            word if INTEGER_KEYWORDS.contains(&word) => self.parse_value(),
            _ => Err(VariantParseError::UnknownKeyword {
                word: word.to_string(),
                offset: start,
            }),
        }
    }
}
