//! Single-pass recursive-descent parser producing [`Value`] trees.
//!
//! Works on the UTF-8 bytes of the input; every structural character is
//! ASCII, so string contents can be copied as slices without re-validating
//! them. Text after the first complete value is ignored.

use thiserror::Error;

use super::{Map, Number, Value};

/// Deepest array/object nesting accepted.
pub const MAX_DEPTH: usize = 128;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unterminated string")]
    UnterminatedString,

    #[error("unterminated array")]
    UnterminatedArray,

    #[error("unterminated object")]
    UnterminatedObject,

    #[error("invalid literal")]
    InvalidLiteral,

    #[error("invalid number")]
    InvalidNumber,

    #[error("invalid escape '\\{0}'")]
    InvalidEscape(char),

    #[error("invalid unicode escape")]
    InvalidUnicodeEscape,

    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

/// Parse failure with the byte offset it was detected at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at position {position}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: usize,
}

/// Parses the first complete value in `text`.
///
/// # Errors
/// Returns a [`ParseError`] for malformed input. Empty or whitespace-only
/// input is [`ParseErrorKind::UnexpectedEnd`]. There are no partial results.
pub fn parse(text: &str) -> Result<Value, ParseError> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        depth: 0,
    };
    parser.skip_whitespace();
    parser.parse_value()
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

type ParseResult<T> = std::result::Result<T, ParseError>;

impl Parser<'_> {
    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// The (possibly multi-byte) character at the cursor.
    fn current_char(&self) -> char {
        self.text[self.pos..].chars().next().unwrap_or('\0')
    }

    fn unexpected(&self) -> ParseError {
        self.error(ParseErrorKind::UnexpectedChar(self.current_char()))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(ParseErrorKind::TooDeep));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_value(&mut self) -> ParseResult<Value> {
        match self.peek() {
            None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => self.parse_string().map(Value::String),
            Some(b't') => self.parse_literal("true", Value::Bool(true)),
            Some(b'f') => self.parse_literal("false", Value::Bool(false)),
            Some(b'n') => self.parse_literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.parse_number().map(Value::Number),
            Some(_) => Err(self.unexpected()),
        }
    }

    /// Parses an element inside a container, where running out of input
    /// means the container is unterminated.
    fn parse_element(&mut self, unterminated: ParseErrorKind) -> ParseResult<Value> {
        self.skip_whitespace();
        if self.peek().is_none() {
            return Err(self.error(unterminated));
        }
        self.parse_value()
    }

    fn parse_object(&mut self) -> ParseResult<Value> {
        self.enter()?;
        self.pos += 1;
        let mut map = Map::new();

        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(Value::Object(map));
        }

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'"') => {}
                Some(_) => return Err(self.unexpected()),
                None => return Err(self.error(ParseErrorKind::UnterminatedObject)),
            }
            let key = self.parse_string()?;

            self.skip_whitespace();
            match self.peek() {
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.unexpected()),
                None => return Err(self.error(ParseErrorKind::UnterminatedObject)),
            }

            let value = self.parse_element(ParseErrorKind::UnterminatedObject)?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.unexpected()),
                None => return Err(self.error(ParseErrorKind::UnterminatedObject)),
            }
        }

        self.depth -= 1;
        Ok(Value::Object(map))
    }

    fn parse_array(&mut self) -> ParseResult<Value> {
        self.enter()?;
        self.pos += 1;
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(Value::Array(items));
        }

        loop {
            items.push(self.parse_element(ParseErrorKind::UnterminatedArray)?);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.unexpected()),
                None => return Err(self.error(ParseErrorKind::UnterminatedArray)),
            }
        }

        self.depth -= 1;
        Ok(Value::Array(items))
    }

    fn parse_string(&mut self) -> ParseResult<String> {
        self.pos += 1;
        let mut out = String::new();

        loop {
            let start = self.pos;
            while self.peek().is_some_and(|b| b != b'"' && b != b'\\') {
                self.pos += 1;
            }
            out.push_str(&self.text[start..self.pos]);

            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    self.parse_escape(&mut out)?;
                }
                _ => return Err(self.error(ParseErrorKind::UnterminatedString)),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> ParseResult<()> {
        let Some(byte) = self.peek() else {
            return Err(self.error(ParseErrorKind::UnterminatedString));
        };
        let decoded = match byte {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{0008}',
            b'f' => '\u{000C}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                self.pos += 1;
                let c = self.parse_unicode_escape()?;
                out.push(c);
                return Ok(());
            }
            _ => return Err(self.error(ParseErrorKind::InvalidEscape(self.current_char()))),
        };
        self.pos += 1;
        out.push(decoded);
        Ok(())
    }

    /// Decodes the `XXXX` after `\u`, combining a surrogate pair when the
    /// first unit is a high surrogate.
    fn parse_unicode_escape(&mut self) -> ParseResult<char> {
        let first = self.parse_hex4()?;
        let code = match first {
            0xD800..=0xDBFF => {
                if !self.text[self.pos..].starts_with("\\u") {
                    return Err(self.error(ParseErrorKind::InvalidUnicodeEscape));
                }
                self.pos += 2;
                let second = self.parse_hex4()?;
                if !(0xDC00..=0xDFFF).contains(&second) {
                    return Err(self.error(ParseErrorKind::InvalidUnicodeEscape));
                }
                0x10000 + ((u32::from(first) - 0xD800) << 10) + (u32::from(second) - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(self.error(ParseErrorKind::InvalidUnicodeEscape)),
            other => u32::from(other),
        };
        char::from_u32(code).ok_or_else(|| self.error(ParseErrorKind::InvalidUnicodeEscape))
    }

    fn parse_hex4(&mut self) -> ParseResult<u16> {
        let digits = self
            .bytes
            .get(self.pos..self.pos + 4)
            .filter(|d| d.iter().all(u8::is_ascii_hexdigit))
            .ok_or_else(|| self.error(ParseErrorKind::InvalidUnicodeEscape))?;
        let mut code = 0u16;
        for digit in digits {
            // is_ascii_hexdigit was checked above
            let nibble = (*digit as char).to_digit(16).unwrap_or(0) as u16;
            code = code << 4 | nibble;
        }
        self.pos += 4;
        Ok(code)
    }

    fn parse_literal(&mut self, literal: &str, value: Value) -> ParseResult<Value> {
        if self.text[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(value)
        } else {
            Err(self.error(ParseErrorKind::InvalidLiteral))
        }
    }

    fn parse_number(&mut self) -> ParseResult<Number> {
        let start = self.pos;
        let invalid = |pos| ParseError {
            kind: ParseErrorKind::InvalidNumber,
            position: pos,
        };

        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let int_start = self.pos;
        self.skip_digits();
        let int_digits = &self.bytes[int_start..self.pos];
        if int_digits.is_empty() || (int_digits.len() > 1 && int_digits[0] == b'0') {
            return Err(invalid(start));
        }

        let mut integral = true;
        if self.peek() == Some(b'.') {
            integral = false;
            self.pos += 1;
            if self.skip_digits() == 0 {
                return Err(invalid(start));
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            integral = false;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.skip_digits() == 0 {
                return Err(invalid(start));
            }
        }

        let literal = &self.text[start..self.pos];
        if integral {
            if let Ok(i) = literal.parse::<i64>() {
                return Ok(Number::Int(i));
            }
        }
        literal
            .parse::<f64>()
            .map(Number::Float)
            .map_err(|_| invalid(start))
    }

    fn skip_digits(&mut self) -> usize {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.pos - start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> ParseErrorKind {
        parse(text).unwrap_err().kind
    }

    #[test]
    fn test_parse_returns_std_result() {
        let parsed: Result<Value, ParseError> = parse("[1]");
        assert_eq!(parsed, Ok(Value::Array(vec![Value::from(1)])));

        let failed: Result<Value, ParseError> = parse("[1");
        assert_eq!(failed.map_err(|e| e.kind), Err(ParseErrorKind::UnterminatedArray));
    }

    #[test]
    fn test_parses_nested_structures() {
        let value = parse(r#"{"a":1,"b":[2,3],"c":{"d":4},"e":true,"f":"str","g":null}"#).unwrap();

        assert_eq!(value.get("a"), Some(&Value::from(1)));
        assert_eq!(value.get("b").and_then(|b| b.at(1)), Some(&Value::from(3)));
        assert_eq!(value.get("c").and_then(|c| c.get("d")), Some(&Value::from(4)));
        assert_eq!(value.get("e"), Some(&Value::Bool(true)));
        assert_eq!(value.get("f"), Some(&Value::from("str")));
        assert_eq!(value.get("g"), Some(&Value::Null));
        let keys: Vec<_> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "c", "e", "f", "g"]);
    }

    #[test]
    fn test_numbers() {
        assert!(matches!(parse("42").unwrap(), Value::Number(Number::Int(42))));
        assert!(matches!(parse("-7").unwrap(), Value::Number(Number::Int(-7))));
        assert!(matches!(parse("1.5").unwrap(), Value::Number(Number::Float(f)) if f == 1.5));
        assert!(matches!(parse("2e3").unwrap(), Value::Number(Number::Float(f)) if f == 2000.0));
        assert!(matches!(parse("1E-2").unwrap(), Value::Number(Number::Float(f)) if f == 0.01));
        assert!(matches!(
            parse("9223372036854775808").unwrap(),
            Value::Number(Number::Float(_))
        ));
        assert!(matches!(
            parse("-9223372036854775808").unwrap(),
            Value::Number(Number::Int(i64::MIN))
        ));

        assert_eq!(kind("-"), ParseErrorKind::InvalidNumber);
        assert_eq!(kind("1."), ParseErrorKind::InvalidNumber);
        assert_eq!(kind("1e+"), ParseErrorKind::InvalidNumber);
        assert_eq!(kind("012"), ParseErrorKind::InvalidNumber);
    }

    #[test]
    fn test_string_escapes() {
        let value = parse(r#""a\"b\\c\/d\b\f\n\r\t""#).unwrap();
        assert_eq!(value.as_str(), Some("a\"b\\c/d\u{8}\u{c}\n\r\t"));

        assert_eq!(parse(r#""\u00e9""#).unwrap().as_str(), Some("é"));
        assert_eq!(parse(r#""\ud83d\ude00""#).unwrap().as_str(), Some("😀"));
        assert_eq!(parse("\"héllo wörld\"").unwrap().as_str(), Some("héllo wörld"));

        assert_eq!(kind(r#""\x""#), ParseErrorKind::InvalidEscape('x'));
        assert_eq!(kind(r#""\u12""#), ParseErrorKind::InvalidUnicodeEscape);
        assert_eq!(kind(r#""\ude00""#), ParseErrorKind::InvalidUnicodeEscape);
        assert_eq!(kind(r#""\ud83d x""#), ParseErrorKind::InvalidUnicodeEscape);
        assert_eq!(kind(r#""\ud83dA""#), ParseErrorKind::InvalidUnicodeEscape);
    }

    #[test]
    fn test_unterminated_containers() {
        assert_eq!(kind(r#""abc"#), ParseErrorKind::UnterminatedString);
        assert_eq!(kind(r#""abc\"#), ParseErrorKind::UnterminatedString);
        assert_eq!(kind("[1, 2"), ParseErrorKind::UnterminatedArray);
        assert_eq!(kind("[1,"), ParseErrorKind::UnterminatedArray);
        assert_eq!(kind(r#"{"a":1"#), ParseErrorKind::UnterminatedObject);
        assert_eq!(kind(r#"{"a":"#), ParseErrorKind::UnterminatedObject);
        assert_eq!(kind("{"), ParseErrorKind::UnterminatedObject);
    }

    #[test]
    fn test_unexpected_characters() {
        assert_eq!(kind("[1,]"), ParseErrorKind::UnexpectedChar(']'));
        assert_eq!(kind(r#"{"a":1,}"#), ParseErrorKind::UnexpectedChar('}'));
        assert_eq!(kind(r#"{a:1}"#), ParseErrorKind::UnexpectedChar('a'));
        assert_eq!(kind(r#"{"a" 1}"#), ParseErrorKind::UnexpectedChar('1'));
        assert_eq!(kind("[1 2]"), ParseErrorKind::UnexpectedChar('2'));
        assert_eq!(kind("ü"), ParseErrorKind::UnexpectedChar('ü'));
        assert_eq!(kind("tru"), ParseErrorKind::InvalidLiteral);
        assert_eq!(kind("nul"), ParseErrorKind::InvalidLiteral);
    }

    #[test]
    fn test_empty_input_and_trailing_text() {
        assert_eq!(kind(""), ParseErrorKind::UnexpectedEnd);
        assert_eq!(kind("  \n\t"), ParseErrorKind::UnexpectedEnd);
        assert_eq!(parse("  true  garbage").unwrap(), Value::Bool(true));
        assert_eq!(parse("[1] [2]").unwrap(), Value::Array(vec![Value::from(1)]));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse(&ok).is_ok());

        let too_deep = format!("{}{}", "[".repeat(MAX_DEPTH + 1), "]".repeat(MAX_DEPTH + 1));
        assert_eq!(kind(&too_deep), ParseErrorKind::TooDeep);
    }

    #[test]
    fn test_duplicate_keys_last_value_wins() {
        let value = parse(r#"{"k":1,"other":0,"k":2}"#).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().next(), Some("k"));
        assert_eq!(map.get("k"), Some(&Value::from(2)));
    }

    #[test]
    fn test_error_reports_position() {
        let err = parse("[1, x]").unwrap_err();
        assert_eq!(err.position, 4);
        assert_eq!(err.to_string(), "unexpected character 'x' at position 4");
    }
}
