//! Integer-only JSON parser.
//!
//! Accepts the subset of JSON the serializer emits: objects, arrays, strings,
//! booleans, `null`, and 64-bit signed integers. Floating-point literals are
//! rejected outright so that coefficient values never silently lose
//! precision. Arrays start out on a flat integer fast path and are promoted
//! to generic arrays when the first non-numeric element appears.

use std::fmt;

use thiserror::Error;

use crate::arena::{Arena, NodeId};
use crate::node::NULL_SENTINEL;

/// Parse failure with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("trailing data after document")]
    TrailingData,
    #[error("floating-point numbers are not supported")]
    FloatUnsupported,
    #[error("number out of range for i64")]
    NumberOutOfRange,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("invalid literal")]
    InvalidLiteral,
}

/// Human-oriented error location: line, column, and a caret-annotated excerpt
/// of the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub excerpt: String,
    pub caret: usize,
}

/// Longest excerpt shown in a diagnostic, ellipsis included.
const EXCERPT_MAX: usize = 72;

impl ParseError {
    /// Resolve the byte offset against the source text.
    pub fn diagnostic(&self, src: &str) -> Diagnostic {
        let offset = self.offset.min(src.len());
        let line_start = src[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line_end = src[offset..]
            .find('\n')
            .map_or(src.len(), |i| offset + i);
        let line = src[..line_start].matches('\n').count() + 1;
        let column = src[line_start..offset].chars().count() + 1;

        let full = &src[line_start..line_end];
        let (excerpt, caret) = clip_excerpt(full, column - 1);
        Diagnostic {
            line,
            column,
            excerpt,
            caret,
        }
    }
}

/// Keep the error column visible when the line is longer than the excerpt
/// budget, marking the elided end with an ellipsis. `col` is the 0-based
/// character index of the error; the returned caret is a 1-based column
/// within the excerpt.
fn clip_excerpt(line: &str, col: usize) -> (String, usize) {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= EXCERPT_MAX {
        return (line.to_owned(), col + 1);
    }
    let keep = EXCERPT_MAX - 1;
    if col < keep {
        let head: String = chars[..keep].iter().collect();
        (format!("{head}\u{2026}"), col + 1)
    } else {
        let start = col + 1 - keep;
        let tail: String = chars[start..=col].iter().collect();
        (format!("\u{2026}{tail}"), EXCERPT_MAX)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "line {}, column {}:", self.line, self.column)?;
        writeln!(f, "{}", self.excerpt)?;
        write!(f, "{:>width$}", "^", width = self.caret)
    }
}

/// Parse a complete document into `arena`, returning the root node.
pub fn parse(arena: &mut Arena, src: &str) -> Result<NodeId, ParseError> {
    let mut p = Parser {
        arena,
        bytes: src.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    let root = p.value()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(p.err(ParseErrorKind::TrailingData));
    }
    Ok(root)
}

struct Parser<'a> {
    arena: &'a mut Arena,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            offset: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == b => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.err(ParseErrorKind::UnexpectedChar(c as char))),
            None => Err(self.err(ParseErrorKind::UnexpectedEof)),
        }
    }

    fn value(&mut self) -> Result<NodeId, ParseError> {
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => {
                let s = self.string()?;
                Ok(self.arena.new_string(&s))
            }
            Some(b'-') | Some(b'0'..=b'9') => {
                let v = self.integer()?;
                Ok(self.arena.new_number(v))
            }
            Some(b't') => {
                self.literal(b"true")?;
                Ok(self.arena.new_bool(true))
            }
            Some(b'f') => {
                self.literal(b"false")?;
                Ok(self.arena.new_bool(false))
            }
            Some(b'n') => {
                self.literal(b"null")?;
                Ok(self.arena.new_null())
            }
            Some(c) => Err(self.err(ParseErrorKind::UnexpectedChar(c as char))),
            None => Err(self.err(ParseErrorKind::UnexpectedEof)),
        }
    }

    fn literal(&mut self, word: &[u8]) -> Result<(), ParseError> {
        if self.bytes.len() - self.pos >= word.len()
            && &self.bytes[self.pos..self.pos + word.len()] == word
        {
            self.pos += word.len();
            Ok(())
        } else {
            Err(self.err(ParseErrorKind::InvalidLiteral))
        }
    }

    fn object(&mut self) -> Result<NodeId, ParseError> {
        self.expect(b'{')?;
        let obj = self.arena.new_object();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            self.arena.close_object(obj);
            return Ok(obj);
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let val = self.value()?;
            self.arena.object_add(obj, &key, val);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => return Err(self.err(ParseErrorKind::UnexpectedChar(c as char))),
                None => return Err(self.err(ParseErrorKind::UnexpectedEof)),
            }
        }
        self.arena.close_object(obj);
        Ok(obj)
    }

    /// Arrays accumulate raw integers until the first element that is neither
    /// a number nor `null`; promotion re-materializes the accumulated values
    /// as number nodes in a generic array.
    fn array(&mut self) -> Result<NodeId, ParseError> {
        self.expect(b'[')?;
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(self.arena.int_array_from(&[]));
        }

        let mut ints: Vec<i64> = Vec::new();
        let mut generic: Option<NodeId> = None;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'-') | Some(b'0'..=b'9') if generic.is_none() => {
                    ints.push(self.integer()?);
                }
                Some(b'n') if generic.is_none() => {
                    self.literal(b"null")?;
                    ints.push(NULL_SENTINEL);
                }
                _ => {
                    let arr = match generic {
                        Some(arr) => arr,
                        None => {
                            let arr = self.promote(&ints);
                            ints.clear();
                            generic = Some(arr);
                            arr
                        }
                    };
                    let val = self.value()?;
                    self.arena.array_push(arr, val);
                }
            }
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => return Err(self.err(ParseErrorKind::UnexpectedChar(c as char))),
                None => return Err(self.err(ParseErrorKind::UnexpectedEof)),
            }
        }

        match generic {
            Some(arr) => {
                self.arena.close_array(arr);
                Ok(arr)
            }
            None => Ok(self.arena.int_array_from(&ints)),
        }
    }

    fn promote(&mut self, ints: &[i64]) -> NodeId {
        let arr = self.arena.new_array();
        for &v in ints {
            let n = if v == NULL_SENTINEL {
                self.arena.new_null()
            } else {
                self.arena.new_number(v)
            };
            self.arena.array_push(arr, n);
        }
        arr
    }

    fn integer(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start || (self.pos == start + 1 && self.bytes[start] == b'-') {
            return Err(self.err(ParseErrorKind::InvalidLiteral));
        }
        if matches!(self.peek(), Some(b'.' | b'e' | b'E')) {
            return Err(self.err(ParseErrorKind::FloatUnsupported));
        }
        // validated above: ASCII minus and digits only
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.err(ParseErrorKind::InvalidLiteral))?;
        text.parse::<i64>().map_err(|_| ParseError {
            kind: ParseErrorKind::NumberOutOfRange,
            offset: start,
        })
    }

    /// Decode a quoted string. Unicode escapes are carried through verbatim
    /// (validated but not expanded) so that output round-trips byte for byte.
    fn string(&mut self) -> Result<String, ParseError> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err(ParseErrorKind::UnterminatedString)),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'b') => out.push('\u{8}'),
                        Some(b'f') => out.push('\u{c}'),
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'u') => {
                            if self.bytes.len() - self.pos < 5
                                || !self.bytes[self.pos + 1..self.pos + 5]
                                    .iter()
                                    .all(u8::is_ascii_hexdigit)
                            {
                                return Err(self.err(ParseErrorKind::InvalidEscape));
                            }
                            out.push_str("\\u");
                            for &b in &self.bytes[self.pos + 1..self.pos + 5] {
                                out.push(b as char);
                            }
                            self.pos += 4;
                        }
                        _ => return Err(self.err(ParseErrorKind::InvalidEscape)),
                    }
                    self.pos += 1;
                }
                Some(b) if b < 0x80 => {
                    out.push(b as char);
                    self.pos += 1;
                }
                Some(_) => {
                    // multi-byte UTF-8 sequence, copy it whole
                    let rest = &self.bytes[self.pos..];
                    let s = std::str::from_utf8(rest)
                        .map_err(|_| self.err(ParseErrorKind::InvalidLiteral))?;
                    let ch = s
                        .chars()
                        .next()
                        .ok_or_else(|| self.err(ParseErrorKind::UnterminatedString))?;
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn parse_one(src: &str) -> (Arena, NodeId) {
        let mut arena = Arena::new();
        let root = parse(&mut arena, src).unwrap();
        (arena, root)
    }

    #[test]
    fn test_scalars() {
        let (arena, root) = parse_one("42");
        assert_eq!(arena.as_i64(root), Some(42));
        let (arena, root) = parse_one("-7");
        assert_eq!(arena.as_i64(root), Some(-7));
        let (arena, root) = parse_one("null");
        assert!(arena.is_null(root));
        let (arena, root) = parse_one("true");
        assert_eq!(arena.as_bool(root), Some(true));
        let (arena, root) = parse_one("\"mv\"");
        assert_eq!(arena.as_str(root), Some("mv"));
    }

    #[test]
    fn test_all_numeric_array_stays_flat() {
        let (arena, root) = parse_one("[1, 2, 3]");
        match arena.node(root) {
            Node::IntArray(a) => assert_eq!(a.values(), [1, 2, 3]),
            other => panic!("expected int array, got {other:?}"),
        }
    }

    #[test]
    fn test_null_in_numeric_array_stays_flat() {
        let (arena, root) = parse_one("[1, null, 3]");
        match arena.node(root) {
            Node::IntArray(a) => assert_eq!(a.values(), [1, NULL_SENTINEL, 3]),
            other => panic!("expected int array, got {other:?}"),
        }
    }

    #[test]
    fn test_promotion_on_non_numeric() {
        let (arena, root) = parse_one("[1, 2, \"x\", 4]");
        match arena.node(root) {
            Node::Array(a) => {
                assert_eq!(a.len(), 4);
                assert_eq!(arena.as_i64(a.items()[0]), Some(1));
                assert_eq!(arena.as_str(a.items()[2]), Some("x"));
                assert_eq!(arena.as_i64(a.items()[3]), Some(4));
            }
            other => panic!("expected generic array, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_object() {
        let (arena, root) = parse_one(r#"{"streams": [{"codec": "mpeg2video", "frames": []}]}"#);
        let streams = arena.object_get(root, "streams").unwrap();
        let first = match arena.node(streams) {
            Node::Array(a) => a.items()[0],
            other => panic!("expected array, got {other:?}"),
        };
        let codec = arena.object_get(first, "codec").unwrap();
        assert_eq!(arena.as_str(codec), Some("mpeg2video"));
    }

    #[test]
    fn test_float_rejected() {
        let mut arena = Arena::new();
        let err = parse(&mut arena, "[1.5]").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::FloatUnsupported);
        let err = parse(&mut arena, "1e3").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::FloatUnsupported);
    }

    #[test]
    fn test_trailing_data() {
        let mut arena = Arena::new();
        let err = parse(&mut arena, "{} {}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingData);
    }

    #[test]
    fn test_unicode_escape_verbatim() {
        let (arena, root) = parse_one(r#""a\u00e9b""#);
        assert_eq!(arena.as_str(root), Some("a\\u00e9b"));
        let (arena, root) = parse_one("\"aéb\"");
        assert_eq!(arena.as_str(root), Some("aéb"));
    }

    #[test]
    fn test_diagnostic_location() {
        let src = "{\n  \"a\": 1,\n  \"b\": @\n}";
        let mut arena = Arena::new();
        let err = parse(&mut arena, src).unwrap_err();
        let diag = err.diagnostic(src);
        assert_eq!(diag.line, 3);
        assert_eq!(diag.column, 8);
        assert_eq!(diag.excerpt, "  \"b\": @");
        assert_eq!(diag.caret, 8);
    }

    #[test]
    fn test_diagnostic_long_line_clipped() {
        let mut src = String::from("[");
        for i in 0..60 {
            src.push_str(&format!("{i},"));
        }
        src.push('@');
        let mut arena = Arena::new();
        let err = parse(&mut arena, &src).unwrap_err();
        let diag = err.diagnostic(&src);
        assert_eq!(diag.line, 1);
        assert!(diag.excerpt.chars().count() <= 72);
        assert!(diag.excerpt.starts_with('\u{2026}'));
    }
}
