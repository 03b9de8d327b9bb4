// src/gps/token.rs
//! NMEA sentence tokenizer and scalar field converters

/// Maximum number of fields retained from one sentence.
pub const MAX_TOKENS: usize = 32;

/// A borrowed field span into the sentence buffer.
///
/// Tokens never own memory and are only valid for the duration of one
/// parse call. An absent field is represented by the empty token, never
/// by an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a>(&'a [u8]);

impl<'a> Token<'a> {
    pub fn empty() -> Token<'a> {
        Token(&[])
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First byte of the field, if any.
    pub fn first(&self) -> Option<u8> {
        self.0.first().copied()
    }

    /// Sub-span `[start, end)`, clamped to the token bounds.
    pub fn slice(&self, start: usize, end: usize) -> Token<'a> {
        let end = end.min(self.0.len());
        let start = start.min(end);
        Token(&self.0[start..end])
    }
}

/// Splits one framed sentence into comma-delimited tokens.
///
/// The leading `$`, trailing CR/LF, and a trailing 3-byte `*XX` checksum
/// are stripped before splitting. At most [`MAX_TOKENS`] fields are kept;
/// anything beyond the cap is dropped.
pub struct Tokenizer<'a> {
    tokens: Vec<Token<'a>>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(line: &'a [u8]) -> Self {
        let mut s = line;
        if s.first() == Some(&b'$') {
            s = &s[1..];
        }
        if s.last() == Some(&b'\n') {
            s = &s[..s.len() - 1];
            if s.last() == Some(&b'\r') {
                s = &s[..s.len() - 1];
            }
        }
        if s.len() >= 3 && s[s.len() - 3] == b'*' {
            s = &s[..s.len() - 3];
        }

        let mut tokens = Vec::with_capacity(MAX_TOKENS);
        if !s.is_empty() {
            for field in s.split(|&c| c == b',') {
                if tokens.len() == MAX_TOKENS {
                    break;
                }
                tokens.push(Token(field));
            }
        }
        Self { tokens }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    /// Field at `index`; the empty token when out of range.
    pub fn get(&self, index: usize) -> Token<'a> {
        self.tokens.get(index).copied().unwrap_or_else(Token::empty)
    }
}

/// Parses an unsigned decimal integer field.
///
/// Only ASCII digits are accepted; an empty or malformed field yields the
/// sentinel `-1` rather than an error.
pub fn parse_int(tok: Token) -> i32 {
    let bytes = tok.bytes();
    if bytes.is_empty() {
        return -1;
    }
    let mut result: i32 = 0;
    for &c in bytes {
        if !c.is_ascii_digit() {
            return -1;
        }
        result = result.wrapping_mul(10).wrapping_add((c - b'0') as i32);
    }
    result
}

/// Parses a decimal floating-point field.
///
/// An empty field yields the sentinel `-1.0`. Fields of 16 bytes or more
/// are rejected as `0.0` (defined truncation policy). Otherwise the
/// longest leading numeric prefix is parsed, `0.0` when there is none.
pub fn parse_float(tok: Token) -> f64 {
    let bytes = tok.bytes();
    if bytes.is_empty() {
        return -1.0;
    }
    if bytes.len() >= 16 {
        return 0.0;
    }

    let mut end = 0;
    let mut seen_dot = false;
    for (i, &c) in bytes.iter().enumerate() {
        let ok = match c {
            b'+' | b'-' => i == 0,
            b'.' if seen_dot => false,
            b'.' => {
                seen_dot = true;
                true
            }
            b'0'..=b'9' => true,
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + 1;
    }

    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Converts an NMEA `DDDMM.MMMM` angle field to decimal degrees.
pub fn degrees_minutes(tok: Token) -> f64 {
    let value = parse_float(tok);
    let degrees = (value.floor() / 100.0).floor();
    let minutes = value - degrees * 100.0;
    degrees + minutes / 60.0
}
