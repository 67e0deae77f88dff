//! Tokenizer and object parser over an in-memory PDF.

use super::object::{Dictionary, Object, ObjectRef};
use crate::infra::error::{SigningError, SigningResult};

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

fn syntax(msg: impl Into<String>, pos: usize) -> SigningError {
    SigningError::DocumentError(format!("{} at byte {pos}", msg.into()))
}

/// Cursor-based parser. Callers position it at an object or an `n g obj` header.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while self.pos < self.data.len() && !matches!(self.data[self.pos], b'\r' | b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Next run of regular characters, without consuming leading delimiters.
    fn read_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.pos < self.data.len() && is_regular(self.data[self.pos]) {
            self.pos += 1;
        }
        &self.data[start..self.pos]
    }

    /// Consume `keyword` if it is next. Leaves the cursor untouched otherwise.
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let save = self.pos;
        if self.read_token() == keyword.as_bytes() {
            true
        } else {
            self.pos = save;
            false
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> SigningResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{keyword}'"), self.pos))
        }
    }

    pub fn read_unsigned(&mut self) -> SigningResult<u64> {
        self.skip_whitespace();
        let start = self.pos;
        let token = self.read_token();
        std::str::from_utf8(token)
            .ok()
            .and_then(|t| t.parse::<u64>().ok())
            .ok_or_else(|| syntax("expected unsigned integer", start))
    }

    /// Parse one direct object (references included).
    pub fn parse_object(&mut self) -> SigningResult<Object> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            None => Err(syntax("unexpected end of file", start)),
            Some(b'/') => {
                self.pos += 1;
                Ok(Object::Name(self.read_name()?))
            }
            Some(b'(') => Ok(Object::String(self.read_literal_string()?)),
            Some(b'<') => {
                if self.data.get(self.pos + 1) == Some(&b'<') {
                    self.pos += 2;
                    Ok(Object::Dictionary(self.read_dictionary_body()?))
                } else {
                    Ok(Object::HexString(self.read_hex_string()?))
                }
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek() {
                        Some(b']') => {
                            self.pos += 1;
                            break;
                        }
                        None => return Err(syntax("unterminated array", start)),
                        _ => items.push(self.parse_object()?),
                    }
                }
                Ok(Object::Array(items))
            }
            Some(_) => self.parse_keyword_or_number(),
        }
    }

    fn parse_keyword_or_number(&mut self) -> SigningResult<Object> {
        let start = self.pos;
        let token = self.read_token();
        match token {
            b"true" => return Ok(Object::Boolean(true)),
            b"false" => return Ok(Object::Boolean(false)),
            b"null" => return Ok(Object::Null),
            b"" => return Err(syntax("unexpected delimiter", start)),
            _ => {}
        }
        let text = std::str::from_utf8(token).map_err(|_| syntax("invalid token", start))?;
        if text.contains('.') {
            let value = if text.starts_with("-.") || text.starts_with("+.") {
                format!("{}0{}", &text[..1], &text[1..])
            } else {
                text.to_string()
            };
            return value
                .parse::<f64>()
                .map(Object::Real)
                .map_err(|_| syntax(format!("invalid number '{text}'"), start));
        }
        let value = text
            .parse::<i64>()
            .map_err(|_| syntax(format!("unexpected token '{text}'"), start))?;

        // `n g R` lookahead
        if value >= 0 {
            let save = self.pos;
            self.skip_whitespace();
            let gen_token = self.read_token();
            if let Some(gen) = std::str::from_utf8(gen_token)
                .ok()
                .and_then(|g| g.parse::<u16>().ok())
            {
                self.skip_whitespace();
                if self.read_token() == b"R" {
                    return Ok(Object::Reference(ObjectRef::new(value as u32, gen)));
                }
            }
            self.pos = save;
        }
        Ok(Object::Integer(value))
    }

    fn read_name(&mut self) -> SigningResult<String> {
        let raw = self.read_token();
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
            out.push(raw[i]);
            i += 1;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn read_literal_string(&mut self) -> SigningResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;
        let mut depth = 1;
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => {
                    let Some(esc) = self.peek() else { break };
                    self.pos += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push(b);
                }
                _ => out.push(b),
            }
        }
        Err(syntax("unterminated string", start))
    }

    fn read_hex_string(&mut self) -> SigningResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;
        let mut nibbles = Vec::new();
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'>' {
                if nibbles.len() % 2 == 1 {
                    nibbles.push(0);
                }
                return Ok(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect());
            }
            if is_whitespace(b) {
                continue;
            }
            let nibble = (b as char)
                .to_digit(16)
                .ok_or_else(|| syntax("invalid hex string", start))?;
            nibbles.push(nibble as u8);
        }
        Err(syntax("unterminated hex string", start))
    }

    fn read_dictionary_body(&mut self) -> SigningResult<Dictionary> {
        let start = self.pos;
        let mut dict = Dictionary::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'>') if self.data.get(self.pos + 1) == Some(&b'>') => {
                    self.pos += 2;
                    return Ok(dict);
                }
                Some(b'/') => {
                    self.pos += 1;
                    let key = self.read_name()?;
                    let value = self.parse_object()?;
                    dict.insert(key, value);
                }
                None => return Err(syntax("unterminated dictionary", start)),
                Some(_) => return Err(syntax("dictionary key must be a name", self.pos)),
            }
        }
    }

    /// Parse `n g obj ... endobj`. `/Length` references are resolved through
    /// `resolve_length`; without it the stream end is located by scanning.
    pub fn parse_indirect(
        &mut self,
        resolve_length: &dyn Fn(ObjectRef) -> Option<i64>,
    ) -> SigningResult<(ObjectRef, Object)> {
        let id = self.read_unsigned()?;
        let gen = self.read_unsigned()?;
        self.expect_keyword("obj")?;
        let object_ref = ObjectRef::new(
            u32::try_from(id).map_err(|_| syntax("object number too large", self.pos))?,
            u16::try_from(gen).map_err(|_| syntax("generation too large", self.pos))?,
        );
        let object = self.parse_object()?;
        let object = match object {
            Object::Dictionary(dict) if self.eat_keyword("stream") => {
                let data = self.read_stream_data(&dict, resolve_length)?;
                Object::Stream { dict, data }
            }
            other => other,
        };
        // Tolerate a missing endobj, as many writers do.
        let _ = self.eat_keyword("endobj");
        Ok((object_ref, object))
    }

    fn read_stream_data(
        &mut self,
        dict: &Dictionary,
        resolve_length: &dyn Fn(ObjectRef) -> Option<i64>,
    ) -> SigningResult<Vec<u8>> {
        // EOL after the keyword is CRLF or LF
        if self.peek() == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek() == Some(b'\n') {
            self.pos += 1;
        }
        let start = self.pos;
        let declared = match dict.get("Length") {
            Some(Object::Integer(n)) => Some(*n),
            Some(Object::Reference(r)) => resolve_length(*r),
            _ => None,
        };
        if let Some(len) = declared.and_then(|n| usize::try_from(n).ok()) {
            if let Some(end) = start.checked_add(len).filter(|e| *e <= self.data.len()) {
                let mut probe = Parser::new(self.data, end);
                if probe.eat_keyword("endstream") {
                    self.pos = probe.pos;
                    return Ok(self.data[start..end].to_vec());
                }
            }
        }
        let rel = find(&self.data[start..], b"endstream")
            .ok_or_else(|| syntax("stream without endstream", start))?;
        let mut end = start + rel;
        if end > start && self.data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && self.data[end - 1] == b'\r' {
            end -= 1;
        }
        self.pos = start + rel + b"endstream".len();
        Ok(self.data[start..end].to_vec())
    }
}

/// First occurrence of `needle` in `haystack`.
#[must_use]
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Last occurrence of `needle` in `haystack`.
#[must_use]
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
