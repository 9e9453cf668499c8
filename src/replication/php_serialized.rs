//! PHP `serialize()` codec.
//!
//! Sites built on PHP store arrays and objects in text columns using PHP's
//! native serialization. Literal find-and-replace on such a value corrupts it
//! whenever the replacement changes a string's length, because every string
//! is prefixed with its byte count. This module decodes the format into a
//! [`PhpValue`] tree, substitutes inside string values, and re-encodes with
//! recomputed lengths.
//!
//! Detection is attempt-and-fallback: a value is treated as serialized only
//! if it decodes completely; anything else is substituted literally.

use super::Substitutions;

/// Nesting limit for arrays, objects and double-serialized strings.
pub const MAX_DEPTH: usize = 64;

/// Decoded PHP value. Integers and floats keep their source text so an
/// untouched value re-encodes byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(String),
    Float(String),
    Str(Vec<u8>),
    Array(Vec<(PhpValue, PhpValue)>),
    Object {
        class: Vec<u8>,
        fields: Vec<(PhpValue, PhpValue)>,
    },
    /// `r:` (value reference) or `R:` (variable reference); carried opaquely
    Reference { strong: bool, index: String },
    /// `C:` custom-serialized object; the payload is carried opaquely
    Custom { class: Vec<u8>, payload: Vec<u8> },
}

/// Decode a complete serialized value. Trailing input is a decode failure.
pub fn decode(input: &[u8]) -> Option<PhpValue> {
    let mut parser = Parser { input, pos: 0 };
    let value = parser.value(0)?;
    (parser.pos == input.len()).then_some(value)
}

/// Encode a value back into PHP's serialization format.
pub fn encode(value: &PhpValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

/// Substitute inside a serialized value. Returns `None` when `input` is not
/// a complete serialized value so the caller can fall back to a literal scan.
pub fn substitute(input: &str, substitutions: &Substitutions) -> Option<String> {
    substitute_at_depth(input, substitutions, 0)
}

fn substitute_at_depth(input: &str, substitutions: &Substitutions, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH || !looks_serialized(input) {
        return None;
    }
    let mut value = decode(input.as_bytes())?;
    substitute_value(&mut value, substitutions, depth);
    String::from_utf8(encode(&value)).ok()
}

/// Cheap prefix check before attempting a full decode.
fn looks_serialized(input: &str) -> bool {
    let bytes = input.as_bytes();
    match bytes {
        [b'N', b';'] => true,
        [kind, b':', ..] => matches!(kind, b'b' | b'i' | b'd' | b's' | b'a' | b'O' | b'r' | b'R' | b'C'),
        _ => false,
    }
}

fn substitute_value(value: &mut PhpValue, substitutions: &Substitutions, depth: usize) {
    match value {
        PhpValue::Str(bytes) => {
            let Ok(text) = std::str::from_utf8(bytes) else {
                return;
            };
            // Double-serialized values are substituted structurally as well.
            let replaced = substitute_at_depth(text, substitutions, depth + 1)
                .unwrap_or_else(|| substitutions.apply_literal(text));
            *bytes = replaced.into_bytes();
        }
        PhpValue::Array(entries) | PhpValue::Object { fields: entries, .. } => {
            for (_, entry) in entries.iter_mut() {
                substitute_value(entry, substitutions, depth + 1);
            }
        }
        PhpValue::Null
        | PhpValue::Bool(_)
        | PhpValue::Int(_)
        | PhpValue::Float(_)
        | PhpValue::Reference { .. }
        | PhpValue::Custom { .. } => {}
    }
}

fn encode_into(value: &PhpValue, out: &mut Vec<u8>) {
    match value {
        PhpValue::Null => out.extend_from_slice(b"N;"),
        PhpValue::Bool(flag) => {
            out.extend_from_slice(if *flag { b"b:1;" } else { b"b:0;" });
        }
        PhpValue::Int(raw) => {
            out.extend_from_slice(b"i:");
            out.extend_from_slice(raw.as_bytes());
            out.push(b';');
        }
        PhpValue::Float(raw) => {
            out.extend_from_slice(b"d:");
            out.extend_from_slice(raw.as_bytes());
            out.push(b';');
        }
        PhpValue::Str(bytes) => {
            out.extend_from_slice(format!("s:{}:\"", bytes.len()).as_bytes());
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\";");
        }
        PhpValue::Array(entries) => {
            out.extend_from_slice(format!("a:{}:{{", entries.len()).as_bytes());
            encode_entries(entries, out);
            out.push(b'}');
        }
        PhpValue::Object { class, fields } => {
            out.extend_from_slice(format!("O:{}:\"", class.len()).as_bytes());
            out.extend_from_slice(class);
            out.extend_from_slice(format!("\":{}:{{", fields.len()).as_bytes());
            encode_entries(fields, out);
            out.push(b'}');
        }
        PhpValue::Reference { strong, index } => {
            out.push(if *strong { b'R' } else { b'r' });
            out.push(b':');
            out.extend_from_slice(index.as_bytes());
            out.push(b';');
        }
        PhpValue::Custom { class, payload } => {
            out.extend_from_slice(format!("C:{}:\"", class.len()).as_bytes());
            out.extend_from_slice(class);
            out.extend_from_slice(format!("\":{}:{{", payload.len()).as_bytes());
            out.extend_from_slice(payload);
            out.push(b'}');
        }
    }
}

fn encode_entries(entries: &[(PhpValue, PhpValue)], out: &mut Vec<u8>) {
    for (key, value) in entries {
        encode_into(key, out);
        encode_into(value, out);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self, depth: usize) -> Option<PhpValue> {
        if depth > MAX_DEPTH {
            return None;
        }
        let kind = self.next()?;
        if kind == b'N' {
            self.expect(b';')?;
            return Some(PhpValue::Null);
        }
        self.expect(b':')?;
        match kind {
            b'b' => {
                let flag = match self.next()? {
                    b'0' => false,
                    b'1' => true,
                    _ => return None,
                };
                self.expect(b';')?;
                Some(PhpValue::Bool(flag))
            }
            b'i' => {
                let raw = self.integer_text()?;
                self.expect(b';')?;
                Some(PhpValue::Int(raw))
            }
            b'd' => {
                let raw = self.until(b';')?;
                let valid = !raw.is_empty()
                    && raw.iter().all(|c| {
                        c.is_ascii_alphanumeric() || matches!(c, b'.' | b'-' | b'+')
                    });
                if !valid {
                    return None;
                }
                let raw = String::from_utf8(raw.to_vec()).ok()?;
                self.expect(b';')?;
                Some(PhpValue::Float(raw))
            }
            b's' => {
                let bytes = self.length_prefixed_quoted()?;
                self.expect(b';')?;
                Some(PhpValue::Str(bytes))
            }
            b'a' => {
                let count = self.length()?;
                self.expect(b':')?;
                let entries = self.entries(count, depth)?;
                Some(PhpValue::Array(entries))
            }
            b'O' => {
                let class = self.length_prefixed_quoted()?;
                self.expect(b':')?;
                let count = self.length()?;
                self.expect(b':')?;
                let fields = self.entries(count, depth)?;
                Some(PhpValue::Object { class, fields })
            }
            b'r' | b'R' => {
                let index = self.integer_text()?;
                self.expect(b';')?;
                Some(PhpValue::Reference {
                    strong: kind == b'R',
                    index,
                })
            }
            b'C' => {
                let class = self.length_prefixed_quoted()?;
                self.expect(b':')?;
                let len = self.length()?;
                self.expect(b':')?;
                self.expect(b'{')?;
                let payload = self.take(len)?.to_vec();
                self.expect(b'}')?;
                Some(PhpValue::Custom { class, payload })
            }
            _ => None,
        }
    }

    fn entries(&mut self, count: usize, depth: usize) -> Option<Vec<(PhpValue, PhpValue)>> {
        self.expect(b'{')?;
        // A count larger than the remaining input cannot be honest.
        if count > self.input.len().saturating_sub(self.pos) {
            return None;
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.value(depth + 1)?;
            if !matches!(key, PhpValue::Int(_) | PhpValue::Str(_)) {
                return None;
            }
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Some(entries)
    }

    /// `<len>:"<len bytes>"`
    fn length_prefixed_quoted(&mut self) -> Option<Vec<u8>> {
        let len = self.length()?;
        self.expect(b':')?;
        self.expect(b'"')?;
        let bytes = self.take(len)?.to_vec();
        self.expect(b'"')?;
        Some(bytes)
    }

    fn length(&mut self) -> Option<usize> {
        let digits = self.digits();
        if digits.is_empty() {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    }

    fn integer_text(&mut self) -> Option<String> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-') | Some(b'+')) {
            self.pos += 1;
        }
        if self.digits().is_empty() {
            return None;
        }
        String::from_utf8(self.input[start..self.pos].to_vec()).ok()
    }

    fn digits(&mut self) -> &'a [u8] {
        let input = self.input;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        &input[start..self.pos]
    }

    fn until(&mut self, stop: u8) -> Option<&'a [u8]> {
        let input = self.input;
        let start = self.pos;
        let offset = input[start..].iter().position(|&c| c == stop)?;
        self.pos = start + offset;
        Some(&input[start..self.pos])
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let input = self.input;
        let end = self.pos.checked_add(len)?;
        let slice = input.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, expected: u8) -> Option<()> {
        (self.next()? == expected).then_some(())
    }
}
