//! PDF object serialization.

use super::object::{Dictionary, Object};
use std::io::Write;

/// Serialize a direct object.
#[must_use]
pub fn serialize(obj: &Object) -> Vec<u8> {
    let mut buf = Vec::new();
    write_object(&mut buf, obj);
    buf
}

/// `{id} {gen} obj\n{object}\nendobj\n`
#[must_use]
pub fn serialize_indirect(id: u32, gen: u16, obj: &Object) -> Vec<u8> {
    let mut buf = format!("{id} {gen} obj\n").into_bytes();
    write_object(&mut buf, obj);
    buf.extend_from_slice(b"\nendobj\n");
    buf
}

fn write_object(w: &mut Vec<u8>, obj: &Object) {
    match obj {
        Object::Null => w.extend_from_slice(b"null"),
        Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
        Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => w.extend_from_slice(format_real(*r).as_bytes()),
        Object::String(s) => write_literal_string(w, s),
        Object::HexString(s) => {
            w.push(b'<');
            w.extend_from_slice(hex::encode_upper(s).as_bytes());
            w.push(b'>');
        }
        Object::Name(n) => write_name(w, n),
        Object::Array(items) => {
            w.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.push(b' ');
                }
                write_object(w, item);
            }
            w.push(b']');
        }
        Object::Dictionary(d) => write_dictionary(w, d),
        Object::Stream { dict, data } => {
            let mut dict = dict.clone();
            dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
            write_dictionary(w, &dict);
            w.extend_from_slice(b"\nstream\n");
            w.extend_from_slice(data);
            w.extend_from_slice(b"\nendstream");
        }
        Object::Reference(r) => {
            let _ = write!(w, "{} {} R", r.id, r.gen);
        }
    }
}

fn write_dictionary(w: &mut Vec<u8>, dict: &Dictionary) {
    w.extend_from_slice(b"<<");
    for (key, value) in dict {
        write_name(w, key);
        w.push(b' ');
        write_object(w, value);
    }
    w.extend_from_slice(b">>");
}

/// Reals with at most four decimals, trailing zeros trimmed.
#[must_use]
pub fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for &b in name.as_bytes() {
        let plain = (0x21..=0x7e).contains(&b)
            && !matches!(
                b,
                b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
            );
        if plain {
            w.push(b);
        } else {
            let _ = write!(w, "#{b:02X}");
        }
    }
}

fn write_literal_string(w: &mut Vec<u8>, s: &[u8]) {
    w.push(b'(');
    for &b in s {
        match b {
            b'(' | b')' | b'\\' => {
                w.push(b'\\');
                w.push(b);
            }
            b'\n' => w.extend_from_slice(b"\\n"),
            b'\r' => w.extend_from_slice(b"\\r"),
            _ => w.push(b),
        }
    }
    w.push(b')');
}

/// Encode text for a PDF text string: PDFDocEncoding-compatible ASCII as-is,
/// anything else as UTF-16BE with a byte-order mark.
#[must_use]
pub fn text_string(text: &str) -> Object {
    if text.chars().all(|c| (' '..='~').contains(&c) || c == '\n') {
        return Object::String(text.as_bytes().to_vec());
    }
    let mut bytes = vec![0xfe, 0xff];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes)
}
