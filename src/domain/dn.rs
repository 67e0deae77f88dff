//! Distinguished name field extraction for subject and issuer names.
//!
//! Attributes are held most-specific first (RFC 4514 order). When an attribute
//! type repeats, lookups return the most specific value.

use crate::domain::constants::{
    ASN1_BMP_STRING_TAG, ASN1_IA5_STRING_TAG, ASN1_PRINTABLE_STRING_TAG, ASN1_T61_STRING_TAG,
    ASN1_UTF8_STRING_TAG,
};
use crate::infra::error::{SigningError, SigningResult};
use der::Tagged;
use x509_cert::name::Name;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    attributes: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Build from a parsed X.509 name.
    #[must_use]
    pub fn from_name(name: &Name) -> Self {
        let mut attributes = Vec::new();
        for rdn in name.0.iter().rev() {
            for atv in rdn.0.iter() {
                let key = attribute_key(&atv.oid.to_string());
                let value = decode_directory_string(atv.value.tag().octet(), atv.value.value());
                attributes.push((key, value));
            }
        }
        Self { attributes }
    }

    /// Parse an RFC 4514 string such as `CN=Jane Doe,O=Acme,C=IN`.
    pub fn parse(dn: &str) -> SigningResult<Self> {
        let mut attributes = Vec::new();
        if dn.trim().is_empty() {
            return Ok(Self { attributes });
        }
        for rdn in split_unescaped(dn, &[',', ';']) {
            for pair in split_unescaped(&rdn, &['+']) {
                let (raw_key, raw_value) = pair.split_once('=').ok_or_else(|| {
                    SigningError::InvalidInput(format!("malformed name component: {pair}"))
                })?;
                let key = normalize_key(raw_key.trim());
                if key.is_empty() {
                    return Err(SigningError::InvalidInput(format!(
                        "name component without attribute type: {pair}"
                    )));
                }
                attributes.push((key, unescape_value(raw_value.trim())?));
            }
        }
        Ok(Self { attributes })
    }

    /// Value for an attribute type (`CN`, `O`, `EMAILADDRESS`, ...).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated attribute type, most specific first.
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let key = normalize_key(key);
        self.attributes
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[must_use]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.get("CN")
    }

    #[must_use]
    pub fn organization(&self) -> Option<&str> {
        self.get("O")
    }

    #[must_use]
    pub fn organizational_unit(&self) -> Option<&str> {
        self.get("OU")
    }

    #[must_use]
    pub fn country(&self) -> Option<&str> {
        self.get("C")
    }

    #[must_use]
    pub fn state_or_province(&self) -> Option<&str> {
        self.get("ST")
    }

    #[must_use]
    pub fn locality(&self) -> Option<&str> {
        self.get("L")
    }

    #[must_use]
    pub fn email_address(&self) -> Option<&str> {
        self.get("EMAILADDRESS")
    }

    #[must_use]
    pub fn serial_number(&self) -> Option<&str> {
        self.get("SERIALNUMBER")
    }
}

impl std::fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={}", escape_value(v)))
            .collect();
        f.write_str(&parts.join(","))
    }
}

fn attribute_key(oid: &str) -> String {
    let key = match oid {
        "2.5.4.3" => "CN",
        "2.5.4.4" => "SURNAME",
        "2.5.4.5" => "SERIALNUMBER",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.12" => "TITLE",
        "2.5.4.42" => "GIVENNAME",
        "1.2.840.113549.1.9.1" => "EMAILADDRESS",
        "0.9.2342.19200300.100.1.1" => "UID",
        "0.9.2342.19200300.100.1.25" => "DC",
        other => other,
    };
    key.to_string()
}

fn normalize_key(key: &str) -> String {
    let upper = key.to_ascii_uppercase();
    let upper = upper.strip_prefix("OID.").unwrap_or(&upper);
    if upper.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return attribute_key(upper);
    }
    match upper {
        "E" | "EMAIL" => "EMAILADDRESS".to_string(),
        "S" => "ST".to_string(),
        other => other.to_string(),
    }
}

fn decode_directory_string(tag: u8, bytes: &[u8]) -> String {
    match tag {
        ASN1_BMP_STRING_TAG => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        ASN1_UTF8_STRING_TAG
        | ASN1_PRINTABLE_STRING_TAG
        | ASN1_IA5_STRING_TAG
        | ASN1_T61_STRING_TAG => String::from_utf8_lossy(bytes).into_owned(),
        _ => format!("#{}", hex::encode(bytes)),
    }
}

/// Split on separator characters that are not escaped or inside quotes.
fn split_unescaped(input: &str, separators: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut quoted = false;
    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                quoted = !quoted;
            }
            c if !quoted && separators.contains(&c) => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn unescape_value(raw: &str) -> SigningResult<String> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return unescape_value(&raw[1..raw.len() - 1]);
    }
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let next = chars
            .next()
            .ok_or_else(|| SigningError::InvalidInput(format!("dangling escape in: {raw}")))?;
        if next.is_ascii_hexdigit() && chars.peek().is_some_and(char::is_ascii_hexdigit) {
            let low = chars.next().unwrap_or('0');
            let pair: String = [next, low].iter().collect();
            let byte = u8::from_str_radix(&pair, 16)
                .map_err(|_| SigningError::InvalidInput(format!("bad hex escape in: {raw}")))?;
            bytes.push(byte);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| SigningError::InvalidInput(format!("escaped value is not UTF-8: {raw}")))
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, ch) in value.chars().enumerate() {
        let needs = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (ch == '#' || ch == ' '))
            || (i == last && ch == ' ');
        if needs {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
