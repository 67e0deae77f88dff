//! Minimal DER writer and reader used for CMS, timestamp and signature plumbing.
//!
//! Structures are assembled by concatenating TLVs, the same way the CMS and
//! timestamp builders always have; this module only removes the repeated
//! length arithmetic.

use crate::domain::constants::{
    ASN1_CONTEXT_0_CONSTRUCTED, ASN1_INTEGER_TAG, ASN1_NULL, ASN1_OCTET_STRING_TAG, ASN1_OID_TAG,
    ASN1_SEQUENCE_TAG, ASN1_SET_TAG,
};
use crate::infra::error::{SigningError, SigningResult};

/// Encode a DER length (short form below 128, long form up to 4 bytes).
#[must_use]
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else if len <= 0xffff {
        vec![0x82, (len >> 8) as u8, len as u8]
    } else if len <= 0x00ff_ffff {
        vec![0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]
    } else {
        vec![
            0x84,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }
}

#[must_use]
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    out.extend_from_slice(&encode_len(content.len()));
    out.extend_from_slice(content);
    out
}

#[must_use]
pub fn sequence(parts: &[&[u8]]) -> Vec<u8> {
    tlv(ASN1_SEQUENCE_TAG, &parts.concat())
}

/// `SET OF` with members in DER canonical (ascending octet) order.
#[must_use]
pub fn set_of(mut members: Vec<Vec<u8>>) -> Vec<u8> {
    members.sort();
    tlv(ASN1_SET_TAG, &members.concat())
}

#[must_use]
pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(ASN1_OID_TAG, content)
}

#[must_use]
pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(ASN1_OCTET_STRING_TAG, content)
}

/// INTEGER from unsigned big-endian magnitude bytes.
#[must_use]
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let first_nonzero = magnitude.iter().position(|b| *b != 0);
    let mut body = match first_nonzero {
        Some(idx) => magnitude[idx..].to_vec(),
        None => vec![0],
    };
    if body[0] & 0x80 != 0 {
        body.insert(0, 0);
    }
    tlv(ASN1_INTEGER_TAG, &body)
}

#[must_use]
pub fn small_integer(value: u8) -> Vec<u8> {
    unsigned_integer(&[value])
}

/// `AlgorithmIdentifier` with optional NULL parameters.
#[must_use]
pub fn algorithm_identifier(oid_content: &[u8], null_params: bool) -> Vec<u8> {
    let oid = oid(oid_content);
    if null_params {
        sequence(&[&oid, ASN1_NULL])
    } else {
        sequence(&[&oid])
    }
}

/// Context-specific constructed tag `[n]`.
#[must_use]
pub fn context_constructed(number: u8, content: &[u8]) -> Vec<u8> {
    tlv(ASN1_CONTEXT_0_CONSTRUCTED | number, content)
}

/// Convert a raw `r || s` ECDSA signature (as returned by PKCS#11) to DER.
pub fn ecdsa_raw_to_der(raw: &[u8]) -> SigningResult<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(SigningError::CryptographicError(format!(
            "raw ECDSA signature has odd length {}",
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    Ok(sequence(&[&unsigned_integer(r), &unsigned_integer(s)]))
}

/// One decoded TLV borrowed from the input.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    /// Full encoding including tag and length.
    pub raw: &'a [u8],
}

/// Sequential reader over concatenated DER TLVs. Single-byte tags only.
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[must_use]
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read(&mut self) -> SigningResult<Tlv<'a>> {
        let start = self.pos;
        let tag = *self
            .data
            .get(start)
            .ok_or_else(|| SigningError::Asn1Error("unexpected end of data".into()))?;
        let (len, len_bytes) = decode_len(&self.data[start + 1..])?;
        let content_start = start + 1 + len_bytes;
        let end = content_start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                SigningError::Asn1Error(format!("TLV at offset {start} overruns its container"))
            })?;
        self.pos = end;
        Ok(Tlv {
            tag,
            content: &self.data[content_start..end],
            raw: &self.data[start..end],
        })
    }

    /// Read the next TLV and require a specific tag.
    pub fn expect(&mut self, tag: u8) -> SigningResult<Tlv<'a>> {
        let tlv = self.read()?;
        if tlv.tag != tag {
            return Err(SigningError::Asn1Error(format!(
                "expected tag 0x{tag:02x}, found 0x{:02x}",
                tlv.tag
            )));
        }
        Ok(tlv)
    }
}

fn decode_len(data: &[u8]) -> SigningResult<(usize, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| SigningError::Asn1Error("missing length".into()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7f) as usize;
    if count == 0 || count > 4 || data.len() < 1 + count {
        return Err(SigningError::Asn1Error("invalid long form length".into()));
    }
    let len = data[1..=count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, 1 + count))
}

/// Decode a small non-negative INTEGER content (e.g. PKIStatus).
pub fn integer_value(content: &[u8]) -> SigningResult<u64> {
    if content.is_empty() || content.len() > 8 || content[0] & 0x80 != 0 {
        return Err(SigningError::Asn1Error(
            "INTEGER out of supported range".into(),
        ));
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_forms() {
        assert_eq!(encode_len(5), vec![5]);
        assert_eq!(encode_len(200), vec![0x81, 200]);
        assert_eq!(encode_len(0x1234), vec![0x82, 0x12, 0x34]);
        assert_eq!(encode_len(0x01_0000), vec![0x83, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn integers_get_sign_padding() {
        assert_eq!(unsigned_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(unsigned_integer(&[0x00, 0x00, 0x7f]), vec![0x02, 0x01, 0x7f]);
        assert_eq!(unsigned_integer(&[]), vec![0x02, 0x01, 0x00]);
    }

    #[test]
    fn set_members_are_sorted() {
        let set = set_of(vec![vec![0x04, 0x01, 0x02], vec![0x02, 0x01, 0x01]]);
        assert_eq!(set, vec![0x31, 0x06, 0x02, 0x01, 0x01, 0x04, 0x01, 0x02]);
    }

    #[test]
    fn reader_walks_nested_structures() {
        let inner = sequence(&[&small_integer(1), &octet_string(&[0xaa; 300])]);
        let mut outer = DerReader::new(&inner);
        let seq = outer.expect(ASN1_SEQUENCE_TAG).unwrap();
        assert!(outer.is_empty());

        let mut fields = DerReader::new(seq.content);
        let version = fields.expect(ASN1_INTEGER_TAG).unwrap();
        assert_eq!(integer_value(version.content).unwrap(), 1);
        let blob = fields.expect(ASN1_OCTET_STRING_TAG).unwrap();
        assert_eq!(blob.content.len(), 300);
        assert!(fields.read().is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut reader = DerReader::new(&[0x30, 0x05, 0x01]);
        assert!(reader.read().is_err());
    }

    #[test]
    fn ecdsa_conversion() {
        let mut raw = vec![0x80; 32];
        raw.extend_from_slice(&[0x01; 32]);
        let der = ecdsa_raw_to_der(&raw).unwrap();
        assert_eq!(der[0], ASN1_SEQUENCE_TAG);
        // r needs a 0x00 pad, s does not
        assert_eq!(&der[2..5], &[0x02, 33, 0x00]);
        assert!(ecdsa_raw_to_der(&[1, 2, 3]).is_err());
    }
}
