//! Timestamp request builder service.
//!
//! Builds RFC3161 `TimeStampReq` structures over the CMS signature value.

use crate::domain::asn1::{algorithm_identifier, octet_string, sequence, unsigned_integer};
use crate::domain::constants::{CERT_REQ_TRUE, SHA256_OID, TS_REQ_NONCE_BYTES, TS_REQ_VERSION_1};
use crate::infra::error::{SigningError, SigningResult};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A DER request plus what the response must echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    pub der: Vec<u8>,
    /// SHA-256 of the stamped bytes.
    pub message_imprint: Vec<u8>,
    /// Big-endian magnitude, leading zeros stripped.
    pub nonce: Vec<u8>,
}

/// Service for building RFC3161 timestamp requests.
pub struct TimestampRequestBuilder;

impl TimestampRequestBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build a request for the given signature bytes.
    ///
    /// ```text
    /// TimeStampReq ::= SEQUENCE {
    ///     version         INTEGER { v1(1) },
    ///     messageImprint  MessageImprint,
    ///     nonce           INTEGER OPTIONAL,
    ///     certReq         BOOLEAN DEFAULT FALSE }
    /// ```
    pub fn build_request(&self, signature_bytes: &[u8]) -> SigningResult<TimestampRequest> {
        if signature_bytes.is_empty() {
            return Err(SigningError::TimestampError(
                "Cannot create timestamp request for empty signature".into(),
            ));
        }

        let imprint = Sha256::digest(signature_bytes).to_vec();
        let mut nonce = [0u8; TS_REQ_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let der = sequence(&[
            &TS_REQ_VERSION_1,
            &sequence(&[
                &algorithm_identifier(SHA256_OID, true),
                &octet_string(&imprint),
            ]),
            &unsigned_integer(&nonce),
            &CERT_REQ_TRUE,
        ]);

        log::debug!(
            "Built RFC3161 timestamp request: {} bytes for signature: {} bytes",
            der.len(),
            signature_bytes.len()
        );

        let first = nonce.iter().position(|b| *b != 0).unwrap_or(nonce.len() - 1);
        Ok(TimestampRequest {
            der,
            message_imprint: imprint,
            nonce: nonce[first..].to_vec(),
        })
    }
}

impl Default for TimestampRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asn1::DerReader;
    use crate::domain::constants::{
        ASN1_BOOLEAN_TAG, ASN1_INTEGER_TAG, ASN1_OCTET_STRING_TAG, ASN1_SEQUENCE_TAG,
    };

    #[test]
    fn build_request_rejects_empty_signature() {
        let builder = TimestampRequestBuilder::new();
        let result = builder.build_request(&[]);
        assert!(matches!(result, Err(SigningError::TimestampError(_))));
    }

    #[test]
    fn request_structure() {
        let request = TimestampRequestBuilder::new()
            .build_request(b"signature value")
            .unwrap();
        assert_eq!(request.message_imprint, Sha256::digest(b"signature value").to_vec());

        let mut outer = DerReader::new(&request.der);
        let body = outer.expect(ASN1_SEQUENCE_TAG).unwrap();
        let mut fields = DerReader::new(body.content);
        assert_eq!(fields.expect(ASN1_INTEGER_TAG).unwrap().content, &[1]);

        let imprint = fields.expect(ASN1_SEQUENCE_TAG).unwrap();
        let mut imprint_fields = DerReader::new(imprint.content);
        imprint_fields.expect(ASN1_SEQUENCE_TAG).unwrap();
        let hashed = imprint_fields.expect(ASN1_OCTET_STRING_TAG).unwrap();
        assert_eq!(hashed.content, request.message_imprint.as_slice());

        let nonce = fields.expect(ASN1_INTEGER_TAG).unwrap();
        let magnitude: Vec<u8> = nonce.content.iter().copied().skip_while(|b| *b == 0).collect();
        let expected: Vec<u8> = request.nonce.iter().copied().skip_while(|b| *b == 0).collect();
        assert_eq!(magnitude, expected);

        let cert_req = fields.expect(ASN1_BOOLEAN_TAG).unwrap();
        assert_eq!(cert_req.content, &[0xff]);
        assert!(fields.is_empty());
    }

    #[test]
    fn nonces_differ_between_requests() {
        let builder = TimestampRequestBuilder::default();
        let a = builder.build_request(b"same").unwrap();
        let b = builder.build_request(b"same").unwrap();
        assert_eq!(a.message_imprint, b.message_imprint);
        assert_ne!(a.nonce, b.nonce);
    }
}
