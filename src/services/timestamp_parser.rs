//! Timestamp response parsing with structural validation.
//!
//! Extracts the `TimeStampToken` from a `TimeStampResp`, then checks that the
//! token's `TSTInfo` stamps the bytes we asked for.

use crate::domain::asn1::{integer_value, DerReader};
use crate::domain::constants::{
    ASN1_BOOLEAN_TAG, ASN1_CONTEXT_0_CONSTRUCTED, ASN1_GENERALIZED_TIME_TAG, ASN1_INTEGER_TAG,
    ASN1_OCTET_STRING_TAG, ASN1_OID_TAG, ASN1_SEQUENCE_TAG, ASN1_SET_TAG, PKCS7_SIGNED_DATA_OID,
    SHA256_OID, TST_INFO_OID,
};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::timestamp_request_builder::TimestampRequest;

/// Parsed RFC3161 token with the `TSTInfo` fields we check.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// Full `ContentInfo` DER, embedded as the unsigned attribute value.
    der: Vec<u8>,
    imprint_algorithm: Vec<u8>,
    message_imprint: Vec<u8>,
    serial_number: Vec<u8>,
    gen_time: String,
    nonce: Option<Vec<u8>>,
}

impl TimestampToken {
    /// Parse a `ContentInfo` carrying a `SignedData` over `TSTInfo`.
    pub fn from_der(der: Vec<u8>) -> SigningResult<Self> {
        let fields = parse_token(&der)?;
        Ok(Self { der, ..fields })
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    #[must_use]
    pub fn message_imprint(&self) -> &[u8] {
        &self.message_imprint
    }

    /// Serial number as upper-case hex.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }

    /// `GeneralizedTime` as sent by the authority, e.g. `20240131120000Z`.
    #[must_use]
    pub fn gen_time(&self) -> &str {
        &self.gen_time
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&[u8]> {
        self.nonce.as_deref()
    }

    /// Compare the imprint against the SHA-256 we requested.
    pub fn validate_message_imprint(&self, expected: &[u8]) -> SigningResult<()> {
        if self.imprint_algorithm != SHA256_OID {
            return Err(SigningError::TimestampError(
                "token imprint is not SHA-256".into(),
            ));
        }
        if self.message_imprint != expected {
            return Err(SigningError::TimestampError(format!(
                "message imprint mismatch: expected {}, token has {}",
                hex::encode(expected),
                hex::encode(&self.message_imprint)
            )));
        }
        Ok(())
    }
}

/// Service responsible for turning raw authority responses into validated tokens.
pub struct TimestampParserService;

impl TimestampParserService {
    /// Parse a `TimeStampResp` body and validate it against the request.
    pub fn parse_response(
        response_der: &[u8],
        request: &TimestampRequest,
    ) -> SigningResult<TimestampToken> {
        let token_der = extract_token(response_der)?;
        let token = Self::parse_and_validate(token_der, &request.message_imprint)?;
        match token.nonce() {
            Some(nonce) if strip_zeros(nonce) != strip_zeros(&request.nonce) => {
                return Err(SigningError::TimestampError(
                    "nonce in response does not match the request".into(),
                ));
            }
            None => log::warn!("Timestamp token carries no nonce"),
            _ => {}
        }
        log::info!(
            "Timestamp token accepted (serial {}, time {})",
            token.serial_hex(),
            token.gen_time()
        );
        Ok(token)
    }

    /// Parse a timestamp token DER and validate the message imprint hash.
    pub fn parse_and_validate(
        token_der: Vec<u8>,
        signature_hash: &[u8],
    ) -> SigningResult<TimestampToken> {
        let token = TimestampToken::from_der(token_der)?;
        token
            .validate_message_imprint(signature_hash)
            .map_err(|e| SigningError::TimestampError(format!("imprint validation failed: {e}")))?;
        Ok(token)
    }
}

fn status_name(status: u64) -> &'static str {
    match status {
        0 => "granted",
        1 => "grantedWithMods",
        2 => "rejection",
        3 => "waiting",
        4 => "revocationWarning",
        5 => "revocationNotification",
        _ => "unknown",
    }
}

/// `TimeStampResp ::= SEQUENCE { status PKIStatusInfo, timeStampToken OPTIONAL }`
fn extract_token(response: &[u8]) -> SigningResult<Vec<u8>> {
    let mut outer = DerReader::new(response);
    let resp = outer.expect(ASN1_SEQUENCE_TAG).map_err(malformed)?;
    let mut fields = DerReader::new(resp.content);

    let status_info = fields.expect(ASN1_SEQUENCE_TAG).map_err(malformed)?;
    let mut status_fields = DerReader::new(status_info.content);
    let status = integer_value(status_fields.expect(ASN1_INTEGER_TAG).map_err(malformed)?.content)?;
    if status > 1 {
        let detail = status_text(&mut status_fields);
        return Err(SigningError::TimestampError(format!(
            "authority answered {} ({status}){detail}",
            status_name(status)
        )));
    }
    if status == 1 {
        log::warn!("Timestamp granted with modifications");
    }

    if fields.is_empty() {
        return Err(SigningError::TimestampError(
            "granted response carries no token".into(),
        ));
    }
    Ok(fields.expect(ASN1_SEQUENCE_TAG).map_err(malformed)?.raw.to_vec())
}

/// First UTF8String of `PKIFreeText`, if any.
fn status_text(fields: &mut DerReader<'_>) -> String {
    if fields.peek_tag() != Some(ASN1_SEQUENCE_TAG) {
        return String::new();
    }
    fields
        .read()
        .ok()
        .and_then(|text| DerReader::new(text.content).read().ok())
        .map(|s| format!(": {}", String::from_utf8_lossy(s.content)))
        .unwrap_or_default()
}

fn parse_token(der: &[u8]) -> SigningResult<TimestampToken> {
    let mut outer = DerReader::new(der);
    let content_info = outer.expect(ASN1_SEQUENCE_TAG)?;
    let mut ci = DerReader::new(content_info.content);
    if ci.expect(ASN1_OID_TAG)?.content != PKCS7_SIGNED_DATA_OID {
        return Err(SigningError::TimestampError(
            "token is not CMS SignedData".into(),
        ));
    }
    let explicit = ci.expect(ASN1_CONTEXT_0_CONSTRUCTED)?;
    let signed_data = DerReader::new(explicit.content).expect(ASN1_SEQUENCE_TAG)?;

    let mut sd = DerReader::new(signed_data.content);
    sd.expect(ASN1_INTEGER_TAG)?;
    sd.expect(ASN1_SET_TAG)?;
    let encap = sd.expect(ASN1_SEQUENCE_TAG)?;
    let mut encap_fields = DerReader::new(encap.content);
    if encap_fields.expect(ASN1_OID_TAG)?.content != TST_INFO_OID {
        return Err(SigningError::TimestampError(
            "token content is not TSTInfo".into(),
        ));
    }
    let wrapped = encap_fields.expect(ASN1_CONTEXT_0_CONSTRUCTED)?;
    let tst_octets = DerReader::new(wrapped.content).expect(ASN1_OCTET_STRING_TAG)?;
    parse_tst_info(tst_octets.content)
}

fn parse_tst_info(der: &[u8]) -> SigningResult<TimestampToken> {
    let mut outer = DerReader::new(der);
    let info = outer.expect(ASN1_SEQUENCE_TAG)?;
    let mut fields = DerReader::new(info.content);
    fields.expect(ASN1_INTEGER_TAG)?;
    fields.expect(ASN1_OID_TAG)?;

    let imprint = fields.expect(ASN1_SEQUENCE_TAG)?;
    let mut imprint_fields = DerReader::new(imprint.content);
    let algorithm = imprint_fields.expect(ASN1_SEQUENCE_TAG)?;
    let algorithm_oid = DerReader::new(algorithm.content).expect(ASN1_OID_TAG)?;
    let hashed = imprint_fields.expect(ASN1_OCTET_STRING_TAG)?;

    let serial = fields.expect(ASN1_INTEGER_TAG)?;
    let gen_time = fields.expect(ASN1_GENERALIZED_TIME_TAG)?;

    // accuracy and ordering are optional and precede the nonce
    if fields.peek_tag() == Some(ASN1_SEQUENCE_TAG) {
        fields.read()?;
    }
    if fields.peek_tag() == Some(ASN1_BOOLEAN_TAG) {
        fields.read()?;
    }
    let nonce = if fields.peek_tag() == Some(ASN1_INTEGER_TAG) {
        Some(fields.read()?.content.to_vec())
    } else {
        None
    };

    Ok(TimestampToken {
        der: Vec::new(),
        imprint_algorithm: algorithm_oid.content.to_vec(),
        message_imprint: hashed.content.to_vec(),
        serial_number: serial.content.to_vec(),
        gen_time: String::from_utf8_lossy(gen_time.content).into_owned(),
        nonce,
    })
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn malformed(error: SigningError) -> SigningError {
    SigningError::TimestampError(format!("malformed timestamp response: {error}"))
}
