//! Centralized constants for DER tags, OIDs, envelope sizing and appearance defaults.
//! Keep this intentionally small; only broadly reused literals should live here.

// === Application identity ===

/// Application name used in field names and the signature creator string.
pub const APP_NAME: &str = "eMark";

/// Author shown in the signature build properties.
pub const APP_AUTHOR: &str = "CodeMuni";

// === ASN.1 DER tags ===

pub const ASN1_BOOLEAN_TAG: u8 = 0x01;
pub const ASN1_INTEGER_TAG: u8 = 0x02;
pub const ASN1_BIT_STRING_TAG: u8 = 0x03;
pub const ASN1_OCTET_STRING_TAG: u8 = 0x04;
pub const ASN1_NULL_TAG: u8 = 0x05;
pub const ASN1_OID_TAG: u8 = 0x06;
pub const ASN1_UTF8_STRING_TAG: u8 = 0x0c;
pub const ASN1_PRINTABLE_STRING_TAG: u8 = 0x13;
pub const ASN1_T61_STRING_TAG: u8 = 0x14;
pub const ASN1_IA5_STRING_TAG: u8 = 0x16;
pub const ASN1_UTC_TIME_TAG: u8 = 0x17;
pub const ASN1_GENERALIZED_TIME_TAG: u8 = 0x18;
pub const ASN1_BMP_STRING_TAG: u8 = 0x1e;
pub const ASN1_SEQUENCE_TAG: u8 = 0x30;
pub const ASN1_SET_TAG: u8 = 0x31;

/// `[0]` constructed (EXPLICIT, or IMPLICIT over a constructed type)
pub const ASN1_CONTEXT_0_CONSTRUCTED: u8 = 0xa0;

/// `[1]` constructed
pub const ASN1_CONTEXT_1_CONSTRUCTED: u8 = 0xa1;

/// ASN.1 NULL value (tag + length)
pub const ASN1_NULL: &[u8] = &[0x05, 0x00];

// === Algorithm OIDs (content octets only) ===

/// SHA-256 (2.16.840.1.101.3.4.2.1)
pub const SHA256_OID: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// sha256WithRSAEncryption (1.2.840.113549.1.1.11)
pub const SHA256_WITH_RSA_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];

/// ecdsa-with-SHA256 (1.2.840.10045.4.3.2)
pub const ECDSA_WITH_SHA256_OID: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];

// === CMS / PKCS#9 OIDs ===

/// id-data (1.2.840.113549.1.7.1)
pub const PKCS7_DATA_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];

/// id-signedData (1.2.840.113549.1.7.2)
pub const PKCS7_SIGNED_DATA_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];

/// contentType attribute (1.2.840.113549.1.9.3)
pub const PKCS9_CONTENT_TYPE_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];

/// messageDigest attribute (1.2.840.113549.1.9.4)
pub const PKCS9_MESSAGE_DIGEST_OID: &[u8] =
    &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];

/// id-aa-signingCertificateV2 (1.2.840.113549.1.9.16.2.47)
pub const SIGNING_CERTIFICATE_V2_OID: &[u8] = &[
    0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x10, 0x02, 0x2f,
];

/// id-aa-signatureTimeStampToken (1.2.840.113549.1.9.16.2.14)
pub const SIGNATURE_TIMESTAMP_TOKEN_OID: &[u8] = &[
    0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x10, 0x02, 0x0e,
];

/// id-ct-TSTInfo (1.2.840.113549.1.9.16.1.4)
pub const TST_INFO_OID: &[u8] = &[
    0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x10, 0x01, 0x04,
];

// === RFC3161 Timestamp Request Constants ===

/// Version 1 for RFC3161 timestamp requests
pub const TS_REQ_VERSION_1: [u8; 3] = [0x02, 0x01, 0x01];

/// BOOLEAN TRUE value for certReq field
pub const CERT_REQ_TRUE: [u8; 3] = [0x01, 0x01, 0xFF];

/// Random nonce bytes carried in each request
pub const TS_REQ_NONCE_BYTES: usize = 8;

// === Envelope size estimate (bytes) ===

pub const BASE_SIGNATURE_SIZE: usize = 10_000;
pub const CERTIFICATE_SIZE_ESTIMATE: usize = 15_000;
pub const TIMESTAMP_SIZE_ESTIMATE: usize = 15_000;
pub const LTV_SIZE_ESTIMATE: usize = 1_250_000;
pub const CMS_OVERHEAD: usize = 10_000;
pub const SAFETY_MARGIN: usize = 10_000;

// === Session / appearance ===

/// Secret entry attempts before the operation is treated as cancelled.
pub const MAX_SECRET_ATTEMPTS: u32 = 3;

/// Upper bound on the free-text note in the appearance layer.
pub const CUSTOM_TEXT_MAX_CHARS: usize = 60;

/// Watermark fill opacity.
pub const WATERMARK_OPACITY: f32 = 0.20;

/// Exclusive upper bound of the random suffix in generated field names.
pub const FIELD_NAME_RANDOM_BOUND: u32 = 900_000;

/// Layer date pattern (`yyyy.MM.dd HH:mm:ss z`).
pub const LAYER_DATE_FORMAT: &str = "%Y.%m.%d %H:%M:%S %:z";

/// Default prompt shown on the first secret attempt.
pub const DEFAULT_PIN_PROMPT: &str = "Please enter your PIN:";

/// Prompt shown on the first password attempt for PKCS#12 files.
pub const PFX_PASSWORD_PROMPT: &str = "Enter PFX Password";
