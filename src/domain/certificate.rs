use crate::infra::error::{SigningError, SigningResult};
use der::oid::AssociatedOid;
use der::{Decode, Encode};
use std::fmt;
use std::time::SystemTime;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{BasicConstraints, CrlDistributionPoints, KeyUsage};
use x509_cert::Certificate;

/// Public key family of a signing certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

/// X.509 certificate kept both as DER and in parsed form.
#[derive(Clone)]
pub struct SigningCertificate {
    der: Box<[u8]>,
    parsed: Certificate,
}

impl SigningCertificate {
    pub fn from_der(der: Vec<u8>) -> SigningResult<Self> {
        let parsed = Certificate::from_der(&der).map_err(|e| {
            SigningError::CertificateError(format!("Failed to parse certificate: {e}"))
        })?;
        Ok(Self {
            der: der.into_boxed_slice(),
            parsed,
        })
    }

    pub fn from_openssl(cert: &openssl::x509::X509Ref) -> SigningResult<Self> {
        Self::from_der(cert.to_der()?)
    }

    pub fn to_openssl(&self) -> SigningResult<openssl::x509::X509> {
        Ok(openssl::x509::X509::from_der(&self.der)?)
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn x509(&self) -> &Certificate {
        &self.parsed
    }

    /// Serial number as upper-case hex without leading zero bytes.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.serial_magnitude())
    }

    /// Serial number magnitude (sign padding stripped).
    #[must_use]
    pub fn serial_magnitude(&self) -> &[u8] {
        let bytes = self.parsed.tbs_certificate.serial_number.as_bytes();
        let start = bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(bytes.len().saturating_sub(1));
        &bytes[start..]
    }

    #[must_use]
    pub fn subject_name(&self) -> String {
        self.parsed.tbs_certificate.subject.to_string()
    }

    #[must_use]
    pub fn issuer_name(&self) -> String {
        self.parsed.tbs_certificate.issuer.to_string()
    }

    pub fn issuer_der(&self) -> SigningResult<Vec<u8>> {
        Ok(self.parsed.tbs_certificate.issuer.to_der()?)
    }

    #[must_use]
    pub fn not_before(&self) -> SystemTime {
        self.parsed
            .tbs_certificate
            .validity
            .not_before
            .to_system_time()
    }

    #[must_use]
    pub fn not_after(&self) -> SystemTime {
        self.parsed
            .tbs_certificate
            .validity
            .not_after
            .to_system_time()
    }

    /// Signature algorithm in `<HASH>with<KEY>` form, or the dotted OID.
    #[must_use]
    pub fn signature_algorithm_name(&self) -> String {
        let oid = self.parsed.signature_algorithm.oid.to_string();
        let name = match oid.as_str() {
            "1.2.840.113549.1.1.4" => "MD5withRSA",
            "1.2.840.113549.1.1.5" => "SHA1withRSA",
            "1.2.840.113549.1.1.10" => "RSASSA-PSS",
            "1.2.840.113549.1.1.11" => "SHA256withRSA",
            "1.2.840.113549.1.1.12" => "SHA384withRSA",
            "1.2.840.113549.1.1.13" => "SHA512withRSA",
            "1.2.840.10045.4.1" => "SHA1withECDSA",
            "1.2.840.10045.4.3.2" => "SHA256withECDSA",
            "1.2.840.10045.4.3.3" => "SHA384withECDSA",
            "1.2.840.10045.4.3.4" => "SHA512withECDSA",
            "1.3.101.112" => "Ed25519",
            _ => return oid,
        };
        name.to_string()
    }

    pub fn key_algorithm(&self) -> SigningResult<KeyAlgorithm> {
        let oid = self
            .parsed
            .tbs_certificate
            .subject_public_key_info
            .algorithm
            .oid
            .to_string();
        match oid.as_str() {
            "1.2.840.113549.1.1.1" => Ok(KeyAlgorithm::Rsa),
            "1.2.840.10045.2.1" => Ok(KeyAlgorithm::Ec),
            other => Err(SigningError::CertificateError(format!(
                "unsupported public key algorithm {other}"
            ))),
        }
    }

    /// Decoded key usage extension, if present and well formed.
    #[must_use]
    pub fn key_usage(&self) -> Option<KeyUsage> {
        self.extension::<KeyUsage>()
    }

    #[must_use]
    pub fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.extension::<BasicConstraints>()
    }

    /// HTTP(S) URIs from the CRL distribution points extension.
    #[must_use]
    pub fn crl_distribution_urls(&self) -> Vec<String> {
        let Some(points) = self.extension::<CrlDistributionPoints>() else {
            return Vec::new();
        };
        points
            .0
            .iter()
            .filter_map(|dp| match &dp.distribution_point {
                Some(DistributionPointName::FullName(names)) => Some(names),
                _ => None,
            })
            .flatten()
            .filter_map(|name| match name {
                GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                _ => None,
            })
            .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
            .collect()
    }

    fn extension<'a, T>(&'a self) -> Option<T>
    where
        T: AssociatedOid + Decode<'a>,
    {
        let extensions = self.parsed.tbs_certificate.extensions.as_ref()?;
        let ext = extensions.iter().find(|ext| ext.extn_id == T::OID)?;
        match T::from_der(ext.extn_value.as_bytes()) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring malformed extension {}: {e}", T::OID);
                None
            }
        }
    }
}

impl PartialEq for SigningCertificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for SigningCertificate {}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SigningCertificate(serial={}, subject={})",
            self.serial_hex(),
            self.subject_name()
        )
    }
}

/// Ordered chain, leaf first. Never empty.
#[derive(Clone)]
pub struct CertificateChain {
    certs: Vec<SigningCertificate>,
    degraded: bool,
}

impl CertificateChain {
    pub fn new(certs: Vec<SigningCertificate>) -> SigningResult<Self> {
        if certs.is_empty() {
            return Err(SigningError::CertificateChain(
                "certificate chain is empty".to_string(),
            ));
        }
        Ok(Self {
            certs,
            degraded: false,
        })
    }

    /// Chain made of the leaf only because the store had nothing more.
    #[must_use]
    pub fn leaf_only(leaf: SigningCertificate) -> Self {
        Self {
            certs: vec![leaf],
            degraded: true,
        }
    }

    #[must_use]
    pub fn leaf(&self) -> &SigningCertificate {
        &self.certs[0]
    }

    #[must_use]
    pub fn certificates(&self) -> &[SigningCertificate] {
        &self.certs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// True when the chain fell back to the leaf alone.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CertificateChain(len={}, degraded={})",
            self.certs.len(),
            self.degraded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_is_rejected() {
        let err = CertificateChain::new(Vec::new()).unwrap_err();
        assert!(matches!(err, SigningError::CertificateChain(_)));
    }

    #[test]
    fn garbage_der_is_a_certificate_error() {
        let err = SigningCertificate::from_der(vec![0x30, 0x03, 0x02, 0x01, 0x01]).unwrap_err();
        assert!(matches!(err, SigningError::CertificateError(_)));
    }
}
