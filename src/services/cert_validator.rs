//! Certificate validation service.
//!
//! Pure predicates over a certificate plus the eligibility filter applied to
//! candidate listings. Time-dependent checks take an explicit `now` in their
//! `_at` form.

use crate::domain::certificate::SigningCertificate;
use crate::domain::descriptor::CredentialDescriptor;
use crate::infra::error::SigningResult;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509};
use std::time::SystemTime;

const SECONDS_PER_DAY: i64 = 86_400;
const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct CertificateAnalysis {
    pub is_signing_suitable: bool,
    pub days_until_expiry: i64,
    pub can_digital_sign: bool,
    pub is_end_entity: bool,
    pub warnings: Vec<String>,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
}

pub struct CertificateValidator;

impl CertificateValidator {
    #[must_use]
    pub fn is_expired(cert: &SigningCertificate) -> bool {
        Self::is_expired_at(cert, SystemTime::now())
    }

    #[must_use]
    pub fn is_expired_at(cert: &SigningCertificate, now: SystemTime) -> bool {
        now > cert.not_after()
    }

    #[must_use]
    pub fn is_not_yet_valid(cert: &SigningCertificate) -> bool {
        Self::is_not_yet_valid_at(cert, SystemTime::now())
    }

    #[must_use]
    pub fn is_not_yet_valid_at(cert: &SigningCertificate, now: SystemTime) -> bool {
        now < cert.not_before()
    }

    /// Key usage present with digitalSignature set.
    #[must_use]
    pub fn is_digital_signature_allowed(cert: &SigningCertificate) -> bool {
        cert.key_usage().is_some_and(|ku| ku.digital_signature())
    }

    /// Key usage present with keyEncipherment set.
    #[must_use]
    pub fn is_encryption_allowed(cert: &SigningCertificate) -> bool {
        cert.key_usage().is_some_and(|ku| ku.key_encipherment())
    }

    #[must_use]
    pub fn is_signature_algorithm_secure(cert: &SigningCertificate) -> bool {
        let name = cert.signature_algorithm_name().to_uppercase();
        !name.contains("SHA1") && !name.contains("MD5")
    }

    /// The certificate's signature verifies under its own public key.
    #[must_use]
    pub fn is_self_signed(cert: &SigningCertificate) -> bool {
        let verify = || -> SigningResult<bool> {
            let x509 = cert.to_openssl()?;
            let key = x509.public_key()?;
            Ok(x509.verify(&key)?)
        };
        verify().unwrap_or(false)
    }

    /// Basic constraints absent, or present with cA false.
    #[must_use]
    pub fn is_end_entity(cert: &SigningCertificate) -> bool {
        cert.basic_constraints().map_or(true, |bc| !bc.ca)
    }

    /// Revocation status is not checked against OCSP or CRLs. Reports
    /// revoked so that no caller can mistake the answer for a clean result.
    #[must_use]
    pub fn is_revoked(cert: &SigningCertificate) -> bool {
        log::warn!(
            "Revocation checking is not available; treating {} as revoked",
            cert.serial_hex()
        );
        true
    }

    /// PKIX path validation against `trusted_roots`, revocation disabled.
    /// Empty or over-long chains fail.
    #[must_use]
    pub fn is_chain_valid(
        chain: &[SigningCertificate],
        trusted_roots: &[SigningCertificate],
        max_length: usize,
    ) -> bool {
        if chain.is_empty() || chain.len() > max_length {
            log::debug!(
                "Rejecting chain of length {} (max {max_length})",
                chain.len()
            );
            return false;
        }
        match Self::verify_path(chain, trusted_roots) {
            Ok(valid) => valid,
            Err(e) => {
                log::debug!("Chain validation error: {e}");
                false
            }
        }
    }

    fn verify_path(
        chain: &[SigningCertificate],
        trusted_roots: &[SigningCertificate],
    ) -> SigningResult<bool> {
        let mut store = X509StoreBuilder::new()?;
        for root in trusted_roots {
            store.add_cert(root.to_openssl()?)?;
        }
        let store = store.build();

        let leaf = chain[0].to_openssl()?;
        let mut untrusted: Stack<X509> = Stack::new()?;
        for cert in &chain[1..] {
            untrusted.push(cert.to_openssl()?)?;
        }

        let mut context = X509StoreContext::new()?;
        let valid = context.init(&store, &leaf, &untrusted, |ctx| {
            let ok = ctx.verify_cert()?;
            if !ok {
                log::debug!("Chain verification failed: {}", ctx.error());
            }
            Ok(ok)
        })?;
        Ok(valid)
    }

    /// Usable for signing right now.
    #[must_use]
    pub fn is_eligible(cert: &SigningCertificate) -> bool {
        Self::is_eligible_at(cert, SystemTime::now())
    }

    #[must_use]
    pub fn is_eligible_at(cert: &SigningCertificate, now: SystemTime) -> bool {
        !Self::is_expired_at(cert, now)
            && !Self::is_not_yet_valid_at(cert, now)
            && Self::is_digital_signature_allowed(cert)
            && Self::is_end_entity(cert)
    }

    /// Drop duplicates, then keep descriptors whose certificate is eligible.
    /// Descriptors with no certificate yet (file-backed) are kept; their
    /// certificate is checked once the provider has opened the file.
    #[must_use]
    pub fn filter_eligible(candidates: Vec<CredentialDescriptor>) -> Vec<CredentialDescriptor> {
        Self::filter_eligible_at(candidates, SystemTime::now())
    }

    #[must_use]
    pub fn filter_eligible_at(
        candidates: Vec<CredentialDescriptor>,
        now: SystemTime,
    ) -> Vec<CredentialDescriptor> {
        let mut distinct: Vec<CredentialDescriptor> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !distinct.contains(&candidate) {
                distinct.push(candidate);
            }
        }
        distinct
            .into_iter()
            .filter(|d| match d.certificate.as_ref() {
                Some(cert) => {
                    let eligible = Self::is_eligible_at(cert, now);
                    if !eligible {
                        log::debug!("Filtered out ineligible certificate {cert:?}");
                    }
                    eligible
                }
                None => true,
            })
            .collect()
    }

    /// Summary used for listings and pre-sign logging.
    #[must_use]
    pub fn analyze(cert: &SigningCertificate) -> CertificateAnalysis {
        Self::analyze_at(cert, SystemTime::now())
    }

    #[must_use]
    pub fn analyze_at(cert: &SigningCertificate, now: SystemTime) -> CertificateAnalysis {
        let mut analysis = CertificateAnalysis {
            is_signing_suitable: false,
            days_until_expiry: days_between(now, cert.not_after()),
            can_digital_sign: Self::is_digital_signature_allowed(cert),
            is_end_entity: Self::is_end_entity(cert),
            warnings: Vec::new(),
            subject: cert.subject_name(),
            issuer: cert.issuer_name(),
            serial_number: cert.serial_hex(),
        };

        log::debug!("Certificate subject: {}", analysis.subject);
        log::debug!("Certificate issuer: {}", analysis.issuer);

        if Self::is_expired_at(cert, now) {
            analysis.warnings.push("Certificate has expired".to_string());
        } else if analysis.days_until_expiry < EXPIRY_WARNING_DAYS {
            analysis.warnings.push(format!(
                "Certificate expires in {} days",
                analysis.days_until_expiry
            ));
        }
        if Self::is_not_yet_valid_at(cert, now) {
            analysis
                .warnings
                .push("Certificate is not yet valid".to_string());
        }
        if !analysis.can_digital_sign {
            analysis
                .warnings
                .push("Certificate key usage does not allow digital signatures".to_string());
        }
        if !analysis.is_end_entity {
            analysis
                .warnings
                .push("Certificate is a CA certificate".to_string());
        }
        if !Self::is_signature_algorithm_secure(cert) {
            analysis.warnings.push(format!(
                "Certificate uses a weak signature algorithm ({})",
                cert.signature_algorithm_name()
            ));
        }
        if Self::is_self_signed(cert) {
            analysis
                .warnings
                .push("Certificate is self-signed - may not be trusted by all systems".to_string());
        }

        analysis.is_signing_suitable = Self::is_eligible_at(cert, now);
        if analysis.is_signing_suitable {
            log::info!("Certificate {} is suitable for signing", analysis.serial_number);
        } else {
            log::warn!(
                "Certificate {} is NOT suitable for signing",
                analysis.serial_number
            );
        }
        for warning in &analysis.warnings {
            log::warn!("  - {warning}");
        }
        analysis
    }
}

fn days_between(from: SystemTime, to: SystemTime) -> i64 {
    let seconds = match to.duration_since(from) {
        Ok(ahead) => i64::try_from(ahead.as_secs()).unwrap_or(i64::MAX),
        Err(behind) => -i64::try_from(behind.duration().as_secs()).unwrap_or(i64::MAX),
    };
    seconds / SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn days_between_signs() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000 * 86_400);
        assert_eq!(days_between(now, now + Duration::from_secs(3 * 86_400)), 3);
        assert_eq!(days_between(now, now - Duration::from_secs(2 * 86_400)), -2);
    }

    #[test]
    fn empty_chain_is_invalid() {
        assert!(!CertificateValidator::is_chain_valid(&[], &[], 5));
    }
}
