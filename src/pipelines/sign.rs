//! `SignatureEngine` orchestrates one signing attempt.
//!
//! Idle -> ChainResolved -> EnvelopeSized -> Signed -> Finalized, with
//! Failed absorbing any error. Providers are cleaned up on every exit.

use crate::adapters::keystore::CredentialProvider;
use crate::adapters::revocation::{collect_crls, RevocationSource};
use crate::adapters::timestamp_http_client::TimestampClient;
use crate::domain::appearance::AppearanceConfiguration;
use crate::domain::certificate::CertificateChain;
use crate::domain::constants::APP_AUTHOR;
use crate::domain::envelope::estimate_envelope_size;
use crate::domain::pdf::PdfDocument;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::appearance_builder::AppearanceBuilder;
use crate::services::cert_validator::CertificateValidator;
use crate::services::cms_builder::CmsBuilder;
use crate::services::pdf_preparer::PdfPreparer;
use crate::services::timestamp_parser::TimestampParserService;
use crate::services::timestamp_request_builder::TimestampRequestBuilder;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, Local};
use std::path::Path;
use std::time::SystemTime;

/// Progress of the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    ChainResolved,
    EnvelopeSized,
    Signed,
    Finalized,
    Failed,
}

/// Output of a successful attempt.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    bytes: Vec<u8>,
    field_name: String,
    byte_range: [usize; 4],
    container_len: usize,
    reserved_len: usize,
}

impl SignedDocument {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    #[must_use]
    pub fn byte_range(&self) -> [usize; 4] {
        self.byte_range
    }

    /// DER size of the embedded container.
    #[must_use]
    pub fn container_len(&self) -> usize {
        self.container_len
    }

    /// Bytes reserved for the container by the envelope estimate.
    #[must_use]
    pub fn reserved_len(&self) -> usize {
        self.reserved_len
    }

    pub fn write_to(&self, path: &Path) -> SigningResult<()> {
        std::fs::write(path, &self.bytes).map_err(|e| {
            SigningError::IoError(format!("Failed to write output file {}: {e}", path.display()))
        })
    }
}

pub struct SignatureEngine {
    state: EngineState,
    author: String,
    revocation: Option<Box<dyn RevocationSource>>,
    signing_time: Option<DateTime<FixedOffset>>,
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EngineState::Idle,
            author: APP_AUTHOR.to_string(),
            revocation: None,
            signing_time: None,
        }
    }

    /// Author shown in the signature creator string.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Source of CRLs embedded when LTV is enabled.
    #[must_use]
    pub fn with_revocation_source(mut self, source: Box<dyn RevocationSource>) -> Self {
        self.revocation = Some(source);
        self
    }

    /// Fixed signing time instead of the local clock.
    #[must_use]
    pub fn with_signing_time(mut self, time: DateTime<FixedOffset>) -> Self {
        self.signing_time = Some(time);
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Sign `document` with the credential `provider` currently selects.
    ///
    /// # Errors
    ///
    /// Taxonomy errors (`UserCancelled`, `IncorrectPin`, `CertificateChain`,
    /// `TimestampConfiguration`, ...) are returned unchanged; anything else
    /// is wrapped in `SigningProcess`.
    pub fn sign(
        &mut self,
        document: Vec<u8>,
        provider: &mut dyn CredentialProvider,
        appearance: &AppearanceConfiguration,
        timestamp_client: Option<&dyn TimestampClient>,
    ) -> SigningResult<SignedDocument> {
        self.state = EngineState::Idle;
        log::info!("Signing with {}", provider.provider_name());

        let result = self.run(document, provider, appearance, timestamp_client);
        if let Err(e) = &result {
            self.state = EngineState::Failed;
            if e.is_cancellation() {
                log::info!("Signing cancelled: {e}");
            } else {
                log::error!("Signing failed: {e}");
            }
            provider.clear_session();
        }
        provider.reset();

        result.map_err(|e| {
            if e.is_classified() {
                e
            } else {
                SigningError::signing_process("Failed to sign document", &e)
            }
        })
    }

    fn run(
        &mut self,
        document: Vec<u8>,
        provider: &mut dyn CredentialProvider,
        appearance: &AppearanceConfiguration,
        timestamp_client: Option<&dyn TimestampClient>,
    ) -> SigningResult<SignedDocument> {
        let timestamp_client = check_preconditions(appearance, timestamp_client)?;
        appearance.validate()?;
        let doc = PdfDocument::load(document)?;
        let now = self
            .signing_time
            .unwrap_or_else(|| Local::now().into());

        let chain = resolve_chain(provider)?;
        let leaf = chain.leaf();
        if !CertificateValidator::is_eligible_at(leaf, SystemTime::from(now)) {
            return Err(SigningError::CertificateError(format!(
                "certificate {} is not usable for signing at this time",
                leaf.subject_name()
            )));
        }
        self.state = EngineState::ChainResolved;
        log::info!(
            "Certificate chain resolved: {} certificate(s){}",
            chain.len(),
            if chain.is_degraded() { " (signer only)" } else { "" }
        );

        let plan = AppearanceBuilder::new(appearance, self.author.as_str()).build(
            leaf,
            &doc.field_names()?,
            now,
        )?;

        let reserved = estimate_envelope_size(
            chain.len(),
            appearance.enable_timestamp,
            appearance.enable_ltv,
        );
        let prepared = PdfPreparer::prepare(&doc, &plan, reserved)?;
        drop(doc);
        self.state = EngineState::EnvelopeSized;
        log::info!("Reserved {reserved} bytes for the signature container");

        let digest = prepared.digest()?;
        let (algorithm, attributes, signature) = {
            let mut key = provider.fetch_private_key()?;
            let algorithm = key.algorithm();
            let attributes = CmsBuilder::new(&chain, algorithm).signed_attributes(&digest)?;
            let signature = key.sign_sha256(attributes.to_be_signed())?;
            (algorithm, attributes, signature)
        };
        let builder = CmsBuilder::new(&chain, algorithm);

        let crls = if appearance.enable_ltv {
            match &self.revocation {
                Some(source) => collect_crls(source.as_ref(), chain.certificates()),
                None => {
                    log::warn!("LTV requested without a revocation source; no CRLs embedded");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let token = match timestamp_client {
            Some(client) => {
                let request = TimestampRequestBuilder::new().build_request(&signature)?;
                let response = client.post_request(&request.der)?;
                Some(TimestampParserService::parse_response(&response, &request)?.into_der())
            }
            None => None,
        };

        let container = builder.assemble(&attributes, &signature, &crls, token.as_deref())?;
        self.state = EngineState::Signed;

        let byte_range = prepared.byte_range();
        let bytes = prepared.embed(&container)?;
        self.state = EngineState::Finalized;
        log::info!("Signature field {} finalized", plan.field_name);

        Ok(SignedDocument {
            bytes,
            field_name: plan.field_name,
            byte_range,
            container_len: container.len(),
            reserved_len: reserved,
        })
    }
}

/// A requested timestamp needs a client with a URL; returns the client to
/// use, or `None` when no timestamp was requested.
fn check_preconditions<'c>(
    appearance: &AppearanceConfiguration,
    timestamp_client: Option<&'c dyn TimestampClient>,
) -> SigningResult<Option<&'c dyn TimestampClient>> {
    if !appearance.enable_timestamp {
        return Ok(None);
    }
    match timestamp_client {
        None => Err(SigningError::TimestampConfiguration(
            "Timestamp requested but no timestamp authority is configured".to_string(),
        )),
        Some(client) if client.url().trim().is_empty() => Err(
            SigningError::TimestampConfiguration("Timestamp authority URL is empty".to_string()),
        ),
        Some(client) => Ok(Some(client)),
    }
}

fn resolve_chain(provider: &mut dyn CredentialProvider) -> SigningResult<CertificateChain> {
    provider.fetch_certificate_chain().map_err(|e| match e {
        SigningError::UserCancelled(_)
        | SigningError::IncorrectPin(_)
        | SigningError::MaxPinAttemptsExceeded(_)
        | SigningError::PrivateKeyAccessDenied(_) => e,
        other => SigningError::CertificateChain(format!("Failed to get certificate chain: {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::keystore::PrivateKeyHandle;
    use crate::domain::certificate::SigningCertificate;
    use crate::domain::descriptor::CredentialDescriptor;
    use crate::domain::types::KeystoreKind;

    /// Provider that fails every fetch and records cleanup calls.
    #[derive(Default)]
    struct Unreachable {
        cleared: usize,
        resets: usize,
        fetches: usize,
    }

    impl CredentialProvider for Unreachable {
        fn kind(&self) -> KeystoreKind {
            KeystoreKind::File
        }
        fn provider_name(&self) -> String {
            "unreachable".into()
        }
        fn list_candidates(&mut self) -> SigningResult<Vec<CredentialDescriptor>> {
            Ok(Vec::new())
        }
        fn fetch_private_key(&mut self) -> SigningResult<Box<dyn PrivateKeyHandle + '_>> {
            self.fetches += 1;
            Err(SigningError::PrivateKeyAccessDenied("no key".into()))
        }
        fn fetch_certificate(&mut self) -> SigningResult<SigningCertificate> {
            self.fetches += 1;
            Err(SigningError::CertificateNotFound("none".into()))
        }
        fn fetch_certificate_chain(&mut self) -> SigningResult<CertificateChain> {
            self.fetches += 1;
            Err(SigningError::StoreInitialization("store offline".into()))
        }
        fn clear_session(&mut self) {
            self.cleared += 1;
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    struct BlankUrl;

    impl TimestampClient for BlankUrl {
        fn url(&self) -> &str {
            " "
        }
        fn post_request(&self, _: &[u8]) -> SigningResult<Vec<u8>> {
            unreachable!("never contacted")
        }
    }

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\nxref\n0 4\n0000000000 65535 f \n0000000009 00000 n \n0000000058 00000 n \n0000000115 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n186\n%%EOF\n";

    #[test]
    fn timestamp_without_client_fails_before_any_crypto() {
        let mut engine = SignatureEngine::new();
        let mut provider = Unreachable::default();
        let mut appearance = AppearanceConfiguration::new(1, None);
        appearance.enable_timestamp = true;

        let err = engine
            .sign(PDF.to_vec(), &mut provider, &appearance, None)
            .unwrap_err();
        assert!(matches!(err, SigningError::TimestampConfiguration(_)));
        assert_eq!(provider.fetches, 0);
        assert_eq!(provider.resets, 1);
        assert_eq!(engine.state(), EngineState::Failed);

        let err = engine
            .sign(PDF.to_vec(), &mut provider, &appearance, Some(&BlankUrl))
            .unwrap_err();
        assert!(matches!(err, SigningError::TimestampConfiguration(_)));
        assert_eq!(provider.fetches, 0);
    }

    #[test]
    fn store_failure_becomes_chain_error_and_cleans_up() {
        let mut engine = SignatureEngine::new();
        let mut provider = Unreachable::default();
        let appearance = AppearanceConfiguration::new(1, None);

        let err = engine
            .sign(PDF.to_vec(), &mut provider, &appearance, None)
            .unwrap_err();
        assert!(matches!(err, SigningError::CertificateChain(ref m) if m.contains("store offline")));
        assert_eq!(provider.cleared, 1);
        assert_eq!(provider.resets, 1);
    }

    #[test]
    fn unclassified_errors_are_wrapped() {
        let mut engine = SignatureEngine::new();
        let mut provider = Unreachable::default();
        let appearance = AppearanceConfiguration::new(1, None);

        let err = engine
            .sign(b"not a pdf".to_vec(), &mut provider, &appearance, None)
            .unwrap_err();
        match err {
            SigningError::SigningProcess { context, .. } => {
                assert_eq!(context, "Failed to sign document");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(provider.fetches, 0);
    }

    #[test]
    fn invalid_appearance_is_rejected_early() {
        let mut engine = SignatureEngine::new();
        let mut provider = Unreachable::default();
        let mut appearance = AppearanceConfiguration::new(1, None);
        appearance.custom_text = Some("n".repeat(61));

        let err = engine
            .sign(PDF.to_vec(), &mut provider, &appearance, None)
            .unwrap_err();
        assert!(matches!(err, SigningError::SigningProcess { .. }));
        assert_eq!(provider.fetches, 0);
    }
}
