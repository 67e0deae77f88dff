//! PKCS#12 (PFX) file provider.

use super::{chain_from_parts, CredentialProvider, PrivateKeyHandle, SoftwareKey};
use crate::domain::certificate::{CertificateChain, SigningCertificate};
use crate::domain::descriptor::CredentialDescriptor;
use crate::domain::session::SessionSlot;
use crate::domain::types::KeystoreKind;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::secret_retry::{acquire_secret, SecretKind, SecretPrompt, Verdict};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use std::path::{Path, PathBuf};

/// Everything unlocked from the file, held together.
struct Pkcs12Session {
    key: PKey<Private>,
    certificate: SigningCertificate,
    chain: CertificateChain,
}

pub struct Pkcs12Provider {
    path: PathBuf,
    prompt: Box<dyn SecretPrompt>,
    session: SessionSlot<Pkcs12Session>,
}

impl Pkcs12Provider {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, prompt: Box<dyn SecretPrompt>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            prompt,
            session: SessionSlot::empty(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.session.is_open()
    }

    /// Unlock the file (prompting if needed) and return the backfilled descriptor.
    pub fn unlock(&mut self) -> SigningResult<CredentialDescriptor> {
        let certificate = self.session()?.certificate.clone();
        Ok(CredentialDescriptor::file(self.path.clone()).with_certificate(certificate))
    }

    fn session(&mut self) -> SigningResult<&mut Pkcs12Session> {
        let Self {
            path,
            prompt,
            session,
        } = self;
        session.get_or_open(|| open_session(path, prompt.as_mut()))
    }
}

fn read_container(path: &Path) -> SigningResult<Pkcs12> {
    let der = std::fs::read(path).map_err(|e| {
        SigningError::StoreInitialization(format!(
            "Failed to read PKCS#12 file {}: {e}",
            path.display()
        ))
    })?;
    Pkcs12::from_der(&der).map_err(|e| {
        SigningError::StoreInitialization(format!(
            "{} is not a PKCS#12 file: {e}",
            path.display()
        ))
    })
}

fn open_session(path: &Path, prompt: &mut dyn SecretPrompt) -> SigningResult<Pkcs12Session> {
    let container = read_container(path)?;
    let target = path.display().to_string();

    // Throwaway parse per candidate; nothing is kept from a rejected attempt.
    let (secret, ()) = acquire_secret(prompt, SecretKind::FilePassword, &target, |candidate| {
        Ok(match container.parse2(candidate.expose()) {
            Ok(_) => Verdict::Accepted(()),
            Err(_) => Verdict::Rejected,
        })
    })?;

    let parsed = container.parse2(secret.expose()).map_err(|e| {
        SigningError::StoreInitialization(format!("Failed to load PKCS12 keystore: {e}"))
    })?;
    let key = parsed.pkey.ok_or_else(|| {
        SigningError::CertificateNotFound("No private key entry found in keystore.".to_string())
    })?;
    let leaf = parsed.cert.ok_or_else(|| {
        SigningError::CertificateNotFound("Certificate not found in keystore.".to_string())
    })?;
    let certificate = SigningCertificate::from_openssl(&leaf)?;
    let extra = parsed
        .ca
        .into_iter()
        .flatten()
        .map(|c| SigningCertificate::from_openssl(&c))
        .collect::<SigningResult<Vec<_>>>()?;
    let chain = chain_from_parts(certificate.clone(), extra)?;

    log::info!(
        "Opened PKCS#12 file {} (chain length {})",
        path.display(),
        chain.len()
    );
    Ok(Pkcs12Session {
        key,
        certificate,
        chain,
    })
}

impl CredentialProvider for Pkcs12Provider {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::File
    }

    fn provider_name(&self) -> String {
        "OpenSSL PKCS#12".to_string()
    }

    fn list_candidates(&mut self) -> SigningResult<Vec<CredentialDescriptor>> {
        let descriptor = CredentialDescriptor::file(self.path.clone());
        Ok(vec![match self.session.get() {
            Some(session) => descriptor.with_certificate(session.certificate.clone()),
            None => descriptor,
        }])
    }

    fn fetch_private_key(&mut self) -> SigningResult<Box<dyn PrivateKeyHandle + '_>> {
        let key = self.session()?.key.clone();
        match SoftwareKey::new(key) {
            Ok(handle) => Ok(Box::new(handle)),
            Err(e) => {
                self.clear_session();
                Err(e)
            }
        }
    }

    fn fetch_certificate(&mut self) -> SigningResult<SigningCertificate> {
        Ok(self.session()?.certificate.clone())
    }

    fn fetch_certificate_chain(&mut self) -> SigningResult<CertificateChain> {
        Ok(self.session()?.chain.clone())
    }

    fn clear_session(&mut self) {
        if self.session.clear() {
            log::debug!("Cleared PKCS#12 session for {}", self.path.display());
        }
    }
}
