//! PKCS#11 hardware token provider.
//!
//! Enumeration logs into each token found through the configured modules and
//! lists certificates that have a private key with the same `CKA_ID`.
//! Signing re-opens the selected token and is torn down after every attempt.

use super::os_store::serial_matches;
use super::{chain_from_parts, CredentialProvider, PrivateKeyHandle};
use crate::domain::asn1::ecdsa_raw_to_der;
use crate::domain::certificate::{CertificateChain, KeyAlgorithm, SigningCertificate};
use crate::domain::descriptor::CredentialDescriptor;
use crate::domain::session::SessionSlot;
use crate::domain::types::{KeystoreKind, Secret};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::secret_retry::{acquire_secret, SecretKind, SecretPrompt, Verdict};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Longest issuer walk when collecting a chain from token objects.
const MAX_CHAIN_DEPTH: usize = 8;

/// Which certificate on which token to sign with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSelection {
    pub library_path: PathBuf,
    pub token_serial: String,
    pub certificate_serial: String,
}

impl TokenSelection {
    /// Selection from a hardware descriptor.
    pub fn from_descriptor(descriptor: &CredentialDescriptor) -> SigningResult<Self> {
        match (
            descriptor.kind,
            &descriptor.library_path,
            &descriptor.token_serial,
            &descriptor.certificate,
        ) {
            (KeystoreKind::HardwareToken, Some(lib), Some(serial), Some(cert)) => Ok(Self {
                library_path: lib.clone(),
                token_serial: serial.clone(),
                certificate_serial: cert.serial_hex(),
            }),
            _ => Err(SigningError::InvalidInput(
                "hardware selection needs a token serial, a library path and a certificate"
                    .to_string(),
            )),
        }
    }
}

/// Open token state for one signing attempt.
struct TokenSession {
    session: Session,
    key: ObjectHandle,
    certificate: SigningCertificate,
    chain: CertificateChain,
    // Replayed when the token drops the login between unlock and signing.
    secret: Secret,
    // Dropped last: the module stays loaded while the session is open.
    _context: Pkcs11,
}

pub struct Pkcs11Provider {
    library_paths: Vec<PathBuf>,
    prompt: Box<dyn SecretPrompt>,
    selection: Option<TokenSelection>,
    session: SessionSlot<TokenSession>,
}

impl Pkcs11Provider {
    #[must_use]
    pub fn new(library_paths: Vec<PathBuf>, prompt: Box<dyn SecretPrompt>) -> Self {
        Self {
            library_paths,
            prompt,
            selection: None,
            session: SessionSlot::empty(),
        }
    }

    #[must_use]
    pub fn library_paths(&self) -> &[PathBuf] {
        &self.library_paths
    }

    /// Select the certificate used by the fetch operations.
    pub fn select(&mut self, selection: TokenSelection) {
        if self.selection.as_ref() != Some(&selection) {
            self.session.clear();
        }
        self.selection = Some(selection);
    }

    fn session(&mut self) -> SigningResult<&mut TokenSession> {
        let Self {
            prompt,
            selection,
            session,
            ..
        } = self;
        let selection = selection.as_ref().ok_or_else(|| {
            SigningError::CertificateNotFound("no hardware token certificate selected".to_string())
        })?;
        session.get_or_open(|| open_token_session(selection, prompt.as_mut()))
    }

    fn list_library(
        &mut self,
        library: &Path,
        out: &mut Vec<CredentialDescriptor>,
    ) -> SigningResult<()> {
        let context = load_module(library)?;
        for slot in context.get_slots_with_token()? {
            match self.list_token(&context, slot, library) {
                Ok(mut found) => out.append(&mut found),
                Err(e) if e.is_cancellation() => {
                    log::info!("Skipping token in slot {}: login cancelled", slot.id());
                }
                Err(e) => log::warn!("Skipping token in slot {}: {e}", slot.id()),
            }
        }
        Ok(())
    }

    fn list_token(
        &mut self,
        context: &Pkcs11,
        slot: Slot,
        library: &Path,
    ) -> SigningResult<Vec<CredentialDescriptor>> {
        let info = context.get_token_info(slot)?;
        let token_serial = info.serial_number().trim().to_string();
        let token_label = info.label().trim().to_string();
        let session = context.open_ro_session(slot)?;
        login(&session, self.prompt.as_mut(), &token_label)?;

        let certificates = token_certificates(&session)?;
        let mut found = Vec::new();
        for (id, cert) in certificates {
            if find_private_key(&session, &id)?.is_none() {
                log::debug!("Certificate {} on {token_label} has no private key", cert.serial_hex());
                continue;
            }
            found.push(CredentialDescriptor::hardware(
                cert,
                token_serial.clone(),
                library.to_path_buf(),
                Some(token_label.clone()),
            ));
        }
        let _ = session.logout();
        Ok(found)
    }
}

fn load_module(library: &Path) -> SigningResult<Pkcs11> {
    let context = Pkcs11::new(library).map_err(|e| {
        SigningError::StoreInitialization(format!(
            "Failed to load PKCS#11 module {}: {e}",
            library.display()
        ))
    })?;
    match context.initialize(CInitializeArgs::OsThreads) {
        Ok(()) | Err(CkError::AlreadyInitialized) => Ok(context),
        Err(e) => Err(SigningError::StoreInitialization(format!(
            "Failed to initialize PKCS#11 module {}: {e}",
            library.display()
        ))),
    }
}

/// User login with bounded retries. A rejected PIN counts as an attempt, a
/// locked PIN aborts.
fn login(session: &Session, prompt: &mut dyn SecretPrompt, target: &str) -> SigningResult<Secret> {
    let (secret, ()) = acquire_secret(prompt, SecretKind::TokenPin, target, |candidate| {
        let pin = AuthPin::new(candidate.expose().to_string());
        match session.login(UserType::User, Some(&pin)) {
            Ok(()) | Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {
                Ok(Verdict::Accepted(()))
            }
            Err(CkError::Pkcs11(
                RvError::PinIncorrect | RvError::PinInvalid | RvError::PinLenRange,
                _,
            )) => Ok(Verdict::Rejected),
            Err(e) => Err(e.into()),
        }
    })?;
    Ok(secret)
}

/// Certificates on the token with their `CKA_ID`.
fn token_certificates(session: &Session) -> SigningResult<Vec<(Vec<u8>, SigningCertificate)>> {
    let handles = session.find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])?;
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let attributes = session.get_attributes(handle, &[AttributeType::Value, AttributeType::Id])?;
        let mut value = None;
        let mut id = Vec::new();
        for attribute in attributes {
            match attribute {
                Attribute::Value(v) => value = Some(v),
                Attribute::Id(i) => id = i,
                _ => {}
            }
        }
        let Some(der) = value else { continue };
        match SigningCertificate::from_der(der) {
            Ok(cert) => out.push((id, cert)),
            Err(e) => log::debug!("Skipping unreadable token certificate: {e}"),
        }
    }
    Ok(out)
}

fn find_private_key(session: &Session, id: &[u8]) -> SigningResult<Option<ObjectHandle>> {
    if id.is_empty() {
        return Ok(None);
    }
    let keys = session.find_objects(&[
        Attribute::Class(ObjectClass::PRIVATE_KEY),
        Attribute::Id(id.to_vec()),
    ])?;
    Ok(keys.into_iter().next())
}

/// Walk issuer names through the other certificates on the token.
fn collect_issuers(
    leaf: &SigningCertificate,
    pool: &[SigningCertificate],
) -> Vec<SigningCertificate> {
    let mut chain: Vec<SigningCertificate> = Vec::new();
    let mut current = leaf.clone();
    for _ in 0..MAX_CHAIN_DEPTH {
        if current.subject_name() == current.issuer_name() {
            break;
        }
        let Some(issuer) = pool
            .iter()
            .find(|c| c.subject_name() == current.issuer_name() && **c != current)
        else {
            break;
        };
        if chain.contains(issuer) {
            break;
        }
        chain.push(issuer.clone());
        current = issuer.clone();
    }
    chain
}

fn open_token_session(
    selection: &TokenSelection,
    prompt: &mut dyn SecretPrompt,
) -> SigningResult<TokenSession> {
    let context = load_module(&selection.library_path)?;
    let slot = context
        .get_slots_with_token()?
        .into_iter()
        .find(|slot| {
            context
                .get_token_info(*slot)
                .is_ok_and(|info| info.serial_number().trim() == selection.token_serial)
        })
        .ok_or_else(|| {
            SigningError::StoreInitialization(format!(
                "Token with serial {} not present",
                selection.token_serial
            ))
        })?;

    let session = context.open_ro_session(slot)?;
    let secret = login(&session, prompt, &selection.token_serial)?;

    let certificates = token_certificates(&session)?;
    let (id, certificate) = certificates
        .iter()
        .find(|(_, c)| serial_matches(c, &selection.certificate_serial))
        .cloned()
        .ok_or_else(|| {
            SigningError::CertificateNotFound(format!(
                "Certificate with serial {} not found on token {}",
                selection.certificate_serial, selection.token_serial
            ))
        })?;
    let key = find_private_key(&session, &id)?.ok_or_else(|| {
        SigningError::PrivateKeyAccessDenied(format!(
            "No private key matches certificate {}",
            certificate.serial_hex()
        ))
    })?;

    let pool: Vec<SigningCertificate> = certificates.into_iter().map(|(_, c)| c).collect();
    let chain = chain_from_parts(certificate.clone(), collect_issuers(&certificate, &pool))?;

    log::info!(
        "Opened token {} for certificate {}",
        selection.token_serial,
        certificate.serial_hex()
    );
    Ok(TokenSession {
        session,
        key,
        certificate,
        chain,
        secret,
        _context: context,
    })
}

struct TokenKey<'a> {
    session: &'a Session,
    secret: &'a Secret,
    key: ObjectHandle,
    algorithm: KeyAlgorithm,
}

impl TokenKey<'_> {
    fn sign_raw(&self, mechanism: &Mechanism, data: &[u8]) -> SigningResult<Vec<u8>> {
        match self.session.sign(mechanism, self.key, data) {
            Err(CkError::Pkcs11(RvError::UserNotLoggedIn, _)) => {
                log::debug!("Token session lost its login; logging in again");
                let pin = AuthPin::new(self.secret.expose().to_string());
                self.session.login(UserType::User, Some(&pin))?;
                Ok(self.session.sign(mechanism, self.key, data)?)
            }
            other => other.map_err(SigningError::from),
        }
    }
}

impl PrivateKeyHandle for TokenKey<'_> {
    fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    fn sign_sha256(&mut self, data: &[u8]) -> SigningResult<Vec<u8>> {
        match self.algorithm {
            KeyAlgorithm::Rsa => self.sign_raw(&Mechanism::Sha256RsaPkcs, data),
            KeyAlgorithm::Ec => {
                let digest = Sha256::digest(data);
                let raw = self.sign_raw(&Mechanism::Ecdsa, &digest)?;
                ecdsa_raw_to_der(&raw)
            }
        }
    }
}

impl CredentialProvider for Pkcs11Provider {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::HardwareToken
    }

    fn provider_name(&self) -> String {
        "PKCS#11".to_string()
    }

    fn list_candidates(&mut self) -> SigningResult<Vec<CredentialDescriptor>> {
        let mut found = Vec::new();
        for library in self.library_paths.clone() {
            if let Err(e) = self.list_library(&library, &mut found) {
                log::warn!("Skipping PKCS#11 module {}: {e}", library.display());
            }
        }
        log::info!("PKCS#11 tokens listed {} certificate(s)", found.len());
        Ok(found)
    }

    fn fetch_private_key(&mut self) -> SigningResult<Box<dyn PrivateKeyHandle + '_>> {
        let token = self.session()?;
        let algorithm = token.certificate.key_algorithm()?;
        Ok(Box::new(TokenKey {
            session: &token.session,
            secret: &token.secret,
            key: token.key,
            algorithm,
        }))
    }

    fn fetch_certificate(&mut self) -> SigningResult<SigningCertificate> {
        Ok(self.session()?.certificate.clone())
    }

    fn fetch_certificate_chain(&mut self) -> SigningResult<CertificateChain> {
        Ok(self.session()?.chain.clone())
    }

    fn clear_session(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        if let Some(token) = self.session.get() {
            let _ = token.session.logout();
        }
        if self.session.clear() {
            log::debug!("Closed PKCS#11 session and released module");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::secret_retry::SecretRequest;

    fn no_prompt() -> Box<dyn SecretPrompt> {
        Box::new(|_: &SecretRequest| -> Option<Secret> { None })
    }

    #[test]
    fn selection_requires_hardware_descriptor() {
        let file = CredentialDescriptor::file(PathBuf::from("/tmp/a.p12"));
        assert!(matches!(
            TokenSelection::from_descriptor(&file),
            Err(SigningError::InvalidInput(_))
        ));
    }

    #[test]
    fn missing_module_is_skipped_during_listing() {
        let mut provider =
            Pkcs11Provider::new(vec![PathBuf::from("/nonexistent/libpkcs11.so")], no_prompt());
        assert!(provider.list_candidates().unwrap().is_empty());
    }

    #[test]
    fn fetch_without_selection_is_not_found() {
        let mut provider = Pkcs11Provider::new(Vec::new(), no_prompt());
        assert!(matches!(
            provider.fetch_certificate(),
            Err(SigningError::CertificateNotFound(_))
        ));
    }
}
