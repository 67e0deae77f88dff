//! OS certificate store provider.
//!
//! The native store (Windows `MY`, macOS keychain, NSS database) sits behind
//! [`PlatformKeyStore`]. [`MemoryKeyStore`] is the in-process implementation
//! an embedding application fills from its platform API.

use super::{chain_from_parts, CredentialProvider, PrivateKeyHandle, SoftwareKey};
use crate::domain::certificate::{CertificateChain, SigningCertificate};
use crate::domain::descriptor::CredentialDescriptor;
use crate::domain::types::KeystoreKind;
use crate::infra::error::{SigningError, SigningResult};
use openssl::pkey::{PKey, Private};

/// One alias of a platform store.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub alias: String,
    /// `None` for entries whose leaf is not an X.509 certificate.
    pub certificate: Option<SigningCertificate>,
    /// Issuer certificates, leaf excluded.
    pub chain: Vec<SigningCertificate>,
    pub has_private_key: bool,
}

/// Access to a platform certificate store.
pub trait PlatformKeyStore {
    /// Store name shown as the provider name.
    fn name(&self) -> String;

    /// Every alias in the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreInitialization` if the store cannot be opened.
    fn entries(&self) -> SigningResult<Vec<StoreEntry>>;

    /// Private key behind `alias`.
    ///
    /// # Errors
    ///
    /// Returns `PrivateKeyAccessDenied` if the platform refuses access.
    fn private_key(&self, alias: &str) -> SigningResult<Box<dyn PrivateKeyHandle + '_>>;
}

/// In-memory platform store.
#[derive(Default)]
pub struct MemoryKeyStore {
    name: String,
    entries: Vec<(StoreEntry, Option<PKey<Private>>)>,
}

impl MemoryKeyStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Add a key-bearing identity.
    pub fn add_identity(
        &mut self,
        alias: impl Into<String>,
        key: PKey<Private>,
        certificate: SigningCertificate,
        chain: Vec<SigningCertificate>,
    ) {
        self.entries.push((
            StoreEntry {
                alias: alias.into(),
                certificate: Some(certificate),
                chain,
                has_private_key: true,
            },
            Some(key),
        ));
    }

    /// Add a trusted certificate without a key.
    pub fn add_certificate(&mut self, alias: impl Into<String>, certificate: SigningCertificate) {
        self.entries.push((
            StoreEntry {
                alias: alias.into(),
                certificate: Some(certificate),
                chain: Vec::new(),
                has_private_key: false,
            },
            None,
        ));
    }

    /// Import every identity of a PKCS#12 blob.
    pub fn import_pkcs12(&mut self, der: &[u8], password: &str) -> SigningResult<()> {
        let parsed = openssl::pkcs12::Pkcs12::from_der(der)?
            .parse2(password)
            .map_err(|e| SigningError::StoreInitialization(format!("PKCS#12 import failed: {e}")))?;
        let (Some(key), Some(cert)) = (parsed.pkey, parsed.cert) else {
            return Err(SigningError::StoreInitialization(
                "PKCS#12 blob holds no key-bearing identity".to_string(),
            ));
        };
        let certificate = SigningCertificate::from_openssl(&cert)?;
        let chain = parsed
            .ca
            .into_iter()
            .flatten()
            .map(|c| SigningCertificate::from_openssl(&c))
            .collect::<SigningResult<Vec<_>>>()?;
        let alias = certificate.subject_name();
        self.add_identity(alias, key, certificate, chain);
        Ok(())
    }
}

impl PlatformKeyStore for MemoryKeyStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn entries(&self) -> SigningResult<Vec<StoreEntry>> {
        Ok(self.entries.iter().map(|(e, _)| e.clone()).collect())
    }

    fn private_key(&self, alias: &str) -> SigningResult<Box<dyn PrivateKeyHandle + '_>> {
        let key = self
            .entries
            .iter()
            .filter(|(e, _)| e.alias == alias)
            .find_map(|(_, k)| k.clone())
            .ok_or_else(|| {
                SigningError::PrivateKeyAccessDenied(format!("no private key for alias {alias}"))
            })?;
        Ok(Box::new(SoftwareKey::new(key)?))
    }
}

/// Serial comparison used to find the selected certificate: case-insensitive,
/// with one leading zero dropped from the requested value.
#[must_use]
pub fn serial_matches(cert: &SigningCertificate, requested: &str) -> bool {
    let requested = requested.trim();
    let requested = requested.strip_prefix('0').unwrap_or(requested);
    let actual = cert.serial_hex();
    let actual = actual.trim_start_matches('0');
    let actual = if actual.is_empty() { "0" } else { actual };
    actual.eq_ignore_ascii_case(requested)
}

pub struct OsStoreProvider {
    store: Box<dyn PlatformKeyStore>,
    serial_hex: Option<String>,
}

impl OsStoreProvider {
    #[must_use]
    pub fn new(store: Box<dyn PlatformKeyStore>) -> Self {
        Self {
            store,
            serial_hex: None,
        }
    }

    /// Select the certificate used by the fetch operations.
    pub fn select_serial(&mut self, serial_hex: impl Into<String>) {
        self.serial_hex = Some(serial_hex.into());
    }

    #[must_use]
    pub fn selected_serial(&self) -> Option<&str> {
        self.serial_hex.as_deref()
    }

    /// First key-bearing entry whose certificate carries the selected serial.
    /// Trusted copies of the same certificate without a key are passed over.
    fn find_entry(&self) -> SigningResult<StoreEntry> {
        let serial = self.serial_hex.as_deref().ok_or_else(|| {
            SigningError::CertificateNotFound("no certificate serial selected".to_string())
        })?;
        self.store
            .entries()?
            .into_iter()
            .find(|e| {
                e.has_private_key
                    && e.certificate
                        .as_ref()
                        .is_some_and(|c| serial_matches(c, serial))
            })
            .ok_or_else(|| {
                SigningError::CertificateNotFound(format!(
                    "No key-bearing certificate with serial {serial} found"
                ))
            })
    }
}

impl CredentialProvider for OsStoreProvider {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::OsStore
    }

    fn provider_name(&self) -> String {
        self.store.name()
    }

    fn list_candidates(&mut self) -> SigningResult<Vec<CredentialDescriptor>> {
        let entries = self.store.entries()?;
        let candidates: Vec<_> = entries
            .into_iter()
            .filter(|e| e.has_private_key)
            .filter_map(|e| match e.certificate {
                Some(cert) => Some(CredentialDescriptor::os_store(cert, Some(e.alias))),
                None => {
                    log::debug!("Skipping alias {} without an X.509 leaf", e.alias);
                    None
                }
            })
            .collect();
        log::info!(
            "{} listed {} key-bearing certificate(s)",
            self.store.name(),
            candidates.len()
        );
        Ok(candidates)
    }

    fn fetch_private_key(&mut self) -> SigningResult<Box<dyn PrivateKeyHandle + '_>> {
        let entry = self.find_entry()?;
        self.store.private_key(&entry.alias)
    }

    fn fetch_certificate(&mut self) -> SigningResult<SigningCertificate> {
        self.find_entry()?.certificate.ok_or_else(|| {
            SigningError::CertificateNotFound("Certificate not found or not X509".to_string())
        })
    }

    fn fetch_certificate_chain(&mut self) -> SigningResult<CertificateChain> {
        let entry = self.find_entry()?;
        let leaf = entry.certificate.ok_or_else(|| {
            SigningError::CertificateNotFound("Certificate not found or not X509".to_string())
        })?;
        chain_from_parts(leaf, entry.chain)
    }
}
