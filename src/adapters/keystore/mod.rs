//! Credential provider trait and its three custodians.
//!
//! Implementations:
//! - OS certificate store, reached through [`os_store::PlatformKeyStore`]
//! - PKCS#11 hardware tokens via `cryptoki`
//! - Password-protected PKCS#12 files via `openssl`

pub mod os_store;
pub mod pkcs11;
pub mod pkcs12;

use crate::domain::certificate::{CertificateChain, KeyAlgorithm, SigningCertificate};
use crate::domain::descriptor::CredentialDescriptor;
use crate::domain::types::KeystoreKind;
use crate::infra::error::{SigningError, SigningResult};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;

pub use os_store::{MemoryKeyStore, OsStoreProvider, PlatformKeyStore, StoreEntry};
pub use pkcs11::Pkcs11Provider;
pub use pkcs12::Pkcs12Provider;

/// A usable private key, possibly living on a device.
pub trait PrivateKeyHandle {
    /// Key family, which decides the CMS signature algorithm.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Sign `data` with SHA-256.
    ///
    /// RSA keys produce a PKCS#1 v1.5 signature; EC keys produce a
    /// DER-encoded ECDSA signature.
    ///
    /// # Errors
    ///
    /// Returns error if the key refuses the operation or the device reports
    /// a failure. A PIN prompt cancelled on the device maps to
    /// `UserCancelled`.
    fn sign_sha256(&mut self, data: &[u8]) -> SigningResult<Vec<u8>>;
}

/// One credential custodian.
///
/// Providers own their session and take `&mut self`, so a provider serves one
/// signing attempt at a time.
pub trait CredentialProvider {
    /// Store kind this provider serves.
    fn kind(&self) -> KeystoreKind;

    /// Human-readable name of the backing provider.
    fn provider_name(&self) -> String;

    /// Enumerate selectable credentials.
    ///
    /// Entries that cannot be read are skipped and logged.
    ///
    /// # Errors
    ///
    /// Returns error only if the store as a whole cannot be opened.
    fn list_candidates(&mut self) -> SigningResult<Vec<CredentialDescriptor>>;

    /// Private key of the selected credential.
    ///
    /// # Errors
    ///
    /// Returns `CertificateNotFound`, `PrivateKeyAccessDenied` or
    /// `UserCancelled`.
    fn fetch_private_key(&mut self) -> SigningResult<Box<dyn PrivateKeyHandle + '_>>;

    /// Signing certificate of the selected credential.
    ///
    /// # Errors
    ///
    /// Returns `CertificateNotFound` if no matching entry exists.
    fn fetch_certificate(&mut self) -> SigningResult<SigningCertificate>;

    /// Chain of the selected credential, leaf first. Falls back to the leaf
    /// alone, flagged as degraded, when the store has no chain.
    ///
    /// # Errors
    ///
    /// Returns error if not even the leaf is available.
    fn fetch_certificate_chain(&mut self) -> SigningResult<CertificateChain>;

    /// Forget the unlocked session (store handle, key, certificate, chain and
    /// secret) so the next operation prompts again. Called when an attempt
    /// fails after the secret was accepted.
    fn clear_session(&mut self) {}

    /// Release per-attempt resources. Called after every signing attempt,
    /// successful or not. Hardware providers close their sessions here.
    fn reset(&mut self) {}
}

/// Software key held by OpenSSL.
pub struct SoftwareKey {
    key: PKey<Private>,
}

impl SoftwareKey {
    pub fn new(key: PKey<Private>) -> SigningResult<Self> {
        match key.id() {
            Id::RSA | Id::EC => Ok(Self { key }),
            other => Err(SigningError::PrivateKeyAccessDenied(format!(
                "unsupported private key type {other:?}"
            ))),
        }
    }
}

impl PrivateKeyHandle for SoftwareKey {
    fn algorithm(&self) -> KeyAlgorithm {
        if self.key.id() == Id::EC {
            KeyAlgorithm::Ec
        } else {
            KeyAlgorithm::Rsa
        }
    }

    fn sign_sha256(&mut self, data: &[u8]) -> SigningResult<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// Build a chain from a leaf and whatever extra certificates a store holds.
/// Certificates equal to the leaf are skipped.
pub(crate) fn chain_from_parts(
    leaf: SigningCertificate,
    extra: Vec<SigningCertificate>,
) -> SigningResult<CertificateChain> {
    let rest: Vec<_> = extra.into_iter().filter(|c| *c != leaf).collect();
    if rest.is_empty() {
        log::warn!("Certificate chain is missing. Using only signer certificate.");
        return Ok(CertificateChain::leaf_only(leaf));
    }
    let mut certs = Vec::with_capacity(rest.len() + 1);
    certs.push(leaf);
    certs.extend(rest);
    CertificateChain::new(certs)
}
