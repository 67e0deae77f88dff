//! Identifies one selectable credential: where it lives and, once known, its certificate.

use crate::domain::certificate::SigningCertificate;
use crate::domain::types::KeystoreKind;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CredentialDescriptor {
    pub kind: KeystoreKind,
    /// Token serial for hardware tokens.
    pub token_serial: Option<String>,
    /// PKCS#11 module path for hardware tokens.
    pub library_path: Option<PathBuf>,
    /// Container path for file-backed credentials.
    pub file_path: Option<PathBuf>,
    /// Resolved eagerly for OS-store and token listings, lazily for files.
    pub certificate: Option<SigningCertificate>,
    /// Display label from the store (alias, token label), if any.
    pub label: Option<String>,
}

impl CredentialDescriptor {
    #[must_use]
    pub fn os_store(certificate: SigningCertificate, label: Option<String>) -> Self {
        Self {
            kind: KeystoreKind::OsStore,
            token_serial: None,
            library_path: None,
            file_path: None,
            certificate: Some(certificate),
            label,
        }
    }

    #[must_use]
    pub fn hardware(
        certificate: SigningCertificate,
        token_serial: String,
        library_path: PathBuf,
        label: Option<String>,
    ) -> Self {
        Self {
            kind: KeystoreKind::HardwareToken,
            token_serial: Some(token_serial),
            library_path: Some(library_path),
            file_path: None,
            certificate: Some(certificate),
            label,
        }
    }

    /// File credential whose certificate is not known until the container is opened.
    #[must_use]
    pub fn file(path: PathBuf) -> Self {
        Self {
            kind: KeystoreKind::File,
            token_serial: None,
            library_path: None,
            file_path: Some(path),
            certificate: None,
            label: None,
        }
    }

    /// Backfill the certificate once the file has been unlocked.
    #[must_use]
    pub fn with_certificate(mut self, certificate: SigningCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// (serial, issuer) when the certificate is resolved.
    fn certificate_identity(&self) -> Option<(String, String)> {
        self.certificate
            .as_ref()
            .map(|c| (c.serial_hex(), c.issuer_name()))
    }
}

impl PartialEq for CredentialDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self.certificate_identity(), other.certificate_identity()) {
            (Some(a), Some(b)) => a == b,
            _ => self.kind == other.kind && self.file_path == other.file_path,
        }
    }
}

impl Eq for CredentialDescriptor {}
