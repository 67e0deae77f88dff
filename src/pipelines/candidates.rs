//! Candidate discovery across the configured credential stores, and
//! provider construction for a chosen candidate.

use crate::adapters::keystore::pkcs11::TokenSelection;
use crate::adapters::keystore::{
    CredentialProvider, OsStoreProvider, Pkcs11Provider, Pkcs12Provider, PlatformKeyStore,
};
use crate::domain::descriptor::CredentialDescriptor;
use crate::domain::types::KeystoreKind;
use crate::infra::config::SignerConfiguration;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::cert_validator::CertificateValidator;
use crate::services::secret_retry::SecretPrompt;
use std::time::SystemTime;

/// List every candidate from the providers whose store is active, then drop
/// duplicates and ineligible certificates.
///
/// A provider that fails as a whole is logged and skipped.
pub fn eligible_candidates(
    config: &SignerConfiguration,
    providers: &mut [Box<dyn CredentialProvider>],
) -> Vec<CredentialDescriptor> {
    eligible_candidates_at(config, providers, SystemTime::now())
}

pub fn eligible_candidates_at(
    config: &SignerConfiguration,
    providers: &mut [Box<dyn CredentialProvider>],
    now: SystemTime,
) -> Vec<CredentialDescriptor> {
    let mut all = Vec::new();
    for provider in providers.iter_mut() {
        if !config.is_store_active(provider.kind()) {
            log::debug!(
                "Skipping {} ({} store inactive)",
                provider.provider_name(),
                provider.kind().as_str()
            );
            continue;
        }
        match provider.list_candidates() {
            Ok(mut found) => {
                log::debug!("{} listed {} candidate(s)", provider.provider_name(), found.len());
                all.append(&mut found);
            }
            Err(e) if e.is_cancellation() => {
                log::info!("{}: listing cancelled", provider.provider_name());
            }
            Err(e) => log::warn!("{}: {e}", provider.provider_name()),
        }
    }

    let eligible = CertificateValidator::filter_eligible_at(all, now);
    log::info!("{} eligible signing candidate(s)", eligible.len());
    eligible
}

/// Provider that serves `descriptor`, already pointed at its credential.
///
/// OS-store descriptors need the `platform` store they were listed from.
///
/// # Errors
///
/// Returns `CertificateNotFound` or `InvalidInput` when the descriptor lacks
/// what its kind needs, and `StoreInitialization` for an OS-store descriptor
/// without a platform store.
pub fn provider_for(
    descriptor: &CredentialDescriptor,
    config: &SignerConfiguration,
    prompt: Box<dyn SecretPrompt>,
    platform: Option<Box<dyn PlatformKeyStore>>,
) -> SigningResult<Box<dyn CredentialProvider>> {
    match descriptor.kind {
        KeystoreKind::OsStore => {
            let store = platform.ok_or_else(|| {
                SigningError::StoreInitialization(
                    "no platform certificate store is available".to_string(),
                )
            })?;
            let cert = descriptor.certificate.as_ref().ok_or_else(|| {
                SigningError::CertificateNotFound("OS store candidate has no certificate".into())
            })?;
            let mut provider = OsStoreProvider::new(store);
            provider.select_serial(cert.serial_hex());
            Ok(Box::new(provider))
        }
        KeystoreKind::HardwareToken => {
            let selection = TokenSelection::from_descriptor(descriptor)?;
            let mut libraries = config.pkcs11_library_paths.clone();
            if !libraries.contains(&selection.library_path) {
                libraries.push(selection.library_path.clone());
            }
            let mut provider = Pkcs11Provider::new(libraries, prompt);
            provider.select(selection);
            Ok(Box::new(provider))
        }
        KeystoreKind::File => {
            let path = descriptor.file_path.as_ref().ok_or_else(|| {
                SigningError::InvalidInput("file candidate has no path".to_string())
            })?;
            Ok(Box::new(Pkcs12Provider::new(path, prompt)))
        }
    }
}
