//! Credential discovery and selection across providers.

mod common;

use common::certs::{self, Identity, LeafSpec};
use common::pdf;
use common::prompt::ScriptedPrompt;
use pdf_signer::adapters::keystore::Pkcs12Provider;
use pdf_signer::{
    eligible_candidates, provider_for, AppearanceConfiguration, CertificateValidator,
    CredentialDescriptor, CredentialProvider, KeystoreKind, MemoryKeyStore, OsStoreProvider,
    PlatformKeyStore, PrivateKeyHandle, SignatureEngine, SignerConfiguration, SigningError,
};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    root: Identity,
    good: Identity,
    expired: Identity,
    future: Identity,
    encryption_only: Identity,
    intermediate: Identity,
}

fn fixture() -> Fixture {
    let root = certs::ca("Acme Test Root");
    let good = certs::leaf(&root, &LeafSpec::default());
    let expired = certs::leaf(
        &root,
        &LeafSpec {
            common_name: "Old Signer",
            serial: 0x0b01,
            valid_from_days: -400,
            valid_to_days: -1,
            ..LeafSpec::default()
        },
    );
    let future = certs::leaf(
        &root,
        &LeafSpec {
            common_name: "Next Year Signer",
            serial: 0x0b04,
            valid_from_days: 5,
            valid_to_days: 365,
            ..LeafSpec::default()
        },
    );
    let encryption_only = certs::leaf(
        &root,
        &LeafSpec {
            common_name: "Mail Only",
            serial: 0x0b02,
            digital_signature: false,
            ..LeafSpec::default()
        },
    );
    let intermediate = certs::leaf(
        &root,
        &LeafSpec {
            common_name: "Issuing CA",
            serial: 0x0b03,
            ca: true,
            ..LeafSpec::default()
        },
    );
    Fixture {
        root,
        good,
        expired,
        future,
        encryption_only,
        intermediate,
    }
}

fn store(f: &Fixture) -> MemoryKeyStore {
    let mut store = MemoryKeyStore::new("Test keychain");
    store.add_identity(
        "good",
        f.good.key.clone(),
        f.good.signing_cert(),
        vec![f.root.signing_cert()],
    );
    store.add_identity("expired", f.expired.key.clone(), f.expired.signing_cert(), Vec::new());
    store.add_identity("future", f.future.key.clone(), f.future.signing_cert(), Vec::new());
    store.add_identity(
        "mail",
        f.encryption_only.key.clone(),
        f.encryption_only.signing_cert(),
        Vec::new(),
    );
    store.add_identity(
        "issuing",
        f.intermediate.key.clone(),
        f.intermediate.signing_cert(),
        Vec::new(),
    );
    store.add_certificate("root", f.root.signing_cert());
    store
}

fn all_stores() -> SignerConfiguration {
    SignerConfiguration {
        active_stores: vec![KeystoreKind::OsStore, KeystoreKind::File],
        ..SignerConfiguration::default()
    }
}

#[test]
fn only_eligible_key_bearing_certificates_are_listed() {
    let f = fixture();
    let mut providers: Vec<Box<dyn CredentialProvider>> =
        vec![Box::new(OsStoreProvider::new(Box::new(store(&f))))];

    let candidates = eligible_candidates(&all_stores(), &mut providers);
    assert_eq!(candidates.len(), 1);
    let cert = candidates[0].certificate.as_ref().unwrap();
    assert_eq!(cert.serial_hex(), f.good.serial_hex());
    assert_eq!(candidates[0].label.as_deref(), Some("good"));
}

#[test]
fn validator_rules() {
    let f = fixture();
    assert!(CertificateValidator::is_eligible(&f.good.signing_cert()));
    assert!(CertificateValidator::is_expired(&f.expired.signing_cert()));
    assert!(CertificateValidator::is_not_yet_valid(&f.future.signing_cert()));
    assert!(!CertificateValidator::is_not_yet_valid(&f.good.signing_cert()));
    assert!(!CertificateValidator::is_eligible(&f.future.signing_cert()));
    assert!(!CertificateValidator::is_digital_signature_allowed(
        &f.encryption_only.signing_cert()
    ));
    assert!(!CertificateValidator::is_end_entity(&f.intermediate.signing_cert()));
    assert!(CertificateValidator::is_self_signed(&f.root.signing_cert()));
    assert!(!CertificateValidator::is_self_signed(&f.good.signing_cert()));
    assert!(CertificateValidator::is_signature_algorithm_secure(&f.good.signing_cert()));

    let chain = [f.good.signing_cert()];
    let roots = [f.root.signing_cert()];
    assert!(CertificateValidator::is_chain_valid(&chain, &roots, 5));
    assert!(!CertificateValidator::is_chain_valid(&chain, &[], 5));
    assert!(!CertificateValidator::is_chain_valid(&chain, &roots, 0));
}

#[test]
fn validity_bounds_are_inclusive() {
    let f = fixture();
    let cert = f.good.signing_cert();
    let (start, end) = (cert.not_before(), cert.not_after());
    let second = Duration::from_secs(1);

    assert!(!CertificateValidator::is_expired_at(&cert, end));
    assert!(CertificateValidator::is_expired_at(&cert, end + second));
    assert!(!CertificateValidator::is_not_yet_valid_at(&cert, start));
    assert!(CertificateValidator::is_not_yet_valid_at(&cert, start - second));

    assert!(CertificateValidator::is_eligible_at(&cert, start));
    assert!(CertificateValidator::is_eligible_at(&cert, end));
    assert!(!CertificateValidator::is_eligible_at(&cert, end + second));
}

#[test]
fn not_yet_valid_certificate_is_filtered_out() {
    let f = fixture();
    let mut providers: Vec<Box<dyn CredentialProvider>> =
        vec![Box::new(OsStoreProvider::new(Box::new(store(&f))))];
    let candidates = eligible_candidates(&all_stores(), &mut providers);
    let future_serial = f.future.serial_hex();
    assert!(candidates
        .iter()
        .all(|c| c.certificate.as_ref().map(|cert| cert.serial_hex()) != Some(future_serial.clone())));

    // Once its validity period has started it becomes eligible.
    let later = f.future.signing_cert().not_before() + Duration::from_secs(60);
    let listed = CertificateValidator::filter_eligible_at(
        store(&f)
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.has_private_key)
            .filter_map(|e| e.certificate.map(|c| CredentialDescriptor::os_store(c, Some(e.alias))))
            .collect(),
        later,
    );
    assert!(listed
        .iter()
        .any(|c| c.certificate.as_ref().map(|cert| cert.serial_hex()) == Some(future_serial.clone())));
}

#[test]
fn trusted_copy_before_identity_does_not_hide_the_key() {
    let f = fixture();
    let mut store = MemoryKeyStore::new("Test keychain");
    store.add_certificate("trusted copy", f.good.signing_cert());
    store.add_identity(
        "good",
        f.good.key.clone(),
        f.good.signing_cert(),
        vec![f.root.signing_cert()],
    );
    let mut provider = OsStoreProvider::new(Box::new(store));
    provider.select_serial(f.good.serial_hex());

    assert_eq!(provider.fetch_certificate_chain().unwrap().len(), 2);
    let mut key = provider.fetch_private_key().unwrap();
    assert!(!key.sign_sha256(b"payload").unwrap().is_empty());
}

#[test]
fn certificate_without_key_is_not_found() {
    let f = fixture();
    let mut store = MemoryKeyStore::new("Test keychain");
    store.add_certificate("trusted copy", f.good.signing_cert());
    let mut provider = OsStoreProvider::new(Box::new(store));
    provider.select_serial(f.good.serial_hex());

    assert!(matches!(
        provider.fetch_certificate(),
        Err(SigningError::CertificateNotFound(_))
    ));
    assert!(matches!(
        provider.fetch_private_key(),
        Err(SigningError::CertificateNotFound(_))
    ));
}

#[test]
fn duplicates_across_providers_collapse() {
    let f = fixture();
    let mut providers: Vec<Box<dyn CredentialProvider>> = vec![
        Box::new(OsStoreProvider::new(Box::new(store(&f)))),
        Box::new(OsStoreProvider::new(Box::new(store(&f)))),
    ];
    assert_eq!(eligible_candidates(&all_stores(), &mut providers).len(), 1);
}

#[test]
fn inactive_os_store_is_not_consulted() {
    let f = fixture();
    let config = SignerConfiguration {
        active_stores: vec![KeystoreKind::File],
        ..SignerConfiguration::default()
    };
    let mut providers: Vec<Box<dyn CredentialProvider>> =
        vec![Box::new(OsStoreProvider::new(Box::new(store(&f))))];
    assert!(eligible_candidates(&config, &mut providers).is_empty());
}

#[test]
fn os_store_serial_lookup_tolerates_case_and_leading_zero() {
    let f = fixture();
    let mut provider = OsStoreProvider::new(Box::new(store(&f)));

    provider.select_serial(format!("0{}", f.good.serial_hex().to_lowercase()));
    let cert = provider.fetch_certificate().unwrap();
    assert_eq!(cert.serial_hex(), f.good.serial_hex());

    let chain = provider.fetch_certificate_chain().unwrap();
    assert_eq!(chain.len(), 2);
    assert!(!chain.is_degraded());

    provider.select_serial("DEADBEEF");
    assert!(matches!(
        provider.fetch_certificate(),
        Err(SigningError::CertificateNotFound(_))
    ));
}

#[test]
fn os_store_candidate_signs_through_provider_for() {
    let f = fixture();
    let mut providers: Vec<Box<dyn CredentialProvider>> =
        vec![Box::new(OsStoreProvider::new(Box::new(store(&f))))];
    let candidates = eligible_candidates(&all_stores(), &mut providers);

    let mut provider = provider_for(
        &candidates[0],
        &all_stores(),
        ScriptedPrompt::boxed(&[]),
        Some(Box::new(store(&f))),
    )
    .unwrap();
    let signed = SignatureEngine::new()
        .sign(
            pdf::blank(1),
            provider.as_mut(),
            &AppearanceConfiguration::new(1, None),
            None,
        )
        .unwrap();
    assert!(signed.container_len() > 0);
}

#[test]
fn pkcs12_listing_is_lazy_until_unlocked() {
    let dir = TempDir::new().unwrap();
    let f = fixture();
    let der = certs::pkcs12_der(&f.good, &[&f.root.cert], "pw");
    let path = certs::write_pkcs12(dir.path(), "me.p12", &der);
    let (prompt, seen) = ScriptedPrompt::new(&[Some("nope"), Some("pw")]);
    let mut provider = Pkcs12Provider::new(&path, Box::new(prompt));

    let listed = provider.list_candidates().unwrap();
    assert_eq!(listed, vec![CredentialDescriptor::file(path.clone())]);
    assert!(listed[0].certificate.is_none());
    assert!(seen.borrow().is_empty());

    let unlocked = provider.unlock().unwrap();
    assert_eq!(
        unlocked.certificate.as_ref().map(|c| c.serial_hex()),
        Some(f.good.serial_hex())
    );
    assert_eq!(seen.borrow().len(), 2);
    assert!(provider.is_unlocked());

    let relisted = provider.list_candidates().unwrap();
    assert!(relisted[0].certificate.is_some());

    provider.clear_session();
    assert!(!provider.is_unlocked());
}

#[test]
fn empty_password_counts_as_an_attempt() {
    let dir = TempDir::new().unwrap();
    let f = fixture();
    let der = certs::pkcs12_der(&f.good, &[], "pw");
    let path = certs::write_pkcs12(dir.path(), "me.p12", &der);
    let (prompt, seen) = ScriptedPrompt::new(&[Some(""), Some("pw")]);
    let mut provider = Pkcs12Provider::new(&path, Box::new(prompt));

    assert!(provider.fetch_certificate().is_ok());
    assert_eq!(seen.borrow()[1], "Incorrect password. Attempt 2 of 3");
}
