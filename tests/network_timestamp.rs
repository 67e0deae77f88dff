//! Live timestamp authority round trip.
//!
//! Run with: cargo test --features network-tests --test network_timestamp
//! `PDF_SIGNER_TEST_TSA` (or `.env`) picks the authority.

#![cfg(feature = "network-tests")]

mod common;

use common::certs;
use common::pdf;
use common::prompt::ScriptedPrompt;
use pdf_signer::adapters::keystore::Pkcs12Provider;
use pdf_signer::services::{TimestampParserService, TimestampRequestBuilder};
use pdf_signer::{
    AppearanceConfiguration, PlacementRect, SignatureEngine, TimestampClient,
    TimestampHttpClient, TimestampUrl,
};
use std::time::Duration;
use tempfile::TempDir;

fn client() -> TimestampHttpClient {
    let url = TimestampUrl::new(common::test_env::tsa_url()).unwrap();
    TimestampHttpClient::new(url, Duration::from_secs(30)).unwrap()
}

#[test]
fn authority_answers_a_request() {
    let request = TimestampRequestBuilder::new()
        .build_request(b"network test signature value")
        .unwrap();
    let response = client().post_request(&request.der).unwrap();
    let token = TimestampParserService::parse_response(&response, &request).unwrap();
    assert!(!token.gen_time().is_empty());
    assert!(!token.serial_hex().is_empty());
}

#[test]
fn timestamped_signature_fits_its_envelope() {
    let dir = TempDir::new().unwrap();
    let (root, signer) = certs::default_pair();
    let der = certs::pkcs12_der(&signer, &[&root.cert], "pw");
    let path = certs::write_pkcs12(dir.path(), "signer.p12", &der);
    let mut provider = Pkcs12Provider::new(path, ScriptedPrompt::boxed(&[Some("pw")]));
    let mut appearance =
        AppearanceConfiguration::new(1, Some(PlacementRect::new(36.0, 36.0, 200.0, 60.0)));
    appearance.enable_timestamp = true;
    let tsa = client();

    let signed = SignatureEngine::new()
        .sign(pdf::blank(1), &mut provider, &appearance, Some(&tsa))
        .unwrap();
    assert!(signed.container_len() <= signed.reserved_len());
}
