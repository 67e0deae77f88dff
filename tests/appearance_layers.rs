//! Visible signature appearances written into the document.

mod common;

use common::certs;
use common::pdf;
use common::prompt::ScriptedPrompt;
use image::{ImageBuffer, Rgba};
use pdf_signer::adapters::keystore::Pkcs12Provider;
use pdf_signer::{AppearanceConfiguration, PlacementRect, SignatureEngine, SigningError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn write_png(dir: &Path, name: &str, translucent: bool) -> PathBuf {
    let alpha = if translucent { 128 } else { 255 };
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_fn(40, 20, |x, _| Rgba([(x * 6) as u8, 90, 200, alpha]));
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

fn sign(dir: &TempDir, appearance: &AppearanceConfiguration) -> (Vec<u8>, Vec<u8>) {
    let (root, signer) = certs::default_pair();
    let der = certs::pkcs12_der(&signer, &[&root.cert], "pw");
    let path = certs::write_pkcs12(dir.path(), "signer.p12", &der);
    let mut provider = Pkcs12Provider::new(path, ScriptedPrompt::boxed(&[Some("pw")]));
    let original = pdf::blank(1);
    let signed = SignatureEngine::new()
        .sign(original.clone(), &mut provider, appearance, None)
        .unwrap();
    let tail = signed.bytes()[original.len()..].to_vec();
    (original, tail)
}

fn rect() -> Option<PlacementRect> {
    Some(PlacementRect::new(300.0, 40.0, 250.0, 90.0))
}

#[test]
fn description_text_is_drawn() {
    let dir = TempDir::new().unwrap();
    let mut appearance = AppearanceConfiguration::new(1, rect());
    appearance.reason = Some("Approved".into());
    appearance.custom_text = Some("Batch 7".into());

    let (_, tail) = sign(&dir, &appearance);
    assert!(contains(&tail, b"(Signed by: Asha Rao)"));
    assert!(contains(&tail, b"(Reason: Approved)"));
    assert!(contains(&tail, b"(Batch 7)"));
    assert!(contains(&tail, b"/Helvetica"));
    assert!(!contains(&tail, b"% DSUnknown"));
}

#[test]
fn graphic_and_watermark_are_embedded() {
    let dir = TempDir::new().unwrap();
    let mut appearance = AppearanceConfiguration::new(1, rect());
    appearance.show_graphic = true;
    appearance.graphic_path = Some(write_png(dir.path(), "sig.png", false));
    appearance.watermark_path = Some(write_png(dir.path(), "wm.png", true));

    let (_, tail) = sign(&dir, &appearance);
    assert!(contains(&tail, b"/Subtype /Image"));
    assert!(contains(&tail, b"/SMask"));
    assert!(contains(&tail, b"/GS0 gs"));
    assert!(contains(&tail, b"/ca 0.2"));
}

#[test]
fn legacy_layers_carry_status_mark() {
    let dir = TempDir::new().unwrap();
    let mut appearance = AppearanceConfiguration::new(1, rect());
    appearance.enable_visual_ok_mark = true;

    let (_, tail) = sign(&dir, &appearance);
    assert!(contains(&tail, b"% DSUnknown"));
    assert!(contains(&tail, b"/n4"));
    assert!(contains(&tail, b"/FRM"));
}

#[test]
fn zero_sized_rectangle_signs_invisibly() {
    let dir = TempDir::new().unwrap();
    let appearance =
        AppearanceConfiguration::new(1, Some(PlacementRect::new(10.0, 10.0, 0.0, 50.0)));
    let (_, tail) = sign(&dir, &appearance);
    assert!(!contains(&tail, b"/AP"));
}

#[test]
fn unreadable_graphic_fails_the_attempt() {
    let dir = TempDir::new().unwrap();
    let mut appearance = AppearanceConfiguration::new(1, rect());
    appearance.show_graphic = true;
    appearance.graphic_path = Some(dir.path().join("missing.png"));

    let (root, signer) = certs::default_pair();
    let der = certs::pkcs12_der(&signer, &[&root.cert], "pw");
    let path = certs::write_pkcs12(dir.path(), "signer.p12", &der);
    let mut provider = Pkcs12Provider::new(path, ScriptedPrompt::boxed(&[Some("pw")]));
    let err = SignatureEngine::new()
        .sign(pdf::blank(1), &mut provider, &appearance, None)
        .unwrap_err();
    assert!(matches!(err, SigningError::SigningProcess { .. }));
}
