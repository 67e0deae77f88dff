//! Throwaway CA and signer certificates built with OpenSSL.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};
use pdf_signer::SigningCertificate;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const DAY: i64 = 86_400;

pub struct Identity {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl Identity {
    pub fn signing_cert(&self) -> SigningCertificate {
        SigningCertificate::from_openssl(&self.cert).unwrap()
    }

    pub fn serial_hex(&self) -> String {
        self.signing_cert().serial_hex()
    }
}

/// Knobs for a leaf certificate.
pub struct LeafSpec<'a> {
    pub common_name: &'a str,
    pub organization: Option<&'a str>,
    pub serial: u32,
    /// Validity window relative to now, in days.
    pub valid_from_days: i64,
    pub valid_to_days: i64,
    pub digital_signature: bool,
    pub ca: bool,
    pub ec: bool,
}

impl Default for LeafSpec<'_> {
    fn default() -> Self {
        Self {
            common_name: "Asha Rao",
            organization: Some("Acme Ltd"),
            serial: 0x3a7f01,
            valid_from_days: -1,
            valid_to_days: 365,
            digital_signature: true,
            ca: false,
            ec: false,
        }
    }
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(common_name: &str, organization: Option<&str>) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    if let Some(org) = organization {
        builder
            .append_entry_by_nid(Nid::ORGANIZATIONNAME, org)
            .unwrap();
    }
    builder.append_entry_by_nid(Nid::COUNTRYNAME, "IN").unwrap();
    builder.build()
}

fn time(days_from_now: i64) -> Asn1Time {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    Asn1Time::from_unix(now + days_from_now * DAY).unwrap()
}

/// Self-signed CA allowed to issue certificates.
pub fn ca(common_name: &str) -> Identity {
    let key = rsa_key();
    let subject = name(common_name, Some("Acme Trust"));
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_issuer_name(&subject).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&time(-30)).unwrap();
    builder.set_not_after(&time(3650)).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    Identity {
        key,
        cert: builder.build(),
    }
}

/// Leaf issued by `issuer`.
pub fn leaf(issuer: &Identity, spec: &LeafSpec<'_>) -> Identity {
    let key = if spec.ec { ec_key() } else { rsa_key() };
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(spec.serial).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder
        .set_subject_name(&name(spec.common_name, spec.organization))
        .unwrap();
    builder
        .set_issuer_name(issuer.cert.subject_name())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&time(spec.valid_from_days)).unwrap();
    builder.set_not_after(&time(spec.valid_to_days)).unwrap();

    let mut constraints = BasicConstraints::new();
    if spec.ca {
        constraints.ca();
    }
    builder
        .append_extension(constraints.build().unwrap())
        .unwrap();

    let mut usage = KeyUsage::new();
    usage.critical();
    if spec.digital_signature {
        usage.digital_signature().non_repudiation();
    } else {
        usage.key_encipherment();
    }
    builder.append_extension(usage.build().unwrap()).unwrap();

    builder.sign(&issuer.key, MessageDigest::sha256()).unwrap();
    Identity {
        key,
        cert: builder.build(),
    }
}

/// CA plus a default RSA signer.
pub fn default_pair() -> (Identity, Identity) {
    let root = ca("Acme Test Root");
    let signer = leaf(&root, &LeafSpec::default());
    (root, signer)
}

/// PKCS#12 bytes holding `signer`'s key, its certificate and `extra` certificates.
pub fn pkcs12_der(signer: &Identity, extra: &[&X509], password: &str) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name("signer").pkey(&signer.key).cert(&signer.cert);
    if !extra.is_empty() {
        let mut stack = Stack::new().unwrap();
        for cert in extra {
            stack.push((*cert).clone()).unwrap();
        }
        builder.ca(stack);
    }
    builder.build2(password).unwrap().to_der().unwrap()
}

pub fn write_pkcs12(dir: &Path, file_name: &str, der: &[u8]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, der).unwrap();
    path
}
