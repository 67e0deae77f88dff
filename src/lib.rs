//! PDF Signer Library
//!
//! Signing core for PDF documents: credential discovery over OS certificate
//! stores, PKCS#11 tokens and PKCS#12 files, visible or invisible signature
//! appearances, and detached CAdES containers with optional RFC 3161
//! timestamps and embedded CRLs.
//!
//! Layers:
//! - `domain`: certificates, distinguished names, PDF objects, constants
//! - `services`: stateless builders (CMS, appearance, timestamp messages)
//! - `adapters`: credential custodians, TSA and CRL clients
//! - `infra`: configuration and the error taxonomy
//! - `pipelines`: candidate discovery and the signature engine

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

pub use adapters::keystore::{
    CredentialProvider, MemoryKeyStore, OsStoreProvider, Pkcs11Provider, Pkcs12Provider,
    PlatformKeyStore, PrivateKeyHandle,
};
pub use adapters::{HttpCrlSource, RevocationSource, TimestampClient, TimestampHttpClient};
pub use domain::appearance::{AppearanceConfiguration, CertificationLevel, PlacementRect};
pub use domain::certificate::{CertificateChain, KeyAlgorithm, SigningCertificate};
pub use domain::descriptor::CredentialDescriptor;
pub use domain::dn::DistinguishedName;
pub use domain::envelope::estimate_envelope_size;
pub use domain::types::{KeystoreKind, Secret, TimestampUrl};
pub use infra::config::{ConfigManager, SignerConfiguration};
pub use infra::error::{SigningError, SigningResult};
pub use pipelines::{eligible_candidates, provider_for, EngineState, SignatureEngine, SignedDocument};
pub use services::{CertificateValidator, SecretKind, SecretPrompt, SecretRequest};
