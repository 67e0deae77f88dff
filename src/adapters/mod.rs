//! Adapter layer modules for external system integration.
//!
//! Provides adapters for:
//! - Credential custodians (OS store, PKCS#11 tokens, PKCS#12 files)
//! - HTTP timestamp authority communication
//! - CRL download for long-term validation

pub mod keystore;
pub mod revocation;
pub mod timestamp_http_client;

pub use keystore::{CredentialProvider, PrivateKeyHandle};
pub use revocation::{HttpCrlSource, RevocationSource};
pub use timestamp_http_client::{TimestampClient, TimestampHttpClient};
