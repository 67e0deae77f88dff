//! Service layer module root.
//! Stateless building blocks composed by the signing pipeline.

pub mod appearance_builder;
pub mod appearance_stream;
pub mod cert_validator;
pub mod cms_builder;
pub mod pdf_preparer;
pub mod secret_retry;
pub mod timestamp_parser;
pub mod timestamp_request_builder;

pub use appearance_builder::{AppearanceBuilder, AppearancePlan, RenderingMode, WidgetPlacement};
pub use cert_validator::{CertificateAnalysis, CertificateValidator};
pub use cms_builder::{CmsBuilder, SignedAttributes};
pub use pdf_preparer::{PdfPreparer, PreparedDocument};
pub use secret_retry::{acquire_secret, SecretKind, SecretPrompt, SecretRequest, Verdict};
pub use timestamp_parser::{TimestampParserService, TimestampToken};
pub use timestamp_request_builder::{TimestampRequest, TimestampRequestBuilder};
