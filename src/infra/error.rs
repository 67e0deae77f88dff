//! Error types for PDF signing operations.
//!
//! The first group of variants is the signing taxonomy callers branch on
//! (credential access, cancellation, chain and timestamp problems). The
//! second group covers the plumbing underneath (ASN.1, I/O, network, PDF).

use thiserror::Error;

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// Comprehensive error types for signing operations
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SigningError {
    #[error("Key store initialization failed: {0}")]
    StoreInitialization(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Private key access denied: {0}")]
    PrivateKeyAccessDenied(String),

    #[error("Incorrect PIN: {0}")]
    #[diagnostic(help("The token rejected the PIN. Check the PIN and try again."))]
    IncorrectPin(String),

    #[error("Maximum PIN attempts exceeded: {0}")]
    #[diagnostic(help("The token PIN is locked. Unlock it with the token vendor's tool."))]
    MaxPinAttemptsExceeded(String),

    #[error("Operation cancelled: {0}")]
    UserCancelled(String),

    #[error("Timestamp configuration error: {0}")]
    #[diagnostic(help("Set a timestamp authority URL or disable timestamping."))]
    TimestampConfiguration(String),

    #[error("Certificate chain error: {0}")]
    CertificateChain(String),

    #[error("{context} [{cause}] | Root Cause: [{root_cause}]")]
    SigningProcess {
        context: String,
        cause: String,
        root_cause: String,
    },

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Timestamp error: {0}")]
    TimestampError(String),

    #[error("Cryptographic error: {0}")]
    CryptographicError(String),

    #[error("PKCS#11 token error: {0}")]
    TokenError(String),

    #[error("PDF document error: {0}")]
    DocumentError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Transport failure with the client error kept as the source, so the
    /// underlying I/O or TLS cause stays reachable.
    #[error("{context}: {source}")]
    HttpError {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("ASN.1 encoding/decoding error: {0}")]
    Asn1Error(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SigningError {
    /// Wrap an unexpected failure with a context line plus its immediate and
    /// deepest causes.
    pub fn signing_process(
        context: impl Into<String>,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut root: &(dyn std::error::Error + 'static) = error;
        while let Some(next) = root.source() {
            root = next;
        }
        SigningError::SigningProcess {
            context: context.into(),
            cause: error.to_string(),
            root_cause: root.to_string(),
        }
    }

    /// HTTP failure with a context line.
    pub fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        SigningError::HttpError {
            context: context.into(),
            source,
        }
    }

    /// True for the graceful outcome where the operator backed out.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SigningError::UserCancelled(_))
    }

    /// Errors that already belong to the signing taxonomy and should reach the
    /// caller unchanged instead of being folded into `SigningProcess`.
    #[must_use]
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            SigningError::StoreInitialization(_)
                | SigningError::CertificateNotFound(_)
                | SigningError::PrivateKeyAccessDenied(_)
                | SigningError::IncorrectPin(_)
                | SigningError::MaxPinAttemptsExceeded(_)
                | SigningError::UserCancelled(_)
                | SigningError::TimestampConfiguration(_)
                | SigningError::CertificateChain(_)
                | SigningError::SigningProcess { .. }
        )
    }
}

impl From<der::Error> for SigningError {
    fn from(error: der::Error) -> Self {
        SigningError::Asn1Error(error.to_string())
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(error: reqwest::Error) -> Self {
        SigningError::http("HTTP error", error)
    }
}

impl From<openssl::error::ErrorStack> for SigningError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SigningError::CryptographicError(error.to_string())
    }
}

impl From<image::ImageError> for SigningError {
    fn from(error: image::ImageError) -> Self {
        SigningError::DocumentError(format!("image decoding failed: {error}"))
    }
}

impl From<std::io::Error> for SigningError {
    fn from(error: std::io::Error) -> Self {
        SigningError::IoError(error.to_string())
    }
}

impl From<cryptoki::error::Error> for SigningError {
    fn from(error: cryptoki::error::Error) -> Self {
        use cryptoki::error::{Error, RvError};
        match &error {
            Error::Pkcs11(RvError::PinIncorrect, _) => {
                SigningError::IncorrectPin("the token rejected the PIN".to_string())
            }
            Error::Pkcs11(RvError::PinLocked, _) => {
                SigningError::MaxPinAttemptsExceeded("the token PIN is locked".to_string())
            }
            Error::Pkcs11(RvError::FunctionCanceled, _) => {
                SigningError::UserCancelled("operation cancelled on the token".to_string())
            }
            _ => SigningError::TokenError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("disk unplugged")]
    struct Inner;

    #[test]
    fn test_error_display() {
        let error = SigningError::IncorrectPin("Test error".to_string());
        assert_eq!(error.to_string(), "Incorrect PIN: Test error");

        let error = SigningError::InvalidInput("note too long".to_string());
        assert_eq!(error.to_string(), "Invalid input: note too long");
    }

    #[test]
    fn signing_process_reports_immediate_and_root_cause() {
        let error = SigningError::signing_process("Failed to sign document", &Outer(Inner));
        assert_eq!(
            error.to_string(),
            "Failed to sign document [outer failure] | Root Cause: [disk unplugged]"
        );
    }

    #[test]
    fn root_cause_is_self_without_source() {
        let error = SigningError::signing_process("ctx", &Inner);
        assert_eq!(
            error.to_string(),
            "ctx [disk unplugged] | Root Cause: [disk unplugged]"
        );
    }

    #[test]
    fn http_failures_keep_their_underlying_cause() {
        let transport = reqwest::blocking::Client::new()
            .get("not a url")
            .send()
            .unwrap_err();
        let error = SigningError::http("Timestamp request failed", transport);
        let wrapped = SigningError::signing_process("Failed to sign document", &error);

        let SigningError::SigningProcess {
            cause, root_cause, ..
        } = wrapped
        else {
            panic!("expected a signing process error");
        };
        assert!(cause.starts_with("Timestamp request failed: "));
        assert_ne!(cause, root_cause);
        assert!(root_cause.contains("relative URL"), "{root_cause}");
    }

    #[test]
    fn only_user_cancelled_counts_as_cancellation() {
        assert!(SigningError::UserCancelled("x".into()).is_cancellation());
        assert!(!SigningError::IncorrectPin("x".into()).is_cancellation());
        assert!(!SigningError::MaxPinAttemptsExceeded("x".into()).is_cancellation());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pdf");
        let error: SigningError = io.into();
        assert!(matches!(error, SigningError::IoError(msg) if msg.contains("missing.pdf")));
    }
}
