//! Type-safe wrappers using the new-type pattern.

use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Timestamp authority URL, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampUrl(String);

impl TimestampUrl {
    pub fn new(url: impl AsRef<str>) -> SigningResult<Self> {
        let url = url.as_ref().trim();
        Self::validate_url(url)?;
        Ok(TimestampUrl(url.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_url(url: &str) -> SigningResult<()> {
        if url.is_empty() {
            return Err(SigningError::TimestampConfiguration(
                "timestamp URL is empty".to_string(),
            ));
        }
        let Some(rest) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
        else {
            return Err(SigningError::TimestampConfiguration(format!(
                "timestamp URL must start with http:// or https://, got: {url}"
            )));
        };
        if rest.is_empty() || rest.starts_with('/') {
            return Err(SigningError::TimestampConfiguration(format!(
                "timestamp URL has no host: {url}"
            )));
        }
        Ok(())
    }
}

impl FromStr for TimestampUrl {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TimestampUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PIN or password. Wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Which custodian holds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreKind {
    OsStore,
    HardwareToken,
    File,
}

impl KeystoreKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreKind::OsStore => "OS_STORE",
            KeystoreKind::HardwareToken => "HARDWARE_TOKEN",
            KeystoreKind::File => "FILE",
        }
    }
}

impl fmt::Display for KeystoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeystoreKind {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "os_store" | "os" => Ok(KeystoreKind::OsStore),
            "hardware_token" | "hardware" | "pkcs11" => Ok(KeystoreKind::HardwareToken),
            "file" | "pkcs12" | "pfx" => Ok(KeystoreKind::File),
            _ => Err(SigningError::ConfigurationError(format!(
                "Unknown keystore kind: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_url_validation() {
        assert!(TimestampUrl::new("http://timestamp.digicert.com").is_ok());
        assert!(TimestampUrl::new("https://freetsa.org/tsr").is_ok());

        for bad in ["", "   ", "ftp://tsa.example.com", "http://", "https:///path"] {
            let err = TimestampUrl::new(bad).unwrap_err();
            assert!(
                matches!(err, SigningError::TimestampConfiguration(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn secret_is_redacted() {
        let secret = Secret::new("123456");
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert!(!format!("{secret:?}").contains("123456"));
        assert_eq!(secret.expose(), "123456");
    }

    #[test]
    fn keystore_kind_parsing() {
        assert_eq!("OS_STORE".parse::<KeystoreKind>().unwrap(), KeystoreKind::OsStore);
        assert_eq!("pkcs11".parse::<KeystoreKind>().unwrap(), KeystoreKind::HardwareToken);
        assert_eq!("hardware-token".parse::<KeystoreKind>().unwrap(), KeystoreKind::HardwareToken);
        assert!("smartcard".parse::<KeystoreKind>().is_err());
    }
}
