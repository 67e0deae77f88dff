//! HTTP client adapter for RFC3161 timestamp authority requests.

use crate::domain::types::{Secret, TimestampUrl};
use crate::infra::config::SignerConfiguration;
use crate::infra::error::{SigningError, SigningResult};
use std::time::Duration;

/// Transport to a timestamp authority.
pub trait TimestampClient {
    /// Authority URL, for logging and precondition checks.
    fn url(&self) -> &str;

    /// Send a DER `TimeStampReq` and return the raw `TimeStampResp` body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` on transport failures and `TimestampError` on a
    /// non-success HTTP status.
    fn post_request(&self, ts_request_der: &[u8]) -> SigningResult<Vec<u8>>;
}

/// Blocking HTTP adapter performing RFC3161 POST exchanges.
pub struct TimestampHttpClient {
    url: TimestampUrl,
    credentials: Option<(String, Secret)>,
    http: reqwest::blocking::Client,
}

impl TimestampHttpClient {
    pub fn new(url: TimestampUrl, timeout: Duration) -> SigningResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf-signer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SigningError::http("HTTP client setup failed", e))?;
        Ok(Self {
            url,
            credentials: None,
            http,
        })
    }

    /// Use HTTP basic authentication.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Secret) -> Self {
        self.credentials = Some((username.into(), password));
        self
    }

    /// Client for the configured authority, or `None` when no URL is set.
    pub fn from_config(config: &SignerConfiguration) -> SigningResult<Option<Self>> {
        let Some(url) = config.timestamp_url()? else {
            return Ok(None);
        };
        let client = Self::new(url, config.network_timeout())?;
        Ok(Some(match config.timestamp_credentials() {
            Some((user, password)) => client.with_credentials(user, password),
            None => client,
        }))
    }
}

impl TimestampClient for TimestampHttpClient {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    fn post_request(&self, ts_request_der: &[u8]) -> SigningResult<Vec<u8>> {
        log::info!("Requesting timestamp from {}", self.url);
        let mut request = self
            .http
            .post(self.url.as_str())
            .header("Content-Type", "application/timestamp-query")
            .header("Accept", "application/timestamp-reply")
            .body(ts_request_der.to_vec());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password.expose()));
        }

        let resp = request.send().map_err(|e| {
            SigningError::http(format!("Timestamp request to {} failed", self.url), e)
        })?;
        if !resp.status().is_success() {
            return Err(SigningError::TimestampError(format!(
                "HTTP {} from {}",
                resp.status(),
                self.url
            )));
        }
        let bytes = resp
            .bytes()
            .map_err(|e| SigningError::http("Reading the timestamp response failed", e))?;
        log::debug!("Timestamp response: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}
