//! Revocation evidence for long-term validation.

use crate::domain::certificate::SigningCertificate;
use crate::infra::error::{SigningError, SigningResult};
use openssl::x509::X509Crl;
use std::time::Duration;

/// Supplier of revocation data embedded alongside the signature.
pub trait RevocationSource {
    /// DER-encoded CRLs covering `cert`. An empty list means nothing was
    /// published for it.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` when every distribution point failed.
    fn crls_for(&self, cert: &SigningCertificate) -> SigningResult<Vec<Vec<u8>>>;
}

/// Downloads CRLs from the certificate's distribution points.
pub struct HttpCrlSource {
    http: reqwest::blocking::Client,
}

impl HttpCrlSource {
    pub fn new(timeout: Duration) -> SigningResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf-signer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SigningError::http("HTTP client setup failed", e))?;
        Ok(Self { http })
    }

    fn download(&self, url: &str) -> SigningResult<Vec<u8>> {
        let resp = self.http.get(url).send()?;
        if !resp.status().is_success() {
            return Err(SigningError::NetworkError(format!(
                "HTTP {} from {url}",
                resp.status()
            )));
        }
        let body = resp.bytes()?;
        to_der_crl(&body)
    }
}

impl RevocationSource for HttpCrlSource {
    fn crls_for(&self, cert: &SigningCertificate) -> SigningResult<Vec<Vec<u8>>> {
        let urls = cert.crl_distribution_urls();
        if urls.is_empty() {
            log::debug!("{} publishes no CRL distribution point", cert.subject_name());
            return Ok(Vec::new());
        }

        let mut last_err = None;
        for url in urls.iter().filter(|u| u.starts_with("http")) {
            match self.download(url) {
                Ok(crl) => {
                    log::debug!("Fetched CRL ({} bytes) from {url}", crl.len());
                    return Ok(vec![crl]);
                }
                Err(e) => {
                    log::warn!("CRL download from {url} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}

/// Accept DER or PEM, always return DER.
fn to_der_crl(body: &[u8]) -> SigningResult<Vec<u8>> {
    let crl = X509Crl::from_der(body)
        .or_else(|_| X509Crl::from_pem(body))
        .map_err(|e| SigningError::CertificateError(format!("response is not a CRL: {e}")))?;
    Ok(crl.to_der()?)
}

/// Gather CRLs for every certificate of the chain. Failures are logged and
/// skipped; the result may be partial or empty.
pub fn collect_crls(source: &dyn RevocationSource, chain: &[SigningCertificate]) -> Vec<Vec<u8>> {
    let mut crls: Vec<Vec<u8>> = Vec::new();
    for cert in chain {
        match source.crls_for(cert) {
            Ok(found) => {
                for crl in found {
                    if !crls.contains(&crl) {
                        crls.push(crl);
                    }
                }
            }
            Err(e) => log::warn!(
                "Skipping revocation data for {}: {e}",
                cert.subject_name()
            ),
        }
    }
    log::info!("Collected {} CRL(s) for {} certificate(s)", crls.len(), chain.len());
    crls
}
