//! EK certificate trust verification
//!
//! [`TrustChecker`] is the composition root of the trust pipeline. It runs
//! cheap structural checks first, then retrieves the issuer certificates and
//! CRLs named by the certificate, checks revocation, and finally hands the
//! certificate to the [`TrustBundle`] for anchor verification.
//!
//! Everything fetched during a run is dropped when [`TrustChecker::check`]
//! returns; no material is cached across runs.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::bundle::{BundleError, TrustBundle};
use super::certificate::{EkCertificate, IssuerCertificate};
use super::crl::CrlError;
use super::fetcher::{FetchError, FetchLimits, Fetcher};

/// Input of a single verification run.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub certificate: EkCertificate,
    /// Vendor ID reported by the TPM. Selects the trust anchors the
    /// certificate must chain to.
    pub manufacturer: String,
    pub skip_revocation_check: bool,
}

impl CheckConfig {
    pub fn new(certificate: EkCertificate, manufacturer: impl Into<String>) -> Self {
        Self {
            certificate,
            manufacturer: manufacturer.into(),
            skip_revocation_check: false,
        }
    }

    pub fn skip_revocation_check(mut self, skip: bool) -> Self {
        self.skip_revocation_check = skip;
        self
    }
}

/// Rejections decided from the certificate alone, before any network call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("EK certificate cannot be a CA")]
    CannotBeCa,

    #[error("EK certificate does not specify an issuing certificate URL")]
    MissingIssuerUrl,

    #[error("EK certificate names {count} issuers, maximum is {max}")]
    TooManyIssuers { count: usize, max: usize },

    #[error("EK certificate names {count} CRL distribution points, maximum is {max}")]
    TooManyDistributionPoints { count: usize, max: usize },

    #[error("EK certificate is missing the tcg-kp-EKCertificate extended key usage")]
    MissingEkUsage,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("CRL from {url} rejected: {source}")]
    Crl {
        url: Url,
        #[source]
        source: CrlError,
    },

    #[error("EK certificate with serial {serial} has been revoked")]
    Revoked { serial: String },

    #[error("EK certificate is not trusted: {0}")]
    Untrusted(#[source] BundleError),
}

/// Verifies EK certificates against a trust bundle.
pub struct TrustChecker {
    fetcher: Box<dyn Fetcher>,
    bundle: Arc<dyn TrustBundle>,
    limits: FetchLimits,
}

impl TrustChecker {
    pub fn new(fetcher: Box<dyn Fetcher>, bundle: Arc<dyn TrustBundle>) -> Self {
        Self {
            fetcher,
            bundle,
            limits: FetchLimits::default(),
        }
    }

    /// Use the limits the fetcher was built with. `max_fetches` is applied
    /// separately to issuer URLs and CRL distribution points.
    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn check(&self, config: CheckConfig) -> Result<(), CheckError> {
        let cert = &config.certificate;
        let check_revocation = self.precheck(&config)?;

        let issuer_urls = prepare_urls(cert.issuer_urls())?;
        let issuers = self.fetch_issuers(&issuer_urls).await?;

        if check_revocation {
            let crl_urls = prepare_urls(cert.crl_urls())?;
            self.check_revocation(cert, &crl_urls, &issuers).await?;
        }

        for issuer in issuers.iter().filter(|i| i.is_intermediate()) {
            if !self.bundle.contains(issuer) {
                debug!(
                    subject = issuer.subject(),
                    "intermediate certificate is not part of the trust bundle"
                );
            }
        }

        self.bundle
            .verify_certificate(cert, &config.manufacturer)
            .map_err(CheckError::Untrusted)?;

        info!(serial = %cert.serial_hex(), "[OK] EK certificate is trusted");
        Ok(())
    }

    /// Returns whether revocation should be checked.
    fn precheck(&self, config: &CheckConfig) -> Result<bool, StructuralError> {
        let cert = &config.certificate;
        let max_fetches = self.limits.max_fetches;

        if cert.is_ca() {
            return Err(StructuralError::CannotBeCa);
        }

        let issuers = cert.issuer_urls().len();
        if issuers == 0 {
            return Err(StructuralError::MissingIssuerUrl);
        }
        if issuers > max_fetches {
            return Err(StructuralError::TooManyIssuers {
                count: issuers,
                max: max_fetches,
            });
        }

        let mut check_revocation = !config.skip_revocation_check;
        let distribution_points = cert.crl_urls().len();
        if check_revocation && distribution_points > max_fetches {
            return Err(StructuralError::TooManyDistributionPoints {
                count: distribution_points,
                max: max_fetches,
            });
        }
        if check_revocation && distribution_points == 0 {
            warn!(
                "EK certificate does not specify any CRL distribution point, skipping revocation check"
            );
            check_revocation = false;
        }

        if !cert.has_ek_usage() {
            return Err(StructuralError::MissingEkUsage);
        }

        for oid in cert.unhandled_critical_extensions() {
            debug!(%oid, "unhandled critical extension");
        }

        Ok(check_revocation)
    }

    async fn fetch_issuers(&self, urls: &[Url]) -> Result<Vec<IssuerCertificate>, CheckError> {
        let mut issuers = Vec::with_capacity(urls.len());
        for url in urls {
            issuers.push(self.fetcher.fetch_certificate(url).await?);
        }
        Ok(issuers)
    }

    async fn check_revocation(
        &self,
        cert: &EkCertificate,
        urls: &[Url],
        issuers: &[IssuerCertificate],
    ) -> Result<(), CheckError> {
        for url in urls {
            let Some(crl) = self.fetcher.fetch_revocation_list(url).await? else {
                warn!(%url, "CRL not available, skipping");
                continue;
            };

            crl.validate().map_err(|source| CheckError::Crl {
                url: url.clone(),
                source,
            })?;
            crl.verify_signed_by(issuers)
                .map_err(|source| CheckError::Crl {
                    url: url.clone(),
                    source,
                })?;

            if crl.is_revoked(cert) {
                return Err(CheckError::Revoked {
                    serial: cert.serial_hex(),
                });
            }
            debug!(%url, entries = crl.len(), "certificate not listed in CRL");
        }
        Ok(())
    }
}

/// Parse URLs, dropping those that cannot be fetched over HTTP(S).
fn prepare_urls(raw: &[String]) -> Result<Vec<Url>, CheckError> {
    let mut urls = Vec::with_capacity(raw.len());
    for s in raw {
        let url = Url::parse(s).map_err(|source| CheckError::InvalidUrl {
            url: s.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => urls.push(url),
            scheme => warn!(%url, scheme, "unsupported URL scheme, skipping"),
        }
    }
    Ok(urls)
}
