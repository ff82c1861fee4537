use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use super::certificate::{IssuerCertificate, ParseError};
use super::crl::RevocationList;

/// Arbitrary ceiling on the number of downloads a single run may start.
pub const DEFAULT_MAX_FETCHES: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Bounds applied to every verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Maximum issuer certificates or CRLs fetched per run.
    pub max_fetches: usize,
    /// Deadline for one request, body included.
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_fetches: DEFAULT_MAX_FETCHES,
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Network-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("downloader is disabled")]
    Disabled,

    #[error("failed retrieving {url}: {source}")]
    Transport {
        url: Url,
        #[source]
        source: TransportError,
    },

    #[error("failed parsing response from {url}: {source}")]
    Parse {
        url: Url,
        #[source]
        source: ParseError,
    },
}

/// Retrieval of revocation lists and issuer certificates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a DER CRL. `Ok(None)` means fetching is disabled and no list is
    /// available; callers decide whether that is acceptable.
    async fn fetch_revocation_list(&self, url: &Url) -> Result<Option<RevocationList>, FetchError>;

    /// Fetch a raw DER issuer certificate. Fails hard when disabled, since
    /// the chain cannot be built without it.
    async fn fetch_certificate(&self, url: &Url) -> Result<IssuerCertificate, FetchError>;
}

/// [`Fetcher`] backed by `reqwest`.
///
/// Holds no per-request state and can be shared across runs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    enabled: bool,
    limits: FetchLimits,
}

impl HttpFetcher {
    pub fn new(limits: FetchLimits) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(limits.timeout)
            .user_agent(concat!("tpm-trust/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            enabled: true,
            limits,
        })
    }

    /// Enable or disable all downloads.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        debug!(%url, "fetching");
        let body = match timeout(self.limits.timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.limits.timeout)),
        };
        body.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let mut response = self.client.get(url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            return Err(TransportError::Status(response.status()));
        }

        let limit = self.limits.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(TransportError::BodyTooLarge(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_revocation_list(&self, url: &Url) -> Result<Option<RevocationList>, FetchError> {
        if !self.enabled {
            // if downloads are disabled, don't try to download at all
            return Ok(None);
        }

        let body = self.get(url).await?;
        let crl = RevocationList::from_der(body).map_err(|source| FetchError::Parse {
            url: url.clone(),
            source,
        })?;

        info!(%url, entries = crl.len(), "fetched CRL");
        Ok(Some(crl))
    }

    async fn fetch_certificate(&self, url: &Url) -> Result<IssuerCertificate, FetchError> {
        if !self.enabled {
            return Err(FetchError::Disabled);
        }

        let body = self.get(url).await?;
        let cert = IssuerCertificate::from_der(&body).map_err(|source| FetchError::Parse {
            url: url.clone(),
            source,
        })?;

        info!(%url, subject = cert.subject(), "fetched issuer certificate");
        Ok(cert)
    }
}
