use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::eyre::{Report, eyre};
use dashmap::DashMap;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use super::certificate::{
    EkCertificate, IssuerCertificate, ParseError, can_sign_certificates, is_self_signed,
};

/// Longest issuer path walked from an EK certificate to a root.
const MAX_CHAIN_DEPTH: usize = 10;

/// Error type for trust bundle operations.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("X.509 error: {0}")]
    X509(#[from] X509Error),

    #[error(transparent)]
    Custom(#[from] Report),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<walkdir::Error> for BundleError {
    fn from(e: walkdir::Error) -> Self {
        BundleError::Io(e.into())
    }
}

impl From<ParseError> for BundleError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::X509(e) => BundleError::X509(e),
            other => BundleError::Custom(eyre!(other)),
        }
    }
}

/// Represents a bundled certificate with additional metadata.
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    pub raw: Arc<Vec<u8>>,
    pub subject: String,
}

impl CertificateEntry {
    /// Create a certificate entry from DER-encoded bytes
    pub fn from_der(der: impl AsRef<[u8]>) -> Result<Self, BundleError> {
        let der_bytes = der.as_ref();
        let (_, cert) =
            X509Certificate::from_der(der_bytes).map_err(|e| BundleError::X509(e.into()))?;

        let subject = cert.subject().to_string();

        Ok(Self {
            raw: Arc::new(der_bytes.to_vec()),
            subject,
        })
    }

    /// Parse the certificate from stored DER bytes
    pub fn parse(&self) -> Result<X509Certificate<'_>, BundleError> {
        let (_, cert) =
            X509Certificate::from_der(&self.raw).map_err(|e| BundleError::X509(e.into()))?;
        Ok(cert)
    }
}

/// Manufacturer root and intermediate authorities.
///
/// Fetching and refreshing the bundle is the bundle owner's concern; the
/// trust pipeline only consumes these three predicates.
pub trait TrustBundle: Send + Sync {
    /// Succeeds if `cert` chains to a root held by the bundle for `vendor`.
    ///
    /// Authorities bundled for other vendors are never considered.
    fn verify_certificate(&self, cert: &EkCertificate, vendor: &str) -> Result<(), BundleError>;

    /// Whether the bundle already holds exactly this certificate.
    fn contains(&self, cert: &IssuerCertificate) -> bool;

    /// Manufacturer identifiers (TPM vendor IDs such as `IFX`) covered by
    /// the bundle.
    fn vendors(&self) -> Vec<String>;
}

/// In-memory trust bundle loaded from a directory.
///
/// The directory holds one sub-directory per vendor ID, each with `.der`,
/// `.pem` or `.crt` certificates:
///
/// ```text
/// bundle/
///   IFX/infineon-root.der
///   STM/stm-root.pem
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTrustBundle {
    base_path: PathBuf,
    vendors: Arc<DashMap<String, Vec<CertificateEntry>>>,
}

impl MemoryTrustBundle {
    /// Load every vendor sub-directory under `base_path`.
    pub async fn new<P: Into<PathBuf>>(base_path: P) -> Result<Self, BundleError> {
        let bundle = Self {
            base_path: base_path.into(),
            vendors: Arc::new(DashMap::new()),
        };

        bundle.load_from_disk().await?;
        Ok(bundle)
    }

    /// Return the amount of certificates currently held.
    pub fn len(&self) -> usize {
        self.vendors.iter().map(|e| e.value().len()).sum()
    }

    /// Check if the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add DER encoded certificates for a vendor.
    ///
    /// Returns the number of certificates added.
    pub fn add_certs<I, D>(&self, vendor: &str, der_certs: I) -> usize
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut entry = self.vendors.entry(vendor.to_ascii_uppercase()).or_default();
        let mut count = 0;
        for der_cert in der_certs {
            if let Ok(cert_entry) = CertificateEntry::from_der(der_cert.as_ref()) {
                debug!(vendor, subject = %cert_entry.subject, "adding certificate");
                entry.push(cert_entry);
                count += 1;
            }
        }
        count
    }

    async fn load_from_disk(&self) -> Result<(), BundleError> {
        let mut count = 0;

        for entry in WalkDir::new(&self.base_path).min_depth(2).max_depth(2) {
            let entry = entry?;
            let path = entry.path();

            if !path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("der")
                        || ext.eq_ignore_ascii_case("pem")
                        || ext.eq_ignore_ascii_case("crt")
                })
            {
                continue;
            }
            let Some(vendor) = vendor_of(path) else {
                continue;
            };

            let bytes = fs::read(path).await?;
            let ders = decode_certificates(&bytes);
            if ders.is_empty() {
                warn!(path = %path.display(), "no certificate found in bundle file");
                continue;
            }
            count += self.add_certs(&vendor, ders);
        }
        tracing::info!(
            vendors = self.vendors.len(),
            "Loaded {count} certificates from bundle"
        );
        Ok(())
    }

}

// Try to find the vendor certificate that issued `cert`
fn find_issuer_cert<'a>(
    entries: &'a [CertificateEntry],
    cert: &X509Certificate<'_>,
) -> Option<&'a CertificateEntry> {
    let issuer_dn = cert.issuer();
    entries.iter().find(|entry| {
        entry.parse().is_ok_and(|candidate| {
            candidate.subject() == issuer_dn
                && can_sign_certificates(&candidate)
                && candidate.validity().is_valid()
                && cert.verify_signature(Some(candidate.public_key())).is_ok()
        })
    })
}

impl TrustBundle for MemoryTrustBundle {
    fn verify_certificate(&self, cert: &EkCertificate, vendor: &str) -> Result<(), BundleError> {
        let Some(entries) = self.vendors.get(&vendor.trim().to_ascii_uppercase()) else {
            return Err(BundleError::Custom(eyre!(
                "no trusted authority bundled for vendor {vendor}"
            )));
        };

        let leaf = cert.parse()?;
        if !leaf.validity().is_valid() {
            return Err(BundleError::Custom(eyre!(
                "certificate has expired or is not yet valid"
            )));
        }

        let mut current = cert.der().to_vec();
        for _ in 0..MAX_CHAIN_DEPTH {
            let next = {
                let (_, child) =
                    X509Certificate::from_der(&current).map_err(|e| BundleError::X509(e.into()))?;
                let Some(issuer_entry) = find_issuer_cert(entries.value(), &child) else {
                    return Err(BundleError::Custom(eyre!(
                        "certificate signed by unknown authority: {}",
                        child.issuer()
                    )));
                };
                let issuer = issuer_entry.parse()?;
                if is_self_signed(&issuer) {
                    debug!(root = %issuer.subject(), "reached trusted root");
                    return Ok(());
                }
                issuer_entry.raw.to_vec()
            };
            current = next;
        }
        Err(BundleError::Custom(eyre!("Certificate chain too long")))
    }

    fn contains(&self, cert: &IssuerCertificate) -> bool {
        self.vendors.iter().any(|vendor| {
            vendor
                .value()
                .iter()
                .any(|entry| entry.raw.as_slice() == cert.der())
        })
    }

    fn vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.vendors.iter().map(|e| e.key().clone()).collect();
        vendors.sort();
        vendors
    }
}

fn vendor_of(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()?
        .to_str()
        .map(|name| name.trim().to_ascii_uppercase())
}

/// Decode one DER certificate or any number of concatenated PEM blocks.
fn decode_certificates(bytes: &[u8]) -> Vec<Vec<u8>> {
    if !bytes.starts_with(b"-----BEGIN") {
        return vec![bytes.to_vec()];
    }

    let mut ders = Vec::new();
    let mut rest = bytes;
    while let Some(start) = find(rest, b"-----BEGIN") {
        match parse_x509_pem(&rest[start..]) {
            Ok((remaining, pem)) => {
                if pem.label == "CERTIFICATE" {
                    ders.push(pem.contents);
                }
                rest = remaining;
            }
            Err(e) => {
                warn!("Failed to decode PEM block: {e}");
                break;
            }
        }
    }
    ders
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
