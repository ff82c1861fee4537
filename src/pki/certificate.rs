use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// OID defined in TCG EK Credential Profile, version 2.6, section 3.2.16
/// "Extended Key Usage".
pub const TCG_KP_EK_CERTIFICATE: &str = "2.23.133.8.1";

/// `id-ad-caIssuers` access method of the Authority Information Access extension.
const OID_AD_CA_ISSUERS: &str = "1.3.6.1.5.5.7.48.2";

/// Errors raised while decoding certificates or revocation lists.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("X.509 error: {0}")]
    X509(#[from] X509Error),

    #[error("{0} unexpected trailing bytes after DER structure")]
    TrailingData(usize),
}

/// An Endorsement Key certificate read from the TPM.
///
/// The DER encoding is kept alongside the few fields the trust pipeline
/// needs, so the certificate can be cloned and moved across await points
/// without holding a borrowed parse tree.
#[derive(Debug, Clone)]
pub struct EkCertificate {
    raw: Arc<Vec<u8>>,
    serial: Vec<u8>,
    subject: String,
    issuer: String,
    is_ca: bool,
    issuer_urls: Vec<String>,
    crl_urls: Vec<String>,
    has_ek_usage: bool,
    unhandled_critical_extensions: Vec<String>,
}

impl EkCertificate {
    /// Decode a DER certificate, rejecting any trailing data.
    pub fn from_der(der: impl AsRef<[u8]>) -> Result<Self, ParseError> {
        let der = der.as_ref();
        let (rest, _) =
            X509Certificate::from_der(der).map_err(|e| ParseError::X509(e.into()))?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingData(rest.len()));
        }
        Self::from_exact_der(der.to_vec())
    }

    /// Decode a certificate read from an NV index.
    ///
    /// NV indices are often sized larger than the certificate they hold, so
    /// zero padding after the DER structure is tolerated and discarded.
    pub fn from_nv_bytes(data: impl AsRef<[u8]>) -> Result<Self, ParseError> {
        let data = data.as_ref();
        let (rest, _) =
            X509Certificate::from_der(data).map_err(|e| ParseError::X509(e.into()))?;
        if rest.iter().any(|b| *b != 0x00 && *b != 0xff) {
            return Err(ParseError::TrailingData(rest.len()));
        }
        let len = data.len() - rest.len();
        Self::from_exact_der(data[..len].to_vec())
    }

    fn from_exact_der(raw: Vec<u8>) -> Result<Self, ParseError> {
        let (_, cert) = X509Certificate::from_der(&raw).map_err(|e| ParseError::X509(e.into()))?;

        let mut issuer_urls = Vec::new();
        let mut crl_urls = Vec::new();
        let mut has_ek_usage = false;
        let mut unhandled_critical_extensions = Vec::new();

        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if desc.access_method.to_id_string() != OID_AD_CA_ISSUERS {
                            continue;
                        }
                        if let GeneralName::URI(uri) = &desc.access_location {
                            issuer_urls.push(uri.to_string());
                        }
                    }
                }
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in &points.points {
                        let Some(DistributionPointName::FullName(names)) =
                            &point.distribution_point
                        else {
                            continue;
                        };
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_urls.push(uri.to_string());
                            }
                        }
                    }
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    has_ek_usage = eku
                        .other
                        .iter()
                        .any(|oid| oid.to_id_string() == TCG_KP_EK_CERTIFICATE);
                }
                ParsedExtension::UnsupportedExtension { .. } if ext.critical => {
                    unhandled_critical_extensions.push(ext.oid.to_id_string());
                }
                _ => {}
            }
        }

        let serial = cert.raw_serial().to_vec();
        let subject = cert.subject().to_string();
        let issuer = cert.issuer().to_string();
        let is_ca = cert.is_ca();
        drop(cert);
        debug!(
            serial = %hex::encode(&serial),
            issuers = issuer_urls.len(),
            crls = crl_urls.len(),
            "parsed EK certificate"
        );

        Ok(Self {
            raw: Arc::new(raw),
            serial,
            subject,
            issuer,
            is_ca,
            issuer_urls,
            crl_urls,
            has_ek_usage,
            unhandled_critical_extensions,
        })
    }

    /// Parse the certificate from stored DER bytes
    pub fn parse(&self) -> Result<X509Certificate<'_>, ParseError> {
        let (_, cert) =
            X509Certificate::from_der(&self.raw).map_err(|e| ParseError::X509(e.into()))?;
        Ok(cert)
    }

    pub fn der(&self) -> &[u8] {
        &self.raw
    }

    /// Raw DER content octets of the serial number.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// caIssuers URLs of the Authority Information Access extension.
    pub fn issuer_urls(&self) -> &[String] {
        &self.issuer_urls
    }

    /// Full-name URIs of the CRL Distribution Points extension.
    pub fn crl_urls(&self) -> &[String] {
        &self.crl_urls
    }

    /// Whether the Extended Key Usage extension carries [`TCG_KP_EK_CERTIFICATE`].
    pub fn has_ek_usage(&self) -> bool {
        self.has_ek_usage
    }

    pub fn unhandled_critical_extensions(&self) -> &[String] {
        &self.unhandled_critical_extensions
    }
}

/// An issuer certificate retrieved over the network for a single run.
#[derive(Debug, Clone)]
pub struct IssuerCertificate {
    raw: Arc<Vec<u8>>,
    subject: String,
}

impl IssuerCertificate {
    /// Decode a raw DER certificate, as served by caIssuers endpoints
    /// (RFC 5280 section 4.2.2.1).
    pub fn from_der(der: impl AsRef<[u8]>) -> Result<Self, ParseError> {
        let der = der.as_ref();
        let (rest, cert) =
            X509Certificate::from_der(der).map_err(|e| ParseError::X509(e.into()))?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingData(rest.len()));
        }
        let subject = cert.subject().to_string();

        Ok(Self {
            raw: Arc::new(der.to_vec()),
            subject,
        })
    }

    /// Parse the certificate from stored DER bytes
    pub fn parse(&self) -> Result<X509Certificate<'_>, ParseError> {
        let (_, cert) =
            X509Certificate::from_der(&self.raw).map_err(|e| ParseError::X509(e.into()))?;
        Ok(cert)
    }

    pub fn der(&self) -> &[u8] {
        &self.raw
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// A CA certificate that is not self-signed and may sign certificates.
    pub fn is_intermediate(&self) -> bool {
        let Ok(cert) = self.parse() else {
            return false;
        };
        if !cert.is_ca() || is_self_signed(&cert) {
            return false;
        }
        matches!(cert.key_usage(), Ok(Some(ku)) if ku.value.key_cert_sign())
    }

    /// Whether this certificate may act as a CRL signer: it must be a CA and,
    /// when Key Usage is present, carry the cRLSign bit.
    pub fn can_sign_crl(&self) -> bool {
        let Ok(cert) = self.parse() else {
            return false;
        };
        if !cert.is_ca() {
            return false;
        }
        match cert.key_usage() {
            Ok(Some(ku)) => ku.value.crl_sign(),
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

/// A CA certificate whose Key Usage, when present, allows keyCertSign.
pub(crate) fn can_sign_certificates(cert: &X509Certificate<'_>) -> bool {
    if !cert.is_ca() {
        return false;
    }
    match cert.key_usage() {
        Ok(Some(ku)) => ku.value.key_cert_sign(),
        Ok(None) => true,
        Err(_) => false,
    }
}

/// Check if a certificate is self-signed
pub(crate) fn is_self_signed(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw() && cert.verify_signature(None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{EkOptions, TestPki};

    #[test]
    fn test_extracts_ek_fields() {
        let pki = TestPki::new();
        let ek = pki.ek(EkOptions {
            issuer_urls: vec!["http://pki.example.com/ek-ca.cer".into()],
            crl_urls: vec![
                "http://pki.example.com/ek.crl".into(),
                "ldap://directory.example.com/ek.crl".into(),
            ],
            ..EkOptions::default()
        });

        assert!(!ek.is_ca());
        assert!(ek.has_ek_usage());
        assert_eq!(ek.issuer_urls(), ["http://pki.example.com/ek-ca.cer"]);
        assert_eq!(ek.crl_urls().len(), 2);
        assert_eq!(ek.serial(), EkOptions::default().serial.as_slice());
        assert!(ek.issuer().contains("Test EK Intermediate"));
    }

    #[test]
    fn test_missing_ek_usage() {
        let pki = TestPki::new();
        let ek = pki.ek(EkOptions {
            ek_usage: false,
            ..EkOptions::default()
        });
        assert!(!ek.has_ek_usage());
        assert!(ek.issuer_urls().is_empty());
        assert!(ek.crl_urls().is_empty());
    }

    #[test]
    fn test_ca_flag() {
        let pki = TestPki::new();
        let ek = pki.ek(EkOptions {
            ca: true,
            ..EkOptions::default()
        });
        assert!(ek.is_ca());
    }

    #[test]
    fn test_trailing_data() {
        let pki = TestPki::new();
        let ek = pki.ek(EkOptions::default());

        let mut padded = ek.der().to_vec();
        padded.extend_from_slice(&[0x00; 32]);
        assert!(matches!(
            EkCertificate::from_der(&padded),
            Err(ParseError::TrailingData(32))
        ));

        let from_nv = EkCertificate::from_nv_bytes(&padded).unwrap();
        assert_eq!(from_nv.der(), ek.der());

        padded.push(0x42);
        assert!(EkCertificate::from_nv_bytes(&padded).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            EkCertificate::from_der([0u8; 10]),
            Err(ParseError::X509(_))
        ));
        assert!(IssuerCertificate::from_der(b"not a certificate").is_err());
    }

    #[test]
    fn test_issuer_classification() {
        let pki = TestPki::new();

        let intermediate = IssuerCertificate::from_der(&pki.intermediate_der).unwrap();
        assert!(intermediate.is_intermediate());
        assert!(intermediate.can_sign_crl());

        let root = IssuerCertificate::from_der(&pki.root_der).unwrap();
        assert!(!root.is_intermediate());

        let leaf = pki.ek(EkOptions::default());
        let leaf = IssuerCertificate::from_der(leaf.der()).unwrap();
        assert!(!leaf.is_intermediate());
        assert!(!leaf.can_sign_crl());
    }
}
