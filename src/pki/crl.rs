//! Certificate Revocation List (CRL) wrapper
//!
//! A [`RevocationList`] is fetched, validated and discarded within a single
//! verification run. It answers three questions only: is the list inside its
//! validity window, was it signed by one of the issuers fetched in the same
//! run, and does it name a given serial number.

use thiserror::Error;
use ::time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::prelude::*;

use super::certificate::{EkCertificate, IssuerCertificate, ParseError};

/// CRL-related errors
#[derive(Error, Debug)]
pub enum CrlError {
    #[error("CRL is expired")]
    Expired,

    #[error("CRL is not yet valid")]
    NotYetValid,

    #[error("CRL signed by unknown authority")]
    UnknownAuthority,

    #[error("CRL parsing failed: {0}")]
    Parse(#[from] ParseError),
}

/// Represents a Certificate Revocation List
#[derive(Debug, Clone)]
pub struct RevocationList {
    der: Vec<u8>,
    issuer: String,
    this_update: OffsetDateTime,
    next_update: Option<OffsetDateTime>,
    revoked_serials: Vec<Vec<u8>>,
}

impl RevocationList {
    /// Create a new CRL from DER data
    pub fn from_der(der: Vec<u8>) -> Result<Self, ParseError> {
        let (issuer, this_update, next_update, revoked_serials) = {
            let (rest, crl) = CertificateRevocationList::from_der(&der)
                .map_err(|e| ParseError::X509(e.into()))?;
            if !rest.is_empty() {
                return Err(ParseError::TrailingData(rest.len()));
            }
            let revoked: Vec<Vec<u8>> = crl
                .iter_revoked_certificates()
                .map(|entry| entry.raw_serial().to_vec())
                .collect();
            (
                crl.issuer().to_string(),
                crl.last_update().to_datetime(),
                crl.next_update().map(|t| t.to_datetime()),
                revoked,
            )
        };

        Ok(Self {
            der,
            issuer,
            this_update,
            next_update,
            revoked_serials,
        })
    }

    fn parse(&self) -> Result<CertificateRevocationList<'_>, ParseError> {
        let (_, crl) = CertificateRevocationList::from_der(&self.der)
            .map_err(|e| ParseError::X509(e.into()))?;
        Ok(crl)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn this_update(&self) -> OffsetDateTime {
        self.this_update
    }

    pub fn next_update(&self) -> Option<OffsetDateTime> {
        self.next_update
    }

    /// Number of revoked entries.
    pub fn len(&self) -> usize {
        self.revoked_serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked_serials.is_empty()
    }

    /// Check the validity window against the current time.
    pub fn validate(&self) -> Result<(), CrlError> {
        self.validate_at(OffsetDateTime::now_utc())
    }

    /// Check that `now` lies within `[thisUpdate, nextUpdate]`.
    ///
    /// A list without `nextUpdate` has no upper bound to trust and is
    /// treated as expired.
    pub fn validate_at(&self, now: OffsetDateTime) -> Result<(), CrlError> {
        match self.next_update {
            Some(next_update) if now <= next_update => {}
            _ => return Err(CrlError::Expired),
        }
        if now < self.this_update {
            return Err(CrlError::NotYetValid);
        }
        Ok(())
    }

    /// Accept the list if its signature validates against at least one of
    /// `signers`.
    pub fn verify_signed_by(&self, signers: &[IssuerCertificate]) -> Result<(), CrlError> {
        let crl = self.parse()?;

        for signer in signers {
            if !signer.can_sign_crl() {
                debug!(subject = signer.subject(), "issuer not authorized for CRL signing");
                continue;
            }
            let Ok(cert) = signer.parse() else {
                continue;
            };
            if crl.verify_signature(cert.public_key()).is_ok() {
                debug!(signer = signer.subject(), "[OK] CRL signature verification passed");
                return Ok(());
            }
        }
        Err(CrlError::UnknownAuthority)
    }

    /// Whether the certificate's serial number appears in this snapshot.
    ///
    /// `false` only means "not revoked as of `thisUpdate`".
    pub fn is_revoked(&self, cert: &EkCertificate) -> bool {
        let revoked = self
            .revoked_serials
            .iter()
            .any(|serial| serial.as_slice() == cert.serial());
        if revoked {
            info!(serial = %cert.serial_hex(), "certificate is listed as revoked");
        }
        revoked
    }
}
