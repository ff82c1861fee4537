//! The `audit` run: locate the EK certificate, make sure its manufacturer is
//! covered by the trust bundle, then verify it.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::pki::{CheckConfig, CheckError, EkCertificate, TrustBundle, TrustChecker};
use crate::tpm::{KeyLocator, LocateError, Manufacturer, TpmSession};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to read EK certificate: {0}")]
    Locate(#[from] LocateError),

    #[error("unsupported manufacturer {id}")]
    UnsupportedManufacturer { id: String },

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("TPM task failed: {0}")]
    Task(#[from] JoinError),
}

/// Outcome of a successful audit.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub manufacturer: Manufacturer,
    pub certificate: EkCertificate,
}

pub struct Auditor {
    locator: KeyLocator,
    checker: TrustChecker,
    bundle: Arc<dyn TrustBundle>,
}

impl Auditor {
    pub fn new(locator: KeyLocator, checker: TrustChecker, bundle: Arc<dyn TrustBundle>) -> Self {
        Self {
            locator,
            checker,
            bundle,
        }
    }

    pub async fn run<S>(
        &self,
        session: S,
        skip_revocation_check: bool,
    ) -> Result<AuditReport, AuditError>
    where
        S: TpmSession + 'static,
    {
        let start = Instant::now();
        info!("Reading EK certificate from TPM");
        // TPM commands block, keep them off the runtime workers
        let locator = self.locator.clone();
        let located = tokio::task::spawn_blocking(move || locator.locate(session)).await??;
        log_duration(start);

        let start = Instant::now();
        info!("Loading manufacturers trusted bundle");
        let id = located.manufacturer.id.clone();
        if !self.bundle.vendors().contains(&id) {
            error!(
                %id,
                reason = "this manufacturer is not included in the trust bundle",
                "unsupported manufacturer"
            );
            return Err(AuditError::UnsupportedManufacturer { id });
        }
        info!(%id, "manufacturer supported");
        log_duration(start);

        let start = Instant::now();
        info!("Validating EK certificate");
        let config = CheckConfig::new(located.certificate.clone(), id)
            .skip_revocation_check(skip_revocation_check);
        self.checker.check(config).await?;
        log_duration(start);

        info!("TPM is genuine");
        Ok(AuditReport {
            manufacturer: located.manufacturer,
            certificate: located.certificate,
        })
    }
}

fn log_duration(start: Instant) {
    info!("took: {:.2?}", start.elapsed());
}
