//! EK certificate discovery
//!
//! The locator favors speed since it runs on every audit:
//!
//! 1. enumerate the EK certificates stored in NV indices,
//! 2. reuse a persisted EK handle when there is one,
//! 3. otherwise generate the EK, trying algorithms in order (ECC first as
//!    its key generation is much faster than RSA).

use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{TpmError, TpmSession};
use super::types::{EkTemplate, EndorsementKey, KeyAlgorithm, Manufacturer};
use crate::pki::EkCertificate;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("failed to get TPM info: {0}")]
    Info(#[source] TpmError),

    #[error("failed to enumerate EK certificates: {0}")]
    Enumerate(#[source] TpmError),

    #[error("no EK certificates available in TPM")]
    NoCertificateAvailable,

    #[error("failed to read persisted EK {template}: {source}")]
    Persisted {
        template: EkTemplate,
        #[source]
        source: TpmError,
    },

    #[error("failed to get {algorithm} EK certificate: {source}")]
    Generation {
        algorithm: KeyAlgorithm,
        #[source]
        source: TpmError,
    },

    #[error("no EK template matches any of the supported algorithms")]
    NoUsableTemplate,

    #[error("failed to close TPM: {0}")]
    Close(#[source] TpmError),
}

/// Result of a successful search.
#[derive(Debug, Clone)]
pub struct LocatedEk {
    pub certificate: EkCertificate,
    pub manufacturer: Manufacturer,
}

#[derive(Debug, Clone)]
pub struct KeyLocator {
    generation_order: Vec<KeyAlgorithm>,
}

impl Default for KeyLocator {
    fn default() -> Self {
        Self {
            generation_order: vec![KeyAlgorithm::Ecc, KeyAlgorithm::Rsa],
        }
    }
}

impl KeyLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Algorithms tried, in order, when no persisted EK exists.
    pub fn with_generation_order(mut self, order: Vec<KeyAlgorithm>) -> Self {
        self.generation_order = order;
        self
    }

    /// Search the TPM for a usable EK certificate.
    ///
    /// The session is closed before returning, whatever the outcome.
    pub fn locate<S: TpmSession>(&self, mut session: S) -> Result<LocatedEk, LocateError> {
        let result = self.search(&mut session);

        debug!("closing connection to TPM");
        match (result, session.close()) {
            (Ok(located), Ok(())) => Ok(located),
            (Ok(_), Err(e)) => Err(LocateError::Close(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!(error = %close_error, "failed to close TPM");
                Err(e)
            }
        }
    }

    fn search<S: TpmSession>(&self, session: &mut S) -> Result<LocatedEk, LocateError> {
        debug!("getting TPM info");
        let manufacturer = session.info().map_err(LocateError::Info)?;
        info!(id = %manufacturer.id, "manufacturer: {}", manufacturer.name);

        info!("start searching for EK certificates");
        let available = session.ek_templates().map_err(LocateError::Enumerate)?;
        if available.is_empty() {
            return Err(LocateError::NoCertificateAvailable);
        }
        info!("found {} EK certificate(s)", available.len());
        for template in &available {
            info!(
                kty = %template.key_type,
                index = %format_args!("{:#010x}", template.nv_index),
                "certificate"
            );
        }

        let persisted = session
            .persisted_templates()
            .map_err(LocateError::Enumerate)?;
        let ek = match persisted.first() {
            Some(template) => {
                debug!("found {} persisted handle(s)", persisted.len());
                session
                    .materialize(template)
                    .map_err(|source| LocateError::Persisted {
                        template: *template,
                        source,
                    })?
            }
            None => {
                debug!("no persisted handles found, must generate associated EK key pair in TPM");
                self.generate(session, &available)?
            }
        };

        info!(
            issuer = ek.certificate.issuer(),
            "select {} EK certificate", ek.template.key_type
        );
        Ok(LocatedEk {
            certificate: ek.certificate,
            manufacturer,
        })
    }

    fn generate<S: TpmSession>(
        &self,
        session: &mut S,
        available: &[EkTemplate],
    ) -> Result<EndorsementKey, LocateError> {
        for (attempt, algorithm) in self.generation_order.iter().enumerate() {
            let Some(template) = available.iter().find(|t| t.algorithm() == *algorithm) else {
                debug!(%algorithm, "no EK certificate found for algorithm");
                continue;
            };
            if *algorithm == KeyAlgorithm::Rsa && attempt > 0 {
                warn!(
                    reason = "the key pair associated with the certificate is regenerated in the TPM to ensure proper binding",
                    "RSA key generation can take a bit of time..."
                );
            }

            match session.generate(template) {
                Ok(ek) => {
                    debug!(%algorithm, "found EK certificate");
                    return Ok(ek);
                }
                Err(TpmError::TemplateNotFound) => {
                    debug!(%algorithm, "EK template not found, trying next algorithm");
                }
                Err(source) => {
                    return Err(LocateError::Generation {
                        algorithm: *algorithm,
                        source,
                    });
                }
            }
        }
        Err(LocateError::NoUsableTemplate)
    }
}
