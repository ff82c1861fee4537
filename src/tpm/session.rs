use thiserror::Error;

use super::types::{EkTemplate, EndorsementKey, Manufacturer};
use crate::pki::ParseError;

#[derive(Debug, Error)]
pub enum TpmError {
    /// No EK certificate template for the requested key.
    #[error("EK certificate template not found")]
    TemplateNotFound,

    #[error("TPM I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid EK certificate at NV index {index:#010x}: {source}")]
    Certificate {
        index: u32,
        #[source]
        source: ParseError,
    },

    #[error("failed to read TPM properties: {0}")]
    Info(String),

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("TPM session is closed")]
    Closed,
}

/// An exclusive session with a TPM.
///
/// Implementations hold the device handle; callers are expected to call
/// [`TpmSession::close`] on every exit path.
#[cfg_attr(test, mockall::automock)]
pub trait TpmSession: Send {
    /// Manufacturer identity, read from the TPM properties.
    fn info(&self) -> Result<Manufacturer, TpmError>;

    /// EK certificate templates present in NV storage.
    fn ek_templates(&self) -> Result<Vec<EkTemplate>, TpmError>;

    /// Templates of EK keys already persisted in the TPM.
    fn persisted_templates(&self) -> Result<Vec<EkTemplate>, TpmError>;

    /// Read the certificate of an already persisted EK.
    fn materialize(&mut self, template: &EkTemplate) -> Result<EndorsementKey, TpmError>;

    /// Create the EK described by `template` and bind its certificate.
    ///
    /// This may create key material inside the TPM.
    fn generate(&mut self, template: &EkTemplate) -> Result<EndorsementKey, TpmError>;

    fn close(&mut self) -> Result<(), TpmError>;
}
