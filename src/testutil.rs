//! Certificate fixtures shared by unit tests.

mod fixtures;

pub use fixtures::{EkOptions, TestPki};

use crate::pki::certificate::{EkCertificate, IssuerCertificate};

impl TestPki {
    pub fn intermediate_issuer(&self) -> IssuerCertificate {
        IssuerCertificate::from_der(&self.intermediate_der).unwrap()
    }

    pub fn ek(&self, options: EkOptions) -> EkCertificate {
        EkCertificate::from_der(self.ek_der(options)).unwrap()
    }
}
