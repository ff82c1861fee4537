pub mod bundle;
pub mod certificate;
pub mod checker;
pub mod crl;
pub mod fetcher;

// Re-export commonly used types
pub use bundle::{BundleError, MemoryTrustBundle, TrustBundle};
pub use certificate::{EkCertificate, IssuerCertificate, ParseError, TCG_KP_EK_CERTIFICATE};
pub use checker::{CheckConfig, CheckError, StructuralError, TrustChecker};
pub use crl::{CrlError, RevocationList};
pub use fetcher::{FetchError, FetchLimits, Fetcher, HttpFetcher, TransportError};
