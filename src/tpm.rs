pub mod export;
pub mod locator;
pub mod session;
pub mod types;

pub use export::ExportedTpm;
pub use locator::{KeyLocator, LocateError, LocatedEk};
pub use session::{TpmError, TpmSession};
pub use types::{EkTemplate, EndorsementKey, KeyAlgorithm, KeyType, Manufacturer};
