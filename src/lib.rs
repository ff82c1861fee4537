pub mod audit;
pub mod config;
pub mod pki;
pub mod privilege;
pub mod telemetry;
pub mod tpm;

#[cfg(test)]
pub(crate) mod testutil;
