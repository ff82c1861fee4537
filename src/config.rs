use std::{collections::HashMap, path::PathBuf, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pki::FetchLimits;
use crate::privilege::Strategy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fetcher: FetcherConfig,
    pub bundle: BundleConfig,
    pub tpm: TpmConfig,
    pub privilege: PrivilegeConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// When disabled, CRLs are skipped and issuer retrieval fails.
    pub enabled: bool,
    pub max_fetches: usize,
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl FetcherConfig {
    pub fn limits(&self) -> FetchLimits {
        FetchLimits {
            max_fetches: self.max_fetches,
            timeout: Duration::from_secs(self.timeout_secs),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleConfig {
    /// Directory holding one sub-directory of root certificates per vendor.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TpmConfig {
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivilegeConfig {
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub skip_revocation_check: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = FetchLimits::default();
        let mut builder = ConfigLib::builder()
            .set_default("fetcher.enabled", true)?
            .set_default("fetcher.max_fetches", defaults.max_fetches as u64)?
            .set_default("fetcher.timeout_secs", defaults.timeout.as_secs())?
            .set_default("fetcher.max_body_bytes", defaults.max_body_bytes as u64)?
            .set_default("bundle.path", "bundle")?
            .set_default("tpm.export_dir", "export")?
            .set_default("privilege.strategy", "none")?
            .set_default("audit.skip_revocation_check", false)?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format TPM_TRUST_FETCHER__TIMEOUT_SECS
            builder = builder.add_source(
                Environment::with_prefix("TPM_TRUST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert!(config.fetcher.enabled);
        assert_eq!(config.fetcher.limits(), FetchLimits::default());
        assert_eq!(config.bundle.path, PathBuf::from("bundle"));
        assert_eq!(config.privilege.strategy, Strategy::None);
        assert!(!config.audit.skip_revocation_check);
    }

    #[test]
    fn test_env_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert("fetcher.enabled".to_string(), "false".to_string());
        env_vars.insert("fetcher.timeout_secs".to_string(), "30".to_string());
        env_vars.insert("privilege.strategy".to_string(), "sudo".to_string());
        env_vars.insert("tpm.export_dir".to_string(), "/var/lib/tpm".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert!(!config.fetcher.enabled);
        assert_eq!(config.fetcher.limits().timeout, Duration::from_secs(30));
        assert_eq!(config.privilege.strategy, Strategy::Sudo);
        assert_eq!(config.tpm.export_dir, PathBuf::from("/var/lib/tpm"));
    }

    #[test]
    fn test_partial_env_override() {
        let mut env_vars = HashMap::new();
        // We just override the fetch ceiling
        env_vars.insert("fetcher.max_fetches".to_string(), "3".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.fetcher.max_fetches, 3);
        // The other values should use default
        assert_eq!(config.fetcher.timeout_secs, 5);
        assert_eq!(config.fetcher.max_body_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_strategy() {
        let mut env_vars = HashMap::new();
        env_vars.insert("privilege.strategy".to_string(), "runas".to_string());

        assert!(Config::load_with_sources(Some(env_vars)).is_err());
    }
}
