//! Privilege elevation
//!
//! Reading the TPM usually requires root. The strategy is picked from
//! configuration at startup rather than at build time.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("failed to re-execute with sudo: {0}")]
    Exec(#[source] std::io::Error),

    #[error("failed to locate current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("privilege elevation is not supported on this platform")]
    Unsupported,
}

/// Configured elevation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    None,
    Sudo,
}

pub trait Elevation {
    /// Whether the current process lacks access to the protected resource.
    fn needs_elevation(&self) -> bool;

    /// Re-execute the process with elevated privileges.
    ///
    /// On success this does not return.
    fn elevate(&self) -> Result<(), PrivilegeError>;
}

/// Elevate only when needed.
pub fn elevate_if_needed(elevation: &dyn Elevation) -> Result<(), PrivilegeError> {
    if !elevation.needs_elevation() {
        debug!("no privilege elevation needed");
        return Ok(());
    }
    elevation.elevate()
}

/// Build the elevation for `strategy`, guarding access to `resource`.
pub fn from_strategy(strategy: Strategy, resource: impl Into<PathBuf>) -> Box<dyn Elevation> {
    match strategy {
        Strategy::None => Box::new(Unprivileged),
        Strategy::Sudo => Box::new(Sudo::new(resource)),
    }
}

/// Never elevates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unprivileged;

impl Elevation for Unprivileged {
    fn needs_elevation(&self) -> bool {
        false
    }

    fn elevate(&self) -> Result<(), PrivilegeError> {
        Ok(())
    }
}

/// Re-executes the process through `sudo` when `resource` is not readable.
#[derive(Debug, Clone)]
pub struct Sudo {
    resource: PathBuf,
}

impl Sudo {
    pub fn new(resource: impl Into<PathBuf>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

#[cfg(unix)]
impl Elevation for Sudo {
    fn needs_elevation(&self) -> bool {
        use nix::unistd::{AccessFlags, Uid, access};

        if Uid::effective().is_root() {
            return false;
        }
        access(&self.resource, AccessFlags::R_OK).is_err()
    }

    fn elevate(&self) -> Result<(), PrivilegeError> {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        let exe = std::env::current_exe().map_err(PrivilegeError::CurrentExe)?;
        info!(resource = %self.resource.display(), "re-executing with sudo");

        // exec only returns on failure
        let err = Command::new("sudo")
            .arg("--")
            .arg(exe)
            .args(std::env::args_os().skip(1))
            .exec();
        Err(PrivilegeError::Exec(err))
    }
}

#[cfg(not(unix))]
impl Elevation for Sudo {
    fn needs_elevation(&self) -> bool {
        false
    }

    fn elevate(&self) -> Result<(), PrivilegeError> {
        Err(PrivilegeError::Unsupported)
    }
}
