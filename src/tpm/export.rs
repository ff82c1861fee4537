//! Offline TPM session over exported NV indices
//!
//! An export directory holds one file per EK certificate index, named after
//! the index, plus a `manufacturer.json` manifest:
//!
//! ```text
//! export/
//!   manufacturer.json     {"id": "IFX", "name": "Infineon", "persisted": ["0x01c0000a"]}
//!   0x01c00002.der
//!   0x01c0000a.der
//! ```
//!
//! `persisted` lists the certificate indices whose EK key is already
//! persisted in the TPM. Vendor IDs are upper-cased, like the trust bundle's
//! vendor directories. The certificate files are what `tpm2_nvread`
//! produces, which lets the audit run where the TPM is not directly
//! reachable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::session::{TpmError, TpmSession};
use super::types::{EkTemplate, EndorsementKey, Manufacturer};
use crate::pki::EkCertificate;

pub const MANIFEST_FILE: &str = "manufacturer.json";

#[derive(Debug, Deserialize)]
struct Manifest {
    id: String,
    name: String,
    #[serde(default)]
    persisted: Vec<String>,
}

/// [`TpmSession`] reading EK certificates from an export directory.
///
/// Generation binds the exported certificate without creating any key
/// material.
#[derive(Debug)]
pub struct ExportedTpm {
    manufacturer: Manufacturer,
    /// Enumerated templates with the file holding their certificate.
    templates: Vec<(EkTemplate, PathBuf)>,
    persisted: Vec<EkTemplate>,
    closed: bool,
}

impl ExportedTpm {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TpmError> {
        let dir = dir.as_ref().to_path_buf();
        debug!(dir = %dir.display(), "opening exported TPM");

        let manifest = fs::read(dir.join(MANIFEST_FILE))?;
        let manifest: Manifest = serde_json::from_slice(&manifest)
            .map_err(|e| TpmError::Info(format!("invalid {MANIFEST_FILE}: {e}")))?;

        let mut templates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("der") {
                continue;
            }
            let Some(template) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_index)
                .and_then(EkTemplate::for_index)
            else {
                debug!(path = %path.display(), "ignoring file not named after an EK certificate index");
                continue;
            };
            templates.push((template, path));
        }
        templates.sort_by_key(|(t, _)| t.nv_index);
        templates.dedup_by_key(|(t, _)| t.nv_index);

        let persisted = manifest
            .persisted
            .iter()
            .filter_map(|index| parse_index(index))
            .filter_map(EkTemplate::for_index)
            .collect();

        Ok(Self {
            manufacturer: Manufacturer {
                id: manifest.id.trim().to_ascii_uppercase(),
                name: manifest.name,
            },
            templates,
            persisted,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), TpmError> {
        if self.closed {
            return Err(TpmError::Closed);
        }
        Ok(())
    }

    fn read_certificate(&self, template: &EkTemplate) -> Result<EndorsementKey, TpmError> {
        self.ensure_open()?;
        let Some((_, path)) = self.templates.iter().find(|(t, _)| t == template) else {
            return Err(TpmError::TemplateNotFound);
        };

        let data = fs::read(path)?;
        let certificate =
            EkCertificate::from_nv_bytes(&data).map_err(|source| TpmError::Certificate {
                index: template.nv_index,
                source,
            })?;

        Ok(EndorsementKey {
            template: *template,
            certificate,
        })
    }
}

impl TpmSession for ExportedTpm {
    fn info(&self) -> Result<Manufacturer, TpmError> {
        self.ensure_open()?;
        Ok(self.manufacturer.clone())
    }

    fn ek_templates(&self) -> Result<Vec<EkTemplate>, TpmError> {
        self.ensure_open()?;
        Ok(self.templates.iter().map(|(t, _)| *t).collect())
    }

    fn persisted_templates(&self) -> Result<Vec<EkTemplate>, TpmError> {
        self.ensure_open()?;
        Ok(self.persisted.clone())
    }

    fn materialize(&mut self, template: &EkTemplate) -> Result<EndorsementKey, TpmError> {
        self.read_certificate(template)
    }

    fn generate(&mut self, template: &EkTemplate) -> Result<EndorsementKey, TpmError> {
        self.read_certificate(template)
    }

    fn close(&mut self) -> Result<(), TpmError> {
        self.ensure_open()?;
        self.closed = true;
        Ok(())
    }
}

fn parse_index(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}
