use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pki::EkCertificate;

/// Identity of the TPM manufacturer as reported by `TPM_PT_MANUFACTURER`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    /// ASCII vendor identifier, e.g. `IFX` or `STM`.
    pub id: String,
    pub name: String,
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Ecc,
    Rsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Ecc => f.write_str("ECC"),
            KeyAlgorithm::Rsa => f.write_str("RSA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurve {
    NistP256,
    NistP384,
    NistP521,
    Sm2P256,
}

/// Key type of an EK template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa(u16),
    Ecc(EccCurve),
}

impl KeyType {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyType::Rsa(_) => KeyAlgorithm::Rsa,
            KeyType::Ecc(_) => KeyAlgorithm::Ecc,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Rsa(bits) => write!(f, "rsa{bits}"),
            KeyType::Ecc(EccCurve::NistP256) => f.write_str("ecc-nist-p256"),
            KeyType::Ecc(EccCurve::NistP384) => f.write_str("ecc-nist-p384"),
            KeyType::Ecc(EccCurve::NistP521) => f.write_str("ecc-nist-p521"),
            KeyType::Ecc(EccCurve::Sm2P256) => f.write_str("ecc-sm2-p256"),
        }
    }
}

/// NV indices reserved for EK certificates and the key type of the
/// template each one pairs with (TCG EK Credential Profile, section 2.2.1.4).
pub const EK_CERTIFICATE_INDICES: [(u32, KeyType); 9] = [
    (0x01C0_0002, KeyType::Rsa(2048)),
    (0x01C0_000A, KeyType::Ecc(EccCurve::NistP256)),
    (0x01C0_0012, KeyType::Rsa(2048)),
    (0x01C0_0014, KeyType::Ecc(EccCurve::NistP256)),
    (0x01C0_0016, KeyType::Ecc(EccCurve::NistP384)),
    (0x01C0_0018, KeyType::Ecc(EccCurve::NistP521)),
    (0x01C0_001A, KeyType::Ecc(EccCurve::Sm2P256)),
    (0x01C0_001C, KeyType::Rsa(3072)),
    (0x01C0_001E, KeyType::Rsa(4096)),
];

/// An EK certificate slot found in NV storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EkTemplate {
    pub nv_index: u32,
    pub key_type: KeyType,
}

impl EkTemplate {
    /// Template for a well-known EK certificate index.
    pub fn for_index(nv_index: u32) -> Option<Self> {
        EK_CERTIFICATE_INDICES
            .iter()
            .find(|(index, _)| *index == nv_index)
            .map(|(nv_index, key_type)| Self {
                nv_index: *nv_index,
                key_type: *key_type,
            })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.key_type.algorithm()
    }
}

impl fmt::Display for EkTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} ({})", self.nv_index, self.key_type)
    }
}

/// EK certificate bound to the key material of its template.
#[derive(Debug, Clone)]
pub struct EndorsementKey {
    pub template: EkTemplate,
    pub certificate: EkCertificate,
}
