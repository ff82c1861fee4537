//! rcgen builders for TPM vendor hierarchies, EK certificates and CRLs.
//!
//! Only depends on rcgen and time so the integration tests can compile the
//! same file.

use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
    CustomExtension, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer,
    KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber,
};
use time::OffsetDateTime;

pub const TCG_KP_EK_CERTIFICATE: [u64; 5] = [2, 23, 133, 8, 1];

pub struct EkOptions {
    pub ca: bool,
    pub issuer_urls: Vec<String>,
    pub crl_urls: Vec<String>,
    pub ek_usage: bool,
    pub serial: Vec<u8>,
}

impl Default for EkOptions {
    fn default() -> Self {
        Self {
            ca: false,
            issuer_urls: Vec::new(),
            crl_urls: Vec::new(),
            ek_usage: true,
            serial: vec![0x01, 0x23, 0x45, 0x67],
        }
    }
}

/// A root and an intermediate CA, the shape of most TPM vendor hierarchies.
pub struct TestPki {
    pub root_der: Vec<u8>,
    pub intermediate: Issuer<'static, KeyPair>,
    pub intermediate_der: Vec<u8>,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Test TPM Manufacturer");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

impl TestPki {
    pub fn new() -> Self {
        Self::with_intermediate(ca_params("Test EK Intermediate"))
    }

    /// The intermediate carries the usual name but is an end-entity
    /// certificate.
    pub fn with_end_entity_intermediate() -> Self {
        let mut params = ca_params("Test EK Intermediate");
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        Self::with_intermediate(params)
    }

    fn with_intermediate(intermediate_params: CertificateParams) -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root_params = ca_params("Test EK Root");
        let root_der = root_params.self_signed(&root_key).unwrap().der().to_vec();
        let root = Issuer::new(root_params, root_key);

        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate_der = intermediate_params
            .signed_by(&intermediate_key, &root)
            .unwrap()
            .der()
            .to_vec();
        let intermediate = Issuer::new(intermediate_params, intermediate_key);

        Self {
            root_der,
            intermediate,
            intermediate_der,
        }
    }

    pub fn ek_der(&self, options: EkOptions) -> Vec<u8> {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Test EK");
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from_slice(&options.serial));
        params.is_ca = if options.ca {
            IsCa::Ca(BasicConstraints::Unconstrained)
        } else {
            IsCa::ExplicitNoCa
        };
        params.key_usages = vec![KeyUsagePurpose::KeyEncipherment];
        if options.ek_usage {
            params.extended_key_usages =
                vec![ExtendedKeyUsagePurpose::Other(TCG_KP_EK_CERTIFICATE.to_vec())];
        }
        if !options.crl_urls.is_empty() {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: options.crl_urls,
            }];
        }
        if !options.issuer_urls.is_empty() {
            params.custom_extensions = vec![aia_extension(&options.issuer_urls)];
        }

        params
            .signed_by(&key_pair, &self.intermediate)
            .unwrap()
            .der()
            .to_vec()
    }

    /// A CRL signed by the intermediate CA.
    pub fn crl(
        &self,
        revoked: &[&[u8]],
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
    ) -> Vec<u8> {
        let params = CertificateRevocationListParams {
            this_update,
            next_update,
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(serial),
                    revocation_time: this_update,
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params.signed_by(&self.intermediate).unwrap().der().to_vec()
    }
}

/// Authority Information Access extension with one caIssuers URI per URL.
fn aia_extension(urls: &[String]) -> CustomExtension {
    const CA_ISSUERS: [u8; 8] = [0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];

    let mut descriptions = Vec::new();
    for url in urls {
        let mut description = der_tlv(0x06, &CA_ISSUERS);
        description.extend(der_tlv(0x86, url.as_bytes()));
        descriptions.extend(der_tlv(0x30, &description));
    }
    CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 1], der_tlv(0x30, &descriptions))
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    match content.len() {
        len if len < 0x80 => out.push(len as u8),
        len if len <= 0xff => out.extend([0x81, len as u8]),
        len => out.extend([0x82, (len >> 8) as u8, len as u8]),
    }
    out.extend_from_slice(content);
    out
}
