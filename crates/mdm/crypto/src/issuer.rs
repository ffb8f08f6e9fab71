//! Device client certificate issuance from an enrollment CSR.

use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, CustomExtension, DistinguishedName,
    DnType, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls_pki_types::CertificateSigningRequestDer;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer as _;

use crate::{CertError, sha1_fingerprint, validity};

/// OID of the Microsoft device-ID certificate extension.
pub const DEVICE_ID_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 311, 66, 1, 0];

const EXT_KEY_USAGE_OID: &[u64] = &[2, 5, 29, 37];

/// `SEQUENCE { id-kp-clientAuth }`
const CLIENT_AUTH_EKU: &[u8] = &[
    0x30, 0x0a, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x02,
];

/// Errors issuing a device certificate.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("certificate signing request could not be parsed: {0}")]
    InvalidCsr(String),
    #[error("certificate signing request has no public key")]
    MissingPublicKey,
    #[error("certificate signing request signature does not verify")]
    CsrSignature,
    #[error("device authority is unusable: {0}")]
    Authority(#[from] CertError),
    #[error("failed to sign device certificate: {0}")]
    Signing(#[from] rcgen::Error),
}

/// Output of [`issue_device_certificate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificates {
    pub issuer_cert_der: Vec<u8>,
    pub issuer_fingerprint: String,
    pub leaf_cert_der: Vec<u8>,
    pub leaf_fingerprint: String,
}

/// Issue a client certificate for the public key in `csr_der`, signed by the given authority.
///
/// Only the CSR's public key is used. The subject is `CN=<common_name>` and the device ID is
/// carried in the [`DEVICE_ID_OID`] extension.
pub fn issue_device_certificate(
    csr_der: &[u8],
    authority_cert_pem: &str,
    authority_key_pem: &str,
    device_id: &str,
    common_name: &str,
) -> Result<IssuedCertificates, IssueError> {
    issue_device_certificate_at(
        csr_der,
        authority_cert_pem,
        authority_key_pem,
        device_id,
        common_name,
        Utc::now(),
    )
}

pub fn issue_device_certificate_at(
    csr_der: &[u8],
    authority_cert_pem: &str,
    authority_key_pem: &str,
    device_id: &str,
    common_name: &str,
    now: DateTime<Utc>,
) -> Result<IssuedCertificates, IssueError> {
    let (_, request) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| IssueError::InvalidCsr(e.to_string()))?;
    if request
        .certification_request_info
        .subject_pki
        .subject_public_key
        .data
        .is_empty()
    {
        return Err(IssueError::MissingPublicKey);
    }
    request
        .verify_signature()
        .map_err(|_| IssueError::CsrSignature)?;

    let csr = CertificateSigningRequestParams::from_der(&CertificateSigningRequestDer::from(csr_der))?;

    let authority_key = KeyPair::from_pem(authority_key_pem)?;
    let issuer = CertificateParams::from_ca_cert_pem(authority_cert_pem)?.self_signed(&authority_key)?;
    let issuer_cert_der = pem::parse(authority_cert_pem)
        .map_err(CertError::from)?
        .into_contents();

    let (not_before, not_after) = validity::one_year_from(now);

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.serial_number = Some(SerialNumber::from_slice(&validity::random_serial()));
    params.not_before = validity::to_offset(not_before).map_err(CertError::from)?;
    params.not_after = validity::to_offset(not_after).map_err(CertError::from)?;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.use_authority_key_identifier_extension = true;

    let mut eku = CustomExtension::from_oid_content(EXT_KEY_USAGE_OID, CLIENT_AUTH_EKU.to_vec());
    eku.set_criticality(true);
    params.custom_extensions = vec![
        eku,
        CustomExtension::from_oid_content(DEVICE_ID_OID, device_id.as_bytes().to_vec()),
    ];

    let leaf = params.signed_by(&csr.public_key, &issuer, &authority_key)?;
    let leaf_cert_der = leaf.der().to_vec();

    let issued = IssuedCertificates {
        issuer_fingerprint: sha1_fingerprint(&issuer_cert_der),
        issuer_cert_der,
        leaf_fingerprint: sha1_fingerprint(&leaf_cert_der),
        leaf_cert_der,
    };

    tracing::info!(
        device_id,
        leaf_fingerprint = %issued.leaf_fingerprint,
        issuer_fingerprint = %issued.issuer_fingerprint,
        "issued device certificate"
    );

    Ok(issued)
}
