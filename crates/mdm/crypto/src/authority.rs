//! Device Authority keypair and self-signed CA certificate.

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs8::{EncodePrivateKey as _, LineEnding};

use crate::validity;

/// Common name of every authority certificate.
pub const AUTHORITY_COMMON_NAME: &str = "Device Authority";

/// Errors creating or decoding authority material.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to generate RSA key: {0}")]
    KeyGeneration(#[from] rsa::Error),
    #[error("failed to encode private key: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("invalid PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("timestamp out of range: {0}")]
    Time(#[from] time::error::ComponentRange),
    #[error("authority bundle is missing its {0}")]
    MalformedBundle(&'static str),
}

/// An authority certificate and its private key, both PEM encoded.
#[derive(Clone)]
pub struct AuthorityKeys {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for AuthorityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityKeys")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// A freshly generated authority with its validity window.
#[derive(Debug, Clone)]
pub struct GeneratedAuthority {
    pub keys: AuthorityKeys,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Generate an RSA keypair of `key_bits` and a self-signed CA certificate valid for one year from `now`.
///
/// Subject and issuer are `CN=Device Authority, O=<organization>`.
pub fn generate_authority(
    organization: &str,
    key_bits: usize,
    now: DateTime<Utc>,
) -> Result<GeneratedAuthority, CertError> {
    let private_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), key_bits)?;
    let key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?;
    let key_pair = KeyPair::from_pem(&key_pem)?;

    let (not_before, not_after) = validity::one_year_from(now);

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, AUTHORITY_COMMON_NAME);
    params
        .distinguished_name
        .push(DnType::OrganizationName, organization);
    params.serial_number = Some(SerialNumber::from_slice(&validity::random_serial()));
    params.not_before = validity::to_offset(not_before)?;
    params.not_after = validity::to_offset(not_after)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let cert = params.self_signed(&key_pair)?;

    tracing::debug!(organization, key_bits, %not_after, "generated device authority");

    Ok(GeneratedAuthority {
        keys: AuthorityKeys {
            cert_pem: cert.pem(),
            key_pem: key_pem.to_string(),
        },
        not_before,
        not_after,
    })
}

impl AuthorityKeys {
    /// Single blob stored as the active authority: certificate PEM, newline, key PEM.
    pub fn to_bundle(&self) -> String {
        format!("{}\n{}", self.cert_pem.trim_end(), self.key_pem.trim_end())
    }

    pub fn from_bundle(bundle: &str) -> Result<Self, CertError> {
        let blocks = pem::parse_many(bundle)?;

        let cert = blocks
            .iter()
            .find(|b| b.tag() == "CERTIFICATE")
            .ok_or(CertError::MalformedBundle("certificate"))?;
        let key = blocks
            .iter()
            .find(|b| b.tag().ends_with("PRIVATE KEY"))
            .ok_or(CertError::MalformedBundle("private key"))?;

        Ok(Self {
            cert_pem: encode_lf(cert),
            key_pem: encode_lf(key),
        })
    }

    /// DER of the authority certificate.
    pub fn cert_der(&self) -> Result<Vec<u8>, CertError> {
        Ok(pem::parse(&self.cert_pem)?.into_contents())
    }
}

fn encode_lf(block: &pem::Pem) -> String {
    pem::encode_config(
        block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    #[test]
    fn test_generate_authority() {
        let now = Utc::now();
        let generated = generate_authority("Acme", 2048, now).unwrap();
        let der = generated.keys.cert_der().unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        assert_eq!(cert.subject().as_raw(), cert.issuer().as_raw());
        assert_eq!(
            cert.subject().to_string(),
            "CN=Device Authority, O=Acme"
        );

        let bc = cert.basic_constraints().unwrap().unwrap();
        assert!(bc.critical);
        assert!(bc.value.ca);

        let ku = cert.key_usage().unwrap().unwrap();
        assert!(ku.critical);
        assert!(ku.value.key_cert_sign());
        assert!(ku.value.crl_sign());

        assert_eq!(
            cert.validity().not_before.timestamp(),
            generated.not_before.timestamp()
        );
        assert_eq!(
            cert.validity().not_after.timestamp(),
            generated.not_after.timestamp()
        );
    }

    #[test]
    fn test_bundle_round_trip() {
        let generated = generate_authority("Acme", 2048, Utc::now()).unwrap();
        let bundle = generated.keys.to_bundle();

        let parsed = AuthorityKeys::from_bundle(&bundle).unwrap();
        assert_eq!(parsed.cert_der().unwrap(), generated.keys.cert_der().unwrap());
        assert!(KeyPair::from_pem(&parsed.key_pem).is_ok());
    }

    #[test]
    fn test_bundle_without_key_is_rejected() {
        let generated = generate_authority("Acme", 2048, Utc::now()).unwrap();
        assert!(matches!(
            AuthorityKeys::from_bundle(&generated.keys.cert_pem),
            Err(CertError::MalformedBundle("private key"))
        ));
    }
}
