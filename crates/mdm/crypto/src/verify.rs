//! Client certificate verification against the trust-store pool.

use x509_parser::prelude::{FromDer as _, X509Certificate};

use crate::sha1_fingerprint;

const DEVICE_ID_OID: &str = "1.3.6.1.4.1.311.66.1.0";

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("trust-store pool is not valid PEM: {0}")]
    Pool(#[from] pem::PemError),
    #[error("certificate could not be parsed: {0}")]
    Parse(String),
    #[error("certificate is outside its validity period")]
    Expired,
    #[error("certificate was not issued by a trusted authority")]
    UntrustedIssuer,
    #[error("certificate has no device ID extension")]
    MissingDeviceId,
}

/// A device identity proven by a client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClient {
    pub device_id: String,
    pub common_name: Option<String>,
    pub fingerprint: String,
}

/// Parsed set of authority certificates from `truststore.pem`.
#[derive(Debug, Clone, Default)]
pub struct TrustPool {
    authorities: Vec<Vec<u8>>,
}

impl TrustPool {
    pub fn from_pem(pool: &str) -> Result<Self, VerifyError> {
        let authorities = pem::parse_many(pool)?
            .into_iter()
            .filter(|p| p.tag() == "CERTIFICATE")
            .map(|p| p.into_contents())
            .collect();
        Ok(Self { authorities })
    }

    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// Verify `cert_der` was signed by one of the pool's authorities and is currently valid.
    pub fn verify(&self, cert_der: &[u8]) -> Result<VerifiedClient, VerifyError> {
        let (_, cert) =
            X509Certificate::from_der(cert_der).map_err(|e| VerifyError::Parse(e.to_string()))?;

        if !cert.validity().is_valid() {
            return Err(VerifyError::Expired);
        }

        let trusted = self.authorities.iter().any(|der| {
            let Ok((_, authority)) = X509Certificate::from_der(der) else {
                return false;
            };
            authority.subject().as_raw() == cert.issuer().as_raw()
                && cert.verify_signature(Some(authority.public_key())).is_ok()
        });
        if !trusted {
            return Err(VerifyError::UntrustedIssuer);
        }

        let device_id = cert
            .extensions()
            .iter()
            .find(|e| e.oid.to_id_string() == DEVICE_ID_OID)
            .and_then(|e| std::str::from_utf8(e.value).ok())
            .filter(|id| !id.is_empty())
            .ok_or(VerifyError::MissingDeviceId)?
            .to_string();

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(VerifiedClient {
            device_id,
            common_name,
            fingerprint: sha1_fingerprint(cert_der),
        })
    }
}
