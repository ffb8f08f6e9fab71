//! Service configuration.

use std::time::Duration;

/// Where and how the Device Authority is issued and stored.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Object storage bucket holding `active.json`, `history/` and `truststore.pem`.
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// `O=` attribute of the authority subject.
    pub organization: String,
    pub key_bits: usize,
    /// How long [`crate::AuthorityManager::active`] may serve a cached record.
    pub cache_ttl: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            organization: "Mattrax".to_string(),
            key_bits: 4096,
            cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Gateway custom domain whose mutual-TLS trust store follows the authority.
#[derive(Debug, Clone)]
pub struct GatewayBinding {
    pub domain: String,
    pub region: Option<String>,
    pub certificate_arn: String,
    pub security_policy: String,
    /// Control-plane base URL the binding update is sent to.
    pub endpoint: String,
    pub timeout: Duration,
}

impl GatewayBinding {
    pub fn new(domain: impl Into<String>, certificate_arn: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            region: None,
            certificate_arn: certificate_arn.into(),
            security_policy: "TLS_1_2".to_string(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Endpoints and identifiers advertised to enrolling devices.
#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    /// Base URL of the enrollment server, e.g. `https://enterpriseenrollment.example.com`.
    pub enrollment_url: String,
    /// Full URL of `Manage.svc`.
    pub manage_url: String,
    pub provider_id: String,
    pub server_name: String,
    pub first_poll_retries: u32,
    pub policy_id: String,
    pub policy_friendly_name: String,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            enrollment_url: "https://enterpriseenrollment.localhost".to_string(),
            manage_url: "https://enterpriseenrollment.localhost/ManagementServer/Manage.svc".to_string(),
            provider_id: "MDM".to_string(),
            server_name: "Mattrax".to_string(),
            first_poll_retries: 8,
            policy_id: "{7a4d8fc5-4b36-4a31-8f17-0b7d4d5c5b45}".to_string(),
            policy_friendly_name: "Device Authority".to_string(),
        }
    }
}

/// Errors in operator-supplied configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("enrollment tokens must be comma separated token=principal pairs")]
    InvalidTokenPair,
    #[error("invalid policy document: {0}")]
    Policy(#[from] serde_json::Error),
}
