//! Gateway domain binding: points the gateway's mutual-TLS trust store at a pool version.

use serde::Serialize;

use crate::GatewayBinding;

/// Request to re-point a domain's mutual-TLS trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustStoreUpdate {
    pub domain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub certificate_arn: String,
    pub security_policy: String,
    pub truststore_uri: String,
    pub truststore_version: String,
}

impl TrustStoreUpdate {
    pub fn new(binding: &GatewayBinding, truststore_uri: String, truststore_version: String) -> Self {
        Self {
            domain_name: binding.domain.clone(),
            region: binding.region.clone(),
            certificate_arn: binding.certificate_arn.clone(),
            security_policy: binding.security_policy.clone(),
            truststore_uri,
            truststore_version,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected the update with status {0}")]
    Status(u16),
}

/// Updates the gateway's mutual-TLS configuration.
#[trait_variant::make(Send)]
pub trait DomainBinding: Send + Sync {
    async fn update_trust_store(&self, update: &TrustStoreUpdate) -> Result<(), BindingError>;
}

/// [`DomainBinding`] speaking JSON to the gateway control plane.
///
/// Sends `PATCH {endpoint}/domainnames/{domain}` with the [`TrustStoreUpdate`] as body.
#[derive(Debug, Clone)]
pub struct HttpDomainBinding {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDomainBinding {
    pub fn new(config: &GatewayBinding) -> Result<Self, BindingError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl DomainBinding for HttpDomainBinding {
    async fn update_trust_store(&self, update: &TrustStoreUpdate) -> Result<(), BindingError> {
        let url = format!(
            "{}/domainnames/{}",
            self.endpoint,
            urlencoding::encode(&update.domain_name)
        );

        let response = self.client.patch(&url).json(update).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BindingError::Status(status.as_u16()));
        }

        tracing::debug!(domain = %update.domain_name, version = %update.truststore_version, "gateway accepted trust store update");
        Ok(())
    }
}
