//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{WrapErr as _, bail};
use mdm_service::{AuthorityConfig, EnrollmentConfig, GatewayBinding};

#[derive(Debug, Parser)]
#[command(name = "winmdm-server")]
#[command(about = "Windows MDM enrollment and management server", long_about = None)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "MDM_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:winmdm.db")]
    pub database_url: String,

    /// Bucket holding the Device Authority objects.
    #[arg(long, env = "MDM_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, env = "MDM_BUCKET_REGION")]
    pub bucket_region: Option<String>,

    /// Custom domain whose mutual-TLS trust store follows the authority.
    #[arg(long, env = "MDM_GATEWAY_DOMAIN")]
    pub gateway_domain: Option<String>,

    #[arg(long, env = "MDM_CERTIFICATE_ARN")]
    pub certificate_arn: Option<String>,

    /// Control-plane URL the trust-store update is sent to.
    #[arg(long, env = "MDM_GATEWAY_ENDPOINT")]
    pub gateway_endpoint: Option<String>,

    #[arg(long, env = "MDM_GATEWAY_TIMEOUT_SECS", default_value_t = 10)]
    pub gateway_timeout_secs: u64,

    #[arg(long, env = "MDM_ORGANIZATION", default_value = "Mattrax")]
    pub organization: String,

    #[arg(long, env = "MDM_AUTHORITY_CACHE_SECS", default_value_t = 3600)]
    pub authority_cache_secs: u64,

    /// Base URL of the enrollment server.
    #[arg(long, env = "MDM_ENROLLMENT_URL")]
    pub enrollment_url: Option<String>,

    /// Full URL of `Manage.svc`. Defaults to the one under the enrollment URL.
    #[arg(long, env = "MDM_MANAGE_URL")]
    pub manage_url: Option<String>,

    #[arg(long, env = "MDM_PROVIDER_ID", default_value = "MDM")]
    pub provider_id: String,

    /// Comma separated `token=principal` pairs.
    #[arg(long, env = "MDM_ENROLLMENT_TOKENS", default_value = "", hide_env_values = true)]
    pub enrollment_tokens: String,

    /// Compiled schema JSON from `ddf-compile`.
    #[arg(long, env = "MDM_SCHEMA_PATH")]
    pub schema_path: Option<PathBuf>,

    /// Desired settings JSON.
    #[arg(long, env = "MDM_POLICY_PATH")]
    pub policy_path: Option<PathBuf>,
}

impl Args {
    pub fn authority(&self) -> AuthorityConfig {
        AuthorityConfig {
            bucket: self.bucket.clone(),
            region: self.bucket_region.clone(),
            organization: self.organization.clone(),
            cache_ttl: Duration::from_secs(self.authority_cache_secs),
            ..AuthorityConfig::default()
        }
    }

    /// The gateway binding, if every part of it is configured.
    pub fn gateway(&self) -> color_eyre::eyre::Result<Option<GatewayBinding>> {
        let (domain, arn, endpoint) = match (
            &self.gateway_domain,
            &self.certificate_arn,
            &self.gateway_endpoint,
        ) {
            (None, None, None) => return Ok(None),
            (Some(domain), Some(arn), Some(endpoint)) => (domain, arn, endpoint),
            _ => bail!(
                "MDM_GATEWAY_DOMAIN, MDM_CERTIFICATE_ARN and MDM_GATEWAY_ENDPOINT must be set together"
            ),
        };

        let mut binding = GatewayBinding::new(domain, arn, endpoint);
        binding.region = self.bucket_region.clone();
        binding.timeout = Duration::from_secs(self.gateway_timeout_secs);
        Ok(Some(binding))
    }

    pub fn enrollment(&self) -> EnrollmentConfig {
        let mut config = EnrollmentConfig {
            provider_id: self.provider_id.clone(),
            server_name: self.organization.clone(),
            ..EnrollmentConfig::default()
        };
        if let Some(url) = &self.enrollment_url {
            let url = url.trim_end_matches('/');
            config.enrollment_url = url.to_string();
            config.manage_url = format!("{url}/ManagementServer/Manage.svc");
        }
        if let Some(url) = &self.manage_url {
            config.manage_url = url.clone();
        }
        config
    }

    pub fn schema(&self) -> color_eyre::eyre::Result<mdm_ddf::Schema> {
        let Some(path) = &self.schema_path else {
            return Ok(mdm_ddf::Schema::default());
        };
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read schema {}", path.display()))?;
        mdm_ddf::Schema::load(&json).wrap_err("failed to parse schema")
    }

    pub fn policies(&self) -> color_eyre::eyre::Result<mdm_service::StaticPolicySource> {
        let Some(path) = &self.policy_path else {
            return Ok(mdm_service::StaticPolicySource::default());
        };
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read policy {}", path.display()))?;
        mdm_service::StaticPolicySource::from_json(&json).wrap_err("failed to parse policy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("winmdm-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.listen, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(args.authority().cache_ttl, Duration::from_secs(3600));
        assert!(args.gateway().unwrap().is_none());
        assert!(args.schema().unwrap().sections.is_empty());
    }

    #[test]
    fn test_enrollment_urls() {
        let args = parse(&["--enrollment-url", "https://enterpriseenrollment.example.com/"]);
        let config = args.enrollment();
        assert_eq!(config.enrollment_url, "https://enterpriseenrollment.example.com");
        assert_eq!(
            config.manage_url,
            "https://enterpriseenrollment.example.com/ManagementServer/Manage.svc"
        );

        let args = parse(&[
            "--enrollment-url",
            "https://enterpriseenrollment.example.com",
            "--manage-url",
            "https://manage.example.com/ManagementServer/Manage.svc",
        ]);
        assert_eq!(args.enrollment().manage_url, "https://manage.example.com/ManagementServer/Manage.svc");
    }

    #[test]
    fn test_partial_gateway_is_rejected() {
        let args = parse(&["--gateway-domain", "manage.example.com"]);
        assert!(args.gateway().is_err());

        let args = parse(&[
            "--gateway-domain",
            "manage.example.com",
            "--certificate-arn",
            "arn:aws:acm:us-east-1:1:certificate/1",
            "--gateway-endpoint",
            "https://apigateway.us-east-1.amazonaws.com",
            "--gateway-timeout-secs",
            "3",
        ]);
        let binding = args.gateway().unwrap().unwrap();
        assert_eq!(binding.timeout, Duration::from_secs(3));
    }
}
