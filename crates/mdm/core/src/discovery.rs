//! MS-MDE2 discovery exchange.

use serde::Deserialize;

use crate::soap::{self, MessageError, RequestHeader, ResponseHeader, Text};
use crate::xml::{XmlError, XmlWriter};

pub const ACTION_REQUEST: &str =
    "http://schemas.microsoft.com/windows/management/2012/01/enrollment/IDiscoveryService/Discover";
pub const ACTION_RESPONSE: &str =
    "http://schemas.microsoft.com/windows/management/2012/01/enrollment/IDiscoveryService/DiscoverResponse";
pub const NS_DISCOVERY: &str = "http://schemas.microsoft.com/windows/management/2012/01/enrollment";

/// A `Discover` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverRequest {
    pub header: RequestHeader,
    pub email_address: Option<String>,
    pub request_version: Option<String>,
    pub device_type: Option<String>,
    pub auth_policies: Vec<String>,
}

impl DiscoverRequest {
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let (header, body) = soap::parse_request::<DiscoverBody>(body)?;
        let request = body.discover.request;

        Ok(Self {
            header,
            email_address: soap::text(request.email_address).filter(|s| !s.is_empty()),
            request_version: soap::text(request.request_version),
            device_type: soap::text(request.device_type),
            auth_policies: request
                .auth_policies
                .map(|p| p.policies.iter().map(Text::trimmed).collect())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverBody {
    #[serde(rename = "Discover")]
    discover: Discover,
}

#[derive(Debug, Deserialize)]
struct Discover {
    request: DiscoverFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiscoverFields {
    #[serde(default)]
    email_address: Option<Text>,
    #[serde(default)]
    request_version: Option<Text>,
    #[serde(default)]
    device_type: Option<Text>,
    #[serde(default)]
    auth_policies: Option<AuthPolicies>,
}

#[derive(Debug, Deserialize)]
struct AuthPolicies {
    #[serde(rename = "AuthPolicy", default)]
    policies: Vec<Text>,
}

/// Endpoints handed to the device to continue enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverResponse {
    pub header: ResponseHeader,
    pub auth_policy: String,
    pub enrollment_version: String,
    pub policy_service_url: String,
    pub enrollment_service_url: String,
    pub authentication_service_url: Option<String>,
}

impl DiscoverResponse {
    /// Federated response pointing at the `EnrollmentServer` endpoints under `base_url`.
    pub fn federated(message_id: &str, activity_id: &str, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            header: ResponseHeader::new(ACTION_RESPONSE, message_id).with_activity_id(activity_id),
            auth_policy: "Federated".to_string(),
            enrollment_version: "5.0".to_string(),
            policy_service_url: format!("{base}/EnrollmentServer/Policy.svc"),
            enrollment_service_url: format!("{base}/EnrollmentServer/Enrollment.svc"),
            authentication_service_url: Some(format!("{base}/EnrollmentServer/Authenticate.svc")),
        }
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut w = XmlWriter::new();
        soap::start_envelope(&mut w, &[])?;
        self.header.write(&mut w)?;
        w.start("s:Body", &[])?;
        w.start("DiscoverResponse", &[("xmlns", NS_DISCOVERY)])?;
        w.start("DiscoverResult", &[])?;
        w.element("AuthPolicy", &[], &self.auth_policy)?;
        w.element("EnrollmentVersion", &[], &self.enrollment_version)?;
        w.element("EnrollmentPolicyServiceUrl", &[], &self.policy_service_url)?;
        w.element("EnrollmentServiceUrl", &[], &self.enrollment_service_url)?;
        if let Some(url) = &self.authentication_service_url {
            w.element("AuthenticationServiceUrl", &[], url)?;
        }
        w.end("DiscoverResult")?;
        w.end("DiscoverResponse")?;
        w.end("s:Body")?;
        w.end("s:Envelope")?;
        w.into_string()
    }
}
