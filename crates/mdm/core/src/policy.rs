//! MS-XCEP certificate enrollment policy exchange.

use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::soap::{self, MessageError, RequestHeader, ResponseHeader};
use crate::xml::{XmlError, XmlWriter};

pub const ACTION_REQUEST: &str =
    "http://schemas.microsoft.com/windows/pki/2009/01/enrollmentpolicy/IPolicy/GetPolicies";
pub const ACTION_RESPONSE: &str =
    "http://schemas.microsoft.com/windows/pki/2009/01/enrollmentpolicy/IPolicy/GetPoliciesResponse";
pub const NS_POLICY: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollmentpolicy";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// OID of SHA-256 announced as the only hash algorithm.
pub const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";

/// A `GetPolicies` request. Only the header is meaningful to this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPoliciesRequest {
    pub header: RequestHeader,
}

impl GetPoliciesRequest {
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let (header, _) = soap::parse_request::<GetPoliciesBody>(body)?;
        Ok(Self { header })
    }
}

#[derive(Debug, Deserialize)]
struct GetPoliciesBody {
    #[serde(rename = "GetPolicies")]
    _get_policies: IgnoredAny,
}

/// The single certificate policy offered to enrolling devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPoliciesResponse {
    pub header: ResponseHeader,
    pub policy_id: String,
    pub friendly_name: String,
    pub minimal_key_length: u32,
}

impl GetPoliciesResponse {
    pub fn new(message_id: &str, activity_id: &str, policy_id: &str, friendly_name: &str) -> Self {
        Self {
            header: ResponseHeader::new(ACTION_RESPONSE, message_id).with_activity_id(activity_id),
            policy_id: policy_id.to_string(),
            friendly_name: friendly_name.to_string(),
            minimal_key_length: 4096,
        }
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        let nil = [("xsi:nil", "true")];
        let key_length = self.minimal_key_length.to_string();

        let mut w = XmlWriter::new();
        soap::start_envelope(&mut w, &[])?;
        self.header.write(&mut w)?;

        w.start("s:Body", &[("xmlns:xsi", NS_XSI)])?;
        w.start("GetPoliciesResponse", &[("xmlns", NS_POLICY)])?;
        w.start("response", &[])?;
        w.element("policyID", &[], &self.policy_id)?;
        w.element("policyFriendlyName", &[], &self.friendly_name)?;
        w.element("nextUpdateHours", &nil, "")?;
        w.element("policiesNotChanged", &nil, "")?;
        w.start("policies", &[])?;
        w.start("policy", &[])?;
        w.element("policyOIDReference", &[], "0")?;
        w.element("cAs", &nil, "")?;
        w.start("attributes", &[])?;
        w.element("policySchema", &[], "3")?;
        w.start("privateKeyAttributes", &[])?;
        w.element("minimalKeyLength", &[], &key_length)?;
        for name in [
            "keySpec",
            "keyUsageProperty",
            "permissions",
            "algorithmOIDReference",
            "cryptoProviders",
        ] {
            w.element(name, &nil, "")?;
        }
        w.end("privateKeyAttributes")?;
        for name in [
            "supersededPolicies",
            "privateKeyFlags",
            "subjectNameFlags",
            "enrollmentFlags",
            "generalFlags",
        ] {
            w.element(name, &nil, "")?;
        }
        w.element("hashAlgorithmOIDReference", &[], "0")?;
        for name in ["rARequirements", "keyArchivalAttributes", "extensions"] {
            w.element(name, &nil, "")?;
        }
        w.end("attributes")?;
        w.end("policy")?;
        w.end("policies")?;
        w.end("response")?;
        w.element("cAs", &nil, "")?;
        w.start("oIDs", &[])?;
        w.start("oID", &[])?;
        w.element("value", &[], OID_SHA256)?;
        w.element("group", &[], "2")?;
        w.element("oIDReferenceID", &[], "0")?;
        w.element("defaultName", &[], "szOID_OIWSEC_SHA256")?;
        w.end("oID")?;
        w.end("oIDs")?;
        w.end("GetPoliciesResponse")?;
        w.end("s:Body")?;
        w.end("s:Envelope")?;
        w.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlNode;

    #[test]
    fn test_parse_get_policies() {
        let body = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing">
  <s:Header>
    <a:Action s:mustUnderstand="1">http://schemas.microsoft.com/windows/pki/2009/01/enrollmentpolicy/IPolicy/GetPolicies</a:Action>
    <a:MessageID>urn:uuid:72048b64-0f19-448f-8c2e-b4c661860aa0</a:MessageID>
  </s:Header>
  <s:Body xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
    <GetPolicies xmlns="http://schemas.microsoft.com/windows/pki/2009/01/enrollmentpolicy">
      <client><lastUpdate xsi:nil="true"/><preferredLanguage xsi:nil="true"/></client>
      <requestFilter xsi:nil="true"/>
    </GetPolicies>
  </s:Body>
</s:Envelope>"#;

        let req = GetPoliciesRequest::parse(body).unwrap();
        assert_eq!(req.header.message_id, "urn:uuid:72048b64-0f19-448f-8c2e-b4c661860aa0");
    }

    #[test]
    fn test_response_announces_sha256() {
        let xml = GetPoliciesResponse::new("urn:uuid:7", "act", "device-identity", "Device Identity")
            .to_xml()
            .unwrap();
        let root = XmlNode::parse(&xml).unwrap();

        assert_eq!(root.text_at("Header/RelatesTo").as_deref(), Some("urn:uuid:7"));
        let response = root.require("Body/GetPoliciesResponse").unwrap();
        assert_eq!(
            response
                .text_at("response/policies/policy/attributes/privateKeyAttributes/minimalKeyLength")
                .as_deref(),
            Some("4096")
        );
        assert_eq!(response.text_at("oIDs/oID/value").as_deref(), Some(OID_SHA256));
        assert_eq!(
            response.require("response/nextUpdateHours").unwrap().attr("nil"),
            Some("true")
        );
    }
}
