//! WS-Trust X.509v3 Token Enrollment (WSTEP) request and response envelopes.

use serde::Deserialize;

use crate::enrollment::{ContextItem, EnrollmentContext};
use crate::provisioning::ProvisioningDoc;
use crate::soap::{
    self, BinarySecurityToken, MessageError, RequestHeader, ResponseHeader, Text, WireBinaryToken,
    NS_ENROLLMENT, NS_WSSE, NS_WSTRUST, NS_WSU, TOKEN_TYPE_ENROLLMENT, VALUE_TYPE_PKCS10,
    VALUE_TYPE_PROVISION_DOC,
};
use crate::xml::{XmlError, XmlWriter};

pub const ACTION_REQUEST: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollment/RST/wstep";
pub const ACTION_RESPONSE: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollment/RSTRC/wstep";

/// WS-Trust `RequestType` for a new certificate.
pub const REQUEST_TYPE_ISSUE: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512/Issue";

/// A parsed `RequestSecurityToken` enrollment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub header: RequestHeader,
    pub token_type: String,
    pub request_type: String,
    /// The PKCS#10 CSR token.
    pub csr: BinarySecurityToken,
    pub context: EnrollmentContext,
}

impl EnrollmentRequest {
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let (header, body) = soap::parse_request::<RstBody>(body)?;
        let rst = body.request;

        let csr = BinarySecurityToken::from(rst.binary_security_token);
        csr.require_value_type(VALUE_TYPE_PKCS10)?;

        let items = rst
            .additional_context
            .map(|ctx| ctx.items)
            .unwrap_or_default()
            .into_iter()
            .map(|item| ContextItem {
                name: item.name.trim().to_string(),
                value: soap::text(item.value).unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            header,
            token_type: soap::text(rst.token_type).unwrap_or_default(),
            request_type: soap::text(rst.request_type)
                .unwrap_or_else(|| REQUEST_TYPE_ISSUE.to_string()),
            csr,
            context: EnrollmentContext { items },
        })
    }

    /// DER bytes of the embedded CSR.
    pub fn csr_der(&self) -> Result<Vec<u8>, MessageError> {
        self.csr.decode()
    }
}

#[derive(Debug, Deserialize)]
struct RstBody {
    #[serde(rename = "RequestSecurityToken")]
    request: RequestSecurityToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RequestSecurityToken {
    #[serde(default)]
    token_type: Option<Text>,
    #[serde(default)]
    request_type: Option<Text>,
    binary_security_token: WireBinaryToken,
    #[serde(default)]
    additional_context: Option<AdditionalContext>,
}

#[derive(Debug, Deserialize)]
struct AdditionalContext {
    #[serde(rename = "ContextItem", default)]
    items: Vec<WireContextItem>,
}

#[derive(Debug, Deserialize)]
struct WireContextItem {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Text>,
}

/// The `RequestSecurityTokenResponseCollection` sent back after a successful issuance.
#[derive(Debug, Clone)]
pub struct EnrollmentResponse {
    pub header: ResponseHeader,
    pub provisioning: ProvisioningDoc,
}

impl EnrollmentResponse {
    /// Response to the request identified by `message_id`, stamped at `now`.
    pub fn new(message_id: &str, provisioning: ProvisioningDoc, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            header: ResponseHeader::new(ACTION_RESPONSE, message_id)
                .with_timestamp(now, chrono::Duration::minutes(5)),
            provisioning,
        }
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        let document = self.provisioning.to_xml()?;
        let token = BinarySecurityToken::encode(VALUE_TYPE_PROVISION_DOC, document.as_bytes());

        let mut w = XmlWriter::new();
        soap::start_envelope(&mut w, &[("xmlns:u", NS_WSU)])?;
        self.header.write(&mut w)?;

        w.start("s:Body", &[])?;
        w.start("RequestSecurityTokenResponseCollection", &[("xmlns", NS_WSTRUST)])?;
        w.start("RequestSecurityTokenResponse", &[])?;
        w.element("TokenType", &[], TOKEN_TYPE_ENROLLMENT)?;
        w.element("DispositionMessage", &[("xmlns", NS_ENROLLMENT)], "")?;
        w.start("RequestedSecurityToken", &[])?;
        token.write(&mut w, "BinarySecurityToken", Some(NS_WSSE))?;
        w.end("RequestedSecurityToken")?;
        w.element("RequestID", &[("xmlns", NS_ENROLLMENT)], "0")?;
        w.end("RequestSecurityTokenResponse")?;
        w.end("RequestSecurityTokenResponseCollection")?;
        w.end("s:Body")?;

        w.end("s:Envelope")?;
        w.into_string()
    }
}
