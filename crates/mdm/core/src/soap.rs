//! SOAP 1.2 envelope pieces shared by the enrollment endpoints.

use base64::Engine as _;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::xml::{self, XmlError, XmlNode, XmlWriter};

pub const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_ADDRESSING: &str = "http://www.w3.org/2005/08/addressing";
pub const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const NS_WSTRUST: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";
pub const NS_ENROLLMENT: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollment";
pub const NS_ACTIVITY: &str = "http://schemas.microsoft.com/2004/09/ServiceModel/Diagnostics";

/// `EncodingType` of a base64 binary security token.
pub const ENCODING_BASE64: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd#base64binary";

/// `ValueType` of a PKCS#10 CSR token (issue requests).
pub const VALUE_TYPE_PKCS10: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollment#PKCS10";
/// `ValueType` of a PKCS#7 token (renewal requests).
pub const VALUE_TYPE_PKCS7: &str = "http://schemas.microsoft.com/windows/pki/2009/01/enrollment#PKCS7";
/// `ValueType` of the federated user token returned by the authentication page.
pub const VALUE_TYPE_USER_TOKEN: &str =
    "http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentUserToken";
/// `ValueType` of the provisioning document returned on enrollment.
pub const VALUE_TYPE_PROVISION_DOC: &str =
    "http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentProvisionDoc";
/// WS-Trust `TokenType` of the enrollment response.
pub const TOKEN_TYPE_ENROLLMENT: &str =
    "http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentToken";

/// Content type of every SOAP response.
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Errors extracting a typed message from a SOAP envelope.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("unexpected message structure: {0}")]
    Decode(#[from] quick_xml::DeError),
    #[error("invalid base64 in security token: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported token encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("unexpected token value type '{found}', expected '{expected}'")]
    UnexpectedValueType { expected: String, found: String },
    #[error("expected a SOAP envelope, found <{0}>")]
    NotAnEnvelope(String),
}

/// Parse a SOAP request into its addressing header and a typed body.
///
/// Elements and attributes are matched by local name, so clients may use any prefix or a
/// default namespace.
pub fn parse_request<B: DeserializeOwned>(body: &str) -> Result<(RequestHeader, B), MessageError> {
    let root = xml::root_name(body)?;
    if root != "Envelope" {
        return Err(MessageError::NotAnEnvelope(root));
    }
    let envelope: Envelope<B> = quick_xml::de::from_str(body)?;
    let header = RequestHeader::from_wire(envelope.header)?;
    Ok((header, envelope.body))
}

#[derive(Debug, Deserialize)]
struct Envelope<B> {
    #[serde(rename = "Header")]
    header: WireHeader,
    #[serde(rename = "Body")]
    body: B,
}

/// Character data of an element, ignoring its attributes.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

impl Text {
    pub(crate) fn trimmed(&self) -> String {
        self.value.trim().to_string()
    }
}

pub(crate) fn text(element: Option<Text>) -> Option<String> {
    element.map(|t| t.trimmed())
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    #[serde(rename = "Action", default)]
    action: Option<Text>,
    #[serde(rename = "MessageID", default)]
    message_id: Option<Text>,
    #[serde(rename = "ReplyTo", default)]
    reply_to: Option<ReplyTo>,
    #[serde(rename = "To", default)]
    to: Option<Text>,
    #[serde(rename = "Security", default)]
    security: Option<WireSecurity>,
}

#[derive(Debug, Deserialize)]
struct ReplyTo {
    #[serde(rename = "Address", default)]
    address: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct WireSecurity {
    #[serde(rename = "BinarySecurityToken", default)]
    binary: Option<WireBinaryToken>,
    #[serde(rename = "UsernameToken", default)]
    username: Option<UsernameToken>,
}

#[derive(Debug, Deserialize)]
struct UsernameToken {
    #[serde(rename = "Username", default)]
    username: Option<Text>,
    #[serde(rename = "Password", default)]
    password: Option<Text>,
}

/// `BinarySecurityToken` as it appears on the wire.
#[derive(Debug, Deserialize)]
pub(crate) struct WireBinaryToken {
    #[serde(rename = "@ValueType", default)]
    value_type: String,
    #[serde(rename = "@EncodingType", default)]
    encoding_type: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

impl From<WireBinaryToken> for BinarySecurityToken {
    fn from(wire: WireBinaryToken) -> Self {
        Self {
            value_type: wire.value_type.trim().to_string(),
            encoding_type: wire
                .encoding_type
                .as_deref()
                .unwrap_or(ENCODING_BASE64)
                .trim()
                .to_string(),
            value: wire.value,
        }
    }
}

/// WS-Security binary token: the CSR in requests and the provisioning document in responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySecurityToken {
    pub value_type: String,
    pub encoding_type: String,
    pub value: String,
}

impl BinarySecurityToken {
    /// Wrap raw bytes as a base64 token.
    pub fn encode(value_type: &str, bytes: &[u8]) -> Self {
        Self {
            value_type: value_type.to_string(),
            encoding_type: ENCODING_BASE64.to_string(),
            value: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Read a token out of an already parsed tree, such as a rendered response.
    pub fn from_node(node: &XmlNode) -> Result<Self, MessageError> {
        Ok(Self {
            value_type: node.attr("ValueType").unwrap_or_default().trim().to_string(),
            encoding_type: node
                .attr("EncodingType")
                .unwrap_or(ENCODING_BASE64)
                .trim()
                .to_string(),
            value: node.text.clone(),
        })
    }

    /// Decode the token body according to its encoding type.
    ///
    /// Windows wraps long base64 values with CRLF, so all whitespace is ignored.
    pub fn decode(&self) -> Result<Vec<u8>, MessageError> {
        if self.encoding_type != ENCODING_BASE64 {
            return Err(MessageError::UnsupportedEncoding(self.encoding_type.clone()));
        }
        let compact: String = self.value.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
    }

    pub fn require_value_type(&self, expected: &str) -> Result<(), MessageError> {
        if self.value_type != expected {
            return Err(MessageError::UnexpectedValueType {
                expected: expected.to_string(),
                found: self.value_type.clone(),
            });
        }
        Ok(())
    }

    pub fn write(&self, w: &mut XmlWriter, name: &str, xmlns: Option<&str>) -> Result<(), XmlError> {
        let mut attrs = Vec::with_capacity(3);
        if let Some(ns) = xmlns {
            attrs.push(("xmlns", ns));
        }
        attrs.push(("ValueType", self.value_type.as_str()));
        attrs.push(("EncodingType", self.encoding_type.as_str()));
        w.element(name, &attrs, &self.value)
    }
}

/// Credentials carried in the `wsse:Security` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityToken {
    /// `wsse:BinarySecurityToken`, used by federated authentication.
    Binary(BinarySecurityToken),
    /// `wsse:UsernameToken`, used by on-premise authentication.
    UsernamePassword { username: String, password: String },
}

/// Addressing header of every enrollment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub action: String,
    pub message_id: String,
    pub reply_to: Option<String>,
    pub to: Option<String>,
    pub security: Option<SecurityToken>,
}

impl RequestHeader {
    fn from_wire(header: WireHeader) -> Result<Self, MessageError> {
        let message_id = text(header.message_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| XmlError::Missing("Envelope/Header/MessageID".into()))?;

        let security = header.security.and_then(|sec| match (sec.binary, sec.username) {
            (Some(token), _) => Some(SecurityToken::Binary(token.into())),
            (None, Some(ut)) => Some(SecurityToken::UsernamePassword {
                username: text(ut.username).unwrap_or_default(),
                password: text(ut.password).unwrap_or_default(),
            }),
            (None, None) => None,
        });

        Ok(Self {
            action: text(header.action).unwrap_or_default(),
            message_id,
            reply_to: header.reply_to.and_then(|r| text(r.address)),
            to: text(header.to),
            security,
        })
    }
}

/// Addressing header of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub action: String,
    /// Echo of the request `MessageID`.
    pub relates_to: String,
    pub activity_id: Option<String>,
    /// `u:Timestamp` (created, expires), RFC 3339.
    pub timestamp: Option<(String, String)>,
}

impl ResponseHeader {
    pub fn new(action: &str, relates_to: &str) -> Self {
        Self {
            action: action.to_string(),
            relates_to: relates_to.to_string(),
            activity_id: None,
            timestamp: None,
        }
    }

    pub fn with_activity_id(mut self, id: impl Into<String>) -> Self {
        self.activity_id = Some(id.into());
        self
    }

    /// Add a `u:Timestamp` valid for `lifetime` from `now`.
    pub fn with_timestamp(mut self, now: chrono::DateTime<chrono::Utc>, lifetime: chrono::Duration) -> Self {
        let fmt = |t: chrono::DateTime<chrono::Utc>| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.timestamp = Some((fmt(now), fmt(now + lifetime)));
        self
    }

    pub fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        w.start("s:Header", &[])?;
        w.element("a:Action", &[("s:mustUnderstand", "1")], &self.action)?;
        if let Some(id) = &self.activity_id {
            w.element(
                "ActivityId",
                &[("CorrelationId", id.as_str()), ("xmlns", NS_ACTIVITY)],
                id,
            )?;
        }
        w.element("a:RelatesTo", &[], &self.relates_to)?;
        if let Some((created, expires)) = &self.timestamp {
            w.start("o:Security", &[("xmlns:o", NS_WSSE), ("s:mustUnderstand", "1")])?;
            w.start("u:Timestamp", &[("u:Id", "_0")])?;
            w.element("u:Created", &[], created)?;
            w.element("u:Expires", &[], expires)?;
            w.end("u:Timestamp")?;
            w.end("o:Security")?;
        }
        w.end("s:Header")
    }
}

/// Open `<s:Envelope>` with the SOAP and addressing namespaces plus `extra` declarations.
pub fn start_envelope(w: &mut XmlWriter, extra: &[(&str, &str)]) -> Result<(), XmlError> {
    let mut attrs = vec![("xmlns:s", NS_SOAP), ("xmlns:a", NS_ADDRESSING)];
    attrs.extend_from_slice(extra);
    w.start("s:Envelope", &attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_token_decode_ignores_line_breaks() {
        let token = BinarySecurityToken {
            value_type: VALUE_TYPE_USER_TOKEN.into(),
            encoding_type: ENCODING_BASE64.into(),
            value: "dGVz\r\ndA==\n".into(),
        };
        assert_eq!(token.decode().unwrap(), b"test");
    }

    #[test]
    fn test_binary_token_rejects_unknown_encoding() {
        let token = BinarySecurityToken {
            value_type: VALUE_TYPE_PKCS10.into(),
            encoding_type: "urn:hex".into(),
            value: "00".into(),
        };
        assert!(matches!(token.decode(), Err(MessageError::UnsupportedEncoding(_))));
    }

    fn header(body: &str) -> Result<RequestHeader, MessageError> {
        parse_request::<serde::de::IgnoredAny>(body).map(|(header, _)| header)
    }

    #[test]
    fn test_request_header_requires_message_id() {
        let err = header(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Header></s:Header><s:Body/></s:Envelope>"#,
        )
        .unwrap_err();
        assert!(matches!(err, MessageError::Xml(XmlError::Missing(_))));
    }

    #[test]
    fn test_not_an_envelope() {
        assert!(matches!(
            header("<html></html>"),
            Err(MessageError::NotAnEnvelope(name)) if name == "html"
        ));
    }

    #[test]
    fn test_missing_body_is_a_decode_error() {
        let err = header(
            r#"<s:Envelope xmlns:s="urn:s" xmlns:a="urn:a"><s:Header><a:MessageID>urn:uuid:1</a:MessageID></s:Header></s:Envelope>"#,
        )
        .unwrap_err();
        assert!(matches!(err, MessageError::Decode(_)));
    }

    #[test]
    fn test_username_token() {
        let header = header(
            r#"<s:Envelope xmlns:s="urn:s" xmlns:a="urn:a" xmlns:wsse="urn:w"><s:Header>
                <a:MessageID>urn:uuid:5</a:MessageID>
                <wsse:Security><wsse:UsernameToken><wsse:Username>u@example.com</wsse:Username><wsse:Password>pw</wsse:Password></wsse:UsernameToken></wsse:Security>
            </s:Header><s:Body/></s:Envelope>"#,
        )
        .unwrap();
        assert_eq!(
            header.security,
            Some(SecurityToken::UsernamePassword {
                username: "u@example.com".into(),
                password: "pw".into()
            })
        );
    }

    #[test]
    fn test_header_accepts_default_namespaces() {
        let header = header(
            r#"<Envelope xmlns="http://www.w3.org/2003/05/soap-envelope"><Header>
                <Action xmlns="http://www.w3.org/2005/08/addressing" mustUnderstand="1"> urn:act </Action>
                <MessageID xmlns="http://www.w3.org/2005/08/addressing">urn:uuid:9</MessageID>
                <ReplyTo xmlns="http://www.w3.org/2005/08/addressing"><Address>urn:anon</Address></ReplyTo>
                <Security xmlns="urn:w"><BinarySecurityToken ValueType="urn:vt">c2VjcmV0</BinarySecurityToken></Security>
            </Header><Body/></Envelope>"#,
        )
        .unwrap();

        assert_eq!(header.action, "urn:act");
        assert_eq!(header.message_id, "urn:uuid:9");
        assert_eq!(header.reply_to.as_deref(), Some("urn:anon"));
        let Some(SecurityToken::Binary(token)) = header.security else {
            panic!("expected a binary token");
        };
        assert_eq!(token.encoding_type, ENCODING_BASE64);
        assert_eq!(token.decode().unwrap(), b"secret");
    }
}
