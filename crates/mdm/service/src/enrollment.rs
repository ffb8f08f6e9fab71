//! Discovery, enrollment policy and WSTEP enrollment.

use base64::Engine as _;
use chrono::Utc;
use mdm_core::discovery::{DiscoverRequest, DiscoverResponse};
use mdm_core::policy::{GetPoliciesRequest, GetPoliciesResponse};
use mdm_core::soap::{MessageError, RequestHeader};
use mdm_core::wstep::{EnrollmentRequest, EnrollmentResponse};
use mdm_core::xml::XmlError;
use mdm_core::{EnrollType, EnrollmentProfile, Fault, FaultSubcode};
use mdm_crypto::IssueError;
use mdm_storage::ObjectStore;

use crate::{AuthError, AuthorityError, DomainBinding, Enrollment, Identity, WindowsMdm};

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("malformed request: {0}")]
    Message(#[from] MessageError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("enrollment request carries no DeviceID")]
    MissingDeviceId,
    #[error("certificate request rejected: {0}")]
    CertificateRequest(#[source] IssueError),
    #[error("device authority unavailable: {0}")]
    Authority(#[from] AuthorityError),
    #[error("failed to issue device certificate: {0}")]
    Issue(#[source] IssueError),
    #[error("failed to render response: {0}")]
    Render(#[from] XmlError),
}

impl From<IssueError> for EnrollmentError {
    fn from(e: IssueError) -> Self {
        match e {
            IssueError::InvalidCsr(_) | IssueError::MissingPublicKey | IssueError::CsrSignature => {
                Self::CertificateRequest(e)
            }
            IssueError::Authority(_) | IssueError::Signing(_) => Self::Issue(e),
        }
    }
}

impl EnrollmentError {
    /// SOAP fault for the device. Reasons never include internal detail.
    pub fn to_fault(&self) -> Fault {
        match self {
            Self::Message(_) | Self::MissingDeviceId => {
                Fault::sender(FaultSubcode::MessageFormat, "The enrollment request is malformed.")
            }
            Self::Auth(_) => Fault::sender(
                FaultSubcode::Authentication,
                "The enrollment credentials were not accepted.",
            ),
            Self::CertificateRequest(_) => Fault::sender(
                FaultSubcode::CertificateRequest,
                "The certificate request is invalid.",
            ),
            Self::Authority(_) | Self::Issue(_) => Fault::receiver(
                FaultSubcode::EnrollmentServer,
                "The enrollment server could not issue a certificate.",
            ),
            Self::Render(_) => Fault::receiver(
                FaultSubcode::InternalServiceFault,
                "The enrollment server encountered an internal error.",
            ),
        }
    }
}

fn fault(err: EnrollmentError, message_id: Option<&str>) -> Fault {
    match &err {
        EnrollmentError::Authority(_) | EnrollmentError::Issue(_) | EnrollmentError::Render(_) => {
            tracing::error!(error = %err, "enrollment failed");
        }
        _ => tracing::warn!(error = %err, "enrollment rejected"),
    }
    let fault = err.to_fault();
    match message_id {
        Some(id) => fault.relates_to(id),
        None => fault,
    }
}

impl<S: ObjectStore, G: DomainBinding> WindowsMdm<S, G> {
    fn authenticate(&self, header: &RequestHeader) -> Result<Identity, EnrollmentError> {
        let token = header.security.as_ref().ok_or(AuthError::MissingToken)?;
        Ok(self.authenticator.authenticate(token)?)
    }

    fn discover_inner(&self, body: &str) -> Result<String, EnrollmentError> {
        let req = DiscoverRequest::parse(body)?;

        tracing::info!(
            email = req.email_address.as_deref().unwrap_or_default(),
            device_type = req.device_type.as_deref().unwrap_or_default(),
            "processing discovery"
        );

        let activity_id = uuid::Uuid::new_v4().to_string();
        let response =
            DiscoverResponse::federated(&req.header.message_id, &activity_id, &self.config.enrollment_url);
        Ok(response.to_xml()?)
    }

    fn get_policies_inner(&self, req: &GetPoliciesRequest) -> Result<String, EnrollmentError> {
        let identity = self.authenticate(&req.header)?;

        tracing::info!(principal = %identity.principal, "processing enrollment policy request");

        let activity_id = uuid::Uuid::new_v4().to_string();
        let response = GetPoliciesResponse::new(
            &req.header.message_id,
            &activity_id,
            &self.config.policy_id,
            &self.config.policy_friendly_name,
        );
        Ok(response.to_xml()?)
    }

    async fn enroll_inner(&self, req: &EnrollmentRequest) -> Result<String, EnrollmentError> {
        let identity = self.authenticate(&req.header)?;
        let device_id = req
            .context
            .device_id()
            .filter(|id| !id.is_empty())
            .ok_or(EnrollmentError::MissingDeviceId)?;
        let enroll_type = req.context.enroll_type();

        tracing::info!(device_id, principal = %identity.principal, ?enroll_type, "processing enrollment");

        let csr = req.csr_der()?;
        let authority = self.authority.active_or_issue().await?;
        let keys = authority.keys().map_err(AuthorityError::from)?;

        // the CSR subject is self-asserted; the certificate names who we authenticated
        let common_name = match enroll_type {
            EnrollType::Device => device_id,
            EnrollType::User => identity.principal.as_str(),
        };

        let issued = mdm_crypto::issue_device_certificate(
            &csr,
            &keys.cert_pem,
            &keys.key_pem,
            device_id,
            common_name,
        )?;

        tracing::info!(
            device_id,
            authority = %authority.id,
            fingerprint = %issued.leaf_fingerprint,
            "issued device certificate"
        );

        let b64 = base64::engine::general_purpose::STANDARD;
        let profile = EnrollmentProfile {
            root_fingerprint: issued.issuer_fingerprint,
            root_certificate: b64.encode(&issued.issuer_cert_der),
            leaf_fingerprint: issued.leaf_fingerprint,
            leaf_certificate: b64.encode(&issued.leaf_cert_der),
            enroll_type,
            subject_common_name: common_name.to_string(),
            manage_url: self.config.manage_url.clone(),
            provider_id: self.config.provider_id.clone(),
            server_name: self.config.server_name.clone(),
            first_poll_retries: self.config.first_poll_retries,
        };

        let response = EnrollmentResponse::new(&req.header.message_id, profile.to_document(), Utc::now());
        Ok(response.to_xml()?)
    }
}

impl<S: ObjectStore, G: DomainBinding> Enrollment for WindowsMdm<S, G> {
    async fn discover(&self, body: &str) -> Result<String, Fault> {
        self.discover_inner(body).map_err(|e| fault(e, None))
    }

    async fn get_policies(&self, body: &str) -> Result<String, Fault> {
        let req = GetPoliciesRequest::parse(body).map_err(|e| fault(e.into(), None))?;
        self.get_policies_inner(&req)
            .map_err(|e| fault(e, Some(&req.header.message_id)))
    }

    async fn enroll(&self, body: &str) -> Result<String, Fault> {
        tracing::trace!(body, "WSTEP request");
        let req = EnrollmentRequest::parse(body).map_err(|e| fault(e.into(), None))?;
        self.enroll_inner(&req)
            .await
            .map_err(|e| fault(e, Some(&req.header.message_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mdm_core::soap::BinarySecurityToken;
    use mdm_core::xml::XmlNode;
    use base64::Engine as _;
    use mdm_core::{Characteristic, ProvisioningDoc};
    use mdm_storage::MemoryStore;
    use rcgen::{CertificateParams, DnType, KeyPair};

    use super::*;
    use crate::{AuthorityConfig, AuthorityManager, EnrollmentConfig, StaticTokenAuthenticator};

    fn service() -> WindowsMdm<Arc<MemoryStore>> {
        let authority = AuthorityManager::new(
            Arc::new(MemoryStore::new()),
            AuthorityConfig {
                bucket: Some("mdm".into()),
                key_bits: 2048,
                ..AuthorityConfig::default()
            },
        );
        let authenticator =
            StaticTokenAuthenticator::new([("secret".to_string(), "user@example.com".to_string())]);
        WindowsMdm::new(Arc::new(authority), Arc::new(authenticator), EnrollmentConfig::default())
    }

    fn csr_base64() -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "anything");
        let request = params.serialize_request(&key).unwrap();
        let der: &[u8] = request.der().as_ref();
        base64::engine::general_purpose::STANDARD.encode(der)
    }

    fn request(token: Option<&str>, device_id: Option<&str>, csr: &str) -> String {
        let security = token
            .map(|t| {
                format!(
                    r#"<wsse:Security s:mustUnderstand="1"><wsse:BinarySecurityToken ValueType="http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentUserToken" EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd#base64binary">{t}</wsse:BinarySecurityToken></wsse:Security>"#
                )
            })
            .unwrap_or_default();
        let device = device_id
            .map(|id| format!(r#"<ac:ContextItem Name="DeviceID"><ac:Value>{id}</ac:Value></ac:ContextItem>"#))
            .unwrap_or_default();
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wst="http://docs.oasis-open.org/ws-sx/ws-trust/200512" xmlns:ac="http://schemas.xmlsoap.org/ws/2006/12/authorization">
  <s:Header>
    <a:Action s:mustUnderstand="1">http://schemas.microsoft.com/windows/pki/2009/01/enrollment/RST/wstep</a:Action>
    <a:MessageID>urn:uuid:1234</a:MessageID>
    {security}
  </s:Header>
  <s:Body>
    <wst:RequestSecurityToken>
      <wst:TokenType>http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentToken</wst:TokenType>
      <wst:RequestType>http://docs.oasis-open.org/ws-sx/ws-trust/200512/Issue</wst:RequestType>
      <wsse:BinarySecurityToken ValueType="http://schemas.microsoft.com/windows/pki/2009/01/enrollment#PKCS10" EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd#base64binary">{csr}</wsse:BinarySecurityToken>
      <ac:AdditionalContext>
        <ac:ContextItem Name="EnrollmentType"><ac:Value>Device</ac:Value></ac:ContextItem>
        {device}
      </ac:AdditionalContext>
    </wst:RequestSecurityToken>
  </s:Body>
</s:Envelope>"#
        )
    }

    fn single_child<'a>(doc: &'a ProvisioningDoc, path: &[&str]) -> &'a Characteristic {
        let parent = doc.find(path).unwrap();
        let children: Vec<_> = parent.characteristics().collect();
        assert_eq!(children.len(), 1, "{path:?}");
        children[0]
    }

    #[tokio::test]
    async fn test_enroll_issues_certificates() {
        let mdm = service();
        let xml = mdm
            .enroll(&request(Some("c2VjcmV0"), Some("6F2B0A1D"), &csr_base64()))
            .await
            .unwrap();

        let envelope = XmlNode::parse(&xml).unwrap();
        assert_eq!(envelope.text_at("Header/RelatesTo").as_deref(), Some("urn:uuid:1234"));

        let token = envelope
            .path("Body/RequestSecurityTokenResponseCollection/RequestSecurityTokenResponse/RequestedSecurityToken/BinarySecurityToken")
            .unwrap();
        let document = BinarySecurityToken::from_node(token).unwrap().decode().unwrap();
        let doc = ProvisioningDoc::from_xml(std::str::from_utf8(&document).unwrap()).unwrap();

        let root = single_child(&doc, &["CertificateStore", "Root", "System"]);
        assert_eq!(root.parms().filter(|p| p.name == "EncodedCertificate").count(), 1);

        let authority = mdm.authority().active().await.unwrap().unwrap();
        assert_eq!(root.kind, authority.id);

        let store = doc.find(&["CertificateStore", "My", "Device"]).unwrap();
        let leaves: Vec<_> = store
            .characteristics()
            .filter(|c| c.kind != "PrivateKeyContainer")
            .collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].parms().filter(|p| p.name == "EncodedCertificate").count(), 1);
    }

    #[tokio::test]
    async fn test_enroll_reuses_active_authority() {
        let mdm = service();
        let body = request(Some("c2VjcmV0"), Some("6F2B0A1D"), &csr_base64());
        mdm.enroll(&body).await.unwrap();
        mdm.enroll(&body).await.unwrap();

        assert_eq!(mdm.authority().history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_is_authentication_fault() {
        let fault = service()
            .enroll(&request(None, Some("6F2B0A1D"), &csr_base64()))
            .await
            .unwrap_err();

        assert!(matches!(fault.subcode, FaultSubcode::Authentication));
        assert_eq!(fault.http_status(), 401);
        assert_eq!(fault.relates_to.as_deref(), Some("urn:uuid:1234"));
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let fault = service()
            .enroll(&request(Some("d3Jvbmc="), Some("6F2B0A1D"), &csr_base64()))
            .await
            .unwrap_err();
        assert_eq!(fault.http_status(), 401);
    }

    #[tokio::test]
    async fn test_missing_device_id_is_format_fault() {
        let fault = service()
            .enroll(&request(Some("c2VjcmV0"), None, &csr_base64()))
            .await
            .unwrap_err();
        assert!(matches!(fault.subcode, FaultSubcode::MessageFormat));
        assert_eq!(fault.http_status(), 400);
    }

    #[tokio::test]
    async fn test_garbage_csr_is_certificate_request_fault() {
        let mdm = service();
        let fault = mdm
            .enroll(&request(Some("c2VjcmV0"), Some("6F2B0A1D"), "AAECAwQ="))
            .await
            .unwrap_err();
        assert!(matches!(fault.subcode, FaultSubcode::CertificateRequest));
    }

    #[test]
    fn test_fault_reasons_hide_detail() {
        let err = EnrollmentError::Authority(AuthorityError::MissingBucket);
        let fault = err.to_fault();
        assert!(!fault.reason.contains("bucket"));
        assert_eq!(fault.http_status(), 500);
    }
}
