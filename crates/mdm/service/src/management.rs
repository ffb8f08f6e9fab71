//! OMA-DM management check-in.
//!
//! Every message is answered on its own: the header and each device command get a `200`
//! status, and the first message of a session also carries the device's desired settings.

use mdm_core::Request;
use mdm_core::syncml::{Command, Item, Meta, OpKind, Operation, Status, SyncMl};
use mdm_core::xml::XmlError;
use mdm_crypto::VerifyError;
use mdm_ddf::{AccessType, Schema};
use mdm_storage::ObjectStore;
use serde::Deserialize;

use crate::{AuthorityError, ConfigError, DomainBinding, Management, WindowsMdm};

/// One setting a device should have.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DesiredSetting {
    pub uri: String,
    pub value: String,
}

/// Desired settings per device.
pub trait PolicySource: Send + Sync {
    fn settings_for(&self, device_id: &str) -> Vec<DesiredSetting>;
}

/// The same settings for every device, loaded from a JSON list of `{ "uri", "value" }`.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    settings: Vec<DesiredSetting>,
}

impl StaticPolicySource {
    pub fn new(settings: Vec<DesiredSetting>) -> Self {
        Self { settings }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl PolicySource for StaticPolicySource {
    fn settings_for(&self, _device_id: &str) -> Vec<DesiredSetting> {
        self.settings.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("no client certificate presented")]
    MissingCertificate,
    #[error("client certificate rejected: {0}")]
    Certificate(#[from] VerifyError),
    #[error("malformed SyncML: {0}")]
    Message(#[source] XmlError),
    #[error("device authority unavailable: {0}")]
    Authority(#[from] AuthorityError),
    #[error("failed to render response: {0}")]
    Render(#[source] XmlError),
}

impl ManagementError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingCertificate | Self::Certificate(_) => 401,
            Self::Message(_) => 400,
            Self::Authority(_) | Self::Render(_) => 500,
        }
    }
}

struct CmdIds(u32);

impl CmdIds {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

fn status(ids: &mut CmdIds, msg_ref: &str, cmd_ref: &str, cmd: &str, code: u16) -> Status {
    Status {
        cmd_id: ids.next(),
        msg_ref: msg_ref.to_string(),
        cmd_ref: cmd_ref.to_string(),
        cmd: cmd.to_string(),
        target_ref: None,
        source_ref: None,
        data: code.to_string(),
    }
}

/// Build the reply to `msg` for a device whose desired settings are `settings`.
pub fn respond(msg: &SyncMl, settings: &[DesiredSetting], schema: &Schema) -> SyncMl {
    let mut ids = CmdIds(0);
    let msg_id = &msg.header.msg_id;

    let mut commands = Vec::new();

    let mut header_status = status(&mut ids, msg_id, "0", "SyncHdr", 200);
    header_status.target_ref = Some(msg.header.target.clone());
    header_status.source_ref = Some(msg.header.source.clone());
    commands.push(Command::Status(header_status));

    for cmd in &msg.commands {
        if matches!(cmd, Command::Status(_)) {
            continue;
        }
        commands.push(Command::Status(status(&mut ids, msg_id, cmd.cmd_id(), cmd.name(), 200)));
    }

    if msg.is_session_start() {
        for setting in settings {
            if let Some(op) = compile_setting(&mut ids, setting, schema) {
                commands.push(op);
            }
        }
    }

    SyncMl {
        header: msg.header.reply(),
        commands,
        is_final: true,
    }
}

fn compile_setting(ids: &mut CmdIds, setting: &DesiredSetting, schema: &Schema) -> Option<Command> {
    let Some(entry) = schema.lookup(&setting.uri) else {
        tracing::warn!(uri = %setting.uri, "desired setting is not in the schema");
        return None;
    };

    let (kind, access) = if entry.permits(AccessType::Replace) {
        (OpKind::Replace, AccessType::Replace)
    } else if entry.permits(AccessType::Add) {
        (OpKind::Add, AccessType::Add)
    } else {
        tracing::warn!(uri = %setting.uri, "setting permits neither Replace nor Add");
        return None;
    };

    if let Err(e) = entry.validate(access, &setting.value) {
        tracing::warn!(error = %e, "skipping invalid desired setting");
        return None;
    }

    Some(Command::Op(
        kind,
        Operation {
            cmd_id: ids.next(),
            meta: None,
            items: vec![Item {
                target: Some(setting.uri.clone()),
                source: None,
                meta: Some(Meta {
                    format: Some(entry.data_type.syncml_format().to_string()),
                    kind: Some("text/plain".to_string()),
                }),
                data: Some(setting.value.clone()),
            }],
        },
    ))
}

impl<S: ObjectStore, G: DomainBinding> Management for WindowsMdm<S, G> {
    async fn manage(&self, req: &Request, body: &str) -> Result<String, ManagementError> {
        let cert = req
            .certificate
            .as_deref()
            .ok_or(ManagementError::MissingCertificate)?;
        let client = self.authority.trust_pool()?.verify(cert)?;

        let msg = SyncMl::parse(body).map_err(ManagementError::Message)?;

        if msg.header.source != client.device_id {
            tracing::warn!(
                device_id = %client.device_id,
                source = %msg.header.source,
                "SyncML source differs from certificate device ID"
            );
        }

        tracing::info!(
            device_id = %client.device_id,
            session_id = %msg.header.session_id,
            msg_id = %msg.header.msg_id,
            commands = msg.commands.len(),
            "processing management check-in"
        );
        tracing::trace!(body, "SyncML request");

        let settings = if msg.is_session_start() {
            self.policies.settings_for(&client.device_id)
        } else {
            Vec::new()
        };

        respond(&msg, &settings, &self.schema)
            .to_xml()
            .map_err(ManagementError::Render)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mdm_ddf::{DataType, SchemaEntry, Scope, Section};
    use mdm_storage::MemoryStore;
    use rcgen::{CertificateParams, KeyPair};

    use super::*;
    use crate::{AuthorityConfig, AuthorityManager, StaticTokenAuthenticator};

    const CHECKIN: &str = r#"<SyncML xmlns="SYNCML:SYNCML1.2">
  <SyncHdr>
    <VerDTD>1.2</VerDTD><VerProto>DM/1.2</VerProto>
    <SessionID>4</SessionID><MsgID>1</MsgID>
    <Target><LocURI>https://manage.example.com/ManagementServer/Manage.svc</LocURI></Target>
    <Source><LocURI>6F2B0A1D</LocURI></Source>
  </SyncHdr>
  <SyncBody>
    <Alert><CmdID>1</CmdID><Data>1201</Data></Alert>
    <Replace><CmdID>2</CmdID><Item><Source><LocURI>./DevInfo/Man</LocURI></Source><Data>Contoso</Data></Item></Replace>
    <Final/>
  </SyncBody>
</SyncML>"#;

    fn schema() -> Schema {
        let entry = |uri: &str, access: &[AccessType], data_type| SchemaEntry {
            uri: uri.to_string(),
            access: access.iter().copied().collect(),
            data_type,
            default_value: None,
            description: None,
            scope: Scope::of_uri(uri),
        };
        Schema {
            generated_at: None,
            sections: vec![Section {
                name: "Policy".into(),
                entries: vec![
                    entry(
                        "./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera",
                        &[AccessType::Replace, AccessType::Delete],
                        DataType::Integer,
                    ),
                    entry(
                        "./Vendor/MSFT/VPNv2/{ProfileName}/ProfileXML",
                        &[AccessType::Add, AccessType::Delete],
                        DataType::String,
                    ),
                ],
            }],
        }
    }

    fn setting(uri: &str, value: &str) -> DesiredSetting {
        DesiredSetting {
            uri: uri.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_statuses_and_settings_on_session_start() {
        let msg = SyncMl::parse(CHECKIN).unwrap();
        let settings = vec![
            setting("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera", "0"),
            setting("./Vendor/MSFT/VPNv2/Corp/ProfileXML", "<VPNProfile/>"),
            setting("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera", "maybe"),
            setting("./Device/Vendor/MSFT/Unknown", "1"),
        ];

        let reply = respond(&msg, &settings, &schema());

        assert_eq!(reply.header.target, "6F2B0A1D");
        assert_eq!(reply.header.msg_id, "1");
        assert!(reply.is_final);

        let names: Vec<_> = reply.commands.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Status", "Status", "Status", "Replace", "Add"]);

        let Command::Status(hdr) = &reply.commands[0] else { panic!() };
        assert_eq!((hdr.cmd.as_str(), hdr.cmd_ref.as_str(), hdr.data.as_str()), ("SyncHdr", "0", "200"));

        let Command::Status(alert) = &reply.commands[1] else { panic!() };
        assert_eq!((alert.cmd.as_str(), alert.cmd_ref.as_str()), ("Alert", "1"));

        let Command::Op(OpKind::Replace, op) = &reply.commands[3] else { panic!() };
        assert_eq!(op.cmd_id, "4");
        assert_eq!(op.items[0].data.as_deref(), Some("0"));
        assert_eq!(op.items[0].meta.as_ref().unwrap().format.as_deref(), Some("int"));

        let xml = reply.to_xml().unwrap();
        assert!(SyncMl::parse(&xml).is_ok());
    }

    #[test]
    fn test_later_messages_only_acknowledge() {
        let msg = SyncMl::parse(&CHECKIN.replace("<MsgID>1</MsgID>", "<MsgID>2</MsgID>")).unwrap();
        let settings = vec![setting("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera", "0")];

        let reply = respond(&msg, &settings, &schema());
        assert!(reply.commands.iter().all(|c| matches!(c, Command::Status(_))));
    }

    #[test]
    fn test_static_policy_source() {
        let source = StaticPolicySource::from_json(
            r#"[{"uri": "./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera", "value": "0"}]"#,
        )
        .unwrap();
        assert_eq!(source.settings_for("any").len(), 1);
        assert!(StaticPolicySource::from_json("{").is_err());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ManagementError::MissingCertificate.http_status(), 401);
        assert_eq!(ManagementError::Message(XmlError::Empty).http_status(), 400);
    }

    fn service() -> WindowsMdm<Arc<MemoryStore>> {
        let authority = AuthorityManager::new(
            Arc::new(MemoryStore::new()),
            AuthorityConfig {
                bucket: Some("mdm".into()),
                key_bits: 2048,
                ..AuthorityConfig::default()
            },
        );
        let policies = StaticPolicySource::new(vec![setting(
            "./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera",
            "0",
        )]);
        WindowsMdm::new(
            Arc::new(authority),
            Arc::new(StaticTokenAuthenticator::default()),
            Default::default(),
        )
        .with_policies(schema(), Arc::new(policies))
    }

    async fn device_certificate(mdm: &WindowsMdm<Arc<MemoryStore>>) -> Request {
        let authority = mdm.authority().active_or_issue().await.unwrap();
        let keys = authority.keys().unwrap();
        let key = KeyPair::generate().unwrap();
        let csr = CertificateParams::default().serialize_request(&key).unwrap();
        let issued = mdm_crypto::issue_device_certificate(
            csr.der().as_ref(),
            &keys.cert_pem,
            &keys.key_pem,
            "6F2B0A1D",
            "6F2B0A1D",
        )
        .unwrap();
        Request::new().with_certificate(issued.leaf_cert_der, issued.leaf_fingerprint)
    }

    #[tokio::test]
    async fn test_manage_with_enrolled_certificate() {
        let mdm = service();
        let req = device_certificate(&mdm).await;

        let xml = mdm.manage(&req, CHECKIN).await.unwrap();
        let reply = SyncMl::parse(&xml).unwrap();

        assert_eq!(reply.header.target, "6F2B0A1D");
        assert!(reply
            .commands
            .iter()
            .any(|c| matches!(c, Command::Op(OpKind::Replace, _))));
    }

    #[tokio::test]
    async fn test_manage_after_rotation_accepts_old_certificate() {
        let mdm = service();
        let req = device_certificate(&mdm).await;
        mdm.authority().issue_authority().await.unwrap();

        assert!(mdm.manage(&req, CHECKIN).await.is_ok());
    }

    #[tokio::test]
    async fn test_manage_requires_certificate() {
        let err = service().manage(&Request::new(), CHECKIN).await.unwrap_err();
        assert!(matches!(err, ManagementError::MissingCertificate));
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn test_manage_rejects_foreign_certificate() {
        let mdm = service();
        mdm.authority().active_or_issue().await.unwrap();

        let foreign = mdm_crypto::generate_authority("Elsewhere", 2048, chrono::Utc::now()).unwrap();
        let der = foreign.keys.cert_der().unwrap();
        let req = Request::new().with_certificate(der, "FOREIGN");

        let err = mdm.manage(&req, CHECKIN).await.unwrap_err();
        assert!(matches!(err, ManagementError::Certificate(_)));
    }
}
