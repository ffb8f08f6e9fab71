//! SyncML 1.2 / OMA-DM message model used by `Manage.svc`.

use crate::xml::{XmlError, XmlNode, XmlWriter};

pub const NS_SYNCML: &str = "SYNCML:SYNCML1.2";
pub const NS_METINF: &str = "syncml:metinf";
pub const CONTENT_TYPE: &str = "application/vnd.syncml.dm+xml";

/// Alert codes a Windows client sends at the start of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    ServerInitiatedMgmt,
    ClientInitiatedMgmt,
    NextMessage,
    SessionAbort,
    ClientEvent,
    NoEndOfData,
    GenericAlert,
}

impl AlertType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1200 => Self::ServerInitiatedMgmt,
            1201 => Self::ClientInitiatedMgmt,
            1222 => Self::NextMessage,
            1223 => Self::SessionAbort,
            1224 => Self::ClientEvent,
            1225 => Self::NoEndOfData,
            1226 => Self::GenericAlert,
            _ => return None,
        })
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::ServerInitiatedMgmt => 1200,
            Self::ClientInitiatedMgmt => 1201,
            Self::NextMessage => 1222,
            Self::SessionAbort => 1223,
            Self::ClientEvent => 1224,
            Self::NoEndOfData => 1225,
            Self::GenericAlert => 1226,
        }
    }
}

/// `<SyncHdr>` routing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHdr {
    pub ver_dtd: String,
    pub ver_proto: String,
    pub session_id: String,
    pub msg_id: String,
    pub target: String,
    pub source: String,
    pub source_name: Option<String>,
    pub max_msg_size: Option<String>,
}

impl SyncHdr {
    /// Header for the server's reply: same session and message, routing swapped.
    pub fn reply(&self) -> Self {
        Self {
            ver_dtd: "1.2".to_string(),
            ver_proto: "DM/1.2".to_string(),
            session_id: self.session_id.clone(),
            msg_id: self.msg_id.clone(),
            target: self.source.clone(),
            source: self.target.clone(),
            source_name: None,
            max_msg_size: None,
        }
    }

    fn from_node(node: &XmlNode) -> Result<Self, XmlError> {
        let text = |path: &str| {
            node.text_at(path)
                .ok_or_else(|| XmlError::Missing(format!("SyncHdr/{path}")))
        };
        let hdr = Self {
            ver_dtd: text("VerDTD")?,
            ver_proto: text("VerProto")?,
            session_id: text("SessionID")?,
            msg_id: text("MsgID")?,
            target: text("Target/LocURI")?,
            source: text("Source/LocURI")?,
            source_name: node.text_at("Source/LocName"),
            max_msg_size: node.text_at("Meta/MaxMsgSize"),
        };
        if hdr.ver_dtd != "1.2" {
            return Err(XmlError::Unexpected {
                field: "SyncHdr/VerDTD".into(),
                value: hdr.ver_dtd,
            });
        }
        if hdr.ver_proto != "DM/1.2" {
            return Err(XmlError::Unexpected {
                field: "SyncHdr/VerProto".into(),
                value: hdr.ver_proto,
            });
        }
        Ok(hdr)
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        w.start("SyncHdr", &[])?;
        w.element("VerDTD", &[], &self.ver_dtd)?;
        w.element("VerProto", &[], &self.ver_proto)?;
        w.element("SessionID", &[], &self.session_id)?;
        w.element("MsgID", &[], &self.msg_id)?;
        w.start("Target", &[])?;
        w.element("LocURI", &[], &self.target)?;
        w.end("Target")?;
        w.start("Source", &[])?;
        w.element("LocURI", &[], &self.source)?;
        if let Some(name) = &self.source_name {
            w.element("LocName", &[], name)?;
        }
        w.end("Source")?;
        if let Some(size) = &self.max_msg_size {
            w.start("Meta", &[])?;
            w.element("MaxMsgSize", &[("xmlns", NS_METINF)], size)?;
            w.end("Meta")?;
        }
        w.end("SyncHdr")
    }
}

/// `<Meta>` of an item: data format and MIME type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub format: Option<String>,
    pub kind: Option<String>,
}

impl Meta {
    fn from_node(node: &XmlNode) -> Self {
        Self {
            format: node.text_at("Format"),
            kind: node.text_at("Type"),
        }
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        w.start("Meta", &[])?;
        if let Some(format) = &self.format {
            w.element("Format", &[("xmlns", NS_METINF)], format)?;
        }
        if let Some(kind) = &self.kind {
            w.element("Type", &[("xmlns", NS_METINF)], kind)?;
        }
        w.end("Meta")
    }
}

/// A command `<Item>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub target: Option<String>,
    pub source: Option<String>,
    pub meta: Option<Meta>,
    pub data: Option<String>,
}

impl Item {
    fn from_node(node: &XmlNode) -> Self {
        Self {
            target: node.text_at("Target/LocURI"),
            source: node.text_at("Source/LocURI"),
            meta: node.child("Meta").map(Meta::from_node),
            data: node.text_at("Data"),
        }
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        w.start("Item", &[])?;
        if let Some(source) = &self.source {
            w.start("Source", &[])?;
            w.element("LocURI", &[], source)?;
            w.end("Source")?;
        }
        if let Some(target) = &self.target {
            w.start("Target", &[])?;
            w.element("LocURI", &[], target)?;
            w.end("Target")?;
        }
        if let Some(meta) = &self.meta {
            meta.write(w)?;
        }
        if let Some(data) = &self.data {
            w.element("Data", &[], data)?;
        }
        w.end("Item")
    }
}

/// Item-carrying commands that share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Replace,
    Delete,
    Get,
    Exec,
    Results,
    Atomic,
    Sequence,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Replace => "Replace",
            Self::Delete => "Delete",
            Self::Get => "Get",
            Self::Exec => "Exec",
            Self::Results => "Results",
            Self::Atomic => "Atomic",
            Self::Sequence => "Sequence",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Add" => Self::Add,
            "Replace" => Self::Replace,
            "Delete" => Self::Delete,
            "Get" => Self::Get,
            "Exec" => Self::Exec,
            "Results" => Self::Results,
            "Atomic" => Self::Atomic,
            "Sequence" => Self::Sequence,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub cmd_id: String,
    pub meta: Option<Meta>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub cmd_id: String,
    pub data: u16,
    pub items: Vec<Item>,
}

impl Alert {
    pub fn alert_type(&self) -> Option<AlertType> {
        AlertType::from_code(self.data)
    }
}

/// `<Status>` reply to a command or the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub cmd_id: String,
    pub msg_ref: String,
    pub cmd_ref: String,
    pub cmd: String,
    pub target_ref: Option<String>,
    pub source_ref: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Alert(Alert),
    Status(Status),
    Op(OpKind, Operation),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alert(_) => "Alert",
            Self::Status(_) => "Status",
            Self::Op(kind, _) => kind.as_str(),
        }
    }

    pub fn cmd_id(&self) -> &str {
        match self {
            Self::Alert(a) => &a.cmd_id,
            Self::Status(s) => &s.cmd_id,
            Self::Op(_, op) => &op.cmd_id,
        }
    }

    fn from_node(node: &XmlNode) -> Result<Option<Self>, XmlError> {
        let cmd_id = node.text_at("CmdID").unwrap_or_default();
        let items = || -> Vec<Item> { node.children_named("Item").map(Item::from_node).collect() };

        let command = match node.name.as_str() {
            "Alert" => {
                let raw = node.text_at("Data").unwrap_or_default();
                let data: u16 = raw.parse().map_err(|_| XmlError::Unexpected {
                    field: "Alert/Data".into(),
                    value: raw.clone(),
                })?;
                Self::Alert(Alert {
                    cmd_id,
                    data,
                    items: items(),
                })
            }
            "Status" => Self::Status(Status {
                cmd_id,
                msg_ref: node.text_at("MsgRef").unwrap_or_default(),
                cmd_ref: node.text_at("CmdRef").unwrap_or_default(),
                cmd: node.text_at("Cmd").unwrap_or_default(),
                target_ref: node.text_at("TargetRef"),
                source_ref: node.text_at("SourceRef"),
                data: node.text_at("Data").unwrap_or_default(),
            }),
            "Final" => return Ok(None),
            name => match OpKind::from_name(name) {
                Some(kind) => Self::Op(
                    kind,
                    Operation {
                        cmd_id,
                        meta: node.child("Meta").map(Meta::from_node),
                        items: items(),
                    },
                ),
                None => {
                    return Err(XmlError::Unexpected {
                        field: "SyncBody".into(),
                        value: name.to_string(),
                    });
                }
            },
        };
        Ok(Some(command))
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        let name = self.name();
        w.start(name, &[])?;
        w.element("CmdID", &[], self.cmd_id())?;
        match self {
            Self::Alert(alert) => {
                w.element("Data", &[], &alert.data.to_string())?;
                for item in &alert.items {
                    item.write(w)?;
                }
            }
            Self::Status(status) => {
                w.element("MsgRef", &[], &status.msg_ref)?;
                w.element("CmdRef", &[], &status.cmd_ref)?;
                w.element("Cmd", &[], &status.cmd)?;
                if let Some(target) = &status.target_ref {
                    w.element("TargetRef", &[], target)?;
                }
                if let Some(source) = &status.source_ref {
                    w.element("SourceRef", &[], source)?;
                }
                w.element("Data", &[], &status.data)?;
            }
            Self::Op(_, op) => {
                if let Some(meta) = &op.meta {
                    meta.write(w)?;
                }
                for item in &op.items {
                    item.write(w)?;
                }
            }
        }
        w.end(name)
    }
}

/// A whole `<SyncML>` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMl {
    pub header: SyncHdr,
    pub commands: Vec<Command>,
    pub is_final: bool,
}

impl SyncMl {
    pub fn parse(body: &str) -> Result<Self, XmlError> {
        let root = XmlNode::parse(body)?;
        if root.name != "SyncML" {
            return Err(XmlError::Unexpected {
                field: "root".into(),
                value: root.name,
            });
        }
        let header = SyncHdr::from_node(root.require("SyncHdr")?)?;
        let body = root.require("SyncBody")?;

        let mut commands = Vec::new();
        for child in &body.children {
            if let Some(cmd) = Command::from_node(child)? {
                commands.push(cmd);
            }
        }

        Ok(Self {
            header,
            commands,
            is_final: body.child("Final").is_some(),
        })
    }

    /// Whether this is the opening message of a management session.
    pub fn is_session_start(&self) -> bool {
        self.header.msg_id == "1"
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut w = XmlWriter::new();
        w.declaration()?;
        w.start("SyncML", &[("xmlns", NS_SYNCML)])?;
        self.header.write(&mut w)?;
        w.start("SyncBody", &[])?;
        for cmd in &self.commands {
            cmd.write(&mut w)?;
        }
        if self.is_final {
            w.empty("Final", &[])?;
        }
        w.end("SyncBody")?;
        w.end("SyncML")?;
        w.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SyncML xmlns="SYNCML:SYNCML1.2">
  <SyncHdr>
    <VerDTD>1.2</VerDTD>
    <VerProto>DM/1.2</VerProto>
    <SessionID>1</SessionID>
    <MsgID>1</MsgID>
    <Target><LocURI>https://manage.example.com/ManagementServer/Manage.svc</LocURI></Target>
    <Source><LocURI>6F2B0A1D</LocURI></Source>
    <Meta><MaxMsgSize xmlns="syncml:metinf">524288</MaxMsgSize></Meta>
  </SyncHdr>
  <SyncBody>
    <Alert><CmdID>1</CmdID><Data>1201</Data></Alert>
    <Alert>
      <CmdID>2</CmdID><Data>1224</Data>
      <Item><Meta><Type xmlns="syncml:metinf">com.microsoft/MDM/LoginStatus</Type></Meta><Data>user</Data></Item>
    </Alert>
    <Replace>
      <CmdID>3</CmdID>
      <Item><Source><LocURI>./DevInfo/DevId</LocURI></Source><Data>6F2B0A1D</Data></Item>
      <Item><Source><LocURI>./DevInfo/Man</LocURI></Source><Data>Contoso</Data></Item>
    </Replace>
    <Final/>
  </SyncBody>
</SyncML>"#;

    #[test]
    fn test_parse_checkin() {
        let msg = SyncMl::parse(CHECKIN).unwrap();

        assert!(msg.is_session_start());
        assert!(msg.is_final);
        assert_eq!(msg.header.source, "6F2B0A1D");
        assert_eq!(msg.header.max_msg_size.as_deref(), Some("524288"));
        assert_eq!(msg.commands.len(), 3);

        match &msg.commands[0] {
            Command::Alert(a) => assert_eq!(a.alert_type(), Some(AlertType::ClientInitiatedMgmt)),
            other => panic!("expected alert, got {other:?}"),
        }
        match &msg.commands[2] {
            Command::Op(OpKind::Replace, op) => {
                assert_eq!(op.items.len(), 2);
                assert_eq!(op.items[1].source.as_deref(), Some("./DevInfo/Man"));
            }
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_wrong_protocol_version() {
        let body = CHECKIN.replace("DM/1.2", "DM/1.1");
        assert!(matches!(
            SyncMl::parse(&body),
            Err(XmlError::Unexpected { field, .. }) if field == "SyncHdr/VerProto"
        ));
    }

    #[test]
    fn test_reply_header_swaps_routing() {
        let msg = SyncMl::parse(CHECKIN).unwrap();
        let reply = SyncMl {
            header: msg.header.reply(),
            commands: vec![Command::Status(Status {
                cmd_id: "1".into(),
                msg_ref: "1".into(),
                cmd_ref: "0".into(),
                cmd: "SyncHdr".into(),
                target_ref: None,
                source_ref: None,
                data: "200".into(),
            })],
            is_final: true,
        };

        let parsed = SyncMl::parse(&reply.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.header.target, "6F2B0A1D");
        assert_eq!(parsed.header.source, "https://manage.example.com/ManagementServer/Manage.svc");
        assert_eq!(parsed, reply);
    }
}
