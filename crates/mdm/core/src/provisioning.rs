//! WAP provisioning documents (`wap-provisioningdoc`).

use crate::EnrollType;
use crate::xml::{XmlError, XmlNode, XmlWriter};

/// Root element of a provisioning profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningDoc {
    pub version: String,
    pub characteristics: Vec<Characteristic>,
}

/// A `<characteristic type="...">` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub kind: String,
    pub items: Vec<WapItem>,
}

/// Ordered content of a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WapItem {
    Parm(Parm),
    Characteristic(Characteristic),
}

/// A `<parm name="..." value="..." datatype="..."/>` leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parm {
    pub name: String,
    pub value: Option<String>,
    pub datatype: Option<String>,
}

impl Characteristic {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            items: Vec::new(),
        }
    }

    pub fn parm(mut self, name: &str, value: impl Into<String>) -> Self {
        self.items.push(WapItem::Parm(Parm {
            name: name.to_string(),
            value: Some(value.into()),
            datatype: None,
        }));
        self
    }

    pub fn typed_parm(mut self, name: &str, value: impl Into<String>, datatype: &str) -> Self {
        self.items.push(WapItem::Parm(Parm {
            name: name.to_string(),
            value: Some(value.into()),
            datatype: Some(datatype.to_string()),
        }));
        self
    }

    /// A value-less parm such as `BACKCOMPATRETRYDISABLED`.
    pub fn flag(mut self, name: &str) -> Self {
        self.items.push(WapItem::Parm(Parm {
            name: name.to_string(),
            value: None,
            datatype: None,
        }));
        self
    }

    pub fn child(mut self, child: Characteristic) -> Self {
        self.items.push(WapItem::Characteristic(child));
        self
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.items.iter().filter_map(|i| match i {
            WapItem::Characteristic(c) => Some(c),
            WapItem::Parm(_) => None,
        })
    }

    pub fn parms(&self) -> impl Iterator<Item = &Parm> {
        self.items.iter().filter_map(|i| match i {
            WapItem::Parm(p) => Some(p),
            WapItem::Characteristic(_) => None,
        })
    }

    pub fn get_parm(&self, name: &str) -> Option<&Parm> {
        self.parms().find(|p| p.name == name)
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), XmlError> {
        if self.items.is_empty() {
            return w.empty("characteristic", &[("type", self.kind.as_str())]);
        }
        w.start("characteristic", &[("type", self.kind.as_str())])?;
        for item in &self.items {
            match item {
                WapItem::Characteristic(c) => c.write(w)?,
                WapItem::Parm(p) => {
                    let mut attrs = vec![("name", p.name.as_str())];
                    if let Some(v) = &p.value {
                        attrs.push(("value", v.as_str()));
                    }
                    if let Some(d) = &p.datatype {
                        attrs.push(("datatype", d.as_str()));
                    }
                    w.empty("parm", &attrs)?;
                }
            }
        }
        w.end("characteristic")
    }

    fn from_node(node: &XmlNode) -> Result<Self, XmlError> {
        let mut items = Vec::new();
        for child in &node.children {
            match child.name.as_str() {
                "characteristic" => items.push(WapItem::Characteristic(Self::from_node(child)?)),
                "parm" => items.push(WapItem::Parm(Parm {
                    name: child.require_attr("name")?.to_string(),
                    value: child.attr("value").map(str::to_string),
                    datatype: child.attr("datatype").map(str::to_string),
                })),
                other => {
                    return Err(XmlError::Unexpected {
                        field: "characteristic".into(),
                        value: other.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            kind: node.require_attr("type")?.to_string(),
            items,
        })
    }
}

impl ProvisioningDoc {
    pub fn new(characteristics: Vec<Characteristic>) -> Self {
        Self {
            version: "1.1".to_string(),
            characteristics,
        }
    }

    /// Serialize without any insignificant whitespace.
    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut w = XmlWriter::new();
        w.declaration()?;
        w.start("wap-provisioningdoc", &[("version", self.version.as_str())])?;
        for c in &self.characteristics {
            c.write(&mut w)?;
        }
        w.end("wap-provisioningdoc")?;
        w.into_string()
    }

    pub fn from_xml(xml: &str) -> Result<Self, XmlError> {
        let root = XmlNode::parse(xml)?;
        if root.name != "wap-provisioningdoc" {
            return Err(XmlError::Unexpected {
                field: "root".into(),
                value: root.name,
            });
        }
        Ok(Self {
            version: root.attr("version").unwrap_or("1.1").to_string(),
            characteristics: root
                .children_named("characteristic")
                .map(Characteristic::from_node)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Follow characteristic types from the document root.
    pub fn find(&self, path: &[&str]) -> Option<&Characteristic> {
        let (first, rest) = path.split_first()?;
        let mut current = self.characteristics.iter().find(|c| c.kind == *first)?;
        for segment in rest {
            current = current.characteristics().find(|c| c.kind == *segment)?;
        }
        Some(current)
    }
}

/// Inputs for the profile returned from a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentProfile {
    /// SHA-1 fingerprint (uppercase hex) of the authority certificate.
    pub root_fingerprint: String,
    /// Base64 DER of the authority certificate.
    pub root_certificate: String,
    pub leaf_fingerprint: String,
    pub leaf_certificate: String,
    pub enroll_type: EnrollType,
    /// Subject common name of the leaf, used by the client certificate search.
    pub subject_common_name: String,
    /// Full URL of the OMA-DM endpoint.
    pub manage_url: String,
    pub provider_id: String,
    pub server_name: String,
    pub first_poll_retries: u32,
}

impl EnrollmentProfile {
    /// Build the certificate store, DM server and DM client configuration.
    pub fn to_document(&self) -> ProvisioningDoc {
        let store = self.enroll_type.cert_store();

        let certificate_store = Characteristic::new("CertificateStore")
            .child(
                Characteristic::new("Root").child(
                    Characteristic::new("System").child(
                        Characteristic::new(&self.root_fingerprint)
                            .parm("EncodedCertificate", &self.root_certificate),
                    ),
                ),
            )
            .child(
                Characteristic::new("My").child(
                    Characteristic::new(store)
                        .child(
                            Characteristic::new(&self.leaf_fingerprint)
                                .parm("EncodedCertificate", &self.leaf_certificate),
                        )
                        .child(Characteristic::new("PrivateKeyContainer")),
                ),
            );

        let search = format!(
            "Subject={}&Stores=My%5C{}",
            urlencoding::encode(&format!("CN={}", self.subject_common_name)),
            store
        );

        let application = Characteristic::new("APPLICATION")
            .parm("APPID", "w7")
            .parm("PROVIDER-ID", &self.provider_id)
            .parm("NAME", &self.server_name)
            .parm("ADDR", &self.manage_url)
            .parm("ROLE", "4294967295")
            .flag("BACKCOMPATRETRYDISABLED")
            .parm("DEFAULTENCODING", "application/vnd.syncml.dm+xml")
            .parm("SSLCLIENTCERTSEARCHCRITERIA", search)
            .child(
                Characteristic::new("APPAUTH")
                    .parm("AAUTHLEVEL", "CLIENT")
                    .parm("AAUTHTYPE", "DIGEST")
                    .parm("AAUTHSECRET", "dummy")
                    .parm("AAUTHDATA", "nonce"),
            )
            .child(
                Characteristic::new("APPAUTH")
                    .parm("AAUTHLEVEL", "APPSRV")
                    .parm("AAUTHTYPE", "DIGEST")
                    .parm("AAUTHNAME", "dummy")
                    .parm("AAUTHSECRET", "dummy")
                    .parm("AAUTHDATA", "nonce"),
            );

        let dm_client = Characteristic::new("DMClient").child(
            Characteristic::new("Provider").child(
                Characteristic::new(&self.provider_id)
                    .typed_parm("SyncApplicationVersion", "5.0", "string")
                    .child(Characteristic::new("Poll").typed_parm(
                        "NumberOfFirstRetries",
                        self.first_poll_retries.to_string(),
                        "integer",
                    )),
            ),
        );

        ProvisioningDoc::new(vec![certificate_store, application, dm_client])
    }
}
