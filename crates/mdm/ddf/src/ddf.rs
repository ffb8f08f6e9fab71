//! DDF (`MgmtTree`) document parsing.

use std::collections::BTreeSet;

use mdm_core::xml::{XmlError, XmlNode};

use crate::schema::{AccessType, DataType, Schema, SchemaEntry, Scope, Section};

#[derive(Debug, thiserror::Error)]
pub enum DdfError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("expected a MgmtTree document, found <{0}>")]
    NotMgmtTree(String),
    #[error("{uri}: unsupported DFFormat '{format}'")]
    UnsupportedFormat { uri: String, format: String },
    #[error("{uri}: missing DFFormat")]
    MissingFormat { uri: String },
    #[error("{uri}: unknown access type '{access}'")]
    UnknownAccessType { uri: String, access: String },
}

/// Compile one DDF document into a schema section.
pub fn compile_section(name: &str, xml: &str) -> Result<Section, DdfError> {
    let root = XmlNode::parse(xml)?;
    if root.name != "MgmtTree" {
        return Err(DdfError::NotMgmtTree(root.name));
    }

    let mut entries = Vec::new();
    for node in root.children_named("Node") {
        walk(node, "", &mut entries)?;
    }

    tracing::debug!(section = name, entries = entries.len(), "compiled DDF section");

    Ok(Section {
        name: name.to_string(),
        entries,
    })
}

/// Compile several named DDF documents into a schema.
pub fn compile<'a>(
    documents: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Schema, DdfError> {
    let sections = documents
        .into_iter()
        .map(|(name, xml)| compile_section(name, xml))
        .collect::<Result<_, _>>()?;

    Ok(Schema {
        generated_at: None,
        sections,
    })
}

fn walk(node: &XmlNode, parent: &str, out: &mut Vec<SchemaEntry>) -> Result<(), DdfError> {
    let uri = node_uri(node, parent);
    let children: Vec<&XmlNode> = node.children_named("Node").collect();

    if !children.is_empty() {
        for child in children {
            walk(child, &uri, out)?;
        }
        return Ok(());
    }

    let properties = node.child("DFProperties");
    let mut access = access_types(properties, &uri)?;

    // Get is implied; bare Exec leaves are triggers, not settings
    access.remove(&AccessType::Get);
    if access.is_empty() || access == BTreeSet::from([AccessType::Exec]) {
        return Ok(());
    }

    let format = properties
        .and_then(|p| p.child("DFFormat"))
        .and_then(|f| f.children.first())
        .map(|f| f.name.as_str())
        .ok_or_else(|| DdfError::MissingFormat { uri: uri.clone() })?;

    // `node` leaves are empty interior nodes
    if format == "node" {
        return Ok(());
    }

    let Some(data_type) = DataType::from_ddf(format) else {
        return Err(DdfError::UnsupportedFormat {
            uri,
            format: format.to_string(),
        });
    };

    let text = |name: &str| {
        properties
            .and_then(|p| p.text_at(name))
            .filter(|t| !t.is_empty())
    };

    out.push(SchemaEntry {
        scope: Scope::of_uri(&uri),
        default_value: text("DefaultValue"),
        description: text("Description"),
        uri,
        access,
        data_type,
    });
    Ok(())
}

fn node_uri(node: &XmlNode, parent: &str) -> String {
    let name = match node.text_at("NodeName").filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => {
            let title = node
                .text_at("DFProperties/DFTitle")
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Name".to_string());
            format!("{{{title}}}")
        }
    };

    [parent.to_string(), node.text_at("Path").unwrap_or_default(), name]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn access_types(properties: Option<&XmlNode>, uri: &str) -> Result<BTreeSet<AccessType>, DdfError> {
    let Some(access) = properties.and_then(|p| p.child("AccessType")) else {
        return Ok(BTreeSet::new());
    };

    access
        .children
        .iter()
        .map(|c| {
            AccessType::from_tag(&c.name).ok_or_else(|| DdfError::UnknownAccessType {
                uri: uri.to_string(),
                access: c.name.clone(),
            })
        })
        .collect()
}
