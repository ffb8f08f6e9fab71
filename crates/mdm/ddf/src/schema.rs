//! Compiled configuration schema.
//!
//! A schema is a list of sections (one per DDF document), each holding the
//! manageable leaves of that document's OMA-DM tree.

use std::collections::BTreeSet;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Errors raised when loading a schema or validating a value against it.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{op:?} is not permitted on {uri}")]
    OperationNotPermitted { uri: String, op: AccessType },
    #[error("value for {uri} is not a valid {expected}")]
    InvalidValue { uri: String, expected: &'static str },
}

/// OMA-DM operations a node may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Add,
    Copy,
    Delete,
    Exec,
    Get,
    Replace,
}

impl AccessType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "Add" => Self::Add,
            "Copy" => Self::Copy,
            "Delete" => Self::Delete,
            "Exec" => Self::Exec,
            "Get" => Self::Get,
            "Replace" => Self::Replace,
            _ => return None,
        })
    }
}

/// Value type of a leaf, mapped from the DDF `DFFormat` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Integer,
    String,
    Base64,
    Binary,
}

impl DataType {
    /// Map a DDF format tag. `None` for tags that have no mapping.
    pub fn from_ddf(tag: &str) -> Option<Self> {
        Some(match tag {
            "bool" => Self::Boolean,
            "int" => Self::Integer,
            "chr" => Self::String,
            "b64" => Self::Base64,
            "bin" => Self::Binary,
            _ => return None,
        })
    }

    /// `Meta/Format` value used on the wire.
    pub fn syncml_format(self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Integer => "int",
            Self::String => "chr",
            Self::Base64 => "b64",
            Self::Binary => "bin",
        }
    }

    /// Rust type carried by generated enum variants.
    pub fn rust_type(self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Integer => "u64",
            Self::String | Self::Base64 => "String",
            Self::Binary => "Vec<u8>",
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            Self::Boolean => matches!(value, "true" | "false"),
            Self::Integer => value.parse::<u64>().is_ok(),
            Self::String => true,
            Self::Base64 | Self::Binary => base64::engine::general_purpose::STANDARD
                .decode(value)
                .is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Device,
    User,
}

impl Scope {
    pub fn of_uri(uri: &str) -> Self {
        if uri == "./Device" || uri.starts_with("./Device/") {
            Self::Device
        } else {
            Self::User
        }
    }
}

/// One manageable setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Full OMA-URI. Dynamic segments are written as `{Name}`.
    pub uri: String,
    pub access: BTreeSet<AccessType>,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub scope: Scope,
}

impl SchemaEntry {
    pub fn permits(&self, op: AccessType) -> bool {
        self.access.contains(&op)
    }

    /// Check that `op` is permitted and `value` parses as this entry's type.
    pub fn validate(&self, op: AccessType, value: &str) -> Result<(), SchemaError> {
        if !self.permits(op) {
            return Err(SchemaError::OperationNotPermitted {
                uri: self.uri.clone(),
                op,
            });
        }
        if !self.data_type.accepts(value) {
            return Err(SchemaError::InvalidValue {
                uri: self.uri.clone(),
                expected: self.data_type.syncml_format(),
            });
        }
        Ok(())
    }

    /// Whether a concrete URI addresses this entry, treating `{..}` segments as wildcards.
    pub fn matches(&self, uri: &str) -> bool {
        let mut pattern = self.uri.split('/');
        let mut concrete = uri.split('/');
        loop {
            match (pattern.next(), concrete.next()) {
                (None, None) => return true,
                (Some(p), Some(c)) if p == c => {}
                (Some(p), Some(c)) if p.starts_with('{') && p.ends_with('}') && !c.is_empty() => {}
                _ => return false,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub entries: Vec<SchemaEntry>,
}

/// Compiled schema, as written by `ddf-compile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub generated_at: Option<String>,
    pub sections: Vec<Section>,
}

impl Schema {
    pub fn load(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.sections.iter().flat_map(|s| s.entries.iter())
    }

    /// Find the entry for `uri`. Exact matches win over dynamic ones.
    pub fn lookup(&self, uri: &str) -> Option<&SchemaEntry> {
        self.entries()
            .find(|e| e.uri == uri)
            .or_else(|| self.entries().find(|e| e.matches(uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uri: &str, access: &[AccessType], data_type: DataType) -> SchemaEntry {
        SchemaEntry {
            uri: uri.to_string(),
            access: access.iter().copied().collect(),
            data_type,
            default_value: None,
            description: None,
            scope: Scope::of_uri(uri),
        }
    }

    fn schema() -> Schema {
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
                        &[AccessType::Add],
                        DataType::String,
                    ),
                ],
            }],
        }
    }

    #[test]
    fn test_lookup_exact_and_dynamic() {
        let schema = schema();
        assert!(schema
            .lookup("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera")
            .is_some());

        let vpn = schema.lookup("./Vendor/MSFT/VPNv2/Corp/ProfileXML").unwrap();
        assert_eq!(vpn.scope, Scope::User);
        assert!(schema.lookup("./Vendor/MSFT/VPNv2/Corp").is_none());
        assert!(schema.lookup("./Device/Vendor/MSFT/Policy").is_none());
    }

    #[test]
    fn test_validate() {
        let schema = schema();
        let camera = schema
            .lookup("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera")
            .unwrap();

        camera.validate(AccessType::Replace, "1").unwrap();
        assert!(matches!(
            camera.validate(AccessType::Replace, "yes"),
            Err(SchemaError::InvalidValue { expected: "int", .. })
        ));
        assert!(matches!(
            camera.validate(AccessType::Add, "1"),
            Err(SchemaError::OperationNotPermitted { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_lookup() {
        let json = schema().to_json().unwrap();
        assert!(json.contains("\"data_type\": \"integer\""));

        let loaded = Schema::load(&json).unwrap();
        assert_eq!(loaded, schema());
    }
}
