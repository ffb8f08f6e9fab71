//! Rust code generation from a compiled schema.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::schema::{Schema, SchemaEntry};

const VENDOR_PREFIXES: &[&str] = &["./Device/Vendor/MSFT/", "./User/Vendor/MSFT/", "./Vendor/MSFT/"];

/// Render a `Setting` enum with one variant per schema entry.
pub fn render_enum(schema: &Schema) -> String {
    let mut used = HashSet::new();
    let variants: Vec<(String, &SchemaEntry)> = schema
        .entries()
        .map(|entry| (unique_name(entry, &mut used), entry))
        .collect();

    let mut out = String::new();
    out.push_str("// @generated by ddf-compile. Do not edit.\n\n");
    out.push_str("#[derive(Debug, Clone, PartialEq)]\n");
    out.push_str("pub enum Setting {\n");
    for (name, entry) in &variants {
        let _ = writeln!(out, "    /// `{}`", entry.uri);
        let _ = writeln!(out, "    {name}({}),", entry.data_type.rust_type());
    }
    out.push_str("}\n\n");

    out.push_str("impl Setting {\n");
    out.push_str("    pub fn uri(&self) -> &'static str {\n");
    out.push_str("        match *self {\n");
    for (name, entry) in &variants {
        let _ = writeln!(out, "            Self::{name}(_) => {:?},", entry.uri);
    }
    out.push_str("        }\n    }\n}\n");
    out
}

fn unique_name(entry: &SchemaEntry, used: &mut HashSet<String>) -> String {
    let base = variant_name(&entry.uri);
    let mut name = base.clone();
    let mut n = 2;
    while !used.insert(name.clone()) {
        name = format!("{base}{n}");
        n += 1;
    }
    name
}

/// PascalCase identifier from the URI segments after the vendor root.
fn variant_name(uri: &str) -> String {
    let trimmed = VENDOR_PREFIXES
        .iter()
        .find_map(|p| uri.strip_prefix(p))
        .unwrap_or(uri);

    let mut name = String::new();
    for segment in trimmed.split('/') {
        let mut upper = true;
        for c in segment.chars() {
            if c.is_ascii_alphanumeric() {
                if upper {
                    name.extend(c.to_uppercase());
                } else {
                    name.push(c);
                }
                upper = false;
            } else {
                upper = true;
            }
        }
    }

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'N');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccessType, DataType, Scope, Section};

    fn entry(uri: &str, data_type: DataType) -> SchemaEntry {
        SchemaEntry {
            uri: uri.to_string(),
            access: [AccessType::Replace].into(),
            data_type,
            default_value: None,
            description: None,
            scope: Scope::of_uri(uri),
        }
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(
            variant_name("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera"),
            "PolicyConfigCameraAllowCamera"
        );
        assert_eq!(
            variant_name("./Vendor/MSFT/VPNv2/{ProfileName}/ProfileXML"),
            "VPNv2ProfileNameProfileXML"
        );
        assert_eq!(variant_name("./Device/Vendor/MSFT/Foo/device-name"), "FooDeviceName");
    }

    #[test]
    fn test_render_enum() {
        let schema = Schema {
            generated_at: None,
            sections: vec![Section {
                name: "Policy".into(),
                entries: vec![
                    entry("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera", DataType::Integer),
                    entry("./User/Vendor/MSFT/Policy/Config/Camera/AllowCamera", DataType::Integer),
                    entry("./Device/Vendor/MSFT/Policy/Config/Wifi/Profile", DataType::Binary),
                ],
            }],
        };

        let code = render_enum(&schema);
        assert!(code.contains("    PolicyConfigCameraAllowCamera(u64),\n"));
        assert!(code.contains("    PolicyConfigCameraAllowCamera2(u64),\n"));
        assert!(code.contains("    PolicyConfigWifiProfile(Vec<u8>),\n"));
        assert!(code.contains(
            "Self::PolicyConfigCameraAllowCamera2(_) => \"./User/Vendor/MSFT/Policy/Config/Camera/AllowCamera\","
        ));
    }
}
