//! Enrollment scope and the device-supplied enrollment context.

/// Scope of a Windows enrollment.
///
/// Selects which certificate store the issued client certificate is installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EnrollType {
    /// Device-wide enrollment (`EnrollmentType` = `Device`), store `My\Device`.
    Device,
    /// User-scoped enrollment (`EnrollmentType` = `Full`), store `My\User`.
    User,
}

impl EnrollType {
    /// Resolve from the `EnrollmentType` context item.
    ///
    /// Anything other than `Device` (including a missing item) is a user enrollment.
    pub fn from_context(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("Device") => Self::Device,
            _ => Self::User,
        }
    }

    /// Name of the `My` certificate store sub-node.
    pub fn cert_store(&self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::User => "User",
        }
    }
}

impl std::fmt::Display for EnrollType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cert_store())
    }
}

/// A single `ac:ContextItem` from the enrollment request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextItem {
    pub name: String,
    pub value: String,
}

/// The `ac:AdditionalContext` block describing the enrolling device.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnrollmentContext {
    pub items: Vec<ContextItem>,
}

impl EnrollmentContext {
    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.value.as_str())
    }

    /// All values for `name`, in document order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.items
            .iter()
            .filter(move |i| i.name == name)
            .map(|i| i.value.as_str())
    }

    /// Device identifier reported by the client.
    pub fn device_id(&self) -> Option<&str> {
        self.get("DeviceID").filter(|v| !v.is_empty())
    }

    pub fn enroll_type(&self) -> EnrollType {
        EnrollType::from_context(self.get("EnrollmentType"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(items: &[(&str, &str)]) -> EnrollmentContext {
        EnrollmentContext {
            items: items
                .iter()
                .map(|(n, v)| ContextItem {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_device_enrollment() {
        let c = ctx(&[("EnrollmentType", "Device"), ("DeviceID", "ABC123")]);
        assert_eq!(c.enroll_type(), EnrollType::Device);
        assert_eq!(c.enroll_type().cert_store(), "Device");
        assert_eq!(c.device_id(), Some("ABC123"));
    }

    #[test]
    fn test_full_and_missing_type_are_user_scoped() {
        assert_eq!(ctx(&[("EnrollmentType", "Full")]).enroll_type(), EnrollType::User);
        assert_eq!(ctx(&[]).enroll_type(), EnrollType::User);
        assert_eq!(ctx(&[("DeviceID", "")]).device_id(), None);
    }

    #[test]
    fn test_repeated_items() {
        let c = ctx(&[("HWDevID", "a"), ("HWDevID", "b")]);
        assert_eq!(c.get_all("HWDevID").collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
