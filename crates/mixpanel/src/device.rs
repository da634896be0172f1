//! Static device and application metadata.

use crate::types::Properties;
use serde_json::Value;

/// Library name reported with every message.
pub const LIBRARY_NAME: &str = "rust";

/// Metadata describing the device and application, supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub os: String,
    pub os_version: String,
    pub app_version: String,
    pub device_name: String,
    pub model: String,
    /// Stable device identifier. When absent one is generated and persisted.
    pub device_id: Option<String>,
}

impl DeviceInfo {
    /// Metadata known at build time for the current target.
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            ..Self::default()
        }
    }

    /// Set the OS version.
    pub fn os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = version.into();
        self
    }

    /// Set the application version.
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Set the device name.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the device model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the device identifier.
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Referrer properties for this device. Empty values are omitted.
    pub(crate) fn referrer_properties(&self, device_id: &str) -> Properties {
        let mut properties = Properties::new();
        properties.insert("mp_lib".into(), Value::from(LIBRARY_NAME));

        let fields = [
            ("$os", self.os.as_str()),
            ("$os_version", self.os_version.as_str()),
            ("$app_version", self.app_version.as_str()),
            ("Device name", self.device_name.as_str()),
            ("$model", self.model.as_str()),
            ("$device_id", device_id),
        ];
        for (key, value) in fields {
            if !value.is_empty() {
                properties.insert(key.into(), Value::from(value));
            }
        }

        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referrer_properties_skip_empty_fields() {
        let device = DeviceInfo::current().app_version("1.2.0").model("Q10");
        let properties = device.referrer_properties("dev-1");

        assert_eq!(properties["mp_lib"], "rust");
        assert_eq!(properties["$os"], std::env::consts::OS);
        assert_eq!(properties["$app_version"], "1.2.0");
        assert_eq!(properties["$model"], "Q10");
        assert_eq!(properties["$device_id"], "dev-1");
        assert!(!properties.contains_key("$os_version"));
        assert!(!properties.contains_key("Device name"));
    }
}
