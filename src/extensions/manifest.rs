//! `manifest.json` schema and validation for installable extensions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPermission {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub storage: bool,
    #[serde(default)]
    pub network: Vec<NetworkPermission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributionPoints {
    #[serde(default)]
    pub sidebar_panels: Vec<Value>,
    #[serde(default)]
    pub dashboard_widgets: Vec<Value>,
    #[serde(default)]
    pub run_actions: Vec<Value>,
    #[serde(default)]
    pub node_actions: Vec<Value>,
    #[serde(default)]
    pub context_menus: Vec<Value>,
    #[serde(default)]
    pub settings_panels: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub backend_entry: Option<String>,
    #[serde(default)]
    pub frontend_entry: Option<String>,
    #[serde(default)]
    pub contributes: ContributionPoints,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub activation_events: Vec<String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

impl ExtensionManifest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 100 {
            return Err("name must be 1-100 characters".into());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(
                "name must contain only alphanumeric characters, underscores, and hyphens".into(),
            );
        }
        if self.version.is_empty() || self.version.len() > 50 {
            return Err("version must be 1-50 characters".into());
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(format!("version '{}' is not valid semver", self.version));
        }
        if self.backend_entry.is_none() && self.frontend_entry.is_none() {
            return Err("at least one of backend_entry or frontend_entry is required".into());
        }
        if let Some(entry) = &self.backend_entry {
            if !entry.contains(':') {
                return Err("backend_entry must be of the form 'module:function'".into());
            }
        }
        for perm in &self.permissions.network {
            if url::Url::parse(&perm.url).is_err() && !perm.url.contains('*') {
                return Err(format!("invalid network permission url: '{}'", perm.url));
            }
        }
        Ok(())
    }

    /// The directory name this package is installed under: `<name>@<version>`.
    pub fn install_dir_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ExtensionManifest {
        ExtensionManifest {
            name: "my-ext".to_string(),
            version: "1.0.0".to_string(),
            description: Some("desc".to_string()),
            author: Some("someone".to_string()),
            backend_entry: Some("handlers:register".to_string()),
            frontend_entry: None,
            contributes: ContributionPoints::default(),
            permissions: Permissions::default(),
            activation_events: vec![],
            dependencies: HashMap::new(),
        }
    }

    #[test]
    fn valid_manifest_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn requires_backend_or_frontend_entry() {
        let mut m = valid();
        m.backend_entry = None;
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_non_semver_version() {
        let mut m = valid();
        m.version = "latest".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn install_dir_name_joins_name_and_version() {
        assert_eq!(valid().install_dir_name(), "my-ext@1.0.0");
    }
}
