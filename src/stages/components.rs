//! Component list handed to the deployer.
//!
//! Rendered as YAML with prerequisites split out from the regular components
//! and a default namespace for entries that do not name one.

use crate::constants::resources::DEFAULT_COMPONENT_NAMESPACE;
use serde::{Deserialize, Serialize};

/// One component as configured on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub component: String,
    #[serde(default)]
    pub namespace: String,
    /// Installed before all other components
    #[serde(default)]
    pub prerequisite: bool,
}

impl ComponentConfig {
    pub fn new(component: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            namespace: namespace.into(),
            prerequisite: false,
        }
    }

    pub fn as_prerequisite(mut self) -> Self {
        self.prerequisite = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentList {
    pub default_namespace: String,
    #[serde(default)]
    pub prerequisites: Vec<ComponentEntry>,
    #[serde(default)]
    pub components: Vec<ComponentEntry>,
}

impl ComponentList {
    pub fn from_components(configs: &[ComponentConfig]) -> Self {
        let (prerequisites, components): (Vec<_>, Vec<_>) =
            configs.iter().partition(|config| config.prerequisite);

        let entry = |config: &ComponentConfig| ComponentEntry {
            name: config.component.clone(),
            namespace: config.namespace.clone(),
        };

        Self {
            default_namespace: DEFAULT_COMPONENT_NAMESPACE.to_string(),
            prerequisites: prerequisites.into_iter().map(entry).collect(),
            components: components.into_iter().map(entry).collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn len(&self) -> usize {
        self.prerequisites.len() + self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
