//! Registered resources (games or packages) and their registration input.

use crate::error::{RegistryError, RegistryResult};
use crate::types::{current_timestamp, ResourceId, MAX_RESOURCE_ID_LEN};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a resource.
///
/// `Active` is only ever observed while the registry holds a running instance
/// for the resource; `Removed` only on records handed out by `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Registered,
    Active,
    Stopped,
    Removed,
}

/// Registration input for a resource.
///
/// Only `name` is required. This is also the on-disk representation written
/// by the storage collaborator, so field names follow the game manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<usize>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,
}

impl ResourceSpec {
    /// Shorthand for a spec with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<ResourceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = Some(max_players);
        self
    }
}

/// A registered, named, versioned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub category: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub max_players: Option<usize>,
    pub settings: serde_json::Value,
    pub status: ResourceStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Resource {
    /// Validates `spec` and builds a freshly registered resource from it.
    ///
    /// A missing id is generated; missing optional fields get their defaults.
    pub fn from_spec(spec: ResourceSpec) -> RegistryResult<Self> {
        let name = spec
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RegistryError::Validation("resource name is required".to_string()))?;

        if spec.max_players == Some(0) {
            return Err(RegistryError::Validation(
                "maxPlayers must be greater than zero".to_string(),
            ));
        }

        let id = match spec.id {
            Some(id) if !id.is_path_safe() => {
                return Err(RegistryError::Validation(format!(
                    "invalid resource id '{id}': use 1-{MAX_RESOURCE_ID_LEN} letters, digits, '-' or '_'"
                )))
            }
            Some(id) => id,
            None => ResourceId::generate(),
        };

        let now = current_timestamp();
        Ok(Self {
            id,
            name,
            version: spec.version.unwrap_or_else(|| "1.0.0".to_string()),
            description: spec.description.unwrap_or_default(),
            author: spec.author.unwrap_or_else(|| "Unknown".to_string()),
            category: spec.category.unwrap_or_else(|| "Other".to_string()),
            tags: spec.tags,
            dependencies: spec.dependencies,
            max_players: spec.max_players,
            settings: spec.settings,
            status: ResourceStatus::Registered,
            created_at: now,
            updated_at: now,
        })
    }

    /// The spec this resource persists as.
    pub fn to_spec(&self) -> ResourceSpec {
        ResourceSpec {
            id: Some(self.id.clone()),
            name: Some(self.name.clone()),
            version: Some(self.version.clone()),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            author: Some(self.author.clone()),
            category: Some(self.category.clone()),
            tags: self.tags.clone(),
            dependencies: self.dependencies.clone(),
            max_players: self.max_players,
            settings: self.settings.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }

    pub(crate) fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at = current_timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_spec() {
        let resource = Resource::from_spec(ResourceSpec::named("Arena1")).unwrap();
        assert_eq!(resource.name, "Arena1");
        assert_eq!(resource.version, "1.0.0");
        assert_eq!(resource.author, "Unknown");
        assert_eq!(resource.category, "Other");
        assert_eq!(resource.status, ResourceStatus::Registered);
        assert!(!resource.id.as_str().is_empty());
    }

    #[test]
    fn test_name_is_required() {
        assert!(matches!(
            Resource::from_spec(ResourceSpec::default()),
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            Resource::from_spec(ResourceSpec::named("  ")),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_max_players_rejected() {
        let spec = ResourceSpec::named("Empty").with_max_players(0);
        assert!(matches!(
            Resource::from_spec(spec),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn test_spec_accepts_camel_case_manifest() {
        let spec: ResourceSpec = serde_json::from_value(serde_json::json!({
            "name": "Arena1",
            "maxPlayers": 2,
            "tags": ["pvp"],
            "settings": { "gravity": 9.8 }
        }))
        .unwrap();

        let resource = Resource::from_spec(spec).unwrap();
        assert_eq!(resource.max_players, Some(2));
        assert_eq!(resource.tags, vec!["pvp".to_string()]);
        assert_eq!(resource.settings["gravity"], 9.8);
    }

    #[test]
    fn test_ids_must_be_single_path_segment() {
        for id in ["../victim", "..", ".", "/etc", "a/b", "a\\b", "", "with space", "C:"] {
            let result = Resource::from_spec(ResourceSpec::named("Bad").with_id(id));
            assert!(
                matches!(result, Err(RegistryError::Validation(_))),
                "accepted {id:?}"
            );
        }

        let long = "x".repeat(MAX_RESOURCE_ID_LEN + 1);
        assert!(Resource::from_spec(ResourceSpec::named("Long").with_id(long)).is_err());

        for id in ["arena-1", "Game_2", "x"] {
            assert!(Resource::from_spec(ResourceSpec::named("Ok").with_id(id)).is_ok());
        }
        let generated = Resource::from_spec(ResourceSpec::named("Generated")).unwrap();
        assert!(generated.id.is_path_safe());
    }

    #[test]
    fn test_explicit_id_kept() {
        let resource = Resource::from_spec(ResourceSpec::named("Arena1").with_id("arena-1")).unwrap();
        assert_eq!(resource.id, ResourceId::from("arena-1"));
        assert_eq!(resource.to_spec().id, Some(ResourceId::from("arena-1")));
    }
}
