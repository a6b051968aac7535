use std::path::Path as FsPath;

use arbor_cache::CachePolicy;
use arbor_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration of one repository source.
///
/// Every key is optional in TOML; omitted keys take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Name under which the source is registered.
    pub source_name: String,
    /// Identifier given to the root node of every workspace.
    pub root_node_id: NodeId,
    /// Workspace used by requests that do not name one.
    pub default_workspace: String,
    /// Workspaces created when the repository opens.
    pub predefined_workspaces: Vec<String>,
    /// Whether requests may create or clone workspaces.
    pub creating_workspaces_allowed: bool,
    /// When `false`, every mutating request is rejected.
    pub updates_allowed: bool,
    /// Whether each workspace keeps a location cache.
    pub use_location_cache: bool,
    /// Policy stamped onto read results, if any.
    pub default_cache_policy: Option<CachePolicy>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            source_name: "arbor".into(),
            root_node_id: NodeId::new(),
            default_workspace: "default".into(),
            predefined_workspaces: Vec::new(),
            creating_workspaces_allowed: true,
            updates_allowed: true,
            use_location_cache: true,
            default_cache_policy: None,
        }
    }
}

impl RepositoryConfig {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    /// A source that serves reads only.
    pub fn read_only(source_name: impl Into<String>) -> Self {
        Self {
            updates_allowed: false,
            creating_workspaces_allowed: false,
            ..Self::new(source_name)
        }
    }

    pub fn with_root_node_id(mut self, id: NodeId) -> Self {
        self.root_node_id = id;
        self
    }

    pub fn with_default_workspace(mut self, name: impl Into<String>) -> Self {
        self.default_workspace = name.into();
        self
    }

    pub fn with_predefined_workspaces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predefined_workspaces = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.default_cache_policy = Some(policy);
        self
    }

    pub fn with_location_cache(mut self, enabled: bool) -> Self {
        self.use_location_cache = enabled;
        self
    }

    pub fn with_updates_allowed(mut self, allowed: bool) -> Self {
        self.updates_allowed = allowed;
        self
    }

    pub fn with_creating_workspaces_allowed(mut self, allowed: bool) -> Self {
        self.creating_workspaces_allowed = allowed;
        self
    }

    /// Check the settings that cannot be expressed in types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_name.trim().is_empty() {
            return Err(ConfigError::Invalid("source_name must not be empty".into()));
        }
        if self.default_workspace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_workspace must not be empty".into(),
            ));
        }
        if let Some(name) = self
            .predefined_workspaces
            .iter()
            .find(|name| name.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "predefined workspace name {name:?} is empty"
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Every workspace opened at startup, default first, without duplicates.
    pub fn initial_workspaces(&self) -> Vec<String> {
        let mut names = vec![self.default_workspace.clone()];
        for name in &self.predefined_workspaces {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let c = RepositoryConfig::default();
        assert_eq!(c.source_name, "arbor");
        assert_eq!(c.default_workspace, "default");
        assert!(c.predefined_workspaces.is_empty());
        assert!(c.creating_workspaces_allowed);
        assert!(c.updates_allowed);
        assert!(c.default_cache_policy.is_none());
        assert!(c.use_location_cache);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn read_only_config() {
        let c = RepositoryConfig::read_only("archive");
        assert_eq!(c.source_name, "archive");
        assert!(!c.updates_allowed);
        assert!(!c.creating_workspaces_allowed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c = RepositoryConfig::from_toml_str(
            r#"
            source_name = "content"
            predefined_workspaces = ["staging", "default"]

            [default_cache_policy]
            time_to_live_secs = 300
            "#,
        )
        .unwrap();
        assert_eq!(c.source_name, "content");
        assert_eq!(c.default_workspace, "default");
        assert_eq!(
            c.default_cache_policy.unwrap().time_to_live(),
            Duration::from_secs(300)
        );
        assert_eq!(c.initial_workspaces(), vec!["default", "staging"]);
    }

    #[test]
    fn root_node_id_parses() {
        let id = NodeId::new();
        let c = RepositoryConfig::from_toml_str(&format!("root_node_id = \"{id}\"")).unwrap();
        assert_eq!(c.root_node_id, id);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            RepositoryConfig::from_toml_str("source_name = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RepositoryConfig::from_toml_str("updates_allowed = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_name = \"files\"").unwrap();
        writeln!(file, "use_location_cache = false").unwrap();
        let c = RepositoryConfig::load(file.path()).unwrap();
        assert_eq!(c.source_name, "files");
        assert!(!c.use_location_cache);

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RepositoryConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let c = RepositoryConfig::new("rt").with_cache_policy(CachePolicy::default());
        let text = toml::to_string(&c).unwrap();
        let back = RepositoryConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.source_name, "rt");
        assert_eq!(back.root_node_id, c.root_node_id);
        assert_eq!(back.default_cache_policy, c.default_cache_policy);
    }
}
