use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// maximum element depth the walker descends to, defaults to 10000
    pub max_depth: usize,
    /// relationship type used when no definition matches, defaults to "contains"
    pub default_relationship: String,
    /// external fetch config
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// whether the walk waits for fetch tools
    pub mode: FetchMode,
    /// request timeout in milliseconds
    pub timeout_ms: u64,
    /// capacity of the run-scoped api data cache
    pub api_cache_capacity: usize,
    /// provider name -> url template, merged over the built-in providers
    pub providers: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FetchMode {
    /// Await each fetch before running downstream steps.
    #[default]
    Await,
    /// Spawn the fetch and keep walking; results land in the api data cache later.
    Detached,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: 10_000,
            default_relationship: "contains".to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::default(),
            timeout_ms: 10_000,
            api_cache_capacity: 1024,
            providers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use crate::{Config, FetchMode};

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        max_depth = 64
        default_relationship = "HAS_PART"

        [fetch]
        mode = "detached"
        timeout_ms = 2500

        [fetch.providers]
        local = "http://localhost:9000/entity/{id}"
        "#;
        let config = Config::load_from_str(toml_str).unwrap();
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.default_relationship, "HAS_PART");
        assert_eq!(config.fetch.mode, FetchMode::Detached);
        assert_eq!(config.fetch.timeout_ms, 2500);
        assert_eq!(config.fetch.api_cache_capacity, 1024);
        assert_eq!(config.fetch.providers.get("local").unwrap(), "http://localhost:9000/entity/{id}");
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config.max_depth, 10_000);
        assert_eq!(config.default_relationship, "contains");
        assert_eq!(config.fetch.mode, FetchMode::Await);
    }

    #[test]
    fn test_config_invalid_toml() {
        assert!(Config::load_from_str("max_depth = \"deep\"").is_err());
    }
}
