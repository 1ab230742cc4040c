use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::category_graph::{CachePolicy, DEFAULT_SAVE_INTERVAL};
use crate::license::LicenseInference;

pub const DEFAULT_CONFIG_PATH: &str = ".wikicurate/config.toml";
pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikicurate/0.1";
pub const DEFAULT_CATEGORY_CACHE: &str = ".wikicurate/category-graph.txt";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CurateConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub license: LicenseSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub category_graph: Option<String>,
    pub save_interval: Option<usize>,
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LicenseSection {
    pub current_year: Option<i32>,
}

impl CurateConfig {
    /// env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// env WIKICURATE_CATEGORY_CACHE > config > DEFAULT_CATEGORY_CACHE.
    pub fn category_cache_path(&self) -> PathBuf {
        env_override("WIKICURATE_CATEGORY_CACHE")
            .or_else(|| self.cache.category_graph.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CATEGORY_CACHE))
    }

    pub fn save_interval(&self) -> usize {
        self.cache.save_interval.unwrap_or(DEFAULT_SAVE_INTERVAL)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        match self.cache.capacity {
            Some(capacity) => CachePolicy::Lru { capacity },
            None => CachePolicy::Unbounded,
        }
    }

    pub fn license_inference(&self) -> LicenseInference {
        match self.license.current_year {
            Some(year) => LicenseInference::new(year),
            None => LicenseInference::default(),
        }
    }
}

/// Load and parse a CurateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CurateConfig> {
    if !config_path.exists() {
        return Ok(CurateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CurateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;

    if parsed.cache.capacity == Some(0) {
        bail!(
            "cache.capacity must be positive in {}",
            config_path.display()
        );
    }
    if parsed.cache.save_interval == Some(0) {
        bail!(
            "cache.save_interval must be positive in {}",
            config_path.display()
        );
    }
    Ok(parsed)
}

fn env_override(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, CurateConfig::default());
        assert_eq!(config.cache_policy(), CachePolicy::Unbounded);
        assert_eq!(config.save_interval(), DEFAULT_SAVE_INTERVAL);
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://wiki.example.org/w/api.php"
user_agent = "test-agent/1.0"

[cache]
category_graph = "cache/graph.txt"
save_interval = 10
capacity = 500

[license]
current_year = 2020
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://wiki.example.org/w/api.php")
        );
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.cache.category_graph.as_deref(), Some("cache/graph.txt"));
        assert_eq!(config.save_interval(), 10);
        assert_eq!(config.cache_policy(), CachePolicy::Lru { capacity: 500 });
        assert_eq!(config.license_inference().current_year(), 2020);
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[license]\ncurrent_year = 2030\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.api_url.is_none());
        assert!(config.cache.capacity.is_none());
        assert_eq!(config.license.current_year, Some(2030));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\napi_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn load_config_rejects_zero_capacity() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[cache]\ncapacity = 0\n").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("cache.capacity"));
    }

    #[test]
    fn configured_values_fill_in_when_env_is_unset() {
        let config = CurateConfig {
            cache: CacheSection {
                category_graph: Some("graph.txt".to_string()),
                ..CacheSection::default()
            },
            ..CurateConfig::default()
        };
        if env::var_os("WIKICURATE_CATEGORY_CACHE").is_none() {
            assert_eq!(config.category_cache_path(), PathBuf::from("graph.txt"));
        }
        if env::var_os("WIKI_USER_AGENT").is_none() {
            assert_eq!(CurateConfig::default().user_agent(), DEFAULT_USER_AGENT);
        }
    }
}
