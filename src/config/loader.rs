//! Configuration loader with tier-based merging.

use super::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "config.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    User = 2,
    Explicit = 3,
    Environment = 4,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Explicit => write!(f, "explicit"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        let user_dir = std::env::var("CONTEXT_STORE_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".context-store")));
        let project_dir = std::env::var("CONTEXT_STORE_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("context-store")));
        Self {
            project_dir,
            user_dir,
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn file_for(&self, tier: ConfigTier) -> Option<PathBuf> {
        let dir = match tier {
            ConfigTier::Project => self.project_dir.as_ref(),
            ConfigTier::User => self.user_dir.as_ref(),
            ConfigTier::Defaults | ConfigTier::Explicit | ConfigTier::Environment => None,
        }?;
        Some(dir.join(CONFIG_FILE))
    }
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: Config,
    sources: Vec<(ConfigTier, PathBuf)>,
}

impl ConfigLoader {
    /// Load configuration from all tiers, honoring `CONTEXT_STORE_CONFIG`.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("CONTEXT_STORE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(explicit.as_deref(), ConfigPaths::discover(), |key| {
            std::env::var(key).ok()
        })
    }

    /// Load with an optional explicit file, explicit tier paths and an
    /// environment lookup.
    ///
    /// Project then user `config.yaml` merge over the defaults; an explicit
    /// file merges last and must exist. Environment overrides apply on top.
    pub fn load_from<F>(explicit: Option<&Path>, paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = Vec::new();
        let mut merged = serde_json::to_value(Config::default())?;
        for tier in [ConfigTier::Project, ConfigTier::User] {
            let Some(file) = paths.file_for(tier).filter(|f| f.exists()) else {
                continue;
            };
            merged = deep_merge(merged, read_overlay(&file)?);
            debug!(tier = %tier, path = %file.display(), "Merged config file");
            sources.push((tier, file));
        }
        if let Some(file) = explicit {
            merged = deep_merge(merged, read_overlay(file)?);
            debug!(tier = %ConfigTier::Explicit, path = %file.display(), "Merged config file");
            sources.push((ConfigTier::Explicit, file.to_path_buf()));
        }
        let mut config: Config = serde_json::from_value(merged)?;

        config.apply_overrides(env);
        Ok(Self { config, sources })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Files that contributed, lowest tier first.
    pub fn sources(&self) -> &[(ConfigTier, PathBuf)] {
        &self.sources
    }
}

fn read_overlay(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let overlay: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(overlay)
}

/// Deep merge two JSON values, with `overlay` taking precedence.
///
/// Objects merge key by key; anything else is replaced. A null overlay
/// keeps the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}
