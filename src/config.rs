//! Engine configuration.
//!
//! Handles loading, validating, and merging `commitgen.toml`. Hook scripts
//! pass the file with `--config`; a missing file means stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! cache_root = "/var/www/site"    # Generated artifact tree (served directory)
//! repository = "/var/svn/site"    # Repository path handed to svnlook
//! repository_dir = "/trunk"       # Content subtree inside the repository
//! reserved_prefix = "/commitgen"  # Commits at or below this path are rejected
//! svn_lang = "en_US"              # LANG for svnlook subprocesses
//! cycle_limit = 2                 # Regenerations per drain before a source is ignored
//! log_level = "info"              # Default log filter (RUST_LOG overrides)
//! # log_file = "/var/log/commitgen.log"  # Append logs here instead of stderr
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! cache_root = "/srv/www/example.org"
//! repository = "/srv/svn/example.org"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `commitgen.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root of the generated artifact tree. Edge, queue and auto-delete
    /// files live inside it next to the objects they describe.
    pub cache_root: PathBuf,
    /// Filesystem path of the repository.
    pub repository: PathBuf,
    /// Content subtree inside the repository. Empty for the repository
    /// root, otherwise starts with `/` and has no trailing slash.
    pub repository_dir: String,
    /// Commits touching this path or anything below it are rejected.
    pub reserved_prefix: String,
    /// Locale for Subversion subprocesses.
    pub svn_lang: String,
    /// A source stops triggering regeneration once it has been regenerated
    /// more than this many times in one drain.
    pub cycle_limit: u32,
    /// Default `tracing` filter directive.
    pub log_level: String,
    /// Optional log file; logs go to stderr when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/www/site"),
            repository: PathBuf::from("/var/svn/site"),
            repository_dir: "/trunk".to_string(),
            reserved_prefix: "/commitgen".to_string(),
            svn_lang: "en_US".to_string(),
            cycle_limit: 2,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with a different artifact store; handy for tests.
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "cache_root must not be empty".into(),
            ));
        }
        if !self.repository_dir.is_empty()
            && (!self.repository_dir.starts_with('/') || self.repository_dir.ends_with('/'))
        {
            return Err(ConfigError::Validation(
                "repository_dir must be empty or start with '/' and not end with '/'".into(),
            ));
        }
        if !self.reserved_prefix.is_empty() && !self.reserved_prefix.starts_with('/') {
            return Err(ConfigError::Validation(
                "reserved_prefix must start with '/'".into(),
            ));
        }
        if self.cycle_limit == 0 {
            return Err(ConfigError::Validation(
                "cycle_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(EngineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EngineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, merged on top of stock defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `commitgen.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# commitgen configuration
# =======================
# All options are optional; the values below are the defaults.
# Unknown keys are rejected.

# Root of the generated artifact tree, usually the web server's document
# root. Dependency (*_private.depend), auto-delete (*_private.autodel) and
# queue (._private.dependqueue) files are kept inside it.
cache_root = "/var/www/site"

# Filesystem path of the Subversion repository. Must match the path the
# repository hooks are invoked with.
repository = "/var/svn/site"

# Location of the content inside the repository. A commit of
# /trunk/index.xhtml becomes /index.xhtml in cache_root. Must not end in a
# slash; use "" to publish the whole repository.
repository_dir = "/trunk"

# Commits at or below this path are rejected. Keep the installation here.
reserved_prefix = "/commitgen"

# LANG for svnlook. The locale must exist and use the charset Subversion
# should use for file names. Listings are parsed as English output.
svn_lang = "en_US"

# Dependency loops: once an artifact has been regenerated more than this
# many times in one run, changes to it no longer trigger its dependents.
cycle_limit = 2

# Default log filter, e.g. "debug" or "commitgen=debug". RUST_LOG wins.
log_level = "info"

# Append logs to a file instead of stderr. Pre-commit stderr is shown to
# the committing user when a commit is rejected.
# log_file = "/var/log/commitgen.log"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.repository_dir, "/trunk");
        assert_eq!(config.cycle_limit, 2);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_partial_config() {
        let config: EngineConfig = toml::from_str(r#"cache_root = "/srv/www""#).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/srv/www"));
        assert_eq!(config.repository_dir, "/trunk");
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str("cach_root = \"/x\"");
        assert!(result.is_err());
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        let config: EngineConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(config.cache_root, defaults.cache_root);
        assert_eq!(config.repository, defaults.repository);
        assert_eq!(config.reserved_prefix, defaults.reserved_prefix);
        assert_eq!(config.cycle_limit, defaults.cycle_limit);
    }

    #[test]
    fn merge_overlay_wins() {
        let base = stock_defaults_value();
        let overlay: toml::Value = toml::from_str("cycle_limit = 5").unwrap();
        let merged = merge_toml(base, overlay);
        let config: EngineConfig = merged.try_into().unwrap();
        assert_eq!(config.cycle_limit, 5);
        assert_eq!(config.svn_lang, "en_US");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("commitgen.toml")).unwrap();
        assert_eq!(config.repository_dir, "/trunk");
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("commitgen.toml");
        fs::write(
            &path,
            r#"
cache_root = "/srv/site"
repository_dir = ""
log_file = "/tmp/commitgen.log"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/srv/site"));
        assert_eq!(config.repository_dir, "");
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/commitgen.log")));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("commitgen.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn trailing_slash_in_repository_dir_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("commitgen.toml");
        fs::write(&path, r#"repository_dir = "/trunk/""#).unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn zero_cycle_limit_is_invalid() {
        let config = EngineConfig {
            cycle_limit: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
