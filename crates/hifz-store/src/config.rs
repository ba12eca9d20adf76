//! Data directory layout and engine configuration loading.
//!
//! Everything lives under one directory: `hifz.db` for state and an
//! optional `hifz.toml` overriding engine parameters. The directory is
//! `$HIFZ_DATA_DIR` when set, `~/.hifz` otherwise.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hifz_core::EngineConfig;

use crate::error::{Result, StoreError};

pub const DB_FILE: &str = "hifz.db";
pub const CONFIG_FILE: &str = "hifz.toml";
pub const DATA_DIR_ENV: &str = "HIFZ_DATA_DIR";

pub fn default_data_dir() -> PathBuf {
    match env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => dirs_home().join(".hifz"),
    }
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Create the data directory if needed. Failure means the store is
/// unreachable, not that the data is bad.
pub fn ensure_data_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        StoreError::Unavailable(format!("cannot create {}: {e}", dir.display()))
    })
}

/// Parse engine parameters from TOML. Missing keys keep their defaults.
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| StoreError::InvalidData(e.to_string()))?;
    config
        .validate()
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
    Ok(config)
}

/// Load `hifz.toml` from `path`, falling back to defaults when absent.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::debug!("no config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| StoreError::Unavailable(format!("cannot read {}: {e}", path.display())))?;
    let config = parse_config(&content)?;
    tracing::info!("loaded engine config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.total_verses, EngineConfig::default().total_verses);
    }

    #[test]
    fn test_partial_override() {
        let config = parse_config(
            r#"
            [queue]
            max_new_per_day = 3

            [gates]
            weekly_sample_size = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_new_per_day, 3);
        assert_eq!(config.gates.weekly_sample_size, 5);
        assert_eq!(config.review, EngineConfig::default().review);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("total_verses = 0").unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
        let err = parse_config("total_verses = \"many\"").unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[streak]\nqualifying_recalls = 2\n").unwrap();
        assert_eq!(load_config(&path).unwrap().streak.qualifying_recalls, 2);
    }
}
