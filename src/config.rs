//! Tunables loaded from `config.toml` next to the database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::{StageThresholds, MAX_THRESHOLD_DAYS};

const CONFIG_ENV: &str = "WOODSHED_CONFIG";
const DB_ENV: &str = "WOODSHED_DB";
const APP_DIR: &str = "woodshed";
const DEFAULT_DB_NAME: &str = "woodshed.db";
const DEFAULT_CONFIG_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Owner id stamped on pieces, plans and sessions.
    pub user: String,

    /// How long a request waits on a locked database before failing.
    pub busy_timeout_ms: u64,

    pub stages: StageThresholds,

    pub planning: PlanningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanningConfig {
    /// Infrequent spots practiced more recently than this are left out of new plans.
    pub recent_practice_hours: i64,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            recent_practice_hours: 25,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            busy_timeout_ms: 5_000,
            stages: StageThresholds::default(),
            planning: PlanningConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid("user must not be empty".into()));
        }
        let max_hours = MAX_THRESHOLD_DAYS * 24;
        if !(0..=max_hours).contains(&self.planning.recent_practice_hours) {
            return Err(ConfigError::Invalid(format!(
                "planning.recent_practice_hours must be between 0 and {}",
                max_hours
            )));
        }
        self.stages.validate().map_err(ConfigError::Invalid)
    }
}

/// Load config from a TOML file, or defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

fn app_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);

    std::fs::create_dir_all(&dir).ok();
    dir
}

pub fn db_path() -> PathBuf {
    if let Ok(path) = std::env::var(DB_ENV) {
        return PathBuf::from(path);
    }
    app_dir().join(DEFAULT_DB_NAME)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    app_dir().join(DEFAULT_CONFIG_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "user = \"ana\"\n[stages]\ninterleave_min_days = 3\n",
        )
        .unwrap();

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.user, "ana");
        assert_eq!(cfg.stages.interleave_min_days, 3);
        assert_eq!(
            cfg.stages.interleave_max_days,
            StageThresholds::default().interleave_max_days
        );
        assert_eq!(cfg.planning.recent_practice_hours, 25);
    }

    #[test]
    fn load_rejects_inverted_interleave_window() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[stages]\ninterleave_min_days = 9\ninterleave_max_days = 2\n",
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_rejects_oversized_thresholds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[stages]\ninterleave_max_days = 200000000000000\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("interleave_max_days")));

        fs::write(&path, "[planning]\nrecent_practice_hours = 9000000000000000\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reports_parse_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "user = [").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_user_is_invalid() {
        let cfg = Config {
            user: "  ".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn paths_honour_env_vars() {
        env::set_var(DB_ENV, "/tmp/test_woodshed.db");
        env::set_var(CONFIG_ENV, "/tmp/test_woodshed.toml");

        assert_eq!(db_path(), PathBuf::from("/tmp/test_woodshed.db"));
        assert_eq!(config_path(), PathBuf::from("/tmp/test_woodshed.toml"));

        env::remove_var(DB_ENV);
        env::remove_var(CONFIG_ENV);
    }
}
