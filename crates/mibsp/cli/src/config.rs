//! CLI configuration

use crate::error::{CliError, CliResult};
use mibsp_ledger::{Checkpoint, LedgerConfig, TrackingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// PostgreSQL connection string
    pub database_url: Option<String>,

    /// Pool size for the ledger database
    pub max_connections: Option<u32>,

    /// Where `verify` pins the last intact checkpoint
    pub checkpoint_path: Option<PathBuf>,

    pub ledger: LedgerConfig,

    pub tracking: TrackingConfig,
}

impl CliConfig {
    /// Load configuration from `path`, or the per-user default location.
    /// A missing file yields defaults.
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: CliConfig =
                toml::from_str(&contents).map_err(|e| CliError::Config(e.to_string()))?;
            Ok(config)
        } else {
            Ok(CliConfig::default())
        }
    }

    pub fn checkpoint_path(&self) -> CliResult<PathBuf> {
        match &self.checkpoint_path {
            Some(path) => Ok(path.clone()),
            None => {
                let data_dir = dirs::data_dir()
                    .ok_or_else(|| CliError::Config("Cannot find data directory".into()))?;
                Ok(data_dir.join("mibsp").join("checkpoint.json"))
            }
        }
    }

    fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("Cannot find config directory".into()))?;
        Ok(config_dir.join("mibsp").join("config.toml"))
    }
}

/// Read a pinned checkpoint, if one has been written.
pub fn load_checkpoint(path: &Path) -> CliResult<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(checkpoint)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mibsp_types::LinkHash;

    #[test]
    fn test_load_missing_config() {
        let config = CliConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
database_url = "postgres://mibsp@localhost/mibsp"
checkpoint_path = "/var/lib/mibsp/checkpoint.json"

[ledger]
verify_page_size = 1000

[tracking]
max_attempts = 8
"#,
        )
        .unwrap();

        let config = CliConfig::load(path.to_str()).unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://mibsp@localhost/mibsp")
        );
        assert_eq!(config.ledger.verify_page_size, 1000);
        assert_eq!(config.ledger.max_detail_bytes, 4096);
        assert_eq!(config.tracking.max_attempts, 8);
        assert_eq!(
            config.checkpoint_path().unwrap(),
            PathBuf::from("/var/lib/mibsp/checkpoint.json")
        );
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_url = [").unwrap();
        assert!(matches!(
            CliConfig::load(path.to_str()),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint.json");
        assert!(load_checkpoint(&path).unwrap().is_none());

        let checkpoint = Checkpoint {
            sequence: 42,
            link_hash: LinkHash::from_bytes([7; 32]),
            verified_at: Utc::now(),
        };
        save_checkpoint(&path, &checkpoint).unwrap();
        assert_eq!(load_checkpoint(&path).unwrap(), Some(checkpoint));
    }
}
