use crate::error::{Result, SchemaDbError};
use crate::ids::IdStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BUFFER_SIZE: usize = 8;

/// Options recognized when a database is created or loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Directory holding `<name>.json` snapshots and their `.old` backups
    pub data_dir: PathBuf,
    /// Save after every successful mutation
    pub autosave: bool,
    /// Identifier look-ahead size
    pub buffer_size: usize,
    pub id_strategy: IdStrategy,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            data_dir: PathBuf::from("./data"),
            autosave: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            id_strategy: IdStrategy::default(),
        }
    }
}

/// Options chosen at creation and stored with the snapshot, so a database
/// reopened by name keeps its identifier format and autosave mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbSettings {
    pub autosave: bool,
    pub buffer_size: usize,
    pub id_strategy: IdStrategy,
}

impl Default for DbSettings {
    fn default() -> Self {
        DbConfig::default().settings()
    }
}

impl DbConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        DbConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Option<DbConfig> = serde_yaml::from_str(content)?;
        Ok(config.unwrap_or_default())
    }

    /// The options recorded in the snapshot.
    pub fn settings(&self) -> DbSettings {
        DbSettings {
            autosave: self.autosave,
            buffer_size: self.buffer_size,
            id_strategy: self.id_strategy,
        }
    }

    pub fn with_settings(mut self, settings: DbSettings) -> Self {
        self.autosave = settings.autosave;
        self.buffer_size = settings.buffer_size;
        self.id_strategy = settings.id_strategy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(SchemaDbError::Config(
                "buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
