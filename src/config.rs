use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Used when the config file is absent or has no endpoint set.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self { endpoint: None }
    }

    /// Load the config, writing a starter file on first run.
    pub fn load_or_init() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            let config = Self::new();
            config.save_to(&path)?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatbox"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// The terminal is the UI, so diagnostics go to a file next to the config.
    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("chatbox.log"))
    }
}
