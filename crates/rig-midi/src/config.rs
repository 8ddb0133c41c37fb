//! Configuration schema and loader
//!
//! Which devices to bind and whether to connect on startup. Stored as YAML
//! under the data directory; a missing or invalid file degrades to the
//! defaults with a warning instead of failing startup.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Persistent MIDI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Configured input device (logical or raw port name)
    pub input_device: Option<String>,
    /// Configured output device (logical or raw port name)
    pub output_device: Option<String>,
    /// Connect configured devices during initialization
    pub auto_connect: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            auto_connect: true,
        }
    }
}

/// Default data directory for config and the active-patch mirror
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rig")
}

/// Load configuration, falling back to defaults on any problem
pub fn load_config(path: &Path) -> RigConfig {
    if !path.exists() {
        log::info!("MIDI: No config at {:?}, using defaults", path);
        return RigConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<RigConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "MIDI: Config loaded (input: {:?}, output: {:?}, auto_connect: {})",
                    config.input_device,
                    config.output_device,
                    config.auto_connect
                );
                config
            }
            Err(e) => {
                log::warn!("MIDI: Failed to parse config: {}", e);
                RigConfig::default()
            }
        },
        Err(e) => {
            log::warn!("MIDI: Failed to read config file: {}", e);
            RigConfig::default()
        }
    }
}

/// Save configuration, creating parent directories as needed
pub fn save_config(config: &RigConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {parent:?}"))?;
    }
    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write config: {path:?}"))?;
    log::info!("MIDI: Config saved to {:?}", path);
    Ok(())
}
