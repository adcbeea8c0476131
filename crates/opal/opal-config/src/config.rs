use serde::Deserialize;
use std::path::Path;

/// Settings shared by the demo producer and viewer binaries.
#[derive(Deserialize, Debug)]
pub struct OpalConfig {
    /// Region name; the backing file becomes `opal-<region>` in the
    /// memory-backed region directory.
    #[serde(default = "defaults::region")]
    pub region: String,
    #[serde(default = "defaults::width")]
    pub width: usize,
    #[serde(default = "defaults::height")]
    pub height: usize,
    #[serde(default = "defaults::depth")]
    pub depth: usize,
    /// Producer publish cadence.
    #[serde(default = "defaults::frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn region() -> String {
        "cam-front".into()
    }

    pub fn width() -> usize {
        640
    }

    pub fn height() -> usize {
        480
    }

    pub fn depth() -> usize {
        3
    }

    pub fn frame_interval_ms() -> u64 {
        33
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for OpalConfig {
    fn default() -> Self {
        Self {
            region: defaults::region(),
            width: defaults::width(),
            height: defaults::height(),
            depth: defaults::depth(),
            frame_interval_ms: defaults::frame_interval_ms(),
            log_level: defaults::log_level(),
        }
    }
}

impl OpalConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let opal_config: OpalConfig = toml::from_str(&toml_to_str)?;
        Ok(opal_config)
    }
}
