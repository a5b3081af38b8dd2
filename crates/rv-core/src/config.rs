//! Viewer configuration stored as RON

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COLOR;
use crate::import::ImportOptions;

/// Settings a host supplies to the loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// File-serving root; resource URLs are `<base_url>files<working_path>/...`
    pub base_url: String,
    /// Directory the description's relative references are resolved against
    pub working_path: String,
    /// Color for visuals without a material
    pub default_color: [f32; 4],
    /// Values for `xacro:arg` declarations
    pub xacro_args: HashMap<String, String>,
    /// Whether mesh geometry is fetched after parsing
    pub load_meshes: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
            working_path: String::new(),
            default_color: DEFAULT_COLOR,
            xacro_args: HashMap::new(),
            load_meshes: true,
        }
    }
}

impl ViewerConfig {
    /// Load configuration from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_ron(&content)
    }

    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(|e| ConfigError::Deserialize(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            default_color: self.default_color,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}
