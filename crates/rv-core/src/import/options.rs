//! Import options

use crate::constants::DEFAULT_COLOR;

/// Options for turning URDF into a kinematic model
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Color for visuals whose material gives none
    pub default_color: [f32; 4],
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            default_color: DEFAULT_COLOR,
        }
    }
}
