//! Robot Viewer Core
//!
//! Loads robot descriptions and keeps a kinematic model ready for a 3D view:
//! - Path resolution against a working directory and file-serving root
//! - XACRO macro expansion into plain URDF
//! - URDF parsing into links, joints and visuals
//! - Mesh loading dispatched by file extension (STL, OBJ, DAE)
//! - Joint controls and forward kinematics for rendered poses

pub mod config;
pub mod constants;
pub mod control;
pub mod fetch;
pub mod import;
pub mod mesh;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod xacro;

pub use config::*;
pub use constants::*;
pub use control::*;
pub use fetch::*;
pub use import::*;
pub use mesh::*;
pub use model::*;
pub use pipeline::*;
pub use resolve::*;
pub use xacro::{XacroError, XacroExpander, is_xacro};

#[cfg(test)]
mod test_fixtures;
