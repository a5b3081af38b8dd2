//! Global constants for rv-core

/// STL vertex comparison precision (multiply by this, then round to int)
pub const STL_VERTEX_PRECISION: f32 = 10000.0;

/// Default color for visuals without a material (gray, RGBA)
pub const DEFAULT_COLOR: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

/// Number of slider steps across a joint's range
pub const JOINT_CONTROL_STEPS: f32 = 20.0;

/// Range substituted for movable joints whose limits are both zero
pub const FULL_TURN_LIMIT: (f32, f32) = (-std::f32::consts::PI, std::f32::consts::PI);

/// Path segment under which the host serves files
pub const FILES_ROUTE: &str = "files";

/// Maximum nesting of xacro macro calls, includes and property lookups
pub const XACRO_MAX_DEPTH: usize = 100;
