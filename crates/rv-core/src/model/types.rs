//! Link, joint and visual types for the kinematic model

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_COLOR, FULL_TURN_LIMIT};
use crate::mesh::RenderNode;

/// Pose (position and orientation)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub xyz: [f32; 3],
    pub rpy: [f32; 3], // roll, pitch, yaw in radians
}

impl Pose {
    pub fn new(xyz: [f32; 3], rpy: [f32; 3]) -> Self {
        Self { xyz, rpy }
    }

    /// URDF rpy is fixed-axis X, then Y, then Z: R = Rz(yaw) * Ry(pitch) * Rx(roll)
    pub fn to_quat(&self) -> Quat {
        Quat::from_euler(EulerRot::ZYX, self.rpy[2], self.rpy[1], self.rpy[0])
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.to_quat(), Vec3::from(self.xyz))
    }
}

impl From<&urdf_rs::Pose> for Pose {
    fn from(urdf_pose: &urdf_rs::Pose) -> Self {
        Self {
            xyz: [
                urdf_pose.xyz.0[0] as f32,
                urdf_pose.xyz.0[1] as f32,
                urdf_pose.xyz.0[2] as f32,
            ],
            rpy: [
                urdf_pose.rpy.0[0] as f32,
                urdf_pose.rpy.0[1] as f32,
                urdf_pose.rpy.0[2] as f32,
            ],
        }
    }
}

/// Joint motion type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointType {
    Fixed,
    Revolute,
    Continuous,
    Prismatic,
    /// Floating, planar and spherical joints: movable, but without a scalar axis motion
    Other,
}

impl JointType {
    /// Whether the joint can be driven at all
    pub fn is_movable(&self) -> bool {
        !matches!(self, JointType::Fixed)
    }

    /// Whether values are clamped into the joint's limits
    pub fn is_bounded(&self) -> bool {
        matches!(self, JointType::Revolute | JointType::Prismatic)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JointType::Fixed => "Fixed",
            JointType::Revolute => "Revolute",
            JointType::Continuous => "Continuous",
            JointType::Prismatic => "Prismatic",
            JointType::Other => "Other",
        }
    }
}

impl From<&urdf_rs::JointType> for JointType {
    fn from(urdf_type: &urdf_rs::JointType) -> Self {
        match urdf_type {
            urdf_rs::JointType::Fixed => JointType::Fixed,
            urdf_rs::JointType::Revolute => JointType::Revolute,
            urdf_rs::JointType::Continuous => JointType::Continuous,
            urdf_rs::JointType::Prismatic => JointType::Prismatic,
            _ => JointType::Other,
        }
    }
}

/// Joint value range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub lower: f32,
    pub upper: f32,
    pub effort: f32,
    pub velocity: f32,
}

impl JointLimit {
    /// Build a limit, widening an all-zero range to a full turn
    ///
    /// Many exporters write `lower="0" upper="0"` when no range is known.
    pub fn with_full_turn_default(lower: f32, upper: f32, effort: f32, velocity: f32) -> Self {
        let (lower, upper) = if lower == 0.0 && upper == 0.0 {
            FULL_TURN_LIMIT
        } else {
            (lower, upper)
        };
        Self {
            lower,
            upper,
            effort,
            velocity,
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.lower.min(self.upper), self.upper.max(self.lower))
    }
}

/// Joint mimic configuration: value = multiplier * other_joint + offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointMimic {
    pub joint: String,
    pub multiplier: f32,
    pub offset: f32,
}

impl JointMimic {
    pub fn calculate(&self, source_value: f32) -> f32 {
        self.multiplier * source_value + self.offset
    }
}

/// A joint connecting two links
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub joint_type: JointType,
    pub parent: String,
    pub child: String,
    /// Transform from parent link to joint origin
    pub origin: Pose,
    pub axis: Vec3,
    /// Present for every movable joint
    pub limit: Option<JointLimit>,
    /// Current value (radians or meters)
    pub value: f32,
    pub mimic: Option<JointMimic>,
}

impl Joint {
    /// Transform contributed by the joint's current value
    pub fn motion_transform(&self) -> Mat4 {
        let axis = self.axis.normalize_or_zero();
        if axis == Vec3::ZERO {
            return Mat4::IDENTITY;
        }
        match self.joint_type {
            JointType::Revolute | JointType::Continuous => Mat4::from_axis_angle(axis, self.value),
            JointType::Prismatic => Mat4::from_translation(axis * self.value),
            JointType::Fixed | JointType::Other => Mat4::IDENTITY,
        }
    }
}

/// Geometry of a visual element
#[derive(Debug, Clone, PartialEq)]
pub enum VisualGeometry {
    Mesh {
        /// Reference as written in the description
        filename: String,
        /// Fetchable URL produced by the path resolver
        url: String,
        scale: Option<[f32; 3]>,
    },
    Box {
        size: [f32; 3],
    },
    Cylinder {
        radius: f32,
        length: f32,
    },
    Sphere {
        radius: f32,
    },
    Capsule {
        radius: f32,
        length: f32,
    },
}

/// Single visual element for a link
#[derive(Debug, Clone)]
pub struct Visual {
    pub name: Option<String>,
    pub origin: Pose,
    pub geometry: VisualGeometry,
    pub color: [f32; 4],
    pub material_name: Option<String>,
    /// Loaded mesh geometry; arrives after parsing, possibly never
    pub node: Option<RenderNode>,
}

impl Visual {
    pub fn new(geometry: VisualGeometry) -> Self {
        Self {
            name: None,
            origin: Pose::default(),
            geometry,
            color: DEFAULT_COLOR,
            material_name: None,
            node: None,
        }
    }

    pub fn mesh_url(&self) -> Option<&str> {
        match &self.geometry {
            VisualGeometry::Mesh { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// A rigid body of the robot
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub visuals: Vec<Visual>,
}

impl Link {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visuals: Vec::new(),
        }
    }
}
