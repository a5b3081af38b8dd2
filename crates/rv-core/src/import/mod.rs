//! URDF parsing into a kinematic model
//!
//! Converts URDF text into [`KinematicModel`], resolving mesh references to
//! fetchable URLs on the way. Mesh geometry itself is loaded later.

mod geometry;
mod options;
mod topology;

use std::collections::HashMap;

use glam::Vec3;

use crate::model::{Joint, JointLimit, JointMimic, JointType, KinematicModel, Link, Pose};
use crate::resolve::PathResolver;

pub use geometry::{
    GeometryContext, collect_materials, convert_geometry, extract_material_info, process_visuals,
};
pub use options::ImportOptions;
pub use topology::find_root;

/// Errors raised while turning URDF text into a model
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse URDF: {0}")]
    Urdf(String),

    #[error("Invalid robot topology: {0}")]
    Topology(String),
}

/// Parse URDF text into a kinematic model
///
/// A description without links parses successfully into an empty model.
pub fn parse_description(
    xml: &str,
    resolver: &PathResolver,
    options: &ImportOptions,
) -> Result<KinematicModel, ParseError> {
    let robot = urdf_rs::read_from_string(xml).map_err(|e| ParseError::Urdf(e.to_string()))?;

    let material_colors = collect_materials(&robot.materials);
    let ctx = GeometryContext {
        resolver,
        options,
        material_colors: &material_colors,
    };

    let links: Vec<Link> = robot
        .links
        .iter()
        .map(|urdf_link| Link {
            name: urdf_link.name.clone(),
            visuals: process_visuals(&urdf_link.visual, &ctx),
        })
        .collect();

    let initial_values = read_initial_values(xml);
    let joints: Vec<Joint> = robot
        .joints
        .iter()
        .map(|urdf_joint| convert_joint(urdf_joint, &initial_values))
        .collect();

    let root = find_root(&links, &joints)?;

    tracing::info!(
        "Parsed robot '{}': {} links, {} joints, root '{}'",
        robot.name,
        links.len(),
        joints.len(),
        root
    );

    Ok(KinematicModel::new(robot.name, root, links, joints))
}

fn convert_joint(urdf_joint: &urdf_rs::Joint, initial_values: &HashMap<String, f32>) -> Joint {
    let joint_type = JointType::from(&urdf_joint.joint_type);

    let limit = joint_type.is_movable().then(|| {
        JointLimit::with_full_turn_default(
            urdf_joint.limit.lower as f32,
            urdf_joint.limit.upper as f32,
            urdf_joint.limit.effort as f32,
            urdf_joint.limit.velocity as f32,
        )
    });

    let mut value = initial_values.get(&urdf_joint.name).copied().unwrap_or(0.0);
    if let Some(limit) = &limit
        && joint_type.is_bounded()
    {
        value = limit.clamp(value);
    }

    Joint {
        name: urdf_joint.name.clone(),
        joint_type,
        parent: urdf_joint.parent.link.clone(),
        child: urdf_joint.child.link.clone(),
        origin: Pose::from(&urdf_joint.origin),
        axis: Vec3::new(
            urdf_joint.axis.xyz.0[0] as f32,
            urdf_joint.axis.xyz.0[1] as f32,
            urdf_joint.axis.xyz.0[2] as f32,
        ),
        limit,
        value,
        mimic: urdf_joint.mimic.as_ref().map(|mimic| JointMimic {
            joint: mimic.joint.clone(),
            multiplier: mimic.multiplier.unwrap_or(1.0) as f32,
            offset: mimic.offset.unwrap_or(0.0) as f32,
        }),
    }
}

/// Initial joint positions declared in `<ros2_control>` blocks
///
/// Reads `<joint name="..."><state_interface name="position"><param
/// name="initial_value">` entries; anything else is ignored.
fn read_initial_values(xml: &str) -> HashMap<String, f32> {
    let Ok(doc) = roxmltree::Document::parse(xml) else {
        return HashMap::new();
    };

    doc.descendants()
        .filter(|n| n.has_tag_name("ros2_control"))
        .flat_map(|n| n.children().filter(|c| c.has_tag_name("joint")))
        .filter_map(|joint| {
            let name = joint.attribute("name")?;
            let value = joint
                .children()
                .filter(|c| {
                    c.has_tag_name("state_interface") && c.attribute("name") == Some("position")
                })
                .flat_map(|interface| interface.children())
                .find(|p| p.has_tag_name("param") && p.attribute("name") == Some("initial_value"))?
                .text()?
                .trim()
                .parse::<f32>()
                .ok()?;
            Some((name.to_string(), value))
        })
        .collect()
}
