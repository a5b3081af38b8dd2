//! Kinematic model of a loaded robot

mod transforms;
mod types;

use std::collections::HashMap;

use glam::Mat4;
use uuid::Uuid;

use crate::control::ControlError;
use crate::mesh::RenderNode;

pub use transforms::up_axis_correction;
pub use types::{
    Joint, JointLimit, JointMimic, JointType, Link, Pose, Visual, VisualGeometry,
};

/// Identity of one parsed model instance
///
/// Every successful load produces a fresh id, so results addressed to a
/// replaced model can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(Uuid);

impl ModelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The parsed robot: links, joints and current joint values
#[derive(Debug, Clone)]
pub struct KinematicModel {
    id: ModelId,
    name: String,
    root: String,
    links: Vec<Link>,
    joints: Vec<Joint>,
    /// Name to index lookups
    link_index: HashMap<String, usize>,
    joint_index: HashMap<String, usize>,
    /// Children mapping: parent link -> joint indices
    children: HashMap<String, Vec<usize>>,
    /// Transform applied once at the root of the model
    root_transform: Mat4,
}

impl KinematicModel {
    /// Assemble a model from already validated links and joints
    pub(crate) fn new(
        name: impl Into<String>,
        root: impl Into<String>,
        links: Vec<Link>,
        joints: Vec<Joint>,
    ) -> Self {
        let link_index = links
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        let joint_index = joints
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, joint) in joints.iter().enumerate() {
            children.entry(joint.parent.clone()).or_default().push(i);
        }

        Self {
            id: ModelId::new(),
            name: name.into(),
            root: root.into(),
            links,
            joints,
            link_index,
            joint_index,
            children,
            root_transform: Mat4::IDENTITY,
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the base link
    pub fn root_link(&self) -> &str {
        &self.root
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.link_index.get(name).map(|&i| &self.links[i])
    }

    pub fn joint(&self, name: &str) -> Option<&Joint> {
        self.joint_index.get(name).map(|&i| &self.joints[i])
    }

    /// Joints that receive a control
    pub fn movable_joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter().filter(|j| j.joint_type.is_movable())
    }

    pub fn root_transform(&self) -> Mat4 {
        self.root_transform
    }

    /// Rotate the root so the description's Z-up becomes the viewer's Y-up
    pub fn apply_up_axis_correction(&mut self) {
        self.root_transform = up_axis_correction();
    }

    // ============== Joint Values ==============

    pub fn joint_value(&self, name: &str) -> Option<f32> {
        self.joint(name).map(|j| j.value)
    }

    /// Set a joint value, clamped to its limits where bounded
    ///
    /// Joints mimicking the changed joint follow it. Returns the value that
    /// was stored.
    pub fn set_joint_value(&mut self, name: &str, value: f32) -> Result<f32, ControlError> {
        let &index = self
            .joint_index
            .get(name)
            .ok_or_else(|| ControlError::UnknownJoint(name.to_string()))?;

        let stored = store_value(&mut self.joints[index], value);

        for joint in &mut self.joints {
            if let Some(mimic) = &joint.mimic
                && mimic.joint == name
            {
                let follower_value = mimic.calculate(stored);
                store_value(joint, follower_value);
            }
        }

        Ok(stored)
    }

    /// Reset every joint value to 0 (clamped into limits)
    pub fn reset_joint_values(&mut self) {
        for joint in &mut self.joints {
            store_value(joint, 0.0);
        }
    }

    // ============== Mesh Attachment ==============

    /// Attach loaded geometry to a visual
    ///
    /// Attaching twice replaces the earlier node. Returns false when the link
    /// or visual does not exist.
    pub fn attach_node(&mut self, link: &str, visual: usize, mut node: RenderNode) -> bool {
        let Some(&link_idx) = self.link_index.get(link) else {
            return false;
        };
        let Some(target) = self.links[link_idx].visuals.get_mut(visual) else {
            return false;
        };

        if let VisualGeometry::Mesh {
            scale: Some(scale), ..
        } = &target.geometry
        {
            node.apply_scale(*scale);
        }
        node.apply_fallback_color(target.color);
        target.node = Some(node);
        true
    }

    /// Number of visuals with loaded geometry
    pub fn attached_node_count(&self) -> usize {
        self.links
            .iter()
            .flat_map(|l| &l.visuals)
            .filter(|v| v.node.is_some())
            .count()
    }

    pub(crate) fn child_joints(&self, link: &str) -> impl Iterator<Item = &Joint> {
        self.children
            .get(link)
            .into_iter()
            .flatten()
            .map(|&i| &self.joints[i])
    }
}

fn store_value(joint: &mut Joint, value: f32) -> f32 {
    let value = match (&joint.limit, joint.joint_type.is_bounded()) {
        (Some(limit), true) => limit.clamp(value),
        _ => value,
    };
    joint.value = value;
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn revolute(name: &str, parent: &str, child: &str) -> Joint {
        Joint {
            name: name.to_string(),
            joint_type: JointType::Revolute,
            parent: parent.to_string(),
            child: child.to_string(),
            origin: Pose::default(),
            axis: Vec3::Z,
            limit: Some(JointLimit::with_full_turn_default(-1.0, 1.0, 0.0, 0.0)),
            value: 0.0,
            mimic: None,
        }
    }

    fn two_link_model() -> KinematicModel {
        let mut follower = revolute("follower", "arm", "finger");
        follower.mimic = Some(JointMimic {
            joint: "shoulder".to_string(),
            multiplier: -0.5,
            offset: 0.1,
        });
        KinematicModel::new(
            "bot",
            "base",
            vec![Link::empty("base"), Link::empty("arm"), Link::empty("finger")],
            vec![revolute("shoulder", "base", "arm"), follower],
        )
    }

    #[test]
    fn test_lookup_by_name() {
        let model = two_link_model();
        assert_eq!(model.root_link(), "base");
        assert!(model.link("arm").is_some());
        assert!(model.joint("shoulder").is_some());
        assert!(model.joint("elbow").is_none());
        assert_eq!(model.movable_joints().count(), 2);
    }

    #[test]
    fn test_set_joint_value_clamps_and_mimics() {
        let mut model = two_link_model();
        let stored = model.set_joint_value("shoulder", 5.0).unwrap();
        assert_eq!(stored, 1.0);
        assert_eq!(model.joint_value("shoulder"), Some(1.0));
        let follower = model.joint_value("follower").unwrap();
        assert!((follower - (-0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_set_unknown_joint_is_rejected() {
        let mut model = two_link_model();
        model.set_joint_value("shoulder", 0.3).unwrap();
        let result = model.set_joint_value("elbow", 0.5);
        assert!(matches!(result, Err(ControlError::UnknownJoint(_))));
        assert_eq!(model.joint_value("shoulder"), Some(0.3));
    }

    #[test]
    fn test_full_turn_default() {
        let limit = JointLimit::with_full_turn_default(0.0, 0.0, 1.0, 1.0);
        assert_eq!(limit.lower, -std::f32::consts::PI);
        assert_eq!(limit.upper, std::f32::consts::PI);

        let limit = JointLimit::with_full_turn_default(0.0, 0.5, 1.0, 1.0);
        assert_eq!((limit.lower, limit.upper), (0.0, 0.5));
    }

    #[test]
    fn test_model_ids_are_unique() {
        assert_ne!(two_link_model().id(), two_link_model().id());
    }
}
