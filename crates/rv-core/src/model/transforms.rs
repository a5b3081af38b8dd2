//! Forward kinematics and the viewer coordinate convention

use std::collections::HashMap;
use std::f32::consts::FRAC_PI_2;

use glam::Mat4;

use super::KinematicModel;

/// Rotation of -90 degrees about X, turning a Z-up description into Y-up
pub fn up_axis_correction() -> Mat4 {
    Mat4::from_rotation_x(-FRAC_PI_2)
}

impl KinematicModel {
    /// World transform of every link for the current joint values
    ///
    /// Starts from the root transform, so the result is already in the
    /// viewer's convention once the up-axis correction has been applied.
    pub fn link_transforms(&self) -> HashMap<String, Mat4> {
        let mut transforms = HashMap::with_capacity(self.links().len());
        if self.is_empty() {
            return transforms;
        }

        let mut stack = vec![(self.root_link().to_string(), self.root_transform())];
        while let Some((link, world)) = stack.pop() {
            for joint in self.child_joints(&link) {
                let child_world = world * joint.origin.to_mat4() * joint.motion_transform();
                stack.push((joint.child.clone(), child_world));
            }
            transforms.insert(link, world);
        }

        transforms
    }

    /// World transform of one link
    pub fn link_transform(&self, link: &str) -> Option<Mat4> {
        self.link_transforms().remove(link)
    }
}
