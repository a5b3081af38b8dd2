//! Joint controls and value updates

use serde::{Deserialize, Serialize};

use crate::constants::JOINT_CONTROL_STEPS;
use crate::model::{KinematicModel, ModelId};

/// Receives a redraw request after the model's pose changed
pub trait RenderSink {
    fn redraw(&mut self, model: &KinematicModel);
}

impl<F: FnMut(&KinematicModel)> RenderSink for F {
    fn redraw(&mut self, model: &KinematicModel) {
        self(model)
    }
}

/// Slider description for one movable joint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointControl {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub initial: f32,
}

/// Controls for the movable joints of one model
#[derive(Debug, Clone)]
pub struct JointController {
    model: ModelId,
    controls: Vec<JointControl>,
}

impl JointController {
    /// One control per non-fixed joint, in document order
    pub fn new(model: &KinematicModel) -> Self {
        let controls = model
            .movable_joints()
            .filter_map(|joint| {
                let limit = joint.limit?;
                Some(JointControl {
                    name: joint.name.clone(),
                    min: limit.lower,
                    max: limit.upper,
                    step: (limit.upper - limit.lower) / JOINT_CONTROL_STEPS,
                    initial: joint.value,
                })
            })
            .collect();

        Self {
            model: model.id(),
            controls,
        }
    }

    pub fn model_id(&self) -> ModelId {
        self.model
    }

    pub fn controls(&self) -> &[JointControl] {
        &self.controls
    }

    pub fn control(&self, name: &str) -> Option<&JointControl> {
        self.controls.iter().find(|c| c.name == name)
    }

    /// Set a joint value and request one redraw
    ///
    /// Unknown joints leave the model untouched and trigger no redraw.
    pub fn set_joint_angle(
        &self,
        model: &mut KinematicModel,
        name: &str,
        value: f32,
        sink: &mut dyn RenderSink,
    ) -> Result<f32, ControlError> {
        if model.id() != self.model {
            return Err(ControlError::StaleModel);
        }

        let stored = model.set_joint_value(name, value).inspect_err(|e| {
            tracing::warn!("{}", e);
        })?;
        sink.redraw(model);
        Ok(stored)
    }
}

/// Joint control errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Controls belong to a model that is no longer loaded")]
    StaleModel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Joint, JointLimit, JointType, Link, Pose};

    fn joint(name: &str, child: &str, joint_type: JointType, limits: (f32, f32)) -> Joint {
        Joint {
            name: name.to_string(),
            joint_type,
            parent: "base".to_string(),
            child: child.to_string(),
            origin: Pose::default(),
            axis: glam::Vec3::Z,
            limit: joint_type
                .is_movable()
                .then(|| JointLimit::with_full_turn_default(limits.0, limits.1, 1.0, 1.0)),
            value: 0.0,
            mimic: None,
        }
    }

    fn model() -> KinematicModel {
        let mut model = KinematicModel::new(
            "bot",
            "base",
            vec![Link::empty("base"), Link::empty("a"), Link::empty("b"), Link::empty("c")],
            vec![
                joint("j1", "a", JointType::Revolute, (-1.0, 1.0)),
                joint("weld", "b", JointType::Fixed, (0.0, 0.0)),
                joint("spin", "c", JointType::Continuous, (0.0, 0.0)),
            ],
        );
        model.set_joint_value("j1", 0.25).unwrap();
        model
    }

    #[test]
    fn test_controls_for_movable_joints() {
        let model = model();
        let controller = JointController::new(&model);

        assert_eq!(controller.controls().len(), 2);
        assert!(controller.control("weld").is_none());

        let j1 = controller.control("j1").unwrap();
        assert_eq!((j1.min, j1.max, j1.initial), (-1.0, 1.0, 0.25));
        assert!((j1.step - 0.1).abs() < 1e-6);

        let spin = controller.control("spin").unwrap();
        assert_eq!(spin.min, -std::f32::consts::PI);
        assert_eq!(spin.max, std::f32::consts::PI);
    }

    #[test]
    fn test_set_joint_angle_redraws_once() {
        let mut model = model();
        let controller = JointController::new(&model);
        let mut redraws = 0;

        let stored = controller
            .set_joint_angle(&mut model, "j1", 0.5, &mut |_: &KinematicModel| redraws += 1)
            .unwrap();

        assert_eq!(stored, 0.5);
        assert_eq!(redraws, 1);
        assert_eq!(model.joint_value("j1"), Some(0.5));
    }

    #[test]
    fn test_unknown_joint_changes_nothing() {
        let mut model = model();
        let controller = JointController::new(&model);
        let mut redraws = 0;

        let result =
            controller.set_joint_angle(&mut model, "nope", 0.5, &mut |_: &KinematicModel| {
                redraws += 1
            });

        assert_eq!(result, Err(ControlError::UnknownJoint("nope".to_string())));
        assert_eq!(redraws, 0);
        assert_eq!(model.joint_value("j1"), Some(0.25));
        assert_eq!(model.joint_value("spin"), Some(0.0));
    }

    #[test]
    fn test_continuous_joint_is_not_clamped() {
        let mut model = model();
        let controller = JointController::new(&model);
        let stored = controller
            .set_joint_angle(&mut model, "spin", 7.0, &mut |_: &KinematicModel| {})
            .unwrap();
        assert_eq!(stored, 7.0);
    }

    #[test]
    fn test_controller_rejects_other_model() {
        let controller = JointController::new(&model());
        let mut other = model();
        let result = controller.set_joint_angle(&mut other, "j1", 0.5, &mut |_: &KinematicModel| {});
        assert_eq!(result, Err(ControlError::StaleModel));
    }
}
