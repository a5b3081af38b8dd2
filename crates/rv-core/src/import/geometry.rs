//! Visual geometry processing and material lookup

use std::collections::HashMap;

use crate::model::{Pose, Visual, VisualGeometry};
use crate::resolve::PathResolver;

use super::options::ImportOptions;

/// Shared inputs for converting visuals of every link
pub struct GeometryContext<'a> {
    pub resolver: &'a PathResolver,
    pub options: &'a ImportOptions,
    /// Robot-level named materials
    pub material_colors: &'a HashMap<String, [f32; 4]>,
}

/// Collect robot-level material colors by name
pub fn collect_materials(
    urdf_materials: &[urdf_rs::Material],
) -> HashMap<String, [f32; 4]> {
    urdf_materials
        .iter()
        .filter_map(|m| m.color.as_ref().map(|c| (m.name.clone(), rgba(c))))
        .collect()
}

/// Convert the visual elements of one link
pub fn process_visuals(visuals: &[urdf_rs::Visual], ctx: &GeometryContext) -> Vec<Visual> {
    visuals
        .iter()
        .map(|visual| {
            let (color, material_name) = extract_material_info(visual, ctx);
            Visual {
                name: visual.name.clone(),
                origin: Pose::from(&visual.origin),
                geometry: convert_geometry(&visual.geometry, ctx.resolver),
                color,
                material_name,
                node: None,
            }
        })
        .collect()
}

/// Extract material color and name from a visual element
///
/// An inline color wins over a named robot-level material.
pub fn extract_material_info(
    visual: &urdf_rs::Visual,
    ctx: &GeometryContext,
) -> ([f32; 4], Option<String>) {
    let Some(mat) = visual.material.as_ref() else {
        return (ctx.options.default_color, None);
    };

    let color = mat
        .color
        .as_ref()
        .map(rgba)
        .or_else(|| ctx.material_colors.get(&mat.name).copied())
        .unwrap_or(ctx.options.default_color);
    let name = (!mat.name.is_empty()).then(|| mat.name.clone());

    (color, name)
}

/// Convert URDF geometry, resolving mesh references to URLs
pub fn convert_geometry(geometry: &urdf_rs::Geometry, resolver: &PathResolver) -> VisualGeometry {
    match geometry {
        urdf_rs::Geometry::Mesh { filename, scale } => VisualGeometry::Mesh {
            filename: filename.clone(),
            url: resolver.resolve(filename),
            scale: scale.as_ref().map(|s| [s.0[0] as f32, s.0[1] as f32, s.0[2] as f32]),
        },
        urdf_rs::Geometry::Box { size } => VisualGeometry::Box {
            size: [size.0[0] as f32, size.0[1] as f32, size.0[2] as f32],
        },
        urdf_rs::Geometry::Cylinder { radius, length } => VisualGeometry::Cylinder {
            radius: *radius as f32,
            length: *length as f32,
        },
        urdf_rs::Geometry::Capsule { radius, length } => VisualGeometry::Capsule {
            radius: *radius as f32,
            length: *length as f32,
        },
        urdf_rs::Geometry::Sphere { radius } => VisualGeometry::Sphere {
            radius: *radius as f32,
        },
    }
}

fn rgba(color: &urdf_rs::Color) -> [f32; 4] {
    [
        color.rgba.0[0] as f32,
        color.rgba.0[1] as f32,
        color.rgba.0[2] as f32,
        color.rgba.0[3] as f32,
    ]
}
