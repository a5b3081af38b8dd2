//! DAE (COLLADA) loading
//!
//! COLLADA files carry their own scene and material graph. The main visual
//! scene is walked node by node; every primitive of an instanced geometry
//! becomes a surface placed by the node transforms and colored by the effect
//! its material symbol is bound to.

use std::str::FromStr;

use dae_parser::{
    ColorParam, Document, Effect, Geometry, Instance, LocalMap, Material, Node, Primitive,
    Profile, Semantic, Shader, Source, Transform,
};
use glam::{Mat4, Vec3};

use super::normals::calculate_face_normals;
use super::{MaterialSource, MeshError, Surface, SurfaceMaterial};

/// Parse a COLLADA document into one surface per triangle/polylist primitive
pub fn load_dae_from_bytes(data: &[u8]) -> Result<Vec<Surface>, MeshError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| MeshError::Parse(format!("Invalid UTF-8 in DAE file: {}", e)))?;
    let document = Document::from_str(text)
        .map_err(|e| MeshError::Parse(format!("DAE parse error: {:?}", e)))?;

    load_dae_from_document(&document)
}

/// ID lookups shared by the scene walk
struct DaeMaps<'a> {
    geometries: LocalMap<'a, Geometry>,
    sources: LocalMap<'a, Source>,
    materials: LocalMap<'a, Material>,
    effects: LocalMap<'a, Effect>,
}

fn load_dae_from_document(document: &Document) -> Result<Vec<Surface>, MeshError> {
    let maps = DaeMaps {
        geometries: document.local_map::<Geometry>().map_err(map_error)?,
        sources: document.local_map::<Source>().map_err(map_error)?,
        materials: document.local_map::<Material>().map_err(map_error)?,
        effects: document.local_map::<Effect>().map_err(map_error)?,
    };

    let mut surfaces = Vec::new();
    match document.get_visual_scene() {
        Some(scene) => {
            for node in &scene.nodes {
                collect_node(node, Mat4::IDENTITY, &maps, &mut surfaces)?;
            }
        }
        // Bare geometry library: every mesh once, untransformed
        None => {
            for geometry in maps.geometries.0.values() {
                surfaces.extend(geometry_surfaces(geometry, Mat4::IDENTITY, None, &maps)?);
            }
        }
    }

    if surfaces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    Ok(surfaces)
}

fn map_error(e: impl std::fmt::Debug) -> MeshError {
    MeshError::Parse(format!("DAE id lookup failed: {:?}", e))
}

/// Walk a scene node, placing its geometry instances with the accumulated transform
fn collect_node(
    node: &Node,
    parent: Mat4,
    maps: &DaeMaps,
    surfaces: &mut Vec<Surface>,
) -> Result<(), MeshError> {
    let transform = parent * node_transform(&node.transforms);

    for instance in &node.instance_geometry {
        let Some(geometry) = maps.geometries.get(&instance.url) else {
            tracing::warn!("DAE node references unknown geometry '{}'", instance.url);
            continue;
        };
        surfaces.extend(geometry_surfaces(geometry, transform, Some(instance), maps)?);
    }
    for child in &node.children {
        collect_node(child, transform, maps, surfaces)?;
    }
    Ok(())
}

/// Compose a node's transform elements in document order
fn node_transform(transforms: &[Transform]) -> Mat4 {
    transforms
        .iter()
        .fold(Mat4::IDENTITY, |acc, transform| acc * transform_matrix(transform))
}

fn transform_matrix(transform: &Transform) -> Mat4 {
    match transform {
        // COLLADA writes matrices row by row
        Transform::Matrix(m) => Mat4::from_cols_array(&m.0).transpose(),
        Transform::Translate(t) => Mat4::from_translation(Vec3::from_array(*t.0)),
        Transform::Scale(s) => Mat4::from_scale(Vec3::from_array(*s.0)),
        Transform::Rotate(r) => {
            let [x, y, z, degrees] = *r.0;
            let axis = Vec3::new(x, y, z);
            if axis.length_squared() == 0.0 {
                Mat4::IDENTITY
            } else {
                Mat4::from_axis_angle(axis.normalize(), degrees.to_radians())
            }
        }
        Transform::LookAt(_) | Transform::Skew(_) => Mat4::IDENTITY,
    }
}

fn geometry_surfaces(
    geometry: &Geometry,
    transform: Mat4,
    instance: Option<&Instance<Geometry>>,
    maps: &DaeMaps,
) -> Result<Vec<Surface>, MeshError> {
    let mut surfaces = Vec::new();

    let dae_parser::GeometryElement::Mesh(mesh) = &geometry.element else {
        return Ok(surfaces);
    };
    let Some(vertices) = mesh.vertices.as_ref() else {
        return Ok(surfaces);
    };
    let Some(position_input) = vertices
        .inputs
        .iter()
        .find(|i| i.semantic == Semantic::Position)
    else {
        return Ok(surfaces);
    };
    let position_source = maps
        .sources
        .get(position_input.source_as_source())
        .ok_or_else(|| MeshError::Parse("Position source not found".to_string()))?;
    let positions: Vec<[f32; 3]> = extract_vec3_from_source(position_source)?
        .into_iter()
        .map(|p| transform.transform_point3(Vec3::from_array(p)).to_array())
        .collect();

    for primitive in &mesh.elements {
        let (polygons, symbol) = match primitive {
            Primitive::Triangles(tris) => {
                let stride = tris.inputs.stride;
                let offset = tris
                    .inputs
                    .iter()
                    .find(|i| i.semantic == Semantic::Vertex)
                    .map(|i| i.offset as usize)
                    .unwrap_or(0);
                let prim = tris.data.prim.as_deref().unwrap_or_default();
                let vcount = vec![3u32; prim.len() / (stride * 3).max(1)];
                (
                    collect_polygons(prim, &vcount, stride, offset),
                    tris.material.as_deref(),
                )
            }
            Primitive::PolyList(polylist) => {
                let stride = polylist.inputs.stride;
                let offset = polylist
                    .inputs
                    .iter()
                    .find(|i| i.semantic == Semantic::Vertex)
                    .map(|i| i.offset as usize)
                    .unwrap_or(0);
                (
                    collect_polygons(
                        &polylist.data.prim,
                        &polylist.data.vcount,
                        stride,
                        offset,
                    ),
                    polylist.material.as_deref(),
                )
            }
            // Lines and other primitives have no surface
            _ => continue,
        };

        let material = resolve_material(symbol, instance, maps);
        if let Some(surface) = triangulate(&positions, &polygons, material) {
            surfaces.push(surface);
        }
    }

    Ok(surfaces)
}

/// Follow a primitive's material symbol to the diffuse color of its effect
///
/// Symbols are bound through the instance's `bind_material`; documents
/// without a scene name the material id directly. A symbol that leads to no
/// color leaves the surface to the description's color.
fn resolve_material(
    symbol: Option<&str>,
    instance: Option<&Instance<Geometry>>,
    maps: &DaeMaps,
) -> SurfaceMaterial {
    let Some(symbol) = symbol else {
        return SurfaceMaterial::default();
    };
    let material = instance
        .and_then(|i| i.get_instance_material(symbol))
        .and_then(|bound| maps.materials.get(&bound.target))
        .or_else(|| maps.materials.get_str(symbol));
    let Some(material) = material else {
        return SurfaceMaterial {
            name: Some(symbol.to_string()),
            ..Default::default()
        };
    };

    let name = material
        .name
        .clone()
        .or_else(|| material.id.clone())
        .unwrap_or_else(|| symbol.to_string());
    match maps
        .effects
        .get(&material.instance_effect.url)
        .and_then(effect_color)
    {
        Some(color) => SurfaceMaterial {
            name: Some(name),
            color,
            source: MaterialSource::Embedded,
        },
        None => SurfaceMaterial {
            name: Some(name),
            ..Default::default()
        },
    }
}

/// Literal diffuse color of the common profile (emission for constant shading)
fn effect_color(effect: &Effect) -> Option<[f32; 4]> {
    effect.profile.iter().find_map(|profile| {
        let Profile::Common(common) = profile else {
            return None;
        };
        common.technique.data.shaders.iter().find_map(|shader| {
            let param = match shader {
                Shader::Phong(phong) => phong.diffuse.as_deref(),
                Shader::Blinn(blinn) => blinn.diffuse.as_deref(),
                Shader::Lambert(lambert) => lambert.diffuse.as_deref(),
                Shader::Constant(constant) => constant.emission.as_deref(),
            };
            match param {
                Some(ColorParam::Color(rgba)) => Some(**rgba),
                _ => None,
            }
        })
    })
}

/// Split interleaved primitive indices into position-index polygons
fn collect_polygons(prim: &[u32], vcount: &[u32], stride: usize, offset: usize) -> Vec<Vec<u32>> {
    let stride = stride.max(1);
    let mut polygons = Vec::with_capacity(vcount.len());
    let mut cursor = 0;

    for &count in vcount {
        let count = count as usize;
        let polygon: Option<Vec<u32>> = (0..count)
            .map(|corner| prim.get(cursor + corner * stride + offset).copied())
            .collect();
        match polygon {
            Some(polygon) => polygons.push(polygon),
            None => break,
        }
        cursor += count * stride;
    }

    polygons
}

/// Fan-triangulate polygons into a surface with its own vertex list
fn triangulate(
    positions: &[[f32; 3]],
    polygons: &[Vec<u32>],
    material: SurfaceMaterial,
) -> Option<Surface> {
    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    for polygon in polygons.iter().filter(|p| p.len() >= 3) {
        for i in 1..polygon.len() - 1 {
            let corners = [polygon[0], polygon[i], polygon[i + 1]];
            let Some(points) = corners
                .iter()
                .map(|&c| positions.get(c as usize).copied())
                .collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            for point in points {
                indices.push(vertices.len() as u32);
                vertices.push(point);
            }
        }
    }

    if indices.is_empty() {
        return None;
    }

    let normals = calculate_face_normals(&vertices, &indices);
    Some(Surface {
        vertices,
        normals,
        indices,
        material,
    })
}

/// Extract Vec3 data from a COLLADA source
fn extract_vec3_from_source(source: &Source) -> Result<Vec<[f32; 3]>, MeshError> {
    let accessor = &source.accessor;

    let float_array = match &source.array {
        Some(dae_parser::ArrayElement::Float(arr)) => arr,
        _ => return Err(MeshError::Parse("No float array in source".to_string())),
    };

    let stride = if accessor.stride > 0 {
        accessor.stride
    } else {
        3
    };

    Ok((0..accessor.count)
        .map(|i| i * stride)
        .filter(|&base| base + 2 < float_array.len())
        .map(|base| {
            [
                float_array[base],
                float_array[base + 1],
                float_array[base + 2],
            ]
        })
        .collect())
}
