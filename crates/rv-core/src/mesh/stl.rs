//! STL loading

use std::collections::HashMap;
use std::io::Cursor;

use crate::constants::STL_VERTEX_PRECISION;

use super::normals::calculate_triangle_normal;
use super::{MeshError, Surface, SurfaceMaterial};

/// Parse binary or ASCII STL into a default-shaded surface
///
/// STL carries no material, so the surface keeps the default material and
/// takes the description's color when attached.
pub fn load_stl_from_bytes(data: &[u8]) -> Result<Surface, MeshError> {
    let mut reader = Cursor::new(data);
    let mesh = stl_io::read_stl(&mut reader).map_err(|e| MeshError::Parse(e.to_string()))?;

    if mesh.faces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }

    let (vertices, normals, indices) = index_mesh(&mesh);
    Ok(Surface {
        vertices,
        normals,
        indices,
        material: SurfaceMaterial::default(),
    })
}

/// Convert triangle soup to an indexed mesh, merging coincident vertices
fn index_mesh(mesh: &stl_io::IndexedMesh) -> (Vec<[f32; 3]>, Vec<[f32; 3]>, Vec<u32>) {
    let mut unique_vertices: Vec<[f32; 3]> = Vec::new();
    let mut vertex_map: HashMap<[i32; 3], u32> = HashMap::new();
    let mut indices: Vec<u32> = Vec::with_capacity(mesh.faces.len() * 3);
    let mut normals: Vec<[f32; 3]> = Vec::with_capacity(mesh.faces.len());

    for face in &mesh.faces {
        let mut corners = [[0.0f32; 3]; 3];

        for (corner, &vertex_idx) in corners.iter_mut().zip(&face.vertices) {
            let vertex = &mesh.vertices[vertex_idx];
            let v = [vertex[0], vertex[1], vertex[2]];
            *corner = v;

            let key = [
                (v[0] * STL_VERTEX_PRECISION) as i32,
                (v[1] * STL_VERTEX_PRECISION) as i32,
                (v[2] * STL_VERTEX_PRECISION) as i32,
            ];
            let index = *vertex_map.entry(key).or_insert_with(|| {
                unique_vertices.push(v);
                (unique_vertices.len() - 1) as u32
            });
            indices.push(index);
        }

        // Some exporters write zero normals
        let n = [face.normal[0], face.normal[1], face.normal[2]];
        if n == [0.0, 0.0, 0.0] {
            normals.push(calculate_triangle_normal(corners[0], corners[1], corners[2]));
        } else {
            normals.push(n);
        }
    }

    (unique_vertices, normals, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MaterialSource;
    use crate::test_fixtures::quad_stl_bytes;

    #[test]
    fn test_load_stl_merges_shared_vertices() {
        let surface = load_stl_from_bytes(&quad_stl_bytes()).unwrap();
        assert_eq!(surface.vertices.len(), 4);
        assert_eq!(surface.indices.len(), 6);
        assert_eq!(surface.normals.len(), 2);
        assert_eq!(surface.material.source, MaterialSource::Default);
    }

    #[test]
    fn test_zero_normal_is_recomputed() {
        let surface = load_stl_from_bytes(&quad_stl_bytes()).unwrap();
        assert_eq!(surface.normals[1], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let result = load_stl_from_bytes(b"not an stl file at all");
        assert!(result.is_err());
    }
}
