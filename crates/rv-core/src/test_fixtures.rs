//! Shared fixtures for unit tests

/// Binary STL of a unit square made of two triangles (second normal zeroed)
pub(crate) fn quad_stl_bytes() -> Vec<u8> {
    let triangles = [
        stl_io::Triangle {
            normal: stl_io::Normal::new([0.0, 0.0, 1.0]),
            vertices: [
                stl_io::Vertex::new([0.0, 0.0, 0.0]),
                stl_io::Vertex::new([1.0, 0.0, 0.0]),
                stl_io::Vertex::new([1.0, 1.0, 0.0]),
            ],
        },
        stl_io::Triangle {
            normal: stl_io::Normal::new([0.0, 0.0, 0.0]),
            vertices: [
                stl_io::Vertex::new([0.0, 0.0, 0.0]),
                stl_io::Vertex::new([1.0, 1.0, 0.0]),
                stl_io::Vertex::new([0.0, 1.0, 0.0]),
            ],
        },
    ];
    let mut bytes = Vec::new();
    stl_io::write_stl(&mut bytes, triangles.iter()).unwrap();
    bytes
}

/// OBJ with one triangle that references `parts.mtl`
pub(crate) const TRIANGLE_OBJ_WITH_MTL: &str = "\
mtllib parts.mtl
o tri
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
usemtl red
f 1 2 3
";

/// OBJ with one quad and no material library
pub(crate) const QUAD_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
f 1 2 3 4
";

pub(crate) const RED_MTL: &str = "\
newmtl red
Kd 1.0 0.0 0.0
d 1.0
";
