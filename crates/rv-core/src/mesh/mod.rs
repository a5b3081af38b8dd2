//! Mesh loading (STL, OBJ, DAE formats) dispatched by file extension

mod dae;
mod normals;
mod obj;
mod stl;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COLOR;
use crate::fetch::ResourceFetcher;

pub use dae::load_dae_from_bytes;
pub use normals::{calculate_face_normals, calculate_triangle_normal};
pub use obj::{ObjLoad, ObjLoadState, material_library_url};
pub use stl::load_stl_from_bytes;

/// Mesh format detected from a file extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshFormat {
    Stl,
    Obj,
    Dae,
    /// Any other extension (lowercased, empty when there is none)
    Unsupported(String),
}

impl MeshFormat {
    /// Detect format from a URL or path, ignoring case, query and fragment
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "stl" => MeshFormat::Stl,
            "obj" => MeshFormat::Obj,
            "dae" => MeshFormat::Dae,
            _ => MeshFormat::Unsupported(extension),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MeshFormat::Unsupported(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            MeshFormat::Stl => "STL",
            MeshFormat::Obj => "OBJ",
            MeshFormat::Dae => "DAE (COLLADA)",
            MeshFormat::Unsupported(_) => "Unsupported",
        }
    }
}

/// Where a surface's material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialSource {
    /// No material in the file; the description's color applies
    Default,
    /// Material graph embedded in the mesh file (COLLADA)
    Embedded,
    /// Companion material library (OBJ + MTL)
    Library,
}

/// Shading of one surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMaterial {
    pub name: Option<String>,
    pub color: [f32; 4],
    pub source: MaterialSource,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            name: None,
            color: DEFAULT_COLOR,
            source: MaterialSource::Default,
        }
    }
}

/// Indexed triangle geometry with a single material
///
/// `normals` holds one normal per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surface {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub material: SurfaceMaterial,
}

impl Surface {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Renderable result of one mesh load
#[derive(Debug, Clone, PartialEq)]
pub struct RenderNode {
    pub url: String,
    pub format: MeshFormat,
    pub surfaces: Vec<Surface>,
}

impl RenderNode {
    pub fn vertex_count(&self) -> usize {
        self.surfaces.iter().map(|s| s.vertices.len()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.surfaces.iter().map(Surface::triangle_count).sum()
    }

    /// Scale vertices per axis (URDF `<mesh scale>`)
    pub fn apply_scale(&mut self, scale: [f32; 3]) {
        for surface in &mut self.surfaces {
            for vertex in &mut surface.vertices {
                vertex[0] *= scale[0];
                vertex[1] *= scale[1];
                vertex[2] *= scale[2];
            }
        }
    }

    /// Color surfaces that have no material of their own
    pub fn apply_fallback_color(&mut self, color: [f32; 4]) {
        for surface in &mut self.surfaces {
            if surface.material.source == MaterialSource::Default {
                surface.material.color = color;
            }
        }
    }
}

/// Load a mesh from a URL, choosing the parser by extension
///
/// `is_current` is asked before every additional fetch a format needs; once
/// it returns false the load stops with [`MeshError::Superseded`].
pub fn load_mesh(
    url: &str,
    fetcher: &dyn ResourceFetcher,
    is_current: &dyn Fn() -> bool,
) -> Result<RenderNode, MeshError> {
    let format = MeshFormat::from_url(url);

    let surfaces = match &format {
        MeshFormat::Stl => vec![load_stl_from_bytes(&fetch(fetcher, url)?)?],
        MeshFormat::Dae => load_dae_from_bytes(&fetch(fetcher, url)?)?,
        MeshFormat::Obj => {
            let mut load = ObjLoad::new(url);
            loop {
                if let Some(node) = load.advance(fetcher)? {
                    return Ok(node);
                }
                if !is_current() {
                    return Err(MeshError::Superseded(url.to_string()));
                }
            }
        }
        MeshFormat::Unsupported(ext) => {
            return Err(MeshError::UnsupportedFormat(format!("{url} (.{ext})")));
        }
    };

    Ok(RenderNode {
        url: url.to_string(),
        format,
        surfaces,
    })
}

fn fetch(fetcher: &dyn ResourceFetcher, url: &str) -> Result<Vec<u8>, MeshError> {
    fetcher.fetch(url).map_err(|e| MeshError::Fetch(e.to_string()))
}

/// Mesh-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshError {
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Empty mesh: no geometry found")]
    EmptyMesh,
    #[error("Unsupported mesh format: {0}")]
    UnsupportedFormat(String),
    #[error("Load of '{0}' superseded by a newer model")]
    Superseded(String),
}
