//! OBJ loading with its companion MTL libraries
//!
//! The material libraries an OBJ needs are only known once the OBJ itself has
//! been parsed, so a load runs in fetch phases:
//! `AwaitingGeometry -> AwaitingMaterial (once per library) -> Done`. Callers
//! check whether the load is still wanted between calls to
//! [`ObjLoad::advance`].

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;

use crate::fetch::ResourceFetcher;

use super::normals::calculate_face_normals;
use super::{MaterialSource, MeshError, MeshFormat, RenderNode, Surface, SurfaceMaterial};

/// Phase of an OBJ load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjLoadState {
    AwaitingGeometry,
    AwaitingMaterial { library_url: String },
    Done,
}

/// One OBJ load in progress
#[derive(Debug)]
pub struct ObjLoad {
    url: String,
    state: ObjLoadState,
    geometry: Option<Vec<u8>>,
    /// Answers every `mtllib` line when set
    supplied_library: Option<Vec<u8>>,
    /// Fetched libraries by the name the OBJ gives them
    libraries: HashMap<String, Vec<u8>>,
    /// Library names still to fetch; the head is being fetched
    pending: VecDeque<String>,
}

impl ObjLoad {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: ObjLoadState::AwaitingGeometry,
            geometry: None,
            supplied_library: None,
            libraries: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Supply the material library up front; no MTL fetch happens then
    pub fn with_material_library(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.supplied_library = Some(data.into());
        self
    }

    pub fn state(&self) -> &ObjLoadState {
        &self.state
    }

    /// Run the current phase
    ///
    /// Returns the finished node, or `None` when another phase is pending.
    pub fn advance(
        &mut self,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<Option<RenderNode>, MeshError> {
        match std::mem::replace(&mut self.state, ObjLoadState::Done) {
            ObjLoadState::AwaitingGeometry => {
                let data = fetcher
                    .fetch(&self.url)
                    .map_err(|e| MeshError::Fetch(e.to_string()))?;
                let parsed = parse_obj(&data, |name| self.library(name))?;
                self.geometry = Some(data);

                if self.supplied_library.is_none() {
                    for library in parsed.requested_libraries {
                        if !self.pending.contains(&library) {
                            self.pending.push_back(library);
                        }
                    }
                }
                match self.pending.front() {
                    Some(library) => {
                        let library_url = material_library_url(&self.url, library);
                        tracing::debug!("OBJ '{}' needs material library '{}'", self.url, library_url);
                        self.state = ObjLoadState::AwaitingMaterial { library_url };
                        Ok(None)
                    }
                    None => Ok(Some(self.finish(parsed.models, parsed.materials)?)),
                }
            }
            ObjLoadState::AwaitingMaterial { library_url } => {
                let fetched = fetcher.fetch(&library_url);
                if let Some(library) = self.pending.pop_front() {
                    match fetched {
                        Ok(data) => {
                            self.libraries.insert(library, data);
                        }
                        Err(e) => tracing::warn!(
                            "Material library '{}' unavailable, using default shading: {}",
                            library_url,
                            e
                        ),
                    }
                }

                if let Some(library) = self.pending.front() {
                    let library_url = material_library_url(&self.url, library);
                    self.state = ObjLoadState::AwaitingMaterial { library_url };
                    return Ok(None);
                }

                let data = self.geometry.take().unwrap_or_default();
                let parsed = parse_obj(&data, |name| self.library(name))?;
                Ok(Some(self.finish(parsed.models, parsed.materials)?))
            }
            ObjLoadState::Done => Err(MeshError::Parse(format!(
                "OBJ load of '{}' already finished",
                self.url
            ))),
        }
    }

    fn library(&self, name: &str) -> Option<&[u8]> {
        self.supplied_library
            .as_deref()
            .or_else(|| self.libraries.get(name).map(Vec::as_slice))
    }

    fn finish(
        &mut self,
        models: Vec<tobj::Model>,
        materials: Vec<tobj::Material>,
    ) -> Result<RenderNode, MeshError> {
        self.state = ObjLoadState::Done;
        self.geometry = None;
        self.libraries.clear();

        let surfaces = build_surfaces(&models, &materials);
        if surfaces.is_empty() {
            return Err(MeshError::EmptyMesh);
        }

        Ok(RenderNode {
            url: self.url.clone(),
            format: MeshFormat::Obj,
            surfaces,
        })
    }
}

/// URL of a material library named inside an OBJ, relative to the OBJ's directory
pub fn material_library_url(obj_url: &str, library: &str) -> String {
    if library.contains("://") || library.starts_with('/') {
        return library.to_string();
    }
    match obj_url.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{library}"),
        None => library.to_string(),
    }
}

struct ParsedObj {
    models: Vec<tobj::Model>,
    materials: Vec<tobj::Material>,
    requested_libraries: Vec<String>,
}

fn parse_obj<'l>(
    data: &[u8],
    library: impl Fn(&str) -> Option<&'l [u8]>,
) -> Result<ParsedObj, MeshError> {
    let requested = RefCell::new(Vec::new());

    let (models, materials) = tobj::load_obj_buf(
        &mut Cursor::new(data),
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |path| {
            let name = path.to_string_lossy().into_owned();
            let result = match library(&name) {
                Some(lib) => tobj::load_mtl_buf(&mut Cursor::new(lib)),
                None => Ok(Default::default()),
            };
            requested.borrow_mut().push(name);
            result
        },
    )
    .map_err(|e| MeshError::Parse(e.to_string()))?;

    let materials = materials.unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable material library: {}", e);
        Vec::new()
    });

    Ok(ParsedObj {
        models,
        materials,
        requested_libraries: requested.into_inner(),
    })
}

fn build_surfaces(models: &[tobj::Model], materials: &[tobj::Material]) -> Vec<Surface> {
    models
        .iter()
        .filter(|model| !model.mesh.indices.is_empty())
        .map(|model| {
            let mesh = &model.mesh;
            let vertices: Vec<[f32; 3]> = mesh
                .positions
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect();
            let indices = mesh.indices.clone();
            let normals = calculate_face_normals(&vertices, &indices);

            let material = mesh
                .material_id
                .and_then(|id| materials.get(id))
                .map(|m| {
                    let [r, g, b] = m.diffuse.unwrap_or([1.0, 1.0, 1.0]);
                    SurfaceMaterial {
                        name: Some(m.name.clone()),
                        color: [r, g, b, m.dissolve.unwrap_or(1.0)],
                        source: MaterialSource::Library,
                    }
                })
                .unwrap_or_default();

            Surface {
                vertices,
                normals,
                indices,
                material,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::test_fixtures::{QUAD_OBJ, RED_MTL, TRIANGLE_OBJ_WITH_MTL};

    const OBJ_URL: &str = "http://h/files/robot/meshes/tri.obj";
    const MTL_URL: &str = "http://h/files/robot/meshes/parts.mtl";

    #[test]
    fn test_material_library_url() {
        assert_eq!(material_library_url(OBJ_URL, "parts.mtl"), MTL_URL);
        assert_eq!(
            material_library_url(OBJ_URL, "../mat/parts.mtl"),
            "http://h/files/robot/meshes/../mat/parts.mtl"
        );
    }

    #[test]
    fn test_obj_without_library_finishes_in_one_phase() {
        let fetcher = MemoryFetcher::new().with(OBJ_URL, QUAD_OBJ);
        let mut load = ObjLoad::new(OBJ_URL);

        let node = load.advance(&fetcher).unwrap().unwrap();
        assert_eq!(load.state(), &ObjLoadState::Done);
        assert_eq!(node.surfaces.len(), 1);
        assert_eq!(node.triangle_count(), 2);
        assert_eq!(node.surfaces[0].material.source, MaterialSource::Default);
    }

    #[test]
    fn test_obj_fetches_library_in_second_phase() {
        let fetcher = MemoryFetcher::new()
            .with(OBJ_URL, TRIANGLE_OBJ_WITH_MTL)
            .with(MTL_URL, RED_MTL);
        let mut load = ObjLoad::new(OBJ_URL);

        assert!(load.advance(&fetcher).unwrap().is_none());
        assert_eq!(
            load.state(),
            &ObjLoadState::AwaitingMaterial {
                library_url: MTL_URL.to_string()
            }
        );

        let node = load.advance(&fetcher).unwrap().unwrap();
        let material = &node.surfaces[0].material;
        assert_eq!(material.source, MaterialSource::Library);
        assert_eq!(material.name.as_deref(), Some("red"));
        assert_eq!(material.color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_every_material_library_is_fetched() {
        const TWO_LIBRARY_OBJ: &str = "\
mtllib parts.mtl
mtllib trim.mtl
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
o body
usemtl red
f 1 2 3
o edge
usemtl blue
f 1 3 2
";
        const TRIM_URL: &str = "http://h/files/robot/meshes/trim.mtl";
        let fetcher = MemoryFetcher::new()
            .with(OBJ_URL, TWO_LIBRARY_OBJ)
            .with(MTL_URL, RED_MTL)
            .with(TRIM_URL, "newmtl blue\nKd 0.0 0.0 1.0\n");
        let mut load = ObjLoad::new(OBJ_URL);

        assert!(load.advance(&fetcher).unwrap().is_none());
        assert!(load.advance(&fetcher).unwrap().is_none());
        assert_eq!(
            load.state(),
            &ObjLoadState::AwaitingMaterial {
                library_url: TRIM_URL.to_string()
            }
        );

        let node = load.advance(&fetcher).unwrap().unwrap();
        let colors: Vec<_> = node.surfaces.iter().map(|s| s.material.color).collect();
        assert_eq!(colors, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]]);
        assert!(node
            .surfaces
            .iter()
            .all(|s| s.material.source == MaterialSource::Library));
    }

    #[test]
    fn test_supplied_library_skips_fetch() {
        let fetcher = MemoryFetcher::new().with(OBJ_URL, TRIANGLE_OBJ_WITH_MTL);
        let mut load = ObjLoad::new(OBJ_URL).with_material_library(RED_MTL);

        let node = load.advance(&fetcher).unwrap().unwrap();
        assert_eq!(node.surfaces[0].material.source, MaterialSource::Library);
    }

    #[test]
    fn test_missing_library_falls_back_to_default_shading() {
        let fetcher = MemoryFetcher::new().with(OBJ_URL, TRIANGLE_OBJ_WITH_MTL);
        let mut load = ObjLoad::new(OBJ_URL);

        assert!(load.advance(&fetcher).unwrap().is_none());
        let node = load.advance(&fetcher).unwrap().unwrap();
        assert_eq!(node.surfaces[0].material.source, MaterialSource::Default);
    }

    #[test]
    fn test_load_mesh_stops_when_superseded() {
        let fetcher = MemoryFetcher::new()
            .with(OBJ_URL, TRIANGLE_OBJ_WITH_MTL)
            .with(MTL_URL, RED_MTL);
        let result = crate::mesh::load_mesh(OBJ_URL, &fetcher, &|| false);
        assert!(matches!(result, Err(MeshError::Superseded(_))));
    }

    #[test]
    fn test_advancing_a_finished_load_fails() {
        let fetcher = MemoryFetcher::new().with(OBJ_URL, QUAD_OBJ);
        let mut load = ObjLoad::new(OBJ_URL);
        load.advance(&fetcher).unwrap();
        assert!(load.advance(&fetcher).is_err());
    }
}
