//! Robot loading pipeline
//!
//! `set_robot` walks a description through validation, optional xacro
//! expansion and URDF parsing. A successful load replaces the current model
//! wholly; a failed one leaves it in place. Mesh geometry is loaded
//! afterwards through [`MeshRequest`]s whose completions are matched against
//! the model they were issued for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ViewerConfig;
use crate::control::{ControlError, JointControl, JointController, RenderSink};
use crate::fetch::ResourceFetcher;
use crate::import::{ImportOptions, ParseError, parse_description};
use crate::mesh::{MeshError, RenderNode, load_mesh};
use crate::model::{KinematicModel, ModelId};
use crate::resolve::PathResolver;
use crate::xacro::{XacroError, XacroExpander, is_xacro};

// ============== Description Source ==============

/// Description language of a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Urdf,
    Xacro,
}

/// Raw description text handed to the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionSource {
    pub text: String,
    pub dialect: Dialect,
}

impl DescriptionSource {
    /// Wrap text, detecting the dialect from its content
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let dialect = if is_xacro(&text) {
            Dialect::Xacro
        } else {
            Dialect::Urdf
        };
        Self { text, dialect }
    }

    pub fn with_dialect(text: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            text: text.into(),
            dialect,
        }
    }
}

impl From<&str> for DescriptionSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for DescriptionSource {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

// ============== Load State ==============

/// Where the loader is in the current load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Validating,
    Expanding,
    Parsing,
    Ready,
    Failed,
}

/// Result of a load that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready,
    /// The description parsed but declares no links
    MissingTopology,
}

/// Errors that abort a load
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("Macro expansion failed: {0}")]
    MacroExpansion(#[from] XacroError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// ============== Mesh Requests ==============

/// Identity of the model currently shown, shared with in-flight mesh loads
#[derive(Debug, Clone, Default)]
pub struct CurrentModel(Arc<RwLock<Option<ModelId>>>);

impl CurrentModel {
    pub fn get(&self) -> Option<ModelId> {
        *self.0.read()
    }

    pub fn is_current(&self, id: ModelId) -> bool {
        self.get() == Some(id)
    }

    fn set(&self, id: Option<ModelId>) {
        *self.0.write() = id;
    }
}

/// One mesh to fetch for a visual of a specific model
#[derive(Debug, Clone)]
pub struct MeshRequest {
    pub model: ModelId,
    pub link: String,
    /// Index into the link's visuals
    pub visual: usize,
    pub url: String,
    current: CurrentModel,
}

impl MeshRequest {
    /// Whether the model this request was issued for is still loaded
    pub fn is_current(&self) -> bool {
        self.current.is_current(self.model)
    }

    /// Fetch and decode the mesh
    ///
    /// Safe to run on any thread; the result is applied with
    /// [`RobotLoader::complete_mesh`].
    pub fn load(self, fetcher: &dyn ResourceFetcher) -> MeshCompletion {
        let result = if self.is_current() {
            load_mesh(&self.url, fetcher, &|| self.is_current())
        } else {
            Err(MeshError::Superseded(self.url.clone()))
        };
        MeshCompletion {
            request: self,
            result,
        }
    }
}

/// Outcome of a mesh request
#[derive(Debug)]
pub struct MeshCompletion {
    pub request: MeshRequest,
    pub result: Result<RenderNode, MeshError>,
}

// ============== Loader ==============

/// Loads robot descriptions and owns the resulting model
pub struct RobotLoader {
    resolver: Arc<PathResolver>,
    fetcher: Arc<dyn ResourceFetcher>,
    options: ImportOptions,
    xacro_args: HashMap<String, String>,
    state: LoadState,
    model: Option<KinematicModel>,
    controller: Option<JointController>,
    current: CurrentModel,
    pending: Vec<MeshRequest>,
    last_error: String,
    warnings: Vec<String>,
}

impl RobotLoader {
    pub fn new(
        resolver: Arc<PathResolver>,
        fetcher: Arc<dyn ResourceFetcher>,
        options: ImportOptions,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            options,
            xacro_args: HashMap::new(),
            state: LoadState::Empty,
            model: None,
            controller: None,
            current: CurrentModel::default(),
            pending: Vec::new(),
            last_error: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn from_config(config: &ViewerConfig, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        let resolver = Arc::new(PathResolver::new(
            config.base_url.clone(),
            &config.working_path,
        ));
        let mut loader = Self::new(resolver, fetcher, config.import_options());
        loader.xacro_args = config.xacro_args.clone();
        loader
    }

    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    /// Change the directory later loads resolve against
    pub fn set_working_path(&self, raw: &str) {
        self.resolver.set_working_path(raw);
    }

    pub fn set_xacro_arg(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.xacro_args.insert(name.into(), value.into());
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    /// The model on display; after a failed load this is still the previous one
    pub fn model(&self) -> Option<&KinematicModel> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut KinematicModel> {
        self.model.as_mut()
    }

    pub fn current_model(&self) -> &CurrentModel {
        &self.current
    }

    /// Message of the last failed load, empty when there is none
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Mesh failures of the current model
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    // ============== Loading ==============

    /// Load a new description
    pub fn set_robot(
        &mut self,
        source: impl Into<DescriptionSource>,
    ) -> Result<LoadOutcome, LoadError> {
        let source = source.into();
        match self.run_load(&source) {
            Ok(model) => Ok(self.install(model)),
            Err(e) => {
                tracing::error!("Failed to load robot: {}", e);
                self.state = LoadState::Failed;
                self.last_error = e.to_string();
                Err(e)
            }
        }
    }

    fn run_load(&mut self, source: &DescriptionSource) -> Result<KinematicModel, LoadError> {
        self.state = LoadState::Validating;
        roxmltree::Document::parse(&source.text)
            .map_err(|e| LoadError::MalformedXml(e.to_string()))?;
        self.last_error.clear();

        let urdf = match source.dialect {
            Dialect::Xacro => {
                self.state = LoadState::Expanding;
                XacroExpander::new(&self.resolver, self.fetcher.as_ref())
                    .with_args(self.xacro_args.clone())
                    .expand(&source.text)?
            }
            Dialect::Urdf => source.text.clone(),
        };

        self.state = LoadState::Parsing;
        Ok(parse_description(&urdf, &self.resolver, &self.options)?)
    }

    fn install(&mut self, mut model: KinematicModel) -> LoadOutcome {
        self.pending.clear();
        self.warnings.clear();

        if model.is_empty() {
            tracing::warn!("Robot '{}' has no links", model.name());
            self.current.set(None);
            self.model = None;
            self.controller = None;
            self.state = LoadState::Empty;
            return LoadOutcome::MissingTopology;
        }

        model.apply_up_axis_correction();
        self.pending = mesh_requests(&model, &self.current);
        self.current.set(Some(model.id()));
        self.controller = Some(JointController::new(&model));

        tracing::info!(
            "Robot '{}' ready: {} links, {} joints, {} meshes pending",
            model.name(),
            model.links().len(),
            model.joints().len(),
            self.pending.len()
        );

        self.model = Some(model);
        self.state = LoadState::Ready;
        LoadOutcome::Ready
    }

    /// Drop the model and return to `Empty`
    pub fn reset(&mut self) {
        self.current.set(None);
        self.model = None;
        self.controller = None;
        self.pending.clear();
        self.warnings.clear();
        self.last_error.clear();
        self.state = LoadState::Empty;
    }

    // ============== Meshes ==============

    /// Take the mesh requests issued by the last successful load
    pub fn pending_meshes(&mut self) -> Vec<MeshRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Apply a finished mesh load
    ///
    /// Completions for a replaced model are dropped. Returns whether geometry
    /// was attached; the sink is asked to redraw once in that case.
    pub fn complete_mesh(&mut self, completion: MeshCompletion, sink: &mut dyn RenderSink) -> bool {
        let MeshCompletion { request, result } = completion;

        let Some(model) = self.model.as_mut().filter(|m| m.id() == request.model) else {
            tracing::debug!("Dropping mesh '{}' for a replaced model", request.url);
            return false;
        };

        match result {
            Ok(node) => {
                if !model.attach_node(&request.link, request.visual, node) {
                    tracing::warn!(
                        "Visual {} of link '{}' not found for mesh '{}'",
                        request.visual,
                        request.link,
                        request.url
                    );
                    return false;
                }
                sink.redraw(model);
                true
            }
            Err(MeshError::Superseded(url)) => {
                tracing::debug!("Mesh load superseded: {}", url);
                false
            }
            Err(e) => {
                tracing::warn!("Link '{}': {}", request.link, e);
                self.warnings
                    .push(format!("link '{}': {}", request.link, e));
                false
            }
        }
    }

    /// Load every pending mesh on the calling thread
    ///
    /// Returns the number of meshes attached.
    pub fn load_meshes(&mut self, sink: &mut dyn RenderSink) -> usize {
        let fetcher = Arc::clone(&self.fetcher);
        let mut attached = 0;
        for request in self.pending_meshes() {
            let completion = request.load(fetcher.as_ref());
            if self.complete_mesh(completion, sink) {
                attached += 1;
            }
        }
        attached
    }

    // ============== Joints ==============

    /// Controls for the movable joints of the current model
    pub fn controls(&self) -> &[JointControl] {
        self.controller
            .as_ref()
            .map(JointController::controls)
            .unwrap_or_default()
    }

    pub fn set_joint_angle(
        &mut self,
        name: &str,
        value: f32,
        sink: &mut dyn RenderSink,
    ) -> Result<f32, ControlError> {
        match (&self.controller, self.model.as_mut()) {
            (Some(controller), Some(model)) => controller.set_joint_angle(model, name, value, sink),
            _ => Err(ControlError::UnknownJoint(name.to_string())),
        }
    }
}

fn mesh_requests(model: &KinematicModel, current: &CurrentModel) -> Vec<MeshRequest> {
    model
        .links()
        .iter()
        .flat_map(|link| {
            link.visuals
                .iter()
                .enumerate()
                .filter_map(move |(visual, v)| {
                    v.mesh_url().map(|url| MeshRequest {
                        model: model.id(),
                        link: link.name.clone(),
                        visual,
                        url: url.to_string(),
                        current: current.clone(),
                    })
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::test_fixtures::quad_stl_bytes;

    const BASE: &str = "http://host/";

    fn loader_with(fetcher: MemoryFetcher) -> RobotLoader {
        RobotLoader::new(
            Arc::new(PathResolver::new(BASE, "robot")),
            Arc::new(fetcher),
            ImportOptions::default(),
        )
    }

    fn loader() -> RobotLoader {
        loader_with(MemoryFetcher::new())
    }

    fn no_redraw() -> impl FnMut(&KinematicModel) {
        |_: &KinematicModel| {}
    }

    const LINKS_ONLY: &str = r#"<robot name="blocks">
  <link name="base"><visual><geometry><box size="1 1 1"/></geometry></visual></link>
</robot>"#;

    const TWO_MESHES: &str = r#"<robot name="mixed">
  <link name="base">
    <visual><geometry><mesh filename="meshes/arm.stl"/></geometry></visual>
  </link>
  <link name="tool">
    <visual><geometry><mesh filename="meshes/tool.xyz"/></geometry></visual>
  </link>
  <joint name="j" type="revolute">
    <parent link="base"/><child link="tool"/>
    <limit lower="-1" upper="1" effort="1" velocity="1"/>
  </joint>
</robot>"#;

    #[test]
    fn test_source_dialect_detection() {
        assert_eq!(DescriptionSource::new(LINKS_ONLY).dialect, Dialect::Urdf);
        let xacro = r#"<robot xmlns:xacro="http://www.ros.org/wiki/xacro" name="r"/>"#;
        assert_eq!(DescriptionSource::new(xacro).dialect, Dialect::Xacro);
    }

    #[test]
    fn test_links_only_reaches_ready() {
        let mut loader = loader();
        assert_eq!(loader.state(), LoadState::Empty);

        let outcome = loader.set_robot(LINKS_ONLY).unwrap();

        assert_eq!(outcome, LoadOutcome::Ready);
        assert!(loader.is_ready());
        let model = loader.model().unwrap();
        assert_eq!(model.links().len(), 1);
        assert!(model.joints().is_empty());
        assert!(loader.controls().is_empty());
        assert_eq!(loader.last_error(), "");
    }

    #[test]
    fn test_root_transform_is_y_up() {
        let mut loader = loader();
        loader.set_robot(LINKS_ONLY).unwrap();
        let root = loader.model().unwrap().root_transform();
        let up = root.transform_vector3(glam::Vec3::Z);
        assert!((up - glam::Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_malformed_xml_keeps_previous_model() {
        let mut loader = loader();
        loader.set_robot(LINKS_ONLY).unwrap();
        let previous = loader.model().unwrap().id();

        let result = loader.set_robot("<robot name=\"broken\"><link name=\"a\">");

        assert!(matches!(result, Err(LoadError::MalformedXml(_))));
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(!loader.last_error().is_empty());
        assert_eq!(loader.model().unwrap().id(), previous);
    }

    #[test]
    fn test_successful_validation_clears_error() {
        let mut loader = loader();
        assert!(loader.set_robot("<robot").is_err());
        assert!(!loader.last_error().is_empty());

        loader.set_robot(LINKS_ONLY).unwrap();
        assert_eq!(loader.last_error(), "");
    }

    #[test]
    fn test_parse_error_fails_load() {
        let mut loader = loader();
        let result = loader.set_robot(
            r#"<robot name="r"><link name="a"/><link name="a"/></robot>"#,
        );
        assert!(matches!(result, Err(LoadError::Parse(_))));
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(loader.model().is_none());
    }

    #[test]
    fn test_no_links_is_missing_topology() {
        let mut loader = loader();
        loader.set_robot(LINKS_ONLY).unwrap();

        let outcome = loader.set_robot(r#"<robot name="hollow"></robot>"#).unwrap();

        assert_eq!(outcome, LoadOutcome::MissingTopology);
        assert_eq!(loader.state(), LoadState::Empty);
        assert!(!loader.is_ready());
        assert!(loader.model().is_none());
        assert_eq!(loader.last_error(), "");
    }

    #[test]
    fn test_zero_limits_control() {
        let mut loader = loader();
        loader
            .set_robot(
                r#"<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="revolute">
    <parent link="a"/><child link="b"/>
    <limit lower="0" upper="0" effort="0" velocity="0"/>
  </joint>
</robot>"#,
            )
            .unwrap();

        let control = &loader.controls()[0];
        assert_eq!(control.min, -std::f32::consts::PI);
        assert_eq!(control.max, std::f32::consts::PI);
    }

    #[test]
    fn test_partial_mesh_failure() {
        let fetcher =
            MemoryFetcher::new().with("http://host/files/robot/meshes/arm.stl", quad_stl_bytes());
        let mut loader = loader_with(fetcher);
        loader.set_robot(TWO_MESHES).unwrap();

        let mut redraws = 0;
        let attached = loader.load_meshes(&mut |_: &KinematicModel| redraws += 1);

        assert_eq!(attached, 1);
        assert_eq!(redraws, 1);
        assert!(loader.is_ready());
        let model = loader.model().unwrap();
        assert!(model.link("base").unwrap().visuals[0].node.is_some());
        assert!(model.link("tool").unwrap().visuals[0].node.is_none());
        assert_eq!(loader.warnings().len(), 1);
        assert!(loader.warnings()[0].contains("tool.xyz"));
    }

    #[test]
    fn test_default_config_resolves_relative_meshes() {
        let fetcher = MemoryFetcher::new().with("/files/meshes/arm.stl", quad_stl_bytes());
        let mut loader = RobotLoader::from_config(&ViewerConfig::default(), Arc::new(fetcher));
        loader.set_robot(TWO_MESHES).unwrap();

        let attached = loader.load_meshes(&mut |_: &KinematicModel| {});
        assert_eq!(attached, 1);
        assert!(loader.model().unwrap().link("base").unwrap().visuals[0].node.is_some());
    }

    #[test]
    fn test_stale_completion_is_dropped() {
        let fetcher =
            MemoryFetcher::new().with("http://host/files/robot/meshes/arm.stl", quad_stl_bytes());
        let fetcher = Arc::new(fetcher);
        let mut loader = RobotLoader::new(
            Arc::new(PathResolver::new(BASE, "robot")),
            fetcher.clone(),
            ImportOptions::default(),
        );
        loader.set_robot(TWO_MESHES).unwrap();
        let requests = loader.pending_meshes();
        let completion = requests[0].clone().load(fetcher.as_ref());
        assert!(completion.result.is_ok());

        loader.set_robot(TWO_MESHES).unwrap();
        assert!(!requests[0].is_current());

        let mut redraws = 0;
        let attached = loader.complete_mesh(completion, &mut |_: &KinematicModel| redraws += 1);
        assert!(!attached);
        assert_eq!(redraws, 0);
        assert_eq!(loader.model().unwrap().attached_node_count(), 0);

        let superseded = requests[0].clone().load(fetcher.as_ref());
        assert!(matches!(superseded.result, Err(MeshError::Superseded(_))));
    }

    #[test]
    fn test_completion_is_idempotent_per_visual() {
        let fetcher = Arc::new(
            MemoryFetcher::new().with("http://host/files/robot/meshes/arm.stl", quad_stl_bytes()),
        );
        let mut loader = RobotLoader::new(
            Arc::new(PathResolver::new(BASE, "robot")),
            fetcher.clone(),
            ImportOptions::default(),
        );
        loader.set_robot(TWO_MESHES).unwrap();
        let request = loader.pending_meshes().remove(0);

        let mut sink = no_redraw();
        assert!(loader.complete_mesh(request.clone().load(fetcher.as_ref()), &mut sink));
        assert!(loader.complete_mesh(request.load(fetcher.as_ref()), &mut sink));
        assert_eq!(loader.model().unwrap().attached_node_count(), 1);
    }

    #[test]
    fn test_set_joint_angle_through_loader() {
        let mut loader = loader();
        loader.set_robot(TWO_MESHES).unwrap();

        let mut redraws = 0;
        let mut sink = |_: &KinematicModel| redraws += 1;
        assert_eq!(loader.set_joint_angle("j", 0.5, &mut sink), Ok(0.5));
        assert_eq!(
            loader.set_joint_angle("missing", 0.5, &mut sink),
            Err(ControlError::UnknownJoint("missing".to_string()))
        );
        assert_eq!(redraws, 1);
        assert_eq!(loader.model().unwrap().joint_value("j"), Some(0.5));
    }

    #[test]
    fn test_xacro_source_is_expanded() {
        let mut loader = loader();
        loader.set_xacro_arg("width", "0.4");
        let outcome = loader
            .set_robot(
                r#"<robot name="gen" xmlns:xacro="http://www.ros.org/wiki/xacro">
  <xacro:arg name="width" default="0.1"/>
  <xacro:property name="w" value="$(arg width)"/>
  <xacro:macro name="block" params="name">
    <link name="${name}"><visual><geometry><box size="${w} ${w*2} 1"/></geometry></visual></link>
  </xacro:macro>
  <xacro:block name="base"/>
  <xacro:block name="top"/>
  <joint name="lift" type="prismatic">
    <parent link="base"/><child link="top"/>
    <limit lower="0" upper="${w}" effort="1" velocity="1"/>
  </joint>
</robot>"#,
            )
            .unwrap();

        assert_eq!(outcome, LoadOutcome::Ready);
        let model = loader.model().unwrap();
        assert_eq!(model.links().len(), 2);
        assert_eq!(model.joint("lift").unwrap().limit.unwrap().upper, 0.4);
    }

    #[test]
    fn test_xacro_error_fails_load() {
        let mut loader = loader();
        let result = loader.set_robot(
            r#"<robot name="gen" xmlns:xacro="http://www.ros.org/wiki/xacro">
  <xacro:missing_macro/>
</robot>"#,
        );
        assert!(matches!(result, Err(LoadError::MacroExpansion(_))));
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(loader.last_error().contains("missing_macro"));
    }

    #[test]
    fn test_reset_returns_to_empty() {
        let mut loader = loader();
        loader.set_robot(LINKS_ONLY).unwrap();
        loader.reset();
        assert_eq!(loader.state(), LoadState::Empty);
        assert!(loader.model().is_none());
        assert!(loader.current_model().get().is_none());
    }
}
