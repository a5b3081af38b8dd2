//! Robot description inspector
//!
//! Loads a URDF or XACRO file through the viewer pipeline, fetching meshes
//! from the host's file server, and prints what the viewer would show as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use rv_core::{
    HttpFetcher, JointControl, KinematicModel, LoadOutcome, RobotLoader, ViewerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "rv-inspect", version, about)]
struct Args {
    /// URDF or XACRO file to load
    file: PathBuf,

    /// Working directory references are resolved against (defaults to the file's directory)
    #[arg(long)]
    working_path: Option<String>,

    /// File-serving root, e.g. http://localhost:3000/
    #[arg(long)]
    base_url: Option<String>,

    /// RON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Xacro argument as name:=value (repeatable)
    #[arg(long = "arg", value_parser = parse_xacro_arg)]
    xacro_args: Vec<(String, String)>,

    /// Skip fetching mesh geometry
    #[arg(long)]
    skip_meshes: bool,
}

fn parse_xacro_arg(raw: &str) -> Result<(String, String), String> {
    raw.split_once(":=")
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name:=value, got '{raw}'"))
}

#[derive(Serialize)]
struct Summary<'a> {
    state: String,
    error: &'a str,
    warnings: &'a [String],
    robot: Option<RobotSummary>,
    controls: &'a [JointControl],
}

#[derive(Serialize)]
struct RobotSummary {
    name: String,
    root: String,
    links: Vec<LinkSummary>,
    joints: usize,
}

#[derive(Serialize)]
struct LinkSummary {
    name: String,
    visuals: usize,
    meshes: Vec<String>,
    triangles: usize,
}

impl RobotSummary {
    fn new(model: &KinematicModel) -> Self {
        let links = model
            .links()
            .iter()
            .map(|link| LinkSummary {
                name: link.name.clone(),
                visuals: link.visuals.len(),
                meshes: link
                    .visuals
                    .iter()
                    .filter_map(|v| v.mesh_url().map(str::to_string))
                    .collect(),
                triangles: link
                    .visuals
                    .iter()
                    .filter_map(|v| v.node.as_ref())
                    .map(|node| node.triangle_count())
                    .sum(),
            })
            .collect();

        Self {
            name: model.name().to_string(),
            root: model.root_link().to_string(),
            links,
            joints: model.joints().len(),
        }
    }
}

fn load_config(args: &Args) -> Result<ViewerConfig> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ViewerConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    match &args.working_path {
        Some(working_path) => config.working_path = working_path.clone(),
        None if config.working_path.is_empty() => {
            if let Some(parent) = args.file.parent() {
                config.working_path = parent.to_string_lossy().into_owned();
            }
        }
        None => {}
    }
    config.xacro_args.extend(args.xacro_args.iter().cloned());
    if args.skip_meshes {
        config.load_meshes = false;
    }

    Ok(config)
}

fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rv_core=info,rv_inspect=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let mut loader = RobotLoader::from_config(&config, Arc::new(HttpFetcher));
    tracing::info!(
        "Loading {} (working path '{}')",
        args.file.display(),
        loader.resolver().working_path()
    );

    let result = loader.set_robot(source);
    if matches!(result, Ok(LoadOutcome::Ready)) && config.load_meshes {
        let attached = loader.load_meshes(&mut |model: &KinematicModel| {
            tracing::debug!("{} meshes attached", model.attached_node_count());
        });
        tracing::info!("Attached {} meshes", attached);
    }

    let summary = Summary {
        state: format!("{:?}", loader.state()),
        error: loader.last_error(),
        warnings: loader.warnings(),
        robot: loader.model().map(RobotSummary::new),
        controls: loader.controls(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match result {
        Ok(LoadOutcome::MissingTopology) => anyhow::bail!("Robot description has no links"),
        Ok(LoadOutcome::Ready) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("Failed to load robot description")),
    }
}
