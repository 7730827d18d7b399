//! The conversion pipeline: build, freeze, save, visualize.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use mtcnn_core::{
    EventWriter, FreezeOptions, Graph, Session, SessionConfig, convert_variables_to_constants,
    create_mtcnn, write_graph_def,
};
use mtcnn_utils::{ConverterSettings, existing_parent_dir, timing_guard};
use serde::Serialize;

/// Outcome of one conversion, optionally written out with `--report`.
#[derive(Debug, Serialize)]
pub struct ConversionReport {
    pub output: String,
    pub bytes_written: usize,
    pub output_nodes: Vec<String>,
    pub frozen_variables: usize,
    pub live_nodes: usize,
    pub frozen_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_file: Option<String>,
    pub elapsed_ms: f64,
}

/// Run the whole conversion described by `settings`.
pub fn run(settings: &ConverterSettings) -> Result<ConversionReport> {
    let guard = timing_guard("mtcnn_cli::convert", log::Level::Info);
    let output = settings.output.as_path();
    existing_parent_dir(output)
        .with_context(|| format!("cannot save model to {}", output.display()))?;

    let mut session = Session::new(SessionConfig::cpu_only());
    info!("Creating networks and loading parameters");
    let mtcnn = create_mtcnn(&mut session, settings.params_dir.as_deref())?;

    let output_nodes: Vec<&str> = if settings.output_nodes.is_empty() {
        mtcnn.output_names()
    } else {
        settings.output_nodes.iter().map(String::as_str).collect()
    };

    info!("Freezing graph");
    let frozen = convert_variables_to_constants(&session, &output_nodes, &FreezeOptions::default())
        .context("failed to freeze the MTCNN graph")?;

    let bytes_written = write_graph_def(&frozen.graph, output)?;

    let visualization = &settings.visualization;
    let event_file = if visualization.enabled {
        match export_events(session.graph(), &visualization.log_dir) {
            Ok(path) => Some(path.display().to_string()),
            Err(err) if visualization.best_effort => {
                warn!("Skipping event log: {err:#}");
                None
            }
            Err(err) => return Err(err),
        }
    } else {
        None
    };

    Ok(ConversionReport {
        output: output.display().to_string(),
        bytes_written,
        output_nodes: output_nodes.iter().map(|name| name.to_string()).collect(),
        frozen_variables: frozen.frozen_variables,
        live_nodes: session.graph().len(),
        frozen_nodes: frozen.graph.len(),
        event_file,
        elapsed_ms: guard.elapsed().as_secs_f64() * 1000.0,
    })
}

fn export_events(graph: &Graph, log_dir: &Path) -> Result<PathBuf> {
    let _guard = timing_guard("mtcnn_cli::export_events", log::Level::Debug);
    let mut writer = EventWriter::create(log_dir)
        .with_context(|| format!("failed to open event log in {}", log_dir.display()))?;
    writer.add_graph(graph)?;
    writer.close()
}
