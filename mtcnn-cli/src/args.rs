//! Command-line argument definitions for mtcnn-cli.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Freeze the MTCNN face detector (PNet, RNet, ONet) into one TensorFlow graph.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct ConvertArgs {
    /// Model path for the frozen graph (default: mtcnn.pb).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Directory with det1/det2/det3.safetensors (default: $MTCNN_PARAMS_DIR, then models/mtcnn).
    #[arg(long, value_name = "DIR")]
    pub params_dir: Option<PathBuf>,

    /// Directory for the TensorBoard event log (default: log).
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Skip writing the TensorBoard event log.
    #[arg(long = "no-log", action = ArgAction::SetTrue, conflicts_with = "log_dir")]
    pub no_log: bool,

    /// Treat event log failures as warnings instead of errors.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "no_log")]
    pub best_effort_log: bool,

    /// Keep these output nodes instead of the seven MTCNN outputs (comma separated).
    #[arg(long, value_name = "NODE", value_delimiter = ',')]
    pub output_nodes: Vec<String>,

    /// Optional settings JSON. Defaults to `config/mtcnn.json` when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a JSON summary of the conversion to this file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,
}
