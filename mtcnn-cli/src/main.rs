mod args;
mod config;
mod convert;

use std::fs::File;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mtcnn_utils::{configure_telemetry, init_logging};

use crate::{
    args::ConvertArgs,
    config::{apply_cli_overrides, load_settings},
};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = ConvertArgs::parse();

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    configure_telemetry(
        settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );

    let report = convert::run(&settings)?;
    info!(
        "Saved {} ({} bytes, {} of {} nodes kept) in {:.1} ms",
        report.output,
        report.bytes_written,
        report.frozen_nodes,
        report.live_nodes,
        report.elapsed_ms
    );

    if let Some(report_path) = args.report.as_ref() {
        let file = File::create(report_path)
            .with_context(|| format!("failed to create {}", report_path.display()))?;
        serde_json::to_writer_pretty(file, &report).with_context(|| {
            format!(
                "failed to write conversion report to {}",
                report_path.display()
            )
        })?;
        info!("Wrote report to {}", report_path.display());
    }

    Ok(())
}
