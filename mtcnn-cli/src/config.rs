//! Configuration loading and CLI override logic.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use mtcnn_utils::{
    config::{ConverterSettings, default_settings_path},
    normalize_path,
};

use crate::args::ConvertArgs;

/// Load converter settings from a file or use defaults.
pub fn load_settings(config_path: Option<&PathBuf>) -> Result<ConverterSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        let settings = ConverterSettings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = ConverterSettings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(ConverterSettings::default())
        }
    }
}

/// Apply command-line arguments to override loaded or default settings.
pub fn apply_cli_overrides(settings: &mut ConverterSettings, args: &ConvertArgs) {
    if let Some(output) = args.output.as_ref() {
        settings.output = output.clone();
    }
    if let Some(dir) = args.params_dir.as_ref() {
        settings.params_dir = Some(dir.clone());
    }
    if !args.output_nodes.is_empty() {
        settings.output_nodes = args.output_nodes.clone();
    }

    if let Some(dir) = args.log_dir.as_ref() {
        settings.visualization.log_dir = dir.clone();
        settings.visualization.enabled = true;
    }
    if args.no_log {
        settings.visualization.enabled = false;
    }
    if args.best_effort_log {
        settings.visualization.best_effort = true;
    }

    if args.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = args.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }

    settings.sanitize();
}
