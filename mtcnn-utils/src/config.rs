//! Persisted converter settings.
//!
//! The CLI reads these from JSON (either an explicit `--config` file or
//! `config/mtcnn.json` when present) and then applies command-line overrides on
//! top, so every knob has one authoritative place to be resolved.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Default destination for the frozen graph.
pub const DEFAULT_OUTPUT: &str = "mtcnn.pb";
/// Default directory for the TensorBoard event log.
pub const DEFAULT_LOG_DIR: &str = "log";

/// Event-log export preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VisualizationSettings {
    /// Write the event log at all.
    pub enabled: bool,
    /// Directory that receives the `events.out.tfevents.*` file.
    pub log_dir: PathBuf,
    /// Downgrade event-log failures to warnings instead of aborting the run.
    pub best_effort: bool,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            best_effort: false,
        }
    }
}

/// Telemetry preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether stage timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    ///
    /// Unknown strings fall back to `Debug`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Everything the converter needs besides the network definition itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConverterSettings {
    /// Destination path of the frozen graph.
    pub output: PathBuf,
    /// Directory holding `det1/2/3.safetensors`. `None` uses the built-in lookup.
    pub params_dir: Option<PathBuf>,
    /// Override for the node names kept by the freezer. Empty keeps the MTCNN defaults.
    pub output_nodes: Vec<String>,
    /// Event-log export preferences.
    pub visualization: VisualizationSettings,
    /// Stage timing preferences.
    pub telemetry: TelemetrySettings,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            params_dir: None,
            output_nodes: Vec::new(),
            visualization: VisualizationSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl ConverterSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: ConverterSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.sanitize();
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Drop blank entries and restore defaults for empty paths.
    pub fn sanitize(&mut self) {
        if is_blank(&self.output) {
            self.output = PathBuf::from(DEFAULT_OUTPUT);
        }
        if is_blank(&self.visualization.log_dir) {
            self.visualization.log_dir = PathBuf::from(DEFAULT_LOG_DIR);
        }
        if self.params_dir.as_deref().is_some_and(is_blank) {
            self.params_dir = None;
        }
        self.output_nodes.retain(|name| !name.trim().is_empty());
    }
}

/// Empty or whitespace-only; non-UTF-8 paths are never blank.
fn is_blank(path: &Path) -> bool {
    path.to_str().is_some_and(|text| text.trim().is_empty())
}

/// Returns the default settings location (`config/mtcnn.json` under the working directory).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/mtcnn.json"))
        .unwrap_or_else(|_| PathBuf::from("config/mtcnn.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = ConverterSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = ConverterSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.output, Path::new("mtcnn.pb"));
        assert_eq!(loaded.visualization.log_dir, Path::new("log"));
    }

    #[test]
    fn partial_json_keeps_defaults_and_sanitizes() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "output": "  ",
            "params_dir": "",
            "output_nodes": ["pnet/prob1", " "],
            "visualization": { "best_effort": true }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = ConverterSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.output, Path::new(DEFAULT_OUTPUT));
        assert_eq!(loaded.params_dir, None);
        assert_eq!(loaded.output_nodes, vec!["pnet/prob1".to_string()]);
        assert!(loaded.visualization.enabled);
        assert!(loaded.visualization.best_effort);
        assert_eq!(loaded.visualization.log_dir, Path::new(DEFAULT_LOG_DIR));
        assert!(!loaded.telemetry.enabled);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_are_kept_verbatim() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw = Path::new(OsStr::from_bytes(b"model-\xff.pb"));
        let mut settings = ConverterSettings {
            output: raw.to_path_buf(),
            params_dir: Some(raw.to_path_buf()),
            ..ConverterSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.output, raw);
        assert_eq!(settings.params_dir.as_deref(), Some(raw));
    }

    #[test]
    fn malformed_json_reports_the_path() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), "{ not json").expect("write");
        let err = ConverterSettings::load_from_path(file.path()).expect_err("bad json");
        assert!(format!("{err}").contains("failed to parse settings JSON"));
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "warning".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);
        assert_eq!(
            TelemetrySettings::default().level_filter(),
            LevelFilter::Debug
        );
    }
}
