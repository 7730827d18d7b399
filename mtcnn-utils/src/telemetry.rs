//! Scoped timing for the conversion stages.
//!
//! A [`TimingGuard`] measures one pipeline stage (network construction,
//! freezing, serialization, event export) and logs the elapsed time under the
//! [`TELEMETRY_TARGET`] log target when it is dropped. Guards only log when
//! telemetry has been switched on via [`configure`] and the requested level is
//! within the configured threshold, so disabled guards cost one clock read.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used by every timing guard.
pub const TELEMETRY_TARGET: &str = "mtcnn::telemetry";

static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);
static TELEMETRY_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Off as usize);

/// Measures a scoped stage and logs its duration on drop.
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    /// Returns `true` when the guard will emit a log entry on drop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time spent since the guard was created. The guard keeps running and
    /// still logs on drop.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} took {:.2?}",
                self.label,
                self.start.elapsed()
            );
        }
    }
}

/// Start timing a stage, logging at `level` when telemetry allows it.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    timing_guard_if(label, level, true)
}

/// Like [`timing_guard`], with an extra caller-side switch.
pub fn timing_guard_if(
    label: impl Into<Cow<'static, str>>,
    level: Level,
    enabled: bool,
) -> TimingGuard {
    let active =
        enabled && telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active,
    }
}

/// Set the process-wide telemetry switch and level threshold.
///
/// The CLI calls this once after settings and overrides are resolved.
pub fn configure(enabled: bool, level: LevelFilter) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
    TELEMETRY_LEVEL.store(level as usize, Ordering::Relaxed);
}

/// Returns whether telemetry logging is currently enabled.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed)
}

/// Returns the configured telemetry threshold.
pub fn telemetry_level() -> LevelFilter {
    let stored = TELEMETRY_LEVEL.load(Ordering::Relaxed);
    LevelFilter::iter()
        .find(|filter| *filter as usize == stored)
        .unwrap_or(LevelFilter::Off)
}

/// Returns `true` when telemetry is enabled and `level` passes the threshold.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}
