//! Structured lifecycle events for batch runs.
//!
//! Every event carries an `event` field so JSON logs can be filtered on it.
//! Skips and per-combination failures go out at `warn`, everything else at
//! `info`.

use std::path::Path;

use tracing::{info, warn, Span};

/// Span tagged with the batch flow. Attach with `Instrument::instrument` so
/// it follows the batch future across await points.
pub fn batch_span(flow: &str) -> Span {
    tracing::info_span!("splat.batch", flow = %flow)
}

pub fn emit_batch_started(flow: &str, combinations: usize, log_dir: &Path) {
    info!(
        event = "batch.started",
        flow = %flow,
        combinations = combinations,
        log_dir = %log_dir.display(),
    );
}

/// Diagnostic for a combination rejected by the gate.
pub fn emit_combination_skipped(scene: &str, modality: &str, reason: &str, path: &str) {
    warn!(
        event = "combination.skipped",
        scene = %scene,
        modality = %modality,
        reason = %reason,
        path = %path,
    );
}

pub fn emit_cache_removed(dir: &Path) {
    info!(event = "cache.removed", path = %dir.display());
}

pub fn emit_combination_dispatched(label: &str, handle: &str) {
    info!(event = "combination.dispatched", combination = %label, handle = %handle);
}

pub fn emit_combination_failed(label: &str, error: &dyn std::fmt::Display) {
    warn!(event = "combination.failed", combination = %label, error = %error);
}

pub fn emit_unit_finished(label: &str, exit_code: Option<i32>, success: bool) {
    info!(
        event = "unit.finished",
        combination = %label,
        exit_code = ?exit_code,
        success = success,
    );
}

pub fn emit_batch_finished(flow: &str, submitted: usize, skipped: usize, failed: usize) {
    info!(
        event = "batch.finished",
        flow = %flow,
        submitted = submitted,
        skipped = skipped,
        failed = failed,
    );
}
