//! Structured observability hooks for run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: run start, item
//!   completion, run finish
//!
//! Events are emitted at `info!` level; verbosity is controlled by the
//! subscriber installed in [`crate::telemetry`].

use tracing::info;

/// RAII guard that enters a run-scoped tracing span for the duration of a
/// run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // All tracing calls are now associated with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("unitreg.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: run started with category, item count and worker limit.
pub fn emit_run_started(run_id: &str, category: &str, items: usize, jobs: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        category = %category,
        items = items,
        jobs = jobs,
    );
}

/// Emit event: one work item reached a terminal outcome.
pub fn emit_item_finished(run_id: &str, unit: &str, status: &str, attempts: u32, duration_ms: u64) {
    info!(
        event = "item.finished",
        run_id = %run_id,
        unit = %unit,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: run finished with duration, item count and overall verdict.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, items: usize, failing: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        items = items,
        failing = failing,
    );
}
