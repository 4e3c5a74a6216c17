//! Structured observability hooks for ensemble dispatch.
//!
//! - `DispatchSpan` RAII guard scoping a synchronous dispatch
//! - `dispatch_span` for instrumenting async (parallel) dispatch
//! - emitters for dispatch start/finish, recasting and worker failures
//!
//! Events are emitted at `info!`/`debug!`; failures at `warn!`.

use tracing::{debug, info, warn};

/// RAII guard that enters a dispatch-scoped span.
///
/// ```ignore
/// let _span = DispatchSpan::enter("cmip-models", "mean");
/// // member calls below are tagged with ensemble and attr
/// ```
pub struct DispatchSpan {
    _span: tracing::span::EnteredSpan,
}

impl DispatchSpan {
    pub fn enter(ensemble: &str, attr: &str) -> Self {
        Self {
            _span: dispatch_span(ensemble, attr).entered(),
        }
    }
}

/// The span used for one dispatch; attach it to futures with
/// `tracing::Instrument`.
pub fn dispatch_span(ensemble: &str, attr: &str) -> tracing::Span {
    tracing::info_span!("ensemble.dispatch", ensemble = %ensemble, attr = %attr)
}

/// Emit event: collective call started.
pub fn emit_dispatch_started(ensemble: &str, attr: &str, members: usize, mode: &str) {
    info!(
        event = "dispatch.started",
        ensemble = %ensemble,
        attr = %attr,
        members = members,
        mode = %mode,
    );
}

/// Emit event: collective call finished with the recast shape.
pub fn emit_dispatch_finished(ensemble: &str, attr: &str, shape: &str) {
    info!(event = "dispatch.finished", ensemble = %ensemble, attr = %attr, shape = %shape);
}

pub fn emit_recast(attr: &str, shape: &str) {
    debug!(event = "dispatch.recast", attr = %attr, shape = %shape);
}

/// Emit event: parallel units failed (warning level).
pub fn emit_worker_failure(method: &str, failed: usize, submitted: usize) {
    warn!(
        event = "dispatch.worker_failure",
        method = %method,
        failed = failed,
        submitted = submitted,
    );
}
