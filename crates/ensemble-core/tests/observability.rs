//! Observability tests for dispatch tracing and metrics.

use ensemble_core::fakes::Label;
use ensemble_core::metrics::METRICS;
use ensemble_core::obs::{
    emit_dispatch_finished, emit_dispatch_started, emit_recast, emit_worker_failure, DispatchSpan,
};
use ensemble_core::{CallArgs, Ensemble, EnsembleOptions};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_dispatch_lifecycle() {
    let _span = DispatchSpan::enter("labels", "upper");
    emit_dispatch_started("labels", "upper", 3, "sequential");
    emit_recast("upper", "values");
    emit_dispatch_finished("labels", "upper", "values");
    assert!(logs_contain("dispatch.started"));
    assert!(logs_contain("mode=sequential"));
    assert!(logs_contain("dispatch.recast"));
    assert!(logs_contain("dispatch.finished"));
}

#[traced_test]
#[test]
fn test_emit_worker_failure_logs_warning() {
    emit_worker_failure("load", 2, 5);
    assert!(logs_contain("WARN"));
    assert!(logs_contain("dispatch.worker_failure"));
    assert!(logs_contain("failed=2"));
}

#[traced_test]
#[test]
fn test_dispatch_counts_calls_and_recasts() {
    let mut ens = Ensemble::from_members(
        vec![Label::new("a"), Label::new("b")],
        EnsembleOptions::new(),
    )
    .unwrap();
    let calls_before = METRICS.member_calls();
    let recasts_before = METRICS.recasts();
    let dispatches_before = METRICS.dispatches();

    ens.dispatch("upper")
        .unwrap()
        .into_method()
        .unwrap()
        .call(CallArgs::new())
        .unwrap();

    // counters are global; other tests may add to them concurrently
    assert!(METRICS.member_calls() >= calls_before + 2);
    assert!(METRICS.recasts() > recasts_before);
    assert!(METRICS.dispatches() > dispatches_before);
    assert!(logs_contain("dispatch.finished"));
    assert!(logs_contain("attr=upper"));
    METRICS.flush();
}
