//! Detach event handling.
//!
//! Detach events are reported, never unwound: the orchestrator's own step
//! failures are what end a run.

use appdump_protocol::{CrashReport, DetachReason};
use tracing::{debug, error, warn};

use crate::backend::DetachObserver;

/// How loudly a detach should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachSeverity {
    /// We asked for it.
    Expected,
    /// The engine went away; worth mentioning.
    Notice,
    /// The process died or the link broke unexpectedly.
    Fatal,
}

pub fn classify_detach(reason: &DetachReason, crash: Option<&CrashReport>) -> DetachSeverity {
    if crash.is_some() {
        return DetachSeverity::Fatal;
    }
    match reason {
        DetachReason::ApplicationRequested => DetachSeverity::Expected,
        DetachReason::ServerTerminated => DetachSeverity::Notice,
        _ => DetachSeverity::Fatal,
    }
}

/// Logs a detach at the level its severity calls for.
pub fn log_detach(label: &str, pid: u32, reason: &DetachReason, crash: Option<&CrashReport>) {
    match classify_detach(reason, crash) {
        DetachSeverity::Expected => debug!(session = label, pid, %reason, "session detached"),
        DetachSeverity::Notice => warn!(session = label, pid, %reason, "session detached"),
        DetachSeverity::Fatal => match crash {
            Some(crash) => error!(
                session = label,
                pid,
                %reason,
                crash = %crash.summary,
                report = %crash.report,
                "process crashed"
            ),
            None => error!(session = label, pid, %reason, "session lost"),
        },
    }
}

/// Builds an observer that logs detaches of the given session.
pub fn logging_observer(label: impl Into<String>, pid: u32) -> DetachObserver {
    let label = label.into();
    Box::new(move |reason, crash| log_detach(&label, pid, &reason, crash.as_ref()))
}
