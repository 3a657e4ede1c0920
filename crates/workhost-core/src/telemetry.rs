use tracing::warn;

use crate::event::TerminationReason;

/// Fire-and-forget crash report, emitted once per classified crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashRecord {
    pub kind: String,
    pub reason: String,
    pub exit_code: i32,
}

impl CrashRecord {
    pub fn new(kind: impl Into<String>, reason: TerminationReason, exit_code: i32) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.as_code().to_string(),
            exit_code,
        }
    }
}

/// Sink for crash reports. Reporting is best-effort; sinks must not block.
pub trait TelemetrySink: Send + Sync {
    fn report_crash(&self, record: CrashRecord);
}

/// Sink that forwards crash records to the log stream.
#[derive(Debug, Default, Clone)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn report_crash(&self, record: CrashRecord) {
        warn!(
            kind = %record.kind,
            reason = %record.reason,
            exit_code = record.exit_code,
            "worker crash reported"
        );
    }
}

/// Sink that discards every report.
#[derive(Debug, Default, Clone)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn report_crash(&self, _record: CrashRecord) {}
}
