use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::emitter::Emitter;

/// The originating signal is never reported by the platform's exit
/// notification, so exit events always carry this sentinel.
pub const SIGNAL_UNKNOWN: &str = "unknown";

/// Classification of why a worker process died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    CleanExit,
    AbnormalExit,
    Killed,
    Crashed,
    Oom,
    LaunchFailed,
    IntegrityFailure,
}

impl TerminationReason {
    /// Wire-visible reason code, e.g. `clean-exit`.
    pub fn as_code(&self) -> &'static str {
        match self {
            TerminationReason::CleanExit => "clean-exit",
            TerminationReason::AbnormalExit => "abnormal-exit",
            TerminationReason::Killed => "killed",
            TerminationReason::Crashed => "crashed",
            TerminationReason::Oom => "oom",
            TerminationReason::LaunchFailed => "launch-failed",
            TerminationReason::IntegrityFailure => "integrity-failure",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Published when the platform reports a regular exit of the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub pid: u32,
    pub exit_code: i32,
    pub signal: String,
}

impl ExitEvent {
    pub fn new(pid: u32, exit_code: i32) -> Self {
        Self {
            pid,
            exit_code,
            signal: SIGNAL_UNKNOWN.to_string(),
        }
    }
}

/// Published when the platform reports an abnormal death, independent of
/// the exit notification path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEvent {
    pub pid: u32,
    pub exit_code: i32,
    pub reason: TerminationReason,
}

/// One emitter per observable worker event kind.
pub struct WorkerEvents {
    pub stdout: Emitter<String>,
    pub stderr: Emitter<String>,
    pub message: Emitter<Value>,
    pub exit: Emitter<ExitEvent>,
    pub crash: Emitter<CrashEvent>,
}

impl WorkerEvents {
    pub fn new() -> Self {
        Self {
            stdout: Emitter::new(),
            stderr: Emitter::new(),
            message: Emitter::new(),
            exit: Emitter::new(),
            crash: Emitter::new(),
        }
    }
}

impl Default for WorkerEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&TerminationReason::LaunchFailed).unwrap();
        assert_eq!(json, "\"launch-failed\"");

        let parsed: TerminationReason = serde_json::from_str("\"integrity-failure\"").unwrap();
        assert_eq!(parsed, TerminationReason::IntegrityFailure);
    }

    #[test]
    fn test_reason_code_matches_display() {
        for reason in [
            TerminationReason::CleanExit,
            TerminationReason::AbnormalExit,
            TerminationReason::Killed,
            TerminationReason::Crashed,
            TerminationReason::Oom,
            TerminationReason::LaunchFailed,
            TerminationReason::IntegrityFailure,
        ] {
            assert_eq!(reason.to_string(), reason.as_code());
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_code()));
        }
    }

    #[test]
    fn test_exit_event_signal_is_the_sentinel() {
        let event = ExitEvent::new(42, 0);
        assert_eq!(event.signal, SIGNAL_UNKNOWN);
    }
}
