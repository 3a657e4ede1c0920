use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};

use crate::channel::MessagePort;

/// OS process id of a spawned worker.
pub type ProcessId = u32;

/// Everything the spawn facility needs to launch one worker process.
///
/// Stdio is piped by contract; callers never see the raw streams, only the
/// decoded text events.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Unique `<kind>-<instance id>` name; crash notices are filtered
    /// against it.
    pub service_name: String,
    pub kind: String,
    pub args: Vec<String>,
    /// Runtime arguments, already carrying the worker-kind marker.
    pub exec_args: Vec<String>,
    /// Defensive copy of the configured environment, overlayed on the
    /// inherited one.
    pub env: HashMap<String, String>,
    pub allow_unsigned_libraries: bool,
}

/// Exit notification payload from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: i32,
    pub signal: Option<i32>,
}

/// Control surface of a live process, shared between the supervisor and
/// the backend's pump tasks.
#[async_trait]
pub trait ProcessLink: Send + Sync {
    fn pid(&self) -> Option<ProcessId>;

    /// Forwards a message to the process, optionally transferring channel
    /// endpoints. Returns false when the process cannot receive messages.
    fn post_message(&self, message: Value, transfers: Vec<MessagePort>) -> bool;

    /// Requests OS-level termination. Returns false when the request could
    /// not be delivered; the process may then still be alive.
    async fn terminate(&self) -> bool;

    /// Best-effort debugger attach. Returns false when the runtime exposes
    /// no such primitive for this process.
    fn attach_debugger(&self) -> bool;
}

/// A freshly spawned process, decomposed into the capabilities the
/// supervisor consumes.
///
/// The output streams are exclusively owned here; no other component may
/// read them concurrently.
pub struct SpawnedProcess {
    pub pid: Option<ProcessId>,
    pub link: Arc<dyn ProcessLink>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub messages: mpsc::UnboundedReceiver<Value>,
    pub exit: oneshot::Receiver<ProcessExit>,
}

/// The process-spawn facility. Implementations decide how workers are
/// actually launched; the supervisor only talks to this seam.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Whether the facility can spawn at all. An unavailable facility is a
    /// non-recoverable condition for callers.
    fn is_available(&self) -> bool;

    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess>;
}

/// Resolves a worker kind to the executable that hosts it. Resolution
/// policy lives outside this crate.
pub trait ExecutableResolver: Send + Sync {
    fn resolve(&self, kind: &str) -> Result<PathBuf>;
}
