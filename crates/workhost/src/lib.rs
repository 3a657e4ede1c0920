//! Workhost - supervision layer for auxiliary worker processes
//!
//! A [`WorkerSupervisor`] owns exactly one child process: it spawns it,
//! decodes its output streams into text events, exchanges messages and
//! dedicated channel endpoints with it, classifies how it died, and
//! guarantees idempotent cleanup. [`ContextBoundSupervisor`] additionally
//! ties the worker's lifetime to an external owning context.
//!
//! Backends implement the `ProcessSpawner` seam; [`NativeSpawner`] is the
//! tokio-based production backend.

mod bound;
mod native;
mod supervisor;

pub use bound::ContextBoundSupervisor;
pub use native::{FixedExecutable, NativeSpawner};
pub use supervisor::{HostServices, WorkerSupervisor};

// Re-export core functionality
pub use workhost_core::*;
