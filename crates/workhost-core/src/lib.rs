//! Workhost Core - platform-independent worker supervision primitives
//!
//! This crate provides the configuration, error types, typed event
//! plumbing, and boundary traits that are shared across backends. The
//! supervisor itself lives in the main `workhost` crate.

mod channel;
mod config;
mod context;
mod decode;
mod emitter;
mod error;
mod event;
mod ident;
mod monitor;
mod process;
mod telemetry;

pub use channel::*;
pub use config::*;
pub use context::*;
pub use decode::*;
pub use emitter::*;
pub use error::*;
pub use event::*;
pub use ident::*;
pub use monitor::*;
pub use process::*;
pub use telemetry::*;
