//! Workflow orchestration.
//!
//! This module owns the detection → catalog → run → report lifecycle. UI and
//! CLI layers talk to it only through [`UiCommand`]s and the events it emits.

mod catalog;
mod controller;
mod handoff;
mod log_sink;
mod resolver;
mod session;
mod stream;

pub(crate) use controller::{run_controller, UiCommand};
pub use handoff::DownloadRequest;
