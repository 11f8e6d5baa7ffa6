//! Extension lifecycle and the per-extension facade.
//!
//! `kernel` owns loading and unloading, `context` is what extension code is
//! handed, `manifest` is the declaration validated before activation.

pub mod context;
pub mod kernel;
pub mod manifest;
mod services;

pub use services::{HostServices, ReleaseSummary};
