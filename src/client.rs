//! Request executor.
//!
//! Keep the public surface small and predictable: one executor, built once,
//! shared by every caller. Implementation details are split into submodules
//! under `src/client/`.

pub mod builder;
pub mod core;
mod execution;

pub use builder::RequestExecutorBuilder;
pub use core::RequestExecutor;
