//! Execution runtime for viua: the value model, per-process call stack,
//! instruction dispatch, schedulers, and module loader.
//!
//! This crate is the kernel proper; the `viua` binary crate is a thin CLI
//! bootstrap around it.

pub mod decode;
pub mod dispatch;
pub mod err;
pub mod frame;
pub mod kernel;
pub mod loader;
pub mod process;
pub mod regset;
pub mod sched;
pub mod stack;
pub mod value;
