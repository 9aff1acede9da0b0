//! Error types for the execution runtime.
//!
//! Mirrors the teacher's split between faults a process can recover from and
//! faults that are fatal to the kernel itself, but expressed with `thiserror`
//! since this crate runs hosted rather than `no_std`: `RuntimeError` is raised
//! by a single instruction or syscall and is either caught by a `try` block
//! inside the offending process or converted into that process's termination
//! exception, while `KernelError` can only come from the kernel's own
//! bookkeeping (module loading, scheduler startup) and always aborts whatever
//! operation produced it.

use thiserror::Error;

/// An error raised while executing a single instruction or servicing a
/// syscall on behalf of one process. Every variant is something a `try`
/// block in viua bytecode can be written to catch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("failed to decode instruction stream: {0}")]
    DecodeFailure(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("arity mismatch: expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("dereferenced a pointer whose target has been destroyed")]
    StaleReference,

    #[error("register index {index} out of range for a set of size {size}")]
    OutOfRange { index: u16, size: u16 },

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("no such key: {0}")]
    KeyNotFound(String),

    #[error("no such function: {0}")]
    FunctionNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("no catcher matches thrown value of type {0}")]
    Unhandled(&'static str),

    #[error("process {0} is not known to this kernel")]
    NoSuchProcess(viua_abi::Pid),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// An error that aborts the kernel itself rather than a single process:
/// malformed modules, scheduler setup failures, and the like. Unlike
/// `RuntimeError`, nothing inside running bytecode can catch this.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("malformed module {path}: {reason}")]
    MalformedModule { path: String, reason: String },

    #[error("failed to read module file {path}: {source}")]
    ModuleIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entry module {0} does not declare an {entry} symbol", entry = viua_abi::ENTRY_SYMBOL)]
    MissingEntryPoint(String),

    #[error("failed to start scheduler worker: {0}")]
    SchedulerStartup(String),
}

pub type KernelResult<T> = Result<T, KernelError>;
