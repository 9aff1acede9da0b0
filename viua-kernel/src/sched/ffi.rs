//! The FFI scheduler pool (§4.5): pulls queued foreign calls, resolves them
//! against the kernel's foreign-function table, and runs them directly on
//! this thread. A native function that panics would take this worker down
//! with it — same tradeoff the bytecode workers make for a malformed
//! instruction stream, since neither side is sandboxed from the other.

use std::sync::Arc;

use crate::err::RuntimeError;
use crate::kernel::{ForeignCallRequest, Kernel};
use crate::process::ProcessState;
use crate::value::{Exception, Value};

pub fn run(kernel: Arc<Kernel>) {
    loop {
        let request = match kernel.ffi_pull() {
            Some(r) => r,
            None => {
                if kernel.is_shutting_down() {
                    return;
                }
                kernel.ffi_park();
                continue;
            }
        };

        let ForeignCallRequest {
            mut process,
            function,
            frame,
            return_slot,
            void_return,
        } = request;

        let result = match kernel.ffi_resolve(&function) {
            Some(native) => native(&frame, &mut process, &kernel),
            None => Err(RuntimeError::FunctionNotFound(function.clone())),
        };

        match result {
            Ok(value) => {
                process.state = ProcessState::Runnable;
                if !void_return {
                    if let Some(caller) = process.stack.top_frame_mut() {
                        let _ = caller.locals.set(return_slot, value);
                    }
                }
                kernel.ffi_requeue(process);
            }
            Err(error) => {
                let tag = match &error {
                    RuntimeError::FunctionNotFound(_) => "FunctionNotFound",
                    _ => "IoError",
                };
                let exception = Exception::new(tag, Value::Strite(error.to_string()));
                kernel.ffi_unwind_or_finish(process, exception);
            }
        }
    }
}
