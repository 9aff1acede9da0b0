//! Bytecode worker threads (§4.4): each owns a local FIFO of runnable
//! processes, pulled from the kernel's shared intake/overflow queues in
//! batches so workers aren't all hammering the same lock every quantum.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::kernel::{BytecodeStep, Kernel};
use crate::process::Process;

/// How many processes a worker grabs from the kernel at once when its local
/// queue runs dry.
const BATCH_SIZE: usize = 16;

pub fn run(kernel: Arc<Kernel>, worker_id: usize) {
    let _span = tracing::info_span!("bytecode_worker", worker_id).entered();
    let mut local: VecDeque<Box<Process>> = VecDeque::new();

    loop {
        if local.is_empty() {
            local.extend(kernel.bytecode_pull_batch(BATCH_SIZE));
        }

        let mut process = match local.pop_front() {
            Some(p) => p,
            None => {
                if kernel.is_shutting_down() {
                    return;
                }
                kernel.bytecode_park();
                continue;
            }
        };

        process.instructions_run = 0;
        match kernel.bytecode_run_slice(&mut process) {
            BytecodeStep::Requeue => local.push_back(process),
            BytecodeStep::Suspend => kernel.bytecode_park_waiting(process),
            BytecodeStep::ForeignCall(request) => kernel.submit_ffi(request),
            BytecodeStep::Finished(outcome) => {
                let pid = process.pid();
                kernel.bytecode_finish(pid, outcome);
            }
        }
    }
}
