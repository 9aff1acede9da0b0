//! The virtual process: a pid-identified execution context with its own
//! call stack, static registers, and inbox (§3).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use viua_abi::Pid;

use crate::decode::RegisterOperand;
use crate::regset::RegisterSet;
use crate::stack::Stack;
use crate::value::{Exception, Value};

/// What a process is doing right now, from the scheduler's point of view.
#[derive(Debug)]
pub enum ProcessState {
    Runnable,
    WaitingForMessage { deadline: Option<Instant> },
    WaitingForFfi,
    WaitingForIo,
    WaitingForJoin(Pid),
    Finished,
    Terminated(Exception),
}

/// A process's inbox: a FIFO of messages, guarded by its own mutex since
/// other processes deliver into it concurrently (§5).
#[derive(Default)]
pub struct Inbox {
    messages: Mutex<VecDeque<Value>>,
}

impl Inbox {
    pub fn push(&self, message: Value) {
        self.messages.lock().unwrap().push_back(message);
    }

    pub fn pop(&self) -> Option<Value> {
        self.messages.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().unwrap().is_empty()
    }
}

pub struct Process {
    pid: Pid,
    pub stack: Stack,
    pub statics: HashMap<String, RegisterSet>,
    /// Shared with the kernel's inbox registry so other processes can
    /// deliver messages without needing access to this `Process` itself,
    /// which may be owned by a scheduler worker mid-quantum (§5).
    pub inbox: Arc<Inbox>,
    pub state: ProcessState,
    pub instruction_pointer: u64,
    pub last_exception: Option<Exception>,
    /// Instructions executed in the current quantum; reset by the
    /// scheduler at the start of each time slice (§4.4).
    pub instructions_run: u32,
    /// Staged by `frame`, consumed by `call`/`tailcall`/`process` (§4.2):
    /// the argument register set under construction for the next call.
    pub pending_frame: Option<crate::frame::Frame>,
    /// Register to settle once a suspended `receive` or `io-wait` resumes;
    /// cleared and acted on at the top of the next quantum (§4.6, §5).
    pub awaiting_register: Option<RegisterOperand>,
    /// Set alongside `awaiting_register` for `io-wait`, so the I/O scheduler
    /// knows which interaction this process is blocked on.
    pub awaiting_interaction: Option<i64>,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            stack: Stack::new(),
            statics: HashMap::new(),
            inbox: Arc::new(Inbox::default()),
            state: ProcessState::Runnable,
            instruction_pointer: 0,
            last_exception: None,
            instructions_run: 0,
            pending_frame: None,
            awaiting_register: None,
            awaiting_interaction: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ProcessState::Runnable)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            ProcessState::Finished | ProcessState::Terminated(_)
        )
    }

    /// Applies a `receive` with an optional timeout expressed in
    /// milliseconds, matching §5's cancellation/timeout rule.
    pub fn wait_for_message(&mut self, timeout_ms: Option<u64>) {
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.state = ProcessState::WaitingForMessage { deadline };
    }

    /// Called by the scheduler each poll while waiting for a message;
    /// returns `true` once the process should be woken (message arrived or
    /// the deadline has passed).
    pub fn message_wait_is_over(&self) -> bool {
        match &self.state {
            ProcessState::WaitingForMessage { deadline } => {
                !self.inbox.is_empty() || deadline.is_some_and(|d| Instant::now() >= d)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_process_is_runnable_with_empty_stack() {
        let p = Process::new(Pid::new(0, 1));
        assert!(p.is_runnable());
        assert!(p.stack.is_empty());
    }

    #[test]
    fn zero_timeout_wait_is_over_immediately_when_inbox_empty() {
        let mut p = Process::new(Pid::new(0, 1));
        p.wait_for_message(Some(0));
        std::thread::sleep(Duration::from_millis(1));
        assert!(p.message_wait_is_over());
    }

    #[test]
    fn wait_ends_as_soon_as_a_message_arrives() {
        let mut p = Process::new(Pid::new(0, 1));
        p.wait_for_message(None);
        assert!(!p.message_wait_is_over());
        p.inbox.push(Value::Integer(1));
        assert!(p.message_wait_is_over());
    }
}
