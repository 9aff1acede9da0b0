//! The kernel: owns all loaded code, the process registry, and the queues
//! the three schedulers pull from (§4.4, §4.5, §4.6, §5).
//!
//! `Kernel` itself does not run anything; `sched::bytecode`, `sched::ffi` and
//! `sched::io` are the threads that call back into it. This mirrors the
//! teacher's split between a kernel that owns shared state behind small
//! locks and tasks that drive themselves against it, rather than a kernel
//! that pushes work onto tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use viua_abi::{Pid, PidAllocator, DEFAULT_QUANTUM};

use crate::dispatch::{self, io::IoOutcome, Outcome};
use crate::err::{KernelResult, RuntimeError};
use crate::frame::{Frame, TryFrame};
use crate::loader::{CodeSpace, ForeignFunctionMap, Loader, NativeModule};
use crate::process::{Inbox, Process, ProcessState};
use crate::regset::{RegisterSet, Role};
use crate::value::{Exception, Prototype, Value};

/// Tunables for the three schedulers (§4.4-§4.6). Kept as a plain struct
/// rather than builder methods, matching how the teacher threads small
/// config structs through its task and driver setup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of bytecode worker threads.
    pub bytecode_workers: usize,
    /// Number of FFI worker threads.
    pub ffi_workers: usize,
    /// Instructions a process may run before being forced to yield (§4.4).
    pub quantum: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bytecode_workers: 1,
            ffi_workers: 1,
            quantum: DEFAULT_QUANTUM,
        }
    }
}

/// The terminal state of a process, kept around so a later `join` can
/// retrieve it (§4.4).
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(Value),
    Failed(Exception),
}

/// One pending foreign call, queued for the FFI scheduler (§4.5).
pub struct ForeignCallRequest {
    pub process: Box<Process>,
    pub function: String,
    pub frame: Frame,
    pub return_slot: u16,
    pub void_return: bool,
}

/// One pending I/O operation, queued for the I/O scheduler (§4.6). Unlike a
/// foreign call, submitting one of these does not suspend its process:
/// `io-read`/`io-write`/`io-close` hand back an interaction id immediately,
/// and only `io-wait` actually blocks, matching the instruction set's split
/// between submission and await.
enum IoJob {
    Read { fd: i64, length: i64 },
    Write { fd: i64, buffer: Value },
    Close { fd: i64 },
}

#[derive(Clone)]
enum IoStatus {
    Pending,
    Done(Value),
    Error(String),
    Cancelled,
}

/// What a quantum of execution decided to do with its process.
enum SliceResult {
    /// Still runnable; quantum expired or the process yielded voluntarily.
    Requeue,
    /// Parked until something external wakes it.
    Suspend,
    ForeignCall(ForeignCallRequest),
    Finished(ProcessOutcome),
}

fn wrap(error: RuntimeError) -> Exception {
    let tag = match &error {
        RuntimeError::DecodeFailure(_) => "DecodeFailure",
        RuntimeError::TypeMismatch { .. } => "TypeMismatch",
        RuntimeError::ArityMismatch { .. } => "ArityMismatch",
        RuntimeError::StaleReference => "StaleReference",
        RuntimeError::OutOfRange { .. } => "OutOfRange",
        RuntimeError::ResourceExhaustion(_) => "ResourceExhaustion",
        RuntimeError::ModuleNotFound(_) => "ModuleNotFound",
        RuntimeError::KeyNotFound(_) => "KeyNotFound",
        RuntimeError::FunctionNotFound(_) => "FunctionNotFound",
        RuntimeError::IoError(_) => "IoError",
        RuntimeError::Unhandled(_) => "Unhandled",
        RuntimeError::NoSuchProcess(_) => "NoSuchProcess",
    };
    Exception::new(tag, Value::Strite(error.to_string()))
}

pub struct Kernel {
    pub config: SchedulerConfig,
    code: Mutex<CodeSpace>,
    ffi_functions: Mutex<ForeignFunctionMap>,
    loader: Loader,

    inboxes: Mutex<HashMap<Pid, Arc<Inbox>>>,
    results: Mutex<HashMap<Pid, ProcessOutcome>>,
    pid_alloc: Mutex<PidAllocator>,
    active: AtomicUsize,

    /// Class descriptors registered ahead of time, keyed by class name, so
    /// a catcher on an ancestor type can match a thrown subtype (§4.3).
    prototypes: Mutex<HashMap<String, Prototype>>,

    /// Newly spawned processes, not yet picked up by any worker.
    intake: Mutex<VecDeque<Box<Process>>>,
    /// Processes woken up (message delivered, join/ffi/io settled) and
    /// waiting to be redistributed to a bytecode worker.
    overflow: Mutex<VecDeque<Box<Process>>>,
    wake: Mutex<()>,
    cv: Condvar,

    /// Processes parked off any runqueue: waiting on a message, a join
    /// target, or an `io-wait`.
    waiting: Mutex<HashMap<Pid, Box<Process>>>,

    ffi_queue: Mutex<VecDeque<ForeignCallRequest>>,
    ffi_wake: Mutex<()>,
    ffi_cv: Condvar,

    io_queue: Mutex<VecDeque<(i64, IoJob)>>,
    interactions: Mutex<HashMap<i64, IoStatus>>,
    next_interaction: AtomicI64,
    io_wake: Mutex<()>,
    io_cv: Condvar,

    shutdown: AtomicBool,
    done: Mutex<()>,
    done_cv: Condvar,
}

impl Kernel {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            code: Mutex::new(CodeSpace::default()),
            ffi_functions: Mutex::new(ForeignFunctionMap::default()),
            loader: Loader::new(),
            inboxes: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            pid_alloc: Mutex::new(PidAllocator::new(0)),
            active: AtomicUsize::new(0),
            prototypes: Mutex::new(HashMap::new()),
            intake: Mutex::new(VecDeque::new()),
            overflow: Mutex::new(VecDeque::new()),
            wake: Mutex::new(()),
            cv: Condvar::new(),
            waiting: Mutex::new(HashMap::new()),
            ffi_queue: Mutex::new(VecDeque::new()),
            ffi_wake: Mutex::new(()),
            ffi_cv: Condvar::new(),
            io_queue: Mutex::new(VecDeque::new()),
            interactions: Mutex::new(HashMap::new()),
            next_interaction: AtomicI64::new(1),
            io_wake: Mutex::new(()),
            io_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            done: Mutex::new(()),
            done_cv: Condvar::new(),
        }
    }

    /// Registers an in-process stand-in for a `dlopen`-loaded module (see
    /// DESIGN.md, Open Question O1). Must be called before `run`.
    pub fn register_native(&mut self, module: NativeModule) {
        self.loader.register_native(module);
    }

    /// Declares a class's ancestors so catchers registered on a supertype
    /// can match an exception thrown as one of its subtypes (§4.3). Takes
    /// `&self` since it only touches a `Mutex`-guarded table, unlike
    /// `register_native`, so it may be called any time, including while the
    /// kernel is running.
    pub fn register_prototype(&self, prototype: Prototype) {
        self.prototypes
            .lock()
            .unwrap()
            .insert(prototype.name.clone(), prototype);
    }

    /// Points the loader at an additional directory to search for modules,
    /// ahead of the default search path. Must be called before `run`.
    pub fn add_search_dir(&mut self, dir: std::path::PathBuf) {
        self.loader.prepend_search_dir(dir);
    }

    /// Imports `name` into the shared code space, resolving it the same way
    /// an `import` instruction would (§4.7).
    pub fn import(&self, name: &str) -> KernelResult<()> {
        let mut code = self.code.lock().unwrap();
        let mut ffi = self.ffi_functions.lock().unwrap();
        self.loader.import(name, &mut code, &mut ffi)
    }

    /// Spawns the first process in this kernel, bound to `entry` with no
    /// arguments, and returns its pid.
    pub fn spawn_root(&self, entry: &str) -> Result<Pid, RuntimeError> {
        let frame = Frame::new(entry, RegisterSet::new(Role::Arguments, 0), 0);
        self.spawn(entry, frame)
    }

    fn spawn(&self, function: &str, mut frame: Frame) -> Result<Pid, RuntimeError> {
        let address = self
            .code
            .lock()
            .unwrap()
            .address_of(function)
            .ok_or_else(|| RuntimeError::FunctionNotFound(function.to_owned()))?;
        frame.function_name = function.to_owned();
        frame.return_address = 0;
        frame.void_return = true;

        let pid = self.pid_alloc.lock().unwrap().allocate();
        let mut process = Box::new(Process::new(pid));
        self.inboxes
            .lock()
            .unwrap()
            .insert(pid, Arc::clone(&process.inbox));
        process.stack.push_frame(frame);
        process.instruction_pointer = address;

        self.active.fetch_add(1, Ordering::SeqCst);
        self.intake.lock().unwrap().push_back(process);
        self.notify_bytecode();
        Ok(pid)
    }

    pub fn result_of(&self, pid: Pid) -> Option<ProcessOutcome> {
        self.results.lock().unwrap().get(&pid).cloned()
    }

    fn notify_bytecode(&self) {
        let _guard = self.wake.lock().unwrap();
        self.cv.notify_all();
    }

    fn notify_ffi(&self) {
        let _guard = self.ffi_wake.lock().unwrap();
        self.ffi_cv.notify_all();
    }

    fn notify_io(&self) {
        let _guard = self.io_wake.lock().unwrap();
        self.io_cv.notify_all();
    }

    fn mark_done_if_idle(&self) {
        if self.active.load(Ordering::SeqCst) == 0 {
            let _guard = self.done.lock().unwrap();
            self.done_cv.notify_all();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Pulls up to `n` processes for a bytecode worker's local FIFO,
    /// draining `intake` before `overflow` (§4.4).
    #[allow(clippy::vec_box)]
    fn pull_batch(&self, n: usize) -> Vec<Box<Process>> {
        let mut batch = Vec::new();
        {
            let mut intake = self.intake.lock().unwrap();
            while batch.len() < n {
                match intake.pop_front() {
                    Some(p) => batch.push(p),
                    None => break,
                }
            }
        }
        if batch.len() < n {
            let mut overflow = self.overflow.lock().unwrap();
            while batch.len() < n {
                match overflow.pop_front() {
                    Some(p) => batch.push(p),
                    None => break,
                }
            }
        }
        batch
    }

    /// Scans parked processes for message waits whose deadline has passed
    /// and moves them back onto `overflow` with nothing delivered, so their
    /// next quantum sees an empty mailbox (§5). Called by idle bytecode
    /// workers rather than a dedicated thread, matching the teacher's
    /// preference for folding small periodic chores into existing loops
    /// instead of spinning up more of them.
    fn reap_expired_waits(&self) {
        let mut waiting = self.waiting.lock().unwrap();
        let expired: Vec<Pid> = waiting
            .iter()
            .filter(|(_, p)| p.message_wait_is_over())
            .map(|(pid, _)| *pid)
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut ready = Vec::new();
        for pid in expired {
            if let Some(p) = waiting.remove(&pid) {
                ready.push(p);
            }
        }
        drop(waiting);
        self.overflow.lock().unwrap().extend(ready);
    }

    /// Blocks a bytecode worker until there is work or the kernel is
    /// shutting down.
    fn park_bytecode_worker(&self) {
        self.reap_expired_waits();
        let guard = self.wake.lock().unwrap();
        let _ = self
            .cv
            .wait_timeout(guard, std::time::Duration::from_millis(10))
            .unwrap();
    }

    fn park_ffi_worker(&self) {
        let guard = self.ffi_wake.lock().unwrap();
        let _ = self
            .ffi_cv
            .wait_timeout(guard, std::time::Duration::from_millis(10))
            .unwrap();
    }

    fn park_io_worker(&self) {
        let guard = self.io_wake.lock().unwrap();
        let _ = self
            .io_cv
            .wait_timeout(guard, std::time::Duration::from_millis(10))
            .unwrap();
    }

    /// Delivers `message` to `target`'s inbox, waking it if it was parked
    /// waiting for one (§5).
    fn deliver(&self, target: Pid, message: Value) -> Result<(), RuntimeError> {
        let inbox = {
            let inboxes = self.inboxes.lock().unwrap();
            inboxes.get(&target).cloned()
        };
        let inbox = inbox.ok_or(RuntimeError::NoSuchProcess(target))?;
        inbox.push(message);

        let mut waiting = self.waiting.lock().unwrap();
        let should_wake = waiting
            .get(&target)
            .map(|p| matches!(p.state, ProcessState::WaitingForMessage { .. }))
            .unwrap_or(false);
        if should_wake {
            if let Some(p) = waiting.remove(&target) {
                drop(waiting);
                self.overflow.lock().unwrap().push_back(p);
                self.notify_bytecode();
            }
        }
        Ok(())
    }

    /// Records a process's terminal outcome and wakes anything joined on
    /// it. A joiner whose own join-completion throws an uncaught exception
    /// (because its join target failed) cascades through the same
    /// worklist, rather than recursing.
    fn finish(&self, pid: Pid, outcome: ProcessOutcome) {
        let mut pending = vec![(pid, outcome)];
        while let Some((pid, outcome)) = pending.pop() {
            self.results.lock().unwrap().insert(pid, outcome.clone());
            self.inboxes.lock().unwrap().remove(&pid);
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut waiting = self.waiting.lock().unwrap();
            let joiners: Vec<Pid> = waiting
                .iter()
                .filter(|(_, p)| matches!(p.state, ProcessState::WaitingForJoin(t) if t == pid))
                .map(|(k, _)| *k)
                .collect();
            let mut removed = Vec::new();
            for jp in joiners {
                if let Some(p) = waiting.remove(&jp) {
                    removed.push(p);
                }
            }
            drop(waiting);

            for mut joiner in removed {
                let jp = joiner.pid();
                let register = joiner.awaiting_register.take();
                let settled = match (&outcome, register) {
                    (ProcessOutcome::Completed(v), Some(reg)) => {
                        let _ = dispatch::write(&mut joiner, reg, v.clone());
                        joiner.state = ProcessState::Runnable;
                        Ok(joiner)
                    }
                    (ProcessOutcome::Failed(exc), Some(_)) => match self.unwind(&mut joiner, exc.clone()) {
                        Ok(()) => {
                            joiner.state = ProcessState::Runnable;
                            Ok(joiner)
                        }
                        Err(exc2) => Err((jp, exc2)),
                    },
                    _ => {
                        joiner.state = ProcessState::Runnable;
                        Ok(joiner)
                    }
                };
                match settled {
                    Ok(p) => self.overflow.lock().unwrap().push_back(p),
                    Err((jp2, exc2)) => pending.push((jp2, ProcessOutcome::Failed(exc2))),
                }
            }
        }
        self.notify_bytecode();
        self.mark_done_if_idle();
    }

    /// Tries to find a catcher for `exception` by unwinding `process`'s
    /// stack, one call frame at a time (§4.3): a frame's own try-frames are
    /// searched and discarded first; only once none of them match does the
    /// call frame itself get popped and the search continue in the caller.
    ///
    /// The chain a catcher's key is matched against is the exception's
    /// declared type plus every ancestor of its registered `Prototype`, if
    /// one was declared via `register_prototype`; an exception whose tag has
    /// no registered prototype matches only on its own name.
    ///
    /// `Ok(())` means the exception was caught and `process.instruction_pointer`
    /// now points at the catcher; `Err` gives the exception back when nothing
    /// on the stack catches it.
    fn unwind(&self, process: &mut Process, exception: Exception) -> Result<(), Exception> {
        let chain: Vec<String> = match self.prototypes.lock().unwrap().get(&exception.tag) {
            Some(proto) => proto.inheritance_chain().map(str::to_owned).collect(),
            None => vec![exception.tag.clone()],
        };
        let chain: Vec<&str> = chain.iter().map(String::as_str).collect();
        loop {
            let current = match process.stack.depth() {
                0 => return Err(exception),
                n => n - 1,
            };
            loop {
                let belongs_here = process
                    .stack
                    .top_try_frame_mut()
                    .map(|tf| tf.frame_index == current)
                    .unwrap_or(false);
                if !belongs_here {
                    break;
                }
                let matched = process
                    .stack
                    .top_try_frame_mut()
                    .and_then(|tf: &mut TryFrame| tf.find_catcher(&chain).cloned());
                match matched {
                    Some(catcher) => {
                        process.stack.pop_try_frame();
                        if let Some(frame) = process.stack.frame_at_mut(current) {
                            let _ = frame
                                .locals
                                .set(catcher.target_register, Value::Exception(exception));
                        }
                        process.instruction_pointer = catcher.target_address;
                        return Ok(());
                    }
                    None => {
                        process.stack.pop_try_frame();
                    }
                }
            }
            if process.stack.pop_frame().is_none() {
                return Err(exception);
            }
        }
    }

    /// Runs `process` for up to one quantum, reacting to whatever the
    /// instruction stream asks of the kernel (§4.4, §9).
    fn run_slice(&self, process: &mut Process) -> SliceResult {
        if let Some(reg) = process.awaiting_register.take() {
            if matches!(process.state, ProcessState::WaitingForMessage { .. }) {
                process.state = ProcessState::Runnable;
                match process.inbox.pop() {
                    Some(msg) => {
                        let _ = dispatch::write(process, reg, msg);
                    }
                    None => {
                        if let Err(exc) = self.unwind(
                            process,
                            Exception::new("EmptyMailbox", Value::Strite("receive timed out".into())),
                        ) {
                            return SliceResult::Finished(ProcessOutcome::Failed(exc));
                        }
                    }
                }
            } else if matches!(process.state, ProcessState::WaitingForIo) {
                process.state = ProcessState::Runnable;
                let interaction = process.awaiting_interaction.take();
                let status = interaction.and_then(|id| self.interactions.lock().unwrap().get(&id).cloned());
                let outcome = match status {
                    Some(IoStatus::Done(v)) => {
                        let _ = dispatch::write(process, reg, v);
                        None
                    }
                    Some(IoStatus::Error(msg)) => Some(Exception::new("IoError", Value::Strite(msg))),
                    Some(IoStatus::Cancelled) => Some(Exception::new(
                        "IoError",
                        Value::Strite("interaction was cancelled".into()),
                    )),
                    Some(IoStatus::Pending) | None => Some(Exception::new(
                        "IoError",
                        Value::Strite("no such interaction".into()),
                    )),
                };
                if let Some(exc) = outcome {
                    if let Err(exc) = self.unwind(process, exc) {
                        return SliceResult::Finished(ProcessOutcome::Failed(exc));
                    }
                }
            }
        }

        for _ in 0..self.config.quantum {
            let outcome = {
                let code = self.code.lock().unwrap();
                dispatch::step(process, &code)
            };
            let outcome = match outcome {
                Ok(o) => o,
                Err(e) => match self.unwind(process, wrap(e)) {
                    Ok(()) => continue,
                    Err(exc) => return SliceResult::Finished(ProcessOutcome::Failed(exc)),
                },
            };

            match outcome {
                Outcome::Advance => {}
                Outcome::Jump(addr) => process.instruction_pointer = addr,
                Outcome::Call { callee_frame, callee_address } => {
                    process.stack.push_frame(callee_frame);
                    process.instruction_pointer = callee_address;
                }
                Outcome::Return { value } => match process.stack.pop_frame() {
                    None => {
                        return SliceResult::Finished(ProcessOutcome::Completed(
                            value.unwrap_or(Value::Boolean(true)),
                        ))
                    }
                    Some(returned) => {
                        if process.stack.is_empty() {
                            return SliceResult::Finished(ProcessOutcome::Completed(
                                value.unwrap_or(Value::Boolean(true)),
                            ));
                        }
                        if !returned.void_return {
                            if let (Some(v), Some(frame)) = (value, process.stack.top_frame_mut()) {
                                let _ = frame.locals.set(returned.return_slot, v);
                            }
                        }
                        process.instruction_pointer = returned.return_address;
                    }
                },
                Outcome::Throw(value) => {
                    let exc = match value {
                        Value::Exception(e) => e,
                        Value::Object { ref class, .. } => {
                            let tag = class.clone();
                            Exception::new(tag, value)
                        }
                        other => Exception::new(other.type_name(), other),
                    };
                    if let Err(exc) = self.unwind(process, exc) {
                        return SliceResult::Finished(ProcessOutcome::Failed(exc));
                    }
                }
                Outcome::Spawn { function, frame, result_register } => match self.spawn(&function, frame) {
                    Ok(pid) => {
                        let _ = dispatch::write(process, result_register, Value::Process(pid));
                    }
                    Err(e) => {
                        if let Err(exc) = self.unwind(process, wrap(e)) {
                            return SliceResult::Finished(ProcessOutcome::Failed(exc));
                        }
                    }
                },
                Outcome::Send { target, message } => {
                    if let Err(e) = self.deliver(target, message) {
                        if let Err(exc) = self.unwind(process, wrap(e)) {
                            return SliceResult::Finished(ProcessOutcome::Failed(exc));
                        }
                    }
                }
                Outcome::Receive { timeout_ms, result_register } => match process.inbox.pop() {
                    Some(msg) => {
                        let _ = dispatch::write(process, result_register, msg);
                    }
                    None => {
                        process.wait_for_message(timeout_ms);
                        process.awaiting_register = Some(result_register);
                        return SliceResult::Suspend;
                    }
                },
                Outcome::Join { target, result_register } => {
                    let found = self.results.lock().unwrap().get(&target).cloned();
                    match found {
                        Some(ProcessOutcome::Completed(v)) => {
                            let _ = dispatch::write(process, result_register, v);
                        }
                        Some(ProcessOutcome::Failed(exc)) => {
                            if let Err(exc) = self.unwind(process, exc) {
                                return SliceResult::Finished(ProcessOutcome::Failed(exc));
                            }
                        }
                        None => {
                            process.state = ProcessState::WaitingForJoin(target);
                            process.awaiting_register = Some(result_register);
                            return SliceResult::Suspend;
                        }
                    }
                }
                Outcome::Import(name) => {
                    if let Err(e) = self.import(&name) {
                        if let Err(exc) = self.unwind(
                            process,
                            Exception::new("ModuleNotFound", Value::Strite(e.to_string())),
                        ) {
                            return SliceResult::Finished(ProcessOutcome::Failed(exc));
                        }
                    }
                }
                Outcome::Io(io_outcome) => {
                    if let Some(result) = self.submit_io(process, io_outcome) {
                        return result;
                    }
                }
                Outcome::ForeignCall { function, frame, return_slot, void_return } => {
                    process.state = ProcessState::WaitingForFfi;
                    let pid = process.pid();
                    return SliceResult::ForeignCall(ForeignCallRequest {
                        process: Box::new(std::mem::replace(process, Process::new(pid))),
                        function,
                        frame,
                        return_slot,
                        void_return,
                    });
                }
                Outcome::Halt => {
                    return SliceResult::Finished(ProcessOutcome::Completed(Value::Boolean(true)))
                }
            }
        }
        SliceResult::Requeue
    }

    /// Handles one I/O instruction's outcome. Returns `Some` only when the
    /// process must stop running this quantum (an `io-wait` that has to
    /// block, or an unhandled I/O exception); everything else resolves
    /// inline and execution continues.
    fn submit_io(&self, process: &mut Process, outcome: IoOutcome) -> Option<SliceResult> {
        match outcome {
            IoOutcome::Read { fd, length, result_register } => {
                let id = self.next_interaction.fetch_add(1, Ordering::SeqCst);
                self.interactions.lock().unwrap().insert(id, IoStatus::Pending);
                self.io_queue
                    .lock()
                    .unwrap()
                    .push_back((id, IoJob::Read { fd, length }));
                self.notify_io();
                let _ = dispatch::write(process, result_register, Value::Integer(id));
                None
            }
            IoOutcome::Write { fd, buffer, result_register } => {
                let id = self.next_interaction.fetch_add(1, Ordering::SeqCst);
                self.interactions.lock().unwrap().insert(id, IoStatus::Pending);
                self.io_queue
                    .lock()
                    .unwrap()
                    .push_back((id, IoJob::Write { fd, buffer }));
                self.notify_io();
                let _ = dispatch::write(process, result_register, Value::Integer(id));
                None
            }
            IoOutcome::Close { fd } => {
                let id = self.next_interaction.fetch_add(1, Ordering::SeqCst);
                self.interactions.lock().unwrap().insert(id, IoStatus::Pending);
                self.io_queue.lock().unwrap().push_back((id, IoJob::Close { fd }));
                self.notify_io();
                None
            }
            IoOutcome::Cancel { interaction } => {
                self.interactions.lock().unwrap().insert(interaction, IoStatus::Cancelled);
                None
            }
            IoOutcome::Wait { interaction, result_register } => {
                let status = self.interactions.lock().unwrap().get(&interaction).cloned();
                match status {
                    Some(IoStatus::Done(v)) => {
                        let _ = dispatch::write(process, result_register, v);
                        None
                    }
                    Some(IoStatus::Error(msg)) => {
                        match self.unwind(process, Exception::new("IoError", Value::Strite(msg))) {
                            Ok(()) => None,
                            Err(exc) => Some(SliceResult::Finished(ProcessOutcome::Failed(exc))),
                        }
                    }
                    Some(IoStatus::Cancelled) => match self.unwind(
                        process,
                        Exception::new("IoError", Value::Strite("interaction was cancelled".into())),
                    ) {
                        Ok(()) => None,
                        Err(exc) => Some(SliceResult::Finished(ProcessOutcome::Failed(exc))),
                    },
                    Some(IoStatus::Pending) | None => {
                        process.state = ProcessState::WaitingForIo;
                        process.awaiting_register = Some(result_register);
                        process.awaiting_interaction = Some(interaction);
                        Some(SliceResult::Suspend)
                    }
                }
            }
        }
    }

    /// Completes an I/O job performed by the I/O scheduler thread, marking
    /// the interaction done and waking anything `io-wait`ing on it.
    fn complete_io(&self, id: i64, status: IoStatus) {
        self.interactions.lock().unwrap().insert(id, status);
        let mut waiting = self.waiting.lock().unwrap();
        let pid = waiting
            .iter()
            .find(|(_, p)| p.awaiting_interaction == Some(id))
            .map(|(pid, _)| *pid);
        if let Some(pid) = pid {
            if let Some(p) = waiting.remove(&pid) {
                drop(waiting);
                self.overflow.lock().unwrap().push_back(p);
                self.notify_bytecode();
            }
        }
    }

    /// Imports `entry_module`, spawns every scheduler thread, runs its
    /// `__entry` function to completion, and joins every thread in reverse
    /// dependency order: I/O first (nothing waits on it to start new work),
    /// then FFI, then bytecode workers last (§5).
    pub fn run(self: Arc<Self>, entry_module: &str) -> KernelResult<ProcessOutcome> {
        self.import(entry_module)?;
        let root = self
            .spawn_root(viua_abi::ENTRY_SYMBOL)
            .map_err(|e| crate::err::KernelError::SchedulerStartup(e.to_string()))?;

        let mut bytecode_handles: Vec<JoinHandle<()>> = Vec::new();
        for worker_id in 0..self.config.bytecode_workers.max(1) {
            let kernel = Arc::clone(&self);
            bytecode_handles.push(std::thread::spawn(move || {
                crate::sched::bytecode::run(kernel, worker_id)
            }));
        }
        let mut ffi_handles: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..self.config.ffi_workers.max(1) {
            let kernel = Arc::clone(&self);
            ffi_handles.push(std::thread::spawn(move || crate::sched::ffi::run(kernel)));
        }
        let io_handle = {
            let kernel = Arc::clone(&self);
            std::thread::spawn(move || crate::sched::io::run(kernel))
        };

        {
            let guard = self.done.lock().unwrap();
            let _guard = self
                .done_cv
                .wait_while(guard, |_| self.active.load(Ordering::SeqCst) > 0)
                .unwrap();
        }

        self.shutdown.store(true, Ordering::SeqCst);
        self.notify_bytecode();
        self.notify_ffi();
        self.notify_io();

        io_handle.join().ok();
        for h in ffi_handles {
            h.join().ok();
        }
        for h in bytecode_handles {
            h.join().ok();
        }

        Ok(self
            .result_of(root)
            .unwrap_or(ProcessOutcome::Completed(Value::Boolean(true))))
    }
}

/// Entry points the scheduler modules use to pull work and report results;
/// kept as inherent methods so this is the only module that ever touches
/// `Kernel`'s private queues.
impl Kernel {
    #[allow(clippy::vec_box)]
    pub(crate) fn bytecode_pull_batch(&self, n: usize) -> Vec<Box<Process>> {
        self.pull_batch(n)
    }

    pub(crate) fn bytecode_park(&self) {
        self.park_bytecode_worker();
    }

    pub(crate) fn bytecode_run_slice(&self, process: &mut Process) -> BytecodeStep {
        match self.run_slice(process) {
            SliceResult::Requeue => BytecodeStep::Requeue,
            SliceResult::Suspend => BytecodeStep::Suspend,
            SliceResult::ForeignCall(req) => BytecodeStep::ForeignCall(req),
            SliceResult::Finished(outcome) => BytecodeStep::Finished(outcome),
        }
    }

    pub(crate) fn bytecode_park_waiting(&self, process: Box<Process>) {
        let pid = process.pid();
        self.waiting.lock().unwrap().insert(pid, process);
    }

    pub(crate) fn bytecode_finish(&self, pid: Pid, outcome: ProcessOutcome) {
        self.finish(pid, outcome);
    }

    pub(crate) fn submit_ffi(&self, request: ForeignCallRequest) {
        self.ffi_queue.lock().unwrap().push_back(request);
        self.notify_ffi();
    }

    pub(crate) fn ffi_pull(&self) -> Option<ForeignCallRequest> {
        self.ffi_queue.lock().unwrap().pop_front()
    }

    pub(crate) fn ffi_park(&self) {
        self.park_ffi_worker();
    }

    pub(crate) fn ffi_resolve(&self, name: &str) -> Option<crate::loader::NativeFn> {
        self.ffi_functions.lock().unwrap().resolve(name)
    }

    pub(crate) fn ffi_requeue(&self, process: Box<Process>) {
        self.overflow.lock().unwrap().push_back(process);
        self.notify_bytecode();
    }

    pub(crate) fn ffi_unwind_or_finish(&self, mut process: Box<Process>, exc: Exception) {
        match self.unwind(&mut process, exc) {
            Ok(()) => {
                process.state = ProcessState::Runnable;
                self.overflow.lock().unwrap().push_back(process);
                self.notify_bytecode();
            }
            Err(exc) => {
                let pid = process.pid();
                self.finish(pid, ProcessOutcome::Failed(exc));
            }
        }
    }

    pub(crate) fn io_pull(&self) -> Option<(i64, IoJobHandle)> {
        self.io_queue.lock().unwrap().pop_front().map(|(id, job)| {
            (
                id,
                match job {
                    IoJob::Read { fd, length } => IoJobHandle::Read { fd, length },
                    IoJob::Write { fd, buffer } => IoJobHandle::Write { fd, buffer },
                    IoJob::Close { fd } => IoJobHandle::Close { fd },
                },
            )
        })
    }

    pub(crate) fn io_is_cancelled(&self, id: i64) -> bool {
        matches!(self.interactions.lock().unwrap().get(&id), Some(IoStatus::Cancelled))
    }

    pub(crate) fn io_park(&self) {
        self.park_io_worker();
    }

    pub(crate) fn io_complete(&self, id: i64, value: Value) {
        self.complete_io(id, IoStatus::Done(value));
    }

    pub(crate) fn io_fail(&self, id: i64, message: String) {
        self.complete_io(id, IoStatus::Error(message));
    }

    pub(crate) fn io_cancelled(&self, id: i64) {
        self.complete_io(id, IoStatus::Cancelled);
    }
}

/// What a bytecode worker should do after one quantum, re-expressed in
/// terms the scheduler module can match on without reaching into
/// `Kernel`'s private `SliceResult`.
pub(crate) enum BytecodeStep {
    Requeue,
    Suspend,
    ForeignCall(ForeignCallRequest),
    Finished(ProcessOutcome),
}

/// A decoded I/O job handed to `sched::io`, re-exposed without the private
/// `IoJob` name.
pub(crate) enum IoJobHandle {
    Read { fd: i64, length: i64 },
    Write { fd: i64, buffer: Value },
    Close { fd: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_abi::{AccessMode, Opcode, RegisterSetTag, MODULE_MAGIC, SEGMENT_SEPARATOR};

    fn register_operand(mode: AccessMode, set: RegisterSetTag, index: u16) -> Vec<u8> {
        let mut out = vec![mode as u8, set as u8];
        out.extend_from_slice(&index.to_le_bytes());
        out
    }

    fn executable_module(code: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MODULE_MAGIC);
        bytes.push(b'E');
        bytes.extend_from_slice(viua_abi::ENTRY_SYMBOL.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.push(SEGMENT_SEPARATOR);
        bytes.extend_from_slice(code);
        bytes
    }

    fn temp_module(code: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "viua-kernel-test-{:?}-{}",
            std::thread::current().id(),
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(viua_abi::ENTRY_SYMBOL);
        std::fs::write(&path, executable_module(code)).unwrap();
        (dir, path)
    }

    #[test]
    fn running_to_completion_returns_integer_constant() {
        // allocate-registers 1
        // integer %0 local 42
        // return %0 local
        let mut code = Vec::new();
        code.push(Opcode::AllocateRegisters as u8);
        code.extend_from_slice(&1u16.to_le_bytes());
        code.push(Opcode::Integer as u8);
        code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
        code.extend_from_slice(&42i32.to_le_bytes());
        code.push(Opcode::Return as u8);
        code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

        let (dir, _path) = temp_module(&code);
        let mut kernel = Kernel::new(SchedulerConfig::default());
        kernel.add_search_dir(dir.clone());

        let kernel = Arc::new(kernel);
        let outcome = kernel.run(viua_abi::ENTRY_SYMBOL).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        match outcome {
            ProcessOutcome::Completed(v) => assert_eq!(v.str(), "42"),
            ProcessOutcome::Failed(e) => panic!("unexpected failure: {e:?}"),
        }
    }

    #[test]
    fn uncaught_throw_fails_the_process() {
        // allocate-registers 1
        // strite %0 local "boom"
        // throw %0 local
        let mut code = Vec::new();
        code.push(Opcode::AllocateRegisters as u8);
        code.extend_from_slice(&1u16.to_le_bytes());
        code.push(Opcode::Strite as u8);
        code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
        let msg = b"boom\0";
        code.extend_from_slice(msg);
        code.push(Opcode::Throw as u8);
        code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

        let (dir, _path) = temp_module(&code);
        let mut kernel = Kernel::new(SchedulerConfig::default());
        kernel.add_search_dir(dir.clone());

        let kernel = Arc::new(kernel);
        let outcome = kernel.run(viua_abi::ENTRY_SYMBOL).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert!(matches!(outcome, ProcessOutcome::Failed(_)));
    }
}
