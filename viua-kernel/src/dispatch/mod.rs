//! Opcode dispatch: one handler per instruction family, each returning an
//! `Outcome` that the interpreter loop reacts to (§9 design note — this
//! replaces the source's native throw/catch and coroutine hand-offs with an
//! explicit result-and-unwind discipline).

pub mod arithmetic;
pub mod concurrency;
pub mod container;
pub mod control;
pub mod ctor;
pub mod data;
pub mod exceptions;
pub mod io;

use viua_abi::{AccessMode, Opcode, RegisterSetTag};

use crate::decode::{Cursor, RegisterOperand};
use crate::err::{RuntimeError, RuntimeResult};
use crate::loader::CodeSpace;
use crate::process::Process;
use crate::regset::RegisterSet;
use crate::value::Value;

/// What the interpreter loop should do after one instruction has run.
pub enum Outcome {
    /// Keep running from the cursor's new position.
    Advance,
    /// Jump to an absolute address within the current function.
    Jump(u64),
    /// A call resolved to bytecode: push `callee_frame` and jump there.
    Call {
        callee_frame: crate::frame::Frame,
        callee_address: u64,
    },
    /// A call resolved to a native function; the FFI scheduler should run
    /// it and the process should wait.
    ForeignCall {
        function: String,
        frame: crate::frame::Frame,
        return_slot: u16,
        void_return: bool,
    },
    /// The current frame returned; `value` is `None` for a void return.
    Return { value: Option<Value> },
    /// An exception is being raised; the interpreter should unwind.
    Throw(Value),
    /// `process` spawned a new process running `function`.
    Spawn {
        function: String,
        frame: crate::frame::Frame,
        result_register: RegisterOperand,
    },
    Send {
        target: viua_abi::Pid,
        message: Value,
    },
    Receive { timeout_ms: Option<u64>, result_register: RegisterOperand },
    Join {
        target: viua_abi::Pid,
        result_register: RegisterOperand,
    },
    Import(String),
    Io(io::IoOutcome),
    Halt,
}

/// Reads the value directly in a named register set slot, without
/// following pointers.
fn get_direct(
    process: &mut Process,
    set: RegisterSetTag,
    index: u16,
) -> RuntimeResult<&Value> {
    match set {
        RegisterSetTag::Local => process
            .stack
            .top_frame_mut()
            .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
            .locals
            .get(index),
        RegisterSetTag::Arguments => arguments_set_mut(process, index)?.get(index),
        RegisterSetTag::Static => {
            let name = process
                .stack
                .top_frame()
                .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
                .function_name
                .clone();
            static_set_mut(process, &name).get(index)
        }
    }
}

/// The `arguments` tag addresses the frame under construction while one is
/// staged (between `frame` and `call`/`tailcall`/`process`), and the current
/// frame's own arguments otherwise.
fn arguments_set_mut(
    process: &mut Process,
    index: u16,
) -> RuntimeResult<&mut RegisterSet> {
    if let Some(pending) = process.pending_frame.as_mut() {
        Ok(&mut pending.arguments)
    } else {
        Ok(&mut process
            .stack
            .top_frame_mut()
            .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
            .arguments)
    }
}

fn set_direct(
    process: &mut Process,
    set: RegisterSetTag,
    index: u16,
    value: Value,
) -> RuntimeResult<()> {
    match set {
        RegisterSetTag::Local => process
            .stack
            .top_frame_mut()
            .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
            .locals
            .set(index, value),
        RegisterSetTag::Arguments => arguments_set_mut(process, index)?.set(index, value),
        RegisterSetTag::Static => {
            let name = process
                .stack
                .top_frame()
                .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
                .function_name
                .clone();
            static_set_mut(process, &name).set(index, value)
        }
    }
}

fn take_direct(process: &mut Process, set: RegisterSetTag, index: u16) -> RuntimeResult<Value> {
    match set {
        RegisterSetTag::Local => process
            .stack
            .top_frame_mut()
            .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
            .locals
            .take(index),
        RegisterSetTag::Arguments => arguments_set_mut(process, index)?.take(index),
        RegisterSetTag::Static => {
            let name = process
                .stack
                .top_frame()
                .ok_or(RuntimeError::OutOfRange { index, size: 0 })?
                .function_name
                .clone();
            static_set_mut(process, &name).take(index)
        }
    }
}

/// Static register sets persist across invocations (§3), so they're created
/// lazily on first reference rather than when a frame is pushed.
fn static_set_mut<'p>(process: &'p mut Process, function: &str) -> &'p mut RegisterSet {
    process
        .statics
        .entry(function.to_owned())
        .or_insert_with(|| RegisterSet::new(crate::regset::Role::Static, 256))
}

pub fn read(process: &mut Process, op: RegisterOperand) -> RuntimeResult<Value> {
    match op.mode {
        AccessMode::Void => Err(RuntimeError::OutOfRange { index: op.index, size: 0 }),
        AccessMode::Direct => get_direct(process, op.set, op.index).cloned(),
        AccessMode::Pointer => {
            let base = get_direct(process, op.set, op.index)?.clone();
            let ptr = base.as_pointer()?;
            Ok(ptr.target()?.get())
        }
    }
}

pub fn write(process: &mut Process, op: RegisterOperand, value: Value) -> RuntimeResult<()> {
    match op.mode {
        AccessMode::Void => Ok(()),
        AccessMode::Direct => set_direct(process, op.set, op.index, value),
        AccessMode::Pointer => {
            let base = get_direct(process, op.set, op.index)?.clone();
            let ptr = base.as_pointer()?;
            ptr.target()?.set(value);
            Ok(())
        }
    }
}

pub fn take(process: &mut Process, op: RegisterOperand) -> RuntimeResult<Value> {
    match op.mode {
        AccessMode::Direct => take_direct(process, op.set, op.index),
        AccessMode::Pointer | AccessMode::Void => read(process, op),
    }
}

/// Executes one instruction starting at `process.instruction_pointer`,
/// advancing it unless the handler requests a jump.
pub fn step(process: &mut Process, code: &CodeSpace) -> RuntimeResult<Outcome> {
    let mut cursor = Cursor::at(code.code(), process.instruction_pointer as usize);
    let opcode = cursor.fetch_opcode()?;

    let outcome = match opcode {
        Opcode::IAdd | Opcode::ISub | Opcode::IMul | Opcode::IDiv | Opcode::IMod
        | Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::ILt
        | Opcode::ILte | Opcode::IGt | Opcode::IGte | Opcode::IEq => {
            arithmetic::binary(process, &mut cursor, opcode)?
        }
        Opcode::IInc | Opcode::IDec => arithmetic::unary(process, &mut cursor, opcode)?,

        Opcode::Move | Opcode::Copy | Opcode::Swap | Opcode::Delete | Opcode::IZero => {
            data::dispatch(process, &mut cursor, opcode)?
        }

        Opcode::Integer | Opcode::Float | Opcode::Strite | Opcode::Atom | Opcode::Vector
        | Opcode::Struct | Opcode::Object | Opcode::Boolean => {
            ctor::dispatch(process, &mut cursor, opcode)?
        }

        Opcode::VPush | Opcode::VPop | Opcode::VAt | Opcode::VLen | Opcode::StructInsert
        | Opcode::StructRemove | Opcode::StructAt | Opcode::StructKeys => {
            container::dispatch(process, &mut cursor, opcode)?
        }

        Opcode::Jump | Opcode::Branch | Opcode::Frame | Opcode::Call | Opcode::TailCall
        | Opcode::Return | Opcode::AllocateRegisters => {
            control::dispatch(process, code, &mut cursor, opcode)?
        }

        Opcode::Try | Opcode::Catch | Opcode::Enter | Opcode::Leave | Opcode::Throw
        | Opcode::Draw => exceptions::dispatch(process, &mut cursor, opcode)?,

        Opcode::Process | Opcode::Send | Opcode::Receive | Opcode::Join | Opcode::SelfPid => {
            concurrency::dispatch(process, &mut cursor, opcode)?
        }

        Opcode::Import => {
            let name = cursor.fetch_string()?;
            Outcome::Import(name)
        }

        Opcode::IoRead | Opcode::IoWrite | Opcode::IoClose | Opcode::IoWait
        | Opcode::IoCancel => Outcome::Io(io::dispatch(process, &mut cursor, opcode)?),

        Opcode::Halt => Outcome::Halt,
    };

    // Every outcome that doesn't carry its own destination address resumes
    // right after this instruction; `Jump`/`Call`/`Return` override this in
    // the interpreter loop once they know where control actually goes.
    process.instruction_pointer = cursor.position() as u64;
    Ok(outcome)
}
