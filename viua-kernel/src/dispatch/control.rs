//! Call/return and branching (§4.2). `Frame`/`Call`/`TailCall` stage and
//! consume `Process::pending_frame`; `Jump`/`Branch`/`Return` only ever
//! touch the current frame.

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::RuntimeError;
use crate::frame::Frame;
use crate::loader::CodeSpace;
use crate::process::Process;
use crate::regset::{RegisterSet, Role};

pub fn dispatch(
    process: &mut Process,
    code: &CodeSpace,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    match opcode {
        Opcode::Jump => {
            let address = cursor.fetch_u64()?;
            Ok(Outcome::Jump(address))
        }
        Opcode::Branch => {
            let condition = cursor.fetch_register()?;
            let if_true = cursor.fetch_u64()?;
            let if_false = cursor.fetch_u64()?;
            let taken = super::read(process, condition)?.boolean();
            Ok(Outcome::Jump(if taken { if_true } else { if_false }))
        }
        Opcode::Frame => {
            let arity = cursor.fetch_u16()?;
            process.pending_frame = Some(Frame::new(
                String::new(),
                RegisterSet::new(Role::Arguments, arity),
                0,
            ));
            Ok(Outcome::Advance)
        }
        Opcode::Call => {
            let dest = cursor.fetch_register()?;
            let name = cursor.fetch_string()?;
            let mut frame = process
                .pending_frame
                .take()
                .ok_or_else(|| RuntimeError::DecodeFailure("call without a prepared frame".into()))?;
            frame.function_name = name.clone();
            frame.return_address = cursor.position() as u64;
            frame.void_return = matches!(dest.mode, viua_abi::AccessMode::Void);
            frame.return_slot = dest.index;

            if let Some(address) = code.address_of(&name) {
                Ok(Outcome::Call {
                    callee_frame: frame,
                    callee_address: address,
                })
            } else {
                Ok(Outcome::ForeignCall {
                    function: name,
                    frame,
                    return_slot: dest.index,
                    void_return: matches!(dest.mode, viua_abi::AccessMode::Void),
                })
            }
        }
        Opcode::TailCall => {
            let name = cursor.fetch_string()?;
            let caller = process
                .stack
                .pop_frame()
                .ok_or_else(|| RuntimeError::DecodeFailure("tailcall with no caller frame".into()))?;
            let mut frame = process
                .pending_frame
                .take()
                .ok_or_else(|| RuntimeError::DecodeFailure("tailcall without a prepared frame".into()))?;
            frame.function_name = name.clone();
            frame.return_address = caller.return_address;
            frame.return_slot = caller.return_slot;
            frame.void_return = caller.void_return;

            if let Some(address) = code.address_of(&name) {
                Ok(Outcome::Call {
                    callee_frame: frame,
                    callee_address: address,
                })
            } else {
                Ok(Outcome::ForeignCall {
                    function: name,
                    return_slot: frame.return_slot,
                    void_return: frame.void_return,
                    frame,
                })
            }
        }
        Opcode::Return => {
            let value_op = cursor.fetch_register()?;
            let value = if matches!(value_op.mode, viua_abi::AccessMode::Void) {
                None
            } else {
                Some(super::read(process, value_op)?)
            };
            Ok(Outcome::Return { value })
        }
        Opcode::AllocateRegisters => {
            let size = cursor.fetch_u16()?;
            let frame = process
                .stack
                .top_frame_mut()
                .ok_or_else(|| RuntimeError::DecodeFailure("allocate-registers with no frame".into()))?;
            frame.locals = RegisterSet::new(Role::Local, size);
            Ok(Outcome::Advance)
        }
        _ => unreachable!("dispatch() only called for control-flow opcodes"),
    }
}
