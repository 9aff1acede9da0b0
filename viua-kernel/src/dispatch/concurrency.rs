//! Process spawn, message passing, and joins (§4.4, §5). Spawn, send, and
//! join all need the kernel's process registry, so these handlers only
//! decode operands and hand the work back as an `Outcome`; `SelfPid` is the
//! one instruction in this family a process can service on its own.

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::RuntimeError;
use crate::process::Process;
use crate::value::Value;

pub fn dispatch(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    match opcode {
        Opcode::Process => {
            let dest = cursor.fetch_register()?;
            let function = cursor.fetch_string()?;
            let frame = process.pending_frame.take().ok_or_else(|| {
                RuntimeError::DecodeFailure("process without a prepared frame".into())
            })?;
            Ok(Outcome::Spawn {
                function,
                frame,
                result_register: dest,
            })
        }
        Opcode::Send => {
            let target_op = cursor.fetch_register()?;
            let message_op = cursor.fetch_register()?;
            let target = super::read(process, target_op)?;
            let target = match target {
                Value::Process(pid) => pid,
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "Process",
                        found: other.type_name(),
                    })
                }
            };
            let message = super::take(process, message_op)?;
            Ok(Outcome::Send { target, message })
        }
        Opcode::Receive => {
            let dest = cursor.fetch_register()?;
            let timeout_ms = cursor.fetch_i32()?;
            let timeout_ms = if timeout_ms < 0 {
                None
            } else {
                Some(timeout_ms as u64)
            };
            Ok(Outcome::Receive {
                timeout_ms,
                result_register: dest,
            })
        }
        Opcode::Join => {
            let dest = cursor.fetch_register()?;
            let target_op = cursor.fetch_register()?;
            let target = match super::read(process, target_op)? {
                Value::Process(pid) => pid,
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "Process",
                        found: other.type_name(),
                    })
                }
            };
            Ok(Outcome::Join {
                target,
                result_register: dest,
            })
        }
        Opcode::SelfPid => {
            let dest = cursor.fetch_register()?;
            super::write(process, dest, Value::Process(process.pid()))?;
            Ok(Outcome::Advance)
        }
        _ => unreachable!("dispatch() only called for concurrency opcodes"),
    }
}
