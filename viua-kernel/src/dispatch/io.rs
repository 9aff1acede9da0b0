//! I/O instructions (§4.6). Like FFI and spawn, these only decode operands;
//! the I/O scheduler owns the actual file descriptors and poll loop.

use viua_abi::Opcode;

use crate::decode::{Cursor, RegisterOperand};
use crate::err::RuntimeError;
use crate::process::Process;
use crate::value::Value;

/// What one I/O instruction asked the I/O scheduler to do.
pub enum IoOutcome {
    Read {
        fd: i64,
        length: i64,
        result_register: RegisterOperand,
    },
    Write {
        fd: i64,
        buffer: Value,
        result_register: RegisterOperand,
    },
    Close {
        fd: i64,
    },
    Wait {
        interaction: i64,
        result_register: RegisterOperand,
    },
    Cancel {
        interaction: i64,
    },
}

pub fn dispatch(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<IoOutcome, RuntimeError> {
    match opcode {
        Opcode::IoRead => {
            let dest = cursor.fetch_register()?;
            let fd_op = cursor.fetch_register()?;
            let length_op = cursor.fetch_register()?;
            let fd = super::read(process, fd_op)?.as_integer()?;
            let length = super::read(process, length_op)?.as_integer()?;
            Ok(IoOutcome::Read {
                fd,
                length,
                result_register: dest,
            })
        }
        Opcode::IoWrite => {
            let dest = cursor.fetch_register()?;
            let fd_op = cursor.fetch_register()?;
            let buffer_op = cursor.fetch_register()?;
            let fd = super::read(process, fd_op)?.as_integer()?;
            let buffer = super::take(process, buffer_op)?;
            Ok(IoOutcome::Write {
                fd,
                buffer,
                result_register: dest,
            })
        }
        Opcode::IoClose => {
            let fd_op = cursor.fetch_register()?;
            let fd = super::read(process, fd_op)?.as_integer()?;
            Ok(IoOutcome::Close { fd })
        }
        Opcode::IoWait => {
            let dest = cursor.fetch_register()?;
            let interaction_op = cursor.fetch_register()?;
            let interaction = super::read(process, interaction_op)?.as_integer()?;
            Ok(IoOutcome::Wait {
                interaction,
                result_register: dest,
            })
        }
        Opcode::IoCancel => {
            let interaction_op = cursor.fetch_register()?;
            let interaction = super::read(process, interaction_op)?.as_integer()?;
            Ok(IoOutcome::Cancel { interaction })
        }
        _ => unreachable!("dispatch() only called for I/O opcodes"),
    }
}
