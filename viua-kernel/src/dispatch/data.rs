//! Data movement: transfer, duplicate, exchange, or clear a register slot
//! (§4.1).

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
        Opcode::Move => {
            let dest = cursor.fetch_register()?;
            let src = cursor.fetch_register()?;
            let value = super::take(process, src)?;
            super::write(process, dest, value)?;
        }
        Opcode::Copy => {
            let dest = cursor.fetch_register()?;
            let src = cursor.fetch_register()?;
            let value = super::read(process, src)?.deep_copy();
            super::write(process, dest, value)?;
        }
        Opcode::Swap => {
            let a = cursor.fetch_register()?;
            let b = cursor.fetch_register()?;
            let va = super::take(process, a)?;
            let vb = super::take(process, b)?;
            super::write(process, a, vb)?;
            super::write(process, b, va)?;
        }
        Opcode::Delete => {
            let target = cursor.fetch_register()?;
            let _ = super::take(process, target)?;
        }
        Opcode::IZero => {
            let target = cursor.fetch_register()?;
            super::write(process, target, Value::Integer(0))?;
        }
        _ => unreachable!("dispatch() only called for data-movement opcodes"),
    }
    Ok(Outcome::Advance)
}
