//! Try-blocks, catchers, and raising/capturing exceptions (§4.3). The
//! actual unwind walk (searching try-frames, then call frames, for a
//! matching catcher) lives in the kernel's interpreter loop, since it needs
//! to see the whole stack; these handlers only touch the top frame.

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::RuntimeError;
use crate::frame::Catcher;
use crate::process::Process;
use crate::value::{Exception, Value};

pub fn dispatch(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    match opcode {
        Opcode::Try => {
            process.stack.push_try_frame();
        }
        Opcode::Catch => {
            let exception_type = cursor.fetch_string()?;
            let target_register = cursor.fetch_register()?;
            let target_address = cursor.fetch_u64()?;
            let try_frame = process.stack.top_try_frame_mut().ok_or_else(|| {
                RuntimeError::DecodeFailure("catch outside of a try block".into())
            })?;
            try_frame.register_catcher(
                exception_type,
                Catcher {
                    target_address,
                    target_register: target_register.index,
                },
            );
        }
        Opcode::Enter => {
            let block_name = cursor.fetch_string()?;
            let try_frame = process.stack.top_try_frame_mut().ok_or_else(|| {
                RuntimeError::DecodeFailure("enter outside of a try block".into())
            })?;
            try_frame.block_name = block_name;
        }
        Opcode::Leave => {
            process.stack.pop_try_frame();
        }
        Opcode::Throw => {
            let value_op = cursor.fetch_register()?;
            let value = super::read(process, value_op)?;
            let exception = match value {
                Value::Exception(_) => value,
                Value::Object { ref class, .. } => {
                    let tag = class.clone();
                    Value::Exception(Exception::new(tag, value))
                }
                other => Value::Exception(Exception::new(other.type_name(), other)),
            };
            return Ok(Outcome::Throw(exception));
        }
        Opcode::Draw => {
            let dest = cursor.fetch_register()?;
            let exception = process.last_exception.take().ok_or_else(|| {
                RuntimeError::DecodeFailure("draw with no pending exception".into())
            })?;
            super::write(process, dest, Value::Exception(exception))?;
        }
        _ => unreachable!("dispatch() only called for exception-handling opcodes"),
    }
    Ok(Outcome::Advance)
}
