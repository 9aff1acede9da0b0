//! Value constructors: instructions that materialise a fresh value from an
//! immediate operand into a register (§4.1).

use std::collections::BTreeMap;

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::RuntimeError;
use crate::process::Process;
use crate::value::{Atom, Value};

pub fn dispatch(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    let dest = cursor.fetch_register()?;
    let value = match opcode {
        Opcode::Integer => Value::Integer(cursor.fetch_i32()? as i64),
        Opcode::Float => Value::Float(cursor.fetch_float()?),
        Opcode::Strite => Value::Strite(cursor.fetch_string()?),
        Opcode::Atom => Value::Atom(Atom(cursor.fetch_string()?)),
        Opcode::Boolean => Value::Boolean(cursor.fetch_u8()? != 0),
        Opcode::Vector => Value::Vector(Vec::new()),
        Opcode::Struct => Value::Struct(BTreeMap::new()),
        Opcode::Object => Value::Object {
            class: cursor.fetch_string()?,
            fields: BTreeMap::new(),
        },
        _ => unreachable!("dispatch() only called for constructor opcodes"),
    };
    super::write(process, dest, value)?;
    Ok(Outcome::Advance)
}
