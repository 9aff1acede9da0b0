//! Vector and struct operations (§4.1). Each instruction reads the
//! container out of its register, mutates a clone, and writes it back —
//! simple at the cost of an extra copy per access, in keeping with a
//! deliberately naive first implementation.

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::{RuntimeError, RuntimeResult};
use crate::process::Process;
use crate::value::Value;

fn key_string(key: Value) -> RuntimeResult<String> {
    match key {
        Value::Strite(s) => Ok(s),
        Value::Atom(a) => Ok(a.0),
        other => Err(RuntimeError::TypeMismatch {
            expected: "String",
            found: other.type_name(),
        }),
    }
}

pub fn dispatch(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    match opcode {
        Opcode::VPush => {
            let vector_op = cursor.fetch_register()?;
            let item_op = cursor.fetch_register()?;
            let mut vector = super::read(process, vector_op)?;
            let item = super::take(process, item_op)?;
            vector.as_vector_mut()?.push(item);
            super::write(process, vector_op, vector)?;
        }
        Opcode::VPop => {
            let dest = cursor.fetch_register()?;
            let vector_op = cursor.fetch_register()?;
            let mut vector = super::read(process, vector_op)?;
            let item = vector.as_vector_mut()?.pop().ok_or(RuntimeError::OutOfRange {
                index: 0,
                size: 0,
            })?;
            super::write(process, vector_op, vector)?;
            super::write(process, dest, item)?;
        }
        Opcode::VAt => {
            let dest = cursor.fetch_register()?;
            let vector_op = cursor.fetch_register()?;
            let index_op = cursor.fetch_register()?;
            let vector = super::read(process, vector_op)?;
            let index = super::read(process, index_op)?.as_integer()?;
            let items = vector.as_vector()?;
            let item = usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .ok_or(RuntimeError::OutOfRange {
                    index: index as u16,
                    size: items.len() as u16,
                })?
                .deep_copy();
            super::write(process, dest, item)?;
        }
        Opcode::VLen => {
            let dest = cursor.fetch_register()?;
            let vector_op = cursor.fetch_register()?;
            let vector = super::read(process, vector_op)?;
            let len = vector.as_vector()?.len() as i64;
            super::write(process, dest, Value::Integer(len))?;
        }
        Opcode::StructInsert => {
            let struct_op = cursor.fetch_register()?;
            let key_op = cursor.fetch_register()?;
            let value_op = cursor.fetch_register()?;
            let mut s = super::read(process, struct_op)?;
            let key = key_string(super::read(process, key_op)?)?;
            let value = super::take(process, value_op)?;
            s.as_struct_mut()?.insert(key, value);
            super::write(process, struct_op, s)?;
        }
        Opcode::StructRemove => {
            let struct_op = cursor.fetch_register()?;
            let key_op = cursor.fetch_register()?;
            let mut s = super::read(process, struct_op)?;
            let key = key_string(super::read(process, key_op)?)?;
            s.as_struct_mut()?.remove(&key);
            super::write(process, struct_op, s)?;
        }
        Opcode::StructAt => {
            let dest = cursor.fetch_register()?;
            let struct_op = cursor.fetch_register()?;
            let key_op = cursor.fetch_register()?;
            let s = super::read(process, struct_op)?;
            let key = key_string(super::read(process, key_op)?)?;
            let fields = match &s {
                Value::Struct(m) => m,
                Value::Object { fields, .. } => fields,
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "Struct",
                        found: other.type_name(),
                    })
                }
            };
            let value = fields
                .get(&key)
                .ok_or(RuntimeError::KeyNotFound(key))?
                .deep_copy();
            super::write(process, dest, value)?;
        }
        Opcode::StructKeys => {
            let dest = cursor.fetch_register()?;
            let struct_op = cursor.fetch_register()?;
            let s = super::read(process, struct_op)?;
            let keys: Vec<Value> = match &s {
                Value::Struct(m) => m.keys().cloned().map(Value::Strite).collect(),
                Value::Object { fields, .. } => fields.keys().cloned().map(Value::Strite).collect(),
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "Struct",
                        found: other.type_name(),
                    })
                }
            };
            super::write(process, dest, Value::Vector(keys))?;
        }
        _ => unreachable!("dispatch() only called for container opcodes"),
    }
    Ok(Outcome::Advance)
}
