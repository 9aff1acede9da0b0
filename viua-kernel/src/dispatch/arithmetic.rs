//! Integer/float arithmetic and comparison (§4.1).

use viua_abi::Opcode;

use super::Outcome;
use crate::decode::Cursor;
use crate::err::RuntimeError;
use crate::process::Process;
use crate::value::Value;

pub fn binary(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    let dest = cursor.fetch_register()?;
    let lhs = cursor.fetch_register()?;
    let rhs = cursor.fetch_register()?;

    let lhs = super::read(process, lhs)?;
    let rhs = super::read(process, rhs)?;

    let result = match opcode {
        Opcode::IAdd => Value::Integer(lhs.as_integer()? + rhs.as_integer()?),
        Opcode::ISub => Value::Integer(lhs.as_integer()? - rhs.as_integer()?),
        Opcode::IMul => Value::Integer(lhs.as_integer()? * rhs.as_integer()?),
        Opcode::IDiv => {
            let divisor = rhs.as_integer()?;
            if divisor == 0 {
                return Ok(Outcome::Throw(Value::Exception(crate::value::Exception::new(
                    "ArithmeticError",
                    Value::Strite("division by zero".into()),
                ))));
            }
            Value::Integer(lhs.as_integer()? / divisor)
        }
        Opcode::IMod => {
            let divisor = rhs.as_integer()?;
            if divisor == 0 {
                return Ok(Outcome::Throw(Value::Exception(crate::value::Exception::new(
                    "ArithmeticError",
                    Value::Strite("division by zero".into()),
                ))));
            }
            Value::Integer(lhs.as_integer()? % divisor)
        }
        Opcode::FAdd => Value::Float(lhs.as_float()? + rhs.as_float()?),
        Opcode::FSub => Value::Float(lhs.as_float()? - rhs.as_float()?),
        Opcode::FMul => Value::Float(lhs.as_float()? * rhs.as_float()?),
        Opcode::FDiv => Value::Float(lhs.as_float()? / rhs.as_float()?),
        Opcode::ILt => Value::Boolean(lhs.as_integer()? < rhs.as_integer()?),
        Opcode::ILte => Value::Boolean(lhs.as_integer()? <= rhs.as_integer()?),
        Opcode::IGt => Value::Boolean(lhs.as_integer()? > rhs.as_integer()?),
        Opcode::IGte => Value::Boolean(lhs.as_integer()? >= rhs.as_integer()?),
        Opcode::IEq => Value::Boolean(lhs.as_integer()? == rhs.as_integer()?),
        _ => unreachable!("binary() only called for arithmetic/comparison opcodes"),
    };

    super::write(process, dest, result)?;
    Ok(Outcome::Advance)
}

pub fn unary(
    process: &mut Process,
    cursor: &mut Cursor,
    opcode: Opcode,
) -> Result<Outcome, RuntimeError> {
    let target = cursor.fetch_register()?;
    let value = super::read(process, target)?.as_integer()?;
    let result = match opcode {
        Opcode::IInc => value + 1,
        Opcode::IDec => value - 1,
        _ => unreachable!("unary() only called for iinc/idec"),
    };
    super::write(process, target, Value::Integer(result))?;
    Ok(Outcome::Advance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::regset::{RegisterSet, Role};
    use viua_abi::{AccessMode, Pid, RegisterSetTag};

    fn reg(index: u16) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        bytes[0] = AccessMode::Direct as u8;
        bytes[1] = RegisterSetTag::Local as u8;
        bytes[2..4].copy_from_slice(&index.to_le_bytes());
        bytes
    }

    #[test]
    fn iadd_adds_two_registers_into_a_third() {
        let mut process = Process::new(Pid::new(0, 0));
        process
            .stack
            .push_frame(Frame::new("f", RegisterSet::new(Role::Arguments, 0), 4));
        process.stack.top_frame_mut().unwrap().locals.set(1, Value::Integer(40)).unwrap();
        process.stack.top_frame_mut().unwrap().locals.set(2, Value::Integer(2)).unwrap();

        let mut code = Vec::new();
        code.extend_from_slice(&reg(3));
        code.extend_from_slice(&reg(1));
        code.extend_from_slice(&reg(2));
        let mut cursor = Cursor::new(&code);

        binary(&mut process, &mut cursor, Opcode::IAdd).unwrap();
        assert_eq!(
            process.stack.top_frame().unwrap().locals.get(3).unwrap().as_integer().unwrap(),
            42
        );
    }

    #[test]
    fn idiv_by_zero_throws_instead_of_panicking() {
        let mut process = Process::new(Pid::new(0, 0));
        process
            .stack
            .push_frame(Frame::new("f", RegisterSet::new(Role::Arguments, 0), 4));
        process.stack.top_frame_mut().unwrap().locals.set(1, Value::Integer(1)).unwrap();
        process.stack.top_frame_mut().unwrap().locals.set(2, Value::Integer(0)).unwrap();

        let mut code = Vec::new();
        code.extend_from_slice(&reg(3));
        code.extend_from_slice(&reg(1));
        code.extend_from_slice(&reg(2));
        let mut cursor = Cursor::new(&code);

        let outcome = binary(&mut process, &mut cursor, Opcode::IDiv).unwrap();
        assert!(matches!(outcome, Outcome::Throw(_)));
    }
}
