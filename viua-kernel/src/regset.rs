//! Register sets: fixed-size arrays of owning slots.
//!
//! A slot either holds exactly one `Value` or is empty (void). Moving a
//! value out of a slot leaves it void rather than duplicating it, matching
//! the single-owner invariant in §3 of the data model.

use viua_abi::RegisterSetTag;

use crate::err::{RuntimeError, RuntimeResult};
use crate::value::Value;

/// Distinguishes the three roles a `RegisterSet` can play for a frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Local,
    Arguments,
    Static,
}

impl From<RegisterSetTag> for Role {
    fn from(tag: RegisterSetTag) -> Self {
        match tag {
            RegisterSetTag::Local => Role::Local,
            RegisterSetTag::Arguments => Role::Arguments,
            RegisterSetTag::Static => Role::Static,
        }
    }
}

/// A fixed-size array of slots, each holding zero or one `Value`.
#[derive(Debug)]
pub struct RegisterSet {
    role: Role,
    slots: Vec<Option<Value>>,
}

impl RegisterSet {
    pub fn new(role: Role, size: u16) -> Self {
        Self {
            role,
            slots: (0..size).map(|_| None).collect(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check(&self, index: u16) -> RuntimeResult<()> {
        if usize::from(index) >= self.slots.len() {
            Err(RuntimeError::OutOfRange {
                index,
                size: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Reads a slot without disturbing it. Fails if the slot is void.
    pub fn get(&self, index: u16) -> RuntimeResult<&Value> {
        self.check(index)?;
        self.slots[usize::from(index)]
            .as_ref()
            .ok_or(RuntimeError::OutOfRange {
                index,
                size: self.len(),
            })
    }

    pub fn get_mut(&mut self, index: u16) -> RuntimeResult<&mut Value> {
        self.check(index)?;
        let size = self.len();
        self.slots[usize::from(index)]
            .as_mut()
            .ok_or(RuntimeError::OutOfRange { index, size })
    }

    /// Places a value into a slot, dropping whatever was there before.
    pub fn set(&mut self, index: u16, value: Value) -> RuntimeResult<()> {
        self.check(index)?;
        self.slots[usize::from(index)] = Some(value);
        Ok(())
    }

    /// Moves a value out of a slot, leaving it void.
    pub fn take(&mut self, index: u16) -> RuntimeResult<Value> {
        self.check(index)?;
        self.slots[usize::from(index)]
            .take()
            .ok_or(RuntimeError::OutOfRange {
                index,
                size: self.len(),
            })
    }

    /// Empties a slot without returning its former contents.
    pub fn delete(&mut self, index: u16) -> RuntimeResult<()> {
        self.check(index)?;
        self.slots[usize::from(index)] = None;
        Ok(())
    }

    pub fn swap(&mut self, a: u16, b: u16) -> RuntimeResult<()> {
        self.check(a)?;
        self.check(b)?;
        self.slots.swap(usize::from(a), usize::from(b));
        Ok(())
    }

    pub fn is_void(&self, index: u16) -> RuntimeResult<bool> {
        self.check(index)?;
        Ok(self.slots[usize::from(index)].is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_indexing_succeeds_at_zero_and_max_minus_one() {
        let mut rs = RegisterSet::new(Role::Local, 4);
        rs.set(0, Value::Integer(1)).unwrap();
        rs.set(3, Value::Integer(2)).unwrap();
        assert!(rs.get(0).is_ok());
        assert!(rs.get(3).is_ok());
    }

    #[test]
    fn indexing_at_size_fails_out_of_range() {
        let rs = RegisterSet::new(Role::Local, 4);
        assert!(matches!(rs.get(4), Err(RuntimeError::OutOfRange { .. })));
    }

    #[test]
    fn take_leaves_slot_void() {
        let mut rs = RegisterSet::new(Role::Local, 1);
        rs.set(0, Value::Integer(9)).unwrap();
        let v = rs.take(0).unwrap();
        assert_eq!(v.str(), "9");
        assert!(rs.is_void(0).unwrap());
    }

    #[test]
    fn swap_exchanges_two_slots() {
        let mut rs = RegisterSet::new(Role::Local, 2);
        rs.set(0, Value::Integer(1)).unwrap();
        rs.set(1, Value::Integer(2)).unwrap();
        rs.swap(0, 1).unwrap();
        assert_eq!(rs.get(0).unwrap().str(), "2");
        assert_eq!(rs.get(1).unwrap().str(), "1");
    }
}
