//! A cursor over an instruction stream with typed, length-checked readers
//! (§4.1). Every `fetch_*` advances the cursor by exactly the bytes it
//! consumes; running past the end of the stream is always a decode failure.

use viua_abi::{AccessMode, Opcode, RegisterSetTag};

use crate::err::RuntimeError;

/// A register operand: which set it addresses, the slot index within that
/// set, and how the slot should be resolved before use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterOperand {
    pub mode: AccessMode,
    pub set: RegisterSetTag,
    pub index: u16,
}

pub struct Cursor<'a> {
    code: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, position: 0 }
    }

    pub fn at(code: &'a [u8], position: usize) -> Self {
        Self { code, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.position.checked_add(n).ok_or_else(|| {
            RuntimeError::DecodeFailure("instruction cursor overflowed".into())
        })?;
        let bytes = self
            .code
            .get(self.position..end)
            .ok_or_else(|| RuntimeError::DecodeFailure("instruction stream truncated".into()))?;
        self.position = end;
        Ok(bytes)
    }

    pub fn fetch_u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    pub fn fetch_i32(&mut self) -> Result<i32, RuntimeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn fetch_u16(&mut self) -> Result<u16, RuntimeError> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn fetch_u64(&mut self) -> Result<u64, RuntimeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn fetch_float(&mut self) -> Result<f64, RuntimeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    /// Reads a null-terminated UTF-8 string.
    pub fn fetch_string(&mut self) -> Result<String, RuntimeError> {
        let start = self.position;
        let len = self.code[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| RuntimeError::DecodeFailure("unterminated string operand".into()))?;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| RuntimeError::DecodeFailure("string operand is not UTF-8".into()))?
            .to_owned();
        self.take(1)?; // consume the terminator
        Ok(s)
    }

    pub fn fetch_opcode(&mut self) -> Result<Opcode, RuntimeError> {
        let b = self.fetch_u8()?;
        Opcode::from_byte(b)
            .ok_or_else(|| RuntimeError::DecodeFailure(format!("unknown opcode byte 0x{b:02x}")))
    }

    /// Reads a tagged register operand: one access-mode byte, one
    /// register-set-tag byte, one little-endian u16 index.
    pub fn fetch_register(&mut self) -> Result<RegisterOperand, RuntimeError> {
        let mode_byte = self.fetch_u8()?;
        let mode = AccessMode::from_byte(mode_byte).ok_or_else(|| {
            RuntimeError::DecodeFailure(format!("unknown access mode byte 0x{mode_byte:02x}"))
        })?;
        let set_byte = self.fetch_u8()?;
        let set = RegisterSetTag::from_byte(set_byte).ok_or_else(|| {
            RuntimeError::DecodeFailure(format!("unknown register set tag byte 0x{set_byte:02x}"))
        })?;
        let index = self.fetch_u16()?;
        Ok(RegisterOperand { mode, set, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_primitives_advance_cursor_by_exact_width() {
        let code = [0x2Au8, 0x01, 0x00, 0x00, 0x00];
        let mut cur = Cursor::new(&code);
        assert_eq!(cur.fetch_u8().unwrap(), 0x2A);
        assert_eq!(cur.fetch_i32().unwrap(), 1);
        assert_eq!(cur.position(), 5);
    }

    #[test]
    fn fetch_string_stops_at_nul_and_consumes_it() {
        let code = b"hi\0\xFF";
        let mut cur = Cursor::new(code);
        assert_eq!(cur.fetch_string().unwrap(), "hi");
        assert_eq!(cur.fetch_u8().unwrap(), 0xFF);
    }

    #[test]
    fn truncated_stream_is_a_decode_failure() {
        let code = [0x01u8];
        let mut cur = Cursor::new(&code);
        assert!(matches!(cur.fetch_i32(), Err(RuntimeError::DecodeFailure(_))));
    }

    #[test]
    fn unknown_opcode_byte_is_a_decode_failure() {
        let code = [0x19u8];
        let mut cur = Cursor::new(&code);
        assert!(matches!(cur.fetch_opcode(), Err(RuntimeError::DecodeFailure(_))));
    }

    #[test]
    fn register_operand_round_trips_all_fields() {
        let code = [1u8, 2, 0x34, 0x12];
        let mut cur = Cursor::new(&code);
        let op = cur.fetch_register().unwrap();
        assert_eq!(op.mode, AccessMode::Pointer);
        assert_eq!(op.set, RegisterSetTag::Static);
        assert_eq!(op.index, 0x1234);
    }
}
