//! Hand-assembly helpers shared by the integration tests in this directory.
//! Not a test target itself (`tests/support/mod.rs` is excluded from cargo's
//! "every file directly under tests/ is its own binary" rule). Built fresh
//! per test binary, so not every helper is used by every one of them.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use viua_abi::{AccessMode, RegisterSetTag, MODULE_MAGIC, SEGMENT_SEPARATOR};

/// Encodes one register operand: mode byte, set byte, little-endian u16 index.
pub fn register_operand(mode: AccessMode, set: RegisterSetTag, index: u16) -> Vec<u8> {
    let mut out = vec![mode as u8, set as u8];
    out.extend_from_slice(&index.to_le_bytes());
    out
}

fn module(kind: u8, symbols: &[(&str, u64)], segment: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MODULE_MAGIC);
    bytes.push(kind);
    for (name, offset) in symbols {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&offset.to_le_bytes());
    }
    bytes.push(SEGMENT_SEPARATOR);
    bytes.extend_from_slice(segment);
    bytes
}

/// Builds an executable module file. `symbols` must include `__entry`.
pub fn executable_module(symbols: &[(&str, u64)], segment: &[u8]) -> Vec<u8> {
    module(b'E', symbols, segment)
}

/// Builds a linkable module file (a library with no designated entry point).
pub fn linkable_module(symbols: &[(&str, u64)], segment: &[u8]) -> Vec<u8> {
    module(b'L', symbols, segment)
}

/// A fresh scratch directory for one test, so parallel test runs never
/// collide on the same path.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "viua-integration-{tag}-{:?}-{}",
        std::thread::current().id(),
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn write_module(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
