//! The I/O scheduler (§4.6): a single thread that owns every in-flight
//! interaction, performs the underlying syscall, and resolves the
//! interaction so a bytecode worker can wake whatever is `io-wait`ing on
//! it. Kept to one thread (unlike the bytecode/FFI pools) since real
//! multiplexing would mean a poll/epoll loop, and a single thread making
//! blocking-but-short syscalls one at a time is the honest equivalent
//! without pulling in an async I/O stack for this.

use std::io::{Read, Write};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::Arc;

use crate::kernel::{IoJobHandle, Kernel};
use crate::value::Value;

pub fn run(kernel: Arc<Kernel>) {
    loop {
        let (id, job) = match kernel.io_pull() {
            Some(entry) => entry,
            None => {
                if kernel.is_shutting_down() {
                    return;
                }
                kernel.io_park();
                continue;
            }
        };

        if kernel.io_is_cancelled(id) {
            kernel.io_cancelled(id);
            continue;
        }

        match job {
            IoJobHandle::Read { fd, length } => {
                let mut file = unsafe { std::fs::File::from_raw_fd(fd as i32) };
                let mut buf = vec![0u8; length.max(0) as usize];
                let result = file.read(&mut buf);
                // Don't let `File`'s Drop close a descriptor the process still
                // owns; this scheduler only borrows it for the duration of one
                // operation.
                let _ = file.into_raw_fd();
                match result {
                    Ok(n) => {
                        buf.truncate(n);
                        let bytes = buf.into_iter().map(Value::Byte).collect();
                        kernel.io_complete(id, Value::Vector(bytes));
                    }
                    Err(e) => kernel.io_fail(id, e.to_string()),
                }
            }
            IoJobHandle::Write { fd, buffer } => {
                let mut file = unsafe { std::fs::File::from_raw_fd(fd as i32) };
                let bytes = match &buffer {
                    Value::Strite(s) => s.clone().into_bytes(),
                    Value::Vector(items) => items
                        .iter()
                        .map(|v| match v {
                            Value::Byte(b) => *b,
                            other => other.str().as_bytes().first().copied().unwrap_or(0),
                        })
                        .collect(),
                    other => other.str().into_bytes(),
                };
                let result = file.write(&bytes);
                let _ = file.into_raw_fd();
                match result {
                    Ok(n) => kernel.io_complete(id, Value::Integer(n as i64)),
                    Err(e) => kernel.io_fail(id, e.to_string()),
                }
            }
            IoJobHandle::Close { fd } => {
                let file = unsafe { std::fs::File::from_raw_fd(fd as i32) };
                drop(file);
                kernel.io_complete(id, Value::Boolean(true));
            }
        }
    }
}
