//! Importing the same module twice loads it exactly once: after an initial
//! import, the module's file is removed from disk, and a running process's
//! own `import` instruction for the same name must still succeed — it can
//! only do that by recognizing the name was already loaded rather than
//! going back to the (now-missing) file.

mod support;

use std::sync::Arc;

use viua_abi::{AccessMode, Opcode, RegisterSetTag};
use viua_kernel::kernel::{Kernel, ProcessOutcome, SchedulerConfig};
use viua_kernel::value::Value;

use support::{executable_module, linkable_module, register_operand, scratch_dir, write_module};

#[test]
fn reimporting_a_module_whose_file_vanished_still_succeeds() {
    // helper:
    //   double/1 -- allocate-registers 1; iadd %0 local (arguments0 + arguments0); return %0 local
    let mut helper = Vec::new();
    helper.push(Opcode::AllocateRegisters as u8);
    helper.extend_from_slice(&1u16.to_le_bytes());
    helper.push(Opcode::IAdd as u8);
    helper.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
    helper.extend(register_operand(AccessMode::Direct, RegisterSetTag::Arguments, 0));
    helper.extend(register_operand(AccessMode::Direct, RegisterSetTag::Arguments, 0));
    helper.push(Opcode::Return as u8);
    helper.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

    // __entry:
    //   allocate-registers 1
    //   import "helper"                 ; second import, file already gone
    //   frame 1
    //   integer %0 arguments 21
    //   call %0 local, "double/1"
    //   return %0 local
    let mut entry = Vec::new();
    entry.push(Opcode::AllocateRegisters as u8);
    entry.extend_from_slice(&1u16.to_le_bytes());

    entry.push(Opcode::Import as u8);
    entry.extend_from_slice(b"helper\0");

    entry.push(Opcode::Frame as u8);
    entry.extend_from_slice(&1u16.to_le_bytes());

    entry.push(Opcode::Integer as u8);
    entry.extend(register_operand(AccessMode::Direct, RegisterSetTag::Arguments, 0));
    entry.extend_from_slice(&21i32.to_le_bytes());

    entry.push(Opcode::Call as u8);
    entry.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
    entry.extend_from_slice(b"double/1\0");

    entry.push(Opcode::Return as u8);
    entry.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

    let dir = scratch_dir("import-idempotence");
    write_module(&dir, viua_abi::ENTRY_SYMBOL, &executable_module(&[(viua_abi::ENTRY_SYMBOL, 0)], &entry));
    let helper_path = write_module(&dir, "helper", &linkable_module(&[("double/1", 0)], &helper));

    let mut kernel = Kernel::new(SchedulerConfig::default());
    kernel.add_search_dir(dir.clone());

    // Import once up front, the ordinary way, then remove the file: the
    // entry's own `import "helper"` instruction below must not need it.
    kernel.import("helper").unwrap();
    std::fs::remove_file(&helper_path).unwrap();

    let kernel = Arc::new(kernel);
    let outcome = kernel.run(viua_abi::ENTRY_SYMBOL).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    match outcome {
        ProcessOutcome::Completed(Value::Integer(n)) => assert_eq!(n, 42),
        other => panic!("expected the second, file-less import to be a no-op and the call to still work, got {other:?}"),
    }
}
