//! A catcher registered on a supertype must catch an exception thrown as a
//! subtype, resolved through a registered `Prototype` chain.

mod support;

use std::sync::Arc;

use viua_abi::{AccessMode, Opcode, RegisterSetTag};
use viua_kernel::kernel::{Kernel, ProcessOutcome, SchedulerConfig};
use viua_kernel::value::{Prototype, Value};

use support::{executable_module, register_operand, scratch_dir, write_module};

#[test]
fn catcher_on_ancestor_type_catches_thrown_subtype() {
    // allocate-registers 2
    // try
    // catch "Base", %1 local, <handler>
    // object %0 local "Derived"
    // throw %0 local
    // handler:
    // return %1 local
    let mut code = Vec::new();
    code.push(Opcode::AllocateRegisters as u8);
    code.extend_from_slice(&2u16.to_le_bytes());

    code.push(Opcode::Try as u8);

    code.push(Opcode::Catch as u8);
    code.extend_from_slice(b"Base\0");
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 1));
    let patch_at = code.len();
    code.extend_from_slice(&0u64.to_le_bytes());

    code.push(Opcode::Object as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
    code.extend_from_slice(b"Derived\0");

    code.push(Opcode::Throw as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

    let handler_address = code.len() as u64;
    code.push(Opcode::Return as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 1));

    code[patch_at..patch_at + 8].copy_from_slice(&handler_address.to_le_bytes());

    let dir = scratch_dir("exception-catch");
    write_module(&dir, viua_abi::ENTRY_SYMBOL, &executable_module(&[(viua_abi::ENTRY_SYMBOL, 0)], &code));

    let mut kernel = Kernel::new(SchedulerConfig::default());
    kernel.add_search_dir(dir.clone());
    kernel.register_prototype(Prototype {
        name: "Derived".to_owned(),
        ancestors: vec!["Base".to_owned()],
    });

    let kernel = Arc::new(kernel);
    let outcome = kernel.run(viua_abi::ENTRY_SYMBOL).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    match outcome {
        ProcessOutcome::Completed(Value::Exception(exc)) => {
            assert_eq!(exc.tag, "Derived");
        }
        other => panic!("expected the catcher to run and return the caught exception, got {other:?}"),
    }
}

#[test]
fn catcher_for_unrelated_type_does_not_catch() {
    // Same shape as above, but the catcher only declares "Unrelated" and the
    // thrown value's class has no prototype relating it to anything, so the
    // exception must propagate uncaught.
    let mut code = Vec::new();
    code.push(Opcode::AllocateRegisters as u8);
    code.extend_from_slice(&2u16.to_le_bytes());

    code.push(Opcode::Try as u8);

    code.push(Opcode::Catch as u8);
    code.extend_from_slice(b"Unrelated\0");
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 1));
    let patch_at = code.len();
    code.extend_from_slice(&0u64.to_le_bytes());

    code.push(Opcode::Object as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));
    code.extend_from_slice(b"Derived\0");

    code.push(Opcode::Throw as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 0));

    let handler_address = code.len() as u64;
    code.push(Opcode::Return as u8);
    code.extend(register_operand(AccessMode::Direct, RegisterSetTag::Local, 1));

    code[patch_at..patch_at + 8].copy_from_slice(&handler_address.to_le_bytes());

    let dir = scratch_dir("exception-catch-miss");
    write_module(&dir, viua_abi::ENTRY_SYMBOL, &executable_module(&[(viua_abi::ENTRY_SYMBOL, 0)], &code));

    let mut kernel = Kernel::new(SchedulerConfig::default());
    kernel.add_search_dir(dir.clone());
    kernel.register_prototype(Prototype {
        name: "Derived".to_owned(),
        ancestors: vec!["Base".to_owned()],
    });

    let kernel = Arc::new(kernel);
    let outcome = kernel.run(viua_abi::ENTRY_SYMBOL).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert!(matches!(outcome, ProcessOutcome::Failed(_)));
}
