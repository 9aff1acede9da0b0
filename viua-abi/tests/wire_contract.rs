//! The identifiers and byte layouts other crates parse modules and operands
//! against. Changing any of these is a wire-format break, so they're pinned
//! here independently of the unit tests colocated with their definitions.

use viua_abi::{AccessMode, ModuleKind, Opcode, Pid, RegisterSetTag, ENTRY_SYMBOL, MODULE_MAGIC, SEGMENT_SEPARATOR};

#[test]
fn module_header_bytes_are_stable() {
    assert_eq!(&MODULE_MAGIC, b"VIUA");
    assert_eq!(SEGMENT_SEPARATOR, 0x00);
    assert_eq!(ENTRY_SYMBOL, "__entry");
    assert_eq!(ModuleKind::from_byte(b'L'), Some(ModuleKind::Linkable));
    assert_eq!(ModuleKind::from_byte(b'E'), Some(ModuleKind::Executable));
    assert_eq!(ModuleKind::from_byte(b'?'), None);
}

#[test]
fn register_operand_tag_bytes_are_stable() {
    assert_eq!(AccessMode::Direct as u8, 0);
    assert_eq!(AccessMode::Pointer as u8, 1);
    assert_eq!(AccessMode::Void as u8, 2);
    assert_eq!(RegisterSetTag::Local as u8, 0);
    assert_eq!(RegisterSetTag::Arguments as u8, 1);
    assert_eq!(RegisterSetTag::Static as u8, 2);
}

#[test]
fn a_handful_of_opcode_bytes_are_stable() {
    assert_eq!(Opcode::IAdd as u8, 0x01);
    assert_eq!(Opcode::Call as u8, 0x53);
    assert_eq!(Opcode::Throw as u8, 0x64);
    assert_eq!(Opcode::Process as u8, 0x70);
    assert_eq!(Opcode::Import as u8, 0x80);
    assert_eq!(Opcode::Halt as u8, 0xFF);
}

#[test]
fn pids_order_by_node_then_counter() {
    let a = Pid::new(0, 5);
    let b = Pid::new(0, 6);
    let c = Pid::new(1, 0);
    assert!(a < b);
    assert!(b < c);
    assert_eq!(a, Pid::new(0, 5));
}
