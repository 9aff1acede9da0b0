//! Two pointers sharing one target, taken from different originating
//! processes, both go stale the moment the target's last owning `Cell`
//! handle is dropped — whichever pointer dereferences it afterwards gets
//! `StaleReference` rather than a freed or stale value.
//!
//! There is no bytecode instruction that manifests a `Pointer` into a
//! register (acquiring one is a capability exposed directly on `Cell`), so
//! this exercises the value model's own public API rather than a hand-
//! assembled program, unlike the other scenarios in this directory.

use viua_abi::Pid;
use viua_kernel::err::RuntimeError;
use viua_kernel::value::{Cell, Pointer, Value};

#[test]
fn two_pointers_from_different_processes_both_go_stale_together() {
    let owner = Pid::new(0, 1);
    let borrower = Pid::new(0, 2);

    let target = Cell::new(Value::Vector(vec![Value::Integer(1), Value::Integer(2)]));
    let from_owner = Pointer::new(owner, &target);
    let from_borrower = Pointer::new(borrower, &target);

    assert!(!from_owner.is_expired());
    assert!(!from_borrower.is_expired());
    assert_eq!(from_owner.target().unwrap().get().str(), "[1, 2]");

    drop(target);

    assert!(from_owner.is_expired());
    assert!(from_borrower.is_expired());
    assert!(matches!(from_owner.target(), Err(RuntimeError::StaleReference)));
    assert!(matches!(from_borrower.target(), Err(RuntimeError::StaleReference)));
}

#[test]
fn resetting_a_pointer_detaches_it_from_a_stale_target_independently() {
    let origin = Pid::new(0, 1);

    let first = Cell::new(Value::Integer(1));
    let mut ptr = Pointer::new(origin, &first);
    drop(first);
    assert!(ptr.is_expired());

    let second = Cell::new(Value::Integer(2));
    ptr.reset(&second);
    assert!(!ptr.is_expired());
    assert_eq!(ptr.target().unwrap().get().str(), "2");
}
