//! Per-call activation records and exception-catcher scopes (§3, §4.2, §4.3).

use std::collections::BTreeMap;

use crate::regset::{RegisterSet, Role};

/// One catcher registered on a try-frame: which exception type name it
/// matches, where control resumes, and which register of the associated
/// frame receives the caught value.
#[derive(Debug, Clone)]
pub struct Catcher {
    pub target_address: u64,
    pub target_register: u16,
}

/// A single call's activation record.
#[derive(Debug)]
pub struct Frame {
    /// Address to resume the caller at once this frame returns.
    pub return_address: u64,
    /// Arguments prepared by the caller's `frame`/`call` sequence.
    pub arguments: RegisterSet,
    /// This call's own local registers.
    pub locals: RegisterSet,
    pub function_name: String,
    /// True if `return` should not move anything into the caller.
    pub void_return: bool,
    /// Index in the *caller's* local register set to deposit the return
    /// value into, when not void.
    pub return_slot: u16,
}

impl Frame {
    pub fn new(function_name: impl Into<String>, arguments: RegisterSet, locals_size: u16) -> Self {
        Self {
            return_address: 0,
            arguments,
            locals: RegisterSet::new(Role::Local, locals_size),
            function_name: function_name.into(),
            void_return: true,
            return_slot: 0,
        }
    }
}

/// A scoped binding of exception catchers, created by `try` and closed by
/// `leave` or by an unwind that passes through it.
#[derive(Debug)]
pub struct TryFrame {
    pub return_address: u64,
    /// Index of the call frame this try-frame was pushed under, within the
    /// owning process's frame stack. Stored as an index rather than a
    /// reference since frames live in a `Vec` the process owns outright.
    pub frame_index: usize,
    pub block_name: String,
    pub catchers: BTreeMap<String, Catcher>,
}

impl TryFrame {
    pub fn new(frame_index: usize) -> Self {
        Self {
            return_address: 0,
            frame_index,
            block_name: String::new(),
            catchers: BTreeMap::new(),
        }
    }

    pub fn register_catcher(&mut self, exception_type: impl Into<String>, catcher: Catcher) {
        self.catchers.insert(exception_type.into(), catcher);
    }

    /// Finds the catcher matching the first name in `chain` that this
    /// try-frame has registered, in chain order (own type first, then
    /// ancestors), per the inheritance-chain matching rule in §9.
    pub fn find_catcher(&self, chain: &[&str]) -> Option<&Catcher> {
        chain.iter().find_map(|name| self.catchers.get(*name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_catcher_prefers_first_matching_name_in_chain() {
        let mut tf = TryFrame::new(0);
        tf.register_catcher(
            "Exception",
            Catcher {
                target_address: 10,
                target_register: 1,
            },
        );
        tf.register_catcher(
            "MyErr",
            Catcher {
                target_address: 20,
                target_register: 2,
            },
        );
        let found = tf.find_catcher(&["MyErr", "Exception"]).unwrap();
        assert_eq!(found.target_address, 20);
    }

    #[test]
    fn find_catcher_falls_back_to_ancestor() {
        let mut tf = TryFrame::new(0);
        tf.register_catcher(
            "Exception",
            Catcher {
                target_address: 10,
                target_register: 1,
            },
        );
        let found = tf.find_catcher(&["MyErr", "Exception"]).unwrap();
        assert_eq!(found.target_address, 10);
    }

    #[test]
    fn find_catcher_returns_none_when_nothing_matches() {
        let tf = TryFrame::new(0);
        assert!(tf.find_catcher(&["MyErr", "Exception"]).is_none());
    }
}
