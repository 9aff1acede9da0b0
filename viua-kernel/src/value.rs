//! The runtime value model.
//!
//! Every concrete value is owned by exactly one register slot or container at
//! a time (§3 invariant 4). `Pointer` is the sole non-owning reference type:
//! it holds a `Weak<Cell>` rather than an `Arc<Cell>`, so it never keeps a
//! target alive, and dereferencing after the owning slot has dropped its
//! `Arc<Cell>` fails cleanly instead of reading freed or stale data (§4.8).
//! This is a Rust-native reading of the source's back-reference list: a
//! `Weak` handle already *is* an invalidation-on-destroy back-reference, so
//! there is no separate list to maintain by hand.
//!
//! A `Pointer` records the *originating process's* pid (§3) but its target
//! may be owned by a different process than the one dereferencing it, so the
//! target has to survive being shared across scheduler worker threads.
//! That's why `Cell` wraps its value in a `Mutex` behind an `Arc` rather than
//! `Rc`/`RefCell`: per §5, "a Pointer invalidation crossing process
//! boundaries requires the target-owning process to acquire a per-value
//! back-reference lock," and the mutex here is exactly that lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use viua_abi::Pid;

use crate::err::{RuntimeError, RuntimeResult};

/// A shareable box around a `Value` that a `Pointer` can be taken to.
///
/// Ordinary values living directly in a register slot never need this; it is
/// only constructed when code actually takes a pointer to something (the
/// `pointer-acquire` capability in §3), at which point ownership moves into
/// an `Arc<Cell>` and the slot holds a `Value::Pointer` instead.
pub struct Cell {
    value: Mutex<Value>,
}

impl Cell {
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.value.lock().unwrap().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.lock().unwrap() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.value.lock().unwrap())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.value.lock().unwrap())
    }
}

/// A non-owning reference to a `Value` living in some process's register
/// set or container.
///
/// Dereferencing after the target has been destroyed fails with
/// `RuntimeError::StaleReference` instead of touching freed memory: the
/// `Weak` simply fails to upgrade once every owning `Arc<Cell>` is gone.
#[derive(Clone)]
pub struct Pointer {
    origin: Pid,
    target: Weak<Cell>,
}

impl Pointer {
    /// Constructs a pointer to `target` without extending its lifetime.
    pub fn new(origin: Pid, target: &Arc<Cell>) -> Self {
        Self {
            origin,
            target: Arc::downgrade(target),
        }
    }

    pub fn origin(&self) -> Pid {
        self.origin
    }

    pub fn is_expired(&self) -> bool {
        self.target.strong_count() == 0
    }

    /// Follows the pointer, failing if the target has been destroyed.
    pub fn target(&self) -> RuntimeResult<Arc<Cell>> {
        self.target.upgrade().ok_or(RuntimeError::StaleReference)
    }

    /// Redirects this pointer at a new target, detaching from the old one
    /// (§4.8). Since a `Pointer` never owned the old target to begin with,
    /// "detaching" is just replacing the `Weak` handle.
    pub fn reset(&mut self, target: &Arc<Cell>) {
        self.target = Arc::downgrade(target);
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("origin", &self.origin)
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// An interned symbolic tag, compared by content equality.
///
/// Real interning (so that two atoms with the same text share storage) is a
/// worthwhile follow-up; for now this wraps an owned `String` and gets
/// structural equality for free, which satisfies every observable behaviour
/// the spec asks of Atom.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Atom(pub String);

/// A class descriptor: a name plus its ancestors, consulted by exception
/// catchers to decide whether a thrown type matches a catcher's key (§4.3,
/// §9 open question on inheritance-chain matching).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prototype {
    pub name: String,
    pub ancestors: Vec<String>,
}

impl Prototype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ancestors: Vec::new(),
        }
    }

    /// The chain consulted by catcher matching: own name first, then each
    /// ancestor in declaration order.
    pub fn inheritance_chain(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.ancestors.iter().map(String::as_str))
    }
}

/// A captured frame in an exception's stack trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub function_name: String,
    pub instruction_offset: u64,
}

/// An exception: a payload value plus an optional captured call stack.
#[derive(Clone, Debug)]
pub struct Exception {
    pub tag: String,
    pub payload: Box<Value>,
    pub trace: Vec<TraceEntry>,
}

impl Exception {
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload: Box::new(payload),
            trace: Vec::new(),
        }
    }
}

/// The polymorphic runtime value.
///
/// This is the tagged-variant side of the "tagged variant plus capability
/// trait" re-architecture called for in §9: every variant implements the
/// shared capability set directly as inherent methods on `Value` rather than
/// going through a vtable, since Rust's enums make that free.
#[derive(Clone, Debug)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Byte(u8),
    Strite(String),
    Atom(Atom),
    Vector(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Object { class: String, fields: BTreeMap<String, Value> },
    Function(String),
    Process(Pid),
    Prototype(Prototype),
    Pointer(Pointer),
    Exception(Exception),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Boolean(_) => "Boolean",
            Value::Byte(_) => "Byte",
            Value::Strite(_) => "String",
            Value::Atom(_) => "Atom",
            Value::Vector(_) => "Vector",
            Value::Struct(_) => "Struct",
            Value::Object { .. } => "Object",
            Value::Function(_) => "Function",
            Value::Process(_) => "Process",
            Value::Prototype(_) => "Prototype",
            Value::Pointer(_) => "Pointer",
            Value::Exception(_) => "Exception",
        }
    }

    pub fn boolean(&self) -> bool {
        match self {
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Boolean(b) => *b,
            Value::Byte(b) => *b != 0,
            Value::Strite(s) => !s.is_empty(),
            Value::Vector(v) => !v.is_empty(),
            Value::Struct(m) => !m.is_empty(),
            _ => true,
        }
    }

    pub fn str(&self) -> String {
        match self {
            Value::Integer(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Byte(b) => b.to_string(),
            Value::Strite(s) => s.clone(),
            Value::Atom(a) => a.0.clone(),
            Value::Vector(v) => {
                let parts: Vec<String> = v.iter().map(Value::str).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Struct(m) => {
                let parts: Vec<String> =
                    m.iter().map(|(k, v)| format!("{k}: {}", v.str())).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Object { class, fields } => {
                let parts: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{k}: {}", v.str())).collect();
                format!("{class}{{{}}}", parts.join(", "))
            }
            Value::Function(name) => format!("Function({name})"),
            Value::Process(pid) => format!("Process({pid})"),
            Value::Prototype(p) => format!("Prototype({})", p.name),
            Value::Pointer(p) => format!("Pointer(expired={})", p.is_expired()),
            Value::Exception(e) => format!("Exception({}: {})", e.tag, e.payload.str()),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Value::Strite(s) => format!("\"{s}\""),
            other => other.str(),
        }
    }

    /// Deep-copies this value. Pointers are copied by reference (a copy of a
    /// Pointer still points at the same target, same as in the source
    /// system), everything else is recursively duplicated.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Vector(v) => Value::Vector(v.iter().map(Value::deep_copy).collect()),
            Value::Struct(m) => {
                Value::Struct(m.iter().map(|(k, v)| (k.clone(), v.deep_copy())).collect())
            }
            Value::Object { class, fields } => Value::Object {
                class: class.clone(),
                fields: fields.iter().map(|(k, v)| (k.clone(), v.deep_copy())).collect(),
            },
            Value::Exception(e) => Value::Exception(Exception {
                tag: e.tag.clone(),
                payload: Box::new(e.payload.deep_copy()),
                trace: e.trace.clone(),
            }),
            other => other.clone(),
        }
    }

    pub fn as_integer(&self) -> RuntimeResult<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Integer",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_float(&self) -> RuntimeResult<f64> {
        match self {
            Value::Float(n) => Ok(*n),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Float",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_vector(&self) -> RuntimeResult<&Vec<Value>> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Vector",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_vector_mut(&mut self) -> RuntimeResult<&mut Vec<Value>> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Vector",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_struct_mut(&mut self) -> RuntimeResult<&mut BTreeMap<String, Value>> {
        match self {
            Value::Struct(m) => Ok(m),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Struct",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_pointer(&self) -> RuntimeResult<&Pointer> {
        match self {
            Value::Pointer(p) => Ok(p),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Pointer",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_exception(&self) -> RuntimeResult<&Exception> {
        match self {
            Value::Exception(e) => Ok(e),
            other => Err(RuntimeError::TypeMismatch {
                expected: "Exception",
                found: other.type_name(),
            }),
        }
    }

    /// Type names consulted by exception catchers. Everything but `Object`
    /// matches only its own `type_name()`; an `Object` additionally matches
    /// every ancestor named by the `Prototype` it was built from, which the
    /// caller supplies since `Value` itself doesn't track class hierarchies.
    pub fn inheritance_chain<'a>(&'a self, prototype: Option<&'a Prototype>) -> Vec<&'a str> {
        match (self, prototype) {
            (Value::Object { class, .. }, Some(p)) if p.name == *class => {
                p.inheritance_chain().collect()
            }
            _ => vec![self.type_name()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_preserves_str_and_type_round_trip() {
        let v = Value::Vector(vec![Value::Integer(1), Value::Strite("a".into())]);
        let copy = v.deep_copy();
        assert_eq!(copy.str(), v.str());
        assert_eq!(copy.type_name(), v.type_name());
    }

    #[test]
    fn pointer_expires_when_last_cell_reference_dropped() {
        let origin = Pid::new(0, 0);
        let target = Cell::new(Value::Integer(42));
        let ptr = Pointer::new(origin, &target);
        assert!(!ptr.is_expired());
        drop(target);
        assert!(ptr.is_expired());
        assert!(matches!(ptr.target(), Err(RuntimeError::StaleReference)));
    }

    #[test]
    fn two_pointers_to_same_value_both_expire_together() {
        let origin = Pid::new(0, 0);
        let target = Cell::new(Value::Vector(vec![]));
        let a = Pointer::new(origin, &target);
        let b = Pointer::new(origin, &target);
        drop(target);
        assert!(a.is_expired());
        assert!(b.is_expired());
    }

    #[test]
    fn reset_detaches_from_old_target() {
        let origin = Pid::new(0, 0);
        let old = Cell::new(Value::Integer(1));
        let new = Cell::new(Value::Integer(2));
        let mut ptr = Pointer::new(origin, &old);
        ptr.reset(&new);
        drop(old);
        assert!(!ptr.is_expired());
        drop(new);
        assert!(ptr.is_expired());
    }

    #[test]
    fn inheritance_chain_includes_ancestors_for_matching_object() {
        let proto = Prototype {
            name: "MyErr".into(),
            ancestors: vec!["Exception".into(), "Value".into()],
        };
        let obj = Value::Object {
            class: "MyErr".into(),
            fields: BTreeMap::new(),
        };
        let chain = obj.inheritance_chain(Some(&proto));
        assert_eq!(chain, vec!["MyErr", "Exception", "Value"]);
    }
}
