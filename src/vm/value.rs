use std::fmt;

/// An interned symbol. Two symbols with the same spelling always carry the
/// same id, so symbol equality is id equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymId(pub u32);

/// A handle to a heap object tracked by the garbage collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    pub index: u32,
}

/// A tagged value.
///
/// Primitives live inline; every other kind is a handle into the heap arena.
/// The tag names the heap kind, so method dispatch is a single match before
/// entering the resolver.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Sym(SymId),
    Str(GcRef),
    Array(GcRef),
    Hash(GcRef),
    Range(GcRef),
    Proc(GcRef),
    Class(GcRef),
    Module(GcRef),
    Object(GcRef),
    Coroutine(GcRef),
    CMethod(GcRef),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Ruby truthiness: only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// The heap handle, for any heap-backed kind.
    pub fn gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Str(r)
            | Value::Array(r)
            | Value::Hash(r)
            | Value::Range(r)
            | Value::Proc(r)
            | Value::Class(r)
            | Value::Module(r)
            | Value::Object(r)
            | Value::Coroutine(r)
            | Value::CMethod(r) => Some(*r),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Sym(_) => "symbol",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Range(_) => "range",
            Value::Proc(_) => "proc",
            Value::Class(_) => "class",
            Value::Module(_) => "module",
            Value::Object(_) => "object",
            Value::Coroutine(_) => "coroutine",
            Value::CMethod(_) => "cmethod",
        }
    }
}

/// Shallow equality: primitives by value (int/float compare numerically),
/// heap kinds by handle identity. The heap-aware equality the language's
/// `==` uses (which also compares string contents) lives on `Heap`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Sym(a), Value::Sym(b)) => a == b,
            _ => match (self.gc_ref(), other.gc_ref()) {
                (Some(a), Some(b)) => {
                    std::mem::discriminant(self) == std::mem::discriminant(other) && a == b
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", crate::vm::heap::format_float(*x)),
            Value::Sym(s) => write!(f, "<sym {}>", s.0),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::Sym(SymId(0)).is_truthy());
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Int(42), Value::Int(42));
        assert_eq!(Value::Int(42), Value::Float(42.0));
        assert_ne!(Value::Int(1), Value::Nil);
        assert_ne!(Value::Int(0), Value::Bool(false));
    }

    #[test]
    fn test_ref_identity() {
        let a = Value::Array(GcRef { index: 1 });
        let b = Value::Array(GcRef { index: 1 });
        let c = Value::Array(GcRef { index: 2 });
        let d = Value::Hash(GcRef { index: 1 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
