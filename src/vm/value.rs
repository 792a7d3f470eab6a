//! The runtime value type and its 64-bit constant encoding.

use indexmap::IndexMap;

/// Name-keyed table used for globals, method tables and instance fields.
pub type Table = IndexMap<String, Value, ahash::RandomState>;

/// Index of an object in the VM heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjPtr(pub usize);

/// A runtime value: passed on the stack, stored in variables and fields.
///
/// `PartialEq` is structural and exists for host-side comparisons. The language's
/// `==` goes through [`Value::equals`], which never equates object pointers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Nil,
    Object(ObjPtr),
}

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const QNAN: u64 = 0x7ffc_0000_0000_0000;
const TAG_NIL: u64 = 1;
const TAG_FALSE: u64 = 2;
const TAG_TRUE: u64 = 3;

impl Value {
    /// Only `nil` and `false` are falsey.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Language-level equality: same variant and same payload, objects excluded.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjPtr> {
        match self {
            Value::Object(ptr) => Some(*ptr),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Object(_) => "object",
        }
    }

    /// Encode as the raw bit pattern stored in a chunk's constant table.
    ///
    /// Numbers keep their IEEE-754 bits (NaN is canonicalised so it cannot
    /// collide with a tag); the other variants live in the quiet-NaN space.
    pub fn to_bits(self) -> u64 {
        match self {
            Value::Number(n) if n.is_nan() => f64::NAN.to_bits(),
            Value::Number(n) => n.to_bits(),
            Value::Nil => QNAN | TAG_NIL,
            Value::Bool(false) => QNAN | TAG_FALSE,
            Value::Bool(true) => QNAN | TAG_TRUE,
            Value::Object(ObjPtr(index)) => SIGN_BIT | QNAN | index as u64,
        }
    }

    pub fn from_bits(bits: u64) -> Value {
        if bits & QNAN != QNAN {
            return Value::Number(f64::from_bits(bits));
        }
        if bits & SIGN_BIT != 0 {
            return Value::Object(ObjPtr((bits & !(SIGN_BIT | QNAN)) as usize));
        }
        match bits {
            b if b == QNAN | TAG_NIL => Value::Nil,
            b if b == QNAN | TAG_FALSE => Value::Bool(false),
            b if b == QNAN | TAG_TRUE => Value::Bool(true),
            b => Value::Number(f64::from_bits(b)),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
        assert!(!Value::Object(ObjPtr(0)).is_falsey());
    }

    #[test]
    fn test_equality_is_per_variant() {
        assert!(Value::Number(1.0).equals(&Value::Number(1.0)));
        assert!(Value::Nil.equals(&Value::Nil));
        assert!(!Value::Nil.equals(&Value::Bool(false)));
        assert!(!Value::Number(0.0).equals(&Value::Bool(false)));
        assert!(!Value::Object(ObjPtr(3)).equals(&Value::Object(ObjPtr(3))));
    }

    #[test]
    fn test_bit_encoding() {
        for value in [
            Value::Number(2.5),
            Value::Number(-0.0),
            Value::Number(f64::INFINITY),
            Value::Nil,
            Value::Bool(true),
            Value::Bool(false),
            Value::Object(ObjPtr(42)),
        ] {
            assert_eq!(Value::from_bits(value.to_bits()), value);
        }
        assert!(matches!(Value::from_bits(Value::Number(f64::NAN).to_bits()), Value::Number(n) if n.is_nan()));
    }
}
