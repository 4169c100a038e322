//! The tagged value type the VM operates on.
//!
//! The object model, primitive coercion rules, and garbage collector live
//! outside this crate (see [`crate::host`]); `Value` only carries the tag
//! and the handful of coercions the dispatch loop needs to perform inline
//! (number/boolean coercion, abstract and strict equality). Anything that
//! requires consulting an object — `get`, `put`, `call`, `construct`,
//! `hasInstance`, `toPrimitive` on an object — goes through the [`Object`]
//! trait and the [`crate::host::Host`] the embedder supplies.

use std::fmt;
use std::rc::Rc;

use crate::code_block::CodeBlock;
use crate::error::{Result, VmError};
use crate::host::Host;
use crate::scope_chain::ScopeChain;

/// An opaque, tagged value.
///
/// Cloning is O(1): strings and objects are reference counted, numbers and
/// booleans are copied.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Object(Rc<dyn Object>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "[object {}]", o.class_name()),
        }
    }
}

/// Which kind of primitive `toPrimitive` should prefer when a value has no
/// natural primitive representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    Default,
    Number,
    String,
}

impl Value {
    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_undefined_or_null(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Rc<dyn Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// ECMA-style `ToBoolean`. Never fails: every tag has a defined truthiness.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// `ToNumber`, consulting the host only for objects (via `toPrimitive`).
    pub fn to_number(&self, host: &mut dyn Host) -> Result<f64> {
        match self {
            Value::Undefined => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(*n),
            Value::String(s) => Ok(string_to_number(s)),
            Value::Object(o) => {
                let prim = o.to_primitive(host, PreferredType::Number)?;
                prim.to_number(host)
            }
        }
    }

    pub fn to_int32(&self, host: &mut dyn Host) -> Result<i32> {
        Ok(double_to_int32(self.to_number(host)?))
    }

    pub fn to_uint32(&self, host: &mut dyn Host) -> Result<u32> {
        Ok(double_to_int32(self.to_number(host)?) as u32)
    }

    /// `ToPrimitive`, honoring a preferred type hint (used by `+` to decide
    /// between numeric addition and string concatenation).
    pub fn to_primitive(&self, host: &mut dyn Host, hint: PreferredType) -> Result<Value> {
        match self {
            Value::Object(o) => o.to_primitive(host, hint),
            other => Ok(other.clone()),
        }
    }

    /// `ToString`, consulting the host only for objects.
    pub fn to_vm_string(&self, host: &mut dyn Host) -> Result<Rc<str>> {
        match self {
            Value::Undefined => Ok(Rc::from("undefined")),
            Value::Null => Ok(Rc::from("null")),
            Value::Boolean(b) => Ok(Rc::from(if *b { "true" } else { "false" })),
            Value::Number(n) => Ok(Rc::from(number_to_string(*n).as_str())),
            Value::String(s) => Ok(s.clone()),
            Value::Object(o) => {
                let prim = o.to_primitive(host, PreferredType::String)?;
                prim.to_vm_string(host)
            }
        }
    }

    /// `ToObject`. Primitive wrapper objects are the host's concern; the
    /// core only fails fast for `undefined`/`null`, which have no wrapper.
    pub fn to_object(&self, host: &mut dyn Host) -> Result<Value> {
        match self {
            Value::Undefined | Value::Null => Err(VmError::ty("cannot convert undefined or null to object")),
            Value::Object(_) => Ok(self.clone()),
            primitive => host.wrap_primitive(primitive.clone()),
        }
    }
}

/// The object-model boundary: everything a [`Value::Object`] can do, as
/// observed by the dispatch loop. Implemented by the embedder for host
/// objects, and by [`crate::codegen::ScriptFunction`] for VM-created
/// closures so that `op_call`/`op_construct` can fast-path them.
pub trait Object: fmt::Debug {
    fn class_name(&self) -> &str;

    fn get(&self, host: &mut dyn Host, property: &str) -> Result<Value>;
    fn put(&self, host: &mut dyn Host, property: &str, value: Value) -> Result<()>;
    fn delete(&self, property: &str) -> bool;

    fn is_callable(&self) -> bool {
        false
    }
    fn is_constructible(&self) -> bool {
        false
    }

    /// Lets a `Host` downcast back to its own concrete object type from a
    /// type-erased `Rc<dyn Object>`, e.g. to enumerate properties for
    /// `Host::property_names`. The core never calls this itself.
    fn as_any(&self) -> &dyn std::any::Any
    where
        Self: 'static,
    {
        self
    }

    fn call(&self, _host: &mut dyn Host, _this: Value, _args: &[Value]) -> Result<Value> {
        Err(VmError::ty("value is not a function"))
    }
    fn construct(&self, _host: &mut dyn Host, _args: &[Value]) -> Result<Value> {
        Err(VmError::ty("value is not a constructor"))
    }

    fn has_instance(&self, _host: &mut dyn Host, _value: &Value) -> Result<bool> {
        Err(VmError::ty("right-hand side of 'instanceof' is not callable"))
    }

    fn to_primitive(&self, _host: &mut dyn Host, _hint: PreferredType) -> Result<Value> {
        Ok(Value::string("[object Object]"))
    }

    /// Declared-function objects expose their [`CodeBlock`] and captured
    /// scope so `op_call` can take the zero-copy register-overlap path
    /// instead of falling through to [`Object::call`] (spec §4.2: "the
    /// core asserts it is a declared-function object; host-function calls
    /// fall through to the black-box `call` path").
    fn as_script_function(&self) -> Option<&dyn ScriptCallable> {
        None
    }

    /// Roots reachable from this object, for the collector's mark phase.
    /// The core never calls this itself; it is exposed for host
    /// `mark` implementations to recurse into VM-created closures.
    fn mark_children(&self, _visit: &mut dyn FnMut(&Value)) {}
}

/// The subset of a declared function's state the `Machine` needs to set up
/// an overlapping call frame.
pub trait ScriptCallable: fmt::Debug {
    fn code(&self) -> &Rc<CodeBlock>;
    fn captured_scope(&self) -> &ScopeChain;
}

/// Abstract equality (`==`/`!=`), delegating object-to-primitive coercion
/// to the host. NaN is never equal to anything, including itself.
pub fn abstract_equals(a: &Value, b: &Value, host: &mut dyn Host) -> Result<bool> {
    use Value::*;
    Ok(match (a, b) {
        (Undefined, Undefined) | (Null, Null) | (Undefined, Null) | (Null, Undefined) => true,
        (Number(x), Number(y)) => x == y,
        (String(x), String(y)) => x == y,
        (Boolean(x), Boolean(y)) => x == y,
        (Object(x), Object(y)) => Rc::ptr_eq(x, y),
        (Number(_), String(_)) | (String(_), Number(_)) => {
            let x = a.to_number(host)?;
            let y = b.to_number(host)?;
            x == y
        }
        (Boolean(_), _) => abstract_equals(&Number(a.to_number(host)?), b, host)?,
        (_, Boolean(_)) => abstract_equals(a, &Number(b.to_number(host)?), host)?,
        (Object(_), Number(_) | String(_)) => {
            let prim = a.to_primitive(host, PreferredType::Default)?;
            abstract_equals(&prim, b, host)?
        }
        (Number(_) | String(_), Object(_)) => {
            let prim = b.to_primitive(host, PreferredType::Default)?;
            abstract_equals(a, &prim, host)?
        }
        _ => false,
    })
}

/// Strict equality (`===`/`!==`): same type, same value, no coercion.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Undefined, Undefined) | (Null, Null) => true,
        (Boolean(x), Boolean(y)) => x == y,
        (Number(x), Number(y)) => x == y,
        (String(x), String(y)) => x == y,
        (Object(x), Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `+`: string concatenation if either operand's primitive form is a
/// string, numeric addition otherwise. Left operand is coerced before the
/// right (spec §4.2: "order of coercion side effects: left before right").
pub fn add(a: &Value, b: &Value, host: &mut dyn Host) -> Result<Value> {
    let lprim = a.to_primitive(host, PreferredType::Default)?;
    let rprim = b.to_primitive(host, PreferredType::Default)?;
    if matches!(lprim, Value::String(_)) || matches!(rprim, Value::String(_)) {
        let ls = lprim.to_vm_string(host)?;
        let rs = rprim.to_vm_string(host)?;
        let mut s = String::with_capacity(ls.len() + rs.len());
        s.push_str(&ls);
        s.push_str(&rs);
        Ok(Value::string(s))
    } else {
        Ok(Value::number(lprim.to_number(host)? + rprim.to_number(host)?))
    }
}

/// `<`/`<=` (and, by negation, `>`/`>=`): numeric comparison unless both
/// primitive forms are strings, in which case compare lexicographically.
/// Any `NaN` comparison yields `None` (spec: "NaN comparisons produce
/// false").
pub fn less_than(a: &Value, b: &Value, host: &mut dyn Host) -> Result<Option<std::cmp::Ordering>> {
    let lprim = a.to_primitive(host, PreferredType::Number)?;
    let rprim = b.to_primitive(host, PreferredType::Number)?;
    if let (Value::String(ls), Value::String(rs)) = (&lprim, &rprim) {
        return Ok(Some(ls.as_ref().cmp(rs.as_ref())));
    }
    let ln = lprim.to_number(host)?;
    let rn = rprim.to_number(host)?;
    Ok(ln.partial_cmp(&rn))
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        0.0
    } else {
        trimmed.parse().unwrap_or(f64::NAN)
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

/// `ToInt32`/`ToUint32`'s shared modular-reduction step.
fn double_to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let n = n.trunc();
    let m = n.rem_euclid(4294967296.0);
    if m >= 2147483648.0 {
        (m - 4294967296.0) as i32
    } else {
        m as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::TestHost;

    #[test]
    fn to_boolean_matches_truthiness_table() {
        assert!(!Value::Undefined.to_boolean());
        assert!(!Value::Null.to_boolean());
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::Number(1.0).to_boolean());
        assert!(!Value::string("").to_boolean());
        assert!(Value::string("x").to_boolean());
    }

    #[test]
    fn double_to_int32_wraps() {
        assert_eq!(double_to_int32(4294967296.0), 0);
        assert_eq!(double_to_int32(4294967297.0), 1);
        assert_eq!(double_to_int32(-1.0), -1);
        assert_eq!(double_to_int32(f64::NAN), 0);
    }

    #[test]
    fn add_concatenates_when_either_side_is_string() {
        let mut host = TestHost::default();
        let v = add(&Value::number(1.0), &Value::string("x"), &mut host).unwrap();
        match v {
            Value::String(s) => assert_eq!(&*s, "1x"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn add_is_numeric_when_both_sides_are_numeric() {
        let mut host = TestHost::default();
        let v = add(&Value::number(1.0), &Value::number(2.0), &mut host).unwrap();
        match v {
            Value::Number(n) => assert_eq!(n, 3.0),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let nan = Value::Number(f64::NAN);
        assert!(!strict_equals(&nan, &nan));
    }

    #[test]
    fn strict_equals_rejects_cross_type() {
        assert!(!strict_equals(&Value::number(0.0), &Value::string("0")));
        assert!(!strict_equals(&Value::Undefined, &Value::Null));
    }
}
