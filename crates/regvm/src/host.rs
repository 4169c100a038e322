//! The embedding boundary (spec §1, §6.2): everything the core treats as
//! an external collaborator rather than defining itself — the global
//! object, primitive-wrapper construction, `eval` re-entry, and the
//! collector's mark callback.
//!
//! `Host` is the trait object the dispatch loop holds a `&mut dyn Host`
//! to whenever an opcode needs to cross the black-box boundary (property
//! access, coercion that can call user code, `eval`). Keeping it
//! non-generic over the `Machine` means `Value` stays a plain, ungenericized
//! enum that flows through the register file without infecting every
//! module with a type parameter.

use std::rc::Rc;

use crate::code_block::CodeBlock;
use crate::error::Result;
use crate::scope_chain::ScopeChain;
use crate::value::Value;

/// The narrow interface `Host::eval` re-enters the VM through. Implemented
/// by [`crate::machine::Machine`]; kept separate from `Host` so `Host`
/// itself stays object-safe without a generic `Machine` parameter.
pub trait Executor {
    /// Compile (if necessary) and run `code` with the given scope chain
    /// and `this` binding, returning its `op_end` result. Used for
    /// `eval`-in-scope re-entry; grows the same register file as the
    /// caller (spec §5: "such re-entry is on the same thread and grows
    /// the same register file linearly").
    fn execute(&mut self, code: Rc<CodeBlock>, scope: ScopeChain, this: Value) -> Result<Value>;
}

/// Everything the core asks of its embedder.
pub trait Host {
    /// The outermost scope object, consulted by `resolve_base` on a total
    /// miss and used as the base of every top-level scope chain.
    fn global_object(&self) -> Value;

    /// `ToObject` on a primitive: wrap it in whatever Number/String/Boolean
    /// wrapper object the embedder's object model provides.
    fn wrap_primitive(&mut self, value: Value) -> Result<Value>;

    /// Parse and run `source` as an `eval` body in the given scope chain.
    /// Lexing/parsing is outside the core (spec §1); the host is expected
    /// to parse `source` and call back into `executor` to run the result.
    fn eval(
        &mut self,
        executor: &mut dyn Executor,
        scope: ScopeChain,
        this: Value,
        source: &str,
    ) -> Result<Value>;

    /// Invoked once per GC root by [`crate::machine::Machine::mark`]. The
    /// collector, not the core, is responsible for tracing into any
    /// objects reachable from `value`.
    fn mark_root(&mut self, value: &Value);

    /// Constructs an empty plain object (`NewObject`, spec §6.1). The
    /// resulting shape is entirely the host's concern; the core only
    /// needs something it can `put` named properties onto afterward.
    fn new_plain_object(&mut self) -> Result<Value>;

    /// Constructs an array object wrapping `elements` (`NewArray`).
    fn new_array(&mut self, elements: Vec<Value>) -> Result<Value>;

    /// Enumerable own property names of `value`, snapshotted once for
    /// `op_get_pnames` (spec §4.2's Iteration section). Ordering is up to
    /// the embedder's object model; the core just walks the list in the
    /// order returned.
    fn property_names(&mut self, value: &Value) -> Result<Vec<Rc<str>>>;
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A `Host` with no object model at all, sufficient for tests that
    /// only exercise primitive coercion and arithmetic.
    #[derive(Default)]
    pub struct TestHost {
        pub marked: Vec<Value>,
    }

    impl Host for TestHost {
        fn global_object(&self) -> Value {
            Value::Undefined
        }

        fn wrap_primitive(&mut self, value: Value) -> Result<Value> {
            Ok(value)
        }

        fn eval(
            &mut self,
            _executor: &mut dyn Executor,
            _scope: ScopeChain,
            _this: Value,
            _source: &str,
        ) -> Result<Value> {
            Err(crate::error::VmError::syntax("eval is not supported by TestHost"))
        }

        fn mark_root(&mut self, value: &Value) {
            self.marked.push(value.clone());
        }

        fn new_plain_object(&mut self) -> Result<Value> {
            Err(crate::error::VmError::ty("TestHost has no object model"))
        }

        fn new_array(&mut self, _elements: Vec<Value>) -> Result<Value> {
            Err(crate::error::VmError::ty("TestHost has no object model"))
        }

        fn property_names(&mut self, _value: &Value) -> Result<Vec<Rc<str>>> {
            Err(crate::error::VmError::ty("TestHost has no object model"))
        }
    }
}
