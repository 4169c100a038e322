//! `Activation` (spec §3.8, §4.3): the heap object a function's named
//! registers become when they escape the frame that created them — a
//! closure capturing a variable, or `eval` running in the function's
//! scope. Grounded on `JSActivation`: while the frame is alive the
//! activation is just a view over the *live* register file; at `ret` the
//! frame's registers are about to be reused, so if anything still holds
//! the activation it must copy its band out into an owned vector first.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::code_block::CodeBlock;
use crate::error::{Result, VmError};
use crate::host::Host;
use crate::value::{Object, PreferredType, Value};

/// Where an `Activation`'s registers currently live.
enum Backing {
    /// The frame that owns these registers is still on the call stack;
    /// `base` is the absolute index of the frame's band start (spec's
    /// `this` slot) in the machine's register file, and reads/writes go
    /// through the callback the `Machine` installs.
    Live { base: u32 },
    /// The frame returned while this activation was still reachable;
    /// its band was copied out at that point (`JSActivation::copyRegisters`).
    Detached(Vec<Value>),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Live { base } => write!(f, "Live {{ base: {base} }}"),
            Backing::Detached(values) => write!(f, "Detached({} registers)", values.len()),
        }
    }
}

/// Callback into the live register file. Kept as a trait object so
/// `Activation` does not need to be generic over the `Machine`'s
/// internals; `Machine::register_file_accessor` supplies the real
/// implementation, tests can supply a `Vec<Value>`-backed stub.
pub trait RegisterFileAccess: fmt::Debug {
    fn get(&self, absolute_index: u32) -> Value;
    fn set(&self, absolute_index: u32, value: Value);
}

struct Inner {
    code: Rc<CodeBlock>,
    backing: RefCell<Backing>,
    accessor: Option<Rc<dyn RegisterFileAccess>>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner").field("backing", &self.backing).finish()
    }
}

/// A lazily-materialized view onto a function's parameter/local band.
#[derive(Debug, Clone)]
pub struct Activation(Rc<Inner>);

impl Activation {
    /// Creates an activation over a frame that is still on the call
    /// stack: reads and writes go straight through `accessor` until
    /// [`Activation::detach`] is called.
    pub fn live(code: Rc<CodeBlock>, base: u32, accessor: Rc<dyn RegisterFileAccess>) -> Self {
        Activation(Rc::new(Inner {
            code,
            backing: RefCell::new(Backing::Live { base }),
            accessor: Some(accessor),
        }))
    }

    /// Copies the frame's band out into an owned vector, the way
    /// `JSActivation::copyRegisters` does at `ret` time. A no-op if this
    /// activation has already been detached. The caller (the `Machine`,
    /// at the point a frame is about to be reused) is responsible for
    /// knowing whether anything still holds this activation; spec §4.3
    /// ties that decision to `needsClosure`/`usesEval`, not to runtime
    /// refcounting, since the activation object itself may still be
    /// reachable from a closure even though nothing else on the register
    /// file references it.
    pub fn detach(&self) {
        let mut backing = self.0.backing.borrow_mut();
        if let Backing::Live { base } = *backing {
            let accessor = self.0.accessor.as_ref().expect("live activation always has an accessor");
            let count = self.0.code.frame_band_size();
            let copied: Vec<Value> = (0..count).map(|i| accessor.get(base + i)).collect();
            *backing = Backing::Detached(copied);
        }
    }

    fn band_offset(&self, name: &str) -> Option<(i32, u32)> {
        let relative = self.0.code.register_for_local(name)?;
        // `frame_band_size` counts `this` + parameters + vars; a register
        // index of `-(frame_band_size)` is the `this` slot itself, so the
        // offset into the backing store is `relative + frame_band_size`.
        let offset = relative + self.0.code.frame_band_size() as i32;
        Some((relative, offset as u32))
    }

    fn read(&self, offset: u32) -> Value {
        match &*self.0.backing.borrow() {
            Backing::Live { base } => {
                self.0.accessor.as_ref().expect("live activation always has an accessor").get(base + offset)
            }
            Backing::Detached(values) => values[offset as usize].clone(),
        }
    }

    fn write(&self, offset: u32, value: Value) {
        match &mut *self.0.backing.borrow_mut() {
            Backing::Live { base } => {
                self.0.accessor.as_ref().expect("live activation always has an accessor").set(*base + offset, value)
            }
            Backing::Detached(values) => values[offset as usize] = value,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(&*self.0.backing.borrow(), Backing::Detached(_))
    }
}

impl Object for Activation {
    fn class_name(&self) -> &str {
        "Activation"
    }

    fn get(&self, _host: &mut dyn Host, property: &str) -> Result<Value> {
        match self.band_offset(property) {
            Some((_, offset)) => Ok(self.read(offset)),
            None => Err(VmError::reference(property)),
        }
    }

    fn put(&self, _host: &mut dyn Host, property: &str, value: Value) -> Result<()> {
        match self.band_offset(property) {
            Some((_, offset)) => {
                self.write(offset, value);
                Ok(())
            }
            // Spec §3.8: assigning to a name the activation does not
            // bind is not this object's concern; the scope chain walk
            // that reached here will have already tried the next link.
            None => Err(VmError::reference(property)),
        }
    }

    fn delete(&self, _property: &str) -> bool {
        // Named bindings of an activation are not configurable.
        false
    }

    fn to_primitive(&self, _host: &mut dyn Host, _hint: PreferredType) -> Result<Value> {
        Err(VmError::ty("Activation has no primitive representation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_block::{CodeBlock, SymbolTable};
    use crate::host::tests::TestHost;
    use crate::opcode::{InstructionStream, Opcode};
    use std::cell::RefCell as StdRefCell;

    #[derive(Debug, Default)]
    struct FakeRegisterFile(StdRefCell<Vec<Value>>);

    impl RegisterFileAccess for FakeRegisterFile {
        fn get(&self, absolute_index: u32) -> Value {
            self.0.borrow()[absolute_index as usize].clone()
        }
        fn set(&self, absolute_index: u32, value: Value) {
            self.0.borrow_mut()[absolute_index as usize] = value;
        }
    }

    fn block_with_one_local() -> Rc<CodeBlock> {
        let mut instructions = InstructionStream::new();
        instructions.emit(Opcode::End, &[]);
        let mut locals = SymbolTable::default();
        locals.insert(Rc::from("x"), -1);
        Rc::new(CodeBlock::new(
            instructions,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            0,
            1,
            0,
            true,
            false,
            true,
            locals,
            None,
            Vec::new(),
        ))
    }

    #[test]
    fn live_activation_reads_through_the_accessor() {
        let code = block_with_one_local();
        let file = Rc::new(FakeRegisterFile(StdRefCell::new(vec![
            Value::Undefined,
            Value::Undefined,
            Value::number(42.0),
        ])));
        let activation = Activation::live(code, 0, file);
        let mut host = TestHost::default();
        let v = activation.get(&mut host, "x").unwrap();
        match v {
            Value::Number(n) => assert_eq!(n, 42.0),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn detach_preserves_the_last_observed_values() {
        let code = block_with_one_local();
        let file = Rc::new(FakeRegisterFile(StdRefCell::new(vec![
            Value::Undefined,
            Value::Undefined,
            Value::number(7.0),
        ])));
        let activation = Activation::live(code, 0, file);
        activation.detach();
        assert!(activation.is_detached());
        let mut host = TestHost::default();
        let v = activation.get(&mut host, "x").unwrap();
        match v {
            Value::Number(n) => assert_eq!(n, 7.0),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn writes_after_detach_do_not_reach_the_original_register_file() {
        let code = block_with_one_local();
        let file = Rc::new(FakeRegisterFile(StdRefCell::new(vec![
            Value::Undefined,
            Value::Undefined,
            Value::number(1.0),
        ])));
        let activation = Activation::live(code.clone(), 0, file.clone());
        activation.detach();
        let mut host = TestHost::default();
        activation.put(&mut host, "x", Value::number(2.0)).unwrap();
        // The underlying file is untouched; only the detached copy changed.
        match file.get(2) {
            Value::Number(n) => assert_eq!(n, 1.0),
            other => panic!("expected number, got {other:?}"),
        }
    }
}
