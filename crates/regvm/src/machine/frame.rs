//! The register file and the out-of-band call-stack the dispatch loop
//! runs on.
//!
//! Grounded on `Machine.cpp`'s `op_call`/`op_ret`, with one deliberate
//! deviation spec §9's own Design Notes invite: return-info lives in a
//! dedicated `Vec<FrameRecord>`, not interleaved into the register file
//! itself. The register file stays a single flat `Vec<Value>` addressed
//! by absolute index; a frame's `r` is the absolute index of the first
//! register *above* its `this` slot, i.e. the start of its parameter
//! band.

use std::rc::Rc;

use crate::activation::{Activation, RegisterFileAccess};
use crate::code_block::CodeBlock;
use crate::scope_chain::ScopeChain;
use crate::value::Value;

/// One entry in the out-of-band call stack: everything needed to resume
/// the caller when the callee returns or throws.
pub struct FrameRecord {
    pub caller_code: Rc<CodeBlock>,
    pub caller_scope: ScopeChain,
    pub caller_r: u32,
    pub return_vpc: u32,
    /// Absolute register index the callee's return value (or, on an
    /// exception, `undefined`) should be written to in the caller's
    /// frame.
    pub dest_register: u32,
    /// Absolute index of the first actual argument (spec §S.3's
    /// `original_args` accessor): always the original, untouched caller
    /// band even when underflow/overflow forced a copy elsewhere.
    pub original_args_base: u32,
    pub original_args_count: u32,
    /// Absolute index of the start of whatever the caller reserved for
    /// this call (the `this` slot of the original argv band). Once this
    /// frame and everything it calls has returned, the register file can
    /// be truncated back to this index — true in all three arities,
    /// since underflow/overflow always allocate their working band
    /// further up, never below it.
    pub caller_band_start: u32,
    /// Set once an `Activation` is created lazily for this frame (spec
    /// §4.3); detached when the frame is popped if anything still holds
    /// it reachable through a closure.
    pub activation: Option<Activation>,
}

/// Adapter the `Machine` hands to a lazily-created `Activation` so it can
/// read/write live registers without the activation needing to know
/// about `RegisterFile`'s internals.
pub struct LiveRegisterFile(pub std::cell::RefCell<Vec<Value>>);

impl RegisterFileAccess for LiveRegisterFile {
    fn get(&self, absolute_index: u32) -> Value {
        self.0.borrow()[absolute_index as usize].clone()
    }
    fn set(&self, absolute_index: u32, value: Value) {
        self.0.borrow_mut()[absolute_index as usize] = value;
    }
}

impl std::fmt::Debug for LiveRegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LiveRegisterFile({} registers)", self.0.borrow().len())
    }
}

/// The flat, growable register file shared by every frame on the call
/// stack. Callee parameter bands alias the caller's argument temporaries
/// directly in the common case (spec §4.2's "zero-copy" call), so this is
/// one contiguous `Vec`, not one arena per frame.
#[derive(Debug)]
pub struct RegisterFile {
    storage: Rc<LiveRegisterFile>,
}

impl RegisterFile {
    pub fn new(initial_capacity: usize) -> Self {
        RegisterFile { storage: Rc::new(LiveRegisterFile(std::cell::RefCell::new(Vec::with_capacity(initial_capacity)))) }
    }

    pub fn len(&self) -> u32 {
        self.storage.0.borrow().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows the file so that absolute index `top - 1` is valid,
    /// filling new slots with `undefined`.
    pub fn ensure_capacity(&mut self, top: u32) {
        let mut storage = self.storage.0.borrow_mut();
        if (top as usize) > storage.len() {
            storage.resize(top as usize, Value::Undefined);
        }
    }

    pub fn get(&self, absolute_index: u32) -> Value {
        self.storage.0.borrow()[absolute_index as usize].clone()
    }

    pub fn set(&mut self, absolute_index: u32, value: Value) {
        self.storage.0.borrow_mut()[absolute_index as usize] = value;
    }

    pub fn slice(&self, base: u32, count: u32) -> Vec<Value> {
        let storage = self.storage.0.borrow();
        storage[base as usize..(base + count) as usize].to_vec()
    }

    /// Truncates the file back to `len`, discarding any registers above
    /// it. Called when a frame returns and nothing kept an `Activation`
    /// alive over it.
    pub fn truncate(&mut self, len: u32) {
        self.storage.0.borrow_mut().truncate(len as usize);
    }

    /// The shared handle a newly-materialized `Activation` borrows to
    /// read/write this file while its frame is still live.
    pub fn accessor(&self) -> Rc<LiveRegisterFile> {
        self.storage.clone()
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new(0)
    }
}
