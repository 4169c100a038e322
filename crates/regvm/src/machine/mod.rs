//! The dispatch core (spec §4.2): frame setup/teardown lives here;
//! the opcode-by-opcode `match` lives in [`dispatch`].

mod dispatch;
mod frame;

pub use frame::{FrameRecord, RegisterFile};

use std::rc::Rc;

use log::{debug, trace};

use crate::activation::Activation;
use crate::code_block::CodeBlock;
use crate::error::{Result, VmError};
use crate::host::{Executor, Host};
use crate::scope_chain::ScopeChain;
use crate::value::Value;

/// Tunables that are not part of the spec's wire format or bytecode, only
/// of how a particular embedding runs the machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Call-stack depth at which `op_call`/`op_construct` raise
    /// `RangeError` instead of recursing further (spec §7 item 3).
    pub max_call_depth: u32,
    /// Initial backing capacity for the register file, to avoid a string
    /// of small reallocations during a program's first few calls.
    pub initial_register_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig { max_call_depth: 1024, initial_register_capacity: 256 }
    }
}

fn empty_code_block() -> Rc<CodeBlock> {
    let mut instructions = crate::opcode::InstructionStream::new();
    instructions.emit(crate::opcode::Opcode::End, &[]);
    Rc::new(CodeBlock::new(
        instructions,
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        0,
        0,
        0,
        false,
        false,
        false,
        crate::code_block::SymbolTable::default(),
        None,
        Vec::new(),
    ))
}

/// The register-VM dispatch loop, generic over the embedder's object
/// model. `H` stays a compile-time parameter rather than `Box<dyn Host>`
/// so the common case pays no extra indirection; call sites needing
/// dynamic dispatch still get it implicitly at `&mut dyn Host` argument
/// positions (spec §6.2).
pub struct Machine<H: Host> {
    host: H,
    config: MachineConfig,
    registers: RegisterFile,
    frames: Vec<FrameRecord>,
    code: Rc<CodeBlock>,
    scope: ScopeChain,
    r: u32,
    vpc: u32,
    /// Live `for-in` enumerators, indexed by the value `op_get_pnames`
    /// stashes in its destination register. Never shrunk mid-run; a
    /// program with deeply nested `for-in` loops grows this, not a
    /// concern at the scale this core targets.
    enumerators: Vec<PnameEnumerator>,
}

/// A `for-in` loop's frozen snapshot of an object's property names, plus
/// the cursor `op_next_pname` advances (spec §4.2's "fresh property-name
/// enumerator").
struct PnameEnumerator {
    names: Vec<Rc<str>>,
    cursor: usize,
}

impl<H: Host> Machine<H> {
    pub fn new(host: H, config: MachineConfig) -> Self {
        let registers = RegisterFile::new(config.initial_register_capacity);
        Machine {
            host,
            config,
            registers,
            frames: Vec::new(),
            code: empty_code_block(),
            scope: ScopeChain::empty(),
            r: 0,
            vpc: 0,
            enumerators: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Runs `code` as a fresh invocation (top-level program, or a direct
    /// embedder call into a declared function) with `this` and `args`.
    /// `eval` re-entry goes through this same path via [`Executor`].
    pub fn call_script(&mut self, code: Rc<CodeBlock>, scope: ScopeChain, this: Value, args: &[Value]) -> Result<Value> {
        if self.frames.len() as u32 >= self.config.max_call_depth {
            return Err(VmError::range("call stack size exceeded"));
        }
        debug!("entering top-level frame, {} parameter(s), {} argument(s)", code.num_parameters(), args.len());
        let base_depth = self.frames.len();
        let pre_len = self.registers.len();
        self.push_fresh_frame(code, scope, this, args);
        let result = self.run(base_depth);
        self.registers.truncate(pre_len);
        result
    }

    /// Calls a declared function value, taking the zero-copy overlap
    /// path when `callee` is a VM-created closure and falling back to
    /// [`crate::value::Object::call`] for anything else (spec §4.2: "the
    /// core asserts it is a declared-function object; host-function
    /// calls fall through to the black-box `call` path").
    pub(crate) fn invoke(
        &mut self,
        callee: &Value,
        this: Value,
        args_base_abs: u32,
        argc: u32,
        dest_register_abs: u32,
        return_vpc: u32,
        is_construct: bool,
    ) -> Result<Option<Value>> {
        let object = match callee.as_object() {
            Some(o) => o.clone(),
            None => return Err(VmError::ty("value is not a function")),
        };
        if let Some(script) = object.as_script_function() {
            if is_construct {
                if !object.is_constructible() {
                    return Err(VmError::ty("value is not a constructor"));
                }
                // A declared function still runs its body through the
                // overlapping-frame path; only `this` differs, a fresh
                // object rather than the caller's, written into the
                // band's `this` slot before the frame is entered.
                let fresh_this = self.host.new_plain_object()?;
                self.registers.set(args_base_abs, fresh_this);
            }
            let code = script.code().clone();
            let captured_scope = script.captured_scope().clone();
            self.enter_call_frame(code, captured_scope, args_base_abs, argc, dest_register_abs, return_vpc)?;
            Ok(None)
        } else {
            let args = self.registers.slice(args_base_abs + 1, argc);
            let result =
                if is_construct { object.construct(&mut self.host, &args)? } else { object.call(&mut self.host, this, &args)? };
            Ok(Some(result))
        }
    }

    fn push_fresh_frame(&mut self, code: Rc<CodeBlock>, scope: ScopeChain, this: Value, args: &[Value]) {
        let this_abs = self.registers.len();
        let frame_band = code.frame_band_size();
        let num_params = code.num_parameters();
        let num_temps = code.num_temporaries();
        self.registers.ensure_capacity(this_abs + frame_band + num_temps);
        self.registers.set(this_abs, this);
        let param_base = this_abs + 1;
        for i in 0..num_params {
            let value = args.get(i as usize).cloned().unwrap_or(Value::Undefined);
            self.registers.set(param_base + i, value);
        }
        self.frames.push(FrameRecord {
            caller_code: self.code.clone(),
            caller_scope: self.scope.clone(),
            caller_r: self.r,
            return_vpc: self.vpc,
            dest_register: this_abs,
            original_args_base: param_base,
            original_args_count: args.len() as u32,
            caller_band_start: this_abs,
            activation: None,
        });
        self.code = code;
        self.scope = scope;
        self.r = this_abs + frame_band;
        self.vpc = 0;
    }

    /// Sets up an overlapping call frame per spec §4.2: exact arity
    /// aliases the caller's argv band directly; underflow/overflow copy
    /// into a fresh band above it, leaving the caller's original band in
    /// place for `original_args`.
    fn enter_call_frame(
        &mut self,
        code: Rc<CodeBlock>,
        captured_scope: ScopeChain,
        argv_base_abs: u32,
        argc: u32,
        dest_register_abs: u32,
        return_vpc: u32,
    ) -> Result<()> {
        if self.frames.len() as u32 >= self.config.max_call_depth {
            return Err(VmError::range("call stack size exceeded"));
        }
        let num_params = code.num_parameters();
        let frame_band = code.frame_band_size();
        let num_temps = code.num_temporaries();

        let this_abs;
        let original_args_base = argv_base_abs + 1;
        if argc == num_params {
            trace!("op_call: exact arity ({argc}), aliasing caller band at {argv_base_abs}");
            this_abs = argv_base_abs;
            self.registers.ensure_capacity(this_abs + frame_band + num_temps);
        } else {
            trace!("op_call: {} arity ({argc} vs {num_params} parameters), copying to a fresh band", if argc < num_params { "under" } else { "over" });
            let fresh_this_abs = self.registers.len();
            self.registers.ensure_capacity(fresh_this_abs + frame_band + num_temps);
            let this_value = self.registers.get(argv_base_abs);
            self.registers.set(fresh_this_abs, this_value);
            let param_base = fresh_this_abs + 1;
            let copied = argc.min(num_params);
            for i in 0..copied {
                let value = self.registers.get(original_args_base + i);
                self.registers.set(param_base + i, value);
            }
            this_abs = fresh_this_abs;
        }

        self.frames.push(FrameRecord {
            caller_code: self.code.clone(),
            caller_scope: self.scope.clone(),
            caller_r: self.r,
            return_vpc,
            dest_register: dest_register_abs,
            original_args_base,
            original_args_count: argc,
            caller_band_start: argv_base_abs,
            activation: None,
        });
        self.code = code;
        self.scope = captured_scope;
        self.r = this_abs + frame_band;
        self.vpc = 0;
        Ok(())
    }

    /// Drives the dispatch loop until the frame entered at `base_depth`
    /// (and everything it calls) has returned.
    fn run(&mut self, base_depth: usize) -> Result<Value> {
        loop {
            match self.step() {
                Ok(Some(value)) if self.frames.len() == base_depth => return Ok(value),
                Ok(_) => continue,
                Err(err) => {
                    // Unwind frame-by-frame (spec §7) until a `try`
                    // region covers the faulting instruction or the
                    // frame this `run` was entered with has itself been
                    // popped with nothing left to restore.
                    loop {
                        if self.try_resume_at_handler(&err) {
                            break;
                        }
                        let was_outermost = self.frames.len() == base_depth + 1;
                        self.pop_frame_on_error();
                        if was_outermost {
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// If the faulting instruction falls inside a `try` region of the
    /// currently active `CodeBlock`, redirects execution to its handler
    /// and returns `true`. Otherwise leaves everything untouched.
    fn try_resume_at_handler(&mut self, err: &VmError) -> bool {
        let Some(handler) = self.code.handler_for(self.vpc) else { return false };
        let handler_vpc = handler.handler_vpc;
        let catch_register = handler.catch_register;
        let message = Value::string(err.to_string());
        let abs = self.absolute_register(catch_register);
        self.registers.set(abs, message);
        self.vpc = handler_vpc;
        true
    }

    fn pop_frame_on_error(&mut self) {
        let popped = self.frames.pop().expect("pop_frame_on_error called with an empty frame stack");
        if let Some(activation) = &popped.activation {
            activation.detach();
        }
        self.registers.truncate(popped.caller_band_start);
        self.registers.set(popped.dest_register, Value::Undefined);
        self.code = popped.caller_code;
        self.scope = popped.caller_scope;
        self.r = popped.caller_r;
        self.vpc = popped.return_vpc;
    }

    /// The success-path mirror of [`Machine::pop_frame_on_error`]: same
    /// teardown, but the popped frame's `dest_register` gets the actual
    /// return value rather than `undefined`.
    pub(super) fn pop_frame_on_return(&mut self, value: Value) -> Value {
        let popped = self.frames.pop().expect("pop_frame_on_return called with an empty frame stack");
        if let Some(activation) = &popped.activation {
            activation.detach();
        }
        self.registers.truncate(popped.caller_band_start);
        self.registers.set(popped.dest_register, value.clone());
        self.code = popped.caller_code;
        self.scope = popped.caller_scope;
        self.r = popped.caller_r;
        self.vpc = popped.return_vpc;
        value
    }

    pub(super) fn absolute_register(&self, relative: i32) -> u32 {
        (self.r as i64 + relative as i64) as u32
    }

    /// Absolute index of the current frame's `this` slot.
    pub(super) fn this_slot_abs(&self) -> u32 {
        self.r - self.code.frame_band_size()
    }

    /// The current frame's original arguments, independent of whatever
    /// underflow/overflow copying happened to its parameter band (spec
    /// §S.3).
    pub fn current_original_args(&self) -> Vec<Value> {
        match self.frames.last() {
            Some(frame) => self.registers.slice(frame.original_args_base, frame.original_args_count),
            None => Vec::new(),
        }
    }

    pub fn this_value(&self) -> Value {
        self.registers.get(self.this_slot_abs())
    }

    /// Traces every live register as a GC root. The collector, supplied
    /// by the host, is responsible for recursing into whatever each
    /// value's object graph reaches (spec §5).
    pub fn mark(&mut self) {
        for i in 0..self.registers.len() {
            let value = self.registers.get(i);
            self.host.mark_root(&value);
        }
    }

    pub(super) fn materialize_activation(&mut self) -> Activation {
        let this_abs = self.this_slot_abs();
        let accessor = self.registers.accessor();
        let activation = Activation::live(self.code.clone(), this_abs, accessor);
        if let Some(frame) = self.frames.last_mut() {
            frame.activation = Some(activation.clone());
        }
        activation
    }
}

impl<H: Host> Executor for Machine<H> {
    fn execute(&mut self, code: Rc<CodeBlock>, scope: ScopeChain, this: Value) -> Result<Value> {
        self.call_script(code, scope, this, &[])
    }
}
