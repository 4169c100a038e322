//! Bookkeeping threaded through one function body's code generation:
//! register allocation, the instruction stream being built, the
//! constant/identifier pools, and the name-to-register map used to tell
//! a local reference from a free variable that must be resolved through
//! the scope chain at runtime (spec §4.1).

use std::collections::HashMap;
use std::rc::Rc;

use crate::code_block::{CodeBlock, ExceptionHandler, SymbolTable};
use crate::label::LabelID;
use crate::opcode::{InstructionStream, Opcode, Word};
use crate::register::{RegisterArena, RegisterID};
use crate::value::Value;

use super::control_flow::ControlFlowStack;

pub(super) struct Generator {
    pub(super) arena: RegisterArena,
    stream: InstructionStream,
    identifiers: Vec<Rc<str>>,
    constants: Vec<Value>,
    pub(super) functions: Vec<Rc<CodeBlock>>,
    pub(super) function_expressions: Vec<Rc<CodeBlock>>,
    /// Registers bound to a name in *this* function's own band —
    /// parameters, `var` declarations, and hoisted function
    /// declarations. Anything not in here is resolved dynamically
    /// through the scope chain (spec §4.2's `resolve`/`resolve_base`).
    pub(super) locals: HashMap<Rc<str>, RegisterID>,
    pub(super) local_names: SymbolTable,
    pub(super) cf: ControlFlowStack,
    /// Count of `with` scopes currently pushed on the scope chain at the
    /// point code being generated right now will execute. Bumped/dropped
    /// around a `with` body; snapshotted into `LoopContext` on loop entry
    /// so a later `break`/`continue` can tell how many scopes its jump
    /// needs to pop (spec §4.1).
    pub(super) scope_depth: u32,
    current_line: u32,
    line_table: Vec<(u32, u32)>,
    pub(super) exception_table: Vec<ExceptionHandler>,
}

impl Generator {
    pub(super) fn new(parameter_count: u32, local_count: u32) -> Self {
        Generator {
            arena: RegisterArena::new(parameter_count, local_count),
            stream: InstructionStream::new(),
            identifiers: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            function_expressions: Vec::new(),
            locals: HashMap::new(),
            local_names: SymbolTable::default(),
            cf: ControlFlowStack::default(),
            scope_depth: 0,
            current_line: 0,
            line_table: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    pub(super) fn emit(&mut self, op: Opcode, operands: &[Word]) -> u32 {
        let offset = self.stream.len();
        if self.line_table.last().map(|(_, l)| *l) != Some(self.current_line) {
            self.line_table.push((offset, self.current_line));
        }
        self.stream.emit(op, operands)
    }

    pub(super) fn here(&self) -> u32 {
        self.stream.len()
    }

    pub(super) fn bind_label(&mut self, label: &mut LabelID) {
        label.bind(&mut self.stream);
    }

    pub(super) fn reference_label(&mut self, label: &mut LabelID, operand_offset: u32) {
        label.reference(&mut self.stream, operand_offset);
    }

    /// Splits the borrow so a caller can look up a [`LabelID`] inside
    /// `self.cf` (e.g. via `ControlFlowStack::current`) and immediately
    /// bind/reference it against `self.stream`, without the whole-`self`
    /// borrow that calling back through `emit`/`bind_label` would require.
    pub(super) fn cf_and_stream(&mut self) -> (&mut ControlFlowStack, &mut InstructionStream) {
        (&mut self.cf, &mut self.stream)
    }

    pub(super) fn identifier_index(&mut self, name: &Rc<str>) -> u32 {
        if let Some(pos) = self.identifiers.iter().position(|existing| existing == name) {
            return pos as u32;
        }
        self.identifiers.push(name.clone());
        (self.identifiers.len() - 1) as u32
    }

    pub(super) fn constant_index(&mut self, value: Value) -> u32 {
        if let Some(pos) = self.constants.iter().position(|existing| values_equal(existing, &value)) {
            return pos as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub(super) fn declare_local(&mut self, name: Rc<str>, register: RegisterID) {
        self.local_names.insert(name.clone(), register.index());
        self.locals.insert(name, register);
    }

    pub(super) fn into_code_block(
        self,
        needs_activation: bool,
        uses_eval: bool,
        needs_closure: bool,
        source_url: Option<String>,
    ) -> CodeBlock {
        CodeBlock::new(
            self.stream,
            self.identifiers,
            self.constants,
            self.functions,
            self.function_expressions,
            self.arena.num_parameters(),
            self.arena.num_locals(),
            self.arena.num_temporaries(),
            needs_activation,
            uses_eval,
            needs_closure,
            self.local_names,
            source_url,
            self.line_table,
        )
        .with_exception_table(self.exception_table)
    }
}

/// Literal equality for constant-pool deduplication. `Value::Object`
/// never dedups (object identity matters), which is also why `NaN`
/// intentionally dedups with itself here even though `NaN != NaN` at
/// runtime — this is pool *identity*, not `===`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits(),
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}
