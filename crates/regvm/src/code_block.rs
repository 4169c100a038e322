//! `CodeBlock`: the compiled artifact of one function or program body
//! (spec §3.6) — the instruction stream, its constant pools, and the
//! register-layout metadata the `Machine` needs to set up a call frame.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::SourceLocation;
use crate::opcode::InstructionStream;
use crate::value::Value;

/// A named register in the parameter/local band, resolved by
/// [`crate::activation::Activation`] without walking the identifier pool
/// linearly (spec §S.3 of the expanded requirements).
pub type SymbolTable = FxHashMap<Rc<str>, i32>;

/// One `try`/`catch` region: if the instruction that faults lies in
/// `[try_start, try_end)`, unwinding stops in this frame instead of
/// propagating to the caller. `catch_register` is relative to this
/// block's own `r` (spec's `this`-slot convention, §S.3).
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
    pub try_start: u32,
    pub try_end: u32,
    pub handler_vpc: u32,
    pub catch_register: i32,
}

/// The compiled form of one function body or top-level program.
#[derive(Debug)]
pub struct CodeBlock {
    instructions: InstructionStream,

    /// Name constants referenced by `resolve`/`get_by_id`/`put_by_id` and
    /// friends.
    identifiers: Vec<Rc<str>>,
    /// Literal constants (numbers, strings, booleans) referenced by
    /// `load_const`.
    constants: Vec<Value>,
    /// Bodies of function *declarations* nested directly in this one,
    /// hoisted and instantiated at activation-enter time.
    functions: Vec<Rc<CodeBlock>>,
    /// Bodies of function *expressions* nested in this one, instantiated
    /// at the point their `NewFuncExp` executes.
    function_expressions: Vec<Rc<CodeBlock>>,

    num_parameters: u32,
    num_vars: u32,
    num_temporaries: u32,

    /// Set when any nested function has `usesEval` or `needsClosure`
    /// (spec §4.3): forces eager `Activation` materialization on entry
    /// instead of the lazy default.
    needs_activation: bool,
    /// This body itself calls `eval`.
    uses_eval: bool,
    /// Some nested function closes over one of this body's registers.
    needs_closure: bool,

    local_names: SymbolTable,

    source_url: Option<String>,
    /// Parallel to `local_names`: maps an instruction offset to the
    /// source line it was generated from, for `VmError` location
    /// reporting (spec §7).
    line_table: Vec<(u32, u32)>,

    exception_table: Vec<ExceptionHandler>,
}

impl CodeBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instructions: InstructionStream,
        identifiers: Vec<Rc<str>>,
        constants: Vec<Value>,
        functions: Vec<Rc<CodeBlock>>,
        function_expressions: Vec<Rc<CodeBlock>>,
        num_parameters: u32,
        num_vars: u32,
        num_temporaries: u32,
        needs_activation: bool,
        uses_eval: bool,
        needs_closure: bool,
        local_names: SymbolTable,
        source_url: Option<String>,
        line_table: Vec<(u32, u32)>,
    ) -> Self {
        CodeBlock {
            instructions,
            identifiers,
            constants,
            functions,
            function_expressions,
            num_parameters,
            num_vars,
            num_temporaries,
            needs_activation,
            uses_eval,
            needs_closure,
            local_names,
            source_url,
            line_table,
            exception_table: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_exception_table(mut self, exception_table: Vec<ExceptionHandler>) -> Self {
        self.exception_table = exception_table;
        self
    }

    /// The innermost handler covering `faulting_vpc`, if any. Handlers are
    /// assumed to be emitted innermost-last (codegen emits a `try`'s
    /// handler after the handlers of anything nested inside it), so the
    /// last structural match wins.
    pub fn handler_for(&self, faulting_vpc: u32) -> Option<&ExceptionHandler> {
        self.exception_table.iter().rev().find(|h| faulting_vpc >= h.try_start && faulting_vpc < h.try_end)
    }

    pub fn instructions(&self) -> &InstructionStream {
        &self.instructions
    }

    pub fn identifier(&self, index: u32) -> &Rc<str> {
        &self.identifiers[index as usize]
    }

    pub fn constant(&self, index: u32) -> &Value {
        &self.constants[index as usize]
    }

    pub fn function(&self, index: u32) -> &Rc<CodeBlock> {
        &self.functions[index as usize]
    }

    pub fn function_expression(&self, index: u32) -> &Rc<CodeBlock> {
        &self.function_expressions[index as usize]
    }

    pub fn num_functions(&self) -> u32 {
        self.functions.len() as u32
    }

    pub fn num_parameters(&self) -> u32 {
        self.num_parameters
    }

    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub fn num_temporaries(&self) -> u32 {
        self.num_temporaries
    }

    /// Size of the register band this CodeBlock needs below `r`: `this`
    /// plus parameters plus vars (spec's resolution of the `this`-slot
    /// question, §S.3).
    pub fn frame_band_size(&self) -> u32 {
        1 + self.num_parameters + self.num_vars
    }

    pub fn needs_activation(&self) -> bool {
        self.needs_activation
    }

    pub fn uses_eval(&self) -> bool {
        self.uses_eval
    }

    pub fn needs_closure(&self) -> bool {
        self.needs_closure
    }

    /// Looks up a named parameter or var's register index, the way an
    /// `Activation` resolves property access without scanning
    /// `identifiers` (spec §S.3).
    pub fn register_for_local(&self, name: &str) -> Option<i32> {
        self.local_names.get(name).copied()
    }

    pub fn local_names(&self) -> &SymbolTable {
        &self.local_names
    }

    pub fn source_location_for(&self, instruction_offset: u32) -> SourceLocation {
        let line = self
            .line_table
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= instruction_offset)
            .map(|(_, line)| *line)
            .unwrap_or(0);
        SourceLocation { url: self.source_url.clone(), line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn empty_block() -> CodeBlock {
        let mut instructions = InstructionStream::new();
        instructions.emit(Opcode::End, &[]);
        CodeBlock::new(
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
            SymbolTable::default(),
            None,
            vec![(0, 1)],
        )
    }

    #[test]
    fn frame_band_size_includes_this() {
        let mut instructions = InstructionStream::new();
        instructions.emit(Opcode::End, &[]);
        let block = CodeBlock::new(
            instructions,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            2,
            1,
            3,
            false,
            false,
            false,
            SymbolTable::default(),
            None,
            Vec::new(),
        );
        assert_eq!(block.frame_band_size(), 1 + 2 + 1);
    }

    #[test]
    fn source_location_uses_the_last_line_at_or_before_the_offset() {
        let block = empty_block();
        let loc = block.source_location_for(0);
        assert_eq!(loc.line, 1);
    }

    #[test]
    fn register_for_local_looks_up_the_symbol_table() {
        let mut instructions = InstructionStream::new();
        instructions.emit(Opcode::End, &[]);
        let mut locals = SymbolTable::default();
        locals.insert(Rc::from("x"), -1);
        let block = CodeBlock::new(
            instructions,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            0,
            1,
            0,
            false,
            false,
            false,
            locals,
            None,
            Vec::new(),
        );
        assert_eq!(block.register_for_local("x"), Some(-1));
        assert_eq!(block.register_for_local("y"), None);
    }
}
