//! The opcode table (spec §6.1) and the flat instruction stream a
//! [`crate::code_block::CodeBlock`] owns.
//!
//! Instructions are encoded the way the snapshot this system was
//! distilled from encodes them: a flat word stream, one opcode word
//! followed by a fixed number of signed operand words (register indices,
//! constant-pool indices, or branch offsets), rather than a typed AST of
//! instruction nodes. That keeps [`crate::label::LabelID`]'s backpatching
//! a plain word overwrite instead of a tree mutation, and keeps the
//! dispatch loop a tight `match` over a `&[Word]` slice.

use std::fmt;

pub type Word = i32;

/// One VM opcode. Operand counts are documented per variant; the
/// `CodeGenerator` is responsible for emitting exactly that many operand
/// words after the opcode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Opcode {
    /// No operation. Only used as a placeholder in tests.
    Nop,

    // -- register moves and constants (2 operands: dst, src/const) --
    Mov,
    LoadConst,

    // -- arithmetic and bitwise (3 operands: dst, lhs, rhs) --
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Lshift,
    Rshift,
    Urshift,

    // -- unary (2 operands: dst, src) --
    Negate,
    Not,
    BitNot,
    ToNumber,
    Typeof,

    // -- comparison (3 operands: dst, lhs, rhs) --
    Less,
    LessEq,
    Eq,
    NotEq,
    StrictEq,
    NotStrictEq,
    InstanceOf,
    In,

    // -- property access (3 operands: dst, base, id/key) --
    GetById,
    PutById,
    GetByVal,
    PutByVal,

    // -- scoped variable / name resolution (2 operands: dst, id) --
    Resolve,
    ResolveBase,
    GetScopedVar,
    /// 2 operands: id, src.
    PutScopedVar,

    // -- scope chain (0 operands, except PushScope: 1 operand = register) --
    PushScope,
    PopScope,
    /// 1 operand: register holding the activation object to push.
    PushNewScope,

    // -- for-in enumeration (spec §4.2 Iteration) --
    /// 2 operands: register to receive the enumerator, register holding the
    /// object to enumerate.
    GetPnames,
    /// 3 operands: destination register, enumerator register, branch offset
    /// taken once the enumerator is exhausted.
    NextPname,

    // -- object/array/function construction --
    /// 2 operands: dst, unused (reserved for an object-literal shape index).
    NewObject,
    /// 3 operands: dst, first element register, element count.
    NewArray,
    /// 2 operands: dst, nested-function pool index.
    NewFunc,
    /// 2 operands: dst, nested-function-expression pool index.
    NewFuncExp,

    // -- control flow --
    /// 1 operand: branch offset.
    Jmp,
    /// 2 operands: condition register, branch offset.
    Jtrue,
    Jfalse,
    /// 2 operands: register, branch offset.
    JeqNull,
    JneqNull,
    /// 2 operands: scope-chain entries to pop, branch offset. Used instead
    /// of a plain `Jmp` when a `break`/`continue` escapes one or more
    /// `with` bodies, so the scope chain doesn't retain stale entries past
    /// the jump (spec §4.1/§4.2).
    JmpScopes,

    // -- calls (4 operands: dst, callee, argv_base, argc; argv_base
    // points at the `this` slot, with arguments immediately above it) --
    Call,
    CallEval,
    Construct,

    // -- frame lifecycle --
    /// 1 operand: register to return.
    Ret,
    /// 0 operands. Only ever the final instruction of a top-level program.
    End,
    /// 1 operand: 1 if the callee materializes an Activation eagerly.
    Enter,
    /// 1 operand: destination register for the arguments pseudo-array.
    CreateArguments,
    /// 1 operand: destination register for the coerced `this`.
    ConvertThis,

    // -- exceptions --
    /// 1 operand: register holding the value to throw. The core has no
    /// exception objects yet (non-goal); the thrown value is stringified
    /// into the sticky `VmError::Type` slot. A handler is resumed by
    /// consulting the owning `CodeBlock`'s exception table, not by a
    /// dedicated opcode.
    Throw,

    // -- debugging --
    /// 1 operand: opaque debug-hook id, forwarded to the host.
    DebugHook,
}

impl Opcode {
    pub fn as_word(self) -> Word {
        self as i32
    }

    pub fn from_word(word: Word) -> Opcode {
        const TABLE: &[Opcode] = &[
            Opcode::Nop,
            Opcode::Mov,
            Opcode::LoadConst,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Mod,
            Opcode::BitAnd,
            Opcode::BitOr,
            Opcode::BitXor,
            Opcode::Lshift,
            Opcode::Rshift,
            Opcode::Urshift,
            Opcode::Negate,
            Opcode::Not,
            Opcode::BitNot,
            Opcode::ToNumber,
            Opcode::Typeof,
            Opcode::Less,
            Opcode::LessEq,
            Opcode::Eq,
            Opcode::NotEq,
            Opcode::StrictEq,
            Opcode::NotStrictEq,
            Opcode::InstanceOf,
            Opcode::In,
            Opcode::GetById,
            Opcode::PutById,
            Opcode::GetByVal,
            Opcode::PutByVal,
            Opcode::Resolve,
            Opcode::ResolveBase,
            Opcode::GetScopedVar,
            Opcode::PutScopedVar,
            Opcode::PushScope,
            Opcode::PopScope,
            Opcode::PushNewScope,
            Opcode::GetPnames,
            Opcode::NextPname,
            Opcode::NewObject,
            Opcode::NewArray,
            Opcode::NewFunc,
            Opcode::NewFuncExp,
            Opcode::Jmp,
            Opcode::Jtrue,
            Opcode::Jfalse,
            Opcode::JeqNull,
            Opcode::JneqNull,
            Opcode::JmpScopes,
            Opcode::Call,
            Opcode::CallEval,
            Opcode::Construct,
            Opcode::Ret,
            Opcode::End,
            Opcode::Enter,
            Opcode::CreateArguments,
            Opcode::ConvertThis,
            Opcode::Throw,
            Opcode::DebugHook,
        ];
        TABLE[word as usize]
    }
}

impl From<Opcode> for Word {
    fn from(op: Opcode) -> Word {
        op.as_word()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The flat, append-only word stream a `CodeBlock` executes. Offsets into
/// it (both opcode positions and individual operand-word positions) are
/// plain `u32`s, which is what lets [`crate::label::LabelID`] patch a
/// forward branch by just overwriting one word.
#[derive(Debug, Default, Clone)]
pub struct InstructionStream {
    words: Vec<Word>,
}

impl InstructionStream {
    pub fn new() -> Self {
        InstructionStream::default()
    }

    pub fn len(&self) -> u32 {
        self.words.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Appends `op` followed by `operands`. Returns the offset of the
    /// *first* operand word, which callers use as the patch target for
    /// single-operand branch instructions.
    pub fn emit(&mut self, op: Opcode, operands: &[Word]) -> u32 {
        self.words.push(op.as_word());
        let first_operand_offset = self.words.len() as u32;
        self.words.extend_from_slice(operands);
        first_operand_offset
    }

    pub fn opcode_at(&self, offset: u32) -> Opcode {
        Opcode::from_word(self.words[offset as usize])
    }

    pub fn word_at(&self, offset: u32) -> Word {
        self.words[offset as usize]
    }

    pub fn operands_at(&self, offset: u32, count: usize) -> &[Word] {
        let start = offset as usize;
        &self.words[start..start + count]
    }

    pub fn patch_branch_offset(&mut self, operand_offset: u32, target: u32) {
        self.words[operand_offset as usize] = target as Word;
    }

    pub fn branch_target(&self, operand_offset: u32) -> u32 {
        self.words[operand_offset as usize] as u32
    }

    pub fn as_words(&self) -> &[Word] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_word_roundtrips() {
        for op in [
            Opcode::Nop,
            Opcode::Add,
            Opcode::Call,
            Opcode::Ret,
            Opcode::End,
            Opcode::DebugHook,
        ] {
            assert_eq!(Opcode::from_word(op.as_word()), op);
        }
    }

    #[test]
    fn emit_lays_out_opcode_then_operands() {
        let mut stream = InstructionStream::new();
        let offset = stream.emit(Opcode::Add, &[2, 0, 1]);
        assert_eq!(stream.opcode_at(0), Opcode::Add);
        assert_eq!(stream.operands_at(offset, 3), &[2, 0, 1]);
        assert_eq!(stream.len(), 4);
    }
}
