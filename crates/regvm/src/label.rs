//! `LabelID`: a forward- or backward-jump target with a backpatch list
//! (spec §3.4). A label is bound exactly once; jumps emitted before it is
//! bound record the bytecode offset of their operand and get patched in
//! when the label finally binds.

use crate::opcode::InstructionStream;

/// A jump target. Backward jumps (the label is already bound) resolve
/// immediately; forward jumps record themselves on the label and are
/// patched when [`LabelID::bind`] runs.
#[derive(Debug, Default)]
pub struct LabelID {
    /// `Some(offset)` once the label has been placed in the instruction
    /// stream; `None` while it is still only a forward-reference target.
    location: Option<u32>,
    /// Offsets of jump-operand words awaiting this label's final address.
    backpatches: Vec<u32>,
}

impl LabelID {
    pub fn new() -> Self {
        LabelID::default()
    }

    pub fn is_bound(&self) -> bool {
        self.location.is_some()
    }

    /// The offset this label is bound to. Panics if called before
    /// [`LabelID::bind`] — callers that need a backward jump to an
    /// already-bound label use this instead of re-deriving the offset.
    pub fn target(&self) -> u32 {
        self.location.expect("LabelID::target called before the label was bound")
    }

    /// Binds this label to `stream`'s current end, then immediately
    /// patches every jump operand that was recorded while it was still
    /// unresolved. Must only be called once per label (spec §3.4
    /// "resolved exactly once").
    pub fn bind(&mut self, stream: &mut InstructionStream) {
        debug_assert!(!self.is_bound(), "label bound twice");
        let here = stream.len();
        self.location = Some(here);
        for offset in self.backpatches.drain(..) {
            stream.patch_branch_offset(offset, here);
        }
    }

    /// Records or resolves a reference to this label from a jump
    /// instruction whose branch operand lives at `operand_offset`. If the
    /// label is already bound the offset is written immediately (a
    /// backward jump); otherwise it is queued for [`LabelID::bind`].
    pub fn reference(&mut self, stream: &mut InstructionStream, operand_offset: u32) {
        match self.location {
            Some(target) => stream.patch_branch_offset(operand_offset, target),
            None => self.backpatches.push(operand_offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{InstructionStream, Opcode};

    #[test]
    fn backward_jump_resolves_immediately() {
        let mut stream = InstructionStream::new();
        let mut label = LabelID::new();
        stream.emit(Opcode::Nop, &[]);
        label.bind(&mut stream);
        let operand_offset = stream.emit(Opcode::Jmp, &[0]);
        label.reference(&mut stream, operand_offset);
        assert_eq!(stream.branch_target(operand_offset), 1);
    }

    #[test]
    fn forward_jump_is_patched_on_bind() {
        let mut stream = InstructionStream::new();
        let mut label = LabelID::new();
        let operand_offset = stream.emit(Opcode::Jmp, &[0]);
        label.reference(&mut stream, operand_offset);
        stream.emit(Opcode::Nop, &[]);
        label.bind(&mut stream);
        assert_eq!(stream.branch_target(operand_offset), stream.len());
    }

    #[test]
    fn multiple_forward_jumps_to_the_same_label_all_patch() {
        let mut stream = InstructionStream::new();
        let mut label = LabelID::new();
        let j1 = stream.emit(Opcode::Jmp, &[0]);
        let j2 = stream.emit(Opcode::Jmp, &[0]);
        label.reference(&mut stream, j1);
        label.reference(&mut stream, j2);
        label.bind(&mut stream);
        assert_eq!(stream.branch_target(j1), stream.len());
        assert_eq!(stream.branch_target(j2), stream.len());
    }
}
