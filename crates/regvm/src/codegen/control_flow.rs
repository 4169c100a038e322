//! Loop/labeled-statement bookkeeping for `break`/`continue` lowering: a
//! stack of active loop contexts so a bare `break`/`continue` targets the
//! innermost one and a labeled one can reach out to a named enclosing
//! loop (spec §4.1's control-flow lowering).

use std::rc::Rc;

use crate::label::LabelID;

pub(super) struct LoopContext {
    label: Option<Rc<str>>,
    pub(super) break_label: LabelID,
    pub(super) continue_label: LabelID,
    /// `true` for a plain labeled statement with no loop of its own
    /// (`foo: { ... }`); `continue foo` is invalid in that case even
    /// though `break foo` is not, so `ControlFlowStack::find_continue`
    /// skips these when searching by name.
    pub(super) is_label_only: bool,
    /// `Generator::scope_depth` at the point this context was pushed. A
    /// `break`/`continue` targeting this context later computes the
    /// current depth minus this value to know how many `with` scopes its
    /// jump needs to pop.
    pub(super) scope_depth_at_entry: u32,
}

#[derive(Default)]
pub(super) struct ControlFlowStack {
    loops: Vec<LoopContext>,
}

impl ControlFlowStack {
    pub(super) fn push(&mut self, label: Option<Rc<str>>, scope_depth_at_entry: u32) {
        self.loops.push(LoopContext {
            label,
            break_label: LabelID::new(),
            continue_label: LabelID::new(),
            is_label_only: false,
            scope_depth_at_entry,
        });
    }

    pub(super) fn push_label_only(&mut self, label: Rc<str>, scope_depth_at_entry: u32) {
        self.loops.push(LoopContext {
            label: Some(label),
            break_label: LabelID::new(),
            continue_label: LabelID::new(),
            is_label_only: true,
            scope_depth_at_entry,
        });
    }

    pub(super) fn pop(&mut self) -> LoopContext {
        self.loops.pop().expect("ControlFlowStack::pop called without a matching push")
    }

    pub(super) fn current(&mut self) -> &mut LoopContext {
        self.loops.last_mut().expect("no enclosing loop")
    }

    pub(super) fn find_break(&mut self, label: Option<&Rc<str>>) -> Option<(&mut LabelID, u32)> {
        self.find(label, false).map(|ctx| (&mut ctx.break_label, ctx.scope_depth_at_entry))
    }

    pub(super) fn find_continue(&mut self, label: Option<&Rc<str>>) -> Option<(&mut LabelID, u32)> {
        self.find(label, true).map(|ctx| (&mut ctx.continue_label, ctx.scope_depth_at_entry))
    }

    fn find(&mut self, label: Option<&Rc<str>>, for_continue: bool) -> Option<&mut LoopContext> {
        match label {
            Some(name) => self
                .loops
                .iter_mut()
                .rev()
                .find(|ctx| ctx.label.as_deref() == Some(name.as_ref()) && !(for_continue && ctx.is_label_only)),
            // A bare `break`/`continue` never targets a plain labeled
            // statement, only an enclosing loop.
            None => self.loops.iter_mut().rev().find(|ctx| !ctx.is_label_only),
        }
    }
}
