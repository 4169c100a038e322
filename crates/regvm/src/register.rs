//! `RegisterID`: the code generator's handle onto a single register slot
//! (spec §3.3), and the stack-discipline arena that allocates temporaries.
//!
//! Spec §9 ("Design Notes") is explicit that a systems-language port
//! should avoid general-purpose reference counting in the compiler and
//! instead track live handles as an index stack with a high watermark.
//! [`RegisterArena`] does exactly that: `Rc`/`Weak` give us "is anyone
//! still holding this index" for free, and the arena itself only ever
//! pops from the top, so there is no general graph of counted references
//! to reason about — just one stack.

use std::rc::{Rc, Weak};

/// A handle to a single register. Cloning shares the slot; dropping the
/// last clone makes the slot eligible for reclamation the next time
/// [`RegisterArena::new_temporary`] runs.
#[derive(Clone, Debug)]
pub struct RegisterID(Rc<i32>);

impl RegisterID {
    /// The register's index, relative to the frame base `r`: negative for
    /// parameters/locals, non-negative for temporaries (spec §3.2).
    pub fn index(&self) -> i32 {
        *self.0
    }

    fn new(index: i32) -> Self {
        RegisterID(Rc::new(index))
    }

    fn downgrade(&self) -> Weak<i32> {
        Rc::downgrade(&self.0)
    }
}

/// Allocates and reclaims the register layout for one function being
/// compiled: the negative-indexed parameter/local band and the
/// non-negative temporaries stack (spec §3.2, §4.1's register allocation
/// contract).
#[derive(Default)]
pub struct RegisterArena {
    /// Permanent handles for parameters and locals; held for the whole
    /// compilation so they are never considered for reclamation.
    named: Vec<RegisterID>,
    next_parameter: i32,
    next_local: i32,
    num_parameters: u32,
    num_locals: u32,

    /// Weak handles for currently-live temporaries, indexed by temporary
    /// index. The vector's length is the current high watermark; it only
    /// ever shrinks from the back, in [`RegisterArena::reclaim`].
    temporaries: Vec<Weak<i32>>,
    max_temporaries_seen: u32,
}

impl RegisterArena {
    /// `parameter_count` and `local_count` are only used to size the
    /// initial negative-index watermark (spec: "the register layout of a
    /// stack frame... `m_nextParameter` starts at `-(localCount +
    /// parameterCount)`"); they do not need to be exact upper bounds.
    pub fn new(parameter_count: u32, local_count: u32) -> Self {
        let start = -((parameter_count + local_count) as i32);
        RegisterArena {
            named: Vec::new(),
            next_parameter: start,
            next_local: -1,
            num_parameters: 0,
            num_locals: 0,
            temporaries: Vec::new(),
            max_temporaries_seen: 0,
        }
    }

    /// Assigns the next negative index in the parameter band. Parameters
    /// are never reclaimed.
    pub fn add_parameter(&mut self) -> RegisterID {
        let reg = RegisterID::new(self.next_parameter);
        self.next_parameter += 1;
        self.num_parameters += 1;
        self.named.push(reg.clone());
        reg
    }

    /// Assigns the next negative index in the locals band (used for both
    /// `var` declarations and hoisted function declarations). Locals are
    /// never reclaimed.
    pub fn add_local(&mut self) -> RegisterID {
        let reg = RegisterID::new(self.next_local);
        self.next_local -= 1;
        self.num_locals += 1;
        self.named.push(reg.clone());
        reg
    }

    /// Reclaims any suffix of dead temporaries, then allocates one fresh
    /// one at the next non-negative index. The caller must hold the
    /// returned handle for as long as the value must survive.
    pub fn new_temporary(&mut self) -> RegisterID {
        self.reclaim();
        let index = self.temporaries.len() as i32;
        let reg = RegisterID::new(index);
        self.temporaries.push(reg.downgrade());
        self.max_temporaries_seen = self.max_temporaries_seen.max(self.temporaries.len() as u32);
        reg
    }

    /// Allocates `count` temporaries in one contiguous, uninterrupted
    /// batch (spec §4.1 "Call lowering": return-info/this/argv must be
    /// contiguous for the frame-overlap trick to work). Returns handles in
    /// allocation order; the caller must hold all of them until every
    /// argument has been evaluated.
    pub fn new_temporary_batch(&mut self, count: usize) -> Vec<RegisterID> {
        (0..count).map(|_| self.new_temporary()).collect()
    }

    fn reclaim(&mut self) {
        while let Some(weak) = self.temporaries.last() {
            if weak.strong_count() == 0 {
                self.temporaries.pop();
            } else {
                break;
            }
        }
    }

    pub fn num_parameters(&self) -> u32 {
        self.num_parameters
    }

    pub fn num_locals(&self) -> u32 {
        self.num_locals
    }

    /// The `numTemporaries` watermark: the maximum number of temporaries
    /// concurrently live during emission (spec §8 invariant 1).
    pub fn num_temporaries(&self) -> u32 {
        self.max_temporaries_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_and_locals_get_consecutive_negative_indices() {
        let mut arena = RegisterArena::new(2, 1);
        let x = arena.add_parameter();
        let y = arena.add_parameter();
        let v = arena.add_local();
        assert_eq!(x.index(), -3);
        assert_eq!(y.index(), -2);
        assert_eq!(v.index(), -1);
    }

    #[test]
    fn temporaries_start_at_zero_and_grow_upward() {
        let mut arena = RegisterArena::new(0, 0);
        let t0 = arena.new_temporary();
        let t1 = arena.new_temporary();
        assert_eq!(t0.index(), 0);
        assert_eq!(t1.index(), 1);
        assert_eq!(arena.num_temporaries(), 2);
    }

    #[test]
    fn releasing_a_suffix_of_temporaries_lets_the_next_allocation_reuse_it() {
        let mut arena = RegisterArena::new(0, 0);
        let t0 = arena.new_temporary();
        let t1 = arena.new_temporary();
        drop(t1);
        let t2 = arena.new_temporary();
        assert_eq!(t2.index(), 1, "should reuse the freed top slot");
        assert_eq!(t0.index(), 0);
        // watermark still reflects the maximum ever seen, not the current count
        assert_eq!(arena.num_temporaries(), 2);
    }

    #[test]
    fn a_live_handle_blocks_reclamation_of_slots_above_it() {
        let mut arena = RegisterArena::new(0, 0);
        let t0 = arena.new_temporary();
        let _t1 = arena.new_temporary();
        drop(t0); // t0 is dead but is not at the top, so it cannot be reclaimed yet
        let t2 = arena.new_temporary();
        assert_eq!(t2.index(), 2);
    }

    #[test]
    fn contiguous_batch_allocation_preserves_order() {
        let mut arena = RegisterArena::new(0, 0);
        let batch = arena.new_temporary_batch(4);
        let indices: Vec<i32> = batch.iter().map(RegisterID::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
