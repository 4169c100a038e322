//! Small constant-pool helpers shared by `expressions` and `statements`.

use crate::opcode::{Opcode, Word};
use crate::register::RegisterID;
use crate::value::Value;

use super::state::Generator;

pub(super) fn load_constant(gen: &mut Generator, dst: &RegisterID, value: Value) {
    let idx = gen.constant_index(value);
    gen.emit(Opcode::LoadConst, &[dst.index(), idx as Word]);
}

pub(super) fn load_undefined(gen: &mut Generator, dst: &RegisterID) {
    load_constant(gen, dst, Value::Undefined);
}
