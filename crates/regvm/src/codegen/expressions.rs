//! Lowers [`crate::ast::Expr`] into bytecode that leaves its value in a
//! caller-supplied destination register (spec §4.1).

use crate::ast::{AssignTarget, BinaryOp, Expr, LogicalOp, MemberKey, UnaryOp, UpdateOp};
use crate::error::Result;
use crate::label::LabelID;
use crate::opcode::{Opcode, Word};
use crate::register::RegisterID;
use crate::value::Value;

use super::constants::{load_constant, load_undefined};
use super::state::Generator;

pub(super) fn gen_expr(gen: &mut Generator, expr: &Expr, dst: &RegisterID) -> Result<()> {
    match expr {
        Expr::Undefined => load_undefined(gen, dst),
        Expr::Null => load_constant(gen, dst, Value::Null),
        Expr::Boolean(b) => load_constant(gen, dst, Value::Boolean(*b)),
        Expr::Number(n) => load_constant(gen, dst, Value::number(*n)),
        Expr::String(s) => load_constant(gen, dst, Value::string(s.clone())),
        Expr::This => {
            gen.emit(Opcode::Mov, &[dst.index(), this_slot_index(gen)]);
        }
        Expr::Ident(name) => gen_read_ident(gen, name, dst),
        Expr::Binary(op, lhs, rhs) => gen_binary(gen, *op, lhs, rhs, dst)?,
        Expr::Logical(op, lhs, rhs) => gen_logical(gen, *op, lhs, rhs, dst)?,
        Expr::Unary(op, operand) => gen_unary(gen, *op, operand, dst)?,
        Expr::Assign(target, value) => gen_assign(gen, target, value, dst)?,
        Expr::Update { op, prefix, target } => gen_update(gen, *op, *prefix, target, dst)?,
        Expr::Conditional(test, cons, alt) => gen_conditional(gen, test, cons, alt, dst)?,
        Expr::Call { callee, args } => gen_call(gen, callee, args, dst, false)?,
        Expr::New { callee, args } => gen_call(gen, callee, args, dst, true)?,
        Expr::Member { object, key } => gen_member_get(gen, object, key, dst)?,
        Expr::FunctionExpr(node) => gen_function_expr(gen, node, dst)?,
        Expr::Object(props) => gen_object_literal(gen, props, dst)?,
        Expr::Array(items) => gen_array_literal(gen, items, dst)?,
    }
    Ok(())
}

/// The register index of the current function's `this` slot, from the
/// generated code's own point of view: one past the end of its
/// negative-indexed parameter/local band.
fn this_slot_index(gen: &Generator) -> Word {
    -(1 + gen.arena.num_parameters() as Word + gen.arena.num_locals() as Word)
}

fn gen_read_ident(gen: &mut Generator, name: &std::rc::Rc<str>, dst: &RegisterID) {
    if let Some(local) = gen.locals.get(name).cloned() {
        gen.emit(Opcode::Mov, &[dst.index(), local.index()]);
    } else {
        let id = gen.identifier_index(name);
        gen.emit(Opcode::Resolve, &[dst.index(), id as Word]);
    }
}

fn gen_binary(gen: &mut Generator, op: BinaryOp, lhs: &Expr, rhs: &Expr, dst: &RegisterID) -> Result<()> {
    let a = gen.arena.new_temporary();
    gen_expr(gen, lhs, &a)?;
    let b = gen.arena.new_temporary();
    gen_expr(gen, rhs, &b)?;
    // `a > b` and `a >= b` have no dedicated opcode; the VM only compares
    // "less than" both ways, so they lower as the swapped-operand form.
    let (opcode, lhs_reg, rhs_reg) = match op {
        BinaryOp::Add => (Opcode::Add, &a, &b),
        BinaryOp::Sub => (Opcode::Sub, &a, &b),
        BinaryOp::Mul => (Opcode::Mul, &a, &b),
        BinaryOp::Div => (Opcode::Div, &a, &b),
        BinaryOp::Mod => (Opcode::Mod, &a, &b),
        BinaryOp::BitAnd => (Opcode::BitAnd, &a, &b),
        BinaryOp::BitOr => (Opcode::BitOr, &a, &b),
        BinaryOp::BitXor => (Opcode::BitXor, &a, &b),
        BinaryOp::Lshift => (Opcode::Lshift, &a, &b),
        BinaryOp::Rshift => (Opcode::Rshift, &a, &b),
        BinaryOp::Urshift => (Opcode::Urshift, &a, &b),
        BinaryOp::Less => (Opcode::Less, &a, &b),
        BinaryOp::LessEq => (Opcode::LessEq, &a, &b),
        BinaryOp::Greater => (Opcode::Less, &b, &a),
        BinaryOp::GreaterEq => (Opcode::LessEq, &b, &a),
        BinaryOp::Eq => (Opcode::Eq, &a, &b),
        BinaryOp::NotEq => (Opcode::NotEq, &a, &b),
        BinaryOp::StrictEq => (Opcode::StrictEq, &a, &b),
        BinaryOp::NotStrictEq => (Opcode::NotStrictEq, &a, &b),
        BinaryOp::InstanceOf => (Opcode::InstanceOf, &a, &b),
        BinaryOp::In => (Opcode::In, &a, &b),
    };
    gen.emit(opcode, &[dst.index(), lhs_reg.index(), rhs_reg.index()]);
    Ok(())
}

fn gen_logical(gen: &mut Generator, op: LogicalOp, lhs: &Expr, rhs: &Expr, dst: &RegisterID) -> Result<()> {
    gen_expr(gen, lhs, dst)?;
    let branch = match op {
        LogicalOp::And => Opcode::Jfalse,
        LogicalOp::Or => Opcode::Jtrue,
    };
    let first = gen.emit(branch, &[dst.index(), 0]);
    let mut end = LabelID::new();
    gen.reference_label(&mut end, first + 1);
    gen_expr(gen, rhs, dst)?;
    gen.bind_label(&mut end);
    Ok(())
}

fn gen_unary(gen: &mut Generator, op: UnaryOp, operand: &Expr, dst: &RegisterID) -> Result<()> {
    if op == UnaryOp::Void {
        let t = gen.arena.new_temporary();
        gen_expr(gen, operand, &t)?;
        load_undefined(gen, dst);
        return Ok(());
    }
    let src = gen.arena.new_temporary();
    gen_expr(gen, operand, &src)?;
    let opcode = match op {
        UnaryOp::Negate => Opcode::Negate,
        UnaryOp::Not => Opcode::Not,
        UnaryOp::BitNot => Opcode::BitNot,
        UnaryOp::Typeof => Opcode::Typeof,
        UnaryOp::Void => unreachable!("handled above"),
    };
    gen.emit(opcode, &[dst.index(), src.index()]);
    Ok(())
}

fn gen_assign(gen: &mut Generator, target: &AssignTarget, value: &Expr, dst: &RegisterID) -> Result<()> {
    match target {
        AssignTarget::Ident(name) => {
            if let Some(local) = gen.locals.get(name).cloned() {
                gen_expr(gen, value, &local)?;
                gen.emit(Opcode::Mov, &[dst.index(), local.index()]);
            } else {
                gen_expr(gen, value, dst)?;
                let id = gen.identifier_index(name);
                // `PutScopedVar` resolves its own base by walking the
                // scope chain at runtime (spec §4.2); no separate
                // `ResolveBase` is needed here.
                gen.emit(Opcode::PutScopedVar, &[id as Word, dst.index()]);
            }
        }
        AssignTarget::Member { object, key } => {
            let obj = gen.arena.new_temporary();
            gen_expr(gen, object, &obj)?;
            gen_expr(gen, value, dst)?;
            match key {
                MemberKey::Static(name) => {
                    let id = gen.identifier_index(name);
                    gen.emit(Opcode::PutById, &[obj.index(), id as Word, dst.index()]);
                }
                MemberKey::Computed(key_expr) => {
                    let key_reg = gen.arena.new_temporary();
                    gen_expr(gen, key_expr, &key_reg)?;
                    gen.emit(Opcode::PutByVal, &[obj.index(), key_reg.index(), dst.index()]);
                }
            }
        }
    }
    Ok(())
}

/// `++`/`--`, prefix or postfix (spec §6.1 `pre_inc`/`post_inc`). No
/// dedicated opcode: the old value is read, coerced with `ToNumber`, and
/// the new value written back through the same `Resolve`/`PutScopedVar` or
/// `GetById`/`PutById` pair an ordinary read-then-assign would use: the
/// fixed-operand `add`/`sub` the VM already has is enough, matching spec
/// §9's stance that only overlapping call frames and lazy activation
/// justify a dedicated mechanism.
fn gen_update(gen: &mut Generator, op: UpdateOp, prefix: bool, target: &AssignTarget, dst: &RegisterID) -> Result<()> {
    let delta_value = match op {
        UpdateOp::Increment => Value::number(1.0),
        UpdateOp::Decrement => Value::number(-1.0),
    };
    match target {
        AssignTarget::Ident(name) => {
            let old = gen.arena.new_temporary();
            let new = gen.arena.new_temporary();
            if let Some(local) = gen.locals.get(name).cloned() {
                gen.emit(Opcode::ToNumber, &[old.index(), local.index()]);
                let delta = gen.arena.new_temporary();
                load_constant(gen, &delta, delta_value);
                gen.emit(Opcode::Add, &[new.index(), old.index(), delta.index()]);
                gen.emit(Opcode::Mov, &[local.index(), new.index()]);
            } else {
                let id = gen.identifier_index(name);
                gen.emit(Opcode::Resolve, &[old.index(), id as Word]);
                gen.emit(Opcode::ToNumber, &[old.index(), old.index()]);
                let delta = gen.arena.new_temporary();
                load_constant(gen, &delta, delta_value);
                gen.emit(Opcode::Add, &[new.index(), old.index(), delta.index()]);
                gen.emit(Opcode::PutScopedVar, &[id as Word, new.index()]);
            }
            let result = if prefix { &new } else { &old };
            gen.emit(Opcode::Mov, &[dst.index(), result.index()]);
        }
        AssignTarget::Member { object, key } => {
            let obj = gen.arena.new_temporary();
            gen_expr(gen, object, &obj)?;
            let old = gen.arena.new_temporary();
            let new = gen.arena.new_temporary();
            let delta = gen.arena.new_temporary();
            load_constant(gen, &delta, delta_value);
            match key {
                MemberKey::Static(name) => {
                    let id = gen.identifier_index(name);
                    gen.emit(Opcode::GetById, &[old.index(), obj.index(), id as Word]);
                    gen.emit(Opcode::ToNumber, &[old.index(), old.index()]);
                    gen.emit(Opcode::Add, &[new.index(), old.index(), delta.index()]);
                    gen.emit(Opcode::PutById, &[obj.index(), id as Word, new.index()]);
                }
                MemberKey::Computed(key_expr) => {
                    let key_reg = gen.arena.new_temporary();
                    gen_expr(gen, key_expr, &key_reg)?;
                    gen.emit(Opcode::GetByVal, &[old.index(), obj.index(), key_reg.index()]);
                    gen.emit(Opcode::ToNumber, &[old.index(), old.index()]);
                    gen.emit(Opcode::Add, &[new.index(), old.index(), delta.index()]);
                    gen.emit(Opcode::PutByVal, &[obj.index(), key_reg.index(), new.index()]);
                }
            }
            let result = if prefix { &new } else { &old };
            gen.emit(Opcode::Mov, &[dst.index(), result.index()]);
        }
    }
    Ok(())
}

fn gen_conditional(gen: &mut Generator, test: &Expr, cons: &Expr, alt: &Expr, dst: &RegisterID) -> Result<()> {
    let t = gen.arena.new_temporary();
    gen_expr(gen, test, &t)?;
    let branch = gen.emit(Opcode::Jfalse, &[t.index(), 0]);
    let mut else_label = LabelID::new();
    gen.reference_label(&mut else_label, branch + 1);
    gen_expr(gen, cons, dst)?;
    let jmp = gen.emit(Opcode::Jmp, &[0]);
    let mut end_label = LabelID::new();
    gen.reference_label(&mut end_label, jmp);
    gen.bind_label(&mut else_label);
    gen_expr(gen, alt, dst)?;
    gen.bind_label(&mut end_label);
    Ok(())
}

fn gen_member_get(gen: &mut Generator, object: &Expr, key: &MemberKey, dst: &RegisterID) -> Result<()> {
    let obj = gen.arena.new_temporary();
    gen_expr(gen, object, &obj)?;
    match key {
        MemberKey::Static(name) => {
            let id = gen.identifier_index(name);
            gen.emit(Opcode::GetById, &[dst.index(), obj.index(), id as Word]);
        }
        MemberKey::Computed(key_expr) => {
            let key_reg = gen.arena.new_temporary();
            gen_expr(gen, key_expr, &key_reg)?;
            gen.emit(Opcode::GetByVal, &[dst.index(), obj.index(), key_reg.index()]);
        }
    }
    Ok(())
}

/// Lowers a call or `new` expression. The argv band is `this` followed by
/// each argument, allocated as one contiguous batch so the callee can
/// alias it directly on an exact-arity call (spec §4.2).
fn gen_call(gen: &mut Generator, callee: &Expr, args: &[Expr], dst: &RegisterID, is_construct: bool) -> Result<()> {
    let band = gen.arena.new_temporary_batch(1 + args.len());
    let this_reg = &band[0];
    let callee_reg = gen.arena.new_temporary();

    if let Expr::Member { object, key } = callee {
        gen_expr(gen, object, this_reg)?;
        match key {
            MemberKey::Static(name) => {
                let id = gen.identifier_index(name);
                gen.emit(Opcode::GetById, &[callee_reg.index(), this_reg.index(), id as Word]);
            }
            MemberKey::Computed(key_expr) => {
                let key_reg = gen.arena.new_temporary();
                gen_expr(gen, key_expr, &key_reg)?;
                gen.emit(Opcode::GetByVal, &[callee_reg.index(), this_reg.index(), key_reg.index()]);
            }
        }
    } else {
        load_undefined(gen, this_reg);
        gen_expr(gen, callee, &callee_reg)?;
    }

    for (arg, reg) in args.iter().zip(band.iter().skip(1)) {
        gen_expr(gen, arg, reg)?;
    }

    let opcode = if is_construct { Opcode::Construct } else { Opcode::Call };
    gen.emit(opcode, &[dst.index(), callee_reg.index(), this_reg.index(), args.len() as Word]);
    Ok(())
}

fn gen_function_expr(gen: &mut Generator, node: &std::rc::Rc<crate::ast::FunctionNode>, dst: &RegisterID) -> Result<()> {
    let code = super::generate_function(node)?;
    let idx = gen.function_expressions.len() as Word;
    gen.function_expressions.push(code);
    gen.emit(Opcode::NewFuncExp, &[dst.index(), idx]);
    Ok(())
}

fn gen_object_literal(gen: &mut Generator, props: &[(std::rc::Rc<str>, Expr)], dst: &RegisterID) -> Result<()> {
    gen.emit(Opcode::NewObject, &[dst.index(), 0]);
    for (name, value_expr) in props {
        let value_reg = gen.arena.new_temporary();
        gen_expr(gen, value_expr, &value_reg)?;
        let id = gen.identifier_index(name);
        gen.emit(Opcode::PutById, &[dst.index(), id as Word, value_reg.index()]);
    }
    Ok(())
}

fn gen_array_literal(gen: &mut Generator, items: &[Expr], dst: &RegisterID) -> Result<()> {
    if items.is_empty() {
        gen.emit(Opcode::NewArray, &[dst.index(), 0, 0]);
        return Ok(());
    }
    let batch = gen.arena.new_temporary_batch(items.len());
    for (item, reg) in items.iter().zip(batch.iter()) {
        gen_expr(gen, item, reg)?;
    }
    gen.emit(Opcode::NewArray, &[dst.index(), batch[0].index(), items.len() as Word]);
    Ok(())
}
