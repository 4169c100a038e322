//! Lowers [`crate::ast::Stmt`] (spec §4.1).

use std::rc::Rc;

use crate::ast::{Expr, Stmt};
use crate::code_block::ExceptionHandler;
use crate::error::{Result, VmError};
use crate::opcode::{Opcode, Word};

use super::constants::load_undefined;
use super::expressions::gen_expr;
use super::state::Generator;

pub(super) fn gen_stmts(gen: &mut Generator, stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        gen_stmt(gen, stmt)?;
    }
    Ok(())
}

pub(super) fn gen_stmt(gen: &mut Generator, stmt: &Stmt) -> Result<()> {
    match stmt {
        Stmt::Empty => {}
        Stmt::Expr(e) => {
            let t = gen.arena.new_temporary();
            gen_expr(gen, e, &t)?;
        }
        Stmt::VarDecl(decls) => {
            for (name, init) in decls {
                let reg = gen.locals.get(name).cloned().expect("var declarations are hoisted before statements run");
                if let Some(init) = init {
                    gen_expr(gen, init, &reg)?;
                }
            }
        }
        Stmt::FunctionDecl(_) => {
            // Hoisted and initialized (NewFunc + store) by `generate_function`
            // before the body's other statements run; nothing left to do at
            // the declaration's own source position.
        }
        Stmt::Block(body) => gen_stmts(gen, body)?,
        Stmt::If { test, consequent, alternate } => gen_if(gen, test, consequent, alternate.as_deref())?,
        Stmt::While { test, body } => gen_while(gen, test, body, None)?,
        Stmt::DoWhile { test, body } => gen_do_while(gen, test, body, None)?,
        Stmt::For { init, test, update, body } => gen_for(gen, init.as_deref(), test.as_ref(), update.as_ref(), body, None)?,
        Stmt::ForIn { binding, object, body } => gen_for_in(gen, binding, object, body, None)?,
        Stmt::Return(value) => {
            let reg = gen.arena.new_temporary();
            match value {
                Some(e) => gen_expr(gen, e, &reg)?,
                None => load_undefined(gen, &reg),
            }
            gen.emit(Opcode::Ret, &[reg.index()]);
        }
        Stmt::Break(label) => {
            let (_, depth_at_entry) = gen.cf.find_break(label.as_ref()).ok_or_else(|| undeclared_label(label))?;
            let delta = gen.scope_depth - depth_at_entry;
            let offset = emit_loop_jump(gen, delta);
            let (cf, stream) = gen.cf_and_stream();
            let (target, _) = cf.find_break(label.as_ref()).expect("looked up above");
            target.reference(stream, offset);
        }
        Stmt::Continue(label) => {
            let (_, depth_at_entry) = gen.cf.find_continue(label.as_ref()).ok_or_else(|| undeclared_label(label))?;
            let delta = gen.scope_depth - depth_at_entry;
            let offset = emit_loop_jump(gen, delta);
            let (cf, stream) = gen.cf_and_stream();
            let (target, _) = cf.find_continue(label.as_ref()).expect("looked up above");
            target.reference(stream, offset);
        }
        Stmt::Labeled(name, body) => gen_labeled(gen, name, body)?,
        Stmt::With { object, body } => {
            let scope_reg = gen.arena.new_temporary();
            gen_expr(gen, object, &scope_reg)?;
            gen.emit(Opcode::PushScope, &[scope_reg.index()]);
            gen.scope_depth += 1;
            gen_stmt(gen, body)?;
            gen.scope_depth -= 1;
            gen.emit(Opcode::PopScope, &[]);
        }
        Stmt::Throw(e) => {
            let t = gen.arena.new_temporary();
            gen_expr(gen, e, &t)?;
            gen.emit(Opcode::Throw, &[t.index()]);
        }
        Stmt::Try { block, catch, finally } => gen_try(gen, block, catch, finally)?,
    }
    Ok(())
}

fn undeclared_label(label: &Option<Rc<str>>) -> VmError {
    match label {
        Some(name) => VmError::syntax(format!("undefined label '{name}'")),
        None => VmError::syntax("'break'/'continue' outside a loop"),
    }
}

/// Emits the jump a `break`/`continue` resolves to. A plain `Jmp` suffices
/// when the target is inside the same `with` nesting as the jump itself;
/// crossing one or more `with` scopes instead emits `JmpScopes` so the
/// scope chain gets popped back to what the target expects before control
/// lands there. Returns the operand offset the caller should bind the
/// branch label to.
fn emit_loop_jump(gen: &mut Generator, delta: u32) -> u32 {
    if delta == 0 {
        gen.emit(Opcode::Jmp, &[0])
    } else {
        gen.emit(Opcode::JmpScopes, &[delta as Word, 0]) + 1
    }
}

fn gen_if(gen: &mut Generator, test: &Expr, consequent: &Stmt, alternate: Option<&Stmt>) -> Result<()> {
    let t = gen.arena.new_temporary();
    gen_expr(gen, test, &t)?;
    let branch = gen.emit(Opcode::Jfalse, &[t.index(), 0]);
    let mut else_label = crate::label::LabelID::new();
    gen.reference_label(&mut else_label, branch + 1);
    gen_stmt(gen, consequent)?;
    if let Some(alternate) = alternate {
        let jmp = gen.emit(Opcode::Jmp, &[0]);
        let mut end_label = crate::label::LabelID::new();
        gen.reference_label(&mut end_label, jmp);
        gen.bind_label(&mut else_label);
        gen_stmt(gen, alternate)?;
        gen.bind_label(&mut end_label);
    } else {
        gen.bind_label(&mut else_label);
    }
    Ok(())
}

fn gen_while(gen: &mut Generator, test: &Expr, body: &Stmt, label: Option<Rc<str>>) -> Result<()> {
    gen.cf.push(label, gen.scope_depth);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().continue_label.bind(stream);
    }
    let test_reg = gen.arena.new_temporary();
    gen_expr(gen, test, &test_reg)?;
    let jfalse = gen.emit(Opcode::Jfalse, &[test_reg.index(), 0]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.reference(stream, jfalse + 1);
    }
    gen_stmt(gen, body)?;
    let continue_target = gen.cf.current().continue_label.target();
    gen.emit(Opcode::Jmp, &[continue_target as Word]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.bind(stream);
    }
    gen.cf.pop();
    Ok(())
}

fn gen_do_while(gen: &mut Generator, test: &Expr, body: &Stmt, label: Option<Rc<str>>) -> Result<()> {
    gen.cf.push(label, gen.scope_depth);
    let top = gen.here();
    gen_stmt(gen, body)?;
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().continue_label.bind(stream);
    }
    let test_reg = gen.arena.new_temporary();
    gen_expr(gen, test, &test_reg)?;
    gen.emit(Opcode::Jtrue, &[test_reg.index(), top as Word]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.bind(stream);
    }
    gen.cf.pop();
    Ok(())
}

fn gen_for(
    gen: &mut Generator,
    init: Option<&Stmt>,
    test: Option<&Expr>,
    update: Option<&Expr>,
    body: &Stmt,
    label: Option<Rc<str>>,
) -> Result<()> {
    if let Some(init) = init {
        gen_stmt(gen, init)?;
    }
    gen.cf.push(label, gen.scope_depth);
    let top = gen.here();
    if let Some(test) = test {
        let t = gen.arena.new_temporary();
        gen_expr(gen, test, &t)?;
        let jfalse = gen.emit(Opcode::Jfalse, &[t.index(), 0]);
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.reference(stream, jfalse + 1);
    }
    gen_stmt(gen, body)?;
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().continue_label.bind(stream);
    }
    if let Some(update) = update {
        let t = gen.arena.new_temporary();
        gen_expr(gen, update, &t)?;
    }
    gen.emit(Opcode::Jmp, &[top as Word]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.bind(stream);
    }
    gen.cf.pop();
    Ok(())
}

/// `for (binding in object) body` (spec §4.2's `get_pnames`/`next_pname`).
/// `get_pnames` snapshots the object's enumerable property names once, up
/// front, the way the original `for-in` loops this core was modeled on do —
/// properties added to `object` mid-loop are not picked up.
fn gen_for_in(gen: &mut Generator, binding: &Rc<str>, object: &Expr, body: &Stmt, label: Option<Rc<str>>) -> Result<()> {
    let object_reg = gen.arena.new_temporary();
    gen_expr(gen, object, &object_reg)?;
    let iter_reg = gen.arena.new_temporary();
    gen.emit(Opcode::GetPnames, &[iter_reg.index(), object_reg.index()]);

    gen.cf.push(label, gen.scope_depth);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().continue_label.bind(stream);
    }
    let name_reg = gen.arena.new_temporary();
    let next = gen.emit(Opcode::NextPname, &[name_reg.index(), iter_reg.index(), 0]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.reference(stream, next + 2);
    }
    let binding_reg = gen.locals.get(binding).cloned().expect("for-in's binding is hoisted before statements run");
    gen.emit(Opcode::Mov, &[binding_reg.index(), name_reg.index()]);
    gen_stmt(gen, body)?;
    let continue_target = gen.cf.current().continue_label.target();
    gen.emit(Opcode::Jmp, &[continue_target as Word]);
    {
        let (cf, stream) = gen.cf_and_stream();
        cf.current().break_label.bind(stream);
    }
    gen.cf.pop();
    Ok(())
}

fn gen_labeled(gen: &mut Generator, name: &Rc<str>, body: &Stmt) -> Result<()> {
    match body {
        Stmt::While { test, body } => gen_while(gen, test, body, Some(name.clone())),
        Stmt::DoWhile { test, body } => gen_do_while(gen, test, body, Some(name.clone())),
        Stmt::For { init, test, update, body } => {
            gen_for(gen, init.as_deref(), test.as_ref(), update.as_ref(), body, Some(name.clone()))
        }
        Stmt::ForIn { binding, object, body } => gen_for_in(gen, binding, object, body, Some(name.clone())),
        other => {
            gen.cf.push_label_only(name.clone(), gen.scope_depth);
            gen_stmt(gen, other)?;
            {
                let (cf, stream) = gen.cf_and_stream();
                cf.current().break_label.bind(stream);
            }
            gen.cf.pop();
            Ok(())
        }
    }
}

/// `try`/`catch`/`finally` (spec §4.1's exception lowering, §S.4). The
/// `finally` block is duplicated onto the normal-completion path and the
/// caught-exception path; it does not re-run when the frame unwinds past
/// this `try` without a matching `catch` (the `Machine`'s unwind loop only
/// consults `CodeBlock::exception_table`, it has no separate finally
/// marker), nor on a `break`/`continue`/`return` that exits through the
/// middle of the try block. Documented limitation, not an oversight.
fn gen_try(gen: &mut Generator, block: &[Stmt], catch: &Option<(Rc<str>, Vec<Stmt>)>, finally: &Option<Vec<Stmt>>) -> Result<()> {
    let try_start = gen.here();
    gen_stmts(gen, block)?;
    let try_end = gen.here();

    let mut skip_catch = crate::label::LabelID::new();
    if catch.is_some() {
        let jmp = gen.emit(Opcode::Jmp, &[0]);
        gen.reference_label(&mut skip_catch, jmp);
    }

    if let Some((name, catch_body)) = catch {
        let handler_vpc = gen.here();
        let catch_reg = gen.arena.add_local();
        let shadowed = gen.locals.insert(name.clone(), catch_reg.clone());
        gen.exception_table.push(ExceptionHandler {
            try_start,
            try_end,
            handler_vpc,
            catch_register: catch_reg.index(),
        });
        gen_stmts(gen, catch_body)?;
        match shadowed {
            Some(previous) => {
                gen.locals.insert(name.clone(), previous);
            }
            None => {
                gen.locals.remove(name.as_ref());
            }
        }
        gen.bind_label(&mut skip_catch);
    }

    if let Some(finally_body) = finally {
        gen_stmts(gen, finally_body)?;
    }
    Ok(())
}
