//! Compiles [`crate::ast`] nodes into [`crate::code_block::CodeBlock`]s
//! (spec §4): one [`Generator`](state::Generator) per function body or
//! top-level program, built bottom-up so a nested function's `CodeBlock`
//! exists before its enclosing `NewFunc`/`NewFuncExp` is emitted.

mod constants;
mod control_flow;
mod expressions;
mod state;
mod statements;

use std::collections::HashSet;
use std::rc::Rc;

use crate::analysis;
use crate::ast::{FunctionNode, Stmt};
use crate::code_block::CodeBlock;
use crate::error::{Result, VmError};
use crate::host::Host;
use crate::opcode::{Opcode, Word};
use crate::scope_chain::ScopeChain;
use crate::value::{self, Object, Value};

use self::state::Generator;
use self::statements::gen_stmts;

/// Compiles a whole program's top-level statements into one `CodeBlock`
/// with no parameters. A program is conservatively always given an eager
/// `Activation` (see the comment on the `Enter` emission below), since the
/// capture pre-pass in [`crate::analysis`] only tracks closures across a
/// [`FunctionNode`] boundary and the top level has none of its own.
pub fn compile(program: &[Stmt]) -> Result<CodeBlock> {
    analysis::analyze_program(program);
    let (vars, functions) = hoisted_names(program);
    let mut gen = Generator::new(0, (vars.len() + functions.len()) as u32);
    declare_hoisted(&mut gen, &[], &vars, &functions);
    gen.emit(Opcode::Enter, &[1]);
    emit_function_declarations(&mut gen, &functions)?;
    gen_stmts(&mut gen, program)?;
    gen.emit(Opcode::End, &[]);
    Ok(gen.into_code_block(true, false, false, None))
}

/// Compiles one nested function body, used for both function
/// *declarations* (hoisted into the enclosing body's `functions` pool) and
/// function *expressions* (hoisted into its `function_expressions` pool).
pub(super) fn generate_function(node: &Rc<FunctionNode>) -> Result<Rc<CodeBlock>> {
    let (vars, functions) = hoisted_names(&node.body);
    let mut gen = Generator::new(node.params.len() as u32, (vars.len() + functions.len()) as u32);
    for param in &node.params {
        let reg = gen.arena.add_parameter();
        gen.declare_local(param.clone(), reg);
    }
    declare_hoisted(&mut gen, &node.params, &vars, &functions);

    let needs_activation = node.uses_eval.get() || node.needs_closure.get();
    gen.emit(Opcode::Enter, &[if needs_activation { 1 } else { 0 }]);
    emit_function_declarations(&mut gen, &functions)?;
    gen_stmts(&mut gen, &node.body)?;
    gen.emit(Opcode::End, &[]);

    Ok(Rc::new(gen.into_code_block(needs_activation, node.uses_eval.get(), node.needs_closure.get(), None)))
}

/// Walks `body` collecting the names `var` declarations and `for-in`
/// bindings introduce, plus the function-declaration nodes nested directly
/// in it (not inside a nested function's own body) — the set of bindings
/// spec §4.1 says must exist in registers before the body's first
/// statement runs.
fn hoisted_names(body: &[Stmt]) -> (Vec<Rc<str>>, Vec<Rc<FunctionNode>>) {
    let mut vars = Vec::new();
    let mut functions = Vec::new();
    collect_hoisted(body, &mut vars, &mut functions);
    (vars, functions)
}

fn collect_hoisted(body: &[Stmt], vars: &mut Vec<Rc<str>>, functions: &mut Vec<Rc<FunctionNode>>) {
    for stmt in body {
        collect_hoisted_stmt(stmt, vars, functions);
    }
}

fn push_var(vars: &mut Vec<Rc<str>>, name: &Rc<str>) {
    if !vars.iter().any(|existing| existing == name) {
        vars.push(name.clone());
    }
}

fn collect_hoisted_stmt(stmt: &Stmt, vars: &mut Vec<Rc<str>>, functions: &mut Vec<Rc<FunctionNode>>) {
    match stmt {
        Stmt::VarDecl(decls) => {
            for (name, _) in decls {
                push_var(vars, name);
            }
        }
        Stmt::FunctionDecl(f) => functions.push(f.clone()),
        Stmt::Block(b) => collect_hoisted(b, vars, functions),
        Stmt::If { consequent, alternate, .. } => {
            collect_hoisted_stmt(consequent, vars, functions);
            if let Some(alt) = alternate {
                collect_hoisted_stmt(alt, vars, functions);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_hoisted_stmt(body, vars, functions),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_hoisted_stmt(init, vars, functions);
            }
            collect_hoisted_stmt(body, vars, functions);
        }
        Stmt::ForIn { binding, body, .. } => {
            push_var(vars, binding);
            collect_hoisted_stmt(body, vars, functions);
        }
        Stmt::Labeled(_, body) => collect_hoisted_stmt(body, vars, functions),
        Stmt::With { body, .. } => collect_hoisted_stmt(body, vars, functions),
        Stmt::Try { block, catch, finally } => {
            collect_hoisted(block, vars, functions);
            if let Some((_, body)) = catch {
                collect_hoisted(body, vars, functions);
            }
            if let Some(body) = finally {
                collect_hoisted(body, vars, functions);
            }
        }
        Stmt::Expr(_) | Stmt::Return(_) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Throw(_) | Stmt::Empty => {}
    }
}

/// Allocates a register for every hoisted name not already bound (a
/// parameter takes precedence over a `var`/function declaration of the
/// same name, matching the source language's own shadowing rule).
/// Function declarations are registered before plain `var`s so a
/// same-named `var x; function x() {}` ends up bound to the function's
/// register, consistent with standard hoisting precedence.
fn declare_hoisted(gen: &mut Generator, params: &[Rc<str>], vars: &[Rc<str>], functions: &[Rc<FunctionNode>]) {
    let mut bound: HashSet<Rc<str>> = params.iter().cloned().collect();
    for f in functions {
        let Some(name) = &f.name else { continue };
        if bound.insert(name.clone()) {
            let reg = gen.arena.add_local();
            gen.declare_local(name.clone(), reg);
        }
    }
    for name in vars {
        if bound.insert(name.clone()) {
            let reg = gen.arena.add_local();
            gen.declare_local(name.clone(), reg);
        }
    }
}

/// Emits the `NewFunc` that instantiates each hoisted function declaration
/// into its already-allocated local register, before any other statement
/// in the body runs (spec §4.1: declarations are live from entry).
fn emit_function_declarations(gen: &mut Generator, functions: &[Rc<FunctionNode>]) -> Result<()> {
    for f in functions {
        let Some(name) = &f.name else { continue };
        let code = generate_function(f)?;
        let idx = gen.functions.len() as Word;
        gen.functions.push(code);
        let reg = gen.locals.get(name).cloned().expect("hoisted function declarations are declared as locals first");
        gen.emit(Opcode::NewFunc, &[reg.index(), idx]);
    }
    Ok(())
}

/// A VM-created closure: a compiled body plus the scope chain captured at
/// the `NewFunc`/`NewFuncExp` that created it (spec §4.3). `Machine::invoke`
/// always takes the overlapping-frame fast path for these, so the `Object`
/// methods below besides `as_script_function` only need to exist, not do
/// anything useful — nothing ever calls them.
#[derive(Debug)]
pub struct ScriptFunction {
    code: Rc<CodeBlock>,
    scope: ScopeChain,
}

impl ScriptFunction {
    pub fn new(code: Rc<CodeBlock>, scope: ScopeChain) -> Self {
        ScriptFunction { code, scope }
    }
}

impl value::ScriptCallable for ScriptFunction {
    fn code(&self) -> &Rc<CodeBlock> {
        &self.code
    }

    fn captured_scope(&self) -> &ScopeChain {
        &self.scope
    }
}

impl Object for ScriptFunction {
    fn class_name(&self) -> &str {
        "Function"
    }

    fn get(&self, _host: &mut dyn Host, _property: &str) -> Result<Value> {
        Ok(Value::Undefined)
    }

    fn put(&self, _host: &mut dyn Host, _property: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _property: &str) -> bool {
        false
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn is_constructible(&self) -> bool {
        true
    }

    fn call(&self, _host: &mut dyn Host, _this: Value, _args: &[Value]) -> Result<Value> {
        Err(VmError::ty("internal error: ScriptFunction::call should never run, Machine::invoke takes the fast path"))
    }

    fn as_script_function(&self) -> Option<&dyn value::ScriptCallable> {
        Some(self)
    }

    fn mark_children(&self, visit: &mut dyn FnMut(&Value)) {
        for scope in self.scope.iter() {
            visit(scope);
        }
    }
}
