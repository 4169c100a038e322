//! The syntactic pre-pass spec §9's third Design Notes bullet calls for:
//! walk the program once before code generation and tag each function
//! node with `usesEval` / `needsClosure`, so the generator can decide
//! eager vs. lazy `Activation` materialization (spec §4.3) without
//! re-deriving scope information while it emits.
//!
//! This is AST-to-AST annotation only — no lexing, no parsing, no name
//! binding beyond what's needed to answer "does some nested function
//! reference one of my registers by name".

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{Expr, FunctionNode, Stmt};

/// Runs the pre-pass over a top-level program, recursively annotating
/// every function declaration or expression reachable from it.
pub fn analyze_program(stmts: &[Stmt]) {
    let enclosing: Vec<&FunctionNode> = Vec::new();
    scan_stmts(stmts, None, &HashSet::new(), &enclosing);
}

fn analyze_function(node: &FunctionNode, enclosing: &[&FunctionNode]) {
    let own_bound = collect_own_bound(&node.body, &node.params);
    scan_stmts(&node.body, Some(node), &own_bound, enclosing);
}

/// Names directly bound in `body`: parameters, `var` declarations, and
/// named function declarations. Does not descend into nested function
/// bodies — their own bindings are a separate scope.
pub(crate) fn collect_own_bound(body: &[Stmt], params: &[Rc<str>]) -> HashSet<Rc<str>> {
    let mut bound: HashSet<Rc<str>> = params.iter().cloned().collect();
    collect_bound_in_stmts(body, &mut bound);
    bound
}

fn collect_bound_in_stmts(stmts: &[Stmt], bound: &mut HashSet<Rc<str>>) {
    for stmt in stmts {
        collect_bound_in_stmt(stmt, bound);
    }
}

fn collect_bound_in_stmt(stmt: &Stmt, bound: &mut HashSet<Rc<str>>) {
    match stmt {
        Stmt::VarDecl(decls) => {
            for (name, _) in decls {
                bound.insert(name.clone());
            }
        }
        Stmt::FunctionDecl(f) => {
            if let Some(name) = &f.name {
                bound.insert(name.clone());
            }
        }
        Stmt::Block(body) => collect_bound_in_stmts(body, bound),
        Stmt::If { consequent, alternate, .. } => {
            collect_bound_in_stmt(consequent, bound);
            if let Some(alt) = alternate {
                collect_bound_in_stmt(alt, bound);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_bound_in_stmt(body, bound),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_bound_in_stmt(init, bound);
            }
            collect_bound_in_stmt(body, bound);
        }
        Stmt::ForIn { binding, body, .. } => {
            bound.insert(binding.clone());
            collect_bound_in_stmt(body, bound);
        }
        Stmt::Labeled(_, body) => collect_bound_in_stmt(body, bound),
        Stmt::With { body, .. } => collect_bound_in_stmt(body, bound),
        Stmt::Try { block, catch, finally } => {
            collect_bound_in_stmts(block, bound);
            if let Some((_, body)) = catch {
                collect_bound_in_stmts(body, bound);
            }
            if let Some(body) = finally {
                collect_bound_in_stmts(body, bound);
            }
        }
        Stmt::Expr(_) | Stmt::Return(_) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Throw(_) | Stmt::Empty => {}
    }
}

/// Resolves `name` against the enclosing function chain (innermost
/// first) and marks the first match's `needsClosure` flag — that
/// function's register is the one actually being captured, regardless of
/// how many scopes sit between it and the reference.
fn mark_captured(name: &str, enclosing: &[&FunctionNode]) {
    for scope in enclosing.iter().rev() {
        let own_bound = collect_own_bound(&scope.body, &scope.params);
        if own_bound.contains(name) {
            scope.needs_closure.set(true);
            return;
        }
    }
}

fn scan_stmts(stmts: &[Stmt], current: Option<&FunctionNode>, own_bound: &HashSet<Rc<str>>, enclosing: &[&FunctionNode]) {
    for stmt in stmts {
        scan_stmt(stmt, current, own_bound, enclosing);
    }
}

fn scan_stmt(stmt: &Stmt, current: Option<&FunctionNode>, own_bound: &HashSet<Rc<str>>, enclosing: &[&FunctionNode]) {
    match stmt {
        Stmt::Expr(e) => scan_expr(e, current, own_bound, enclosing),
        Stmt::VarDecl(decls) => {
            for (_, init) in decls {
                if let Some(e) = init {
                    scan_expr(e, current, own_bound, enclosing);
                }
            }
        }
        Stmt::FunctionDecl(f) => descend(f, current, enclosing),
        Stmt::Block(body) => scan_stmts(body, current, own_bound, enclosing),
        Stmt::If { test, consequent, alternate } => {
            scan_expr(test, current, own_bound, enclosing);
            scan_stmt(consequent, current, own_bound, enclosing);
            if let Some(alt) = alternate {
                scan_stmt(alt, current, own_bound, enclosing);
            }
        }
        Stmt::While { test, body } | Stmt::DoWhile { test, body } => {
            scan_expr(test, current, own_bound, enclosing);
            scan_stmt(body, current, own_bound, enclosing);
        }
        Stmt::For { init, test, update, body } => {
            if let Some(init) = init {
                scan_stmt(init, current, own_bound, enclosing);
            }
            if let Some(test) = test {
                scan_expr(test, current, own_bound, enclosing);
            }
            if let Some(update) = update {
                scan_expr(update, current, own_bound, enclosing);
            }
            scan_stmt(body, current, own_bound, enclosing);
        }
        Stmt::ForIn { object, body, .. } => {
            scan_expr(object, current, own_bound, enclosing);
            scan_stmt(body, current, own_bound, enclosing);
        }
        Stmt::Return(Some(e)) | Stmt::Throw(e) => scan_expr(e, current, own_bound, enclosing),
        Stmt::Return(None) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Empty => {}
        Stmt::Labeled(_, body) => scan_stmt(body, current, own_bound, enclosing),
        Stmt::With { object, body } => {
            scan_expr(object, current, own_bound, enclosing);
            scan_stmt(body, current, own_bound, enclosing);
        }
        Stmt::Try { block, catch, finally } => {
            scan_stmts(block, current, own_bound, enclosing);
            if let Some((_, body)) = catch {
                scan_stmts(body, current, own_bound, enclosing);
            }
            if let Some(body) = finally {
                scan_stmts(body, current, own_bound, enclosing);
            }
        }
    }
}

fn scan_expr(expr: &Expr, current: Option<&FunctionNode>, own_bound: &HashSet<Rc<str>>, enclosing: &[&FunctionNode]) {
    match expr {
        Expr::Ident(name) => {
            if !own_bound.contains(name.as_ref()) {
                mark_captured(name, enclosing);
            }
        }
        Expr::Binary(_, a, b) | Expr::Logical(_, a, b) => {
            scan_expr(a, current, own_bound, enclosing);
            scan_expr(b, current, own_bound, enclosing);
        }
        Expr::Unary(_, e) => scan_expr(e, current, own_bound, enclosing),
        Expr::Assign(target, value) => {
            match target {
                crate::ast::AssignTarget::Ident(name) => {
                    if !own_bound.contains(name.as_ref()) {
                        mark_captured(name, enclosing);
                    }
                }
                crate::ast::AssignTarget::Member { object, key } => {
                    scan_expr(object, current, own_bound, enclosing);
                    if let crate::ast::MemberKey::Computed(k) = key {
                        scan_expr(k, current, own_bound, enclosing);
                    }
                }
            }
            scan_expr(value, current, own_bound, enclosing);
        }
        Expr::Update { target, .. } => match target {
            crate::ast::AssignTarget::Ident(name) => {
                if !own_bound.contains(name.as_ref()) {
                    mark_captured(name, enclosing);
                }
            }
            crate::ast::AssignTarget::Member { object, key } => {
                scan_expr(object, current, own_bound, enclosing);
                if let crate::ast::MemberKey::Computed(k) = key {
                    scan_expr(k, current, own_bound, enclosing);
                }
            }
        },
        Expr::Conditional(test, cons, alt) => {
            scan_expr(test, current, own_bound, enclosing);
            scan_expr(cons, current, own_bound, enclosing);
            scan_expr(alt, current, own_bound, enclosing);
        }
        Expr::Call { callee, args } => {
            if let Expr::Ident(name) = callee.as_ref() {
                if name.as_ref() == "eval" {
                    if let Some(f) = current {
                        f.uses_eval.set(true);
                    }
                }
            }
            scan_expr(callee, current, own_bound, enclosing);
            for a in args {
                scan_expr(a, current, own_bound, enclosing);
            }
        }
        Expr::New { callee, args } => {
            scan_expr(callee, current, own_bound, enclosing);
            for a in args {
                scan_expr(a, current, own_bound, enclosing);
            }
        }
        Expr::Member { object, key } => {
            scan_expr(object, current, own_bound, enclosing);
            if let crate::ast::MemberKey::Computed(k) = key {
                scan_expr(k, current, own_bound, enclosing);
            }
        }
        Expr::FunctionExpr(f) => descend(f, current, enclosing),
        Expr::Object(props) => {
            for (_, v) in props {
                scan_expr(v, current, own_bound, enclosing);
            }
        }
        Expr::Array(items) => {
            for i in items {
                scan_expr(i, current, own_bound, enclosing);
            }
        }
        Expr::Undefined | Expr::Null | Expr::Boolean(_) | Expr::Number(_) | Expr::String(_) | Expr::This => {}
    }
}

fn descend(f: &FunctionNode, current: Option<&FunctionNode>, enclosing: &[&FunctionNode]) {
    let mut child_enclosing: Vec<&FunctionNode> = enclosing.to_vec();
    if let Some(current) = current {
        child_enclosing.push(current);
    }
    analyze_function(f, &child_enclosing);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignTarget, BinaryOp};

    #[test]
    fn direct_eval_call_sets_uses_eval() {
        let f = Rc::new(FunctionNode::new(
            None,
            vec![],
            vec![Stmt::Expr(Expr::Call { callee: Box::new(Expr::Ident(Rc::from("eval"))), args: vec![] })],
        ));
        let program = vec![Stmt::FunctionDecl(f.clone())];
        analyze_program(&program);
        assert!(f.uses_eval.get());
    }

    #[test]
    fn nested_function_referencing_outer_local_marks_outer_needs_closure() {
        let inner = Rc::new(FunctionNode::new(
            None,
            vec![],
            vec![Stmt::Return(Some(Expr::Ident(Rc::from("x"))))],
        ));
        let outer = Rc::new(FunctionNode::new(
            None,
            vec![],
            vec![
                Stmt::VarDecl(vec![(Rc::from("x"), Some(Expr::Number(1.0)))]),
                Stmt::Return(Some(Expr::FunctionExpr(inner.clone()))),
            ],
        ));
        let program = vec![Stmt::FunctionDecl(outer.clone())];
        analyze_program(&program);
        assert!(outer.needs_closure.get());
        assert!(!inner.needs_closure.get());
    }

    #[test]
    fn function_with_no_captures_is_left_untouched() {
        let f = Rc::new(FunctionNode::new(
            Some(Rc::from("add")),
            vec![Rc::from("a"), Rc::from("b")],
            vec![Stmt::Return(Some(Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Ident(Rc::from("a"))),
                Box::new(Expr::Ident(Rc::from("b"))),
            )))],
        ));
        let program = vec![Stmt::FunctionDecl(f.clone())];
        analyze_program(&program);
        assert!(!f.needs_closure.get());
        assert!(!f.uses_eval.get());
    }

    #[test]
    fn assignment_to_outer_local_also_marks_needs_closure() {
        let inner = Rc::new(FunctionNode::new(
            None,
            vec![],
            vec![Stmt::Expr(Expr::Assign(AssignTarget::Ident(Rc::from("counter")), Box::new(Expr::Number(2.0))))],
        ));
        let outer = Rc::new(FunctionNode::new(
            None,
            vec![],
            vec![
                Stmt::VarDecl(vec![(Rc::from("counter"), Some(Expr::Number(0.0)))]),
                Stmt::FunctionDecl(inner.clone()),
            ],
        ));
        let program = vec![Stmt::FunctionDecl(outer.clone())];
        analyze_program(&program);
        assert!(outer.needs_closure.get());
    }
}
