//! End-to-end scenarios: build a small `ast` program by hand (parsing is
//! out of this crate's scope), compile it, and run it to completion on a
//! fresh `Machine` against a minimal property-bag `Host`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use regvm::ast::{AssignTarget, BinaryOp, Expr, FunctionNode, MemberKey, Stmt, UpdateOp};
use regvm::{compile, diagnostics, Executor, Host, Machine, MachineConfig, Object, Result, ScopeChain, Value, VmError};

#[derive(Debug, Default)]
struct PlainObject {
    properties: RefCell<HashMap<String, Value>>,
}

impl Object for PlainObject {
    fn class_name(&self) -> &str {
        "Object"
    }

    fn get(&self, _host: &mut dyn Host, property: &str) -> Result<Value> {
        Ok(self.properties.borrow().get(property).cloned().unwrap_or(Value::Undefined))
    }

    fn put(&self, _host: &mut dyn Host, property: &str, value: Value) -> Result<()> {
        self.properties.borrow_mut().insert(property.to_string(), value);
        Ok(())
    }

    fn delete(&self, property: &str) -> bool {
        self.properties.borrow_mut().remove(property).is_some()
    }
}

/// A `Host` with no real language runtime behind it: a plain-object global,
/// property bags for `NewObject`/`NewArray`, and no `eval` support. Enough
/// to drive the dispatch loop through every opcode these tests touch.
struct TestHost {
    global: Value,
}

impl TestHost {
    fn new() -> Self {
        TestHost { global: Value::Object(Rc::new(PlainObject::default())) }
    }
}

impl Host for TestHost {
    fn global_object(&self) -> Value {
        self.global.clone()
    }

    fn wrap_primitive(&mut self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn eval(&mut self, _executor: &mut dyn Executor, _scope: ScopeChain, _this: Value, _source: &str) -> Result<Value> {
        Err(VmError::syntax("eval is not supported by this host"))
    }

    fn mark_root(&mut self, _value: &Value) {}

    fn new_plain_object(&mut self) -> Result<Value> {
        Ok(Value::Object(Rc::new(PlainObject::default())))
    }

    fn new_array(&mut self, elements: Vec<Value>) -> Result<Value> {
        let obj = PlainObject::default();
        let len = elements.len();
        for (i, value) in elements.into_iter().enumerate() {
            obj.properties.borrow_mut().insert(i.to_string(), value);
        }
        obj.properties.borrow_mut().insert("length".to_string(), Value::number(len as f64));
        Ok(Value::Object(Rc::new(obj)))
    }

    fn property_names(&mut self, value: &Value) -> Result<Vec<Rc<str>>> {
        let object = value.as_object().ok_or_else(|| VmError::ty("for-in requires an object"))?;
        let plain = object.as_any().downcast_ref::<PlainObject>().ok_or_else(|| VmError::ty("not a PlainObject"))?;
        Ok(plain.properties.borrow().keys().map(|k| Rc::from(k.as_str())).collect())
    }
}

fn run(program: Vec<Stmt>) -> Result<Value> {
    diagnostics::init_logging();
    let code = compile(&program)?;
    let mut machine = Machine::new(TestHost::new(), MachineConfig::default());
    let scope = ScopeChain::with_global(machine.host().global_object());
    machine.call_script(Rc::new(code), scope, Value::Undefined, &[])
}

fn assert_number(value: Value, expected: f64) {
    match value {
        Value::Number(n) => assert_eq!(n, expected),
        other => panic!("expected number {expected}, got {other:?}"),
    }
}

fn ident(name: &str) -> Rc<str> {
    Rc::from(name)
}

#[test]
fn arithmetic_respects_precedence() {
    // (1 + 2) * 3
    let expr = Expr::Binary(
        BinaryOp::Mul,
        Box::new(Expr::Binary(BinaryOp::Add, Box::new(Expr::Number(1.0)), Box::new(Expr::Number(2.0)))),
        Box::new(Expr::Number(3.0)),
    );
    let result = run(vec![Stmt::Return(Some(expr))]).unwrap();
    assert_number(result, 9.0);
}

#[test]
fn exact_arity_call_binds_parameters_directly() {
    // function add(a, b) { return a + b; } return add(2, 3);
    let add = Rc::new(FunctionNode::new(
        Some(ident("add")),
        vec![ident("a"), ident("b")],
        vec![Stmt::Return(Some(Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Ident(ident("a"))),
            Box::new(Expr::Ident(ident("b"))),
        )))],
    ));
    let program = vec![
        Stmt::FunctionDecl(add),
        Stmt::Return(Some(Expr::Call {
            callee: Box::new(Expr::Ident(ident("add"))),
            args: vec![Expr::Number(2.0), Expr::Number(3.0)],
        })),
    ];
    assert_number(run(program).unwrap(), 5.0);
}

#[test]
fn call_with_too_few_arguments_pads_missing_parameters_with_undefined() {
    // function add(a, b) { return a + b; } return add(1); -> NaN (1 + undefined)
    let add = Rc::new(FunctionNode::new(
        Some(ident("add")),
        vec![ident("a"), ident("b")],
        vec![Stmt::Return(Some(Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Ident(ident("a"))),
            Box::new(Expr::Ident(ident("b"))),
        )))],
    ));
    let program = vec![
        Stmt::FunctionDecl(add),
        Stmt::Return(Some(Expr::Call { callee: Box::new(Expr::Ident(ident("add"))), args: vec![Expr::Number(1.0)] })),
    ];
    match run(program).unwrap() {
        Value::Number(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {other:?}"),
    }
}

#[test]
fn call_with_too_many_arguments_ignores_the_extras() {
    // function first(a) { return a; } return first(1, 2, 3);
    let first = Rc::new(FunctionNode::new(
        Some(ident("first")),
        vec![ident("a")],
        vec![Stmt::Return(Some(Expr::Ident(ident("a"))))],
    ));
    let program = vec![
        Stmt::FunctionDecl(first),
        Stmt::Return(Some(Expr::Call {
            callee: Box::new(Expr::Ident(ident("first"))),
            args: vec![Expr::Number(1.0), Expr::Number(2.0), Expr::Number(3.0)],
        })),
    ];
    assert_number(run(program).unwrap(), 1.0);
}

#[test]
fn closure_keeps_its_captured_local_alive_across_calls() {
    // function makeCounter() {
    //   var count = 0;
    //   function increment() { count = count + 1; return count; }
    //   return increment;
    // }
    // var bump = makeCounter();
    // var a = bump();
    // var b = bump();
    // return a + b; // 1 + 2
    let increment = Rc::new(FunctionNode::new(
        Some(ident("increment")),
        vec![],
        vec![
            Stmt::Expr(Expr::Assign(
                AssignTarget::Ident(ident("count")),
                Box::new(Expr::Binary(BinaryOp::Add, Box::new(Expr::Ident(ident("count"))), Box::new(Expr::Number(1.0)))),
            )),
            Stmt::Return(Some(Expr::Ident(ident("count")))),
        ],
    ));
    let make_counter = Rc::new(FunctionNode::new(
        Some(ident("makeCounter")),
        vec![],
        vec![
            Stmt::VarDecl(vec![(ident("count"), Some(Expr::Number(0.0)))]),
            Stmt::FunctionDecl(increment.clone()),
            Stmt::Return(Some(Expr::Ident(ident("increment")))),
        ],
    ));
    let program = vec![
        Stmt::FunctionDecl(make_counter),
        Stmt::VarDecl(vec![(
            ident("bump"),
            Some(Expr::Call { callee: Box::new(Expr::Ident(ident("makeCounter"))), args: vec![] }),
        )]),
        Stmt::VarDecl(vec![(
            ident("a"),
            Some(Expr::Call { callee: Box::new(Expr::Ident(ident("bump"))), args: vec![] }),
        )]),
        Stmt::VarDecl(vec![(
            ident("b"),
            Some(Expr::Call { callee: Box::new(Expr::Ident(ident("bump"))), args: vec![] }),
        )]),
        Stmt::Return(Some(Expr::Binary(BinaryOp::Add, Box::new(Expr::Ident(ident("a"))), Box::new(Expr::Ident(ident("b")))))),
    ];
    assert_number(run(program).unwrap(), 3.0);
}

#[test]
fn labeled_break_out_of_a_for_loop_pops_the_with_scope_it_crossed() {
    // outer: for (;;) {
    //   with (o) {    // o.x shadows the outer `x` binding
    //     break outer;
    //   }
    // }
    // return x;
    //
    // If `break outer`'s jump left the `with` scope pushed, this later
    // `resolve` of `x` would incorrectly read `o.x` (5) instead of the
    // real binding (1).
    let with_object = Expr::Object(vec![(Rc::from("x"), Expr::Number(5.0))]);
    let loop_body = Stmt::With { object: with_object, body: Box::new(Stmt::Break(Some(ident("outer")))) };
    let program = vec![
        Stmt::VarDecl(vec![(ident("x"), Some(Expr::Number(1.0)))]),
        Stmt::Labeled(
            ident("outer"),
            Box::new(Stmt::For { init: None, test: None, update: None, body: Box::new(loop_body) }),
        ),
        Stmt::Return(Some(Expr::Ident(ident("x")))),
    ];
    assert_number(run(program).unwrap(), 1.0);
}

#[test]
fn try_catch_recovers_from_a_thrown_value() {
    // try { throw "boom"; } catch (e) { return e; }
    let program = vec![Stmt::Try {
        block: vec![Stmt::Throw(Expr::String(Rc::from("boom")))],
        catch: Some((ident("e"), vec![Stmt::Return(Some(Expr::Ident(ident("e"))))])),
        finally: None,
    }];
    match run(program).unwrap() {
        Value::String(s) => assert!(s.contains("boom"), "expected caught message to mention 'boom', got {s:?}"),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn for_loop_continue_skips_one_iteration_body_but_still_runs_the_update() {
    // var sum = 0;
    // for (var i = 0; i < 5; i = i + 1) {
    //   if (i == 2) { continue; }
    //   sum = sum + i;
    // }
    // return sum; // 0 + 1 + 3 + 4 = 8
    let body = Stmt::Block(vec![
        Stmt::If {
            test: Expr::Binary(BinaryOp::Eq, Box::new(Expr::Ident(ident("i"))), Box::new(Expr::Number(2.0))),
            consequent: Box::new(Stmt::Block(vec![Stmt::Continue(None)])),
            alternate: None,
        },
        Stmt::Expr(Expr::Assign(
            AssignTarget::Ident(ident("sum")),
            Box::new(Expr::Binary(BinaryOp::Add, Box::new(Expr::Ident(ident("sum"))), Box::new(Expr::Ident(ident("i"))))),
        )),
    ]);
    let program = vec![
        Stmt::VarDecl(vec![(ident("sum"), Some(Expr::Number(0.0)))]),
        Stmt::For {
            init: Some(Box::new(Stmt::VarDecl(vec![(ident("i"), Some(Expr::Number(0.0)))]))),
            test: Some(Expr::Binary(BinaryOp::Less, Box::new(Expr::Ident(ident("i"))), Box::new(Expr::Number(5.0)))),
            update: Some(Expr::Assign(
                AssignTarget::Ident(ident("i")),
                Box::new(Expr::Binary(BinaryOp::Add, Box::new(Expr::Ident(ident("i"))), Box::new(Expr::Number(1.0)))),
            )),
            body: Box::new(body),
        },
        Stmt::Return(Some(Expr::Ident(ident("sum")))),
    ];
    assert_number(run(program).unwrap(), 8.0);
}

#[test]
fn postfix_increment_returns_the_old_value_but_still_updates_the_variable() {
    // var x = 5; var old = x++; return old * 100 + x; // 500 + 6 = 506
    let program = vec![
        Stmt::VarDecl(vec![(ident("x"), Some(Expr::Number(5.0)))]),
        Stmt::VarDecl(vec![(
            ident("old"),
            Some(Expr::Update { op: UpdateOp::Increment, prefix: false, target: AssignTarget::Ident(ident("x")) }),
        )]),
        Stmt::Return(Some(Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Binary(BinaryOp::Mul, Box::new(Expr::Ident(ident("old"))), Box::new(Expr::Number(100.0)))),
            Box::new(Expr::Ident(ident("x"))),
        ))),
    ];
    assert_number(run(program).unwrap(), 506.0);
}

#[test]
fn prefix_decrement_returns_the_already_updated_value() {
    // var x = 5; return --x; // 4, and x itself is now 4
    let program = vec![
        Stmt::VarDecl(vec![(ident("x"), Some(Expr::Number(5.0)))]),
        Stmt::Return(Some(Expr::Update {
            op: UpdateOp::Decrement,
            prefix: true,
            target: AssignTarget::Ident(ident("x")),
        })),
    ];
    assert_number(run(program).unwrap(), 4.0);
}

#[test]
fn unsigned_right_shift_treats_a_negative_number_as_unsigned() {
    // return -1 >>> 28; // 0xFFFFFFFF >>> 28 == 15
    let expr = Expr::Binary(BinaryOp::Urshift, Box::new(Expr::Number(-1.0)), Box::new(Expr::Number(28.0)));
    assert_number(run(vec![Stmt::Return(Some(expr))]).unwrap(), 15.0);
}

#[test]
fn for_in_visits_every_enumerable_property_once() {
    // var sum = 0;
    // for (k in {a: 1, b: 2, c: 3}) { sum = sum + o[k]; }
    // return sum; // 6
    let object = Expr::Object(vec![
        (Rc::from("a"), Expr::Number(1.0)),
        (Rc::from("b"), Expr::Number(2.0)),
        (Rc::from("c"), Expr::Number(3.0)),
    ]);
    let body = Stmt::Expr(Expr::Assign(
        AssignTarget::Ident(ident("sum")),
        Box::new(Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Ident(ident("sum"))),
            Box::new(Expr::Member {
                object: Box::new(Expr::Ident(ident("o"))),
                key: MemberKey::Computed(Box::new(Expr::Ident(ident("k")))),
            }),
        )),
    ));
    let program = vec![
        Stmt::VarDecl(vec![(ident("sum"), Some(Expr::Number(0.0)))]),
        Stmt::VarDecl(vec![(ident("o"), Some(object))]),
        Stmt::ForIn { binding: ident("k"), object: Expr::Ident(ident("o")), body: Box::new(body) },
        Stmt::Return(Some(Expr::Ident(ident("sum")))),
    ];
    assert_number(run(program).unwrap(), 6.0);
}

#[test]
fn for_in_over_an_empty_object_never_runs_the_body() {
    let program = vec![
        Stmt::VarDecl(vec![(ident("hits"), Some(Expr::Number(0.0)))]),
        Stmt::ForIn {
            binding: ident("k"),
            object: Expr::Object(vec![]),
            body: Box::new(Stmt::Expr(Expr::Assign(
                AssignTarget::Ident(ident("hits")),
                Box::new(Expr::Number(1.0)),
            ))),
        },
        Stmt::Return(Some(Expr::Ident(ident("hits")))),
    ];
    assert_number(run(program).unwrap(), 0.0);
}
