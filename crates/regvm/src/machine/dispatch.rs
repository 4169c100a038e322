//! The opcode-by-opcode `match`: spec §4.2's dispatch loop. A plain
//! `match` over a small integer tag, not computed-goto threading — spec
//! §9 sanctions either strategy, and a `match` keeps this file ordinary,
//! safe Rust.

use std::rc::Rc;

use log::trace;

use super::{Machine, PnameEnumerator};
use crate::codegen::ScriptFunction;
use crate::error::{Result, VmError};
use crate::host::Host;
use crate::opcode::Opcode;
use crate::value::{self, Object, Value};

impl<H: Host> Machine<H> {
    /// Executes one instruction. Returns `Ok(Some(value))` when a frame
    /// just returned (the caller, `run`, decides whether that was the
    /// invocation it is driving or an intermediate one); `Ok(None)` for
    /// every other instruction.
    pub(super) fn step(&mut self) -> Result<Option<Value>> {
        let opcode = self.code.instructions().opcode_at(self.vpc);
        self.vpc += 1;
        trace!("vpc={} op={opcode:?}", self.vpc - 1);

        match opcode {
            Opcode::Nop => {
                Ok(None)
            }
            Opcode::Mov => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                self.set_reg(dst, v);
                Ok(None)
            }
            Opcode::LoadConst => {
                let (dst, idx) = self.operands2();
                let v = self.code.constant(idx as u32).clone();
                self.set_reg(dst, v);
                Ok(None)
            }

            Opcode::Add => self.binary_value(|a, b, host| value::add(a, b, host)),
            Opcode::Sub => self.binary_number(|a, b| a - b),
            Opcode::Mul => self.binary_number(|a, b| a * b),
            Opcode::Div => self.binary_number(|a, b| a / b),
            Opcode::Mod => self.binary_number(|a, b| a % b),
            Opcode::BitAnd => self.binary_int32(|a, b| a & b),
            Opcode::BitOr => self.binary_int32(|a, b| a | b),
            Opcode::BitXor => self.binary_int32(|a, b| a ^ b),
            Opcode::Lshift => self.binary_shift(|a, b| a.wrapping_shl(b)),
            Opcode::Rshift => self.binary_shift(|a, b| a.wrapping_shr(b)),
            Opcode::Urshift => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs).to_uint32(&mut self.host)?;
                let b = self.reg(rhs).to_uint32(&mut self.host)? & 0x1f;
                self.set_reg(dst, Value::number(a.wrapping_shr(b) as f64));
                Ok(None)
            }

            Opcode::Negate => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                let n = v.to_number(&mut self.host)?;
                self.set_reg(dst, Value::number(-n));
                Ok(None)
            }
            Opcode::Not => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                self.set_reg(dst, Value::Boolean(!v.to_boolean()));
                Ok(None)
            }
            Opcode::BitNot => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                let n = v.to_int32(&mut self.host)?;
                self.set_reg(dst, Value::number(!n as f64));
                Ok(None)
            }
            Opcode::ToNumber => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                let n = v.to_number(&mut self.host)?;
                self.set_reg(dst, Value::number(n));
                Ok(None)
            }
            Opcode::Typeof => {
                let (dst, src) = self.operands2();
                let v = self.reg(src);
                let name = match v {
                    Value::Undefined => "undefined",
                    Value::Null => "object",
                    Value::Boolean(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Object(ref o) if o.is_callable() => "function",
                    Value::Object(_) => "object",
                };
                self.set_reg(dst, Value::string(name));
                Ok(None)
            }

            Opcode::Less => self.compare(|ord| ord == Some(std::cmp::Ordering::Less)),
            Opcode::LessEq => self.compare(|ord| matches!(ord, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))),
            Opcode::Eq => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                let eq = value::abstract_equals(&a, &b, &mut self.host)?;
                self.set_reg(dst, Value::Boolean(eq));
                Ok(None)
            }
            Opcode::NotEq => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                let eq = value::abstract_equals(&a, &b, &mut self.host)?;
                self.set_reg(dst, Value::Boolean(!eq));
                Ok(None)
            }
            Opcode::StrictEq => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                self.set_reg(dst, Value::Boolean(value::strict_equals(&a, &b)));
                Ok(None)
            }
            Opcode::NotStrictEq => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                self.set_reg(dst, Value::Boolean(!value::strict_equals(&a, &b)));
                Ok(None)
            }
            Opcode::InstanceOf => {
                let (dst, lhs, rhs) = self.operands3();
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                let ctor = b.as_object().ok_or_else(|| VmError::ty("right-hand side of 'instanceof' is not an object"))?.clone();
                let result = ctor.has_instance(&mut self.host, &a)?;
                self.set_reg(dst, Value::Boolean(result));
                Ok(None)
            }
            Opcode::In => {
                let (dst, lhs, rhs) = self.operands3();
                let key = self.reg(lhs);
                let obj = self.reg(rhs);
                let object = obj.as_object().ok_or_else(|| VmError::ty("'in' requires an object right-hand side"))?.clone();
                let key = key.to_vm_string(&mut self.host)?;
                let present = !matches!(object.get(&mut self.host, &key)?, Value::Undefined);
                self.set_reg(dst, Value::Boolean(present));
                Ok(None)
            }

            Opcode::GetById => {
                let (dst, base, id_idx) = self.operands3();
                let base_value = self.reg(base);
                let name = self.code.identifier(id_idx as u32).clone();
                let object = base_value.to_object(&mut self.host)?;
                let object = object.as_object().expect("to_object always yields Value::Object");
                let value = object.get(&mut self.host, &name)?;
                self.set_reg(dst, value);
                Ok(None)
            }
            Opcode::PutById => {
                let (base, id_idx, src) = self.operands3();
                let base_value = self.reg(base);
                let name = self.code.identifier(id_idx as u32).clone();
                let value = self.reg(src);
                let object = base_value.to_object(&mut self.host)?;
                let object = object.as_object().expect("to_object always yields Value::Object");
                object.put(&mut self.host, &name, value)?;
                Ok(None)
            }
            Opcode::GetByVal => {
                let (dst, base, key_reg) = self.operands3();
                let base_value = self.reg(base);
                let key = self.reg(key_reg).to_vm_string(&mut self.host)?;
                let object = base_value.to_object(&mut self.host)?;
                let object = object.as_object().expect("to_object always yields Value::Object");
                let value = object.get(&mut self.host, &key)?;
                self.set_reg(dst, value);
                Ok(None)
            }
            Opcode::PutByVal => {
                let (base, key_reg, src) = self.operands3();
                let base_value = self.reg(base);
                let key = self.reg(key_reg).to_vm_string(&mut self.host)?;
                let value = self.reg(src);
                let object = base_value.to_object(&mut self.host)?;
                let object = object.as_object().expect("to_object always yields Value::Object");
                object.put(&mut self.host, &key, value)?;
                Ok(None)
            }

            Opcode::Resolve => {
                let (dst, id_idx) = self.operands2();
                let name = self.code.identifier(id_idx as u32).clone();
                let value = self.resolve(&name)?;
                self.set_reg(dst, value);
                Ok(None)
            }
            Opcode::ResolveBase => {
                let (dst, id_idx) = self.operands2();
                let name = self.code.identifier(id_idx as u32).clone();
                let base = self.resolve_base(&name);
                self.set_reg(dst, base);
                Ok(None)
            }
            Opcode::GetScopedVar => {
                let (dst, id_idx) = self.operands2();
                let name = self.code.identifier(id_idx as u32).clone();
                let value = self.resolve(&name)?;
                self.set_reg(dst, value);
                Ok(None)
            }
            Opcode::PutScopedVar => {
                let (id_idx, src) = self.operands2();
                let name = self.code.identifier(id_idx as u32).clone();
                let value = self.reg(src);
                let base = self.resolve_base(&name);
                let object = base.as_object().expect("resolve_base always yields an object");
                object.put(&mut self.host, &name, value)?;
                Ok(None)
            }

            Opcode::PushScope | Opcode::PushNewScope => {
                let reg = self.operand1();
                let scope_value = self.reg(reg);
                self.scope = self.scope.push(scope_value);
                Ok(None)
            }
            Opcode::PopScope => {
                self.scope = self.scope.pop().unwrap_or_else(crate::scope_chain::ScopeChain::empty);
                Ok(None)
            }

            Opcode::GetPnames => {
                let (iter, object) = self.operands2();
                let object_value = self.reg(object);
                let names = self.host.property_names(&object_value)?;
                let handle = self.enumerators.len();
                self.enumerators.push(PnameEnumerator { names, cursor: 0 });
                self.set_reg(iter, Value::number(handle as f64));
                Ok(None)
            }
            Opcode::NextPname => {
                let (dst, iter, target) = self.operands3();
                let handle = self.reg(iter).to_uint32(&mut self.host)? as usize;
                let enumerator = &mut self.enumerators[handle];
                match enumerator.names.get(enumerator.cursor).cloned() {
                    Some(name) => {
                        enumerator.cursor += 1;
                        self.set_reg(dst, Value::string(name));
                    }
                    None => self.vpc = target as u32,
                }
                Ok(None)
            }

            Opcode::NewObject => {
                let (dst, _unused) = self.operands2();
                let v = self.host.new_plain_object()?;
                self.set_reg(dst, v);
                Ok(None)
            }
            Opcode::NewArray => {
                let (dst, base, count) = self.operands3();
                let elements = self.registers.slice(self.absolute_register(base), count as u32);
                let v = self.host.new_array(elements)?;
                self.set_reg(dst, v);
                Ok(None)
            }
            Opcode::NewFunc => {
                let (dst, fn_idx) = self.operands2();
                let code = self.code.function(fn_idx as u32).clone();
                let func = ScriptFunction::new(code, self.scope.clone());
                self.set_reg(dst, Value::Object(Rc::new(func)));
                Ok(None)
            }
            Opcode::NewFuncExp => {
                let (dst, fn_idx) = self.operands2();
                let code = self.code.function_expression(fn_idx as u32).clone();
                let func = ScriptFunction::new(code, self.scope.clone());
                self.set_reg(dst, Value::Object(Rc::new(func)));
                Ok(None)
            }

            Opcode::Jmp => {
                let target = self.operand1() as u32;
                self.vpc = target;
                Ok(None)
            }
            Opcode::Jtrue => {
                let (cond, target) = self.operands2();
                if self.reg(cond).to_boolean() {
                    self.vpc = target as u32;
                }
                Ok(None)
            }
            Opcode::Jfalse => {
                let (cond, target) = self.operands2();
                if !self.reg(cond).to_boolean() {
                    self.vpc = target as u32;
                }
                Ok(None)
            }
            Opcode::JeqNull => {
                let (reg, target) = self.operands2();
                if self.reg(reg).is_undefined_or_null() {
                    self.vpc = target as u32;
                }
                Ok(None)
            }
            Opcode::JneqNull => {
                let (reg, target) = self.operands2();
                if !self.reg(reg).is_undefined_or_null() {
                    self.vpc = target as u32;
                }
                Ok(None)
            }
            Opcode::JmpScopes => {
                let (delta, target) = self.operands2();
                for _ in 0..delta {
                    self.scope = self.scope.pop().unwrap_or_else(crate::scope_chain::ScopeChain::empty);
                }
                self.vpc = target as u32;
                Ok(None)
            }

            Opcode::Call | Opcode::Construct => {
                let (dst, callee, argv_base, argc) = self.operands4();
                let callee_value = self.reg(callee);
                let argv_base_abs = self.absolute_register(argv_base);
                let this_value = self.registers.get(argv_base_abs);
                let dest_abs = self.absolute_register(dst);
                let return_vpc = self.vpc;
                match self.invoke(&callee_value, this_value, argv_base_abs, argc as u32, dest_abs, return_vpc, opcode == Opcode::Construct)? {
                    Some(result) => {
                        self.set_reg(dst, result);
                        Ok(None)
                    }
                    None => Ok(None), // a new frame was entered; vpc/r/code/scope already switched
                }
            }
            Opcode::CallEval => {
                // Re-entrant `eval` from inside a running frame would
                // need `self.host` borrowed out to the `Executor` at the
                // same time `self` (the `Executor`) needs it back, which
                // the current single-owner `Machine<H>` layout cannot
                // express safely. Supporting it needs `host` to live
                // outside `Machine` (e.g. behind its own `RefCell`)
                // instead of as a plain field.
                let _ = self.operands4();
                Err(VmError::syntax("eval is not supported from within running bytecode in this build"))
            }

            Opcode::Ret => {
                let src = self.operand1();
                let value = self.reg(src);
                Ok(Some(self.pop_frame_on_return(value)))
            }
            Opcode::End => Ok(Some(self.pop_frame_on_return(Value::Undefined))),
            Opcode::Enter => {
                let eager = self.operand1() != 0;
                if eager {
                    let activation = self.materialize_activation();
                    self.scope = self.scope.push(Value::Object(Rc::new(activation)));
                }
                Ok(None)
            }
            Opcode::CreateArguments => {
                let dst = self.operand1();
                let args = self.current_original_args();
                let v = self.host.new_array(args)?;
                self.set_reg(dst, v);
                Ok(None)
            }
            Opcode::ConvertThis => {
                let dst = self.operand1();
                let this_abs = self.this_slot_abs();
                let current = self.registers.get(this_abs);
                let converted = if current.is_undefined_or_null() {
                    self.host.global_object()
                } else if current.is_object() {
                    current
                } else {
                    self.host.wrap_primitive(current)?
                };
                self.registers.set(this_abs, converted.clone());
                self.set_reg(dst, converted);
                Ok(None)
            }

            Opcode::Throw => {
                let src = self.operand1();
                let value = self.reg(src);
                let message = value.to_vm_string(&mut self.host).unwrap_or_else(|_| Rc::from("uncaught exception"));
                Err(VmError::ty(message.to_string()))
            }

            Opcode::DebugHook => {
                let _hook_id = self.operand1();
                Ok(None)
            }
        }
    }

    // `Object::get` can't distinguish "declared but undefined" from "not
    // present", so a chain of scopes that all happen to hold `undefined`
    // for `name` falls through to the global object, same as a genuine
    // miss. A real object model would expose a `has` query to tell them
    // apart.
    fn resolve(&mut self, name: &str) -> Result<Value> {
        for scope in self.scope.iter() {
            if let Some(object) = scope.as_object() {
                let value = object.get(&mut self.host, name)?;
                if !matches!(value, Value::Undefined) {
                    return Ok(value);
                }
            }
        }
        let global = self.host.global_object();
        match global.as_object() {
            Some(object) => object.get(&mut self.host, name),
            None => Err(VmError::reference(name)),
        }
    }

    fn resolve_base(&mut self, name: &str) -> Value {
        for scope in self.scope.iter() {
            if let Some(object) = scope.as_object() {
                if let Ok(value) = object.get(&mut self.host, name) {
                    if !matches!(value, Value::Undefined) {
                        return scope.clone();
                    }
                }
            }
        }
        self.host.global_object()
    }

    fn reg(&self, relative: i32) -> Value {
        self.registers.get(self.absolute_register(relative))
    }

    fn set_reg(&mut self, relative: i32, value: Value) {
        let abs = self.absolute_register(relative);
        self.registers.set(abs, value);
    }

    fn operand1(&mut self) -> i32 {
        let w = self.code.instructions().word_at(self.vpc);
        self.vpc += 1;
        w
    }

    fn operands2(&mut self) -> (i32, i32) {
        (self.operand1(), self.operand1())
    }

    fn operands3(&mut self) -> (i32, i32, i32) {
        (self.operand1(), self.operand1(), self.operand1())
    }

    fn operands4(&mut self) -> (i32, i32, i32, i32) {
        (self.operand1(), self.operand1(), self.operand1(), self.operand1())
    }

    fn binary_value(&mut self, f: impl FnOnce(&Value, &Value, &mut dyn Host) -> Result<Value>) -> Result<Option<Value>> {
        let (dst, lhs, rhs) = self.operands3();
        let a = self.reg(lhs);
        let b = self.reg(rhs);
        let v = f(&a, &b, &mut self.host)?;
        self.set_reg(dst, v);
        Ok(None)
    }

    fn binary_number(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<Option<Value>> {
        let (dst, lhs, rhs) = self.operands3();
        let a = self.reg(lhs).to_number(&mut self.host)?;
        let b = self.reg(rhs).to_number(&mut self.host)?;
        self.set_reg(dst, Value::number(f(a, b)));
        Ok(None)
    }

    fn binary_int32(&mut self, f: impl FnOnce(i32, i32) -> i32) -> Result<Option<Value>> {
        let (dst, lhs, rhs) = self.operands3();
        let a = self.reg(lhs).to_int32(&mut self.host)?;
        let b = self.reg(rhs).to_int32(&mut self.host)?;
        self.set_reg(dst, Value::number(f(a, b) as f64));
        Ok(None)
    }

    fn binary_shift(&mut self, f: impl FnOnce(i32, u32) -> i32) -> Result<Option<Value>> {
        let (dst, lhs, rhs) = self.operands3();
        let a = self.reg(lhs).to_int32(&mut self.host)?;
        let b = self.reg(rhs).to_uint32(&mut self.host)? & 0x1f;
        self.set_reg(dst, Value::number(f(a, b) as f64));
        Ok(None)
    }

    fn compare(&mut self, accept: impl FnOnce(Option<std::cmp::Ordering>) -> bool) -> Result<Option<Value>> {
        let (dst, lhs, rhs) = self.operands3();
        let a = self.reg(lhs);
        let b = self.reg(rhs);
        let ord = value::less_than(&a, &b, &mut self.host)?;
        self.set_reg(dst, Value::Boolean(accept(ord)));
        Ok(None)
    }
}
