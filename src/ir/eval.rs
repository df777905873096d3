use super::{BlockId, FuncId, Function, InstKind, IrBackend, Module, Terminator, Value};
use crate::backend::{Execute, FloatOp, Predicate};
use crate::error::{Error, ErrorKind, Result};
use log::trace;
use std::collections::HashMap;

/// Host implementation of an `extern` function.
pub type Native = Box<dyn Fn(&[f64]) -> f64>;

impl Execute for IrBackend {
    fn execute(&mut self, function: FuncId) -> Result<f64> {
        let target = self.module.function(function);
        if target.is_declaration() {
            return Err(ErrorKind::NotExecutable(target.name.clone()).into());
        }
        let mut machine = Machine {
            module: &self.module,
            natives: &self.natives,
            max_steps: self.max_steps,
            max_call_depth: self.max_call_depth,
            steps: 0,
        };
        let result = machine.call(function, &[], 0);
        trace!("executed `{}` in {} steps", self.module.function(function).name, machine.steps);
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Val {
    Num(f64),
    Bool(bool),
}

struct Machine<'a> {
    module: &'a Module,
    natives: &'a HashMap<String, Native>,
    max_steps: u64,
    max_call_depth: usize,
    steps: u64,
}

struct Frame<'f> {
    function: &'f Function,
    args: &'f [f64],
    slots: Vec<f64>,
    values: Vec<Option<Val>>,
}

impl<'f> Frame<'f> {
    fn fault(&self, message: String) -> Error {
        ErrorKind::Verify {
            function: self.function.name.clone(),
            message,
        }
        .into()
    }

    fn get(&self, value: Value) -> Result<Val> {
        let v = match value {
            Value::Const(n) => Some(Val::Num(n)),
            Value::Param(i) => self.args.get(i).map(|n| Val::Num(*n)),
            Value::Inst(id) => self.values.get(id.0).copied().flatten(),
        };
        v.ok_or_else(|| self.fault(format!("use of undefined value {}", self.function.operand(value))))
    }

    fn number(&self, value: Value) -> Result<f64> {
        match self.get(value)? {
            Val::Num(n) => Ok(n),
            Val::Bool(_) => Err(self.fault(format!("{} is not a number", self.function.operand(value)))),
        }
    }

    fn boolean(&self, value: Value) -> Result<bool> {
        match self.get(value)? {
            Val::Bool(b) => Ok(b),
            Val::Num(_) => Err(self.fault(format!("{} is not a boolean", self.function.operand(value)))),
        }
    }
}

impl<'a> Machine<'a> {
    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ErrorKind::StepLimit(self.max_steps).into());
        }
        Ok(())
    }

    fn call(&mut self, id: FuncId, args: &[f64], depth: usize) -> Result<f64> {
        let module = self.module;
        let function = module.function(id);

        if function.is_declaration() {
            return match self.natives.get(&function.name) {
                Some(native) if !function.discarded => Ok(native(args)),
                _ => Err(ErrorKind::MissingNative(function.name.clone()).into()),
            };
        }
        if depth >= self.max_call_depth {
            return Err(ErrorKind::CallDepth(self.max_call_depth).into());
        }

        let mut frame = Frame {
            function,
            args,
            slots: vec![0.0; function.slots.len()],
            values: vec![None; function.insts.len()],
        };
        let mut current = BlockId(0);
        let mut previous: Option<BlockId> = None;

        loop {
            let block = &function.blocks[current.0];
            for id in &block.insts {
                self.tick()?;
                let result = match &function.insts[id.0].kind {
                    InstKind::Load(slot) => Some(Val::Num(frame.slots[slot.0])),
                    InstKind::Store(slot, v) => {
                        frame.slots[slot.0] = frame.number(*v)?;
                        None
                    }
                    InstKind::Float(op, l, r) => {
                        let (l, r) = (frame.number(*l)?, frame.number(*r)?);
                        Some(Val::Num(match op {
                            FloatOp::Add => l + r,
                            FloatOp::Sub => l - r,
                            FloatOp::Mul => l * r,
                        }))
                    }
                    InstKind::Cmp(predicate, l, r) => {
                        let (l, r) = (frame.number(*l)?, frame.number(*r)?);
                        Some(Val::Bool(match predicate {
                            Predicate::Lt => !(l >= r),
                            Predicate::Ne => l < r || l > r,
                        }))
                    }
                    InstKind::BoolToFloat(v) => {
                        Some(Val::Num(if frame.boolean(*v)? { 1.0 } else { 0.0 }))
                    }
                    InstKind::Call(callee, call_args) => {
                        let mut actual = Vec::with_capacity(call_args.len());
                        for arg in call_args {
                            actual.push(frame.number(*arg)?);
                        }
                        Some(Val::Num(self.call(*callee, &actual, depth + 1)?))
                    }
                    InstKind::Phi(incoming) => {
                        let taken = incoming.iter().find(|(_, from)| Some(*from) == previous);
                        match taken {
                            Some((v, _)) => Some(Val::Num(frame.number(*v)?)),
                            None => {
                                return Err(frame.fault(format!(
                                    "phi in `{}` has no value for the incoming edge",
                                    block.name
                                )))
                            }
                        }
                    }
                };
                frame.values[id.0] = result;
            }

            self.tick()?;
            match &block.terminator {
                Some(Terminator::Br(target)) => {
                    previous = Some(current);
                    current = *target;
                }
                Some(Terminator::CondBr(cond, then, otherwise)) => {
                    previous = Some(current);
                    current = if frame.boolean(*cond)? { *then } else { *otherwise };
                }
                Some(Terminator::Ret(v)) => return frame.number(*v),
                None => return Err(frame.fault(format!("block `{}` has no terminator", block.name))),
            }
        }
    }
}
