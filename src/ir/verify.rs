use super::{BlockId, FuncId, Function, InstKind, Module, Terminator, Type, Value};
use crate::error::{Error, ErrorKind, Result};

/// Structural checks on a lowered function. Declarations always pass.
pub fn verify_function(module: &Module, id: FuncId) -> Result<()> {
    let function = module.function(id);
    if function.is_declaration() {
        return Ok(());
    }
    Verifier { module, function }.run()
}

struct Verifier<'a> {
    module: &'a Module,
    function: &'a Function,
}

impl<'a> Verifier<'a> {
    fn fail(&self, message: String) -> Error {
        ErrorKind::Verify {
            function: self.function.name.clone(),
            message,
        }
        .into()
    }

    fn expect_type(&self, value: Value, ty: Type) -> Result<()> {
        match self.function.value_type(value) {
            Some(actual) if actual == ty => Ok(()),
            actual => Err(self.fail(format!(
                "operand {} has type {:?}, expected {:?}",
                self.function.operand(value),
                actual,
                ty
            ))),
        }
    }

    fn run(&self) -> Result<()> {
        let blocks = &self.function.blocks;
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); blocks.len()];

        for (i, block) in blocks.iter().enumerate() {
            if block.overrun {
                return Err(self.fail(format!("block `{}` continues past its terminator", block.name)));
            }
            let terminator = match &block.terminator {
                Some(t) => t,
                None => return Err(self.fail(format!("block `{}` has no terminator", block.name))),
            };
            for target in terminator.successors() {
                if target.0 >= blocks.len() {
                    return Err(self.fail(format!("block `{}` branches to a missing block", block.name)));
                }
                preds[target.0].push(BlockId(i));
            }
        }
        if !preds[0].is_empty() {
            return Err(self.fail("entry block has predecessors".to_owned()));
        }

        for (i, block) in blocks.iter().enumerate() {
            let mut past_phis = false;
            for id in &block.insts {
                let inst = &self.function.insts[id.0];
                match &inst.kind {
                    InstKind::Phi(incoming) => {
                        if past_phis {
                            return Err(self.fail(format!("phi %{} is not at the start of `{}`", inst.name, block.name)));
                        }
                        let mut from: Vec<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
                        let mut expected = preds[i].clone();
                        from.sort();
                        expected.sort();
                        if from != expected {
                            return Err(self.fail(format!(
                                "phi %{} does not match the predecessors of `{}`",
                                inst.name, block.name
                            )));
                        }
                        for (v, _) in incoming {
                            self.expect_type(*v, Type::Number)?;
                        }
                    }
                    kind => {
                        past_phis = true;
                        self.check(kind)?;
                    }
                }
            }

            match &block.terminator {
                Some(Terminator::CondBr(cond, ..)) => self.expect_type(*cond, Type::Bool)?,
                Some(Terminator::Ret(v)) => self.expect_type(*v, Type::Number)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn check(&self, kind: &InstKind) -> Result<()> {
        match kind {
            InstKind::Load(slot) => self.check_slot(slot.0),
            InstKind::Store(slot, v) => {
                self.check_slot(slot.0)?;
                self.expect_type(*v, Type::Number)
            }
            InstKind::Float(_, l, r) | InstKind::Cmp(_, l, r) => {
                self.expect_type(*l, Type::Number)?;
                self.expect_type(*r, Type::Number)
            }
            InstKind::BoolToFloat(v) => self.expect_type(*v, Type::Bool),
            InstKind::Call(callee, args) => {
                let target = match self.module.functions.get(callee.0) {
                    Some(f) if !f.discarded => f,
                    _ => return Err(self.fail("call to a discarded function".to_owned())),
                };
                if target.params.len() != args.len() {
                    return Err(self.fail(format!(
                        "call to @{} passes {} arguments, expected {}",
                        target.name,
                        args.len(),
                        target.params.len()
                    )));
                }
                for arg in args {
                    self.expect_type(*arg, Type::Number)?;
                }
                Ok(())
            }
            InstKind::Phi(_) => Ok(()),
        }
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < self.function.slots.len() {
            Ok(())
        } else {
            Err(self.fail(format!("reference to missing slot #{}", slot)))
        }
    }
}

#[cfg(test)]
mod test {
    use crate::backend::{Backend, Predicate};
    use crate::error::Phase;
    use crate::ir::IrBackend;

    #[test]
    fn test_missing_terminator() {
        let mut b = IrBackend::default();
        let f = b.declare_function("f", &[]);
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let err = b.verify_function(f).unwrap_err();
        assert_eq!(err.phase(), Phase::Verify);
        assert!(err.to_string().contains("has no terminator"));
    }

    #[test]
    fn test_bool_returned() {
        let mut b = IrBackend::default();
        let f = b.declare_function("f", &[]);
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let one = b.constant(1.0);
        let c = b.compare(Predicate::Lt, one, one);
        b.ret(c);
        assert!(b.verify_function(f).is_err());
    }

    #[test]
    fn test_phi_predecessors() {
        let mut b = IrBackend::default();
        let f = b.declare_function("f", &[]);
        let entry = b.append_block(f, "entry");
        let merge = b.append_block(f, "merge");
        b.position_at_end(entry);
        b.br(merge);
        b.position_at_end(merge);
        let one = b.constant(1.0);
        let v = b.phi(&[(one, entry), (one, merge)]);
        b.ret(v);
        assert!(b.verify_function(f).is_err());
    }

    #[test]
    fn test_code_after_terminator() {
        let mut b = IrBackend::default();
        let f = b.declare_function("f", &[]);
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let one = b.constant(1.0);
        b.ret(one);
        b.ret(one);
        assert!(b.verify_function(f).is_err());
    }
}
