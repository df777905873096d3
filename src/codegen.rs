use super::ast::{Expr, Function, Prototype};
use super::backend::{Backend, FloatOp, Predicate};
use super::error::{ErrorKind, Result};
use super::operators::OperatorTable;
use super::scope::Scope;
use log::debug;
use std::collections::HashMap;

/// Lowers AST items into a [`Backend`].
///
/// `protos` is the registry of every prototype seen so far; a callee that the
/// backend does not know yet is declared from it on demand.
pub struct CodeGen<'a, B: Backend> {
    backend: &'a mut B,
    protos: &'a mut HashMap<String, Prototype>,
    operators: &'a mut OperatorTable,
    scope: Scope<B::Slot>,
    verify: bool,
}

impl<'a, B: Backend> CodeGen<'a, B> {
    pub fn new(
        backend: &'a mut B,
        protos: &'a mut HashMap<String, Prototype>,
        operators: &'a mut OperatorTable,
    ) -> CodeGen<'a, B> {
        CodeGen {
            backend,
            protos,
            operators,
            scope: Scope::new(),
            verify: true,
        }
    }

    pub fn verify(mut self, verify: bool) -> CodeGen<'a, B> {
        self.verify = verify;
        self
    }

    fn get_function(&mut self, name: &str) -> Option<B::Function> {
        if let Some(f) = self.backend.get_function(name) {
            return Some(f);
        }
        let proto = self.protos.get(name)?;
        Some(self.backend.declare_function(&proto.name, &proto.params))
    }

    fn codegen_proto(&mut self, proto: &Prototype) -> Result<B::Function> {
        match self.get_function(&proto.name) {
            Some(f) => {
                let expected = self.backend.arity(f);
                if expected != proto.params.len() {
                    return Err(ErrorKind::SignatureMismatch {
                        name: proto.name.clone(),
                        expected,
                        found: proto.params.len(),
                    }
                    .into());
                }
                Ok(f)
            }
            None => Ok(self.backend.declare_function(&proto.name, &proto.params)),
        }
    }

    pub fn codegen_extern(&mut self, proto: Prototype) -> Result<B::Function> {
        let f = self.codegen_proto(&proto)?;
        self.protos.insert(proto.name.clone(), proto);
        Ok(f)
    }

    /// Lowers a definition. A binary operator's precedence is installed for
    /// the duration and rolled back on every failure, including the ones
    /// raised before the body is looked at.
    pub fn codegen_func(&mut self, func: &Function) -> Result<B::Function> {
        let operator = func.proto.binary_operator();
        if let Some((op, precedence)) = operator {
            if self.operators.precedence(op) != Some(precedence) {
                self.operators.define(op, precedence);
            }
        }

        let result = self.define_function(func);
        if result.is_err() {
            if let Some((op, _)) = operator {
                self.operators.rollback(op);
            }
        }
        result
    }

    fn define_function(&mut self, func: &Function) -> Result<B::Function> {
        let proto = &func.proto;
        let fresh = self.get_function(&proto.name).is_none();
        let function = self.codegen_proto(proto)?;
        if self.backend.has_body(function) {
            return Err(ErrorKind::Redefinition(proto.name.clone()).into());
        }

        // Registered before the body so it can call itself.
        let previous = self.protos.insert(proto.name.clone(), proto.clone());

        match self.codegen_body(function, func) {
            Ok(()) => {
                debug!("lowered function `{}`", proto.name);
                Ok(function)
            }
            Err(e) => {
                self.backend.discard_function(function, !fresh);
                match previous {
                    Some(p) => {
                        self.protos.insert(proto.name.clone(), p);
                    }
                    None => {
                        self.protos.remove(&proto.name);
                    }
                }
                Err(e)
            }
        }
    }

    fn codegen_body(&mut self, function: B::Function, func: &Function) -> Result<()> {
        let entry = self.backend.append_block(function, "entry");
        self.backend.position_at_end(entry);

        self.scope = Scope::new();
        for (i, name) in func.proto.params.iter().enumerate() {
            let slot = self.backend.entry_slot(function, name);
            let arg = self.backend.param(function, i);
            self.backend.store(slot, arg);
            self.scope.bind(name, slot);
        }

        let ret = self.codegen_expr(function, &func.body)?;
        self.backend.ret(ret);

        if self.verify {
            self.backend.verify_function(function)?;
        }
        Ok(())
    }

    fn codegen_expr(&mut self, function: B::Function, e: &Expr) -> Result<B::Value> {
        match e {
            Expr::Number(n) => Ok(self.backend.constant(*n)),
            Expr::Variable(name) => {
                let slot = self
                    .scope
                    .lookup(name)
                    .ok_or_else(|| ErrorKind::UnknownVariable(name.clone()))?;
                Ok(self.backend.load(slot, name))
            }
            Expr::Unary(op, operand) => {
                let v = self.codegen_expr(function, operand)?;
                let f = self
                    .get_function(&format!("unary{}", op))
                    .ok_or(ErrorKind::UnknownUnaryOperator(*op))?;
                Ok(self.backend.call(f, &[v]))
            }
            Expr::Binary('=', lhs, rhs) => {
                let name = match lhs.as_ref() {
                    Expr::Variable(name) => name,
                    _ => return Err(ErrorKind::AssignDestination.into()),
                };
                let value = self.codegen_expr(function, rhs)?;
                let slot = self
                    .scope
                    .lookup(name)
                    .ok_or_else(|| ErrorKind::UnknownVariable(name.clone()))?;
                self.backend.store(slot, value);
                Ok(value)
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.codegen_expr(function, lhs)?;
                let r = self.codegen_expr(function, rhs)?;
                match op {
                    '+' => Ok(self.backend.float_op(FloatOp::Add, l, r)),
                    '-' => Ok(self.backend.float_op(FloatOp::Sub, l, r)),
                    '*' => Ok(self.backend.float_op(FloatOp::Mul, l, r)),
                    '<' => {
                        let cmp = self.backend.compare(Predicate::Lt, l, r);
                        Ok(self.backend.bool_to_float(cmp))
                    }
                    _ => {
                        // The parser only accepts operators from the table,
                        // so a missing function means the two disagree.
                        let f = self
                            .get_function(&format!("binary{}", op))
                            .ok_or(ErrorKind::UnknownBinaryOperator(*op))?;
                        Ok(self.backend.call(f, &[l, r]))
                    }
                }
            }
            Expr::Call(callee, args) => {
                let f = self
                    .get_function(callee)
                    .ok_or_else(|| ErrorKind::UnknownFunction(callee.clone()))?;
                let expected = self.backend.arity(f);
                if expected != args.len() {
                    return Err(ErrorKind::ArgumentCount {
                        callee: callee.clone(),
                        expected,
                        found: args.len(),
                    }
                    .into());
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.codegen_expr(function, arg)?);
                }
                Ok(self.backend.call(f, &values))
            }
            Expr::If(cond, then, otherwise) => self.codegen_if(function, cond, then, otherwise),
            Expr::For(var, start, end, step, body) => {
                self.codegen_for(function, var, start, end, step.as_deref(), body)
            }
            Expr::Var(vars, body) => {
                let mark = self.scope.mark();
                let result = self.codegen_var(function, vars, body);
                self.scope.restore(mark);
                result
            }
        }
    }

    fn codegen_if(
        &mut self,
        function: B::Function,
        cond: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> Result<B::Value> {
        let cond = self.codegen_expr(function, cond)?;
        let zero = self.backend.constant(0.0);
        let cond = self.backend.compare(Predicate::Ne, cond, zero);

        let then_bb = self.backend.append_block(function, "then");
        let else_bb = self.backend.append_block(function, "else");
        let merge_bb = self.backend.append_block(function, "ifcont");
        self.backend.cond_br(cond, then_bb, else_bb);

        self.backend.position_at_end(then_bb);
        let then_v = self.codegen_expr(function, then)?;
        self.backend.br(merge_bb);
        // Lowering the branch may have moved us to another block.
        let then_end = self.backend.insert_block();

        self.backend.position_at_end(else_bb);
        let else_v = self.codegen_expr(function, otherwise)?;
        self.backend.br(merge_bb);
        let else_end = self.backend.insert_block();

        self.backend.position_at_end(merge_bb);
        Ok(self.backend.phi(&[(then_v, then_end), (else_v, else_end)]))
    }

    // entry:
    //   start = startexpr
    //   store start -> var
    //   br loop
    // loop:
    //   bodyexpr
    //   var = var + step
    //   endcond = endexpr
    //   br endcond, loop, afterloop
    // afterloop:
    fn codegen_for(
        &mut self,
        function: B::Function,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<B::Value> {
        let slot = self.backend.entry_slot(function, var);
        let start = self.codegen_expr(function, start)?;
        self.backend.store(slot, start);

        let loop_bb = self.backend.append_block(function, "loop");
        self.backend.br(loop_bb);
        self.backend.position_at_end(loop_bb);

        let mark = self.scope.mark();
        self.scope.bind(var, slot);
        let result = self.codegen_loop(function, slot, var, end, step, body, loop_bb);
        self.scope.restore(mark);
        result?;

        Ok(self.backend.constant(0.0))
    }

    #[allow(clippy::too_many_arguments)]
    fn codegen_loop(
        &mut self,
        function: B::Function,
        slot: B::Slot,
        var: &str,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
        loop_bb: B::Block,
    ) -> Result<()> {
        self.codegen_expr(function, body)?;

        let step = match step {
            Some(step) => self.codegen_expr(function, step)?,
            None => self.backend.constant(1.0),
        };
        // Reload: the body may have assigned to the variable.
        let current = self.backend.load(slot, var);
        let next = self.backend.float_op(FloatOp::Add, current, step);
        self.backend.store(slot, next);

        let end = self.codegen_expr(function, end)?;
        let zero = self.backend.constant(0.0);
        let end = self.backend.compare(Predicate::Ne, end, zero);

        let after_bb = self.backend.append_block(function, "afterloop");
        self.backend.cond_br(end, loop_bb, after_bb);
        self.backend.position_at_end(after_bb);
        Ok(())
    }

    fn codegen_var(
        &mut self,
        function: B::Function,
        vars: &[(String, Option<Expr>)],
        body: &Expr,
    ) -> Result<B::Value> {
        for (name, init) in vars {
            // Evaluated before `name` is bound, so `var a = a` sees the outer `a`.
            let value = match init {
                Some(init) => self.codegen_expr(function, init)?,
                None => self.backend.constant(0.0),
            };
            let slot = self.backend.entry_slot(function, name);
            self.backend.store(slot, value);
            self.scope.bind(name, slot);
        }
        self.codegen_expr(function, body)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Execute;
    use crate::error::Phase;
    use crate::ir::IrBackend;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn function(body: Expr) -> Function {
        Function {
            proto: Prototype::anonymous(),
            body,
        }
    }

    fn parse(src: &str) -> Expr {
        let mut ops = OperatorTable::default();
        Parser::new(tokenize(src).unwrap(), &mut ops)
            .parse_expression()
            .unwrap()
    }

    fn eval(src: &str) -> Result<f64> {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let f = CodeGen::new(&mut backend, &mut protos, &mut ops).codegen_func(&function(parse(src)))?;
        backend.execute(f)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("1 * 2 + 3").unwrap(), 5.0);
        assert_eq!(eval("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(eval("2 < 3").unwrap(), 1.0);
        assert_eq!(eval("3 < 2").unwrap(), 0.0);
    }

    #[test]
    fn test_if() {
        assert_eq!(eval("if 0 then 1 else 2").unwrap(), 2.0);
        assert_eq!(eval("if 1 then 1 else 2").unwrap(), 1.0);
        assert_eq!(eval("if 0.5 then 1 else 2").unwrap(), 1.0);
        assert_eq!(eval("if 1 then if 0 then 3 else 4 else 5").unwrap(), 4.0);
    }

    #[test]
    fn test_for_yields_zero() {
        assert_eq!(eval("for i = 1, i < 3, 1.0 in i").unwrap(), 0.0);
        assert_eq!(eval("for i = 1, i < 3 in 42").unwrap(), 0.0);
    }

    #[test]
    fn test_for_iterations() {
        assert_eq!(
            eval("var n = 0 in (for i = 1, i < 3, 1.0 in n = n + 1) + n").unwrap(),
            2.0
        );
        // Default step of one.
        assert_eq!(eval("var s = 0 in (for i = 0, i < 5 in s = s + i) + s").unwrap(), 10.0);
    }

    #[test]
    fn test_var_reads_outer_binding() {
        assert_eq!(eval("var a = 1 in var a = a in a").unwrap(), 1.0);
        assert_eq!(eval("var a = 1, b = a + 1 in b").unwrap(), 2.0);
        assert_eq!(eval("var a in a").unwrap(), 0.0);
    }

    #[test]
    fn test_shadow_restored_after_var() {
        assert_eq!(eval("var a = 1 in (var a = 5 in a) + a").unwrap(), 6.0);
        let err = eval("(var b = 1 in b) + b").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownVariable("b".to_owned()));
    }

    #[test]
    fn test_shadow_restored_after_for() {
        assert_eq!(eval("var i = 7 in (for i = 0, i < 2 in i) + i").unwrap(), 7.0);
        let err = eval("(for j = 0, j < 2 in j) + j").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownVariable("j".to_owned()));
    }

    #[test]
    fn test_assignment() {
        assert_eq!(eval("var x = 1 in (x = x + 4) * x").unwrap(), 25.0);
        let err = eval("1 = 2").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AssignDestination);
        assert_eq!(err.to_string(), "destination of '=' must be a variable");
        let err = eval("y = 2").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownVariable("y".to_owned()));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(
            eval("x").unwrap_err().kind(),
            &ErrorKind::UnknownVariable("x".to_owned())
        );
        assert_eq!(
            eval("!1").unwrap_err().kind(),
            &ErrorKind::UnknownUnaryOperator('!')
        );
        assert_eq!(
            eval("nope(1)").unwrap_err().kind(),
            &ErrorKind::UnknownFunction("nope".to_owned())
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let mut codegen = CodeGen::new(&mut backend, &mut protos, &mut ops);
        codegen
            .codegen_extern(Prototype::new("foo", vec!["a".to_owned()]))
            .unwrap();
        let err = codegen
            .codegen_func(&function(parse("foo(1, 2)")))
            .unwrap_err();
        assert_eq!(err.phase(), Phase::Lower);
        assert_eq!(
            err.kind(),
            &ErrorKind::ArgumentCount {
                callee: "foo".to_owned(),
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_failed_function_is_discarded() {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let proto = Prototype::binary('>', 10, "a", "b");
        ops.define('>', 10);

        let bad = Function {
            proto: proto.clone(),
            body: parse("a < c"),
        };
        let mut codegen = CodeGen::new(&mut backend, &mut protos, &mut ops);
        assert!(codegen.codegen_func(&bad).is_err());
        drop(codegen);

        assert!(!ops.contains('>'));
        assert!(protos.get("binary>").is_none());
        assert_eq!(backend.get_function("binary>"), None);

        let good = Function {
            proto,
            body: parse("b < a"),
        };
        let mut codegen = CodeGen::new(&mut backend, &mut protos, &mut ops);
        assert!(codegen.codegen_func(&good).is_ok());
        drop(codegen);
        assert_eq!(ops.precedence('>'), Some(10));
    }

    #[test]
    fn test_failed_definition_keeps_extern() {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let mut codegen = CodeGen::new(&mut backend, &mut protos, &mut ops);
        let declared = codegen
            .codegen_extern(Prototype::new("f", vec!["x".to_owned()]))
            .unwrap();
        let bad = Function {
            proto: Prototype::new("f", vec!["x".to_owned()]),
            body: parse("y"),
        };
        assert!(codegen.codegen_func(&bad).is_err());
        drop(codegen);

        assert_eq!(backend.get_function("f"), Some(declared));
        assert!(!backend.has_body(declared));
        assert!(protos.contains_key("f"));
    }

    #[test]
    fn test_redefinition() {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let mut codegen = CodeGen::new(&mut backend, &mut protos, &mut ops);
        let f = Function {
            proto: Prototype::new("f", vec![]),
            body: Expr::Number(1.0),
        };
        codegen.codegen_func(&f).unwrap();
        assert_eq!(
            codegen.codegen_func(&f).unwrap_err().kind(),
            &ErrorKind::Redefinition("f".to_owned())
        );
    }

    #[test]
    fn test_if_lowers_to_phi() {
        let mut backend = IrBackend::default();
        let mut protos = HashMap::new();
        let mut ops = OperatorTable::default();
        let f = CodeGen::new(&mut backend, &mut protos, &mut ops)
            .codegen_func(&function(parse("if 1 then 2 else 3")))
            .unwrap();
        let ir = backend.print_function(f);
        assert!(ir.contains("br i1 %cond, label %then, label %else"));
        assert!(ir.contains("%iftmp = phi double [ 2.0, %then ], [ 3.0, %else ]"));
    }
}
