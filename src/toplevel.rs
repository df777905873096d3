use super::ast::{Item, Prototype, ANONYMOUS_FUNCTION};
use super::backend::{Backend, Execute};
use super::codegen::CodeGen;
use super::config::Options;
use super::error::Result;
use super::ir::IrBackend;
use super::lexer;
use super::operators::OperatorTable;
use super::parser::Parser;
use log::info;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};

/// What a successfully handled top-level item produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Extern { name: String, ir: String },
    Definition { name: String, ir: String },
    /// `value` is `None` when the unit was only lowered, not run.
    Expression { ir: String, value: Option<f64> },
}

type Runner<B> = fn(&mut B, <B as Backend>::Function) -> Result<Option<f64>>;

/// Long-lived compiler state: everything defined so far stays visible to
/// later source units.
pub struct Session<B: Backend> {
    backend: B,
    operators: OperatorTable,
    protos: HashMap<String, Prototype>,
    options: Options,
}

impl Session<IrBackend> {
    pub fn interpreter(options: Options) -> Session<IrBackend> {
        Session::new(IrBackend::new(&options), options)
    }
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, options: Options) -> Session<B> {
        Session {
            backend,
            operators: OperatorTable::default(),
            protos: HashMap::new(),
            options,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn operators(&self) -> &OperatorTable {
        &self.operators
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Lowers every item of `src` without running anything.
    pub fn run(&mut self, src: &str) -> Vec<Result<Outcome>> {
        self.process(src, |_, _| Ok(None))
    }

    fn process(&mut self, src: &str, runner: Runner<B>) -> Vec<Result<Outcome>> {
        let tokens = match lexer::tokenize(src) {
            Ok(tokens) => tokens,
            Err(e) => return vec![Err(e)],
        };

        // Each item is lowered before the next is parsed so that a freshly
        // defined operator is already known to the parser.
        let mut parser = Parser::new(tokens, &mut self.operators);
        let mut outcomes = Vec::new();
        while let Some(item) = parser.parse_item() {
            let outcome = match item {
                Ok(item) => handle_item(
                    &mut self.backend,
                    &mut self.protos,
                    parser.operators(),
                    &self.options,
                    item,
                    runner,
                ),
                Err(e) => Err(e),
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl<B: Execute> Session<B> {
    /// Like [`run`](Session::run), but also executes each top-level
    /// expression.
    pub fn evaluate(&mut self, src: &str) -> Vec<Result<Outcome>> {
        self.process(src, |backend, f| backend.execute(f).map(Some))
    }
}

fn handle_item<B: Backend>(
    backend: &mut B,
    protos: &mut HashMap<String, Prototype>,
    operators: &mut OperatorTable,
    options: &Options,
    item: Item,
    runner: Runner<B>,
) -> Result<Outcome> {
    match item {
        Item::Extern(proto) => {
            let name = proto.name.clone();
            let f = CodeGen::new(backend, protos, operators).codegen_extern(proto)?;
            Ok(Outcome::Extern {
                name,
                ir: backend.print_function(f),
            })
        }
        Item::Definition(func) => {
            let f = CodeGen::new(backend, protos, operators)
                .verify(options.verify)
                .codegen_func(&func)?;
            Ok(Outcome::Definition {
                name: func.proto.name.clone(),
                ir: backend.print_function(f),
            })
        }
        Item::Expression(func) => {
            let f = CodeGen::new(backend, protos, operators)
                .verify(options.verify)
                .codegen_func(&func)?;
            let ir = backend.print_function(f);
            let value = runner(backend, f);
            // Drop it so the next expression can reuse the name.
            backend.discard_function(f, false);
            protos.remove(ANONYMOUS_FUNCTION);
            Ok(Outcome::Expression { ir, value: value? })
        }
    }
}

/// Installs `printd` and `putchard`, which write to stderr and return 0.
pub fn register_builtins(backend: &mut IrBackend) {
    backend.register_native("printd", |args| {
        eprintln!("{:.6}", args.first().copied().unwrap_or_default());
        0.0
    });
    backend.register_native("putchard", |args| {
        let c = args.first().copied().unwrap_or_default() as u8;
        eprint!("{}", c as char);
        0.0
    });
}

/// Reads stdin a line at a time and evaluates each line as a source unit.
pub fn main_loop<B: Execute>(session: &mut Session<B>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("ready> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }

        let dump_ir = session.options().dump_ir;
        for outcome in session.evaluate(&line) {
            match outcome {
                Ok(Outcome::Extern { name, ir }) => {
                    println!("Read extern `{}`", name);
                    if dump_ir {
                        println!("{}", ir);
                    }
                }
                Ok(Outcome::Definition { name, ir }) => {
                    println!("Read function definition `{}`", name);
                    if dump_ir {
                        println!("{}", ir);
                    }
                }
                Ok(Outcome::Expression { ir, value }) => {
                    if dump_ir {
                        println!("{}", ir);
                    }
                    if let Some(value) = value {
                        println!("Evaluated to {}", value);
                    }
                }
                Err(e) => println!("error: {}", e),
            }
        }
    }
    info!("end of input");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{ErrorKind, Phase};
    use std::cell::RefCell;
    use std::rc::Rc;
    use test_log::test;

    fn values(outcomes: Vec<Result<Outcome>>) -> Vec<f64> {
        outcomes
            .into_iter()
            .filter_map(|o| match o.unwrap() {
                Outcome::Expression { value, .. } => value,
                _ => None,
            })
            .collect()
    }

    fn session() -> Session<IrBackend> {
        Session::interpreter(Options::default())
    }

    #[test]
    fn test_evaluate_expressions() {
        let mut s = session();
        assert_eq!(values(s.evaluate("1 + 2 * 3; 1 * 2 + 3;")), vec![7.0, 5.0]);
    }

    #[test]
    fn test_definitions_persist_across_units() {
        let mut s = session();
        let outcomes = s.evaluate("def add(a b) a + b");
        assert!(matches!(&outcomes[0], Ok(Outcome::Definition { name, .. }) if name == "add"));
        assert_eq!(values(s.evaluate("add(2, 3)")), vec![5.0]);
    }

    #[test]
    fn test_recursion() {
        let mut s = session();
        let src = "
            def fib(x)
              if x < 3 then
                1
              else
                fib(x - 1) + fib(x - 2)
            fib(10)
        ";
        let outcomes = s.evaluate(src);
        assert_eq!(values(outcomes), vec![55.0]);
    }

    #[test]
    fn test_user_defined_operators() {
        let mut s = session();
        let src = "
            def unary!(v) if v then 0 else 1;
            def unary-(v) 0 - v;
            def binary> 10 (LHS RHS) RHS < LHS;
            def binary| 5 (LHS RHS) if LHS then 1 else if RHS then 1 else 0;
            def binary : 1 (x y) y;
            !0; -4; 3 > 2; 0 | 1; 1 : 2 + 3;
        ";
        let outcomes = s.evaluate(src);
        assert_eq!(values(outcomes), vec![1.0, -4.0, 1.0, 1.0, 5.0]);
    }

    #[test]
    fn test_operator_rolled_back_when_lowering_fails() {
        let mut s = session();
        let outcomes = s.evaluate("def binary> 10 (a b) a < c");
        assert_eq!(
            outcomes[0].as_ref().unwrap_err().kind(),
            &ErrorKind::UnknownVariable("c".to_owned())
        );
        assert!(!s.operators().contains('>'));

        // `>` is no longer an operator, so the expression stops before it.
        let outcomes = s.evaluate("1 > 2");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(values(vec![outcomes.into_iter().next().unwrap()]), vec![1.0]);
    }

    #[test]
    fn test_parse_error_recovery() {
        let mut s = session();
        let outcomes = s.evaluate("def (x) 1; 4 + 5;");
        assert!(outcomes[0].is_err());
        assert_eq!(outcomes[0].as_ref().unwrap_err().phase(), Phase::Parse);
        let last = outcomes.into_iter().last().unwrap();
        assert!(matches!(last, Ok(Outcome::Expression { value: Some(v), .. }) if v == 9.0));
    }

    #[test]
    fn test_lex_error_is_fatal_for_the_unit() {
        let mut s = session();
        let outcomes = s.evaluate("1 + 2.3.4; 5");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].as_ref().unwrap_err().phase(), Phase::Lex);
    }

    #[test]
    fn test_anonymous_expression_is_discarded() {
        let mut s = session();
        s.evaluate("1; 2");
        assert!(s.backend().get_function(ANONYMOUS_FUNCTION).is_none());
        assert_eq!(s.backend().module().functions().count(), 0);
    }

    #[test]
    fn test_run_lowers_without_executing() {
        let mut s = session();
        let outcomes = s.run("extern sin(x); sin(1)");
        match &outcomes[0] {
            Ok(Outcome::Extern { name, ir }) => {
                assert_eq!(name, "sin");
                assert_eq!(ir, "declare double @sin(double %x)");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        match &outcomes[1] {
            Ok(Outcome::Expression { ir, value }) => {
                assert!(ir.contains("call double @sin(double 1.0)"));
                assert_eq!(*value, None);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_natives() {
        let mut s = session();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        s.backend_mut().register_native("record", move |args| {
            sink.borrow_mut().push(args[0]);
            0.0
        });
        let src = "
            extern record(x);
            def count(n) for i = 0, i < n in record(i);
            count(3);
        ";
        assert_eq!(values(s.evaluate(src)), vec![0.0]);
        assert_eq!(*seen.borrow(), vec![0.0, 1.0, 2.0]);

        let outcomes = s.evaluate("extern missing(); missing()");
        assert_eq!(
            outcomes[1].as_ref().unwrap_err().kind(),
            &ErrorKind::MissingNative("missing".to_owned())
        );
    }

    #[test]
    fn test_mutable_variables() {
        let mut s = session();
        let src = "
            def binary : 1 (x y) y;
            def fibi(x)
              var a = 1, b = 1, c in
              (for i = 2, i < x in
                 c = a + b :
                 a = b :
                 b = c) :
              b;
            fibi(10);
        ";
        assert_eq!(values(s.evaluate(src)), vec![55.0]);
    }

    #[test]
    fn test_redefinition_is_rejected() {
        let mut s = session();
        s.evaluate("def f() 1");
        let outcomes = s.evaluate("def f() 2");
        assert_eq!(
            outcomes[0].as_ref().unwrap_err().kind(),
            &ErrorKind::Redefinition("f".to_owned())
        );
        assert_eq!(values(s.evaluate("f()")), vec![1.0]);
    }

    #[test]
    fn test_failed_operator_redefinition_keeps_precedence() {
        let mut s = session();
        s.evaluate("def binary> 10 (a b) b < a");
        let outcomes = s.evaluate("def binary> 50 (a b) a");
        assert_eq!(
            outcomes[0].as_ref().unwrap_err().kind(),
            &ErrorKind::Redefinition("binary>".to_owned())
        );
        assert_eq!(s.operators().precedence('>'), Some(10));
        // Parses as `2 > (1 + 1)`.
        assert_eq!(values(s.evaluate("2 > 1 + 1")), vec![0.0]);
    }

    #[test]
    fn test_long_integer_literal() {
        let mut s = session();
        assert_eq!(
            values(s.evaluate("99999999999999999999 + 1; 2")),
            vec![1e20, 2.0]
        );
    }
}
