//! A small control-flow-graph IR over `f64`, shaped after LLVM IR.

mod eval;
mod verify;

pub use self::eval::Native;
pub use self::verify::verify_function;

use super::backend::{Backend, FloatOp, Predicate};
use super::config::Options;
use super::error::Result;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

/// A block of a particular function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub function: FuncId,
    pub block: BlockId,
}

/// An operand, relative to the function it is used in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(usize),
    Inst(InstId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Number,
    Bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Load(SlotId),
    Store(SlotId, Value),
    Float(FloatOp, Value, Value),
    Cmp(Predicate, Value, Value),
    BoolToFloat(Value),
    Call(FuncId, Vec<Value>),
    Phi(Vec<(Value, BlockId)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub name: String,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br(BlockId),
    CondBr(Value, BlockId, BlockId),
    Ret(Value),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr(_, then, otherwise) => vec![*then, *otherwise],
            Terminator::Ret(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
    /// Set when something was emitted into the block after it was terminated.
    pub(crate) overrun: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub slots: Vec<String>,
    pub blocks: Vec<Block>,
    pub insts: Vec<Inst>,
    pub(crate) discarded: bool,
    used: HashSet<String>,
}

impl Function {
    fn new(name: &str, params: &[String]) -> Function {
        let mut function = Function {
            name: name.to_owned(),
            params: Vec::new(),
            slots: Vec::new(),
            blocks: Vec::new(),
            insts: Vec::new(),
            discarded: false,
            used: HashSet::new(),
        };
        let params = params.iter().map(|p| function.unique(p)).collect();
        function.params = params;
        function
    }

    fn unique(&mut self, base: &str) -> String {
        let mut candidate = base.to_owned();
        let mut n = 0;
        while self.used.contains(&candidate) {
            n += 1;
            candidate = format!("{}{}", base, n);
        }
        self.used.insert(candidate.clone());
        candidate
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn value_type(&self, value: Value) -> Option<Type> {
        match value {
            Value::Const(_) => Some(Type::Number),
            Value::Param(i) if i < self.params.len() => Some(Type::Number),
            Value::Param(_) => None,
            Value::Inst(id) => match &self.insts.get(id.0)?.kind {
                InstKind::Store(..) => None,
                InstKind::Cmp(..) => Some(Type::Bool),
                _ => Some(Type::Number),
            },
        }
    }

    pub fn operand(&self, value: Value) -> String {
        match value {
            Value::Const(n) => format!("{:?}", n),
            Value::Param(i) => match self.params.get(i) {
                Some(name) => format!("%{}", name),
                None => format!("%arg{}", i),
            },
            Value::Inst(id) => match self.insts.get(id.0) {
                Some(inst) => format!("%{}", inst.name),
                None => format!("%<{}>", id.0),
            },
        }
    }

    fn label(&self, block: BlockId) -> String {
        match self.blocks.get(block.0) {
            Some(b) => format!("%{}", b.name),
            None => format!("%<bb{}>", block.0),
        }
    }

    pub fn display<'a>(&'a self, module: &'a Module) -> FunctionDisplay<'a> {
        FunctionDisplay {
            function: self,
            module,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Vec<Function>,
    by_name: HashMap<String, FuncId>,
}

impl Module {
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }

    /// Live (not discarded) functions in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.discarded)
            .map(|(i, f)| (FuncId(i), f))
    }
}

pub struct FunctionDisplay<'a> {
    function: &'a Function,
    module: &'a Module,
}

impl<'a> fmt::Display for FunctionDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.function;
        let params = func
            .params
            .iter()
            .map(|p| format!("double %{}", p))
            .collect::<Vec<_>>()
            .join(", ");

        if func.is_declaration() {
            return write!(f, "declare double @{}({})", func.name, params);
        }

        writeln!(f, "define double @{}({}) {{", func.name, params)?;
        for (i, block) in func.blocks.iter().enumerate() {
            writeln!(f, "{}:", block.name)?;
            if i == 0 {
                for slot in &func.slots {
                    writeln!(f, "  %{} = alloca double", slot)?;
                }
            }
            for id in &block.insts {
                let inst = &func.insts[id.0];
                write!(f, "  ")?;
                if !inst.name.is_empty() {
                    write!(f, "%{} = ", inst.name)?;
                }
                match &inst.kind {
                    InstKind::Load(slot) => {
                        write!(f, "load double, double* %{}", func.slots[slot.0])?
                    }
                    InstKind::Store(slot, v) => write!(
                        f,
                        "store double {}, double* %{}",
                        func.operand(*v),
                        func.slots[slot.0]
                    )?,
                    InstKind::Float(op, l, r) => {
                        let mnemonic = match op {
                            FloatOp::Add => "fadd",
                            FloatOp::Sub => "fsub",
                            FloatOp::Mul => "fmul",
                        };
                        write!(f, "{} double {}, {}", mnemonic, func.operand(*l), func.operand(*r))?
                    }
                    InstKind::Cmp(predicate, l, r) => {
                        let cond = match predicate {
                            Predicate::Lt => "ult",
                            Predicate::Ne => "one",
                        };
                        write!(f, "fcmp {} double {}, {}", cond, func.operand(*l), func.operand(*r))?
                    }
                    InstKind::BoolToFloat(v) => {
                        write!(f, "uitofp i1 {} to double", func.operand(*v))?
                    }
                    InstKind::Call(callee, args) => {
                        let args = args
                            .iter()
                            .map(|a| format!("double {}", func.operand(*a)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        write!(f, "call double @{}({})", self.module.function(*callee).name, args)?
                    }
                    InstKind::Phi(incoming) => {
                        let incoming = incoming
                            .iter()
                            .map(|(v, b)| format!("[ {}, {} ]", func.operand(*v), func.label(*b)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        write!(f, "phi double {}", incoming)?
                    }
                }
                writeln!(f)?;
            }
            match &block.terminator {
                Some(Terminator::Br(target)) => writeln!(f, "  br label {}", func.label(*target))?,
                Some(Terminator::CondBr(cond, then, otherwise)) => writeln!(
                    f,
                    "  br i1 {}, label {}, label {}",
                    func.operand(*cond),
                    func.label(*then),
                    func.label(*otherwise)
                )?,
                Some(Terminator::Ret(v)) => writeln!(f, "  ret double {}", func.operand(*v))?,
                None => {}
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, function)) in self.functions().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", function.display(self))?;
        }
        Ok(())
    }
}

/// [`Backend`] building a [`Module`], and executing it through the
/// interpreter in `ir::eval`.
pub struct IrBackend {
    module: Module,
    position: Option<Label>,
    natives: HashMap<String, Native>,
    max_steps: u64,
    max_call_depth: usize,
}

impl IrBackend {
    pub fn new(options: &Options) -> IrBackend {
        IrBackend {
            module: Module::default(),
            position: None,
            natives: HashMap::new(),
            max_steps: options.max_steps,
            max_call_depth: options.max_call_depth,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Supplies the implementation of a body-less (`extern`) function.
    pub fn register_native<F>(&mut self, name: &str, native: F)
    where
        F: Fn(&[f64]) -> f64 + 'static,
    {
        self.natives.insert(name.to_owned(), Box::new(native));
    }

    fn cursor(&self) -> Label {
        self.position
            .expect("builder is not positioned inside a block")
    }

    fn emit(&mut self, base: &str, kind: InstKind) -> Value {
        let Label { function, block } = self.cursor();
        let func = &mut self.module.functions[function.0];
        let name = if base.is_empty() {
            String::new()
        } else {
            func.unique(base)
        };
        let id = InstId(func.insts.len());
        func.insts.push(Inst { name, kind });
        let block = &mut func.blocks[block.0];
        block.overrun |= block.terminator.is_some();
        block.insts.push(id);
        Value::Inst(id)
    }

    fn terminate(&mut self, terminator: Terminator) {
        let Label { function, block } = self.cursor();
        let block = &mut self.module.functions[function.0].blocks[block.0];
        if block.terminator.is_some() {
            block.overrun = true;
        } else {
            block.terminator = Some(terminator);
        }
    }
}

impl Default for IrBackend {
    fn default() -> IrBackend {
        IrBackend::new(&Options::default())
    }
}

impl Backend for IrBackend {
    type Value = Value;
    type Block = Label;
    type Function = FuncId;
    type Slot = SlotId;

    fn get_function(&self, name: &str) -> Option<FuncId> {
        self.module.lookup(name)
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> FuncId {
        // A discarded function is unreachable from every live one, so its
        // slot can be handed out again.
        let function = Function::new(name, params);
        let id = match self.module.functions.iter().position(|f| f.discarded) {
            Some(index) => {
                self.module.functions[index] = function;
                FuncId(index)
            }
            None => {
                self.module.functions.push(function);
                FuncId(self.module.functions.len() - 1)
            }
        };
        self.module.by_name.insert(name.to_owned(), id);
        id
    }

    fn arity(&self, function: FuncId) -> usize {
        self.module.function(function).params.len()
    }

    fn has_body(&self, function: FuncId) -> bool {
        !self.module.function(function).is_declaration()
    }

    fn append_block(&mut self, function: FuncId, name: &str) -> Label {
        let func = &mut self.module.functions[function.0];
        let name = func.unique(name);
        let block = BlockId(func.blocks.len());
        func.blocks.push(Block {
            name,
            insts: Vec::new(),
            terminator: None,
            overrun: false,
        });
        Label { function, block }
    }

    fn position_at_end(&mut self, block: Label) {
        self.position = Some(block);
    }

    fn insert_block(&self) -> Label {
        self.cursor()
    }

    fn param(&self, _function: FuncId, index: usize) -> Value {
        Value::Param(index)
    }

    fn entry_slot(&mut self, function: FuncId, name: &str) -> SlotId {
        let func = &mut self.module.functions[function.0];
        let name = func.unique(name);
        func.slots.push(name);
        SlotId(func.slots.len() - 1)
    }

    fn load(&mut self, slot: SlotId, name: &str) -> Value {
        self.emit(name, InstKind::Load(slot))
    }

    fn store(&mut self, slot: SlotId, value: Value) {
        self.emit("", InstKind::Store(slot, value));
    }

    fn constant(&mut self, value: f64) -> Value {
        Value::Const(value)
    }

    fn float_op(&mut self, op: FloatOp, lhs: Value, rhs: Value) -> Value {
        let name = match op {
            FloatOp::Add => "addtmp",
            FloatOp::Sub => "subtmp",
            FloatOp::Mul => "multmp",
        };
        self.emit(name, InstKind::Float(op, lhs, rhs))
    }

    fn compare(&mut self, predicate: Predicate, lhs: Value, rhs: Value) -> Value {
        let name = match predicate {
            Predicate::Lt => "cmptmp",
            Predicate::Ne => "cond",
        };
        self.emit(name, InstKind::Cmp(predicate, lhs, rhs))
    }

    fn bool_to_float(&mut self, value: Value) -> Value {
        self.emit("booltmp", InstKind::BoolToFloat(value))
    }

    fn call(&mut self, callee: FuncId, args: &[Value]) -> Value {
        self.emit("calltmp", InstKind::Call(callee, args.to_vec()))
    }

    fn br(&mut self, target: Label) {
        self.terminate(Terminator::Br(target.block));
    }

    fn cond_br(&mut self, cond: Value, then: Label, otherwise: Label) {
        self.terminate(Terminator::CondBr(cond, then.block, otherwise.block));
    }

    fn phi(&mut self, incoming: &[(Value, Label)]) -> Value {
        let incoming = incoming.iter().map(|(v, l)| (*v, l.block)).collect();
        self.emit("iftmp", InstKind::Phi(incoming))
    }

    fn ret(&mut self, value: Value) {
        self.terminate(Terminator::Ret(value));
    }

    fn discard_function(&mut self, function: FuncId, keep_declaration: bool) {
        let func = &mut self.module.functions[function.0];
        debug!(
            "discarding {} of `{}`",
            if keep_declaration { "body" } else { "function" },
            func.name
        );
        func.blocks.clear();
        func.insts.clear();
        func.slots.clear();
        func.used = func.params.iter().cloned().collect();
        if !keep_declaration {
            func.discarded = true;
            let name = func.name.clone();
            if self.module.by_name.get(&name) == Some(&function) {
                self.module.by_name.remove(&name);
            }
        }
        if self.position.map(|l| l.function) == Some(function) {
            self.position = None;
        }
    }

    fn verify_function(&self, function: FuncId) -> Result<()> {
        verify_function(&self.module, function)
    }

    fn print_function(&self, function: FuncId) -> String {
        self.module.function(function).display(&self.module).to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_and_print() {
        let mut b = IrBackend::default();
        let f = b.declare_function("twice", &["x".to_owned()]);
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let slot = b.entry_slot(f, "x");
        let x = b.param(f, 0);
        b.store(slot, x);
        let v = b.load(slot, "x");
        let sum = b.float_op(FloatOp::Add, v, v);
        b.ret(sum);

        assert!(b.verify_function(f).is_ok());
        assert_eq!(
            b.print_function(f),
            "define double @twice(double %x) {\n\
             entry:\n  \
             %x1 = alloca double\n  \
             store double %x, double* %x1\n  \
             %x2 = load double, double* %x1\n  \
             %addtmp = fadd double %x2, %x2\n  \
             ret double %addtmp\n\
             }"
        );
    }

    #[test]
    fn test_declaration() {
        let mut b = IrBackend::default();
        let f = b.declare_function("sin", &["angle".to_owned()]);
        assert!(!b.has_body(f));
        assert_eq!(b.arity(f), 1);
        assert_eq!(b.print_function(f), "declare double @sin(double %angle)");
        assert_eq!(b.get_function("sin"), Some(f));
    }

    #[test]
    fn test_discard() {
        let mut b = IrBackend::default();
        let f = b.declare_function("f", &[]);
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let one = b.constant(1.0);
        b.ret(one);

        b.discard_function(f, true);
        assert_eq!(b.get_function("f"), Some(f));
        assert!(!b.has_body(f));

        b.discard_function(f, false);
        assert_eq!(b.get_function("f"), None);
        assert_eq!(b.module().functions().count(), 0);
    }

    #[test]
    fn test_discarded_slot_is_reused() {
        let mut b = IrBackend::default();
        let kept = b.declare_function("kept", &[]);
        let gone = b.declare_function("gone", &[]);
        b.discard_function(gone, false);

        let next = b.declare_function("next", &["x".to_owned()]);
        assert_eq!(next, gone);
        assert_eq!(b.module.functions.len(), 2);
        assert_eq!(b.get_function("kept"), Some(kept));
        assert_eq!(b.get_function("gone"), None);
        assert_eq!(b.arity(next), 1);
    }
}
