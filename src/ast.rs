use super::operators::DEFAULT_PRECEDENCE;

pub const ANONYMOUS_FUNCTION: &str = "__anon_expr";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Unary(char, Box<Expr>),
    /// `=` is assignment and requires a [`Expr::Variable`] on the left.
    Binary(char, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `for var = start, end [, step] in body`
    For(String, Box<Expr>, Box<Expr>, Option<Box<Expr>>, Box<Expr>),
    /// `var a [= init], ... in body`
    Var(Vec<(String, Option<Expr>)>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoKind {
    Function,
    Unary(char),
    Binary(char, u32),
}

/// Name, parameters and (for operators) precedence of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    pub kind: ProtoKind,
}

impl Prototype {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Prototype {
        Prototype {
            name: name.into(),
            params,
            kind: ProtoKind::Function,
        }
    }

    pub fn unary(op: char, param: impl Into<String>) -> Prototype {
        Prototype {
            name: format!("unary{}", op),
            params: vec![param.into()],
            kind: ProtoKind::Unary(op),
        }
    }

    pub fn binary(op: char, precedence: u32, lhs: impl Into<String>, rhs: impl Into<String>) -> Prototype {
        Prototype {
            name: format!("binary{}", op),
            params: vec![lhs.into(), rhs.into()],
            kind: ProtoKind::Binary(op, precedence),
        }
    }

    pub fn anonymous() -> Prototype {
        Prototype::new(ANONYMOUS_FUNCTION, vec![])
    }

    pub fn is_operator(&self) -> bool {
        self.kind != ProtoKind::Function
    }

    pub fn operator_arity(&self) -> usize {
        match self.kind {
            ProtoKind::Function => 0,
            ProtoKind::Unary(_) => 1,
            ProtoKind::Binary(..) => 2,
        }
    }

    pub fn precedence(&self) -> u32 {
        match self.kind {
            ProtoKind::Binary(_, precedence) => precedence,
            _ => DEFAULT_PRECEDENCE,
        }
    }

    pub fn binary_operator(&self) -> Option<(char, u32)> {
        match self.kind {
            ProtoKind::Binary(op, precedence) => Some((op, precedence)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub proto: Prototype,
    pub body: Expr,
}

/// A top-level item of a source unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Definition(Function),
    Extern(Prototype),
    /// A bare expression wrapped in an anonymous function.
    Expression(Function),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Definition(f) | Item::Expression(f) => &f.proto.name,
            Item::Extern(p) => &p.name,
        }
    }
}
