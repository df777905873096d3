use super::token::Token;
use failure::{Backtrace, Context, Fail};
use std::fmt;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lex,
    Parse,
    Lower,
    Verify,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Fail)]
pub enum ErrorKind {
    #[fail(display = "{}:{}: {}", line, column, message)]
    Lex {
        line: i32,
        column: i32,
        message: String,
    },

    #[fail(display = "expected {}, found {}", expected, found)]
    Expected { expected: &'static str, found: Token },
    #[fail(display = "unknown token when expecting an expression: {}", _0)]
    ExpectedExpression(Token),
    #[fail(display = "invalid precedence {}: must be 1..100", _0)]
    InvalidPrecedence(i64),
    #[fail(
        display = "invalid number of operands for operator: expected {}, found {}",
        expected, found
    )]
    OperatorArity { expected: usize, found: usize },

    #[fail(display = "unknown variable name `{}`", _0)]
    UnknownVariable(String),
    #[fail(display = "unknown unary operator `{}`", _0)]
    UnknownUnaryOperator(char),
    #[fail(display = "unknown binary operator `{}`", _0)]
    UnknownBinaryOperator(char),
    #[fail(display = "destination of '=' must be a variable")]
    AssignDestination,
    #[fail(display = "unknown function referenced `{}`", _0)]
    UnknownFunction(String),
    #[fail(
        display = "incorrect number of arguments passed to `{}`: expected {}, found {}",
        callee, expected, found
    )]
    ArgumentCount {
        callee: String,
        expected: usize,
        found: usize,
    },
    #[fail(display = "function `{}` cannot be redefined", _0)]
    Redefinition(String),
    #[fail(
        display = "function `{}` redeclared with {} parameters, previously {}",
        name, found, expected
    )]
    SignatureMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[fail(display = "invalid IR in `{}`: {}", function, message)]
    Verify { function: String, message: String },

    #[fail(display = "no native implementation for extern `{}`", _0)]
    MissingNative(String),
    #[fail(display = "step budget of {} instructions exhausted", _0)]
    StepLimit(u64),
    #[fail(display = "call depth exceeded {} frames", _0)]
    CallDepth(usize),
    #[fail(display = "function `{}` has no body to execute", _0)]
    NotExecutable(String),
    #[fail(display = "execution engine: {}", _0)]
    Engine(String),
}

impl ErrorKind {
    pub fn phase(&self) -> Phase {
        use ErrorKind::*;
        match self {
            Lex { .. } => Phase::Lex,
            Expected { .. } | ExpectedExpression(_) | InvalidPrecedence(_) | OperatorArity { .. } => {
                Phase::Parse
            }
            UnknownVariable(_)
            | UnknownUnaryOperator(_)
            | UnknownBinaryOperator(_)
            | AssignDestination
            | UnknownFunction(_)
            | ArgumentCount { .. }
            | Redefinition(_)
            | SignatureMismatch { .. } => Phase::Lower,
            Verify { .. } => Phase::Verify,
            MissingNative(_) | StepLimit(_) | CallDepth(_) | NotExecutable(_) | Engine(_) => {
                Phase::Execute
            }
        }
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    pub fn phase(&self) -> Phase {
        self.kind().phase()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_and_phase() {
        let e = Error::from(ErrorKind::AssignDestination);
        assert_eq!(e.to_string(), "destination of '=' must be a variable");
        assert_eq!(e.phase(), Phase::Lower);

        let e = Error::from(ErrorKind::Expected {
            expected: "'then'",
            found: Token::Eof,
        });
        assert_eq!(e.to_string(), "expected 'then', found end of input");
        assert_eq!(e.phase(), Phase::Parse);
    }
}
