//! A compiler front end for the Kaleidoscope toy language: lexer, parser with
//! user-definable operators, and lowering into a control-flow-graph IR.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod config;
pub mod cursor;
pub mod error;
pub mod ir;
pub mod lexer;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod operators;
pub mod parser;
pub mod scope;
pub mod token;
pub mod toplevel;

pub use error::{Error, ErrorKind, Phase, Result};
pub use toplevel::{Outcome, Session};
