//! The boundary between lowering and whatever turns the IR into code.

use super::error::Result;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Unordered less-than: true when either operand is NaN.
    Lt,
    /// Ordered not-equal: false when either operand is NaN.
    Ne,
}

/// A code generator that lowering emits into.
///
/// All numbers are `f64`. [`compare`](Backend::compare) yields a boolean that
/// may only feed [`cond_br`](Backend::cond_br) or
/// [`bool_to_float`](Backend::bool_to_float).
pub trait Backend {
    type Value: Copy + Debug;
    type Block: Copy + Debug;
    type Function: Copy + Debug;
    type Slot: Copy + Debug;

    fn get_function(&self, name: &str) -> Option<Self::Function>;
    fn declare_function(&mut self, name: &str, params: &[String]) -> Self::Function;
    fn arity(&self, function: Self::Function) -> usize;
    fn has_body(&self, function: Self::Function) -> bool;

    fn append_block(&mut self, function: Self::Function, name: &str) -> Self::Block;
    fn position_at_end(&mut self, block: Self::Block);
    /// The block instructions are currently appended to.
    fn insert_block(&self) -> Self::Block;

    fn param(&self, function: Self::Function, index: usize) -> Self::Value;
    /// A mutable stack cell in the entry block of `function`.
    fn entry_slot(&mut self, function: Self::Function, name: &str) -> Self::Slot;
    fn load(&mut self, slot: Self::Slot, name: &str) -> Self::Value;
    fn store(&mut self, slot: Self::Slot, value: Self::Value);

    fn constant(&mut self, value: f64) -> Self::Value;
    fn float_op(&mut self, op: FloatOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn compare(&mut self, predicate: Predicate, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn bool_to_float(&mut self, value: Self::Value) -> Self::Value;
    fn call(&mut self, callee: Self::Function, args: &[Self::Value]) -> Self::Value;

    fn br(&mut self, target: Self::Block);
    fn cond_br(&mut self, cond: Self::Value, then: Self::Block, otherwise: Self::Block);
    fn phi(&mut self, incoming: &[(Self::Value, Self::Block)]) -> Self::Value;
    fn ret(&mut self, value: Self::Value);

    /// Throws away a function whose body could not be built. With
    /// `keep_declaration` only the body goes and the signature stays callable.
    fn discard_function(&mut self, function: Self::Function, keep_declaration: bool);
    fn verify_function(&self, function: Self::Function) -> Result<()>;
    fn print_function(&self, function: Self::Function) -> String;
}

/// A backend that can run a finished, parameterless function.
pub trait Execute: Backend {
    fn execute(&mut self, function: Self::Function) -> Result<f64>;
}
