use log::debug;
use std::collections::HashMap;

/// Precedence given to a `binary` operator declared without one.
pub const DEFAULT_PRECEDENCE: u32 = 30;

const BUILTINS: [(char, u32); 5] = [('=', 2), ('<', 10), ('+', 20), ('-', 20), ('*', 40)];

/// Binary operator precedences, extended as user operators are defined.
///
/// Each symbol keeps a stack of definitions so a failed definition can be
/// rolled back to whatever was installed before it.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    entries: HashMap<char, Vec<u32>>,
}

impl OperatorTable {
    pub fn empty() -> OperatorTable {
        OperatorTable {
            entries: HashMap::new(),
        }
    }

    pub fn precedence(&self, op: char) -> Option<u32> {
        self.entries.get(&op).and_then(|stack| stack.last().copied())
    }

    pub fn contains(&self, op: char) -> bool {
        self.precedence(op).is_some()
    }

    pub fn define(&mut self, op: char, precedence: u32) {
        debug!("installing binary operator '{}' at precedence {}", op, precedence);
        self.entries.entry(op).or_insert_with(Vec::new).push(precedence);
    }

    /// Undoes the most recent [`define`](Self::define) of `op`, returning the
    /// precedence it removed.
    pub fn rollback(&mut self, op: char) -> Option<u32> {
        let stack = self.entries.get_mut(&op)?;
        let removed = stack.pop();
        if stack.is_empty() {
            self.entries.remove(&op);
        }
        debug!("rolled back binary operator '{}' ({:?})", op, removed);
        removed
    }
}

impl Default for OperatorTable {
    fn default() -> OperatorTable {
        let mut table = OperatorTable::empty();
        for &(op, precedence) in BUILTINS.iter() {
            table.entries.insert(op, vec![precedence]);
        }
        table
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builtins() {
        let table = OperatorTable::default();
        assert_eq!(table.precedence('<'), Some(10));
        assert_eq!(table.precedence('+'), Some(20));
        assert_eq!(table.precedence('-'), Some(20));
        assert_eq!(table.precedence('*'), Some(40));
        assert_eq!(table.precedence('='), Some(2));
        assert_eq!(table.precedence('>'), None);
    }

    #[test]
    fn test_define_and_rollback() {
        let mut table = OperatorTable::default();
        table.define('>', 10);
        assert_eq!(table.precedence('>'), Some(10));
        table.define('>', 15);
        assert_eq!(table.precedence('>'), Some(15));
        assert_eq!(table.rollback('>'), Some(15));
        assert_eq!(table.precedence('>'), Some(10));
        assert_eq!(table.rollback('>'), Some(10));
        assert!(!table.contains('>'));
        assert_eq!(table.rollback('>'), None);
    }

    #[test]
    fn test_rollback_restores_builtin() {
        let mut table = OperatorTable::default();
        table.define('+', 60);
        table.rollback('+');
        assert_eq!(table.precedence('+'), Some(20));
    }
}
