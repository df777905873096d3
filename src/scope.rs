use log::debug;
use std::collections::HashMap;

/// Variable bindings of the function being lowered.
///
/// Every [`bind`](Scope::bind) records what it shadowed; [`restore`](Scope::restore)
/// unwinds back to a [`Mark`], reinstating the previous binding or removing
/// the name if there was none.
#[derive(Debug)]
pub struct Scope<S> {
    bindings: HashMap<String, S>,
    shadowed: Vec<(String, Option<S>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

impl<S: Copy> Scope<S> {
    pub fn new() -> Scope<S> {
        Scope {
            bindings: HashMap::new(),
            shadowed: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<S> {
        self.bindings.get(name).copied()
    }

    pub fn mark(&self) -> Mark {
        Mark(self.shadowed.len())
    }

    pub fn bind(&mut self, name: &str, slot: S) {
        let previous = self.bindings.insert(name.to_owned(), slot);
        if previous.is_some() {
            debug!("`{}` shadows an outer binding", name);
        }
        self.shadowed.push((name.to_owned(), previous));
    }

    pub fn restore(&mut self, mark: Mark) {
        while self.shadowed.len() > mark.0 {
            if let Some((name, previous)) = self.shadowed.pop() {
                match previous {
                    Some(slot) => {
                        self.bindings.insert(name, slot);
                    }
                    None => {
                        self.bindings.remove(&name);
                    }
                }
            }
        }
    }
}

impl<S: Copy> Default for Scope<S> {
    fn default() -> Scope<S> {
        Scope::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shadow_and_restore() {
        let mut scope = Scope::new();
        scope.bind("a", 1);

        let mark = scope.mark();
        scope.bind("a", 2);
        scope.bind("b", 3);
        assert_eq!(scope.lookup("a"), Some(2));
        assert_eq!(scope.lookup("b"), Some(3));

        scope.restore(mark);
        assert_eq!(scope.lookup("a"), Some(1));
        assert_eq!(scope.lookup("b"), None);
    }

    #[test]
    fn test_same_name_twice_in_one_scope() {
        let mut scope = Scope::new();
        let mark = scope.mark();
        scope.bind("a", 1);
        scope.bind("a", 2);
        assert_eq!(scope.lookup("a"), Some(2));
        scope.restore(mark);
        assert_eq!(scope.lookup("a"), None);
    }

    #[test]
    fn test_nested_marks() {
        let mut scope = Scope::new();
        let outer = scope.mark();
        scope.bind("x", 1);
        let inner = scope.mark();
        scope.bind("x", 2);
        scope.restore(inner);
        assert_eq!(scope.lookup("x"), Some(1));
        scope.restore(outer);
        assert_eq!(scope.lookup("x"), None);
    }
}
