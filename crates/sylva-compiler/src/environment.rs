//! The lexical environment: four namespaces of bindings. Environments
//! extend functionally (copy-on-extend); a binding's identity is the
//! `Rc`, so marks made through an extended environment are visible to
//! the scope that created the binding.

use std::cell::Cell;
use std::rc::Rc;

use sylva_core::{Symbol, Value};

use crate::expander::MacroFn;

#[derive(Debug, Clone)]
pub enum BindingKind {
    /// A lexical variable: the JS identifier holding its value.
    /// Special bindings carry no usable slot; references go through
    /// the symbol's dynamic value instead.
    Variable { js: String },
    /// A symbol macro: the expansion form.
    SymbolMacro { expansion: Value },
    /// A lexical function: the JS identifier holding the function object.
    Function { js: String },
    /// A macro in the function namespace.
    Macro { expander: MacroFn },
    /// A named block: the JS identifier holding the sentinel array.
    Block {
        js: String,
        used: Cell<bool>,
        multiple_value: bool,
    },
}

#[derive(Debug)]
pub struct Binding {
    pub name: Symbol,
    pub kind: BindingKind,
    pub special: bool,
    pub constant: bool,
}

impl Binding {
    pub fn variable(name: Symbol, js: impl Into<String>) -> Binding {
        Binding {
            name,
            kind: BindingKind::Variable { js: js.into() },
            special: false,
            constant: false,
        }
    }

    pub fn special_variable(name: Symbol) -> Binding {
        Binding {
            name,
            kind: BindingKind::Variable { js: String::new() },
            special: true,
            constant: false,
        }
    }

    pub fn symbol_macro(name: Symbol, expansion: Value) -> Binding {
        Binding {
            name,
            kind: BindingKind::SymbolMacro { expansion },
            special: false,
            constant: false,
        }
    }

    pub fn function(name: Symbol, js: impl Into<String>) -> Binding {
        Binding {
            name,
            kind: BindingKind::Function { js: js.into() },
            special: false,
            constant: false,
        }
    }

    pub fn macro_binding(name: Symbol, expander: MacroFn) -> Binding {
        Binding {
            name,
            kind: BindingKind::Macro { expander },
            special: false,
            constant: false,
        }
    }

    pub fn block(name: Symbol, js: impl Into<String>, multiple_value: bool) -> Binding {
        Binding {
            name,
            kind: BindingKind::Block {
                js: js.into(),
                used: Cell::new(false),
                multiple_value,
            },
            special: false,
            constant: false,
        }
    }
}

/// A go-tag binding. Tags may be symbols or integers, so the key is a
/// whole form compared structurally rather than a `Symbol`.
#[derive(Debug, Clone)]
pub struct GoTag {
    pub tag: Value,
    pub tbidx: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: Vec<Rc<Binding>>,
    functions: Vec<Rc<Binding>>,
    blocks: Vec<Rc<Binding>>,
    gotags: Vec<Rc<GoTag>>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    // --- Lookup (innermost first) ---

    pub fn lookup_variable(&self, name: Symbol) -> Option<&Rc<Binding>> {
        self.variables.iter().rev().find(|b| b.name == name)
    }

    pub fn lookup_function(&self, name: Symbol) -> Option<&Rc<Binding>> {
        self.functions.iter().rev().find(|b| b.name == name)
    }

    pub fn lookup_block(&self, name: Symbol) -> Option<&Rc<Binding>> {
        self.blocks.iter().rev().find(|b| b.name == name)
    }

    pub fn lookup_gotag(&self, tag: &Value) -> Option<&Rc<GoTag>> {
        self.gotags.iter().rev().find(|g| g.tag.equal(tag))
    }

    // --- Functional extension ---

    pub fn extend_variable(&self, binding: Binding) -> Environment {
        let mut env = self.clone();
        env.variables.push(Rc::new(binding));
        env
    }

    pub fn extend_variables(&self, bindings: Vec<Binding>) -> Environment {
        let mut env = self.clone();
        env.variables.extend(bindings.into_iter().map(Rc::new));
        env
    }

    pub fn extend_function(&self, binding: Binding) -> Environment {
        let mut env = self.clone();
        env.functions.push(Rc::new(binding));
        env
    }

    pub fn extend_functions(&self, bindings: Vec<Binding>) -> Environment {
        let mut env = self.clone();
        env.functions.extend(bindings.into_iter().map(Rc::new));
        env
    }

    pub fn extend_block(&self, binding: Binding) -> Environment {
        let mut env = self.clone();
        env.blocks.push(Rc::new(binding));
        env
    }

    pub fn extend_gotags(&self, tags: Vec<GoTag>) -> Environment {
        let mut env = self.clone();
        env.gotags.extend(tags.into_iter().map(Rc::new));
        env
    }

    // --- Destructive pushes, for scratch environments under construction ---

    pub fn push_variable(&mut self, binding: Binding) {
        self.variables.push(Rc::new(binding));
    }

    pub fn push_function(&mut self, binding: Binding) {
        self.functions.push(Rc::new(binding));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_does_not_mutate() {
        let env = Environment::new();
        let x = Symbol::new("x");
        let extended = env.extend_variable(Binding::variable(x, "v1"));
        assert!(env.lookup_variable(x).is_none());
        assert!(extended.lookup_variable(x).is_some());
    }

    #[test]
    fn test_shadowing_is_innermost_first() {
        let x = Symbol::new("x");
        let env = Environment::new()
            .extend_variable(Binding::variable(x, "v1"))
            .extend_variable(Binding::variable(x, "v2"));
        let b = env.lookup_variable(x).unwrap();
        match &b.kind {
            BindingKind::Variable { js } => assert_eq!(js, "v2"),
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let x = Symbol::new("x");
        let env = Environment::new().extend_function(Binding::function(x, "v1"));
        assert!(env.lookup_variable(x).is_none());
        assert!(env.lookup_function(x).is_some());
    }

    #[test]
    fn test_integer_gotags() {
        let env = Environment::new().extend_gotags(vec![GoTag {
            tag: Value::int(5),
            tbidx: "tbidx1".into(),
            index: 1,
        }]);
        assert!(env.lookup_gotag(&Value::int(5)).is_some());
        assert!(env.lookup_gotag(&Value::int(6)).is_none());
    }

    #[test]
    fn test_block_used_mark_is_shared() {
        let b = Symbol::new("outer");
        let env = Environment::new().extend_block(Binding::block(b, "v9", false));
        let inner = env.clone();
        if let BindingKind::Block { used, .. } = &inner.lookup_block(b).unwrap().kind {
            used.set(true);
        }
        if let BindingKind::Block { used, .. } = &env.lookup_block(b).unwrap().kind {
            assert!(used.get());
        }
    }
}
