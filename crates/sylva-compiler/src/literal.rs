//! The literal dumper: reify source data as initializer statements in
//! the toplevel-compilations buffer, preserving sharing through an
//! interning table.

use std::rc::Rc;

use hashbrown::HashMap;
use sylva_core::{Symbol, SylvaError, Value, HOME_PACKAGE};

use crate::compiler::{Compiler, Dest};
use crate::environment::Environment;
use crate::jsast::{call, get, ident, internals, new, JsExpr, JsStmt};

/// Standard-symbols package treated as the compiler's own when dumping
/// (bootstrap compatibility).
const BOOTSTRAP_PACKAGE: &str = "cl";

/// Atoms key structurally; conses and vectors key by pointer identity.
#[derive(Debug, PartialEq, Eq, Hash)]
enum LiteralKey {
    Str(String),
    Symbol(Symbol),
    Ptr(usize),
}

fn key_for(form: &Value) -> Option<LiteralKey> {
    match form {
        Value::Nil => Some(LiteralKey::Symbol(Symbol::new("nil"))),
        Value::Str(s) => Some(LiteralKey::Str(s.to_string())),
        Value::Symbol(sym) => Some(LiteralKey::Symbol(*sym)),
        Value::Cons(c) => Some(LiteralKey::Ptr(Rc::as_ptr(c) as usize)),
        Value::Vector(v) => Some(LiteralKey::Ptr(Rc::as_ptr(v) as usize)),
        _ => None,
    }
}

/// The per-unit table mapping dumped forms to their `lN` identifiers.
#[derive(Debug, Default)]
pub struct LiteralTable {
    entries: HashMap<LiteralKey, String>,
    // Pointer-keyed forms are retained so their addresses stay unique
    // for the lifetime of the unit.
    retained: Vec<Value>,
}

impl LiteralTable {
    pub fn new() -> LiteralTable {
        LiteralTable::default()
    }

    fn get(&self, form: &Value) -> Option<&String> {
        key_for(form).and_then(|k| self.entries.get(&k))
    }

    fn insert(&mut self, form: &Value, id: String) {
        if let Some(key) = key_for(form) {
            if matches!(key, LiteralKey::Ptr(_)) {
                self.retained.push(form.clone());
            }
            self.entries.insert(key, id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Compiler {
    /// `literal(form)`: a JS expression whose runtime value equals the
    /// form. Emits initializers into the toplevel buffer as needed.
    pub fn literal(&mut self, form: &Value) -> Result<JsExpr, SylvaError> {
        self.literal_rec(form, false)
    }

    fn literal_rec(&mut self, form: &Value, recursive: bool) -> Result<JsExpr, SylvaError> {
        match form {
            Value::Int(n) => return Ok(JsExpr::Integer(*n)),
            Value::Float(f) => return Ok(JsExpr::Float(*f)),
            Value::Char(c) => return Ok(JsExpr::Str(c.to_string())),
            _ => {}
        }

        // A (magic-unquote form) cons compiles its argument as code,
        // emitted into the toplevel buffer.
        if let Some(c) = form.as_cons() {
            if c.car.as_symbol() == Some(Symbol::magic_unquote()) {
                return self.convert_in_toplevel(&c.cdr.car());
            }
        }

        if let Some(id) = self.literals.get(form) {
            return Ok(ident(id.clone()));
        }

        let dumped = self.dump_literal(form)?;

        // Recursive (embedded) dumps are inlined; symbols are always
        // interned so repeated references share one identifier.
        let intern_it = !recursive || matches!(form, Value::Symbol(_) | Value::Nil);
        if !intern_it {
            return Ok(dumped);
        }

        let id = self.names.fresh_literal();
        self.toplevel.push(JsStmt::Var(id.clone(), Some(dumped)));
        self.literals.insert(form, id.clone());
        if matches!(form, Value::Symbol(sym) if sym.is_keyword()) {
            // Keywords are self-evaluating.
            self.toplevel.push(JsStmt::Assign(
                get(ident(id.clone()), "value"),
                ident(id.clone()),
            ));
        }
        Ok(ident(id))
    }

    fn dump_literal(&mut self, form: &Value) -> Result<JsExpr, SylvaError> {
        match form {
            Value::Nil => Ok(self.dump_symbol(Symbol::new("nil"))),
            Value::Symbol(sym) => Ok(self.dump_symbol(*sym)),
            Value::Str(s) => Ok(call(
                internals("make_lisp_string"),
                vec![JsExpr::Str(s.to_string())],
            )),
            Value::Cons(_) => {
                let mut parts = Vec::new();
                let mut cursor = form.clone();
                loop {
                    let c = match cursor.as_cons() {
                        Some(c) => c.clone(),
                        None => break,
                    };
                    parts.push(self.literal_rec(&c.car, true)?);
                    if c.cdr.as_cons().is_some() {
                        cursor = c.cdr.clone();
                    } else {
                        parts.push(self.literal_rec(&c.cdr, true)?);
                        break;
                    }
                }
                Ok(call(internals("QIList"), parts))
            }
            Value::Vector(items) => {
                let mut parts = Vec::new();
                for item in items.iter() {
                    parts.push(self.literal_rec(item, true)?);
                }
                Ok(JsExpr::Array(parts))
            }
            Value::Int(_) | Value::Float(_) | Value::Char(_) => {
                unreachable!("primitive atoms dump themselves")
            }
        }
    }

    fn dump_symbol(&mut self, sym: Symbol) -> JsExpr {
        let name = JsExpr::Str(sym.name_str());
        match sym.package_str() {
            None => new(
                internals("Symbol"),
                vec![call(internals("make_lisp_string"), vec![name])],
            ),
            Some(pkg) if pkg == HOME_PACKAGE || pkg == BOOTSTRAP_PACKAGE => {
                call(internals("intern"), vec![name])
            }
            Some(pkg) => call(internals("intern"), vec![name, JsExpr::Str(pkg)]),
        }
    }

    /// Magic-unquote re-entry: compile the form with the toplevel
    /// buffer as the target.
    fn convert_in_toplevel(&mut self, form: &Value) -> Result<JsExpr, SylvaError> {
        let env = Environment::new();
        let (stmts, expr) =
            self.with_fresh_target(|c| c.convert(form, &env, Dest::Fresh, false))?;
        self.toplevel.extend(stmts);
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_intern_once() {
        let mut c = Compiler::new();
        let a = c.literal(&Value::symbol("x")).unwrap();
        let b = c.literal(&Value::symbol("x")).unwrap();
        assert_eq!(a, b);
        assert_eq!(c.literals.len(), 1);
    }

    #[test]
    fn test_shared_cons_shares_identifier() {
        let mut c = Compiler::new();
        let shared = Value::list(vec![Value::int(1)]);
        let a = c.literal(&shared).unwrap();
        let b = c.literal(&shared).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equal_but_distinct_conses_get_distinct_identifiers() {
        let mut c = Compiler::new();
        let a = c.literal(&Value::list(vec![Value::int(1)])).unwrap();
        let b = c.literal(&Value::list(vec![Value::int(1)])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_keyword_gets_self_value() {
        let mut c = Compiler::new();
        c.literal(&Value::keyword("k")).unwrap();
        let has_self_assign = c
            .toplevel
            .iter()
            .any(|s| matches!(s, JsStmt::Assign(JsExpr::Get(_, prop), _) if prop == "value"));
        assert!(has_self_assign);
    }

    #[test]
    fn test_primitives_dump_inline() {
        let mut c = Compiler::new();
        assert_eq!(c.literal(&Value::int(5)).unwrap(), JsExpr::Integer(5));
        assert_eq!(
            c.literal(&Value::char('a')).unwrap(),
            JsExpr::Str("a".into())
        );
        assert!(c.toplevel.is_empty());
    }
}
