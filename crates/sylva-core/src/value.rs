use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use lasso::{Rodeo, Spur};

// ── String interning ──────────────────────────────────────────────

thread_local! {
    static INTERNER: RefCell<Rodeo> = RefCell::new(Rodeo::default());
}

/// Intern a string, returning a Spur key.
pub fn intern(s: &str) -> Spur {
    INTERNER.with(|r| r.borrow_mut().get_or_intern(s))
}

/// Resolve a Spur key back to a String.
pub fn resolve(spur: Spur) -> String {
    INTERNER.with(|r| r.borrow().resolve(&spur).to_string())
}

/// Resolve a Spur and call f with the &str, avoiding allocation.
pub fn with_resolved<F, R>(spur: Spur, f: F) -> R
where
    F: FnOnce(&str) -> R,
{
    INTERNER.with(|r| {
        let interner = r.borrow();
        f(interner.resolve(&spur))
    })
}

// ── Symbols ───────────────────────────────────────────────────────

/// The home package of ordinary source symbols.
pub const HOME_PACKAGE: &str = "sylva";
/// The package of self-evaluating keyword symbols.
pub const KEYWORD_PACKAGE: &str = "keyword";
/// Private package for compiler-internal markers.
pub const PRIVATE_PACKAGE: &str = "%sylva";

/// A symbol: a print name plus an optional package name.
/// Two symbols are equal iff both name and package match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    name: Spur,
    package: Option<Spur>,
}

impl Symbol {
    /// An ordinary symbol in the home package.
    pub fn new(name: &str) -> Symbol {
        Symbol {
            name: intern(name),
            package: Some(intern(HOME_PACKAGE)),
        }
    }

    /// A keyword symbol (`:name`).
    pub fn keyword(name: &str) -> Symbol {
        Symbol {
            name: intern(name),
            package: Some(intern(KEYWORD_PACKAGE)),
        }
    }

    /// An uninterned symbol (`#:name`).
    pub fn uninterned(name: &str) -> Symbol {
        Symbol {
            name: intern(name),
            package: None,
        }
    }

    /// A symbol in an explicitly named package (`pkg:name`).
    pub fn in_package(name: &str, package: &str) -> Symbol {
        Symbol {
            name: intern(name),
            package: Some(intern(package)),
        }
    }

    /// The marker that tells the literal dumper to compile the rest of
    /// the form as code instead of dumping it as data.
    pub fn magic_unquote() -> Symbol {
        Symbol::in_package("magic-unquote", PRIVATE_PACKAGE)
    }

    pub fn name_spur(&self) -> Spur {
        self.name
    }

    pub fn package_spur(&self) -> Option<Spur> {
        self.package
    }

    pub fn name_str(&self) -> String {
        resolve(self.name)
    }

    pub fn package_str(&self) -> Option<String> {
        self.package.map(resolve)
    }

    pub fn is_keyword(&self) -> bool {
        self.package == Some(intern(KEYWORD_PACKAGE))
    }

    pub fn is_uninterned(&self) -> bool {
        self.package.is_none()
    }

    /// True when this symbol lives in the home package and has the given name.
    pub fn named(&self, name: &str) -> bool {
        self.package == Some(intern(HOME_PACKAGE)) && with_resolved(self.name, |s| s == name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.package {
            None => write!(f, "#:{}", resolve(self.name)),
            Some(pkg) => {
                let pkg = resolve(pkg);
                if pkg == KEYWORD_PACKAGE {
                    write!(f, ":{}", resolve(self.name))
                } else if pkg == HOME_PACKAGE {
                    write!(f, "{}", resolve(self.name))
                } else {
                    write!(f, "{}:{}", pkg, resolve(self.name))
                }
            }
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

// ── Source forms ──────────────────────────────────────────────────

/// A cons cell. Identity (for the literal table) is Rc pointer identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Cons {
    pub car: Value,
    pub cdr: Value,
}

/// A source expression tree. `Nil` doubles as the empty list and the
/// false value, as in the source language.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Char(char),
    Str(Rc<str>),
    Symbol(Symbol),
    Cons(Rc<Cons>),
    Vector(Rc<Vec<Value>>),
}

// ── Constructors ──────────────────────────────────────────────────

impl Value {
    pub fn nil() -> Value {
        Value::Nil
    }

    pub fn int(n: i64) -> Value {
        Value::Int(n)
    }

    pub fn float(f: f64) -> Value {
        Value::Float(f)
    }

    pub fn char(c: char) -> Value {
        Value::Char(c)
    }

    pub fn string(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    /// An ordinary symbol in the home package.
    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::new(name))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Symbol(Symbol::keyword(name))
    }

    pub fn sym(symbol: Symbol) -> Value {
        Value::Symbol(symbol)
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Rc::new(Cons { car, cdr }))
    }

    /// A proper list.
    pub fn list(items: Vec<Value>) -> Value {
        let mut result = Value::Nil;
        for item in items.into_iter().rev() {
            result = Value::cons(item, result);
        }
        result
    }

    /// A dotted list `(a b . tail)`.
    pub fn list_dotted(items: Vec<Value>, tail: Value) -> Value {
        let mut result = tail;
        for item in items.into_iter().rev() {
            result = Value::cons(item, result);
        }
        result
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(items))
    }

    /// Build `(magic-unquote form)` for the literal dumper.
    pub fn magic_unquote(form: Value) -> Value {
        Value::list(vec![Value::Symbol(Symbol::magic_unquote()), form])
    }
}

// ── Accessors ─────────────────────────────────────────────────────

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_cons(&self) -> Option<&Rc<Cons>> {
        match self {
            Value::Cons(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Rc<Vec<Value>>> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// The car of a cons; Nil for Nil, Nil for non-conses.
    pub fn car(&self) -> Value {
        match self {
            Value::Cons(c) => c.car.clone(),
            _ => Value::Nil,
        }
    }

    /// The cdr of a cons; Nil for Nil, Nil for non-conses.
    pub fn cdr(&self) -> Value {
        match self {
            Value::Cons(c) => c.cdr.clone(),
            _ => Value::Nil,
        }
    }

    /// True when the head of this form is a home-package symbol with
    /// the given name.
    pub fn has_head(&self, name: &str) -> bool {
        match self.as_cons() {
            Some(c) => matches!(c.car.as_symbol(), Some(s) if s.named(name)),
            None => false,
        }
    }

    /// Collect a proper list into a Vec; None for dotted lists or atoms.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Value::Nil => return Some(items),
                Value::Cons(c) => {
                    items.push(c.car.clone());
                    cursor = c.cdr.clone();
                }
                _ => return None,
            }
        }
    }

    /// Length of a proper list; None for dotted lists or atoms.
    pub fn list_len(&self) -> Option<usize> {
        self.list_to_vec().map(|v| v.len())
    }

    /// Structural equality: atoms by value, conses and vectors element-wise.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Cons(a), Value::Cons(b)) => {
                Rc::ptr_eq(a, b) || (a.car.equal(&b.car) && a.cdr.equal(&b.cdr))
            }
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equal(y))
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.equal(other)
    }
}

// ── Printing ──────────────────────────────────────────────────────

fn write_string_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            _ => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Char(c) => match c {
                '\n' => write!(f, "#\\newline"),
                ' ' => write!(f, "#\\space"),
                '\t' => write!(f, "#\\tab"),
                _ => write!(f, "#\\{c}"),
            },
            Value::Str(s) => write_string_escaped(f, s),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Cons(_) => {
                write!(f, "(")?;
                let mut cursor = self.clone();
                let mut first = true;
                loop {
                    match cursor {
                        Value::Nil => break,
                        Value::Cons(c) => {
                            if !first {
                                write!(f, " ")?;
                            }
                            first = false;
                            write!(f, "{}", c.car)?;
                            cursor = c.cdr.clone();
                        }
                        tail => {
                            write!(f, " . {tail}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "#(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_equality() {
        assert_eq!(Symbol::new("foo"), Symbol::new("foo"));
        assert_ne!(Symbol::new("foo"), Symbol::keyword("foo"));
        assert_ne!(Symbol::new("foo"), Symbol::in_package("foo", "other"));
        assert_ne!(Symbol::new("foo"), Symbol::new("bar"));
    }

    #[test]
    fn test_list_roundtrip() {
        let l = Value::list(vec![Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(l.list_to_vec().unwrap().len(), 3);
        assert_eq!(l.car(), Value::int(1));
        assert_eq!(l.cdr().car(), Value::int(2));
    }

    #[test]
    fn test_dotted_list_is_improper() {
        let d = Value::list_dotted(vec![Value::int(1)], Value::int(2));
        assert!(d.list_to_vec().is_none());
        assert_eq!(d.cdr(), Value::int(2));
    }

    #[test]
    fn test_display() {
        let l = Value::list(vec![
            Value::symbol("quote"),
            Value::list(vec![Value::int(1), Value::string("hi")]),
        ]);
        assert_eq!(l.to_string(), "(quote (1 \"hi\"))");
        assert_eq!(Value::keyword("a").to_string(), ":a");
        assert_eq!(
            Value::list_dotted(vec![Value::int(1)], Value::int(2)).to_string(),
            "(1 . 2)"
        );
    }

    #[test]
    fn test_structural_equality_vs_identity() {
        let a = Value::list(vec![Value::int(1)]);
        let b = Value::list(vec![Value::int(1)]);
        assert_eq!(a, b);
        let (ra, rb) = (a.as_cons().unwrap(), b.as_cons().unwrap());
        assert!(!Rc::ptr_eq(ra, rb));
    }
}
