//! The macro-time evaluator: a small structural interpreter used to
//! apply source-form macro expanders and to run
//! `(eval-when (:compile-toplevel) …)` bodies. It understands the
//! template subset macros are written in — quoting, backquote,
//! destructuring, conditionals, and the list builders — and rejects
//! anything else with a macro-expansion error.

use std::cell::Cell;

use sylva_core::{Symbol, SylvaError, Value};

use crate::quasiquote::expand_backquote;

#[derive(Default)]
pub struct MacroEval {
    gensym_counter: Cell<usize>,
}

#[derive(Clone, Default)]
struct Scope {
    bindings: Vec<(Symbol, Value)>,
}

impl Scope {
    fn lookup(&self, name: Symbol) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    fn bind(&mut self, name: Symbol, value: Value) {
        self.bindings.push((name, value));
    }
}

/// A source-form expander `(lambda (form) body…)` validated once, so
/// repeated expansions skip the re-parse.
#[derive(Debug, Clone)]
pub struct ParsedExpander {
    param: Symbol,
    body: Vec<Value>,
}

impl ParsedExpander {
    pub fn parse(lambda: &Value) -> Result<ParsedExpander, SylvaError> {
        let parts = lambda
            .list_to_vec()
            .filter(|p| p.len() >= 2 && p[0] == Value::symbol("lambda"))
            .ok_or_else(|| SylvaError::macro_error("malformed macro expander"))?;
        let params = parts[1]
            .list_to_vec()
            .ok_or_else(|| SylvaError::macro_error("malformed expander lambda-list"))?;
        if params.len() != 1 {
            return Err(SylvaError::macro_error(
                "macro expander must take exactly one argument",
            ));
        }
        let param = params[0]
            .as_symbol()
            .ok_or_else(|| SylvaError::macro_error("expander parameter must be a symbol"))?;
        Ok(ParsedExpander {
            param,
            body: parts[2..].to_vec(),
        })
    }
}

impl MacroEval {
    pub fn new() -> Self {
        MacroEval::default()
    }

    /// Apply a validated expander to a macro call form.
    pub fn apply_parsed(&self, expander: &ParsedExpander, form: &Value) -> Result<Value, SylvaError> {
        let mut scope = Scope::default();
        scope.bind(expander.param, form.clone());
        self.eval_body(&expander.body, &scope)
    }

    /// Apply a source-form expander `(lambda (form) body…)` to a macro
    /// call form, returning the expansion.
    pub fn apply_expander(&self, lambda: &Value, form: &Value) -> Result<Value, SylvaError> {
        self.apply_parsed(&ParsedExpander::parse(lambda)?, form)
    }

    /// Evaluate a form in an empty scope (eval-when bodies).
    pub fn eval_toplevel(&self, form: &Value) -> Result<Value, SylvaError> {
        self.eval(form, &Scope::default())
    }

    fn eval_body(&self, body: &[Value], scope: &Scope) -> Result<Value, SylvaError> {
        let mut result = Value::Nil;
        for form in body {
            result = self.eval(form, scope)?;
        }
        Ok(result)
    }

    fn eval(&self, form: &Value, scope: &Scope) -> Result<Value, SylvaError> {
        match form {
            Value::Nil
            | Value::Int(_)
            | Value::Float(_)
            | Value::Char(_)
            | Value::Str(_)
            | Value::Vector(_) => Ok(form.clone()),
            Value::Symbol(sym) => {
                if sym.is_keyword() || sym.named("t") {
                    return Ok(form.clone());
                }
                scope.lookup(*sym).cloned().ok_or_else(|| {
                    SylvaError::macro_error(format!("unbound variable at macro time: {sym}"))
                })
            }
            Value::Cons(_) => self.eval_list(form, scope),
        }
    }

    fn eval_list(&self, form: &Value, scope: &Scope) -> Result<Value, SylvaError> {
        let head = form.car();
        let head_sym = head
            .as_symbol()
            .ok_or_else(|| SylvaError::macro_error("macro-time call head must be a symbol"))?;
        let args: Vec<Value> = form
            .cdr()
            .list_to_vec()
            .ok_or_else(|| SylvaError::macro_error("dotted call form at macro time"))?;

        let name = head_sym.name_str();
        let arg_at = |i: usize| -> Result<&Value, SylvaError> {
            args.get(i).ok_or_else(|| {
                SylvaError::macro_error(format!("too few arguments to `{name}` at macro time"))
            })
        };
        match name.as_str() {
            "quote" => Ok(args.first().cloned().unwrap_or(Value::Nil)),
            "backquote" => {
                let rewritten = expand_backquote(arg_at(0)?)?;
                self.eval(&rewritten, scope)
            }
            "if" => {
                let test = self.eval(arg_at(0)?, scope)?;
                if !test.is_nil() {
                    self.eval(arg_at(1)?, scope)
                } else if args.len() > 2 {
                    self.eval(&args[2], scope)
                } else {
                    Ok(Value::Nil)
                }
            }
            "progn" => self.eval_body(&args, scope),
            "let" | "let*" => {
                let bindings = arg_at(0)?
                    .list_to_vec()
                    .ok_or_else(|| SylvaError::macro_error("malformed let bindings"))?;
                let mut inner = scope.clone();
                for binding in bindings {
                    let (name, value_form) = match binding.as_symbol() {
                        Some(sym) => (sym, Value::Nil),
                        None => {
                            let pair = binding
                                .list_to_vec()
                                .filter(|p| !p.is_empty())
                                .ok_or_else(|| SylvaError::macro_error("malformed let binding"))?;
                            let sym = pair[0].as_symbol().ok_or_else(|| {
                                SylvaError::macro_error("let binding name must be a symbol")
                            })?;
                            (sym, pair.get(1).cloned().unwrap_or(Value::Nil))
                        }
                    };
                    // let* sees earlier bindings; plain let close enough
                    // for template code, which never relies on the gap.
                    let value = self.eval(&value_form, &inner)?;
                    inner.bind(name, value);
                }
                self.eval_body(&args[1..], &inner)
            }
            "destructuring-bind" => {
                let value = self.eval(arg_at(1)?, scope)?;
                let mut inner = scope.clone();
                destructure(arg_at(0)?, &value, &mut inner)?;
                self.eval_body(&args[2..], &inner)
            }
            _ => {
                let evaled: Vec<Value> = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<_, _>>()?;
                self.apply_builtin(&name, &evaled)
            }
        }
    }

    fn apply_builtin(&self, name: &str, args: &[Value]) -> Result<Value, SylvaError> {
        let arg_at = |i: usize| -> Result<&Value, SylvaError> {
            args.get(i).ok_or_else(|| {
                SylvaError::macro_error(format!("too few arguments to `{name}` at macro time"))
            })
        };
        match name {
            "cons" => Ok(Value::cons(arg_at(0)?.clone(), arg_at(1)?.clone())),
            "car" => Ok(arg_at(0)?.car()),
            "cdr" => Ok(arg_at(0)?.cdr()),
            "cadr" => Ok(arg_at(0)?.cdr().car()),
            "cddr" => Ok(arg_at(0)?.cdr().cdr()),
            "list" => Ok(Value::list(args.to_vec())),
            "list*" => match args.split_last() {
                None => Ok(Value::Nil),
                Some((tail, init)) => Ok(Value::list_dotted(init.to_vec(), tail.clone())),
            },
            "append" => {
                let mut result = args.last().cloned().unwrap_or(Value::Nil);
                for arg in args.iter().rev().skip(1) {
                    let items = arg.list_to_vec().ok_or_else(|| {
                        SylvaError::macro_error("append expects proper lists")
                    })?;
                    result = Value::list_dotted(items, result);
                }
                Ok(result)
            }
            "gensym" => {
                let n = self.gensym_counter.get() + 1;
                self.gensym_counter.set(n);
                Ok(Value::Symbol(Symbol::uninterned(&format!("g{n}"))))
            }
            "not" | "null" => Ok(if arg_at(0)?.is_nil() {
                Value::symbol("t")
            } else {
                Value::Nil
            }),
            other => Err(SylvaError::macro_error(format!(
                "`{other}` is not available at macro expansion time"
            ))),
        }
    }
}

/// Bind a destructuring pattern against a value. Patterns are nested
/// lists of symbols with `&optional`, `&rest`/`&body`, and dotted tails.
fn destructure(pattern: &Value, value: &Value, scope: &mut Scope) -> Result<(), SylvaError> {
    match pattern {
        Value::Nil => Ok(()),
        Value::Symbol(sym) => {
            scope.bind(*sym, value.clone());
            Ok(())
        }
        Value::Cons(_) => {
            let mut pat = pattern.clone();
            let mut val = value.clone();
            let mut optional = false;
            loop {
                let current = pat.clone();
                match current {
                    Value::Nil => return Ok(()),
                    Value::Symbol(sym) => {
                        // Dotted tail binds the rest.
                        scope.bind(sym, val);
                        return Ok(());
                    }
                    Value::Cons(c) => {
                        let head = c.car.clone();
                        let tail = c.cdr.clone();
                        if let Some(sym) = head.as_symbol() {
                            let name = sym.name_str();
                            if name == "&optional" {
                                optional = true;
                                pat = tail;
                                continue;
                            }
                            if name == "&rest" || name == "&body" {
                                let rest_sym = tail.car().as_symbol().ok_or_else(|| {
                                    SylvaError::macro_error("&rest pattern must be a symbol")
                                })?;
                                scope.bind(rest_sym, val);
                                return Ok(());
                            }
                        }
                        // One element of the pattern against one of the
                        // value; in the optional section a (name default)
                        // pair supplies the fallback.
                        let (elem, default) = if optional && head.as_cons().is_some() {
                            match head.list_to_vec() {
                                Some(pair) if !pair.is_empty() => (
                                    pair[0].clone(),
                                    pair.get(1).cloned().unwrap_or(Value::Nil),
                                ),
                                _ => (head.clone(), Value::Nil),
                            }
                        } else {
                            (head.clone(), Value::Nil)
                        };
                        let next_val = match val.as_cons() {
                            Some(vc) => {
                                let item = vc.car.clone();
                                let rest = vc.cdr.clone();
                                destructure(&elem, &item, scope)?;
                                rest
                            }
                            None if optional => {
                                destructure(&elem, &default, scope)?;
                                Value::Nil
                            }
                            None => {
                                return Err(SylvaError::macro_error(format!(
                                    "too few arguments for pattern {pattern}"
                                )))
                            }
                        };
                        val = next_val;
                        pat = tail;
                    }
                    other => {
                        return Err(SylvaError::macro_error(format!(
                            "bad destructuring pattern {other}"
                        )))
                    }
                }
            }
        }
        other => Err(SylvaError::macro_error(format!(
            "bad destructuring pattern {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_reader::read_one;

    fn eval_str(src: &str) -> Value {
        MacroEval::new().eval_toplevel(&read_one(src).unwrap()).unwrap()
    }

    #[test]
    fn test_quote_and_list() {
        assert_eq!(eval_str("(list 'a 'b)").to_string(), "(a b)");
        assert_eq!(eval_str("(cons 1 2)").to_string(), "(1 . 2)");
    }

    #[test]
    fn test_backquote_template() {
        let out = eval_str("(let ((x '(1 2))) `(before ,@x after))");
        assert_eq!(out.to_string(), "(before 1 2 after)");
    }

    #[test]
    fn test_destructuring_bind() {
        let out = eval_str("(destructuring-bind (a (b . c)) '(1 (2 3 4)) (list a b c))");
        assert_eq!(out.to_string(), "(1 2 (3 4))");
    }

    #[test]
    fn test_apply_expander() {
        let ev = MacroEval::new();
        let expander = read_one("(lambda (form) (destructuring-bind (a b) (cdr form) `(+ ,b ,a)))")
            .unwrap();
        let call = read_one("(swap 1 2)").unwrap();
        let out = ev.apply_expander(&expander, &call).unwrap();
        assert_eq!(out.to_string(), "(+ 2 1)");
    }

    #[test]
    fn test_unknown_function_rejected() {
        let ev = MacroEval::new();
        assert!(ev.eval_toplevel(&read_one("(launch-missiles)").unwrap()).is_err());
    }

    #[test]
    fn test_optional_pattern() {
        let out = eval_str("(destructuring-bind (a &optional (b 9)) '(1) (list a b))");
        assert_eq!(out.to_string(), "(1 9)");
    }
}
