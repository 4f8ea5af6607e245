//! The compile context and driver: dispatch over source forms, the
//! emission primitives, and the toplevel assembly loop. All state the
//! source language kept in process-wide dynamic variables lives here
//! and is restored on every exit path.

use std::mem;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use sylva_core::{Symbol, SylvaError, Value};

use crate::environment::{BindingKind, Environment};
use crate::expander::MacroFn;
use crate::jsast::{call, get, ident, internals, method_call, JsExpr, JsStmt};
use crate::literal::LiteralTable;
use crate::macro_eval::{MacroEval, ParsedExpander};
use crate::names::NameGen;
use crate::printer::print_program;
use crate::special_forms::SpecialForm;

/// Maximum recursion depth for the compiler, preventing native stack
/// overflow on deeply nested expressions.
const MAX_CONVERT_DEPTH: usize = 256;

/// Functions the runtime library provides; calls to these never count
/// as calls to undefined functions.
const RUNTIME_FUNCTIONS: &[&str] = &[
    "symbol-value",
    "set",
    "funcall",
    "apply",
    "append",
    "values",
    "values-list",
    "error",
    "format",
    "setf",
];

/// Where a compiled value goes: a fresh slot, an existing slot, or
/// nowhere (evaluated for effect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    Fresh,
    Discard,
    Into(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FnInfo {
    pub defined: bool,
    pub called: bool,
}

pub struct Compiler {
    pub(crate) names: NameGen,
    pub(crate) target: Vec<JsStmt>,
    pub(crate) toplevel: Vec<JsStmt>,
    pub(crate) literals: LiteralTable,
    pub(crate) fn_info: HashMap<Symbol, FnInfo>,
    pub(crate) specials: HashSet<Symbol>,
    pub(crate) notinline: HashSet<Symbol>,
    pub(crate) macros: HashMap<Symbol, MacroFn>,
    pub(crate) symbol_macros: HashMap<Symbol, Value>,
    pub(crate) expander_cache: HashMap<usize, Rc<ParsedExpander>>,
    pub(crate) macro_eval: MacroEval,
    pub(crate) compiling_file: bool,
    pub(crate) level: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        let mut fn_info = HashMap::new();
        for name in RUNTIME_FUNCTIONS {
            fn_info.insert(
                Symbol::new(name),
                FnInfo {
                    defined: true,
                    called: false,
                },
            );
        }
        Compiler {
            names: NameGen::new(),
            target: Vec::new(),
            toplevel: Vec::new(),
            literals: LiteralTable::new(),
            fn_info,
            specials: HashSet::new(),
            notinline: HashSet::new(),
            macros: HashMap::new(),
            symbol_macros: HashMap::new(),
            expander_cache: HashMap::new(),
            macro_eval: MacroEval::new(),
            compiling_file: false,
            level: 0,
        }
    }

    // --- Unit-global declarations ---

    pub fn proclaim_special(&mut self, sym: Symbol) {
        self.specials.insert(sym);
    }

    pub fn proclaim_notinline(&mut self, sym: Symbol) {
        self.notinline.insert(sym);
    }

    pub fn define_macro(&mut self, name: Symbol, expander: MacroFn) {
        self.macros.insert(name, expander);
    }

    pub fn define_symbol_macro(&mut self, name: Symbol, expansion: Value) {
        self.symbol_macros.insert(name, expansion);
    }

    pub fn set_compiling_file(&mut self, compiling: bool) {
        self.compiling_file = compiling;
    }

    pub(crate) fn global_macro(&self, name: Symbol) -> Option<MacroFn> {
        self.macros.get(&name).cloned()
    }

    pub(crate) fn global_symbol_macro(&self, name: Symbol) -> Option<Value> {
        self.symbol_macros.get(&name).cloned()
    }

    pub(crate) fn is_special(&self, sym: Symbol) -> bool {
        self.specials.contains(&sym)
    }

    // --- Function info ---

    pub(crate) fn note_called(&mut self, sym: Symbol) {
        self.fn_info.entry(sym).or_default().called = true;
    }

    pub(crate) fn note_defined(&mut self, sym: Symbol) {
        self.fn_info.entry(sym).or_default().defined = true;
    }

    /// Functions called but never defined in this unit. Reporting
    /// resets the table.
    pub fn undefined_functions(&mut self) -> Vec<Symbol> {
        let mut undefined: Vec<Symbol> = self
            .fn_info
            .iter()
            .filter(|(_, info)| info.called && !info.defined)
            .map(|(sym, _)| *sym)
            .collect();
        undefined.sort_by_key(|s| s.name_str());
        self.fn_info.clear();
        undefined
    }

    // --- Emission primitives ---

    pub(crate) fn push_stmt(&mut self, stmt: JsStmt) {
        self.target.push(stmt);
    }

    /// The only way the compiler writes output: route an expression to
    /// its destination.
    pub(crate) fn emit(&mut self, expr: JsExpr, dest: &Dest) -> JsExpr {
        match dest {
            Dest::Fresh => {
                let id = self.names.fresh_var();
                self.target.push(JsStmt::Var(id.clone(), None));
                self.target.push(JsStmt::Assign(ident(id.clone()), expr));
                ident(id)
            }
            Dest::Into(id) => {
                self.target.push(JsStmt::Assign(ident(id.clone()), expr));
                ident(id.clone())
            }
            Dest::Discard => {
                self.target.push(JsStmt::Expr(expr));
                JsExpr::Ident("undefined".to_string())
            }
        }
    }

    /// Pin a destination to a concrete slot before compiling into it
    /// from multiple branches.
    pub(crate) fn materialize(&mut self, dest: Dest) -> (Dest, JsExpr) {
        match dest {
            Dest::Fresh => {
                let id = self.names.fresh_var();
                self.target.push(JsStmt::Var(id.clone(), None));
                (Dest::Into(id.clone()), ident(id))
            }
            Dest::Into(id) => {
                let e = ident(id.clone());
                (Dest::Into(id), e)
            }
            Dest::Discard => (Dest::Discard, JsExpr::Ident("undefined".to_string())),
        }
    }

    /// Statements that route `expr` into an already-materialized
    /// destination (used inside handwritten catch bodies). A discarded
    /// destination still evaluates the expression for effect, matching
    /// `emit`.
    pub(crate) fn store_stmts(&self, dest: &Dest, expr: JsExpr) -> Vec<JsStmt> {
        match dest {
            Dest::Into(id) => vec![JsStmt::Assign(ident(id.clone()), expr)],
            Dest::Discard => vec![JsStmt::Expr(expr)],
            Dest::Fresh => unreachable!("destination must be materialized first"),
        }
    }

    /// Run `f` against a fresh target buffer, restoring the previous
    /// buffer on every exit path, and return the collected statements.
    pub(crate) fn with_fresh_target<T>(
        &mut self,
        f: impl FnOnce(&mut Compiler) -> Result<T, SylvaError>,
    ) -> Result<(Vec<JsStmt>, T), SylvaError> {
        let saved = mem::take(&mut self.target);
        let result = f(self);
        let stmts = mem::replace(&mut self.target, saved);
        Ok((stmts, result?))
    }

    /// The values-context marker for a call: in multiple-value context
    /// the enclosing function's `values` parameter, otherwise the
    /// primary-value wrapper.
    pub(crate) fn values_marker(&self, multiple_value: bool) -> JsExpr {
        if multiple_value {
            ident("values")
        } else {
            internals("pv")
        }
    }

    /// The runtime nil value, via the literal table.
    pub(crate) fn nil_value(&mut self) -> Result<JsExpr, SylvaError> {
        let lit = self.literal(&Value::Nil)?;
        Ok(get(lit, "value"))
    }

    /// The runtime t value, via the literal table.
    pub(crate) fn t_value(&mut self) -> Result<JsExpr, SylvaError> {
        let lit = self.literal(&Value::symbol("t"))?;
        Ok(get(lit, "value"))
    }

    // --- The driver ---

    /// Compile one source form: macro-expand to a fixpoint, then
    /// dispatch on shape. Returns the expression naming the result.
    pub fn convert(
        &mut self,
        form: &Value,
        env: &Environment,
        dest: Dest,
        multiple_value: bool,
    ) -> Result<JsExpr, SylvaError> {
        self.level += 1;
        if self.level > MAX_CONVERT_DEPTH {
            self.level -= 1;
            return Err(SylvaError::compile("maximum compilation depth exceeded"));
        }
        let result = self.convert_expanding(form, env, dest, multiple_value);
        self.level -= 1;
        result
    }

    fn convert_expanding(
        &mut self,
        form: &Value,
        env: &Environment,
        dest: Dest,
        multiple_value: bool,
    ) -> Result<JsExpr, SylvaError> {
        let form = self.macroexpand(form, env)?;
        self.convert_1(&form, env, dest, multiple_value)
    }

    /// Post-expansion dispatch: special form, builtin, or funcall.
    fn convert_1(
        &mut self,
        form: &Value,
        env: &Environment,
        dest: Dest,
        multiple_value: bool,
    ) -> Result<JsExpr, SylvaError> {
        match form {
            Value::Symbol(sym) => self.convert_symbol(*sym, env, dest, multiple_value),
            Value::Nil => {
                let nil = self.nil_value()?;
                Ok(self.emit(nil, &dest))
            }
            Value::Int(_) | Value::Float(_) | Value::Char(_) | Value::Str(_) | Value::Vector(_) => {
                let lit = self.literal(form)?;
                Ok(self.emit(lit, &dest))
            }
            Value::Cons(c) => {
                if let Some(head) = c.car.as_symbol() {
                    if let Some(sf) = SpecialForm::from_symbol(head) {
                        return self.compile_special(sf, form, env, dest, multiple_value);
                    }
                    let lexical_fn = matches!(
                        env.lookup_function(head).map(|b| &b.kind),
                        Some(BindingKind::Function { .. })
                    );
                    if !lexical_fn && !self.notinline.contains(&head) {
                        if let Some(builtin) = crate::builtins::Builtin::from_symbol(head) {
                            return self.compile_builtin(builtin, form, env, dest, multiple_value);
                        }
                    }
                }
                self.compile_funcall(form, env, dest, multiple_value)
            }
        }
    }

    fn convert_symbol(
        &mut self,
        sym: Symbol,
        env: &Environment,
        dest: Dest,
        multiple_value: bool,
    ) -> Result<JsExpr, SylvaError> {
        // Keywords evaluate to themselves through their value cell.
        if sym.is_keyword() {
            let lit = self.literal(&Value::sym(sym))?;
            let value = get(lit, "value");
            return Ok(self.emit(value, &dest));
        }
        if let Some(binding) = env.lookup_variable(sym) {
            if let BindingKind::Variable { js } = &binding.kind {
                if !binding.special && !binding.constant {
                    let slot = ident(js.clone());
                    return Ok(self.emit(slot, &dest));
                }
            }
        } else if sym.named("t") {
            let lit = self.literal(&Value::sym(sym))?;
            let value = get(lit, "value");
            return Ok(self.emit(value, &dest));
        }
        // Special or globally unbound: read the dynamic value.
        let form = Value::list(vec![
            Value::symbol("symbol-value"),
            Value::list(vec![Value::symbol("quote"), Value::sym(sym)]),
        ]);
        self.convert(&form, env, dest, multiple_value)
    }

    // --- Funcall dispatch ---

    pub(crate) fn compile_funcall(
        &mut self,
        form: &Value,
        env: &Environment,
        dest: Dest,
        multiple_value: bool,
    ) -> Result<JsExpr, SylvaError> {
        let head = form.car();
        let args = form
            .cdr()
            .list_to_vec()
            .ok_or_else(|| SylvaError::compile(format!("dotted argument list in {form}")))?;
        let marker = self.values_marker(multiple_value);

        if let Some(sym) = head.as_symbol() {
            if let Some(binding) = env.lookup_function(sym) {
                if let BindingKind::Function { js } = &binding.kind {
                    let callee = ident(js.clone());
                    let call_args = self.convert_call_args(marker, &args, env)?;
                    return Ok(self.emit(call(callee, call_args), &dest));
                }
            }
            self.note_called(sym);
            let lit = self.literal(&Value::sym(sym))?;
            let call_args = self.convert_call_args(marker, &args, env)?;
            return Ok(self.emit(method_call(lit, "fvalue", call_args), &dest));
        }

        if head.has_head("lambda") {
            let f = self.compile_lambda_form(&head, env)?;
            let call_args = self.convert_call_args(marker, &args, env)?;
            return Ok(self.emit(call(f, call_args), &dest));
        }

        if head.has_head("oget") {
            return self.compile_oget_call(&head, &args, env, dest);
        }

        Err(SylvaError::compile(format!(
            "Bad function designator: {head}"
        )))
    }

    fn convert_call_args(
        &mut self,
        marker: JsExpr,
        args: &[Value],
        env: &Environment,
    ) -> Result<Vec<JsExpr>, SylvaError> {
        let mut out = vec![marker];
        for arg in args {
            out.push(self.convert(arg, env, Dest::Fresh, false)?);
        }
        Ok(out)
    }

    /// `((oget obj k…) arg…)`: call through a property chain with
    /// JS-side values at the boundary.
    fn compile_oget_call(
        &mut self,
        head: &Value,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let parts = head
            .cdr()
            .list_to_vec()
            .ok_or_else(|| SylvaError::compile("malformed oget form"))?;
        if parts.is_empty() {
            return Err(SylvaError::compile("Bad function designator: (oget)"));
        }
        let obj = self.convert(&parts[0], env, Dest::Fresh, false)?;
        let mut chain = call(internals("lisp_to_js"), vec![obj]);
        for key in &parts[1..] {
            let k = self.convert(key, env, Dest::Fresh, false)?;
            chain = crate::jsast::property(chain, call(internals("xstring"), vec![k]));
        }
        let mut js_args = Vec::new();
        for arg in args {
            let v = self.convert(arg, env, Dest::Fresh, false)?;
            js_args.push(call(internals("lisp_to_js"), vec![v]));
        }
        let result = call(internals("js_to_lisp"), vec![call(chain, js_args)]);
        Ok(self.emit(result, &dest))
    }

    // --- Toplevel processing ---

    /// Compile a form at toplevel: flatten a leading `progn`, compile
    /// each subform for effect (or with a trailing `return` when the
    /// output becomes a function body).
    pub fn convert_toplevel(&mut self, form: &Value, return_p: bool) -> Result<(), SylvaError> {
        let env = Environment::new();
        let form = self.macroexpand(form, &env)?;
        if form.has_head("progn") {
            let subforms = form
                .cdr()
                .list_to_vec()
                .ok_or_else(|| SylvaError::compile("dotted progn at toplevel"))?;
            if subforms.is_empty() {
                if return_p {
                    let nil = self.nil_value()?;
                    self.push_stmt(JsStmt::Return(nil));
                }
                return Ok(());
            }
            let last = subforms.len() - 1;
            for (i, subform) in subforms.iter().enumerate() {
                self.convert_toplevel(subform, return_p && i == last)?;
            }
            return Ok(());
        }
        if return_p {
            let result = self.convert(&form, &env, Dest::Fresh, true)?;
            self.push_stmt(JsStmt::Return(result));
        } else {
            self.convert(&form, &env, Dest::Discard, false)?;
        }
        Ok(())
    }

    /// Compile one toplevel form into a statement sequence with its
    /// literal initializers first.
    pub fn process_toplevel(&mut self, form: &Value) -> Result<Vec<JsStmt>, SylvaError> {
        let saved_toplevel = mem::take(&mut self.toplevel);
        let saved_target = mem::take(&mut self.target);
        let result = self.convert_toplevel(form, false);
        let code = mem::replace(&mut self.target, saved_target);
        let inits = mem::replace(&mut self.toplevel, saved_toplevel);
        result?;
        let mut stmts = inits;
        stmts.extend(code);
        Ok(stmts)
    }

    /// Compile a sequence of toplevel forms to JavaScript source.
    pub fn compile_program(&mut self, forms: &[Value]) -> Result<String, SylvaError> {
        let mut stmts = Vec::new();
        for form in forms {
            stmts.extend(self.process_toplevel(form)?);
        }
        Ok(print_program(&stmts))
    }
}

// --- Shared form helpers ---

pub(crate) fn require_symbol(value: &Value, context: &str) -> Result<Symbol, SylvaError> {
    value
        .as_symbol()
        .ok_or_else(|| SylvaError::compile(format!("{context}: expected a symbol, got {value}")))
}

pub(crate) fn form_args(form: &Value, context: &str) -> Result<Vec<Value>, SylvaError> {
    form.cdr()
        .list_to_vec()
        .ok_or_else(|| SylvaError::compile(format!("{context}: malformed form {form}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_reader::read_one;

    #[test]
    fn test_return_p_appends_a_return() {
        let mut c = Compiler::new();
        c.convert_toplevel(&read_one("(progn 1 2)").unwrap(), true).unwrap();
        assert!(matches!(c.target.last(), Some(JsStmt::Return(_))));
    }

    #[test]
    fn test_fresh_target_restores_on_error() {
        let mut c = Compiler::new();
        c.push_stmt(JsStmt::Break(None));
        let result = c.with_fresh_target(|inner| {
            inner.push_stmt(JsStmt::Break(None));
            Err::<(), _>(SylvaError::compile("boom"))
        });
        assert!(result.is_err());
        // The outer buffer is back, untouched by the failed nested work.
        assert_eq!(c.target.len(), 1);
    }

    #[test]
    fn test_depth_guard_rejects_unbounded_nesting() {
        let mut source = String::from("1");
        for _ in 0..400 {
            source = format!("(car {source})");
        }
        let mut c = Compiler::new();
        let err = c
            .convert(&read_one(&source).unwrap(), &Environment::new(), Dest::Fresh, false)
            .expect_err("should exceed the depth limit");
        assert!(err.to_string().contains("depth"));
        // The level unwinds, so the compiler is still usable.
        assert_eq!(c.level, 0);
        assert!(c
            .convert(&read_one("1").unwrap(), &Environment::new(), Dest::Fresh, false)
            .is_ok());
    }

    #[test]
    fn test_process_toplevel_puts_literal_initializers_first() {
        let mut c = Compiler::new();
        let stmts = c.process_toplevel(&read_one("(quote x)").unwrap()).unwrap();
        assert!(matches!(&stmts[0], JsStmt::Var(name, Some(_)) if name.starts_with('l')));
    }
}
