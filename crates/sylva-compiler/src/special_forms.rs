//! One compiler per special form. The set is closed: `SpecialForm`
//! enumerates every operator the driver dispatches on before builtins
//! and funcalls.

use sylva_core::{Symbol, SylvaError, Value};

use crate::compiler::{form_args, require_symbol, Compiler, Dest};
use crate::environment::{Binding, BindingKind, Environment, GoTag};
use crate::expander::MacroFn;
use crate::jsast::{
    binary, call, get, ident, internals, method_call, new, typeof_is, JsBinop, JsExpr, JsStmt,
    SwitchClause,
};
use crate::lambda_list::LambdaList;
use crate::quasiquote::expand_backquote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    If,
    Quote,
    Setq,
    Progn,
    Let,
    LetStar,
    Flet,
    Labels,
    Lambda,
    Function,
    Macrolet,
    SymbolMacrolet,
    Block,
    ReturnFrom,
    Tagbody,
    Go,
    Catch,
    Throw,
    UnwindProtect,
    EvalWhen,
    MultipleValueCall,
    MultipleValueProg1,
    Backquote,
    While,
    JsTry,
}

impl SpecialForm {
    pub fn from_symbol(sym: Symbol) -> Option<SpecialForm> {
        if sym.is_keyword() || sym.is_uninterned() {
            return None;
        }
        let name = sym.name_str();
        let sf = match name.as_str() {
            "if" => SpecialForm::If,
            "quote" => SpecialForm::Quote,
            "setq" => SpecialForm::Setq,
            "progn" => SpecialForm::Progn,
            "let" => SpecialForm::Let,
            "let*" => SpecialForm::LetStar,
            "flet" => SpecialForm::Flet,
            "labels" => SpecialForm::Labels,
            "lambda" => SpecialForm::Lambda,
            "function" => SpecialForm::Function,
            "macrolet" => SpecialForm::Macrolet,
            "symbol-macrolet" => SpecialForm::SymbolMacrolet,
            "block" => SpecialForm::Block,
            "return-from" => SpecialForm::ReturnFrom,
            "tagbody" => SpecialForm::Tagbody,
            "go" => SpecialForm::Go,
            "catch" => SpecialForm::Catch,
            "throw" => SpecialForm::Throw,
            "unwind-protect" => SpecialForm::UnwindProtect,
            "eval-when" => SpecialForm::EvalWhen,
            "multiple-value-call" => SpecialForm::MultipleValueCall,
            "multiple-value-prog1" => SpecialForm::MultipleValueProg1,
            "backquote" => SpecialForm::Backquote,
            "%while" => SpecialForm::While,
            "%js-try" => SpecialForm::JsTry,
            _ => return None,
        };
        Some(sf)
    }
}

/// Split leading `(declare (special …))` forms and a docstring off a
/// body, collecting the declared special names.
fn parse_body(forms: &[Value]) -> (Vec<Symbol>, &[Value]) {
    let mut specials = Vec::new();
    let mut i = 0;
    while i < forms.len() {
        if forms[i].has_head("declare") {
            for decl in forms[i].cdr().list_to_vec().unwrap_or_default() {
                if decl.has_head("special") {
                    for s in decl.cdr().list_to_vec().unwrap_or_default() {
                        if let Some(sym) = s.as_symbol() {
                            specials.push(sym);
                        }
                    }
                }
            }
            i += 1;
        } else if forms[i].as_str().is_some() && i + 1 < forms.len() {
            // Docstring.
            i += 1;
        } else {
            break;
        }
    }
    (specials, &forms[i..])
}

fn parse_let_bindings(form: &Value) -> Result<Vec<(Symbol, Value)>, SylvaError> {
    let items = form
        .list_to_vec()
        .ok_or_else(|| SylvaError::compile(format!("malformed bindings: {form}")))?;
    let mut bindings = Vec::new();
    for item in items {
        if let Some(sym) = item.as_symbol() {
            bindings.push((sym, Value::Nil));
            continue;
        }
        let parts = item
            .list_to_vec()
            .filter(|p| !p.is_empty() && p.len() <= 2)
            .ok_or_else(|| SylvaError::compile(format!("malformed binding: {item}")))?;
        let sym = require_symbol(&parts[0], "binding")?;
        bindings.push((sym, parts.get(1).cloned().unwrap_or(Value::Nil)));
    }
    Ok(bindings)
}

fn is_go_tag(form: &Value) -> bool {
    form.as_symbol().is_some() || form.as_int().is_some()
}

impl Compiler {
    pub(crate) fn compile_special(
        &mut self,
        sf: SpecialForm,
        form: &Value,
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let args = form_args(form, "special form")?;
        match sf {
            SpecialForm::If => self.compile_if(&args, env, dest, mv),
            SpecialForm::Quote => self.compile_quote(&args, dest),
            SpecialForm::Setq => self.compile_setq(&args, env, dest),
            SpecialForm::Progn => self.convert_body(&args, env, dest, mv),
            SpecialForm::Let => self.compile_let(&args, env, dest, mv),
            SpecialForm::LetStar => self.compile_let_star(&args, env, dest, mv),
            SpecialForm::Flet => self.compile_flet(&args, env, dest, mv),
            SpecialForm::Labels => self.compile_labels(&args, env, dest, mv),
            SpecialForm::Lambda => {
                let f = self.compile_lambda_form(form, env)?;
                Ok(self.emit(f, &dest))
            }
            SpecialForm::Function => self.compile_function(&args, env, dest),
            SpecialForm::Macrolet => self.compile_macrolet(&args, env, dest, mv),
            SpecialForm::SymbolMacrolet => self.compile_symbol_macrolet(&args, env, dest, mv),
            SpecialForm::Block => self.compile_block(&args, env, dest, mv),
            SpecialForm::ReturnFrom => self.compile_return_from(&args, env, dest),
            SpecialForm::Tagbody => self.compile_tagbody(&args, env, dest),
            SpecialForm::Go => self.compile_go(&args, env, dest),
            SpecialForm::Catch => self.compile_catch(&args, env, dest, mv),
            SpecialForm::Throw => self.compile_throw(&args, env, dest),
            SpecialForm::UnwindProtect => self.compile_unwind_protect(&args, env, dest, mv),
            SpecialForm::EvalWhen => self.compile_eval_when(&args, env, dest, mv),
            SpecialForm::MultipleValueCall => self.compile_multiple_value_call(&args, env, dest, mv),
            SpecialForm::MultipleValueProg1 => {
                self.compile_multiple_value_prog1(&args, env, dest, mv)
            }
            SpecialForm::Backquote => self.compile_backquote(&args, env, dest, mv),
            SpecialForm::While => self.compile_while(&args, env, dest),
            SpecialForm::JsTry => self.compile_js_try(&args, env, dest, mv),
        }
    }

    /// Progn semantics over a body slice: all but the last for effect,
    /// the last into the destination.
    pub(crate) fn convert_body(
        &mut self,
        body: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        match body.split_last() {
            None => {
                let nil = self.nil_value()?;
                Ok(self.emit(nil, &dest))
            }
            Some((last, init)) => {
                for form in init {
                    self.convert(form, env, Dest::Discard, false)?;
                }
                self.convert(last, env, dest, mv)
            }
        }
    }

    // --- Conditionals and assignment ---

    fn compile_if(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        if args.len() < 2 || args.len() > 3 {
            return Err(SylvaError::compile(format!("if expects 2 or 3 forms, got {}", args.len())));
        }
        let (dest, result) = self.materialize(dest);
        let test = self.convert(&args[0], env, Dest::Fresh, false)?;
        let nil = self.nil_value()?;
        let then_env = env;
        let then_dest = dest.clone();
        let (then_stmts, _) =
            self.with_fresh_target(|c| c.convert(&args[1], then_env, then_dest, mv))?;
        let else_form = args.get(2).cloned().unwrap_or(Value::Nil);
        let else_dest = dest.clone();
        let (else_stmts, _) =
            self.with_fresh_target(|c| c.convert(&else_form, env, else_dest, mv))?;
        self.push_stmt(JsStmt::If(
            binary(JsBinop::StrictNe, test, nil),
            then_stmts,
            Some(else_stmts),
        ));
        Ok(result)
    }

    fn compile_quote(&mut self, args: &[Value], dest: Dest) -> Result<JsExpr, SylvaError> {
        let form = args.first().cloned().unwrap_or(Value::Nil);
        let lit = self.literal(&form)?;
        Ok(self.emit(lit, &dest))
    }

    fn compile_setq(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        if args.is_empty() {
            let nil = self.nil_value()?;
            return Ok(self.emit(nil, &dest));
        }
        if args.len() % 2 != 0 {
            return Err(SylvaError::compile("odd pairs in setq"));
        }
        enum Place {
            Lexical(String),
            SymbolMacro(Value),
            Dynamic,
        }
        let mut last = None;
        for pair in args.chunks(2) {
            let sym = require_symbol(&pair[0], "setq")?;
            let place = match env.lookup_variable(sym) {
                Some(binding) => match &binding.kind {
                    BindingKind::Variable { js } if !binding.special && !binding.constant => {
                        Place::Lexical(js.clone())
                    }
                    BindingKind::SymbolMacro { expansion } => Place::SymbolMacro(expansion.clone()),
                    _ => Place::Dynamic,
                },
                None => Place::Dynamic,
            };
            last = Some(match place {
                Place::Lexical(slot) => self.convert(&pair[1], env, Dest::Into(slot), false)?,
                Place::SymbolMacro(expansion) => {
                    let form = Value::list(vec![
                        Value::symbol("setf"),
                        expansion,
                        pair[1].clone(),
                    ]);
                    self.convert(&form, env, Dest::Fresh, false)?
                }
                Place::Dynamic => {
                    let lit = self.literal(&Value::sym(sym))?;
                    let value = self.convert(&pair[1], env, Dest::Fresh, false)?;
                    self.emit(call(internals("set"), vec![lit, value]), &Dest::Fresh)
                }
            });
        }
        let last = last.unwrap();
        Ok(self.emit(last, &dest))
    }

    // --- Binding forms ---

    fn compile_let(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let bindings_form = args
            .first()
            .ok_or_else(|| SylvaError::compile("let: missing bindings"))?;
        let bindings = parse_let_bindings(bindings_form)?;
        let (declared, body) = parse_body(&args[1..]);

        // Values are evaluated left to right in the outer environment.
        let mut lexicals = Vec::new();
        let mut specials = Vec::new();
        for (sym, value_form) in &bindings {
            let value = self.convert(value_form, env, Dest::Fresh, false)?;
            if self.is_special(*sym) || declared.contains(sym) {
                specials.push((*sym, value));
            } else {
                lexicals.push((*sym, value));
            }
        }

        let mut inner = env.clone();
        for (sym, value) in &lexicals {
            let slot = self.names.fresh_var();
            self.push_stmt(JsStmt::Var(slot.clone(), Some(value.clone())));
            inner.push_variable(Binding::variable(*sym, slot));
        }
        for (sym, _) in &specials {
            inner.push_variable(Binding::special_variable(*sym));
        }

        if specials.is_empty() {
            return self.convert_body(body, &inner, dest, mv);
        }

        // Dynamic bindings are installed by the runtime around a thunk
        // that receives the caller's values-context marker.
        let mut sym_lits = Vec::new();
        let mut values = Vec::new();
        for (sym, value) in &specials {
            sym_lits.push(self.literal(&Value::sym(*sym))?);
            values.push(value.clone());
        }
        let (thunk_body, _) = self.with_fresh_target(|c| {
            let result = c.convert_body(body, &inner, Dest::Fresh, mv)?;
            c.push_stmt(JsStmt::Return(result));
            Ok(())
        })?;
        let thunk = JsExpr::Function {
            params: vec!["values".to_string()],
            body: thunk_body,
        };
        let marker = self.values_marker(mv);
        let expr = call(
            internals("withDynamicBindings"),
            vec![marker, JsExpr::Array(sym_lits), JsExpr::Array(values), thunk],
        );
        Ok(self.emit(expr, &dest))
    }

    fn compile_let_star(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let bindings_form = args
            .first()
            .ok_or_else(|| SylvaError::compile("let*: missing bindings"))?;
        let bindings = parse_let_bindings(bindings_form)?;
        let (declared, body) = parse_body(&args[1..]);
        let is_special =
            |c: &Compiler, sym: Symbol| c.is_special(sym) || declared.contains(&sym);
        let any_special = bindings.iter().any(|(sym, _)| is_special(self, *sym));

        if !any_special {
            let mut inner = env.clone();
            for (sym, value_form) in &bindings {
                let value = self.convert(value_form, &inner, Dest::Fresh, false)?;
                let slot = self.names.fresh_var();
                self.push_stmt(JsStmt::Var(slot.clone(), Some(value)));
                inner.push_variable(Binding::variable(*sym, slot));
            }
            return self.convert_body(body, &inner, dest, mv);
        }

        // Sequential binding with shadow-and-restore for specials; the
        // restores run in a finally so non-local exits unwind them too.
        let (dest, result) = self.materialize(dest);
        let mut restores: Vec<JsStmt> = Vec::new();
        let mut inner = env.clone();
        let body_dest = dest;
        let (stmts, _) = self.with_fresh_target(|c| {
            for (sym, value_form) in &bindings {
                if is_special(c, *sym) {
                    let value = c.convert(value_form, &inner, Dest::Fresh, false)?;
                    let lit = c.literal(&Value::sym(*sym))?;
                    let saved = c.names.fresh_var();
                    c.push_stmt(JsStmt::Var(
                        saved.clone(),
                        Some(get(lit.clone(), "value")),
                    ));
                    c.push_stmt(JsStmt::Assign(get(lit.clone(), "value"), value));
                    restores.push(JsStmt::Assign(get(lit, "value"), ident(saved)));
                    inner.push_variable(Binding::special_variable(*sym));
                } else {
                    let value = c.convert(value_form, &inner, Dest::Fresh, false)?;
                    let slot = c.names.fresh_var();
                    c.push_stmt(JsStmt::Var(slot.clone(), Some(value)));
                    inner.push_variable(Binding::variable(*sym, slot));
                }
            }
            c.convert_body(body, &inner, body_dest, mv)?;
            Ok(())
        })?;
        restores.reverse();
        self.push_stmt(JsStmt::Try {
            body: stmts,
            catch: None,
            finally: Some(restores),
        });
        Ok(result)
    }

    // --- Local functions ---

    fn compile_flet(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let defs = args
            .first()
            .and_then(|d| d.list_to_vec())
            .ok_or_else(|| SylvaError::compile("flet: missing definitions"))?;
        let mut names = Vec::new();
        let mut compiled = Vec::new();
        for def in &defs {
            let parts = def
                .list_to_vec()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| SylvaError::compile(format!("malformed flet definition: {def}")))?;
            let name = require_symbol(&parts[0], "flet")?;
            // Definitions compile in the outer environment, wrapped in
            // a block of the function's name.
            compiled.push(self.compile_lambda(Some(name), &parts[1], &parts[2..], env)?);
            names.push(name);
        }

        let mut inner = env.clone();
        let mut param_ids = Vec::new();
        for name in &names {
            let id = self.names.fresh_var();
            inner.push_function(Binding::function(*name, id.clone()));
            param_ids.push(id);
        }
        let body = &args[1..];
        let (wrapper_body, _) = self.with_fresh_target(|c| {
            let result = c.convert_body(body, &inner, Dest::Fresh, mv)?;
            c.push_stmt(JsStmt::Return(result));
            Ok(())
        })?;
        let wrapper = JsExpr::Function {
            params: param_ids,
            body: wrapper_body,
        };
        Ok(self.emit(call(wrapper, compiled), &dest))
    }

    fn compile_labels(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let defs = args
            .first()
            .and_then(|d| d.list_to_vec())
            .ok_or_else(|| SylvaError::compile("labels: missing definitions"))?;
        let mut parsed = Vec::new();
        for def in &defs {
            let parts = def
                .list_to_vec()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| SylvaError::compile(format!("malformed labels definition: {def}")))?;
            let name = require_symbol(&parts[0], "labels")?;
            parsed.push((name, parts));
        }

        // Function slots are allocated first so definitions see one
        // another.
        let mut inner = env.clone();
        let mut ids = Vec::new();
        for (name, _) in &parsed {
            let id = self.names.fresh_var();
            inner.push_function(Binding::function(*name, id.clone()));
            ids.push(id);
        }
        let body = &args[1..];
        let (wrapper_body, _) = self.with_fresh_target(|c| {
            for ((name, parts), id) in parsed.iter().zip(&ids) {
                let f = c.compile_lambda(Some(*name), &parts[1], &parts[2..], &inner)?;
                c.push_stmt(JsStmt::Var(id.clone(), Some(f)));
            }
            let result = c.convert_body(body, &inner, Dest::Fresh, mv)?;
            c.push_stmt(JsStmt::Return(result));
            Ok(())
        })?;
        let wrapper = JsExpr::Function {
            params: vec![],
            body: wrapper_body,
        };
        Ok(self.emit(call(wrapper, vec![]), &dest))
    }

    // --- Functions and lambdas ---

    /// Compile `(lambda lambda-list body…)` (the form itself, not its
    /// arguments) to a function expression.
    pub(crate) fn compile_lambda_form(
        &mut self,
        form: &Value,
        env: &Environment,
    ) -> Result<JsExpr, SylvaError> {
        let args = form_args(form, "lambda")?;
        if args.is_empty() {
            return Err(SylvaError::compile("lambda: missing lambda-list"));
        }
        self.compile_lambda(None, &args[0], &args[1..], env)
    }

    /// The shared function compiler. A name wraps the body in a block
    /// of that name.
    pub(crate) fn compile_lambda(
        &mut self,
        name: Option<Symbol>,
        ll_form: &Value,
        body_forms: &[Value],
        env: &Environment,
    ) -> Result<JsExpr, SylvaError> {
        let ll = LambdaList::parse(ll_form)?;
        let (_declared, body) = parse_body(body_forms);
        let (stmts, params) = self.with_fresh_target(|c| {
            let (params, inner) = c.bind_lambda_list(&ll, env)?;
            let result = match name {
                Some(name) => {
                    let block_form = Value::list_dotted(
                        vec![Value::symbol("block"), Value::sym(name)],
                        Value::list(body.to_vec()),
                    );
                    c.convert(&block_form, &inner, Dest::Fresh, true)?
                }
                None => c.convert_body(body, &inner, Dest::Fresh, true)?,
            };
            c.push_stmt(JsStmt::Return(result));
            Ok(params)
        })?;
        Ok(JsExpr::Function {
            params,
            body: stmts,
        })
    }

    fn compile_function(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let designator = args
            .first()
            .ok_or_else(|| SylvaError::compile("function: missing designator"))?;
        if designator.has_head("lambda") {
            let f = self.compile_lambda_form(designator, env)?;
            return Ok(self.emit(f, &dest));
        }
        if designator.has_head("named-lambda") {
            let parts = form_args(designator, "named-lambda")?;
            if parts.len() < 2 {
                return Err(SylvaError::compile("malformed named-lambda"));
            }
            let name = require_symbol(&parts[0], "named-lambda")?;
            let f = self.compile_lambda(Some(name), &parts[1], &parts[2..], env)?;
            return Ok(self.emit(f, &dest));
        }
        if let Some(sym) = designator.as_symbol() {
            if let Some(binding) = env.lookup_function(sym) {
                match &binding.kind {
                    BindingKind::Function { js } => {
                        let slot = ident(js.clone());
                        return Ok(self.emit(slot, &dest));
                    }
                    BindingKind::Macro { .. } => {
                        return Err(SylvaError::compile(format!(
                            "the macro {sym} was used as a function"
                        )))
                    }
                    _ => {}
                }
            }
            let lit = self.literal(&Value::sym(sym))?;
            let expr = call(internals("symbolFunction"), vec![lit]);
            return Ok(self.emit(expr, &dest));
        }
        Err(SylvaError::compile(format!(
            "Bad function designator: {designator}"
        )))
    }

    // --- Local macros ---

    fn compile_macrolet(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let defs = args
            .first()
            .and_then(|d| d.list_to_vec())
            .ok_or_else(|| SylvaError::compile("macrolet: missing definitions"))?;
        let mut inner = env.clone();
        for def in &defs {
            let parts = def
                .list_to_vec()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| SylvaError::compile(format!("malformed macrolet definition: {def}")))?;
            let name = require_symbol(&parts[0], "macrolet")?;
            // The expander is a source lambda destructuring the call's
            // arguments around the user body.
            let expander = Value::list(vec![
                Value::symbol("lambda"),
                Value::list(vec![Value::symbol("form")]),
                Value::list_dotted(
                    vec![
                        Value::symbol("destructuring-bind"),
                        parts[1].clone(),
                        Value::list(vec![Value::symbol("cdr"), Value::symbol("form")]),
                    ],
                    Value::list(parts[2..].to_vec()),
                ),
            ]);
            inner.push_function(Binding::macro_binding(name, MacroFn::Source(expander)));
        }
        self.convert_body(&args[1..], &inner, dest, mv)
    }

    fn compile_symbol_macrolet(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let defs = args
            .first()
            .and_then(|d| d.list_to_vec())
            .ok_or_else(|| SylvaError::compile("symbol-macrolet: missing definitions"))?;
        let mut inner = env.clone();
        for def in &defs {
            let parts = def
                .list_to_vec()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| {
                    SylvaError::compile(format!("malformed symbol-macrolet definition: {def}"))
                })?;
            let name = require_symbol(&parts[0], "symbol-macrolet")?;
            inner.push_variable(Binding::symbol_macro(name, parts[1].clone()));
        }
        self.convert_body(&args[1..], &inner, dest, mv)
    }

    // --- Non-local exits ---

    fn compile_block(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let name = require_symbol(
            args.first()
                .ok_or_else(|| SylvaError::compile("block: missing name"))?,
            "block",
        )?;
        let (dest, result) = self.materialize(dest);
        let id = self.names.fresh_var();
        let inner = env.extend_block(Binding::block(name, id.clone(), mv));
        let binding = inner.lookup_block(name).unwrap().clone();
        let body_dest = dest.clone();
        let (body_stmts, _) =
            self.with_fresh_target(|c| c.convert_body(&args[1..], &inner, body_dest, mv))?;

        let used = matches!(&binding.kind, BindingKind::Block { used, .. } if used.get());
        if used {
            // The sentinel array gives the block its runtime identity.
            self.push_stmt(JsStmt::Var(id.clone(), Some(JsExpr::Array(vec![]))));
            let cf = self.names.fresh_var();
            let is_ours = binary(
                JsBinop::And,
                binary(JsBinop::InstanceOf, ident(cf.clone()), internals("BlockNLX")),
                binary(JsBinop::StrictEq, get(ident(cf.clone()), "id"), ident(id)),
            );
            let store = self.store_stmts(&dest, get(ident(cf.clone()), "values"));
            let handler = vec![JsStmt::If(
                is_ours,
                store,
                Some(vec![JsStmt::Throw(ident(cf.clone()))]),
            )];
            self.push_stmt(JsStmt::Try {
                body: body_stmts,
                catch: Some((cf, handler)),
                finally: None,
            });
        } else {
            self.target.extend(body_stmts);
        }
        Ok(result)
    }

    fn compile_return_from(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let name = require_symbol(
            args.first()
                .ok_or_else(|| SylvaError::compile("return-from: missing block name"))?,
            "return-from",
        )?;
        let binding = env
            .lookup_block(name)
            .cloned()
            .ok_or_else(|| SylvaError::UnknownBlock(name.to_string()))?;
        let (js, block_mv) = match &binding.kind {
            BindingKind::Block {
                js,
                used,
                multiple_value,
            } => {
                used.set(true);
                (js.clone(), *multiple_value)
            }
            _ => unreachable!("block namespace holds block bindings"),
        };
        let (_, result) = self.materialize(dest);
        let value_form = args.get(1).cloned().unwrap_or(Value::Nil);
        let value = self.convert(&value_form, env, Dest::Fresh, block_mv)?;
        self.push_stmt(JsStmt::Throw(new(
            internals("BlockNLX"),
            vec![ident(js), value, JsExpr::Str(name.to_string())],
        )));
        Ok(result)
    }

    fn compile_tagbody(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let (dest, result) = self.materialize(dest);
        if !args.iter().any(is_go_tag) {
            for form in args {
                self.convert(form, env, Dest::Discard, false)?;
            }
            let nil = self.nil_value()?;
            let stores = self.store_stmts(&dest, nil);
            self.target.extend(stores);
            return Ok(result);
        }

        let branch = self.names.fresh_prefixed("branch");
        let tbidx = self.names.fresh_prefixed("tbidx");

        // Segment the body at its tags; a synthetic start segment
        // covers any forms before the first tag.
        struct Segment {
            index: usize,
            forms: Vec<Value>,
        }
        let mut segments = vec![Segment {
            index: 0,
            forms: Vec::new(),
        }];
        let mut tags = Vec::new();
        let mut next_index = 1;
        for form in args {
            if is_go_tag(form) {
                tags.push(GoTag {
                    tag: form.clone(),
                    tbidx: tbidx.clone(),
                    index: next_index,
                });
                segments.push(Segment {
                    index: next_index,
                    forms: Vec::new(),
                });
                next_index += 1;
            } else {
                segments.last_mut().unwrap().forms.push(form.clone());
            }
        }
        let start_index = if is_go_tag(&args[0]) {
            segments.remove(0);
            1
        } else {
            0
        };

        let inner = env.extend_gotags(tags);
        self.push_stmt(JsStmt::Var(
            branch.clone(),
            Some(JsExpr::Integer(start_index)),
        ));
        self.push_stmt(JsStmt::Var(tbidx.clone(), Some(JsExpr::Array(vec![]))));

        let label = self.names.fresh_prefixed("tbloop");
        let mut clauses = Vec::new();
        for segment in &segments {
            let (stmts, _) = self.with_fresh_target(|c| {
                for form in &segment.forms {
                    c.convert(form, &inner, Dest::Discard, false)?;
                }
                Ok(())
            })?;
            clauses.push(SwitchClause {
                label: Some(JsExpr::Integer(segment.index as i64)),
                body: stmts,
            });
        }
        clauses.push(SwitchClause {
            label: None,
            body: vec![JsStmt::Break(Some(label.clone()))],
        });

        let jump = self.names.fresh_var();
        let is_ours = binary(
            JsBinop::And,
            binary(JsBinop::InstanceOf, ident(jump.clone()), internals("TagNLX")),
            binary(
                JsBinop::StrictEq,
                get(ident(jump.clone()), "id"),
                ident(tbidx),
            ),
        );
        let handler = vec![JsStmt::If(
            is_ours,
            vec![JsStmt::Assign(
                ident(branch.clone()),
                get(ident(jump.clone()), "label"),
            )],
            Some(vec![JsStmt::Throw(ident(jump.clone()))]),
        )];
        let try_stmt = JsStmt::Try {
            body: vec![JsStmt::Switch(ident(branch), clauses)],
            catch: Some((jump, handler)),
            finally: None,
        };
        self.push_stmt(JsStmt::Label(
            label,
            Box::new(JsStmt::While(JsExpr::Bool(true), vec![try_stmt])),
        ));
        let nil = self.nil_value()?;
        let stores = self.store_stmts(&dest, nil);
        self.target.extend(stores);
        Ok(result)
    }

    fn compile_go(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let tag = args
            .first()
            .ok_or_else(|| SylvaError::compile("go: missing tag"))?;
        let gotag = env
            .lookup_gotag(tag)
            .cloned()
            .ok_or_else(|| SylvaError::UnknownTag(tag.to_string()))?;
        let (_, result) = self.materialize(dest);
        self.push_stmt(JsStmt::Throw(new(
            internals("TagNLX"),
            vec![
                ident(gotag.tbidx.clone()),
                JsExpr::Integer(gotag.index as i64),
            ],
        )));
        Ok(result)
    }

    fn compile_catch(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let tag_form = args
            .first()
            .ok_or_else(|| SylvaError::compile("catch: missing tag"))?;
        let (dest, result) = self.materialize(dest);
        let id = self.convert(tag_form, env, Dest::Fresh, false)?;
        let body_dest = dest.clone();
        let (body_stmts, _) =
            self.with_fresh_target(|c| c.convert_body(&args[1..], env, body_dest, mv))?;

        let cf = self.names.fresh_var();
        let is_ours = binary(
            JsBinop::And,
            binary(JsBinop::InstanceOf, ident(cf.clone()), internals("CatchNLX")),
            binary(JsBinop::StrictEq, get(ident(cf.clone()), "id"), id),
        );
        // Re-deliver the thrown values through the catch's own context.
        let forced = call(internals("forcemv"), vec![get(ident(cf.clone()), "values")]);
        let receiver = if mv {
            internals("values")
        } else {
            internals("pv")
        };
        let delivered = method_call(receiver, "apply", vec![ident("this"), forced]);
        let store = self.store_stmts(&dest, delivered);
        let handler = vec![JsStmt::If(
            is_ours,
            store,
            Some(vec![JsStmt::Throw(ident(cf.clone()))]),
        )];
        self.push_stmt(JsStmt::Try {
            body: body_stmts,
            catch: Some((cf, handler)),
            finally: None,
        });
        Ok(result)
    }

    fn compile_throw(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        if args.len() != 2 {
            return Err(SylvaError::compile("throw expects a tag and a value"));
        }
        let (_, result) = self.materialize(dest);
        let id = self.convert(&args[0], env, Dest::Fresh, false)?;
        // The thrown value is compiled in multiple-value context.
        let value = self.convert(&args[1], env, Dest::Fresh, true)?;
        self.push_stmt(JsStmt::Throw(new(internals("CatchNLX"), vec![id, value])));
        Ok(result)
    }

    fn compile_unwind_protect(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let protected = args
            .first()
            .ok_or_else(|| SylvaError::compile("unwind-protect: missing form"))?;
        let (dest, result) = self.materialize(dest);
        let body_dest = dest;
        let (body_stmts, _) =
            self.with_fresh_target(|c| c.convert(protected, env, body_dest, mv))?;
        let (cleanup, _) = self.with_fresh_target(|c| {
            for form in &args[1..] {
                c.convert(form, env, Dest::Discard, false)?;
            }
            Ok(())
        })?;
        self.push_stmt(JsStmt::Try {
            body: body_stmts,
            catch: None,
            finally: Some(cleanup),
        });
        Ok(result)
    }

    // --- Compilation control ---

    fn compile_eval_when(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let situations = args
            .first()
            .and_then(|s| s.list_to_vec())
            .ok_or_else(|| SylvaError::compile("eval-when: missing situations"))?;
        let has = |name: &str| {
            situations
                .iter()
                .any(|s| matches!(s.as_symbol(), Some(sym) if sym.is_keyword() && sym.name_str() == name))
        };
        let body = &args[1..];

        // NOTE: this mirrors the source compiler's observable policy,
        // which is not standards-faithful in all corners.
        if self.compiling_file && self.level == 1 {
            if has("compile-toplevel") {
                let progn = Value::list_dotted(
                    vec![Value::symbol("progn")],
                    Value::list(body.to_vec()),
                );
                self.macro_eval.eval_toplevel(&progn)?;
            }
            if has("load-toplevel") {
                return self.convert_body(body, env, dest, mv);
            }
        } else if has("execute") {
            return self.convert_body(body, env, dest, mv);
        }
        let nil = self.nil_value()?;
        Ok(self.emit(nil, &dest))
    }

    // --- Multiple values ---

    fn compile_multiple_value_call(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        if args.is_empty() {
            return Err(SylvaError::compile("multiple-value-call: missing function"));
        }
        let (dest, result) = self.materialize(dest);
        let marker = self.values_marker(mv);
        let vs = self.names.fresh_var();
        let (wrapper_body, _) = self.with_fresh_target(|c| {
            c.push_stmt(JsStmt::Var(
                vs.clone(),
                Some(JsExpr::Array(vec![ident("values")])),
            ));
            let f = c.convert(&args[0], env, Dest::Fresh, false)?;
            for form in &args[1..] {
                let v = c.convert(form, env, Dest::Fresh, true)?;
                let is_values = binary(
                    JsBinop::And,
                    typeof_is(v.clone(), "object"),
                    binary(
                        JsBinop::In,
                        JsExpr::Str("multiple-value".to_string()),
                        v.clone(),
                    ),
                );
                c.push_stmt(JsStmt::If(
                    is_values,
                    vec![JsStmt::Assign(
                        ident(vs.clone()),
                        method_call(ident(vs.clone()), "concat", vec![v.clone()]),
                    )],
                    Some(vec![JsStmt::Expr(method_call(
                        ident(vs.clone()),
                        "push",
                        vec![v],
                    ))]),
                ));
            }
            c.push_stmt(JsStmt::Return(method_call(
                f,
                "apply",
                vec![ident("this"), ident(vs.clone())],
            )));
            Ok(())
        })?;
        let wrapper = JsExpr::Function {
            params: vec!["values".to_string()],
            body: wrapper_body,
        };
        Ok(self.emit(call(wrapper, vec![marker]), &dest))
    }

    fn compile_multiple_value_prog1(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let first = args
            .first()
            .ok_or_else(|| SylvaError::compile("multiple-value-prog1: missing form"))?;
        let result = self.convert(first, env, dest, mv)?;
        for form in &args[1..] {
            self.convert(form, env, Dest::Discard, false)?;
        }
        Ok(result)
    }

    // --- Rewrites and loops ---

    fn compile_backquote(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let template = args
            .first()
            .ok_or_else(|| SylvaError::compile("backquote: missing template"))?;
        let rewritten = expand_backquote(template)?;
        self.convert(&rewritten, env, dest, mv)
    }

    /// `%while`: the predicate compiles into an inline self-call so its
    /// statements re-run on every iteration. The result is nil.
    fn compile_while(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let pred = args
            .first()
            .ok_or_else(|| SylvaError::compile("%while: missing predicate"))?;
        let (dest, result) = self.materialize(dest);
        let (mut pred_body, pred_value) =
            self.with_fresh_target(|c| c.convert(pred, env, Dest::Fresh, false))?;
        pred_body.push(JsStmt::Return(pred_value));
        let nil = self.nil_value()?;
        let test = binary(
            JsBinop::StrictNe,
            call(
                JsExpr::Function {
                    params: vec![],
                    body: pred_body,
                },
                vec![],
            ),
            nil.clone(),
        );
        let (body_stmts, _) = self.with_fresh_target(|c| {
            for form in &args[1..] {
                c.convert(form, env, Dest::Discard, false)?;
            }
            Ok(())
        })?;
        self.push_stmt(JsStmt::While(test, body_stmts));
        let stores = self.store_stmts(&dest, nil);
        self.target.extend(stores);
        Ok(result)
    }

    /// `%js-try`: optional catch and finally clauses; the caught JS
    /// exception crosses into source-land through `js_to_lisp`, but
    /// non-local exit objects pass through untouched.
    fn compile_js_try(
        &mut self,
        args: &[Value],
        env: &Environment,
        dest: Dest,
        mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let protected = args
            .first()
            .ok_or_else(|| SylvaError::compile("%js-try: missing form"))?;
        let mut catch_clause: Option<(Symbol, Vec<Value>)> = None;
        let mut finally_clause: Option<Vec<Value>> = None;
        for clause in &args[1..] {
            if clause.has_head("catch") {
                if catch_clause.is_some() {
                    return Err(SylvaError::compile("%js-try: duplicate catch clause"));
                }
                let parts = form_args(clause, "%js-try catch")?;
                let var = parts
                    .first()
                    .and_then(|v| v.list_to_vec())
                    .filter(|v| v.len() == 1)
                    .and_then(|v| v[0].as_symbol())
                    .ok_or_else(|| SylvaError::compile("%js-try: malformed catch variable"))?;
                catch_clause = Some((var, parts[1..].to_vec()));
            } else if clause.has_head("finally") {
                if finally_clause.is_some() {
                    return Err(SylvaError::compile("%js-try: duplicate finally clause"));
                }
                finally_clause = Some(form_args(clause, "%js-try finally")?);
            } else {
                return Err(SylvaError::compile(format!(
                    "%js-try: malformed clause {clause}"
                )));
            }
        }
        if catch_clause.is_none() && finally_clause.is_none() {
            return Err(SylvaError::compile("%js-try: needs a catch or finally clause"));
        }

        let (dest, result) = self.materialize(dest);
        let body_dest = dest.clone();
        let (body_stmts, _) =
            self.with_fresh_target(|c| c.convert(protected, env, body_dest, mv))?;

        let catch = match catch_clause {
            None => None,
            Some((var, handler_forms)) => {
                let exc = self.names.fresh_var();
                let handler_dest = dest.clone();
                let (handler, _) = self.with_fresh_target(|c| {
                    c.push_stmt(JsStmt::If(
                        call(internals("isNLX"), vec![ident(exc.clone())]),
                        vec![JsStmt::Throw(ident(exc.clone()))],
                        None,
                    ));
                    let slot = c.names.fresh_var();
                    c.push_stmt(JsStmt::Var(
                        slot.clone(),
                        Some(call(internals("js_to_lisp"), vec![ident(exc.clone())])),
                    ));
                    let inner = env.extend_variable(Binding::variable(var, slot));
                    c.convert_body(&handler_forms, &inner, handler_dest, mv)?;
                    Ok(())
                })?;
                Some((exc, handler))
            }
        };
        let finally = match finally_clause {
            None => None,
            Some(cleanup_forms) => {
                let (cleanup, _) = self.with_fresh_target(|c| {
                    for form in &cleanup_forms {
                        c.convert(form, env, Dest::Discard, false)?;
                    }
                    Ok(())
                })?;
                Some(cleanup)
            }
        };
        self.push_stmt(JsStmt::Try {
            body: body_stmts,
            catch,
            finally,
        });
        Ok(result)
    }
}
