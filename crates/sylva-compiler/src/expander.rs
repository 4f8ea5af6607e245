//! Macro expansion: `macroexpand-1` over the lexical environment and
//! the unit-global macro tables. An expander is either a precompiled
//! callable or a source lambda applied through the macro-time
//! evaluator; source expanders are parsed once per binding identity.

use std::fmt;
use std::rc::Rc;

use sylva_core::{SylvaError, Value};

use crate::compiler::Compiler;
use crate::environment::{BindingKind, Environment};
use crate::macro_eval::ParsedExpander;

/// A precompiled macro function: whole call form and environment in,
/// expansion out.
pub type NativeExpander = dyn Fn(&Value, &Environment) -> Result<Value, SylvaError>;

#[derive(Clone)]
pub enum MacroFn {
    /// A callable expander.
    Native(Rc<NativeExpander>),
    /// A source `(lambda (form) …)`, the bootstrap shape; applied via
    /// the macro-time evaluator.
    Source(Value),
}

impl fmt::Debug for MacroFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroFn::Native(_) => write!(f, "<native-expander>"),
            MacroFn::Source(src) => write!(f, "<source-expander {src}>"),
        }
    }
}

impl Compiler {
    /// One step of macro expansion: `(form', expanded?)`.
    ///
    /// Symbols may be symbol macros in the variable namespace; cons
    /// heads may resolve to macro bindings in the function namespace.
    /// Lexical function bindings shadow global macros of the same name.
    pub fn macroexpand_1(
        &mut self,
        form: &Value,
        env: &Environment,
    ) -> Result<(Value, bool), SylvaError> {
        if let Some(sym) = form.as_symbol() {
            if let Some(binding) = env.lookup_variable(sym) {
                if let BindingKind::SymbolMacro { expansion } = &binding.kind {
                    return Ok((expansion.clone(), true));
                }
                return Ok((form.clone(), false));
            }
            if let Some(expansion) = self.global_symbol_macro(sym) {
                return Ok((expansion, true));
            }
            return Ok((form.clone(), false));
        }

        let head = match form.as_cons() {
            Some(c) => c.car.clone(),
            None => return Ok((form.clone(), false)),
        };
        let head_sym = match head.as_symbol() {
            Some(s) => s,
            None => return Ok((form.clone(), false)),
        };

        let expander = match env.lookup_function(head_sym) {
            Some(binding) => match &binding.kind {
                BindingKind::Macro { expander } => Some(expander.clone()),
                // A lexical function shadows any global macro.
                _ => None,
            },
            None => self.global_macro(head_sym),
        };

        match expander {
            Some(expander) => {
                let expansion = self.apply_macro(&expander, form, env)?;
                Ok((expansion, true))
            }
            None => Ok((form.clone(), false)),
        }
    }

    /// Expand to a fixpoint.
    pub fn macroexpand(&mut self, form: &Value, env: &Environment) -> Result<Value, SylvaError> {
        let mut form = form.clone();
        loop {
            let (expansion, expanded) = self.macroexpand_1(&form, env)?;
            if !expanded {
                return Ok(form);
            }
            form = expansion;
        }
    }

    fn apply_macro(
        &mut self,
        expander: &MacroFn,
        form: &Value,
        env: &Environment,
    ) -> Result<Value, SylvaError> {
        match expander {
            MacroFn::Native(f) => f(form, env),
            MacroFn::Source(src) => {
                let parsed = self.parsed_expander(src)?;
                self.macro_eval.apply_parsed(&parsed, form)
            }
        }
    }

    /// Parse a source expander, caching by the identity of its form.
    fn parsed_expander(&mut self, src: &Value) -> Result<Rc<ParsedExpander>, SylvaError> {
        let key = src
            .as_cons()
            .map(|c| Rc::as_ptr(c) as usize)
            .ok_or_else(|| SylvaError::macro_error("malformed macro expander"))?;
        if let Some(parsed) = self.expander_cache.get(&key) {
            return Ok(parsed.clone());
        }
        let parsed = Rc::new(ParsedExpander::parse(src)?);
        self.expander_cache.insert(key, parsed.clone());
        Ok(parsed)
    }
}
