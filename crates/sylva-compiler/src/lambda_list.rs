//! Lambda lists: parsing `(a b &optional (o 1 op) &rest r &key k)` and
//! lowering the parameter protocol into argument-count guards,
//! defaulting, rest collection, and keyword parsing.

use sylva_core::{Symbol, SylvaError, Value};

use crate::compiler::{require_symbol, Compiler, Dest};
use crate::environment::{Binding, Environment};
use crate::jsast::{
    argument_at, binary, call, get, ident, internals, nargs, JsBinop, JsExpr, JsStmt, SwitchClause,
};

#[derive(Debug, Clone)]
pub struct OptionalParam {
    pub name: Symbol,
    pub default: Value,
    pub svar: Option<Symbol>,
}

#[derive(Debug, Clone)]
pub struct KeywordParam {
    pub keyword: Symbol,
    pub name: Symbol,
    pub default: Value,
    pub svar: Option<Symbol>,
}

#[derive(Debug, Clone, Default)]
pub struct LambdaList {
    pub required: Vec<Symbol>,
    pub optional: Vec<OptionalParam>,
    pub rest: Option<Symbol>,
    pub keys: Vec<KeywordParam>,
    /// `&key` appeared, even with no keyword parameters after it.
    pub has_keys: bool,
    /// Parsed but deliberately ignored: the unknown-keyword check fires
    /// whenever keyword parameters are present.
    pub allow_other_keys: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Required,
    Optional,
    Rest,
    Keys,
}

impl LambdaList {
    pub fn parse(form: &Value) -> Result<LambdaList, SylvaError> {
        let items = form
            .list_to_vec()
            .ok_or_else(|| SylvaError::compile(format!("Bad lambda-list: {form}")))?;
        let mut ll = LambdaList::default();
        let mut section = Section::Required;
        let mut rest_taken = false;

        for item in &items {
            if let Some(sym) = item.as_symbol() {
                match sym.name_str().as_str() {
                    "&optional" => {
                        if section != Section::Required {
                            return Err(SylvaError::compile(format!("Bad lambda-list: {form}")));
                        }
                        section = Section::Optional;
                        continue;
                    }
                    // The source compiler tolerates &rest after &key,
                    // and keyword checks stay on either way.
                    "&rest" => {
                        if rest_taken {
                            return Err(SylvaError::compile(format!("Bad lambda-list: {form}")));
                        }
                        section = Section::Rest;
                        continue;
                    }
                    "&key" => {
                        ll.has_keys = true;
                        section = Section::Keys;
                        continue;
                    }
                    "&allow-other-keys" => {
                        if section != Section::Keys {
                            return Err(SylvaError::compile(format!("Bad lambda-list: {form}")));
                        }
                        ll.allow_other_keys = true;
                        continue;
                    }
                    _ => {}
                }
            }

            match section {
                Section::Required => {
                    ll.required.push(require_symbol(item, "lambda-list")?);
                }
                Section::Optional => ll.optional.push(parse_optional(item, form)?),
                Section::Rest => {
                    if rest_taken {
                        return Err(SylvaError::compile(format!("Bad lambda-list: {form}")));
                    }
                    ll.rest = Some(require_symbol(item, "lambda-list &rest")?);
                    rest_taken = true;
                }
                Section::Keys => ll.keys.push(parse_keyword(item, form)?),
            }
        }

        if section == Section::Rest && !rest_taken {
            return Err(SylvaError::compile(format!("Bad lambda-list: {form}")));
        }
        Ok(ll)
    }

    pub fn min_args(&self) -> usize {
        self.required.len()
    }

    pub fn max_positional(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    /// The exact arity, when the list is required-only.
    pub fn fixed_arity(&self) -> Option<usize> {
        if self.optional.is_empty() && self.rest.is_none() && !self.has_keys {
            Some(self.required.len())
        } else {
            None
        }
    }
}

fn parse_optional(item: &Value, whole: &Value) -> Result<OptionalParam, SylvaError> {
    if let Some(name) = item.as_symbol() {
        return Ok(OptionalParam {
            name,
            default: Value::Nil,
            svar: None,
        });
    }
    let parts = item
        .list_to_vec()
        .filter(|p| !p.is_empty() && p.len() <= 3)
        .ok_or_else(|| SylvaError::compile(format!("Bad lambda-list: {whole}")))?;
    Ok(OptionalParam {
        name: require_symbol(&parts[0], "optional parameter")?,
        default: parts.get(1).cloned().unwrap_or(Value::Nil),
        svar: parts
            .get(2)
            .map(|v| require_symbol(v, "optional supplied-p"))
            .transpose()?,
    })
}

fn parse_keyword(item: &Value, whole: &Value) -> Result<KeywordParam, SylvaError> {
    // Plain name: the keyword is the name in the keyword package.
    if let Some(name) = item.as_symbol() {
        return Ok(KeywordParam {
            keyword: Symbol::keyword(&name.name_str()),
            name,
            default: Value::Nil,
            svar: None,
        });
    }
    let parts = item
        .list_to_vec()
        .filter(|p| !p.is_empty() && p.len() <= 3)
        .ok_or_else(|| SylvaError::compile(format!("Bad lambda-list: {whole}")))?;
    // First element: name, or (keyword name).
    let (keyword, name) = match parts[0].as_symbol() {
        Some(name) => (Symbol::keyword(&name.name_str()), name),
        None => {
            let pair = parts[0]
                .list_to_vec()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| SylvaError::compile(format!("Bad lambda-list: {whole}")))?;
            let kw = require_symbol(&pair[0], "keyword parameter")?;
            if !kw.is_keyword() {
                return Err(SylvaError::compile(format!("Bad lambda-list: {whole}")));
            }
            (kw, require_symbol(&pair[1], "keyword parameter")?)
        }
    };
    Ok(KeywordParam {
        keyword,
        name,
        default: parts.get(1).cloned().unwrap_or(Value::Nil),
        svar: parts
            .get(2)
            .map(|v| require_symbol(v, "keyword supplied-p"))
            .transpose()?,
    })
}

// --- Lowering ---

impl Compiler {
    /// Emit the whole parameter protocol into the current (function
    /// body) target: count guards, optional defaulting, rest
    /// collection, keyword parsing. Returns the JS parameter names
    /// (with the leading `values` marker) and the body environment.
    pub(crate) fn bind_lambda_list(
        &mut self,
        ll: &LambdaList,
        outer: &Environment,
    ) -> Result<(Vec<String>, Environment), SylvaError> {
        let mut env = outer.clone();
        let mut params = vec!["values".to_string()];

        for name in &ll.required {
            let id = self.names.fresh_var();
            params.push(id.clone());
            env.push_variable(Binding::variable(*name, id));
        }
        let optional_ids: Vec<String> = ll
            .optional
            .iter()
            .map(|_| self.names.fresh_var())
            .collect();
        params.extend(optional_ids.iter().cloned());

        self.emit_argument_checks(ll);
        self.emit_optional_defaults(ll, &optional_ids, &mut env)?;
        self.emit_rest_collection(ll, &mut env)?;
        self.emit_keyword_parsing(ll, &mut env)?;
        Ok((params, env))
    }

    fn emit_argument_checks(&mut self, ll: &LambdaList) {
        if let Some(n) = ll.fixed_arity() {
            let check = call(
                internals("checkArgs"),
                vec![nargs(), JsExpr::Integer(n as i64)],
            );
            self.push_stmt(JsStmt::Expr(check));
            return;
        }
        if ll.min_args() > 0 {
            let check = call(
                internals("checkArgsAtLeast"),
                vec![nargs(), JsExpr::Integer(ll.min_args() as i64)],
            );
            self.push_stmt(JsStmt::Expr(check));
        }
        if ll.rest.is_none() && !ll.has_keys {
            let check = call(
                internals("checkArgsAtMost"),
                vec![nargs(), JsExpr::Integer(ll.max_positional() as i64)],
            );
            self.push_stmt(JsStmt::Expr(check));
        }
    }

    /// A switch on the actual argument count; each case falls through,
    /// so matching the count of provided arguments defaults every
    /// optional after it. Supplied-p variables start as t and are
    /// reset to nil in the case that defaults their parameter.
    fn emit_optional_defaults(
        &mut self,
        ll: &LambdaList,
        optional_ids: &[String],
        env: &mut Environment,
    ) -> Result<(), SylvaError> {
        if ll.optional.is_empty() {
            return Ok(());
        }
        let svar_ids: Vec<Option<String>> = ll
            .optional
            .iter()
            .map(|opt| opt.svar.map(|_| self.names.fresh_var()))
            .collect();
        for svar_id in svar_ids.iter().flatten() {
            let t = self.t_value()?;
            self.push_stmt(JsStmt::Var(svar_id.clone(), Some(t)));
        }

        let mut clauses = Vec::new();
        for (i, opt) in ll.optional.iter().enumerate() {
            let slot = optional_ids[i].clone();
            let case_env = env.clone();
            let (mut body, _) = self.with_fresh_target(|c| {
                c.convert(&opt.default, &case_env, Dest::Into(slot), false)
            })?;
            if let Some(svar_id) = &svar_ids[i] {
                let nil = self.nil_value()?;
                body.push(JsStmt::Assign(ident(svar_id.clone()), nil));
            }
            clauses.push(SwitchClause {
                label: Some(JsExpr::Integer((ll.required.len() + i) as i64)),
                body,
            });
            env.push_variable(Binding::variable(opt.name, optional_ids[i].clone()));
            if let Some(svar) = opt.svar {
                env.push_variable(Binding::variable(svar, svar_ids[i].clone().unwrap()));
            }
        }
        self.push_stmt(JsStmt::Switch(nargs(), clauses));
        Ok(())
    }

    /// Cons the trailing arguments onto a fresh list, last first.
    fn emit_rest_collection(
        &mut self,
        ll: &LambdaList,
        env: &mut Environment,
    ) -> Result<(), SylvaError> {
        let rest = match ll.rest {
            Some(rest) => rest,
            None => return Ok(()),
        };
        let id = self.names.fresh_var();
        let nil = self.nil_value()?;
        self.push_stmt(JsStmt::Var(id.clone(), Some(nil)));
        let i = self.names.fresh_var();
        let cons = JsExpr::Object(vec![
            ("car".to_string(), argument_at(ident(i.clone()))),
            ("cdr".to_string(), ident(id.clone())),
        ]);
        self.push_stmt(JsStmt::For {
            init: Some(Box::new(JsStmt::Var(
                i.clone(),
                Some(binary(JsBinop::Sub, nargs(), JsExpr::Integer(1))),
            ))),
            test: Some(binary(
                JsBinop::Ge,
                ident(i.clone()),
                JsExpr::Integer(ll.max_positional() as i64),
            )),
            step: Some(Box::new(JsStmt::Assign(
                ident(i.clone()),
                binary(JsBinop::Sub, ident(i), JsExpr::Integer(1)),
            ))),
            body: vec![JsStmt::Assign(ident(id.clone()), cons)],
        });
        env.push_variable(Binding::variable(rest, id));
        Ok(())
    }

    /// Per-keyword scan loops, then the odd-tail and unknown-keyword
    /// guards. The unknown-keyword check fires whenever keyword
    /// parameters are present, `&rest` and `&allow-other-keys`
    /// notwithstanding.
    fn emit_keyword_parsing(
        &mut self,
        ll: &LambdaList,
        env: &mut Environment,
    ) -> Result<(), SylvaError> {
        if !ll.has_keys {
            return Ok(());
        }
        let start = ll.max_positional() as i64;

        for key in &ll.keys {
            let slot = self.names.fresh_var();
            self.push_stmt(JsStmt::Var(slot.clone(), None));
            let svar_id = key.svar.map(|_| self.names.fresh_var());
            if let Some(svar_id) = &svar_id {
                self.push_stmt(JsStmt::Var(svar_id.clone(), None));
            }

            let kw_lit = self.literal(&Value::sym(key.keyword))?;
            let i = self.names.fresh_var();
            self.push_stmt(JsStmt::Var(i.clone(), Some(JsExpr::Integer(start))));

            let mut match_body = vec![JsStmt::Assign(
                ident(slot.clone()),
                argument_at(binary(JsBinop::Add, ident(i.clone()), JsExpr::Integer(1))),
            )];
            if let Some(svar_id) = &svar_id {
                let t = self.t_value()?;
                match_body.push(JsStmt::Assign(ident(svar_id.clone()), t));
            }
            match_body.push(JsStmt::Break(None));

            self.push_stmt(JsStmt::For {
                init: None,
                test: Some(binary(JsBinop::Lt, ident(i.clone()), nargs())),
                step: Some(Box::new(JsStmt::Assign(
                    ident(i.clone()),
                    binary(JsBinop::Add, ident(i.clone()), JsExpr::Integer(2)),
                ))),
                body: vec![JsStmt::If(
                    binary(
                        JsBinop::StrictEq,
                        argument_at(ident(i.clone())),
                        kw_lit.clone(),
                    ),
                    match_body,
                    None,
                )],
            });

            // Scanned past the end without a match: default.
            let default_env = env.clone();
            let default_slot = slot.clone();
            let (mut default_body, _) = self.with_fresh_target(|c| {
                c.convert(&key.default, &default_env, Dest::Into(default_slot), false)
            })?;
            if let Some(svar_id) = &svar_id {
                let nil = self.nil_value()?;
                default_body.push(JsStmt::Assign(ident(svar_id.clone()), nil));
            }
            self.push_stmt(JsStmt::If(
                binary(JsBinop::Ge, ident(i), nargs()),
                default_body,
                None,
            ));

            env.push_variable(Binding::variable(key.name, slot));
            if let Some(svar) = key.svar {
                env.push_variable(Binding::variable(svar, svar_id.unwrap()));
            }
        }

        // Odd-length keyword tail.
        let tail_len = binary(JsBinop::Sub, nargs(), JsExpr::Integer(start));
        self.push_stmt(JsStmt::If(
            binary(
                JsBinop::StrictEq,
                binary(JsBinop::Mod, tail_len, JsExpr::Integer(2)),
                JsExpr::Integer(1),
            ),
            vec![JsStmt::Throw(JsExpr::Str(
                "Odd number of keyword arguments.".to_string(),
            ))],
            None,
        ));

        // Unknown keywords.
        let i = self.names.fresh_var();
        let mut known: Option<JsExpr> = None;
        for key in &ll.keys {
            let kw_lit = self.literal(&Value::sym(key.keyword))?;
            let this_kw = binary(JsBinop::StrictEq, argument_at(ident(i.clone())), kw_lit);
            known = Some(match known {
                None => this_kw,
                Some(acc) => binary(JsBinop::Or, acc, this_kw),
            });
        }
        let unknown = match known {
            None => JsExpr::Bool(true),
            Some(known) => crate::jsast::unary(crate::jsast::JsUnop::Not, known),
        };
        let message = binary(
            JsBinop::Add,
            JsExpr::Str("Unknown keyword argument ".to_string()),
            call(
                internals("xstring"),
                vec![get(argument_at(ident(i.clone())), "name")],
            ),
        );
        self.push_stmt(JsStmt::For {
            init: Some(Box::new(JsStmt::Var(i.clone(), Some(JsExpr::Integer(start))))),
            test: Some(binary(JsBinop::Lt, ident(i.clone()), nargs())),
            step: Some(Box::new(JsStmt::Assign(
                ident(i.clone()),
                binary(JsBinop::Add, ident(i), JsExpr::Integer(2)),
            ))),
            body: vec![JsStmt::If(unknown, vec![JsStmt::Throw(message)], None)],
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_reader::read_one;

    fn parse(src: &str) -> LambdaList {
        LambdaList::parse(&read_one(src).unwrap()).unwrap()
    }

    #[test]
    fn test_required_only() {
        let ll = parse("(a b c)");
        assert_eq!(ll.required.len(), 3);
        assert_eq!(ll.fixed_arity(), Some(3));
    }

    #[test]
    fn test_optional_with_default_and_svar() {
        let ll = parse("(a &optional (o 1 op) q)");
        assert_eq!(ll.fixed_arity(), None);
        assert_eq!(ll.optional.len(), 2);
        assert_eq!(ll.optional[0].svar.unwrap().name_str(), "op");
        assert_eq!(ll.optional[1].default, Value::Nil);
        assert_eq!(ll.max_positional(), 3);
    }

    #[test]
    fn test_rest_and_keys() {
        let ll = parse("(&rest r &key a ((:b bee) 2 bp) &allow-other-keys)");
        assert_eq!(ll.rest.unwrap().name_str(), "r");
        assert!(ll.has_keys);
        assert!(ll.allow_other_keys);
        assert_eq!(ll.keys.len(), 2);
        assert!(ll.keys[0].keyword.is_keyword());
        assert_eq!(ll.keys[1].name.name_str(), "bee");
        assert_eq!(ll.keys[1].svar.unwrap().name_str(), "bp");
    }

    #[test]
    fn test_bare_key_marker() {
        let ll = parse("(a &key)");
        assert!(ll.has_keys);
        assert!(ll.keys.is_empty());
        assert_eq!(ll.fixed_arity(), None);
    }

    #[test]
    fn test_bad_lists_rejected() {
        assert!(LambdaList::parse(&read_one("(a &rest)").unwrap()).is_err());
        assert!(LambdaList::parse(&read_one("(a &key &optional b)").unwrap()).is_err());
        assert!(LambdaList::parse(&read_one("(1)").unwrap()).is_err());
        assert!(LambdaList::parse(&read_one("(a . b)").unwrap()).is_err());
    }
}
