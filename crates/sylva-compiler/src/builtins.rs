//! Compile-time-expanded operators: arithmetic, comparisons, cons and
//! list primitives, symbol/char/string predicates, storage vectors,
//! and the JS FFI. A builtin declared notinline compiles as an
//! ordinary funcall instead.

use sylva_core::{Symbol, SylvaError, Value};

use crate::compiler::{form_args, Compiler, Dest};
use crate::environment::Environment;
use crate::jsast::{
    binary, call, get, internals, property, typeof_is, unary, JsBinop, JsExpr, JsStmt, JsUnop,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    NumEq,
    NumNe,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Not,
    Cons,
    Car,
    Cdr,
    Consp,
    Rplaca,
    Rplacd,
    List,
    Symbolp,
    SymbolName,
    Boundp,
    Fset,
    Numberp,
    Integerp,
    Floatp,
    Characterp,
    Stringp,
    CharCode,
    CodeChar,
    CharUpcase,
    CharDowncase,
    StorageVectorRef,
    StorageVectorSet,
    StorageVectorSize,
    JsVref,
    JsVset,
    Oget,
    Oset,
}

impl Builtin {
    pub fn from_symbol(sym: Symbol) -> Option<Builtin> {
        if sym.is_keyword() || sym.is_uninterned() {
            return None;
        }
        let name = sym.name_str();
        let b = match name.as_str() {
            "+" => Builtin::Add,
            "-" => Builtin::Sub,
            "*" => Builtin::Mul,
            "/" => Builtin::Div,
            "mod" => Builtin::Mod,
            "=" => Builtin::NumEq,
            "/=" => Builtin::NumNe,
            "<" => Builtin::Lt,
            ">" => Builtin::Gt,
            "<=" => Builtin::Le,
            ">=" => Builtin::Ge,
            "eq" => Builtin::Eq,
            "not" => Builtin::Not,
            "cons" => Builtin::Cons,
            "car" => Builtin::Car,
            "cdr" => Builtin::Cdr,
            "consp" => Builtin::Consp,
            "rplaca" => Builtin::Rplaca,
            "rplacd" => Builtin::Rplacd,
            "list" => Builtin::List,
            "symbolp" => Builtin::Symbolp,
            "symbol-name" => Builtin::SymbolName,
            "boundp" => Builtin::Boundp,
            "fset" => Builtin::Fset,
            "numberp" => Builtin::Numberp,
            "integerp" => Builtin::Integerp,
            "floatp" => Builtin::Floatp,
            "characterp" => Builtin::Characterp,
            "stringp" => Builtin::Stringp,
            "char-code" => Builtin::CharCode,
            "code-char" => Builtin::CodeChar,
            "char-upcase" => Builtin::CharUpcase,
            "char-downcase" => Builtin::CharDowncase,
            "storage-vector-ref" => Builtin::StorageVectorRef,
            "storage-vector-set" => Builtin::StorageVectorSet,
            "storage-vector-size" => Builtin::StorageVectorSize,
            "%js-vref" => Builtin::JsVref,
            "%js-vset" => Builtin::JsVset,
            "oget" => Builtin::Oget,
            "oset" => Builtin::Oset,
            _ => return None,
        };
        Some(b)
    }

    fn name(&self) -> &'static str {
        match self {
            Builtin::Add => "+",
            Builtin::Sub => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::Mod => "mod",
            Builtin::NumEq => "=",
            Builtin::NumNe => "/=",
            Builtin::Lt => "<",
            Builtin::Gt => ">",
            Builtin::Le => "<=",
            Builtin::Ge => ">=",
            Builtin::Eq => "eq",
            Builtin::Not => "not",
            Builtin::Cons => "cons",
            Builtin::Car => "car",
            Builtin::Cdr => "cdr",
            Builtin::Consp => "consp",
            Builtin::Rplaca => "rplaca",
            Builtin::Rplacd => "rplacd",
            Builtin::List => "list",
            Builtin::Symbolp => "symbolp",
            Builtin::SymbolName => "symbol-name",
            Builtin::Boundp => "boundp",
            Builtin::Fset => "fset",
            Builtin::Numberp => "numberp",
            Builtin::Integerp => "integerp",
            Builtin::Floatp => "floatp",
            Builtin::Characterp => "characterp",
            Builtin::Stringp => "stringp",
            Builtin::CharCode => "char-code",
            Builtin::CodeChar => "code-char",
            Builtin::CharUpcase => "char-upcase",
            Builtin::CharDowncase => "char-downcase",
            Builtin::StorageVectorRef => "storage-vector-ref",
            Builtin::StorageVectorSet => "storage-vector-set",
            Builtin::StorageVectorSize => "storage-vector-size",
            Builtin::JsVref => "%js-vref",
            Builtin::JsVset => "%js-vset",
            Builtin::Oget => "oget",
            Builtin::Oset => "oset",
        }
    }
}

fn arity(name: &str, args: &[JsExpr], n: usize) -> Result<(), SylvaError> {
    if args.len() != n {
        return Err(SylvaError::compile(format!(
            "{name} expects {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

/// `typeof x === "object" && "car" in x`
fn is_cons_shape(x: &JsExpr) -> JsExpr {
    binary(
        JsBinop::And,
        typeof_is(x.clone(), "object"),
        binary(JsBinop::In, JsExpr::Str("car".to_string()), x.clone()),
    )
}

impl Compiler {
    pub(crate) fn compile_builtin(
        &mut self,
        builtin: Builtin,
        form: &Value,
        env: &Environment,
        dest: Dest,
        _mv: bool,
    ) -> Result<JsExpr, SylvaError> {
        let name = builtin.name();
        let arg_forms = form_args(form, name)?;

        // The FFI forms constrain their argument shapes at compile
        // time, so they get the source forms rather than values.
        match builtin {
            Builtin::JsVref => return self.compile_js_vref(name, &arg_forms, dest),
            Builtin::JsVset => return self.compile_js_vset(name, &arg_forms, env, dest),
            Builtin::Fset => return self.compile_fset(name, &arg_forms, env, dest),
            _ => {}
        }

        let args = self.convert_args(&arg_forms, env)?;
        match builtin {
            Builtin::Add => self.compile_variadic_numeric(JsBinop::Add, JsExpr::Integer(0), args, dest),
            Builtin::Mul => self.compile_variadic_numeric(JsBinop::Mul, JsExpr::Integer(1), args, dest),
            Builtin::Sub => {
                if args.is_empty() {
                    return Err(SylvaError::compile("- expects at least 1 argument"));
                }
                self.check_numbers(&args);
                let expr = if args.len() == 1 {
                    unary(JsUnop::Neg, args[0].clone())
                } else {
                    args.into_iter()
                        .reduce(|acc, x| binary(JsBinop::Sub, acc, x))
                        .unwrap()
                };
                Ok(self.emit(expr, &dest))
            }
            Builtin::Div => {
                if args.is_empty() {
                    return Err(SylvaError::compile("/ expects at least 1 argument"));
                }
                self.check_numbers(&args);
                let expr = if args.len() == 1 {
                    call(
                        internals("handled_division"),
                        vec![JsExpr::Integer(1), args[0].clone()],
                    )
                } else {
                    args.into_iter()
                        .reduce(|acc, x| call(internals("handled_division"), vec![acc, x]))
                        .unwrap()
                };
                Ok(self.emit(expr, &dest))
            }
            Builtin::Mod => {
                arity(name, &args, 2)?;
                self.check_numbers(&args);
                let expr = binary(JsBinop::Mod, args[0].clone(), args[1].clone());
                Ok(self.emit(expr, &dest))
            }

            Builtin::NumEq => self.compile_comparison(JsBinop::StrictEq, args, dest),
            Builtin::NumNe => self.compile_comparison(JsBinop::StrictNe, args, dest),
            Builtin::Lt => self.compile_comparison(JsBinop::Lt, args, dest),
            Builtin::Gt => self.compile_comparison(JsBinop::Gt, args, dest),
            Builtin::Le => self.compile_comparison(JsBinop::Le, args, dest),
            Builtin::Ge => self.compile_comparison(JsBinop::Ge, args, dest),

            Builtin::Eq => {
                arity(name, &args, 2)?;
                let test = binary(JsBinop::StrictEq, args[0].clone(), args[1].clone());
                self.emit_boolean(test, dest)
            }
            Builtin::Not => {
                arity(name, &args, 1)?;
                let nil = self.nil_value()?;
                let test = binary(JsBinop::StrictEq, args[0].clone(), nil);
                self.emit_boolean(test, dest)
            }

            Builtin::Cons => {
                arity(name, &args, 2)?;
                let expr = JsExpr::Object(vec![
                    ("car".to_string(), args[0].clone()),
                    ("cdr".to_string(), args[1].clone()),
                ]);
                Ok(self.emit(expr, &dest))
            }
            Builtin::Car => self.compile_cons_access(name, "car", args, dest),
            Builtin::Cdr => self.compile_cons_access(name, "cdr", args, dest),
            Builtin::Consp => {
                arity(name, &args, 1)?;
                self.emit_boolean(is_cons_shape(&args[0]), dest)
            }
            Builtin::Rplaca => self.compile_rplac(name, "car", args, dest),
            Builtin::Rplacd => self.compile_rplac(name, "cdr", args, dest),
            Builtin::List => {
                let mut expr = self.nil_value()?;
                for arg in args.into_iter().rev() {
                    expr = JsExpr::Object(vec![
                        ("car".to_string(), arg),
                        ("cdr".to_string(), expr),
                    ]);
                }
                Ok(self.emit(expr, &dest))
            }

            Builtin::Symbolp => {
                arity(name, &args, 1)?;
                let test = binary(
                    JsBinop::InstanceOf,
                    args[0].clone(),
                    internals("Symbol"),
                );
                self.emit_boolean(test, dest)
            }
            Builtin::SymbolName => {
                arity(name, &args, 1)?;
                let expr = get(args[0].clone(), "name");
                Ok(self.emit(expr, &dest))
            }
            Builtin::Boundp => {
                arity(name, &args, 1)?;
                let test = binary(
                    JsBinop::In,
                    JsExpr::Str("value".to_string()),
                    args[0].clone(),
                );
                self.emit_boolean(test, dest)
            }

            Builtin::Numberp => {
                arity(name, &args, 1)?;
                self.emit_boolean(typeof_is(args[0].clone(), "number"), dest)
            }
            Builtin::Integerp => {
                arity(name, &args, 1)?;
                let test = binary(
                    JsBinop::And,
                    typeof_is(args[0].clone(), "number"),
                    binary(
                        JsBinop::StrictEq,
                        binary(JsBinop::Mod, args[0].clone(), JsExpr::Integer(1)),
                        JsExpr::Integer(0),
                    ),
                );
                self.emit_boolean(test, dest)
            }
            Builtin::Floatp => {
                arity(name, &args, 1)?;
                let test = binary(
                    JsBinop::And,
                    typeof_is(args[0].clone(), "number"),
                    binary(
                        JsBinop::StrictNe,
                        binary(JsBinop::Mod, args[0].clone(), JsExpr::Integer(1)),
                        JsExpr::Integer(0),
                    ),
                );
                self.emit_boolean(test, dest)
            }
            Builtin::Characterp => {
                // Strings of length 1 or 2, admitting surrogate pairs.
                arity(name, &args, 1)?;
                let len = get(args[0].clone(), "length");
                let test = binary(
                    JsBinop::And,
                    typeof_is(args[0].clone(), "string"),
                    binary(
                        JsBinop::Or,
                        binary(JsBinop::StrictEq, len.clone(), JsExpr::Integer(1)),
                        binary(JsBinop::StrictEq, len, JsExpr::Integer(2)),
                    ),
                );
                self.emit_boolean(test, dest)
            }
            Builtin::Stringp => {
                arity(name, &args, 1)?;
                let test = binary(
                    JsBinop::And,
                    typeof_is(args[0].clone(), "object"),
                    binary(
                        JsBinop::In,
                        JsExpr::Str("stringp".to_string()),
                        args[0].clone(),
                    ),
                );
                self.emit_boolean(test, dest)
            }

            Builtin::CharCode => self.compile_char_helper(name, "char_to_codepoint", args, dest),
            Builtin::CodeChar => self.compile_char_helper(name, "char_from_codepoint", args, dest),
            Builtin::CharUpcase => self.compile_char_helper(name, "safe_char_upcase", args, dest),
            Builtin::CharDowncase => {
                self.compile_char_helper(name, "safe_char_downcase", args, dest)
            }

            Builtin::StorageVectorRef => {
                arity(name, &args, 2)?;
                self.emit_range_check(&args[0], &args[1]);
                let expr = property(args[0].clone(), args[1].clone());
                Ok(self.emit(expr, &dest))
            }
            Builtin::StorageVectorSet => {
                arity(name, &args, 3)?;
                self.emit_range_check(&args[0], &args[1]);
                self.push_stmt(JsStmt::Assign(
                    property(args[0].clone(), args[1].clone()),
                    args[2].clone(),
                ));
                let value = args[2].clone();
                Ok(self.emit(value, &dest))
            }
            Builtin::StorageVectorSize => {
                arity(name, &args, 1)?;
                let expr = get(args[0].clone(), "length");
                Ok(self.emit(expr, &dest))
            }

            Builtin::Oget => {
                if args.is_empty() {
                    return Err(SylvaError::compile("oget expects at least 1 argument"));
                }
                let mut chain = call(internals("lisp_to_js"), vec![args[0].clone()]);
                for key in &args[1..] {
                    chain = property(chain, call(internals("xstring"), vec![key.clone()]));
                }
                let expr = call(internals("js_to_lisp"), vec![chain]);
                Ok(self.emit(expr, &dest))
            }
            Builtin::Oset => {
                if args.len() < 3 {
                    return Err(SylvaError::compile(
                        "oset expects an object, at least one key, and a value",
                    ));
                }
                let value = args.last().unwrap().clone();
                let mut chain = call(internals("lisp_to_js"), vec![args[0].clone()]);
                for key in &args[1..args.len() - 2] {
                    chain = property(chain, call(internals("xstring"), vec![key.clone()]));
                }
                let last_key = args[args.len() - 2].clone();
                self.push_stmt(JsStmt::Assign(
                    property(chain, call(internals("xstring"), vec![last_key])),
                    call(internals("lisp_to_js"), vec![value.clone()]),
                ));
                Ok(self.emit(value, &dest))
            }

            Builtin::JsVref | Builtin::JsVset | Builtin::Fset => unreachable!("handled above"),
        }
    }

    fn convert_args(
        &mut self,
        forms: &[Value],
        env: &Environment,
    ) -> Result<Vec<JsExpr>, SylvaError> {
        forms
            .iter()
            .map(|f| self.convert(f, env, Dest::Fresh, false))
            .collect()
    }

    /// Guard every operand of a numeric operator.
    fn check_numbers(&mut self, args: &[JsExpr]) {
        for arg in args {
            self.push_stmt(JsStmt::If(
                binary(
                    JsBinop::StrictNe,
                    unary(JsUnop::TypeOf, arg.clone()),
                    JsExpr::Str("number".to_string()),
                ),
                vec![JsStmt::Throw(JsExpr::Str("Not a number!".to_string()))],
                None,
            ));
        }
    }

    fn compile_variadic_numeric(
        &mut self,
        op: JsBinop,
        identity: JsExpr,
        args: Vec<JsExpr>,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        self.check_numbers(&args);
        let expr = args.into_iter().reduce(|acc, x| binary(op, acc, x)).unwrap_or(identity);
        Ok(self.emit(expr, &dest))
    }

    /// Chain adjacent pairs: `(< a b c)` is `a<b && b<c`.
    fn compile_comparison(
        &mut self,
        op: JsBinop,
        args: Vec<JsExpr>,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        if args.is_empty() {
            return Err(SylvaError::compile("comparison expects at least 1 argument"));
        }
        self.check_numbers(&args);
        if args.len() == 1 {
            let t = self.t_value()?;
            return Ok(self.emit(t, &dest));
        }
        let mut test: Option<JsExpr> = None;
        for pair in args.windows(2) {
            let this = binary(op, pair[0].clone(), pair[1].clone());
            test = Some(match test {
                None => this,
                Some(acc) => binary(JsBinop::And, acc, this),
            });
        }
        self.emit_boolean(test.unwrap(), dest)
    }

    /// A JS boolean routed through `t`/`nil`.
    fn emit_boolean(&mut self, test: JsExpr, dest: Dest) -> Result<JsExpr, SylvaError> {
        let t = self.t_value()?;
        let nil = self.nil_value()?;
        Ok(self.emit(crate::jsast::cond(test, t, nil), &dest))
    }

    /// Nil-checked car/cdr that throws on non-lists.
    fn compile_cons_access(
        &mut self,
        name: &str,
        field: &str,
        args: Vec<JsExpr>,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        arity(name, &args, 1)?;
        let (dest, result) = self.materialize(dest);
        let nil = self.nil_value()?;
        let x = args[0].clone();
        let on_nil = self.store_stmts(&dest, nil.clone());
        let on_cons = self.store_stmts(&dest, get(x.clone(), field));
        let message = format!("{} called on a non-list argument", name.to_uppercase());
        self.push_stmt(JsStmt::If(
            binary(JsBinop::StrictEq, x.clone(), nil),
            on_nil,
            Some(vec![JsStmt::If(
                is_cons_shape(&x),
                on_cons,
                Some(vec![JsStmt::Throw(JsExpr::Str(message))]),
            )]),
        ));
        Ok(result)
    }

    /// rplaca/rplacd mutate the cons object and return it.
    fn compile_rplac(
        &mut self,
        name: &str,
        field: &str,
        args: Vec<JsExpr>,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        arity(name, &args, 2)?;
        let message = format!("{} called on a non-cons argument", name.to_uppercase());
        self.push_stmt(JsStmt::If(
            unary(JsUnop::Not, is_cons_shape(&args[0])),
            vec![JsStmt::Throw(JsExpr::Str(message))],
            None,
        ));
        self.push_stmt(JsStmt::Assign(
            get(args[0].clone(), field),
            args[1].clone(),
        ));
        let cons = args[0].clone();
        Ok(self.emit(cons, &dest))
    }

    fn compile_char_helper(
        &mut self,
        name: &str,
        helper: &str,
        args: Vec<JsExpr>,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        arity(name, &args, 1)?;
        let expr = call(internals(helper), vec![args[0].clone()]);
        Ok(self.emit(expr, &dest))
    }

    fn emit_range_check(&mut self, vector: &JsExpr, index: &JsExpr) {
        let out_of_range = binary(
            JsBinop::Or,
            binary(JsBinop::Lt, index.clone(), JsExpr::Integer(0)),
            binary(JsBinop::Ge, index.clone(), get(vector.clone(), "length")),
        );
        self.push_stmt(JsStmt::If(
            out_of_range,
            vec![JsStmt::Throw(JsExpr::Str("Out of range.".to_string()))],
            None,
        ));
    }

    /// `(%js-vref "name")`: read a JS global, coercing into source-land.
    fn compile_js_vref(
        &mut self,
        name: &str,
        arg_forms: &[Value],
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        let var = arg_forms
            .first()
            .and_then(|f| f.as_str())
            .ok_or_else(|| SylvaError::compile(format!("{name} expects a constant string name")))?;
        let expr = call(
            internals("js_to_lisp"),
            vec![call(
                internals("globalEval"),
                vec![JsExpr::Str(var.to_string())],
            )],
        );
        Ok(self.emit(expr, &dest))
    }

    /// `(%js-vset "name" value)`: assign a JS global through an
    /// evaluated setter, coercing out of source-land.
    fn compile_js_vset(
        &mut self,
        name: &str,
        arg_forms: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        if arg_forms.len() != 2 {
            return Err(SylvaError::compile(format!(
                "{name} expects a name and a value"
            )));
        }
        let var = arg_forms[0]
            .as_str()
            .ok_or_else(|| SylvaError::compile(format!("{name} expects a constant string name")))?;
        let value = self.convert(&arg_forms[1], env, Dest::Fresh, false)?;
        let setter = call(
            internals("globalEval"),
            vec![JsExpr::Str(format!("(function (v) {{ {var} = v; }})"))],
        );
        self.push_stmt(JsStmt::Expr(call(
            setter,
            vec![call(internals("lisp_to_js"), vec![value.clone()])],
        )));
        Ok(self.emit(value, &dest))
    }

    /// `(fset 'name fn)` installs a function cell; a quoted name marks
    /// the function as defined for the unit's warnings.
    fn compile_fset(
        &mut self,
        name: &str,
        arg_forms: &[Value],
        env: &Environment,
        dest: Dest,
    ) -> Result<JsExpr, SylvaError> {
        if arg_forms.len() != 2 {
            return Err(SylvaError::compile(format!(
                "{name} expects a symbol and a function"
            )));
        }
        let symbol_expr = if arg_forms[0].has_head("quote") {
            let sym = arg_forms[0]
                .cdr()
                .car()
                .as_symbol()
                .ok_or_else(|| SylvaError::compile(format!("{name}: expected a symbol")))?;
            self.note_defined(sym);
            self.literal(&Value::sym(sym))?
        } else {
            self.convert(&arg_forms[0], env, Dest::Fresh, false)?
        };
        let function = self.convert(&arg_forms[1], env, Dest::Fresh, false)?;
        self.push_stmt(JsStmt::Assign(
            get(symbol_expr, "fvalue"),
            function.clone(),
        ));
        Ok(self.emit(function, &dest))
    }
}
