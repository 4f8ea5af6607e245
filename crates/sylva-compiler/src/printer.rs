//! Serializer from the JS AST to JavaScript source text. Statements get
//! explicit terminators; nested operator expressions are parenthesized
//! rather than relying on precedence.

use crate::jsast::{JsExpr, JsStmt, JsUnop, SwitchClause};

struct Printer {
    out: String,
    indent: usize,
}

const INDENT: &str = "    ";

impl Printer {
    fn new() -> Self {
        Printer {
            out: String::new(),
            indent: 0,
        }
    }

    fn push_indent(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn line(&mut self, text: &str) {
        self.push_indent();
        self.out.push_str(text);
        self.out.push('\n');
    }

    // --- Statements ---

    fn write_stmts(&mut self, stmts: &[JsStmt]) {
        for stmt in stmts {
            self.write_stmt(stmt);
        }
    }

    fn write_block(&mut self, stmts: &[JsStmt]) {
        self.out.push_str("{\n");
        self.indent += 1;
        self.write_stmts(stmts);
        self.indent -= 1;
        self.push_indent();
        self.out.push('}');
    }

    fn write_stmt(&mut self, stmt: &JsStmt) {
        match stmt {
            JsStmt::Var(name, None) => self.line(&format!("var {name};")),
            JsStmt::Var(name, Some(init)) => {
                let init = self.expr_str(init);
                self.line(&format!("var {name} = {init};"));
            }
            JsStmt::Assign(lhs, rhs) => {
                let lhs = self.expr_str(lhs);
                let rhs = self.expr_str(rhs);
                self.line(&format!("{lhs} = {rhs};"));
            }
            JsStmt::Expr(expr) => {
                let text = self.stmt_expr_str(expr);
                self.line(&format!("{text};"));
            }
            JsStmt::If(test, then, otherwise) => {
                let test = self.expr_str(test);
                self.push_indent();
                self.out.push_str(&format!("if ({test}) "));
                self.write_block(then);
                if let Some(otherwise) = otherwise {
                    self.out.push_str(" else ");
                    self.write_block(otherwise);
                }
                self.out.push('\n');
            }
            JsStmt::Switch(scrutinee, clauses) => {
                let scrutinee = self.expr_str(scrutinee);
                self.line(&format!("switch ({scrutinee}) {{"));
                for clause in clauses {
                    self.write_clause(clause);
                }
                self.line("}");
            }
            JsStmt::While(test, body) => {
                let test = self.expr_str(test);
                self.push_indent();
                self.out.push_str(&format!("while ({test}) "));
                self.write_block(body);
                self.out.push('\n');
            }
            JsStmt::For {
                init,
                test,
                step,
                body,
            } => {
                let init = init.as_ref().map(|s| self.inline_stmt_str(s)).unwrap_or_default();
                let test = test.as_ref().map(|e| self.expr_str(e)).unwrap_or_default();
                let step = step.as_ref().map(|s| self.inline_stmt_str(s)).unwrap_or_default();
                self.push_indent();
                self.out.push_str(&format!("for ({init}; {test}; {step}) "));
                self.write_block(body);
                self.out.push('\n');
            }
            JsStmt::ForIn { var, object, body } => {
                let object = self.expr_str(object);
                self.push_indent();
                self.out.push_str(&format!("for (var {var} in {object}) "));
                self.write_block(body);
                self.out.push('\n');
            }
            JsStmt::Label(label, stmt) => {
                self.line(&format!("{label}:"));
                self.write_stmt(stmt);
            }
            JsStmt::Break(None) => self.line("break;"),
            JsStmt::Break(Some(label)) => self.line(&format!("break {label};")),
            JsStmt::Try {
                body,
                catch,
                finally,
            } => {
                self.push_indent();
                self.out.push_str("try ");
                self.write_block(body);
                if let Some((var, handler)) = catch {
                    self.out.push_str(&format!(" catch ({var}) "));
                    self.write_block(handler);
                }
                if let Some(cleanup) = finally {
                    self.out.push_str(" finally ");
                    self.write_block(cleanup);
                }
                self.out.push('\n');
            }
            JsStmt::Throw(expr) => {
                let expr = self.expr_str(expr);
                self.line(&format!("throw {expr};"));
            }
            JsStmt::Return(expr) => {
                let expr = self.expr_str(expr);
                self.line(&format!("return {expr};"));
            }
            JsStmt::Block(stmts) => {
                self.push_indent();
                self.write_block(stmts);
                self.out.push('\n');
            }
        }
    }

    fn write_clause(&mut self, clause: &SwitchClause) {
        match &clause.label {
            Some(label) => {
                let label = self.expr_str(label);
                self.line(&format!("case {label}:"));
            }
            None => self.line("default:"),
        }
        self.indent += 1;
        self.write_stmts(&clause.body);
        self.indent -= 1;
    }

    /// A statement rendered without indentation or terminator, for
    /// `for (init; test; step)` headers.
    fn inline_stmt_str(&mut self, stmt: &JsStmt) -> String {
        match stmt {
            JsStmt::Var(name, Some(init)) => format!("var {name} = {}", self.expr_str(init)),
            JsStmt::Var(name, None) => format!("var {name}"),
            JsStmt::Assign(lhs, rhs) => {
                format!("{} = {}", self.expr_str(lhs), self.expr_str(rhs))
            }
            JsStmt::Expr(expr) => self.expr_str(expr),
            _ => String::new(),
        }
    }

    // --- Expressions ---

    /// An expression in statement position: function and object
    /// literals need parens to avoid being parsed as declarations.
    fn stmt_expr_str(&mut self, expr: &JsExpr) -> String {
        let text = self.expr_str(expr);
        if matches!(expr, JsExpr::Function { .. } | JsExpr::Object(_)) {
            format!("({text})")
        } else {
            text
        }
    }

    fn expr_str(&mut self, expr: &JsExpr) -> String {
        match expr {
            JsExpr::Ident(name) => name.clone(),
            JsExpr::Bool(true) => "true".to_string(),
            JsExpr::Bool(false) => "false".to_string(),
            JsExpr::Integer(n) => n.to_string(),
            JsExpr::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    format!("{f}")
                }
            }
            JsExpr::Str(s) => escape_string(s),
            JsExpr::Array(items) => {
                let items: Vec<String> = items.iter().map(|e| self.expr_str(e)).collect();
                format!("[{}]", items.join(", "))
            }
            JsExpr::Object(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", escape_string(k), self.expr_str(v)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            JsExpr::Function { params, body } => {
                let mut inner = Printer::new();
                inner.indent = self.indent + 1;
                inner.write_stmts(body);
                let mut close = String::new();
                for _ in 0..self.indent {
                    close.push_str(INDENT);
                }
                format!(
                    "function ({}) {{\n{}{}}}",
                    params.join(", "),
                    inner.out,
                    close
                )
            }
            JsExpr::Call(callee, args) => {
                let callee = self.callee_str(callee);
                let args: Vec<String> = args.iter().map(|e| self.expr_str(e)).collect();
                format!("{}({})", callee, args.join(", "))
            }
            JsExpr::MethodCall(object, method, args) => {
                let object = self.callee_str(object);
                let args: Vec<String> = args.iter().map(|e| self.expr_str(e)).collect();
                format!("{}.{}({})", object, method, args.join(", "))
            }
            JsExpr::Get(object, property) => {
                format!("{}.{}", self.callee_str(object), property)
            }
            JsExpr::Property(object, key) => {
                format!("{}[{}]", self.callee_str(object), self.expr_str(key))
            }
            JsExpr::New(class, args) => {
                let class = self.callee_str(class);
                let args: Vec<String> = args.iter().map(|e| self.expr_str(e)).collect();
                format!("new {}({})", class, args.join(", "))
            }
            JsExpr::Unary(op, operand) => {
                let operand = self.operand_str(operand);
                match op {
                    JsUnop::Not => format!("!{operand}"),
                    JsUnop::Neg => format!("-{operand}"),
                    JsUnop::TypeOf => format!("typeof {operand}"),
                    JsUnop::Delete => format!("delete {operand}"),
                }
            }
            JsExpr::Binary(op, lhs, rhs) => {
                let lhs = self.operand_str(lhs);
                let rhs = self.operand_str(rhs);
                format!("{} {} {}", lhs, op.symbol(), rhs)
            }
            JsExpr::Cond(test, then, otherwise) => {
                let test = self.operand_str(test);
                let then = self.operand_str(then);
                let otherwise = self.operand_str(otherwise);
                format!("{test} ? {then} : {otherwise}")
            }
        }
    }

    /// Operands of operators are parenthesized unless atomic.
    fn operand_str(&mut self, expr: &JsExpr) -> String {
        let text = self.expr_str(expr);
        match expr {
            JsExpr::Binary(..) | JsExpr::Cond(..) | JsExpr::Unary(..) | JsExpr::Function { .. } => {
                format!("({text})")
            }
            _ => text,
        }
    }

    /// Callees and property bases: function literals must be wrapped so
    /// `(function () {...})(...)` parses as a call.
    fn callee_str(&mut self, expr: &JsExpr) -> String {
        let text = self.expr_str(expr);
        match expr {
            JsExpr::Function { .. }
            | JsExpr::Binary(..)
            | JsExpr::Cond(..)
            | JsExpr::Unary(..)
            | JsExpr::Object(_)
            | JsExpr::New(..) => format!("({text})"),
            _ => text,
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Print a statement as JavaScript source.
pub fn print_stmt(stmt: &JsStmt) -> String {
    let mut printer = Printer::new();
    printer.write_stmt(stmt);
    printer.out
}

/// Print a whole program.
pub fn print_program(stmts: &[JsStmt]) -> String {
    let mut printer = Printer::new();
    printer.write_stmts(stmts);
    printer.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsast::{binary, call, get, ident, internals, JsBinop};

    #[test]
    fn test_var_and_assign() {
        let stmts = vec![
            JsStmt::Var("v1".into(), None),
            JsStmt::Assign(ident("v1"), JsExpr::Integer(42)),
        ];
        assert_eq!(print_program(&stmts), "var v1;\nv1 = 42;\n");
    }

    #[test]
    fn test_iife_gets_parenthesized() {
        let f = JsExpr::Function {
            params: vec![],
            body: vec![JsStmt::Return(JsExpr::Integer(1))],
        };
        let text = print_stmt(&JsStmt::Expr(call(f, vec![])));
        assert!(text.starts_with("(function ()"));
        assert!(text.trim_end().ends_with("})();"));
    }

    #[test]
    fn test_nested_binary_parens() {
        let e = binary(
            JsBinop::And,
            binary(JsBinop::Lt, ident("a"), ident("b")),
            binary(JsBinop::Lt, ident("b"), ident("c")),
        );
        assert_eq!(
            print_stmt(&JsStmt::Expr(e)).trim(),
            "(a < b) && (b < c);"
        );
    }

    #[test]
    fn test_try_catch_finally() {
        let text = print_stmt(&JsStmt::Try {
            body: vec![JsStmt::Assign(ident("r"), JsExpr::Integer(1))],
            catch: Some(("cf".into(), vec![JsStmt::Throw(ident("cf"))])),
            finally: Some(vec![JsStmt::Expr(call(internals("pv"), vec![]))]),
        });
        assert!(text.contains("try {"));
        assert!(text.contains("} catch (cf) {"));
        assert!(text.contains("} finally {"));
        assert!(text.contains("throw cf;"));
    }

    #[test]
    fn test_switch_with_default() {
        let text = print_stmt(&JsStmt::Switch(
            ident("n"),
            vec![
                SwitchClause {
                    label: Some(JsExpr::Integer(0)),
                    body: vec![JsStmt::Assign(ident("x"), JsExpr::Integer(1))],
                },
                SwitchClause {
                    label: None,
                    body: vec![JsStmt::Break(None)],
                },
            ],
        ));
        assert!(text.contains("switch (n) {"));
        assert!(text.contains("case 0:"));
        assert!(text.contains("default:"));
    }

    #[test]
    fn test_string_escaping() {
        let text = print_stmt(&JsStmt::Expr(JsExpr::Str("a\"b\\c\n".into())));
        assert_eq!(text.trim(), "\"a\\\"b\\\\c\\n\";");
    }

    #[test]
    fn test_label_and_break() {
        let text = print_stmt(&JsStmt::Label(
            "tbloop1".into(),
            Box::new(JsStmt::While(
                JsExpr::Bool(true),
                vec![JsStmt::Break(Some("tbloop1".into()))],
            )),
        ));
        assert!(text.contains("tbloop1:"));
        assert!(text.contains("break tbloop1;"));
    }

    #[test]
    fn test_member_and_new() {
        let e = JsExpr::New(
            Box::new(internals("BlockNLX")),
            vec![ident("v1"), ident("v2"), JsExpr::Str("outer".into())],
        );
        assert_eq!(
            print_stmt(&JsStmt::Throw(e)).trim(),
            "throw new internals.BlockNLX(v1, v2, \"outer\");"
        );
    }

    #[test]
    fn test_for_loop() {
        let text = print_stmt(&JsStmt::For {
            init: Some(Box::new(JsStmt::Var("i".into(), Some(JsExpr::Integer(0))))),
            test: Some(binary(JsBinop::Lt, ident("i"), JsExpr::Integer(3))),
            step: Some(Box::new(JsStmt::Assign(
                ident("i"),
                binary(JsBinop::Add, ident("i"), JsExpr::Integer(1)),
            ))),
            body: vec![],
        });
        assert!(text.contains("for (var i = 0; i < 3; i = i + 1) {"));
    }

    #[test]
    fn test_for_in_and_delete() {
        use crate::jsast::{property, unary, JsUnop};
        let text = print_stmt(&JsStmt::ForIn {
            var: "k".into(),
            object: ident("obj"),
            body: vec![JsStmt::Expr(unary(
                JsUnop::Delete,
                property(ident("obj"), ident("k")),
            ))],
        });
        assert!(text.contains("for (var k in obj) {"));
        assert!(text.contains("delete obj[k];"));
    }

    #[test]
    fn test_statement_block_and_ternary() {
        use crate::jsast::cond;
        let text = print_stmt(&JsStmt::Block(vec![JsStmt::Assign(
            ident("r"),
            cond(ident("p"), JsExpr::Integer(1), JsExpr::Integer(2)),
        )]));
        assert!(text.contains("{\n"));
        assert!(text.contains("r = p ? 1 : 2;"));
    }

    #[test]
    fn test_get_on_call_result() {
        let e = get(call(internals("intern"), vec![JsExpr::Str("t".into())]), "value");
        assert_eq!(
            print_stmt(&JsStmt::Expr(e)).trim(),
            "internals.intern(\"t\").value;"
        );
    }
}
