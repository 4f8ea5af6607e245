mod common;

use std::rc::Rc;

use common::{compile_all, compile_with, count};
use sylva_compiler::{Compiler, MacroFn};
use sylva_core::{Symbol, Value};

// --- Local macros ---

#[test]
fn macrolet_expands_through_the_template_evaluator() {
    let js = compile_all("(macrolet ((twice (x) `(+ ,x ,x))) (twice 3))");
    assert!(js.contains("v1 + v2"), "{js}");
}

#[test]
fn macrolet_destructures_nested_patterns() {
    let js = compile_all("(macrolet ((second-of ((a b)) b)) (second-of (1 2)))");
    assert_eq!(js.trim(), "2;", "{js}");
}

#[test]
fn symbol_macrolet_rewrites_references() {
    let js = compile_all("(symbol-macrolet ((x 42)) x)");
    assert_eq!(js.trim(), "42;", "{js}");
}

#[test]
fn setq_on_a_symbol_macro_rewrites_to_setf() {
    let js = compile_all("(symbol-macrolet ((x (car c))) (setq x 9))");
    assert!(js.contains("internals.intern(\"setf\")"), "{js}");
    assert!(js.contains(".fvalue("), "{js}");
}

#[test]
fn lexical_bindings_shadow_symbol_macros() {
    let js = compile_all("(symbol-macrolet ((x 42)) (let ((x 1)) x))");
    // The let body reads the slot, not the expansion.
    assert!(!js.contains("42"), "{js}");
}

// --- Global macros ---

#[test]
fn native_expanders_rewrite_calls() {
    let mut compiler = Compiler::new();
    compiler.define_macro(
        Symbol::new("inc"),
        MacroFn::Native(Rc::new(|form, _env| {
            Ok(Value::list(vec![
                Value::symbol("+"),
                form.cdr().car(),
                Value::int(1),
            ]))
        })),
    );
    let js = compile_with(&mut compiler, "(inc 5)");
    assert!(js.contains("v1 + v2"), "{js}");
}

#[test]
fn source_expanders_go_through_the_macro_evaluator() {
    let mut compiler = Compiler::new();
    let expander = sylva_reader::read_one(
        "(lambda (form) (destructuring-bind (a b) (cdr form) `(+ ,b ,a)))",
    )
    .unwrap();
    compiler.define_macro(Symbol::new("swapped"), MacroFn::Source(expander));
    let js = compile_with(&mut compiler, "(swapped 1 2)");
    assert!(js.contains("v1 + v2"), "{js}");
}

#[test]
fn global_symbol_macros_expand() {
    let mut compiler = Compiler::new();
    compiler.define_symbol_macro(Symbol::new("seven"), Value::int(7));
    let js = compile_with(&mut compiler, "seven");
    assert_eq!(js.trim(), "7;", "{js}");
}

#[test]
fn lexical_functions_shadow_global_macros() {
    let mut compiler = Compiler::new();
    compiler.define_macro(
        Symbol::new("m"),
        MacroFn::Native(Rc::new(|_form, _env| Ok(Value::int(99)))),
    );
    let js = compile_with(&mut compiler, "(flet ((m (x) x)) (m 1))");
    assert!(!js.contains("99"), "{js}");
}

#[test]
fn macro_expansion_runs_to_a_fixpoint() {
    let mut compiler = Compiler::new();
    compiler.define_macro(
        Symbol::new("a"),
        MacroFn::Native(Rc::new(|_form, _env| {
            Ok(Value::list(vec![Value::symbol("b")]))
        })),
    );
    compiler.define_macro(
        Symbol::new("b"),
        MacroFn::Native(Rc::new(|_form, _env| Ok(Value::int(11)))),
    );
    let js = compile_with(&mut compiler, "(a)");
    assert!(js.contains("11"), "{js}");
}

// --- Backquote ---

#[test]
fn backquote_without_unquotes_is_a_constant() {
    let js = compile_all("`(a b)");
    assert!(js.contains("internals.QIList(l"), "{js}");
}

#[test]
fn backquote_with_unquote_builds_a_list() {
    let js = compile_all("`(a ,(+ 1 2))");
    // (list 'a (+ 1 2)): a cons chain with the computed value inside.
    assert!(js.contains("{\"car\": "), "{js}");
    assert!(js.contains(" + "), "{js}");
}

#[test]
fn backquote_with_splicing_calls_append() {
    let js = compile_all("`(a ,@b)");
    assert!(js.contains("internals.intern(\"append\")"), "{js}");
    assert!(js.contains(".fvalue("), "{js}");
}

// --- Multiple expansions share the literal table ---

#[test]
fn expanded_code_reuses_interned_literals() {
    let js = compile_all("(macrolet ((q () `(quote x))) (list (q) (q)))");
    assert_eq!(count(&js, "internals.intern(\"x\")"), 1, "{js}");
}
