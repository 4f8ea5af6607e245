mod common;

use common::{compile_all, compile_err, compile_with, count};
use sylva_compiler::{Compiler, Dest, Environment, JsExpr};
use sylva_core::{Symbol, Value};
use sylva_reader::read_one;

// --- Driver and destinations ---

#[test]
fn fresh_destination_returns_a_fresh_identifier() {
    let mut compiler = Compiler::new();
    let env = Environment::new();
    let form = read_one("(+ 1 2)").unwrap();
    let result = compiler.convert(&form, &env, Dest::Fresh, false).unwrap();
    assert!(
        matches!(&result, JsExpr::Ident(name) if name.starts_with('v')),
        "expected a fresh identifier, got {result:?}"
    );
}

#[test]
fn arithmetic_compiles_to_a_guarded_operator_tree() {
    let js = compile_all("(+ 1 2 3)");
    assert!(js.contains("(v1 + v2) + v3"), "{js}");
    assert_eq!(count(&js, "Not a number!"), 3);
}

#[test]
fn division_routes_through_the_runtime() {
    let js = compile_all("(/ 10 2)");
    assert!(js.contains("internals.handled_division(v1, v2)"), "{js}");
}

#[test]
fn comparisons_chain_adjacent_pairs() {
    let js = compile_all("(< 1 2 3)");
    assert!(js.contains("(v1 < v2) && (v2 < v3)"), "{js}");
    assert!(js.contains(".value"), "booleans route through t/nil: {js}");
}

#[test]
fn if_branches_assign_the_same_slot() {
    // Value position, so the arms share one materialized slot.
    let js = compile_all("(list (if 1 2 3))");
    assert!(js.contains("!== l1.value"), "truth test against nil: {js}");
    assert_eq!(count(&js, "v1 = "), 2, "{js}");
}

#[test]
fn progn_discards_all_but_the_last() {
    let js = compile_all("(progn 1 2 3)");
    // The two discarded literals appear as bare statements.
    assert!(js.contains("1;"), "{js}");
    assert!(js.contains("2;"), "{js}");
}

#[test]
fn let_evaluates_values_in_the_outer_environment() {
    let js = compile_all("(let ((x 1) (y 2)) (+ x y))");
    // Values land in temporaries, then lexical slots.
    assert!(js.contains("var v3 = v1;"), "{js}");
    assert!(js.contains("var v4 = v2;"), "{js}");
    assert!(js.contains("v5 + v6"), "{js}");
}

#[test]
fn let_star_sees_earlier_bindings() {
    let js = compile_all("(let* ((x 1) (y x)) y)");
    // y's init reads x's slot, not a stale temporary.
    assert!(js.contains("var v2 = v1;"), "{js}");
    assert!(js.contains("= v2;"), "{js}");
}

#[test]
fn setq_assigns_lexical_slots_directly() {
    let js = compile_all("(let ((x 1)) (setq x 2))");
    assert_eq!(count(&js, "internals.set("), 0, "{js}");
}

#[test]
fn setq_on_free_variables_uses_the_runtime() {
    let js = compile_all("(setq x 5)");
    assert!(js.contains("internals.set(l1, v1)"), "{js}");
}

#[test]
fn setq_with_odd_pairs_is_a_compile_error() {
    let err = compile_err("(setq a 1 b)");
    assert!(err.to_string().contains("odd pairs"), "{err}");
}

// --- Special variables ---

#[test]
fn proclaimed_specials_bind_dynamically() {
    let mut compiler = Compiler::new();
    compiler.proclaim_special(Symbol::new("*x*"));
    let js = compile_with(&mut compiler, "(let ((*x* 10)) (symbol-value (quote *x*)))");
    assert!(js.contains("internals.withDynamicBindings("), "{js}");
    assert!(js.contains("function (values)"), "{js}");
}

#[test]
fn declared_specials_bind_dynamically() {
    let js = compile_all("(let ((*x* 10)) (declare (special *x*)) *x*)");
    assert!(js.contains("internals.withDynamicBindings("), "{js}");
}

#[test]
fn special_reference_reads_the_symbol_value() {
    let mut compiler = Compiler::new();
    compiler.proclaim_special(Symbol::new("*x*"));
    let js = compile_with(&mut compiler, "*x*");
    assert!(js.contains("fvalue"), "goes through symbol-value: {js}");
}

#[test]
fn let_star_specials_save_and_restore_in_a_finally() {
    let mut compiler = Compiler::new();
    compiler.proclaim_special(Symbol::new("*x*"));
    let js = compile_with(&mut compiler, "(let* ((*x* 1)) *x*)");
    assert!(js.contains("} finally {"), "{js}");
    assert!(js.contains(".value ="), "{js}");
}

// --- Literals ---

#[test]
fn symbols_share_one_literal_identifier() {
    let js = compile_all("(quote x) (quote x)");
    assert_eq!(count(&js, "internals.intern(\"x\")"), 1, "{js}");
}

#[test]
fn quoted_lists_dump_through_the_list_builder() {
    let js = compile_all("(quote (1 2 3))");
    assert!(js.contains("internals.QIList(1, 2, 3, l"), "{js}");
}

#[test]
fn shared_structure_dumps_once() {
    let shared = read_one("(a b)").unwrap();
    let form = Value::list(vec![
        Value::symbol("progn"),
        Value::list(vec![Value::symbol("quote"), shared.clone()]),
        Value::list(vec![Value::symbol("quote"), shared]),
    ]);
    let mut compiler = Compiler::new();
    let stmts = compiler.process_toplevel(&form).unwrap();
    let js = sylva_compiler::print_program(&stmts);
    // The same cons quoted twice dumps one initializer and reuses the
    // identifier; a structurally equal but distinct cons would not.
    assert_eq!(count(&js, "internals.intern(\"a\")"), 1, "{js}");
    assert_eq!(count(&js, "internals.QIList("), 1, "{js}");
}

#[test]
fn keywords_are_self_evaluating() {
    let js = compile_all(":foo");
    assert!(js.contains("internals.intern(\"foo\", \"keyword\")"), "{js}");
    assert!(js.contains(".value = l"), "{js}");
}

#[test]
fn strings_and_vectors_dump_as_data() {
    let js = compile_all("\"hi\" #(1 2)");
    assert!(js.contains("internals.make_lisp_string(\"hi\")"), "{js}");
    assert!(js.contains("[1, 2]"), "{js}");
}

#[test]
fn magic_unquote_compiles_code_into_the_toplevel_buffer() {
    let mut compiler = Compiler::new();
    let code = read_one("(+ 1 2)").unwrap();
    let form = Value::list(vec![
        Value::symbol("quote"),
        Value::list(vec![Value::int(9), Value::magic_unquote(code)]),
    ]);
    let stmts = compiler.process_toplevel(&form).unwrap();
    let js = sylva_compiler::print_program(&stmts);
    assert!(js.contains("internals.QIList(9, v"), "{js}");
    assert!(js.contains("+ "), "compiled code present: {js}");
}

// --- Funcalls and the function namespace ---

#[test]
fn global_calls_go_through_the_symbol_function_cell() {
    let js = compile_all("(frobnicate 1)");
    assert!(js.contains(".fvalue(internals.pv, v1)"), "{js}");
}

#[test]
fn flet_binds_lexical_functions() {
    let js = compile_all("(flet ((f (x) x)) (f 1))");
    // The call uses the wrapper parameter, not a symbol cell.
    assert!(js.contains("function (v"), "{js}");
    assert_eq!(count(&js, "fvalue"), 0, "{js}");
}

#[test]
fn labels_definitions_see_each_other() {
    let js = compile_all("(labels ((f (x) (g x)) (g (x) x)) (f 1))");
    assert_eq!(count(&js, "fvalue"), 0, "{js}");
}

#[test]
fn function_of_an_unbound_symbol_uses_the_runtime() {
    let js = compile_all("(function list)");
    assert!(js.contains("internals.symbolFunction(l"), "{js}");
}

#[test]
fn oget_heads_call_through_property_chains() {
    let js = compile_all("((oget x \"log\") 1)");
    assert!(js.contains("internals.lisp_to_js("), "{js}");
    assert!(js.contains("internals.js_to_lisp("), "{js}");
    assert!(js.contains("internals.xstring("), "{js}");
}

#[test]
fn bad_function_designator_is_a_compile_error() {
    let err = compile_err("((1 2) 3)");
    assert!(err.to_string().contains("Bad function designator"), "{err}");
}

#[test]
fn undefined_called_functions_are_reported_once() {
    let mut compiler = Compiler::new();
    compile_with(&mut compiler, "(frobnicate 1) (frobnicate 2)");
    let undefined = compiler.undefined_functions();
    assert_eq!(undefined.len(), 1);
    assert_eq!(undefined[0].name_str(), "frobnicate");
    // The table resets after reporting.
    assert!(compiler.undefined_functions().is_empty());
}

#[test]
fn fset_with_a_quoted_name_marks_the_function_defined() {
    let mut compiler = Compiler::new();
    let js = compile_with(&mut compiler, "(fset (quote f) (lambda (x) x)) (f 1)");
    assert!(js.contains(".fvalue ="), "{js}");
    assert!(compiler.undefined_functions().is_empty());
}

// --- Multiple values ---

#[test]
fn multiple_value_call_concatenates_values_objects() {
    let js = compile_all("(multiple-value-call (function list) (values 1 2))");
    assert!(js.contains("\"multiple-value\" in"), "{js}");
    assert!(js.contains(".concat("), "{js}");
    assert!(js.contains(".apply(this, "), "{js}");
}

#[test]
fn multiple_value_prog1_keeps_the_first_form_result() {
    let js = compile_all("(multiple-value-prog1 (f) (g))");
    // Both forms compile; only the first lands in a slot kept around.
    assert!(js.contains("fvalue"), "{js}");
}

// --- FFI builtins ---

#[test]
fn js_vref_reads_globals() {
    let js = compile_all("(%js-vref \"window\")");
    assert!(
        js.contains("internals.js_to_lisp(internals.globalEval(\"window\"))"),
        "{js}"
    );
}

#[test]
fn js_vset_writes_globals() {
    let js = compile_all("(%js-vset \"flag\" 1)");
    assert!(js.contains("globalEval(\"(function (v) { flag = v; })\")"), "{js}");
    assert!(js.contains("internals.lisp_to_js(v1)"), "{js}");
}

#[test]
fn js_vref_requires_a_constant_name() {
    let err = compile_err("(%js-vref x)");
    assert!(err.to_string().contains("constant string"), "{err}");
}

// --- Cons builtins ---

#[test]
fn car_nil_checks_and_throws_on_non_lists() {
    let js = compile_all("(car x)");
    assert!(js.contains("CAR called on a non-list argument"), "{js}");
    assert!(js.contains("\"car\" in"), "{js}");
}

#[test]
fn rplaca_mutates_and_returns_the_cons() {
    let js = compile_all("(rplaca x 1)");
    assert!(js.contains(".car = "), "{js}");
    assert!(js.contains("RPLACA called on a non-cons argument"), "{js}");
}

#[test]
fn list_builds_nested_cons_objects() {
    let js = compile_all("(list 1 2)");
    assert!(js.contains("{\"car\": v1, \"cdr\": {\"car\": v2, \"cdr\": l"), "{js}");
}

#[test]
fn notinline_forces_a_funcall() {
    let mut compiler = Compiler::new();
    compiler.proclaim_notinline(Symbol::new("car"));
    let js = compile_with(&mut compiler, "(car x)");
    assert!(js.contains("fvalue"), "{js}");
    assert!(!js.contains("\"car\" in"), "{js}");
}

// --- eval-when ---

#[test]
fn eval_when_execute_compiles_inline() {
    let js = compile_all("(eval-when (:execute) (list 1))");
    assert!(js.contains("car"), "{js}");
}

#[test]
fn eval_when_load_toplevel_is_skipped_outside_file_compilation() {
    let js = compile_all("(eval-when (:load-toplevel) (list 1))");
    assert!(!js.contains("car"), "{js}");
}

#[test]
fn eval_when_load_toplevel_compiles_when_compiling_a_file() {
    let mut compiler = Compiler::new();
    compiler.set_compiling_file(true);
    let js = compile_with(&mut compiler, "(eval-when (:load-toplevel) (list 1))");
    assert!(js.contains("car"), "{js}");
}

#[test]
fn eval_when_compile_toplevel_runs_the_macro_evaluator() {
    let mut compiler = Compiler::new();
    compiler.set_compiling_file(true);
    // Evaluated at compile time only; nothing is emitted for it.
    let js = compile_with(&mut compiler, "(eval-when (:compile-toplevel) (list 1))");
    assert!(!js.contains("car"), "{js}");
}

#[test]
fn toplevel_progn_is_flattened() {
    let js = compile_all("(progn (quote a) (quote b))");
    assert!(js.contains("internals.intern(\"a\")"), "{js}");
    assert!(js.contains("internals.intern(\"b\")"), "{js}");
}
