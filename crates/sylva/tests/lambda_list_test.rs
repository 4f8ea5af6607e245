mod common;

use common::{compile_all, compile_err, count};

// --- Argument count guards ---

#[test]
fn fixed_arity_emits_a_single_check() {
    let js = compile_all("((lambda (a b) a) 1 2)");
    assert!(
        js.contains("internals.checkArgs(arguments.length - 1, 2)"),
        "{js}"
    );
    assert!(!js.contains("checkArgsAtLeast"), "{js}");
    assert!(!js.contains("checkArgsAtMost"), "{js}");
}

#[test]
fn optionals_emit_min_and_max_checks() {
    let js = compile_all("((lambda (a &optional b) a) 1)");
    assert!(
        js.contains("internals.checkArgsAtLeast(arguments.length - 1, 1)"),
        "{js}"
    );
    assert!(
        js.contains("internals.checkArgsAtMost(arguments.length - 1, 2)"),
        "{js}"
    );
}

#[test]
fn rest_suppresses_the_maximum_check() {
    let js = compile_all("((lambda (a &rest r) r) 1 2 3)");
    assert!(js.contains("checkArgsAtLeast"), "{js}");
    assert!(!js.contains("checkArgsAtMost"), "{js}");
}

#[test]
fn zero_required_suppresses_the_minimum_check() {
    let js = compile_all("((lambda (&optional a) a) 1)");
    assert!(!js.contains("checkArgsAtLeast"), "{js}");
    assert!(js.contains("checkArgsAtMost"), "{js}");
}

// --- Optional defaulting ---

#[test]
fn optionals_default_through_a_fallthrough_switch() {
    let js = compile_all("((lambda (a &optional (b 5) (c 6)) c) 1)");
    assert!(js.contains("switch (arguments.length - 1)"), "{js}");
    assert!(js.contains("case 1:"), "{js}");
    assert!(js.contains("case 2:"), "{js}");
    // Fallthrough: no break between the defaulting cases.
    assert!(!js.contains("break;"), "{js}");
}

#[test]
fn supplied_p_starts_true_and_resets_in_the_default_case() {
    let js = compile_all("((lambda (a &optional (b 5 bp)) bp) 1)");
    // The svar initializes to t before the switch and is set to nil
    // inside the defaulting case.
    let switch_pos = js.find("switch").unwrap();
    let init_pos = js.find(".value;").unwrap();
    assert!(init_pos < switch_pos, "svar initialized before switch: {js}");
    assert!(js.contains("case 1:"), "{js}");
}

#[test]
fn optional_defaults_see_earlier_parameters() {
    let js = compile_all("((lambda (a &optional (b a)) b) 1)");
    // b's default reads a's parameter slot (v1).
    assert!(js.contains("= v1;"), "{js}");
}

// --- Rest collection ---

#[test]
fn rest_conses_from_the_last_argument_down() {
    let js = compile_all("((lambda (a &rest r) r) 1 2 3)");
    assert!(js.contains("for ("), "{js}");
    assert!(js.contains("= (arguments.length - 1) - 1;"), "{js}");
    assert!(js.contains("{\"car\": arguments["), "{js}");
}

// --- Keyword parsing ---

#[test]
fn keywords_scan_in_pairs_and_compare_by_identity() {
    let js = compile_all("((lambda (&key (a 1 ap)) a) :a 2)");
    assert!(js.contains("internals.intern(\"a\", \"keyword\")"), "{js}");
    assert!(js.contains("] === l"), "identity comparison: {js}");
    assert!(js.contains("Odd number of keyword arguments."), "{js}");
    assert!(js.contains("Unknown keyword argument "), "{js}");
    assert!(js.contains("internals.xstring("), "{js}");
}

#[test]
fn rest_does_not_suppress_the_unknown_keyword_check() {
    let js = compile_all("((lambda (&key (a 1 ap) &rest r) (list a ap r)) :a 2 :b 3)");
    assert!(js.contains("Unknown keyword argument "), "{js}");
}

#[test]
fn allow_other_keys_does_not_suppress_the_check_either() {
    let js = compile_all("((lambda (&key a &allow-other-keys) a) :a 1)");
    assert!(js.contains("Unknown keyword argument "), "{js}");
}

#[test]
fn plain_rest_collects_everything_without_keyword_checks() {
    let js = compile_all("((lambda (&rest r) r) :a 2 :b 3)");
    assert!(!js.contains("Unknown keyword argument "), "{js}");
    assert!(!js.contains("Odd number of keyword arguments."), "{js}");
}

#[test]
fn bare_key_marker_still_enables_the_checks() {
    let js = compile_all("((lambda (a &key) a) 1)");
    assert!(js.contains("Odd number of keyword arguments."), "{js}");
    assert!(js.contains("Unknown keyword argument "), "{js}");
}

#[test]
fn keyword_defaults_and_svars_fill_on_miss() {
    let js = compile_all("((lambda (&key (a 9 ap)) ap))");
    // Miss branch: index ran past the end.
    assert!(js.contains(">= (arguments.length - 1)"), "{js}");
    assert!(js.contains("= 9;"), "{js}");
}

// --- Errors ---

#[test]
fn malformed_lambda_lists_are_compile_errors() {
    assert!(compile_err("(lambda (1) 1)")
        .to_string()
        .contains("expected a symbol"));
    assert!(compile_err("(lambda (a &rest) a)")
        .to_string()
        .contains("Bad lambda-list"));
    assert!(compile_err("(lambda (a . b) a)")
        .to_string()
        .contains("Bad lambda-list"));
}

// --- Calling convention ---

#[test]
fn every_function_takes_the_values_marker_first() {
    let js = compile_all("((lambda (a) a) 1)");
    assert!(js.contains("function (values, v"), "{js}");
    assert!(js.contains("(internals.pv, v"), "caller passes the marker: {js}");
}

#[test]
fn nested_lambdas_get_distinct_parameter_names() {
    let js = compile_all("((lambda (a) ((lambda (b) b) a)) 1)");
    let first = js.find("function (values, v").unwrap();
    let rest = &js[first + 20..];
    assert!(rest.contains("function (values, v"), "{js}");
    // Parameter identifiers are never reused.
    assert_eq!(count(&js, "function (values, v1)"), 1, "{js}");
}
