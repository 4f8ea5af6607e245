use sylva_compiler::Compiler;
use sylva_core::SylvaError;
use sylva_reader::read_str;

/// Compile a whole program to JavaScript text.
pub fn compile_all(input: &str) -> String {
    let forms = read_str(input).unwrap_or_else(|e| panic!("read failed for `{input}`: {e}"));
    let mut compiler = Compiler::new();
    compiler
        .compile_program(&forms)
        .unwrap_or_else(|e| panic!("compile failed for `{input}`: {e}"))
}

/// Compile with a caller-prepared compiler (proclaims, macros, …).
pub fn compile_with(compiler: &mut Compiler, input: &str) -> String {
    let forms = read_str(input).unwrap_or_else(|e| panic!("read failed for `{input}`: {e}"));
    compiler
        .compile_program(&forms)
        .unwrap_or_else(|e| panic!("compile failed for `{input}`: {e}"))
}

/// Expect a compile-time error.
pub fn compile_err(input: &str) -> SylvaError {
    let forms = read_str(input).unwrap_or_else(|e| panic!("read failed for `{input}`: {e}"));
    let mut compiler = Compiler::new();
    compiler
        .compile_program(&forms)
        .expect_err(&format!("expected a compile error for `{input}`"))
}

/// Occurrences of a needle in the emitted JavaScript.
pub fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}
