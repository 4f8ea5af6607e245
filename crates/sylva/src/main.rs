use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use sylva_compiler::{print_program, Compiler};
use sylva_core::SylvaError;
use sylva_reader::read_str;

#[derive(Parser)]
#[command(name = "sylva", about = "sylva: a Lisp-to-JavaScript compiler", version)]
struct Cli {
    /// Source file to compile
    file: Option<PathBuf>,

    /// Compile an expression and print the JavaScript
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Write the JavaScript to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Suppress the REPL banner
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(expr) = &cli.eval {
        return run_compile(expr, false, cli.output.as_deref());
    }
    if let Some(file) = &cli.file {
        let source = match fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("sylva: cannot read {}: {e}", file.display());
                return ExitCode::FAILURE;
            }
        };
        return run_compile(&source, true, cli.output.as_deref());
    }
    repl(cli.quiet)
}

fn run_compile(source: &str, compiling_file: bool, output: Option<&std::path::Path>) -> ExitCode {
    match compile(source, compiling_file) {
        Ok((js, warnings)) => {
            for warning in warnings {
                eprintln!("warning: {warning}");
            }
            match output {
                Some(path) => {
                    if let Err(e) = fs::write(path, js) {
                        eprintln!("sylva: cannot write {}: {e}", path.display());
                        return ExitCode::FAILURE;
                    }
                }
                None => print!("{js}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sylva: {e}");
            ExitCode::FAILURE
        }
    }
}

fn compile(source: &str, compiling_file: bool) -> Result<(String, Vec<String>), SylvaError> {
    let forms = read_str(source)?;
    let mut compiler = Compiler::new();
    compiler.set_compiling_file(compiling_file);
    let js = compiler.compile_program(&forms)?;
    let warnings = compiler
        .undefined_functions()
        .into_iter()
        .map(|sym| format!("undefined function {sym}"))
        .collect();
    Ok((js, warnings))
}

fn repl(quiet: bool) -> ExitCode {
    if !quiet {
        println!("sylva {} — forms in, JavaScript out", env!("CARGO_PKG_VERSION"));
        println!("Type a form to see its compilation; Ctrl-D exits.");
    }
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("sylva: cannot start REPL: {e}");
            return ExitCode::FAILURE;
        }
    };
    // One compiler for the whole session, so the literal table and
    // declarations persist across inputs.
    let mut compiler = Compiler::new();
    loop {
        match editor.readline("sylva> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match compile_line(&mut compiler, &line) {
                    Ok(js) => print!("{js}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("sylva: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn compile_line(compiler: &mut Compiler, line: &str) -> Result<String, SylvaError> {
    let forms = read_str(line)?;
    let mut stmts = Vec::new();
    for form in &forms {
        stmts.extend(compiler.process_toplevel(form)?);
    }
    Ok(print_program(&stmts))
}
