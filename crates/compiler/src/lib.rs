//! Pascal toolchain library: lexer, parser, semantic analyzer, code
//! generator, and the orchestration glue the CLI drives.
//!
//! [`compile`] and [`compile_and_run`] are the entry points most callers
//! want; the phase modules are public so tests (and the CLI) can drive
//! the pipeline a stage at a time.

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symbol;
pub mod token;

pub use ast::Program;
pub use config::{CompilerConfig, Verbosity};
pub use error::CompileError;
pub use symbol::SymbolTable;

use std::fs;
use std::io::{BufRead, Write};

use tracing::{debug, info};

/// Lex, parse, and semantically analyze `source`, returning the AST. Does
/// not generate code or run anything.
pub fn check(source: &str) -> Result<Program, CompileError> {
    let (tokens, lex_errors) = lexer::Lexer::new(source).tokenize();
    if let Some(first) = lex_errors.into_iter().next() {
        return Err(CompileError::Lex(first));
    }
    debug!(token_count = tokens.len(), "lexing complete");

    let (program, table) = parser::parse(tokens)?;
    debug!(program = %program.name, "parsing complete");

    analyzer::analyze(&program, table)?;
    debug!("semantic analysis complete");

    Ok(program)
}

/// Lex, parse, analyze, and generate a VM instruction listing for `source`.
pub fn compile(source: &str) -> Result<String, CompileError> {
    let program = check(source)?;
    let listing = codegen::generate(&program)?;
    debug!(lines = listing.lines().count(), "codegen complete");
    Ok(listing)
}

/// Compile and execute `source`, reading stdin from `input` and writing
/// program output to `output`.
pub fn compile_and_run<R: BufRead, W: Write>(source: &str, input: &mut R, output: &mut W) -> Result<(), CompileError> {
    let listing = compile(source)?;
    let vm = pascalvm_runtime::Vm::load(&listing)?;
    info!("starting virtual machine");
    vm.run(input, output)?;
    Ok(())
}

/// Run the full pipeline per `config`: read the source file, compile it,
/// optionally write the listing out, then run it unless `listing_only`.
pub fn run_with_config<R: BufRead, W: Write>(
    config: &CompilerConfig,
    input: &mut R,
    output: &mut W,
) -> Result<(), CompileError> {
    let source = fs::read_to_string(&config.source)?;
    let listing = compile(&source)?;

    if let Some(path) = &config.emit_listing {
        fs::write(path, &listing)?;
        info!(path = %path.display(), "listing written");
    }

    if config.listing_only {
        return Ok(());
    }

    let vm = pascalvm_runtime::Vm::load(&listing)?;
    vm.run(input, output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        let mut input = std::io::empty();
        let mut output = Vec::new();
        compile_and_run(source, &mut input, &mut output).expect("should run to completion");
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn hello_world_runs_end_to_end() {
        assert_eq!(
            run("program Hello; begin writeln('Hello, World!') end."),
            "Hello, World! \n"
        );
    }

    #[test]
    fn sum_of_two_variables() {
        assert_eq!(
            run("program Sum; var a,b:integer; begin a:=2; b:=3; writeln(a+b) end."),
            "5 \n"
        );
    }

    #[test]
    fn loop_writes_without_trailing_newline() {
        assert_eq!(
            run("program Loop; var i:integer; begin for i:=1 to 3 do write(i) end."),
            "1 2 3 "
        );
    }

    #[test]
    fn conditional_picks_the_true_branch() {
        assert_eq!(
            run("program Cond; var x:integer; begin x:=10; if x>5 then writeln('big') else writeln('small') end."),
            "big \n"
        );
    }

    #[test]
    fn array_elements_round_trip() {
        assert_eq!(
            run("program Arr; var a:array[1..3] of integer; i:integer; \
                 begin for i:=1 to 3 do a[i]:=i*i; for i:=1 to 3 do write(a[i]) end."),
            "1 4 9 "
        );
    }

    #[test]
    fn readln_echoes_a_line() {
        let mut input = std::io::Cursor::new(b"ping\n".to_vec());
        let mut output = Vec::new();
        compile_and_run(
            "program Echo; var s:string; begin readln(s); writeln(s) end.",
            &mut input,
            &mut output,
        )
        .expect("should run to completion");
        assert_eq!(String::from_utf8(output).unwrap(), "ping \n");
    }

    #[test]
    fn keyword_case_is_irrelevant() {
        assert_eq!(
            run("PROGRAM Hello; BEGIN WRITELN('Hello, World!') END."),
            "Hello, World! \n"
        );
    }

    #[test]
    fn check_reports_semantic_errors_without_generating_code() {
        let err = check("program P; var a: integer; begin a := 'oops' end.").unwrap_err();
        assert!(matches!(err, CompileError::Semantic(_)));
    }
}
