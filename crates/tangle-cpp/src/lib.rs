//! A C-family language for the tangle runtime.
//!
//! The grammar is compiled the first time [`language`] is called and shared by
//! every parser afterwards.

pub mod grammar;
pub mod lexer;
pub mod scanner;

use log::debug;
use once_cell::sync::Lazy;
use tangle_backend::{CompileErrors, CompileOptions};
use tangle_runtime::{Edit, Language, Tree};

pub use scanner::RawStringScanner;

static LANGUAGE: Lazy<Result<Language, CompileErrors>> =
    Lazy::new(|| language_with(&CompileOptions::default()));

/// The compiled language, conflicts which are not declared are settled the yacc way.
pub fn language() -> Result<&'static Language, &'static CompileErrors> {
    LANGUAGE.as_ref()
}

/// Compiles the grammar anew, for callers that want different options.
pub fn language_with(options: &CompileOptions) -> Result<Language, CompileErrors> {
    let compiled = grammar::grammar().compile(options)?;
    if !compiled.warnings.is_empty() {
        debug!(
            "{} conflicts of `{}` resolved without a declaration",
            compiled.warnings.len(),
            compiled.table.name
        );
    }
    Ok(Language::new(compiled.table, lexer::lex).with_scanner(RawStringScanner::boxed))
}

pub fn parse(src: &[u8]) -> Result<Tree, &'static CompileErrors> {
    Ok(tangle_runtime::parse(language()?, src))
}

pub fn reparse(old: &Tree, edit: &Edit, src: &[u8]) -> Result<Tree, &'static CompileErrors> {
    Ok(tangle_runtime::reparse(language()?, old, edit, src))
}
