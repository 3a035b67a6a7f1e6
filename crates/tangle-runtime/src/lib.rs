pub mod engine;
pub mod incremental;
pub mod lexer;
pub mod scanner;
pub mod table;
pub mod tree;

use std::{fmt::Debug, sync::Arc};

use cranelift_entity::entity_impl;

use lexer::Lexer;
use scanner::ExternalScanner;
use table::ParseTable;

pub use engine::Parser;
pub use incremental::Edit;
pub use tree::{Node, Tree, TreeCursor};

/// Index into [`ParseTable::symbols`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Symbol(u32);
entity_impl! { Symbol }

impl Symbol {
    /// End of input, never produced by a lexer.
    pub const END: Symbol = Symbol(0);
    /// Recovery nodes and bytes no lexer recognized.
    pub const ERROR: Symbol = Symbol(1);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FieldId(u32);
entity_impl! { FieldId }

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ProductionId(u32);
entity_impl! { ProductionId }

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateId(u32);
entity_impl! { StateId }

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LexModeId(u32);
entity_impl! { LexModeId }

/// Context-free lexer of a language.
///
/// Called with the cursor at the token start and a predicate telling which token
/// names the parser can accept at this point. Returns the name of the recognized
/// token and leaves the cursor at its end (or at the position set with
/// [`Lexer::mark_end`]).
pub type LexFn = fn(&mut Lexer, &dyn Fn(&str) -> bool) -> Option<&'static str>;

pub type ScannerFactory = fn() -> Box<dyn ExternalScanner>;

/// A compiled grammar together with the code that tokenizes it.
///
/// Cloning is cheap, the parse table is shared and never mutated.
#[derive(Clone)]
pub struct Language {
    table: Arc<ParseTable>,
    lexer: LexFn,
    scanner: Option<ScannerFactory>,
}

impl Language {
    pub fn new(table: Arc<ParseTable>, lexer: LexFn) -> Language {
        Language {
            table,
            lexer,
            scanner: None,
        }
    }

    pub fn with_scanner(mut self, scanner: ScannerFactory) -> Language {
        self.scanner = Some(scanner);
        self
    }

    pub fn table(&self) -> &ParseTable {
        &self.table
    }

    pub(crate) fn table_arc(&self) -> &Arc<ParseTable> {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        self.table.symbol_name(symbol)
    }

    pub fn symbol_for_name(&self, name: &str) -> Option<Symbol> {
        self.table.symbol_for_name(name)
    }

    pub fn field_name(&self, field: FieldId) -> &str {
        &self.table.fields[field]
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.table.field_id(name)
    }

    pub(crate) fn lexer(&self) -> LexFn {
        self.lexer
    }

    pub(crate) fn create_scanner(&self) -> Option<Box<dyn ExternalScanner>> {
        self.scanner.map(|factory| factory())
    }
}

impl Debug for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.table.name)
            .field("states", &self.table.states.len())
            .finish()
    }
}

/// Parses `src` from scratch.
pub fn parse(language: &Language, src: &[u8]) -> Tree {
    Parser::new(language).parse(src)
}

/// Parses `src`, the result of applying `edit` to the text `old` was parsed from.
pub fn reparse(language: &Language, old: &Tree, edit: &Edit, src: &[u8]) -> Tree {
    Parser::new(language).reparse(old, edit, src)
}

#[test]
fn trees_cross_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Tree>();
    assert_send_sync::<Language>();
}

#[test]
fn reserved_symbols() {
    use cranelift_entity::EntityRef;
    assert_eq!(Symbol::END.index(), 0);
    assert_eq!(Symbol::ERROR.index(), 1);
    assert_ne!(Symbol::END, Symbol::ERROR);
}
