use std::collections::HashMap;

use cranelift_bitset::CompoundBitSet;
use cranelift_entity::{EntityRef, PrimaryMap};

use crate::{FieldId, LexModeId, ProductionId, StateId, Symbol};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    Terminal,
    External,
    Nonterminal,
    /// Name given to a symbol in the tree, never seen by the automaton.
    Alias,
}

#[derive(Clone, Debug)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    /// Named symbols show up in S-expressions, literal tokens don't.
    pub named: bool,
    /// Hidden nonterminals are spliced into their parent.
    pub visible: bool,
    pub extra: bool,
}

impl SymbolInfo {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, SymbolKind::Terminal | SymbolKind::External)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Action {
    Shift(StateId),
    Reduce(ProductionId),
    Accept,
}

#[derive(Clone, Debug)]
pub struct ProductionStep {
    pub symbol: Symbol,
    pub field: Option<FieldId>,
    pub alias: Option<Symbol>,
}

#[derive(Clone, Debug)]
pub struct Production {
    pub lhs: Symbol,
    pub steps: Vec<ProductionStep>,
    pub dynamic_precedence: i32,
}

impl Production {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Tokens a lexer may produce in a group of parse states.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct LexMode {
    pub terminals: CompoundBitSet,
    /// Indexed by position in [`ParseTable::externals`].
    pub externals: CompoundBitSet,
}

impl LexMode {
    pub fn accepts(&self, symbol: Symbol) -> bool {
        self.terminals.contains(symbol.index())
    }

    pub fn has_externals(&self) -> bool {
        !self.externals.is_empty()
    }
}

#[derive(Clone, Default, Debug)]
pub struct ParseState {
    pub actions: HashMap<Symbol, Vec<Action>>,
    pub gotos: HashMap<Symbol, StateId>,
    pub lex_mode: Option<LexModeId>,
}

/// Immutable output of grammar compilation, shared by every parse.
#[derive(Debug)]
pub struct ParseTable {
    pub name: String,
    pub symbols: PrimaryMap<Symbol, SymbolInfo>,
    pub fields: PrimaryMap<FieldId, String>,
    pub productions: PrimaryMap<ProductionId, Production>,
    pub states: PrimaryMap<StateId, ParseState>,
    pub lex_modes: PrimaryMap<LexModeId, LexMode>,
    /// External token symbols in the order the scanner reports them.
    pub externals: Vec<Symbol>,
    pub start_state: StateId,
    terminals: HashMap<String, Symbol>,
}

impl ParseTable {
    /// Creates a table without any states, the two reserved symbols are expected to
    /// already be present in `symbols`.
    pub fn new(
        name: String,
        symbols: PrimaryMap<Symbol, SymbolInfo>,
        fields: PrimaryMap<FieldId, String>,
        externals: Vec<Symbol>,
    ) -> ParseTable {
        debug_assert!(symbols.len() >= 2);

        let terminals = symbols
            .iter()
            .filter(|(symbol, info)| info.is_terminal() && *symbol != Symbol::END)
            .map(|(symbol, info)| (info.name.clone(), symbol))
            .collect();

        ParseTable {
            name,
            symbols,
            fields,
            productions: PrimaryMap::new(),
            states: PrimaryMap::new(),
            lex_modes: PrimaryMap::new(),
            externals,
            start_state: StateId::new(0),
            terminals,
        }
    }

    pub fn actions(&self, state: StateId, symbol: Symbol) -> &[Action] {
        self.states[state]
            .actions
            .get(&symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn goto(&self, state: StateId, symbol: Symbol) -> Option<StateId> {
        self.states[state].gotos.get(&symbol).copied()
    }

    /// Lex mode of a state, states which never lex (they always reduce) use an empty mode.
    pub fn lex_mode(&self, state: StateId) -> Option<&LexMode> {
        self.states[state].lex_mode.map(|mode| &self.lex_modes[mode])
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        &self.symbols[symbol].name
    }

    /// Lexer facing lookup, only terminal and external names resolve.
    pub fn terminal(&self, name: &str) -> Option<Symbol> {
        self.terminals.get(name).copied()
    }

    pub fn symbol_for_name(&self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.terminal(name) {
            return Some(symbol);
        }
        self.symbols
            .iter()
            .find(|(_, info)| info.name == name && info.named)
            .map(|(symbol, _)| symbol)
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .find(|(_, field)| field.as_str() == name)
            .map(|(id, _)| id)
    }

    pub fn external_index(&self, symbol: Symbol) -> Option<usize> {
        self.externals.iter().position(|&s| s == symbol)
    }

    pub fn is_extra(&self, symbol: Symbol) -> bool {
        self.symbols[symbol].extra
    }

    pub fn is_visible(&self, symbol: Symbol) -> bool {
        self.symbols[symbol].visible
    }

    pub fn is_named(&self, symbol: Symbol) -> bool {
        self.symbols[symbol].named
    }
}
