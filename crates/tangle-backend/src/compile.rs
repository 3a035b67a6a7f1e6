use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use cranelift_bitset::CompoundBitSet;
use cranelift_entity::{EntityRef, PrimaryMap};
use log::debug;
use tangle_runtime::{
    table::{Action, LexMode, ParseState, ParseTable, Production, ProductionStep},
    LexModeId, StateId, Symbol,
};

use crate::{
    check,
    error::{CompileErrors, ErrorAccumulator},
    grammar::Grammar,
    lower::{self, LoweredGrammar},
    lr::{self, Automaton, FirstSets},
    resolve::{Cell, Resolver},
};

#[derive(Clone, Default, Debug)]
pub struct CompileOptions {
    /// Reject conflicts which are neither settled by precedence nor declared.
    pub strict: bool,
}

pub struct CompiledGrammar {
    pub table: Arc<ParseTable>,
    /// Conflicts resolved by the yacc fallback.
    pub warnings: Vec<String>,
}

pub fn compile(grammar: &Grammar, options: &CompileOptions) -> Result<CompiledGrammar, CompileErrors> {
    let start = Instant::now();

    let err = ErrorAccumulator::new();
    check::check_grammar(grammar, &err);
    err.finish()?;

    let lowered = lower::lower(grammar);
    debug!(
        "lowered `{}` into {} symbols and {} productions",
        grammar.name,
        lowered.symbols.len(),
        lowered.productions.len()
    );

    let first = FirstSets::new(&lowered);
    let automaton = Automaton::build(&lowered, &first);
    debug!("built {} LALR(1) states", automaton.states.len());

    let err = ErrorAccumulator::new();
    let mut resolver = Resolver::new(grammar, &lowered, &first, &automaton, options.strict, &err);
    let mut states = PrimaryMap::new();
    let mut modes = LexModes::default();

    for (index, state) in automaton.states.iter().enumerate() {
        let mut cells: BTreeMap<Symbol, Cell> = BTreeMap::new();
        let mut gotos = HashMap::new();
        for (&symbol, &target) in &state.transitions {
            match lowered.is_terminal(symbol) {
                true => cells.entry(symbol).or_default().shift = Some(target),
                false => {
                    gotos.insert(symbol, StateId::new(target));
                }
            }
        }
        for item in &state.items {
            if automaton.next_step(&lowered, item.core).is_some() {
                continue;
            }
            match item.core.production {
                None => cells.entry(Symbol::END).or_default().accept = true,
                Some(production) => {
                    for terminal in lr::members(&item.lookahead) {
                        cells
                            .entry(Symbol::new(terminal))
                            .or_default()
                            .reduces
                            .push(production);
                    }
                }
            }
        }

        let mut actions = HashMap::new();
        for (symbol, cell) in cells {
            let resolved = resolver.resolve(index, symbol, cell);
            if !resolved.is_empty() {
                actions.insert(symbol, resolved);
            }
        }

        let lex_mode = modes.intern(&lowered, &actions);
        states.push(ParseState {
            actions,
            gotos,
            lex_mode: Some(lex_mode),
        });
    }

    let Resolver { warnings, forks, .. } = resolver;
    err.finish()?;

    let table = emit(grammar, lowered, states, modes.modes);
    debug!(
        "compiled `{}`: {} states, {} lex modes, {} forking cells, {} warnings in {:?}",
        grammar.name,
        table.states.len(),
        table.lex_modes.len(),
        forks,
        warnings.len(),
        start.elapsed()
    );

    Ok(CompiledGrammar {
        table: Arc::new(table),
        warnings,
    })
}

/// States which can lex the same set of tokens share a mode.
#[derive(Default)]
struct LexModes {
    modes: PrimaryMap<LexModeId, LexMode>,
    keys: HashMap<(Vec<usize>, Vec<usize>), LexModeId>,
}

impl LexModes {
    fn intern(&mut self, lowered: &LoweredGrammar, actions: &HashMap<Symbol, Vec<Action>>) -> LexModeId {
        let mut terminals: Vec<usize> = actions
            .keys()
            .filter(|&&symbol| symbol != Symbol::END)
            .map(|symbol| symbol.index())
            .collect();
        terminals.sort_unstable();
        let externals: Vec<usize> = lowered
            .externals
            .iter()
            .enumerate()
            .filter(|(_, symbol)| actions.contains_key(symbol))
            .map(|(index, _)| index)
            .collect();

        let key = (terminals, externals);
        if let Some(&mode) = self.keys.get(&key) {
            return mode;
        }

        let mut mode = LexMode {
            terminals: CompoundBitSet::new(),
            externals: CompoundBitSet::new(),
        };
        for &terminal in &key.0 {
            mode.terminals.insert(terminal);
        }
        for &external in &key.1 {
            mode.externals.insert(external);
        }
        let id = self.modes.push(mode);
        self.keys.insert(key, id);
        id
    }
}

fn emit(
    grammar: &Grammar,
    lowered: LoweredGrammar,
    states: PrimaryMap<StateId, ParseState>,
    lex_modes: PrimaryMap<LexModeId, LexMode>,
) -> ParseTable {
    let LoweredGrammar {
        symbols,
        fields,
        productions,
        externals,
        ..
    } = lowered;

    let mut table = ParseTable::new(grammar.name.clone(), symbols, fields, externals);
    for production in productions.into_iter().map(|(_, p)| p) {
        table.productions.push(Production {
            lhs: production.lhs,
            steps: production
                .steps
                .into_iter()
                .map(|step| ProductionStep {
                    symbol: step.symbol,
                    field: step.field,
                    alias: step.alias,
                })
                .collect(),
            dynamic_precedence: production.dynamic_precedence,
        });
    }
    table.states = states;
    table.lex_modes = lex_modes;
    table.start_state = StateId::new(0);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::*;
    use tangle_runtime::{lexer::Lexer, parse, Language};

    fn lex(lexer: &mut Lexer, _valid: &dyn Fn(&str) -> bool) -> Option<&'static str> {
        let byte = lexer.lookahead()?;
        match byte {
            b' ' | b'\n' => {
                lexer.advance_while(|b| b == b' ' || b == b'\n');
                Some("_whitespace")
            }
            b'a'..=b'z' => {
                lexer.advance_while(|b| b.is_ascii_lowercase());
                Some("identifier")
            }
            b'<' | b'>' | b'*' | b'+' | b';' => {
                lexer.advance(1);
                Some(match byte {
                    b'<' => "<",
                    b'>' => ">",
                    b'*' => "*",
                    b'+' => "+",
                    _ => ";",
                })
            }
            _ => None,
        }
    }

    fn statements(expression: Pattern) -> Grammar {
        Grammar::new("toy")
            .terminals(["identifier", "_whitespace"])
            .extras(["_whitespace"])
            .rule("program", repeat(sym("_statement")))
            .rule("_statement", choice([sym("declaration"), sym("expression_statement")]))
            .rule(
                "declaration",
                prec_dynamic(
                    1,
                    seq([
                        field("type", alias(sym("identifier"), "type_identifier")),
                        tok("*"),
                        field("declarator", sym("identifier")),
                        tok(";"),
                    ]),
                ),
            )
            .rule("expression_statement", seq([sym("_expression"), tok(";")]))
            .rule("_expression", choice([sym("identifier"), sym("binary_expression")]))
            .rule("binary_expression", expression)
    }

    fn binary(operators: &[&str]) -> Pattern {
        seq([
            field("left", sym("_expression")),
            field("operator", choice(operators.iter().map(|op| tok(op)))),
            field("right", sym("_expression")),
        ])
    }

    fn language(grammar: &Grammar, options: &CompileOptions) -> Language {
        let compiled = grammar.compile(options).unwrap();
        Language::new(compiled.table, lex)
    }

    #[test]
    fn left_associative_comparisons_group_to_the_left() {
        let grammar = statements(prec_left(1, binary(&["<", ">", "*"])))
            .conflicts(&[&["declaration", "_expression"]]);
        let language = language(&grammar, &CompileOptions { strict: true });
        let tree = parse(&language, b"a < b > c;");
        assert_eq!(
            tree.to_sexp(),
            "(program (expression_statement (binary_expression \
             left: (binary_expression left: (identifier) right: (identifier)) \
             right: (identifier))))"
        );
    }

    #[test]
    fn declared_conflict_prefers_higher_dynamic_precedence() {
        let grammar = statements(prec_left(1, binary(&["*", "+"])))
            .conflicts(&[&["declaration", "_expression"]]);
        let language = language(&grammar, &CompileOptions { strict: true });

        let tree = parse(&language, b"a * b;");
        assert_eq!(
            tree.to_sexp(),
            "(program (declaration type: (type_identifier) declarator: (identifier)))"
        );

        let tree = parse(&language, b"a + b;\na * b * c;");
        assert!(!tree.root_node().has_error());
        let kinds: Vec<&str> = tree.root_node().named_children().map(|n| n.kind_name()).collect();
        assert_eq!(kinds, ["expression_statement", "expression_statement"]);
    }

    #[test]
    fn undeclared_conflict_is_rejected_in_strict_mode() {
        let grammar = statements(prec_left(1, binary(&["*"])));
        let errors = grammar.compile(&CompileOptions { strict: true }).err().unwrap();
        assert!(errors.mentions("_expression", "unresolved conflict on `*`"));

        let compiled = grammar.compile(&CompileOptions::default()).unwrap();
        assert!(compiled
            .warnings
            .iter()
            .any(|w| w.contains("resolved as shift")));
    }

    #[test]
    fn missing_precedence_is_a_conflict() {
        let grammar = statements(binary(&["+"])).conflicts(&[&["declaration", "_expression"]]);
        let errors = grammar.compile(&CompileOptions { strict: true }).err().unwrap();
        assert!(errors.mentions("binary_expression", "unresolved conflict on `+`"));
    }

    #[test]
    fn lookaheads_past_the_first_word_of_terminals() {
        let keywords: Vec<String> = (0..80).map(|i| format!("k{i}")).collect();
        let grammar = Grammar::new("wide")
            .rule("program", repeat(sym("item")))
            .rule("item", choice(keywords.iter().map(|k| tok(k))));
        let compiled = grammar.compile(&CompileOptions { strict: true }).unwrap();
        let table = &compiled.table;

        let first = table.terminal("k0").unwrap();
        let last = table.terminal("k79").unwrap();
        assert!(last.index() >= 64);
        let [Action::Shift(after_first)] = table.actions(table.start_state, first) else {
            panic!("expected a shift on k0");
        };
        // `item -> k0` reduces before any keyword, including the ones stored in the second word
        for keyword in &keywords {
            let symbol = table.terminal(keyword).unwrap();
            assert!(
                matches!(table.actions(*after_first, symbol), [Action::Reduce(_)]),
                "{keyword}"
            );
        }
        assert!(table.lex_mode(table.start_state).unwrap().accepts(last));
    }

    #[test]
    fn errors_are_contained_and_cover_the_input() {
        let grammar = statements(prec_left(1, binary(&["+", "*"])))
            .conflicts(&[&["declaration", "_expression"]]);
        let language = language(&grammar, &CompileOptions::default());
        for src in [&b""[..], b"a + ;", b"a + b; ; c;", b"#!?", b"a * * b;"] {
            let tree = parse(&language, src);
            let root = tree.root_node();
            assert_eq!(root.byte_range(), 0..src.len(), "{src:?}");
            let covered: usize = tree.leaves().map(|leaf| leaf.byte_range().len()).sum();
            assert_eq!(covered, src.len(), "{src:?}");
        }
        let tree = parse(&language, b"a + ; b;");
        assert!(tree.root_node().has_error());
    }
}
