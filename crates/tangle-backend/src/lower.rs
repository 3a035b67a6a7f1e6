//! Flattening of rule patterns into productions over numbered symbols.

use std::collections::HashMap;

use cranelift_entity::{PrimaryMap, SecondaryMap};
use tangle_runtime::{
    table::{SymbolInfo, SymbolKind},
    FieldId, ProductionId, Symbol,
};

use crate::{
    grammar::Grammar,
    pattern::{Assoc, Pattern, PrecLevel},
};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoweredStep {
    pub symbol: Symbol,
    pub field: Option<FieldId>,
    pub alias: Option<Symbol>,
    /// Static precedence in effect at this step, used when shifting into it.
    pub prec: i32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoweredProduction {
    pub lhs: Symbol,
    pub steps: Vec<LoweredStep>,
    pub prec: i32,
    pub assoc: Assoc,
    pub dynamic_precedence: i32,
}

pub struct LoweredGrammar {
    pub symbols: PrimaryMap<Symbol, SymbolInfo>,
    pub fields: PrimaryMap<FieldId, String>,
    pub productions: PrimaryMap<ProductionId, LoweredProduction>,
    pub by_lhs: SecondaryMap<Symbol, Vec<ProductionId>>,
    /// Rule an auxiliary symbol was created for, rules map to themselves.
    pub owners: SecondaryMap<Symbol, Option<Symbol>>,
    pub externals: Vec<Symbol>,
    pub start: Symbol,
}

impl LoweredGrammar {
    pub fn is_terminal(&self, symbol: Symbol) -> bool {
        self.symbols[symbol].is_terminal() || symbol == Symbol::END || symbol == Symbol::ERROR
    }

    /// Name used to match conflict declarations.
    pub fn owner_name(&self, symbol: Symbol) -> &str {
        let owner = self.owners[symbol].unwrap_or(symbol);
        &self.symbols[owner].name
    }

    pub fn production_owner(&self, production: ProductionId) -> &str {
        self.owner_name(self.productions[production].lhs)
    }
}

#[derive(Clone, Copy)]
struct Context {
    prec: i32,
    assoc: Assoc,
    field: Option<FieldId>,
    alias: Option<Symbol>,
}

#[derive(Clone)]
struct Alternative {
    steps: Vec<LoweredStep>,
    dynamic_precedence: i32,
    /// Precedence of the last step, or of the surrounding context for empty ones.
    prec: i32,
    assoc: Assoc,
}

impl Alternative {
    fn empty(cx: Context) -> Alternative {
        Alternative {
            steps: Vec::new(),
            dynamic_precedence: 0,
            prec: cx.prec,
            assoc: cx.assoc,
        }
    }

    fn concat(&self, other: &Alternative) -> Alternative {
        let (prec, assoc) = match other.steps.is_empty() {
            true => (self.prec, self.assoc),
            false => (other.prec, other.assoc),
        };
        Alternative {
            steps: self.steps.iter().chain(&other.steps).cloned().collect(),
            dynamic_precedence: self.dynamic_precedence + other.dynamic_precedence,
            prec,
            assoc,
        }
    }
}

struct LowerCx<'g> {
    grammar: &'g Grammar,
    out: LoweredGrammar,
    names: HashMap<String, Symbol>,
    tokens: HashMap<String, Symbol>,
    field_names: HashMap<String, FieldId>,
    current_rule: Symbol,
    repeat_count: HashMap<Symbol, u32>,
}

/// Expects a grammar that passed [`crate::check::check_grammar`].
pub fn lower(grammar: &Grammar) -> LoweredGrammar {
    let mut symbols = PrimaryMap::new();
    let mut push = |name: &str, kind: SymbolKind, named: bool, visible: bool| {
        symbols.push(SymbolInfo {
            name: name.to_owned(),
            kind,
            named,
            visible,
            extra: false,
        })
    };
    push("end", SymbolKind::Terminal, false, false);
    push("ERROR", SymbolKind::Nonterminal, true, true);

    let mut names = HashMap::new();
    for name in &grammar.terminals {
        let symbol = push(name, SymbolKind::Terminal, !name.starts_with('_'), true);
        names.insert(name.clone(), symbol);
    }
    let mut externals = Vec::new();
    for name in &grammar.externals {
        let symbol = push(name, SymbolKind::External, !name.starts_with('_'), true);
        names.insert(name.clone(), symbol);
        externals.push(symbol);
    }

    // literal tokens in order of first appearance
    let mut tokens = HashMap::new();
    for rule in grammar.rules.values() {
        rule.pattern.visit(&mut |pattern| {
            if let Pattern::Token(text) = pattern {
                if !tokens.contains_key(text) {
                    tokens.insert(text.clone(), push(text, SymbolKind::Terminal, false, true));
                }
            }
        });
    }

    for rule in grammar.rules.values() {
        let visible = !rule.is_hidden();
        names.insert(
            rule.name.clone(),
            push(&rule.name, SymbolKind::Nonterminal, visible, visible),
        );
    }

    for extra in &grammar.extras {
        if let Some(&symbol) = names.get(extra) {
            symbols[symbol].extra = true;
        }
    }

    let start = grammar
        .start()
        .and_then(|handle| names.get(&grammar.rules[handle].name).copied())
        .unwrap_or(Symbol::ERROR);

    let mut cx = LowerCx {
        grammar,
        out: LoweredGrammar {
            symbols,
            fields: PrimaryMap::new(),
            productions: PrimaryMap::new(),
            by_lhs: SecondaryMap::new(),
            owners: SecondaryMap::new(),
            externals,
            start,
        },
        names,
        tokens,
        field_names: HashMap::new(),
        current_rule: start,
        repeat_count: HashMap::new(),
    };

    for rule in grammar.rules.values() {
        let lhs = cx.names[&rule.name];
        cx.current_rule = lhs;
        let cx_root = Context {
            prec: 0,
            assoc: Assoc::None,
            field: None,
            alias: None,
        };
        let alternatives = cx.expand(&rule.pattern, cx_root);
        cx.add_productions(lhs, alternatives);
    }

    cx.out
}

impl LowerCx<'_> {
    fn expand(&mut self, pattern: &Pattern, cx: Context) -> Vec<Alternative> {
        match pattern {
            Pattern::Blank => vec![Alternative::empty(cx)],
            Pattern::Symbol(name) => {
                let symbol = self.names.get(name).copied().unwrap_or(Symbol::ERROR);
                vec![self.single(symbol, cx)]
            }
            Pattern::Token(text) => {
                let symbol = self.tokens.get(text).copied().unwrap_or(Symbol::ERROR);
                vec![self.single(symbol, cx)]
            }
            Pattern::Seq(children) => {
                let mut result = vec![Alternative::empty(cx)];
                for child in children {
                    let expanded = self.expand(child, cx);
                    result = result
                        .iter()
                        .flat_map(|a| expanded.iter().map(move |b| a.concat(b)))
                        .collect();
                }
                result
            }
            Pattern::Choice(children) => children
                .iter()
                .flat_map(|child| self.expand(child, cx))
                .collect(),
            Pattern::Optional(p) => {
                let mut result = self.expand(p, cx);
                result.push(Alternative::empty(cx));
                result
            }
            Pattern::Repeat(p) => {
                let aux = self.repeat_symbol(p, cx);
                vec![Alternative::empty(cx), self.single(aux, cx)]
            }
            Pattern::Repeat1(p) => {
                let aux = self.repeat_symbol(p, cx);
                vec![self.single(aux, cx)]
            }
            Pattern::Field(name, p) => {
                let field = self.field(name);
                self.expand(p, Context { field: Some(field), ..cx })
            }
            Pattern::Prec {
                level,
                assoc,
                pattern,
            } => {
                let prec = match level {
                    PrecLevel::Number(n) => *n,
                    PrecLevel::Named(name) => self.grammar.precedence_value(name).unwrap_or(0),
                };
                let cx = Context {
                    prec,
                    assoc: *assoc,
                    ..cx
                };
                self.expand(pattern, cx)
            }
            Pattern::PrecDynamic(value, p) => {
                let mut result = self.expand(p, cx);
                for alternative in &mut result {
                    alternative.dynamic_precedence += value;
                }
                result
            }
            Pattern::Alias(name, p) => {
                let alias = self.alias_symbol(name);
                self.expand(p, Context { alias: Some(alias), ..cx })
            }
        }
    }

    fn single(&self, symbol: Symbol, cx: Context) -> Alternative {
        Alternative {
            steps: vec![LoweredStep {
                symbol,
                field: cx.field,
                alias: cx.alias,
                prec: cx.prec,
            }],
            dynamic_precedence: 0,
            prec: cx.prec,
            assoc: cx.assoc,
        }
    }

    /// Hidden left recursive symbol for `aux -> aux p | p`.
    fn repeat_symbol(&mut self, pattern: &Pattern, cx: Context) -> Symbol {
        let owner = self.current_rule;
        let count = self.repeat_count.entry(owner).or_insert(0);
        *count += 1;
        let name = format!("{}_repeat{count}", self.out.symbols[owner].name.trim_start_matches('_'));
        let aux = self.out.symbols.push(SymbolInfo {
            name: format!("_{name}"),
            kind: SymbolKind::Nonterminal,
            named: false,
            visible: false,
            extra: false,
        });
        self.out.owners[aux] = Some(owner);

        let body = self.expand(pattern, cx);
        let recursive = LoweredStep {
            symbol: aux,
            field: None,
            alias: None,
            prec: cx.prec,
        };
        let mut alternatives = Vec::with_capacity(body.len() * 2);
        for alternative in &body {
            let mut steps = vec![recursive.clone()];
            steps.extend(alternative.steps.iter().cloned());
            alternatives.push(Alternative {
                steps,
                ..alternative.clone()
            });
        }
        alternatives.extend(body);
        self.add_productions(aux, alternatives);
        aux
    }

    fn field(&mut self, name: &str) -> FieldId {
        if let Some(&field) = self.field_names.get(name) {
            return field;
        }
        let field = self.out.fields.push(name.to_owned());
        self.field_names.insert(name.to_owned(), field);
        field
    }

    fn alias_symbol(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.names.get(name) {
            return symbol;
        }
        let symbol = self.out.symbols.push(SymbolInfo {
            name: name.to_owned(),
            kind: SymbolKind::Alias,
            named: true,
            visible: true,
            extra: false,
        });
        self.names.insert(name.to_owned(), symbol);
        symbol
    }

    fn add_productions(&mut self, lhs: Symbol, alternatives: Vec<Alternative>) {
        let mut seen: Vec<Vec<LoweredStep>> = Vec::new();
        for alternative in alternatives {
            // `choice(optional(a), b)` and friends produce duplicates
            if seen.contains(&alternative.steps) {
                continue;
            }
            seen.push(alternative.steps.clone());
            let production = self.out.productions.push(LoweredProduction {
                lhs,
                steps: alternative.steps,
                prec: alternative.prec,
                assoc: alternative.assoc,
                dynamic_precedence: alternative.dynamic_precedence,
            });
            self.out.by_lhs[lhs].push(production);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::*;

    fn names(lowered: &LoweredGrammar, production: ProductionId) -> Vec<&str> {
        lowered.productions[production]
            .steps
            .iter()
            .map(|step| lowered.symbols[step.symbol].name.as_str())
            .collect()
    }

    #[test]
    fn optional_and_choice_expand_into_alternatives() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("program", seq([optional(tok("a")), choice([sym("x"), tok("b")])]));
        let lowered = lower(&grammar);
        let program = lowered.start;
        let alternatives: Vec<_> = lowered.by_lhs[program]
            .iter()
            .map(|&p| names(&lowered, p))
            .collect();
        assert_eq!(
            alternatives,
            [vec!["a", "x"], vec!["a", "b"], vec!["x"], vec!["b"]]
        );
    }

    #[test]
    fn repeat_becomes_hidden_left_recursion() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("list", repeat(field("item", sym("x"))));
        let lowered = lower(&grammar);
        let productions = &lowered.by_lhs[lowered.start];
        assert_eq!(productions.len(), 2);
        let aux = lowered.productions[productions[1]].steps[0].symbol;
        assert_eq!(lowered.symbols[aux].name, "_list_repeat1");
        assert!(!lowered.symbols[aux].visible);
        assert_eq!(lowered.owner_name(aux), "list");

        let aux_alternatives: Vec<_> = lowered.by_lhs[aux]
            .iter()
            .map(|&p| names(&lowered, p))
            .collect();
        assert_eq!(aux_alternatives, [vec!["_list_repeat1", "x"], vec!["x"]]);
        let item = lowered.productions[lowered.by_lhs[aux][1]].steps[0].field;
        assert_eq!(item.map(|f| lowered.fields[f].as_str()), Some("item"));
    }

    #[test]
    fn precedence_attaches_to_steps_and_production() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .precedences(["mul", "add"])
            .rule("e", choice([
                prec_left("add", seq([sym("e"), tok("+"), sym("e")])),
                prec_dynamic(2, sym("x")),
            ]));
        let lowered = lower(&grammar);
        let add = &lowered.productions[lowered.by_lhs[lowered.start][0]];
        assert_eq!((add.prec, add.assoc), (1, Assoc::Left));
        assert!(add.steps.iter().all(|step| step.prec == 1));
        let atom = &lowered.productions[lowered.by_lhs[lowered.start][1]];
        assert_eq!((atom.prec, atom.dynamic_precedence), (0, 2));
    }
}
