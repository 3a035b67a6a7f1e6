//! Turns the competing actions of one table cell into the final action list.
//!
//! Static precedence and associativity settle most shift/reduce and reduce/reduce
//! conflicts. What is left is either declared in [`Grammar::conflicts`] and kept as
//! a runtime fork, or reported.

use std::collections::HashSet;

use cranelift_entity::EntityRef;
use log::warn;
use tangle_runtime::{table::Action, ProductionId, StateId, Symbol};

use crate::{
    error::ErrorAccumulator,
    grammar::Grammar,
    lower::LoweredGrammar,
    lr::{Automaton, FirstSets},
    pattern::Assoc,
};

/// Candidate actions of a state on one lookahead.
#[derive(Default, Debug)]
pub struct Cell {
    pub shift: Option<usize>,
    pub reduces: Vec<ProductionId>,
    pub accept: bool,
}

pub struct Resolver<'a> {
    pub grammar: &'a Grammar,
    pub lowered: &'a LoweredGrammar,
    pub first: &'a FirstSets,
    pub automaton: &'a Automaton,
    pub strict: bool,
    pub err: &'a ErrorAccumulator,
    pub warnings: Vec<String>,
    reported: HashSet<(Vec<String>, Symbol)>,
    pub forks: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(
        grammar: &'a Grammar,
        lowered: &'a LoweredGrammar,
        first: &'a FirstSets,
        automaton: &'a Automaton,
        strict: bool,
        err: &'a ErrorAccumulator,
    ) -> Resolver<'a> {
        Resolver {
            grammar,
            lowered,
            first,
            automaton,
            strict,
            err,
            warnings: Vec::new(),
            reported: HashSet::new(),
            forks: 0,
        }
    }

    pub fn resolve(&mut self, state: usize, lookahead: Symbol, cell: Cell) -> Vec<Action> {
        if cell.accept {
            return vec![Action::Accept];
        }

        let Cell {
            mut shift,
            mut reduces,
            ..
        } = cell;
        reduces.sort();
        reduces.dedup();

        if let Some(max) = reduces.iter().map(|&p| self.lowered.productions[p].prec).max() {
            reduces.retain(|&p| self.lowered.productions[p].prec == max);

            if shift.is_some() {
                let shift_prec = self.shift_precedence(state, lookahead);
                if shift_prec > max {
                    reduces.clear();
                } else if shift_prec < max {
                    shift = None;
                } else {
                    let assoc = |assoc| {
                        reduces
                            .iter()
                            .all(|&p| self.lowered.productions[p].assoc == assoc)
                    };
                    if assoc(Assoc::Left) {
                        shift = None;
                    } else if assoc(Assoc::Right) {
                        reduces.clear();
                    }
                }
            }
        }

        let mut actions: Vec<Action> = shift
            .map(|target| Action::Shift(StateId::new(target)))
            .into_iter()
            .chain(reduces.iter().map(|&p| Action::Reduce(p)))
            .collect();
        if actions.len() <= 1 {
            return actions;
        }

        let reduce_owners: Vec<&str> = reduces
            .iter()
            .map(|&p| self.lowered.production_owner(p))
            .collect();
        let shift_owners = match shift {
            Some(_) => self.shift_owners(state, lookahead),
            None => Vec::new(),
        };

        let declared = self.grammar.conflicts.iter().any(|set| {
            let contains = |name: &str| set.iter().any(|s| s == name);
            reduce_owners.iter().all(|name| contains(name))
                && (shift.is_none() || shift_owners.iter().any(|name| contains(name)))
        });
        if declared {
            self.forks += 1;
            return actions;
        }

        let mut involved: Vec<String> = reduce_owners
            .iter()
            .chain(&shift_owners)
            .map(|name| name.to_string())
            .collect();
        involved.sort();
        involved.dedup();

        let description = self.describe(lookahead, shift.is_some(), &reduces);
        if self.strict {
            let rule = reduce_owners.first().copied().unwrap_or("");
            self.err.error(
                rule,
                format!("{description}, add a precedence or declare a conflict between {involved:?}"),
            );
        } else if self.reported.insert((involved, lookahead)) {
            let message = match shift {
                Some(_) => format!("{description}, resolved as shift"),
                None => format!("{description}, resolved by the earliest production"),
            };
            warn!("{message}");
            self.warnings.push(message);
        }

        // yacc rules, shift first and then the earliest production
        actions.truncate(1);
        actions
    }

    /// Highest precedence among the items which would consume `lookahead`.
    fn shift_precedence(&self, state: usize, lookahead: Symbol) -> i32 {
        self.consuming_items(state, lookahead)
            .into_iter()
            .map(|(_, prec)| prec)
            .max()
            .unwrap_or(0)
    }

    /// Rules whose items in `state` can start with `lookahead` next.
    fn shift_owners(&self, state: usize, lookahead: Symbol) -> Vec<&'a str> {
        let lowered = self.lowered;
        let mut owners: Vec<&str> = self
            .consuming_items(state, lookahead)
            .into_iter()
            .map(|(lhs, _)| lowered.owner_name(lhs))
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Items of `state` which consume `lookahead` next, as `(lhs, step precedence)`.
    ///
    /// Items already in progress decide, closure items only count when no kernel
    /// item can take the token.
    fn consuming_items(&self, state: usize, lookahead: Symbol) -> Vec<(Symbol, i32)> {
        let lowered = self.lowered;
        let mut kernel = Vec::new();
        let mut closure = Vec::new();
        for item in &self.automaton.states[state].items {
            let Some(production) = item.core.production else {
                continue;
            };
            let Some(step) = self.automaton.next_step(lowered, item.core) else {
                continue;
            };
            let starts = step.symbol == lookahead
                || (!lowered.is_terminal(step.symbol)
                    && self.first.first(step.symbol).contains(lookahead.index()));
            if starts {
                let entry = (lowered.productions[production].lhs, step.prec);
                match item.core.dot {
                    0 => closure.push(entry),
                    _ => kernel.push(entry),
                }
            }
        }
        match kernel.is_empty() {
            true => closure,
            false => kernel,
        }
    }

    fn describe(&self, lookahead: Symbol, shift: bool, reduces: &[ProductionId]) -> String {
        let lowered = self.lowered;
        let mut parts = Vec::new();
        if shift {
            parts.push("shift".to_owned());
        }
        for &production in reduces {
            let production = &lowered.productions[production];
            let steps: Vec<&str> = production
                .steps
                .iter()
                .map(|step| lowered.symbols[step.symbol].name.as_str())
                .collect();
            parts.push(format!(
                "reduce `{} -> {}`",
                lowered.symbols[production.lhs].name,
                steps.join(" ")
            ));
        }
        format!(
            "unresolved conflict on `{}`: {}",
            lowered.symbols[lookahead].name,
            parts.join(" / ")
        )
    }
}
