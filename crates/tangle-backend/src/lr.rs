//! LALR(1) automaton construction.
//!
//! States are identified by their LR(0) kernel. Whenever a transition reaches an
//! existing kernel with new lookaheads the target state is queued again, so the
//! lookaheads propagate until nothing changes.

use std::collections::{BTreeMap, HashMap, VecDeque};

use cranelift_bitset::CompoundBitSet;
use cranelift_entity::{EntityRef, EntitySet, SecondaryMap};
use tangle_runtime::{ProductionId, Symbol};

use crate::lower::{LoweredGrammar, LoweredStep};

/// Members of `set` in ascending order.
///
/// `CompoundBitSet::iter` overflows on a word whose top bit is set, so this
/// walks up to `max` instead.
pub fn members(set: &CompoundBitSet) -> impl Iterator<Item = usize> + '_ {
    let end = set.max().map_or(0, |max| max + 1);
    (0..end).filter(move |&i| set.contains(i))
}

/// Adds `from` to `into`, returns whether anything was new.
pub fn union(into: &mut CompoundBitSet, from: &CompoundBitSet) -> bool {
    let mut changed = false;
    for i in members(from) {
        if !into.contains(i) {
            into.insert(i);
            changed = true;
        }
    }
    changed
}

pub struct FirstSets {
    nullable: EntitySet<Symbol>,
    first: SecondaryMap<Symbol, CompoundBitSet>,
}

impl FirstSets {
    pub fn new(grammar: &LoweredGrammar) -> FirstSets {
        let mut sets = FirstSets {
            nullable: EntitySet::new(),
            first: SecondaryMap::new(),
        };
        for symbol in grammar.symbols.keys() {
            if grammar.is_terminal(symbol) {
                sets.first[symbol].insert(symbol.index());
            }
        }

        loop {
            let mut changed = false;
            for production in grammar.productions.values() {
                let lhs = production.lhs;
                let mut all_nullable = true;
                for step in &production.steps {
                    let from = sets.first[step.symbol].clone();
                    changed |= union(&mut sets.first[lhs], &from);
                    if !sets.nullable.contains(step.symbol) {
                        all_nullable = false;
                        break;
                    }
                }
                if all_nullable && !sets.nullable.contains(lhs) {
                    sets.nullable.insert(lhs);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        sets
    }

    pub fn first(&self, symbol: Symbol) -> &CompoundBitSet {
        &self.first[symbol]
    }

    pub fn is_nullable(&self, symbol: Symbol) -> bool {
        self.nullable.contains(symbol)
    }

    /// FIRST of a symbol string, and whether the whole string is nullable.
    pub fn sequence<'a>(&self, steps: impl IntoIterator<Item = &'a LoweredStep>) -> (CompoundBitSet, bool) {
        let mut set = CompoundBitSet::new();
        for step in steps {
            union(&mut set, &self.first[step.symbol]);
            if !self.is_nullable(step.symbol) {
                return (set, false);
            }
        }
        (set, true)
    }
}

/// Position inside a production, `production == None` is the augmented start.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Core {
    pub production: Option<ProductionId>,
    pub dot: usize,
}

#[derive(Clone, Debug)]
pub struct Item {
    pub core: Core,
    pub lookahead: CompoundBitSet,
}

pub struct LrState {
    pub kernel: Vec<Item>,
    /// Kernel and closure items.
    pub items: Vec<Item>,
    pub transitions: BTreeMap<Symbol, usize>,
}

pub struct Automaton {
    pub states: Vec<LrState>,
    augmented: Vec<LoweredStep>,
}

impl Automaton {
    pub fn steps<'g>(&'g self, grammar: &'g LoweredGrammar, core: Core) -> &'g [LoweredStep] {
        match core.production {
            Some(production) => &grammar.productions[production].steps,
            None => &self.augmented,
        }
    }

    pub fn next_step<'g>(&'g self, grammar: &'g LoweredGrammar, core: Core) -> Option<&'g LoweredStep> {
        self.steps(grammar, core).get(core.dot)
    }

    pub fn build(grammar: &LoweredGrammar, first: &FirstSets) -> Automaton {
        let mut automaton = Automaton {
            states: Vec::new(),
            augmented: vec![LoweredStep {
                symbol: grammar.start,
                field: None,
                alias: None,
                prec: 0,
            }],
        };

        let mut end = CompoundBitSet::new();
        end.insert(Symbol::END.index());
        let start = Item {
            core: Core {
                production: None,
                dot: 0,
            },
            lookahead: end,
        };

        let mut cores: HashMap<Vec<Core>, usize> = HashMap::new();
        let mut queued = vec![true];
        let mut queue = VecDeque::from([0]);
        cores.insert(vec![start.core], 0);
        automaton.states.push(LrState {
            kernel: vec![start],
            items: Vec::new(),
            transitions: BTreeMap::new(),
        });

        while let Some(state) = queue.pop_front() {
            queued[state] = false;
            let items = automaton.closure(grammar, first, &automaton.states[state].kernel);

            let mut successors: BTreeMap<Symbol, Vec<Item>> = BTreeMap::new();
            for item in &items {
                if let Some(step) = automaton.next_step(grammar, item.core) {
                    successors.entry(step.symbol).or_default().push(Item {
                        core: Core {
                            dot: item.core.dot + 1,
                            ..item.core
                        },
                        lookahead: item.lookahead.clone(),
                    });
                }
            }
            automaton.states[state].items = items;

            for (symbol, mut kernel) in successors {
                kernel.sort_by_key(|item| item.core);
                let key: Vec<Core> = kernel.iter().map(|item| item.core).collect();
                let target = match cores.get(&key) {
                    Some(&target) => {
                        let existing = &mut automaton.states[target].kernel;
                        let mut changed = false;
                        for (old, new) in existing.iter_mut().zip(&kernel) {
                            changed |= union(&mut old.lookahead, &new.lookahead);
                        }
                        if changed && !queued[target] {
                            queued[target] = true;
                            queue.push_back(target);
                        }
                        target
                    }
                    None => {
                        let target = automaton.states.len();
                        automaton.states.push(LrState {
                            kernel,
                            items: Vec::new(),
                            transitions: BTreeMap::new(),
                        });
                        cores.insert(key, target);
                        queued.push(true);
                        queue.push_back(target);
                        target
                    }
                };
                automaton.states[state].transitions.insert(symbol, target);
            }
        }

        automaton
    }

    fn closure(&self, grammar: &LoweredGrammar, first: &FirstSets, kernel: &[Item]) -> Vec<Item> {
        let mut items = kernel.to_vec();
        let mut index: HashMap<Core, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.core, i))
            .collect();
        let mut stack: Vec<usize> = (0..items.len()).rev().collect();

        while let Some(i) = stack.pop() {
            let core = items[i].core;
            let steps = self.steps(grammar, core);
            let Some(next) = steps.get(core.dot) else {
                continue;
            };
            if grammar.is_terminal(next.symbol) {
                continue;
            }

            let (mut follow, nullable) = first.sequence(&steps[core.dot + 1..]);
            if nullable {
                let lookahead = items[i].lookahead.clone();
                union(&mut follow, &lookahead);
            }

            for &production in &grammar.by_lhs[next.symbol] {
                let core = Core {
                    production: Some(production),
                    dot: 0,
                };
                match index.get(&core) {
                    Some(&j) => {
                        if union(&mut items[j].lookahead, &follow) {
                            stack.push(j);
                        }
                    }
                    None => {
                        index.insert(core, items.len());
                        stack.push(items.len());
                        items.push(Item {
                            core,
                            lookahead: follow.clone(),
                        });
                    }
                }
            }
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar::Grammar, lower::lower, pattern::*};

    fn expression_grammar() -> Grammar {
        Grammar::new("t")
            .terminals(["x"])
            .rule("e", choice([seq([sym("e"), tok("+"), sym("t")]), sym("t")]))
            .rule("t", choice([sym("x"), seq([tok("("), sym("e"), tok(")")])]))
    }

    #[test]
    fn first_sets_see_through_nullable_prefixes() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("s", seq([sym("a"), sym("x")]))
            .rule("a", optional(tok("y")));
        let lowered = lower(&grammar);
        let first = FirstSets::new(&lowered);
        let s = lowered.start;
        let names: Vec<&str> = members(first.first(s))
            .map(|i| lowered.symbols[Symbol::new(i)].name.as_str())
            .collect();
        assert_eq!(names, ["x", "y"]);
        assert!(!first.is_nullable(s));
    }

    #[test]
    fn lalr_states_for_expressions() {
        let lowered = lower(&expression_grammar());
        let first = FirstSets::new(&lowered);
        let automaton = Automaton::build(&lowered, &first);
        // the classic LR(0) collection of this grammar has 9 states, LALR keeps the count
        assert_eq!(automaton.states.len(), 9);

        let initial = &automaton.states[0];
        let on_e = initial.transitions[&lowered.start];
        let accepting = &automaton.states[on_e];
        let done = accepting
            .items
            .iter()
            .find(|item| item.core.production.is_none() && item.core.dot == 1)
            .unwrap();
        assert!(done.lookahead.contains(Symbol::END.index()));
    }
}
