//! Grammar validation, run before anything is lowered.

use std::collections::{BTreeSet, HashMap};

use cranelift_entity::{EntitySet, SecondaryMap};

use crate::{
    error::ErrorAccumulator,
    grammar::{Grammar, RuleHandle},
    pattern::{Pattern, PrecLevel},
};

pub type RuleNames<'a> = HashMap<&'a str, RuleHandle>;

pub fn rule_names(grammar: &Grammar) -> RuleNames<'_> {
    grammar
        .rules
        .iter()
        .map(|(handle, rule)| (rule.name.as_str(), handle))
        .collect()
}

pub fn check_grammar(grammar: &Grammar, err: &ErrorAccumulator) {
    if grammar.rules.is_empty() {
        err.error_global("grammar has no rules");
        return;
    }
    let names = rule_names(grammar);
    check_names(grammar, &names, err);
    if !err.is_empty() {
        // the remaining checks assume every name resolves
        return;
    }
    check_productive(grammar, &names, err);
    check_reachable(grammar, &names, err);
    check_unit_cycles(grammar, &names, err);
    check_ambiguity_cycles(grammar, &names, err);
}

fn check_names(grammar: &Grammar, names: &RuleNames, err: &ErrorAccumulator) {
    let mut seen = HashMap::new();
    for (handle, rule) in grammar.rules.iter() {
        if let Some(first) = seen.insert(rule.name.as_str(), handle) {
            err.error(&rule.name, format!("defined twice, first as rule #{}", first.as_u32()));
        }
        if grammar.is_terminal(&rule.name) {
            err.error_static(&rule.name, "has the same name as a terminal");
        }

        rule.pattern.visit(&mut |pattern| match pattern {
            Pattern::Symbol(name) => {
                if !names.contains_key(name.as_str()) && !grammar.is_terminal(name) {
                    err.error(&rule.name, format!("undefined symbol `{name}`"));
                }
            }
            Pattern::Alias(name, inner) => {
                if !matches!(**inner, Pattern::Symbol(_) | Pattern::Token(_)) {
                    err.error(&rule.name, format!("alias `{name}` must wrap a single symbol"));
                }
            }
            Pattern::Prec {
                level: PrecLevel::Named(level),
                ..
            } => {
                if grammar.precedence_value(level).is_none() {
                    err.error(&rule.name, format!("unknown precedence `{level}`"));
                }
            }
            _ => {}
        });
    }

    for extra in &grammar.extras {
        if !grammar.is_terminal(extra) {
            err.error_global(format!("extra `{extra}` is not a declared terminal"));
        }
    }
    if let Some(word) = &grammar.word {
        if !grammar.terminals.contains(word) {
            err.error_global(format!("word token `{word}` is not a declared terminal"));
        }
    }
    for set in &grammar.conflicts {
        if set.is_empty() {
            err.error_global("empty conflict declaration");
        }
        for name in set {
            if !names.contains_key(name.as_str()) {
                err.error_global(format!("conflict declaration names unknown rule `{name}`"));
            }
        }
    }
    for (i, level) in grammar.precedences.iter().enumerate() {
        if grammar.precedences[..i].contains(level) {
            err.error_global(format!("precedence `{level}` declared twice"));
        }
    }
}

fn is_productive(pattern: &Pattern, names: &RuleNames, productive: &EntitySet<RuleHandle>) -> bool {
    match pattern {
        Pattern::Blank | Pattern::Token(_) => true,
        Pattern::Symbol(name) => match names.get(name.as_str()) {
            Some(&handle) => productive.contains(handle),
            None => true,
        },
        Pattern::Seq(children) => children.iter().all(|c| is_productive(c, names, productive)),
        Pattern::Choice(children) => children.iter().any(|c| is_productive(c, names, productive)),
        Pattern::Repeat(_) | Pattern::Optional(_) => true,
        Pattern::Repeat1(p)
        | Pattern::Field(_, p)
        | Pattern::Prec { pattern: p, .. }
        | Pattern::PrecDynamic(_, p)
        | Pattern::Alias(_, p) => is_productive(p, names, productive),
    }
}

fn check_productive(grammar: &Grammar, names: &RuleNames, err: &ErrorAccumulator) {
    let mut productive = EntitySet::new();
    loop {
        let mut changed = false;
        for (handle, rule) in grammar.rules.iter() {
            if !productive.contains(handle) && is_productive(&rule.pattern, names, &productive) {
                productive.insert(handle);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for (handle, rule) in grammar.rules.iter() {
        if !productive.contains(handle) {
            err.error_static(&rule.name, "is unproductive, it can never derive a finite string");
        }
    }
}

fn referenced_rules(pattern: &Pattern, names: &RuleNames) -> BTreeSet<RuleHandle> {
    let mut rules = BTreeSet::new();
    pattern.visit(&mut |p| {
        if let Pattern::Symbol(name) = p {
            if let Some(&handle) = names.get(name.as_str()) {
                rules.insert(handle);
            }
        }
    });
    rules
}

fn check_reachable(grammar: &Grammar, names: &RuleNames, err: &ErrorAccumulator) {
    let Some(start) = grammar.start() else {
        return;
    };
    let mut reached = EntitySet::new();
    let mut stack = vec![start];
    reached.insert(start);
    while let Some(handle) = stack.pop() {
        for next in referenced_rules(&grammar.rules[handle].pattern, names) {
            if !reached.contains(next) {
                reached.insert(next);
                stack.push(next);
            }
        }
    }
    for (handle, rule) in grammar.rules.iter() {
        if !reached.contains(handle) {
            err.error_static(&rule.name, "is unreachable from the start rule");
        }
    }
}

fn is_nullable(pattern: &Pattern, names: &RuleNames, nullable: &EntitySet<RuleHandle>) -> bool {
    match pattern {
        Pattern::Blank | Pattern::Repeat(_) | Pattern::Optional(_) => true,
        Pattern::Token(text) => text.is_empty(),
        // terminals always consume input
        Pattern::Symbol(name) => names
            .get(name.as_str())
            .map_or(false, |&handle| nullable.contains(handle)),
        Pattern::Seq(children) => children.iter().all(|c| is_nullable(c, names, nullable)),
        Pattern::Choice(children) => children.iter().any(|c| is_nullable(c, names, nullable)),
        Pattern::Repeat1(p)
        | Pattern::Field(_, p)
        | Pattern::Prec { pattern: p, .. }
        | Pattern::PrecDynamic(_, p)
        | Pattern::Alias(_, p) => is_nullable(p, names, nullable),
    }
}

/// Rules which can derive the empty string.
fn nullable_rules(grammar: &Grammar, names: &RuleNames) -> EntitySet<RuleHandle> {
    let mut nullable = EntitySet::new();
    loop {
        let mut changed = false;
        for (handle, rule) in grammar.rules.iter() {
            if !nullable.contains(handle) && is_nullable(&rule.pattern, names, &nullable) {
                nullable.insert(handle);
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}

struct Units<'a> {
    names: &'a RuleNames<'a>,
    nullable: EntitySet<RuleHandle>,
}

impl Units<'_> {
    /// Rules `pattern` can derive as a lone symbol, siblings which derive the
    /// empty string are looked through.
    fn collect(&self, pattern: &Pattern, rules: &mut BTreeSet<RuleHandle>) {
        match pattern {
            Pattern::Blank | Pattern::Token(_) => {}
            Pattern::Symbol(name) => {
                if let Some(&handle) = self.names.get(name.as_str()) {
                    rules.insert(handle);
                }
            }
            Pattern::Seq(children) => {
                let nullable: Vec<bool> = children
                    .iter()
                    .map(|c| is_nullable(c, self.names, &self.nullable))
                    .collect();
                let required = nullable.iter().filter(|&&n| !n).count();
                for (child, &child_nullable) in children.iter().zip(&nullable) {
                    // every other child has to be able to vanish
                    let others_required = required - usize::from(!child_nullable);
                    if others_required == 0 {
                        self.collect(child, rules);
                    }
                }
            }
            Pattern::Choice(children) => {
                for child in children {
                    self.collect(child, rules);
                }
            }
            Pattern::Repeat(p)
            | Pattern::Repeat1(p)
            | Pattern::Optional(p)
            | Pattern::Field(_, p)
            | Pattern::Prec { pattern: p, .. }
            | Pattern::PrecDynamic(_, p)
            | Pattern::Alias(_, p) => self.collect(p, rules),
        }
    }
}

fn unit_graph(grammar: &Grammar, units: &Units) -> SecondaryMap<RuleHandle, BTreeSet<RuleHandle>> {
    let mut graph = SecondaryMap::new();
    for (handle, rule) in grammar.rules.iter() {
        let mut set = BTreeSet::new();
        units.collect(&rule.pattern, &mut set);
        graph[handle] = set;
    }
    graph
}

fn check_unit_cycles(grammar: &Grammar, names: &RuleNames, err: &ErrorAccumulator) {
    let units = Units {
        names,
        nullable: nullable_rules(grammar, names),
    };
    let graph = unit_graph(grammar, &units);
    let mut visited = EntitySet::new();
    let mut stack = Vec::new();
    for (handle, _) in grammar.rules.iter() {
        find_unit_cycles(handle, &graph, &mut visited, &mut stack, grammar, err);
    }
}

fn find_unit_cycles(
    handle: RuleHandle,

    graph: &SecondaryMap<RuleHandle, BTreeSet<RuleHandle>>,
    visited: &mut EntitySet<RuleHandle>,
    stack: &mut Vec<RuleHandle>,

    grammar: &Grammar,
    err: &ErrorAccumulator,
) {
    if let Some(index) = stack.iter().position(|&rule| rule == handle) {
        //      /index
        // A -> B -> C -> D
        //      ↑________|
        let path: Vec<&str> = stack[index..]
            .iter()
            .chain(std::iter::once(&handle))
            .map(|rule| rule.name(grammar))
            .collect();
        err.error(
            handle.name(grammar),
            format!("unit cycle, it derives itself through {}", path.join(" -> ")),
        );
        return;
    }

    if visited.contains(handle) {
        return;
    }
    visited.insert(handle);

    stack.push(handle);
    for &next in &graph[handle] {
        find_unit_cycles(next, graph, visited, stack, grammar, err);
    }
    stack.pop();
}

/// Rules which can derive a string containing themselves.
fn recursive_rules(grammar: &Grammar, names: &RuleNames) -> EntitySet<RuleHandle> {
    let references: SecondaryMap<RuleHandle, BTreeSet<RuleHandle>> = {
        let mut map = SecondaryMap::new();
        for (handle, rule) in grammar.rules.iter() {
            map[handle] = referenced_rules(&rule.pattern, names);
        }
        map
    };

    let mut recursive = EntitySet::new();
    for (root, _) in grammar.rules.iter() {
        let mut seen = EntitySet::new();
        let mut stack: Vec<RuleHandle> = references[root].iter().copied().collect();
        while let Some(handle) = stack.pop() {
            if handle == root {
                recursive.insert(root);
                break;
            }
            if seen.contains(handle) {
                continue;
            }
            seen.insert(handle);
            stack.extend(references[handle].iter().copied());
        }
    }
    recursive
}

/// A choice whose alternatives can both derive the same recursive rule on their
/// own makes every occurrence of that rule ambiguous, and nested occurrences
/// multiply the ambiguity.
fn check_ambiguity_cycles(grammar: &Grammar, names: &RuleNames, err: &ErrorAccumulator) {
    let units = Units {
        names,
        nullable: nullable_rules(grammar, names),
    };
    let graph = unit_graph(grammar, &units);
    let recursive = recursive_rules(grammar, names);

    let closure = |pattern: &Pattern| {
        let mut rules = BTreeSet::new();
        units.collect(pattern, &mut rules);
        let mut stack: Vec<RuleHandle> = rules.iter().copied().collect();
        while let Some(handle) = stack.pop() {
            for &next in &graph[handle] {
                if rules.insert(next) {
                    stack.push(next);
                }
            }
        }
        rules
    };

    for (_, rule) in grammar.rules.iter() {
        let mut reported = BTreeSet::new();
        rule.pattern.visit(&mut |pattern| {
            let Pattern::Choice(alternatives) = pattern else {
                return;
            };
            let closures: Vec<_> = alternatives.iter().map(|alt| closure(alt)).collect();
            for i in 0..alternatives.len() {
                for j in i + 1..alternatives.len() {
                    let shared = closures[i]
                        .intersection(&closures[j])
                        .find(|&&handle| recursive.contains(handle));
                    let Some(&shared) = shared else {
                        continue;
                    };
                    if !reported.insert(shared) {
                        continue;
                    }
                    err.error(
                        &rule.name,
                        format!(
                            "ambiguity cycle, recursive rule `{}` is reachable through both `{}` and `{}`",
                            shared.name(grammar),
                            alternatives[i],
                            alternatives[j]
                        ),
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::*;

    fn errors(grammar: &Grammar) -> Vec<String> {
        let err = ErrorAccumulator::new();
        check_grammar(grammar, &err);
        let diagnostics = err.get();
        diagnostics.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn undefined_symbol_names_the_rule() {
        let grammar = Grammar::new("t").rule("program", seq([sym("missing"), tok(";")]));
        assert_eq!(errors(&grammar), ["rule `program`: undefined symbol `missing`"]);
    }

    #[test]
    fn unproductive_and_unreachable() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("program", choice([sym("x"), sym("loop")]))
            .rule("loop", seq([tok("("), sym("loop"), tok(")")]))
            .rule("orphan", sym("x"));
        let errors = errors(&grammar);
        assert!(errors.iter().any(|e| e.starts_with("rule `loop`: is unproductive")));
        assert!(errors.iter().any(|e| e.starts_with("rule `orphan`: is unreachable")));
    }

    #[test]
    fn unit_cycle_is_reported_once() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("program", sym("a"))
            .rule("a", choice([sym("b"), sym("x")]))
            .rule("b", choice([sym("a"), tok("y")]));
        let errors = errors(&grammar);
        let cycles: Vec<_> = errors.iter().filter(|e| e.contains("unit cycle")).collect();
        assert_eq!(cycles.len(), 1, "{errors:?}");
    }

    #[test]
    fn recursive_rule_behind_two_alternatives() {
        let grammar = Grammar::new("t")
            .terminals(["identifier"])
            .rule("program", repeat(sym("call")))
            .rule("call", seq([sym("identifier"), tok("("), sep(choice([sym("_expression"), sym("pack")]), ","), tok(")")]))
            .rule("_expression", choice([sym("identifier"), sym("call"), sym("pack")]))
            .rule("pack", seq([sym("_expression"), tok("...")]));
        let errors = errors(&grammar);
        assert!(
            errors.iter().any(|e| e.starts_with("rule `call`: ambiguity cycle") && e.contains("`pack`")),
            "{errors:?}"
        );
    }

    #[test]
    fn restricted_placement_passes() {
        let grammar = Grammar::new("t")
            .terminals(["identifier"])
            .rule("program", repeat(sym("call")))
            .rule("call", seq([sym("identifier"), tok("("), sep(choice([sym("_expression"), sym("pack")]), ","), tok(")")]))
            .rule("_expression", choice([sym("identifier"), sym("call")]))
            .rule("pack", seq([sym("_expression"), tok("...")]));
        assert_eq!(errors(&grammar), Vec::<String>::new());
    }

    #[test]
    fn units_behind_optional_siblings() {
        let grammar = Grammar::new("t")
            .terminals(["identifier"])
            .rule("program", repeat(sym("call")))
            .rule("call", seq([sym("identifier"), tok("("), sep(choice([sym("_expression"), sym("pack")]), ","), tok(")")]))
            .rule("_expression", choice([sym("identifier"), sym("call"), sym("spread")]))
            .rule("spread", seq([repeat(sym("_modifier")), optional(tok("&")), sym("pack")]))
            .rule("_modifier", tok("const"))
            .rule("pack", seq([sym("_expression"), tok("...")]));
        let errors = errors(&grammar);
        assert!(
            errors.iter().any(|e| e.starts_with("rule `call`: ambiguity cycle") && e.contains("`pack`")),
            "{errors:?}"
        );
    }

    #[test]
    fn unit_cycle_through_a_nullable_rule() {
        let grammar = Grammar::new("t")
            .terminals(["x"])
            .rule("program", sym("a"))
            .rule("a", choice([seq([sym("empty"), sym("b")]), sym("x")]))
            .rule("b", choice([sym("a"), tok("y")]))
            .rule("empty", optional(tok("z")));
        let errors = errors(&grammar);
        assert!(errors.iter().any(|e| e.contains("unit cycle")), "{errors:?}");
    }

    #[test]
    fn bad_alias_and_precedence() {
        let grammar = Grammar::new("t")
            .precedences(["add"])
            .rule("program", alias(seq([tok("a"), tok("b")]), "pair"))
            .rule("other", prec("mul", tok("c")));
        let errors = errors(&grammar);
        assert!(errors.iter().any(|e| e.contains("alias `pair` must wrap a single symbol")));
        assert!(errors.iter().any(|e| e.contains("unknown precedence `mul`")));
    }
}
