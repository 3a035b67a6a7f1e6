use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{
    compile::{self, CompileOptions, CompiledGrammar},
    error::CompileErrors,
    pattern::Pattern,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleHandle(u32);

entity_impl! { RuleHandle }

impl RuleHandle {
    pub fn name(self, cx: &Grammar) -> &str {
        &cx.rules[self].name
    }
}

pub struct Rule {
    pub name: String,
    pub pattern: Pattern,
}

impl Rule {
    /// Hidden rules are spliced into their parent node.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('_')
    }
}

/// Grammar description, the first rule is the start rule.
pub struct Grammar {
    pub name: String,
    pub rules: PrimaryMap<RuleHandle, Rule>,
    /// Named terminals produced by the core lexer.
    pub terminals: Vec<String>,
    /// Tokens produced by the external scanner, in the order it reports them.
    pub externals: Vec<String>,
    /// Terminals allowed anywhere between other tokens.
    pub extras: Vec<String>,
    pub conflicts: Vec<Vec<String>>,
    /// Named precedence levels, highest first.
    pub precedences: Vec<String>,
    pub word: Option<String>,
}

impl Grammar {
    pub fn new(name: &str) -> Grammar {
        Grammar {
            name: name.to_owned(),
            rules: PrimaryMap::new(),
            terminals: Vec::new(),
            externals: Vec::new(),
            extras: Vec::new(),
            conflicts: Vec::new(),
            precedences: Vec::new(),
            word: None,
        }
    }

    pub fn rule(mut self, name: &str, pattern: Pattern) -> Grammar {
        self.rules.push(Rule {
            name: name.to_owned(),
            pattern,
        });
        self
    }

    pub fn terminals<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Grammar {
        self.terminals.extend(names.into_iter().map(str::to_owned));
        self
    }

    pub fn externals<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Grammar {
        self.externals.extend(names.into_iter().map(str::to_owned));
        self
    }

    pub fn extras<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Grammar {
        self.extras.extend(names.into_iter().map(str::to_owned));
        self
    }

    /// Each set names rules which may legitimately compete for the same input.
    pub fn conflicts(mut self, sets: &[&[&str]]) -> Grammar {
        for set in sets {
            self.conflicts
                .push(set.iter().map(|name| name.to_string()).collect());
        }
        self
    }

    pub fn precedences<'a>(mut self, levels: impl IntoIterator<Item = &'a str>) -> Grammar {
        self.precedences.extend(levels.into_iter().map(str::to_owned));
        self
    }

    /// The identifier-like terminal keywords are carved out of.
    pub fn word(mut self, name: &str) -> Grammar {
        self.word = Some(name.to_owned());
        self
    }

    pub fn start(&self) -> Option<RuleHandle> {
        self.rules.keys().next()
    }

    pub fn find_rule(&self, name: &str) -> Option<RuleHandle> {
        self.rules
            .iter()
            .find(|(_, rule)| rule.name == name)
            .map(|(handle, _)| handle)
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.terminals.iter().any(|t| t == name) || self.externals.iter().any(|t| t == name)
    }

    /// Integer value of a named precedence level.
    pub fn precedence_value(&self, level: &str) -> Option<i32> {
        let index = self.precedences.iter().position(|l| l == level)?;
        Some((self.precedences.len() - index) as i32)
    }

    pub fn compile(&self, options: &CompileOptions) -> Result<CompiledGrammar, CompileErrors> {
        compile::compile(self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{sym, tok};

    #[test]
    fn named_levels_count_down_from_the_highest() {
        let grammar = Grammar::new("test").precedences(["call", "unary", "add"]);
        assert_eq!(grammar.precedence_value("call"), Some(3));
        assert_eq!(grammar.precedence_value("add"), Some(1));
        assert_eq!(grammar.precedence_value("mul"), None);
    }

    #[test]
    fn first_rule_is_the_start() {
        let grammar = Grammar::new("test")
            .rule("program", sym("_item"))
            .rule("_item", tok("x"));
        let start = grammar.start().unwrap();
        assert_eq!(start.name(&grammar), "program");
        assert!(grammar.rules[grammar.find_rule("_item").unwrap()].is_hidden());
    }
}
