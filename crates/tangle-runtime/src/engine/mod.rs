//! Generalized LR driver.
//!
//! Stack versions advance in rounds. A round takes every version sitting at the
//! lowest input position, runs its reductions until it is ready to shift (forking
//! on conflicting actions), merges versions which have become interchangeable and
//! finally shifts the lookahead of each survivor.

mod recover;
mod stack;

use std::{cmp::Ordering, collections::VecDeque, sync::Arc};

use log::{debug, trace, warn};

use crate::{
    incremental::ReuseIndex,
    lexer::Lexer,
    scanner::ExternalScanner,
    table::{Action, LexMode, ParseTable, Production, SymbolKind},
    tree::{extend_dependency, Child, Subtree, SubtreeData, Tree},
    Language, LexFn, LexModeId, ProductionId, StateId, Symbol,
};

use stack::{StackNode, Token, Version};

pub const DEFAULT_MAX_VERSIONS: usize = 64;

pub struct Parser {
    pub(crate) language: Language,
    pub(crate) scanner: Option<Box<dyn ExternalScanner>>,
    max_versions: usize,
}

impl Parser {
    pub fn new(language: &Language) -> Parser {
        Parser {
            language: language.clone(),
            scanner: language.create_scanner(),
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Limits how many stack versions may be alive at once, the ones with the
    /// highest error cost are dropped first.
    pub fn set_max_versions(&mut self, max: usize) {
        self.max_versions = max.max(1);
    }

    pub fn parse(&mut self, src: &[u8]) -> Tree {
        let root = self.run(src, None);
        Tree::new(root, self.language.clone())
    }

    pub(crate) fn run(&mut self, src: &[u8], reuse: Option<ReuseIndex>) -> Subtree {
        let run = ParseRun {
            table: self.language.table(),
            lexer: self.language.lexer(),
            scanner: self.scanner.as_deref_mut(),
            src,
            max_versions: self.max_versions,
            versions: Vec::new(),
            failed: Vec::new(),
            finished: Vec::new(),
            token_cache: Vec::new(),
            reuse,
            next_id: 0,
            stats: Stats::default(),
        };
        run.run()
    }
}

#[derive(Default, Debug)]
struct Stats {
    shifts: u32,
    reductions: u32,
    splits: u32,
    merges: u32,
    recoveries: u32,
    reused_nodes: u32,
    reused_bytes: u32,
}

struct Finished {
    root: Subtree,
    id: u32,
}

struct CachedToken {
    position: u32,
    mode: Option<LexModeId>,
    scanner_state: Arc<[u8]>,
    token: Token,
}

/// A version whose lookahead can be shifted, `target` is `None` for extras.
struct Ready {
    version: Version,
    target: Option<StateId>,
}

type Work = VecDeque<(Version, Option<Action>)>;

struct ParseRun<'a> {
    table: &'a ParseTable,
    lexer: LexFn,
    scanner: Option<&'a mut (dyn ExternalScanner + 'static)>,
    src: &'a [u8],
    max_versions: usize,
    versions: Vec<Version>,
    /// Versions that hit a syntax error at the furthest position seen so far.
    failed: Vec<Version>,
    finished: Vec<Finished>,
    token_cache: Vec<CachedToken>,
    reuse: Option<ReuseIndex>,
    next_id: u32,
    stats: Stats,
}

impl<'a> ParseRun<'a> {
    fn run(mut self) -> Subtree {
        let initial = Version {
            head: StackNode::bottom(self.table.start_state),
            lookahead: None,
            scanner_state: Arc::from(&[][..]),
            last_recovery: None,
            id: self.fresh_id(),
        };
        self.versions.push(initial);

        loop {
            if !self.versions.is_empty() {
                self.step();
                continue;
            }
            if !self.finished.is_empty() {
                break;
            }
            match self.take_failed() {
                Some(version) => self.recover(version),
                None => break,
            }
        }

        debug!("parsed {} bytes: {:?}", self.src.len(), self.stats);
        self.select_finished()
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn step(&mut self) {
        let Some(position) = self.versions.iter().map(Version::position).min() else {
            return;
        };
        self.token_cache.retain(|cached| cached.position >= position);

        let mut work = Work::new();
        let mut rest = Vec::new();
        for version in std::mem::take(&mut self.versions) {
            match version.position() == position {
                true => work.push_back((version, None)),
                false => rest.push(version),
            }
        }
        self.versions = rest;

        let mut ready = Vec::new();
        while let Some((version, pending)) = work.pop_front() {
            self.advance(version, pending, &mut work, &mut ready);
        }

        self.merge(&mut ready);
        self.prune(&mut ready);

        let single = ready.len() == 1 && self.versions.is_empty();
        for Ready { version, target } in ready {
            self.shift(version, target, single);
        }
    }

    /// Runs the reductions of one version until it can shift, accepts or fails.
    fn advance(
        &mut self,
        mut version: Version,
        mut pending: Option<Action>,
        work: &mut Work,
        ready: &mut Vec<Ready>,
    ) {
        let table = self.table;
        loop {
            let token = self.lookahead(&mut version);
            let action = match pending.take() {
                Some(action) => action,
                None => match table.actions(version.state(), token.symbol) {
                    [] => {
                        if table.is_extra(token.symbol) {
                            ready.push(Ready {
                                version,
                                target: None,
                            });
                        } else {
                            self.fail(version);
                        }
                        return;
                    }
                    [action] => *action,
                    [first, rest @ ..] => {
                        if work.len() + ready.len() < self.max_versions * 4 {
                            for &action in rest {
                                let fork = Version {
                                    id: self.fresh_id(),
                                    ..version.clone()
                                };
                                work.push_back((fork, Some(action)));
                            }
                            self.stats.splits += 1;
                            trace!(
                                "split {} ways in state {:?} on {}",
                                rest.len() + 1,
                                version.state(),
                                table.symbol_name(token.symbol)
                            );
                        } else {
                            warn!("too many pending stack versions, not forking");
                        }
                        *first
                    }
                },
            };

            match action {
                Action::Shift(state) => {
                    ready.push(Ready {
                        version,
                        target: Some(state),
                    });
                    return;
                }
                Action::Accept => {
                    self.accept(version);
                    return;
                }
                Action::Reduce(production) => {
                    let alive = self.versions.len() + work.len() + ready.len() + 1;
                    if !self.reduce(&mut version, production, &token, alive > 1) {
                        self.fail(version);
                        return;
                    }
                }
            }
        }
    }

    fn lookahead(&mut self, version: &mut Version) -> Token {
        if let Some(token) = &version.lookahead {
            return token.clone();
        }
        let token = self.lex(version.state(), version.position(), &version.scanner_state);
        version.lookahead = Some(token.clone());
        token
    }

    fn lex(&mut self, state: StateId, position: u32, scanner_state: &Arc<[u8]>) -> Token {
        let table = self.table;
        let mode = table.states[state].lex_mode;

        let cached = self.token_cache.iter().find(|cached| {
            cached.position == position
                && cached.mode == mode
                && cached.scanner_state[..] == scanner_state[..]
        });
        if let Some(cached) = cached {
            return cached.token.clone();
        }

        let token = self.lex_uncached(mode, position, scanner_state);
        trace!(
            "lexed {} at {position}, {} bytes",
            table.symbol_name(token.symbol),
            token.size
        );
        self.token_cache.push(CachedToken {
            position,
            mode,
            scanner_state: scanner_state.clone(),
            token: token.clone(),
        });
        token
    }

    fn lex_uncached(&mut self, mode: Option<LexModeId>, position: u32, scanner_state: &[u8]) -> Token {
        let table = self.table;
        let src = self.src;
        let mode = mode.map(|mode| &table.lex_modes[mode]);
        let mut lexer = Lexer::new(src, position);

        if let (Some(mode), Some(scanner)) = (mode, self.scanner.as_deref_mut()) {
            if mode.has_externals() {
                if let Some(token) = scan_external(scanner, &mut lexer, mode, table, scanner_state) {
                    return token;
                }
                lexer.reset();
            }
        }

        if position as usize >= src.len() {
            let extent = lexer.finish_token();
            return Token {
                symbol: Symbol::END,
                size: 0,
                lookahead: extent.lookahead.max(1),
                external_state: None,
            };
        }

        let valid = |name: &str| match table.terminal(name) {
            Some(symbol) => table.is_extra(symbol) || mode.map_or(false, |mode| mode.accepts(symbol)),
            None => false,
        };
        let name = (self.lexer)(&mut lexer, &valid);
        let extent = lexer.finish_token();

        if let Some(symbol) = name.and_then(|name| table.terminal(name)) {
            if extent.size > 0 && table.symbols[symbol].kind == SymbolKind::Terminal {
                return Token {
                    symbol,
                    size: extent.size,
                    lookahead: extent.lookahead,
                    external_state: None,
                };
            }
        }

        // nothing matched, the offending character becomes an error token
        let size = scalar_len(&src[position as usize..]);
        let dependency_end = extent.size + extent.lookahead;
        Token {
            symbol: Symbol::ERROR,
            size,
            lookahead: dependency_end.saturating_sub(size),
            external_state: None,
        }
    }

    fn reduce(
        &mut self,
        version: &mut Version,
        production: ProductionId,
        token: &Token,
        fragile: bool,
    ) -> bool {
        let table = self.table;
        let rule = &table.productions[production];
        let Some(popped) = stack::pop(&version.head, rule.len()) else {
            warn!("stack underflow reducing {}", table.symbol_name(rule.lhs));
            return false;
        };
        let base_state = popped.base.state;
        let Some(next) = table.goto(base_state, rule.lhs) else {
            warn!(
                "no goto on {} in state {base_state:?}",
                table.symbol_name(rule.lhs)
            );
            return false;
        };

        let (children, inherited) = self.build_children(rule, popped.children);
        let mut node = SubtreeData::node(
            rule.lhs,
            children,
            Some(production),
            rule.dynamic_precedence + inherited.dynamic_precedence,
            base_state,
        )
        .with_fragile(fragile || inherited.fragile);

        let trailing: u32 = popped.trailing_extras.iter().map(|extra| extra.size).sum();
        extend_dependency(&mut node, trailing + token.size + token.lookahead);

        trace!(
            "reduce {} ({} children), goto {next:?}",
            table.symbol_name(rule.lhs),
            rule.len()
        );

        let mut head = popped.base.push(next, Arc::new(node));
        for extra in popped.trailing_extras {
            head = head.push(next, extra);
        }
        version.head = head;
        self.stats.reductions += 1;
        true
    }

    /// Attaches fields and aliases, splicing hidden nonterminals into the parent.
    fn build_children(&self, rule: &Production, popped: Vec<Subtree>) -> (Vec<Child>, Inherited) {
        let table = self.table;
        let mut inherited = Inherited::default();
        let mut children = Vec::with_capacity(popped.len());
        let mut steps = rule.steps.iter();

        for subtree in popped {
            if subtree.extra {
                children.push(Child::new(None, subtree));
                continue;
            }
            let Some(step) = steps.next() else {
                children.push(Child::new(None, subtree));
                continue;
            };
            let subtree = match step.alias {
                Some(alias) => Arc::new(subtree.renamed(alias)),
                None => subtree,
            };

            let info = &table.symbols[subtree.symbol];
            if info.kind != SymbolKind::Nonterminal || info.visible {
                children.push(Child::new(step.field, subtree));
                continue;
            }

            let mut nested = 0;
            for child in &subtree.children {
                nested += child.node.dynamic_precedence;
                let field = match child.node.extra {
                    true => child.field,
                    false => child.field.or(step.field),
                };
                children.push(Child::new(field, child.node.clone()));
            }
            inherited.dynamic_precedence += subtree.dynamic_precedence - nested;
            inherited.fragile |= subtree.fragile;
        }

        (children, inherited)
    }

    fn accept(&mut self, version: Version) {
        let subtrees = stack::collect(&version.head);
        let root = match subtrees.iter().position(|subtree| !subtree.extra) {
            Some(index) => {
                let main = &subtrees[index];
                let mut children: Vec<Child> = subtrees[..index]
                    .iter()
                    .map(|extra| Child::new(None, extra.clone()))
                    .collect();
                children.extend(main.children.iter().cloned());
                children.extend(
                    subtrees[index + 1..]
                        .iter()
                        .map(|extra| Child::new(None, extra.clone())),
                );
                let own_precedence = main
                    .production
                    .map_or(0, |p| self.table.productions[p].dynamic_precedence);
                SubtreeData::node(
                    main.symbol,
                    children,
                    main.production,
                    own_precedence,
                    main.parse_state,
                )
                .with_fragile(main.fragile)
            }
            None => recover::error_node(self.table, subtrees, self.table.start_state),
        };

        trace!("accept, error cost {}", root.error_cost);
        self.finished.push(Finished {
            root: Arc::new(root),
            id: version.id,
        });
    }

    fn select_finished(&self) -> Subtree {
        let best = self.finished.iter().min_by_key(|finished| {
            (
                finished.root.error_cost,
                std::cmp::Reverse(finished.root.dynamic_precedence),
                finished.id,
            )
        });
        match best {
            Some(finished) => finished.root.clone(),
            None => {
                let size = self.src.len() as u32;
                Arc::new(SubtreeData::leaf(Symbol::ERROR, size, 0, self.table.start_state, None))
            }
        }
    }

    /// Keeps one of each group of versions that would behave identically from now on.
    fn merge(&mut self, ready: &mut Vec<Ready>) {
        let mut i = 0;
        while i < ready.len() {
            let mut j = i + 1;
            while j < ready.len() {
                let Some(ordering) = compare_ready(&ready[i], &ready[j]) else {
                    j += 1;
                    continue;
                };
                if ordering == Ordering::Greater {
                    ready.swap(i, j);
                }
                let loser = ready.remove(j);
                trace!(
                    "merged version {} into {}",
                    loser.version.id,
                    ready[i].version.id
                );
                self.stats.merges += 1;
            }
            i += 1;
        }
    }

    fn prune(&mut self, ready: &mut Vec<Ready>) {
        let total = ready.len() + self.versions.len();
        if total <= self.max_versions {
            return;
        }
        let keep = self.max_versions.saturating_sub(self.versions.len()).max(1);
        ready.sort_by_cached_key(|r| (r.version.error_cost(), r.version.id));
        warn!(
            "{total} stack versions alive, dropping {}",
            ready.len().saturating_sub(keep)
        );
        ready.truncate(keep);
    }

    fn shift(&mut self, mut version: Version, target: Option<StateId>, single: bool) {
        let Some(token) = version.lookahead.take() else {
            self.versions.push(version);
            return;
        };
        let state = version.state();

        if let (Some(target), true) = (target, single) {
            if let Some((node, next)) = self.reusable_node(&version, &token, target) {
                trace!(
                    "reusing {} at {}, {} bytes",
                    self.table.symbol_name(node.symbol),
                    version.position(),
                    node.size
                );
                if let Some(external) = &node.external_state {
                    version.scanner_state = external.clone();
                }
                self.stats.reused_nodes += 1;
                self.stats.reused_bytes += node.size;
                version.head = version.head.push(next, node);
                self.versions.push(version);
                return;
            }
        }

        let leaf = SubtreeData::leaf(
            token.symbol,
            token.size,
            token.lookahead,
            state,
            token.external_state.clone(),
        )
        .with_extra(target.is_none())
        .with_fragile(!single);

        if let Some(external) = token.external_state {
            version.scanner_state = external;
        }
        version.head = version.head.push(target.unwrap_or(state), Arc::new(leaf));
        self.stats.shifts += 1;
        self.versions.push(version);
    }

    /// Finds an old subtree that can stand in for the lookahead and whatever the
    /// automaton would have built starting with it.
    fn reusable_node(
        &self,
        version: &Version,
        token: &Token,
        target: StateId,
    ) -> Option<(Subtree, StateId)> {
        let table = self.table;
        let reuse = self.reuse.as_ref()?;
        let state = version.state();

        for candidate in reuse.candidates(version.position()) {
            let node = &candidate.node;
            if node.parse_state != state || candidate.scanner_state[..] != version.scanner_state[..] {
                continue;
            }
            let first = node.first_leaf();
            if first.grammar_symbol != token.symbol || first.size != token.size {
                continue;
            }
            let next = match node.is_leaf() {
                true => Some(target),
                false => table.goto(state, node.grammar_symbol),
            };
            let Some(next) = next else {
                continue;
            };
            // an alias belongs to the old parent, the new one applies its own
            let node = match node.symbol == node.grammar_symbol {
                true => node.clone(),
                false => Arc::new(node.renamed(node.grammar_symbol)),
            };
            return Some((node, next));
        }
        None
    }
}

#[derive(Default)]
struct Inherited {
    dynamic_precedence: i32,
    fragile: bool,
}

/// `Some` when the versions can be merged, `Less` means `a` is kept.
fn compare_ready(a: &Ready, b: &Ready) -> Option<Ordering> {
    let (x, y) = (&a.version, &b.version);
    let same_lookahead = match (&x.lookahead, &y.lookahead) {
        (Some(p), Some(q)) => p.symbol == q.symbol && p.size == q.size,
        _ => false,
    };
    if a.target != b.target || !same_lookahead || x.scanner_state[..] != y.scanner_state[..] {
        return None;
    }
    let (left, right) = stack::divergence(&x.head, &y.head)?;
    Some(stack::rank(&left, x.id).cmp(&stack::rank(&right, y.id)))
}

fn scan_external(
    scanner: &mut dyn ExternalScanner,
    lexer: &mut Lexer,
    mode: &LexMode,
    table: &ParseTable,
    state: &[u8],
) -> Option<Token> {
    if let Err(err) = scanner.deserialize(state) {
        warn!("{err}, resetting the external scanner");
        if scanner.deserialize(&[]).is_err() {
            return None;
        }
    }

    let valid: Vec<bool> = (0..table.externals.len())
        .map(|index| mode.externals.contains(index))
        .collect();
    let index = scanner.scan(lexer, &valid)?;
    if !valid.get(index).copied().unwrap_or(false) {
        return None;
    }

    let symbol = table.externals[index];
    let extent = lexer.finish_token();
    // an empty extra would be pushed forever
    if extent.size == 0 && table.is_extra(symbol) {
        return None;
    }

    let mut buffer = Vec::new();
    scanner.serialize(&mut buffer);
    Some(Token {
        symbol,
        size: extent.size,
        lookahead: extent.lookahead,
        external_state: Some(buffer.into()),
    })
}

/// Length of the character starting `bytes`, stray bytes count as one.
fn scalar_len(bytes: &[u8]) -> u32 {
    let expected = match bytes.first() {
        Some(&b) if b >= 0xF0 => 4,
        Some(&b) if b >= 0xE0 => 3,
        Some(&b) if b >= 0xC0 => 2,
        _ => 1,
    };
    let end = expected.min(bytes.len());
    match std::str::from_utf8(&bytes[..end]) {
        Ok(_) if end > 0 => end as u32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::scalar_len;

    #[test]
    fn scalar_len_handles_multibyte_and_garbage() {
        assert_eq!(scalar_len(b"abc"), 1);
        assert_eq!(scalar_len("é!".as_bytes()), 2);
        assert_eq!(scalar_len("€".as_bytes()), 3);
        assert_eq!(scalar_len(&[0xE2, 0x28]), 1);
        assert_eq!(scalar_len(&[0xFF]), 1);
    }
}
