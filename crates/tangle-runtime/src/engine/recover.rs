use std::{rc::Rc, sync::Arc};

use log::{debug, trace};

use super::{
    stack::{self, StackNode, Token, Version},
    Finished, ParseRun,
};
use crate::{
    table::{ParseTable, SymbolKind},
    tree::{Child, Subtree, SubtreeData},
    StateId, Symbol,
};

impl ParseRun<'_> {
    /// Keeps the version for recovery if it got at least as far as the other failures.
    pub(super) fn fail(&mut self, version: Version) {
        trace!("version {} failed at {}", version.id, version.position());
        let position = version.position();
        match self.failed.first().map(Version::position) {
            Some(furthest) if furthest > position => {}
            Some(furthest) if furthest < position => {
                self.failed.clear();
                self.failed.push(version);
            }
            _ => self.failed.push(version),
        }
    }

    pub(super) fn take_failed(&mut self) -> Option<Version> {
        let failed = std::mem::take(&mut self.failed);
        failed
            .into_iter()
            .min_by_key(|version| (version.error_cost(), version.id))
    }

    /// Gets a version that no longer has any valid action going again.
    ///
    /// The first failure at a position discards stack entries until a state can
    /// handle the lookahead, a repeated failure skips the lookahead instead.
    pub(super) fn recover(&mut self, mut version: Version) {
        self.stats.recoveries += 1;
        let Some(token) = version.lookahead.clone() else {
            self.versions.push(version);
            return;
        };
        let position = version.position();
        let first_attempt = version.last_recovery != Some(position);
        version.last_recovery = Some(position);

        if first_attempt {
            if let Some(head) = self.pop_to_viable_state(&version.head, token.symbol) {
                debug!(
                    "recovered at {position} by discarding {} bytes",
                    position - head.prev.as_ref().map_or(0, |prev| prev.position)
                );
                version.head = head;
                self.versions.push(version);
                return;
            }
        }

        if token.symbol == Symbol::END {
            debug!("no state accepts the end of input, wrapping the rest in an error");
            let subtrees = stack::collect(&version.head);
            let root = error_node(self.table, subtrees, self.table.start_state);
            self.finished.push(Finished {
                root: Arc::new(root),
                id: version.id,
            });
            return;
        }

        debug!(
            "skipping {} at {position}",
            self.table.symbol_name(token.symbol)
        );
        self.skip_token(version, token);
    }

    fn pop_to_viable_state(&self, head: &Rc<StackNode>, symbol: Symbol) -> Option<Rc<StackNode>> {
        let table = self.table;
        let mut node = head.clone();
        let mut popped = Vec::new();
        loop {
            popped.push(node.subtree.clone()?);
            node = node.prev.clone()?;
            if !table.actions(node.state, symbol).is_empty() {
                break;
            }
        }
        popped.reverse();

        let error = error_node(table, popped, node.state).with_extra(true);
        Some(node.push(node.state, Arc::new(error)))
    }

    fn skip_token(&mut self, mut version: Version, token: Token) {
        let head = version.head.clone();
        let leaf = SubtreeData::leaf(
            token.symbol,
            token.size,
            token.lookahead,
            head.state,
            token.external_state.clone(),
        )
        .with_fragile(true);

        // extend an error that is already on top
        let mut base = head.clone();
        let mut skipped = Vec::new();
        if let (Some(top), Some(prev)) = (&head.subtree, &head.prev) {
            if top.is_error() && top.extra {
                match top.is_leaf() {
                    true => skipped.push(top.clone()),
                    false => skipped.extend(top.children.iter().map(|child| child.node.clone())),
                }
                base = prev.clone();
            }
        }

        let error = match skipped.is_empty() && token.symbol == Symbol::ERROR {
            true => leaf.with_extra(true),
            false => {
                skipped.push(Arc::new(leaf));
                error_node(self.table, skipped, base.state).with_extra(true)
            }
        };

        if let Some(external) = token.external_state {
            version.scanner_state = external;
        }
        version.lookahead = None;
        version.head = base.push(base.state, Arc::new(error));
        self.versions.push(version);
    }
}

/// Wraps `subtrees` in an ERROR node, hidden nonterminals are replaced by their
/// children.
pub(super) fn error_node(table: &ParseTable, subtrees: Vec<Subtree>, state: StateId) -> SubtreeData {
    let mut children = Vec::with_capacity(subtrees.len());
    for subtree in subtrees {
        let info = &table.symbols[subtree.symbol];
        if info.kind == SymbolKind::Nonterminal && !info.visible {
            children.extend(
                subtree
                    .children
                    .iter()
                    .map(|child| Child::new(None, child.node.clone())),
            );
        } else {
            children.push(Child::new(None, subtree));
        }
    }
    SubtreeData::node(Symbol::ERROR, children, None, 0, state).with_fragile(true)
}
