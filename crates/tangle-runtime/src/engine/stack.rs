use std::{cmp::Reverse, rc::Rc, sync::Arc};

use crate::{tree::Subtree, ProductionId, StateId, Symbol};

/// One entry of a persistent parse stack.
///
/// Versions share their common prefix, forking a version only clones the head
/// pointer.
pub(super) struct StackNode {
    pub state: StateId,
    /// `None` only for the bottom entry.
    pub subtree: Option<Subtree>,
    pub prev: Option<Rc<StackNode>>,
    /// Byte offset right after this entry.
    pub position: u32,
}

impl StackNode {
    pub fn bottom(state: StateId) -> Rc<StackNode> {
        Rc::new(StackNode {
            state,
            subtree: None,
            prev: None,
            position: 0,
        })
    }

    pub fn push(self: &Rc<Self>, state: StateId, subtree: Subtree) -> Rc<StackNode> {
        Rc::new(StackNode {
            state,
            position: self.position + subtree.size,
            subtree: Some(subtree),
            prev: Some(self.clone()),
        })
    }
}

impl Drop for StackNode {
    // long stacks of recovered garbage would overflow a recursive drop
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Rc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct Token {
    pub symbol: Symbol,
    pub size: u32,
    pub lookahead: u32,
    /// Scanner state after the token, only for external tokens.
    pub external_state: Option<Arc<[u8]>>,
}

#[derive(Clone)]
pub(super) struct Version {
    pub head: Rc<StackNode>,
    pub lookahead: Option<Token>,
    pub scanner_state: Arc<[u8]>,
    /// Position of the last error recovery, a second failure there skips the token.
    pub last_recovery: Option<u32>,
    /// Creation order, lower ids win ties.
    pub id: u32,
}

impl Version {
    pub fn position(&self) -> u32 {
        self.head.position
    }

    pub fn state(&self) -> StateId {
        self.head.state
    }

    pub fn error_cost(&self) -> u32 {
        let mut cost = 0;
        let mut node = Some(&self.head);
        while let Some(current) = node {
            if let Some(subtree) = &current.subtree {
                cost += subtree.error_cost;
            }
            node = current.prev.as_ref();
        }
        cost
    }
}

pub(super) struct Popped {
    pub base: Rc<StackNode>,
    /// Popped entries in source order, interior extras included.
    pub children: Vec<Subtree>,
    /// Extras above the last child, in source order.
    pub trailing_extras: Vec<Subtree>,
}

/// Pops `count` non-extra entries.
pub(super) fn pop(head: &Rc<StackNode>, count: usize) -> Option<Popped> {
    let mut node = head.clone();

    let mut trailing_extras = Vec::new();
    loop {
        let subtree = match &node.subtree {
            Some(subtree) if subtree.extra => subtree.clone(),
            _ => break,
        };
        trailing_extras.push(subtree);
        node = node.prev.clone()?;
    }
    trailing_extras.reverse();

    let mut children = Vec::new();
    let mut remaining = count;
    while remaining > 0 {
        let subtree = node.subtree.clone()?;
        if !subtree.extra {
            remaining -= 1;
        }
        children.push(subtree);
        node = node.prev.clone()?;
    }
    children.reverse();

    Some(Popped {
        base: node,
        children,
        trailing_extras,
    })
}

/// Every subtree on the stack in source order.
pub(super) fn collect(head: &Rc<StackNode>) -> Vec<Subtree> {
    let mut subtrees = Vec::new();
    let mut node = Some(head);
    while let Some(current) = node {
        if let Some(subtree) = &current.subtree {
            subtrees.push(subtree.clone());
        }
        node = current.prev.as_ref();
    }
    subtrees.reverse();
    subtrees
}

/// Subtrees in which two stacks differ, top first.
///
/// Returns `None` unless the stacks go through the same states at the same
/// positions down to a shared entry, such stacks behave identically from now on.
pub(super) fn divergence<'s>(
    a: &'s StackNode,
    b: &'s StackNode,
) -> Option<(Vec<&'s Subtree>, Vec<&'s Subtree>)> {
    let (mut x, mut y) = (a, b);
    let (mut left, mut right) = (Vec::new(), Vec::new());
    loop {
        if std::ptr::eq(x, y) {
            return Some((left, right));
        }
        if x.state != y.state || x.position != y.position {
            return None;
        }
        match (&x.prev, &y.prev, &x.subtree, &y.subtree) {
            (Some(px), Some(py), Some(sx), Some(sy)) => {
                left.push(sx);
                right.push(sy);
                x = px;
                y = py;
            }
            _ => return None,
        }
    }
}

pub(super) type Rank = (u32, Reverse<i32>, Option<ProductionId>, u32);

/// Ordering used to pick between merged alternatives, smaller is better.
pub(super) fn rank(subtrees: &[&Subtree], id: u32) -> Rank {
    let error_cost = subtrees.iter().map(|s| s.error_cost).sum();
    let dynamic_precedence = subtrees.iter().map(|s| s.dynamic_precedence).sum();
    let production = subtrees.first().and_then(|s| s.production);
    (error_cost, Reverse(dynamic_precedence), production, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SubtreeData;

    fn leaf(size: u32, extra: bool) -> Subtree {
        let data = SubtreeData::leaf(Symbol::from_u32(2), size, 0, StateId::from_u32(0), None);
        Arc::new(data.with_extra(extra))
    }

    fn state(n: u32) -> StateId {
        StateId::from_u32(n)
    }

    #[test]
    fn pop_keeps_interior_and_returns_trailing_extras() {
        let head = StackNode::bottom(state(0))
            .push(state(1), leaf(1, false))
            .push(state(1), leaf(1, true))
            .push(state(2), leaf(2, false))
            .push(state(2), leaf(3, true));

        let popped = pop(&head, 2).unwrap();
        assert_eq!(popped.children.len(), 3);
        assert_eq!(popped.trailing_extras.len(), 1);
        assert_eq!(popped.trailing_extras[0].size, 3);
        assert_eq!(popped.base.state, state(0));
        assert_eq!(head.position, 7);
    }

    #[test]
    fn pop_past_bottom_fails() {
        let head = StackNode::bottom(state(0)).push(state(1), leaf(1, false));
        assert!(pop(&head, 2).is_none());
    }

    #[test]
    fn divergence_requires_equal_states() {
        let base = StackNode::bottom(state(0)).push(state(1), leaf(1, false));
        let a = base.push(state(3), leaf(2, false));
        let b = base.push(state(3), leaf(2, false));
        let c = base.push(state(4), leaf(2, false));

        let (left, right) = divergence(&a, &b).unwrap();
        assert_eq!((left.len(), right.len()), (1, 1));
        assert!(divergence(&a, &c).is_none());
    }

    #[test]
    fn rank_prefers_cheaper_then_higher_precedence() {
        let mut cheap = SubtreeData::leaf(Symbol::from_u32(2), 1, 0, state(0), None);
        cheap.dynamic_precedence = -1;
        let mut preferred = cheap.clone();
        preferred.dynamic_precedence = 1;
        let costly = SubtreeData::leaf(Symbol::ERROR, 1, 0, state(0), None);

        let (cheap, preferred, costly) = (Arc::new(cheap), Arc::new(preferred), Arc::new(costly));
        assert!(rank(&[&preferred], 1) < rank(&[&cheap], 0));
        assert!(rank(&[&cheap], 0) < rank(&[&costly], 0));
    }
}
