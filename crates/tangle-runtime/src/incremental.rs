//! Reparsing after an edit.
//!
//! Subtrees of the old tree which the edit could not have influenced are offered
//! to the engine at their shifted positions, it takes one whenever its parse
//! state and first token agree with what a fresh parse would see.

use std::{collections::HashMap, ops::Range, sync::Arc};

use log::{debug, warn};

use crate::{
    engine::Parser,
    scanner::ScannerStateError,
    tree::{Subtree, Tree},
};

/// A single text replacement, in byte offsets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Edit {
    pub start: usize,
    /// End of the replaced range in the old text.
    pub old_end: usize,
    /// End of the inserted text in the new text.
    pub new_end: usize,
}

impl Edit {
    pub fn new(start: usize, old_end: usize, new_end: usize) -> Edit {
        debug_assert!(start <= old_end && start <= new_end);
        Edit {
            start,
            old_end,
            new_end,
        }
    }

    /// Replacing `old_len` bytes at `start` with `text`.
    pub fn replace(start: usize, old_len: usize, text: &[u8]) -> Edit {
        Edit::new(start, start + old_len, start + text.len())
    }

    /// Applies the replacement to `old`, returning the edit and the new text.
    pub fn apply(old: &[u8], start: usize, old_len: usize, text: &[u8]) -> (Edit, Vec<u8>) {
        let start = start.min(old.len());
        let old_len = old_len.min(old.len() - start);
        let mut new = Vec::with_capacity(old.len() - old_len + text.len());
        new.extend_from_slice(&old[..start]);
        new.extend_from_slice(text);
        new.extend_from_slice(&old[start + old_len..]);
        (Edit::replace(start, old_len, text), new)
    }

    /// Where a position of the new text was in the old one, `None` inside the
    /// inserted text.
    pub fn old_position(&self, new_position: usize) -> Option<usize> {
        if new_position < self.start {
            Some(new_position)
        } else if new_position >= self.new_end {
            Some(new_position - self.new_end + self.old_end)
        } else {
            None
        }
    }

    /// Whether an old subtree starting at `start` that depends on the bytes up to
    /// `dependency_end` overlaps the replaced range.
    pub fn affects(&self, start: usize, dependency_end: usize) -> bool {
        start < self.old_end && dependency_end > self.start
    }
}

pub(crate) struct Candidate {
    pub node: Subtree,
    /// Scanner state left by the last external token before the node.
    pub scanner_state: Arc<[u8]>,
}

/// Unaffected subtrees of the old tree keyed by their old start, largest first.
pub(crate) struct ReuseIndex {
    edit: Edit,
    /// Old ranges of ERROR nodes and tokens.
    errors: Vec<Range<u32>>,
    candidates: HashMap<u32, Vec<Candidate>>,
}

impl ReuseIndex {
    pub fn new(old: &Tree, edit: Edit) -> ReuseIndex {
        let mut index = ReuseIndex {
            edit,
            errors: error_ranges(old.root_subtree()),
            candidates: HashMap::new(),
        };
        let mut scanner_state: Arc<[u8]> = Arc::from(&[][..]);

        // preorder, parents are recorded before their first child
        let root = old.root_subtree();
        let mut stack: Vec<(u32, &Subtree, bool)> = vec![(0, root, true)];
        while let Some((start, node, is_root)) = stack.pop() {
            if !is_root && index.is_reusable(start, node) {
                index.candidates.entry(start).or_default().push(Candidate {
                    node: node.clone(),
                    scanner_state: scanner_state.clone(),
                });
            }
            if node.is_leaf() {
                if let Some(state) = &node.external_state {
                    scanner_state = state.clone();
                }
                continue;
            }
            let mut offset = start + node.size;
            for child in node.children.iter().rev() {
                offset -= child.node.size;
                stack.push((offset, &child.node, false));
            }
        }

        index
    }

    /// Subtrees touching a recovered region are left out, recovery decisions
    /// depend on the whole stack and not only on the bytes a node covers.
    fn is_reusable(&self, start: u32, node: &Subtree) -> bool {
        let dependency_end = start + node.size + node.lookahead_bytes;
        node.size > 0
            && !node.extra
            && !node.fragile
            && !node.has_error
            && !self.edit.affects(start as usize, dependency_end as usize)
            && !self
                .errors
                .iter()
                .any(|error| start <= error.end && dependency_end >= error.start)
    }

    pub fn candidates(&self, new_position: u32) -> impl Iterator<Item = &Candidate> {
        self.edit
            .old_position(new_position as usize)
            .and_then(|old| self.candidates.get(&(old as u32)))
            .into_iter()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }
}

fn error_ranges(root: &Subtree) -> Vec<Range<u32>> {
    let mut ranges = Vec::new();
    let mut stack = vec![(0, root)];
    while let Some((start, node)) = stack.pop() {
        if node.is_error() {
            ranges.push(start..start + node.size);
            continue;
        }
        if !node.has_error {
            continue;
        }
        let mut offset = start;
        for child in &node.children {
            stack.push((offset, &child.node));
            offset += child.node.size;
        }
    }
    ranges
}

impl Parser {
    /// Parses `src`, the result of applying `edit` to the text `old` was parsed
    /// from, reusing the parts of `old` the edit did not touch.
    pub fn reparse(&mut self, old: &Tree, edit: &Edit, src: &[u8]) -> Tree {
        let invalidated = old
            .root_node()
            .descendant_for_byte_range(edit.start, edit.old_end);
        debug!(
            "reparse after {edit:?}, deepest affected node {} {:?}",
            invalidated.kind_name(),
            invalidated.byte_range()
        );

        if !Arc::ptr_eq(old.language().table_arc(), self.language.table_arc()) {
            warn!("old tree belongs to a different language, parsing from scratch");
            return self.parse(src);
        }
        if let Err(err) = self.check_scanner_states(old) {
            warn!("{err}, parsing from scratch");
            return self.parse(src);
        }

        let index = ReuseIndex::new(old, *edit);
        debug!("{} reusable subtrees", index.len());
        let root = self.run(src, Some(index));
        Tree::new(root, self.language.clone())
    }

    /// Every scanner state stored in the old tree has to be restorable, otherwise
    /// nothing of it can be trusted.
    fn check_scanner_states(&mut self, old: &Tree) -> Result<(), ScannerStateError> {
        let Some(scanner) = self.scanner.as_deref_mut() else {
            return Ok(());
        };
        let mut stack = vec![old.root_subtree()];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                if let Some(state) = &node.external_state {
                    scanner.deserialize(state)?;
                }
            }
            stack.extend(node.children.iter().map(|child| &child.node));
        }
        scanner.deserialize(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_map_around_the_edit() {
        // "abcdef" -> "abXYZef"
        let edit = Edit::replace(2, 2, b"XYZ");
        assert_eq!(edit, Edit::new(2, 4, 5));
        assert_eq!(edit.old_position(1), Some(1));
        assert_eq!(edit.old_position(3), None);
        assert_eq!(edit.old_position(5), Some(4));
        assert_eq!(edit.old_position(6), Some(5));
    }

    #[test]
    fn deletion_maps_its_start_to_old_end() {
        let edit = Edit::replace(3, 4, b"");
        assert_eq!(edit.old_position(3), Some(7));
        assert_eq!(edit.old_position(2), Some(2));
    }

    #[test]
    fn dependency_reaching_into_the_edit_is_affected() {
        let edit = Edit::replace(10, 0, b"x");
        assert!(!edit.affects(0, 10));
        assert!(edit.affects(0, 11));
        assert!(!edit.affects(10, 20));
    }

    #[test]
    fn apply_splices_text() {
        let (edit, new) = Edit::apply(b"int x;", 4, 1, b"yy");
        assert_eq!(new, b"int yy;");
        assert_eq!(edit, Edit::new(4, 5, 6));

        let (edit, new) = Edit::apply(b"ab", 9, 3, b"c");
        assert_eq!(new, b"abc");
        assert_eq!(edit, Edit::new(2, 2, 3));
    }
}
