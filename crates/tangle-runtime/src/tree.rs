use std::{
    fmt::{Debug, Write},
    ops::Range,
    sync::Arc,
};

use bstr::BStr;

use crate::{FieldId, Language, ProductionId, StateId, Symbol};

pub(crate) const ERROR_COST_PER_RECOVERY: u32 = 500;
pub(crate) const ERROR_COST_PER_SKIPPED_TREE: u32 = 100;
pub(crate) const ERROR_COST_PER_SKIPPED_BYTE: u32 = 1;

pub(crate) type Subtree = Arc<SubtreeData>;

/// A node stores its length, never its offset, so that subtrees can be shared
/// between trees of different versions of a document.
#[derive(Clone, Debug)]
pub(crate) struct SubtreeData {
    pub symbol: Symbol,
    /// Symbol the automaton saw, differs from `symbol` for aliased nodes.
    pub grammar_symbol: Symbol,
    pub size: u32,
    /// Bytes past the end that influenced this subtree, including the token that
    /// triggered its reduction.
    pub lookahead_bytes: u32,
    /// State on top of the stack when this subtree was pushed.
    pub parse_state: StateId,
    pub production: Option<ProductionId>,
    pub children: Vec<Child>,
    pub extra: bool,
    /// Built while several stack versions were alive, or during error recovery.
    pub fragile: bool,
    pub has_error: bool,
    pub error_cost: u32,
    pub dynamic_precedence: i32,
    /// Scanner state after the last external token inside this subtree.
    pub external_state: Option<Arc<[u8]>>,
}

#[derive(Clone, Debug)]
pub(crate) struct Child {
    pub field: Option<FieldId>,
    pub node: Subtree,
}

impl Child {
    pub fn new(field: Option<FieldId>, node: Subtree) -> Child {
        Child { field, node }
    }
}

impl SubtreeData {
    pub fn leaf(
        symbol: Symbol,
        size: u32,
        lookahead_bytes: u32,
        parse_state: StateId,
        external_state: Option<Arc<[u8]>>,
    ) -> SubtreeData {
        let is_error = symbol == Symbol::ERROR;
        SubtreeData {
            symbol,
            grammar_symbol: symbol,
            size,
            lookahead_bytes,
            parse_state,
            production: None,
            children: Vec::new(),
            extra: false,
            fragile: false,
            has_error: is_error,
            error_cost: match is_error {
                true => ERROR_COST_PER_RECOVERY + size * ERROR_COST_PER_SKIPPED_BYTE,
                false => 0,
            },
            dynamic_precedence: 0,
            external_state,
        }
    }

    pub fn node(
        symbol: Symbol,
        children: Vec<Child>,
        production: Option<ProductionId>,
        dynamic_precedence: i32,
        parse_state: StateId,
    ) -> SubtreeData {
        let mut size = 0;
        let mut dependency_end = 0;
        let mut has_error = symbol == Symbol::ERROR;
        let mut error_cost = 0;
        let mut dynamic_precedence = dynamic_precedence;
        let mut fragile = false;
        let mut external_state = None;

        for child in &children {
            let node = &child.node;
            dependency_end = dependency_end.max(size + node.size + node.lookahead_bytes);
            size += node.size;
            has_error |= node.has_error;
            error_cost += node.error_cost;
            dynamic_precedence += node.dynamic_precedence;
            fragile |= node.fragile;
            if node.external_state.is_some() {
                external_state = node.external_state.clone();
            }
        }

        if symbol == Symbol::ERROR {
            error_cost += ERROR_COST_PER_RECOVERY
                + ERROR_COST_PER_SKIPPED_TREE * children.len() as u32
                + ERROR_COST_PER_SKIPPED_BYTE * size;
        }

        SubtreeData {
            symbol,
            grammar_symbol: symbol,
            size,
            lookahead_bytes: dependency_end.saturating_sub(size),
            parse_state,
            production,
            children,
            extra: false,
            fragile,
            has_error,
            error_cost,
            dynamic_precedence,
            external_state,
        }
    }

    pub fn is_error(&self) -> bool {
        self.symbol == Symbol::ERROR
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.production.is_none()
    }

    pub fn first_leaf(&self) -> &SubtreeData {
        let mut node = self;
        while let Some(child) = node.children.first() {
            node = &child.node;
        }
        node
    }

    pub fn renamed(&self, symbol: Symbol) -> SubtreeData {
        SubtreeData {
            symbol,
            ..self.clone()
        }
    }

    pub fn with_extra(mut self, extra: bool) -> SubtreeData {
        self.extra = extra;
        self
    }

    pub fn with_fragile(mut self, fragile: bool) -> SubtreeData {
        self.fragile |= fragile;
        self
    }
}

/// Extends a node's dependency so that it covers the lookahead token that caused
/// its reduction, `bytes_past_end` is measured from the end of the node.
pub(crate) fn extend_dependency(node: &mut SubtreeData, bytes_past_end: u32) {
    node.lookahead_bytes = node.lookahead_bytes.max(bytes_past_end);
}

/// Result of a parse.
///
/// Trees are immutable, parsing an edited document produces a new tree which may
/// share subtrees with the old one.
#[derive(Clone)]
pub struct Tree {
    root: Subtree,
    language: Language,
}

impl Tree {
    pub(crate) fn new(root: Subtree, language: Language) -> Tree {
        Tree { root, language }
    }

    pub(crate) fn root_subtree(&self) -> &Subtree {
        &self.root
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn root_node(&self) -> Node<'_> {
        Node {
            tree: self,
            data: &self.root,
            start: 0,
            field: None,
        }
    }

    pub fn walk(&self) -> TreeCursor<'_> {
        self.root_node().walk()
    }

    /// Every childless node in document order, extras included.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves {
            cursor: self.walk(),
            started: false,
            done: false,
        }
    }

    pub fn to_sexp(&self) -> String {
        self.root_node().to_sexp()
    }

    pub fn display_into(
        &self,
        buf: &mut dyn Write,
        src: &[u8],
        print_extras: bool,
    ) -> std::fmt::Result {
        display_node(self.root_node(), buf, src, print_extras, 0)
    }
}

impl Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tree {}", self.to_sexp())
    }
}

fn display_node(
    node: Node<'_>,
    buf: &mut dyn Write,
    src: &[u8],
    print_extras: bool,
    indent: usize,
) -> std::fmt::Result {
    if node.is_extra() && !print_extras {
        return Ok(());
    }

    for _ in 0..indent {
        write!(buf, "  ")?;
    }
    if let Some(field) = node.field_name() {
        write!(buf, "{field}: ")?;
    }

    let Range { start, end } = node.byte_range();
    write!(buf, "{} {start}..{end}", node.kind_name())?;
    if node.child_count() == 0 {
        if let Some(text) = src.get(start..end) {
            write!(buf, " {:?}", BStr::new(text))?;
        }
    }
    writeln!(buf)?;

    for child in node.children() {
        display_node(child, buf, src, print_extras, indent + 1)?;
    }
    Ok(())
}

/// Borrowed handle to a node of a [`Tree`], carrying its absolute position.
#[derive(Clone, Copy)]
pub struct Node<'tree> {
    tree: &'tree Tree,
    data: &'tree SubtreeData,
    start: u32,
    field: Option<FieldId>,
}

impl<'tree> Node<'tree> {
    pub fn kind(&self) -> Symbol {
        self.data.symbol
    }

    pub fn kind_name(&self) -> &'tree str {
        self.tree.language.symbol_name(self.data.symbol)
    }

    pub fn start_byte(&self) -> usize {
        self.start as usize
    }

    pub fn end_byte(&self) -> usize {
        (self.start + self.data.size) as usize
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.start_byte()..self.end_byte()
    }

    pub fn text<'s>(&self, src: &'s [u8]) -> &'s [u8] {
        &src[self.byte_range()]
    }

    pub fn is_error(&self) -> bool {
        self.data.is_error()
    }

    pub fn has_error(&self) -> bool {
        self.data.has_error
    }

    pub fn is_extra(&self) -> bool {
        self.data.extra
    }

    pub fn is_named(&self) -> bool {
        self.tree.language.table().is_named(self.data.symbol)
    }

    /// Field this node occupies in its parent.
    pub fn field_id(&self) -> Option<FieldId> {
        self.field
    }

    pub fn field_name(&self) -> Option<&'tree str> {
        let field = self.field?;
        Some(self.tree.language.field_name(field))
    }

    pub fn child_count(&self) -> usize {
        self.data.children.len()
    }

    pub fn child(&self, index: usize) -> Option<Node<'tree>> {
        self.children().nth(index)
    }

    pub fn children(&self) -> Children<'tree> {
        Children {
            tree: self.tree,
            iter: self.data.children.iter(),
            offset: self.start,
        }
    }

    pub fn named_children(&self) -> impl Iterator<Item = Node<'tree>> {
        self.children().filter(|child| child.is_named())
    }

    pub fn child_by_field_name(&self, name: &str) -> Option<Node<'tree>> {
        let field = self.tree.language.field_id(name)?;
        self.children().find(|child| child.field == Some(field))
    }

    pub fn children_by_field_name(&self, name: &str) -> impl Iterator<Item = Node<'tree>> {
        let field = self.tree.language.field_id(name);
        self.children()
            .filter(move |child| field.is_some() && child.field == field)
    }

    /// Smallest node containing the whole `start..end` range, `self` if no child does.
    pub fn descendant_for_byte_range(&self, start: usize, end: usize) -> Node<'tree> {
        let mut node = *self;
        'descend: loop {
            for child in node.children() {
                let range = child.byte_range();
                // empty nodes can't contain anything but an empty range at their start
                let nonempty = range.start < range.end || start == end;
                if range.start <= start && end <= range.end && nonempty {
                    node = child;
                    continue 'descend;
                }
            }
            return node;
        }
    }

    pub fn walk(&self) -> TreeCursor<'tree> {
        TreeCursor {
            tree: self.tree,
            stack: vec![CursorFrame {
                data: self.data,
                start: self.start,
                field: self.field,
                index: 0,
            }],
        }
    }

    pub fn to_sexp(&self) -> String {
        let mut buf = String::new();
        self.sexp_into(&mut buf);
        buf
    }

    fn sexp_into(&self, buf: &mut String) {
        if let Some(field) = self.field_name() {
            buf.push_str(field);
            buf.push_str(": ");
        }
        buf.push('(');
        buf.push_str(self.kind_name());
        for child in self.children() {
            if child.is_named() {
                buf.push(' ');
                child.sexp_into(buf);
            }
        }
        buf.push(')');
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.data, other.data) && self.start == other.start
    }
}

impl Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Range { start, end } = self.byte_range();
        write!(f, "{} {start}..{end}", self.kind_name())
    }
}

pub struct Children<'tree> {
    tree: &'tree Tree,
    iter: std::slice::Iter<'tree, Child>,
    offset: u32,
}

impl<'tree> Iterator for Children<'tree> {
    type Item = Node<'tree>;
    fn next(&mut self) -> Option<Self::Item> {
        let child = self.iter.next()?;
        let node = Node {
            tree: self.tree,
            data: &child.node,
            start: self.offset,
            field: child.field,
        };
        self.offset += child.node.size;
        Some(node)
    }
}

#[derive(Clone, Copy)]
struct CursorFrame<'tree> {
    data: &'tree SubtreeData,
    start: u32,
    field: Option<FieldId>,
    /// Index of this node in its parent.
    index: usize,
}

/// Depth first walker over a tree, stepping is driven by the caller.
#[derive(Clone)]
pub struct TreeCursor<'tree> {
    tree: &'tree Tree,
    stack: Vec<CursorFrame<'tree>>,
}

impl<'tree> TreeCursor<'tree> {
    fn current(&self) -> CursorFrame<'tree> {
        // the stack is never empty, goto_parent keeps the root frame
        self.stack[self.stack.len() - 1]
    }

    pub fn node(&self) -> Node<'tree> {
        let frame = self.current();
        Node {
            tree: self.tree,
            data: frame.data,
            start: frame.start,
            field: frame.field,
        }
    }

    pub fn field_name(&self) -> Option<&'tree str> {
        self.node().field_name()
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn goto_first_child(&mut self) -> bool {
        let frame = self.current();
        let Some(child) = frame.data.children.first() else {
            return false;
        };
        self.stack.push(CursorFrame {
            data: &child.node,
            start: frame.start,
            field: child.field,
            index: 0,
        });
        true
    }

    pub fn goto_next_sibling(&mut self) -> bool {
        let len = self.stack.len();
        if len < 2 {
            return false;
        }
        let parent = self.stack[len - 2];
        let frame = self.stack[len - 1];
        let index = frame.index + 1;
        let Some(child) = parent.data.children.get(index) else {
            return false;
        };
        self.stack[len - 1] = CursorFrame {
            data: &child.node,
            start: frame.start + frame.data.size,
            field: child.field,
            index,
        };
        true
    }

    pub fn goto_parent(&mut self) -> bool {
        if self.stack.len() < 2 {
            return false;
        }
        self.stack.pop();
        true
    }

    /// Moves to the first child that ends after `byte`, returns its index.
    pub fn goto_first_child_for_byte(&mut self, byte: usize) -> Option<usize> {
        if !self.goto_first_child() {
            return None;
        }
        loop {
            let node = self.node();
            if node.end_byte() > byte {
                return Some(self.current().index);
            }
            if !self.goto_next_sibling() {
                self.goto_parent();
                return None;
            }
        }
    }
}

pub struct Leaves<'tree> {
    cursor: TreeCursor<'tree>,
    started: bool,
    done: bool,
}

impl<'tree> Iterator for Leaves<'tree> {
    type Item = Node<'tree>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.started {
            while !self.cursor.goto_next_sibling() {
                if !self.cursor.goto_parent() {
                    self.done = true;
                    return None;
                }
            }
        }
        self.started = true;
        while self.cursor.goto_first_child() {}
        Some(self.cursor.node())
    }
}
