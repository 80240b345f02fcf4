//! LK-002: Path-yielding traversal over a `Document`.
//!
//! Yields every reachable `(Reference, &Document)` pair below the root,
//! containers and leaves alike. Traversal uses an explicit stack (depth-first,
//! pre-order, first child first) or queue (breadth-first), never recursion, so
//! document depth is bounded only by memory.
//!
//! Mapping keys that are not valid identifiers cannot be addressed by a
//! `Reference`; those entries and their subtrees are not yielded. Callers that
//! must not lose data under them list them with [`Visitor::non_addressable`].

use super::document::Document;
use super::reference::{Ident, Reference, Segment};
use std::collections::VecDeque;

/// Traversal order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    DepthFirst,
    BreadthFirst,
}

type Filter<'a> = Box<dyn Fn(&Document) -> bool + 'a>;

/// Configurable traversal over a borrowed document.
pub struct Visitor<'a> {
    root: &'a Document,
    order: Order,
    filter: Option<Filter<'a>>,
}

impl<'a> Visitor<'a> {
    pub fn new(root: &'a Document) -> Self {
        Self {
            root,
            order: Order::DepthFirst,
            filter: None,
        }
    }

    pub fn root(&self) -> &'a Document {
        self.root
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn breadth_first(self) -> Self {
        self.order(Order::BreadthFirst)
    }

    /// Only yield values the filter accepts. Rejected values are still
    /// descended into.
    pub fn filter(mut self, filter: impl Fn(&Document) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn contains(&self, path: &Reference) -> bool {
        self.root.contains(path)
    }

    /// Entries skipped by [`Visitor::iter`] because their key is not an
    /// identifier, as `(parent path, key, value)`. Entries nested inside a
    /// skipped value are not listed separately.
    pub fn non_addressable(&self) -> Vec<(Reference, &'a str, &'a Document)> {
        let all = Visitor::new(self.root);
        std::iter::once((Reference::root(), self.root))
            .chain(all.iter())
            .filter_map(|(path, node)| node.as_mapping().map(|map| (path, map)))
            .flat_map(|(path, map)| {
                map.iter()
                    .filter(|(key, _)| !Ident::is_valid(key))
                    .map(move |(key, value)| (path.clone(), key.as_str(), value))
            })
            .collect()
    }

    pub fn iter(&self) -> VisitorIter<'a, '_> {
        let mut iter = VisitorIter {
            pending: VecDeque::new(),
            order: self.order,
            filter: self.filter.as_deref(),
        };
        iter.push_children(&Reference::root(), self.root);
        iter
    }
}

impl<'a, 'v> IntoIterator for &'v Visitor<'a> {
    type Item = (Reference, &'a Document);
    type IntoIter = VisitorIter<'a, 'v>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator state for [`Visitor`].
pub struct VisitorIter<'a, 'v> {
    pending: VecDeque<(Reference, &'a Document)>,
    order: Order,
    filter: Option<&'v (dyn Fn(&Document) -> bool + 'a)>,
}

impl<'a> VisitorIter<'a, '_> {
    fn pop(&mut self) -> Option<(Reference, &'a Document)> {
        match self.order {
            Order::DepthFirst => self.pending.pop_back(),
            Order::BreadthFirst => self.pending.pop_front(),
        }
    }

    fn push_children(&mut self, parent: &Reference, node: &'a Document) {
        let mut children: Vec<(Reference, &'a Document)> = match node {
            Document::Mapping(map) => map
                .iter()
                .filter_map(|(key, value)| match Ident::new(key) {
                    Ok(ident) => Some((parent.child(Segment::Key(ident)), value)),
                    Err(_) => {
                        tracing::trace!(path = %parent, key = %key, "skipping non-addressable key");
                        None
                    }
                })
                .collect(),
            Document::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(idx, value)| (parent.child(idx), value))
                .collect(),
            _ => return,
        };

        if self.order == Order::DepthFirst {
            // popped from the back, so the first child goes last
            children.reverse();
        }
        self.pending.extend(children);
    }
}

impl<'a> Iterator for VisitorIter<'a, '_> {
    type Item = (Reference, &'a Document);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, value)) = self.pop() {
            self.push_children(&path, value);
            let accepted = self.filter.map_or(true, |f| f(value));
            if accepted {
                return Some((path, value));
            }
        }
        None
    }
}
