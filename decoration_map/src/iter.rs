//! Ordered traversal of a decoration tree.
//!
//! The iterator yields [`LocalSet`] cursors, one per node with local
//! decorations, in position order: a node's locals come out before anything
//! in its children. Consumers that interleave several trees (the span
//! builder) keep the cursors in a heap and pull more from the iterator as
//! cursors run dry.

use crate::decoration::Decoration;
use crate::set::DecorationSet;

struct IteratedSet {
    set: DecorationSet,
    offset: usize,
    locals_done: bool,
    index: usize,
    child_off: usize,
}

impl IteratedSet {
    fn new(set: DecorationSet, offset: usize) -> Self {
        Self {
            set,
            offset,
            locals_done: false,
            index: 0,
            child_off: 0,
        }
    }
}

/// A cursor over one node's local decorations.
///
/// `offset` is the node's absolute start. `next` carries the iterator as a
/// continuation, present only when the node is a terminal leaf; the consumer
/// takes it back once the cursor is exhausted.
pub struct LocalSet {
    pub(crate) offset: usize,
    pub(crate) set: DecorationSet,
    pub(crate) index: usize,
    pub(crate) next: Option<DecorationSetIterator>,
}

impl LocalSet {
    /// Absolute start of the node this cursor reads from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The decoration the cursor is parked on, in node-local coordinates.
    pub fn current(&self) -> &Decoration {
        &self.set.local()[self.index]
    }

    pub(crate) fn remaining(&self) -> bool {
        self.index < self.set.local().len()
    }
}

/// Depth-first, left-first walk over a decoration tree.
pub struct DecorationSetIterator {
    stack: Vec<IteratedSet>,
}

impl DecorationSetIterator {
    pub fn new(set: DecorationSet, offset: usize) -> Self {
        let mut stack = Vec::new();
        if set.size() > 0 {
            stack.push(IteratedSet::new(set, offset));
        }
        Self { stack }
    }

    /// The next nonempty local list in position order.
    ///
    /// Children ending strictly before `skip` are bypassed wholesale; a
    /// child ending exactly at `skip` is still entered so decorations at the
    /// boundary of a skipped region come out.
    pub fn next(&mut self, skip: usize) -> Option<LocalSet> {
        loop {
            let top = self.stack.last_mut()?;
            if !top.locals_done {
                top.locals_done = true;
                if !top.set.local().is_empty() {
                    return Some(LocalSet {
                        offset: top.offset,
                        set: top.set.clone(),
                        index: 0,
                        next: None,
                    });
                }
            }
            if top.index >= top.set.children().len() {
                self.stack.pop();
                continue;
            }
            let child = top.set.children()[top.index].clone();
            let child_start = top.offset + top.child_off;
            top.index += 1;
            top.child_off += child.len();
            if child_start + child.len() >= skip {
                self.stack.push(IteratedSet::new(child, child_start));
            }
        }
    }
}
