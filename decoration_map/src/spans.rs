//! The merged-span query.
//!
//! `decorated_spans_in_range` sweeps one or more decoration sets left to
//! right and flattens every span-affecting range decoration into a
//! contiguous, non-overlapping list of styled output ranges. The sweep keeps
//! a min-heap of pending work: cursors over node-local decoration lists
//! (keyed by their next start) and currently active decorations (keyed by
//! their end).

use crate::decoration::{Attributes, Decoration, DecorationDesc};
use crate::iter::{DecorationSetIterator, LocalSet};
use crate::set::DecorationSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::trace;

/// One styled output range: the overlay-merge of every span-affecting
/// decoration active over `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedRange {
    pub from: usize,
    pub to: usize,
    pub tag_name: Option<String>,
    pub attributes: Option<Attributes>,
    pub collapsed: bool,
}

impl DecoratedRange {
    /// Merge the active decorations, in activation order. A later
    /// `tag_name` wins; `style` values accumulate with `";"`, `class`
    /// values with a space, any other attribute overwrites.
    fn build(from: usize, to: usize, active: &[Arc<Decoration>]) -> Self {
        let mut tag_name = None;
        let mut attributes: Option<Attributes> = None;
        let mut collapsed = false;
        for deco in active {
            let DecorationDesc::Range(desc) = deco.desc() else {
                continue;
            };
            if let Some(tag) = &desc.spec.tag_name {
                tag_name = Some(tag.clone());
            }
            if desc.spec.collapsed {
                collapsed = true;
            }
            if let Some(attrs) = &desc.spec.attributes {
                let merged = attributes.get_or_insert_with(Attributes::new);
                for (name, value) in attrs {
                    let value = match merged.get(name) {
                        Some(prev) if name == "style" => format!("{prev};{value}"),
                        Some(prev) if name == "class" => format!("{prev} {value}"),
                        _ => value.clone(),
                    };
                    merged.insert(name.clone(), value);
                }
            }
        }
        Self {
            from,
            to,
            tag_name,
            attributes,
            collapsed,
        }
    }
}

enum HeapEntry {
    Cursor(LocalSet),
    Active(Arc<Decoration>),
}

impl HeapEntry {
    fn key(&self) -> (usize, i32) {
        match self {
            HeapEntry::Cursor(local) => {
                let deco = local.current();
                (deco.from + local.offset(), deco.desc().bias())
            },
            HeapEntry::Active(deco) => (deco.to, deco.desc().bias()),
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Pull cursors from `iter` until a terminal leaf arrives; that one takes
/// the iterator along as its continuation. Queueing every enclosing node's
/// locals before descending keeps the heap's position order strict.
fn add_iter_to_heap(
    heap: &mut BinaryHeap<Reverse<HeapEntry>>,
    mut iter: DecorationSetIterator,
    skip: usize,
) {
    while let Some(mut local) = iter.next(skip) {
        let terminal = local.set.children().is_empty();
        if terminal {
            local.next = Some(iter);
            heap.push(Reverse(HeapEntry::Cursor(local)));
            return;
        }
        heap.push(Reverse(HeapEntry::Cursor(local)));
    }
}

/// Merge every span-affecting range decoration in `sets` over `[from, to]`
/// into a contiguous, non-overlapping sequence of styled ranges.
pub fn decorated_spans_in_range(
    sets: &[DecorationSet],
    from: usize,
    to: usize,
) -> Vec<DecoratedRange> {
    let mut heap = BinaryHeap::new();
    for set in sets {
        if set.size() > 0 {
            add_iter_to_heap(&mut heap, DecorationSetIterator::new(set.clone(), 0), from);
        }
    }
    trace!(sets = sets.len(), queued = heap.len(), from, to, "building decorated spans");

    let mut result = Vec::new();
    let mut active: Vec<Arc<Decoration>> = Vec::new();
    let mut pos = from;
    while let Some(Reverse(entry)) = heap.pop() {
        match entry {
            HeapEntry::Cursor(mut local) => {
                let deco = local.current().clone();
                let offset = local.offset();
                local.index += 1;
                if local.remaining() {
                    heap.push(Reverse(HeapEntry::Cursor(local)));
                } else if let Some(iter) = local.next.take() {
                    add_iter_to_heap(&mut heap, iter, 0);
                }
                if deco.to + offset < from {
                    continue;
                }
                if deco.from + offset > to {
                    break;
                }
                let affects = matches!(
                    deco.desc(),
                    DecorationDesc::Range(desc) if desc.affects_spans
                );
                if affects {
                    let deco = Arc::new(deco.shift(offset as isize));
                    if deco.from > pos {
                        result.push(DecoratedRange::build(pos, deco.from, &active));
                        pos = deco.from;
                    }
                    active.push(Arc::clone(&deco));
                    heap.push(Reverse(HeapEntry::Active(deco)));
                }
            },
            HeapEntry::Active(deco) => {
                // This decoration ends here.
                if deco.to >= to {
                    break;
                }
                if deco.to > pos {
                    result.push(DecoratedRange::build(pos, deco.to, &active));
                    pos = deco.to;
                }
                // Identity, not equality: two equal ranges ending together
                // must not evict each other.
                active.retain(|entry| !Arc::ptr_eq(entry, &deco));
            },
        }
    }
    if pos < to {
        result.push(DecoratedRange::build(pos, to, &active));
    }
    result
}
