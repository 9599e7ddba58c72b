//! Remapping a decoration set through text edits.
//!
//! Mapping walks the tree with three cursors: the node's start in the old
//! document, its start in the new document, and its end in the new document.
//! Subtrees untouched by any change are reused wholesale. A decoration whose
//! mapped interval no longer fits its node escapes upward and is re-homed in
//! the lowest enclosing ancestor; escapees that leave the document entirely
//! are dropped at the root.

use crate::change::{map_pos, touches_range, Change};
use crate::decoration::{cmp_by_pos, Decoration};
use crate::set::{insert_sorted, DecorationSet};
use smallvec::SmallVec;
use tracing::trace;

type Escaped = SmallVec<[Decoration; 4]>;

impl DecorationSet {
    /// The same decorations positioned in the post-edit coordinate frame.
    ///
    /// Range decorations whose mapped interval collapses are dropped; that
    /// is expected when an edit deletes annotated text, not an error.
    pub fn map(&self, changes: &[Change]) -> Self {
        if changes.is_empty() || self.is_empty() {
            return self.clone();
        }
        trace!(
            changes = changes.len(),
            size = self.size(),
            "mapping decoration set"
        );
        let new_end = map_pos(self.len(), changes, 1);
        let (mapped, _escaped) = self.map_inner(changes, 0, 0, new_end);
        mapped
    }

    fn map_inner(
        &self,
        changes: &[Change],
        old_start: usize,
        new_start: usize,
        new_end: usize,
    ) -> (DecorationSet, Escaped) {
        let mut escaped = Escaped::new();

        let mut local = Vec::with_capacity(self.local().len());
        for deco in self.local() {
            let Some(mapped) = deco.shift(old_start as isize).map(changes) else {
                continue;
            };
            if mapped.from >= new_start && mapped.to <= new_end {
                local.push(mapped.shift(-(new_start as isize)));
            } else {
                escaped.push(mapped);
            }
        }
        // Endpoint biases differ between decorations, so mapping can
        // reorder them.
        local.sort_by(cmp_by_pos);

        let mut children: Vec<DecorationSet> = Vec::with_capacity(self.children().len());
        let mut old_pos = old_start;
        let mut new_pos = new_start;
        let last = self.children().len().saturating_sub(1);
        for (i, child) in self.children().iter().enumerate() {
            let old_end = old_pos + child.len();
            let new_child_end = map_pos(old_end, changes, 1);
            let new_len = new_child_end - new_pos;
            let mapped_child = if !touches_range(old_pos, old_end, changes) {
                if new_len == child.len() {
                    child.clone()
                } else {
                    child.with_length(new_len)
                }
            } else {
                let (mapped, child_escaped) =
                    child.map_inner(changes, old_pos, new_pos, new_child_end);
                for deco in child_escaped {
                    if deco.from >= new_start && deco.to <= new_end {
                        insert_sorted(&mut local, deco.shift(-(new_start as isize)));
                    } else {
                        escaped.push(deco);
                    }
                }
                mapped
            };
            if mapped_child.size() == 0 && (new_len == 0 || !children.is_empty() || i == last) {
                // Nothing left in the subtree; its span (if any) moves to
                // the left sibling so the remaining children keep tiling.
                if new_len > 0 {
                    if let Some(prev) = children.last_mut() {
                        *prev = prev.grow(new_len);
                    }
                }
            } else {
                children.push(mapped_child);
            }
            old_pos = old_end;
            new_pos = new_child_end;
        }

        let size = local.len() + children.iter().map(DecorationSet::size).sum::<usize>();
        let set = DecorationSet::node(new_end - new_start, size, local, children);
        (set, escaped)
    }
}
