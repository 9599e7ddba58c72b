//! The persistent decoration tree.
//!
//! A [`DecorationSet`] is an immutable B-tree-shaped node: decorations that
//! fit entirely inside one child live in that child's subtree, decorations
//! that span a child boundary stay in the node's own `local` list. Local
//! coordinates are relative to the node's start, so moving a whole subtree
//! never rewrites its decorations. Every operation returns a new root that
//! shares unchanged branches with the old one.

use crate::decoration::{cmp_by_pos, Decoration, DecorationDesc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

/// Nodes at or below this size are stored as flat leaves.
pub(crate) const BASE_NODE_SIZE: usize = 32;
const BASE_NODE_SIZE_SHIFT: u32 = 5;

/// Predicate deciding which existing decorations survive an update.
/// Receives absolute `from`/`to` and the decoration's descriptor.
pub type DecorationFilter<'a> = dyn Fn(usize, usize, &DecorationDesc) -> bool + 'a;

#[derive(Debug)]
struct Node {
    length: usize,
    size: usize,
    local: Vec<Decoration>,
    children: Vec<DecorationSet>,
}

/// An immutable set of decorations over a span of text.
#[derive(Debug, Clone)]
pub struct DecorationSet(Arc<Node>);

impl DecorationSet {
    /// The zero-length, zero-size sentinel.
    pub fn empty() -> Self {
        Self::node(0, 0, Vec::new(), Vec::new())
    }

    /// Build a set from an unsorted batch of decorations.
    pub fn of(decorations: impl IntoIterator<Item = Decoration>) -> Self {
        Self::empty().insert(decorations)
    }

    /// Add decorations without filtering anything out.
    pub fn insert(&self, decorations: impl IntoIterator<Item = Decoration>) -> Self {
        self.update(decorations, None, 0, 0)
    }

    /// The text span this set covers.
    pub fn len(&self) -> usize {
        self.0.length
    }

    /// Total number of decorations in the set.
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.size == 0 && self.0.length == 0
    }

    /// The same set covering `delta` more text at its end.
    pub fn grow(&self, delta: usize) -> Self {
        if delta == 0 {
            return self.clone();
        }
        self.with_length(self.0.length + delta)
    }

    /// Every decoration in the set, in absolute coordinates, sorted by
    /// `(from, bias)`.
    pub fn decorations(&self) -> Vec<Decoration> {
        let mut all = Vec::with_capacity(self.size());
        self.collect_into(&mut all, 0);
        all.sort_by(cmp_by_pos);
        all
    }

    /// Insert a batch of decorations and drop existing ones rejected by
    /// `filter`.
    ///
    /// The filter is consulted only for decorations intersecting the closed
    /// window `[filter_from, filter_to]`; everything outside survives
    /// untouched. When neither the additions nor the filter change anything,
    /// the result is the input set itself. The result's length is the
    /// maximum of the current length and the additions' end positions.
    pub fn update(
        &self,
        additions: impl IntoIterator<Item = Decoration>,
        filter: Option<&DecorationFilter<'_>>,
        filter_from: usize,
        filter_to: usize,
    ) -> Self {
        let mut additions: Vec<Decoration> = additions.into_iter().collect();
        additions.sort_by(cmp_by_pos);
        let length = additions.iter().map(|d| d.to).fold(self.len(), usize::max);
        trace!(
            additions = additions.len(),
            size = self.size(),
            filtered = filter.is_some(),
            "updating decoration set"
        );
        let mut cursor = 0;
        let updated = self.update_inner(
            &additions,
            &mut cursor,
            filter,
            filter_from,
            filter_to,
            0,
            length,
        );
        debug_assert_eq!(cursor, additions.len());
        updated
    }

    fn update_inner(
        &self,
        additions: &[Decoration],
        cursor: &mut usize,
        filter: Option<&DecorationFilter<'_>>,
        filter_from: usize,
        filter_to: usize,
        offset: usize,
        length: usize,
    ) -> DecorationSet {
        let node = &*self.0;

        // Copy-on-write filter pass over this node's locals. `None` means
        // the list is untouched.
        let mut local = filter_locals(&node.local, filter, filter_from, filter_to, offset);

        // Route additions into the existing children, left to right.
        let mut children: Option<Vec<DecorationSet>> = None;
        let mut pos = offset;
        for i in 0..node.children.len() {
            let child = &node.children[i];
            let end = pos + child.len();
            let mut child_additions = Vec::new();
            while *cursor < additions.len() && additions[*cursor].from < end {
                let deco = additions[*cursor].clone();
                *cursor += 1;
                if deco.to > end {
                    // Spans the child boundary, so it lives at this level.
                    insert_sorted(
                        local.get_or_insert_with(|| node.local.clone()),
                        deco.shift(-(offset as isize)),
                    );
                } else {
                    child_additions.push(deco);
                }
            }
            let window_touches = filter.is_some() && filter_from <= end && filter_to >= pos;
            if !child_additions.is_empty() || window_touches {
                let mut child_cursor = 0;
                let updated = child.update_inner(
                    &child_additions,
                    &mut child_cursor,
                    filter,
                    filter_from,
                    filter_to,
                    pos,
                    child.len(),
                );
                debug_assert_eq!(child_cursor, child_additions.len());
                if !updated.same(child) {
                    children.get_or_insert_with(|| node.children.clone())[i] = updated;
                }
            }
            pos = end;
        }

        // Whatever is left starts past the last child.
        let tail = &additions[*cursor..];
        *cursor = additions.len();

        if local.is_none() && children.is_none() && tail.is_empty() && length == node.length {
            return self.clone();
        }

        let size = local.as_ref().map_or(node.local.len(), Vec::len)
            + children
                .as_deref()
                .unwrap_or(&node.children)
                .iter()
                .map(DecorationSet::size)
                .sum::<usize>()
            + tail.len();

        if size <= BASE_NODE_SIZE {
            // Small enough for a flat leaf: pull everything local.
            let mut flat = local.unwrap_or_else(|| node.local.clone());
            let mut child_off = 0isize;
            for child in children.as_deref().unwrap_or(&node.children) {
                child.collect_into(&mut flat, child_off);
                child_off += child.len() as isize;
            }
            for deco in tail {
                flat.push(deco.shift(-(offset as isize)));
            }
            flat.sort_by(cmp_by_pos);
            return DecorationSet::node(length, size, flat, Vec::new());
        }

        let child_size = BASE_NODE_SIZE.max(size >> BASE_NODE_SIZE_SHIFT);
        let mut local = local.unwrap_or_else(|| node.local.clone());
        let mut children = children.unwrap_or_else(|| node.children.clone());
        if !tail.is_empty() {
            append_decorations(tail, &mut local, &mut children, offset, length, pos, child_size);
        }
        rebalance_children(&mut local, &mut children, child_size);
        let size = local.len() + children.iter().map(DecorationSet::size).sum::<usize>();
        DecorationSet::node(length, size, local, children)
    }

    pub(crate) fn node(
        length: usize,
        size: usize,
        local: Vec<Decoration>,
        children: Vec<DecorationSet>,
    ) -> Self {
        Self(Arc::new(Node {
            length,
            size,
            local,
            children,
        }))
    }

    pub(crate) fn with_length(&self, length: usize) -> Self {
        Self::node(
            length,
            self.0.size,
            self.0.local.clone(),
            self.0.children.clone(),
        )
    }

    pub(crate) fn local(&self) -> &[Decoration] {
        &self.0.local
    }

    pub(crate) fn children(&self) -> &[DecorationSet] {
        &self.0.children
    }

    /// Identity comparison: the same shared node.
    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Depth-first append of every decoration, translated by `offset` into
    /// the caller's coordinate frame.
    pub(crate) fn collect_into(&self, target: &mut Vec<Decoration>, offset: isize) {
        let node = &*self.0;
        target.extend(node.local.iter().map(|deco| deco.shift(offset)));
        let mut child_off = offset;
        for child in &node.children {
            child.collect_into(target, child_off);
            child_off += child.len() as isize;
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let node = &*self.0;
        let child_sizes: usize = node.children.iter().map(DecorationSet::size).sum();
        assert_eq!(
            node.size,
            node.local.len() + child_sizes,
            "node size must equal local count plus child sizes"
        );
        for pair in node.local.windows(2) {
            assert_ne!(
                cmp_by_pos(&pair[0], &pair[1]),
                Ordering::Greater,
                "local decorations must stay sorted by (from, bias)"
            );
        }
        for deco in &node.local {
            assert!(
                deco.from <= deco.to && deco.to <= node.length,
                "local decoration {}..{} outside node length {}",
                deco.from,
                deco.to,
                node.length
            );
            match deco.desc() {
                DecorationDesc::Range(_) => assert!(deco.from < deco.to, "empty range stored"),
                DecorationDesc::Point(_) => assert_eq!(deco.from, deco.to, "wide point stored"),
            }
        }
        let span: usize = node.children.iter().map(DecorationSet::len).sum();
        assert!(span <= node.length, "children cover more than the node");
        for child in &node.children {
            child.check_invariants();
        }
    }

    #[cfg(test)]
    pub(crate) fn child_count(&self) -> usize {
        self.0.children.len()
    }
}

fn filter_locals(
    local: &[Decoration],
    filter: Option<&DecorationFilter<'_>>,
    filter_from: usize,
    filter_to: usize,
    offset: usize,
) -> Option<Vec<Decoration>> {
    let filter = filter?;
    let mut copy: Option<Vec<Decoration>> = None;
    for (i, deco) in local.iter().enumerate() {
        let (from, to) = (deco.from + offset, deco.to + offset);
        let keep = if to < filter_from || from > filter_to {
            true
        } else {
            filter(from, to, deco.desc())
        };
        if keep {
            if let Some(copy) = copy.as_mut() {
                copy.push(deco.clone());
            }
        } else if copy.is_none() {
            copy = Some(local[..i].to_vec());
        }
    }
    copy
}

pub(crate) fn insert_sorted(list: &mut Vec<Decoration>, deco: Decoration) {
    let at = list.partition_point(|d| cmp_by_pos(d, &deco) != Ordering::Greater);
    list.insert(at, deco);
}

/// Chunk tail additions into fresh leaf children of at most `child_size`
/// decorations each. A chunk's span runs up to the next chunk's first start
/// (or the node end for the last chunk); members ending past that span go
/// into the node's local list instead.
fn append_decorations(
    tail: &[Decoration],
    local: &mut Vec<Decoration>,
    children: &mut Vec<DecorationSet>,
    offset: usize,
    length: usize,
    mut pos: usize,
    child_size: usize,
) {
    let mut i = 0;
    while i < tail.len() {
        let chunk_end = (i + child_size).min(tail.len());
        let span_end = if chunk_end < tail.len() {
            tail[chunk_end].from
        } else {
            offset + length
        };
        let mut chunk_local = Vec::with_capacity(chunk_end - i);
        for deco in &tail[i..chunk_end] {
            if deco.to > span_end {
                insert_sorted(local, deco.shift(-(offset as isize)));
            } else {
                chunk_local.push(deco.shift(-(pos as isize)));
            }
        }
        if !chunk_local.is_empty() || span_end > pos {
            let size = chunk_local.len();
            children.push(DecorationSet::node(span_end - pos, size, chunk_local, Vec::new()));
            pos = span_end;
        }
        i = chunk_end;
    }
}

/// One-pass shape maintenance over a node's children: drop empty nodes,
/// unwrap oversized ones, merge small leaf neighbors, and gather runs of
/// small siblings under an intermediate node.
fn rebalance_children(
    local: &mut Vec<Decoration>,
    children: &mut Vec<DecorationSet>,
    child_size: usize,
) {
    let mut i = 0;
    let mut off = 0usize;
    while i < children.len() {
        let child = children[i].clone();
        if child.size() == 0 && (i > 0 || children.len() == 1) {
            // Empty node: remove it, donating its span to the left sibling.
            children.remove(i);
            if i > 0 {
                children[i - 1] = children[i - 1].grow(child.len());
                off += child.len();
            }
        } else if child.size() > 2 * child_size
            && !child.children().is_empty()
            && child.local().len() < child.len() / 2
        {
            // Oversized node: splice its contents into this level. The
            // grandchildren may cover less than the child's span, so the
            // last one absorbs the uncovered tail to keep siblings tiling.
            for deco in child.local() {
                insert_sorted(local, deco.shift(off as isize));
            }
            let covered: usize = child.children().iter().map(DecorationSet::len).sum();
            let mut promoted: Vec<DecorationSet> = child.children().to_vec();
            if covered < child.len() {
                if let Some(last) = promoted.last_mut() {
                    *last = last.grow(child.len() - covered);
                }
            }
            children.splice(i..=i, promoted);
        } else if child.children().is_empty()
            && i + 1 < children.len()
            && children[i + 1].children().is_empty()
            && child.size() + children[i + 1].size() <= BASE_NODE_SIZE
        {
            // Two small leaves: merge into one.
            let next = children[i + 1].clone();
            let mut merged = child.local().to_vec();
            merged.extend(next.local().iter().map(|d| d.shift(child.len() as isize)));
            merged.sort_by(cmp_by_pos);
            let node = DecorationSet::node(
                child.len() + next.len(),
                child.size() + next.size(),
                merged,
                Vec::new(),
            );
            children.splice(i..i + 2, [node]);
        } else {
            // Gather a run of small siblings under a new node.
            let mut join_to = i + 1;
            let mut size = child.size();
            let mut span = child.len();
            if child.size() < child_size / 2 {
                while join_to < children.len() {
                    let joined = size + children[join_to].size();
                    if joined > child_size {
                        break;
                    }
                    size = joined;
                    span += children[join_to].len();
                    join_to += 1;
                }
            }
            if join_to > i + 1 {
                let grouped: Vec<DecorationSet> = children[i..join_to].to_vec();
                // Parent locals contained in the grouped span move down
                // into the new node.
                let mut reparented = Vec::new();
                local.retain(|deco| {
                    if deco.from >= off && deco.to <= off + span {
                        reparented.push(deco.shift(-(off as isize)));
                        false
                    } else {
                        true
                    }
                });
                let total = size + reparented.len();
                let node = DecorationSet::node(span, total, reparented, grouped);
                children.splice(i..join_to, [node]);
                i += 1;
                off += span;
            } else {
                off += child.len();
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoration::{Attributes, PointSpec, RangeSpec};

    fn range(from: usize, to: usize) -> Decoration {
        Decoration::range(from, to, RangeSpec::default()).unwrap()
    }

    fn classed(from: usize, to: usize, class: &str) -> Decoration {
        Decoration::range(
            from,
            to,
            RangeSpec {
                attributes: Some(Attributes::from([("class".into(), class.into())])),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn positions(set: &DecorationSet) -> Vec<(usize, usize)> {
        set.decorations().iter().map(|d| (d.from, d.to)).collect()
    }

    #[test]
    fn empty_set_has_no_extent() {
        let empty = DecorationSet::empty();
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.size(), 0);
        assert!(empty.is_empty());
        empty.check_invariants();
    }

    #[test]
    fn of_keeps_an_unsorted_batch_intact() {
        let set = DecorationSet::of([
            range(30, 40),
            Decoration::point(5, PointSpec::default()),
            range(0, 12),
            range(8, 20),
        ]);
        assert_eq!(set.size(), 4);
        assert_eq!(set.len(), 40);
        assert_eq!(positions(&set), vec![(0, 12), (5, 5), (8, 20), (30, 40)]);
        set.check_invariants();
    }

    #[test]
    fn update_without_changes_returns_the_same_root() {
        let set = DecorationSet::of([range(0, 10), range(20, 30)]);
        let same = set.update([], None, 0, set.len());
        assert!(set.same(&same));
        let kept = set.update([], Some(&|_, _, _| true), 0, set.len());
        assert!(set.same(&kept));
    }

    #[test]
    fn filter_drops_only_inside_the_window() {
        let set = DecorationSet::of([range(0, 5), range(10, 15), range(20, 25)]);
        let filtered = set.update([], Some(&|_, _, _| false), 8, 16);
        assert_eq!(positions(&filtered), vec![(0, 5), (20, 25)]);
        filtered.check_invariants();
    }

    #[test]
    fn filter_is_not_consulted_outside_the_window() {
        let set = DecorationSet::of([range(0, 5), range(10, 15)]);
        let filtered = set.update(
            [],
            Some(&|from, _, _| {
                assert!(from >= 8, "filter ran on a decoration outside the window");
                false
            }),
            8,
            16,
        );
        assert_eq!(positions(&filtered), vec![(0, 5)]);
    }

    #[test]
    fn large_batches_split_into_children_and_collapse_back() {
        let decos: Vec<Decoration> = (0..40).map(|i| range(i * 10, i * 10 + 5)).collect();
        let set = DecorationSet::of(decos);
        assert_eq!(set.size(), 40);
        assert!(set.child_count() > 0, "forty decorations should not stay flat");
        set.check_invariants();

        // Dropping half brings the set under the leaf threshold again.
        let thinned = set.update([], Some(&|from, _, _| (from / 10) % 2 == 0), 0, set.len());
        assert_eq!(thinned.size(), 20);
        assert_eq!(thinned.child_count(), 0, "a small set should be a flat leaf");
        thinned.check_invariants();
    }

    #[test]
    fn additions_spanning_a_child_boundary_stay_reachable() {
        let decos: Vec<Decoration> = (0..40).map(|i| range(i * 10, i * 10 + 5)).collect();
        let set = DecorationSet::of(decos);
        // Spans most of the tree, so no child can hold it.
        let wide = classed(5, 380, "wide");
        let updated = set.insert([wide.clone()]);
        assert_eq!(updated.size(), 41);
        assert!(updated.decorations().contains(&wide));
        updated.check_invariants();
    }

    #[test]
    fn interleaved_inserts_preserve_every_decoration() {
        let mut set = DecorationSet::empty();
        let mut expected = Vec::new();
        for round in 0..8 {
            let batch: Vec<Decoration> = (0..25)
                .map(|i| {
                    let from = round * 13 + i * 17;
                    range(from, from + 9)
                })
                .collect();
            expected.extend(batch.iter().map(|d| (d.from, d.to)));
            set = set.insert(batch);
            set.check_invariants();
        }
        expected.sort();
        let mut got = positions(&set);
        got.sort();
        assert_eq!(got, expected);
        assert_eq!(set.size(), 200);
    }

    #[test]
    fn update_can_add_and_filter_in_one_pass() {
        let set = DecorationSet::of([range(0, 5), range(10, 15)]);
        let updated = set.update([range(20, 30)], Some(&|from, _, _| from != 0), 0, set.len());
        assert_eq!(positions(&updated), vec![(10, 15), (20, 30)]);
        updated.check_invariants();
    }

    #[test]
    fn points_with_sides_keep_their_order() {
        let left = Decoration::point(10, PointSpec { side: -1, ..Default::default() });
        let right = Decoration::point(10, PointSpec { side: 1, ..Default::default() });
        let set = DecorationSet::of([right.clone(), left.clone()]);
        let all = set.decorations();
        assert_eq!(all[0], left);
        assert_eq!(all[1], right);
    }

    #[test]
    fn grow_extends_without_touching_contents() {
        let set = DecorationSet::of([range(0, 10)]);
        let grown = set.grow(15);
        assert_eq!(grown.len(), 25);
        assert_eq!(grown.size(), 1);
        assert_eq!(positions(&grown), vec![(0, 10)]);
        assert!(set.grow(0).same(&set));
    }

    #[test]
    fn update_grows_to_cover_new_decorations() {
        let set = DecorationSet::of([range(0, 10)]);
        let extended = set.insert([range(50, 60)]);
        assert_eq!(extended.len(), 60);
        extended.check_invariants();
    }
}
