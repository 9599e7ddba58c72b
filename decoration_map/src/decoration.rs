//! Decoration descriptors and the decoration value itself.
//!
//! A [`Decoration`] is an annotation on a contiguous interval (or single
//! position) of text. The caller describes what it wants with a
//! [`RangeSpec`] or [`PointSpec`]; construction distills that once into a
//! [`DecorationDesc`] carrying the bias integers every later comparison and
//! remap uses.

use crate::change::{map_pos, Change};
use snafu::{ensure, Snafu};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

pub type Result<T, E = DecorationError> = std::result::Result<T, E>;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DecorationError {
    #[snafu(display("invalid decoration range: start {from} is not before end {to}"))]
    InvalidRange { from: usize, to: usize },
}

/// String attribute payload attached to styled output.
pub type Attributes = HashMap<String, String>;

/// Bias magnitude used for range endpoints. Large enough that no realistic
/// point `side` value collides with it in a shared signed comparison key.
pub(crate) const BIG_BIAS: i32 = 2_000_000_000;

/// Describes a range decoration.
///
/// `inclusive_start` / `inclusive_end` control whether text inserted exactly
/// at an endpoint becomes part of the decorated range when mapping through
/// edits. Attributes, `tag_name`, and `collapsed` feed the merged-span
/// query; `line_attributes` is carried for line-level consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSpec {
    pub inclusive_start: bool,
    pub inclusive_end: bool,
    pub attributes: Option<Attributes>,
    pub line_attributes: Option<Attributes>,
    pub tag_name: Option<String>,
    pub collapsed: bool,
}

/// Describes a point decoration.
///
/// `side` orders coincident points and decides which side of an insertion at
/// the point's position it sticks to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointSpec {
    pub side: i32,
    pub line_attributes: Option<Attributes>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RangeDesc {
    pub spec: RangeSpec,
    pub bias: i32,
    pub end_bias: i32,
    pub affects_spans: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PointDesc {
    pub spec: PointSpec,
    pub bias: i32,
}

/// The per-kind descriptor distilled from a spec at construction time.
#[derive(Debug, PartialEq, Eq)]
pub enum DecorationDesc {
    Range(RangeDesc),
    Point(PointDesc),
}

impl DecorationDesc {
    fn range(spec: RangeSpec) -> Self {
        let bias = if spec.inclusive_start { -BIG_BIAS } else { BIG_BIAS };
        let end_bias = if spec.inclusive_end { BIG_BIAS } else { -BIG_BIAS };
        let affects_spans =
            spec.attributes.is_some() || spec.tag_name.is_some() || spec.collapsed;
        DecorationDesc::Range(RangeDesc {
            spec,
            bias,
            end_bias,
            affects_spans,
        })
    }

    fn point(spec: PointSpec) -> Self {
        let bias = spec.side;
        DecorationDesc::Point(PointDesc { spec, bias })
    }

    /// Ordering and stickiness bias of the start position.
    pub fn bias(&self) -> i32 {
        match self {
            DecorationDesc::Range(desc) => desc.bias,
            DecorationDesc::Point(desc) => desc.bias,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, DecorationDesc::Range(_))
    }

    /// Map an interval through a change list using this descriptor's
    /// endpoint biases. Returns `None` when a range collapses to an invalid
    /// interval; points always survive.
    pub(crate) fn map_interval(
        &self,
        changes: &[Change],
        from: usize,
        to: usize,
    ) -> Option<(usize, usize)> {
        match self {
            DecorationDesc::Range(desc) => {
                let new_from = map_pos(from, changes, desc.bias);
                let new_to = map_pos(to, changes, desc.end_bias);
                (new_from < new_to).then_some((new_from, new_to))
            },
            DecorationDesc::Point(desc) => {
                let pos = map_pos(from, changes, desc.bias);
                Some((pos, pos))
            },
        }
    }
}

/// An annotation on `[from, to)`, or at a single position when
/// `from == to`. Cloning is cheap; the descriptor is shared.
#[derive(Debug, Clone)]
pub struct Decoration {
    pub from: usize,
    pub to: usize,
    desc: Arc<DecorationDesc>,
}

impl Decoration {
    /// A range decoration over `[from, to)`. Empty ranges are rejected.
    pub fn range(from: usize, to: usize, spec: RangeSpec) -> Result<Self> {
        ensure!(from < to, InvalidRangeSnafu { from, to });
        Ok(Self {
            from,
            to,
            desc: Arc::new(DecorationDesc::range(spec)),
        })
    }

    /// A point decoration at `pos`.
    pub fn point(pos: usize, spec: PointSpec) -> Self {
        Self {
            from: pos,
            to: pos,
            desc: Arc::new(DecorationDesc::point(spec)),
        }
    }

    pub fn desc(&self) -> &DecorationDesc {
        &self.desc
    }

    /// The same decoration translated by `offset`.
    pub fn shift(&self, offset: isize) -> Self {
        Self {
            from: (self.from as isize + offset) as usize,
            to: (self.to as isize + offset) as usize,
            desc: Arc::clone(&self.desc),
        }
    }

    /// Remap this decoration through a change list. `None` when the mapped
    /// range collapses; edits that delete annotated text are expected.
    pub fn map(&self, changes: &[Change]) -> Option<Self> {
        let (from, to) = self.desc.map_interval(changes, self.from, self.to)?;
        Some(Self {
            from,
            to,
            desc: Arc::clone(&self.desc),
        })
    }

    pub(crate) fn same_desc(&self, other: &Decoration) -> bool {
        Arc::ptr_eq(&self.desc, &other.desc)
    }
}

impl PartialEq for Decoration {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && *self.desc == *other.desc
    }
}

impl Eq for Decoration {}

/// Sort key used throughout the tree: start position, ties broken by bias.
pub(crate) fn cmp_by_pos(a: &Decoration, b: &Decoration) -> Ordering {
    (a.from, a.desc().bias()).cmp(&(b.from, b.desc().bias()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;

    #[test]
    fn empty_range_rejected() {
        let err = Decoration::range(5, 5, RangeSpec::default()).unwrap_err();
        assert_eq!(err, DecorationError::InvalidRange { from: 5, to: 5 });
        assert!(Decoration::range(7, 3, RangeSpec::default()).is_err());
    }

    #[test]
    fn range_biases_follow_inclusive_flags() {
        let spec = RangeSpec {
            inclusive_start: true,
            inclusive_end: false,
            ..Default::default()
        };
        let deco = Decoration::range(0, 4, spec).unwrap();
        match deco.desc() {
            DecorationDesc::Range(desc) => {
                assert_eq!(desc.bias, -BIG_BIAS);
                assert_eq!(desc.end_bias, -BIG_BIAS);
                assert!(!desc.affects_spans);
            },
            _ => panic!("expected a range descriptor"),
        }
    }

    #[test]
    fn attributes_make_a_range_affect_spans() {
        let spec = RangeSpec {
            attributes: Some(Attributes::from([("class".into(), "x".into())])),
            ..Default::default()
        };
        let deco = Decoration::range(0, 1, spec).unwrap();
        match deco.desc() {
            DecorationDesc::Range(desc) => assert!(desc.affects_spans),
            _ => panic!("expected a range descriptor"),
        }
        let collapsed = Decoration::range(
            0,
            1,
            RangeSpec {
                collapsed: true,
                ..Default::default()
            },
        )
        .unwrap();
        match collapsed.desc() {
            DecorationDesc::Range(desc) => assert!(desc.affects_spans),
            _ => panic!("expected a range descriptor"),
        }
    }

    #[test]
    fn point_side_orders_before_range_endpoints() {
        let point = Decoration::point(3, PointSpec { side: 10, ..Default::default() });
        let exclusive_start = Decoration::range(3, 8, RangeSpec::default()).unwrap();
        let inclusive_start = Decoration::range(
            3,
            8,
            RangeSpec {
                inclusive_start: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cmp_by_pos(&inclusive_start, &point), Ordering::Less);
        assert_eq!(cmp_by_pos(&point, &exclusive_start), Ordering::Less);
    }

    #[test]
    fn shift_preserves_the_descriptor() {
        let deco = Decoration::range(2, 6, RangeSpec::default()).unwrap();
        let moved = deco.shift(10);
        assert_eq!((moved.from, moved.to), (12, 16));
        assert!(moved.same_desc(&deco));
        let back = moved.shift(-10);
        assert_eq!((back.from, back.to), (2, 6));
    }

    #[test]
    fn mapping_a_deleted_range_returns_none() {
        let deco = Decoration::range(5, 10, RangeSpec::default()).unwrap();
        assert_eq!(deco.map(&[Change::delete(4, 11)]), None);
    }

    #[test]
    fn mapping_a_point_always_survives() {
        let point = Decoration::point(5, PointSpec::default());
        let mapped = point.map(&[Change::delete(0, 20)]).unwrap();
        assert_eq!((mapped.from, mapped.to), (0, 0));
    }
}
