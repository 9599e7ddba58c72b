//! Persistent positional decoration index.
//!
//! Stores range and point annotations over a linear text buffer in an
//! immutable, structure-shared tree. Updates and remaps return new roots
//! that reuse unchanged branches, so an editor can keep styling, widgets,
//! and collapse information attached to text without rebuilding anything
//! per keystroke. The [`spans`] module flattens overlapping range
//! decorations into a renderer-ready list of styled segments.

pub mod change;
pub mod decoration;
pub mod iter;
mod map;
pub mod set;
pub mod spans;

pub use change::{map_pos, touches_range, Change};
pub use decoration::{
    Attributes, Decoration, DecorationDesc, DecorationError, PointDesc, PointSpec, RangeDesc,
    RangeSpec, Result,
};
pub use iter::{DecorationSetIterator, LocalSet};
pub use set::{DecorationFilter, DecorationSet};
pub use spans::{decorated_spans_in_range, DecoratedRange};
