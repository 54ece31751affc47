//! Size constraint arithmetic: deriving a child's constraint from its parent.

use reflow_core::{RequestedSize, SizeConstraint, SizeMode, SizeSpec};

use crate::node::Style;

/// Derive a child's spec along one axis.
///
/// An explicit request always wins. Otherwise an unspecified parent stays
/// unspecified, a wrapping child is bounded by the parent's magnitude, and a
/// filling child inherits the parent's mode.
pub fn child_spec(parent: SizeSpec, requested: RequestedSize) -> SizeSpec {
    match (requested, parent.mode()) {
        (RequestedSize::Fixed(size), _) => SizeSpec::exact(size),
        (_, SizeMode::Unspecified) => SizeSpec::unspecified(),
        (RequestedSize::Wrap, _) => SizeSpec::at_most(parent.size()),
        (RequestedSize::Fill, mode) => SizeSpec::new(mode, parent.size()),
    }
}

/// Derive a child's constraint from the space its parent offers.
///
/// `available` is the parent's constraint with the parent's padding already
/// removed; the child's own margins are deducted here.
pub fn child_constraint(available: SizeConstraint, style: &Style) -> SizeConstraint {
    let available = available.shrink(style.margin.horizontal(), style.margin.vertical());
    SizeConstraint::new(
        child_spec(available.width, style.width),
        child_spec(available.height, style.height),
    )
}

/// The space a node offers its children: its constraint minus padding.
pub fn content_constraint(constraint: SizeConstraint, style: &Style) -> SizeConstraint {
    constraint.shrink(style.padding.horizontal(), style.padding.vertical())
}
