//! Host measurement functions.
//!
//! The resolver never measures anything itself. Each [`Node`] carries a
//! [`Measure`] implementation supplied by the host; any closure with the right
//! signature works. A few stock measure functions are provided for simple
//! content and for tests.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use glam::UVec2;
use reflow_core::{MeasureError, SizeConstraint};

use crate::node::Node;
use crate::result::{ChildLayout, Payload};

/// Measures a node under a constraint, given its already-resolved children.
pub trait Measure: Send + Sync {
    fn measure(
        &self,
        node: &Node,
        constraint: SizeConstraint,
        children: &[ChildLayout],
    ) -> Result<Measurement, MeasureError>;
}

impl<F> Measure for F
where
    F: Fn(&Node, SizeConstraint, &[ChildLayout]) -> Result<Measurement, MeasureError> + Send + Sync,
{
    fn measure(
        &self,
        node: &Node,
        constraint: SizeConstraint,
        children: &[ChildLayout],
    ) -> Result<Measurement, MeasureError> {
        self(node, constraint, children)
    }
}

/// Output of a measure function: a size and an opaque payload for mounting.
#[derive(Clone, Default)]
pub struct Measurement {
    pub width: u32,
    pub height: u32,
    pub payload: Option<Payload>,
}

impl Measurement {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            payload: None,
        }
    }

    /// Attach an opaque payload, handed to the mounter later.
    pub fn with_payload(mut self, payload: impl Any + Send + Sync) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

impl From<UVec2> for Measurement {
    fn from(size: UVec2) -> Self {
        Self::new(size.x, size.y)
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Content with an intrinsic size, clamped into the constraint.
pub fn fixed(width: u32, height: u32) -> impl Measure {
    move |_node: &Node,
          constraint: SizeConstraint,
          _children: &[ChildLayout]|
          -> Result<Measurement, MeasureError> {
        let (width, height) = constraint.constrain(width, height);
        Ok(Measurement::new(width, height))
    }
}

/// Take all the space the constraint offers; 0 along unspecified axes.
pub fn fill() -> impl Measure {
    |_node: &Node,
     constraint: SizeConstraint,
     _children: &[ChildLayout]|
     -> Result<Measurement, MeasureError> {
        let width = if constraint.width.is_concrete() { constraint.width.size() } else { 0 };
        let height = if constraint.height.is_concrete() { constraint.height.size() } else { 0 };
        Ok(Measurement::new(width, height))
    }
}

/// Stack children vertically: widest child by total height, plus padding.
///
/// Holders still waiting for a constraint count as empty.
pub fn column() -> impl Measure {
    |node: &Node,
     constraint: SizeConstraint,
     children: &[ChildLayout]|
     -> Result<Measurement, MeasureError> {
        let padding = node.style().padding;
        let (mut width, mut height) = (0u32, 0u32);
        for child in children {
            let (w, h) = child.size().unwrap_or((0, 0));
            width = width.max(w);
            height = height.saturating_add(h);
        }
        let (width, height) = constraint.constrain(
            width.saturating_add(padding.horizontal()),
            height.saturating_add(padding.vertical()),
        );
        Ok(Measurement::new(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::SizeSpec;

    fn sample_node() -> Node {
        Node::leaf(fill())
    }

    #[test]
    fn test_fixed_is_clamped() {
        let node = sample_node();
        let m = fixed(120, 30)
            .measure(&node, SizeConstraint::at_most(100, 100), &[])
            .unwrap();
        assert_eq!((m.width, m.height), (100, 30));

        let m = fixed(120, 30)
            .measure(&node, SizeConstraint::exact(50, 50), &[])
            .unwrap();
        assert_eq!((m.width, m.height), (50, 50));
    }

    #[test]
    fn test_fill_uses_concrete_magnitudes() {
        let node = sample_node();
        let constraint = SizeConstraint::new(SizeSpec::at_most(80), SizeSpec::unspecified());
        let m = fill().measure(&node, constraint, &[]).unwrap();
        assert_eq!(m.size(), UVec2::new(80, 0));
    }

    #[test]
    fn test_payload_downcasts() {
        let m = Measurement::new(1, 2).with_payload(String::from("glyphs"));
        let payload = m.payload.unwrap();
        assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("glyphs"));
    }
}
