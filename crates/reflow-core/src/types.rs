//! Core value types for size negotiation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a layout node.
///
/// Two nodes are the same logical layout unit iff their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl NodeId {
    /// Allocate a fresh id, never handed out before in this process.
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Version counter of a component tree.
///
/// Bumped whenever the tree's root or props change so that earlier results
/// can no longer be trusted without an explicit reuse assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Epoch(pub u64);

impl Epoch {
    pub const INITIAL: Epoch = Epoch(0);

    /// The epoch following this one.
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}

/// How a size spec bounds a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeMode {
    /// The dimension must equal the magnitude
    Exact,
    /// The dimension must not exceed the magnitude
    AtMost,
    /// The dimension is unconstrained
    #[default]
    Unspecified,
}

/// A one-dimensional size spec: a mode and a magnitude.
///
/// The magnitude of an `Unspecified` spec is always normalized to 0, so equality
/// and hashing only see meaningful magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "(SizeMode, u32)", into = "(SizeMode, u32)"))]
pub struct SizeSpec {
    mode: SizeMode,
    size: u32,
}

impl SizeSpec {
    pub const UNSPECIFIED: SizeSpec = SizeSpec {
        mode: SizeMode::Unspecified,
        size: 0,
    };

    pub const fn new(mode: SizeMode, size: u32) -> Self {
        match mode {
            SizeMode::Unspecified => Self::UNSPECIFIED,
            _ => Self { mode, size },
        }
    }

    pub const fn exact(size: u32) -> Self {
        Self::new(SizeMode::Exact, size)
    }

    pub const fn at_most(size: u32) -> Self {
        Self::new(SizeMode::AtMost, size)
    }

    pub const fn unspecified() -> Self {
        Self::UNSPECIFIED
    }

    pub fn mode(&self) -> SizeMode {
        self.mode
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// True unless the spec is `Unspecified`.
    pub fn is_concrete(&self) -> bool {
        self.mode != SizeMode::Unspecified
    }

    /// Check whether a measured value satisfies this spec.
    pub fn accepts(&self, value: u32) -> bool {
        match self.mode {
            SizeMode::Exact => value == self.size,
            SizeMode::AtMost => value <= self.size,
            SizeMode::Unspecified => true,
        }
    }

    /// Clamp a desired value into the range this spec allows.
    pub fn constrain(&self, value: u32) -> u32 {
        match self.mode {
            SizeMode::Exact => self.size,
            SizeMode::AtMost => value.min(self.size),
            SizeMode::Unspecified => value,
        }
    }

    /// Deduct a fixed amount (margins, padding) from the magnitude.
    pub fn shrink(&self, amount: u32) -> Self {
        Self::new(self.mode, self.size.saturating_sub(amount))
    }

    /// Check whether a value measured as `old_measured` under `old` is still
    /// valid under `new`, so the earlier measurement can be reused.
    pub fn is_compatible(old: SizeSpec, new: SizeSpec, old_measured: u32) -> bool {
        use SizeMode::*;

        if old == new {
            return true;
        }

        match (old.mode, new.mode) {
            (Unspecified, Unspecified) => true,
            (_, Exact) => new.size == old_measured,
            (Unspecified, AtMost) => old_measured <= new.size,
            (AtMost, AtMost) => new.size < old.size && old_measured <= new.size,
            _ => false,
        }
    }
}

impl From<(SizeMode, u32)> for SizeSpec {
    fn from((mode, size): (SizeMode, u32)) -> Self {
        Self::new(mode, size)
    }
}

impl From<SizeSpec> for (SizeMode, u32) {
    fn from(spec: SizeSpec) -> Self {
        (spec.mode, spec.size)
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            SizeMode::Exact => write!(f, "EXACT({})", self.size),
            SizeMode::AtMost => write!(f, "AT_MOST({})", self.size),
            SizeMode::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

/// A pair of size specs bounding how a node may be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeConstraint {
    pub width: SizeSpec,
    pub height: SizeSpec,
}

impl SizeConstraint {
    pub const fn new(width: SizeSpec, height: SizeSpec) -> Self {
        Self { width, height }
    }

    /// Exact width and height.
    pub const fn exact(width: u32, height: u32) -> Self {
        Self::new(SizeSpec::exact(width), SizeSpec::exact(height))
    }

    /// Upper bounds on width and height.
    pub const fn at_most(width: u32, height: u32) -> Self {
        Self::new(SizeSpec::at_most(width), SizeSpec::at_most(height))
    }

    /// No bounds at all.
    pub const fn unspecified() -> Self {
        Self::new(SizeSpec::UNSPECIFIED, SizeSpec::UNSPECIFIED)
    }

    /// Check whether a measured size satisfies both specs.
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        self.width.accepts(width) && self.height.accepts(height)
    }

    /// Clamp a desired size into this constraint.
    pub fn constrain(&self, width: u32, height: u32) -> (u32, u32) {
        (self.width.constrain(width), self.height.constrain(height))
    }

    /// True when both specs are concrete.
    pub fn is_concrete(&self) -> bool {
        self.is_concrete_for(Axes::BOTH)
    }

    /// True when every axis in `axes` has a concrete spec.
    pub fn is_concrete_for(&self, axes: Axes) -> bool {
        (!axes.width || self.width.is_concrete()) && (!axes.height || self.height.is_concrete())
    }

    /// Deduct horizontal and vertical amounts from the magnitudes.
    pub fn shrink(&self, horizontal: u32, vertical: u32) -> Self {
        Self::new(self.width.shrink(horizontal), self.height.shrink(vertical))
    }

    /// Check whether a size measured under `self` is still valid under `new`.
    pub fn is_compatible_with(&self, new: &SizeConstraint, measured: (u32, u32)) -> bool {
        SizeSpec::is_compatible(self.width, new.width, measured.0)
            && SizeSpec::is_compatible(self.height, new.height, measured.1)
    }

    /// True when either axis is exact.
    pub fn has_exact_axis(&self) -> bool {
        self.width.mode() == SizeMode::Exact || self.height.mode() == SizeMode::Exact
    }
}

impl fmt::Display for SizeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// The size a child asks for along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestedSize {
    /// An explicit magnitude
    Fixed(u32),
    /// As large as the parent allows
    Fill,
    /// Unbounded; sized by content
    #[default]
    Wrap,
}

/// Insets on all four sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edges {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Edges {
    /// Same inset on every side.
    pub const fn uniform(value: u32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    /// Horizontal and vertical insets.
    pub const fn symmetric(horizontal: u32, vertical: u32) -> Self {
        Self {
            top: vertical,
            right: horizontal,
            bottom: vertical,
            left: horizontal,
        }
    }

    /// Total horizontal inset.
    pub fn horizontal(&self) -> u32 {
        self.left.saturating_add(self.right)
    }

    /// Total vertical inset.
    pub fn vertical(&self) -> u32 {
        self.top.saturating_add(self.bottom)
    }
}

/// A set of dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Axes {
    pub width: bool,
    pub height: bool,
}

impl Axes {
    pub const BOTH: Axes = Axes { width: true, height: true };
    pub const WIDTH: Axes = Axes { width: true, height: false };
    pub const HEIGHT: Axes = Axes { width: false, height: true };
}

impl Default for Axes {
    fn default() -> Self {
        Self::BOTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unspecified_magnitude_is_normalized() {
        let a = SizeSpec::new(SizeMode::Unspecified, 40);
        let b = SizeSpec::unspecified();
        assert_eq!(a, b);
        assert_eq!(a.size(), 0);

        let mut set = HashSet::new();
        set.insert(SizeConstraint::new(a, SizeSpec::exact(10)));
        assert!(set.contains(&SizeConstraint::new(b, SizeSpec::exact(10))));
    }

    #[test]
    fn test_accepts() {
        assert!(SizeSpec::exact(100).accepts(100));
        assert!(!SizeSpec::exact(100).accepts(99));
        assert!(SizeSpec::at_most(100).accepts(0));
        assert!(SizeSpec::at_most(100).accepts(100));
        assert!(!SizeSpec::at_most(100).accepts(101));
        assert!(SizeSpec::unspecified().accepts(u32::MAX));
    }

    #[test]
    fn test_constrain() {
        assert_eq!(SizeSpec::exact(50).constrain(10), 50);
        assert_eq!(SizeSpec::at_most(50).constrain(80), 50);
        assert_eq!(SizeSpec::at_most(50).constrain(20), 20);
        assert_eq!(SizeSpec::unspecified().constrain(80), 80);
    }

    #[test]
    fn test_shrink_saturates() {
        assert_eq!(SizeSpec::exact(10).shrink(4), SizeSpec::exact(6));
        assert_eq!(SizeSpec::at_most(10).shrink(40), SizeSpec::at_most(0));
        assert_eq!(SizeSpec::unspecified().shrink(4), SizeSpec::unspecified());
    }

    #[test]
    fn test_compatibility_rules() {
        let exact = SizeSpec::exact;
        let at_most = SizeSpec::at_most;
        let unspecified = SizeSpec::unspecified();

        // Identical specs
        assert!(SizeSpec::is_compatible(at_most(100), at_most(100), 70));
        assert!(SizeSpec::is_compatible(unspecified, unspecified, 70));

        // New exact size matches the old measurement
        assert!(SizeSpec::is_compatible(at_most(100), exact(70), 70));
        assert!(!SizeSpec::is_compatible(at_most(100), exact(80), 70));

        // Unspecified before, still fits in the new bound
        assert!(SizeSpec::is_compatible(unspecified, at_most(80), 70));
        assert!(!SizeSpec::is_compatible(unspecified, at_most(60), 70));

        // Stricter bound that still holds the measurement
        assert!(SizeSpec::is_compatible(at_most(100), at_most(80), 70));
        assert!(!SizeSpec::is_compatible(at_most(100), at_most(60), 70));
        assert!(!SizeSpec::is_compatible(at_most(80), at_most(100), 70));

        // Exact before, anything else after
        assert!(!SizeSpec::is_compatible(exact(70), at_most(100), 70));
        assert!(!SizeSpec::is_compatible(exact(70), unspecified, 70));
    }

    #[test]
    fn test_constraint_concreteness() {
        let c = SizeConstraint::new(SizeSpec::exact(10), SizeSpec::unspecified());
        assert!(!c.is_concrete());
        assert!(c.is_concrete_for(Axes::WIDTH));
        assert!(!c.is_concrete_for(Axes::HEIGHT));
    }

    #[test]
    fn test_display() {
        let c = SizeConstraint::new(SizeSpec::exact(100), SizeSpec::at_most(40));
        assert_eq!(c.to_string(), "EXACT(100) x AT_MOST(40)");
        assert_eq!(SizeSpec::unspecified().to_string(), "UNSPECIFIED");
        assert_eq!(NodeId(7).to_string(), "#7");
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::next();
        let b = NodeId::next();
        assert_ne!(a, b);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_normalizes_unspecified() {
        let spec: SizeSpec = serde_json::from_str(r#"["Unspecified", 12]"#).unwrap();
        assert_eq!(spec, SizeSpec::unspecified());

        let json = serde_json::to_string(&SizeSpec::exact(5)).unwrap();
        assert_eq!(json, r#"["Exact",5]"#);
    }
}
