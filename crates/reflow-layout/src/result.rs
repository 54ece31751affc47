//! Resolved layout output and deferred-subtree holders.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use glam::UVec2;
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use reflow_core::{Axes, ConstraintViolation, Epoch, NodeId, SizeConstraint};

use crate::cache::CacheOutcome;
use crate::measure::Measurement;

/// Opaque measurement payload, consumed by the mounter.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The measured output of a node under a size constraint.
///
/// Results are immutable and shared: the cache keeps one reference, and every
/// pass that resolves the same key holds another.
#[derive(Clone)]
pub struct LayoutResult {
    node: NodeId,
    constraint: SizeConstraint,
    width: u32,
    height: u32,
    children: Vec<ChildLayout>,
    payload: Option<Payload>,
    epoch: Epoch,
}

impl LayoutResult {
    pub fn new(
        node: NodeId,
        constraint: SizeConstraint,
        measurement: Measurement,
        children: Vec<ChildLayout>,
        epoch: Epoch,
    ) -> Self {
        Self {
            node,
            constraint,
            width: measurement.width,
            height: measurement.height,
            children,
            payload: measurement.payload,
            epoch,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The constraint this result was computed under.
    pub fn constraint(&self) -> SizeConstraint {
        self.constraint
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Child results, aligned positionally with the node's children.
    pub fn children(&self) -> &[ChildLayout] {
        &self.children
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Downcast the payload to a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref()
    }

    /// The epoch of the pass that computed this result.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn satisfies_constraint(&self) -> bool {
        self.constraint.accepts(self.width, self.height)
    }

    pub fn violation(&self) -> Option<ConstraintViolation> {
        (!self.satisfies_constraint()).then(|| ConstraintViolation {
            node: self.node,
            constraint: self.constraint,
            width: self.width,
            height: self.height,
        })
    }

    /// Holders anywhere below this result that still wait for a constraint.
    pub fn pending_holders(&self) -> Vec<Arc<Holder>> {
        let mut pending = Vec::new();
        self.collect_pending(&mut pending);
        pending
    }

    fn collect_pending(&self, pending: &mut Vec<Arc<Holder>>) {
        for child in &self.children {
            match child {
                ChildLayout::Resolved(result) => result.collect_pending(pending),
                ChildLayout::Deferred(holder) => match holder.result() {
                    Some(result) => result.collect_pending(pending),
                    None => pending.push(Arc::clone(holder)),
                },
            }
        }
    }
}

/// Structural equality: node, constraint, size and children. Payloads are
/// opaque and ignored.
impl PartialEq for LayoutResult {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
            && self.constraint == other.constraint
            && self.width == other.width
            && self.height == other.height
            && self.children == other.children
    }
}

impl fmt::Debug for LayoutResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutResult")
            .field("node", &self.node)
            .field("constraint", &self.constraint)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("children", &self.children)
            .field("has_payload", &self.payload.is_some())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// A child slot in a parent's result.
#[derive(Debug, Clone)]
pub enum ChildLayout {
    /// Resolved immediately
    Resolved(Arc<LayoutResult>),
    /// A deferred subtree, possibly still waiting for its constraint
    Deferred(Arc<Holder>),
}

impl ChildLayout {
    pub fn node(&self) -> NodeId {
        match self {
            ChildLayout::Resolved(result) => result.node(),
            ChildLayout::Deferred(holder) => holder.node(),
        }
    }

    /// The resolved layout, if there is one yet.
    pub fn layout(&self) -> Option<Arc<LayoutResult>> {
        match self {
            ChildLayout::Resolved(result) => Some(Arc::clone(result)),
            ChildLayout::Deferred(holder) => holder.result(),
        }
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.layout().map(|r| (r.width(), r.height()))
    }

    pub fn holder(&self) -> Option<&Arc<Holder>> {
        match self {
            ChildLayout::Deferred(holder) => Some(holder),
            ChildLayout::Resolved(_) => None,
        }
    }
}

impl PartialEq for ChildLayout {
    fn eq(&self, other: &Self) -> bool {
        self.node() == other.node() && self.layout() == other.layout()
    }
}

/// Where a holder is in its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderPhase {
    Created,
    ConstraintKnown,
    Resolving,
    Resolved,
}

#[derive(Debug, Clone)]
enum HolderState {
    Created,
    ConstraintKnown(SizeConstraint),
    Resolving(SizeConstraint),
    Resolved {
        constraint: SizeConstraint,
        result: Arc<LayoutResult>,
        outcome: CacheOutcome,
    },
}

impl HolderState {
    fn phase(&self) -> HolderPhase {
        match self {
            HolderState::Created => HolderPhase::Created,
            HolderState::ConstraintKnown(_) => HolderPhase::ConstraintKnown,
            HolderState::Resolving(_) => HolderPhase::Resolving,
            HolderState::Resolved { .. } => HolderPhase::Resolved,
        }
    }
}

#[derive(Debug)]
struct HolderCell {
    state: HolderState,
    /// Phases entered so far, oldest first, without repeats in a row
    phases: SmallVec<[HolderPhase; 4]>,
}

impl HolderCell {
    fn enter(&mut self, state: HolderState) {
        let phase = state.phase();
        if self.phases.last() != Some(&phase) {
            self.phases.push(phase);
        }
        self.state = state;
    }
}

/// Placeholder standing in for a deferred subtree.
///
/// Created as soon as the parent reaches the deferred child; filled once a
/// concrete constraint is known. `Resolved` is terminal.
#[derive(Debug)]
pub struct Holder {
    node: NodeId,
    axes: Axes,
    cell: Mutex<HolderCell>,
}

impl Holder {
    pub fn new(node: NodeId, axes: Axes) -> Self {
        trace!(node = %node, "holder created");
        Self {
            node,
            axes,
            cell: Mutex::new(HolderCell {
                state: HolderState::Created,
                phases: smallvec![HolderPhase::Created],
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Axes that must be concrete before the subtree can resolve.
    pub fn axes(&self) -> Axes {
        self.axes
    }

    pub fn phase(&self) -> HolderPhase {
        self.cell.lock().state.phase()
    }

    /// Every phase this holder has been in, in order.
    pub fn phases(&self) -> Vec<HolderPhase> {
        self.cell.lock().phases.to_vec()
    }

    /// The concrete constraint, once known.
    pub fn constraint(&self) -> Option<SizeConstraint> {
        match &self.cell.lock().state {
            HolderState::Created => None,
            HolderState::ConstraintKnown(c) | HolderState::Resolving(c) => Some(*c),
            HolderState::Resolved { constraint, .. } => Some(*constraint),
        }
    }

    pub fn result(&self) -> Option<Arc<LayoutResult>> {
        match &self.cell.lock().state {
            HolderState::Resolved { result, .. } => Some(Arc::clone(result)),
            _ => None,
        }
    }

    /// How the resolved result was obtained.
    pub fn outcome(&self) -> Option<CacheOutcome> {
        match &self.cell.lock().state {
            HolderState::Resolved { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.phase() == HolderPhase::Resolved
    }

    pub(crate) fn constraint_known(&self, constraint: SizeConstraint) {
        let mut cell = self.cell.lock();
        if !matches!(cell.state, HolderState::Resolved { .. }) {
            trace!(node = %self.node, %constraint, "holder constraint known");
            cell.enter(HolderState::ConstraintKnown(constraint));
        }
    }

    pub(crate) fn begin_resolving(&self, constraint: SizeConstraint) {
        let mut cell = self.cell.lock();
        if !matches!(cell.state, HolderState::Resolved { .. }) {
            cell.enter(HolderState::Resolving(constraint));
        }
    }

    /// Fall back to `ConstraintKnown` after a failed resolution.
    pub(crate) fn fail(&self, constraint: SizeConstraint) {
        let mut cell = self.cell.lock();
        if matches!(cell.state, HolderState::Resolving(_)) {
            cell.enter(HolderState::ConstraintKnown(constraint));
        }
    }

    /// Store the result. The first completion wins; later ones get it back.
    pub(crate) fn complete(
        &self,
        constraint: SizeConstraint,
        result: Arc<LayoutResult>,
        outcome: CacheOutcome,
    ) -> Arc<LayoutResult> {
        let mut cell = self.cell.lock();
        if let HolderState::Resolved { result, .. } = &cell.state {
            return Arc::clone(result);
        }

        trace!(node = %self.node, %constraint, ?outcome, "holder resolved");
        cell.enter(HolderState::Resolved {
            constraint,
            result: Arc::clone(&result),
            outcome,
        });
        result
    }
}
