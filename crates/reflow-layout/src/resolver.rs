//! Recursive resolution of a node tree into a layout result tree.
//!
//! Each node is dispatched on its [`MeasurementPolicy`]:
//!
//! - `CannotMeasure` nodes are measured directly.
//! - `CanMeasure` nodes resolve their children first, then are measured with
//!   the resolved children.
//! - `DeferredSizeSpec` nodes get a [`Holder`] immediately. The holder is
//!   filled as soon as a constraint that is concrete on the node's axes is
//!   known, either while deriving the child constraint or after the parent
//!   itself has been measured.
//!
//! Every measurement goes through the [`ResolutionCache`], so repeated and
//! concurrent resolutions of the same key compute once.

use std::sync::Arc;

use tracing::{debug, trace};

use reflow_core::{Epoch, LayoutError, NodeId, SizeConstraint};

use crate::cache::ResolutionCache;
use crate::node::{MeasurementPolicy, Node, NodeTree};
use crate::result::{ChildLayout, Holder, LayoutResult};
use crate::sizing::{child_constraint, content_constraint};

/// Supplies the epoch of a pass and the per-node reuse assertion.
///
/// `inputs_unchanged` is trusted as-is: a `true` answer lets results from an
/// older epoch be served without remeasuring.
pub trait EpochSource: Send + Sync {
    fn epoch(&self) -> Epoch;

    fn inputs_unchanged(&self, node: NodeId) -> bool;
}

/// An epoch with the same reuse answer for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedEpoch {
    pub epoch: Epoch,
    pub inputs_unchanged: bool,
}

impl FixedEpoch {
    /// Nothing from an older epoch may be reused.
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            inputs_unchanged: false,
        }
    }

    /// Every node is asserted unchanged since its last measurement.
    pub fn unchanged(epoch: Epoch) -> Self {
        Self {
            epoch,
            inputs_unchanged: true,
        }
    }
}

impl EpochSource for FixedEpoch {
    fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn inputs_unchanged(&self, _node: NodeId) -> bool {
        self.inputs_unchanged
    }
}

/// Resolver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResolverOptions {
    /// Deepest nesting resolved before failing
    pub max_depth: usize,
    /// Fill holders still waiting for a constraint from the parent's measured size
    pub resolve_deferred_after_measure: bool,
    /// Substitute a compatible cached result for a deferred node
    pub allow_remeasure: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_depth: 256,
            resolve_deferred_after_measure: true,
            allow_remeasure: true,
        }
    }
}

/// Resolves nodes of one tree at one epoch.
pub struct Resolver<'a> {
    tree: &'a NodeTree,
    cache: &'a ResolutionCache,
    inputs: &'a dyn EpochSource,
    options: ResolverOptions,
    epoch: Epoch,
}

impl<'a> Resolver<'a> {
    pub fn new(
        tree: &'a NodeTree,
        cache: &'a ResolutionCache,
        inputs: &'a dyn EpochSource,
    ) -> Self {
        Self::with_options(tree, cache, inputs, ResolverOptions::default())
    }

    pub fn with_options(
        tree: &'a NodeTree,
        cache: &'a ResolutionCache,
        inputs: &'a dyn EpochSource,
        options: ResolverOptions,
    ) -> Self {
        Self {
            tree,
            cache,
            inputs,
            options,
            epoch: inputs.epoch(),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolve `node` and its subtree under `constraint`.
    pub fn resolve(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        debug!(node = %node, %constraint, epoch = %self.epoch, "resolving layout");
        self.resolve_at(node, constraint, 0)
    }

    /// Resolve the tree's root.
    pub fn resolve_root(
        &self,
        constraint: SizeConstraint,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        self.resolve(self.tree.root(), constraint)
    }

    /// Fill a holder once its concrete constraint is known.
    ///
    /// A holder that is already resolved returns its result if that result is
    /// valid under `constraint`, and fails with
    /// [`LayoutError::HolderConflict`] otherwise.
    pub fn resolve_holder(
        &self,
        holder: &Holder,
        constraint: SizeConstraint,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        self.fill_holder(holder, constraint, 0)
    }

    fn resolve_at(
        &self,
        id: NodeId,
        constraint: SizeConstraint,
        depth: usize,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        self.check_depth(depth)?;
        let node = self.tree.node(id)?;
        let unchanged = self.inputs.inputs_unchanged(id);

        match node.policy() {
            MeasurementPolicy::CannotMeasure => {
                self.cache
                    .get_or_compute(id, constraint, self.epoch, unchanged, || {
                        self.measure_leaf(node, constraint)
                    })
            }
            MeasurementPolicy::CanMeasure => {
                self.cache
                    .get_or_compute(id, constraint, self.epoch, unchanged, || {
                        self.measure_container(node, constraint, depth)
                    })
            }
            MeasurementPolicy::DeferredSizeSpec(axes) => {
                if !constraint.is_concrete_for(axes) {
                    return Err(LayoutError::DeferredWithoutConstraint { node: id, constraint });
                }
                let holder = Holder::new(id, axes);
                self.fill_holder(&holder, constraint, depth)
            }
        }
    }

    fn resolve_child(
        &self,
        child: &Node,
        constraint: SizeConstraint,
        depth: usize,
    ) -> Result<ChildLayout, LayoutError> {
        match child.policy() {
            MeasurementPolicy::DeferredSizeSpec(axes) => {
                let holder = Arc::new(Holder::new(child.id(), axes));
                if constraint.is_concrete_for(axes) {
                    self.fill_holder(&holder, constraint, depth)?;
                }
                Ok(ChildLayout::Deferred(holder))
            }
            _ => self
                .resolve_at(child.id(), constraint, depth)
                .map(ChildLayout::Resolved),
        }
    }

    fn fill_holder(
        &self,
        holder: &Holder,
        constraint: SizeConstraint,
        depth: usize,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        self.check_depth(depth)?;
        let id = holder.node();

        if let Some(result) = holder.result() {
            let resolved = holder.constraint().unwrap_or(result.constraint());
            let measured = (result.width(), result.height());
            if resolved == constraint || resolved.is_compatible_with(&constraint, measured) {
                return Ok(result);
            }
            return Err(LayoutError::HolderConflict {
                node: id,
                resolved,
                requested: constraint,
            });
        }

        let node = self.tree.node(id)?;
        if !constraint.is_concrete_for(holder.axes()) {
            return Err(LayoutError::DeferredWithoutConstraint { node: id, constraint });
        }
        holder.constraint_known(constraint);

        let unchanged = self.inputs.inputs_unchanged(id);
        if self.options.allow_remeasure {
            let compatible = self
                .cache
                .find_compatible(id, constraint, self.epoch, unchanged);
            if let Some((result, outcome)) = compatible {
                return Ok(holder.complete(constraint, result, outcome));
            }
        }

        holder.begin_resolving(constraint);
        let resolved = self
            .cache
            .lookup_or_compute(id, constraint, self.epoch, unchanged, || {
                self.measure_container(node, constraint, depth)
            });

        match resolved {
            Ok((result, outcome)) => Ok(holder.complete(constraint, result, outcome)),
            Err(err) => {
                holder.fail(constraint);
                Err(err)
            }
        }
    }

    fn measure_leaf(
        &self,
        node: &Node,
        constraint: SizeConstraint,
    ) -> Result<LayoutResult, LayoutError> {
        trace!(node = %node.id(), %constraint, "measuring leaf");
        let measurement = node
            .measure(constraint, &[])
            .map_err(|source| LayoutError::MeasurementFailed {
                node: node.id(),
                constraint,
                source,
            })?;
        Ok(LayoutResult::new(node.id(), constraint, measurement, Vec::new(), self.epoch))
    }

    /// Resolve every child, measure `node` with them, then fill any holder
    /// left waiting using the measured size.
    ///
    /// A failing child does not stop its siblings from resolving; the first
    /// failure is reported once all of them have been tried.
    fn measure_container(
        &self,
        node: &Node,
        constraint: SizeConstraint,
        depth: usize,
    ) -> Result<LayoutResult, LayoutError> {
        let id = node.id();
        let available = content_constraint(constraint, node.style());

        let mut children = Vec::with_capacity(node.children().len());
        let mut first_error = None;
        for child in self.tree.children(id) {
            let derived = child_constraint(available, child.style());
            match self.resolve_child(child, derived, depth + 1) {
                Ok(layout) => children.push(layout),
                Err(err) => {
                    debug!(
                        node = %id,
                        child = %child.id(),
                        error = %err,
                        "child failed to resolve"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        trace!(node = %id, %constraint, children = children.len(), "measuring container");
        let measurement = node
            .measure(constraint, &children)
            .map_err(|source| LayoutError::MeasurementFailed {
                node: id,
                constraint,
                source,
            })?;

        if self.options.resolve_deferred_after_measure {
            let measured = content_constraint(
                SizeConstraint::exact(measurement.width, measurement.height),
                node.style(),
            );
            for holder in children.iter().filter_map(ChildLayout::holder) {
                if holder.is_resolved() {
                    continue;
                }
                let style = self.tree.node(holder.node())?.style();
                self.fill_holder(holder, child_constraint(measured, style), depth + 1)?;
            }
        }

        Ok(LayoutResult::new(id, constraint, measurement, children, self.epoch))
    }

    fn check_depth(&self, depth: usize) -> Result<(), LayoutError> {
        if depth > self.options.max_depth {
            return Err(LayoutError::MaxDepthExceeded { depth });
        }
        Ok(())
    }
}
