//! Component tree: owns a node tree, its epoch and its resolution cache.
//!
//! Layout passes may run concurrently from several threads. Each pass takes a
//! snapshot of the current tree and epoch and resolves against the shared
//! cache, so a pass started before an [`update`](ComponentTree::update) keeps
//! working on the tree it started with while passes at the new epoch never
//! observe its results unless the reuse rules allow it.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use reflow_core::{Epoch, LayoutError, NodeId, SizeConstraint};

use crate::cache::ResolutionCache;
use crate::node::NodeTree;
use crate::resolver::{EpochSource, Resolver, ResolverOptions};
use crate::result::LayoutResult;

#[derive(Debug)]
struct TreeState {
    nodes: Arc<NodeTree>,
    epoch: Epoch,
    /// Nodes whose inputs changed in the current epoch, ancestors included
    changed: Arc<FxHashSet<NodeId>>,
    root_constraint: Option<SizeConstraint>,
    torn_down: bool,
}

/// Reuse answers for one pass: everything outside `changed` is unchanged.
struct PassInputs {
    epoch: Epoch,
    changed: Arc<FxHashSet<NodeId>>,
}

impl EpochSource for PassInputs {
    fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn inputs_unchanged(&self, node: NodeId) -> bool {
        !self.changed.contains(&node)
    }
}

/// A tree of nodes laid out over successive epochs.
#[derive(Debug)]
pub struct ComponentTree {
    state: RwLock<TreeState>,
    cache: Arc<ResolutionCache>,
    options: ResolverOptions,
}

impl ComponentTree {
    pub fn new(nodes: NodeTree) -> Self {
        Self::with_options(nodes, ResolverOptions::default())
    }

    pub fn with_options(nodes: NodeTree, options: ResolverOptions) -> Self {
        Self::with_cache(nodes, Arc::new(ResolutionCache::new()), options)
    }

    /// Build a tree around a cache supplied by the host.
    pub fn with_cache(
        nodes: NodeTree,
        cache: Arc<ResolutionCache>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            state: RwLock::new(TreeState {
                nodes: Arc::new(nodes),
                epoch: Epoch::INITIAL,
                changed: Arc::default(),
                root_constraint: None,
                torn_down: false,
            }),
            cache,
            options,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.state.read().epoch
    }

    /// Snapshot of the current node tree.
    pub fn nodes(&self) -> Arc<NodeTree> {
        Arc::clone(&self.state.read().nodes)
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.read().torn_down
    }

    /// Lay out the whole tree under `constraint` at the current epoch.
    ///
    /// When the root constraint differs from the previous pass, every cached
    /// layout in the tree measured under an exact size incompatible with the
    /// new constraint is evicted first.
    pub fn calculate_layout(
        &self,
        constraint: SizeConstraint,
    ) -> Result<Arc<LayoutResult>, LayoutError> {
        let (nodes, inputs) = {
            let mut state = self.state.write();
            if state.torn_down {
                return Err(LayoutError::TornDown);
            }
            if state.root_constraint != Some(constraint) {
                if state.root_constraint.is_some() {
                    let evicted: usize = state
                        .nodes
                        .iter()
                        .map(|node| self.cache.invalidate_incompatible(node.id(), constraint))
                        .sum();
                    debug!(%constraint, evicted, "root constraint changed");
                }
                state.root_constraint = Some(constraint);
            }
            let inputs = PassInputs {
                epoch: state.epoch,
                changed: Arc::clone(&state.changed),
            };
            (Arc::clone(&state.nodes), inputs)
        };

        let resolver = Resolver::with_options(&nodes, &self.cache, &inputs, self.options);
        resolver.resolve_root(constraint)
    }

    /// Replace the node tree and start a new epoch.
    ///
    /// `changed` names the nodes whose measurement inputs changed. Nodes that
    /// are new or whose children differ are detected here. Every changed node
    /// and its ancestors lose their cached layouts; so do removed nodes. A new
    /// root identity drops the whole cache. Passes still running at an older
    /// epoch cannot store layouts for any of those nodes afterwards.
    pub fn update(
        &self,
        nodes: NodeTree,
        changed: impl IntoIterator<Item = NodeId>,
    ) -> Result<Epoch, LayoutError> {
        let mut state = self.state.write();
        if state.torn_down {
            return Err(LayoutError::TornDown);
        }

        let previous = Arc::clone(&state.nodes);
        let mut marked = FxHashSet::default();

        for id in changed {
            if nodes.contains(id) {
                marked.insert(id);
            } else {
                trace!(node = %id, "ignoring change for node outside the tree");
            }
        }
        for node in nodes.iter() {
            let structural = match previous.get(node.id()) {
                Some(old) => old.children() != node.children(),
                None => true,
            };
            if structural {
                marked.insert(node.id());
            }
        }

        let mut with_ancestors = marked.clone();
        for &id in &marked {
            with_ancestors.extend(nodes.ancestors(id));
        }

        let epoch = state.epoch.next();
        if nodes.root() != previous.root() {
            self.cache.invalidate_all_before(epoch);
        } else {
            for node in previous.iter().filter(|node| !nodes.contains(node.id())) {
                self.cache.invalidate_before(node.id(), epoch);
            }
            for &id in &with_ancestors {
                self.cache.invalidate_before(id, epoch);
            }
        }

        state.epoch = epoch;
        state.nodes = Arc::new(nodes);
        state.changed = Arc::new(with_ancestors);
        debug!(epoch = %state.epoch, changed = state.changed.len(), "component tree updated");

        Ok(state.epoch)
    }

    /// Drop every cached layout. Later passes and updates fail with
    /// [`LayoutError::TornDown`].
    pub fn teardown(&self) {
        let mut state = self.state.write();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        let evicted = self.cache.invalidate_all_before(state.epoch.next());
        debug!(evicted, "component tree torn down");
    }
}
