//! Node arena.
//!
//! A [`NodeTree`] is a flat, insertion-ordered arena of [`Node`]s addressed by
//! [`NodeId`]. Parent and child relationships are id lookups into the arena,
//! never owning back-pointers. Children can only be attached through a
//! [`NodeTreeBuilder`]; once frozen the tree is immutable and can be shared
//! freely between threads.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use reflow_core::{Axes, Edges, LayoutError, MeasureError, NodeId, RequestedSize, SizeConstraint};

use crate::measure::{Measure, Measurement};
use crate::result::{ChildLayout, LayoutResult};

/// How the resolver treats a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeasurementPolicy {
    /// Measured directly; size is intrinsic (leaf content)
    CannotMeasure,
    /// Children are resolved first, then the node is measured with them
    CanMeasure,
    /// Resolution waits until the given axes have concrete specs
    DeferredSizeSpec(Axes),
}

impl MeasurementPolicy {
    /// Deferred until both width and height are concrete.
    pub const fn deferred() -> Self {
        MeasurementPolicy::DeferredSizeSpec(Axes::BOTH)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, MeasurementPolicy::DeferredSizeSpec(_))
    }
}

/// Static style attributes used to derive a node's constraint from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Style {
    /// Requested width
    pub width: RequestedSize,
    /// Requested height
    pub height: RequestedSize,
    /// Space outside the node, deducted from the parent's magnitude
    pub margin: Edges,
    /// Space inside the node, deducted before deriving children's constraints
    pub padding: Edges,
}

impl Style {
    /// Request an explicit size.
    pub fn fixed(width: u32, height: u32) -> Self {
        Self {
            width: RequestedSize::Fixed(width),
            height: RequestedSize::Fixed(height),
            ..Default::default()
        }
    }

    /// Request as much space as the parent allows.
    pub fn fill() -> Self {
        Self {
            width: RequestedSize::Fill,
            height: RequestedSize::Fill,
            ..Default::default()
        }
    }

    pub fn with_margin(mut self, margin: Edges) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_padding(mut self, padding: Edges) -> Self {
        self.padding = padding;
        self
    }
}

/// One layout unit: identity, measurement policy, style and measure function.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    name: Option<String>,
    policy: MeasurementPolicy,
    style: Style,
    measure: Arc<dyn Measure>,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
}

impl Node {
    /// Create a node with a fresh identity.
    pub fn new(policy: MeasurementPolicy, measure: impl Measure + 'static) -> Self {
        Self {
            id: NodeId::next(),
            name: None,
            policy,
            style: Style::default(),
            measure: Arc::new(measure),
            parent: None,
            children: SmallVec::new(),
        }
    }

    /// A node measured directly from its constraint.
    pub fn leaf(measure: impl Measure + 'static) -> Self {
        Self::new(MeasurementPolicy::CannotMeasure, measure)
    }

    /// A node measured after its children.
    pub fn container(measure: impl Measure + 'static) -> Self {
        Self::new(MeasurementPolicy::CanMeasure, measure)
    }

    /// A node whose resolution waits for a concrete constraint.
    pub fn deferred(measure: impl Measure + 'static) -> Self {
        Self::new(MeasurementPolicy::deferred(), measure)
    }

    /// Reuse an existing identity, e.g. when rebuilding a tree with new props.
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn policy(&self) -> MeasurementPolicy {
        self.policy
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Invoke the host measurement function.
    pub fn measure(
        &self,
        constraint: SizeConstraint,
        children: &[ChildLayout],
    ) -> Result<Measurement, MeasureError> {
        self.measure.measure(self, constraint, children)
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("style", &self.style)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// A frozen tree of nodes.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: IndexMap<NodeId, Node>,
    root: NodeId,
}

impl NodeTree {
    /// Start building a tree around `root`.
    pub fn builder(root: Node) -> NodeTreeBuilder {
        NodeTreeBuilder::new(root)
    }

    /// A tree holding a single node.
    pub fn single(root: Node) -> Self {
        NodeTreeBuilder::new(root).freeze()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node by ID.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a node by ID, failing with [`LayoutError::UnknownNode`].
    pub fn node(&self, id: NodeId) -> Result<&Node, LayoutError> {
        self.nodes.get(&id).ok_or(LayoutError::UnknownNode { node: id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Arena index of a node (insertion order).
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get_index_of(&id)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get children of a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter_map(|child_id| self.nodes.get(child_id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Ids of every ancestor of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&current| self.parent(current))
    }

    /// Render a resolved tree as indented text, one node per line.
    ///
    /// Nodes are labelled by name (or id) followed by their constraint and
    /// resolved size. Holders still waiting for a constraint print as pending.
    pub fn describe(&self, result: &LayoutResult) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, result, 0);
        out
    }

    fn describe_into(&self, out: &mut String, result: &LayoutResult, depth: usize) {
        let _ = writeln!(
            out,
            "{:indent$}{} [{}] {}x{}",
            "",
            self.label(result.node()),
            result.constraint(),
            result.width(),
            result.height(),
            indent = depth * 2
        );

        for child in result.children() {
            match child.layout() {
                Some(layout) => self.describe_into(out, &layout, depth + 1),
                None => {
                    let _ = writeln!(
                        out,
                        "{:indent$}{} (pending)",
                        "",
                        self.label(child.node()),
                        indent = (depth + 1) * 2
                    );
                }
            }
        }
    }

    fn label(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map(Node::label)
            .unwrap_or_else(|| id.to_string())
    }
}

/// Builds a [`NodeTree`]. Children can only be appended here, before freezing.
#[derive(Debug)]
pub struct NodeTreeBuilder {
    nodes: IndexMap<NodeId, Node>,
    root: NodeId,
}

impl NodeTreeBuilder {
    pub fn new(mut root: Node) -> Self {
        root.parent = None;
        root.children.clear();

        let id = root.id;
        let mut nodes = IndexMap::new();
        nodes.insert(id, root);
        Self { nodes, root: id }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Append `node` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId, LayoutError> {
        let id = node.id;
        if self.nodes.contains_key(&id) {
            return Err(LayoutError::DuplicateNode { node: id });
        }

        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(LayoutError::UnknownNode { node: parent })?;
        parent_node.children.push(id);

        node.parent = Some(parent);
        node.children.clear();
        self.nodes.insert(id, node);

        Ok(id)
    }

    /// Freeze the tree. No further children can be added.
    pub fn freeze(self) -> NodeTree {
        NodeTree {
            nodes: self.nodes,
            root: self.root,
        }
    }
}
