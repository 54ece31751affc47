//! Size-constrained layout resolution for reflow.
//!
//! This crate turns a tree of nodes into a tree of measured layout results,
//! memoizing every measurement by node and size constraint.
//!
//! # Architecture
//!
//! 1. **Sizing**: derives each child's size constraint from its parent's
//! 2. **Resolver**: walks the tree, measuring leaves directly, containers after
//!    their children, and deferred subtrees once a concrete constraint is known
//! 3. **Resolution cache**: stores results per `(node, constraint)` and makes
//!    concurrent passes share a single computation per key and epoch
//! 4. **Component tree**: owns a cache and advances the epoch on updates
//!
//! # Example
//!
//! ```ignore
//! use reflow_layout::{measure, ComponentTree, Node, NodeTree, SizeConstraint};
//!
//! let mut builder = NodeTree::builder(Node::container(measure::column()));
//! let root = builder.root();
//! builder.add_child(root, Node::leaf(measure::fixed(40, 20)))?;
//!
//! let tree = ComponentTree::new(builder.freeze());
//! let layout = tree.calculate_layout(SizeConstraint::at_most(320, 480))?;
//! println!("{}", tree.nodes().describe(&layout));
//! ```

pub mod measure;

mod cache;
mod component;
mod node;
mod resolver;
mod result;
mod sizing;

pub use cache::{CacheKey, CacheOutcome, CacheStats, EntryState, ResolutionCache};
pub use component::ComponentTree;
pub use measure::{Measure, Measurement};
pub use node::{MeasurementPolicy, Node, NodeTree, NodeTreeBuilder, Style};
pub use resolver::{EpochSource, FixedEpoch, Resolver, ResolverOptions};
pub use result::{ChildLayout, Holder, HolderPhase, LayoutResult, Payload};
pub use sizing::{child_constraint, child_spec, content_constraint};

pub use reflow_core::{
    Axes, ConstraintViolation, Edges, Epoch, LayoutError, MeasureError, NodeId, RequestedSize,
    SizeConstraint, SizeMode, SizeSpec,
};
