//! Control-flow graph construction for flow-sensitive analysis.
//!
//! The crate builds one control-flow graph per executable declaration
//! (function, closure, property initializer, init block, default argument)
//! while an external driver traverses the declaration tree, calling paired
//! `enter_*`/`exit_*` operations on [`ControlFlowGraphBuilder`] in strict
//! pre/post order. Graphs of nested declarations become subgraphs of their
//! syntactic parent.
//!
//! Node reachability is computed incrementally during construction from
//! constant conditions, `Nothing`-typed expressions, and closure execution
//! multiplicity; unreachable nodes stay in the graph with their liveness
//! flag cleared.
//!
//! Modules:
//! - [`node`]: node/edge primitives ([`NodeKind`], [`EdgeKind`], [`EdgeLabel`])
//! - [`graph`]: arena storage and liveness propagation ([`CfgArena`])
//! - [`builder`]: traversal state and the operation protocol, with construct
//!   families split across `builder_loops`, `builder_branches`,
//!   `builder_try`, `builder_classes`, and `builder_lambdas`

pub mod builder;
pub mod graph;
pub mod node;

mod builder_branches;
mod builder_classes;
mod builder_lambdas;
mod builder_loops;
mod builder_try;

pub use builder::ControlFlowGraphBuilder;
pub use graph::{CfgArena, ControlFlowGraph, GraphKind};
pub use node::{CfgNode, Edge, EdgeKind, EdgeLabel, GraphId, NodeId, NodeKind};
