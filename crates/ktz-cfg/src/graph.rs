//! Graph storage and edge mutation.
//!
//! All nodes and graphs produced by one builder instance live in a single
//! [`CfgArena`]. Edges connect nodes by id, possibly across call-related
//! graphs (subgraph attachment, postponed closure stitching). Edges are only
//! ever appended or downgraded to their dead variant, never removed or
//! reordered, so visitation order fully determines edge-list order.
//!
//! Liveness propagation lives here too: killing an edge can leave its target
//! without a live forward predecessor, in which case the target is marked
//! dead and the walk continues depth-first along its outgoing forward edges.
//! Back edges never carry deadness from source to target; that would be
//! unsound for loops.

use crate::node::{CfgNode, Edge, EdgeKind, EdgeLabel, GraphId, NodeId, NodeKind};
use ktz_ast::AstId;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

/// Construct kind of a whole graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphKind {
    Function,
    LocalFunction,
    Lambda,
    LambdaCalledInPlace,
    Class,
    DefaultArgument,
    PropertyInitializer,
    FieldInitializer,
    ClassInitializer,
    /// Compile-time-only expression trees (annotation arguments and the
    /// like) are built into a fake graph and discarded.
    Fake,
}

/// One control-flow graph: exactly one enter node, exactly one exit node,
/// the nodes created while it was the innermost open graph, and the nested
/// graphs it owns.
#[derive(Debug)]
pub struct ControlFlowGraph {
    pub kind: GraphKind,
    pub name: String,
    /// Declaration this graph represents; absent for discarded/fake graphs.
    pub declaration: Option<AstId>,
    enter: Option<NodeId>,
    exit: Option<NodeId>,
    pub nodes: Vec<NodeId>,
    pub subgraphs: Vec<GraphId>,
    pub is_complete: bool,
}

impl ControlFlowGraph {
    pub fn enter_node(&self) -> NodeId {
        self.enter.expect("graph has no enter node yet")
    }

    pub fn exit_node(&self) -> NodeId {
        self.exit.expect("graph has no exit node yet")
    }
}

/// Storage for every node, edge, and graph built by one builder instance.
#[derive(Default)]
pub struct CfgArena {
    nodes: Vec<CfgNode>,
    graphs: Vec<ControlFlowGraph>,
    edges: FxHashMap<(NodeId, NodeId), Edge>,
}

impl CfgArena {
    pub fn new() -> Self {
        Self::default()
    }

    // ----------------------------- creation -----------------------------

    pub(crate) fn create_graph(
        &mut self,
        kind: GraphKind,
        name: String,
        declaration: Option<AstId>,
    ) -> GraphId {
        let id = GraphId(u32::try_from(self.graphs.len()).expect("graph arena overflow"));
        self.graphs.push(ControlFlowGraph {
            kind,
            name,
            declaration,
            enter: None,
            exit: None,
            nodes: Vec::new(),
            subgraphs: Vec::new(),
            is_complete: false,
        });
        id
    }

    /// Fix a graph's enter and exit nodes. They are set exactly once, at
    /// graph creation time, and never replaced.
    pub(crate) fn init_enter_exit(&mut self, graph: GraphId, enter: NodeId, exit: NodeId) {
        let data = &mut self.graphs[graph.index()];
        assert!(
            data.enter.is_none() && data.exit.is_none(),
            "enter/exit nodes of graph {:?} already fixed",
            graph
        );
        data.enter = Some(enter);
        data.exit = Some(exit);
    }

    pub(crate) fn create_node(
        &mut self,
        graph: GraphId,
        kind: NodeKind,
        ast: AstId,
        level: u32,
    ) -> NodeId {
        self.create_node_impl(graph, kind, ast, level, false)
    }

    /// A union node is dead when any of its inputs is dead, not all.
    pub(crate) fn create_union_node(
        &mut self,
        graph: GraphId,
        kind: NodeKind,
        ast: AstId,
        level: u32,
    ) -> NodeId {
        self.create_node_impl(graph, kind, ast, level, true)
    }

    fn create_node_impl(
        &mut self,
        graph: GraphId,
        kind: NodeKind,
        ast: AstId,
        level: u32,
        is_union: bool,
    ) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena overflow"));
        self.nodes.push(CfgNode {
            graph,
            kind,
            ast,
            level,
            is_live: true,
            is_union,
            incoming: SmallVec::new(),
            outgoing: SmallVec::new(),
        });
        self.graphs[graph.index()].nodes.push(id);
        id
    }

    pub(crate) fn complete_graph(&mut self, graph: GraphId) {
        self.graphs[graph.index()].is_complete = true;
    }

    pub(crate) fn add_subgraph(&mut self, parent: GraphId, child: GraphId) {
        self.graphs[parent.index()].subgraphs.push(child);
    }

    // ------------------------------ access ------------------------------

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub fn graph(&self, id: GraphId) -> &ControlFlowGraph {
        &self.graphs[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The edge between two connected nodes. Asking for an edge that was
    /// never created is a caller bug.
    pub fn edge(&self, from: NodeId, to: NodeId) -> Edge {
        self.try_edge(from, to)
            .unwrap_or_else(|| panic!("no edge from {from:?} to {to:?}"))
    }

    pub fn try_edge(&self, from: NodeId, to: NodeId) -> Option<Edge> {
        self.edges.get(&(from, to)).copied()
    }

    /// Incoming edges of a node in creation order.
    pub fn incoming_edges(&self, to: NodeId) -> impl Iterator<Item = (NodeId, Edge)> + '_ {
        self.node(to)
            .incoming
            .iter()
            .map(move |&from| (from, self.edge(from, to)))
    }

    /// Outgoing edges of a node in creation order.
    pub fn outgoing_edges(&self, from: NodeId) -> impl Iterator<Item = (NodeId, Edge)> + '_ {
        self.node(from)
            .outgoing
            .iter()
            .map(move |&to| (to, self.edge(from, to)))
    }

    pub fn is_dead(&self, id: NodeId) -> bool {
        self.node(id).is_dead()
    }

    // --------------------------- edge mutation ---------------------------

    /// Append a directed edge. At most one edge may exist per (from, to)
    /// pair; a duplicate indicates a broken traversal driver.
    ///
    /// With `propagate_deadness`, connecting a dead forward edge marks the
    /// target dead immediately so nodes wired after it see a dead cursor.
    pub(crate) fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
        propagate_deadness: bool,
        label: EdgeLabel,
    ) {
        let previous = self.edges.insert((from, to), Edge { kind, label });
        assert!(
            previous.is_none(),
            "duplicate edge from {from:?} to {to:?}"
        );
        self.nodes[from.index()].outgoing.push(to);
        self.nodes[to.index()].incoming.push(from);
        if propagate_deadness && kind.is_dead() && !kind.is_back() {
            self.nodes[to.index()].is_live = false;
        }
    }

    /// Downgrade an existing edge to its dead variant. Returns whether the
    /// edge actually changed. With `propagate_deadness`, a target left
    /// without a live forward predecessor is marked dead and the deadness
    /// walk continues through its outgoing edges.
    pub(crate) fn kill_edge(&mut self, from: NodeId, to: NodeId, propagate_deadness: bool) -> bool {
        let edge = self
            .edges
            .get_mut(&(from, to))
            .unwrap_or_else(|| panic!("cannot kill missing edge from {from:?} to {to:?}"));
        if edge.kind.is_dead() {
            return false;
        }
        trace!(?from, ?to, "killing edge");
        edge.kind = edge.kind.killed();
        if propagate_deadness {
            self.update_dead_status(to);
            self.propagate_deadness_forward(to);
        }
        true
    }

    /// Recompute a node's liveness from its incoming control-flow edges.
    /// Regular nodes are dead when every such edge is dead or carries a
    /// non-normal label; union nodes are dead when any input is dead.
    pub(crate) fn update_dead_status(&mut self, id: NodeId) {
        let node = self.node(id);
        let is_union = node.is_union;
        let mut any_dead = false;
        let mut all_dead_or_labeled = true;
        let mut seen = false;
        for (_, edge) in self.incoming_edges(id) {
            if !edge.kind.used_in_cfa() {
                continue;
            }
            seen = true;
            if edge.kind.is_dead() {
                any_dead = true;
            } else if edge.label == EdgeLabel::NormalPath {
                all_dead_or_labeled = false;
            }
        }
        let dead = if is_union {
            any_dead
        } else {
            seen && all_dead_or_labeled
        };
        self.nodes[id.index()].is_live = !dead;
    }

    /// Depth-first forward deadness walk. Kills each live outgoing edge of
    /// a dead node and recurses into successors whose liveness changed.
    /// Back edges are killed but never followed, and already-dead
    /// successors are not revisited, so the walk terminates.
    pub(crate) fn propagate_deadness_forward(&mut self, id: NodeId) {
        if !self.is_dead(id) {
            return;
        }
        let successors: Vec<NodeId> = self.node(id).outgoing.to_vec();
        for next in successors {
            let kind = self.edge(id, next).kind;
            if self.kill_edge(id, next, false) && !kind.is_back() && kind.used_in_cfa() {
                let was_dead = self.is_dead(next);
                self.update_dead_status(next);
                if !was_dead && self.is_dead(next) {
                    trace!(?next, "node became unreachable");
                }
                self.propagate_deadness_forward(next);
            }
        }
    }

    /// Detach every incoming edge of a node. Only used when a node built
    /// optimistically turns out to terminate the path (`Nothing`
    /// completion); adjacency entries are unlinked so replacement dead
    /// edges can be appended.
    pub(crate) fn remove_all_incoming_edges(&mut self, to: NodeId) {
        let incoming = std::mem::take(&mut self.nodes[to.index()].incoming);
        for from in incoming {
            self.edges.remove(&(from, to));
            self.nodes[from.index()].outgoing.retain(|n| *n != to);
        }
    }

    /// Detach every outgoing edge of a node (see
    /// [`Self::remove_all_incoming_edges`]).
    pub(crate) fn remove_all_outgoing_edges(&mut self, from: NodeId) {
        let outgoing = std::mem::take(&mut self.nodes[from.index()].outgoing);
        for to in outgoing {
            self.edges.remove(&(from, to));
            self.nodes[to.index()].incoming.retain(|n| *n != from);
        }
    }
}
