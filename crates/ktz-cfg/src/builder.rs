//! Traversal state management for control-flow graph construction.
//!
//! The builder is driven by an external traversal of the declaration tree:
//! for every construct the driver calls a paired `enter_*`/`exit_*`
//! operation, always correctly nested. Each call turns stack bookkeeping
//! (open graphs, "last node" cursors, per-construct side tables) into nodes
//! and edges, computing reachability incrementally as it goes; there is no
//! separate liveness pass.
//!
//! One builder instance is single-threaded and stateful; independent
//! top-level declarations can be processed by independent instances in
//! parallel since no state is shared. Unbalanced enter/exit calls are a bug
//! in the driver, not a property of the analyzed program, and fail fast.
//!
//! This file holds the core state, graph enter/exit, edge utilities, jumps,
//! and the simple single-node expression exits. Construct families live in
//! sibling files as further `impl` blocks: loops (`builder_loops`),
//! branching (`builder_branches`), try/catch/finally (`builder_try`),
//! classes and initializers (`builder_classes`), and deferred closure
//! arguments (`builder_lambdas`).

use crate::graph::{CfgArena, GraphKind};
use crate::node::{EdgeKind, EdgeLabel, GraphId, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Per-open-try bookkeeping.
#[derive(Clone, Copy)]
pub(crate) struct TryFrame {
    pub(crate) try_element: AstId,
    pub(crate) exit: NodeId,
    pub(crate) has_finally: bool,
}

/// Member graphs of a class being built, recorded in visit order (the
/// driver visits members in textual order).
pub(crate) struct ClassFrame {
    pub(crate) class: AstId,
    pub(crate) discarded: bool,
    pub(crate) members: Vec<(AstId, GraphId)>,
}

/// Incremental control-flow graph builder for one declaration tree.
pub struct ControlFlowGraphBuilder {
    pub(crate) arena: CfgArena,
    /// Open graphs, innermost on top.
    pub(crate) graphs: Vec<GraphId>,
    /// "Current position" cursors, one per open scope.
    pub(crate) last_nodes: Vec<NodeId>,

    // ----------------------------- side tables -----------------------------
    /// Function declaration -> its exit node, while the function is open.
    pub(crate) exit_targets_for_return: FxHashMap<AstId, NodeId>,
    /// Local-class members -> pre-registered edge from the class enter node.
    pub(crate) enter_to_local_class_members: FxHashMap<AstId, (NodeId, EdgeKind)>,
    /// Jumps routed through a finally block, keyed by their true target.
    pub(crate) non_direct_jumps: FxHashMap<NodeId, Vec<NodeId>>,

    pub(crate) argument_list_split_nodes: Vec<Option<NodeId>>,
    /// Closure argument -> (placeholder enter, placeholder exit if the
    /// closure may run in place).
    pub(crate) postponed_lambda_nodes: FxHashMap<AstId, (NodeId, Option<NodeId>)>,
    pub(crate) postponed_lambda_exits: Vec<Vec<(NodeId, EdgeKind)>>,

    pub(crate) loop_condition_enter_nodes: FxHashMap<AstId, NodeId>,
    pub(crate) loop_exit_nodes: FxHashMap<AstId, NodeId>,

    pub(crate) when_exit_nodes: Vec<NodeId>,

    pub(crate) try_frames: Vec<TryFrame>,
    pub(crate) catch_node_stack: Vec<Vec<NodeId>>,
    pub(crate) catches_in_progress: Vec<NodeId>,
    pub(crate) finally_enter_nodes: Vec<NodeId>,
    pub(crate) finallies_in_progress: Vec<NodeId>,

    pub(crate) exit_safe_call_nodes: Vec<NodeId>,
    pub(crate) exit_elvis_nodes: Vec<NodeId>,
    pub(crate) elvis_rhs_enter_nodes: Vec<NodeId>,

    pub(crate) not_completed_function_calls: Vec<Vec<NodeId>>,

    pub(crate) class_frames: Vec<ClassFrame>,
    /// Completed class declaration -> its graph (for anonymous object
    /// expression wiring).
    pub(crate) class_graphs: FxHashMap<AstId, GraphId>,
    /// Completed anonymous function -> its exit node (for the
    /// returned-expressions query).
    pub(crate) lambda_exit_nodes: FxHashMap<AstId, NodeId>,
}

impl ControlFlowGraphBuilder {
    pub fn new() -> Self {
        Self {
            arena: CfgArena::new(),
            graphs: Vec::new(),
            last_nodes: Vec::new(),
            exit_targets_for_return: FxHashMap::default(),
            enter_to_local_class_members: FxHashMap::default(),
            non_direct_jumps: FxHashMap::default(),
            argument_list_split_nodes: Vec::new(),
            postponed_lambda_nodes: FxHashMap::default(),
            postponed_lambda_exits: Vec::new(),
            loop_condition_enter_nodes: FxHashMap::default(),
            loop_exit_nodes: FxHashMap::default(),
            when_exit_nodes: Vec::new(),
            try_frames: Vec::new(),
            catch_node_stack: Vec::new(),
            catches_in_progress: Vec::new(),
            finally_enter_nodes: Vec::new(),
            finallies_in_progress: Vec::new(),
            exit_safe_call_nodes: Vec::new(),
            exit_elvis_nodes: Vec::new(),
            elvis_rhs_enter_nodes: Vec::new(),
            not_completed_function_calls: Vec::new(),
            class_frames: Vec::new(),
            class_graphs: FxHashMap::default(),
            lambda_exit_nodes: FxHashMap::default(),
        }
    }

    /// Finished nodes and graphs, for the analysis engine driving the
    /// same traversal.
    pub fn arena(&self) -> &CfgArena {
        &self.arena
    }

    pub fn is_top_level(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn current_graph(&self) -> GraphId {
        *self.graphs.last().expect("no open graph")
    }

    /// The cursor for the innermost open scope.
    pub fn last_node(&self) -> NodeId {
        *self.last_nodes.last().expect("no active scope cursor")
    }

    pub fn last_node_or_none(&self) -> Option<NodeId> {
        self.last_nodes.last().copied()
    }

    /// Nesting depth for exception routing. Open tries are not subgraphs
    /// but still count, to tell nodes inside a try from nodes outside it.
    pub fn level_counter(&self) -> u32 {
        (self.graphs.len() + self.try_frames.len()) as u32
    }

    /// Whether graph construction is inside an executable body (not
    /// directly inside a class body).
    pub(crate) fn body_building_mode(&self) -> bool {
        self.graphs
            .last()
            .is_some_and(|&g| self.arena.graph(g).kind != GraphKind::Class)
    }

    /// Clear the long-lived side tables between independent top-level
    /// analyses sharing one builder instance. They must be empty before
    /// and after each top-level analysis.
    pub fn reset(&mut self) {
        self.enter_to_local_class_members.clear();
        self.postponed_lambda_exits.clear();
        self.last_nodes.clear();
        self.non_direct_jumps.clear();
        self.lambda_exit_nodes.clear();
        self.class_graphs.clear();
    }

    // --------------------------- graph open/close ---------------------------

    /// Open a new graph: push it, create its enter/exit pair (fixed for the
    /// graph's lifetime), and make the enter node the cursor.
    pub(crate) fn enter_graph(
        &mut self,
        kind: GraphKind,
        name: String,
        declaration: Option<AstId>,
        ast: AstId,
        enter_kind: NodeKind,
        exit_kind: NodeKind,
        union_exit: bool,
    ) -> (NodeId, NodeId) {
        trace!(?kind, name, "entering graph");
        let graph = self.arena.create_graph(kind, name, declaration);
        self.graphs.push(graph);
        let level = self.level_counter();
        let enter = self.arena.create_node(graph, enter_kind, ast, level);
        let exit = if union_exit {
            self.arena.create_union_node(graph, exit_kind, ast, level)
        } else {
            self.arena.create_node(graph, exit_kind, ast, level)
        };
        self.arena.init_enter_exit(graph, enter, exit);
        self.last_nodes.push(enter);
        (enter, exit)
    }

    /// Close the innermost graph: wire the cursor into the exit node, mark
    /// the graph complete, and attach it as a subgraph of its parent.
    /// Returns the exit node and the finished graph for the driver.
    pub(crate) fn exit_graph(&mut self) -> (NodeId, GraphId) {
        let graph = self.graphs.pop().expect("exit_graph with no open graph");
        let exit = self.arena.graph(graph).exit_node();
        self.pop_and_add_edge(exit, EdgeKind::Forward);
        if self.arena.node(exit).incoming.len() > 1 {
            self.arena.update_dead_status(exit);
        }
        self.finish_graph(graph);
        (exit, graph)
    }

    /// Completion and parent attachment shared by [`Self::exit_graph`] and
    /// the class exit path (which wires its exit node manually).
    pub(crate) fn finish_graph(&mut self, graph: GraphId) {
        self.arena.complete_graph(graph);
        let declaration = self.arena.graph(graph).declaration;
        let Some(declaration) = declaration else {
            return; // discarded graph, attached nowhere
        };
        if let Some(&parent) = self.graphs.last() {
            self.arena.add_subgraph(parent, graph);
            if self.arena.graph(parent).kind == GraphKind::Class
                && let Some(frame) = self.class_frames.last_mut()
                && !frame.discarded
            {
                frame.members.push((declaration, graph));
            }
        }
    }

    // ------------------------------ edge utils ------------------------------

    /// Default wiring primitive: pop the cursor, connect it to `node` with
    /// a forward (or dead-forward) edge, push `node` as the new cursor.
    /// Also injects exception edges if `node` can raise.
    pub(crate) fn add_new_simple_node(&mut self, node: NodeId, is_dead: bool) {
        let last = self
            .last_nodes
            .pop()
            .expect("add_new_simple_node with no active scope cursor");
        self.add_edge_full(
            last,
            node,
            true,
            is_dead,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.last_nodes.push(node);
        self.add_exception_edges_from(node);
    }

    /// Wire a node that never completes normally (throw, `Nothing` call):
    /// the path formally continues through a stub that is dead from the
    /// start, so everything wired after it is unreachable.
    pub(crate) fn add_non_successfully_terminating_node(&mut self, node: NodeId) {
        self.pop_and_add_edge(node, EdgeKind::Forward);
        let stub = self.create_node(NodeKind::Stub, AstId::NONE);
        self.add_edge_full(node, stub, true, true, EdgeKind::Forward, EdgeLabel::NormalPath);
        self.last_nodes.push(stub);
        self.add_exception_edges_from(node);
    }

    pub(crate) fn pop_and_add_edge(&mut self, to: NodeId, preferred_kind: EdgeKind) {
        let last = self
            .last_nodes
            .pop()
            .expect("pop_and_add_edge with no active scope cursor");
        self.add_edge_full(last, to, true, false, preferred_kind, EdgeLabel::NormalPath);
    }

    /// Forward edge with full defaults.
    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_edge_full(
            from,
            to,
            true,
            false,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
    }

    /// Append an edge, downgrading the preferred kind to its dead variant
    /// when the transition is declared dead or either endpoint already is.
    pub(crate) fn add_edge_full(
        &mut self,
        from: NodeId,
        to: NodeId,
        propagate_deadness: bool,
        is_dead: bool,
        preferred_kind: EdgeKind,
        label: EdgeLabel,
    ) {
        let kind = if is_dead || self.arena.is_dead(from) || self.arena.is_dead(to) {
            preferred_kind.killed()
        } else {
            preferred_kind
        };
        self.arena.add_edge(from, to, kind, propagate_deadness, label);
    }

    pub(crate) fn add_back_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        is_dead: bool,
        label: EdgeLabel,
    ) {
        let kind = if is_dead || self.arena.is_dead(from) || self.arena.is_dead(to) {
            EdgeKind::DeadBackward
        } else {
            EdgeKind::CfgBackward
        };
        self.arena.add_edge(from, to, kind, false, label);
    }

    /// Control-only edge into an already-built subgraph. Data flow for
    /// everything after `to` has been computed, so only control flow may
    /// be added; deadness still propagates into the subgraph.
    pub(crate) fn add_edge_to_subgraph(&mut self, from: NodeId, to: NodeId) {
        let was_dead = self.arena.is_dead(to);
        let is_dead = was_dead || self.arena.is_dead(from);
        let kind = if is_dead {
            EdgeKind::DeadForward
        } else {
            EdgeKind::CfgForward
        };
        self.arena
            .add_edge(from, to, kind, true, EdgeLabel::NormalPath);
        if is_dead && !was_dead {
            self.arena.propagate_deadness_forward(to);
        }
    }

    /// Node in the innermost open graph at the current nesting level.
    pub(crate) fn create_node(&mut self, kind: NodeKind, ast: AstId) -> NodeId {
        let graph = self.current_graph();
        let level = self.level_counter();
        self.arena.create_node(graph, kind, ast, level)
    }

    /// Consume a pre-registered local-class-member edge, if one exists.
    pub(crate) fn add_edge_if_local_class_member(&mut self, enter: NodeId, decl: AstId) {
        if let Some((source, kind)) = self.enter_to_local_class_members.remove(&decl) {
            self.add_edge_full(source, enter, true, false, kind, EdgeLabel::NormalPath);
        }
    }

    // -------------------------- functions & blocks --------------------------

    /// Enter a named function (declaration, accessor, or constructor).
    /// Local functions additionally get a declaration node in the
    /// enclosing graph.
    pub fn enter_function(&mut self, ast: &AstArena, function: AstId) -> (Option<NodeId>, NodeId) {
        let (name, is_local) = match ast.kind(function) {
            ElementKind::Function {
                name,
                kind,
                is_local,
            } => {
                let name = match kind {
                    ktz_ast::FunctionKind::Declaration => name.clone(),
                    ktz_ast::FunctionKind::Getter => "<getter>".to_string(),
                    ktz_ast::FunctionKind::Setter => "<setter>".to_string(),
                };
                (name, *is_local)
            }
            ElementKind::Constructor { .. } => ("<init>".to_string(), false),
            other => panic!("enter_function on non-function element {function:?}: {other:?}"),
        };

        let local_function_node = if is_local && self.body_building_mode() {
            let node = self.create_node(NodeKind::LocalFunctionDeclaration, function);
            self.add_new_simple_node(node, false);
            Some(node)
        } else {
            None
        };

        let graph_kind = if local_function_node.is_some() {
            GraphKind::LocalFunction
        } else {
            GraphKind::Function
        };
        let (enter, exit) = self.enter_graph(
            graph_kind,
            name,
            Some(function),
            function,
            NodeKind::FunctionEnter,
            NodeKind::FunctionExit,
            false,
        );
        self.exit_targets_for_return.insert(function, exit);

        if let Some(node) = local_function_node {
            self.add_edge(node, enter);
        } else {
            self.add_edge_if_local_class_member(enter, function);
        }
        (local_function_node, enter)
    }

    pub fn exit_function(&mut self, function: AstId) -> (NodeId, GraphId) {
        self.exit_targets_for_return.remove(&function);
        self.exit_graph()
    }

    pub fn enter_block(&mut self, block: AstId) -> NodeId {
        let node = self.create_node(NodeKind::BlockEnter, block);
        self.add_new_simple_node(node, false);
        node
    }

    pub fn exit_block(&mut self, block: AstId) -> NodeId {
        let node = self.create_node(NodeKind::BlockExit, block);
        self.add_new_simple_node(node, false);
        node
    }

    // --------------------------------- jumps ---------------------------------

    pub fn enter_jump(&mut self, ast: &AstArena, jump: AstId) {
        // Data flow from closures in a lambda's return value does not merge
        // with any enclosing call; give it its own postponed-exit scope.
        if self.is_return_to_lambda(ast, jump) {
            self.split_data_flow_for_postponed_lambdas();
        }
    }

    /// Wire a `return`/`break`/`continue`. When an enclosing finally lies
    /// between the jump and its target, the edge is routed to the finally
    /// enter instead, tagged with the true target, and recorded so the
    /// finally exit can re-emit it.
    pub fn exit_jump(&mut self, ast: &AstArena, jump: AstId) -> NodeId {
        let node = self.create_node(NodeKind::Jump, jump);
        self.add_non_successfully_terminating_node(node);

        if self.is_return_to_lambda(ast, jump) {
            self.postponed_lambda_exits
                .pop()
                .expect("unbalanced postponed-exit scope around return");
        }

        let target = match ast.kind(jump) {
            ElementKind::Return { target, .. } => {
                self.exit_targets_for_return.get(target).copied()
            }
            ElementKind::Continue { target } => {
                self.loop_condition_enter_nodes.get(target).copied()
            }
            ElementKind::Break { target } => self.loop_exit_nodes.get(target).copied(),
            other => panic!("exit_jump on non-jump element {jump:?}: {other:?}"),
        };
        let Some(target) = target else {
            // Unresolved jump target: recoverable, the stub keeps the graph
            // structurally valid.
            return node;
        };

        let next_finally = self
            .finally_enter_nodes
            .last()
            .copied()
            .filter(|&f| self.arena.node(f).level > self.arena.node(target).level);
        if let Some(finally_enter) = next_finally {
            self.add_edge_full(
                node,
                finally_enter,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::JumpTarget(target),
            );
            self.non_direct_jumps.entry(target).or_default().push(node);
        } else if self.return_path_is_backwards(target) {
            self.add_back_edge(node, target, false, EdgeLabel::NormalPath);
        } else {
            self.add_edge_full(
                node,
                target,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::NormalPath,
            );
        }
        node
    }

    fn is_return_to_lambda(&self, ast: &AstArena, jump: AstId) -> bool {
        matches!(
            ast.kind(jump),
            ElementKind::Return { target, .. }
                if matches!(ast.kind(*target), ElementKind::Lambda { .. })
        )
    }

    // while (x) { continue }      back edge
    // do { continue } while (x)   forward edge
    // do { x } while (continue)   back edge (condition re-enters itself)
    pub(crate) fn return_path_is_backwards(&self, target: NodeId) -> bool {
        let node = self.arena.node(target);
        match node.kind {
            NodeKind::LoopConditionEnter {
                is_post_condition, ..
            } => {
                !is_post_condition
                    || node.incoming.iter().any(|&prev| {
                        self.arena.node(prev).kind == NodeKind::LoopBlockExit
                    })
            }
            _ => false,
        }
    }

    // ------------------------- simple expression exits -------------------------

    fn exit_simple(&mut self, kind: NodeKind, element: AstId) -> NodeId {
        let node = self.create_node(kind, element);
        self.add_new_simple_node(node, false);
        node
    }

    /// Variable or property read. A read typed as `Nothing` (an access
    /// that always throws) terminates the path.
    pub fn exit_qualified_access(&mut self, ast: &AstArena, element: AstId) -> NodeId {
        let node = self.create_node(NodeKind::QualifiedAccess, element);
        if ast.returns_nothing(element) {
            self.add_non_successfully_terminating_node(node);
        } else {
            self.add_new_simple_node(node, false);
        }
        node
    }

    pub fn exit_smart_cast(&mut self, ast: &AstArena, element: AstId) -> NodeId {
        let node = self.create_node(NodeKind::SmartCastExit, element);
        if ast.returns_nothing(element) {
            self.add_non_successfully_terminating_node(node);
        } else {
            self.add_new_simple_node(node, false);
        }
        node
    }

    pub fn exit_resolved_qualifier(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::ResolvedQualifier, element)
    }

    pub fn exit_const_expression(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::ConstExpression, element)
    }

    pub fn exit_variable_declaration(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::VariableDeclaration, element)
    }

    pub fn exit_variable_assignment(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::VariableAssignment, element)
    }

    pub fn exit_throw(&mut self, element: AstId) -> NodeId {
        let node = self.create_node(NodeKind::Throw, element);
        self.add_non_successfully_terminating_node(node);
        node
    }

    pub fn exit_type_operator_call(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::TypeOperatorCall, element)
    }

    pub fn exit_equality_operator_call(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::EqualityOperatorCall, element)
    }

    pub fn exit_comparison_expression(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::ComparisonExpression, element)
    }

    pub fn exit_callable_reference(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::CallableReference, element)
    }

    pub fn exit_get_class_call(&mut self, element: AstId) -> NodeId {
        self.exit_simple(NodeKind::GetClassCall, element)
    }

    // --------------------------- fake expressions ---------------------------

    /// Annotation arguments and other compile-time-only expressions use
    /// normal traversal but are never evaluated: build their nodes into a
    /// throwaway graph.
    pub fn enter_fake_expression(&mut self) -> NodeId {
        let (enter, _) = self.enter_graph(
            GraphKind::Fake,
            "<compile-time expression>".to_string(),
            None,
            AstId::NONE,
            NodeKind::FakeExpressionEnter,
            NodeKind::FakeExpressionEnter,
            false,
        );
        enter
    }

    pub fn exit_fake_expression(&mut self) {
        self.last_nodes
            .pop()
            .expect("exit_fake_expression with no active scope cursor");
        let graph = self.graphs.pop().expect("exit_fake_expression with no open graph");
        assert_eq!(
            self.arena.graph(graph).kind,
            GraphKind::Fake,
            "exit_fake_expression closed a non-fake graph"
        );
    }

    // ------------------------------- queries -------------------------------

    /// All expressions returned from a closure along live, normally
    /// terminating paths, for return-type inference once the closure's
    /// body has been built. `None` when the closure has no graph yet.
    pub fn returned_expressions_of_lambda(
        &self,
        ast: &AstArena,
        lambda: AstId,
    ) -> Option<Vec<AstId>> {
        let exit = *self.lambda_exit_nodes.get(&lambda)?;
        let is_lambda_literal = matches!(ast.kind(lambda), ElementKind::Lambda { is_lambda: true });

        let mut values: Vec<AstId> = Vec::new();
        let push_unique = |value: AstId, values: &mut Vec<AstId>| {
            if !value.is_none() && !values.contains(&value) {
                values.push(value);
            }
        };

        for (prev, edge) in self.arena.incoming_edges(exit) {
            if edge.kind.is_dead() || edge.label != EdgeLabel::NormalPath {
                continue;
            }
            if let Some(value) = self.return_value_at(ast, lambda, is_lambda_literal, prev) {
                push_unique(value, &mut values);
            }
        }
        // Jumps that reached the exit through a finally block are not
        // direct predecessors; they are recorded separately.
        if let Some(jumps) = self.non_direct_jumps.get(&exit) {
            for &jump in jumps {
                if let Some(value) = self.return_value_at(ast, lambda, is_lambda_literal, jump) {
                    push_unique(value, &mut values);
                }
            }
        }
        Some(values)
    }

    fn return_value_at(
        &self,
        ast: &AstArena,
        lambda: AstId,
        is_lambda_literal: bool,
        node: NodeId,
    ) -> Option<AstId> {
        let node = self.arena.node(node);
        match node.kind {
            // The body block fell through: its last statement is the value.
            NodeKind::BlockExit if is_lambda_literal => {
                let last = match ast.kind(node.ast) {
                    ElementKind::Block { statements } => statements.last().copied()?,
                    _ => return None,
                };
                match ast.kind(last) {
                    // An explicit trailing return is seen through its jump
                    // node instead.
                    ElementKind::Return { .. } => None,
                    _ => Some(last),
                }
            }
            NodeKind::Jump => match ast.kind(node.ast) {
                ElementKind::Return { target, value } if *target == lambda => Some(*value),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for ControlFlowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
