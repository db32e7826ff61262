//! Deferred closure arguments and call completion.
//!
//! A closure passed to a call may execute zero, one, or many times, and
//! which of those is true only becomes known when the call resolves. Closure
//! bodies are therefore built between placeholder nodes (a shared "split"
//! enter before the argument list, a "postponed exit" per closure) and
//! stitched to the call node once the multiplicity is known: the placeholder
//! pass-over edge is killed when the body definitely runs, a body-to-exit
//! edge is added when it can run, and a back edge when it can run again.
//!
//! Until a call completes (its return type may still be a type variable),
//! closure exits are parked in a stack of per-call scopes and either merged
//! into the call node or forwarded to the enclosing scope as data-only
//! edges.

use crate::builder::ControlFlowGraphBuilder;
use crate::graph::GraphKind;
use crate::node::{EdgeKind, EdgeLabel, GraphId, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind};
use tracing::trace;

impl ControlFlowGraphBuilder {
    // ------------------------- postponed exit scopes -------------------------

    /// Open a postponed-closure scope for a call or branching expression.
    pub(crate) fn split_data_flow_for_postponed_lambdas(&mut self) {
        self.postponed_lambda_exits.push(Vec::new());
    }

    /// Close the scope of a completed (or sequential) call: wire every
    /// parked closure exit into `node`. If the call has not completed and
    /// an enclosing scope exists, only control edges are added here; the
    /// data edges are deferred to the enclosing scope.
    pub(crate) fn unify_data_flow_from_postponed_lambdas(
        &mut self,
        node: NodeId,
        call_completed: bool,
    ) {
        let current = self
            .postponed_lambda_exits
            .pop()
            .expect("unbalanced postponed-closure scope");
        if current.is_empty() {
            return;
        }
        if !call_completed && !self.postponed_lambda_exits.is_empty() {
            for &(exit, kind) in &current {
                if kind.used_in_cfa() {
                    self.add_edge_full(
                        exit,
                        node,
                        true,
                        false,
                        EdgeKind::CfgForward,
                        EdgeLabel::NormalPath,
                    );
                }
            }
            let parent = self
                .postponed_lambda_exits
                .last_mut()
                .expect("enclosing postponed-closure scope vanished");
            parent.extend(current.into_iter().map(|(exit, _)| (exit, EdgeKind::DfgForward)));
        } else {
            for (exit, kind) in current {
                // Dead closure exits still carry control information.
                if kind.used_in_cfa() || !self.arena.is_dead(exit) {
                    self.add_edge_full(exit, node, true, false, kind, EdgeLabel::NormalPath);
                }
            }
        }
    }

    /// Close the scope of a branching expression. Unlike a call, a branch
    /// exit merges data from *paths*, so parked closure exits from an
    /// incomplete call inside one branch must not flow into it directly;
    /// they join through a dedicated union node instead and stay parked
    /// for the enclosing scope.
    pub(crate) fn merge_data_flow_from_postponed_lambdas(
        &mut self,
        node: NodeId,
        call_completed: bool,
    ) {
        let current = self
            .postponed_lambda_exits
            .pop()
            .expect("unbalanced postponed-closure scope");
        if current.is_empty() {
            return;
        }
        if !call_completed && !self.postponed_lambda_exits.is_empty() {
            self.arena.update_dead_status(node);
            let graph = self.arena.node(node).graph;
            let level = self.arena.node(node).level;
            let ast = self.arena.node(node).ast;
            let merge = self.arena.create_union_node(
                graph,
                NodeKind::MergePostponedLambdaExits,
                ast,
                level,
            );
            self.add_edge(node, merge);
            for &(exit, kind) in &current {
                if kind.used_in_cfa() {
                    self.add_edge_full(
                        exit,
                        node,
                        false,
                        false,
                        EdgeKind::CfgForward,
                        EdgeLabel::NormalPath,
                    );
                }
                self.add_edge_full(
                    exit,
                    merge,
                    false,
                    false,
                    EdgeKind::DfgForward,
                    EdgeLabel::NormalPath,
                );
            }
            let parent = self
                .postponed_lambda_exits
                .last_mut()
                .expect("enclosing postponed-closure scope vanished");
            parent.push((merge, EdgeKind::DfgForward));
        } else {
            for (exit, kind) in current {
                self.add_edge_full(exit, node, false, false, kind, EdgeLabel::NormalPath);
            }
        }
    }

    // ---------------------------- closure bodies ----------------------------

    /// First sighting of a closure expression. Outside an argument list it
    /// gets an ordinary node; inside one, the shared split node was already
    /// registered as its placeholder enter, and a postponed exit is created
    /// and parked in the current scope.
    pub fn enter_anonymous_function_expression(
        &mut self,
        expression: AstId,
        lambda: AstId,
    ) -> Option<NodeId> {
        match self.postponed_lambda_nodes.get(&lambda) {
            None => {
                let node = self.create_node(NodeKind::LambdaExpression, expression);
                self.add_new_simple_node(node, false);
                self.postponed_lambda_nodes.insert(lambda, (node, None));
                Some(node)
            }
            Some(&(split, _)) => {
                let postponed_exit = self.create_node(NodeKind::PostponedLambdaExit, expression);
                // Pass-over edge for the case where the body never runs;
                // killed later if the multiplicity says otherwise.
                self.add_edge(split, postponed_exit);
                self.postponed_lambda_nodes
                    .insert(lambda, (split, Some(postponed_exit)));
                self.postponed_lambda_exits
                    .last_mut()
                    .expect("closure argument outside a call scope")
                    .push((postponed_exit, EdgeKind::Forward));
                None
            }
        }
    }

    /// Open the closure's own graph. A closure whose multiplicity is
    /// already resolved (the call completed before the body was visited)
    /// executes in place and is transparent to exception propagation.
    pub fn enter_anonymous_function(&mut self, ast: &AstArena, lambda: AstId) -> NodeId {
        debug_assert!(matches!(ast.kind(lambda), ElementKind::Lambda { .. }));
        let graph_kind = if ast.invocation_kind(lambda).is_some() {
            GraphKind::LambdaCalledInPlace
        } else {
            GraphKind::Lambda
        };
        let (enter, exit) = self.enter_graph(
            graph_kind,
            "<anonymous>".to_string(),
            Some(lambda),
            lambda,
            NodeKind::FunctionEnter,
            NodeKind::FunctionExit,
            false,
        );
        self.exit_targets_for_return.insert(lambda, exit);
        let (placeholder_enter, _) = *self
            .postponed_lambda_nodes
            .get(&lambda)
            .expect("closure body visited before its expression");
        self.add_edge(placeholder_enter, enter);
        enter
    }

    /// Close the closure's graph and stitch multiplicity edges between the
    /// placeholders and the body, if the multiplicity is already known. An
    /// unresolved closure keeps its placeholders; the edges appear when the
    /// call completes (the body is then executed out of line and only data
    /// survives).
    pub fn exit_anonymous_function(
        &mut self,
        ast: &AstArena,
        lambda: AstId,
    ) -> (NodeId, Option<NodeId>, GraphId) {
        self.exit_targets_for_return.remove(&lambda);
        let (exit, graph) = self.exit_graph();
        self.lambda_exit_nodes.insert(lambda, exit);

        let (split, postponed_exit) = self
            .postponed_lambda_nodes
            .remove(&lambda)
            .expect("closure body closed without being entered");
        let Some(postponed_exit) = postponed_exit else {
            // Plain closure expression: no in-place execution possible.
            return (exit, None, graph);
        };

        let invocation = ast.invocation_kind(lambda);
        trace!(?invocation, "stitching closure multiplicity");
        let definitely_visited = invocation.is_some_and(|k| k.is_definitely_visited());
        if definitely_visited || self.arena.is_dead(split) {
            // The pass-over edge is impossible (or the whole call is dead).
            self.arena.kill_edge(split, postponed_exit, !definitely_visited);
        }
        if invocation.is_some_and(|k| k.can_be_visited()) {
            self.add_edge_full(
                exit,
                postponed_exit,
                definitely_visited,
                false,
                EdgeKind::Forward,
                EdgeLabel::NormalPath,
            );
            if invocation.is_some_and(|k| k.can_be_revisited()) {
                self.add_back_edge(postponed_exit, split, false, EdgeLabel::NormalPath);
            }
        }
        (exit, Some(postponed_exit), graph)
    }

    // -------------------------------- calls --------------------------------

    /// Every call opens a postponed-closure scope, whether or not it ends
    /// up having closure arguments.
    pub fn enter_call(&mut self) {
        self.split_data_flow_for_postponed_lambdas();
    }

    /// Before a call's argument list: closure arguments share one split
    /// node, created here and registered as each closure's placeholder
    /// enter, but wired into the flow only when the argument list finishes.
    pub fn enter_call_arguments(&mut self, call: AstId, closure_arguments: &[AstId]) {
        if closure_arguments.is_empty() {
            self.argument_list_split_nodes.push(None);
            return;
        }
        let split = self.create_node(NodeKind::SplitLambdaArguments, call);
        for &lambda in closure_arguments {
            self.postponed_lambda_nodes.insert(lambda, (split, None));
        }
        self.argument_list_split_nodes.push(Some(split));
    }

    pub fn exit_call_arguments(&mut self) -> Option<NodeId> {
        let split = self
            .argument_list_split_nodes
            .pop()
            .expect("exit_call_arguments without matching enter_call_arguments");
        if let Some(split) = split {
            self.add_new_simple_node(split, false);
        }
        split
    }

    /// A call typed as `Nothing` terminates the path. A call that has not
    /// completed may still turn out to return `Nothing`; it is recorded so
    /// the enclosing branching expression can reroute it on completion.
    pub fn exit_function_call(
        &mut self,
        ast: &AstArena,
        call: AstId,
        call_completed: bool,
    ) -> NodeId {
        let returns_nothing = ast.returns_nothing(call);
        let node = self.create_node(NodeKind::FunctionCall, call);
        self.unify_data_flow_from_postponed_lambdas(node, call_completed);
        if returns_nothing {
            self.add_non_successfully_terminating_node(node);
        } else {
            self.add_new_simple_node(node, false);
        }
        if !returns_nothing && !call_completed
            && let Some(pending) = self.not_completed_function_calls.last_mut()
        {
            pending.push(node);
        }
        node
    }

    /// Late completion of a call recorded by [`Self::exit_function_call`].
    /// If it resolved to `Nothing`, the node's outgoing edges are rerouted
    /// through a dead stub, killing every path that assumed the call
    /// returned. Reports whether a reroute happened.
    pub(crate) fn complete_function_call(&mut self, ast: &AstArena, node: NodeId) -> bool {
        if !ast.returns_nothing(self.arena.node(node).ast) {
            return false;
        }
        let graph = self.arena.node(node).graph;
        let level = self.arena.node(node).level;
        let stub = self.arena.create_node(graph, NodeKind::Stub, AstId::NONE, level);

        let successors: Vec<(NodeId, crate::node::Edge)> =
            self.arena.outgoing_edges(node).collect();
        self.arena.remove_all_outgoing_edges(node);
        self.arena
            .add_edge(node, stub, EdgeKind::DeadForward, false, EdgeLabel::NormalPath);
        for (to, edge) in successors {
            let kind = if edge.kind.is_back() {
                EdgeKind::DeadBackward
            } else {
                EdgeKind::DeadForward
            };
            self.arena.add_edge(stub, to, kind, false, edge.label);
            self.arena.update_dead_status(to);
            self.arena.propagate_deadness_forward(to);
        }
        true
    }

    pub fn exit_delegated_constructor_call(
        &mut self,
        call: AstId,
        call_completed: bool,
    ) -> NodeId {
        let node = self.create_node(NodeKind::DelegatedConstructorCall, call);
        self.unify_data_flow_from_postponed_lambdas(node, call_completed);
        self.add_new_simple_node(node, false);
        node
    }

    pub fn exit_string_concatenation_call(&mut self, call: AstId) -> NodeId {
        let node = self.create_node(NodeKind::StringConcatenationCall, call);
        self.unify_data_flow_from_postponed_lambdas(node, true);
        self.add_new_simple_node(node, false);
        node
    }

    pub fn exit_check_not_null_call(
        &mut self,
        ast: &AstArena,
        call: AstId,
        call_completed: bool,
    ) -> NodeId {
        let node = self.create_node(NodeKind::CheckNotNullCall, call);
        self.unify_data_flow_from_postponed_lambdas(node, call_completed);
        // `x!!` where x: Nothing? always throws.
        if ast.returns_nothing(call) {
            self.add_non_successfully_terminating_node(node);
        } else {
            self.add_new_simple_node(node, false);
        }
        node
    }

    /// `by` delegate expressions are complete calls in their own right.
    pub fn enter_delegate_expression(&mut self) {
        self.split_data_flow_for_postponed_lambdas();
    }

    pub fn exit_delegate_expression(&mut self, expression: AstId) -> NodeId {
        let node = self.create_node(NodeKind::DelegateExpressionExit, expression);
        self.unify_data_flow_from_postponed_lambdas(node, true);
        self.add_new_simple_node(node, false);
        node
    }
}
