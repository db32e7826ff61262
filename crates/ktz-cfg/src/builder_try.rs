//! Try/catch/finally wiring and exception-edge injection.
//!
//! Catch enter nodes and the finally enter node are created when the try is
//! entered, so that every potentially raising node inside the scope can be
//! wired to them as it appears. Whether a handler encloses a node is decided
//! by comparing nesting levels rather than walking the graph stack, because
//! closures called in place are transparent to exception propagation while
//! deferred closures are not.

use crate::builder::{ControlFlowGraphBuilder, TryFrame};
use crate::graph::GraphKind;
use crate::node::{EdgeKind, EdgeLabel, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind};

impl ControlFlowGraphBuilder {
    /// Level of the nearest graph that catches exceptions escaping the
    /// current position. Called-in-place closure graphs are skipped: an
    /// exception inside one propagates through the enclosing call.
    pub(crate) fn level_of_next_exception_catching_graph(&self) -> u32 {
        let graph = self
            .graphs
            .iter()
            .rev()
            .copied()
            .find(|&g| self.arena.graph(g).kind != GraphKind::LambdaCalledInPlace)
            .expect("no exception-catching graph open");
        self.arena.node(self.arena.graph(graph).exit_node()).level
    }

    /// Wire a potentially raising node to the enclosing catch clauses and,
    /// with an uncaught-exception label, to the enclosing finally block.
    /// Handlers at or below the next exception-catching graph belong to an
    /// outer declaration and are skipped.
    pub(crate) fn add_exception_edges_from(&mut self, node: NodeId) {
        if !self.arena.node(node).kind.can_throw() {
            return;
        }
        let boundary = self.level_of_next_exception_catching_graph();
        if let Some(catches) = self.catch_node_stack.last()
            && let Some(&first) = catches.first()
            && self.arena.node(first).level > boundary
        {
            for catch in catches.clone() {
                self.add_edge_full(
                    node,
                    catch,
                    false,
                    false,
                    EdgeKind::Forward,
                    EdgeLabel::NormalPath,
                );
            }
        }
        if let Some(&finally_enter) = self.finally_enter_nodes.last()
            && self.arena.node(finally_enter).level > boundary
        {
            self.add_edge_full(
                node,
                finally_enter,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::UncaughtExceptionPath,
            );
        }
    }

    fn all_normal_inputs_are_dead(&self, node: NodeId) -> bool {
        self.arena
            .incoming_edges(node)
            .all(|(_, edge)| edge.kind.is_dead() || edge.label != EdgeLabel::NormalPath)
    }

    // ------------------------------ protocol ------------------------------

    /// The try exit is created before the frame is pushed so it sits at the
    /// enclosing level; everything inside the try is one level deeper.
    pub fn enter_try_expression(&mut self, ast: &AstArena, try_element: AstId) -> (NodeId, NodeId) {
        let (catches, has_finally) = match ast.kind(try_element) {
            ElementKind::Try {
                catches,
                has_finally,
            } => (catches.clone(), *has_finally),
            other => panic!("enter_try_expression on non-try element {try_element:?}: {other:?}"),
        };

        let enter = self.create_node(NodeKind::TryEnter, try_element);
        self.add_new_simple_node(enter, false);

        let exit = self.create_node(NodeKind::TryExit, try_element);
        self.try_frames.push(TryFrame {
            try_element,
            exit,
            has_finally,
        });

        let main_block_enter = self.create_node(NodeKind::TryMainBlockEnter, try_element);
        self.add_new_simple_node(main_block_enter, false);

        let catch_enters: Vec<NodeId> = catches
            .iter()
            .map(|&catch| self.create_node(NodeKind::CatchClauseEnter, catch))
            .collect();
        // An exception may rise before the first statement of the main
        // block runs (for example while evaluating default arguments of a
        // call in the block's first expression).
        for &catch_enter in &catch_enters {
            self.add_edge(enter, catch_enter);
        }
        self.catch_node_stack.push(catch_enters);

        if has_finally {
            let finally_enter = self.create_node(NodeKind::FinallyBlockEnter, try_element);
            self.add_edge_full(
                enter,
                finally_enter,
                true,
                false,
                EdgeKind::Forward,
                EdgeLabel::UncaughtExceptionPath,
            );
            self.finally_enter_nodes.push(finally_enter);
        }

        self.not_completed_function_calls.push(Vec::new());
        self.split_data_flow_for_postponed_lambdas();
        (enter, main_block_enter)
    }

    /// Normal completion of the main block continues into the finally block
    /// (or the try exit). The pending catch enters also continue from here,
    /// pushed in reverse so the driver pops them in source order.
    pub fn exit_try_main_block(&mut self) -> NodeId {
        let frame = *self
            .try_frames
            .last()
            .expect("exit_try_main_block outside a try expression");
        let node = self.create_node(NodeKind::TryMainBlockExit, frame.try_element);
        self.pop_and_add_edge(node, EdgeKind::Forward);

        let next = if frame.has_finally {
            *self
                .finally_enter_nodes
                .last()
                .expect("try with finally lost its finally enter node")
        } else {
            frame.exit
        };
        self.add_edge_full(node, next, false, false, EdgeKind::Forward, EdgeLabel::NormalPath);

        let catch_enters = self
            .catch_node_stack
            .pop()
            .expect("unbalanced catch stack around try main block");
        for catch_enter in catch_enters.into_iter().rev() {
            self.catches_in_progress.push(catch_enter);
            self.add_edge_full(
                node,
                catch_enter,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::NormalPath,
            );
        }
        node
    }

    pub fn enter_catch_clause(&mut self, catch: AstId) -> NodeId {
        let enter = self
            .catches_in_progress
            .pop()
            .expect("enter_catch_clause without a pending catch");
        assert_eq!(
            self.arena.node(enter).ast,
            catch,
            "catch clauses visited out of source order"
        );
        if self
            .try_frames
            .last()
            .expect("enter_catch_clause outside a try expression")
            .has_finally
        {
            let finally_enter = *self
                .finally_enter_nodes
                .last()
                .expect("try with finally lost its finally enter node");
            self.add_edge_full(
                enter,
                finally_enter,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::UncaughtExceptionPath,
            );
        }
        self.last_nodes.push(enter);
        enter
    }

    pub fn exit_catch_clause(&mut self, catch: AstId) -> NodeId {
        let frame = *self
            .try_frames
            .last()
            .expect("exit_catch_clause outside a try expression");
        let node = self.create_node(NodeKind::CatchClauseExit, catch);
        self.pop_and_add_edge(node, EdgeKind::Forward);

        let next = if frame.has_finally {
            *self
                .finally_enter_nodes
                .last()
                .expect("try with finally lost its finally enter node")
        } else {
            frame.exit
        };
        self.add_edge_full(node, next, false, false, EdgeKind::Forward, EdgeLabel::NormalPath);
        node
    }

    pub fn enter_finally_block(&mut self) -> NodeId {
        let enter = self
            .finally_enter_nodes
            .pop()
            .expect("enter_finally_block without a pending finally");
        self.last_nodes.push(enter);
        self.finallies_in_progress.push(enter);
        enter
    }

    /// Besides the normal continuation into the try exit, the finally exit
    /// re-emits every path that was routed through the finally block: the
    /// uncaught-exception path to the next enclosing finally, and each
    /// labeled jump edge whose target lies outside this try.
    pub fn exit_finally_block(&mut self) -> NodeId {
        let enter = *self
            .finallies_in_progress
            .last()
            .expect("exit_finally_block without matching enter_finally_block");
        let frame = *self
            .try_frames
            .last()
            .expect("exit_finally_block outside a try expression");

        let node = self.create_node(NodeKind::FinallyBlockExit, frame.try_element);
        self.pop_and_add_edge(node, EdgeKind::Forward);
        // If nothing reaches the finally normally, nothing leaves it
        // normally either.
        self.add_edge_full(
            node,
            frame.exit,
            true,
            self.all_normal_inputs_are_dead(enter),
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );

        let boundary = self.level_of_next_exception_catching_graph();
        let next_finally = self
            .finally_enter_nodes
            .last()
            .copied()
            .filter(|&f| self.arena.node(f).level > boundary);
        if let Some(finally_enter) = next_finally {
            self.add_edge_full(
                node,
                finally_enter,
                false,
                false,
                EdgeKind::Forward,
                EdgeLabel::UncaughtExceptionPath,
            );
        }
        let min_level = next_finally
            .map(|f| self.arena.node(f).level)
            .unwrap_or(boundary);

        let return_targets: Vec<NodeId> = self.exit_targets_for_return.values().copied().collect();
        self.re_emit_jump_edges(node, return_targets, min_level);
        let continue_targets: Vec<NodeId> =
            self.loop_condition_enter_nodes.values().copied().collect();
        self.re_emit_jump_edges(node, continue_targets, min_level);
        let break_targets: Vec<NodeId> = self.loop_exit_nodes.values().copied().collect();
        self.re_emit_jump_edges(node, break_targets, min_level);
        node
    }

    /// Continue labeled jump edges past this finally block. Targets below
    /// `min_level` are reachable only through an enclosing finally, which
    /// will re-emit them in turn; targets never jumped to are skipped.
    fn re_emit_jump_edges(&mut self, from: NodeId, targets: Vec<NodeId>, min_level: u32) {
        for target in targets {
            if self.arena.node(target).level < min_level
                || !self.non_direct_jumps.contains_key(&target)
            {
                continue;
            }
            if self.return_path_is_backwards(target) {
                self.add_back_edge(from, target, false, EdgeLabel::JumpTarget(target));
            } else {
                self.add_edge_full(
                    from,
                    target,
                    false,
                    false,
                    EdgeKind::Forward,
                    EdgeLabel::JumpTarget(target),
                );
            }
        }
    }

    /// Late `Nothing` information can orphan a finally block: if every
    /// normal path into the finally died while the edge out of it was
    /// created live, the try exit keeps a stale live input. Detect that
    /// case and rebuild the exit's single incoming edge as dead.
    pub fn exit_try_expression(&mut self, ast: &AstArena, call_completed: bool) -> NodeId {
        let mut have_nothing_call = false;
        for call in self
            .not_completed_function_calls
            .pop()
            .expect("unbalanced pending-call scope around try")
        {
            have_nothing_call |= self.complete_function_call(ast, call);
        }

        let frame = self
            .try_frames
            .pop()
            .expect("exit_try_expression without matching enter_try_expression");
        let node = frame.exit;

        if frame.has_finally {
            let finally_enter = self
                .finallies_in_progress
                .pop()
                .expect("try with finally lost its finally enter node");
            if have_nothing_call && self.all_normal_inputs_are_dead(finally_enter) {
                let incoming = &self.arena.node(node).incoming;
                assert_eq!(
                    incoming.len(),
                    1,
                    "try exit after a finally should have exactly one input"
                );
                let finally_exit = incoming[0];
                self.arena.remove_all_incoming_edges(node);
                self.add_edge_full(
                    finally_exit,
                    node,
                    true,
                    true,
                    EdgeKind::Forward,
                    EdgeLabel::NormalPath,
                );
            }
        }

        self.merge_data_flow_from_postponed_lambdas(node, call_completed);
        self.arena.update_dead_status(node);
        self.last_nodes.push(node);
        node
    }
}
