//! Loop wiring: pre-condition (`while`) and post-condition (`do-while`)
//! loops, including constant-condition deadness seeding and back edges.
//!
//! Back edges are created after both endpoints exist and never carry
//! deadness forward. Loop exits recompute their liveness from all incoming
//! edges once every edge is in place, because a constant condition can make
//! either the body or the exit unreachable.

use crate::builder::ControlFlowGraphBuilder;
use crate::node::{EdgeKind, EdgeLabel, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind, LoopKind};

impl ControlFlowGraphBuilder {
    fn loop_condition(&self, ast: &AstArena, loop_element: AstId, expected: LoopKind) -> AstId {
        match ast.kind(loop_element) {
            ElementKind::Loop { kind, condition } if *kind == expected => *condition,
            other => panic!("loop operation on non-loop element {loop_element:?}: {other:?}"),
        }
    }

    // ------------------------------ while ------------------------------

    /// `enter -> condition enter`; the exit node is created up front so
    /// `break` can target it.
    pub fn enter_while_loop(&mut self, ast: &AstArena, loop_element: AstId) -> (NodeId, NodeId) {
        let condition = self.loop_condition(ast, loop_element, LoopKind::While);
        let enter = self.create_node(NodeKind::LoopEnter, loop_element);
        self.add_new_simple_node(enter, false);

        let exit = self.create_node(NodeKind::LoopExit, loop_element);
        self.loop_exit_nodes.insert(loop_element, exit);

        let condition_enter = self.create_node(
            NodeKind::LoopConditionEnter {
                loop_element,
                is_post_condition: false,
            },
            condition,
        );
        self.add_new_simple_node(condition_enter, false);
        self.loop_condition_enter_nodes.insert(loop_element, condition_enter);
        (enter, condition_enter)
    }

    /// `condition exit -> { loop exit, block enter }`. A constant condition
    /// kills the branch it rules out: `while (true)` kills the exit edge,
    /// `while (false)` kills the body edge.
    pub fn exit_while_loop_condition(
        &mut self,
        ast: &AstArena,
        loop_element: AstId,
    ) -> (NodeId, NodeId) {
        let condition = self.loop_condition(ast, loop_element, LoopKind::While);
        let condition_exit = self.create_node(NodeKind::LoopConditionExit, condition);
        self.add_new_simple_node(condition_exit, false);

        let condition_value = ast.bool_const(condition);
        let exit = self.loop_exit_nodes[&loop_element];
        self.add_edge_full(
            condition_exit,
            exit,
            false,
            condition_value == Some(true),
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );

        let block_enter = self.create_node(NodeKind::LoopBlockEnter, loop_element);
        self.add_new_simple_node(block_enter, condition_value == Some(false));
        (condition_exit, block_enter)
    }

    /// `block exit -> condition enter` (back edge), then the exit node's
    /// liveness is settled and it becomes the cursor.
    pub fn exit_while_loop(&mut self, loop_element: AstId) -> (NodeId, NodeId) {
        let block_exit = self.create_node(NodeKind::LoopBlockExit, loop_element);
        self.pop_and_add_edge(block_exit, EdgeKind::Forward);

        let condition_enter = self
            .loop_condition_enter_nodes
            .remove(&loop_element)
            .expect("exit_while_loop without matching enter_while_loop");
        self.add_back_edge(block_exit, condition_enter, false, EdgeLabel::NormalPath);

        let exit = self
            .loop_exit_nodes
            .remove(&loop_element)
            .expect("exit_while_loop without matching enter_while_loop");
        self.arena.update_dead_status(exit);
        self.last_nodes.push(exit);
        (block_exit, exit)
    }

    // ----------------------------- do-while -----------------------------

    /// `enter -> block enter`; the condition enter node is created up front
    /// so `continue` inside the body can target it.
    pub fn enter_do_while_loop(&mut self, ast: &AstArena, loop_element: AstId) -> (NodeId, NodeId) {
        let condition = self.loop_condition(ast, loop_element, LoopKind::DoWhile);
        let enter = self.create_node(NodeKind::LoopEnter, loop_element);
        self.add_new_simple_node(enter, false);

        let exit = self.create_node(NodeKind::LoopExit, loop_element);
        self.loop_exit_nodes.insert(loop_element, exit);

        let block_enter = self.create_node(NodeKind::LoopBlockEnter, loop_element);
        self.add_new_simple_node(block_enter, false);
        // Kept on the cursor stack until exit_do_while_loop wires the
        // condition's back edge into it.
        self.last_nodes.push(block_enter);

        let condition_enter = self.create_node(
            NodeKind::LoopConditionEnter {
                loop_element,
                is_post_condition: true,
            },
            condition,
        );
        self.loop_condition_enter_nodes.insert(loop_element, condition_enter);
        (enter, block_enter)
    }

    /// `block exit -> condition enter`. The condition may already have
    /// incoming jump edges (`continue` inside the condition of an enclosing
    /// iteration), so its liveness is recomputed rather than inherited.
    pub fn enter_do_while_loop_condition(&mut self, loop_element: AstId) -> (NodeId, NodeId) {
        let block_exit = self.create_node(NodeKind::LoopBlockExit, loop_element);
        self.add_new_simple_node(block_exit, false);

        let condition_enter = self.loop_condition_enter_nodes[&loop_element];
        self.add_new_simple_node(condition_enter, false);
        self.arena.update_dead_status(condition_enter);
        (block_exit, condition_enter)
    }

    /// `condition exit -> { block enter (back), loop exit }`. `while (true)`
    /// kills the exit edge, `while (false)` kills the back edge.
    pub fn exit_do_while_loop(&mut self, ast: &AstArena, loop_element: AstId) -> (NodeId, NodeId) {
        self.loop_condition_enter_nodes
            .remove(&loop_element)
            .expect("exit_do_while_loop without matching enter_do_while_loop");

        let condition = self.loop_condition(ast, loop_element, LoopKind::DoWhile);
        let condition_exit = self.create_node(NodeKind::LoopConditionExit, condition);
        self.pop_and_add_edge(condition_exit, EdgeKind::Forward);

        let condition_value = ast.bool_const(condition);
        let block_enter = self
            .last_nodes
            .pop()
            .expect("exit_do_while_loop with no pending block enter");
        assert_eq!(
            self.arena.node(block_enter).kind,
            NodeKind::LoopBlockEnter,
            "exit_do_while_loop found a foreign cursor"
        );
        self.add_back_edge(
            condition_exit,
            block_enter,
            condition_value == Some(false),
            EdgeLabel::NormalPath,
        );

        let exit = self
            .loop_exit_nodes
            .remove(&loop_element)
            .expect("exit_do_while_loop without matching enter_do_while_loop");
        self.add_edge_full(
            condition_exit,
            exit,
            false,
            condition_value == Some(true),
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.arena.update_dead_status(exit);
        self.last_nodes.push(exit);
        (condition_exit, exit)
    }
}
