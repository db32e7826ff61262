//! Branching expressions: multi-branch conditionals (`when`/`if`),
//! short-circuit boolean operators, safe calls, and elvis.
//!
//! All of these merge several predecessors into one exit node, so each exit
//! recomputes its liveness after the last edge is added. Branching
//! expressions that can hold not-yet-completed calls also scope a
//! postponed-closure frame so deferred closure exits merge at the right
//! point instead of leaking into an enclosing call.

use crate::builder::ControlFlowGraphBuilder;
use crate::node::{EdgeKind, EdgeLabel, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind, LogicOperator};

impl ControlFlowGraphBuilder {
    // ------------------------------- when -------------------------------

    /// The exit node is created up front so branch results can target it as
    /// they finish.
    pub fn enter_when_expression(&mut self, when: AstId) -> NodeId {
        let enter = self.create_node(NodeKind::WhenEnter, when);
        self.add_new_simple_node(enter, false);
        let exit = self.create_node(NodeKind::WhenExit, when);
        self.when_exit_nodes.push(exit);
        self.not_completed_function_calls.push(Vec::new());
        self.split_data_flow_for_postponed_lambdas();
        enter
    }

    pub fn exit_when_subject_expression(&mut self, subject: AstId) -> NodeId {
        let node = self.create_node(NodeKind::WhenSubjectExit, subject);
        self.add_new_simple_node(node, false);
        node
    }

    fn branch_condition(&self, ast: &AstArena, branch: AstId) -> AstId {
        match ast.kind(branch) {
            ElementKind::WhenBranch { condition } => *condition,
            other => panic!("when-branch operation on non-branch element {branch:?}: {other:?}"),
        }
    }

    /// Whether a condition-exit node belongs to a branch that matches every
    /// subject, making whatever follows it (later branches, the synthetic
    /// else) unreachable.
    fn branch_always_matches(&self, ast: &AstArena, condition_exit: NodeId) -> bool {
        let node = self.arena.node(condition_exit);
        node.kind == NodeKind::WhenBranchConditionExit
            && ast.bool_const(self.branch_condition(ast, node.ast)) == Some(true)
    }

    /// A previous branch with a constantly true condition (`if (true)`'s
    /// then-arm, an `else` arm out of order) short-circuits matching; every
    /// later branch enters dead.
    pub fn enter_when_branch_condition(&mut self, ast: &AstArena, branch: AstId) -> NodeId {
        let node = self.create_node(NodeKind::WhenBranchConditionEnter, branch);
        let unreachable = self.branch_always_matches(ast, self.last_node());
        self.add_new_simple_node(node, unreachable);
        node
    }

    /// The condition exit stays on the cursor stack under the branch result:
    /// the next branch's condition (or the synthetic else) continues from it.
    /// A constantly false condition makes its result dead.
    pub fn exit_when_branch_condition(&mut self, ast: &AstArena, branch: AstId) -> (NodeId, NodeId) {
        let condition_exit = self.create_node(NodeKind::WhenBranchConditionExit, branch);
        self.add_new_simple_node(condition_exit, false);
        self.last_nodes.push(condition_exit);

        let never_matches = ast.bool_const(self.branch_condition(ast, branch)) == Some(false);
        let result_enter = self.create_node(NodeKind::WhenBranchResultEnter, branch);
        self.add_new_simple_node(result_enter, never_matches);
        (condition_exit, result_enter)
    }

    pub fn exit_when_branch_result(&mut self, branch: AstId) -> NodeId {
        let node = self.create_node(NodeKind::WhenBranchResultExit, branch);
        self.pop_and_add_edge(node, EdgeKind::Forward);
        let exit = *self
            .when_exit_nodes
            .last()
            .expect("exit_when_branch_result outside a when expression");
        self.add_edge_full(node, exit, false, false, EdgeKind::Forward, EdgeLabel::NormalPath);
        node
    }

    /// A non-exhaustive subject gets a synthetic "no match" branch from the
    /// last condition to the exit. Exhaustiveness is a checker concern, so
    /// the branch stays live unless the last condition is a constant `true`,
    /// in which case no subject can fall through to it.
    pub fn exit_when_expression(
        &mut self,
        ast: &AstArena,
        when: AstId,
        exhaustive: bool,
        call_completed: bool,
    ) -> (NodeId, Option<NodeId>) {
        let exit = self
            .when_exit_nodes
            .pop()
            .expect("exit_when_expression without matching enter_when_expression");
        for call in self
            .not_completed_function_calls
            .pop()
            .expect("unbalanced pending-call scope around when")
        {
            self.complete_function_call(ast, call);
        }

        // Cursor left behind by the last exit_when_branch_condition (or the
        // subject/enter node when there are no branches).
        let last_condition_exit = self
            .last_nodes
            .pop()
            .expect("exit_when_expression with no active scope cursor");
        let synthetic_else = if exhaustive {
            None
        } else {
            let node = self.create_node(NodeKind::WhenSyntheticElseBranch, when);
            let no_fallthrough = self.branch_always_matches(ast, last_condition_exit);
            self.add_edge_full(
                last_condition_exit,
                node,
                true,
                no_fallthrough,
                EdgeKind::Forward,
                EdgeLabel::NormalPath,
            );
            self.add_edge_full(node, exit, false, false, EdgeKind::Forward, EdgeLabel::NormalPath);
            Some(node)
        };

        self.merge_data_flow_from_postponed_lambdas(exit, call_completed);
        self.arena.update_dead_status(exit);
        self.last_nodes.push(exit);
        (exit, synthetic_else)
    }

    // ---------------------- short-circuit operators ----------------------

    fn logic_operands(&self, ast: &AstArena, expression: AstId) -> (LogicOperator, AstId) {
        match ast.kind(expression) {
            ElementKind::BinaryLogic { op, left } => (*op, *left),
            other => panic!(
                "binary logic operation on non-logic element {expression:?}: {other:?}"
            ),
        }
    }

    pub fn enter_binary_logic_expression(&mut self, ast: &AstArena, expression: AstId) -> NodeId {
        let (op, _) = self.logic_operands(ast, expression);
        let node = self.create_node(NodeKind::BinaryLogicEnter { op }, expression);
        self.add_new_simple_node(node, false);
        node
    }

    /// The left-operand exit stays on the cursor stack under the right
    /// operand: the operator exit merges both. A constant left operand that
    /// short-circuits (`false && x`, `true || x`) makes the right operand
    /// unreachable.
    pub fn exit_left_binary_logic_operand(
        &mut self,
        ast: &AstArena,
        expression: AstId,
    ) -> (NodeId, NodeId) {
        let (op, left) = self.logic_operands(ast, expression);
        let left_exit = self.create_node(NodeKind::BinaryLogicExitLeftOperand { op }, expression);
        self.add_new_simple_node(left_exit, false);
        self.last_nodes.push(left_exit);

        let rhs_never_executed = ast.bool_const(left) == Some(op != LogicOperator::And);
        let right_enter = self.create_node(NodeKind::BinaryLogicEnterRightOperand { op }, expression);
        self.add_new_simple_node(right_enter, rhs_never_executed);
        (left_exit, right_enter)
    }

    /// A constant left operand that does *not* short-circuit (`true && x`,
    /// `false || x`) means the result is always the right operand; the
    /// direct left-to-exit edge is then dead.
    pub fn exit_binary_logic_expression(&mut self, ast: &AstArena, expression: AstId) -> NodeId {
        let (op, left) = self.logic_operands(ast, expression);
        let exit = self.create_node(NodeKind::BinaryLogicExit { op }, expression);

        let right_exit = self
            .last_nodes
            .pop()
            .expect("exit_binary_logic_expression with no right operand cursor");
        let left_exit = self
            .last_nodes
            .pop()
            .expect("exit_binary_logic_expression with no left operand cursor");

        let rhs_always_executed = ast.bool_const(left) == Some(op == LogicOperator::And);
        self.add_edge_full(
            left_exit,
            exit,
            !rhs_always_executed,
            rhs_always_executed,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.add_edge_full(
            right_exit,
            exit,
            rhs_always_executed,
            false,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.last_nodes.push(exit);
        exit
    }

    // ----------------------------- safe call -----------------------------

    /// `a?.b`: the receiver either continues into the selector or skips to
    /// the safe-call exit on null. In a chain `a?.b?.c` the null branch of
    /// the inner call must not re-enter the outer selector, so when the
    /// cursor is itself a safe-call exit, only its non-null predecessor
    /// feeds this enter node. When the safe call is the left-hand side of a
    /// pending elvis, the null branch goes straight to the elvis right-hand
    /// side instead of the safe-call exit.
    pub fn enter_safe_call(&mut self, ast: &AstArena, safe_call: AstId) -> NodeId {
        let enter = self.create_node(NodeKind::SafeCallEnter, safe_call);
        let exit = self.create_node(NodeKind::SafeCallExit, safe_call);
        self.exit_safe_call_nodes.push(exit);

        let last = self
            .last_nodes
            .pop()
            .expect("enter_safe_call with no active scope cursor");
        if self.arena.node(last).kind == NodeKind::SafeCallExit {
            let non_null_predecessor = *self
                .arena
                .node(last)
                .incoming
                .last()
                .expect("safe-call exit with no predecessors");
            self.add_edge(non_null_predecessor, enter);
        } else {
            self.add_edge(last, enter);
        }

        let pending_elvis_rhs = self.elvis_rhs_enter_nodes.last().copied().filter(|&rhs| {
            matches!(
                ast.kind(self.arena.node(rhs).ast),
                ElementKind::Elvis { lhs } if *lhs == safe_call
            )
        });
        match pending_elvis_rhs {
            Some(rhs) => self.add_edge(last, rhs),
            None => self.add_edge(last, exit),
        }

        self.last_nodes.push(enter);
        self.split_data_flow_for_postponed_lambdas();
        enter
    }

    pub fn exit_safe_call(&mut self) -> NodeId {
        let exit = self
            .exit_safe_call_nodes
            .pop()
            .expect("exit_safe_call without matching enter_safe_call");
        self.add_new_simple_node(exit, false);
        self.merge_data_flow_from_postponed_lambdas(exit, false);
        self.arena.update_dead_status(exit);
        exit
    }

    // ------------------------------- elvis -------------------------------

    /// The right-hand-side enter node is created up front so a safe call on
    /// the left-hand side can route its null branch directly to it.
    pub fn enter_elvis(&mut self, elvis: AstId) -> NodeId {
        let rhs_enter = self.create_node(NodeKind::ElvisRhsEnter, elvis);
        self.elvis_rhs_enter_nodes.push(rhs_enter);
        self.split_data_flow_for_postponed_lambdas();
        rhs_enter
    }

    /// `lhs exit -> { lhs-is-not-null -> exit, rhs enter }`. A left-hand
    /// side typed as always null makes the not-null branch dead.
    pub fn exit_elvis_lhs(
        &mut self,
        elvis: AstId,
        lhs_is_always_null: bool,
    ) -> (NodeId, NodeId, NodeId) {
        let exit = self.create_node(NodeKind::ElvisExit, elvis);
        self.exit_elvis_nodes.push(exit);

        let lhs_exit = self.create_node(NodeKind::ElvisLhsExit, elvis);
        self.pop_and_add_edge(lhs_exit, EdgeKind::Forward);

        let lhs_is_not_null = self.create_node(NodeKind::ElvisLhsIsNotNull, elvis);
        self.add_edge_full(
            lhs_exit,
            lhs_is_not_null,
            true,
            lhs_is_always_null,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.add_edge_full(
            lhs_is_not_null,
            exit,
            false,
            false,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );

        let rhs_enter = self
            .elvis_rhs_enter_nodes
            .pop()
            .expect("exit_elvis_lhs without matching enter_elvis");
        // A safe call on the lhs may have wired the null branch in already;
        // only a first edge should settle the rhs liveness.
        let propagate = self.arena.node(rhs_enter).incoming.is_empty();
        self.add_edge_full(
            lhs_exit,
            rhs_enter,
            propagate,
            false,
            EdgeKind::Forward,
            EdgeLabel::NormalPath,
        );
        self.last_nodes.push(rhs_enter);
        (lhs_exit, lhs_is_not_null, rhs_enter)
    }

    /// A left-hand side proven non-null makes the just-evaluated rhs path
    /// dead on arrival at the exit.
    pub fn exit_elvis(&mut self, lhs_is_not_null: bool, call_completed: bool) -> NodeId {
        let exit = self
            .exit_elvis_nodes
            .pop()
            .expect("exit_elvis without matching enter_elvis");
        self.add_new_simple_node(exit, lhs_is_not_null);
        self.merge_data_flow_from_postponed_lambdas(exit, call_completed);
        self.arena.update_dead_status(exit);
        exit
    }
}
