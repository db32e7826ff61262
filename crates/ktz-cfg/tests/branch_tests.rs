//! Branch merging: when expressions, short-circuit operators, safe calls,
//! and elvis.

use ktz_ast::{AstArena, AstId, ConstValue, ElementKind, FunctionKind, LogicOperator};
use ktz_cfg::{ControlFlowGraphBuilder, EdgeKind};

fn open_function(ast: &mut AstArena, builder: &mut ControlFlowGraphBuilder) -> (AstId, AstId) {
    let f = ast.alloc(ElementKind::Function {
        name: "f".to_string(),
        kind: FunctionKind::Declaration,
        is_local: false,
    });
    let body = ast.alloc(ElementKind::Block { statements: vec![] });
    builder.enter_function(ast, f);
    builder.enter_block(body);
    (f, body)
}

fn close_function(builder: &mut ControlFlowGraphBuilder, f: AstId, body: AstId) {
    builder.exit_block(body);
    builder.exit_function(f);
}

fn drive_branch(
    ast: &mut AstArena,
    builder: &mut ControlFlowGraphBuilder,
    result: AstId,
) -> (ktz_cfg::NodeId, ktz_cfg::NodeId) {
    let condition = ast.alloc(ElementKind::QualifiedAccess);
    drive_branch_with_condition(ast, builder, condition, result)
}

fn drive_branch_with_condition(
    ast: &mut AstArena,
    builder: &mut ControlFlowGraphBuilder,
    condition: AstId,
    result: AstId,
) -> (ktz_cfg::NodeId, ktz_cfg::NodeId) {
    let branch = ast.alloc(ElementKind::WhenBranch { condition });
    builder.enter_when_branch_condition(ast, branch);
    match ast.kind(condition) {
        ElementKind::ConstExpression { .. } => builder.exit_const_expression(condition),
        _ => builder.exit_qualified_access(ast, condition),
    };
    let (condition_exit, _) = builder.exit_when_branch_condition(ast, branch);
    builder.exit_variable_assignment(result);
    let result_exit = builder.exit_when_branch_result(branch);
    (condition_exit, result_exit)
}

fn bool_literal(ast: &mut AstArena, value: bool) -> AstId {
    ast.alloc(ElementKind::ConstExpression {
        value: ConstValue::Bool(value),
    })
}

#[test]
fn non_exhaustive_when_gets_a_live_synthetic_else() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let result = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_when_expression(when);
    let (condition_exit, result_exit) = drive_branch(&mut ast, &mut builder, result);
    let (exit, synthetic_else) = builder.exit_when_expression(&ast, when, false, true);
    close_function(&mut builder, f, body);

    let synthetic_else = synthetic_else.expect("non-exhaustive when needs a no-match branch");
    let arena = builder.arena();
    assert_eq!(arena.edge(condition_exit, synthetic_else).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(synthetic_else, exit).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(result_exit, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(synthetic_else));
    assert!(!arena.is_dead(exit));
}

#[test]
fn exhaustive_when_merges_all_branches_without_synthetic_else() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let first = ast.alloc(ElementKind::VariableAssignment);
    let second = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_when_expression(when);
    let (_, first_exit) = drive_branch(&mut ast, &mut builder, first);
    let (_, second_exit) = drive_branch(&mut ast, &mut builder, second);
    let (exit, synthetic_else) = builder.exit_when_expression(&ast, when, true, true);
    close_function(&mut builder, f, body);

    assert!(synthetic_else.is_none());
    let arena = builder.arena();
    assert_eq!(arena.edge(first_exit, exit).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(second_exit, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn when_whose_branches_all_jump_leaves_a_dead_exit() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let condition = ast.alloc(ElementKind::QualifiedAccess);
    let branch = ast.alloc(ElementKind::WhenBranch { condition });
    let ret = ast.alloc(ElementKind::Return {
        target: f,
        value: AstId::NONE,
    });

    builder.enter_when_expression(when);
    builder.enter_when_branch_condition(&ast, branch);
    builder.exit_qualified_access(&ast, condition);
    builder.exit_when_branch_condition(&ast, branch);
    builder.enter_jump(&ast, ret);
    builder.exit_jump(&ast, ret);
    builder.exit_when_branch_result(branch);
    let (exit, _) = builder.exit_when_expression(&ast, when, true, true);
    close_function(&mut builder, f, body);

    assert!(builder.arena().is_dead(exit));
}

#[test]
fn constantly_true_condition_makes_the_else_branch_dead() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let then_result = ast.alloc(ElementKind::VariableAssignment);
    let else_result = ast.alloc(ElementKind::VariableAssignment);

    // if (true) { a } else { b }
    builder.enter_when_expression(when);
    let true_condition = bool_literal(&mut ast, true);
    let (_, then_exit) =
        drive_branch_with_condition(&mut ast, &mut builder, true_condition, then_result);

    let else_condition = bool_literal(&mut ast, true);
    let else_branch = ast.alloc(ElementKind::WhenBranch {
        condition: else_condition,
    });
    let else_enter = builder.enter_when_branch_condition(&ast, else_branch);
    builder.exit_const_expression(else_condition);
    builder.exit_when_branch_condition(&ast, else_branch);
    let else_node = builder.exit_variable_assignment(else_result);
    let else_exit = builder.exit_when_branch_result(else_branch);
    let (exit, synthetic_else) = builder.exit_when_expression(&ast, when, true, true);
    close_function(&mut builder, f, body);

    assert!(synthetic_else.is_none());
    let arena = builder.arena();
    assert!(arena.is_dead(else_enter));
    assert!(arena.is_dead(else_node));
    assert_eq!(arena.edge(else_exit, exit).kind, EdgeKind::DeadForward);
    assert_eq!(arena.edge(then_exit, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn constantly_false_condition_makes_the_branch_result_dead() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let result = ast.alloc(ElementKind::VariableAssignment);
    let condition = bool_literal(&mut ast, false);
    let branch = ast.alloc(ElementKind::WhenBranch { condition });

    // if (false) { a }
    builder.enter_when_expression(when);
    builder.enter_when_branch_condition(&ast, branch);
    builder.exit_const_expression(condition);
    let (_, result_enter) = builder.exit_when_branch_condition(&ast, branch);
    let result_node = builder.exit_variable_assignment(result);
    let result_exit = builder.exit_when_branch_result(branch);
    let (exit, synthetic_else) = builder.exit_when_expression(&ast, when, false, true);
    close_function(&mut builder, f, body);

    let synthetic_else = synthetic_else.expect("non-exhaustive when needs a no-match branch");
    let arena = builder.arena();
    assert!(arena.is_dead(result_enter));
    assert!(arena.is_dead(result_node));
    assert_eq!(arena.edge(result_exit, exit).kind, EdgeKind::DeadForward);
    assert!(!arena.is_dead(synthetic_else));
    assert!(!arena.is_dead(exit));
}

#[test]
fn no_match_branch_after_a_constantly_true_condition_is_dead() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let when = ast.alloc(ElementKind::WhenExpression { subject: AstId::NONE });
    let result = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_when_expression(when);
    let condition = bool_literal(&mut ast, true);
    let (condition_exit, result_exit) =
        drive_branch_with_condition(&mut ast, &mut builder, condition, result);
    let (exit, synthetic_else) = builder.exit_when_expression(&ast, when, false, true);
    close_function(&mut builder, f, body);

    let synthetic_else = synthetic_else.expect("non-exhaustive when needs a no-match branch");
    let arena = builder.arena();
    assert_eq!(
        arena.edge(condition_exit, synthetic_else).kind,
        EdgeKind::DeadForward
    );
    assert!(arena.is_dead(synthetic_else));
    assert_eq!(arena.edge(result_exit, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

fn logic_expression(
    ast: &mut AstArena,
    op: LogicOperator,
    left_const: Option<bool>,
) -> (AstId, AstId) {
    let left = match left_const {
        Some(b) => ast.alloc(ElementKind::ConstExpression {
            value: ConstValue::Bool(b),
        }),
        None => ast.alloc(ElementKind::QualifiedAccess),
    };
    let expression = ast.alloc(ElementKind::BinaryLogic { op, left });
    (expression, left)
}

#[test]
fn false_and_rhs_never_executes() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let (expression, left) = logic_expression(&mut ast, LogicOperator::And, Some(false));
    let right = ast.alloc(ElementKind::QualifiedAccess);

    builder.enter_binary_logic_expression(&ast, expression);
    builder.exit_const_expression(left);
    let (left_exit, right_enter) = builder.exit_left_binary_logic_operand(&ast, expression);
    let right_node = builder.exit_qualified_access(&ast, right);
    let exit = builder.exit_binary_logic_expression(&ast, expression);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert!(arena.is_dead(right_enter));
    assert!(arena.is_dead(right_node));
    assert_eq!(arena.edge(left_exit, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn true_and_short_circuit_path_is_dead() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let (expression, left) = logic_expression(&mut ast, LogicOperator::And, Some(true));
    let right = ast.alloc(ElementKind::QualifiedAccess);

    builder.enter_binary_logic_expression(&ast, expression);
    builder.exit_const_expression(left);
    let (left_exit, right_enter) = builder.exit_left_binary_logic_operand(&ast, expression);
    let right_node = builder.exit_qualified_access(&ast, right);
    let exit = builder.exit_binary_logic_expression(&ast, expression);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert!(!arena.is_dead(right_enter));
    // The result is always the right operand.
    assert_eq!(arena.edge(left_exit, exit).kind, EdgeKind::DeadForward);
    assert_eq!(arena.edge(right_node, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn elvis_branches_merge_at_the_exit() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let lhs = ast.alloc(ElementKind::QualifiedAccess);
    let elvis = ast.alloc(ElementKind::Elvis { lhs });
    let rhs = ast.alloc(ElementKind::VariableAssignment);

    let rhs_enter = builder.enter_elvis(elvis);
    builder.exit_qualified_access(&ast, lhs);
    let (lhs_exit, lhs_is_not_null, _) = builder.exit_elvis_lhs(elvis, false);
    let rhs_node = builder.exit_variable_assignment(rhs);
    let exit = builder.exit_elvis(false, true);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert_eq!(arena.edge(lhs_exit, lhs_is_not_null).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(lhs_is_not_null, exit).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(lhs_exit, rhs_enter).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(rhs_node, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn elvis_with_always_null_lhs_kills_the_not_null_branch() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let lhs = ast.alloc(ElementKind::QualifiedAccess);
    let elvis = ast.alloc(ElementKind::Elvis { lhs });
    let rhs = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_elvis(elvis);
    builder.exit_qualified_access(&ast, lhs);
    let (_, lhs_is_not_null, rhs_enter) = builder.exit_elvis_lhs(elvis, true);
    builder.exit_variable_assignment(rhs);
    let exit = builder.exit_elvis(false, true);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert!(arena.is_dead(lhs_is_not_null));
    assert!(!arena.is_dead(rhs_enter));
    assert!(!arena.is_dead(exit));
}

#[test]
fn elvis_with_not_null_lhs_makes_the_rhs_path_dead_at_the_exit() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let lhs = ast.alloc(ElementKind::QualifiedAccess);
    let elvis = ast.alloc(ElementKind::Elvis { lhs });
    let rhs = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_elvis(elvis);
    builder.exit_qualified_access(&ast, lhs);
    let (_, lhs_is_not_null, _) = builder.exit_elvis_lhs(elvis, false);
    let rhs_node = builder.exit_variable_assignment(rhs);
    let exit = builder.exit_elvis(true, true);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert_eq!(arena.edge(rhs_node, exit).kind, EdgeKind::DeadForward);
    assert_eq!(arena.edge(lhs_is_not_null, exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(exit));
}

#[test]
fn safe_call_null_branch_feeds_a_pending_elvis_rhs() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let safe_call = ast.alloc(ElementKind::SafeCall);
    let elvis = ast.alloc(ElementKind::Elvis { lhs: safe_call });
    let receiver = ast.alloc(ElementKind::QualifiedAccess);
    let selector = ast.alloc(ElementKind::QualifiedAccess);
    let rhs = ast.alloc(ElementKind::VariableAssignment);

    let rhs_enter = builder.enter_elvis(elvis);
    let receiver_node = builder.exit_qualified_access(&ast, receiver);
    let safe_enter = builder.enter_safe_call(&ast, safe_call);
    builder.exit_qualified_access(&ast, selector);
    let safe_exit = builder.exit_safe_call();
    builder.exit_elvis_lhs(elvis, false);
    builder.exit_variable_assignment(rhs);
    builder.exit_elvis(false, true);
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    assert_eq!(arena.edge(receiver_node, safe_enter).kind, EdgeKind::Forward);
    // Null branch skips the safe-call exit and lands in the elvis rhs.
    assert!(arena.try_edge(receiver_node, safe_exit).is_none());
    assert_eq!(arena.edge(receiver_node, rhs_enter).kind, EdgeKind::Forward);
}

#[test]
fn chained_safe_call_null_branch_does_not_reenter_the_selector() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let inner = ast.alloc(ElementKind::SafeCall);
    let outer = ast.alloc(ElementKind::SafeCall);
    let receiver = ast.alloc(ElementKind::QualifiedAccess);
    let first_selector = ast.alloc(ElementKind::QualifiedAccess);
    let second_selector = ast.alloc(ElementKind::QualifiedAccess);

    builder.exit_qualified_access(&ast, receiver);
    builder.enter_safe_call(&ast, inner);
    let first_selector_node = builder.exit_qualified_access(&ast, first_selector);
    let inner_exit = builder.exit_safe_call();
    let outer_enter = builder.enter_safe_call(&ast, outer);
    builder.exit_qualified_access(&ast, second_selector);
    let outer_exit = builder.exit_safe_call();
    close_function(&mut builder, f, body);

    let arena = builder.arena();
    // Only the non-null result of the inner call enters the outer selector.
    assert!(arena.try_edge(inner_exit, outer_enter).is_none());
    assert_eq!(arena.edge(first_selector_node, outer_enter).kind, EdgeKind::Forward);
    // The merged inner result still short-circuits to the outer exit.
    assert_eq!(arena.edge(inner_exit, outer_exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(outer_exit));
}
