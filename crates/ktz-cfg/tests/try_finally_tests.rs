//! Exception routing: catch reachability, finally redirection of jumps, and
//! late `Nothing` completion inside try expressions.

use ktz_ast::{AstArena, AstId, ElementKind, FunctionKind};
use ktz_cfg::{ControlFlowGraphBuilder, EdgeKind, EdgeLabel, NodeId};

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

fn completed_call(ast: &AstArena, builder: &mut ControlFlowGraphBuilder, call: AstId) -> NodeId {
    builder.enter_call();
    builder.enter_call_arguments(call, &[]);
    builder.exit_call_arguments();
    builder.exit_function_call(ast, call, true)
}

#[test]
fn throwing_call_is_wired_to_every_catch_clause() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let first_catch = ast.alloc(ElementKind::Catch);
    let second_catch = ast.alloc(ElementKind::Catch);
    let try_element = ast.alloc(ElementKind::Try {
        catches: vec![first_catch, second_catch],
        has_finally: false,
    });
    let call = ast.alloc(ElementKind::FunctionCall);
    let handler = ast.alloc(ElementKind::VariableAssignment);

    let (try_enter, _) = builder.enter_try_expression(&ast, try_element);
    let call_node = completed_call(&ast, &mut builder, call);
    let main_exit = builder.exit_try_main_block();
    let first_enter = builder.enter_catch_clause(first_catch);
    builder.exit_variable_assignment(handler);
    let first_exit = builder.exit_catch_clause(first_catch);
    let second_enter = builder.enter_catch_clause(second_catch);
    let second_exit = builder.exit_catch_clause(second_catch);
    let try_exit = builder.exit_try_expression(&ast, true);
    builder.exit_block(body);
    let (exit, _) = builder.exit_function(f);

    let arena = builder.arena();
    for catch_enter in [first_enter, second_enter] {
        assert!(arena.try_edge(try_enter, catch_enter).is_some());
        assert!(arena.try_edge(call_node, catch_enter).is_some());
        assert!(arena.try_edge(main_exit, catch_enter).is_some());
    }
    assert_eq!(arena.edge(main_exit, try_exit).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(first_exit, try_exit).kind, EdgeKind::Forward);
    assert_eq!(arena.edge(second_exit, try_exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(try_exit));
    assert!(!arena.is_dead(exit));
}

#[test]
fn finally_is_on_the_normal_and_uncaught_exception_paths() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let catch = ast.alloc(ElementKind::Catch);
    let try_element = ast.alloc(ElementKind::Try {
        catches: vec![catch],
        has_finally: true,
    });
    let call = ast.alloc(ElementKind::FunctionCall);

    let (try_enter, _) = builder.enter_try_expression(&ast, try_element);
    let call_node = completed_call(&ast, &mut builder, call);
    let main_exit = builder.exit_try_main_block();
    let catch_enter = builder.enter_catch_clause(catch);
    let catch_exit = builder.exit_catch_clause(catch);
    let finally_enter = builder.enter_finally_block();
    let finally_exit = builder.exit_finally_block();
    let try_exit = builder.exit_try_expression(&ast, true);
    builder.exit_block(body);
    builder.exit_function(f);

    let arena = builder.arena();
    assert_eq!(
        arena.edge(try_enter, finally_enter).label,
        EdgeLabel::UncaughtExceptionPath
    );
    assert_eq!(
        arena.edge(call_node, finally_enter).label,
        EdgeLabel::UncaughtExceptionPath
    );
    assert_eq!(
        arena.edge(catch_enter, finally_enter).label,
        EdgeLabel::UncaughtExceptionPath
    );
    assert_eq!(arena.edge(main_exit, finally_enter).label, EdgeLabel::NormalPath);
    assert_eq!(arena.edge(catch_exit, finally_enter).label, EdgeLabel::NormalPath);
    assert_eq!(arena.edge(finally_exit, try_exit).kind, EdgeKind::Forward);
    assert!(!arena.is_dead(try_exit));
}

#[test]
fn return_through_finally_is_redirected_and_re_emitted() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let try_element = ast.alloc(ElementKind::Try {
        catches: vec![],
        has_finally: true,
    });
    let ret = ast.alloc(ElementKind::Return {
        target: f,
        value: AstId::NONE,
    });
    let cleanup = ast.alloc(ElementKind::VariableAssignment);

    builder.enter_try_expression(&ast, try_element);
    builder.enter_jump(&ast, ret);
    let jump = builder.exit_jump(&ast, ret);
    builder.exit_try_main_block();
    let finally_enter = builder.enter_finally_block();
    builder.exit_variable_assignment(cleanup);
    let finally_exit = builder.exit_finally_block();
    let try_exit = builder.exit_try_expression(&ast, true);
    builder.exit_block(body);
    let (function_exit, _) = builder.exit_function(f);

    let arena = builder.arena();
    // The jump lands on the finally enter, tagged with its true target.
    let redirected = arena.edge(jump, finally_enter);
    assert_eq!(redirected.label, EdgeLabel::JumpTarget(function_exit));
    assert!(arena.try_edge(jump, function_exit).is_none());
    // The finally exit re-emits the jump past the block.
    let re_emitted = arena.edge(finally_exit, function_exit);
    assert_eq!(re_emitted.kind, EdgeKind::Forward);
    assert_eq!(re_emitted.label, EdgeLabel::JumpTarget(function_exit));
    // No normal path leaves the try anymore.
    assert_eq!(arena.edge(finally_exit, try_exit).kind, EdgeKind::DeadForward);
    assert!(arena.is_dead(try_exit));
}

#[test]
fn late_nothing_completion_kills_the_try_exit() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let try_element = ast.alloc(ElementKind::Try {
        catches: vec![],
        has_finally: true,
    });
    let call = ast.alloc(ElementKind::FunctionCall);

    builder.enter_try_expression(&ast, try_element);
    builder.enter_call();
    builder.enter_call_arguments(call, &[]);
    builder.exit_call_arguments();
    // The call's return type is a type variable at this point.
    let call_node = builder.exit_function_call(&ast, call, false);
    builder.exit_try_main_block();
    builder.enter_finally_block();
    let finally_exit = builder.exit_finally_block();
    // Resolution finishes while the try completes: the call never returns.
    ast.set_returns_nothing(call);
    let try_exit = builder.exit_try_expression(&ast, true);
    builder.exit_block(body);
    let (exit, _) = builder.exit_function(f);

    let arena = builder.arena();
    assert!(!arena.is_dead(call_node));
    assert!(arena.is_dead(try_exit));
    assert_eq!(arena.edge(finally_exit, try_exit).kind, EdgeKind::DeadForward);
    assert!(arena.is_dead(exit));
}

#[test]
fn break_through_finally_reaches_the_loop_exit() {
    let mut ast = AstArena::new();
    let mut builder = ControlFlowGraphBuilder::new();
    let (f, body) = open_function(&mut ast, &mut builder);
    let condition = ast.alloc(ElementKind::QualifiedAccess);
    let loop_element = ast.alloc(ElementKind::Loop {
        kind: ktz_ast::LoopKind::While,
        condition,
    });
    let try_element = ast.alloc(ElementKind::Try {
        catches: vec![],
        has_finally: true,
    });
    let brk = ast.alloc(ElementKind::Break {
        target: loop_element,
    });

    builder.enter_while_loop(&ast, loop_element);
    builder.exit_qualified_access(&ast, condition);
    builder.exit_while_loop_condition(&ast, loop_element);
    builder.enter_try_expression(&ast, try_element);
    builder.enter_jump(&ast, brk);
    let jump = builder.exit_jump(&ast, brk);
    builder.exit_try_main_block();
    let finally_enter = builder.enter_finally_block();
    let finally_exit = builder.exit_finally_block();
    builder.exit_try_expression(&ast, true);
    let (_, loop_exit) = builder.exit_while_loop(loop_element);
    builder.exit_block(body);
    builder.exit_function(f);

    let arena = builder.arena();
    assert_eq!(
        arena.edge(jump, finally_enter).label,
        EdgeLabel::JumpTarget(loop_exit)
    );
    assert_eq!(
        arena.edge(finally_exit, loop_exit).label,
        EdgeLabel::JumpTarget(loop_exit)
    );
    assert!(arena.try_edge(jump, loop_exit).is_none());
}
