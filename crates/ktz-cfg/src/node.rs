//! Node and edge primitives of the control-flow graph.
//!
//! The original frontend models one node class per language construct; here
//! a single [`CfgNode`] value carries a [`NodeKind`] tag instead, and
//! construct-specific behavior is a function over the tag. Nodes live in a
//! [`crate::graph::CfgArena`] and are addressed by [`NodeId`]; they are never
//! deleted. Unreachable nodes stay in the graph with their liveness flag
//! cleared so downstream analysis sees the complete topology.

use ktz_ast::{AstId, LogicOperator};
use smallvec::SmallVec;

/// Index of a node in a [`crate::graph::CfgArena`]. Stable for the node's
/// lifetime; side tables key on this instead of reference identity.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a graph in a [`crate::graph::CfgArena`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct GraphId(pub(crate) u32);

impl GraphId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Construct kind of a node. One tag per language construct the traversal
/// driver reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    FunctionEnter,
    FunctionExit,
    LocalFunctionDeclaration,
    /// Lambda expression visited outside an argument list; no in-place
    /// execution, so no placeholder exit is needed.
    LambdaExpression,
    /// Placeholder exit for a closure argument whose execution multiplicity
    /// is not yet resolved.
    PostponedLambdaExit,
    /// Placeholder enter shared by all closure arguments of one call.
    SplitLambdaArguments,
    /// Union node collecting postponed closure exits that had to be
    /// forwarded past a branching expression.
    MergePostponedLambdaExits,
    ClassEnter,
    ClassExit,
    LocalClassExit,
    AnonymousObjectEnter,
    AnonymousObjectExpressionExit,
    ValueParameterEnter,
    ValueParameterExit,
    DefaultArgumentsEnter,
    DefaultArgumentsExit,
    PropertyInitializerEnter,
    PropertyInitializerExit,
    FieldInitializerEnter,
    FieldInitializerExit,
    InitBlockEnter,
    InitBlockExit,
    BlockEnter,
    BlockExit,
    WhenEnter,
    WhenSubjectExit,
    WhenBranchConditionEnter,
    WhenBranchConditionExit,
    WhenBranchResultEnter,
    WhenBranchResultExit,
    /// Synthesized "no match" branch of a non-exhaustive subject. Always
    /// created live; exhaustiveness is diagnosed elsewhere.
    WhenSyntheticElseBranch,
    WhenExit,
    LoopEnter,
    LoopConditionEnter {
        loop_element: AstId,
        is_post_condition: bool,
    },
    LoopConditionExit,
    LoopBlockEnter,
    LoopBlockExit,
    LoopExit,
    TryEnter,
    TryMainBlockEnter,
    TryMainBlockExit,
    CatchClauseEnter,
    CatchClauseExit,
    FinallyBlockEnter,
    FinallyBlockExit,
    TryExit,
    BinaryLogicEnter { op: LogicOperator },
    BinaryLogicExitLeftOperand { op: LogicOperator },
    BinaryLogicEnterRightOperand { op: LogicOperator },
    BinaryLogicExit { op: LogicOperator },
    SafeCallEnter,
    SafeCallExit,
    ElvisLhsExit,
    ElvisLhsIsNotNull,
    ElvisRhsEnter,
    ElvisExit,
    Jump,
    /// Path terminator after a node that never completes normally.
    Stub,
    FunctionCall,
    DelegatedConstructorCall,
    DelegateExpressionExit,
    QualifiedAccess,
    ResolvedQualifier,
    ConstExpression,
    VariableDeclaration,
    VariableAssignment,
    Throw,
    CheckNotNullCall,
    TypeOperatorCall,
    EqualityOperatorCall,
    ComparisonExpression,
    StringConcatenationCall,
    CallableReference,
    GetClassCall,
    SmartCastExit,
    FakeExpressionEnter,
}

impl NodeKind {
    /// Whether this node can raise an exception, making it a source of
    /// auxiliary edges to enclosing catch clauses and finally blocks.
    pub const fn can_throw(self) -> bool {
        matches!(
            self,
            NodeKind::Throw
                | NodeKind::FunctionCall
                | NodeKind::QualifiedAccess
                | NodeKind::DelegatedConstructorCall
                | NodeKind::CheckNotNullCall
                | NodeKind::TypeOperatorCall
        )
    }
}

/// Determines whether a downstream pass should use an edge for control
/// flow, data flow, or both, and whether the transition is provably
/// unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// Control and data flow.
    Forward,
    /// Provably unreachable forward transition, kept for topology.
    DeadForward,
    /// Control flow only.
    CfgForward,
    /// Data flow only.
    DfgForward,
    /// Loop re-entry; control flow only, exempt from forward deadness
    /// propagation.
    CfgBackward,
    /// Provably unreachable loop re-entry.
    DeadBackward,
}

impl EdgeKind {
    pub const fn used_in_cfa(self) -> bool {
        !matches!(self, EdgeKind::DfgForward)
    }

    pub const fn used_in_dfa(self) -> bool {
        matches!(self, EdgeKind::Forward | EdgeKind::DfgForward)
    }

    pub const fn is_back(self) -> bool {
        matches!(self, EdgeKind::CfgBackward | EdgeKind::DeadBackward)
    }

    pub const fn is_dead(self) -> bool {
        matches!(self, EdgeKind::DeadForward | EdgeKind::DeadBackward)
    }

    /// The dead variant of this kind.
    pub const fn killed(self) -> EdgeKind {
        if self.is_back() {
            EdgeKind::DeadBackward
        } else {
            EdgeKind::DeadForward
        }
    }
}

/// Which execution path an edge represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeLabel {
    NormalPath,
    UncaughtExceptionPath,
    /// A non-local jump routed through a finally block; the payload is the
    /// jump's true target, re-emitted past the finally on exit.
    JumpTarget(NodeId),
}

/// Directed edge attributes. Adjacency order lives on the endpoint nodes;
/// at most one edge exists per (from, to) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub kind: EdgeKind,
    pub label: EdgeLabel,
}

/// A program point in one [`crate::graph::ControlFlowGraph`].
#[derive(Debug)]
pub struct CfgNode {
    /// Owning graph; fixed at creation.
    pub graph: GraphId,
    pub kind: NodeKind,
    /// Frontend element this node represents ([`AstId::NONE`] for synthetic
    /// nodes such as stubs).
    pub ast: AstId,
    /// Nesting depth at creation time (open graphs + open tries). Exception
    /// routing compares levels because called-in-place closures are
    /// transparent to exception propagation.
    pub level: u32,
    /// Cleared when the node becomes unreachable. Recomputed in full at
    /// merge points, so a live input arriving later (a `continue` into a
    /// post-condition loop) can restore it.
    pub is_live: bool,
    /// Union nodes are dead when *any* input is dead rather than all.
    pub is_union: bool,
    /// Predecessors in edge-creation order.
    pub incoming: SmallVec<[NodeId; 2]>,
    /// Successors in edge-creation order.
    pub outgoing: SmallVec<[NodeId; 2]>,
}

impl CfgNode {
    pub fn is_dead(&self) -> bool {
        !self.is_live
    }
}
