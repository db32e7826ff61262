//! Element model boundary between the frontend and control-flow analysis.
//!
//! The real declaration/expression tree lives in the frontend; control-flow
//! construction only ever sees it through this arena. Each element carries
//! the construct kind plus the handful of facts the graph builder queries
//! (constant conditions, `Nothing` result flags, lambda invocation kinds,
//! class member lists, try shape). The builder never walks children here;
//! the traversal driver owns the recursion and calls the builder's paired
//! `enter_*`/`exit_*` operations in tree order.
//!
//! Facts that only become known during call resolution (`Nothing`-returning
//! calls, lambda invocation kinds) are settable after allocation so the
//! driver can record them between builder calls.

use rustc_hash::FxHashSet;

/// Index of an element in an [`AstArena`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AstId(u32);

impl AstId {
    /// Sentinel for "no element".
    pub const NONE: AstId = AstId(u32::MAX);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

/// How many times a closure argument may execute relative to its
/// enclosing call. Resolved during call candidate selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationKind {
    Never,
    ExactlyOnce,
    AtMostOnce,
    AtLeastOnce,
    Unknown,
}

impl InvocationKind {
    /// Whether the closure body can execute at all.
    pub const fn can_be_visited(self) -> bool {
        !matches!(self, InvocationKind::Never)
    }

    /// Whether the closure body executes on every path through the call.
    pub const fn is_definitely_visited(self) -> bool {
        matches!(self, InvocationKind::ExactlyOnce | InvocationKind::AtLeastOnce)
    }

    /// Whether the closure body may execute more than once.
    pub const fn can_be_revisited(self) -> bool {
        matches!(self, InvocationKind::AtLeastOnce | InvocationKind::Unknown)
    }
}

/// Named-function flavor, used for graph naming and constructor ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Declaration,
    Getter,
    Setter,
}

/// Pre- or post-condition loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopKind {
    While,
    DoWhile,
}

/// Short-circuit boolean operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicOperator {
    And,
    Or,
}

/// Compile-time constant value of an expression, where one is known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Other,
}

/// Construct kind of a frontend element, as visible to flow analysis.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// Named function, property accessor, or local function.
    Function {
        name: String,
        kind: FunctionKind,
        is_local: bool,
    },
    /// Class constructor. `delegates_to` is the same-class constructor a
    /// `this(...)` delegation resolves to, if any.
    Constructor { delegates_to: Option<AstId> },
    /// Anonymous function. `is_lambda` distinguishes lambda literals from
    /// `fun(...)` expressions (they differ in implicit-return behavior).
    Lambda { is_lambda: bool },
    /// Class or object declaration. Members appear in textual order.
    Class {
        name: Option<String>,
        is_local: bool,
        is_anonymous: bool,
        members: Vec<AstId>,
    },
    /// Expression wrapping an anonymous object declaration.
    AnonymousObjectExpression { class: AstId },
    Property { name: String, has_initializer: bool },
    Field { name: String, has_initializer: bool },
    InitBlock,
    ValueParameter { name: String, has_default: bool },
    Block { statements: Vec<AstId> },
    /// `return`; `target` is the function the (possibly labeled) return
    /// resolves to, `value` is [`AstId::NONE`] for bare returns.
    Return { target: AstId, value: AstId },
    Break { target: AstId },
    Continue { target: AstId },
    Loop { kind: LoopKind, condition: AstId },
    WhenExpression { subject: AstId },
    /// One `condition -> result` arm. For a desugared `if`/`else if` the
    /// condition is the source expression; an `else` arm carries a `true`
    /// constant.
    WhenBranch { condition: AstId },
    Try { catches: Vec<AstId>, has_finally: bool },
    Catch,
    BinaryLogic { op: LogicOperator, left: AstId },
    SafeCall,
    Elvis { lhs: AstId },
    FunctionCall,
    DelegatedConstructorCall,
    DelegateExpression,
    QualifiedAccess,
    ResolvedQualifier,
    ConstExpression { value: ConstValue },
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
    SmartCast,
    /// Unresolvable or erroneous source construct. Flow analysis keeps
    /// these structurally valid instead of failing (degraded, not broken).
    Error,
}

struct Element {
    kind: ElementKind,
    /// Set once call resolution proves the expression's type is `Nothing`
    /// (the path cannot continue past it).
    returns_nothing: bool,
    /// For lambdas passed as call arguments: set when the call resolves.
    invocation_kind: Option<InvocationKind>,
}

/// Arena of frontend elements plus the per-declaration "graph already
/// built" flags used to detect re-entrant analysis.
#[derive(Default)]
pub struct AstArena {
    elements: Vec<Element>,
    graph_built: FxHashSet<AstId>,
}

impl AstArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ElementKind) -> AstId {
        let id = AstId(u32::try_from(self.elements.len()).expect("element arena overflow"));
        self.elements.push(Element {
            kind,
            returns_nothing: false,
            invocation_kind: None,
        });
        id
    }

    pub fn kind(&self, id: AstId) -> &ElementKind {
        &self.elements[id.index()].kind
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    // ------------------------- resolution updates -------------------------

    /// Record that call resolution typed this expression as `Nothing`.
    pub fn set_returns_nothing(&mut self, id: AstId) {
        self.elements[id.index()].returns_nothing = true;
    }

    pub fn returns_nothing(&self, id: AstId) -> bool {
        !id.is_none() && self.elements[id.index()].returns_nothing
    }

    /// Record the resolved invocation kind of a closure argument.
    pub fn set_invocation_kind(&mut self, lambda: AstId, kind: InvocationKind) {
        debug_assert!(matches!(self.kind(lambda), ElementKind::Lambda { .. }));
        self.elements[lambda.index()].invocation_kind = Some(kind);
    }

    pub fn invocation_kind(&self, lambda: AstId) -> Option<InvocationKind> {
        self.elements[lambda.index()].invocation_kind
    }

    /// Mark a declaration's control-flow graph as attached. Attempting to
    /// build a second graph for the same declaration is then reported as
    /// re-entrant analysis and aborted gracefully.
    pub fn mark_graph_built(&mut self, decl: AstId) {
        self.graph_built.insert(decl);
    }

    pub fn graph_built(&self, decl: AstId) -> bool {
        self.graph_built.contains(&decl)
    }

    // ----------------------------- queries -----------------------------

    /// Compile-time boolean value of an expression, if known.
    pub fn bool_const(&self, id: AstId) -> Option<bool> {
        if id.is_none() {
            return None;
        }
        match self.kind(id) {
            ElementKind::ConstExpression {
                value: ConstValue::Bool(b),
            } => Some(*b),
            _ => None,
        }
    }

    /// Whether a class member participates in graph construction at all.
    /// Properties and fields only do when they have an initializer.
    pub fn member_has_graph(&self, member: AstId) -> bool {
        match self.kind(member) {
            ElementKind::Property {
                has_initializer, ..
            }
            | ElementKind::Field {
                has_initializer, ..
            } => *has_initializer,
            _ => true,
        }
    }

    /// Whether a class member runs as part of object construction
    /// (initializers and init blocks, as opposed to constructors,
    /// methods, and nested classes).
    pub fn member_is_in_place(&self, member: AstId) -> bool {
        !matches!(
            self.kind(member),
            ElementKind::Function { .. }
                | ElementKind::Constructor { .. }
                | ElementKind::Lambda { .. }
                | ElementKind::Class { .. }
        )
    }

    /// First class member initialized in place during construction.
    pub fn first_in_place_member(&self, members: &[AstId]) -> Option<AstId> {
        members
            .iter()
            .copied()
            .find(|&m| self.member_is_in_place(m) && self.member_has_graph(m))
    }
}
