//! Class graphs, member ordering, and initializer subgraphs.
//!
//! A class graph does not execute as written: property initializers and
//! init blocks run in textual order as part of every constructor, while
//! constructors order themselves by `this(...)` delegation and methods run
//! at some later, unknown time. The class exit therefore chains the
//! in-place member graphs from the enter node, hangs constructors off their
//! delegates, and attaches everything called later behind the exit node
//! with control-only edges.

use crate::builder::{ClassFrame, ControlFlowGraphBuilder};
use crate::graph::GraphKind;
use crate::node::{EdgeKind, EdgeLabel, GraphId, NodeId, NodeKind};
use ktz_ast::{AstArena, AstId, ElementKind};
use rustc_hash::FxHashMap;
use tracing::trace;

impl ControlFlowGraphBuilder {
    // ------------------------------- classes -------------------------------

    /// Open a class graph. With `build_graph` false only the stack shape is
    /// maintained (bodies inside still build their own graphs); nothing is
    /// recorded or returned.
    ///
    /// Anonymous objects additionally get an enter node in the surrounding
    /// graph, and local classes a declaration node, so the surrounding flow
    /// observes the declaration point. When the class enter is reachable
    /// from the surrounding code, edges to all member graphs are
    /// pre-registered: a full one to the first member executed during
    /// construction, data-only ones to the rest.
    pub fn enter_class(
        &mut self,
        ast: &AstArena,
        class: AstId,
        build_graph: bool,
    ) -> (Option<NodeId>, Option<NodeId>) {
        if !build_graph {
            let graph = self.arena.create_graph(
                GraphKind::Class,
                "<discarded class graph>".to_string(),
                None,
            );
            self.graphs.push(graph);
            self.class_frames.push(ClassFrame {
                class,
                discarded: true,
                members: Vec::new(),
            });
            return (None, None);
        }

        let (name, is_local, is_anonymous, members) = match ast.kind(class) {
            ElementKind::Class {
                name,
                is_local,
                is_anonymous,
                members,
            } => (
                name.clone().unwrap_or_else(|| "<anonymous object>".to_string()),
                *is_local,
                *is_anonymous,
                members.clone(),
            ),
            other => panic!("enter_class on non-class element {class:?}: {other:?}"),
        };
        trace!(name, is_local, is_anonymous, "entering class");

        let outer_node = if is_anonymous {
            Some(self.create_node(NodeKind::AnonymousObjectEnter, class))
        } else if is_local && self.body_building_mode() {
            Some(self.create_node(NodeKind::LocalClassExit, class))
        } else {
            None
        };
        if let Some(node) = outer_node {
            self.add_new_simple_node(node, false);
        }

        let (enter, _exit) = self.enter_graph(
            GraphKind::Class,
            name,
            Some(class),
            class,
            NodeKind::ClassEnter,
            NodeKind::ClassExit,
            is_anonymous,
        );
        if let Some(node) = outer_node {
            self.add_edge(node, enter);
        } else {
            self.add_edge_if_local_class_member(enter, class);
        }

        if !self.arena.node(enter).incoming.is_empty() {
            // The class is declared inside executable code, so data from the
            // declaration point flows into its members.
            let first_in_place = ast.first_in_place_member(&members);
            for &member in &members {
                if !ast.member_has_graph(member) {
                    continue;
                }
                let starts_construction = first_in_place == Some(member)
                    || (first_in_place.is_none()
                        && matches!(ast.kind(member), ElementKind::Constructor { delegates_to: None }));
                let kind = if starts_construction {
                    EdgeKind::Forward
                } else {
                    EdgeKind::DfgForward
                };
                self.enter_to_local_class_members.insert(member, (enter, kind));
            }
        }

        self.class_frames.push(ClassFrame {
            class,
            discarded: false,
            members: Vec::new(),
        });
        (outer_node, Some(enter))
    }

    /// Close a class graph and impose the member execution order. Returns
    /// the exit node for anonymous objects (their expression node merges
    /// data from it) and the finished graph, or `(None, None)` when the
    /// graph was discarded or the declaration already has one (re-entrant
    /// analysis).
    pub fn exit_class(&mut self, ast: &AstArena) -> (Option<NodeId>, Option<GraphId>) {
        let frame = self
            .class_frames
            .pop()
            .expect("exit_class without matching enter_class");
        if frame.discarded {
            self.graphs.pop().expect("exit_class with no open graph");
            return (None, None);
        }

        let enter = self
            .last_nodes
            .pop()
            .expect("exit_class with no active scope cursor");
        assert_eq!(
            self.arena.node(enter).kind,
            NodeKind::ClassEnter,
            "exit_class found a foreign cursor"
        );
        let graph = self.graphs.pop().expect("exit_class with no open graph");
        if ast.graph_built(frame.class) {
            // Re-entrant analysis of the same declaration; abandon this
            // copy rather than attach a second graph.
            return (None, None);
        }
        let exit = self.arena.graph(graph).exit_node();

        let mut in_place: Vec<GraphId> = Vec::new();
        let mut called_later: Vec<GraphId> = Vec::new();
        let mut constructors: Vec<(AstId, GraphId)> = Vec::new();
        for &(member, member_graph) in &frame.members {
            match ast.kind(member) {
                ElementKind::Constructor { .. } => constructors.push((member, member_graph)),
                _ if ast.member_is_in_place(member) => in_place.push(member_graph),
                _ => called_later.push(member_graph),
            }
        }

        // Initializers and init blocks execute in textual order. For local
        // classes the first link already exists: it was pre-registered at
        // enter_class and consumed when the member graph opened.
        let pre_registered = !self.arena.node(enter).incoming.is_empty();
        let mut previous_exit = enter;
        for &member_graph in &in_place {
            let member_enter = self.arena.graph(member_graph).enter_node();
            if previous_exit != enter || !pre_registered {
                self.add_edge_to_subgraph(previous_exit, member_enter);
            }
            previous_exit = self.arena.graph(member_graph).exit_node();
        }

        let exit_is_union = self.arena.node(exit).is_union;
        if exit_is_union {
            // Anonymous object: construction definitely ran, so every
            // initializer's data reaches the exit.
            for &member_graph in &in_place {
                let member_exit = self.arena.graph(member_graph).exit_node();
                self.add_edge_full(
                    member_exit,
                    exit,
                    true,
                    false,
                    EdgeKind::DfgForward,
                    EdgeLabel::NormalPath,
                );
            }
        }

        // Constructors continue from their `this(...)` delegate, or from
        // the last in-place initializer when there is none.
        let constructor_graphs: FxHashMap<AstId, GraphId> =
            constructors.iter().copied().collect();
        for &(constructor, member_graph) in &constructors {
            let delegate_exit = self
                .parent_constructor(ast, constructor, &constructor_graphs)
                .and_then(|parent| constructor_graphs.get(&parent))
                .map(|&g| self.arena.graph(g).exit_node())
                .unwrap_or(previous_exit);
            let member_enter = self.arena.graph(member_graph).enter_node();
            // Non-delegating constructors of a local class were also
            // pre-registered (when no in-place member precedes them).
            if delegate_exit != enter || !pre_registered {
                self.add_edge_to_subgraph(delegate_exit, member_enter);
            }
            let member_exit = self.arena.graph(member_graph).exit_node();
            let kind = if exit_is_union {
                EdgeKind::Forward
            } else {
                EdgeKind::CfgForward
            };
            self.add_edge_full(member_exit, exit, true, false, kind, EdgeLabel::NormalPath);
        }

        if constructors.is_empty() {
            // Interface-like class: nothing to construct, the exit is
            // reachable whenever the enter is.
            self.add_edge_full(
                enter,
                exit,
                true,
                false,
                EdgeKind::CfgForward,
                EdgeLabel::NormalPath,
            );
        } else {
            // Ordering-only edge so the exit is never floating.
            self.add_edge_full(
                enter,
                exit,
                false,
                false,
                EdgeKind::DeadForward,
                EdgeLabel::NormalPath,
            );
        }

        // Methods and nested classes run at some later point, behind the
        // fully constructed object.
        for &member_graph in &called_later {
            let member_enter = self.arena.graph(member_graph).enter_node();
            self.add_edge_to_subgraph(exit, member_enter);
        }

        self.finish_graph(graph);
        self.class_graphs.insert(frame.class, graph);
        let union_exit = if exit_is_union { Some(exit) } else { None };
        (union_exit, Some(graph))
    }

    /// Same-class constructor a constructor's `this(...)` resolves to.
    /// Self-delegation is erroneous source and treated as no delegation so
    /// ordering stays well-defined; longer delegation cycles produce cyclic
    /// ordering edges, which downstream passes tolerate.
    fn parent_constructor(
        &self,
        ast: &AstArena,
        constructor: AstId,
        constructors: &FxHashMap<AstId, GraphId>,
    ) -> Option<AstId> {
        let delegate = match ast.kind(constructor) {
            ElementKind::Constructor { delegates_to } => (*delegates_to)?,
            _ => return None,
        };
        if delegate == constructor || !constructors.contains_key(&delegate) {
            return None;
        }
        Some(delegate)
    }

    /// `object : T {}` as an expression: merges data out of the completed
    /// class graph's union exit.
    pub fn exit_anonymous_object_expression(&mut self, ast: &AstArena, expression: AstId) -> NodeId {
        let class = match ast.kind(expression) {
            ElementKind::AnonymousObjectExpression { class } => *class,
            other => panic!(
                "exit_anonymous_object_expression on non-object element {expression:?}: {other:?}"
            ),
        };
        let node = self.create_node(NodeKind::AnonymousObjectExpressionExit, expression);
        let class_exit = self
            .class_graphs
            .get(&class)
            .map(|&g| self.arena.graph(g).exit_node());
        match class_exit {
            Some(class_exit)
                if self
                    .last_nodes
                    .last()
                    .is_some_and(|&n| self.arena.node(n).kind == NodeKind::AnonymousObjectEnter) =>
            {
                self.add_edge(class_exit, node);
                let anonymous_enter = self
                    .last_nodes
                    .pop()
                    .expect("anonymous object expression with no enter cursor");
                // Ordering-only: execution went through the class graph.
                self.add_edge_full(
                    anonymous_enter,
                    node,
                    false,
                    false,
                    EdgeKind::DeadForward,
                    EdgeLabel::NormalPath,
                );
                self.last_nodes.push(node);
            }
            // Graph discarded or re-entrant; degrade to a plain node.
            _ => self.add_new_simple_node(node, false),
        }
        node
    }

    // --------------------------- member subgraphs ---------------------------

    pub fn enter_property(&mut self, ast: &AstArena, property: AstId) -> Option<NodeId> {
        let name = match ast.kind(property) {
            ElementKind::Property {
                name,
                has_initializer,
            } => {
                if !has_initializer {
                    return None;
                }
                name.clone()
            }
            other => panic!("enter_property on non-property element {property:?}: {other:?}"),
        };
        let (enter, _) = self.enter_graph(
            GraphKind::PropertyInitializer,
            format!("val {name}"),
            Some(property),
            property,
            NodeKind::PropertyInitializerEnter,
            NodeKind::PropertyInitializerExit,
            false,
        );
        self.add_edge_if_local_class_member(enter, property);
        Some(enter)
    }

    pub fn exit_property(&mut self, ast: &AstArena, property: AstId) -> Option<(NodeId, GraphId)> {
        match ast.kind(property) {
            ElementKind::Property {
                has_initializer, ..
            } if !has_initializer => None,
            _ => Some(self.exit_graph()),
        }
    }

    pub fn enter_field(&mut self, ast: &AstArena, field: AstId) -> Option<NodeId> {
        let name = match ast.kind(field) {
            ElementKind::Field {
                name,
                has_initializer,
            } => {
                if !has_initializer {
                    return None;
                }
                name.clone()
            }
            other => panic!("enter_field on non-field element {field:?}: {other:?}"),
        };
        let (enter, _) = self.enter_graph(
            GraphKind::FieldInitializer,
            format!("field {name}"),
            Some(field),
            field,
            NodeKind::FieldInitializerEnter,
            NodeKind::FieldInitializerExit,
            false,
        );
        self.add_edge_if_local_class_member(enter, field);
        Some(enter)
    }

    pub fn exit_field(&mut self, ast: &AstArena, field: AstId) -> Option<(NodeId, GraphId)> {
        match ast.kind(field) {
            ElementKind::Field {
                has_initializer, ..
            } if !has_initializer => None,
            _ => Some(self.exit_graph()),
        }
    }

    pub fn enter_init_block(&mut self, init_block: AstId) -> NodeId {
        let (enter, _) = self.enter_graph(
            GraphKind::ClassInitializer,
            "init block".to_string(),
            Some(init_block),
            init_block,
            NodeKind::InitBlockEnter,
            NodeKind::InitBlockExit,
            false,
        );
        self.add_edge_if_local_class_member(enter, init_block);
        enter
    }

    pub fn exit_init_block(&mut self) -> (NodeId, GraphId) {
        self.exit_graph()
    }

    // --------------------------- default arguments ---------------------------

    /// A parameter with a default value gets its own subgraph: the default
    /// only executes on calls that omit the argument.
    pub fn enter_value_parameter(
        &mut self,
        ast: &AstArena,
        parameter: AstId,
    ) -> Option<(NodeId, NodeId)> {
        let name = match ast.kind(parameter) {
            ElementKind::ValueParameter { name, has_default } => {
                if !has_default {
                    return None;
                }
                name.clone()
            }
            other => panic!(
                "enter_value_parameter on non-parameter element {parameter:?}: {other:?}"
            ),
        };
        let outer = self.create_node(NodeKind::ValueParameterEnter, parameter);
        self.add_new_simple_node(outer, false);
        let (enter, _) = self.enter_graph(
            GraphKind::DefaultArgument,
            format!("default value of {name}"),
            Some(parameter),
            parameter,
            NodeKind::DefaultArgumentsEnter,
            NodeKind::DefaultArgumentsExit,
            false,
        );
        self.add_edge(outer, enter);
        Some((outer, enter))
    }

    pub fn exit_value_parameter(
        &mut self,
        ast: &AstArena,
        parameter: AstId,
    ) -> Option<(NodeId, NodeId, GraphId)> {
        match ast.kind(parameter) {
            ElementKind::ValueParameter { has_default, .. } if !has_default => None,
            _ => {
                let (exit, graph) = self.exit_graph();
                let outer = self.create_node(NodeKind::ValueParameterExit, parameter);
                self.add_new_simple_node(outer, false);
                // Data out of the default value stays inside its subgraph.
                self.add_edge_full(
                    exit,
                    outer,
                    false,
                    false,
                    EdgeKind::CfgForward,
                    EdgeLabel::NormalPath,
                );
                Some((exit, outer, graph))
            }
        }
    }
}
