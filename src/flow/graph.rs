/// Compiled flow arena
///
/// A stored [`Flow`] is compiled once when it is saved or loaded into the
/// registry: node configs are parsed into typed specs, conditions into ASTs,
/// and string node references into petgraph indices. Every referential check
/// happens here, so the walker never looks up a node by string id.

use crate::error::GraphIntegrityError;
use crate::flow::types::{Flow, NodeCategory, NodeSpec, NodeType, RouterConfig};
use crate::runtime::condition::Condition;
use crate::runtime::variables::{VariableSchema, VariableStore};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// Anything selectable under the first-match-then-fallback policy
pub trait Guarded {
    fn guard(&self) -> Option<&Condition>;
}

/// First item whose condition holds; otherwise the first unconditioned item.
///
/// Deterministic: items are considered in declaration order and evaluation
/// only reads the store.
pub fn select_guarded<'a, T: Guarded>(
    items: impl IntoIterator<Item = &'a T> + Clone,
    store: &VariableStore,
) -> Option<&'a T> {
    items
        .clone()
        .into_iter()
        .find(|item| item.guard().is_some_and(|c| c.evaluate(store)))
        .or_else(|| items.into_iter().find(|item| item.guard().is_none()))
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub category: NodeCategory,
    pub node_type: NodeType,
    pub label: Option<String>,
    pub spec: NodeSpec,
    /// Populated for routers that declare routes
    pub routes: Vec<CompiledRoute>,
}

#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub handle: String,
    pub label: String,
    pub condition: Option<Condition>,
}

impl Guarded for CompiledRoute {
    fn guard(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledEdge {
    pub id: String,
    pub handle: Option<String>,
    /// `None` for unconditioned (fallback) edges, including `default`/`true`
    pub condition: Option<Condition>,
    pub label: Option<String>,
    pub target: NodeIndex,
}

impl Guarded for CompiledEdge {
    fn guard(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }
}

/// Which of a node's outgoing edges are candidates after it ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    /// Every outgoing edge
    Any,
    /// Only edges leaving through this handle
    Handle(String),
    /// The node decided nothing applies
    Nothing,
}

/// Execution-ready flow
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub flow: Flow,
    graph: DiGraph<CompiledNode, ()>,
    index_of: HashMap<String, NodeIndex>,
    /// Outgoing edges per node, declaration order
    outgoing: HashMap<NodeIndex, Vec<CompiledEdge>>,
    trigger: NodeIndex,
    schema: VariableSchema,
    defaults: VariableStore,
}

impl CompiledFlow {
    pub fn compile(flow: Flow) -> Result<Self, GraphIntegrityError> {
        tracing::debug!("🏗️ Compiling flow '{}' ({} nodes, {} edges)",
            flow.id, flow.nodes.len(), flow.edges.len());

        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        let mut triggers = Vec::new();

        for node in &flow.nodes {
            if index_of.contains_key(&node.id) {
                return Err(GraphIntegrityError::DuplicateNode(node.id.clone()));
            }
            let spec = NodeSpec::from_node(node)?;
            let category = node.effective_category();

            if category == NodeCategory::Trigger {
                if node.node_type != NodeType::Webhook {
                    return Err(GraphIntegrityError::InvalidNodeConfig {
                        node_id: node.id.clone(),
                        message: format!("only webhook nodes can be triggers, found {:?}", node.node_type),
                    });
                }
                triggers.push(node.id.clone());
            } else if node.node_type == NodeType::Webhook {
                return Err(GraphIntegrityError::InvalidNodeConfig {
                    node_id: node.id.clone(),
                    message: "webhook nodes must have the trigger category".to_string(),
                });
            }

            let routes = match &spec {
                NodeSpec::Router(cfg) => compile_routes(&node.id, cfg)?,
                _ => Vec::new(),
            };

            let index = graph.add_node(CompiledNode {
                id: node.id.clone(),
                category,
                node_type: node.node_type,
                label: node.label.clone(),
                spec,
                routes,
            });
            index_of.insert(node.id.clone(), index);
        }

        let trigger = match triggers.as_slice() {
            [] => return Err(GraphIntegrityError::MissingTrigger),
            [only] => index_of[only],
            _ => return Err(GraphIntegrityError::MultipleTriggers(triggers)),
        };

        let mut outgoing: HashMap<NodeIndex, Vec<CompiledEdge>> = HashMap::new();
        let mut edge_ids = HashSet::new();
        for edge in &flow.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(GraphIntegrityError::DuplicateEdge(edge.id.clone()));
            }
            let source = *index_of.get(&edge.source).ok_or_else(|| GraphIntegrityError::DanglingEdge {
                edge_id: edge.id.clone(),
                endpoint: "source",
                node_id: edge.source.clone(),
            })?;
            let target = *index_of.get(&edge.target).ok_or_else(|| GraphIntegrityError::DanglingEdge {
                edge_id: edge.id.clone(),
                endpoint: "target",
                node_id: edge.target.clone(),
            })?;

            let condition = match edge.condition.as_deref() {
                None => None,
                Some(raw) => match Condition::parse(raw) {
                    Ok(Condition::Always) => None,
                    Ok(c) => Some(c),
                    Err(source) => {
                        return Err(GraphIntegrityError::InvalidCondition {
                            owner: format!("edge {}", edge.id),
                            source,
                        })
                    }
                },
            };

            // router edges are only reachable through a declared route handle
            let router = &graph[source];
            if !router.routes.is_empty() {
                let handle = edge.source_handle.as_deref().unwrap_or_default();
                if !router.routes.iter().any(|r| r.handle == handle) {
                    return Err(GraphIntegrityError::UnknownRouteHandle {
                        edge_id: edge.id.clone(),
                        node_id: router.id.clone(),
                        handle: handle.to_string(),
                    });
                }
            }

            graph.add_edge(source, target, ());
            outgoing.entry(source).or_default().push(CompiledEdge {
                id: edge.id.clone(),
                handle: edge.source_handle.clone(),
                condition,
                label: edge.label.clone(),
                target,
            });
        }

        let (schema, defaults) = compile_variables(&flow)?;

        let compiled = Self {
            flow,
            graph,
            index_of,
            outgoing,
            trigger,
            schema,
            defaults,
        };
        compiled.check_routes_and_fallbacks()?;
        compiled.warn_unreachable();

        tracing::debug!("✅ Flow '{}' compiled", compiled.flow.id);
        Ok(compiled)
    }

    fn check_routes_and_fallbacks(&self) -> Result<(), GraphIntegrityError> {
        let require_fallback = self.flow.config.flags.require_fallback_edges;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let edges = self.outgoing_edges(index);

            if !node.routes.is_empty() {
                for route in &node.routes {
                    let group: Vec<&CompiledEdge> = edges
                        .iter()
                        .filter(|e| e.handle.as_deref() == Some(route.handle.as_str()))
                        .collect();
                    if group.is_empty() {
                        return Err(GraphIntegrityError::RouteWithoutEdge {
                            node_id: node.id.clone(),
                            route: route.handle.clone(),
                        });
                    }
                    if require_fallback && group.iter().all(|e| e.condition.is_some()) {
                        return Err(GraphIntegrityError::MissingFallback(node.id.clone()));
                    }
                }
                if require_fallback && node.routes.iter().all(|r| r.condition.is_some()) {
                    return Err(GraphIntegrityError::MissingFallback(node.id.clone()));
                }
                continue;
            }

            let is_end = node.node_type == NodeType::End;
            if require_fallback && !is_end && !edges.is_empty() && edges.iter().all(|e| e.condition.is_some()) {
                return Err(GraphIntegrityError::MissingFallback(node.id.clone()));
            }
        }
        Ok(())
    }

    fn warn_unreachable(&self) {
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.trigger);
        while let Some(index) = dfs.next(&self.graph) {
            reachable.insert(index);
        }
        for index in self.graph.node_indices() {
            if !reachable.contains(&index) {
                tracing::warn!("⚠️ Node '{}' in flow '{}' is unreachable from the trigger",
                    self.graph[index].id, self.flow.id);
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.flow.id
    }

    pub fn company_id(&self) -> &str {
        &self.flow.company_id
    }

    pub fn trigger(&self) -> NodeIndex {
        self.trigger
    }

    pub fn node(&self, index: NodeIndex) -> &CompiledNode {
        &self.graph[index]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.index_of.get(node_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn outgoing_edges(&self, index: NodeIndex) -> &[CompiledEdge] {
        self.outgoing.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// No outgoing edges, or an explicit end node
    pub fn is_terminal(&self, index: NodeIndex) -> bool {
        self.graph[index].node_type == NodeType::End || self.outgoing_edges(index).is_empty()
    }

    /// Apply the edge selection policy to a node's outgoing edges
    pub fn select_edge(&self, index: NodeIndex, branch: &Branch, store: &VariableStore) -> Option<&CompiledEdge> {
        let edges = self.outgoing_edges(index);
        match branch {
            Branch::Nothing => None,
            Branch::Any => select_guarded(edges.iter(), store),
            Branch::Handle(handle) => select_guarded(
                edges.iter().filter(|e| e.handle.as_deref() == Some(handle.as_str())),
                store,
            ),
        }
    }

    pub fn schema(&self) -> &VariableSchema {
        &self.schema
    }

    /// Declared global variables with their default values
    pub fn defaults(&self) -> &VariableStore {
        &self.defaults
    }

    pub fn max_steps(&self) -> Option<usize> {
        self.flow.config.flags.max_steps
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

fn compile_routes(node_id: &str, cfg: &RouterConfig) -> Result<Vec<CompiledRoute>, GraphIntegrityError> {
    let mut handles = HashSet::new();
    let mut routes = Vec::with_capacity(cfg.routes.len());
    for (i, route) in cfg.routes.iter().enumerate() {
        let handle = route.id.clone().unwrap_or_else(|| format!("route-{i}"));
        if !handles.insert(handle.clone()) {
            return Err(GraphIntegrityError::InvalidNodeConfig {
                node_id: node_id.to_string(),
                message: format!("route id '{handle}' is used twice"),
            });
        }
        let condition = match route.condition.as_deref() {
            None => None,
            Some(raw) => match Condition::parse(raw) {
                Ok(Condition::Always) => None,
                Ok(c) => Some(c),
                Err(source) => {
                    return Err(GraphIntegrityError::InvalidCondition {
                        owner: format!("router {node_id} route {handle}"),
                        source,
                    })
                }
            },
        };
        let label = if route.label.is_empty() { handle.clone() } else { route.label.clone() };
        routes.push(CompiledRoute { handle, label, condition });
    }
    Ok(routes)
}

fn compile_variables(flow: &Flow) -> Result<(VariableSchema, VariableStore), GraphIntegrityError> {
    let mut kinds = HashMap::new();
    let mut defaults = VariableStore::new();
    for decl in &flow.config.variables {
        if let Some(default) = &decl.default {
            if !default.is_null() && !decl.kind.accepts(default) {
                return Err(GraphIntegrityError::InvalidVariableDefault {
                    name: decl.name.clone(),
                    expected: decl.kind.name().to_string(),
                });
            }
            defaults.set(decl.name.clone(), default.clone());
        }
        kinds.insert(decl.name.clone(), decl.kind);
    }
    Ok((VariableSchema::new(kinds), defaults))
}
