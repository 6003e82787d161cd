//! Subgraph arena and node-id mapping.
//!
//! A workflow document is a tree of graphs: the root graph plus any number of
//! uuid-keyed subgraph definitions, referenced by the nodes that instantiate
//! them. The engine reports execution progress with [`NodeExecutionId`]s (the
//! instance path taken during a run) while anything that must survive a view
//! change addresses nodes with [`NodeLocatorId`]s (definition-relative, path
//! independent). [`GraphArena`] holds the definitions, tracks which level is
//! currently viewed, and converts between the two schemes.
//!
//! Conversions walk id paths with explicit loops over the arena instead of
//! recursing through nested graph values, so deeply nested documents cannot
//! overflow the stack.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use renderbox_models::NodeId;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a node path fails to resolve through a [`GraphArena`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// No node exists with the id at the current level
    #[error("No node {0} in the graph")]
    UnknownNode(NodeId),
    /// The node exists but does not reference a subgraph
    #[error("Node {0} does not reference a subgraph")]
    NotASubgraph(NodeId),
    /// The referenced subgraph definition is missing from the arena
    #[error("No subgraph {0} is defined")]
    UnknownSubgraph(Uuid),
}

/// The colon-joined chain of raw node ids along the live nesting path taken
/// during a run, e.g. `"123:456:789"`. The final segment is the node itself;
/// every earlier segment is the subgraph node it was entered through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeExecutionId {
    path: Vec<NodeId>,
    node: NodeId,
}

impl NodeExecutionId {
    /// Parses a raw execution id. Never fails: an id without separators is a
    /// root-level node id.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let (path, node) = value.rsplit_once(':').map_or_else(
            || (vec![], NodeId::parse(value)),
            |(path, node)| {
                (
                    path.split(':').map(NodeId::parse).collect(),
                    NodeId::parse(node),
                )
            },
        );

        Self { path, node }
    }

    /// Builds an execution id from the subgraph-node path leading to `node`.
    #[must_use]
    pub fn new(path: impl IntoIterator<Item = NodeId>, node: NodeId) -> Self {
        Self {
            path: path.into_iter().collect(),
            node,
        }
    }

    /// The subgraph-node ids entered on the way to the node, outermost first.
    /// Empty for root-level nodes.
    #[must_use]
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    /// The final segment, the node the id addresses.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// Returns `true` if the node lives inside at least one subgraph.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }
}

impl From<NodeId> for NodeExecutionId {
    fn from(node: NodeId) -> Self {
        Self { path: vec![], node }
    }
}

impl std::fmt::Display for NodeExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.path {
            write!(f, "{segment}:")?;
        }
        write!(f, "{}", self.node)
    }
}

/// Error returned when parsing a [`NodeLocatorId`] from its wire form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseNodeLocatorIdError {
    /// The qualifier before the separator is not a valid uuid
    #[error("Invalid subgraph qualifier: {0}")]
    InvalidQualifier(String),
}

/// Addresses a node independent of the path taken to reach it:
/// `"{subgraph-uuid}:{local-node-id}"`, or the bare local id for nodes on the
/// root graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeLocatorId {
    /// A node on the root graph
    Root(NodeId),
    /// A node inside the named subgraph definition
    Subgraph {
        /// The definition containing the node
        subgraph: Uuid,
        /// The node id local to that definition
        node: NodeId,
    },
}

impl NodeLocatorId {
    /// Parses a raw locator id. Ids without a separator are root-level node
    /// ids; otherwise everything before the first separator must be a uuid.
    ///
    /// # Errors
    ///
    /// * If the id is qualified and the qualifier is not a valid uuid
    pub fn parse(value: &str) -> Result<Self, ParseNodeLocatorIdError> {
        value.split_once(':').map_or_else(
            || Ok(Self::Root(NodeId::parse(value))),
            |(qualifier, node)| {
                Uuid::parse_str(qualifier)
                    .map(|subgraph| Self::Subgraph {
                        subgraph,
                        node: NodeId::parse(node),
                    })
                    .map_err(|_| ParseNodeLocatorIdError::InvalidQualifier(qualifier.to_string()))
            },
        )
    }

    /// The node id local to its containing graph.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        match self {
            Self::Root(node) | Self::Subgraph { node, .. } => node,
        }
    }

    /// The containing subgraph definition, `None` for root-level nodes.
    #[must_use]
    pub const fn subgraph(&self) -> Option<Uuid> {
        match self {
            Self::Root(_) => None,
            Self::Subgraph { subgraph, .. } => Some(*subgraph),
        }
    }
}

impl std::fmt::Display for NodeLocatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root(node) => write!(f, "{node}"),
            Self::Subgraph { subgraph, node } => write!(f, "{subgraph}:{node}"),
        }
    }
}

/// A node entry in a [`Graph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    subgraph: Option<Uuid>,
}

impl GraphNode {
    /// The subgraph definition this node instantiates, if any.
    #[must_use]
    pub const fn subgraph(&self) -> Option<Uuid> {
        self.subgraph
    }

    /// Returns `true` if this node instantiates a subgraph.
    #[must_use]
    pub const fn is_subgraph_node(&self) -> bool {
        self.subgraph.is_some()
    }
}

/// One level of a workflow document: nodes keyed by id, each optionally
/// instantiating a subgraph definition held by the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<NodeId, GraphNode>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Adds a plain node, replacing any node already using the id.
    pub fn add_node(&mut self, id: impl Into<NodeId>) -> &mut Self {
        self.nodes.insert(id.into(), GraphNode { subgraph: None });
        self
    }

    /// Adds a node instantiating `subgraph`, replacing any node already using
    /// the id.
    pub fn add_subgraph_node(&mut self, id: impl Into<NodeId>, subgraph: Uuid) -> &mut Self {
        self.nodes.insert(
            id.into(),
            GraphNode {
                subgraph: Some(subgraph),
            },
        );
        self
    }

    /// Removes a node, returning its entry if it existed.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<GraphNode> {
        self.nodes.remove(id)
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Returns `true` if a node with the id exists.
    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterates the nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &GraphNode)> {
        self.nodes.iter()
    }
}

/// The root graph of a document plus its subgraph definitions and the level
/// currently being viewed.
///
/// The view is the instance path of subgraph nodes entered from the root; an
/// empty path means the root graph itself is viewed. Edits made after a path
/// was activated can invalidate it, in which case the view falls back to the
/// root.
#[derive(Debug, Clone, Default)]
pub struct GraphArena {
    root: Graph,
    subgraphs: BTreeMap<Uuid, Graph>,
    active_path: Vec<NodeId>,
}

impl GraphArena {
    /// Creates an empty arena viewing its (empty) root graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: Graph::new(),
            subgraphs: BTreeMap::new(),
            active_path: vec![],
        }
    }

    /// The root graph.
    #[must_use]
    pub const fn root(&self) -> &Graph {
        &self.root
    }

    /// The root graph, mutably.
    pub const fn root_mut(&mut self) -> &mut Graph {
        &mut self.root
    }

    /// Registers a subgraph definition under a freshly generated uuid.
    pub fn define_subgraph(&mut self, graph: Graph) -> Uuid {
        let id = Uuid::new_v4();
        self.subgraphs.insert(id, graph);
        id
    }

    /// Registers a subgraph definition under an explicit uuid, replacing any
    /// existing definition. Used when loading documents that already carry
    /// definition ids.
    pub fn insert_subgraph(&mut self, id: Uuid, graph: Graph) {
        self.subgraphs.insert(id, graph);
    }

    /// Removes a subgraph definition. Nodes referencing it keep the dangling
    /// uuid; paths through them stop resolving.
    pub fn remove_subgraph(&mut self, id: Uuid) -> Option<Graph> {
        self.subgraphs.remove(&id)
    }

    /// Looks up a subgraph definition.
    #[must_use]
    pub fn subgraph(&self, id: Uuid) -> Option<&Graph> {
        self.subgraphs.get(&id)
    }

    /// Looks up a subgraph definition, mutably.
    pub fn subgraph_mut(&mut self, id: Uuid) -> Option<&mut Graph> {
        self.subgraphs.get_mut(&id)
    }

    /// The instance path of subgraph nodes entered from the root.
    #[must_use]
    pub fn active_path(&self) -> &[NodeId] {
        &self.active_path
    }

    /// Returns `true` if a subgraph (not the root) is currently viewed.
    #[must_use]
    pub fn is_subgraph_active(&self) -> bool {
        !self.active_path.is_empty()
    }

    /// The definition of the currently viewed subgraph, `None` at the root or
    /// when the active path no longer resolves.
    #[must_use]
    pub fn active_subgraph(&self) -> Option<Uuid> {
        self.resolve_path(&self.active_path)
            .ok()
            .and_then(|chain| chain.last().copied())
    }

    /// The currently viewed graph. Falls back to the root when the active
    /// path no longer resolves.
    #[must_use]
    pub fn active_graph(&self) -> &Graph {
        self.active_subgraph()
            .and_then(|id| self.subgraphs.get(&id))
            .unwrap_or(&self.root)
    }

    /// Enters the subgraph instantiated by `node_id` on the currently viewed
    /// graph, returning its definition uuid.
    ///
    /// # Errors
    ///
    /// * If no node with the id exists on the viewed graph
    /// * If the node does not reference a subgraph
    /// * If the referenced definition is missing from the arena
    pub fn enter_subgraph(&mut self, node_id: NodeId) -> Result<Uuid, GraphError> {
        let subgraph = self
            .active_graph()
            .node(&node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.clone()))?
            .subgraph()
            .ok_or_else(|| GraphError::NotASubgraph(node_id.clone()))?;

        if !self.subgraphs.contains_key(&subgraph) {
            return Err(GraphError::UnknownSubgraph(subgraph));
        }

        self.active_path.push(node_id);

        Ok(subgraph)
    }

    /// Moves the view one level up, returning the instance node left through.
    /// `None` when already at the root.
    pub fn leave_subgraph(&mut self) -> Option<NodeId> {
        self.active_path.pop()
    }

    /// Resets the view to the root graph.
    pub fn reset_view(&mut self) {
        self.active_path.clear();
    }

    /// Activates a full instance path at once, validating every step.
    ///
    /// # Errors
    ///
    /// * If any step of the path fails to resolve to a subgraph definition
    pub fn set_active_path(&mut self, path: Vec<NodeId>) -> Result<(), GraphError> {
        self.resolve_path(&path)?;
        self.active_path = path;
        Ok(())
    }

    /// Walks a chain of subgraph-node ids down from the root, returning the
    /// definition uuid of each level entered.
    ///
    /// # Errors
    ///
    /// * If any step names a missing node, a node without a subgraph, or a
    ///   subgraph with no definition in the arena
    pub fn resolve_path(&self, path: &[NodeId]) -> Result<Vec<Uuid>, GraphError> {
        let mut chain = Vec::with_capacity(path.len());
        let mut graph = &self.root;

        for node_id in path {
            let subgraph = graph
                .node(node_id)
                .ok_or_else(|| GraphError::UnknownNode(node_id.clone()))?
                .subgraph()
                .ok_or_else(|| GraphError::NotASubgraph(node_id.clone()))?;

            graph = self
                .subgraphs
                .get(&subgraph)
                .ok_or(GraphError::UnknownSubgraph(subgraph))?;

            chain.push(subgraph);
        }

        Ok(chain)
    }

    /// Maps a live execution id to the node id as seen on the currently
    /// viewed graph, or `None` when the node is not on the viewed graph.
    ///
    /// The comparison is by containing definition, so an execution reaching a
    /// shared subgraph through a different instance node still maps onto the
    /// view of that subgraph.
    #[must_use]
    pub fn execution_id_to_current_id(&self, execution_id: &NodeExecutionId) -> Option<NodeId> {
        let chain = self.resolve_path(execution_id.path()).ok()?;

        (chain.last().copied() == self.active_subgraph())
            .then(|| execution_id.node_id().clone())
    }

    /// Qualifies a local node id with its containing subgraph definition.
    /// `subgraph` defaults to the currently viewed one; root-level nodes stay
    /// bare.
    #[must_use]
    pub fn node_id_to_locator_id(&self, node_id: NodeId, subgraph: Option<Uuid>) -> NodeLocatorId {
        match subgraph.or_else(|| self.active_subgraph()) {
            Some(subgraph) => NodeLocatorId::Subgraph {
                subgraph,
                node: node_id,
            },
            None => NodeLocatorId::Root(node_id),
        }
    }

    /// Resolves a live execution id to a path-independent locator id. `None`
    /// when a path segment does not resolve to a subgraph definition.
    #[must_use]
    pub fn execution_id_to_locator_id(
        &self,
        execution_id: &NodeExecutionId,
    ) -> Option<NodeLocatorId> {
        let chain = self.resolve_path(execution_id.path()).ok()?;
        let node = execution_id.node_id().clone();

        Some(match chain.last() {
            Some(subgraph) => NodeLocatorId::Subgraph {
                subgraph: *subgraph,
                node,
            },
            None => NodeLocatorId::Root(node),
        })
    }

    /// Expands a locator id to an execution id by finding the instance path
    /// from the root to the named subgraph definition. `None` when the
    /// definition is not reachable from the root.
    ///
    /// When a definition is instantiated more than once the shortest path
    /// wins; ties break on node-id order.
    #[must_use]
    pub fn locator_id_to_execution_id(
        &self,
        locator_id: &NodeLocatorId,
    ) -> Option<NodeExecutionId> {
        match locator_id {
            NodeLocatorId::Root(node) => Some(NodeExecutionId::from(node.clone())),
            NodeLocatorId::Subgraph { subgraph, node } => self
                .find_subgraph_path(*subgraph)
                .map(|path| NodeExecutionId::new(path, node.clone())),
        }
    }

    /// Breadth-first search for the instance path from the root to the given
    /// definition. A visited set keeps self-referential documents from
    /// looping.
    fn find_subgraph_path(&self, target: Uuid) -> Option<Vec<NodeId>> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();

        queue.push_back((&self.root, Vec::new()));

        while let Some((graph, path)) = queue.pop_front() {
            for (node_id, node) in graph.nodes() {
                let Some(subgraph) = node.subgraph() else {
                    continue;
                };

                let mut next = path.clone();
                next.push(node_id.clone());

                if subgraph == target {
                    return Some(next);
                }
                if !visited.insert(subgraph) {
                    continue;
                }
                if let Some(inner) = self.subgraphs.get(&subgraph) {
                    queue.push_back((inner, next));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const OUTER: Uuid = Uuid::from_u128(0x11);
    const INNER: Uuid = Uuid::from_u128(0x22);

    /// root --5--> OUTER --8--> INNER, with plain nodes sprinkled in.
    fn nested_arena() -> GraphArena {
        let mut arena = GraphArena::new();

        arena.root_mut().add_node(1).add_subgraph_node(5, OUTER);

        let mut outer = Graph::new();
        outer.add_node(7).add_subgraph_node(8, INNER);
        arena.insert_subgraph(OUTER, outer);

        let mut inner = Graph::new();
        inner.add_node(9);
        arena.insert_subgraph(INNER, inner);

        arena
    }

    #[test_log::test]
    fn parses_execution_ids() {
        let id = NodeExecutionId::parse("123:456:789");

        assert_eq!(id.path(), &[NodeId::Number(123), NodeId::Number(456)]);
        assert_eq!(id.node_id(), &NodeId::Number(789));
        assert!(id.is_nested());
        assert_eq!(id.to_string(), "123:456:789");

        let bare = NodeExecutionId::parse("7");
        assert_eq!(bare, NodeExecutionId::from(NodeId::Number(7)));
        assert!(!bare.is_nested());
        assert_eq!(bare.to_string(), "7");
    }

    #[test_log::test]
    fn parses_locator_ids() {
        assert_eq!(
            NodeLocatorId::parse("9"),
            Ok(NodeLocatorId::Root(NodeId::Number(9)))
        );
        assert_eq!(
            NodeLocatorId::parse(&format!("{OUTER}:9")),
            Ok(NodeLocatorId::Subgraph {
                subgraph: OUTER,
                node: NodeId::Number(9),
            })
        );
        assert_eq!(
            NodeLocatorId::parse("not-a-uuid:9"),
            Err(ParseNodeLocatorIdError::InvalidQualifier(
                "not-a-uuid".to_string()
            ))
        );
    }

    #[test_log::test]
    fn locator_ids_round_trip_through_display() {
        let qualified = NodeLocatorId::Subgraph {
            subgraph: INNER,
            node: NodeId::String("blur".to_string()),
        };

        assert_eq!(NodeLocatorId::parse(&qualified.to_string()), Ok(qualified));
    }

    #[test_log::test]
    fn enters_and_leaves_subgraphs() {
        let mut arena = nested_arena();

        assert!(!arena.is_subgraph_active());
        assert_eq!(arena.active_subgraph(), None);

        assert_eq!(arena.enter_subgraph(NodeId::Number(5)), Ok(OUTER));
        assert_eq!(arena.enter_subgraph(NodeId::Number(8)), Ok(INNER));
        assert!(arena.is_subgraph_active());
        assert_eq!(arena.active_subgraph(), Some(INNER));
        assert_eq!(arena.active_path(), &[NodeId::Number(5), NodeId::Number(8)]);

        assert_eq!(arena.leave_subgraph(), Some(NodeId::Number(8)));
        assert_eq!(arena.active_subgraph(), Some(OUTER));
        assert_eq!(arena.leave_subgraph(), Some(NodeId::Number(5)));
        assert_eq!(arena.leave_subgraph(), None);
    }

    #[test_log::test]
    fn rejects_invalid_navigation() {
        let mut arena = nested_arena();

        assert_eq!(
            arena.enter_subgraph(NodeId::Number(42)),
            Err(GraphError::UnknownNode(NodeId::Number(42)))
        );
        assert_eq!(
            arena.enter_subgraph(NodeId::Number(1)),
            Err(GraphError::NotASubgraph(NodeId::Number(1)))
        );

        let orphan = Uuid::from_u128(0x33);
        arena.root_mut().add_subgraph_node(6, orphan);
        assert_eq!(
            arena.enter_subgraph(NodeId::Number(6)),
            Err(GraphError::UnknownSubgraph(orphan))
        );

        assert_eq!(
            arena.set_active_path(vec![NodeId::Number(5), NodeId::Number(7)]),
            Err(GraphError::NotASubgraph(NodeId::Number(7)))
        );
        assert_eq!(
            arena.set_active_path(vec![NodeId::Number(5), NodeId::Number(8)]),
            Ok(())
        );
        assert_eq!(arena.active_subgraph(), Some(INNER));
    }

    #[test_log::test]
    fn view_falls_back_to_root_when_the_path_breaks() {
        let mut arena = nested_arena();

        arena.enter_subgraph(NodeId::Number(5)).unwrap();
        arena.remove_subgraph(OUTER);

        assert_eq!(arena.active_subgraph(), None);
        assert!(arena.active_graph().contains_node(&NodeId::Number(1)));
    }

    #[test_log::test]
    fn maps_execution_ids_onto_the_current_view() {
        let mut arena = nested_arena();

        // At the root only bare ids are visible.
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("1")),
            Some(NodeId::Number(1))
        );
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("5:7")),
            None
        );

        arena.enter_subgraph(NodeId::Number(5)).unwrap();

        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("5:7")),
            Some(NodeId::Number(7))
        );
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("1")),
            None
        );
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("5:8:9")),
            None
        );
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("1:7")),
            None
        );
    }

    #[test_log::test]
    fn shared_definitions_map_across_instances() {
        let mut arena = nested_arena();

        // A second instance of OUTER next to the first.
        arena.root_mut().add_subgraph_node(6, OUTER);
        arena.enter_subgraph(NodeId::Number(5)).unwrap();

        // An execution entering through the other instance still lands on
        // the viewed definition.
        assert_eq!(
            arena.execution_id_to_current_id(&NodeExecutionId::parse("6:7")),
            Some(NodeId::Number(7))
        );
    }

    #[test_log::test]
    fn resolves_execution_ids_to_locator_ids() {
        let arena = nested_arena();

        assert_eq!(
            arena.execution_id_to_locator_id(&NodeExecutionId::parse("5:8:9")),
            Some(NodeLocatorId::Subgraph {
                subgraph: INNER,
                node: NodeId::Number(9),
            })
        );
        assert_eq!(
            arena.execution_id_to_locator_id(&NodeExecutionId::parse("5:7")),
            Some(NodeLocatorId::Subgraph {
                subgraph: OUTER,
                node: NodeId::Number(7),
            })
        );
        assert_eq!(
            arena.execution_id_to_locator_id(&NodeExecutionId::parse("1")),
            Some(NodeLocatorId::Root(NodeId::Number(1)))
        );
        // 1 is a plain node, the path cannot continue through it.
        assert_eq!(
            arena.execution_id_to_locator_id(&NodeExecutionId::parse("1:9")),
            None
        );
    }

    #[test_log::test]
    fn expands_locator_ids_to_execution_ids() {
        let arena = nested_arena();

        assert_eq!(
            arena.locator_id_to_execution_id(&NodeLocatorId::Subgraph {
                subgraph: INNER,
                node: NodeId::Number(9),
            }),
            Some(NodeExecutionId::parse("5:8:9"))
        );
        assert_eq!(
            arena.locator_id_to_execution_id(&NodeLocatorId::Root(NodeId::Number(1))),
            Some(NodeExecutionId::parse("1"))
        );
        assert_eq!(
            arena.locator_id_to_execution_id(&NodeLocatorId::Subgraph {
                subgraph: Uuid::from_u128(0x99),
                node: NodeId::Number(9),
            }),
            None
        );
    }

    #[test_log::test]
    fn locator_expansion_prefers_the_shortest_path() {
        let mut arena = nested_arena();

        // INNER is also instantiated directly on the root.
        arena.root_mut().add_subgraph_node(3, INNER);

        assert_eq!(
            arena.locator_id_to_execution_id(&NodeLocatorId::Subgraph {
                subgraph: INNER,
                node: NodeId::Number(9),
            }),
            Some(NodeExecutionId::parse("3:9"))
        );
    }

    #[test_log::test]
    fn locator_expansion_survives_self_referential_documents() {
        let mut arena = GraphArena::new();
        let cyclic = Uuid::from_u128(0x44);

        let mut graph = Graph::new();
        graph.add_subgraph_node(1, cyclic);
        arena.insert_subgraph(cyclic, graph);
        arena.root_mut().add_subgraph_node(1, cyclic);

        assert_eq!(
            arena.locator_id_to_execution_id(&NodeLocatorId::Subgraph {
                subgraph: Uuid::from_u128(0x99),
                node: NodeId::Number(2),
            }),
            None
        );
    }

    #[test_log::test]
    fn qualifies_node_ids_with_the_viewed_subgraph() {
        let mut arena = nested_arena();

        assert_eq!(
            arena.node_id_to_locator_id(NodeId::Number(1), None),
            NodeLocatorId::Root(NodeId::Number(1))
        );
        assert_eq!(
            arena.node_id_to_locator_id(NodeId::Number(9), Some(INNER)),
            NodeLocatorId::Subgraph {
                subgraph: INNER,
                node: NodeId::Number(9),
            }
        );

        arena.enter_subgraph(NodeId::Number(5)).unwrap();
        assert_eq!(
            arena.node_id_to_locator_id(NodeId::Number(7), None),
            NodeLocatorId::Subgraph {
                subgraph: OUTER,
                node: NodeId::Number(7),
            }
        );
    }

    #[test_log::test]
    fn freshly_defined_subgraphs_are_resolvable() {
        let mut arena = GraphArena::new();

        let mut graph = Graph::new();
        graph.add_node("leaf");
        let id = arena.define_subgraph(graph);

        arena.root_mut().add_subgraph_node(1, id);

        assert!(arena.subgraph(id).is_some());
        assert_eq!(arena.enter_subgraph(NodeId::Number(1)), Ok(id));
        assert!(
            arena
                .active_graph()
                .contains_node(&NodeId::String("leaf".to_string()))
        );
    }
}
