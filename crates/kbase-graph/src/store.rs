//! SQLite storage for graph nodes and edges.
//!
//! Nodes are keyed `"{Type}:{key}"` and carry a JSON property bag. Edges are
//! unique per `(from, to, relationship)`. Traversals load the edge list into
//! a `petgraph` digraph.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use kbase_core::KbError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relationship names used by the event handler and the skill generator.
pub mod rel {
    pub const ABOUT: &str = "ABOUT";
    pub const FIXED_BY: &str = "FIXED_BY";
    pub const MODIFIES: &str = "MODIFIES";
    pub const INCLUDES: &str = "INCLUDES";
}

/// Kind of entity a node represents.
///
/// # Examples
///
/// ```
/// use kbase_graph::NodeType;
///
/// assert_eq!(NodeType::Issue.id("42"), "Issue:42");
/// assert_eq!("PullRequest".parse::<NodeType>().unwrap(), NodeType::PullRequest);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Document,
    Concept,
    Skill,
    Issue,
    PullRequest,
}

impl NodeType {
    pub const ALL: [NodeType; 5] = [
        NodeType::Document,
        NodeType::Concept,
        NodeType::Skill,
        NodeType::Issue,
        NodeType::PullRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Document => "Document",
            NodeType::Concept => "Concept",
            NodeType::Skill => "Skill",
            NodeType::Issue => "Issue",
            NodeType::PullRequest => "PullRequest",
        }
    }

    /// Full node id for `key`.
    pub fn id(self, key: &str) -> String {
        format!("{}:{key}", self.as_str())
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KbError::Parse(format!("unknown node type: {s}")))
    }
}

/// A stored node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Node {
    /// String property, if present.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Integer property, if present.
    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(Value::as_u64)
    }

    /// Human-readable name: title, then path, then name, then the id.
    pub fn display_name(&self) -> &str {
        self.prop_str("title")
            .or_else(|| self.prop_str("path"))
            .or_else(|| self.prop_str("name"))
            .unwrap_or(&self.id)
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub id: i64,
    pub from_id: String,
    pub to_id: String,
    pub relationship: String,
    pub properties: Map<String, Value>,
    pub created_at: String,
}

/// Node and edge counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
}

/// SQLite-backed knowledge graph.
///
/// # Examples
///
/// ```
/// use kbase_graph::{KnowledgeGraph, NodeType};
/// use serde_json::Map;
///
/// let graph = KnowledgeGraph::in_memory().unwrap();
/// let doc = graph.add_node(NodeType::Document, "docs/a.md", Map::new()).unwrap();
/// let skill = graph.add_node(NodeType::Skill, "core", Map::new()).unwrap();
/// graph.add_edge(&doc, &skill, "INCLUDES", Map::new()).unwrap();
/// assert_eq!(graph.find_dependents(&doc, 3).unwrap(), vec![skill]);
/// ```
pub struct KnowledgeGraph {
    conn: Connection,
}

impl KnowledgeGraph {
    /// Open or create a graph database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, KbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KbError::Database(format!("failed to create graph directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| KbError::Database(format!("failed to open graph database: {e}")))?;
        let graph = Self { conn };
        graph.init_schema()?;
        Ok(graph)
    }

    /// Create an in-memory graph (for testing).
    pub fn in_memory() -> Result<Self, KbError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            KbError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        let graph = Self { conn };
        graph.init_schema()?;
        Ok(graph)
    }

    fn init_schema(&self) -> Result<(), KbError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    type TEXT NOT NULL,
                    properties TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS edges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    from_id TEXT NOT NULL,
                    to_id TEXT NOT NULL,
                    relationship TEXT NOT NULL,
                    properties TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(from_id, to_id, relationship)
                );

                CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);
                CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
                CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
                CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(relationship);
                ",
            )
            .map_err(|e| KbError::Database(format!("failed to create graph schema: {e}")))?;
        Ok(())
    }

    /// Insert or replace a node's properties. `created_at` survives replacement.
    ///
    /// Returns the full node id.
    pub fn add_node(
        &self,
        node_type: NodeType,
        key: &str,
        properties: Map<String, Value>,
    ) -> Result<String, KbError> {
        let id = node_type.id(key);
        let now = kbase_core::now_iso();
        self.conn
            .execute(
                "INSERT INTO nodes (id, type, properties, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    type = excluded.type,
                    properties = excluded.properties,
                    updated_at = excluded.updated_at",
                params![id, node_type.as_str(), Value::Object(properties).to_string(), now],
            )
            .map_err(|e| KbError::Database(format!("failed to add node '{id}': {e}")))?;
        tracing::debug!(node = %id, "node stored");
        Ok(id)
    }

    /// Add a node only if no node with that id exists yet.
    pub fn ensure_node(
        &self,
        node_type: NodeType,
        key: &str,
        properties: Map<String, Value>,
    ) -> Result<String, KbError> {
        let id = node_type.id(key);
        if self.get_node(&id)?.is_none() {
            self.add_node(node_type, key, properties)?;
        }
        Ok(id)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, KbError> {
        self.conn
            .query_row(
                "SELECT id, type, properties, created_at, updated_at FROM nodes WHERE id = ?1",
                params![id],
                row_to_raw_node,
            )
            .optional()
            .map_err(|e| KbError::Database(format!("failed to get node '{id}': {e}")))?
            .map(RawNode::into_node)
            .transpose()
    }

    /// Merge `properties` into an existing node.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::NotFound`] if the node does not exist.
    pub fn update_node(&self, id: &str, properties: Map<String, Value>) -> Result<(), KbError> {
        let mut node = self
            .get_node(id)?
            .ok_or_else(|| KbError::NotFound(format!("node {id}")))?;
        node.properties.extend(properties);
        self.conn
            .execute(
                "UPDATE nodes SET properties = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    Value::Object(node.properties).to_string(),
                    kbase_core::now_iso(),
                    id
                ],
            )
            .map_err(|e| KbError::Database(format!("failed to update node '{id}': {e}")))?;
        Ok(())
    }

    /// Add an edge. An existing `(from, to, relationship)` edge is left as is.
    ///
    /// Returns `true` if a new edge was inserted.
    pub fn add_edge(
        &self,
        from_id: &str,
        to_id: &str,
        relationship: &str,
        properties: Map<String, Value>,
    ) -> Result<bool, KbError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO edges (from_id, to_id, relationship, properties, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    from_id,
                    to_id,
                    relationship,
                    Value::Object(properties).to_string(),
                    kbase_core::now_iso()
                ],
            )
            .map_err(|e| {
                KbError::Database(format!(
                    "failed to add edge {from_id} -{relationship}-> {to_id}: {e}"
                ))
            })?;
        Ok(inserted > 0)
    }

    /// Nodes joined to `id` by an edge in either direction, optionally
    /// restricted to one relationship.
    pub fn find_related(&self, id: &str, relationship: Option<&str>) -> Result<Vec<Node>, KbError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT n.id, n.type, n.properties, n.created_at, n.updated_at, n.rowid
                 FROM edges e
                 JOIN nodes n ON (e.from_id = ?1 AND n.id = e.to_id)
                              OR (e.to_id = ?1 AND n.id = e.from_id)
                 WHERE n.id != ?1 AND (?2 IS NULL OR e.relationship = ?2)
                 ORDER BY n.rowid",
            )
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![id, relationship], row_to_raw_node)
            .map_err(|e| KbError::Database(format!("failed to query related nodes: {e}")))?;
        collect_nodes(rows)
    }

    /// Nodes reachable from `id` over outgoing edges within `max_depth`
    /// hops, in breadth-first visit order. The start node is excluded.
    pub fn find_dependents(&self, id: &str, max_depth: usize) -> Result<Vec<String>, KbError> {
        let (graph, index) = self.edge_graph()?;
        let Some(&start) = index.get(id) else {
            return Ok(Vec::new());
        };

        let mut seen: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut dependents = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            // petgraph yields the newest edge first.
            let mut next: Vec<NodeIndex> =
                graph.neighbors_directed(current, Direction::Outgoing).collect();
            next.reverse();
            for n in next {
                if seen.insert(n) {
                    dependents.push(graph[n].clone());
                    queue.push_back((n, depth + 1));
                }
            }
        }
        Ok(dependents)
    }

    fn edge_graph(&self) -> Result<(DiGraph<String, ()>, HashMap<String, NodeIndex>), KbError> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        for edge in self.all_edges()? {
            let from = *index
                .entry(edge.from_id.clone())
                .or_insert_with(|| graph.add_node(edge.from_id.clone()));
            let to = *index
                .entry(edge.to_id.clone())
                .or_insert_with(|| graph.add_node(edge.to_id.clone()));
            graph.add_edge(from, to, ());
        }
        Ok((graph, index))
    }

    /// All nodes of one type, newest first.
    pub fn query_by_type(&self, node_type: NodeType) -> Result<Vec<Node>, KbError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, type, properties, created_at, updated_at FROM nodes
                 WHERE type = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![node_type.as_str()], row_to_raw_node)
            .map_err(|e| KbError::Database(format!("failed to query nodes: {e}")))?;
        collect_nodes(rows)
    }

    /// All nodes in insertion order.
    pub fn all_nodes(&self) -> Result<Vec<Node>, KbError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, type, properties, created_at, updated_at FROM nodes
                 ORDER BY created_at, rowid",
            )
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_raw_node)
            .map_err(|e| KbError::Database(format!("failed to query nodes: {e}")))?;
        collect_nodes(rows)
    }

    /// All edges in insertion order.
    pub fn all_edges(&self) -> Result<Vec<Edge>, KbError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, from_id, to_id, relationship, properties, created_at
                 FROM edges ORDER BY id",
            )
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| KbError::Database(format!("failed to query edges: {e}")))?;

        let mut edges = Vec::new();
        for row in rows {
            let (id, from_id, to_id, relationship, properties, created_at) =
                row.map_err(|e| KbError::Database(format!("failed to read edge: {e}")))?;
            edges.push(Edge {
                id,
                from_id,
                to_id,
                relationship,
                properties: parse_properties(properties.as_deref())?,
                created_at,
            });
        }
        Ok(edges)
    }

    pub fn stats(&self) -> Result<GraphStats, KbError> {
        let count = |sql: &str| -> Result<usize, KbError> {
            self.conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| KbError::Database(format!("failed to count: {e}")))
        };
        let mut stats = GraphStats {
            total_nodes: count("SELECT COUNT(*) FROM nodes")?,
            total_edges: count("SELECT COUNT(*) FROM edges")?,
            ..GraphStats::default()
        };

        let mut stmt = self
            .conn
            .prepare("SELECT type, COUNT(*) FROM nodes GROUP BY type")
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| KbError::Database(format!("failed to count node types: {e}")))?;
        for row in rows {
            let (node_type, n) =
                row.map_err(|e| KbError::Database(format!("failed to read row: {e}")))?;
            stats.nodes_by_type.insert(node_type, n as usize);
        }
        Ok(stats)
    }
}

struct RawNode {
    id: String,
    node_type: String,
    properties: String,
    created_at: String,
    updated_at: String,
}

impl RawNode {
    fn into_node(self) -> Result<Node, KbError> {
        Ok(Node {
            node_type: self.node_type.parse()?,
            properties: parse_properties(Some(&self.properties))?,
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn row_to_raw_node(row: &Row<'_>) -> rusqlite::Result<RawNode> {
    Ok(RawNode {
        id: row.get(0)?,
        node_type: row.get(1)?,
        properties: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn collect_nodes(
    rows: impl Iterator<Item = rusqlite::Result<RawNode>>,
) -> Result<Vec<Node>, KbError> {
    let mut nodes = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| KbError::Database(format!("failed to read node: {e}")))?;
        nodes.push(raw.into_node()?);
    }
    Ok(nodes)
}

fn parse_properties(raw: Option<&str>) -> Result<Map<String, Value>, KbError> {
    match raw {
        None | Some("") => Ok(Map::new()),
        Some(s) => match serde_json::from_str(s)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(KbError::Database(format!(
                "properties are not a JSON object: {other}"
            ))),
        },
    }
}
