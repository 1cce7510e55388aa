//! Knowledge graph linking documents, concepts, skills, issues and pull requests.
//!
//! The graph lives in a small SQLite database. [`events`] turns GitHub issue
//! and pull request events into nodes and edges; [`export`] renders the
//! whole graph as vis.js JSON.

pub mod events;
pub mod export;
pub mod store;

pub use events::EventHandler;
pub use store::{Edge, GraphStats, KnowledgeGraph, Node, NodeType};
