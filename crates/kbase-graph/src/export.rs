//! vis.js JSON export of the knowledge graph.

use std::path::Path;

use kbase_core::KbError;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::store::{Edge, KnowledgeGraph, Node, NodeType};

struct NodeStyle {
    color: &'static str,
    shape: &'static str,
}

fn node_style(node_type: NodeType) -> NodeStyle {
    let (color, shape) = match node_type {
        NodeType::Document => ("#4A90E2", "box"),
        NodeType::Issue => ("#E74C3C", "diamond"),
        NodeType::PullRequest => ("#27AE60", "diamond"),
        NodeType::Concept => ("#F39C12", "ellipse"),
        NodeType::Skill => ("#9B59B6", "star"),
    };
    NodeStyle { color, shape }
}

/// Colour and dash style per relationship; unknown relationships are grey.
fn edge_style(relationship: &str) -> (&'static str, bool) {
    match relationship {
        "ABOUT" => ("#95A5A6", false),
        "FIXED_BY" => ("#27AE60", false),
        "MODIFIES" => ("#E67E22", false),
        "GENERATES" => ("#3498DB", true),
        "EXPLAINS" => ("#9B59B6", true),
        "INCLUDES" => ("#1ABC9C", true),
        _ => ("#95A5A6", false),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VisHighlight {
    pub background: String,
    pub border: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisNodeColor {
    pub background: String,
    pub border: String,
    pub highlight: VisHighlight,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisFont {
    pub color: String,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub shape: String,
    pub color: VisNodeColor,
    pub font: VisFont,
    /// HTML tooltip.
    pub title: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisEdgeColor {
    pub color: String,
    pub highlight: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisSmooth {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisEdge {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub label: String,
    pub arrows: String,
    pub color: VisEdgeColor,
    pub dashes: bool,
    pub font: VisFont,
    pub smooth: VisSmooth,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub version: String,
    pub generator: String,
}

/// The document written for the graph viewer.
#[derive(Debug, Clone, Serialize)]
pub struct VisGraph {
    pub metadata: ExportMetadata,
    pub nodes: Vec<VisNode>,
    pub edges: Vec<VisEdge>,
}

/// Darken a `#rrggbb` colour by `percent`. Malformed input is returned unchanged.
///
/// # Examples
///
/// ```
/// use kbase_graph::export::darken_color;
///
/// assert_eq!(darken_color("#4A90E2", 20), "#3b73b4");
/// assert_eq!(darken_color("blue", 20), "blue");
/// ```
pub fn darken_color(hex: &str, percent: u8) -> String {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 {
        return hex.to_string();
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    let (Some(r), Some(g), Some(b)) = (channel(0), channel(2), channel(4)) else {
        return hex.to_string();
    };
    let keep = 100 - u32::from(percent.min(100));
    let scale = |c: u8| (u32::from(c) * keep / 100) as u8;
    format!("#{:02x}{:02x}{:02x}", scale(r), scale(g), scale(b))
}

/// Short label shown on the node.
pub fn node_label(node: &Node) -> String {
    let number = || {
        node.prop_u64("number")
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".into())
    };
    match node.node_type {
        NodeType::Document => {
            let path = node.prop_str("path").unwrap_or("Unknown");
            Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string())
        }
        NodeType::Issue => format!("Issue #{}", number()),
        NodeType::PullRequest => format!("PR #{}", number()),
        NodeType::Concept => node.prop_str("name").unwrap_or("Unknown Concept").to_string(),
        NodeType::Skill => node.prop_str("name").unwrap_or("Unknown Skill").to_string(),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// HTML tooltip for the node.
pub fn node_tooltip(node: &Node) -> String {
    let mut lines = vec![format!("<b>{}</b>", node.node_type)];
    match node.node_type {
        NodeType::Document => {
            lines.push(format!("Path: {}", escape(node.prop_str("path").unwrap_or("Unknown"))));
        }
        NodeType::Issue | NodeType::PullRequest => {
            let number = node
                .prop_u64("number")
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into());
            lines.push(format!(
                "#{number}: {}",
                escape(node.prop_str("title").unwrap_or("Untitled"))
            ));
            lines.push(format!(
                "Status: {}",
                escape(node.prop_str("status").unwrap_or("unknown"))
            ));
        }
        NodeType::Concept | NodeType::Skill => {
            lines.push(escape(node.prop_str("name").unwrap_or("Unknown")));
        }
    }
    lines.join("<br>")
}

fn vis_node(node: Node) -> VisNode {
    let style = node_style(node.node_type);
    VisNode {
        label: node_label(&node),
        title: node_tooltip(&node),
        shape: style.shape.into(),
        color: VisNodeColor {
            background: style.color.into(),
            border: darken_color(style.color, 20),
            highlight: VisHighlight {
                background: style.color.into(),
                border: "#000000".into(),
            },
        },
        font: VisFont {
            color: "#333333".into(),
            size: 14,
            align: None,
        },
        id: node.id,
        node_type: node.node_type,
        properties: node.properties,
    }
}

fn vis_edge(edge: Edge) -> VisEdge {
    let (color, dashes) = edge_style(&edge.relationship);
    VisEdge {
        id: edge.id,
        label: edge.relationship.replace('_', " "),
        from: edge.from_id,
        to: edge.to_id,
        arrows: "to".into(),
        color: VisEdgeColor {
            color: color.into(),
            highlight: "#000000".into(),
        },
        dashes,
        font: VisFont {
            color: "#666666".into(),
            size: 11,
            align: Some("middle".into()),
        },
        smooth: VisSmooth {
            kind: "continuous".into(),
        },
    }
}

/// Build the vis.js document from an open graph.
pub fn to_vis(graph: &KnowledgeGraph) -> Result<VisGraph, KbError> {
    let nodes: Vec<VisNode> = graph.all_nodes()?.into_iter().map(vis_node).collect();
    let edges: Vec<VisEdge> = graph.all_edges()?.into_iter().map(vis_edge).collect();
    Ok(assemble(nodes, edges))
}

fn assemble(nodes: Vec<VisNode>, edges: Vec<VisEdge>) -> VisGraph {
    VisGraph {
        metadata: ExportMetadata {
            exported_at: kbase_core::now_iso(),
            node_count: nodes.len(),
            edge_count: edges.len(),
            version: "1.0".into(),
            generator: concat!("kbase ", env!("CARGO_PKG_VERSION")).into(),
        },
        nodes,
        edges,
    }
}

/// Export the database at `db_path`. A missing database yields an empty graph.
pub fn export_graph(db_path: &Path) -> Result<VisGraph, KbError> {
    if !db_path.exists() {
        tracing::warn!(path = %db_path.display(), "graph database not found, exporting empty graph");
        return Ok(assemble(Vec::new(), Vec::new()));
    }
    let graph = KnowledgeGraph::open(db_path)?;
    to_vis(&graph)
}

/// Write the export as pretty JSON, creating parent directories.
pub fn write_graph(graph: &VisGraph, output: &Path) -> Result<(), KbError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, serde_json::to_string_pretty(graph)?)?;
    Ok(())
}
