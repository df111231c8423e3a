//! DOT export of the evaluation graph, for diagnostics.
//!
//! Produces two Graphviz files from one snapshot of the evaluator:
//!
//! ```text
//! Evaluator ──snapshot──► eval_ranked.dot   one cluster per round
//!                     └─► eval_graph.dot    flat, with vertex attributes
//! ```
//!
//! Rendering reads the snapshot only; write failures are logged and never
//! reach the caller.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::eval::{attr, Evaluator, Key, Vertex};
use crate::storage::memory::Snapshot;

pub const RANKED_FILE: &str = "eval_ranked.dot";
pub const GRAPH_FILE: &str = "eval_graph.dot";

/// Write both diagrams into `dir`, each on its own scoped thread.
pub fn write_debug_graphs(eval: &Evaluator, dir: &Path) {
    if let Err(err) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), %err, "could not create debug directory");
        return;
    }
    let snapshot = eval.graph().snapshot();
    let order = eval.evaluated_order();
    std::thread::scope(|s| {
        s.spawn(|| write_file(&dir.join(RANKED_FILE), &render_ranked(&snapshot, order)));
        s.spawn(|| write_file(&dir.join(GRAPH_FILE), &render_graph(&snapshot)));
    });
    info!(dir = %dir.display(), "wrote evaluation graphs");
}

fn write_file(path: &Path, contents: &str) {
    if let Err(err) = fs::write(path, contents) {
        warn!(path = %path.display(), %err, "could not write debug graph");
    }
}

/// Vertices grouped into one cluster per evaluation round; vertices never
/// evaluated are left outside any cluster.
pub fn render_ranked(snapshot: &Snapshot<Key, Vertex>, order: &[Vec<Key>]) -> String {
    let mut out = header("evaluation_ranked");
    for (round, keys) in order.iter().enumerate() {
        let _ = writeln!(out, "  subgraph cluster_{round} {{");
        let _ = writeln!(out, "    label = \"round {round}\";");
        for key in keys {
            let _ = writeln!(out, "    {};", quote(&key.to_string()));
        }
        let _ = writeln!(out, "  }}");
    }
    for (key, _, _) in &snapshot.vertices {
        if !order.iter().any(|round| round.contains(key)) {
            let _ = writeln!(out, "  {} [style = dashed];", quote(&key.to_string()));
        }
    }
    write_edges(&mut out, snapshot);
    out.push_str("}\n");
    out
}

/// Every vertex with its kind and recorded attributes; errored vertices red.
pub fn render_graph(snapshot: &Snapshot<Key, Vertex>) -> String {
    let mut out = header("evaluation_graph");
    for (key, vertex, attrs) in &snapshot.vertices {
        let mut label = format!("{key}\n{}", kind_name(vertex));
        for (name, value) in attrs {
            let _ = write!(label, "\n{name}: {value}");
        }
        let color = if attrs.contains_key(attr::ERROR) { ", color = red" } else { "" };
        let _ = writeln!(out, "  {} [shape = {}, label = {}{color}];", quote(&key.to_string()), shape(vertex), quote(&label));
    }
    write_edges(&mut out, snapshot);
    out.push_str("}\n");
    out
}

fn header(name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// opgraph evaluation export");
    let _ = writeln!(out, "// Generated {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "digraph {name} {{");
    let _ = writeln!(out, "  rankdir = BT;");
    out
}

fn write_edges(out: &mut String, snapshot: &Snapshot<Key, Vertex>) {
    for (source, target) in &snapshot.edges {
        let _ = writeln!(out, "  {} -> {};", quote(&source.to_string()), quote(&target.to_string()));
    }
}

fn kind_name(vertex: &Vertex) -> &'static str {
    match vertex {
        Vertex::Property(_) => "property",
        Vertex::Edge(_) => "edge",
        Vertex::GraphState(_) => "graph state",
        Vertex::PathExpand(_) => "path expand",
    }
}

fn shape(vertex: &Vertex) -> &'static str {
    match vertex {
        Vertex::Property(_) => "box",
        Vertex::Edge(_) => "ellipse",
        Vertex::GraphState(_) => "diamond",
        Vertex::PathExpand(_) => "parallelogram",
    }
}

/// Quote a DOT identifier.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::PropertyVertex;
    use crate::model::{PropertyRef, ResourceId};

    fn vertex(name: &str) -> (Key, Vertex) {
        let v = PropertyVertex::new(PropertyRef::new(ResourceId::new("aws", "vpc", name), "Cidr"), None);
        (v.key(), Vertex::Property(v))
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"a"b"#), r#""a\"b""#);
    }

    #[test]
    fn test_render_ranked_clusters_rounds() {
        let (a, va) = vertex("a");
        let (b, vb) = vertex("b");
        let snapshot = Snapshot {
            vertices: vec![(a.clone(), va, Default::default()), (b.clone(), vb, Default::default())],
            edges: vec![(a.clone(), b.clone())],
        };
        let dot = render_ranked(&snapshot, &[vec![b.clone()]]);
        assert!(dot.contains("subgraph cluster_0"));
        assert!(dot.contains("[style = dashed]"));
        assert!(dot.contains(" -> "));
    }

    #[test]
    fn test_render_graph_marks_errors() {
        let (a, va) = vertex("a");
        let attrs = [(attr::ERROR.to_string(), "boom".to_string())].into_iter().collect();
        let snapshot = Snapshot { vertices: vec![(a, va, attrs)], edges: Vec::new() };
        let dot = render_graph(&snapshot);
        assert!(dot.contains("color = red"));
        assert!(dot.contains("error: boom"));
    }
}
