//! Diagnostic DOT export written after evaluation.

use std::fs;
use std::sync::Arc;

use opgraph::export::{GRAPH_FILE, RANKED_FILE};
use opgraph::{EvalConfig, Evaluator, KnowledgeBase, PropertyTemplate, PropertyType, Resource, ResourceTemplate, Solution};

fn kb() -> KnowledgeBase {
    KnowledgeBase::new().with_resource(
        ResourceTemplate::new("aws:vpc")
            .with_property(PropertyTemplate::new("Name", PropertyType::String).with_default("main"))
            .with_property(PropertyTemplate::new("Cidr", PropertyType::String).required()),
    )
}

#[test]
fn test_export_written_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::new().with_resource(
        ResourceTemplate::new("aws:vpc")
            .with_property(PropertyTemplate::new("Name", PropertyType::String).with_default("main")),
    );
    let mut eval = Evaluator::new(Solution::new(Arc::new(kb)))
        .with_config(EvalConfig::default().with_debug_dir(dir.path().join("debug")));
    eval.add_operational_resource(Resource::new("aws:vpc:main".parse().unwrap())).unwrap();
    eval.evaluate().unwrap();

    let ranked = fs::read_to_string(dir.path().join("debug").join(RANKED_FILE)).unwrap();
    assert!(ranked.contains("digraph evaluation_ranked"));
    assert!(ranked.contains("subgraph cluster_0"));
    assert!(ranked.contains(r#""aws:vpc:main#Name""#), "{ranked}");

    let graph = fs::read_to_string(dir.path().join("debug").join(GRAPH_FILE)).unwrap();
    assert!(graph.contains("round: 0"));
    assert!(!graph.contains("color = red"));
}

#[test]
fn test_export_written_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut eval =
        Evaluator::new(Solution::new(Arc::new(kb()))).with_config(EvalConfig::default().with_debug_dir(dir.path()));
    eval.add_operational_resource(Resource::new("aws:vpc:main".parse().unwrap())).unwrap();
    assert!(eval.evaluate().is_err());

    let graph = fs::read_to_string(dir.path().join(GRAPH_FILE)).unwrap();
    assert!(graph.contains("color = red"));
    assert!(graph.contains("ready: NotReadyMid"));
}
