//! Renames, retraction and constraints.
//!
//! A namespace property renames its resource mid-evaluation; nothing may
//! keep pointing at the old id afterwards. Removal must take dependent
//! vertices (and orphaned graph states) with it.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use opgraph::{
    ConstraintOperator, Evaluator, GraphQuery, Key, KnowledgeBase, PropertyRef, PropertyTemplate, PropertyType, Resource,
    ResourceConstraint, ResourceId, ResourceTemplate, SimpleEdge, Solution, Value,
};

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

fn network_kb() -> KnowledgeBase {
    KnowledgeBase::new()
        .with_resource(ResourceTemplate::new("aws:vpc"))
        .with_resource(
            ResourceTemplate::new("aws:subnet")
                .with_property(
                    PropertyTemplate::new("Vpc", "resource(aws:vpc)".parse().unwrap())
                        .with_default("aws:vpc:main")
                        .namespace(),
                )
                .with_property(PropertyTemplate::new("Cidr", PropertyType::String).with_default("10.0.0.0/24")),
        )
        .with_resource(
            ResourceTemplate::new("aws:lambda_function")
                .with_property(PropertyTemplate::new("Subnet", "resource(aws:subnet)".parse().unwrap())),
        )
}

// ============================================================================
// 1. Namespace rename
// ============================================================================

#[test]
fn test_namespace_rename_reaches_every_reference() {
    let old = id("aws:subnet:a");
    let new = id("aws:subnet:main:a");
    let function = id("aws:lambda_function:api");
    let solution = Solution::new(Arc::new(network_kb()))
        .with_constraint(ResourceConstraint::new(ConstraintOperator::Equals, old.clone(), "Cidr", "10.1.0.0/16"));
    let mut eval = Evaluator::new(solution);

    eval.add_operational_resource(Resource::new(id("aws:vpc:main"))).unwrap();
    eval.add_operational_resource(Resource::new(old.clone())).unwrap();
    eval.add_operational_resource(Resource::new(function.clone()).with_property("Subnet", old.clone())).unwrap();
    eval.solution().add_edge(&SimpleEdge::new(function.clone(), old.clone())).unwrap();
    eval.evaluate().unwrap();

    assert_eq!(
        eval.evaluated_order(),
        &[
            vec![Key::property(new.clone(), "Vpc")],
            vec![Key::property(new.clone(), "Cidr")],
            vec![Key::property(function.clone(), "Subnet")],
        ]
    );

    assert!(eval.graph().keys().iter().all(|k| !k.references(&old)));
    assert!(eval.evaluated_order().iter().flatten().all(|k| !k.references(&old)));
    assert!(!eval.solution().has_resource(&old));
    assert!(eval.solution().has_edge(&SimpleEdge::new(function.clone(), new.clone())));
    assert_eq!(
        eval.solution().property(&PropertyRef::new(function, "Subnet")).unwrap(),
        Value::ResourceId(new.clone())
    );
    assert_eq!(eval.solution().property(&PropertyRef::new(new.clone(), "Cidr")).unwrap(), Value::from("10.1.0.0/16"));
    assert_eq!(eval.solution().constraints()[0].target, new);
}

#[test]
fn test_namespace_rename_reaches_graph_states() {
    let old = id("aws:subnet:a");
    let new = id("aws:subnet:main:a");
    let kb = KnowledgeBase::new().with_resource(ResourceTemplate::new("aws:vpc")).with_resource(
        ResourceTemplate::new("aws:subnet")
            .with_property(
                PropertyTemplate::new("Vpc", "resource(aws:vpc)".parse().unwrap())
                    .with_default("aws:vpc:main")
                    .namespace(),
            )
            .with_property(
                PropertyTemplate::new("Public", PropertyType::Bool)
                    .with_default(r#"{{ hasDownstream "aws:igw" .Self }}"#),
            ),
    );
    let mut eval = Evaluator::new(Solution::new(Arc::new(kb)));
    eval.add_operational_resource(Resource::new(id("aws:vpc:main"))).unwrap();
    eval.add_operational_resource(Resource::new(old.clone())).unwrap();
    eval.evaluate().unwrap();

    let stale = old.to_string();
    for key in eval.graph().keys() {
        assert!(!key.to_string().contains(&stale), "graph still holds {key}");
    }
    for key in eval.evaluated_order().iter().flatten() {
        assert!(!key.to_string().contains(&stale), "history still holds {key}");
    }
    let state = Key::GraphState(GraphQuery::new("hasDownstream", id("aws:igw"), new.clone()));
    assert!(eval.graph().has_edge(&Key::property(new.clone(), "Public"), &state));
    assert!(eval.evaluated_order().iter().flatten().any(|k| *k == state));
    assert_eq!(eval.solution().property(&PropertyRef::new(new, "Public")).unwrap(), Value::Bool(false));
}

#[test]
fn test_namespace_already_applied_keeps_id() {
    let subnet = id("aws:subnet:main:a");
    let mut eval = Evaluator::new(Solution::new(Arc::new(network_kb())));
    eval.add_operational_resource(Resource::new(id("aws:vpc:main"))).unwrap();
    eval.add_operational_resource(Resource::new(subnet.clone())).unwrap();
    eval.evaluate().unwrap();

    assert!(eval.solution().has_resource(&subnet));
    assert_eq!(eval.solution().resource_ids().len(), 2);
}

// ============================================================================
// 2. Constraints
// ============================================================================

#[test]
fn test_equals_constraint_overrides_default() {
    let subnet = id("aws:subnet:main:a");
    let solution = Solution::new(Arc::new(network_kb())).with_constraint(ResourceConstraint::new(
        ConstraintOperator::Equals,
        subnet.clone(),
        "Cidr",
        "10.9.0.0/16",
    ));
    let mut eval = Evaluator::new(solution);
    eval.add_operational_resource(Resource::new(id("aws:vpc:main"))).unwrap();
    eval.add_operational_resource(Resource::new(subnet.clone())).unwrap();
    eval.evaluate().unwrap();

    assert_eq!(eval.solution().property(&PropertyRef::new(subnet, "Cidr")).unwrap(), Value::from("10.9.0.0/16"));
}

// ============================================================================
// 3. Removal
// ============================================================================

fn graph_state_kb() -> KnowledgeBase {
    KnowledgeBase::new()
        .with_resource(ResourceTemplate::new("aws:vpc"))
        .with_resource(ResourceTemplate::new("aws:subnet").with_property(
            PropertyTemplate::new("VpcCidr", PropertyType::String)
                .with_default(r#"{{ fieldValue "Cidr" (downstream "aws:vpc" .Self) }}"#),
        ))
}

#[test]
fn test_remove_resource_collects_orphaned_graph_state() {
    let subnet = id("aws:subnet:a");
    let eval = Evaluator::new(Solution::new(Arc::new(graph_state_kb())));
    eval.add_operational_resource(Resource::new(subnet.clone())).unwrap();

    let states: Vec<Key> = eval.graph().keys().into_iter().filter(|k| matches!(k, Key::GraphState(_))).collect();
    assert_eq!(states, vec![Key::GraphState(GraphQuery::new("downstream", id("aws:vpc"), subnet.clone()))]);

    eval.remove_operational_resource(&subnet).unwrap();
    assert_eq!(eval.graph().order(), 0);
    assert_eq!(eval.unevaluated().order(), 0);
    assert!(!eval.solution().has_resource(&subnet));
}

#[test]
fn test_remove_resource_keeps_shared_graph_state() {
    let eval = Evaluator::new(Solution::new(Arc::new(graph_state_kb())));
    eval.add_operational_resource(Resource::new(id("aws:subnet:a"))).unwrap();
    eval.add_operational_resource(Resource::new(id("aws:subnet:b"))).unwrap();

    eval.remove_operational_resource(&id("aws:subnet:a")).unwrap();
    let remaining = eval.graph().keys();
    assert_eq!(
        remaining,
        vec![
            Key::property(id("aws:subnet:b"), "VpcCidr"),
            Key::GraphState(GraphQuery::new("downstream", id("aws:vpc"), id("aws:subnet:b"))),
        ]
    );
}
