//! Determinism and termination properties of the evaluation loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use opgraph::knowledge::{ConfigurationRule, Direction, OperationalStep};
use opgraph::{
    EdgeTemplate, Evaluator, Key, KnowledgeBase, OperationalRule, PropertyRef, PropertyTemplate, PropertyType,
    Resource, ResourceId, ResourceTemplate, SimpleEdge, Solution, Value,
};

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

/// Functions that need a role and a security group rule; the group's
/// rules get a default port per element.
fn mixed_kb() -> KnowledgeBase {
    let role_rule = OperationalRule::default().with_step(OperationalStep::new(Direction::Downstream, "aws:iam_role"));
    let ingress = Value::Map(BTreeMap::from([("Source".to_string(), Value::from("{{ .Source }}"))]));
    KnowledgeBase::new()
        .with_resource(
            ResourceTemplate::new("aws:lambda_function")
                .with_property(PropertyTemplate::new("Role", "resource(aws:iam_role)".parse().unwrap()).with_rule(role_rule))
                .with_property(PropertyTemplate::new("Memory", PropertyType::Int).with_default(128)),
        )
        .with_resource(
            ResourceTemplate::new("aws:iam_role")
                .with_property(PropertyTemplate::new("RoleName", PropertyType::String).with_default("{{ .Self }}")),
        )
        .with_resource(
            ResourceTemplate::new("aws:security_group").with_property(
                PropertyTemplate::new("Rules", "list".parse().unwrap())
                    .with_sub_property(PropertyTemplate::new("Port", PropertyType::Int).with_default(443)),
            ),
        )
        .with_edge(
            EdgeTemplate::new(id("aws:lambda_function"), id("aws:security_group")).with_rule(
                OperationalRule::default().with_config(ConfigurationRule::new("{{ .Target }}", "Rules", ingress)),
            ),
        )
}

fn seeded() -> Evaluator {
    let eval = Evaluator::new(Solution::new(Arc::new(mixed_kb())));
    let sg = id("aws:security_group:web");
    eval.add_operational_resource(Resource::new(sg.clone())).unwrap();
    for name in ["worker", "api"] {
        let function = ResourceId::new("aws", "lambda_function", name);
        eval.add_operational_resource(Resource::new(function.clone())).unwrap();
        eval.add_operational_edge(SimpleEdge::new(function, sg.clone())).unwrap();
    }
    eval
}

// ============================================================================
// 1. Same input, same run
// ============================================================================

#[test]
fn test_repeated_runs_are_identical() {
    let run = || {
        let mut eval = seeded();
        eval.evaluate().unwrap();
        let resources: Vec<(ResourceId, BTreeMap<String, Value>)> =
            eval.solution().resources().into_iter().map(|r| (r.id, r.properties)).collect();
        (eval.evaluated_order().to_vec(), resources, eval.solution().edges())
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);

    let (_, resources, _) = first;
    let rules = resources
        .iter()
        .find(|(id, _)| *id == ResourceId::new("aws", "security_group", "web"))
        .and_then(|(_, props)| props.get("Rules"))
        .and_then(Value::as_list)
        .map(<[Value]>::len);
    assert_eq!(rules, Some(2));
}

#[test]
fn test_batches_are_sorted() {
    let mut eval = seeded();
    eval.evaluate().unwrap();
    for round in eval.evaluated_order() {
        let mut sorted = round.clone();
        sorted.sort();
        assert_eq!(round, &sorted);
    }
}

// ============================================================================
// 2. Dependency discovery is idempotent
// ============================================================================

#[test]
fn test_dependencies_are_idempotent() {
    let eval = seeded();
    for key in eval.graph().keys() {
        let vertex = eval.vertex(&key).unwrap();
        let first = vertex.dependencies(&eval).unwrap();
        let second = vertex.dependencies(&eval).unwrap();
        assert_eq!(first.edges, second.edges, "edges of {key}");
        assert_eq!(
            first.nodes.keys().collect::<Vec<_>>(),
            second.nodes.keys().collect::<Vec<_>>(),
            "nodes of {key}"
        );
    }
}

#[test]
fn test_unevaluated_is_subset_of_graph() {
    let mut eval = seeded();
    for key in eval.unevaluated().keys() {
        assert!(eval.graph().contains(&key));
    }
    eval.evaluate().unwrap();
    assert_eq!(eval.unevaluated().order(), 0);
    let evaluated: Vec<&Key> = eval.evaluated_order().iter().flatten().collect();
    for key in eval.graph().keys() {
        if matches!(key, Key::Property(_)) {
            assert!(evaluated.contains(&&key), "{key} never evaluated");
        }
    }
}

// ============================================================================
// 3. Acyclic inputs always terminate
// ============================================================================

fn thing(i: usize) -> ResourceId {
    ResourceId::new("aws", format!("thing{i}"), "t")
}

/// Resource `i` either holds the constant `i` or copies an earlier one.
fn chain_kb(links: &[Option<usize>]) -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    for (i, link) in links.iter().enumerate() {
        let default = match link {
            Some(d) => Value::from(format!(r#"{{{{ fieldValue "Value" "{}" }}}}"#, thing(*d))),
            None => Value::from(i),
        };
        let template = ResourceTemplate::new(format!("aws:thing{i}"))
            .with_property(PropertyTemplate::new("Value", PropertyType::Int).with_default(default));
        kb.add_resource_template(template);
    }
    kb
}

fn links() -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec((any::<bool>(), 0usize..64), 1..10).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (linked, n))| (linked && i > 0).then(|| n % i))
            .collect()
    })
}

proptest! {
    #[test]
    fn test_acyclic_chains_terminate(links in links()) {
        let mut eval = Evaluator::new(Solution::new(Arc::new(chain_kb(&links))));
        for i in 0..links.len() {
            eval.add_operational_resource(Resource::new(thing(i))).unwrap();
        }
        eval.evaluate().unwrap();
        prop_assert_eq!(eval.unevaluated().order(), 0);
        prop_assert!(eval.evaluated_order().len() <= links.len());

        let mut expected: Vec<i64> = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            let v = match link {
                Some(d) => expected[*d],
                None => i as i64,
            };
            expected.push(v);
        }
        for (i, want) in expected.into_iter().enumerate() {
            let got = eval.solution().property(&PropertyRef::new(thing(i), "Value")).unwrap();
            prop_assert_eq!(got, Value::Int(want));
        }
    }
}
