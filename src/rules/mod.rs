//! # Operational Rules
//!
//! Executes [`OperationalRule`]s against the live graph. Everything that
//! creates resources or edges goes through the evaluator's operational view,
//! so new elements are registered for evaluation as they appear.

use tracing::debug;

use crate::eval::Evaluator;
use crate::knowledge::{ConfigurationRule, Direction, OperationalRule, OperationalStep, PropertyTemplate, ResourceSelector};
use crate::model::{PropertyRef, Resource, ResourceId, SimpleEdge, Value};
use crate::solution::{ConfigureAction, DynamicContext, Solution};
use crate::template::DynamicData;
use crate::{Error, Result, ResultExt};

/// Run a whole rule: condition, then steps, then configuration rules.
/// Configuration rules use `action`.
pub fn handle_operational_rule(
    eval: &Evaluator,
    rule: &OperationalRule,
    data: &DynamicData,
    action: ConfigureAction,
) -> Result<()> {
    if !DynamicContext::new(eval.solution()).evaluate_condition(&rule.if_condition, data)? {
        debug!(condition = %rule.if_condition, "rule condition not met");
        return Ok(());
    }
    let mut errs = Vec::new();
    for step in &rule.steps {
        if let Err(err) = handle_step(eval, step, data) {
            errs.push(err);
        }
    }
    for cfg in &rule.configuration_rules {
        if let Err(err) = handle_configuration_rule(eval.solution(), cfg, data, action) {
            errs.push(err);
        }
    }
    Error::join(errs)
}

/// Run the operational rule of a property. The ids each step settles on
/// become the property's value.
pub fn handle_property_rule(
    eval: &Evaluator,
    reference: &PropertyRef,
    template: &PropertyTemplate,
    rule: &OperationalRule,
    data: &DynamicData,
) -> Result<()> {
    let solution = eval.solution();
    if !DynamicContext::new(solution).evaluate_condition(&rule.if_condition, data)? {
        return Ok(());
    }
    for step in &rule.steps {
        let ids = handle_step(eval, step, data)?;
        let Some(first) = ids.first().cloned() else { continue };
        let (value, action) = if template.kind.is_collection() {
            (Value::List(ids.into_iter().map(Value::ResourceId).collect()), ConfigureAction::Add)
        } else {
            (Value::ResourceId(first), ConfigureAction::Set)
        };
        solution.configure(&reference.resource, &reference.property, value, action)?;
    }
    let mut errs = Vec::new();
    for cfg in &rule.configuration_rules {
        if let Err(err) = handle_configuration_rule(solution, cfg, data, ConfigureAction::Set) {
            errs.push(err);
        }
    }
    Error::join(errs)
}

/// The property a configuration rule writes. An empty resource template
/// means the resource the rule runs for.
pub fn configuration_target(ctx: &mut DynamicContext<'_>, cfg: &ConfigurationRule, data: &DynamicData) -> Result<PropertyRef> {
    let resource = if cfg.resource.is_empty() {
        data.resource
            .clone()
            .ok_or_else(|| Error::OperationalRule(format!("configuration of {} names no resource", cfg.config.field)))?
    } else {
        ctx.decode_resource_id(&cfg.resource, data)?
    };
    let field = ctx.decode_string(&cfg.config.field, data)?;
    if field.is_empty() {
        return Err(Error::OperationalRule(format!("configuration rule for {resource} has an empty field")));
    }
    Ok(PropertyRef::new(resource, field))
}

pub fn handle_configuration_rule(
    solution: &Solution,
    cfg: &ConfigurationRule,
    data: &DynamicData,
    action: ConfigureAction,
) -> Result<()> {
    let mut ctx = DynamicContext::new(solution);
    let reference = configuration_target(&mut ctx, cfg, data)?;
    let value = ctx
        .resolve_value(&cfg.config.value, data)
        .context(|| format!("could not resolve value for {reference}"))?;
    debug!(%reference, %action, "configuring");
    solution
        .configure(&reference.resource, &reference.property, value, action)
        .context(|| format!("could not configure {reference}"))
}

/// Make sure the step's owner is connected to `num_needed` resources that
/// match its selectors and return them. Resources already connected count
/// first, then explicitly named ones, then (unless `unique`) existing
/// matches; the rest are created.
pub fn handle_step(eval: &Evaluator, step: &OperationalStep, data: &DynamicData) -> Result<Vec<ResourceId>> {
    let solution = eval.solution();
    let mut ctx = DynamicContext::new(solution);
    let owner = if step.resource.is_empty() {
        data.resource
            .clone()
            .ok_or_else(|| Error::OperationalRule("step has no resource to act for".into()))?
    } else {
        ctx.decode_resource_id(&step.resource, data)?
    };
    let needed = step.num_needed.max(1);
    let mut chosen: Vec<ResourceId> = Vec::new();

    let connected = match step.direction {
        Direction::Downstream => solution.direct_downstream(&owner),
        Direction::Upstream => solution.direct_upstream(&owner),
    };
    for id in connected {
        if chosen.len() >= needed {
            break;
        }
        if matches_step(solution, step, &id, data)? {
            chosen.push(id);
        }
    }

    for selector in &step.resources {
        for id in ctx.decode_resource_ids(&selector.selector, data)? {
            if chosen.len() >= needed {
                break;
            }
            if id.name.is_empty() || chosen.contains(&id) {
                continue;
            }
            if !solution.has_resource(&id) {
                eval.add_operational_resource(new_resource(&mut ctx, id.clone(), selector, data)?)?;
            }
            connect(eval, step.direction, &owner, &id)?;
            chosen.push(id);
        }
    }

    if !step.unique && chosen.len() < needed {
        for id in solution.resource_ids() {
            if chosen.len() >= needed {
                break;
            }
            if id == owner || chosen.contains(&id) || !matches_step(solution, step, &id, data)? {
                continue;
            }
            connect(eval, step.direction, &owner, &id)?;
            chosen.push(id);
        }
    }

    while chosen.len() < needed {
        let selector = step
            .resources
            .first()
            .ok_or_else(|| Error::OperationalRule(format!("step for {owner} has no resource selector")))?;
        let kind = ctx.decode_resource_id(&selector.selector, data)?;
        let base = format!("{}-{}", owner.name, kind.kind);
        let mut id = ResourceId::new(kind.provider.clone(), kind.kind.clone(), base.clone());
        let mut suffix = 1;
        while solution.has_resource(&id) || chosen.contains(&id) {
            id.name = format!("{base}-{suffix}");
            suffix += 1;
        }
        debug!(%owner, created = %id, "creating resource for step");
        eval.add_operational_resource(new_resource(&mut ctx, id.clone(), selector, data)?)?;
        connect(eval, step.direction, &owner, &id)?;
        chosen.push(id);
    }
    Ok(chosen)
}

fn new_resource(
    ctx: &mut DynamicContext<'_>,
    id: ResourceId,
    selector: &ResourceSelector,
    data: &DynamicData,
) -> Result<Resource> {
    let mut res = Resource::new(id);
    for (path, value) in &selector.properties {
        let value = ctx.resolve_value(value, data)?;
        res.set_property(path, value)?;
    }
    Ok(res)
}

fn connect(eval: &Evaluator, direction: Direction, owner: &ResourceId, other: &ResourceId) -> Result<()> {
    let edge = match direction {
        Direction::Downstream => SimpleEdge::new(owner.clone(), other.clone()),
        Direction::Upstream => SimpleEdge::new(other.clone(), owner.clone()),
    };
    if eval.solution().has_edge(&edge) {
        return Ok(());
    }
    eval.solution().add_edge(&edge)?;
    eval.make_edges_operational(vec![edge])
}

fn matches_step(solution: &Solution, step: &OperationalStep, id: &ResourceId, data: &DynamicData) -> Result<bool> {
    for selector in &step.resources {
        if selector_matches(solution, selector, id, data)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `id` satisfies `selector`: id fields, classifications and
/// properties.
pub fn selector_matches(
    solution: &Solution,
    selector: &ResourceSelector,
    id: &ResourceId,
    data: &DynamicData,
) -> Result<bool> {
    let mut ctx = DynamicContext::new(solution);
    let pattern = ctx.decode_resource_id(&selector.selector, data)?;
    if !pattern.matches(id) {
        return Ok(false);
    }
    let kb = solution.knowledge_base();
    if !selector.classifications.iter().all(|c| kb.has_classification(id, c)) {
        return Ok(false);
    }
    if selector.properties.is_empty() {
        return Ok(true);
    }
    let Some(res) = solution.resource(id) else { return Ok(false) };
    for (path, want) in &selector.properties {
        let want = ctx.resolve_value(want, data)?;
        if res.get_property(path)? != want {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::knowledge::{KnowledgeBase, PropertyType, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn evaluator() -> Evaluator {
        let kb = KnowledgeBase::new()
            .with_resource(
                ResourceTemplate::new("aws:lambda_function")
                    .with_property(PropertyTemplate::new("Role", "resource(aws:iam_role)".parse().unwrap()))
                    .with_property(PropertyTemplate::new("Timeout", PropertyType::Int)),
            )
            .with_resource(ResourceTemplate::new("aws:iam_role").with_classification("role"))
            .with_resource(ResourceTemplate::new("aws:subnet").with_property(PropertyTemplate::new("Public", PropertyType::Bool)));
        let eval = Evaluator::new(Solution::new(Arc::new(kb)));
        eval.add_operational_resource(Resource::new(id("aws:lambda_function:api"))).unwrap();
        eval
    }

    fn data() -> DynamicData {
        DynamicData::for_resource(id("aws:lambda_function:api"))
    }

    #[test]
    fn test_step_creates_named_resource() {
        let eval = evaluator();
        let step = OperationalStep::new(Direction::Downstream, "aws:iam_role");
        let ids = handle_step(&eval, &step, &data()).unwrap();
        assert_eq!(ids, vec![id("aws:iam_role:api-iam_role")]);
        assert!(eval.solution().has_edge(&SimpleEdge::new(id("aws:lambda_function:api"), id("aws:iam_role:api-iam_role"))));

        // a second run finds the connected role instead of creating another
        assert_eq!(handle_step(&eval, &step, &data()).unwrap(), ids);
        assert_eq!(eval.solution().resource_ids().len(), 2);
    }

    #[test]
    fn test_step_reuses_existing_unless_unique() {
        let eval = evaluator();
        eval.add_operational_resource(Resource::new(id("aws:iam_role:shared"))).unwrap();
        let step = OperationalStep::new(Direction::Downstream, "aws:iam_role");
        assert_eq!(handle_step(&eval, &step, &data()).unwrap(), vec![id("aws:iam_role:shared")]);

        let other = DynamicData::for_resource(id("aws:lambda_function:worker"));
        eval.add_operational_resource(Resource::new(id("aws:lambda_function:worker"))).unwrap();
        let unique = OperationalStep::new(Direction::Downstream, "aws:iam_role").unique();
        assert_eq!(handle_step(&eval, &unique, &other).unwrap(), vec![id("aws:iam_role:worker-iam_role")]);
    }

    #[test]
    fn test_step_name_collision_gets_suffix() {
        let eval = evaluator();
        eval.add_operational_resource(Resource::new(id("aws:subnet:api-subnet"))).unwrap();
        let step = OperationalStep::new(Direction::Upstream, ResourceSelector::from("aws:subnet").with_property("Public", true))
            .num_needed(1);
        let ids = handle_step(&eval, &step, &data()).unwrap();
        assert_eq!(ids, vec![id("aws:subnet:api-subnet-1")]);
        assert_eq!(eval.solution().property(&PropertyRef::new(ids[0].clone(), "Public")).unwrap(), Value::Bool(true));
        assert!(eval.solution().has_edge(&SimpleEdge::new(ids[0].clone(), id("aws:lambda_function:api"))));
    }

    #[test]
    fn test_property_rule_sets_chosen_id() {
        let eval = evaluator();
        let reference = PropertyRef::new(id("aws:lambda_function:api"), "Role");
        let template = eval.solution().knowledge_base().property_template(&reference).unwrap().clone();
        let rule = OperationalRule::default().with_step(OperationalStep::new(Direction::Downstream, "aws:iam_role"));
        handle_property_rule(&eval, &reference, &template, &rule, &data()).unwrap();
        assert_eq!(eval.solution().property(&reference).unwrap(), Value::ResourceId(id("aws:iam_role:api-iam_role")));
    }

    #[test]
    fn test_condition_gates_rule() {
        let eval = evaluator();
        let rule = OperationalRule::default()
            .when(r#"{{ hasField "Timeout" .Self }}"#)
            .with_config(ConfigurationRule::new("", "Timeout", 30));
        handle_operational_rule(&eval, &rule, &data(), ConfigureAction::Set).unwrap();
        let timeout = PropertyRef::new(id("aws:lambda_function:api"), "Timeout");
        assert!(eval.solution().property(&timeout).unwrap().is_null());

        let rule = OperationalRule::default().with_config(ConfigurationRule::new("", "Timeout", 30));
        handle_operational_rule(&eval, &rule, &data(), ConfigureAction::Set).unwrap();
        assert_eq!(eval.solution().property(&timeout).unwrap(), Value::Int(30));
    }

    #[test]
    fn test_selector_classifications() {
        let eval = evaluator();
        let role = ResourceSelector { selector: "aws:iam_role".into(), classifications: vec!["role".into()], ..Default::default() };
        let network = ResourceSelector { classifications: vec!["network".into()], ..role.clone() };
        assert!(selector_matches(eval.solution(), &role, &id("aws:iam_role:r"), &data()).unwrap());
        assert!(!selector_matches(eval.solution(), &network, &id("aws:iam_role:r"), &data()).unwrap());
        assert!(!selector_matches(eval.solution(), &role, &id("aws:subnet:s"), &data()).unwrap());
    }
}
