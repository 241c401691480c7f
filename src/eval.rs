//! Function evaluator (component E, §4.E): lazy resolution of intrinsic
//! function trees against an elaborated, frozen `Topology`.
//!
//! Generalizes the teacher's `executor::engine::{eval_expression,
//! EvalContext}` — a recursive tagged-dispatch evaluator over an expression
//! tree plus a context of bound values — from Terraform's function set to
//! TOSCA's seven intrinsic functions (§4.E.1). Where the teacher's
//! `EvalContext` holds a `DashMap` of resource states populated incrementally
//! during apply, `runtime_attributes` here is never written by this crate —
//! executing interface operations is a Non-goal (§1) — it is only ever
//! consulted, falling back to `Value::Unknown` exactly like the teacher's
//! plan-time placeholder for not-yet-known attributes.

use dashmap::DashMap;
use tracing::debug_span;

use crate::diagnostics::DiagnosticKind;
use crate::expr::ValueExpr;
use crate::registry::{QualifiedName, TypeKind};
use crate::template::node::NodeId;
use crate::topology::Topology;
use crate::value::Value;

/// Evaluation context threaded through a single `eval` call: which node
/// `SELF` refers to, which nodes (if any) `SOURCE`/`TARGET` refer to when
/// evaluating inside a relationship, and an optional read-only view onto
/// attribute values an embedder tracks outside this crate (§4.E.1).
pub struct EvalContext<'a> {
    pub self_node: Option<NodeId>,
    pub source_node: Option<NodeId>,
    pub target_node: Option<NodeId>,
    pub runtime_attributes: Option<&'a DashMap<(NodeId, String), Value>>,
}

impl<'a> EvalContext<'a> {
    pub fn for_node(self_node: NodeId) -> Self {
        EvalContext {
            self_node: Some(self_node),
            source_node: None,
            target_node: None,
            runtime_attributes: None,
        }
    }

    pub fn with_runtime_attributes(mut self, map: &'a DashMap<(NodeId, String), Value>) -> Self {
        self.runtime_attributes = Some(map);
        self
    }
}

/// Evaluate `expr` against `topology`, recursively resolving any nested
/// intrinsic functions. The function DAG is acyclic by construction
/// (§8 invariant 6, §4.E.2): path resolution only ever walks the already-
/// resolved requirement graph built in §4.D.1, it never re-enters the
/// evaluator on the same node/path pair.
pub fn eval(expr: &ValueExpr, topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    let _span = debug_span!("eval", expr = ?expr).entered();
    match expr {
        ValueExpr::Literal(v) => Ok(v.clone()),
        ValueExpr::Reference(path) => {
            let self_node = ctx.self_node.ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
                message: "bare reference evaluated outside of a node context".into(),
            })?;
            resolve_property_path(topology, self_node, path, false, ctx)
        }
        ValueExpr::List(items) => {
            let values: Result<Vec<Value>, DiagnosticKind> = items.iter().map(|i| eval(i, topology, ctx)).collect();
            Ok(Value::List(values?))
        }
        ValueExpr::Map(entries) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in entries {
                out.insert(k.clone(), eval(v, topology, ctx)?);
            }
            Ok(Value::Map(out))
        }
        ValueExpr::FunctionCall { name, args } => eval_call(name, args, topology, ctx),
    }
}

fn eval_call(name: &str, args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    match name {
        "get_input" => eval_get_input(args, topology, ctx),
        "get_property" => eval_get_property_or_attribute(args, topology, ctx, false),
        "get_attribute" => eval_get_property_or_attribute(args, topology, ctx, true),
        "get_operation_output" => eval_get_operation_output(args, topology, ctx),
        "get_artifact" => eval_get_artifact(args, topology, ctx),
        "concat" => eval_concat(args, topology, ctx),
        "token" => eval_token(args, topology, ctx),
        other => Err(DiagnosticKind::UnknownFunctionError { name: other.to_string() }),
    }
}

fn eval_get_input(args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    let name = arg_as_str(args, 0, topology, ctx)?;
    topology
        .inputs()
        .get(&name)
        .cloned()
        .ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
            message: format!("get_input: no bound value for input `{}`", name),
        })
}

/// Shared implementation for `get_property`/`get_attribute` (§4.E): both
/// take `[entity, prop_path...]` and differ only in whether the terminal
/// lookup prefers a node's `attributes` map (and tolerates an absent value
/// by degrading to `Unknown`) or its `properties` map (which is a hard
/// error when absent).
fn eval_get_property_or_attribute(
    args: &[ValueExpr],
    topology: &Topology,
    ctx: &EvalContext,
    is_attribute: bool,
) -> Result<Value, DiagnosticKind> {
    if args.is_empty() {
        return Err(DiagnosticKind::FunctionEvaluationError {
            message: "get_property/get_attribute requires at least an entity argument".into(),
        });
    }
    let entity = arg_as_str(&args[0..1], 0, topology, ctx)?;
    let path: Vec<String> = args[1..]
        .iter()
        .map(|a| eval(a, topology, ctx).and_then(|v| {
            v.as_str().map(str::to_string).ok_or_else(|| DiagnosticKind::TypeMismatchError {
                message: "get_property/get_attribute path segments must be strings".into(),
            })
        }))
        .collect::<Result<_, _>>()?;

    let start = resolve_entity(&entity, topology, ctx)?;

    if is_attribute {
        if let Some(first) = path.first() {
            if path.len() == 1 {
                if let Some(map) = ctx.runtime_attributes {
                    if let Some(v) = map.get(&(start, first.clone())) {
                        return Ok(v.clone());
                    }
                }
                let node = topology.node_by_id(start);
                if let Some(expr) = node.attribute(first) {
                    return eval(expr, topology, ctx);
                }
                return Ok(Value::Unknown);
            }
        }
        match resolve_property_path(topology, start, &path, true, ctx) {
            Ok(v) => Ok(v),
            Err(_) => Ok(Value::Unknown),
        }
    } else {
        resolve_property_path(topology, start, &path, false, ctx)
    }
}

/// Resolve a `get_property`/`get_attribute` entity keyword to a concrete
/// `NodeId` (§4.E): `SELF`/`SOURCE`/`TARGET` come straight from `ctx`; `HOST`
/// walks the `host` requirement chain (or the first `HostedOn`-typed
/// requirement) until it reaches a `tosca.nodes.Compute`-derived node, or the
/// chain's end; anything else is looked up as a declared node template name.
fn resolve_entity(entity: &str, topology: &Topology, ctx: &EvalContext) -> Result<NodeId, DiagnosticKind> {
    match entity {
        "SELF" => ctx.self_node.ok_or_else(|| unknown_entity("SELF")),
        "SOURCE" => ctx.source_node.ok_or_else(|| unknown_entity("SOURCE")),
        "TARGET" => ctx.target_node.ok_or_else(|| unknown_entity("TARGET")),
        "HOST" => {
            let start = ctx.self_node.ok_or_else(|| unknown_entity("HOST"))?;
            Ok(resolve_host(topology, start))
        }
        name => {
            let node = topology.node(name).ok_or_else(|| unknown_entity(name))?;
            Ok(node.id)
        }
    }
}

fn unknown_entity(name: &str) -> DiagnosticKind {
    DiagnosticKind::FunctionEvaluationError {
        message: format!("unknown entity `{}`", name),
    }
}

/// Walk the `host`/`HostedOn` chain starting at `start` until a node whose
/// type derives from `tosca.nodes.Compute` is found, or no further hop
/// exists (§4.E `HOST`). Bounded by `node_templates().len()` hops: a
/// `HostedOn` cycle is rejected at elaboration time (§4.D.1, §8 invariant 6),
/// so this always terminates.
fn resolve_host(topology: &Topology, start: NodeId) -> NodeId {
    let compute = QualifiedName::new("tosca.nodes.Compute");
    let mut current = start;
    for _ in 0..topology.node_templates().len() {
        let node = topology.node_by_id(current);
        if topology.registry().derives_from(TypeKind::Node, &node.type_name, &compute) {
            return current;
        }
        let next = node
            .requirements
            .iter()
            .find(|r| r.name == "host" || r.resolved_relationship_type.as_ref().map(|t| t.as_str()) == Some("tosca.relationships.HostedOn"))
            .and_then(|r| r.resolved_target);
        match next {
            Some(target) => current = target,
            None => return current,
        }
    }
    current
}

/// Walk `path` from `start`, hopping through resolved requirement targets
/// when a segment names a requirement, through capability properties when a
/// segment names a capability immediately followed by a property name, and
/// otherwise terminating in a (possibly nested) property lookup on the
/// current node (§4.E `get_property`/`get_attribute` path semantics;
/// end-to-end scenario 4's `[SELF, host, host, num_cpus]` is exactly two
/// requirement-name hops followed by a property lookup).
fn resolve_property_path(
    topology: &Topology,
    start: NodeId,
    path: &[String],
    is_attribute: bool,
    ctx: &EvalContext,
) -> Result<Value, DiagnosticKind> {
    let mut current = start;
    let mut i = 0;
    while i < path.len() {
        let seg = &path[i];
        let node = topology.node_by_id(current);

        if let Some(req) = node.requirements.iter().find(|r| &r.name == seg) {
            if let Some(target) = req.resolved_target {
                current = target;
                i += 1;
                continue;
            }
        }

        if i + 1 < path.len() {
            if let Some(cap) = node.capabilities.get(seg) {
                let prop_name = &path[i + 1];
                let expr = cap.properties.get(prop_name).ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
                    message: format!("capability `{}` on `{}` has no property `{}`", seg, node.name, prop_name),
                })?;
                let value = eval(expr, topology, ctx)?;
                return walk_nested(&value, &path[i + 2..]);
            }
        }

        let source = if is_attribute { node.attribute(seg) } else { node.property(seg) };
        let expr = source.ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
            message: format!("`{}` has no {} `{}`", node.name, if is_attribute { "attribute" } else { "property" }, seg),
        })?;
        let value = eval(expr, topology, ctx)?;
        return walk_nested(&value, &path[i + 1..]);
    }
    Err(DiagnosticKind::FunctionEvaluationError {
        message: "get_property/get_attribute path resolved to an entity, not a value".into(),
    })
}

/// Drill into nested map keys once the path has reached an actual value
/// (§4.E: "nested keys into maps or data-types").
fn walk_nested(value: &Value, remaining: &[String]) -> Result<Value, DiagnosticKind> {
    let mut current = value.clone();
    for key in remaining {
        let map = current.as_map().ok_or_else(|| DiagnosticKind::TypeMismatchError {
            message: format!("cannot index `{}` into non-map value `{}`", key, current),
        })?;
        current = map
            .get(key)
            .cloned()
            .ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
                message: format!("no such key `{}`", key),
            })?;
    }
    Ok(current)
}

/// `get_operation_output: [node, interface, operation, output]` (§4.E):
/// validates the reference resolves to a declared operation output and
/// returns the static placeholder `Unknown` value for it, since the actual
/// value only exists once the operation has executed (a Non-goal, §1).
fn eval_get_operation_output(args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    if args.len() != 4 {
        return Err(DiagnosticKind::FunctionEvaluationError {
            message: "get_operation_output requires [node, interface, operation, output]".into(),
        });
    }
    let entity = arg_as_str(args, 0, topology, ctx)?;
    let interface = arg_as_str(args, 1, topology, ctx)?;
    let operation = arg_as_str(args, 2, topology, ctx)?;
    let output = arg_as_str(args, 3, topology, ctx)?;

    let node_id = resolve_entity(&entity, topology, ctx)?;
    let node = topology.node_by_id(node_id);
    let flattened = topology
        .flattened_type(node)
        .ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
            message: format!("cannot flatten type `{}`", node.type_name),
        })?;
    let iface = flattened.interfaces.get(&interface).ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
        message: format!("`{}` declares no interface `{}`", node.name, interface),
    })?;
    let op = iface.operations.get(&operation).ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
        message: format!("interface `{}` on `{}` declares no operation `{}`", interface, node.name, operation),
    })?;
    if !op.outputs.contains_key(&output) && !op.outputs.is_empty() {
        return Err(DiagnosticKind::FunctionEvaluationError {
            message: format!("operation `{}` declares no output `{}`", operation, output),
        });
    }
    Ok(Value::Unknown)
}

/// `get_artifact: [entity, artifact_name, location?, remove?]` (§4.E):
/// resolves to the artifact's declared file URI. `location`/`remove` affect
/// how an orchestrator stages the artifact at execution time, which is a
/// Non-goal here (§1) — they are accepted and ignored.
fn eval_get_artifact(args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    if args.len() < 2 {
        return Err(DiagnosticKind::FunctionEvaluationError {
            message: "get_artifact requires at least [entity, artifact_name]".into(),
        });
    }
    let entity = arg_as_str(args, 0, topology, ctx)?;
    let artifact_name = arg_as_str(args, 1, topology, ctx)?;
    let node_id = resolve_entity(&entity, topology, ctx)?;
    let node = topology.node_by_id(node_id);
    let artifact = node.artifacts.get(&artifact_name).ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
        message: format!("`{}` declares no artifact `{}`", node.name, artifact_name),
    })?;
    Ok(Value::String(artifact.file.clone()))
}

/// `concat: [...]` (§4.E): recursively evaluates every argument and joins
/// their canonical `Display` form; non-string operands are stringified via
/// the same `Display` impl used for diagnostics and canonical re-emission.
fn eval_concat(args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    let mut out = String::new();
    for arg in args {
        let value = eval(arg, topology, ctx)?;
        out.push_str(&value.to_string());
    }
    Ok(Value::String(out))
}

/// `token: [str, sep, index]` (§4.E): splits `str` on every character in
/// `sep` and returns the `index`-th element; out of range is a
/// `FunctionEvaluationError`.
fn eval_token(args: &[ValueExpr], topology: &Topology, ctx: &EvalContext) -> Result<Value, DiagnosticKind> {
    if args.len() != 3 {
        return Err(DiagnosticKind::FunctionEvaluationError {
            message: "token requires [str, sep, index]".into(),
        });
    }
    let text = eval(&args[0], topology, ctx)?;
    let text = text.as_str().ok_or_else(|| DiagnosticKind::TypeMismatchError {
        message: "token: first argument must be a string".into(),
    })?;
    let sep = eval(&args[1], topology, ctx)?;
    let sep = sep.as_str().ok_or_else(|| DiagnosticKind::TypeMismatchError {
        message: "token: separator must be a string".into(),
    })?;
    let index = eval(&args[2], topology, ctx)?;
    let index = index.as_i64().ok_or_else(|| DiagnosticKind::TypeMismatchError {
        message: "token: index must be an integer".into(),
    })?;

    let parts: Vec<&str> = if sep.is_empty() {
        vec![text]
    } else {
        text.split(|c| sep.contains(c)).collect()
    };
    let idx = usize::try_from(index).map_err(|_| DiagnosticKind::FunctionEvaluationError {
        message: format!("token: index {} out of range (0..{})", index, parts.len()),
    })?;
    parts
        .get(idx)
        .map(|s| Value::String(s.to_string()))
        .ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
            message: format!("token: index {} out of range (0..{})", idx, parts.len()),
        })
}

fn arg_as_str(args: &[ValueExpr], index: usize, topology: &Topology, ctx: &EvalContext) -> Result<String, DiagnosticKind> {
    let value = eval(
        args.get(index).ok_or_else(|| DiagnosticKind::FunctionEvaluationError {
            message: format!("missing argument at position {}", index),
        })?,
        topology,
        ctx,
    )?;
    value.as_str().map(str::to_string).ok_or_else(|| DiagnosticKind::TypeMismatchError {
        message: "expected a string argument".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_service_template, EngineOptions};
    use crate::import::{ImportBase, MapLoader};
    use std::collections::HashMap;

    fn topology_for(yaml: &str, inputs: HashMap<String, Value>) -> Topology {
        let root: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let loader = MapLoader::new();
        let (topology, diagnostics) =
            parse_service_template(root, ImportBase::new(""), &loader, inputs, EngineOptions::default());
        assert!(!diagnostics.iter().any(crate::diagnostics::Diagnostic::is_error), "{:?}", diagnostics);
        topology.unwrap()
    }

    #[test]
    fn get_property_host_chain_walks_two_hops() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    compute:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 4
    dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host: compute
    db:
      type: tosca.nodes.Database
      requirements:
        - host: dbms
"#;
        let topology = topology_for(yaml, HashMap::new());
        let db = topology.node("db").unwrap();
        let expr = ValueExpr::call(
            "get_property",
            vec![
                ValueExpr::literal(Value::String("SELF".into())),
                ValueExpr::literal(Value::String("host".into())),
                ValueExpr::literal(Value::String("host".into())),
                ValueExpr::literal(Value::String("num_cpus".into())),
            ],
        );
        let ctx = EvalContext::for_node(db.id);
        let value = eval(&expr, &topology, &ctx).unwrap();
        assert_eq!(value, Value::Int(4));
    }

    #[test]
    fn token_splits_and_indexes() {
        let yaml = "tosca_definitions_version: tosca_simple_yaml_1_3\n";
        let topology = topology_for(yaml, HashMap::new());
        let expr = ValueExpr::call(
            "token",
            vec![
                ValueExpr::literal(Value::String("a,b,c".into())),
                ValueExpr::literal(Value::String(",".into())),
                ValueExpr::literal(Value::Int(1)),
            ],
        );
        let ctx = EvalContext { self_node: None, source_node: None, target_node: None, runtime_attributes: None };
        assert_eq!(eval(&expr, &topology, &ctx).unwrap(), Value::String("b".into()));
    }

    #[test]
    fn token_out_of_range_is_an_error() {
        let yaml = "tosca_definitions_version: tosca_simple_yaml_1_3\n";
        let topology = topology_for(yaml, HashMap::new());
        let expr = ValueExpr::call(
            "token",
            vec![
                ValueExpr::literal(Value::String("a,b".into())),
                ValueExpr::literal(Value::String(",".into())),
                ValueExpr::literal(Value::Int(5)),
            ],
        );
        let ctx = EvalContext { self_node: None, source_node: None, target_node: None, runtime_attributes: None };
        assert!(matches!(eval(&expr, &topology, &ctx), Err(DiagnosticKind::FunctionEvaluationError { .. })));
    }

    #[test]
    fn concat_stringifies_non_string_operands() {
        let yaml = "tosca_definitions_version: tosca_simple_yaml_1_3\n";
        let topology = topology_for(yaml, HashMap::new());
        let expr = ValueExpr::call(
            "concat",
            vec![
                ValueExpr::literal(Value::String("n=".into())),
                ValueExpr::literal(Value::Int(4)),
            ],
        );
        let ctx = EvalContext { self_node: None, source_node: None, target_node: None, runtime_attributes: None };
        assert_eq!(eval(&expr, &topology, &ctx).unwrap(), Value::String("n=4".into()));
    }

    #[test]
    fn get_input_reads_bound_value() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  inputs:
    cpus:
      type: integer
      default: 2
"#;
        let topology = topology_for(yaml, HashMap::new());
        let expr = ValueExpr::call("get_input", vec![ValueExpr::literal(Value::String("cpus".into()))]);
        let ctx = EvalContext { self_node: None, source_node: None, target_node: None, runtime_attributes: None };
        assert_eq!(eval(&expr, &topology, &ctx).unwrap(), Value::Int(2));
    }
}
