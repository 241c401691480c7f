//! Template elaborator (component D, §4.D): inputs, node templates
//! (including `copy:`), requirement binding, groups/policies, outputs.

pub mod group_policy;
pub mod input;
pub mod node;
pub mod requirement;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde_yaml::Value as Yaml;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::expr::ValueExpr;
use crate::registry::{parse_node_filter, QualifiedName, TypeKind, TypeRegistry};
use crate::value::Value;

use input::{bind_inputs, InputDef};
use node::{
    ArtifactAssignment, CapabilityAssignment, GroupTemplate, NodeId, NodeTemplate, OutputDef, PolicyTemplate,
    RelationshipId, RelationshipTemplate,
};
use requirement::RequirementAssignment;

/// Everything the elaborator produced, before being wrapped by `Topology`
/// (the public read-only facade, see `crate::topology`).
pub struct ElaboratedTemplate {
    pub inputs: BTreeMap<String, Value>,
    pub node_templates: Vec<NodeTemplate>,
    pub name_index: HashMap<String, NodeId>,
    pub relationship_templates: Vec<RelationshipTemplate>,
    pub groups: Vec<GroupTemplate>,
    pub policies: Vec<PolicyTemplate>,
    pub outputs: BTreeMap<String, OutputDef>,
    pub requirement_graph: petgraph::graph::DiGraph<NodeId, requirement::RequirementEdge>,
}

pub fn elaborate(
    topology_template: &serde_yaml::Mapping,
    registry: &TypeRegistry,
    caller_inputs: &HashMap<String, Value>,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> ElaboratedTemplate {
    let input_defs = topology_template
        .get("inputs")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_input_defs(m, file))
        .unwrap_or_default();
    let inputs = bind_inputs(&input_defs, caller_inputs, diagnostics);

    let mut node_templates = topology_template
        .get("node_templates")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_node_templates(m, file, diagnostics))
        .unwrap_or_default();

    apply_copy(&mut node_templates, diagnostics);
    assign_alias_warnings(&node_templates, registry, diagnostics);

    let name_index: HashMap<String, NodeId> =
        node_templates.iter().map(|n| (n.name.clone(), n.id)).collect();

    validate_node_properties(&node_templates, registry, diagnostics);

    let mut relationship_templates = topology_template
        .get("relationship_templates")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_relationship_templates(m, file))
        .unwrap_or_default();
    let relationship_name_index: HashMap<String, RelationshipId> = relationship_templates
        .iter()
        .map(|r| (r.name.clone(), r.id))
        .collect();

    let requirement_graph = requirement::bind_requirements(
        &mut node_templates,
        &name_index,
        &mut relationship_templates,
        &relationship_name_index,
        registry,
        diagnostics,
    );
    requirement::check_host_cycles(&requirement_graph, &node_templates, diagnostics);

    let groups = topology_template
        .get("groups")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_groups(m, file))
        .unwrap_or_default();
    group_policy::validate_groups(&groups, &name_index, registry, diagnostics);

    let policies = topology_template
        .get("policies")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_policies(m, file))
        .unwrap_or_default();
    group_policy::validate_policies(&policies, &name_index, registry, diagnostics);

    let outputs = topology_template
        .get("outputs")
        .and_then(Yaml::as_mapping)
        .map(|m| parse_outputs(m, file))
        .unwrap_or_default();
    validate_output_references(&outputs, &name_index, file, diagnostics);

    ElaboratedTemplate {
        inputs,
        node_templates,
        name_index,
        relationship_templates,
        groups,
        policies,
        outputs,
        requirement_graph,
    }
}

/// Parse the named, shared `topology_template.relationship_templates:`
/// section (§3 data model). A requirement's bare `relationship: <name>`
/// resolves against this section first, falling back to treating the name
/// as a relationship type if no entry matches (§4.D step 6).
fn parse_relationship_templates(mapping: &serde_yaml::Mapping, file: &str) -> Vec<RelationshipTemplate> {
    let mut out = Vec::new();
    let mut next_id = 0u32;
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let source = SourceLocation::new(file, format!("relationship_templates.{}", name));
        let Some(type_name) = body.get("type").and_then(Yaml::as_str) else {
            continue;
        };
        let mut properties = BTreeMap::new();
        if let Some(props) = body.get("properties").and_then(Yaml::as_mapping) {
            for (k, v) in props {
                if let Some(k) = k.as_str() {
                    properties.insert(k.to_string(), ValueExpr::from_yaml(v));
                }
            }
        }
        out.push(RelationshipTemplate {
            id: RelationshipId(next_id),
            name: name.to_string(),
            type_name: QualifiedName::new(type_name),
            properties,
            source,
        });
        next_id += 1;
    }
    out
}

/// Exposed to `crate::substitution` so it can validate a nested template's
/// declared inputs against an outer `substitution_mappings.properties`
/// correspondence without re-parsing the `inputs:` section a second time.
pub(crate) fn parse_input_defs(mapping: &serde_yaml::Mapping, file: &str) -> BTreeMap<String, InputDef> {
    let mut out = BTreeMap::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let path = format!("inputs.{}", name);
        let source = SourceLocation::new(file, path.clone());
        let type_name = body
            .get("type")
            .and_then(Yaml::as_str)
            .unwrap_or("string");
        let mut def = InputDef::new(name, type_name, source);
        if let Some(required) = body.get("required").and_then(Yaml::as_bool) {
            def.required = required;
        }
        if let Some(default) = body.get("default") {
            if let Ok(v) = crate::value::value_from_yaml(default, type_name) {
                def.default = Some(v);
                def.required = false;
            }
        }
        if let Some(constraints) = body.get("constraints").and_then(Yaml::as_sequence) {
            if let Ok(cs) = crate::scalar::parse_constraints(constraints, type_name) {
                def.constraints = cs;
            }
        }
        out.insert(name.to_string(), def);
    }
    out
}

fn parse_node_templates(
    mapping: &serde_yaml::Mapping,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> Vec<NodeTemplate> {
    let mut out = Vec::new();
    let mut next_id = 0u32;
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let path = format!("node_templates.{}", name);
        let source = SourceLocation::new(file, path.clone());
        match parse_one_node_template(name, body, NodeId(next_id), &source, file) {
            Ok(node) => {
                out.push(node);
                next_id += 1;
            }
            Err(err) => diagnostics.error(err, source),
        }
    }
    out
}

fn parse_one_node_template(
    name: &str,
    body: &Yaml,
    id: NodeId,
    source: &SourceLocation,
    file: &str,
) -> Result<NodeTemplate, DiagnosticKind> {
    let mapping = body.as_mapping().ok_or_else(|| DiagnosticKind::SchemaError {
        message: format!("node template `{}` must be a mapping", name),
    })?;
    let type_name = mapping
        .get("type")
        .and_then(Yaml::as_str)
        .ok_or_else(|| DiagnosticKind::SchemaError {
            message: format!("node template `{}` is missing `type`", name),
        })?;

    let mut properties = BTreeMap::new();
    if let Some(props) = mapping.get("properties").and_then(Yaml::as_mapping) {
        for (k, v) in props {
            if let Some(k) = k.as_str() {
                properties.insert(k.to_string(), ValueExpr::from_yaml(v));
            }
        }
    }

    let mut attributes = BTreeMap::new();
    if let Some(attrs) = mapping.get("attributes").and_then(Yaml::as_mapping) {
        for (k, v) in attrs {
            if let Some(k) = k.as_str() {
                attributes.insert(k.to_string(), ValueExpr::from_yaml(v));
            }
        }
    }

    let mut capabilities = BTreeMap::new();
    if let Some(caps) = mapping.get("capabilities").and_then(Yaml::as_mapping) {
        for (k, v) in caps {
            let Some(k) = k.as_str() else { continue };
            let mut cap_properties = BTreeMap::new();
            if let Some(props) = v.get("properties").and_then(Yaml::as_mapping) {
                for (pk, pv) in props {
                    if let Some(pk) = pk.as_str() {
                        cap_properties.insert(pk.to_string(), ValueExpr::from_yaml(pv));
                    }
                }
            }
            capabilities.insert(
                k.to_string(),
                CapabilityAssignment {
                    name: k.to_string(),
                    properties: cap_properties,
                },
            );
        }
    }

    let mut requirements = Vec::new();
    if let Some(reqs) = mapping.get("requirements").and_then(Yaml::as_sequence) {
        for entry in reqs {
            if let Some(mapping) = entry.as_mapping() {
                if let Some((key, body)) = mapping.iter().next() {
                    if let Some(req_name) = key.as_str() {
                        requirements.push(parse_requirement_assignment(req_name, body, source.clone())?);
                    }
                }
            }
        }
    }

    let mut artifacts = BTreeMap::new();
    if let Some(arts) = mapping.get("artifacts").and_then(Yaml::as_mapping) {
        for (k, v) in arts {
            let Some(k) = k.as_str() else { continue };
            let file_path = match v {
                Yaml::String(s) => s.clone(),
                _ => v.get("file").and_then(Yaml::as_str).unwrap_or_default().to_string(),
            };
            let artifact_type = v
                .get("type")
                .and_then(Yaml::as_str)
                .map(QualifiedName::new);
            artifacts.insert(
                k.to_string(),
                ArtifactAssignment {
                    name: k.to_string(),
                    file: file_path,
                    artifact_type,
                },
            );
        }
    }

    let directives = mapping
        .get("directives")
        .and_then(Yaml::as_sequence)
        .map(|s| s.iter().filter_map(Yaml::as_str).map(String::from).collect())
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    if let Some(meta) = mapping.get("metadata").and_then(Yaml::as_mapping) {
        for (k, v) in meta {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                metadata.insert(k.to_string(), v.to_string());
            }
        }
    }

    let mut node = NodeTemplate {
        id,
        name: name.to_string(),
        type_name: QualifiedName::new(type_name),
        properties,
        attributes,
        capabilities,
        requirements,
        artifacts,
        directives,
        metadata,
        source: source.clone(),
    };

    if let Some(copy_source) = mapping.get("copy").and_then(Yaml::as_str) {
        node.metadata.insert("__copy_from".into(), copy_source.to_string());
    }
    let _ = file;

    Ok(node)
}

fn parse_requirement_assignment(
    name: &str,
    body: &Yaml,
    source: SourceLocation,
) -> Result<RequirementAssignment, DiagnosticKind> {
    let mut assignment = RequirementAssignment::new(name, source.clone());
    match body {
        Yaml::String(target) => {
            assignment.node_name = Some(target.clone());
        }
        Yaml::Mapping(_) => {
            if let Some(node) = body.get("node").and_then(Yaml::as_str) {
                assignment.node_name = Some(node.to_string());
            }
            if let Some(capability) = body.get("capability").and_then(Yaml::as_str) {
                assignment.capability = Some(QualifiedName::new(capability));
            }
            if let Some(relationship) = body.get("relationship") {
                match relationship {
                    // A bare name is ambiguous until bound: it might name an
                    // entry in `relationship_templates:` or a relationship
                    // type (§4.D step 6); the binder disambiguates.
                    Yaml::String(name) => assignment.relationship_ref = Some(name.clone()),
                    Yaml::Mapping(_) => {
                        if let Some(rel_type) = relationship.get("type").and_then(Yaml::as_str) {
                            assignment.relationship = Some(QualifiedName::new(rel_type));
                        }
                        if let Some(props) = relationship.get("properties").and_then(Yaml::as_mapping) {
                            for (k, v) in props {
                                if let Some(k) = k.as_str() {
                                    assignment.relationship_properties.insert(k.to_string(), ValueExpr::from_yaml(v));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            if let Some(filter) = body.get("node_filter") {
                assignment.node_filter = Some(parse_node_filter(filter)?);
            }
        }
        _ => {}
    }
    Ok(assignment)
}

/// Apply `copy: other_node` deep-copy-then-merge (§4.D.2), validating the
/// copy graph is acyclic with the same Kahn's-algorithm shape used for
/// `derived_from` (§4.B).
fn apply_copy(nodes: &mut Vec<NodeTemplate>, diagnostics: &mut DiagnosticSink) {
    let copy_of: HashMap<String, String> = nodes
        .iter()
        .filter_map(|n| n.metadata.get("__copy_from").map(|src| (n.name.clone(), src.clone())))
        .collect();

    if copy_of.is_empty() {
        return;
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for n in nodes.iter() {
        in_degree.entry(&n.name).or_insert(0);
        adjacency.entry(&n.name).or_default();
    }
    for (child, parent) in &copy_of {
        adjacency.entry(parent.as_str()).or_default().push(child.as_str());
        *in_degree.entry(child.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::new();
    while let Some(n) = queue.pop_front() {
        order.push(n.to_string());
        if let Some(neighbors) = adjacency.get(n) {
            for &next in neighbors {
                let deg = in_degree.get_mut(next).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        diagnostics.error(
            DiagnosticKind::TypeCycleError {
                chain: copy_of.keys().cloned().collect(),
            },
            SourceLocation::new("", "node_templates[*].copy"),
        );
        return;
    }

    for name in order {
        let Some(parent_name) = copy_of.get(&name) else { continue };
        let parent_idx = nodes.iter().position(|n| &n.name == parent_name);
        let Some(parent_idx) = parent_idx else {
            diagnostics.error(
                DiagnosticKind::UnknownFieldError {
                    on: name.clone(),
                    field: parent_name.clone(),
                },
                SourceLocation::new("", format!("node_templates.{}.copy", name)),
            );
            continue;
        };
        let parent_snapshot = nodes[parent_idx].clone();
        let child_idx = nodes.iter().position(|n| n.name == name).unwrap();

        let mut merged = parent_snapshot;
        merged.id = nodes[child_idx].id;
        merged.name = nodes[child_idx].name.clone();
        merged.source = nodes[child_idx].source.clone();
        for (k, v) in nodes[child_idx].properties.clone() {
            merged.properties.insert(k, v);
        }
        for (k, v) in nodes[child_idx].attributes.clone() {
            merged.attributes.insert(k, v);
        }
        for (k, v) in nodes[child_idx].capabilities.clone() {
            merged.capabilities.insert(k, v);
        }
        if !nodes[child_idx].requirements.is_empty() {
            merged.requirements = nodes[child_idx].requirements.clone();
        }
        merged.metadata.remove("__copy_from");
        nodes[child_idx] = merged;
    }
}

/// End-to-end scenario 6: a node declared with a deprecated alias type
/// (`metadata.alias: true` in the normative seed) emits a `deprecated`-
/// tagged warning but otherwise resolves identically to the canonical type.
fn assign_alias_warnings(nodes: &[NodeTemplate], registry: &TypeRegistry, diagnostics: &mut DiagnosticSink) {
    for node in nodes {
        if registry.is_alias(TypeKind::Node, &node.type_name) {
            diagnostics.push(
                crate::diagnostics::Diagnostic::warning(
                    DiagnosticKind::SchemaError {
                        message: format!(
                            "node `{}` uses deprecated type name `{}`",
                            node.name, node.type_name
                        ),
                    },
                    node.source.clone(),
                )
                .tagged("deprecated"),
            );
        }
    }
}

fn validate_node_properties(nodes: &[NodeTemplate], registry: &TypeRegistry, diagnostics: &mut DiagnosticSink) {
    for node in nodes {
        let Ok(flattened) = registry.flattened(TypeKind::Node, &node.type_name) else {
            diagnostics.error(
                DiagnosticKind::UnknownTypeError {
                    name: node.type_name.to_string(),
                },
                node.source.clone(),
            );
            continue;
        };

        for (key, _) in &node.properties {
            if flattened.property(key).is_none() {
                diagnostics.error(
                    DiagnosticKind::UnknownFieldError {
                        on: node.name.clone(),
                        field: key.clone(),
                    },
                    node.source.clone(),
                );
            }
        }

        for (name, def) in &flattened.properties {
            if def.required && def.default.is_none() && !node.properties.contains_key(name) {
                diagnostics.error(
                    DiagnosticKind::MissingRequiredFieldError {
                        on: node.name.clone(),
                        field: name.clone(),
                    },
                    node.source.clone(),
                );
            }
        }

        for (name, expr) in &node.properties {
            if !expr.is_fully_literal() {
                continue;
            }
            let Some(def) = flattened.property(name) else { continue };
            let value = expr.as_literal_value();
            for constraint in &def.constraints {
                if let Err(kind) = constraint.check(&value) {
                    diagnostics.error(kind, node.source.clone());
                }
            }
        }
    }
}

fn parse_groups(mapping: &serde_yaml::Mapping, file: &str) -> Vec<GroupTemplate> {
    let mut out = Vec::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let source = SourceLocation::new(file, format!("groups.{}", name));
        let type_name = body.get("type").and_then(Yaml::as_str).unwrap_or("tosca.groups.Root");
        let members = body
            .get("members")
            .and_then(Yaml::as_sequence)
            .map(|s| s.iter().filter_map(Yaml::as_str).map(String::from).collect())
            .unwrap_or_default();
        let mut properties = BTreeMap::new();
        if let Some(props) = body.get("properties").and_then(Yaml::as_mapping) {
            for (k, v) in props {
                if let Some(k) = k.as_str() {
                    properties.insert(k.to_string(), ValueExpr::from_yaml(v));
                }
            }
        }
        out.push(GroupTemplate {
            name: name.to_string(),
            type_name: QualifiedName::new(type_name),
            members,
            properties,
            source,
        });
    }
    out
}

fn parse_policies(mapping: &serde_yaml::Mapping, file: &str) -> Vec<PolicyTemplate> {
    let mut out = Vec::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let source = SourceLocation::new(file, format!("policies.{}", name));
        let type_name = body.get("type").and_then(Yaml::as_str).unwrap_or("tosca.policies.Root");
        let targets = body
            .get("targets")
            .and_then(Yaml::as_sequence)
            .map(|s| s.iter().filter_map(Yaml::as_str).map(String::from).collect())
            .unwrap_or_default();
        let mut properties = BTreeMap::new();
        if let Some(props) = body.get("properties").and_then(Yaml::as_mapping) {
            for (k, v) in props {
                if let Some(k) = k.as_str() {
                    properties.insert(k.to_string(), ValueExpr::from_yaml(v));
                }
            }
        }
        out.push(PolicyTemplate {
            name: name.to_string(),
            type_name: QualifiedName::new(type_name),
            targets,
            properties,
            source,
        });
    }
    out
}

fn parse_outputs(mapping: &serde_yaml::Mapping, file: &str) -> BTreeMap<String, OutputDef> {
    let mut out = BTreeMap::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let source = SourceLocation::new(file, format!("outputs.{}", name));
        let value_yaml = body.get("value").cloned().unwrap_or(Yaml::Null);
        out.insert(
            name.to_string(),
            OutputDef {
                name: name.to_string(),
                value: ValueExpr::from_yaml(&value_yaml),
                source,
            },
        );
    }
    out
}

fn validate_output_references(
    outputs: &BTreeMap<String, OutputDef>,
    name_index: &HashMap<String, NodeId>,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) {
    let reserved: HashSet<&str> = ["SELF", "HOST", "SOURCE", "TARGET"].into_iter().collect();
    for (name, output) in outputs {
        for entity in output.value.referenced_entities() {
            if reserved.contains(entity.as_str()) || name_index.contains_key(&entity) {
                continue;
            }
            diagnostics.error(
                DiagnosticKind::UnknownFieldError {
                    on: format!("outputs.{}", name),
                    field: entity,
                },
                SourceLocation::new(file, format!("outputs.{}", name)),
            );
        }
    }
}
