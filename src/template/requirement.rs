//! Requirement binding (§4.D "Requirement binding"): the eight-step
//! algorithm that turns a raw `RequirementAssignment` into a resolved
//! target, plus the `petgraph` artifact built over the result (§4.D.1).

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::DiGraph;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::expr::ValueExpr;
use crate::registry::{NodeFilter, NodeFilterMatcher, QualifiedName, TypeKind, TypeRegistry};
use crate::scalar::parse_constraints;

use super::node::{NodeId, NodeTemplate, RelationshipId, RelationshipTemplate};

/// One `requirements:` list entry as written on a node template, before
/// binding. Order within a node's `requirements` list is preserved exactly
/// as declared — position is semantically significant (§3).
#[derive(Debug, Clone)]
pub struct RequirementAssignment {
    pub name: String,
    /// Explicit literal target, `requirements: [{ name: other_node }]`.
    pub node_name: Option<String>,
    /// Capability type to search for when no explicit node is given.
    pub capability: Option<QualifiedName>,
    /// Inline relationship type, from `relationship: { type: ..., properties: ... }`.
    pub relationship: Option<QualifiedName>,
    /// Bare `relationship: <name>` — ambiguous between a name in
    /// `relationship_templates:` and a relationship type name until resolved
    /// against that section at binding time (§4.D step 6).
    pub relationship_ref: Option<String>,
    /// Inline `relationship: { properties: ... }` (only meaningful alongside
    /// `relationship`, the inline `type:`).
    pub relationship_properties: BTreeMap<String, ValueExpr>,
    pub node_filter: Option<NodeFilter>,
    pub source: SourceLocation,

    pub resolved_target: Option<NodeId>,
    pub resolved_capability: Option<String>,
    pub resolved_relationship_type: Option<QualifiedName>,
    /// The concrete `RelationshipTemplate` instantiated for this assignment
    /// (§3 `RequirementAssignment.relationship`) — named, inline, or a
    /// property-less default, always instantiated once the requirement
    /// resolves (§4.D step 6).
    pub resolved_relationship_id: Option<RelationshipId>,
}

impl RequirementAssignment {
    pub fn new(name: impl Into<String>, source: SourceLocation) -> Self {
        RequirementAssignment {
            name: name.into(),
            node_name: None,
            capability: None,
            relationship: None,
            relationship_ref: None,
            relationship_properties: BTreeMap::new(),
            node_filter: None,
            source,
            resolved_target: None,
            resolved_capability: None,
            resolved_relationship_type: None,
            resolved_relationship_id: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_target.is_some()
    }
}

/// Edge label in the requirement graph (§4.D.1), mirroring the teacher's
/// `DependencyEdge::Explicit` — every edge here was discovered by an
/// explicit (or node-filter-matched) requirement assignment rather than
/// inferred from a textual reference, so there is only the one variant.
#[derive(Debug, Clone)]
pub struct RequirementEdge {
    pub requirement_name: String,
    pub relationship_type: QualifiedName,
}

/// Bind every requirement assignment on every node, in node-declaration
/// order, then in per-node assignment-declaration order. Returns the
/// derived `petgraph` artifact for cycle/ordering queries (§4.D.1); it is
/// never consulted as a source of truth by this function itself.
pub fn bind_requirements(
    nodes: &mut [NodeTemplate],
    name_index: &HashMap<String, NodeId>,
    relationship_templates: &mut Vec<RelationshipTemplate>,
    relationship_name_index: &HashMap<String, RelationshipId>,
    registry: &TypeRegistry,
    diagnostics: &mut DiagnosticSink,
) -> DiGraph<NodeId, RequirementEdge> {
    let declaration_order: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();

    for idx in 0..nodes.len() {
        let node_id = nodes[idx].id;
        let node_type = nodes[idx].type_name.clone();
        let flattened = match registry.flattened(TypeKind::Node, &node_type) {
            Ok(v) => v,
            Err(kind) => {
                diagnostics.error(kind, nodes[idx].source.clone());
                continue;
            }
        };

        let assignment_count = nodes[idx].requirements.len();
        for a in 0..assignment_count {
            let (slot_capability, slot_relationship, slot_node_type) = {
                let assignment = &nodes[idx].requirements[a];
                match flattened.requirement(&assignment.name) {
                    Some(def) => (
                        assignment.capability.clone().unwrap_or_else(|| def.capability.clone()),
                        assignment.relationship.clone().or_else(|| def.relationship.clone()),
                        def.node.clone(),
                    ),
                    None => (
                        assignment
                            .capability
                            .clone()
                            .unwrap_or_else(|| QualifiedName::new("tosca.capabilities.Node")),
                        assignment.relationship.clone(),
                        None,
                    ),
                }
            };

            let target = resolve_target(
                nodes,
                &declaration_order,
                name_index,
                node_id,
                idx,
                a,
                &slot_capability,
                slot_node_type.as_ref(),
                registry,
                diagnostics,
            );

            let Some((target_id, target_idx)) = target else {
                continue;
            };

            let target_capability = {
                let target_node = &nodes[target_idx];
                find_capability(registry, target_node, &slot_capability)
            };

            let Some(capability_name) = target_capability else {
                let assignment = &nodes[idx].requirements[a];
                diagnostics.error(
                    DiagnosticKind::NoMatchError {
                        node: nodes[idx].name.clone(),
                        requirement: assignment.name.clone(),
                    },
                    assignment.source.clone(),
                );
                continue;
            };

            if let Err(kind) = check_valid_source_types(registry, &nodes[target_idx], &capability_name, &node_type) {
                diagnostics.error(kind, nodes[idx].requirements[a].source.clone());
                continue;
            }

            let relationship_id = instantiate_relationship(
                &nodes[idx].requirements[a],
                &nodes[idx].name,
                a,
                slot_relationship.clone(),
                relationship_templates,
                relationship_name_index,
            );
            let relationship_type = relationship_templates[relationship_id.0 as usize].type_name.clone();

            let assignment = &mut nodes[idx].requirements[a];
            assignment.resolved_target = Some(target_id);
            assignment.resolved_capability = Some(capability_name);
            assignment.resolved_relationship_type = Some(relationship_type);
            assignment.resolved_relationship_id = Some(relationship_id);
        }

        check_occurrences(&nodes[idx], &flattened, diagnostics);
    }

    build_graph(nodes)
}

#[allow(clippy::too_many_arguments)]
fn resolve_target(
    nodes: &[NodeTemplate],
    declaration_order: &[NodeId],
    name_index: &HashMap<String, NodeId>,
    source_node: NodeId,
    source_idx: usize,
    assignment_idx: usize,
    required_capability: &QualifiedName,
    node_type_constraint: Option<&QualifiedName>,
    registry: &TypeRegistry,
    diagnostics: &mut DiagnosticSink,
) -> Option<(NodeId, usize)> {
    let assignment = &nodes[source_idx].requirements[assignment_idx];

    if let Some(explicit_name) = &assignment.node_name {
        let Some(&target_id) = name_index.get(explicit_name) else {
            diagnostics.error(
                DiagnosticKind::UnknownFieldError {
                    on: nodes[source_idx].name.clone(),
                    field: explicit_name.clone(),
                },
                assignment.source.clone(),
            );
            return None;
        };
        let target_idx = index_of(nodes, target_id);
        if let Some(constraint) = node_type_constraint {
            if !registry.derives_from(TypeKind::Node, &nodes[target_idx].type_name, constraint) {
                diagnostics.error(
                    DiagnosticKind::IncompatibleDerivationError {
                        child: nodes[target_idx].type_name.to_string(),
                        parent: constraint.to_string(),
                        message: format!(
                            "requirement `{}` target `{}` does not derive from `{}`",
                            assignment.name, explicit_name, constraint
                        ),
                    },
                    assignment.source.clone(),
                );
                return None;
            }
        }
        return Some((target_id, target_idx));
    }

    if let Some(filter) = &assignment.node_filter {
        for &candidate_id in declaration_order {
            if candidate_id == source_node {
                continue;
            }
            let candidate_idx = index_of(nodes, candidate_id);
            if matches_filter(registry, &nodes[candidate_idx], filter) {
                return Some((candidate_id, candidate_idx));
            }
        }
        diagnostics.error(
            DiagnosticKind::NoMatchError {
                node: nodes[source_idx].name.clone(),
                requirement: assignment.name.clone(),
            },
            assignment.source.clone(),
        );
        return None;
    }

    // Search by capability type (§4.D step 3).
    let mut candidates = Vec::new();
    for &candidate_id in declaration_order {
        if candidate_id == source_node {
            continue;
        }
        let candidate_idx = index_of(nodes, candidate_id);
        if find_capability(registry, &nodes[candidate_idx], required_capability).is_some() {
            candidates.push((candidate_id, candidate_idx));
        }
    }

    match candidates.len() {
        0 => {
            diagnostics.error(
                DiagnosticKind::NoMatchError {
                    node: nodes[source_idx].name.clone(),
                    requirement: assignment.name.clone(),
                },
                assignment.source.clone(),
            );
            None
        }
        1 => Some(candidates[0]),
        _ => {
            diagnostics.error(
                DiagnosticKind::AmbiguousTargetError {
                    node: nodes[source_idx].name.clone(),
                    requirement: assignment.name.clone(),
                    candidates: candidates.iter().map(|(_, i)| nodes[*i].name.clone()).collect(),
                },
                assignment.source.clone(),
            );
            None
        }
    }
}

/// Instantiate the concrete `RelationshipTemplate` a resolved requirement
/// points at (§4.D step 6: "inline-defined, referenced by name, or default
/// to the slot's relationship type"). A named reference reuses the shared
/// instance from `relationship_templates:`; everything else synthesizes a
/// fresh, single-use instance.
fn instantiate_relationship(
    assignment: &RequirementAssignment,
    node_name: &str,
    req_index: usize,
    slot_relationship: Option<QualifiedName>,
    relationship_templates: &mut Vec<RelationshipTemplate>,
    relationship_name_index: &HashMap<String, RelationshipId>,
) -> RelationshipId {
    let default_type =
        || slot_relationship.clone().unwrap_or_else(|| QualifiedName::new("tosca.relationships.Root"));

    if assignment.relationship.is_some() || !assignment.relationship_properties.is_empty() {
        let type_name = assignment.relationship.clone().unwrap_or_else(default_type);
        return push_relationship(
            relationship_templates,
            synthetic_relationship_name(node_name, &assignment.name, req_index),
            type_name,
            assignment.relationship_properties.clone(),
        );
    }

    if let Some(name) = &assignment.relationship_ref {
        if let Some(&id) = relationship_name_index.get(name) {
            return id;
        }
        return push_relationship(
            relationship_templates,
            synthetic_relationship_name(node_name, &assignment.name, req_index),
            QualifiedName::new(name.clone()),
            BTreeMap::new(),
        );
    }

    push_relationship(
        relationship_templates,
        synthetic_relationship_name(node_name, &assignment.name, req_index),
        default_type(),
        BTreeMap::new(),
    )
}

fn push_relationship(
    relationship_templates: &mut Vec<RelationshipTemplate>,
    name: String,
    type_name: QualifiedName,
    properties: BTreeMap<String, ValueExpr>,
) -> RelationshipId {
    let id = RelationshipId(relationship_templates.len() as u32);
    relationship_templates.push(RelationshipTemplate {
        id,
        name,
        type_name,
        properties,
        source: SourceLocation::new("", ""),
    });
    id
}

/// Deterministic synthetic name for an anonymous relationship instance
/// (§3.1: `uuid::Uuid` is for anonymous synthetic names only, never the
/// primary key of a user-declared template). Seeded from the node name,
/// requirement name, and assignment position rather than randomness, so
/// re-parsing the same input names the same synthetic relationship every
/// time (§8 idempotence law) — `Uuid::new_v5` hashes the seed instead of
/// drawing from an RNG.
fn synthetic_relationship_name(node_name: &str, requirement_name: &str, index: usize) -> String {
    let seed = format!("{node_name}::{requirement_name}::{index}");
    let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, seed.as_bytes());
    format!("__relationship_{id}")
}

fn index_of(nodes: &[NodeTemplate], id: NodeId) -> usize {
    nodes.iter().position(|n| n.id == id).expect("NodeId always refers to a live arena slot")
}

fn find_capability(registry: &TypeRegistry, node: &NodeTemplate, required_type: &QualifiedName) -> Option<String> {
    let flattened = registry.flattened(TypeKind::Node, &node.type_name).ok()?;
    flattened
        .capabilities
        .iter()
        .find(|(_, def)| registry.derives_from(TypeKind::Capability, &def.type_name, required_type))
        .map(|(name, _)| name.clone())
}

fn check_valid_source_types(
    registry: &TypeRegistry,
    target: &NodeTemplate,
    capability_name: &str,
    source_type: &QualifiedName,
) -> Result<(), DiagnosticKind> {
    let flattened = registry.flattened(TypeKind::Node, &target.type_name)?;
    let Some(def) = flattened.capability(capability_name) else {
        return Ok(());
    };
    if def.valid_source_types.is_empty() {
        return Ok(());
    }
    let ok = def
        .valid_source_types
        .iter()
        .any(|allowed| registry.derives_from(TypeKind::Node, source_type, allowed));
    if ok {
        Ok(())
    } else {
        Err(DiagnosticKind::IncompatibleDerivationError {
            child: source_type.to_string(),
            parent: def.type_name.to_string(),
            message: format!(
                "capability `{}` does not accept source type `{}`",
                capability_name, source_type
            ),
        })
    }
}

/// Resolve a property's declared type on a node's flattened view, falling
/// back to `"string"` only when the candidate's type doesn't declare the
/// property at all (the constraint will then simply fail to match a
/// non-string literal, same as an unknown property should).
fn declared_property_type(registry: &TypeRegistry, node: &NodeTemplate, name: &str) -> String {
    registry
        .flattened(TypeKind::Node, &node.type_name)
        .ok()
        .and_then(|flattened| flattened.property(name).map(|def| def.type_name.to_string()))
        .unwrap_or_else(|| "string".to_string())
}

/// Resolve a capability property's declared type: first the capability
/// type's own schema, then (since this crate models some normatively
/// capability-scoped properties such as `num_cpus`/`mem_size` as node-level
/// properties instead, see `src/registry/normative.rs`) the enclosing
/// node's own property of the same name.
fn declared_capability_property_type(
    registry: &TypeRegistry,
    node: &NodeTemplate,
    capability_name: &str,
    property_name: &str,
) -> String {
    let node_flattened = registry.flattened(TypeKind::Node, &node.type_name).ok();
    let capability_type = node_flattened
        .as_ref()
        .and_then(|flattened| flattened.capability(capability_name))
        .map(|def| def.type_name.clone());
    if let Some(capability_type) = capability_type {
        if let Ok(cap_flattened) = registry.flattened(TypeKind::Capability, &capability_type) {
            if let Some(def) = cap_flattened.property(property_name) {
                return def.type_name.to_string();
            }
        }
    }
    node_flattened
        .as_ref()
        .and_then(|flattened| flattened.property(property_name).map(|def| def.type_name.to_string()))
        .unwrap_or_else(|| "string".to_string())
}

fn clauses_match(clauses: &[serde_yaml::Value], type_name: &str, value: &crate::value::Value) -> bool {
    match parse_constraints(clauses, type_name) {
        Ok(constraints) => constraints.iter().all(|c| c.check(value).is_ok()),
        Err(_) => false,
    }
}

fn matches_filter(registry: &TypeRegistry, node: &NodeTemplate, filter: &NodeFilter) -> bool {
    for matcher in &filter.matchers {
        let satisfied = match matcher {
            NodeFilterMatcher::Property { name, clauses } => node
                .property(name)
                .filter(|expr| expr.is_fully_literal())
                .map(|expr| {
                    let type_name = declared_property_type(registry, node, name);
                    clauses_match(clauses, &type_name, &expr.as_literal_value())
                })
                .unwrap_or(false),
            NodeFilterMatcher::Capability { name, property, clauses } => {
                let Ok(flattened) = registry.flattened(TypeKind::Node, &node.type_name) else {
                    return false;
                };
                if flattened.capability(name).is_none() {
                    return false;
                }
                node.capabilities
                    .get(name)
                    .and_then(|cap| cap.properties.get(property))
                    .filter(|expr| expr.is_fully_literal())
                    .map(|expr| {
                        let type_name = declared_capability_property_type(registry, node, name, property);
                        clauses_match(clauses, &type_name, &expr.as_literal_value())
                    })
                    .unwrap_or(false)
            }
        };
        if !satisfied {
            return false;
        }
    }
    true
}

fn check_occurrences(node: &NodeTemplate, flattened: &crate::registry::FlattenedView, diagnostics: &mut DiagnosticSink) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for assignment in &node.requirements {
        if assignment.is_resolved() {
            *counts.entry(assignment.name.as_str()).or_insert(0) += 1;
        }
    }
    for def in &flattened.requirements {
        let actual = *counts.get(def.name.as_str()).unwrap_or(&0);
        if !def.occurrences.contains(actual as u64) {
            diagnostics.error(
                DiagnosticKind::OccurrenceError {
                    node: node.name.clone(),
                    requirement: def.name.clone(),
                    actual,
                    min: def.occurrences.min as usize,
                    max: def.occurrences.max_label(),
                },
                node.source.clone(),
            );
        }
    }
}

/// Build the `petgraph` artifact described in §4.D.1: one graph node per
/// template, one edge per resolved requirement, source pointing at target.
fn build_graph(nodes: &[NodeTemplate]) -> DiGraph<NodeId, RequirementEdge> {
    let mut graph = DiGraph::new();
    let mut index_of_id = HashMap::new();
    for node in nodes {
        let ix = graph.add_node(node.id);
        index_of_id.insert(node.id, ix);
    }
    for node in nodes {
        for assignment in &node.requirements {
            if let Some(target_id) = assignment.resolved_target {
                let relationship_type = assignment
                    .resolved_relationship_type
                    .clone()
                    .unwrap_or_else(|| QualifiedName::new("tosca.relationships.Root"));
                graph.add_edge(
                    index_of_id[&node.id],
                    index_of_id[&target_id],
                    RequirementEdge {
                        requirement_name: assignment.name.clone(),
                        relationship_type,
                    },
                );
            }
        }
    }
    graph
}

/// `HostedOn` chains must be acyclic (§8 invariant 6, §4.D.1). Any cycle in
/// the whole requirement graph is reported once; the spec only requires
/// `HostedOn` to be acyclic but mutual non-hosting requirements (e.g.
/// `ConnectsTo`) are explicitly allowed to cycle (§9), so this only flags a
/// cycle that is entirely composed of `HostedOn` edges.
pub fn check_host_cycles(graph: &DiGraph<NodeId, RequirementEdge>, nodes: &[NodeTemplate], diagnostics: &mut DiagnosticSink) {
    use petgraph::visit::EdgeRef;

    let mut host_only = graph.clone();
    host_only.retain_edges(|g, e| {
        g.edge_weight(e)
            .map(|w| w.relationship_type.as_str() == "tosca.relationships.HostedOn")
            .unwrap_or(false)
    });

    if petgraph::algo::is_cyclic_directed(&host_only) {
        let names: Vec<String> = host_only
            .edge_references()
            .map(|e| {
                let source = host_only[e.source()];
                nodes.iter().find(|n| n.id == source).map(|n| n.name.clone()).unwrap_or_default()
            })
            .collect();
        diagnostics.error(
            DiagnosticKind::ConstraintViolation {
                message: format!("HostedOn cycle among node templates: {}", names.join(" -> ")),
            },
            SourceLocation::new("", "node_templates"),
        );
    }
}
