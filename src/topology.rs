//! The read-only public facade over an elaborated template (§3 `Topology`,
//! §6 accessors).

use std::collections::BTreeMap;

use petgraph::graph::DiGraph;

use crate::expr::ValueExpr;
use crate::registry::{FlattenedView, TypeRegistry};
use crate::substitution::SubstitutionMapping;
use crate::template::node::{GroupTemplate, NodeId, NodeTemplate, OutputDef, PolicyTemplate, RelationshipId, RelationshipTemplate};
use crate::template::requirement::RequirementEdge;
use crate::value::Value;

/// Pipeline stage, tracked for diagnostics/debugging only — callers only
/// ever observe a finished `Topology` (or `None`, on a fatal abort); no
/// public API exposes a mid-pipeline `Topology` (§3 Lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Empty,
    ImportsResolved,
    TypesRegistered,
    TypesFlattened,
    TopologyElaborated,
    FunctionsBound,
    Validated,
    Failed,
}

pub struct Topology {
    pub(crate) registry: TypeRegistry,
    pub(crate) inputs: BTreeMap<String, Value>,
    pub(crate) node_templates: Vec<NodeTemplate>,
    pub(crate) name_index: std::collections::HashMap<String, NodeId>,
    pub(crate) relationship_templates: Vec<RelationshipTemplate>,
    pub(crate) groups: Vec<GroupTemplate>,
    pub(crate) policies: Vec<PolicyTemplate>,
    pub(crate) outputs: BTreeMap<String, OutputDef>,
    pub(crate) requirement_graph: DiGraph<NodeId, RequirementEdge>,
    pub(crate) substitution_mapping: Option<SubstitutionMapping>,
    pub(crate) stage: Stage,
}

impl Topology {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    pub fn node_templates(&self) -> &[NodeTemplate] {
        &self.node_templates
    }

    pub fn node(&self, name: &str) -> Option<&NodeTemplate> {
        self.name_index.get(name).map(|id| &self.node_templates[id.0 as usize])
    }

    pub fn node_by_id(&self, id: NodeId) -> &NodeTemplate {
        &self.node_templates[id.0 as usize]
    }

    pub fn relationship_templates(&self) -> &[RelationshipTemplate] {
        &self.relationship_templates
    }

    pub fn relationship_by_id(&self, id: RelationshipId) -> &RelationshipTemplate {
        &self.relationship_templates[id.0 as usize]
    }

    /// The `substitution_mappings:` block this topology was checked against,
    /// if its `topology_template` declared one (§4.F, §3 `Topology.substitution_mappings`).
    pub fn substitution_mapping(&self) -> Option<&SubstitutionMapping> {
        self.substitution_mapping.as_ref()
    }

    pub fn groups(&self) -> &[GroupTemplate] {
        &self.groups
    }

    pub fn policies(&self) -> &[PolicyTemplate] {
        &self.policies
    }

    pub fn outputs(&self) -> &BTreeMap<String, OutputDef> {
        &self.outputs
    }

    pub fn requirement_graph(&self) -> &DiGraph<NodeId, RequirementEdge> {
        &self.requirement_graph
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Flattened view of a node's type (component B), used by callers that
    /// want the merged property/capability/requirement shape directly
    /// rather than re-deriving it.
    pub fn flattened_type(&self, node: &NodeTemplate) -> Option<std::sync::Arc<FlattenedView>> {
        self.registry
            .flattened(crate::registry::TypeKind::Node, &node.type_name)
            .ok()
    }

    /// Evaluate a `ValueExpr` against this topology (§4.E, §6). Thin
    /// forwarding wrapper so callers don't need to import `crate::eval`
    /// directly for the common case.
    pub fn evaluate(&self, expr: &ValueExpr, ctx: &crate::eval::EvalContext) -> Result<Value, crate::diagnostics::DiagnosticKind> {
        crate::eval::eval(expr, self, ctx)
    }
}
