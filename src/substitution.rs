//! Substitution-mapping resolver (component F, §4.F): validates that a
//! nested service template's `substitution_mappings` block is a coherent
//! correspondence with the node type it claims to substitute for.

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::registry::{QualifiedName, TypeKind, TypeRegistry};
use crate::template::ElaboratedTemplate;

use serde_yaml::Value as Yaml;

/// Parsed shape of `topology_template.substitution_mappings`, kept separate
/// from `ElaboratedTemplate` since it is optional and belongs to a distinct
/// pipeline stage (substitution checking runs after elaboration, §2).
pub struct SubstitutionMapping {
    pub node_type: QualifiedName,
    pub properties: std::collections::BTreeMap<String, String>,
    pub capabilities: std::collections::BTreeMap<String, (String, String)>,
    pub requirements: std::collections::BTreeMap<String, (String, String)>,
}

/// Parse the `substitution_mappings:` block, if present. Returns `None` when
/// the template does not declare one — most templates don't, and that is not
/// an error.
pub fn parse_substitution_mapping(topology_template: &serde_yaml::Mapping) -> Option<SubstitutionMapping> {
    let block = topology_template.get("substitution_mappings")?.as_mapping()?;
    let node_type = block.get("node_type").and_then(Yaml::as_str)?;

    let properties = block
        .get("properties")
        .and_then(Yaml::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), input_reference(v)?)))
                .collect()
        })
        .unwrap_or_default();

    let capabilities = block
        .get("capabilities")
        .and_then(Yaml::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), pair_reference(v)?)))
                .collect()
        })
        .unwrap_or_default();

    let requirements = block
        .get("requirements")
        .and_then(Yaml::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), pair_reference(v)?)))
                .collect()
        })
        .unwrap_or_default();

    Some(SubstitutionMapping {
        node_type: QualifiedName::new(node_type),
        properties,
        capabilities,
        requirements,
    })
}

/// `properties:` entries are either a bare input name or a single-element
/// `[input_name]` sequence; both forms appear across profile examples.
fn input_reference(raw: &Yaml) -> Option<String> {
    match raw {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Sequence(items) => items.first()?.as_str().map(String::from),
        _ => None,
    }
}

/// `capabilities:`/`requirements:` entries are always `[inner_node, inner_name]`.
fn pair_reference(raw: &Yaml) -> Option<(String, String)> {
    let items = raw.as_sequence()?;
    if items.len() != 2 {
        return None;
    }
    Some((items[0].as_str()?.to_string(), items[1].as_str()?.to_string()))
}

/// Validate `mapping` against `registry` and the nested `elaborated`
/// template it was parsed alongside (§4.F). `nested_inputs` is the raw
/// `inputs:` mapping of the same `topology_template`, parsed separately so
/// this function can check which inputs have a default without threading
/// `InputDef`s through `ElaboratedTemplate` (which only keeps bound values).
pub fn validate_substitution_mapping(
    mapping: &SubstitutionMapping,
    nested_inputs: &serde_yaml::Mapping,
    registry: &TypeRegistry,
    elaborated: &ElaboratedTemplate,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) {
    let location = SourceLocation::new(file, "substitution_mappings");

    let Ok(flattened) = registry.flattened(TypeKind::Node, &mapping.node_type) else {
        diagnostics.error(
            DiagnosticKind::UnknownTypeError {
                name: mapping.node_type.to_string(),
            },
            location,
        );
        return;
    };

    let input_defs = crate::template::parse_input_defs(nested_inputs, file);

    // Every non-optional outer property lacking a default must correspond to
    // a nested input of a matching type.
    for (prop_name, def) in &flattened.properties {
        if !def.required || def.default.is_some() {
            continue;
        }
        let input_name = mapping.properties.get(prop_name).cloned().unwrap_or_else(|| prop_name.clone());
        match input_defs.get(&input_name) {
            Some(input_def) if input_def.type_name == def.type_name => {}
            Some(input_def) => {
                diagnostics.error(
                    DiagnosticKind::TypeMismatchError {
                        message: format!(
                            "substitution property `{}` expects type `{}`, input `{}` declares `{}`",
                            prop_name, def.type_name, input_name, input_def.type_name
                        ),
                    },
                    location.clone(),
                );
            }
            None => {
                diagnostics.error(
                    DiagnosticKind::MissingRequiredInputError { name: input_name },
                    location.clone(),
                );
            }
        }
    }

    // Every nested input not mapped from a property must carry its own
    // default, or the substituted template can never be supplied a value.
    let mapped_inputs: std::collections::HashSet<&str> =
        mapping.properties.values().map(String::as_str).collect();
    for (name, def) in &input_defs {
        if mapped_inputs.contains(name.as_str()) {
            continue;
        }
        if def.required && def.default.is_none() {
            diagnostics.error(
                DiagnosticKind::MissingRequiredInputError { name: name.clone() },
                location.clone(),
            );
        }
    }

    // Every capability the node type declares must be mapped to an inner
    // node/capability pair, and that pair's type must be compatible.
    for (cap_name, cap_def) in &flattened.capabilities {
        let Some((inner_node, inner_cap)) = mapping.capabilities.get(cap_name) else {
            diagnostics.error(
                DiagnosticKind::SubstitutionMappingError {
                    message: format!("capability `{}` is not mapped to an inner node", cap_name),
                },
                location.clone(),
            );
            continue;
        };
        match inner_capability_type(registry, elaborated, inner_node, inner_cap) {
            Some(inner_type) if registry.derives_from(TypeKind::Capability, &inner_type, &cap_def.type_name) => {}
            Some(inner_type) => diagnostics.error(
                DiagnosticKind::IncompatibleDerivationError {
                    child: inner_type.to_string(),
                    parent: cap_def.type_name.to_string(),
                    message: format!(
                        "substitution capability `{}` maps to `{}.{}` of incompatible type",
                        cap_name, inner_node, inner_cap
                    ),
                },
                location.clone(),
            ),
            None => diagnostics.error(
                DiagnosticKind::SubstitutionMappingError {
                    message: format!("no capability `{}` on node `{}`", inner_cap, inner_node),
                },
                location.clone(),
            ),
        }
    }

    // Every requirement the node type declares must be mapped likewise.
    for req_def in &flattened.requirements {
        let Some((inner_node, inner_req)) = mapping.requirements.get(&req_def.name) else {
            diagnostics.error(
                DiagnosticKind::SubstitutionMappingError {
                    message: format!("requirement `{}` is not mapped to an inner node", req_def.name),
                },
                location.clone(),
            );
            continue;
        };
        match inner_requirement_count(elaborated, inner_node, inner_req) {
            None => {
                diagnostics.error(
                    DiagnosticKind::SubstitutionMappingError {
                        message: format!("no requirement `{}` on node `{}`", inner_req, inner_node),
                    },
                    location.clone(),
                );
            }
            Some(count) if !req_def.occurrences.contains(count as u64) => {
                diagnostics.error(
                    DiagnosticKind::SubstitutionMappingError {
                        message: format!(
                            "substitution requirement `{}` maps to `{}.{}` with {} bound occurrence(s), outside outer slot's [{}, {}]",
                            req_def.name,
                            inner_node,
                            inner_req,
                            count,
                            req_def.occurrences.min,
                            req_def.occurrences.max_label(),
                        ),
                    },
                    location.clone(),
                );
            }
            Some(_) => {}
        }
    }
}

fn inner_capability_type(
    registry: &TypeRegistry,
    elaborated: &ElaboratedTemplate,
    inner_node: &str,
    inner_cap: &str,
) -> Option<QualifiedName> {
    let node_id = elaborated.name_index.get(inner_node)?;
    let node = &elaborated.node_templates[node_id.0 as usize];
    let flattened = registry.flattened(TypeKind::Node, &node.type_name).ok()?;
    flattened.capability(inner_cap).map(|def| def.type_name.clone())
}

/// Number of resolved bindings of `inner_req` on `inner_node`, or `None` if
/// `inner_node` declares no requirement slot of that name at all (distinct
/// from zero bindings, which is a legitimate occurrence count to check
/// against the outer slot's `[min,max]`).
fn inner_requirement_count(elaborated: &ElaboratedTemplate, inner_node: &str, inner_req: &str) -> Option<usize> {
    let node_id = elaborated.name_index.get(inner_node)?;
    let node = &elaborated.node_templates[node_id.0 as usize];
    if !node.requirements.iter().any(|r| r.name == inner_req) {
        return None;
    }
    Some(node.requirements.iter().filter(|r| r.name == inner_req && r.is_resolved()).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::registry::ToscaVersion;
    use std::collections::HashMap;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn empty_elaborated(registry: &TypeRegistry) -> ElaboratedTemplate {
        let topology_template = yaml(
            r#"
node_templates:
  server:
    type: tosca.nodes.Compute
    properties:
      num_cpus: 2
"#,
        );
        let mut sink = DiagnosticSink::new(false);
        crate::template::elaborate(
            topology_template.as_mapping().unwrap(),
            registry,
            &HashMap::new(),
            "t.yaml",
            &mut sink,
        )
    }

    #[test]
    fn unmapped_capabilities_and_requirements_are_reported() {
        let mut sink = DiagnosticSink::new(false);
        let registry = TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink);
        let elaborated = empty_elaborated(&registry);

        let mapping = SubstitutionMapping {
            node_type: QualifiedName::new("tosca.nodes.SoftwareComponent"),
            properties: std::collections::BTreeMap::new(),
            capabilities: std::collections::BTreeMap::new(),
            requirements: std::collections::BTreeMap::new(),
        };
        let nested_inputs = yaml("{}").as_mapping().unwrap().clone();
        validate_substitution_mapping(&mapping, &nested_inputs, &registry, &elaborated, "t.yaml", &mut sink);
        assert!(sink.has_errors());
    }
}
