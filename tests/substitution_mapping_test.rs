use std::collections::HashMap;

use tosca_core::diagnostics::DiagnosticKind;
use tosca_core::import::{ImportBase, MapLoader};
use tosca_core::EngineOptions;

/// End-to-end scenario 2: a nested substitution declares a required
/// `server_port` property with no default, and the enclosing template's
/// `substitution_mappings.properties` does not map it — the caller's
/// `inputs:` never binds a value for it either, so substitution checking
/// should report exactly one `MissingRequiredInputError` pointing at the
/// substitution block.
#[test]
fn missing_required_input_through_substitution_mapping_is_reported() {
    let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
node_types:
  example.QueuingSubsystem:
    derived_from: tosca.nodes.Root
    properties:
      server_port:
        type: integer
topology_template:
  substitution_mappings:
    node_type: example.QueuingSubsystem
    properties: {}
"#;
    let root: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    let loader = MapLoader::new();

    let (topology, diagnostics) =
        tosca_core::parse_service_template(root, ImportBase::new(""), &loader, HashMap::new(), EngineOptions::new());

    assert!(topology.is_some(), "{:?}", diagnostics);
    let missing: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::MissingRequiredInputError { .. }))
        .collect();
    assert_eq!(missing.len(), 1, "{:?}", diagnostics);
}

/// A substituted node type whose capability/requirement is left unmapped is
/// reported as a `SubstitutionMappingError`, independent of the property
/// check above.
#[test]
fn unmapped_requirement_on_substituted_dbms_is_reported() {
    let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  substitution_mappings:
    node_type: tosca.nodes.DBMS
    properties: {}
"#;
    let root: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    let loader = MapLoader::new();

    let (topology, diagnostics) =
        tosca_core::parse_service_template(root, ImportBase::new(""), &loader, HashMap::new(), EngineOptions::new());

    assert!(topology.is_some(), "{:?}", diagnostics);
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagnosticKind::SubstitutionMappingError { .. })));
}
