use std::collections::HashMap;

use tosca_core::import::{ImportBase, MapLoader};
use tosca_core::value::Value;
use tosca_core::EngineOptions;

fn parse(yaml: &str, inputs: HashMap<String, Value>) -> (Option<tosca_core::Topology>, Vec<tosca_core::Diagnostic>) {
    let root: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    let loader = MapLoader::new();
    tosca_core::parse_service_template(root, ImportBase::new(""), &loader, inputs, EngineOptions::new())
}

/// End-to-end scenario 5: a `node_filter` on an unqualified requirement picks
/// the one `Compute` candidate whose `num_cpus` falls `in_range [1, 4]`,
/// never the one with `num_cpus = 8`.
#[test]
fn node_filter_picks_the_matching_compute_candidate() {
    let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    small:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 4
    big:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 8
    dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host:
            node_filter:
              capabilities:
                host:
                  properties:
                    num_cpus:
                      - in_range: [1, 4]
"#;
    let (topology, diagnostics) = parse(yaml, HashMap::new());
    assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", diagnostics);
    let topology = topology.unwrap();
    let dbms = topology.node("dbms").unwrap();
    let host_req = dbms.requirements.iter().find(|r| r.name == "host").unwrap();
    let target = host_req.resolved_target.expect("host requirement resolves");
    assert_eq!(topology.node_by_id(target).name, "small");
}

/// Two requirement slots both matching by capability type with no
/// disambiguating `node_filter`/explicit name is reported as
/// `AmbiguousTargetError`, not resolved arbitrarily.
#[test]
fn ambiguous_capability_match_is_reported() {
    let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    a:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 2
    b:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 2
    dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host: {}
"#;
    let (topology, diagnostics) = parse(yaml, HashMap::new());
    assert!(topology.is_some());
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d.kind, tosca_core::diagnostics::DiagnosticKind::AmbiguousTargetError { .. })));
}

/// A `HostedOn`-only cycle between node templates is rejected (§8 invariant
/// 4) even though the pipeline otherwise completes. `test.Box` is a minimal
/// type that both offers and requires a `Container`-typed slot, so two
/// instances can host each other.
#[test]
fn hosted_on_cycle_is_rejected() {
    let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
node_types:
  test.Box:
    derived_from: tosca.nodes.Root
    capabilities:
      container:
        type: tosca.capabilities.Container
    requirements:
      - host:
          capability: tosca.capabilities.Container
          relationship: tosca.relationships.HostedOn
topology_template:
  node_templates:
    a:
      type: test.Box
      requirements:
        - host: b
    b:
      type: test.Box
      requirements:
        - host: a
"#;
    let (_topology, diagnostics) = parse(yaml, HashMap::new());
    assert!(diagnostics.iter().any(|d| d.is_error()), "{:?}", diagnostics);
}
