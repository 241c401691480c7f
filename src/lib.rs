#![allow(dead_code)]

//! `tosca_core`: type registry, template elaborator, constraint/scalar-unit
//! engine, function evaluator, substitution-mapping resolver and import
//! resolver for TOSCA Simple Profile in YAML service templates (§1).
//!
//! `parse_service_template` is the single public entry point (§6.1); every
//! other `pub` item in this crate exists to let a caller construct its
//! arguments (`ImportLoader`, `EngineOptions`) or read back its result
//! (`Topology`, `Diagnostic`).

pub mod diagnostics;
pub mod eval;
pub mod expr;
pub mod import;
pub mod registry;
pub mod scalar;
pub mod substitution;
pub mod template;
pub mod topology;
pub mod value;

use std::collections::HashMap;

use serde_yaml::Value as YamlValue;
use tracing::{debug_span, info_span};

pub use diagnostics::Diagnostic;
pub use topology::Topology;

use diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use import::{ImportBase, ImportEntry, ImportLoader};
use registry::{QualifiedName, ToscaVersion, TypeDefinition, TypeKind, TypeRegistry};
use topology::Stage;
use value::Value;

/// Threaded configuration for a single `parse_service_template` call (§1.1,
/// §6). Generalizes the teacher's `config::types::Settings`: strict mode
/// replaces a global flag, and `register_profile` is the "registration
/// callback" §9 describes for NFV/MEC-style profile extensions — there is no
/// dynamic loading, a caller simply hands in the extra `TypeDefinition`s up
/// front.
#[derive(Debug, Default, Clone)]
pub struct EngineOptions {
    /// Short-circuit the current pipeline stage on the first error rather
    /// than accumulating best-effort (§4.G).
    pub strict: bool,
    profiles: HashMap<String, Vec<TypeDefinition>>,
}

impl EngineOptions {
    pub fn new() -> Self {
        EngineOptions::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Register an extra `tosca_definitions_version` selector (e.g. an
    /// NFV/MEC profile name) backed by `types`, layered on top of the
    /// `tosca_simple_yaml_1_3` normative base (§9).
    pub fn register_profile(mut self, version: impl Into<String>, types: Vec<TypeDefinition>) -> Self {
        self.profiles.insert(version.into(), types);
        self
    }
}

const TYPE_SECTIONS: [(&str, TypeKind); 8] = [
    ("node_types", TypeKind::Node),
    ("relationship_types", TypeKind::Relationship),
    ("capability_types", TypeKind::Capability),
    ("data_types", TypeKind::Data),
    ("interface_types", TypeKind::Interface),
    ("artifact_types", TypeKind::Artifact),
    ("policy_types", TypeKind::Policy),
    ("group_types", TypeKind::Group),
];

const ALL_KINDS: [TypeKind; 8] = [
    TypeKind::Node,
    TypeKind::Relationship,
    TypeKind::Capability,
    TypeKind::Data,
    TypeKind::Interface,
    TypeKind::Artifact,
    TypeKind::Policy,
    TypeKind::Group,
];

/// Parse and validate a TOSCA service template (§6.1). `root` is the
/// already-YAML-parsed document; `base`/`loader` resolve its `imports:`
/// list; `inputs` binds caller parameter values; `options` configures strict
/// mode and profile extensions.
///
/// `Topology` is `None` only when one of the three fatal conditions (§7:
/// `UnsupportedVersionError`, `ImportError`, `TypeCycleError`) stopped the
/// pipeline before the topology was elaborated; otherwise it is `Some`, even
/// in the presence of other (non-fatal) errors, so a best-effort caller can
/// still inspect whatever was built.
pub fn parse_service_template(
    root: YamlValue,
    base: ImportBase,
    loader: &dyn ImportLoader,
    inputs: HashMap<String, Value>,
    options: EngineOptions,
) -> (Option<Topology>, Vec<Diagnostic>) {
    let _span = info_span!("parse_service_template", base = %base.uri).entered();
    let mut diagnostics = DiagnosticSink::new(options.strict);

    let Some(root_mapping) = root.as_mapping().cloned() else {
        diagnostics.error(
            DiagnosticKind::SchemaError {
                message: "root document must be a mapping".into(),
            },
            SourceLocation::new(base.uri.clone(), ""),
        );
        return (None, diagnostics.into_sorted());
    };

    let version_str = root_mapping
        .get("tosca_definitions_version")
        .and_then(YamlValue::as_str)
        .unwrap_or_default();
    let version = ToscaVersion::parse(version_str).unwrap_or_else(|| ToscaVersion::Profile(version_str.to_string()));

    let mut registry = {
        let _span = debug_span!("type_registration").entered();
        TypeRegistry::new(version, &options.profiles, &mut diagnostics)
    };
    if diagnostics.should_abort() {
        return (None, diagnostics.into_sorted());
    }

    let import_entries: Vec<ImportEntry> = root_mapping
        .get("imports")
        .and_then(YamlValue::as_sequence)
        .map(|seq| seq.iter().filter_map(import::parse_import_entry).collect())
        .unwrap_or_default();

    let resolved_imports = {
        let _span = debug_span!("import_resolution", count = import_entries.len()).entered();
        import::resolve_imports(&import_entries, &base, loader, &mut diagnostics)
    };
    if diagnostics.should_abort() {
        return (None, diagnostics.into_sorted());
    }

    let mut documents: Vec<(String, serde_yaml::Mapping, Option<String>)> = Vec::with_capacity(1 + resolved_imports.len());
    if let Some(m) = root.as_mapping() {
        documents.push((base.uri.clone(), m.clone(), None));
    }
    for import in &resolved_imports {
        if let Some(m) = import.document.as_mapping() {
            documents.push((import.source_uri.clone(), m.clone(), import.namespace_prefix.clone()));
        }
    }

    {
        let _span = debug_span!("type_flattening", documents = documents.len()).entered();
        register_documents(&documents, &mut registry, &mut diagnostics);
        for kind in ALL_KINDS {
            registry.validate_derivation(kind, &mut diagnostics);
        }
    }
    if diagnostics.should_abort() {
        return (None, diagnostics.into_sorted());
    }

    let topology_template = root_mapping
        .get("topology_template")
        .and_then(YamlValue::as_mapping)
        .cloned()
        .unwrap_or_default();

    let elaborated = {
        let _span = debug_span!("elaboration").entered();
        template::elaborate(&topology_template, &registry, &inputs, &base.uri, &mut diagnostics)
    };
    if diagnostics.should_abort() {
        return (None, diagnostics.into_sorted());
    }

    let substitution_mapping = {
        let _span = debug_span!("substitution_checking").entered();
        let mapping = substitution::parse_substitution_mapping(&topology_template);
        if let Some(mapping) = &mapping {
            let nested_inputs = topology_template
                .get("inputs")
                .and_then(YamlValue::as_mapping)
                .cloned()
                .unwrap_or_default();
            substitution::validate_substitution_mapping(
                mapping,
                &nested_inputs,
                &registry,
                &elaborated,
                &base.uri,
                &mut diagnostics,
            );
        }
        mapping
    };

    let topology = Topology {
        registry,
        inputs: elaborated.inputs,
        node_templates: elaborated.node_templates,
        name_index: elaborated.name_index,
        relationship_templates: elaborated.relationship_templates,
        groups: elaborated.groups,
        policies: elaborated.policies,
        outputs: elaborated.outputs,
        requirement_graph: elaborated.requirement_graph,
        substitution_mapping,
        stage: Stage::Validated,
    };

    (Some(topology), diagnostics.into_sorted())
}

/// Register every `*_types:` section of every document (root first, then
/// imports in resolution order) into `registry` (§4.B step 2, §4.C
/// namespace-prefix rule). A `namespace_prefix`d import's definitions are
/// registered under `prefix.name`; internal references (`derived_from`,
/// capability/requirement type names) are left as written; a profile that
/// relies on cross-file relative references within a prefixed namespace is
/// expected to spell them out fully-qualified, same as the reference TOSCA
/// processors require.
fn register_documents(
    documents: &[(String, serde_yaml::Mapping, Option<String>)],
    registry: &mut TypeRegistry,
    diagnostics: &mut DiagnosticSink,
) {
    for (file, mapping, prefix) in documents {
        for (section_key, kind) in TYPE_SECTIONS {
            let Some(section) = mapping.get(section_key).and_then(YamlValue::as_mapping) else {
                continue;
            };
            let defs = registry::parse_type_section(kind, section, file, diagnostics);
            for mut def in defs {
                if let Some(prefix) = prefix {
                    def.name = QualifiedName::new(format!("{}.{}", prefix, def.name));
                }
                let source = SourceLocation::new(file.clone(), format!("{}.{}", section_key, def.name));
                registry.register(def, source, diagnostics);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use import::MapLoader;

    #[test]
    fn end_to_end_single_compute_scenario() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  inputs:
    cpus:
      type: integer
      constraints:
        - valid_values: [1, 2, 4, 8]
  node_templates:
    server:
      type: tosca.nodes.Compute
      properties:
        num_cpus: { get_input: cpus }
        mem_size: "4 MB"
        disk_size: "10 GB"
"#;
        let root: YamlValue = serde_yaml::from_str(yaml).unwrap();
        let loader = MapLoader::new();
        let mut inputs = HashMap::new();
        inputs.insert("cpus".to_string(), Value::Int(2));

        let (topology, diagnostics) =
            parse_service_template(root, ImportBase::new(""), &loader, inputs, EngineOptions::new());

        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", diagnostics);
        let topology = topology.expect("fatal-free parse always yields a topology");
        let server = topology.node("server").unwrap();
        let expr = server.property("num_cpus").unwrap();
        let ctx = eval::EvalContext::for_node(server.id);
        let value = topology.evaluate(expr, &ctx).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn constraint_violation_on_input_is_a_single_diagnostic() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  inputs:
    cpus:
      type: integer
      constraints:
        - valid_values: [1, 2, 4, 8]
"#;
        let root: YamlValue = serde_yaml::from_str(yaml).unwrap();
        let loader = MapLoader::new();
        let mut inputs = HashMap::new();
        inputs.insert("cpus".to_string(), Value::Int(3));

        let (topology, diagnostics) =
            parse_service_template(root, ImportBase::new(""), &loader, inputs, EngineOptions::new());

        assert!(topology.is_some());
        let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].kind, DiagnosticKind::ConstraintViolation { .. }));
    }

    #[test]
    fn unsupported_version_aborts_before_topology_elaborated() {
        let yaml = "tosca_definitions_version: not_a_real_version\n";
        let root: YamlValue = serde_yaml::from_str(yaml).unwrap();
        let loader = MapLoader::new();
        let (topology, diagnostics) =
            parse_service_template(root, ImportBase::new(""), &loader, HashMap::new(), EngineOptions::new());
        assert!(topology.is_none());
        assert!(diagnostics.iter().any(|d| matches!(d.kind, DiagnosticKind::UnsupportedVersionError { .. })));
    }

    #[test]
    fn deprecated_blockstorage_alias_emits_a_tagged_warning() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    disk:
      type: tosca.nodes.BlockStorage
      properties:
        size: "10 GB"
"#;
        let root: YamlValue = serde_yaml::from_str(yaml).unwrap();
        let loader = MapLoader::new();
        let (topology, diagnostics) =
            parse_service_template(root, ImportBase::new(""), &loader, HashMap::new(), EngineOptions::new());
        assert!(topology.is_some());
        assert!(diagnostics.iter().any(|d| d.tag == Some("deprecated")));
    }
}
