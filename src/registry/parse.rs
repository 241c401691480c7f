//! YAML → `TypeDefinition` parsing (§4.B step 2), shared by every
//! `*_types:` section of a service template document.

use std::collections::BTreeMap;

use serde_yaml::Value as Yaml;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::scalar::parse_constraints;
use crate::value::value_from_yaml;

use super::{
    CapabilityDef, InterfaceDef, NodeFilter, NodeFilterMatcher, OperationDef, Occurrences, PropertyDef,
    PropertyStatus, QualifiedName, RequirementDef, TypeDefinition, TypeKind,
};

/// Parse every entry of one `*_types:` mapping (e.g. the `node_types:` key)
/// into `TypeDefinition`s of `kind`. Malformed entries push a `SchemaError`
/// and are skipped rather than aborting the whole section.
pub fn parse_type_section(
    kind: TypeKind,
    mapping: &serde_yaml::Mapping,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> Vec<TypeDefinition> {
    let mut out = Vec::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let path = format!("{:?}.{}", kind, name);
        match parse_one(kind, name, body, file, &path, diagnostics) {
            Ok(def) => out.push(def),
            Err(err) => diagnostics.error(err, SourceLocation::new(file, path)),
        }
    }
    out
}

fn parse_one(
    kind: TypeKind,
    name: &str,
    body: &Yaml,
    file: &str,
    path: &str,
    diagnostics: &mut DiagnosticSink,
) -> Result<TypeDefinition, DiagnosticKind> {
    let mapping = body.as_mapping().ok_or_else(|| DiagnosticKind::SchemaError {
        message: format!("type `{}` body must be a mapping", name),
    })?;

    let mut def = TypeDefinition::new(kind, name);

    if let Some(parent) = mapping.get("derived_from").and_then(Yaml::as_str) {
        def.derived_from = Some(QualifiedName::new(parent));
    }
    if let Some(desc) = mapping.get("description").and_then(Yaml::as_str) {
        def.description = Some(desc.to_string());
    }
    if let Some(metadata) = mapping.get("metadata").and_then(Yaml::as_mapping) {
        for (k, v) in metadata {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                def.metadata.insert(k.to_string(), v.to_string());
            }
        }
    }

    if let Some(props) = mapping.get("properties").and_then(Yaml::as_mapping) {
        def.properties = parse_property_defs(props, &format!("{}.properties", path), file, diagnostics);
    }
    if let Some(attrs) = mapping.get("attributes").and_then(Yaml::as_mapping) {
        def.attributes = parse_property_defs(attrs, &format!("{}.attributes", path), file, diagnostics);
    }
    if let Some(caps) = mapping.get("capabilities").and_then(Yaml::as_mapping) {
        def.capabilities = parse_capability_defs(caps, &format!("{}.capabilities", path), file, diagnostics);
    }
    if let Some(reqs) = mapping.get("requirements").and_then(Yaml::as_sequence) {
        def.requirements = parse_requirement_defs(reqs, &format!("{}.requirements", path), file, diagnostics);
    }
    if let Some(ifaces) = mapping.get("interfaces").and_then(Yaml::as_mapping) {
        def.interfaces = parse_interface_defs(ifaces);
    }

    Ok(def)
}

fn parse_property_defs(
    mapping: &serde_yaml::Mapping,
    path: &str,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> BTreeMap<String, PropertyDef> {
    let mut out = BTreeMap::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        match parse_property_def(name, body) {
            Ok(def) => {
                out.insert(name.to_string(), def);
            }
            Err(err) => diagnostics.error(err, SourceLocation::new(file, format!("{}.{}", path, name))),
        }
    }
    out
}

fn parse_property_def(name: &str, body: &Yaml) -> Result<PropertyDef, DiagnosticKind> {
    let mapping = body.as_mapping().ok_or_else(|| DiagnosticKind::SchemaError {
        message: format!("property `{}` body must be a mapping", name),
    })?;
    let type_name = mapping
        .get("type")
        .and_then(Yaml::as_str)
        .ok_or_else(|| DiagnosticKind::SchemaError {
            message: format!("property `{}` is missing `type`", name),
        })?;

    let mut def = PropertyDef::new(name, type_name);
    if let Some(required) = mapping.get("required").and_then(Yaml::as_bool) {
        def.required = required;
    }
    if let Some(default) = mapping.get("default") {
        def.default = Some(value_from_yaml(default, type_name)?);
        def.required = false;
    }
    if let Some(constraints) = mapping.get("constraints").and_then(Yaml::as_sequence) {
        def.constraints = parse_constraints(constraints, type_name)?;
    }
    if let Some(status) = mapping.get("status").and_then(Yaml::as_str) {
        def.status = match status {
            "supported" => PropertyStatus::Supported,
            "experimental" => PropertyStatus::Experimental,
            "deprecated" => PropertyStatus::Deprecated,
            _ => PropertyStatus::Supported,
        };
    }
    if let Some(entry_schema) = mapping.get("entry_schema") {
        let entry_type = entry_schema
            .as_str()
            .or_else(|| entry_schema.get("type").and_then(Yaml::as_str))
            .unwrap_or("string");
        def.entry_schema = Some(Box::new(PropertyDef::new(format!("{}.entry", name), entry_type)));
    }
    Ok(def)
}

fn parse_capability_defs(
    mapping: &serde_yaml::Mapping,
    path: &str,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> BTreeMap<String, CapabilityDef> {
    let mut out = BTreeMap::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        match parse_capability_def(name, body, diagnostics, file, path) {
            Ok(def) => {
                out.insert(name.to_string(), def);
            }
            Err(err) => diagnostics.error(err, SourceLocation::new(file, format!("{}.{}", path, name))),
        }
    }
    out
}

fn parse_capability_def(
    name: &str,
    body: &Yaml,
    diagnostics: &mut DiagnosticSink,
    file: &str,
    path: &str,
) -> Result<CapabilityDef, DiagnosticKind> {
    let mapping = body.as_mapping().ok_or_else(|| DiagnosticKind::SchemaError {
        message: format!("capability `{}` body must be a mapping", name),
    })?;
    let type_name = mapping
        .get("type")
        .and_then(Yaml::as_str)
        .ok_or_else(|| DiagnosticKind::SchemaError {
            message: format!("capability `{}` is missing `type`", name),
        })?;
    let mut def = CapabilityDef::new(name, type_name);
    if let Some(props) = mapping.get("properties").and_then(Yaml::as_mapping) {
        def.properties = parse_property_defs(props, &format!("{}.{}.properties", path, name), file, diagnostics);
    }
    if let Some(occurrences) = mapping.get("occurrences") {
        def.occurrences = parse_occurrences(occurrences)?;
    }
    if let Some(vst) = mapping.get("valid_source_types").and_then(Yaml::as_sequence) {
        def.valid_source_types = vst
            .iter()
            .filter_map(Yaml::as_str)
            .map(QualifiedName::new)
            .collect();
    }
    Ok(def)
}

fn parse_requirement_defs(
    sequence: &[Yaml],
    path: &str,
    file: &str,
    diagnostics: &mut DiagnosticSink,
) -> Vec<RequirementDef> {
    let mut out = Vec::new();
    for (i, entry) in sequence.iter().enumerate() {
        let Some(mapping) = entry.as_mapping() else { continue };
        let Some((key, body)) = mapping.iter().next() else { continue };
        let Some(name) = key.as_str() else { continue };
        match parse_requirement_def(name, body) {
            Ok(def) => out.push(def),
            Err(err) => diagnostics.error(err, SourceLocation::new(file, format!("{}[{}]", path, i))),
        }
    }
    out
}

fn parse_requirement_def(name: &str, body: &Yaml) -> Result<RequirementDef, DiagnosticKind> {
    let capability = body
        .get("capability")
        .and_then(Yaml::as_str)
        .unwrap_or("tosca.capabilities.Node");
    let mut def = RequirementDef::new(name, capability);
    if let Some(node) = body.get("node").and_then(Yaml::as_str) {
        def.node = Some(QualifiedName::new(node));
    }
    if let Some(rel) = body.get("relationship").and_then(Yaml::as_str) {
        def.relationship = Some(QualifiedName::new(rel));
    }
    if let Some(occurrences) = body.get("occurrences") {
        def.occurrences = parse_occurrences(occurrences)?;
    }
    Ok(def)
}

fn parse_occurrences(raw: &Yaml) -> Result<Occurrences, DiagnosticKind> {
    let items = raw.as_sequence().ok_or_else(|| DiagnosticKind::SchemaError {
        message: "occurrences must be a [min, max] sequence".into(),
    })?;
    if items.len() != 2 {
        return Err(DiagnosticKind::SchemaError {
            message: "occurrences must have exactly two entries".into(),
        });
    }
    let min = items[0].as_u64().unwrap_or(0);
    let max = if items[1].as_str() == Some("UNBOUNDED") {
        None
    } else {
        items[1].as_u64()
    };
    Ok(Occurrences { min, max })
}

fn parse_interface_defs(mapping: &serde_yaml::Mapping) -> BTreeMap<String, InterfaceDef> {
    let mut out = BTreeMap::new();
    for (key, body) in mapping {
        let Some(name) = key.as_str() else { continue };
        let interface_type = body
            .get("type")
            .and_then(Yaml::as_str)
            .unwrap_or("tosca.interfaces.node.lifecycle.Standard");
        let mut def = InterfaceDef {
            interface_type: QualifiedName::new(interface_type),
            inputs: BTreeMap::new(),
            operations: BTreeMap::new(),
        };
        if let Some(operations) = body.as_mapping() {
            for (op_key, op_body) in operations {
                let Some(op_name) = op_key.as_str() else { continue };
                if matches!(op_name, "type" | "inputs") {
                    continue;
                }
                def.operations.insert(op_name.to_string(), parse_operation_def(op_body));
            }
        }
        out.insert(name.to_string(), def);
    }
    out
}

fn parse_operation_def(body: &Yaml) -> OperationDef {
    let mut op = OperationDef::default();
    match body {
        Yaml::String(s) => op.implementation = Some(s.clone()),
        Yaml::Mapping(_) => {
            if let Some(implementation) = body.get("implementation").and_then(Yaml::as_str) {
                op.implementation = Some(implementation.to_string());
            }
        }
        _ => {}
    }
    op
}

/// Parse a `node_filter:` block (§4.D step 4) into its matcher list. The
/// constraint clauses themselves are kept as raw YAML here and only
/// type-directed (against the matching candidate's own declared property
/// type) once a candidate is on the table — see `NodeFilterMatcher`.
pub fn parse_node_filter(raw: &Yaml) -> Result<NodeFilter, DiagnosticKind> {
    let mut matchers = Vec::new();
    if let Some(properties) = raw.get("properties").and_then(Yaml::as_mapping) {
        for (key, body) in properties {
            let Some(name) = key.as_str() else { continue };
            let clauses = body.as_sequence().ok_or_else(|| DiagnosticKind::SchemaError {
                message: format!("node_filter.properties.{} must be a constraint list", name),
            })?;
            matchers.push(NodeFilterMatcher::Property {
                name: name.to_string(),
                clauses: clauses.clone(),
            });
        }
    }
    if let Some(capabilities) = raw.get("capabilities").and_then(Yaml::as_mapping) {
        for (cap_key, cap_body) in capabilities {
            let Some(cap_name) = cap_key.as_str() else { continue };
            let Some(properties) = cap_body.get("properties").and_then(Yaml::as_mapping) else {
                continue;
            };
            for (prop_key, prop_body) in properties {
                let Some(prop_name) = prop_key.as_str() else { continue };
                let clauses = prop_body.as_sequence().ok_or_else(|| DiagnosticKind::SchemaError {
                    message: format!("node_filter.capabilities.{}.{} must be a constraint list", cap_name, prop_name),
                })?;
                matchers.push(NodeFilterMatcher::Capability {
                    name: cap_name.to_string(),
                    property: prop_name.to_string(),
                    clauses: clauses.clone(),
                });
            }
        }
    }
    Ok(NodeFilter { matchers })
}
