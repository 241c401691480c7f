//! Seed tables for TOSCA's normative type system (§4.B step 1).
//!
//! Only the subset of the normative profile exercised by the end-to-end
//! scenarios (§8) and needed to make a realistic template validate is
//! modeled here: `tosca.nodes.Root` down through `Compute`,
//! `SoftwareComponent`, `DBMS`, `Database`, `Storage.BlockStorage` (plus its
//! pre-1.1 deprecated alias `tosca.nodes.BlockStorage`), and the matching
//! relationship/capability roots.

use super::{
    CapabilityDef, Occurrences, PropertyDef, QualifiedName, RequirementDef, ToscaVersion, TypeDefinition,
    TypeKind,
};
use crate::value::Value;

pub fn normative_types_for(version: &ToscaVersion) -> Vec<TypeDefinition> {
    let mut defs = Vec::new();
    defs.extend(capability_types());
    defs.extend(relationship_types());
    defs.extend(node_types(version));
    defs.extend(group_and_policy_roots());
    defs
}

fn capability_types() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Root"),
        TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Node")
            .derive_from("tosca.capabilities.Root"),
        TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Container")
            .derive_from("tosca.capabilities.Root"),
        {
            let mut endpoint = TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Endpoint")
                .derive_from("tosca.capabilities.Root");
            endpoint
                .properties
                .insert("protocol".into(), PropertyDef::new("protocol", "string").with_default(Value::String("tcp".into())));
            endpoint
                .properties
                .insert("port".into(), PropertyDef::new("port", "integer").optional());
            endpoint
        },
        TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Storage")
            .derive_from("tosca.capabilities.Root"),
        TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Attachment")
            .derive_from("tosca.capabilities.Root"),
        {
            let mut os = TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.OperatingSystem")
                .derive_from("tosca.capabilities.Root");
            os.properties
                .insert("type".into(), PropertyDef::new("type", "string").optional());
            os
        },
        {
            let mut scalable = TypeDefinition::new(TypeKind::Capability, "tosca.capabilities.Scalable")
                .derive_from("tosca.capabilities.Root");
            scalable.properties.insert(
                "min_instances".into(),
                PropertyDef::new("min_instances", "integer").with_default(Value::Int(1)),
            );
            scalable.properties.insert(
                "max_instances".into(),
                PropertyDef::new("max_instances", "integer").with_default(Value::Int(1)),
            );
            scalable
        },
    ]
}

fn relationship_types() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new(TypeKind::Relationship, "tosca.relationships.Root"),
        TypeDefinition::new(TypeKind::Relationship, "tosca.relationships.DependsOn")
            .derive_from("tosca.relationships.Root"),
        TypeDefinition::new(TypeKind::Relationship, "tosca.relationships.HostedOn")
            .derive_from("tosca.relationships.Root"),
        TypeDefinition::new(TypeKind::Relationship, "tosca.relationships.ConnectsTo")
            .derive_from("tosca.relationships.Root"),
        TypeDefinition::new(TypeKind::Relationship, "tosca.relationships.AttachesTo")
            .derive_from("tosca.relationships.Root"),
    ]
}

fn root_capability(name: &str, type_name: &str) -> CapabilityDef {
    CapabilityDef::new(name, type_name)
}

fn root_requirement(name: &str, capability: &str, relationship: &str) -> RequirementDef {
    let mut req = RequirementDef::new(name, capability);
    req.relationship = Some(QualifiedName::new(relationship));
    req
}

fn node_types(version: &ToscaVersion) -> Vec<TypeDefinition> {
    let mut root = TypeDefinition::new(TypeKind::Node, "tosca.nodes.Root");
    root.capabilities
        .insert("feature".into(), root_capability("feature", "tosca.capabilities.Node"));
    root.requirements
        .push(root_requirement("dependency", "tosca.capabilities.Node", "tosca.relationships.DependsOn"));
    {
        let req = root.requirements.last_mut().unwrap();
        req.occurrences = Occurrences { min: 0, max: None };
    }

    let mut compute = TypeDefinition::new(TypeKind::Node, "tosca.nodes.Compute")
        .derive_from("tosca.nodes.Root");
    compute.capabilities.insert("host".into(), root_capability("host", "tosca.capabilities.Container"));
    compute
        .capabilities
        .insert("os".into(), root_capability("os", "tosca.capabilities.OperatingSystem"));
    compute.capabilities.insert(
        "scalable".into(),
        root_capability("scalable", "tosca.capabilities.Scalable"),
    );
    compute.capabilities.insert(
        "binding".into(),
        root_capability("binding", "tosca.capabilities.Endpoint"),
    );
    compute.properties.insert(
        "num_cpus".into(),
        PropertyDef::new("num_cpus", "integer").optional(),
    );
    compute.properties.insert(
        "mem_size".into(),
        PropertyDef::new("mem_size", "scalar-unit.size").optional(),
    );
    compute.properties.insert(
        "disk_size".into(),
        PropertyDef::new("disk_size", "scalar-unit.size").optional(),
    );

    let mut software = TypeDefinition::new(TypeKind::Node, "tosca.nodes.SoftwareComponent")
        .derive_from("tosca.nodes.Root");
    software
        .requirements
        .push(root_requirement("host", "tosca.capabilities.Container", "tosca.relationships.HostedOn"));
    {
        let req = software.requirements.last_mut().unwrap();
        req.occurrences = Occurrences::exact(1);
    }

    let mut dbms = TypeDefinition::new(TypeKind::Node, "tosca.nodes.DBMS")
        .derive_from("tosca.nodes.SoftwareComponent");
    dbms.capabilities
        .insert("host".into(), root_capability("host", "tosca.capabilities.Container"));

    let mut database = TypeDefinition::new(TypeKind::Node, "tosca.nodes.Database")
        .derive_from("tosca.nodes.Root");
    database
        .requirements
        .push(root_requirement("host", "tosca.capabilities.Container", "tosca.relationships.HostedOn"));
    {
        let req = database.requirements.last_mut().unwrap();
        req.occurrences = Occurrences::exact(1);
    }
    database.properties.insert(
        "name".into(),
        PropertyDef::new("name", "string").optional(),
    );

    let mut storage_block = TypeDefinition::new(TypeKind::Node, "tosca.nodes.Storage.BlockStorage")
        .derive_from("tosca.nodes.Root");
    storage_block.properties.insert(
        "size".into(),
        PropertyDef::new("size", "scalar-unit.size"),
    );
    storage_block.capabilities.insert(
        "attachment".into(),
        root_capability("attachment", "tosca.capabilities.Attachment"),
    );

    let mut defs = vec![root, compute, software, dbms, database, storage_block];

    // §9 decided open question: the pre-1.1 `tosca.nodes.BlockStorage` name
    // is kept registered as a deprecated alias regardless of the selected
    // version, rather than gated to only pre-1.1 documents — callers still
    // get the `deprecated`-tagged warning (end-to-end scenario 6) without
    // the engine needing to special-case version ranges.
    let _ = version;
    let mut alias = TypeDefinition::new(TypeKind::Node, "tosca.nodes.BlockStorage")
        .derive_from("tosca.nodes.Storage.BlockStorage");
    alias.metadata.insert("alias".into(), "true".into());
    defs.push(alias);

    defs
}

fn group_and_policy_roots() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new(TypeKind::Group, "tosca.groups.Root"),
        TypeDefinition::new(TypeKind::Policy, "tosca.policies.Root"),
        TypeDefinition::new(TypeKind::Policy, "tosca.policies.Placement")
            .derive_from("tosca.policies.Root"),
        TypeDefinition::new(TypeKind::Policy, "tosca.policies.Scaling")
            .derive_from("tosca.policies.Root"),
        TypeDefinition::new(TypeKind::Policy, "tosca.policies.Update")
            .derive_from("tosca.policies.Root"),
        TypeDefinition::new(TypeKind::Artifact, "tosca.artifacts.Root"),
        TypeDefinition::new(TypeKind::Artifact, "tosca.artifacts.File")
            .derive_from("tosca.artifacts.Root"),
        TypeDefinition::new(TypeKind::Artifact, "tosca.artifacts.Deployment")
            .derive_from("tosca.artifacts.Root"),
        TypeDefinition::new(TypeKind::Artifact, "tosca.artifacts.Implementation")
            .derive_from("tosca.artifacts.Root"),
        TypeDefinition::new(TypeKind::Interface, "tosca.interfaces.node.lifecycle.Standard"),
        TypeDefinition::new(TypeKind::Interface, "tosca.interfaces.relationship.Configure"),
        TypeDefinition::new(TypeKind::Data, "string"),
        TypeDefinition::new(TypeKind::Data, "integer"),
        TypeDefinition::new(TypeKind::Data, "float"),
        TypeDefinition::new(TypeKind::Data, "boolean"),
        TypeDefinition::new(TypeKind::Data, "timestamp"),
        TypeDefinition::new(TypeKind::Data, "version"),
        TypeDefinition::new(TypeKind::Data, "range"),
        TypeDefinition::new(TypeKind::Data, "scalar-unit.size"),
        TypeDefinition::new(TypeKind::Data, "scalar-unit.time"),
        TypeDefinition::new(TypeKind::Data, "scalar-unit.frequency"),
        TypeDefinition::new(TypeKind::Data, "scalar-unit.bitrate"),
    ]
}
