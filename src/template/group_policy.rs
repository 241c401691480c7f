//! Groups / policies validation (§4.D "Groups / policies"): members/targets
//! must be declared node names, and the group/policy type must derive from
//! the matching normative root.

use std::collections::HashMap;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::registry::{QualifiedName, TypeKind, TypeRegistry};

use super::node::{GroupTemplate, NodeId, PolicyTemplate};

pub fn validate_groups(
    groups: &[GroupTemplate],
    name_index: &HashMap<String, NodeId>,
    registry: &TypeRegistry,
    diagnostics: &mut DiagnosticSink,
) {
    let root = QualifiedName::new("tosca.groups.Root");
    for group in groups {
        if !registry.derives_from(TypeKind::Group, &group.type_name, &root) {
            diagnostics.error(
                DiagnosticKind::IncompatibleDerivationError {
                    child: group.type_name.to_string(),
                    parent: root.to_string(),
                    message: format!("group `{}` type does not derive from `{}`", group.name, root),
                },
                group.source.clone(),
            );
        }
        for member in &group.members {
            if !name_index.contains_key(member) {
                diagnostics.error(
                    DiagnosticKind::UnknownFieldError {
                        on: group.name.clone(),
                        field: member.clone(),
                    },
                    group.source.clone(),
                );
            }
        }
    }
}

pub fn validate_policies(
    policies: &[PolicyTemplate],
    name_index: &HashMap<String, NodeId>,
    registry: &TypeRegistry,
    diagnostics: &mut DiagnosticSink,
) {
    let root = QualifiedName::new("tosca.policies.Root");
    for policy in policies {
        if !registry.derives_from(TypeKind::Policy, &policy.type_name, &root) {
            diagnostics.error(
                DiagnosticKind::IncompatibleDerivationError {
                    child: policy.type_name.to_string(),
                    parent: root.to_string(),
                    message: format!("policy `{}` type does not derive from `{}`", policy.name, root),
                },
                policy.source.clone(),
            );
        }
        for target in &policy.targets {
            if !name_index.contains_key(target) {
                diagnostics.error(
                    DiagnosticKind::UnknownFieldError {
                        on: policy.name.clone(),
                        field: target.clone(),
                    },
                    policy.source.clone(),
                );
            }
        }
    }
}
