//! Type flattening (§4.B): walk a `derived_from` chain from `tosca.*.Root`
//! down to the leaf type and merge each level's properties, attributes,
//! capabilities, requirements, and interfaces, enforcing the override rules
//! (property narrowing, capability occurrence tightening, requirement
//! position-addressing, interface operation override) along the way.

use std::collections::BTreeMap;

use crate::diagnostics::DiagnosticKind;

use super::{
    CapabilityDef, InterfaceDef, OperationDef, PropertyDef, QualifiedName, RequirementDef, TypeDefinition,
    TypeKind, TypeRegistry,
};

/// The fully-merged shape of a type, as used by the elaborator (component D)
/// to validate node-template bodies and by the evaluator to resolve
/// `get_property`/`get_attribute` paths. Requirements keep their declaration
/// order across the whole chain (root-first) so position-addressing
/// (`requirements[2]` / the nth occurrence of a repeated name) is stable.
#[derive(Debug, Clone)]
pub struct FlattenedView {
    pub type_name: QualifiedName,
    pub kind: TypeKind,
    pub properties: BTreeMap<String, PropertyDef>,
    pub attributes: BTreeMap<String, PropertyDef>,
    pub capabilities: BTreeMap<String, CapabilityDef>,
    pub requirements: Vec<RequirementDef>,
    pub interfaces: BTreeMap<String, InterfaceDef>,
}

impl FlattenedView {
    /// Locate a requirement definition by position, honoring the
    /// position-addressing override rule: a later declaration of the same
    /// name in the chain replaces the earlier one in place rather than
    /// appending a duplicate slot.
    pub fn requirement_index(&self, name: &str) -> Option<usize> {
        self.requirements.iter().position(|r| r.name == name)
    }

    pub fn requirement(&self, name: &str) -> Option<&RequirementDef> {
        self.requirements.iter().find(|r| r.name == name)
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityDef> {
        self.capabilities.get(name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.get(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&PropertyDef> {
        self.attributes.get(name)
    }
}

/// Collect `root -> ... -> leaf` ordered ancestry, erroring on a missing
/// parent (cycles are caught earlier by `validate_derivation`, so this only
/// needs a visited guard as a backstop).
fn chain<'a>(
    registry: &'a TypeRegistry,
    kind: TypeKind,
    name: &QualifiedName,
) -> Result<Vec<&'a TypeDefinition>, DiagnosticKind> {
    let mut stack = Vec::new();
    let mut current = registry.get(kind, name).ok_or_else(|| DiagnosticKind::UnknownTypeError {
        name: name.to_string(),
    })?;
    stack.push(current);
    let mut guard = 0;
    while let Some(parent_name) = &current.derived_from {
        guard += 1;
        if guard > 256 {
            break; // cycle; reported by validate_derivation, avoid infinite loop here
        }
        current = registry
            .get(kind, parent_name)
            .ok_or_else(|| DiagnosticKind::UnknownTypeError {
                name: parent_name.to_string(),
            })?;
        stack.push(current);
    }
    stack.reverse();
    Ok(stack)
}

pub(super) fn compute(
    registry: &TypeRegistry,
    kind: TypeKind,
    name: &QualifiedName,
) -> Result<FlattenedView, DiagnosticKind> {
    let ancestry = chain(registry, kind, name)?;

    let mut view = FlattenedView {
        type_name: name.clone(),
        kind,
        properties: BTreeMap::new(),
        attributes: BTreeMap::new(),
        capabilities: BTreeMap::new(),
        requirements: Vec::new(),
        interfaces: BTreeMap::new(),
    };

    for def in ancestry {
        merge_properties(registry, &mut view.properties, &def.properties, &def.name)?;
        merge_properties(registry, &mut view.attributes, &def.attributes, &def.name)?;
        merge_capabilities(registry, &mut view.capabilities, &def.capabilities, &def.name)?;
        merge_requirements(&mut view.requirements, &def.requirements);
        merge_interfaces(&mut view.interfaces, &def.interfaces);
    }

    Ok(view)
}

/// A child property/attribute definition may narrow (add constraints, add a
/// default, or flip `required: true` to `false`) but may only change the
/// declared `type_name` when the new type derives from the parent's (§4.B:
/// "child may narrow `type` only if the new type derives from the parent's").
/// Anything else — an unrelated type swap — is rejected as an
/// `IncompatibleDerivationError`; a valid narrowing, or no type change at
/// all, is accepted and the child entry replaces the parent's.
fn merge_properties(
    registry: &TypeRegistry,
    target: &mut BTreeMap<String, PropertyDef>,
    incoming: &BTreeMap<String, PropertyDef>,
    owner: &QualifiedName,
) -> Result<(), DiagnosticKind> {
    for (key, child_def) in incoming {
        if let Some(parent_def) = target.get(key) {
            if parent_def.type_name != child_def.type_name
                && !registry.derives_from(TypeKind::Data, &child_def.type_name, &parent_def.type_name)
            {
                return Err(DiagnosticKind::IncompatibleDerivationError {
                    child: owner.to_string(),
                    parent: parent_def.type_name.to_string(),
                    message: format!(
                        "property `{}` redeclared with incompatible type `{}` (expected `{}` or a type deriving from it)",
                        key, child_def.type_name, parent_def.type_name
                    ),
                });
            }
            let mut merged = child_def.clone();
            if merged.constraints.is_empty() && !parent_def.constraints.is_empty() {
                merged.constraints = parent_def.constraints.clone();
            }
            target.insert(key.clone(), merged);
        } else {
            target.insert(key.clone(), child_def.clone());
        }
    }
    Ok(())
}

/// A child capability may narrow its own `type_name` (to a capability type
/// deriving from the parent's), tighten `occurrences` within the parent's
/// bounds, and narrow `valid_source_types`; an unrelated `type_name` swap is
/// an `IncompatibleDerivationError` (§4.B: "child may narrow `type`... child
/// may... tighten `occurrences`... cannot remove").
fn merge_capabilities(
    registry: &TypeRegistry,
    target: &mut BTreeMap<String, CapabilityDef>,
    incoming: &BTreeMap<String, CapabilityDef>,
    owner: &QualifiedName,
) -> Result<(), DiagnosticKind> {
    for (key, child_def) in incoming {
        if let Some(parent_def) = target.get(key) {
            if child_def.type_name != parent_def.type_name
                && !registry.derives_from(TypeKind::Capability, &child_def.type_name, &parent_def.type_name)
            {
                return Err(DiagnosticKind::IncompatibleDerivationError {
                    child: owner.to_string(),
                    parent: parent_def.type_name.to_string(),
                    message: format!(
                        "capability `{}` redeclared with incompatible type `{}` (expected `{}` or a type deriving from it)",
                        key, child_def.type_name, parent_def.type_name
                    ),
                });
            }
            if !child_def.occurrences.is_within(&parent_def.occurrences) {
                return Err(DiagnosticKind::IncompatibleDerivationError {
                    child: owner.to_string(),
                    parent: parent_def.type_name.to_string(),
                    message: format!(
                        "capability `{}` widens occurrences to [{}, {}], outside parent's [{}, {}]",
                        key,
                        child_def.occurrences.min,
                        child_def.occurrences.max_label(),
                        parent_def.occurrences.min,
                        parent_def.occurrences.max_label(),
                    ),
                });
            }
            let mut merged = child_def.clone();
            for (pname, pdef) in &parent_def.properties {
                merged.properties.entry(pname.clone()).or_insert_with(|| pdef.clone());
            }
            target.insert(key.clone(), merged);
        } else {
            target.insert(key.clone(), child_def.clone());
        }
    }
    Ok(())
}

/// Requirements are position-addressable (§4.D step 3): a child requirement
/// sharing a name with a parent requirement replaces it *in place*,
/// preserving the parent's position in the flattened list; a new name is
/// appended.
fn merge_requirements(target: &mut Vec<RequirementDef>, incoming: &[RequirementDef]) {
    for child in incoming {
        if let Some(slot) = target.iter().position(|r| r.name == child.name) {
            target[slot] = child.clone();
        } else {
            target.push(child.clone());
        }
    }
}

/// A child interface may override individual operations (replacing their
/// `implementation`) without redeclaring the whole interface.
fn merge_interfaces(target: &mut BTreeMap<String, InterfaceDef>, incoming: &BTreeMap<String, InterfaceDef>) {
    for (key, child_def) in incoming {
        match target.get_mut(key) {
            Some(existing) => {
                for (op_name, op) in &child_def.operations {
                    merge_operation(existing.operations.entry(op_name.clone()).or_default(), op);
                }
                for (input_name, input_def) in &child_def.inputs {
                    existing.inputs.insert(input_name.clone(), input_def.clone());
                }
            }
            None => {
                target.insert(key.clone(), child_def.clone());
            }
        }
    }
}

fn merge_operation(existing: &mut OperationDef, incoming: &OperationDef) {
    if incoming.implementation.is_some() {
        existing.implementation = incoming.implementation.clone();
    }
    for (name, def) in &incoming.inputs {
        existing.inputs.insert(name.clone(), def.clone());
    }
    for (name, def) in &incoming.outputs {
        existing.outputs.insert(name.clone(), def.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Occurrences, ToscaVersion};
    use crate::diagnostics::DiagnosticSink;
    use std::collections::HashMap;

    fn registry() -> TypeRegistry {
        let mut sink = DiagnosticSink::new(false);
        TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink)
    }

    #[test]
    fn compute_flattens_compute_with_inherited_capabilities() {
        let registry = registry();
        let view = compute(&registry, TypeKind::Node, &QualifiedName::new("tosca.nodes.Compute")).unwrap();
        assert!(view.capability("feature").is_some(), "inherited from tosca.nodes.Root");
        assert!(view.capability("host").is_some(), "declared on Compute itself");
        let dependency = view.requirement("dependency").unwrap();
        assert_eq!(dependency.occurrences, Occurrences { min: 0, max: None });
    }

    #[test]
    fn flattened_view_is_memoized_by_registry() {
        let registry = registry();
        let a = registry.flattened(TypeKind::Node, &QualifiedName::new("tosca.nodes.Compute")).unwrap();
        let b = registry.flattened(TypeKind::Node, &QualifiedName::new("tosca.nodes.Compute")).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn database_requirement_position_is_stable() {
        let registry = registry();
        let view = compute(&registry, TypeKind::Node, &QualifiedName::new("tosca.nodes.Database")).unwrap();
        assert_eq!(view.requirement_index("host"), Some(1));
    }
}
