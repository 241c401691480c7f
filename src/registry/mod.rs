//! Type registry (component B, §4.B): normative seeding, user-type
//! registration, `derived_from` cycle detection, and flattened-view lookup.

mod flatten;
mod normative;
mod parse;

pub use flatten::FlattenedView;
pub use parse::{parse_node_filter, parse_type_section};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::scalar::Constraint;
use crate::value::Value;

/// Dotted identifier, e.g. `tosca.nodes.Compute`. Case-sensitive (§9 open
/// question, resolved: no implicit case folding; aliases are the supported
/// mechanism for historical names).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName(pub String);

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        QualifiedName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        QualifiedName(s.to_string())
    }
}

impl From<String> for QualifiedName {
    fn from(s: String) -> Self {
        QualifiedName(s)
    }
}

/// The supported `tosca_definitions_version` selectors (§6), plus an open
/// slot for registered profile extensions (NFV/MEC, §9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToscaVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    Profile(String),
}

impl ToscaVersion {
    pub fn parse(selector: &str) -> Option<Self> {
        match selector {
            "tosca_simple_yaml_1_0" => Some(ToscaVersion::V1_0),
            "tosca_simple_yaml_1_1" => Some(ToscaVersion::V1_1),
            "tosca_simple_yaml_1_2" => Some(ToscaVersion::V1_2),
            "tosca_simple_yaml_1_3" => Some(ToscaVersion::V1_3),
            other => Some(ToscaVersion::Profile(other.to_string())),
        }
    }
}

impl fmt::Display for ToscaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToscaVersion::V1_0 => write!(f, "tosca_simple_yaml_1_0"),
            ToscaVersion::V1_1 => write!(f, "tosca_simple_yaml_1_1"),
            ToscaVersion::V1_2 => write!(f, "tosca_simple_yaml_1_2"),
            ToscaVersion::V1_3 => write!(f, "tosca_simple_yaml_1_3"),
            ToscaVersion::Profile(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Node,
    Relationship,
    Capability,
    Data,
    Interface,
    Artifact,
    Policy,
    Group,
}

/// `[min, max]` multiplicity on a capability or requirement. `max: None`
/// means `UNBOUNDED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrences {
    pub min: u64,
    pub max: Option<u64>,
}

impl Default for Occurrences {
    fn default() -> Self {
        Occurrences { min: 1, max: None }
    }
}

impl Occurrences {
    pub fn exact(n: u64) -> Self {
        Occurrences { min: n, max: Some(n) }
    }

    pub fn contains(&self, count: u64) -> bool {
        count >= self.min && self.max.map(|m| count <= m).unwrap_or(true)
    }

    pub fn max_label(&self) -> String {
        self.max.map(|m| m.to_string()).unwrap_or_else(|| "UNBOUNDED".into())
    }

    /// A child requirement/capability may tighten occurrences within the
    /// parent's bounds (§4.B override rules) but never widen them.
    pub fn is_within(&self, parent: &Occurrences) -> bool {
        self.min >= parent.min
            && match (self.max, parent.max) {
                (Some(c), Some(p)) => c <= p,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => true,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStatus {
    Supported,
    Experimental,
    Deprecated,
}

impl Default for PropertyStatus {
    fn default() -> Self {
        PropertyStatus::Supported
    }
}

/// A property or attribute definition. The spec describes these with an
/// identical shape (§3), so one struct serves both roles.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub type_name: QualifiedName,
    pub required: bool,
    pub default: Option<Value>,
    pub constraints: Vec<Constraint>,
    pub entry_schema: Option<Box<PropertyDef>>,
    pub status: PropertyStatus,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<QualifiedName>) -> Self {
        PropertyDef {
            name: name.into(),
            type_name: type_name.into(),
            required: true,
            default: None,
            constraints: Vec::new(),
            entry_schema: None,
            status: PropertyStatus::Supported,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityDef {
    pub name: String,
    pub type_name: QualifiedName,
    pub properties: BTreeMap<String, PropertyDef>,
    pub attributes: BTreeMap<String, PropertyDef>,
    pub valid_source_types: Vec<QualifiedName>,
    pub occurrences: Occurrences,
}

impl CapabilityDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<QualifiedName>) -> Self {
        CapabilityDef {
            name: name.into(),
            type_name: type_name.into(),
            properties: BTreeMap::new(),
            attributes: BTreeMap::new(),
            valid_source_types: Vec::new(),
            occurrences: Occurrences::default(),
        }
    }
}

/// A property/capability matcher used by `node_filter` (§4.D step 4).
///
/// The constraint clauses are kept as raw YAML rather than pre-compiled
/// `Constraint`s: a `node_filter` is written on the *requirement*, before
/// any candidate node is known, so there is no single declared property
/// type to compile the clause's operands against yet (a `num_cpus` filter
/// might match a `Compute` candidate's plain `integer` property while a
/// `mem_size` filter needs `scalar-unit.size`). Matching re-parses the
/// clauses against each candidate's own flattened property/capability
/// schema (see `matches_filter` in `crate::template::requirement`).
#[derive(Debug, Clone)]
pub enum NodeFilterMatcher {
    Property { name: String, clauses: Vec<serde_yaml::Value> },
    Capability {
        name: String,
        property: String,
        clauses: Vec<serde_yaml::Value>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub matchers: Vec<NodeFilterMatcher>,
}

#[derive(Debug, Clone)]
pub struct RequirementDef {
    pub name: String,
    pub capability: QualifiedName,
    pub node: Option<QualifiedName>,
    pub relationship: Option<QualifiedName>,
    pub occurrences: Occurrences,
    pub node_filter: Option<NodeFilter>,
}

impl RequirementDef {
    pub fn new(name: impl Into<String>, capability: impl Into<QualifiedName>) -> Self {
        RequirementDef {
            name: name.into(),
            capability: capability.into(),
            node: None,
            relationship: None,
            occurrences: Occurrences::exact(1),
            node_filter: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationDef {
    pub implementation: Option<String>,
    pub inputs: BTreeMap<String, PropertyDef>,
    pub outputs: BTreeMap<String, PropertyDef>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub interface_type: QualifiedName,
    pub inputs: BTreeMap<String, PropertyDef>,
    pub operations: BTreeMap<String, OperationDef>,
}

/// A registered type definition, immutable once inserted (§3 Lifecycle).
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub kind: TypeKind,
    pub name: QualifiedName,
    pub derived_from: Option<QualifiedName>,
    pub properties: BTreeMap<String, PropertyDef>,
    pub attributes: BTreeMap<String, PropertyDef>,
    pub capabilities: BTreeMap<String, CapabilityDef>,
    pub requirements: Vec<RequirementDef>,
    pub interfaces: BTreeMap<String, InterfaceDef>,
    pub metadata: BTreeMap<String, String>,
    pub description: Option<String>,
}

impl TypeDefinition {
    pub fn new(kind: TypeKind, name: impl Into<QualifiedName>) -> Self {
        TypeDefinition {
            kind,
            name: name.into(),
            derived_from: None,
            properties: BTreeMap::new(),
            attributes: BTreeMap::new(),
            capabilities: BTreeMap::new(),
            requirements: Vec::new(),
            interfaces: BTreeMap::new(),
            metadata: BTreeMap::new(),
            description: None,
        }
    }

    pub fn derive_from(mut self, parent: impl Into<QualifiedName>) -> Self {
        self.derived_from = Some(parent.into());
        self
    }

    pub fn is_alias(&self) -> bool {
        self.metadata.get("alias").map(|v| v == "true").unwrap_or(false)
    }
}

/// Holds every registered `TypeDefinition`, keyed by `(kind, name)`, plus a
/// memoized flattened-view cache (§4.B.1). The registry exclusively owns
/// `TypeDefinition` values (§3 Ownership) — callers only ever see borrows or
/// cloned `Arc<FlattenedView>`s.
pub struct TypeRegistry {
    version: ToscaVersion,
    types: HashMap<(TypeKind, QualifiedName), TypeDefinition>,
    aliases: HashMap<(TypeKind, QualifiedName), QualifiedName>,
    flattened_cache: DashMap<(TypeKind, QualifiedName), Arc<FlattenedView>>,
}

impl TypeRegistry {
    /// Seed a fresh registry from the normative type tables for `version`
    /// (§4.B step 1). `UnsupportedVersionError` is pushed to `diagnostics`
    /// and the registry returned empty (the caller aborts per §7's fatal
    /// conditions) when the version is not one of the four core selectors
    /// and has not been registered as a profile extension via
    /// `register_profile`.
    pub fn new(
        version: ToscaVersion,
        extra_profiles: &HashMap<String, Vec<TypeDefinition>>,
        diagnostics: &mut DiagnosticSink,
    ) -> Self {
        let mut registry = TypeRegistry {
            version: version.clone(),
            types: HashMap::new(),
            aliases: HashMap::new(),
            flattened_cache: DashMap::new(),
        };

        let seed = match &version {
            ToscaVersion::V1_0 | ToscaVersion::V1_1 | ToscaVersion::V1_2 | ToscaVersion::V1_3 => {
                Some(normative::normative_types_for(&version))
            }
            ToscaVersion::Profile(name) => extra_profiles.get(name).cloned().map(|mut extra| {
                let mut base = normative::normative_types_for(&ToscaVersion::V1_3);
                base.append(&mut extra);
                base
            }),
        };

        match seed {
            Some(defs) => {
                for def in defs {
                    registry.insert_unchecked(def);
                }
            }
            None => {
                diagnostics.error(
                    DiagnosticKind::UnsupportedVersionError {
                        version: version.to_string(),
                    },
                    SourceLocation::new("", "tosca_definitions_version"),
                );
            }
        }

        registry
    }

    pub fn version(&self) -> &ToscaVersion {
        &self.version
    }

    /// Register a user-defined type (§4.B step 2). Duplicate fully-qualified
    /// name is an error unless the new definition is `metadata.alias: true`,
    /// in which case it is merged in as a secondary name for the existing
    /// type rather than replacing it.
    pub fn register(
        &mut self,
        def: TypeDefinition,
        source: SourceLocation,
        diagnostics: &mut DiagnosticSink,
    ) {
        let key = (def.kind, def.name.clone());
        if self.types.contains_key(&key) {
            if def.is_alias() {
                if let Some(parent) = &def.derived_from {
                    self.aliases.insert((def.kind, def.name.clone()), parent.clone());
                }
                return;
            }
            diagnostics.error(
                DiagnosticKind::DuplicateTypeError {
                    name: def.name.to_string(),
                },
                source,
            );
            return;
        }
        self.insert_unchecked(def);
    }

    fn insert_unchecked(&mut self, def: TypeDefinition) {
        if def.is_alias() {
            if let Some(parent) = &def.derived_from {
                self.aliases.insert((def.kind, def.name.clone()), parent.clone());
                return;
            }
        }
        self.types.insert((def.kind, def.name.clone()), def);
    }

    /// Resolve a possibly-aliased name to the canonical registered
    /// definition.
    pub fn get(&self, kind: TypeKind, name: &QualifiedName) -> Option<&TypeDefinition> {
        if let Some(def) = self.types.get(&(kind, name.clone())) {
            return Some(def);
        }
        let canonical = self.aliases.get(&(kind, name.clone()))?;
        self.types.get(&(kind, canonical.clone()))
    }

    pub fn contains(&self, kind: TypeKind, name: &QualifiedName) -> bool {
        self.get(kind, name).is_some()
    }

    /// Whether `name` is registered purely as a deprecated alias (§9
    /// decided open question, end-to-end scenario 6) rather than a
    /// canonical type name.
    pub fn is_alias(&self, kind: TypeKind, name: &QualifiedName) -> bool {
        self.aliases.contains_key(&(kind, name.clone()))
    }

    /// Whether `descendant` derives from (or is equal to) `ancestor`.
    pub fn derives_from(&self, kind: TypeKind, descendant: &QualifiedName, ancestor: &QualifiedName) -> bool {
        if descendant == ancestor {
            return true;
        }
        let mut current = self.get(kind, descendant);
        let mut guard = 0;
        while let Some(def) = current {
            guard += 1;
            if guard > self.types.len() + 1 {
                return false; // cycle already reported elsewhere; don't loop forever
            }
            match &def.derived_from {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = self.get(kind, parent),
                None => return false,
            }
        }
        false
    }

    /// Topologically validate every `derived_from` chain within `kind`
    /// (§4.B step 3), using the same Kahn's-algorithm in-degree walk the
    /// teacher uses for module dependency cycles. Every referenced parent
    /// must also exist (§3 invariant), reported as `UnknownTypeError`.
    pub fn validate_derivation(&self, kind: TypeKind, diagnostics: &mut DiagnosticSink) {
        let names: Vec<&QualifiedName> = self
            .types
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n)
            .collect();

        let mut in_degree: HashMap<&QualifiedName, usize> = HashMap::new();
        let mut adjacency: HashMap<&QualifiedName, Vec<&QualifiedName>> = HashMap::new();
        for name in &names {
            in_degree.entry(name).or_insert(0);
            adjacency.entry(name).or_default();
        }

        for name in &names {
            let def = &self.types[&(kind, (*name).clone())];
            if let Some(parent) = &def.derived_from {
                if self.get(kind, parent).is_none() {
                    diagnostics.error(
                        DiagnosticKind::UnknownTypeError {
                            name: parent.to_string(),
                        },
                        SourceLocation::new("", format!("{}.derived_from", name)),
                    );
                    continue;
                }
                adjacency.entry(parent).or_default().push(name);
                *in_degree.entry(name).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&QualifiedName> =
            in_degree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
        let mut visited: HashSet<&QualifiedName> = HashSet::new();
        while let Some(node) = queue.pop_front() {
            visited.insert(node);
            if let Some(neighbors) = adjacency.get(node) {
                for &neighbor in neighbors {
                    let deg = in_degree.get_mut(neighbor).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if visited.len() != names.len() {
            let chain: Vec<String> = names
                .iter()
                .filter(|n| !visited.contains(*n))
                .map(|n| n.to_string())
                .collect();
            diagnostics.error(
                DiagnosticKind::TypeCycleError { chain },
                SourceLocation::new("", format!("{:?}.derived_from", kind)),
            );
        }
    }

    /// Compute (or return the cached) flattened view for a type (§4.B.1).
    pub fn flattened(
        &self,
        kind: TypeKind,
        name: &QualifiedName,
    ) -> Result<Arc<FlattenedView>, DiagnosticKind> {
        let canonical_def = self.get(kind, name).ok_or_else(|| DiagnosticKind::UnknownTypeError {
            name: name.to_string(),
        })?;
        let cache_key = (kind, canonical_def.name.clone());
        if let Some(cached) = self.flattened_cache.get(&cache_key) {
            return Ok(Arc::clone(cached.value()));
        }
        let view = flatten::compute(self, kind, &canonical_def.name)?;
        let view = Arc::new(view);
        self.flattened_cache.insert(cache_key, Arc::clone(&view));
        Ok(view)
    }

    pub fn types_of_kind(&self, kind: TypeKind) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values().filter(move |d| d.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_registry() -> TypeRegistry {
        let mut sink = DiagnosticSink::new(false);
        TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink)
    }

    #[test]
    fn normative_seed_has_no_fatal_errors() {
        let mut sink = DiagnosticSink::new(false);
        let registry = TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink);
        assert!(!sink.should_abort());
        assert!(registry.contains(TypeKind::Node, &QualifiedName::new("tosca.nodes.Compute")));
    }

    #[test]
    fn unsupported_version_is_fatal() {
        let mut sink = DiagnosticSink::new(false);
        let _registry = TypeRegistry::new(
            ToscaVersion::Profile("bogus_version".into()),
            &HashMap::new(),
            &mut sink,
        );
        assert!(sink.should_abort());
    }

    #[test]
    fn derives_from_walks_chain() {
        let registry = empty_registry();
        assert!(registry.derives_from(
            TypeKind::Node,
            &QualifiedName::new("tosca.nodes.Compute"),
            &QualifiedName::new("tosca.nodes.Root"),
        ));
    }

    #[test]
    fn blockstorage_alias_resolves_to_canonical_with_warning_opportunity() {
        let registry = empty_registry();
        let direct = registry.get(TypeKind::Node, &QualifiedName::new("tosca.nodes.BlockStorage"));
        let canonical = registry.get(
            TypeKind::Node,
            &QualifiedName::new("tosca.nodes.Storage.BlockStorage"),
        );
        assert!(direct.is_some());
        assert!(canonical.is_some());
        assert_eq!(direct.unwrap().name, canonical.unwrap().name);
    }

    #[test]
    fn duplicate_registration_is_reported() {
        let mut sink = DiagnosticSink::new(false);
        let mut registry = TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink);
        registry.register(
            TypeDefinition::new(TypeKind::Node, "tosca.nodes.Compute"),
            SourceLocation::new("t.yaml", "node_types"),
            &mut sink,
        );
        assert!(sink.has_errors());
    }

    #[test]
    fn derivation_cycle_is_detected() {
        let mut sink = DiagnosticSink::new(false);
        let mut registry = TypeRegistry::new(ToscaVersion::V1_3, &HashMap::new(), &mut sink);
        registry.register(
            TypeDefinition::new(TypeKind::Node, "my.A").derive_from("my.B"),
            SourceLocation::new("t.yaml", "node_types.A"),
            &mut sink,
        );
        registry.register(
            TypeDefinition::new(TypeKind::Node, "my.B").derive_from("my.A"),
            SourceLocation::new("t.yaml", "node_types.B"),
            &mut sink,
        );
        registry.validate_derivation(TypeKind::Node, &mut sink);
        assert!(sink.should_abort());
    }
}
