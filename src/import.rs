//! Import resolver (component C, §4.C): resolves `imports:` entries against
//! a caller-supplied loader, applies namespace prefixing, and tolerates
//! import cycles by treating a revisit as a no-op rather than an error.

use std::collections::HashSet;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};

/// Where a relative import is resolved from. Generalizes the teacher's
/// "detect HCL vs YAML directory" dispatch (`config::loader::load_workspace`)
/// into "resolve one import URI against a base".
#[derive(Debug, Clone)]
pub struct ImportBase {
    /// Opaque base used by the loader to resolve relative references —
    /// typically a directory or a repository root; the engine never
    /// interprets it itself (§1 Non-goals: no filesystem/archive access in
    /// the core).
    pub uri: String,
}

impl ImportBase {
    pub fn new(uri: impl Into<String>) -> Self {
        ImportBase { uri: uri.into() }
    }
}

/// One resolved import: the raw YAML document plus the namespace prefix (if
/// any) its definitions should be registered under.
pub struct ResolvedImport {
    pub source_uri: String,
    pub namespace_prefix: Option<String>,
    pub document: serde_yaml::Value,
}

/// A single `imports:` list entry as written in a template, already
/// decomposed from either shorthand (`- path/to/file.yaml`) or long form
/// (`- file: ..., namespace_prefix: ..., repository: ...`).
#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub file: String,
    pub namespace_prefix: Option<String>,
    pub repository: Option<String>,
}

/// Caller-supplied collaborator that turns an import reference into a YAML
/// document. The core engine never touches a filesystem or network socket
/// itself — that boundary is exactly where the embedder plugs in (§1
/// Non-goals, §4.C).
pub trait ImportLoader {
    /// Resolve `entry` relative to `base`, returning the resolved URI (used
    /// for cycle detection and diagnostics) and the parsed document.
    fn load(&self, entry: &ImportEntry, base: &ImportBase) -> Result<(String, serde_yaml::Value), String>;

    /// Compute the new base that nested imports inside the loaded document
    /// should be resolved against. Default: reuse `resolved_uri` unchanged,
    /// suitable for loaders that treat `uri` as a flat address space.
    fn base_for(&self, resolved_uri: &str) -> ImportBase {
        ImportBase::new(resolved_uri.to_string())
    }
}

/// A `Vec<(String, serde_yaml::Value)>`-backed loader for tests and for
/// embedders that have already gathered every document in memory (e.g. from
/// an unpacked CSAR — unpacking itself stays outside the engine, §1
/// Non-goals).
pub struct MapLoader {
    entries: std::collections::HashMap<String, serde_yaml::Value>,
}

impl MapLoader {
    pub fn new() -> Self {
        MapLoader {
            entries: std::collections::HashMap::new(),
        }
    }

    pub fn with(mut self, path: impl Into<String>, document: serde_yaml::Value) -> Self {
        self.entries.insert(path.into(), document);
        self
    }
}

impl Default for MapLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportLoader for MapLoader {
    fn load(&self, entry: &ImportEntry, _base: &ImportBase) -> Result<(String, serde_yaml::Value), String> {
        self.entries
            .get(&entry.file)
            .cloned()
            .map(|doc| (entry.file.clone(), doc))
            .ok_or_else(|| format!("no document registered for `{}`", entry.file))
    }
}

/// A loader backed by the real filesystem. `base.uri` is a directory; import
/// paths are resolved relative to it.
pub struct FilesystemLoader;

impl ImportLoader for FilesystemLoader {
    fn load(&self, entry: &ImportEntry, base: &ImportBase) -> Result<(String, serde_yaml::Value), String> {
        let base_path = std::path::Path::new(&base.uri);
        let resolved = base_path.join(&entry.file);
        let contents = std::fs::read_to_string(&resolved).map_err(|e| e.to_string())?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|e| e.to_string())?;
        Ok((resolved.to_string_lossy().into_owned(), doc))
    }

    fn base_for(&self, resolved_uri: &str) -> ImportBase {
        let parent = std::path::Path::new(resolved_uri)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        ImportBase::new(parent)
    }
}

/// Resolve the full import graph rooted at `entries`/`base`, depth-first, in
/// declaration order (§4.C). A resolved URI already visited on the current
/// path is a no-op (cycles are permitted, not an error — §4.C edge case);
/// a resolved URI visited on a *different* path is memoized and returned
/// without a second load.
pub fn resolve_imports(
    entries: &[ImportEntry],
    base: &ImportBase,
    loader: &dyn ImportLoader,
    diagnostics: &mut DiagnosticSink,
) -> Vec<ResolvedImport> {
    let mut seen = HashSet::new();
    let mut memo = std::collections::HashMap::new();
    let mut out = Vec::new();
    resolve_into(entries, base, loader, diagnostics, &mut seen, &mut memo, &mut out);
    out
}

fn resolve_into(
    entries: &[ImportEntry],
    base: &ImportBase,
    loader: &dyn ImportLoader,
    diagnostics: &mut DiagnosticSink,
    path_seen: &mut HashSet<String>,
    memo: &mut std::collections::HashMap<String, ()>,
    out: &mut Vec<ResolvedImport>,
) {
    for entry in entries {
        let (resolved_uri, document) = match loader.load(entry, base) {
            Ok(ok) => ok,
            Err(message) => {
                diagnostics.error(
                    DiagnosticKind::ImportError {
                        reference: entry.file.clone(),
                        message,
                    },
                    SourceLocation::new(base.uri.clone(), format!("imports[{}]", entry.file)),
                );
                continue;
            }
        };

        let cache_key = match &entry.namespace_prefix {
            Some(prefix) => format!("{}::{}", prefix, resolved_uri),
            None => resolved_uri.clone(),
        };

        if path_seen.contains(&cache_key) {
            // Import cycle: permitted, treated as a no-op revisit (§4.C).
            continue;
        }
        if memo.contains_key(&cache_key) {
            continue;
        }

        path_seen.insert(cache_key.clone());
        memo.insert(cache_key.clone(), ());

        let nested_entries = extract_nested_imports(&document);
        let nested_base = loader.base_for(&resolved_uri);

        out.push(ResolvedImport {
            source_uri: resolved_uri.clone(),
            namespace_prefix: entry.namespace_prefix.clone(),
            document,
        });

        resolve_into(&nested_entries, &nested_base, loader, diagnostics, path_seen, memo, out);

        path_seen.remove(&cache_key);
    }
}

/// Pull the `imports:` list back out of a loaded document (a document is
/// just YAML at this layer; the template elaborator does the rest of the
/// shape validation).
fn extract_nested_imports(document: &serde_yaml::Value) -> Vec<ImportEntry> {
    let Some(list) = document.get("imports").and_then(|v| v.as_sequence()) else {
        return Vec::new();
    };
    list.iter().filter_map(parse_import_entry).collect()
}

pub fn parse_import_entry(raw: &serde_yaml::Value) -> Option<ImportEntry> {
    match raw {
        serde_yaml::Value::String(path) => Some(ImportEntry {
            file: path.clone(),
            namespace_prefix: None,
            repository: None,
        }),
        serde_yaml::Value::Mapping(map) => {
            // Long form is itself a one-entry mapping keyed by the logical
            // import name: `{ name: { file: ..., namespace_prefix: ... } }`.
            let (_, body) = map.iter().next()?;
            let file = body.get("file")?.as_str()?.to_string();
            let namespace_prefix = body
                .get("namespace_prefix")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let repository = body
                .get("repository")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Some(ImportEntry {
                file,
                namespace_prefix,
                repository,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn resolves_a_simple_import() {
        let loader = MapLoader::new().with("types.yaml", yaml("node_types: {}"));
        let entries = vec![ImportEntry {
            file: "types.yaml".into(),
            namespace_prefix: None,
            repository: None,
        }];
        let mut sink = DiagnosticSink::new(false);
        let resolved = resolve_imports(&entries, &ImportBase::new(""), &loader, &mut sink);
        assert_eq!(resolved.len(), 1);
        assert!(!sink.has_errors());
    }

    #[test]
    fn missing_import_is_an_error() {
        let loader = MapLoader::new();
        let entries = vec![ImportEntry {
            file: "missing.yaml".into(),
            namespace_prefix: None,
            repository: None,
        }];
        let mut sink = DiagnosticSink::new(false);
        let resolved = resolve_imports(&entries, &ImportBase::new(""), &loader, &mut sink);
        assert!(resolved.is_empty());
        assert!(sink.has_errors());
    }

    #[test]
    fn cyclic_imports_are_a_no_op_not_an_error() {
        let loader = MapLoader::new()
            .with("a.yaml", yaml("imports: [b.yaml]"))
            .with("b.yaml", yaml("imports: [a.yaml]"));
        let entries = vec![ImportEntry {
            file: "a.yaml".into(),
            namespace_prefix: None,
            repository: None,
        }];
        let mut sink = DiagnosticSink::new(false);
        let resolved = resolve_imports(&entries, &ImportBase::new(""), &loader, &mut sink);
        assert_eq!(resolved.len(), 2);
        assert!(!sink.has_errors());
    }

    #[test]
    fn namespace_prefix_distinguishes_otherwise_identical_imports() {
        let loader = MapLoader::new().with("shared.yaml", yaml("node_types: {}"));
        let entries = vec![
            ImportEntry {
                file: "shared.yaml".into(),
                namespace_prefix: Some("a".into()),
                repository: None,
            },
            ImportEntry {
                file: "shared.yaml".into(),
                namespace_prefix: Some("b".into()),
                repository: None,
            },
        ];
        let mut sink = DiagnosticSink::new(false);
        let resolved = resolve_imports(&entries, &ImportBase::new(""), &loader, &mut sink);
        assert_eq!(resolved.len(), 2);
    }
}
