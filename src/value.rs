//! Runtime values produced by parsing TOSCA property/attribute/input literals.

use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostics::DiagnosticKind;
use crate::scalar::{parse_scalar_unit, ScalarKind, ScalarUnit};

/// A fully-evaluated TOSCA value.
///
/// Mirrors the primitive type list in the data model (§3): `string, integer,
/// float, boolean, timestamp, null, range, version, map, list,
/// scalar-unit.*`, plus nested data-type instances represented as `Map`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Version(String),
    /// `[min, max]`, either bound may be `None` to mean `UNBOUNDED`.
    Range(Option<i64>, Option<i64>),
    ScalarUnit(ScalarUnit),
    List(Vec<Value>),
    /// Ordered so that structural equality (§4.A, `valid_values`) and
    /// canonical re-emission are deterministic.
    Map(BTreeMap<String, Value>),
    /// A function evaluation that could not be resolved statically (e.g. a
    /// `get_attribute` during static analysis, §4.E). Still type-checks
    /// against its consumer's declared type, so it is not an error by
    /// itself.
    Unknown,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::ScalarUnit(su) => Some(su.normalized()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Structural equality used by `valid_values` (§4.A). Distinct from
    /// `PartialEq` only in that `Unknown` never compares equal to anything,
    /// including itself, since an unresolved value has no known identity.
    pub fn structurally_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unknown, _) | (_, Value::Unknown) => false,
            (a, b) => a == b,
        }
    }

    /// Best-effort JSON bridge, used for diagnostics and for comparing
    /// nested map/list values without writing a second equality routine.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Unknown => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Version(v) => serde_json::Value::String(v.clone()),
            Value::Range(lo, hi) => serde_json::json!([
                lo.map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::String("UNBOUNDED".into())),
                hi.map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::String("UNBOUNDED".into())),
            ]),
            Value::ScalarUnit(su) => serde_json::json!(su.normalized()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Convert a raw YAML scalar/collection into a `Value`, using `type_name` to
/// decide between a plain string and a `scalar-unit.*`/`timestamp`/`range`
/// value that needs parsing (§4.A, §3). Used for property/input defaults
/// and constraint operands, which are always literal at the type-definition
/// level (no function calls permitted there).
pub fn value_from_yaml(raw: &serde_yaml::Value, type_name: &str) -> Result<Value, DiagnosticKind> {
    if let Some(kind) = scalar_kind_for(type_name) {
        let text = raw.as_str().ok_or_else(|| DiagnosticKind::TypeMismatchError {
            message: format!("expected a scalar-unit.{} string, found `{:?}`", kind, raw),
        })?;
        return Ok(Value::ScalarUnit(parse_scalar_unit(text, kind)?));
    }

    match type_name {
        "timestamp" => {
            let text = raw.as_str().ok_or_else(|| DiagnosticKind::TypeMismatchError {
                message: "expected an RFC 3339 timestamp string".into(),
            })?;
            let parsed = chrono::DateTime::parse_from_rfc3339(text).map_err(|e| DiagnosticKind::TypeMismatchError {
                message: format!("invalid timestamp `{}`: {}", text, e),
            })?;
            Ok(Value::Timestamp(parsed.with_timezone(&chrono::Utc)))
        }
        "range" => {
            let items = raw.as_sequence().ok_or_else(|| DiagnosticKind::TypeMismatchError {
                message: "expected a [min, max] range sequence".into(),
            })?;
            if items.len() != 2 {
                return Err(DiagnosticKind::TypeMismatchError {
                    message: "range must have exactly two entries".into(),
                });
            }
            let bound = |v: &serde_yaml::Value| -> Option<i64> {
                if v.as_str() == Some("UNBOUNDED") {
                    None
                } else {
                    v.as_i64()
                }
            };
            Ok(Value::Range(bound(&items[0]), bound(&items[1])))
        }
        "version" => Ok(Value::Version(
            raw.as_str().unwrap_or_default().to_string(),
        )),
        _ => Ok(generic_from_yaml(raw)),
    }
}

fn scalar_kind_for(type_name: &str) -> Option<ScalarKind> {
    match type_name {
        "scalar-unit.size" => Some(ScalarKind::Size),
        "scalar-unit.time" => Some(ScalarKind::Time),
        "scalar-unit.frequency" => Some(ScalarKind::Frequency),
        "scalar-unit.bitrate" => Some(ScalarKind::Bitrate),
        _ => None,
    }
}

/// Untyped fallback conversion for primitives with no parsing beyond what
/// YAML itself already decoded.
pub fn generic_from_yaml(raw: &serde_yaml::Value) -> Value {
    match raw {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::List(items.iter().map(generic_from_yaml).collect()),
        serde_yaml::Value::Mapping(map) => Value::Map(
            map.iter()
                .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), generic_from_yaml(v))))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => generic_from_yaml(&tagged.value),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Unknown => write!(f, "<unknown>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Version(v) => write!(f, "{}", v),
            Value::Range(lo, hi) => {
                let lo = lo.map(|v| v.to_string()).unwrap_or_else(|| "UNBOUNDED".into());
                let hi = hi.map(|v| v.to_string()).unwrap_or_else(|| "UNBOUNDED".into());
                write!(f, "[{}, {}]", lo, hi)
            }
            Value::ScalarUnit(su) => write!(f, "{}", su),
            Value::List(_) | Value::Map(_) => {
                write!(f, "{}", serde_json::to_string(&self.to_json()).unwrap())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_treats_unknown_as_never_equal() {
        assert!(!Value::Unknown.structurally_equal(&Value::Unknown));
        assert!(Value::Int(4).structurally_equal(&Value::Int(4)));
        assert!(!Value::Int(4).structurally_equal(&Value::Int(8)));
    }

    #[test]
    fn list_structural_equality_is_order_sensitive() {
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::Int(2), Value::Int(1)]);
        assert!(!a.structurally_equal(&b));
    }
}
