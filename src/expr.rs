//! The value-expression tree (§3 `ValueExpr`, §4.E intrinsic functions).
//!
//! Generalizes the teacher's `config::types::Expression`: TOSCA's intrinsic
//! functions are a closed, named set rather than a general expression
//! grammar, so only the three variants with a direct TOSCA counterpart
//! survive (`Literal`, `Reference`, `FunctionCall`).

use std::collections::BTreeMap;

use crate::value::Value;

/// The closed set of TOSCA intrinsic function names (§4.E). A mapping with
/// exactly one of these keys is parsed as a `FunctionCall`; any other single-
/// or multi-key mapping is a plain map literal.
pub const INTRINSIC_FUNCTIONS: &[&str] = &[
    "get_input",
    "get_property",
    "get_attribute",
    "get_operation_output",
    "get_artifact",
    "concat",
    "token",
];

/// An unevaluated property/attribute/output value, as stored by the
/// elaborator (§4.D) and resolved on demand by the evaluator (§4.E).
#[derive(Debug, Clone)]
pub enum ValueExpr {
    Literal(Value),
    /// A bare `{ get_input: name }`-style call is represented here too —
    /// `Reference` exists only for the rare case of a dotted TOSCA
    /// shorthand reference that never goes through a named intrinsic. In
    /// practice the elaborator always produces `FunctionCall` for intrinsic
    /// functions; `Reference` is kept for forward-compatible literal path
    /// expressions introduced by profile extensions.
    Reference(Vec<String>),
    FunctionCall { name: String, args: Vec<ValueExpr> },
    /// A list literal that may itself contain function calls in any
    /// position (TOSCA allows e.g. `concat` inside a list-typed property
    /// value) — kept as a tree rather than folded into `Value::List` so
    /// evaluation can happen once, on demand (§4.E).
    List(Vec<ValueExpr>),
    /// Same rationale as `List`, for map-typed property values.
    Map(BTreeMap<String, ValueExpr>),
}

impl ValueExpr {
    pub fn literal(value: Value) -> Self {
        ValueExpr::Literal(value)
    }

    pub fn call(name: impl Into<String>, args: Vec<ValueExpr>) -> Self {
        ValueExpr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    /// Parse a raw YAML node into a `ValueExpr` tree. A single-key mapping
    /// whose key is one of `INTRINSIC_FUNCTIONS` becomes a `FunctionCall`
    /// with the value (a scalar, or a sequence for multi-argument
    /// functions) turned into its argument list; every other mapping or
    /// sequence is a literal container, recursively parsed so nested
    /// function calls are still reachable.
    pub fn from_yaml(raw: &serde_yaml::Value) -> ValueExpr {
        match raw {
            serde_yaml::Value::Mapping(map) if map.len() == 1 => {
                let (key, value) = map.iter().next().unwrap();
                if let Some(name) = key.as_str() {
                    if INTRINSIC_FUNCTIONS.contains(&name) {
                        let args = match value {
                            serde_yaml::Value::Sequence(items) => {
                                items.iter().map(ValueExpr::from_yaml).collect()
                            }
                            other => vec![ValueExpr::from_yaml(other)],
                        };
                        return ValueExpr::call(name, args);
                    }
                }
                ValueExpr::Map(
                    map.iter()
                        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), ValueExpr::from_yaml(v))))
                        .collect(),
                )
            }
            serde_yaml::Value::Mapping(map) => ValueExpr::Map(
                map.iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), ValueExpr::from_yaml(v))))
                    .collect(),
            ),
            serde_yaml::Value::Sequence(items) => {
                ValueExpr::List(items.iter().map(ValueExpr::from_yaml).collect())
            }
            serde_yaml::Value::String(s) => ValueExpr::literal(Value::String(s.clone())),
            serde_yaml::Value::Bool(b) => ValueExpr::literal(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ValueExpr::literal(Value::Int(i))
                } else {
                    ValueExpr::literal(Value::Float(n.as_f64().unwrap_or_default()))
                }
            }
            serde_yaml::Value::Null => ValueExpr::literal(Value::Null),
            serde_yaml::Value::Tagged(tagged) => ValueExpr::from_yaml(&tagged.value),
        }
    }

    /// True for `Literal`, `List`, and `Map` nodes containing no
    /// `FunctionCall`/`Reference` anywhere — used by the elaborator to
    /// decide whether a property value can be validated against its
    /// constraints immediately or must wait for evaluation (§4.D).
    pub fn is_fully_literal(&self) -> bool {
        match self {
            ValueExpr::Literal(_) => true,
            ValueExpr::Reference(_) | ValueExpr::FunctionCall { .. } => false,
            ValueExpr::List(items) => items.iter().all(ValueExpr::is_fully_literal),
            ValueExpr::Map(entries) => entries.values().all(ValueExpr::is_fully_literal),
        }
    }

    /// Best-effort conversion to a `Value`, valid only when
    /// `is_fully_literal()` is true (callers check first; this returns
    /// `Value::Unknown` rather than panicking if called anyway so a stray
    /// mistake degrades to a diagnosable unknown instead of a crash).
    pub fn as_literal_value(&self) -> Value {
        match self {
            ValueExpr::Literal(v) => v.clone(),
            ValueExpr::List(items) => Value::List(items.iter().map(ValueExpr::as_literal_value).collect()),
            ValueExpr::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_literal_value()))
                    .collect(),
            ),
            ValueExpr::Reference(_) | ValueExpr::FunctionCall { .. } => Value::Unknown,
        }
    }

    /// Collect every node-template name referenced by `get_property`,
    /// `get_attribute`, `get_operation_output`, or `get_artifact` calls
    /// reachable from this expression, used at elaboration time to validate
    /// that output expressions only reference declared names (§4.D).
    pub fn referenced_entities(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_entities(&mut out);
        out
    }

    fn collect_entities(&self, out: &mut Vec<String>) {
        match self {
            ValueExpr::Literal(_) => {}
            ValueExpr::Reference(path) => {
                if let Some(first) = path.first() {
                    out.push(first.clone());
                }
            }
            ValueExpr::FunctionCall { name, args } => {
                if matches!(
                    name.as_str(),
                    "get_property" | "get_attribute" | "get_operation_output" | "get_artifact"
                ) {
                    if let Some(ValueExpr::Literal(Value::String(entity))) = args.first() {
                        out.push(entity.clone());
                    }
                }
                for arg in args {
                    arg.collect_entities(out);
                }
            }
            ValueExpr::List(items) => {
                for item in items {
                    item.collect_entities(out);
                }
            }
            ValueExpr::Map(entries) => {
                for value in entries.values() {
                    value.collect_entities(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_entities_from_nested_calls() {
        let expr = ValueExpr::call(
            "concat",
            vec![
                ValueExpr::call(
                    "get_property",
                    vec![
                        ValueExpr::literal(Value::String("SELF".into())),
                        ValueExpr::literal(Value::String("host".into())),
                    ],
                ),
                ValueExpr::literal(Value::String(":".into())),
            ],
        );
        assert_eq!(expr.referenced_entities(), vec!["SELF".to_string()]);
    }
}
