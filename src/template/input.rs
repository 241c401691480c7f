//! Input binding (§4.D "Inputs"): merge caller-supplied parameter values
//! with declared defaults and validate the result against each input's
//! constraints.

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::registry::QualifiedName;
use crate::scalar::Constraint;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct InputDef {
    pub name: String,
    pub type_name: QualifiedName,
    pub required: bool,
    pub default: Option<Value>,
    pub constraints: Vec<Constraint>,
    pub source: SourceLocation,
}

impl InputDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<QualifiedName>, source: SourceLocation) -> Self {
        InputDef {
            name: name.into(),
            type_name: type_name.into(),
            required: true,
            default: None,
            constraints: Vec::new(),
            source,
        }
    }
}

/// Bind every declared input against `caller_values`, falling back to each
/// input's `default`. A required input with neither a caller value nor a
/// default is a `MissingRequiredInputError`; a bound value failing its
/// constraints is a `ConstraintViolation` (§8 scenario 3).
pub fn bind_inputs(
    defs: &BTreeMap<String, InputDef>,
    caller_values: &HashMap<String, Value>,
    diagnostics: &mut DiagnosticSink,
) -> BTreeMap<String, Value> {
    let mut bound = BTreeMap::new();
    for (name, def) in defs {
        let value = match caller_values.get(name) {
            Some(v) => v.clone(),
            None => match &def.default {
                Some(v) => v.clone(),
                None => {
                    if def.required {
                        diagnostics.error(
                            DiagnosticKind::MissingRequiredInputError { name: name.clone() },
                            def.source.clone(),
                        );
                    }
                    continue;
                }
            },
        };

        for constraint in &def.constraints {
            if let Err(kind) = constraint.check(&value) {
                diagnostics.error(kind, def.source.clone());
            }
        }

        bound.insert(name.clone(), value);
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_input_without_default_is_reported() {
        let mut defs = BTreeMap::new();
        defs.insert(
            "server_port".to_string(),
            InputDef::new("server_port", "integer", SourceLocation::new("t.yaml", "inputs.server_port")),
        );
        let mut diagnostics = DiagnosticSink::new(false);
        let bound = bind_inputs(&defs, &HashMap::new(), &mut diagnostics);
        assert!(bound.is_empty());
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn constraint_violation_on_caller_value_is_reported() {
        let mut defs = BTreeMap::new();
        let mut def = InputDef::new("cpus", "integer", SourceLocation::new("t.yaml", "inputs.cpus"));
        def.constraints
            .push(Constraint::ValidValues(vec![Value::Int(1), Value::Int(2), Value::Int(4), Value::Int(8)]));
        defs.insert("cpus".to_string(), def);

        let mut caller = HashMap::new();
        caller.insert("cpus".to_string(), Value::Int(3));

        let mut diagnostics = DiagnosticSink::new(false);
        let bound = bind_inputs(&defs, &caller, &mut diagnostics);
        assert_eq!(bound.get("cpus"), Some(&Value::Int(3)));
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn default_is_used_when_caller_omits_value() {
        let mut defs = BTreeMap::new();
        let mut def = InputDef::new("cpus", "integer", SourceLocation::new("t.yaml", "inputs.cpus"));
        def.default = Some(Value::Int(2));
        def.required = false;
        defs.insert("cpus".to_string(), def);

        let mut diagnostics = DiagnosticSink::new(false);
        let bound = bind_inputs(&defs, &HashMap::new(), &mut diagnostics);
        assert_eq!(bound.get("cpus"), Some(&Value::Int(2)));
        assert!(!diagnostics.has_errors());
    }
}
