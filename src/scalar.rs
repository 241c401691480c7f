//! Scalar-unit parsing/normalization and constraint-clause evaluation (§4.A).

use std::fmt;

use regex::Regex;

use crate::diagnostics::DiagnosticKind;
use crate::value::Value;

/// Which family of units a scalar-unit property belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Size,
    Time,
    Frequency,
    Bitrate,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Size => "size",
            ScalarKind::Time => "time",
            ScalarKind::Frequency => "frequency",
            ScalarKind::Bitrate => "bitrate",
        };
        write!(f, "{}", s)
    }
}

/// A magnitude plus the unit it was parsed with, normalized to a canonical
/// base (bytes, seconds, Hz, bits/s) for comparison. `Display` re-emits the
/// original unit so `"10 GB"` round-trips to `"10 GB"` (§4.A.1, §8).
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarUnit {
    kind: ScalarKind,
    magnitude: f64,
    unit: String,
    normalized: f64,
}

impl ScalarUnit {
    /// Build a `ScalarUnit` directly from a normalized magnitude (e.g. a
    /// value produced by computation rather than parsed from text),
    /// choosing `unit` purely for display.
    pub fn from_normalized(kind: ScalarKind, normalized: f64, unit: &str) -> Option<Self> {
        let factor = unit_factor(kind, unit)?;
        Some(ScalarUnit {
            kind,
            magnitude: normalized / factor,
            unit: unit.to_string(),
            normalized,
        })
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn normalized(&self) -> f64 {
        self.normalized
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }
}

impl fmt::Display for ScalarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.magnitude.fract() == 0.0 {
            write!(f, "{} {}", self.magnitude as i64, self.unit)
        } else {
            write!(f, "{} {}", self.magnitude, self.unit)
        }
    }
}

/// Parse a scalar-unit string of the form `"<number> <unit>"` (whitespace
/// optional, unit case-insensitive except where an SI/binary prefix makes
/// case significant — `MB` vs `Mb`-style ambiguity is avoided by requiring
/// the unit tables' exact casing for the prefix letter and letting only the
/// base letter fold case).
pub fn parse_scalar_unit(input: &str, kind: ScalarKind) -> Result<ScalarUnit, DiagnosticKind> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .ok_or_else(|| invalid(input, kind))?;
    let (num_part, unit_part) = trimmed.split_at(split_at);
    let magnitude: f64 = num_part.trim().parse().map_err(|_| invalid(input, kind))?;
    let unit_part = unit_part.trim();

    let factor = unit_factor(kind, unit_part).ok_or_else(|| invalid(input, kind))?;
    Ok(ScalarUnit {
        kind,
        magnitude,
        unit: canonical_unit_spelling(kind, unit_part).unwrap_or_else(|| unit_part.to_string()),
        normalized: magnitude * factor,
    })
}

fn invalid(input: &str, kind: ScalarKind) -> DiagnosticKind {
    DiagnosticKind::InvalidScalarUnitError {
        input: input.to_string(),
        kind: kind.to_string(),
    }
}

/// Canonical base-unit multiplier for a unit string within a kind, or `None`
/// if the unit is not recognized for that kind. Comparison is case-sensitive
/// for unit letters per the table in §4.A, but we additionally accept a
/// case-insensitive match on the whole token as a convenience (many TOSCA
/// templates in the wild write `gb`/`Gb`/`GB` interchangeably) — which is
/// why lookups first try exact, then fold case.
fn unit_factor(kind: ScalarKind, unit: &str) -> Option<f64> {
    let table: &[(&str, f64)] = match kind {
        ScalarKind::Size => &[
            ("B", 1.0),
            ("kB", 1_000.0),
            ("KiB", 1_024.0),
            ("MB", 1_000_000.0),
            ("MiB", 1_048_576.0),
            ("GB", 1_000_000_000.0),
            ("GiB", 1_073_741_824.0),
            ("TB", 1_000_000_000_000.0),
            ("TiB", 1_099_511_627_776.0),
        ],
        ScalarKind::Time => &[
            ("d", 86_400.0),
            ("h", 3_600.0),
            ("m", 60.0),
            ("s", 1.0),
            ("ms", 1e-3),
            ("us", 1e-6),
            ("ns", 1e-9),
        ],
        ScalarKind::Frequency => &[
            ("Hz", 1.0),
            ("kHz", 1_000.0),
            ("MHz", 1_000_000.0),
            ("GHz", 1_000_000_000.0),
        ],
        ScalarKind::Bitrate => &[
            ("bps", 1.0),
            ("Kbps", 1_000.0),
            ("Kibps", 1_024.0),
            ("Mbps", 1_000_000.0),
            ("Mibps", 1_048_576.0),
            ("Gbps", 1_000_000_000.0),
            ("Gibps", 1_073_741_824.0),
            ("Tbps", 1_000_000_000_000.0),
            ("Tibps", 1_099_511_627_776.0),
        ],
    };
    table
        .iter()
        .find(|(u, _)| *u == unit)
        .or_else(|| {
            table
                .iter()
                .find(|(u, _)| u.eq_ignore_ascii_case(unit))
        })
        .map(|(_, f)| *f)
}

fn canonical_unit_spelling(kind: ScalarKind, unit: &str) -> Option<String> {
    let table: &[&str] = match kind {
        ScalarKind::Size => &["B", "kB", "KiB", "MB", "MiB", "GB", "GiB", "TB", "TiB"],
        ScalarKind::Time => &["d", "h", "m", "s", "ms", "us", "ns"],
        ScalarKind::Frequency => &["Hz", "kHz", "MHz", "GHz"],
        ScalarKind::Bitrate => &[
            "bps", "Kbps", "Kibps", "Mbps", "Mibps", "Gbps", "Gibps", "Tbps", "Tibps",
        ],
    };
    table
        .iter()
        .find(|u| u.eq_ignore_ascii_case(unit))
        .map(|u| u.to_string())
}

/// A single constraint clause as defined in §4.A.
#[derive(Debug, Clone)]
pub enum Constraint {
    Equal(Value),
    GreaterThan(Value),
    GreaterOrEqual(Value),
    LessThan(Value),
    LessOrEqual(Value),
    InRange(Value, Value),
    ValidValues(Vec<Value>),
    Length(usize),
    MinLength(usize),
    MaxLength(usize),
    /// Compiled once at registration time so every evaluation re-uses the
    /// anchored automaton rather than recompiling per property instance.
    Pattern(Regex),
}

impl Constraint {
    /// Compile a `pattern` constraint. The engine always anchors the
    /// supplied pattern with an implicit `^(?:...)$` rather than trusting
    /// authors to anchor it themselves (§4.A).
    pub fn pattern(raw: &str) -> Result<Constraint, DiagnosticKind> {
        let anchored = format!("^(?:{})$", raw);
        Regex::new(&anchored)
            .map(Constraint::Pattern)
            .map_err(|e| DiagnosticKind::ConstraintViolation {
                message: format!("invalid pattern `{}`: {}", raw, e),
            })
    }

    /// Evaluate this clause against a value. `Ok(())` on success, otherwise
    /// a `ConstraintViolation` describing the failure.
    pub fn check(&self, value: &Value) -> Result<(), DiagnosticKind> {
        let ok = match self {
            Constraint::Equal(expected) => value.structurally_equal(expected),
            Constraint::GreaterThan(bound) => compare(value, bound)? == std::cmp::Ordering::Greater,
            Constraint::GreaterOrEqual(bound) => {
                compare(value, bound)? != std::cmp::Ordering::Less
            }
            Constraint::LessThan(bound) => compare(value, bound)? == std::cmp::Ordering::Less,
            Constraint::LessOrEqual(bound) => {
                compare(value, bound)? != std::cmp::Ordering::Greater
            }
            Constraint::InRange(lo, hi) => {
                compare(value, lo)? != std::cmp::Ordering::Less
                    && compare(value, hi)? != std::cmp::Ordering::Greater
            }
            Constraint::ValidValues(values) => {
                values.iter().any(|v| value.structurally_equal(v))
            }
            Constraint::Length(n) => length_of(value) == Some(*n),
            Constraint::MinLength(n) => length_of(value).map(|l| l >= *n).unwrap_or(false),
            Constraint::MaxLength(n) => length_of(value).map(|l| l <= *n).unwrap_or(false),
            Constraint::Pattern(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
        };
        if ok {
            Ok(())
        } else {
            Err(DiagnosticKind::ConstraintViolation {
                message: format!("value `{}` does not satisfy {:?}", value, self.label()),
            })
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Constraint::Equal(_) => "equal",
            Constraint::GreaterThan(_) => "greater_than",
            Constraint::GreaterOrEqual(_) => "greater_or_equal",
            Constraint::LessThan(_) => "less_than",
            Constraint::LessOrEqual(_) => "less_or_equal",
            Constraint::InRange(_, _) => "in_range",
            Constraint::ValidValues(_) => "valid_values",
            Constraint::Length(_) => "length",
            Constraint::MinLength(_) => "min_length",
            Constraint::MaxLength(_) => "max_length",
            Constraint::Pattern(_) => "pattern",
        }
    }
}

/// Parse a `constraints:` list (§4.A) against the declared `type_name` of
/// the property/input/attribute the clauses apply to, so operand literals
/// (`equal: 4`, `in_range: [1, 4]`, ...) parse through the same
/// type-directed conversion as defaults.
pub fn parse_constraints(list: &[serde_yaml::Value], type_name: &str) -> Result<Vec<Constraint>, DiagnosticKind> {
    let mut out = Vec::with_capacity(list.len());
    for entry in list {
        let mapping = entry.as_mapping().ok_or_else(|| DiagnosticKind::SchemaError {
            message: "constraint clause must be a one-key mapping".into(),
        })?;
        let (key, value) = mapping.iter().next().ok_or_else(|| DiagnosticKind::SchemaError {
            message: "constraint clause is empty".into(),
        })?;
        let key = key.as_str().ok_or_else(|| DiagnosticKind::SchemaError {
            message: "constraint clause key must be a string".into(),
        })?;
        let v = |raw: &serde_yaml::Value| crate::value::value_from_yaml(raw, type_name);
        let constraint = match key {
            "equal" => Constraint::Equal(v(value)?),
            "greater_than" => Constraint::GreaterThan(v(value)?),
            "greater_or_equal" => Constraint::GreaterOrEqual(v(value)?),
            "less_than" => Constraint::LessThan(v(value)?),
            "less_or_equal" => Constraint::LessOrEqual(v(value)?),
            "in_range" => {
                let items = value.as_sequence().ok_or_else(|| DiagnosticKind::SchemaError {
                    message: "in_range requires a [min, max] sequence".into(),
                })?;
                if items.len() != 2 {
                    return Err(DiagnosticKind::SchemaError {
                        message: "in_range requires exactly two entries".into(),
                    });
                }
                Constraint::InRange(v(&items[0])?, v(&items[1])?)
            }
            "valid_values" => {
                let items = value.as_sequence().ok_or_else(|| DiagnosticKind::SchemaError {
                    message: "valid_values requires a sequence".into(),
                })?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(v(item)?);
                }
                Constraint::ValidValues(values)
            }
            "length" => Constraint::Length(as_usize(value)?),
            "min_length" => Constraint::MinLength(as_usize(value)?),
            "max_length" => Constraint::MaxLength(as_usize(value)?),
            "pattern" => {
                let raw = value.as_str().ok_or_else(|| DiagnosticKind::SchemaError {
                    message: "pattern requires a string".into(),
                })?;
                Constraint::pattern(raw)?
            }
            other => {
                return Err(DiagnosticKind::SchemaError {
                    message: format!("unknown constraint clause `{}`", other),
                })
            }
        };
        out.push(constraint);
    }
    Ok(out)
}

fn as_usize(value: &serde_yaml::Value) -> Result<usize, DiagnosticKind> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| DiagnosticKind::SchemaError {
            message: "expected a non-negative integer".into(),
        })
}

/// Compare two values for ordering. Scalar-units compare on normalized
/// magnitude; mismatched units are a type error (§4.A).
fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, DiagnosticKind> {
    match (a, b) {
        (Value::ScalarUnit(x), Value::ScalarUnit(y)) => {
            if x.kind() != y.kind() {
                return Err(DiagnosticKind::TypeMismatchError {
                    message: format!(
                        "cannot compare scalar-unit.{} with scalar-unit.{}",
                        x.kind(),
                        y.kind()
                    ),
                });
            }
            x.normalized()
                .partial_cmp(&y.normalized())
                .ok_or_else(|| DiagnosticKind::TypeMismatchError {
                    message: "non-comparable scalar-unit magnitude".into(),
                })
        }
        _ => {
            let (x, y) = (
                a.as_f64().ok_or_else(|| DiagnosticKind::TypeMismatchError {
                    message: format!("value `{}` is not numeric", a),
                })?,
                b.as_f64().ok_or_else(|| DiagnosticKind::TypeMismatchError {
                    message: format!("value `{}` is not numeric", b),
                })?,
            );
            x.partial_cmp(&y)
                .ok_or_else(|| DiagnosticKind::TypeMismatchError {
                    message: "non-comparable numeric value (NaN)".into(),
                })
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::List(items) => Some(items.len()),
        Value::Map(m) => Some(m.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_size() {
        let su = parse_scalar_unit("10 GB", ScalarKind::Size).unwrap();
        assert_eq!(su.normalized(), 10_000_000_000.0);
        assert_eq!(su.to_string(), "10 GB");
    }

    #[test]
    fn parses_without_whitespace() {
        let su = parse_scalar_unit("500ms", ScalarKind::Time).unwrap();
        assert_eq!(su.normalized(), 0.5);
    }

    #[test]
    fn binary_and_si_prefixes_differ() {
        let si = parse_scalar_unit("1 MB", ScalarKind::Size).unwrap();
        let binary = parse_scalar_unit("1 MiB", ScalarKind::Size).unwrap();
        assert!(binary.normalized() > si.normalized());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_scalar_unit("10 parsecs", ScalarKind::Size).is_err());
    }

    #[test]
    fn in_range_is_inclusive_both_ends() {
        let c = Constraint::InRange(Value::Int(1), Value::Int(4));
        assert!(c.check(&Value::Int(1)).is_ok());
        assert!(c.check(&Value::Int(4)).is_ok());
        assert!(c.check(&Value::Int(5)).is_err());
    }

    #[test]
    fn pattern_is_anchored() {
        let c = Constraint::pattern("foo").unwrap();
        assert!(c.check(&Value::String("foo".into())).is_ok());
        assert!(c.check(&Value::String("foobar".into())).is_err());
    }

    #[test]
    fn scalar_unit_mismatch_is_type_error() {
        let size = Value::ScalarUnit(parse_scalar_unit("1 GB", ScalarKind::Size).unwrap());
        let time = Value::ScalarUnit(parse_scalar_unit("1 s", ScalarKind::Time).unwrap());
        let c = Constraint::LessThan(time);
        assert!(matches!(
            c.check(&size),
            Err(DiagnosticKind::TypeMismatchError { .. })
        ));
    }

    #[test]
    fn valid_values_uses_structural_equality() {
        let c = Constraint::ValidValues(vec![Value::Int(1), Value::Int(2), Value::Int(4), Value::Int(8)]);
        assert!(c.check(&Value::Int(4)).is_ok());
        assert!(c.check(&Value::Int(3)).is_err());
    }
}
