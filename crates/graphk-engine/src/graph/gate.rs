use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use graphk_core::error::{GraphkError, Result, Violation, Violations};
use graphk_core::types::{PortValues, Value};

/// A single boolean check over a branch's bound inputs.
pub type Checker = Arc<dyn Fn(&PortValues) -> bool + Send + Sync>;

/// How a gate combines its checkers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStrategy {
    /// Logical AND.
    #[default]
    AllMatch,
    /// Logical OR.
    AnyMatch,
    /// Logical NOT of OR.
    NoneMatch,
}

/// Activation predicate attached to a branch edge.
///
/// A gate holds labelled checkers and a combining strategy. With no checkers,
/// `AllMatch` and `NoneMatch` hold and `AnyMatch` does not.
#[derive(Clone, Default)]
pub struct Gate {
    label: Option<String>,
    strategy: GateStrategy,
    checkers: Vec<(String, Checker)>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("label", &self.label)
            .field("strategy", &self.strategy)
            .field(
                "checkers",
                &self.checkers.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Gate {
    pub fn new(strategy: GateStrategy) -> Self {
        Self {
            label: None,
            strategy,
            checkers: Vec::new(),
        }
    }

    /// A gate with a single checker.
    pub fn when<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&PortValues) -> bool + Send + Sync + 'static,
    {
        Self::new(GateStrategy::AllMatch).with_check(label, check)
    }

    /// Add a checker.
    pub fn with_check<F>(mut self, label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&PortValues) -> bool + Send + Sync + 'static,
    {
        self.checkers.push((label.into(), Arc::new(check)));
        self
    }

    /// Set a label used in descriptions.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn strategy(&self) -> GateStrategy {
        self.strategy
    }

    /// Evaluate the gate against bound inputs.
    pub fn assess(&self, inputs: &PortValues) -> bool {
        let mut results = self.checkers.iter().map(|(_, check)| check(inputs));
        match self.strategy {
            GateStrategy::AllMatch => results.all(|r| r),
            GateStrategy::AnyMatch => results.any(|r| r),
            GateStrategy::NoneMatch => !results.any(|r| r),
        }
    }

    pub fn describe(&self) -> Value {
        serde_json::json!({
            "type": "gate",
            "label": self.label,
            "strategy": self.strategy,
            "checkers": self.checkers.iter().map(|(l, _)| l.clone()).collect::<Vec<_>>(),
        })
    }

    /// Build a gate from a simple comparison expression.
    ///
    /// Supported expressions:
    /// - `port == "value"` / `port != "value"`: equality (numbers compare numerically)
    /// - `port contains "substr"`: substring match on string values
    /// - `port > 0`, `port >= 0`, `port < 0`, `port <= 0`: ordering
    ///
    /// Unquoted right-hand sides are read as JSON (numbers, booleans, null),
    /// falling back to a bare string.
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let (port, op, rhs) = split_expression(trimmed).ok_or_else(|| invalid(expr))?;
        let port = port.to_string();
        let check: Checker = match op {
            Op::Contains => {
                let needle = match rhs {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Arc::new(move |inputs: &PortValues| {
                    inputs
                        .get(&port)
                        .and_then(|v| v.as_str())
                        .is_some_and(|s| s.contains(needle.as_str()))
                })
            }
            Op::Eq => Arc::new(move |inputs: &PortValues| {
                inputs.get(&port).is_some_and(|v| values_equal(v, &rhs))
            }),
            Op::Ne => Arc::new(move |inputs: &PortValues| {
                inputs.get(&port).is_some_and(|v| !values_equal(v, &rhs))
            }),
            Op::Gt | Op::Ge | Op::Lt | Op::Le => Arc::new(move |inputs: &PortValues| {
                let Some(ord) = inputs.get(&port).and_then(|v| compare(v, &rhs)) else {
                    return false;
                };
                match op {
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    Op::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            }),
        };
        Ok(Self {
            label: Some(trimmed.to_string()),
            strategy: GateStrategy::AllMatch,
            checkers: vec![(trimmed.to_string(), check)],
        })
    }
}

/// Holds when the numeric value on `port` is greater than `threshold`.
pub fn port_gt(port: impl Into<String>, threshold: f64) -> Gate {
    let port = port.into();
    let label = format!("{} > {}", port, threshold);
    Gate::when(label, move |inputs| {
        inputs
            .get(&port)
            .and_then(|v| v.as_f64())
            .is_some_and(|n| n > threshold)
    })
}

/// Holds when the numeric value on `port` is less than `threshold`.
pub fn port_lt(port: impl Into<String>, threshold: f64) -> Gate {
    let port = port.into();
    let label = format!("{} < {}", port, threshold);
    Gate::when(label, move |inputs| {
        inputs
            .get(&port)
            .and_then(|v| v.as_f64())
            .is_some_and(|n| n < threshold)
    })
}

/// Holds when the value on `port` equals `expected`.
pub fn port_eq(port: impl Into<String>, expected: Value) -> Gate {
    let port = port.into();
    let label = format!("{} == {}", port, expected);
    Gate::when(label, move |inputs| {
        inputs.get(&port).is_some_and(|v| values_equal(v, &expected))
    })
}

/// Holds when the value on `port` is present and truthy (non-null, non-false,
/// non-zero, non-empty).
pub fn port_truthy(port: impl Into<String>) -> Gate {
    let port = port.into();
    let label = format!("{} is truthy", port);
    Gate::when(label, move |inputs| inputs.get(&port).is_some_and(truthy))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Contains,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

// Longer operators first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 7] = [
    ("contains", Op::Contains),
    ("!=", Op::Ne),
    ("==", Op::Eq),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
];

/// Parse `port OP value`, returning (port, op, value). Splits on the first
/// operator outside double quotes.
fn split_expression(expr: &str) -> Option<(&str, Op, Value)> {
    let (at, token, op) = find_operator(expr)?;
    let port = expr[..at].trim();
    let raw = expr[at + token.len()..].trim();
    if port.is_empty() || raw.is_empty() || port.contains(char::is_whitespace) {
        return None;
    }
    Some((port, op, parse_operand(raw)))
}

fn find_operator(expr: &str) -> Option<(usize, &'static str, Op)> {
    let mut quoted = false;
    for (i, c) in expr.char_indices() {
        if c == '"' {
            quoted = !quoted;
            continue;
        }
        if quoted {
            continue;
        }
        let rest = &expr[i..];
        for (token, op) in OPERATORS {
            if !rest.starts_with(token) {
                continue;
            }
            // `contains` is a word, not part of a port name.
            if op == Op::Contains {
                let before = expr[..i].chars().next_back();
                let after = rest[token.len()..].chars().next();
                let bounded = |c: Option<char>| c.is_some_and(char::is_whitespace);
                if !bounded(before) || !bounded(after) {
                    continue;
                }
            }
            return Some((i, token, op));
        }
    }
    None
}

fn parse_operand(raw: &str) -> Value {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn invalid(expr: &str) -> GraphkError {
    GraphkError::Structural(Violations(vec![Violation::InvalidPredicate {
        expr: expr.to_string(),
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> PortValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_strategies_over_checkers() {
        let yes = |_: &PortValues| true;
        let no = |_: &PortValues| false;
        let empty = PortValues::new();

        let all = Gate::new(GateStrategy::AllMatch)
            .with_check("yes", yes)
            .with_check("no", no);
        assert!(!all.assess(&empty));

        let any = Gate::new(GateStrategy::AnyMatch)
            .with_check("yes", yes)
            .with_check("no", no);
        assert!(any.assess(&empty));

        let none = Gate::new(GateStrategy::NoneMatch).with_check("no", no);
        assert!(none.assess(&empty));
    }

    #[test]
    fn test_empty_gate_semantics() {
        let empty = PortValues::new();
        assert!(Gate::new(GateStrategy::AllMatch).assess(&empty));
        assert!(!Gate::new(GateStrategy::AnyMatch).assess(&empty));
        assert!(Gate::new(GateStrategy::NoneMatch).assess(&empty));
    }

    #[test]
    fn test_parse_equals() {
        let gate = Gate::parse(r#"status == "success""#).unwrap();
        assert!(gate.assess(&inputs(&[("status", json!("success"))])));
        assert!(!gate.assess(&inputs(&[("status", json!("failure"))])));
    }

    #[test]
    fn test_parse_not_equals() {
        let gate = Gate::parse(r#"status != "failure""#).unwrap();
        assert!(gate.assess(&inputs(&[("status", json!("success"))])));
        assert!(!gate.assess(&inputs(&[("status", json!("failure"))])));
    }

    #[test]
    fn test_parse_contains() {
        let gate = Gate::parse(r#"output contains "created""#).unwrap();
        assert!(gate.assess(&inputs(&[("output", json!("file created ok"))])));
        assert!(!gate.assess(&inputs(&[("output", json!("file deleted"))])));
    }

    #[test]
    fn test_parse_numeric_ordering() {
        let gt = Gate::parse("x > 0").unwrap();
        assert!(gt.assess(&inputs(&[("x", json!(5))])));
        assert!(!gt.assess(&inputs(&[("x", json!(-3))])));
        assert!(!gt.assess(&inputs(&[("x", json!(0))])));

        let ge = Gate::parse("x >= 0").unwrap();
        assert!(ge.assess(&inputs(&[("x", json!(0))])));

        let le = Gate::parse("x <= 1.5").unwrap();
        assert!(le.assess(&inputs(&[("x", json!(1.5))])));
        assert!(!le.assess(&inputs(&[("x", json!(2))])));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let gate = Gate::parse("n == 5").unwrap();
        assert!(gate.assess(&inputs(&[("n", json!(5.0))])));
    }

    #[test]
    fn test_missing_port_never_matches() {
        let gate = Gate::parse(r#"missing == "value""#).unwrap();
        assert!(!gate.assess(&PortValues::new()));
        let gate = Gate::parse(r#"missing != "value""#).unwrap();
        assert!(!gate.assess(&PortValues::new()));
    }

    #[test]
    fn test_parse_operators_inside_quotes() {
        let gate = Gate::parse(r#"status == "a!=b""#).unwrap();
        assert!(gate.assess(&inputs(&[("status", json!("a!=b"))])));
        assert!(!gate.assess(&inputs(&[("status", json!("a"))])));

        let gate = Gate::parse(r#"msg == "contains""#).unwrap();
        assert!(gate.assess(&inputs(&[("msg", json!("contains"))])));

        let gate = Gate::parse(r#"note contains "x > 1""#).unwrap();
        assert!(gate.assess(&inputs(&[("note", json!("when x > 1 holds"))])));
    }

    #[test]
    fn test_parse_contains_inside_port_name() {
        let gate = Gate::parse("contains_count > 2").unwrap();
        assert!(gate.assess(&inputs(&[("contains_count", json!(3))])));
    }

    #[test]
    fn test_parse_invalid_expression() {
        let err = Gate::parse("this is not valid").unwrap_err();
        assert!(matches!(
            err.violations(),
            Some([Violation::InvalidPredicate { .. }])
        ));
    }

    #[test]
    fn test_port_helpers() {
        let data = inputs(&[("x", json!(5)), ("flag", json!("")), ("name", json!("a"))]);
        assert!(port_gt("x", 0.0).assess(&data));
        assert!(!port_lt("x", 0.0).assess(&data));
        assert!(port_eq("name", json!("a")).assess(&data));
        assert!(!port_truthy("flag").assess(&data));
        assert!(port_truthy("x").assess(&data));
    }

    #[test]
    fn test_describe_lists_checker_labels() {
        let gate = port_gt("x", 0.0).with_label("positive");
        let desc = gate.describe();
        assert_eq!(desc["label"], json!("positive"));
        assert_eq!(desc["strategy"], json!("all_match"));
        assert_eq!(desc["checkers"], json!(["x > 0"]));
    }
}
