use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::value::{format_float, repr_str, Value};

/// A value captured into a [`CallRecord`].
///
/// Scalars are kept verbatim. Everything else (lists, dicts, functions, ...) is captured as its
/// textual representation at the moment the call started, so later mutation of the live object
/// does not change the record. Non-finite floats have no JSON number and are captured as their
/// repr (`nan`, `inf`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Repr { repr: String },
}

impl TraceValue {
    pub(crate) fn capture(value: &Value) -> Self {
        match value {
            Value::None => TraceValue::None,
            Value::Bool(b) => TraceValue::Bool(*b),
            Value::Int(n) => TraceValue::Int(*n),
            Value::Float(f) if f.is_finite() => TraceValue::Float(*f),
            Value::Str(s) => TraceValue::Str(s.to_string()),
            other => TraceValue::Repr {
                repr: other.repr(),
            },
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, TraceValue::Repr { .. })
    }
}

/// Renders the value the way the traced language would print its `repr`.
impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::None => f.write_str("None"),
            TraceValue::Bool(true) => f.write_str("True"),
            TraceValue::Bool(false) => f.write_str("False"),
            TraceValue::Int(n) => write!(f, "{n}"),
            TraceValue::Float(x) => f.write_str(&format_float(*x)),
            TraceValue::Str(s) => f.write_str(&repr_str(s)),
            TraceValue::Repr { repr } => f.write_str(repr),
        }
    }
}

impl From<i64> for TraceValue {
    fn from(value: i64) -> Self {
        TraceValue::Int(value)
    }
}

impl From<f64> for TraceValue {
    fn from(value: f64) -> Self {
        TraceValue::Float(value)
    }
}

impl From<bool> for TraceValue {
    fn from(value: bool) -> Self {
        TraceValue::Bool(value)
    }
}

impl From<&str> for TraceValue {
    fn from(value: &str) -> Self {
        TraceValue::Str(value.to_string())
    }
}

/// One invocation of the traced function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Zero-based position in call-start order.
    pub index: usize,
    /// Nesting level at call time; the outermost call is 0.
    pub depth: usize,
    /// The call that was on top of the active-call stack when this one started.
    pub parent_index: Option<usize>,
    pub arguments: Vec<TraceValue>,
    /// Keyword arguments, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyword_arguments: Vec<(String, TraceValue)>,
    /// Filled in when the call returns; stays `None` while running or after a fault.
    ///
    /// Omitted from JSON when absent, so `"result": null` always means the call returned `None`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub result: Option<TraceValue>,
    /// The result came from the tracer's cache and the body did not run.
    pub memoized: bool,
    /// The fault the call ended with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TraceValue>, D::Error> {
    TraceValue::deserialize(deserializer).map(Some)
}

impl CallRecord {
    /// Render the record as a call expression, e.g. `fibonacci(3)` or `f(1, k='x')`.
    pub fn label(&self, function: &str) -> String {
        let mut parts: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
        parts.extend(
            self.keyword_arguments
                .iter()
                .map(|(name, value)| format!("{name}={value}")),
        );
        format!("{function}({})", parts.join(", "))
    }
}

/// The complete, immutable outcome of one traced execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Name of the traced function.
    pub function: String,
    pub records: Vec<CallRecord>,
    /// Result of the outermost call.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub result: Option<TraceValue>,
    /// Lines printed by the program while it ran.
    #[serde(default)]
    pub output: Vec<String>,
}

impl Trace {
    pub fn root(&self) -> Option<&CallRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parent -> child index pairs, in child order.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.records
            .iter()
            .filter_map(|r| r.parent_index.map(|p| (p, r.index)))
            .collect()
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &CallRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| r.parent_index == Some(index))
    }

    /// Record indices grouped by depth (the layout a tree renderer needs).
    pub fn levels(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut levels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for record in &self.records {
            levels.entry(record.depth).or_default().push(record.index);
        }
        levels
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.records.iter().map(|r| r.depth).max()
    }

    pub fn memoized_count(&self) -> usize {
        self.records.iter().filter(|r| r.memoized).count()
    }

    pub fn label(&self, index: usize) -> Option<String> {
        self.records.get(index).map(|r| r.label(&self.function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(index: usize, depth: usize, parent: Option<usize>, arg: i64) -> CallRecord {
        CallRecord {
            index,
            depth,
            parent_index: parent,
            arguments: vec![TraceValue::Int(arg)],
            keyword_arguments: Vec::new(),
            result: Some(TraceValue::Int(arg)),
            memoized: false,
            error: None,
        }
    }

    fn sample() -> Trace {
        let mut records = vec![
            record(0, 0, None, 3),
            record(1, 1, Some(0), 2),
            record(2, 2, Some(1), 1),
            record(3, 1, Some(0), 1),
        ];
        records[3].memoized = true;
        Trace {
            function: "f".to_string(),
            records,
            result: Some(TraceValue::Int(3)),
            output: Vec::new(),
        }
    }

    #[test]
    fn consumer_views() {
        let trace = sample();
        assert_eq!(trace.edges(), vec![(0, 1), (1, 2), (0, 3)]);
        assert_eq!(
            trace.children(0).map(|r| r.index).collect::<Vec<_>>(),
            vec![1, 3]
        );
        let levels = trace.levels();
        assert_eq!(levels[&1], vec![1, 3]);
        assert_eq!(trace.max_depth(), Some(2));
        assert_eq!(trace.memoized_count(), 1);
        assert_eq!(trace.label(2).as_deref(), Some("f(1)"));
    }

    #[test]
    fn labels_render_reprs_and_keywords() {
        let record = CallRecord {
            index: 0,
            depth: 0,
            parent_index: None,
            arguments: vec![
                TraceValue::from("a"),
                TraceValue::Repr {
                    repr: "[1, 2]".to_string(),
                },
            ],
            keyword_arguments: vec![("k".to_string(), TraceValue::Bool(true))],
            result: None,
            memoized: false,
            error: None,
        };
        assert_eq!(record.label("g"), "g('a', [1, 2], k=True)");
    }

    #[test]
    fn serializes_camel_case_with_untagged_values() {
        let json = serde_json::to_value(&sample().records[1]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "index": 1,
                "depth": 1,
                "parentIndex": 0,
                "arguments": [2],
                "result": 2,
                "memoized": false
            })
        );
        let repr = serde_json::to_value(TraceValue::Repr {
            repr: "[1]".to_string(),
        })
        .unwrap();
        assert_eq!(repr, serde_json::json!({ "repr": "[1]" }));
    }

    #[test]
    fn returned_none_is_distinct_from_no_result() {
        let mut returned_none = sample().records[2].clone();
        returned_none.result = Some(TraceValue::None);
        let mut failed = returned_none.clone();
        failed.result = None;
        failed.error = Some("ValueError: bad".to_string());

        let json = serde_json::to_value(&returned_none).unwrap();
        assert_eq!(json["result"], serde_json::Value::Null);
        let back: CallRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.result, Some(TraceValue::None));

        let json = serde_json::to_value(&failed).unwrap();
        assert!(json.get("result").is_none());
        let back: CallRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn non_finite_floats_are_captured_as_reprs() {
        assert_eq!(TraceValue::capture(&Value::Float(1.5)), TraceValue::Float(1.5));
        assert_eq!(
            TraceValue::capture(&Value::Float(f64::NAN)),
            TraceValue::Repr {
                repr: "nan".to_string()
            }
        );
        assert_eq!(TraceValue::capture(&Value::Float(f64::NEG_INFINITY)).to_string(), "-inf");
    }
}
