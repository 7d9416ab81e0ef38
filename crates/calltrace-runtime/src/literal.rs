use std::fmt;

use crate::ast::{Expr, UnOp};
use crate::parser::parse_expression;
use crate::runtime::RuntimeFault;
use crate::tracer::TraceError;
use crate::value::{format_float, repr_str, Dict, Value};

/// The input handed to the traced function.
///
/// This is plain data so it can cross into the interpreter thread; it is turned into live
/// interpreter values only once the program has been loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<InputValue>),
    Tuple(Vec<InputValue>),
    Dict(Vec<(InputValue, InputValue)>),
    Set(Vec<InputValue>),
}

impl InputValue {
    /// Parse a literal such as `5`, `'abc'`, `[48, 18]` or `{'a': (1, -2.5)}`.
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let expr = parse_expression(text.trim())
            .map_err(|err| TraceError::InputApplication(format!("invalid input literal: {err}")))?;
        Self::from_expr(&expr).ok_or_else(|| {
            TraceError::InputApplication(format!("input is not a literal value: {}", text.trim()))
        })
    }

    fn from_expr(expr: &Expr) -> Option<Self> {
        let all = |items: &[Expr]| items.iter().map(Self::from_expr).collect::<Option<Vec<_>>>();
        match expr {
            Expr::Literal(value) => Self::from_scalar(value),
            Expr::List(items) => all(items).map(InputValue::List),
            Expr::Tuple(items) => all(items).map(InputValue::Tuple),
            Expr::Set(items) => all(items).map(InputValue::Set),
            Expr::Dict(pairs) => pairs
                .iter()
                .map(|(k, v)| Some((Self::from_expr(k)?, Self::from_expr(v)?)))
                .collect::<Option<Vec<_>>>()
                .map(InputValue::Dict),
            Expr::Unary { op, expr } => match (op, Self::from_expr(expr)?) {
                (UnOp::Neg, InputValue::Int(n)) => n.checked_neg().map(InputValue::Int),
                (UnOp::Neg, InputValue::Float(f)) => Some(InputValue::Float(-f)),
                (UnOp::Pos, v @ (InputValue::Int(_) | InputValue::Float(_))) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_scalar(value: &Value) -> Option<Self> {
        Some(match value {
            Value::None => InputValue::None,
            Value::Bool(b) => InputValue::Bool(*b),
            Value::Int(n) => InputValue::Int(*n),
            Value::Float(f) => InputValue::Float(*f),
            Value::Str(s) => InputValue::Str(s.to_string()),
            _ => return None,
        })
    }

    pub(crate) fn to_value(&self) -> Result<Value, RuntimeFault> {
        let all = |items: &[InputValue]| items.iter().map(Self::to_value).collect::<Result<Vec<_>, _>>();
        Ok(match self {
            InputValue::None => Value::None,
            InputValue::Bool(b) => Value::Bool(*b),
            InputValue::Int(n) => Value::Int(*n),
            InputValue::Float(f) => Value::Float(*f),
            InputValue::Str(s) => Value::str(s.as_str()),
            InputValue::List(items) => Value::list(all(items)?),
            InputValue::Tuple(items) => Value::tuple(all(items)?),
            InputValue::Set(items) => {
                let mut set = Dict::new();
                for item in all(items)? {
                    set.insert(item, Value::None)?;
                }
                Value::set(set)
            }
            InputValue::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    dict.insert(k.to_value()?, v.to_value()?)?;
                }
                Value::dict(dict)
            }
        })
    }

    /// Positional arguments for the outermost call: lists and tuples are spread, anything else
    /// is passed as the single argument.
    pub(crate) fn to_arguments(&self) -> Result<Vec<Value>, RuntimeFault> {
        match self {
            InputValue::List(items) | InputValue::Tuple(items) => {
                items.iter().map(Self::to_value).collect()
            }
            other => Ok(vec![other.to_value()?]),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(items: &[InputValue]) -> String {
            items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        }
        match self {
            InputValue::None => f.write_str("None"),
            InputValue::Bool(true) => f.write_str("True"),
            InputValue::Bool(false) => f.write_str("False"),
            InputValue::Int(n) => write!(f, "{n}"),
            InputValue::Float(x) => f.write_str(&format_float(*x)),
            InputValue::Str(s) => f.write_str(&repr_str(s)),
            InputValue::List(items) => write!(f, "[{}]", join(items)),
            InputValue::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            InputValue::Tuple(items) => write!(f, "({})", join(items)),
            InputValue::Set(items) if items.is_empty() => f.write_str("set()"),
            InputValue::Set(items) => write!(f, "{{{}}}", join(items)),
            InputValue::Dict(pairs) => {
                let body = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{body}}}")
            }
        }
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        InputValue::Int(value)
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        InputValue::Float(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        InputValue::Bool(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        InputValue::Str(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        InputValue::Str(value)
    }
}

impl<T: Into<InputValue>> From<Vec<T>> for InputValue {
    fn from(items: Vec<T>) -> Self {
        InputValue::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_scalars_and_containers() {
        assert_eq!(InputValue::parse("5").unwrap(), InputValue::Int(5));
        assert_eq!(InputValue::parse(" -2.5 ").unwrap(), InputValue::Float(-2.5));
        assert_eq!(InputValue::parse("'abc'").unwrap(), InputValue::from("abc"));
        assert_eq!(InputValue::parse("None").unwrap(), InputValue::None);
        assert_eq!(
            InputValue::parse("[48, 18]").unwrap(),
            InputValue::from(vec![48_i64, 18])
        );
        assert_eq!(
            InputValue::parse("(1, [2, -3])").unwrap(),
            InputValue::Tuple(vec![
                InputValue::Int(1),
                InputValue::List(vec![InputValue::Int(2), InputValue::Int(-3)]),
            ])
        );
        assert_eq!(
            InputValue::parse("{'a': True}").unwrap().to_string(),
            "{'a': True}"
        );
    }

    #[test]
    fn rejects_non_literals() {
        for text in ["x", "f(1)", "1 + 2", "", "[1,"] {
            let err = InputValue::parse(text).unwrap_err();
            assert!(
                matches!(err, TraceError::InputApplication(_)),
                "{text:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn lists_and_tuples_spread_into_arguments() {
        let args = InputValue::parse("(2, 3)").unwrap().to_arguments().unwrap();
        assert_eq!(args, vec![Value::Int(2), Value::Int(3)]);
        let args = InputValue::Int(4).to_arguments().unwrap();
        assert_eq!(args, vec![Value::Int(4)]);
    }

    #[test]
    fn unhashable_dict_keys_are_rejected() {
        let input = InputValue::parse("{(1, [2]): 3}").unwrap();
        assert!(input.to_value().is_err());
    }
}
