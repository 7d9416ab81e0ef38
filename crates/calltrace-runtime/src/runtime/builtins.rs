//! Built-in functions and methods of the built-in value types.

use std::cmp::Ordering;

use super::{binary, iterate, FaultKind, Interpreter, RuntimeFault};
use crate::ast::BinOp;
use crate::value::{format_float, Builtin, Dict, DictRef, ExceptionValue, ListRef, Value};

const LIST_METHODS: &[&str] = &[
    "append", "pop", "insert", "extend", "index", "count", "reverse", "sort", "copy", "clear",
    "remove",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "copy",
];
const SET_METHODS: &[&str] = &["add", "remove", "discard", "copy"];
const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "startswith", "endswith",
    "replace", "find", "count", "isdigit", "isalpha",
];

fn method_table(receiver: &Value) -> &'static [&'static str] {
    match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => &[],
    }
}

fn no_attribute(receiver: &Value, name: &str) -> RuntimeFault {
    RuntimeFault::new(
        FaultKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", receiver.type_name()),
    )
}

/// `obj.name` outside of call position.
pub(super) fn bound_method(receiver: Value, name: &str) -> Result<Value, RuntimeFault> {
    if !method_table(&receiver).contains(&name) {
        return Err(no_attribute(&receiver, name));
    }
    Ok(Value::BoundMethod {
        receiver: Box::new(receiver),
        name: name.into(),
    })
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeFault> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if args.len() < min {
        format!("at least {min}")
    } else {
        format!("at most {max}")
    };
    Err(RuntimeFault::type_error(format!(
        "{name}() takes {expected} argument{} ({} given)",
        if expected.ends_with(" 1") { "" } else { "s" },
        args.len()
    )))
}

/// Split out the allowed keyword arguments, rejecting any others.
fn keywords<const N: usize>(
    name: &str,
    kwargs: Vec<(String, Value)>,
    allowed: [&str; N],
) -> Result<[Option<Value>; N], RuntimeFault> {
    let mut out: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (key, value) in kwargs {
        match allowed.iter().position(|a| *a == key) {
            Some(idx) => out[idx] = Some(value),
            None if N == 0 => {
                return Err(RuntimeFault::type_error(format!(
                    "{name}() takes no keyword arguments"
                )))
            }
            None => {
                return Err(RuntimeFault::type_error(format!(
                    "'{key}' is an invalid keyword argument for {name}()"
                )))
            }
        }
    }
    Ok(out)
}

fn expect_int(name: &str, value: &Value) -> Result<i64, RuntimeFault> {
    value.as_int().ok_or_else(|| {
        RuntimeFault::type_error(format!(
            "{name}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

fn expect_str<'v>(name: &str, value: &'v Value) -> Result<&'v str, RuntimeFault> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(RuntimeFault::type_error(format!(
            "{name}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn len_of(value: &Value) -> Result<usize, RuntimeFault> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().len()),
        other => Err(RuntimeFault::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn collect_set(items: Vec<Value>) -> Result<Dict, RuntimeFault> {
    let mut set = Dict::new();
    for item in items {
        set.insert(item, Value::None)?;
    }
    Ok(set)
}

impl<'a> Interpreter<'a> {
    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let [sep, end] = keywords(name, kwargs, ["sep", "end"])?;
                let sep = optional_text(sep, " ")?;
                let end = optional_text(end, "\n")?;
                let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(&sep);
                self.write_output(&line);
                self.write_output(&end);
                Ok(Value::None)
            }
            Builtin::Len => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 1, 1)?;
                Ok(Value::Int(len_of(&args[0])? as i64))
            }
            Builtin::Range => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| expect_int(name, a))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => unreachable!("arity checked"),
                };
                if step == 0 {
                    return Err(RuntimeFault::value_error("range() arg 3 must not be zero"));
                }
                let mut out = Vec::new();
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    out.push(Value::Int(i));
                    i = match i.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Ok(Value::list(out))
            }
            Builtin::Min | Builtin::Max => {
                let [key, default] = keywords(name, kwargs, ["key", "default"])?;
                if args.is_empty() {
                    return Err(RuntimeFault::type_error(format!(
                        "{name} expected at least 1 argument, got 0"
                    )));
                }
                let items = if args.len() == 1 {
                    iterate(&args[0])?
                } else {
                    args
                };
                let want = if builtin == Builtin::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<(Value, Value)> = None;
                for item in items {
                    let k = self.sort_key(key.as_ref(), &item)?;
                    let replace = match &best {
                        None => true,
                        Some((best_key, _)) => k.py_cmp(best_key)? == Some(want),
                    };
                    if replace {
                        best = Some((k, item));
                    }
                }
                match (best, default) {
                    (Some((_, item)), _) => Ok(item),
                    (None, Some(default)) => Ok(default),
                    (None, None) => Err(RuntimeFault::value_error(format!(
                        "{name}() arg is an empty sequence"
                    ))),
                }
            }
            Builtin::Abs => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    v => match v.as_int() {
                        Some(n) => n.checked_abs().map(Value::Int).ok_or_else(|| {
                            RuntimeFault::new(FaultKind::OverflowError, "integer overflow")
                        }),
                        None => Err(RuntimeFault::type_error(format!(
                            "bad operand type for abs(): '{}'",
                            v.type_name()
                        ))),
                    },
                }
            }
            Builtin::Sum => {
                let [start] = keywords(name, kwargs, ["start"])?;
                arity(name, &args, 1, 2)?;
                let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
                for item in iterate(&args[0])? {
                    total = binary(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            Builtin::Int => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(v) => to_int(v),
                }
            }
            Builtin::Float => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(v) => to_float(v),
                }
            }
            Builtin::Str => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 0, 1)?;
                Ok(Value::str(
                    args.first().map(Value::to_string).unwrap_or_default(),
                ))
            }
            Builtin::Repr => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 1, 1)?;
                Ok(Value::str(args[0].repr()))
            }
            Builtin::Bool => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
            }
            Builtin::List | Builtin::Tuple | Builtin::Set => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(v) => iterate(v)?,
                    None => Vec::new(),
                };
                Ok(match builtin {
                    Builtin::List => Value::list(items),
                    Builtin::Tuple => Value::tuple(items),
                    _ => Value::set(collect_set(items)?),
                })
            }
            Builtin::Dict => {
                arity(name, &args, 0, 1)?;
                let mut dict = Dict::new();
                if let Some(source) = args.first() {
                    merge_into(&mut dict, source)?;
                }
                for (key, value) in kwargs {
                    dict.insert(Value::str(key), value)?;
                }
                Ok(Value::dict(dict))
            }
            Builtin::Sorted => {
                let [key, reverse] = keywords(name, kwargs, ["key", "reverse"])?;
                arity(name, &args, 1, 1)?;
                let items = iterate(&args[0])?;
                let reverse = reverse.is_some_and(|r| r.is_truthy());
                Ok(Value::list(self.sorted(items, key.as_ref(), reverse)?))
            }
            Builtin::Reversed => {
                keywords(name, kwargs, [])?;
                arity(name, &args, 1, 1)?;
                let mut items = iterate(&args[0])?;
                items.reverse();
                Ok(Value::list(items))
            }
            Builtin::Enumerate => {
                let [start] = keywords(name, kwargs, ["start"])?;
                arity(name, &args, 1, 2)?;
                let start = match args.get(1).or(start.as_ref()) {
                    Some(v) => expect_int(name, v)?,
                    None => 0,
                };
                let items = iterate(&args[0])?
                    .into_iter()
                    .zip(start..)
                    .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                    .collect();
                Ok(Value::list(items))
            }
            Builtin::Zip => {
                keywords(name, kwargs, [])?;
                let columns = args.iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let rows = (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect();
                Ok(Value::list(rows))
            }
            Builtin::Exception(kind) => {
                keywords(name, kwargs, [])?;
                let message = match args.as_slice() {
                    [] => String::new(),
                    [only] => only.to_string(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(std::rc::Rc::new(ExceptionValue {
                    kind,
                    message,
                })))
            }
        }
    }

    fn sort_key(&mut self, key: Option<&Value>, item: &Value) -> Result<Value, RuntimeFault> {
        match key {
            Some(Value::None) | None => Ok(item.clone()),
            Some(func) => self.call_value(func, vec![item.clone()], Vec::new()),
        }
    }

    fn sorted(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, RuntimeFault> {
        let mut decorated = Vec::with_capacity(items.len());
        for item in items {
            decorated.push((self.sort_key(key, &item)?, item));
        }
        let mut failure = None;
        decorated.sort_by(|(a, _), (b, _)| {
            let (x, y) = if reverse { (b, a) } else { (a, b) };
            match x.py_cmp(y) {
                Ok(ord) => ord.unwrap_or(Ordering::Equal),
                Err(err) => {
                    failure.get_or_insert(err);
                    Ordering::Equal
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(decorated.into_iter().map(|(_, item)| item).collect()),
        }
    }

    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        if !method_table(receiver).contains(&name) {
            return Err(no_attribute(receiver, name));
        }
        if name == "sort" {
            let [key, reverse] = keywords(name, kwargs, ["key", "reverse"])?;
            arity(name, &args, 0, 0)?;
            let Value::List(list) = receiver else {
                return Err(no_attribute(receiver, name));
            };
            let items = list.borrow().clone();
            let reverse = reverse.is_some_and(|r| r.is_truthy());
            let sorted = self.sorted(items, key.as_ref(), reverse)?;
            *list.borrow_mut() = sorted;
            return Ok(Value::None);
        }
        keywords(name, kwargs, [])?;
        match receiver {
            Value::List(list) => list_method(list, name, args),
            Value::Dict(dict) => dict_method(dict, name, args),
            Value::Set(set) => set_method(set, name, args),
            Value::Str(s) => str_method(s, name, args),
            other => Err(no_attribute(other, name)),
        }
    }
}

fn optional_text(value: Option<Value>, default: &str) -> Result<String, RuntimeFault> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(RuntimeFault::type_error(format!(
            "sep/end must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn merge_into(dict: &mut Dict, source: &Value) -> Result<(), RuntimeFault> {
    if let Value::Dict(other) = source {
        let pairs: Vec<(Value, Value)> = other
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for (idx, pair) in iterate(source)?.into_iter().enumerate() {
        match iterate(&pair)?.as_slice() {
            [k, v] => dict.insert(k.clone(), v.clone())?,
            other => {
                return Err(RuntimeFault::value_error(format!(
                    "dictionary update sequence element #{idx} has length {}; 2 is required",
                    other.len()
                )))
            }
        }
    }
    Ok(())
}

pub(crate) fn to_int(value: &Value) -> Result<Value, RuntimeFault> {
    match value {
        Value::Float(f) => {
            if f.is_nan() {
                return Err(RuntimeFault::value_error(
                    "cannot convert float NaN to integer",
                ));
            }
            if f.is_infinite() || f.abs() >= 9.223_372_036_854_776e18 {
                return Err(RuntimeFault::new(
                    FaultKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                RuntimeFault::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    value.repr()
                ))
            }),
        v => v.as_int().map(Value::Int).ok_or_else(|| {
            RuntimeFault::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

pub(crate) fn to_float(value: &Value) -> Result<Value, RuntimeFault> {
    match value {
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" | "nan" => text.replace("infinity", "inf").parse::<f64>(),
                _ => text.replace('_', "").parse::<f64>(),
            };
            parsed.map(Value::Float).map_err(|_| {
                RuntimeFault::value_error(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            })
        }
        v => v.as_f64().map(Value::Float).ok_or_else(|| {
            RuntimeFault::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn list_method(
    list: &ListRef,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeFault> {
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            list.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = iterate(&args[0])?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let idx = expect_int(name, &args[0])?;
            let idx = if idx < 0 { (idx + len).max(0) } else { idx.min(len) };
            items.insert(idx as usize, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeFault::new(FaultKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let idx = match args.first() {
                Some(v) => expect_int(name, v)?,
                None => len - 1,
            };
            let idx = if idx < 0 { idx + len } else { idx };
            if !(0..len).contains(&idx) {
                return Err(RuntimeFault::new(FaultKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(idx as usize))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            // The argument may be (or contain) this list, so compare before borrowing mutably.
            let found = list.borrow().iter().position(|v| v.py_eq(&args[0]));
            match found {
                Some(idx) => {
                    list.borrow_mut().remove(idx);
                    Ok(Value::None)
                }
                None => Err(RuntimeFault::value_error("list.remove(x): x not in list")),
            }
        }
        "index" => {
            arity(name, &args, 1, 1)?;
            list.borrow()
                .iter()
                .position(|v| v.py_eq(&args[0]))
                .map(|idx| Value::Int(idx as i64))
                .ok_or_else(|| RuntimeFault::value_error(format!("{} is not in list", args[0].repr())))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let n = list.borrow().iter().filter(|v| v.py_eq(&args[0])).count();
            Ok(Value::Int(n as i64))
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_attribute(&Value::List(list.clone()), name)),
    }
}

fn dict_method(
    dict: &DictRef,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeFault> {
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0])?.cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or_default()))
        }
        "keys" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }
        "values" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }
        "items" => {
            arity(name, &args, 0, 0)?;
            let pairs = dict
                .borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect();
            Ok(Value::list(pairs))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeFault::new(FaultKind::KeyError, args[0].repr())),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0])?.cloned();
            match existing {
                Some(v) => Ok(v),
                None => {
                    let default = args.get(1).cloned().unwrap_or_default();
                    dict.borrow_mut().insert(args[0].clone(), default.clone())?;
                    Ok(default)
                }
            }
        }
        "update" => {
            arity(name, &args, 1, 1)?;
            let mut staged = Dict::new();
            merge_into(&mut staged, &args[0])?;
            let mut target = dict.borrow_mut();
            for (k, v) in staged.iter() {
                target.insert(k.clone(), v.clone())?;
            }
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => Err(no_attribute(&Value::Dict(dict.clone()), name)),
    }
}

fn set_method(
    set: &DictRef,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeFault> {
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            set.borrow_mut().insert(args[0].clone(), Value::None)?;
            Ok(Value::None)
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            match set.borrow_mut().remove(&args[0])? {
                Some(_) => Ok(Value::None),
                None => Err(RuntimeFault::new(FaultKind::KeyError, args[0].repr())),
            }
        }
        "discard" => {
            arity(name, &args, 1, 1)?;
            set.borrow_mut().remove(&args[0])?;
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        _ => Err(no_attribute(&Value::Set(set.clone()), name)),
    }
}

fn str_method(s: &str, name: &str, args: Vec<Value>) -> Result<Value, RuntimeFault> {
    let text = |v: &str| Value::str(v);
    match name {
        "upper" => {
            arity(name, &args, 0, 0)?;
            Ok(text(&s.to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 0, 0)?;
            Ok(text(&s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str(name, v)?.chars().collect()),
            };
            let strip = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(strip),
                "lstrip" => s.trim_start_matches(strip),
                _ => s.trim_end_matches(strip),
            };
            Ok(text(out))
        }
        "split" => {
            arity(name, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(text).collect(),
                Some(sep) => {
                    let sep = expect_str(name, sep)?;
                    if sep.is_empty() {
                        return Err(RuntimeFault::value_error("empty separator"));
                    }
                    s.split(sep).map(text).collect()
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let mut pieces = Vec::new();
            for (idx, item) in iterate(&args[0])?.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.to_string()),
                    other => {
                        return Err(RuntimeFault::type_error(format!(
                            "sequence item {idx}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(text(&pieces.join(s)))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let affixes: Vec<Value> = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for affix in &affixes {
                let affix = expect_str(name, affix)?;
                let hit = if name == "startswith" {
                    s.starts_with(affix)
                } else {
                    s.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "replace" => {
            arity(name, &args, 2, 2)?;
            let from = expect_str(name, &args[0])?;
            let to = expect_str(name, &args[1])?;
            Ok(text(&s.replace(from, to)))
        }
        "find" => {
            arity(name, &args, 1, 1)?;
            let needle = expect_str(name, &args[0])?;
            let idx = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(idx))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let needle = expect_str(name, &args[0])?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        "isdigit" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        "isalpha" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }
        _ => Err(no_attribute(&Value::str(s), name)),
    }
}

/// Apply an f-string format spec: `[[fill]align][0][width][,][.precision][type]`.
pub(super) fn format_spec(value: &Value, spec: &str) -> Result<String, RuntimeFault> {
    let invalid = || RuntimeFault::value_error(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut pos = 0;

    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        pos = 2;
    } else if chars.first().is_some_and(|c| matches!(*c, '<' | '>' | '^')) {
        align = Some(chars[0]);
        pos = 1;
    }

    let mut zero_pad = false;
    if chars.get(pos) == Some(&'0') {
        zero_pad = true;
        pos += 1;
    }
    let width_start = pos;
    while chars.get(pos).is_some_and(char::is_ascii_digit) {
        pos += 1;
    }
    let width: usize = if pos > width_start {
        chars[width_start..pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid())?
    } else {
        0
    };

    let mut grouping = false;
    if chars.get(pos) == Some(&',') {
        grouping = true;
        pos += 1;
    }

    let mut precision = None;
    if chars.get(pos) == Some(&'.') {
        pos += 1;
        let start = pos;
        while chars.get(pos).is_some_and(char::is_ascii_digit) {
            pos += 1;
        }
        if pos == start {
            return Err(invalid());
        }
        let digits: String = chars[start..pos].iter().collect();
        precision = Some(digits.parse::<usize>().map_err(|_| invalid())?);
    }

    let ty = chars.get(pos).copied();
    if chars.len() > pos + usize::from(ty.is_some()) {
        return Err(invalid());
    }

    let numeric = value.as_f64().is_some();
    let mut body = match ty {
        Some('f') | Some('F') | Some('%') => {
            let f = value.as_f64().ok_or_else(invalid)?;
            let f = if ty == Some('%') { f * 100.0 } else { f };
            let mut out = format!("{:.*}", precision.unwrap_or(6), f);
            if ty == Some('%') {
                out.push('%');
            }
            out
        }
        Some('e') => {
            let f = value.as_f64().ok_or_else(invalid)?;
            let raw = format!("{:.*e}", precision.unwrap_or(6), f);
            let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        Some('d') => match value {
            Value::Float(_) => return Err(invalid()),
            v => v.as_int().ok_or_else(invalid)?.to_string(),
        },
        Some('s') => {
            if numeric {
                return Err(invalid());
            }
            value.to_string()
        }
        None => match (value, precision) {
            (Value::Float(f), Some(p)) => format!("{:.*}", p, f),
            (Value::Float(f), None) => format_float(*f),
            (Value::Str(s), Some(p)) => s.chars().take(p).collect(),
            (v, _) => v.to_string(),
        },
        Some(_) => return Err(invalid()),
    };

    if grouping {
        body = group_thousands(&body);
    }

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    if zero_pad && align.is_none() && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => ("", body.clone()),
        };
        return Ok(format!("{sign}{}{digits}", "0".repeat(pad)));
    }
    let fill_str = |n: usize| fill.to_string().repeat(n);
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '>' => format!("{}{body}", fill_str(pad)),
        '^' => format!("{}{body}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        _ => format!("{body}{}", fill_str(pad)),
    })
}

fn group_thousands(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, tail) = match rest.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn format_specs() {
        assert_eq!(format_spec(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_spec(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_spec(&Value::Int(42), "05").unwrap(), "00042");
        assert_eq!(format_spec(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
        assert!(format_spec(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn int_and_float_conversions() {
        assert_eq!(to_int(&Value::str(" 42 ")).unwrap(), Value::Int(42));
        assert_eq!(to_int(&Value::Float(-3.9)).unwrap(), Value::Int(-3));
        assert_eq!(
            to_int(&Value::str("4.5")).unwrap_err().to_string(),
            "ValueError: invalid literal for int() with base 10: '4.5'"
        );
        assert_eq!(to_float(&Value::str("1e3")).unwrap(), Value::Float(1000.0));
        assert!(matches!(to_float(&Value::str("-inf")).unwrap(), Value::Float(f) if f == f64::NEG_INFINITY));
    }

    #[test]
    fn unknown_method_is_attribute_error() {
        let err = bound_method(Value::Int(1), "append").unwrap_err();
        assert_eq!(err.to_string(), "AttributeError: 'int' object has no attribute 'append'");
    }
}
