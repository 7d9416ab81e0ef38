use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::runtime::{stack_exhausted, FaultKind, RuntimeFault};

/// Shared storage behind a `list` value.
///
/// Dropping the last handle releases nested containers iteratively, so a list nested millions
/// of levels deep does not unwind one Rust frame per level.
#[derive(Clone)]
pub struct ListRef(Rc<RefCell<Vec<Value>>>);

impl ListRef {
    pub fn new(items: Vec<Value>) -> Self {
        ListRef(Rc::new(RefCell::new(items)))
    }

    pub fn ptr_eq(&self, other: &ListRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl Deref for ListRef {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ListRef {
    fn drop(&mut self) {
        if let Some(cell) = Rc::get_mut(&mut self.0) {
            release(std::mem::take(cell.get_mut()));
        }
    }
}

/// Shared storage behind `dict` and `set` values.
#[derive(Clone)]
pub struct DictRef(Rc<RefCell<Dict>>);

impl DictRef {
    pub fn new(dict: Dict) -> Self {
        DictRef(Rc::new(RefCell::new(dict)))
    }

    pub fn ptr_eq(&self, other: &DictRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl Deref for DictRef {
    type Target = RefCell<Dict>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for DictRef {
    fn drop(&mut self) {
        if let Some(cell) = Rc::get_mut(&mut self.0) {
            let mut pending = Vec::new();
            cell.get_mut().drain_into(&mut pending);
            release(pending);
        }
    }
}

/// Immutable storage behind a `tuple` value.
#[derive(Clone)]
pub struct TupleRef(Rc<[Value]>);

impl TupleRef {
    pub fn ptr_eq(&self, other: &TupleRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl Deref for TupleRef {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl Drop for TupleRef {
    fn drop(&mut self) {
        if let Some(slots) = Rc::get_mut(&mut self.0) {
            release(slots.iter_mut().map(std::mem::take).collect());
        }
    }
}

/// Drop `pending` and every container only it keeps alive, one container at a time.
fn release(mut pending: Vec<Value>) {
    while let Some(mut value) = pending.pop() {
        match &mut value {
            Value::List(list) => {
                if let Some(cell) = Rc::get_mut(&mut list.0) {
                    pending.append(cell.get_mut());
                }
            }
            Value::Tuple(tuple) => {
                if let Some(slots) = Rc::get_mut(&mut tuple.0) {
                    pending.extend(slots.iter_mut().map(std::mem::take));
                }
            }
            Value::Dict(dict) | Value::Set(dict) => {
                if let Some(cell) = Rc::get_mut(&mut dict.0) {
                    cell.get_mut().drain_into(&mut pending);
                }
            }
            Value::BoundMethod { receiver, .. } => pending.push(std::mem::take(&mut **receiver)),
            _ => {}
        }
    }
}

/// Deepest container nesting a `repr`, comparison or key computation descends into.
const MAX_WALK_DEPTH: usize = 10_000;

/// Why a [`Walk`] refused to descend.
enum Stop {
    Cycle,
    TooDeep,
}

/// Containers open on the current traversal path (or pairs of them, for comparisons).
struct Walk<K> {
    open: HashSet<K>,
}

impl<K: Hash + Eq + Copy> Walk<K> {
    fn new() -> Self {
        Walk {
            open: HashSet::new(),
        }
    }

    fn descend<T>(&mut self, at: K, body: impl FnOnce(&mut Self) -> T) -> Result<T, Stop> {
        if self.open.len() >= MAX_WALK_DEPTH || stack_exhausted() {
            return Err(Stop::TooDeep);
        }
        if !self.open.insert(at) {
            return Err(Stop::Cycle);
        }
        let out = body(self);
        self.open.remove(&at);
        Ok(out)
    }
}

fn too_deep(what: &str) -> RuntimeFault {
    RuntimeFault::new(
        FaultKind::RecursionError,
        format!("maximum recursion depth exceeded {what}"),
    )
}

/// A user-defined function together with its evaluated default arguments.
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Min,
    Max,
    Abs,
    Sum,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Repr,
    Exception(FaultKind),
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        Some(match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "abs" => Builtin::Abs,
            "sum" => Builtin::Sum,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "tuple" => Builtin::Tuple,
            "dict" => Builtin::Dict,
            "set" => Builtin::Set,
            "sorted" => Builtin::Sorted,
            "reversed" => Builtin::Reversed,
            "enumerate" => Builtin::Enumerate,
            "zip" => Builtin::Zip,
            "repr" => Builtin::Repr,
            other => Builtin::Exception(FaultKind::from_name(other)?),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Sum => "sum",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Repr => "repr",
            Builtin::Exception(kind) => kind.name(),
        }
    }
}

/// An exception object created by user code (`ValueError("...")`) or bound by `except ... as e`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub kind: FaultKind,
    pub message: String,
}

/// Insertion-ordered hash table used for both `dict` and `set` (sets store `None` values).
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<ValueKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<&Value>, RuntimeFault> {
        let k = key.hash_key()?;
        Ok(self.index.get(&k).map(|&idx| &self.entries[idx].1))
    }

    pub fn contains(&self, key: &Value) -> Result<bool, RuntimeFault> {
        Ok(self.index.contains_key(&key.hash_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), RuntimeFault> {
        let k = key.hash_key()?;
        match self.index.get(&k) {
            Some(&idx) => self.entries[idx].1 = value,
            None => {
                self.index.insert(k, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, RuntimeFault> {
        let k = key.hash_key()?;
        let Some(idx) = self.index.remove(&k) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        self.index.clear();
        for (key, value) in self.entries.drain(..) {
            out.push(key);
            out.push(value);
        }
    }
}

/// Structural key used for dict/set lookups and for the tracer's argument signatures.
///
/// Numbers are normalized so that `1`, `1.0` and `True` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<ValueKey>),
    List(Vec<ValueKey>),
    Dict(Vec<(ValueKey, ValueKey)>),
    Set(Vec<ValueKey>),
    Identity(usize),
}

fn float_key(f: f64) -> ValueKey {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        ValueKey::Int(f as i64)
    } else {
        ValueKey::Float(f.to_bits())
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(TupleRef),
    Dict(DictRef),
    Set(DictRef),
    Function(Rc<Function>),
    /// The recording proxy installed in place of the traced function.
    Proxy(Rc<Function>),
    Builtin(Builtin),
    BoundMethod {
        receiver: Box<Value>,
        name: Rc<str>,
    },
    Exception(Rc<ExceptionValue>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Exception(e) => f.write_str(&e.message),
            other => f.write_str(&other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(ListRef::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(TupleRef(items.into()))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(DictRef::new(dict))
    }

    pub fn set(dict: Dict) -> Self {
        Value::Set(DictRef::new(dict))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Function(_) | Value::Proxy(_) => "function",
            Value::Builtin(Builtin::Exception(_)) => "type",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::BoundMethod { .. } => "builtin_function_or_method",
            Value::Exception(e) => e.kind.name(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Key for dict/set membership; mutable containers are rejected like Python does.
    pub fn hash_key(&self) -> Result<ValueKey, RuntimeFault> {
        self.hash_in(&mut Walk::new())
    }

    fn hash_in(&self, walk: &mut Walk<usize>) -> Result<ValueKey, RuntimeFault> {
        match self {
            Value::List(_) | Value::Dict(_) | Value::Set(_) => Err(RuntimeFault::new(
                FaultKind::TypeError,
                format!("unhashable type: '{}'", self.type_name()),
            )),
            Value::Tuple(items) => walk
                .descend(items.addr(), |walk| {
                    items
                        .iter()
                        .map(|item| item.hash_in(walk))
                        .collect::<Result<Vec<_>, _>>()
                })
                .map_err(|_| too_deep("while hashing"))?
                .map(ValueKey::Tuple),
            other => Ok(other.signature_key()),
        }
    }

    /// Structural key over any value, including mutable containers (snapshotted as-is).
    ///
    /// A container reached again through itself, or nested too deeply to walk, is keyed by
    /// identity instead.
    pub fn signature_key(&self) -> ValueKey {
        self.key_in(&mut Walk::new())
    }

    fn key_in(&self, walk: &mut Walk<usize>) -> ValueKey {
        match self {
            Value::None => ValueKey::None,
            Value::Bool(b) => ValueKey::Int(i64::from(*b)),
            Value::Int(n) => ValueKey::Int(*n),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => ValueKey::Str(s.to_string()),
            Value::Tuple(items) => walk
                .descend(items.addr(), |walk| {
                    ValueKey::Tuple(items.iter().map(|item| item.key_in(walk)).collect())
                })
                .unwrap_or(ValueKey::Identity(items.addr())),
            Value::List(items) => walk
                .descend(items.addr(), |walk| {
                    ValueKey::List(items.borrow().iter().map(|item| item.key_in(walk)).collect())
                })
                .unwrap_or(ValueKey::Identity(items.addr())),
            Value::Dict(d) => walk
                .descend(d.addr(), |walk| {
                    let mut pairs: Vec<(ValueKey, ValueKey)> = d
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.key_in(walk), v.key_in(walk)))
                        .collect();
                    pairs.sort();
                    ValueKey::Dict(pairs)
                })
                .unwrap_or(ValueKey::Identity(d.addr())),
            Value::Set(d) => walk
                .descend(d.addr(), |walk| {
                    let mut keys: Vec<ValueKey> =
                        d.borrow().keys().map(|k| k.key_in(walk)).collect();
                    keys.sort();
                    ValueKey::Set(keys)
                })
                .unwrap_or(ValueKey::Identity(d.addr())),
            Value::Function(f) | Value::Proxy(f) => ValueKey::Identity(Rc::as_ptr(f) as usize),
            Value::Builtin(b) => ValueKey::Str(format!("<built-in function {}>", b.name())),
            Value::BoundMethod { receiver, name } => {
                ValueKey::Tuple(vec![receiver.key_in(walk), ValueKey::Str(name.to_string())])
            }
            Value::Exception(e) => ValueKey::Identity(Rc::as_ptr(e) as usize),
        }
    }

    /// Python `==`. Two containers that reach the same pair again through themselves compare
    /// equal at that point.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_in(other, &mut Walk::new())
    }

    fn eq_in(&self, other: &Value, walk: &mut Walk<(usize, usize)>) -> bool {
        let nested = |result: Result<bool, Stop>| match result {
            Ok(eq) => eq,
            Err(Stop::Cycle) => true,
            Err(Stop::TooDeep) => false,
        };
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.ptr_eq(b)
                    || nested(walk.descend((a.addr(), b.addr()), |walk| {
                        seq_eq(&a.borrow(), &b.borrow(), walk)
                    }))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.ptr_eq(b)
                    || nested(walk.descend((a.addr(), b.addr()), |walk| seq_eq(a, b, walk)))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.ptr_eq(b)
                    || nested(walk.descend((a.addr(), b.addr()), |walk| {
                        let (a, b) = (a.borrow(), b.borrow());
                        a.len() == b.len()
                            && a.iter().all(|(k, v)| {
                                matches!(b.get(k), Ok(Some(other)) if v.eq_in(other, walk))
                            })
                    }))
            }
            (Value::Set(a), Value::Set(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.keys().all(|k| matches!(b.contains(k), Ok(true)))
            }
            (Value::Function(a), Value::Function(b)) | (Value::Proxy(a), Value::Proxy(b)) => {
                Rc::ptr_eq(a, b)
            }
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => match (a.as_int(), b.as_int()) {
                    (Some(i), Some(j)) => i == j,
                    _ => x == y,
                },
                _ => false,
            },
        }
    }

    /// Python ordering; `Ok(None)` for unordered floats (NaN).
    pub fn py_cmp(&self, other: &Value) -> Result<Option<Ordering>, RuntimeFault> {
        self.cmp_in(other, &mut Walk::new())
    }

    fn cmp_in(
        &self,
        other: &Value,
        walk: &mut Walk<(usize, usize)>,
    ) -> Result<Option<Ordering>, RuntimeFault> {
        let comparing = || too_deep("in comparison");
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => walk
                .descend((a.addr(), b.addr()), |walk| seq_cmp(&a.borrow(), &b.borrow(), walk))
                .map_err(|_| comparing())?,
            (Value::Tuple(a), Value::Tuple(b)) => walk
                .descend((a.addr(), b.addr()), |walk| seq_cmp(a, b, walk))
                .map_err(|_| comparing())?,
            (a, b) => {
                if let (Some(i), Some(j)) = (a.as_int(), b.as_int()) {
                    return Ok(Some(i.cmp(&j)));
                }
                match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                    _ => Err(RuntimeFault::new(
                        FaultKind::TypeError,
                        format!(
                            "'<' not supported between instances of '{}' and '{}'",
                            a.type_name(),
                            b.type_name()
                        ),
                    )),
                }
            }
        }
    }

    /// Python `repr`. A container reached again through itself prints as `[...]` / `{...}`.
    pub fn repr(&self) -> String {
        self.repr_in(&mut Walk::new())
    }

    fn repr_in(&self, walk: &mut Walk<usize>) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => repr_str(s),
            Value::List(items) => walk
                .descend(items.addr(), |walk| {
                    format!("[{}]", join_repr(items.borrow().iter(), walk))
                })
                .unwrap_or_else(|_| "[...]".to_string()),
            Value::Tuple(items) => walk
                .descend(items.addr(), |walk| {
                    if items.len() == 1 {
                        format!("({},)", items[0].repr_in(walk))
                    } else {
                        format!("({})", join_repr(items.iter(), walk))
                    }
                })
                .unwrap_or_else(|_| "(...)".to_string()),
            Value::Dict(d) => walk
                .descend(d.addr(), |walk| {
                    let body = d
                        .borrow()
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k.repr_in(walk), v.repr_in(walk)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{{{body}}}")
                })
                .unwrap_or_else(|_| "{...}".to_string()),
            Value::Set(d) => {
                if d.borrow().is_empty() {
                    return "set()".to_string();
                }
                walk.descend(d.addr(), |walk| format!("{{{}}}", join_repr(d.borrow().keys(), walk)))
                    .unwrap_or_else(|_| "{...}".to_string())
            }
            Value::Function(f) | Value::Proxy(f) => format!("<function {}>", f.name()),
            Value::Builtin(Builtin::Exception(kind)) => format!("<class '{}'>", kind.name()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::BoundMethod { receiver, name } => {
                format!(
                    "<built-in method {} of {} object>",
                    name,
                    receiver.type_name()
                )
            }
            Value::Exception(e) => format!("{}({})", e.kind.name(), repr_str(&e.message)),
        }
    }
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>, walk: &mut Walk<usize>) -> String {
    items
        .map(|item| item.repr_in(walk))
        .collect::<Vec<_>>()
        .join(", ")
}

fn seq_eq(a: &[Value], b: &[Value], walk: &mut Walk<(usize, usize)>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_in(y, walk))
}

fn seq_cmp(
    a: &[Value],
    b: &[Value],
    walk: &mut Walk<(usize, usize)>,
) -> Result<Option<Ordering>, RuntimeFault> {
    for (x, y) in a.iter().zip(b) {
        if x.py_eq(y) {
            continue;
        }
        return x.cmp_in(y, walk);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python-style float formatting (`3.0`, `0.1`, `1e+20`, `inf`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{f:e}");
        let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::from("it's"),
            Value::tuple(vec![Value::None]),
            Value::Bool(true),
        ]);
        assert_eq!(v.repr(), "[1, 2.0, \"it's\", (None,), True]");
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn numeric_keys_are_normalized() {
        assert_eq!(Value::Int(1).signature_key(), Value::Float(1.0).signature_key());
        assert_eq!(Value::Bool(true).signature_key(), Value::Int(1).signature_key());
        assert_ne!(Value::Float(1.5).signature_key(), Value::Int(1).signature_key());
    }

    #[test]
    fn lists_are_unhashable_but_have_signatures() {
        let v = Value::list(vec![Value::Int(1)]);
        assert!(v.hash_key().is_err());
        assert_eq!(
            v.signature_key(),
            ValueKey::List(vec![ValueKey::Int(1)])
        );
    }

    #[test]
    fn dict_preserves_insertion_order_across_removal() {
        let mut d = Dict::new();
        for k in ["a", "b", "c"] {
            d.insert(Value::from(k), Value::Int(k.len() as i64)).unwrap();
        }
        d.remove(&Value::from("a")).unwrap();
        d.insert(Value::from("a"), Value::Int(9)).unwrap();
        let keys: Vec<String> = d.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert_eq!(d.get(&Value::from("c")).unwrap(), Some(&Value::Int(1)));
    }

    #[test]
    fn self_referential_containers_terminate() {
        let a = Value::list(vec![Value::Int(1)]);
        let Value::List(cell) = &a else {
            unreachable!()
        };
        cell.borrow_mut().push(a.clone());

        assert_eq!(a.repr(), "[1, [...]]");
        assert_eq!(
            a.signature_key(),
            ValueKey::List(vec![ValueKey::Int(1), ValueKey::Identity(cell.addr())])
        );
        let b = Value::list(vec![Value::Int(1)]);
        let Value::List(other) = &b else {
            unreachable!()
        };
        other.borrow_mut().push(b.clone());
        assert!(a.py_eq(&b));

        let d = Value::dict(Dict::new());
        let Value::Dict(inner) = &d else {
            unreachable!()
        };
        inner.borrow_mut().insert(Value::from("self"), d.clone()).unwrap();
        assert_eq!(d.repr(), "{'self': {...}}");

        // Break the cycles so the test does not leak.
        cell.borrow_mut().clear();
        other.borrow_mut().clear();
        inner.borrow_mut().remove(&Value::from("self")).unwrap();
    }

    #[test]
    fn deeply_nested_values_render_hash_and_drop() {
        let mut list = Value::list(Vec::new());
        let mut tuple = Value::tuple(Vec::new());
        for _ in 0..200_000 {
            list = Value::list(vec![list]);
            tuple = Value::tuple(vec![tuple]);
        }

        let text = list.repr();
        assert!(text.starts_with("[[[") && text.ends_with("]]]"));
        assert_eq!(
            tuple.hash_key().unwrap_err().kind,
            FaultKind::RecursionError
        );
        drop(list);
        drop(tuple);
    }

    #[test]
    fn mixed_numeric_equality_and_ordering() {
        assert!(Value::Int(2).py_eq(&Value::Float(2.0)));
        assert_eq!(
            Value::Int(1).py_cmp(&Value::Float(1.5)).unwrap(),
            Some(Ordering::Less)
        );
        assert!(Value::from("a").py_cmp(&Value::Int(1)).is_err());
    }
}
