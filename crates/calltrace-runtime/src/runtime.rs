use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BinOp, BoolOp, CallArg, CmpOp, ExceptHandler, Expr, FStringPart, FunctionDef, Program, Stmt,
    StmtKind, Target, UnOp,
};
use crate::value::{Builtin, Dict, ExceptionValue, Function, Value};

mod builtins;

pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Stack kept free below the deepest interpreter frame. Evaluation stops with a
/// `RecursionError` once less than this remains.
const STACK_RED_ZONE: usize = 256 * 1024;

/// Whether the current thread is too close to the end of its stack to go deeper.
pub(crate) fn stack_exhausted() -> bool {
    stacker::remaining_stack().is_some_and(|left| left < STACK_RED_ZONE)
}

fn recursion_error() -> RuntimeFault {
    RuntimeFault::new(FaultKind::RecursionError, "maximum recursion depth exceeded")
}

/// Exception classes known to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Exception,
    ArithmeticError,
    LookupError,
    ZeroDivisionError,
    OverflowError,
    RecursionError,
    RuntimeError,
    NotImplementedError,
    NameError,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    AttributeError,
    AssertionError,
}

impl FaultKind {
    const ALL: [FaultKind; 15] = [
        FaultKind::Exception,
        FaultKind::ArithmeticError,
        FaultKind::LookupError,
        FaultKind::ZeroDivisionError,
        FaultKind::OverflowError,
        FaultKind::RecursionError,
        FaultKind::RuntimeError,
        FaultKind::NotImplementedError,
        FaultKind::NameError,
        FaultKind::TypeError,
        FaultKind::ValueError,
        FaultKind::IndexError,
        FaultKind::KeyError,
        FaultKind::AttributeError,
        FaultKind::AssertionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FaultKind::Exception => "Exception",
            FaultKind::ArithmeticError => "ArithmeticError",
            FaultKind::LookupError => "LookupError",
            FaultKind::ZeroDivisionError => "ZeroDivisionError",
            FaultKind::OverflowError => "OverflowError",
            FaultKind::RecursionError => "RecursionError",
            FaultKind::RuntimeError => "RuntimeError",
            FaultKind::NotImplementedError => "NotImplementedError",
            FaultKind::NameError => "NameError",
            FaultKind::TypeError => "TypeError",
            FaultKind::ValueError => "ValueError",
            FaultKind::IndexError => "IndexError",
            FaultKind::KeyError => "KeyError",
            FaultKind::AttributeError => "AttributeError",
            FaultKind::AssertionError => "AssertionError",
        }
    }

    pub fn from_name(name: &str) -> Option<FaultKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// `except ancestor:` catches `self`.
    pub fn is_subclass_of(self, ancestor: FaultKind) -> bool {
        if self == ancestor || ancestor == FaultKind::Exception {
            return true;
        }
        match ancestor {
            FaultKind::ArithmeticError => matches!(
                self,
                FaultKind::ZeroDivisionError | FaultKind::OverflowError
            ),
            FaultKind::LookupError => matches!(self, FaultKind::IndexError | FaultKind::KeyError),
            FaultKind::RuntimeError => matches!(
                self,
                FaultKind::RecursionError | FaultKind::NotImplementedError
            ),
            _ => false,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception raised while executing user code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render_fault(.kind, .message))]
pub struct RuntimeFault {
    pub kind: FaultKind,
    pub message: String,
}

fn render_fault(kind: &FaultKind, message: &str) -> String {
    if message.is_empty() {
        kind.to_string()
    } else {
        format!("{kind}: {message}")
    }
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeError, message)
    }

    pub(crate) fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ValueError, message)
    }

    fn overflow() -> Self {
        Self::new(FaultKind::OverflowError, "integer overflow")
    }

    fn zero_division(message: &str) -> Self {
        Self::new(FaultKind::ZeroDivisionError, message)
    }
}

/// Hook invoked around every call of a recording proxy (`Value::Proxy`).
pub(crate) trait CallObserver {
    /// Called before the body runs. Returning a value short-circuits the call with that result.
    fn enter(&mut self, args: &[Value], kwargs: &[(String, Value)]) -> Option<Value>;

    /// Called exactly once for every `enter` that returned `None`, on every exit path.
    fn exit(&mut self, outcome: Result<&Value, &RuntimeFault>);
}

struct Frame {
    /// `None` for module-level code, where assignments land in the global namespace.
    function: Option<Rc<FunctionDef>>,
    locals: HashMap<String, Value>,
    /// Faults currently being handled by an `except` block, innermost last.
    handling: Vec<RuntimeFault>,
}

impl Frame {
    fn module() -> Self {
        Self {
            function: None,
            locals: HashMap::new(),
            handling: Vec::new(),
        }
    }

    fn is_local(&self, name: &str) -> bool {
        match &self.function {
            Some(def) => !def.globals.iter().any(|g| g == name),
            None => false,
        }
    }
}

#[derive(Debug)]
enum ControlFlow {
    Next,
    Return(Value),
    Break,
    Continue,
}

/// Tree-walking interpreter over a parsed [`Program`].
///
/// The global namespace is a plain map that call sites consult at call time, which lets a
/// tracer rebind a function name after the module has run.
pub(crate) struct Interpreter<'a> {
    globals: HashMap<String, Value>,
    output: Vec<String>,
    pending_line: String,
    depth: usize,
    recursion_limit: usize,
    observer: Option<&'a mut dyn CallObserver>,
}

impl<'a> Interpreter<'a> {
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
            output: Vec::new(),
            pending_line: String::new(),
            depth: 0,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            observer: None,
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn CallObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Execute the module's top-level statements in the global namespace.
    pub fn run_module(&mut self, program: &Program) -> Result<(), RuntimeFault> {
        let mut frame = Frame::module();
        match self.exec_block(&mut frame, &program.body)? {
            ControlFlow::Next => Ok(()),
            // `return`/`break` outside their scope are rejected by the parser.
            other => Err(RuntimeFault::new(
                FaultKind::RuntimeError,
                format!("unexpected {other:?} at module level"),
            )),
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Captured `print` output, one entry per line.
    pub fn take_output(&mut self) -> Vec<String> {
        if !self.pending_line.is_empty() {
            let line = std::mem::take(&mut self.pending_line);
            self.output.push(line);
        }
        std::mem::take(&mut self.output)
    }

    fn write_output(&mut self, text: &str) {
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            self.pending_line.push_str(first);
        }
        for part in parts {
            let line = std::mem::replace(&mut self.pending_line, part.to_string());
            self.output.push(line);
        }
    }

    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        match callee {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::Proxy(func) => self.call_proxy(func, args, kwargs),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::BoundMethod { receiver, name } => self.call_method(receiver, name, args, kwargs),
            other => Err(RuntimeFault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_proxy(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        let Some(observer) = self.observer.as_mut() else {
            return self.call_function(func, args, kwargs);
        };
        if let Some(cached) = observer.enter(&args, &kwargs) {
            return Ok(cached);
        }
        let res = self.call_function(func, args, kwargs);
        if let Some(observer) = self.observer.as_mut() {
            observer.exit(res.as_ref());
        }
        res
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        if self.depth >= self.recursion_limit || stack_exhausted() {
            return Err(recursion_error());
        }
        let locals = bind_arguments(func, args, kwargs)?;
        let def = Rc::clone(&func.def);
        let mut frame = Frame {
            function: Some(Rc::clone(&def)),
            locals,
            handling: Vec::new(),
        };

        self.depth += 1;
        let res = self.exec_block(&mut frame, &def.body);
        self.depth -= 1;

        match res? {
            ControlFlow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn exec_block(&mut self, frame: &mut Frame, body: &[Stmt]) -> Result<ControlFlow, RuntimeFault> {
        for stmt in body {
            match self.exec_stmt(frame, stmt)? {
                ControlFlow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Next)
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> Result<ControlFlow, RuntimeFault> {
        if stack_exhausted() {
            return Err(recursion_error());
        }
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::new();
                for param in &def.params {
                    if let Some(expr) = &param.default {
                        defaults.push(self.eval_expr(frame, expr)?);
                    }
                }
                let func = Value::Function(Rc::new(Function {
                    def: Rc::clone(def),
                    defaults,
                }));
                self.assign_name(frame, &def.name, func);
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(frame, expr)?,
                    None => Value::None,
                };
                return Ok(ControlFlow::Return(value));
            }
            StmtKind::If {
                cond,
                then_body,
                elifs,
                else_body,
            } => {
                if self.eval_expr(frame, cond)?.is_truthy() {
                    return self.exec_block(frame, then_body);
                }
                for (cond, body) in elifs {
                    if self.eval_expr(frame, cond)?.is_truthy() {
                        return self.exec_block(frame, body);
                    }
                }
                return self.exec_block(frame, else_body);
            }
            StmtKind::While { cond, body } => {
                while self.eval_expr(frame, cond)?.is_truthy() {
                    match self.exec_block(frame, body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Next | ControlFlow::Continue => {}
                        flow @ ControlFlow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::For {
                target,
                iterable,
                body,
            } => {
                let iterable = self.eval_expr(frame, iterable)?;
                for item in iterate(&iterable)? {
                    self.assign(frame, target, item)?;
                    match self.exec_block(frame, body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Next | ControlFlow::Continue => {}
                        flow @ ControlFlow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(frame, value)?;
                for target in targets {
                    self.assign(frame, target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(frame, target, *op, value)?,
            StmtKind::Expr(expr) => {
                self.eval_expr(frame, expr)?;
            }
            StmtKind::Try {
                body,
                handlers,
                finally_body,
            } => return self.exec_try(frame, body, handlers, finally_body),
            StmtKind::Raise(expr) => return Err(self.eval_raise(frame, expr.as_ref())?),
            StmtKind::Assert { cond, message } => {
                if !self.eval_expr(frame, cond)?.is_truthy() {
                    let message = match message {
                        Some(expr) => self.eval_expr(frame, expr)?.to_string(),
                        None => String::new(),
                    };
                    return Err(RuntimeFault::new(FaultKind::AssertionError, message));
                }
            }
            // Collected into `FunctionDef::globals` at parse time.
            StmtKind::Global(_) => {}
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(frame, target)?;
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(ControlFlow::Break),
            StmtKind::Continue => return Ok(ControlFlow::Continue),
        }
        Ok(ControlFlow::Next)
    }

    fn exec_try(
        &mut self,
        frame: &mut Frame,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        finally_body: &[Stmt],
    ) -> Result<ControlFlow, RuntimeFault> {
        let mut res = self.exec_block(frame, body);
        if let Err(fault) = &res {
            let mut matched = None;
            for handler in handlers {
                if self.handler_matches(handler, fault)? {
                    matched = Some(handler);
                    break;
                }
            }
            if let Some(handler) = matched {
                let fault = fault.clone();
                if let Some(binding) = &handler.binding {
                    let exc = Value::Exception(Rc::new(ExceptionValue {
                        kind: fault.kind,
                        message: fault.message.clone(),
                    }));
                    self.assign_name(frame, binding, exc);
                }
                frame.handling.push(fault);
                res = self.exec_block(frame, &handler.body);
                frame.handling.pop();
            }
        }

        if !finally_body.is_empty() {
            match self.exec_block(frame, finally_body)? {
                ControlFlow::Next => {}
                flow => return Ok(flow),
            }
        }
        res
    }

    fn handler_matches(
        &self,
        handler: &ExceptHandler,
        fault: &RuntimeFault,
    ) -> Result<bool, RuntimeFault> {
        let Some(name) = &handler.kind else {
            return Ok(true);
        };
        match FaultKind::from_name(name) {
            Some(kind) => Ok(fault.kind.is_subclass_of(kind)),
            None => Err(RuntimeFault::new(
                FaultKind::NameError,
                format!("name '{name}' is not defined"),
            )),
        }
    }

    fn eval_raise(&mut self, frame: &mut Frame, expr: Option<&Expr>) -> Result<RuntimeFault, RuntimeFault> {
        let Some(expr) = expr else {
            return Ok(frame.handling.last().cloned().unwrap_or_else(|| {
                RuntimeFault::new(FaultKind::RuntimeError, "No active exception to reraise")
            }));
        };
        match self.eval_expr(frame, expr)? {
            Value::Exception(exc) => Ok(RuntimeFault::new(exc.kind, exc.message.clone())),
            Value::Builtin(Builtin::Exception(kind)) => Ok(RuntimeFault::new(kind, "")),
            _ => Err(RuntimeFault::type_error(
                "exceptions must derive from BaseException",
            )),
        }
    }

    fn exec_aug_assign(
        &mut self,
        frame: &mut Frame,
        target: &Target,
        op: BinOp,
        value: &Expr,
    ) -> Result<(), RuntimeFault> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(frame, name)?;
                let rhs = self.eval_expr(frame, value)?;
                let updated = augmented(op, current, rhs)?;
                self.assign_name(frame, name, updated);
            }
            Target::Subscript { object, index } => {
                let object = self.eval_expr(frame, object)?;
                let index = self.eval_expr(frame, index)?;
                let current = get_item(&object, &index)?;
                let rhs = self.eval_expr(frame, value)?;
                let updated = augmented(op, current, rhs)?;
                set_item(&object, index, updated)?;
            }
            Target::Tuple(_) => {
                return Err(RuntimeFault::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    fn assign_name(&mut self, frame: &mut Frame, name: &str, value: Value) {
        if frame.is_local(name) {
            frame.locals.insert(name.to_string(), value);
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    fn assign(&mut self, frame: &mut Frame, target: &Target, value: Value) -> Result<(), RuntimeFault> {
        match target {
            Target::Name(name) => self.assign_name(frame, name, value),
            Target::Subscript { object, index } => {
                let object = self.eval_expr(frame, object)?;
                if let Expr::Slice { .. } = index {
                    return Err(RuntimeFault::type_error("slice assignment is not supported"));
                }
                let index = self.eval_expr(frame, index)?;
                set_item(&object, index, value)?;
            }
            Target::Tuple(targets) => {
                let items = iterate(&value)?;
                if items.len() < targets.len() {
                    return Err(RuntimeFault::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(RuntimeFault::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(frame, target, item)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, frame: &mut Frame, target: &Target) -> Result<(), RuntimeFault> {
        match target {
            Target::Name(name) => {
                let removed = if frame.is_local(name) {
                    frame.locals.remove(name)
                } else {
                    self.globals.remove(name)
                };
                if removed.is_none() {
                    return Err(name_error(name));
                }
            }
            Target::Subscript { object, index } => {
                let object = self.eval_expr(frame, object)?;
                let index = self.eval_expr(frame, index)?;
                del_item(&object, &index)?;
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(frame, target)?;
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, frame: &Frame, name: &str) -> Result<Value, RuntimeFault> {
        if let Some(value) = frame.locals.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        Builtin::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| name_error(name))
    }

    fn eval_expr(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Value, RuntimeFault> {
        if stack_exhausted() {
            return Err(recursion_error());
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup(frame, name),
            Expr::List(items) => Ok(Value::list(self.eval_exprs(frame, items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_exprs(frame, items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval_expr(frame, key)?;
                    let value = self.eval_expr(frame, value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Set(items) => {
                let mut set = Dict::new();
                for item in items {
                    let item = self.eval_expr(frame, item)?;
                    set.insert(item, Value::None)?;
                }
                Ok(Value::set(set))
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Hole { expr, repr, spec } => {
                            let value = self.eval_expr(frame, expr)?;
                            let text = if *repr { value.repr() } else { value.to_string() };
                            match spec {
                                Some(spec) => {
                                    let formatted = if *repr {
                                        builtins::format_spec(&Value::str(text), spec)?
                                    } else {
                                        builtins::format_spec(&value, spec)?
                                    };
                                    out.push_str(&formatted);
                                }
                                None => out.push_str(&text),
                            }
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::ListComp {
                element,
                target,
                iterable,
                conditions,
            } => {
                let iterable = self.eval_expr(frame, iterable)?;
                let mut out = Vec::new();
                'items: for item in iterate(&iterable)? {
                    self.assign(frame, target, item)?;
                    for cond in conditions {
                        if !self.eval_expr(frame, cond)?.is_truthy() {
                            continue 'items;
                        }
                    }
                    out.push(self.eval_expr(frame, element)?);
                }
                Ok(Value::list(out))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval_expr(frame, expr)?;
                unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval_expr(frame, left)?;
                let r = self.eval_expr(frame, right)?;
                binary(*op, &l, &r)
            }
            Expr::BoolOp { op, left, right } => {
                let l = self.eval_expr(frame, left)?;
                match (op, l.is_truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval_expr(frame, right),
                }
            }
            Expr::Compare { left, ops } => {
                let mut current = self.eval_expr(frame, left)?;
                for (op, right) in ops {
                    let right = self.eval_expr(frame, right)?;
                    if !compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(frame, cond)?.is_truthy() {
                    self.eval_expr(frame, then)
                } else {
                    self.eval_expr(frame, otherwise)
                }
            }
            Expr::Call { callee, args } => {
                if let Expr::Attribute { object, name } = callee.as_ref() {
                    let receiver = self.eval_expr(frame, object)?;
                    let (args, kwargs) = self.eval_call_args(frame, args)?;
                    return self.call_method(&receiver, name, args, kwargs);
                }
                let callee = self.eval_expr(frame, callee)?;
                let (args, kwargs) = self.eval_call_args(frame, args)?;
                self.call_value(&callee, args, kwargs)
            }
            Expr::Attribute { object, name } => {
                let receiver = self.eval_expr(frame, object)?;
                builtins::bound_method(receiver, name)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval_expr(frame, object)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let lower = self.eval_optional(frame, lower.as_deref())?;
                    let upper = self.eval_optional(frame, upper.as_deref())?;
                    let step = self.eval_optional(frame, step.as_deref())?;
                    return get_slice(&object, &lower, &upper, &step);
                }
                let index = self.eval_expr(frame, index)?;
                get_item(&object, &index)
            }
            Expr::Slice { .. } => Err(RuntimeFault::type_error(
                "slice expression outside of a subscript",
            )),
        }
    }

    fn eval_optional(&mut self, frame: &mut Frame, expr: Option<&Expr>) -> Result<Value, RuntimeFault> {
        match expr {
            Some(expr) => self.eval_expr(frame, expr),
            None => Ok(Value::None),
        }
    }

    fn eval_exprs(&mut self, frame: &mut Frame, exprs: &[Expr]) -> Result<Vec<Value>, RuntimeFault> {
        exprs.iter().map(|e| self.eval_expr(frame, e)).collect()
    }

    fn eval_call_args(
        &mut self,
        frame: &mut Frame,
        args: &[CallArg],
    ) -> Result<(Vec<Value>, Vec<(String, Value)>), RuntimeFault> {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            let value = self.eval_expr(frame, &arg.expr)?;
            match &arg.name {
                Some(name) => keywords.push((name.clone(), value)),
                None => positional.push(value),
            }
        }
        Ok((positional, keywords))
    }
}

fn name_error(name: &str) -> RuntimeFault {
    RuntimeFault::new(FaultKind::NameError, format!("name '{name}' is not defined"))
}

/// Bind call arguments to the function's parameters, Python style.
pub(crate) fn bind_arguments(
    func: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<HashMap<String, Value>, RuntimeFault> {
    let def = &func.def;
    let name = def.name.as_str();
    let params = &def.params;
    if args.len() > params.len() {
        return Err(RuntimeFault::type_error(format!(
            "{name}() takes {} positional argument{} but {} {} given",
            params.len(),
            plural(params.len()),
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }

    let mut locals: HashMap<String, Value> = HashMap::new();
    for (param, value) in params.iter().zip(args) {
        locals.insert(param.name.clone(), value);
    }
    for (key, value) in kwargs {
        if !params.iter().any(|p| p.name == key) {
            return Err(RuntimeFault::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
        if locals.contains_key(&key) {
            return Err(RuntimeFault::type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        locals.insert(key, value);
    }

    let first_default = params.len() - func.defaults.len();
    let mut missing = Vec::new();
    for (idx, param) in params.iter().enumerate() {
        if locals.contains_key(&param.name) {
            continue;
        }
        if idx >= first_default {
            locals.insert(param.name.clone(), func.defaults[idx - first_default].clone());
        } else {
            missing.push(format!("'{}'", param.name));
        }
    }
    if !missing.is_empty() {
        let listed = match missing.as_slice() {
            [only] => only.clone(),
            [init @ .., last] => format!("{} and {last}", init.join(", ")),
            [] => String::new(),
        };
        return Err(RuntimeFault::type_error(format!(
            "{name}() missing {} required positional argument{}: {listed}",
            missing.len(),
            plural(missing.len()),
        )));
    }
    Ok(locals)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Materialize an iterable value into its items.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, RuntimeFault> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().keys().cloned().collect()),
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnOp, value: Value) -> Result<Value, RuntimeFault> {
    match (op, &value) {
        (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(RuntimeFault::overflow),
        (UnOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (op, v) => Err(RuntimeFault::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

fn augmented(op: BinOp, current: Value, rhs: Value) -> Result<Value, RuntimeFault> {
    // `list += iterable` extends in place.
    if let (BinOp::Add, Value::List(items)) = (op, &current) {
        let extra = iterate(&rhs)?;
        items.borrow_mut().extend(extra);
        return Ok(current);
    }
    binary(op, &current, &rhs)
}

fn unsupported(op: BinOp, l: &Value, r: &Value) -> RuntimeFault {
    RuntimeFault::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

pub(crate) fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, RuntimeFault> {
    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        return int_binary(op, a, b);
    }
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return float_binary(op, a, b);
    }
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Sub, Value::Set(a), Value::Set(b)) => {
            let mut out = Dict::new();
            let b = b.borrow();
            for key in a.borrow().keys() {
                if !b.contains(key)? {
                    out.insert(key.clone(), Value::None)?;
                }
            }
            Ok(Value::set(out))
        }
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq) if n.as_int().is_some() => {
            let count = usize::try_from(n.as_int().unwrap_or_default()).unwrap_or(0);
            match seq {
                Value::Str(s) => Ok(Value::str(s.repeat(count))),
                Value::List(items) => Ok(Value::list(repeat_items(&items.borrow(), count))),
                Value::Tuple(items) => Ok(Value::tuple(repeat_items(items, count))),
                _ => Err(unsupported(op, l, r)),
            }
        }
        _ => Err(unsupported(op, l, r)),
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeFault> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or_else(RuntimeFault::overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(RuntimeFault::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(RuntimeFault::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let q = a.checked_div(b).ok_or_else(RuntimeFault::overflow)?;
            let adjust = (a % b != 0) && ((a < 0) != (b < 0));
            Ok(Value::Int(if adjust { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RuntimeFault::zero_division("integer modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(RuntimeFault::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| RuntimeFault::overflow())?;
            checked(a.checked_pow(exp))
        }
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value, RuntimeFault> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(RuntimeFault::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(RuntimeFault::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(RuntimeFault::zero_division("float modulo"));
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(RuntimeFault::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(value))
}

pub(crate) fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, RuntimeFault> {
    use std::cmp::Ordering;
    let ordered = |wanted: fn(Ordering) -> bool| -> Result<bool, RuntimeFault> {
        Ok(l.py_cmp(r)?.is_some_and(wanted))
    };
    match op {
        CmpOp::Eq => Ok(l.py_eq(r)),
        CmpOp::Ne => Ok(!l.py_eq(r)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::Le => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::Ge => ordered(Ordering::is_ge),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => contains(r, l).map(|found| !found),
        CmpOp::Is => Ok(is_same(l, r)),
        CmpOp::IsNot => Ok(!is_same(l, r)),
    }
}

fn is_same(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) => a.ptr_eq(b),
        (Value::Dict(a), Value::Dict(b)) | (Value::Set(a), Value::Set(b)) => a.ptr_eq(b),
        (Value::Tuple(a), Value::Tuple(b)) => a.ptr_eq(b),
        (Value::Function(a), Value::Function(b)) | (Value::Proxy(a), Value::Proxy(b)) => {
            Rc::ptr_eq(a, b)
        }
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, RuntimeFault> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(RuntimeFault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(d) | Value::Set(d) => d.borrow().contains(item),
        other => Err(RuntimeFault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn sequence_index(len: usize, index: &Value, type_name: &str) -> Result<Option<usize>, RuntimeFault> {
    let Some(idx) = index.as_int() else {
        return Err(RuntimeFault::type_error(format!(
            "{type_name} indices must be integers or slices, not {}",
            index.type_name()
        )));
    };
    let len = len as i64;
    let idx = if idx < 0 { idx + len } else { idx };
    if (0..len).contains(&idx) {
        Ok(Some(idx as usize))
    } else {
        Ok(None)
    }
}

fn index_error(type_name: &str) -> RuntimeFault {
    RuntimeFault::new(
        FaultKind::IndexError,
        format!("{type_name} index out of range"),
    )
}

pub(crate) fn get_item(object: &Value, index: &Value) -> Result<Value, RuntimeFault> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let idx = sequence_index(items.len(), index, "list")?.ok_or_else(|| index_error("list"))?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx =
                sequence_index(items.len(), index, "tuple")?.ok_or_else(|| index_error("tuple"))?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx =
                sequence_index(chars.len(), index, "string")?.ok_or_else(|| index_error("string"))?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Dict(d) => d
            .borrow()
            .get(index)?
            .cloned()
            .ok_or_else(|| RuntimeFault::new(FaultKind::KeyError, index.repr())),
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(object: &Value, index: Value, value: Value) -> Result<(), RuntimeFault> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = sequence_index(items.len(), &index, "list")?.ok_or_else(|| {
                RuntimeFault::new(FaultKind::IndexError, "list assignment index out of range")
            })?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(d) => d.borrow_mut().insert(index, value),
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn del_item(object: &Value, index: &Value) -> Result<(), RuntimeFault> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = sequence_index(items.len(), index, "list")?.ok_or_else(|| {
                RuntimeFault::new(FaultKind::IndexError, "list assignment index out of range")
            })?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(d) => match d.borrow_mut().remove(index)? {
            Some(_) => Ok(()),
            None => Err(RuntimeFault::new(FaultKind::KeyError, index.repr())),
        },
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

/// Python slice index computation: returns the selected positions.
fn slice_positions(
    len: usize,
    lower: &Value,
    upper: &Value,
    step: &Value,
) -> Result<Vec<usize>, RuntimeFault> {
    let as_bound = |v: &Value| -> Result<Option<i64>, RuntimeFault> {
        match v {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                RuntimeFault::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    };
    let step = as_bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeFault::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(b) => {
                let b = if b < 0 { b + len } else { b };
                if step > 0 {
                    b.clamp(0, len)
                } else {
                    b.clamp(-1, len - 1)
                }
            }
        }
    };
    let (start, stop) = if step > 0 {
        (clamp(as_bound(lower)?, 0), clamp(as_bound(upper)?, len))
    } else {
        (clamp(as_bound(lower)?, len - 1), clamp(as_bound(upper)?, -1))
    };

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

fn get_slice(object: &Value, lower: &Value, upper: &Value, step: &Value) -> Result<Value, RuntimeFault> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(source: &str) -> Result<Interpreter<'static>, RuntimeFault> {
        let program = parse_program(source).expect("parse");
        let mut interp = Interpreter::new();
        interp.run_module(&program)?;
        Ok(interp)
    }

    fn global(source: &str, name: &str) -> Value {
        run(source)
            .expect("run")
            .global(name)
            .cloned()
            .expect("global defined")
    }

    fn fault(source: &str) -> RuntimeFault {
        match run(source) {
            Ok(_) => panic!("expected a fault"),
            Err(fault) => fault,
        }
    }

    #[test]
    fn arithmetic_follows_python_semantics() {
        assert_eq!(global("x = 7 // -2", "x"), Value::Int(-4));
        assert_eq!(global("x = -7 % 3", "x"), Value::Int(2));
        assert_eq!(global("x = 7 / 2", "x").repr(), "3.5");
        assert_eq!(global("x = 2 ** 10", "x"), Value::Int(1024));
        assert_eq!(global("x = 2 ** -1", "x").repr(), "0.5");
        assert_eq!(global("x = 'ab' * 3", "x").repr(), "'ababab'");
        assert_eq!(global("x = [1] + [2, 3]", "x").repr(), "[1, 2, 3]");
    }

    #[test]
    fn integer_overflow_is_a_fault() {
        let f = fault("x = 9223372036854775807 + 1");
        assert_eq!(f.kind, FaultKind::OverflowError);
    }

    #[test]
    fn division_by_zero_message() {
        assert_eq!(fault("x = 1 / 0").to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn functions_defaults_and_keywords() {
        let src = "\
def f(a, b=10, c=100):
    return a + b + c

x = f(1)
y = f(1, c=2)
z = f(a=1, b=2, c=3)
";
        let interp = run(src).unwrap();
        assert_eq!(interp.global("x"), Some(&Value::Int(111)));
        assert_eq!(interp.global("y"), Some(&Value::Int(13)));
        assert_eq!(interp.global("z"), Some(&Value::Int(6)));
    }

    #[test]
    fn binding_errors_match_python_wording() {
        let f = fault("def f(a, b):\n    return a\nf(1)\n");
        assert_eq!(
            f.to_string(),
            "TypeError: f() missing 1 required positional argument: 'b'"
        );
        let f = fault("def f(a):\n    return a\nf(1, 2)\n");
        assert_eq!(
            f.to_string(),
            "TypeError: f() takes 1 positional argument but 2 were given"
        );
    }

    #[test]
    fn locals_do_not_leak_and_global_statement_rebinds() {
        let src = "\
counter = 0
def bump():
    global counter
    counter += 1
    temp = 5
    return temp

bump()
bump()
";
        let interp = run(src).unwrap();
        assert_eq!(interp.global("counter"), Some(&Value::Int(2)));
        assert!(interp.global("temp").is_none());
    }

    #[test]
    fn try_except_finally_and_reraise() {
        let src = "\
log = []
def risky(n):
    if n == 0:
        raise ValueError('zero')
    return 10 // n

try:
    risky(0)
except ValueError as e:
    log.append(str(e))
finally:
    log.append('done')

try:
    try:
        risky(0)
    except ValueError:
        raise
except Exception as e:
    log.append(repr(e))

try:
    {}['missing']
except LookupError as e:
    log.append(str(e))
";
        assert_eq!(
            global(src, "log").repr(),
            "['zero', 'done', \"ValueError('zero')\", \"'missing'\"]"
        );
    }

    #[test]
    fn recursion_limit_raises_recursion_error() {
        let program = parse_program("def f(n):\n    return f(n + 1)\n").unwrap();
        let mut interp = Interpreter::new().with_recursion_limit(50);
        interp.run_module(&program).unwrap();
        let f = interp.global("f").cloned().unwrap();
        let err = interp.call_value(&f, vec![Value::Int(0)], vec![]).unwrap_err();
        assert_eq!(err.kind, FaultKind::RecursionError);
        assert_eq!(interp.depth, 0);
    }

    #[test]
    fn loops_comprehensions_and_slices() {
        let src = "\
total = 0
for i in range(10):
    if i % 2:
        continue
    if i > 6:
        break
    total += i
squares = [n * n for n in range(5) if n != 2]
rev = squares[::-1]
mid = 'abcdef'[1:4]
a, b = 1, 2
a, b = b, a
";
        let interp = run(src).unwrap();
        assert_eq!(interp.global("total"), Some(&Value::Int(12)));
        assert_eq!(interp.global("squares").unwrap().repr(), "[0, 1, 9, 16]");
        assert_eq!(interp.global("rev").unwrap().repr(), "[16, 9, 1, 0]");
        assert_eq!(interp.global("mid").unwrap().repr(), "'bcd'");
        assert_eq!(interp.global("a"), Some(&Value::Int(2)));
        assert_eq!(interp.global("b"), Some(&Value::Int(1)));
    }

    #[test]
    fn print_output_is_captured_by_line() {
        let mut interp = run("print('a', 1)\nprint('b', end='')\nprint('c')\n").unwrap();
        assert_eq!(interp.take_output(), vec!["a 1".to_string(), "bc".to_string()]);
    }

    #[test]
    fn unknown_name_is_a_name_error() {
        assert_eq!(
            fault("x = y + 1").to_string(),
            "NameError: name 'y' is not defined"
        );
    }

    #[test]
    fn augmented_list_add_extends_in_place() {
        let src = "a = [1]\nb = a\na += [2]\n";
        assert_eq!(global(src, "b").repr(), "[1, 2]");
    }
}
