use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace as trace_log};
use thiserror::Error;

use crate::ast::Program;
use crate::literal::InputValue;
use crate::parser::{parse_program, ParseError};
use crate::runtime::{bind_arguments, CallObserver, Interpreter, RuntimeFault, DEFAULT_RECURSION_LIMIT};
use crate::trace::{CallRecord, Trace, TraceValue};
use crate::value::{Function, Value, ValueKey};

/// Default stack for the interpreter thread; deep recursion in the traced program maps onto
/// nested Rust frames.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Smallest stack the worker thread is given, whatever [`TraceOptions::stack_size`] asks for.
pub const MIN_STACK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error(transparent)]
    Compile(#[from] ParseError),
    #[error("No function definition found in the code.")]
    NoFunctionFound,
    #[error("{0}")]
    Execution(String),
    #[error("Input error: {0}")]
    InputApplication(String),
}

impl TraceError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TraceError::Compile(_) => "compile",
            TraceError::NoFunctionFound => "noFunctionFound",
            TraceError::Execution(_) => "execution",
            TraceError::InputApplication(_) => "inputApplication",
        }
    }
}

/// Knobs for a single [`Tracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    /// Serve repeated calls with an identical signature from a cache instead of re-running them.
    pub memoize: bool,
    /// Maximum nesting of user function calls before a `RecursionError` is raised.
    pub recursion_limit: usize,
    /// Stack size of the worker thread the program runs on.
    ///
    /// Recursion that would exhaust this stack raises a `RecursionError` in the traced program
    /// even below `recursion_limit`.
    pub stack_size: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            memoize: true,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl TraceOptions {
    pub fn with_memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }
}

/// Runs a program and records every invocation of its first top-level function.
///
/// A tracer holds no per-run state; each [`Tracer::trace`] call builds a fresh namespace,
/// call stack and cache, so one tracer can be reused and shared freely.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    options: TraceOptions,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Execute `source` and trace the call of its target function on `input`.
    ///
    /// Blocks until the program finishes. Every failure, including a panic inside the
    /// interpreter, comes back as a [`TraceError`].
    pub fn trace(&self, source: &str, input: &InputValue) -> Result<Trace, TraceError> {
        let options = &self.options;
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("calltrace-interpreter".to_string())
                .stack_size(options.stack_size.max(MIN_STACK_SIZE))
                .spawn_scoped(scope, move || run_trace(source, input, options))
                .map_err(|err| {
                    TraceError::Execution(format!("failed to start interpreter thread: {err}"))
                })?;
            handle
                .join()
                .unwrap_or_else(|payload| Err(TraceError::Execution(panic_message(payload))))
        })
    }
}

/// Trace `source` on `input` with default options.
pub fn trace(source: &str, input: &InputValue) -> Result<Trace, TraceError> {
    Tracer::new().trace(source, input)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("InternalError: interpreter panicked: {detail}")
}

fn run_trace(source: &str, input: &InputValue, options: &TraceOptions) -> Result<Trace, TraceError> {
    let program = parse_program(source)?;
    let Some(def) = program.functions().next() else {
        return Err(TraceError::NoFunctionFound);
    };
    let function = def.name.clone();
    debug!("tracing `{function}` (line {}) on input {input}", def.line);

    let args = input
        .to_arguments()
        .map_err(|fault| TraceError::InputApplication(fault.to_string()))?;

    let mut recorder = Recorder::new(options.memoize);
    let (outcome, output) = {
        let mut interp = Interpreter::new()
            .with_recursion_limit(options.recursion_limit)
            .with_observer(&mut recorder);
        let outcome = execute(&mut interp, &program, &function, args);
        (outcome, interp.take_output())
    };
    let result = outcome?;
    let records = recorder.into_records();
    debug!(
        "trace of `{function}` finished: {} calls, {} memoized",
        records.len(),
        records.iter().filter(|r| r.memoized).count()
    );

    Ok(Trace {
        function,
        records,
        result: Some(TraceValue::capture(&result)),
        output,
    })
}

fn execute(
    interp: &mut Interpreter<'_>,
    program: &Program,
    function: &str,
    args: Vec<Value>,
) -> Result<Value, TraceError> {
    let execution = |fault: RuntimeFault| TraceError::Execution(fault.to_string());

    interp.run_module(program).map_err(execution)?;

    let func: Rc<Function> = match interp.global(function) {
        Some(Value::Function(func)) => Rc::clone(func),
        Some(other) => {
            return Err(TraceError::Execution(format!(
                "TypeError: '{function}' was rebound to a '{}' value",
                other.type_name()
            )))
        }
        None => {
            return Err(TraceError::Execution(format!(
                "NameError: name '{function}' is not defined"
            )))
        }
    };

    // Arity problems at the outermost application are the caller's input, not a program fault.
    bind_arguments(&func, args.clone(), Vec::new())
        .map_err(|fault| TraceError::InputApplication(fault.to_string()))?;

    let proxy = Value::Proxy(func);
    interp.set_global(function, proxy.clone());
    interp.call_value(&proxy, args, Vec::new()).map_err(execution)
}

/// Positional keys plus keyword keys sorted by name.
type Signature = (Vec<ValueKey>, Vec<(String, ValueKey)>);

/// Per-run call bookkeeping behind the recording proxy.
struct Recorder {
    memoize: bool,
    records: Vec<CallRecord>,
    /// Indices of calls that have started and not yet finished, innermost last.
    active: Vec<usize>,
    /// Signatures of the calls in `active`, kept in lockstep.
    signatures: Vec<Signature>,
    memo: HashMap<Signature, Value>,
}

impl Recorder {
    fn new(memoize: bool) -> Self {
        Self {
            memoize,
            records: Vec::new(),
            active: Vec::new(),
            signatures: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn into_records(self) -> Vec<CallRecord> {
        self.records
    }
}

impl CallObserver for Recorder {
    fn enter(&mut self, args: &[Value], kwargs: &[(String, Value)]) -> Option<Value> {
        let mut kwargs: Vec<&(String, Value)> = kwargs.iter().collect();
        kwargs.sort_by(|a, b| a.0.cmp(&b.0));

        let signature: Signature = (
            args.iter().map(Value::signature_key).collect(),
            kwargs
                .iter()
                .map(|(name, value)| (name.clone(), value.signature_key()))
                .collect(),
        );
        let cached = if self.memoize {
            self.memo.get(&signature).cloned()
        } else {
            None
        };

        let index = self.records.len();
        let depth = self.active.len();
        let parent_index = self.active.last().copied();
        trace_log!(
            "call #{index} depth={depth} parent={parent_index:?} memoized={}",
            cached.is_some()
        );
        self.records.push(CallRecord {
            index,
            depth,
            parent_index,
            arguments: args.iter().map(TraceValue::capture).collect(),
            keyword_arguments: kwargs
                .iter()
                .map(|(name, value)| (name.clone(), TraceValue::capture(value)))
                .collect(),
            result: cached.as_ref().map(TraceValue::capture),
            memoized: cached.is_some(),
            error: None,
        });

        if cached.is_none() {
            self.active.push(index);
            self.signatures.push(signature);
        }
        cached
    }

    fn exit(&mut self, outcome: Result<&Value, &RuntimeFault>) {
        let (Some(index), Some(signature)) = (self.active.pop(), self.signatures.pop()) else {
            return;
        };
        let record = &mut self.records[index];
        match outcome {
            Ok(value) => {
                record.result = Some(TraceValue::capture(value));
                if self.memoize {
                    self.memo.insert(signature, value.clone());
                }
            }
            Err(fault) => {
                trace_log!("call #{index} failed: {fault}");
                record.error = Some(fault.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(TraceError::NoFunctionFound.kind(), "noFunctionFound");
        assert_eq!(
            TraceError::Compile(ParseError::new("x", 1, 1)).to_string(),
            "SyntaxError: x (line 1, column 1)"
        );
    }

    #[test]
    fn recorder_tracks_stack_and_memo() {
        let mut recorder = Recorder::new(true);
        assert_eq!(recorder.enter(&[Value::Int(2)], &[]), None);
        assert_eq!(recorder.enter(&[Value::Int(1)], &[]), None);
        recorder.exit(Ok(&Value::Int(1)));
        let cached = recorder.enter(&[Value::Float(1.0)], &[]);
        assert_eq!(cached, Some(Value::Int(1)));
        recorder.exit(Ok(&Value::Int(2)));

        let records = recorder.into_records();
        assert_eq!(
            records
                .iter()
                .map(|r| (r.index, r.depth, r.parent_index, r.memoized))
                .collect::<Vec<_>>(),
            vec![(0, 0, None, false), (1, 1, Some(0), false), (2, 1, Some(0), true)]
        );
        assert_eq!(records[0].result, Some(TraceValue::Int(2)));
    }

    #[test]
    fn keyword_order_does_not_change_the_signature() {
        let mut recorder = Recorder::new(true);
        let a = ("a".to_string(), Value::Int(1));
        let b = ("b".to_string(), Value::Int(2));
        assert_eq!(recorder.enter(&[], &[a.clone(), b.clone()]), None);
        recorder.exit(Ok(&Value::Int(3)));
        assert_eq!(recorder.enter(&[], &[b, a]), Some(Value::Int(3)));
        let records = recorder.into_records();
        assert_eq!(
            records[1].keyword_arguments,
            vec![
                ("a".to_string(), TraceValue::Int(1)),
                ("b".to_string(), TraceValue::Int(2))
            ]
        );
    }

    #[test]
    fn failed_calls_keep_no_result_and_are_not_cached() {
        let mut recorder = Recorder::new(true);
        recorder.enter(&[Value::Int(0)], &[]);
        recorder.exit(Err(&RuntimeFault::new(
            crate::runtime::FaultKind::ValueError,
            "bad",
        )));
        assert_eq!(recorder.enter(&[Value::Int(0)], &[]), None);
        let records = recorder.into_records();
        assert_eq!(records[0].result, None);
        assert_eq!(records[0].error.as_deref(), Some("ValueError: bad"));
        assert!(!records[1].memoized);
    }
}
