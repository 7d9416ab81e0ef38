use calltrace_runtime::{
    trace, InputValue, Trace, TraceError, TraceOptions, TraceValue, Tracer, MIN_STACK_SIZE,
};
use pretty_assertions::assert_eq;

const FIBONACCI: &str = include_str!("fixtures/fibonacci.py");
const PROBE: &str = include_str!("fixtures/probe.py");
const TOTAL: &str = include_str!("fixtures/total.py");
const POWER: &str = include_str!("fixtures/power.py");

/// Dense indices, a single root at index 0, and every parent one level above its child.
fn assert_well_formed(trace: &Trace) {
    for (pos, record) in trace.records.iter().enumerate() {
        assert_eq!(record.index, pos, "indices must be dense and ordered");
        match record.parent_index {
            None => assert_eq!(record.index, 0, "only the first call may be a root"),
            Some(parent) => {
                assert!(parent < record.index);
                assert_eq!(trace.records[parent].depth + 1, record.depth);
            }
        }
    }
}

fn shape(trace: &Trace) -> Vec<(usize, Option<usize>, bool)> {
    trace
        .records
        .iter()
        .map(|r| (r.depth, r.parent_index, r.memoized))
        .collect()
}

#[test]
fn fibonacci_is_memoized_by_the_tracer() {
    let trace = trace(FIBONACCI, &InputValue::Int(4)).unwrap();
    assert_well_formed(&trace);

    assert_eq!(trace.function, "fibonacci");
    assert_eq!(trace.result, Some(TraceValue::Int(3)));
    assert_eq!(trace.root().unwrap().result, Some(TraceValue::Int(3)));
    assert_eq!(
        shape(&trace),
        vec![
            (0, None, false),
            (1, Some(0), false),
            (2, Some(1), false),
            (3, Some(2), false),
            (3, Some(2), false),
            (2, Some(1), true),
            (1, Some(0), true),
        ]
    );
    assert_eq!(trace.memoized_count(), 2);
    assert_eq!(trace.label(5).as_deref(), Some("fibonacci(1)"));
    assert_eq!(trace.records[6].result, Some(TraceValue::Int(1)));
}

#[test]
fn disabling_memoization_re_executes_repeated_calls() {
    let tracer = Tracer::new().with_options(TraceOptions::default().with_memoize(false));
    let trace = tracer.trace(FIBONACCI, &InputValue::Int(4)).unwrap();
    assert_well_formed(&trace);
    assert_eq!(trace.len(), 9);
    assert_eq!(trace.memoized_count(), 0);
    assert_eq!(trace.result, Some(TraceValue::Int(3)));
}

#[test]
fn non_recursive_function_has_a_single_record() {
    let src = "def add(a, b):\n    return a + b\n";
    let trace = trace(src, &InputValue::parse("(2, 3)").unwrap()).unwrap();
    assert_eq!(trace.len(), 1);
    let root = trace.root().unwrap();
    assert_eq!(root.arguments, vec![TraceValue::Int(2), TraceValue::Int(3)]);
    assert_eq!(root.result, Some(TraceValue::Int(5)));
    assert_eq!(root.parent_index, None);
    assert_eq!(root.depth, 0);
    assert!(!root.memoized);
}

#[test]
fn repeated_identical_self_call_is_served_from_cache() {
    let src = "\
def twice(n):
    if n == 0:
        return 1
    return twice(n - 1) + twice(n - 1)
";
    let trace = trace(src, &InputValue::Int(2)).unwrap();
    assert_well_formed(&trace);
    assert_eq!(
        shape(&trace),
        vec![
            (0, None, false),
            (1, Some(0), false),
            (2, Some(1), false),
            (2, Some(1), true),
            (1, Some(0), true),
        ]
    );
    assert_eq!(trace.records[3].result, trace.records[2].result);
    assert_eq!(trace.records[4].result, Some(TraceValue::Int(2)));
    assert_eq!(trace.result, Some(TraceValue::Int(4)));
}

#[test]
fn caught_nested_failure_keeps_depth_accounting() {
    let trace = trace(PROBE, &InputValue::Int(2)).unwrap();
    assert_well_formed(&trace);
    assert_eq!(
        shape(&trace),
        vec![
            (0, None, false),
            (1, Some(0), false),
            (1, Some(0), false),
            (2, Some(2), false),
            (2, Some(2), false),
        ]
    );
    let errors: Vec<Option<&str>> = trace.records.iter().map(|r| r.error.as_deref()).collect();
    assert_eq!(
        errors,
        vec![
            None,
            Some("ValueError: negative"),
            None,
            Some("ValueError: negative"),
            None
        ]
    );
    assert_eq!(trace.records[1].result, None);
    assert_eq!(trace.result, Some(TraceValue::Int(2)));
}

#[test]
fn container_arguments_are_snapshotted_at_call_time() {
    // The tuple is spread, so the single list becomes the only argument.
    let input = InputValue::parse("([1, 2, 3],)").unwrap();
    let trace = trace(TOTAL, &input).unwrap();
    assert_well_formed(&trace);
    let args: Vec<String> = trace
        .records
        .iter()
        .map(|r| r.arguments[0].to_string())
        .collect();
    assert_eq!(args, vec!["[1, 2, 3]", "[1, 2]", "[1]", "[]"]);
    assert!(trace.records.iter().all(|r| !r.arguments[0].is_primitive()));
    assert_eq!(trace.result, Some(TraceValue::Int(6)));
}

#[test]
fn keyword_arguments_are_recorded_and_output_captured() {
    let trace = trace(POWER, &InputValue::Int(3)).unwrap();
    assert_well_formed(&trace);
    let labels: Vec<String> = (0..trace.len())
        .filter_map(|i| trace.label(i))
        .collect();
    assert_eq!(labels, vec!["power(3)", "power(3, exp=1)", "power(3, exp=0)"]);
    assert_eq!(trace.result, Some(TraceValue::Int(9)));
    assert_eq!(trace.output, vec!["loaded".to_string()]);
}

#[test]
fn tracing_is_idempotent() {
    let first = trace(FIBONACCI, &InputValue::Int(6)).unwrap();
    let second = trace(FIBONACCI, &InputValue::Int(6)).unwrap();
    assert_eq!(first, second);

    let tracer = Tracer::new();
    assert_eq!(tracer.trace(FIBONACCI, &InputValue::Int(6)).unwrap(), first);
}

#[test]
fn deep_recursion_within_the_limit_succeeds() {
    let src = "\
def countdown(n):
    if n == 0:
        return 0
    return countdown(n - 1)
";
    let trace = trace(src, &InputValue::Int(900)).unwrap();
    assert_eq!(trace.len(), 901);
    assert_eq!(trace.max_depth(), Some(900));
}

#[test]
fn unbounded_recursion_is_reported_not_fatal() {
    let src = "def down(n):\n    return down(n + 1)\n";
    let err = trace(src, &InputValue::Int(0)).unwrap_err();
    match err {
        TraceError::Execution(message) => {
            assert_eq!(message, "RecursionError: maximum recursion depth exceeded")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn recursion_limit_is_configurable() {
    let tracer = Tracer::new().with_options(TraceOptions::default().with_recursion_limit(5));
    let src = "\
def countdown(n):
    if n == 0:
        return 0
    return countdown(n - 1)
";
    assert!(tracer.trace(src, &InputValue::Int(4)).is_ok());
    assert!(matches!(
        tracer.trace(src, &InputValue::Int(5)),
        Err(TraceError::Execution(message)) if message.starts_with("RecursionError")
    ));
}

#[test]
fn syntax_errors_are_compile_errors() {
    let err = trace("def broken(:\n    return 1\n", &InputValue::Int(1)).unwrap_err();
    assert!(matches!(err, TraceError::Compile(_)));
    assert!(err.to_string().contains("SyntaxError"), "{err}");
}

#[test]
fn missing_function_is_reported() {
    for src in ["x = 1\nprint(x)\n", ""] {
        let err = trace(src, &InputValue::Int(1)).unwrap_err();
        assert_eq!(err, TraceError::NoFunctionFound);
        assert_eq!(err.to_string(), "No function definition found in the code.");
    }
}

#[test]
fn uncaught_fault_becomes_an_execution_error() {
    let src = "def inv(n):\n    return 1 // n\n";
    let err = trace(src, &InputValue::Int(0)).unwrap_err();
    assert_eq!(
        err,
        TraceError::Execution("ZeroDivisionError: integer division or modulo by zero".to_string())
    );
}

#[test]
fn module_level_fault_is_an_execution_error() {
    let src = "def f(n):\n    return n\n\nboom = undefined_name\n";
    let err = trace(src, &InputValue::Int(0)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "NameError: name 'undefined_name' is not defined"
    );
}

#[test]
fn arity_mismatch_at_the_root_is_an_input_error() {
    let src = "def add(a, b):\n    return a + b\n";
    let err = trace(src, &InputValue::Int(5)).unwrap_err();
    assert_eq!(err.kind(), "inputApplication");
    assert!(
        err.to_string()
            .contains("add() missing 1 required positional argument: 'b'"),
        "{err}"
    );
}

#[test]
fn concurrent_traces_share_nothing() {
    let handles: Vec<_> = (0..4_i64)
        .map(|n| std::thread::spawn(move || trace(FIBONACCI, &InputValue::Int(n + 3)).unwrap()))
        .collect();
    let results: Vec<Option<TraceValue>> = handles
        .into_iter()
        .map(|h| h.join().unwrap().result)
        .collect();
    assert_eq!(
        results,
        vec![
            Some(TraceValue::Int(2)),
            Some(TraceValue::Int(3)),
            Some(TraceValue::Int(5)),
            Some(TraceValue::Int(8)),
        ]
    );
}

#[test]
fn self_referential_arguments_are_recorded() {
    let src = "\
def f(x):
    if x == 0:
        a = [1]
        a.append(a)
        return f(a)
    return len(x)
";
    let trace = trace(src, &InputValue::Int(0)).unwrap();
    assert_well_formed(&trace);
    assert_eq!(trace.len(), 2);
    assert_eq!(trace.records[1].arguments[0].to_string(), "[1, [...]]");
    assert_eq!(trace.result, Some(TraceValue::Int(2)));
}

#[test]
fn exhausting_the_worker_stack_is_a_recursion_error() {
    let src = "\
def depth(n):
    if n == 0:
        return 0
    return depth(n - 1) + 1
";
    let options = TraceOptions::default()
        .with_recursion_limit(usize::MAX)
        .with_stack_size(256 * 1024);
    let err = Tracer::new()
        .with_options(options)
        .trace(src, &InputValue::Int(200_000))
        .unwrap_err();
    assert_eq!(err.kind(), "execution");
    assert!(err.to_string().starts_with("RecursionError"), "{err}");
}

#[test]
fn deeply_nested_lists_are_released_on_a_small_stack() {
    let src = "\
def nest(n):
    a = []
    for i in range(n):
        a = [a]
    return len(a)
";
    let options = TraceOptions::default().with_stack_size(MIN_STACK_SIZE);
    let trace = Tracer::new()
        .with_options(options)
        .trace(src, &InputValue::Int(300_000))
        .unwrap();
    assert_eq!(trace.result, Some(TraceValue::Int(1)));
}
