use calltrace_runtime::{check_syntax, trace, InputValue, TraceError, TraceValue};
use pretty_assertions::assert_eq;

/// Run the first function (`main`) with no arguments and return its result rendered as the traced language would `repr` it.
fn run_main(src: &str) -> Result<String, TraceError> {
    let trace = trace(src, &InputValue::Tuple(Vec::new()))?;
    Ok(trace.result.map(|v| v.to_string()).unwrap_or_default())
}

fn output_of(src: &str) -> Vec<String> {
    trace(src, &InputValue::Tuple(Vec::new()))
        .expect("program should run")
        .output
}

#[test]
fn strings_and_formatting() {
    let src = r#"
def main():
    name = "World"
    parts = "a,b,,c".split(",")
    return [f"Hello, {name}!", f"{3.14159:.2f}", f"{7:>3}|", "-".join(parts), name.upper(), "  x ".strip()]
"#;
    assert_eq!(
        run_main(src).unwrap(),
        "['Hello, World!', '3.14', '  7|', 'a-b--c', 'WORLD', 'x']"
    );
}

#[test]
fn dicts_preserve_insertion_order() {
    let src = "
def main():
    counts = {}
    for word in ['b', 'a', 'b', 'c', 'a', 'b']:
        counts[word] = counts.get(word, 0) + 1
    del counts['c']
    return sorted(counts.items(), key=None, reverse=True), list(counts.keys())
";
    assert_eq!(
        run_main(src).unwrap(),
        "([('b', 3), ('a', 2)], ['b', 'a'])"
    );
}

#[test]
fn sorting_with_key_function() {
    let src = "
def main():
    words = ['ccc', 'a', 'bb', 'dd']
    words.sort(key=length)
    return words, max([3, 9, 2]), min('hello'), sum(range(5))

def length(s):
    return len(s)
";
    assert_eq!(
        run_main(src).unwrap(),
        "(['a', 'bb', 'dd', 'ccc'], 9, 'e', 10)"
    );
}

#[test]
fn builtins_over_sequences() {
    let src = "
def main():
    pairs = list(zip([1, 2, 3], 'ab'))
    numbered = list(enumerate(['x', 'y'], 1))
    return pairs, numbered, list(reversed((1, 2, 3))), len({1, 2, 2}), abs(-4), int('12') + float('0.5')
";
    assert_eq!(
        run_main(src).unwrap(),
        "([(1, 'a'), (2, 'b')], [(1, 'x'), (2, 'y')], [3, 2, 1], 2, 4, 12.5)"
    );
}

#[test]
fn slices_comprehensions_and_ternaries() {
    let src = "
def main():
    xs = [n * n for n in range(10) if n % 3 == 0]
    return xs[1:], xs[-1], xs[::2], 'even' if len(xs) % 2 == 0 else 'odd'
";
    assert_eq!(run_main(src).unwrap(), "([9, 36, 81], 81, [0, 36], 'even')");
}

#[test]
fn while_loops_and_tuple_swaps() {
    let src = "
def gcd(a, b):
    while b:
        a, b = b, a % b
    return a
";
    let trace = trace(src, &InputValue::parse("[48, 18]").unwrap()).unwrap();
    assert_eq!(trace.result, Some(TraceValue::Int(6)));
    assert_eq!(trace.len(), 1);
}

#[test]
fn print_goes_to_captured_output() {
    let src = "
def main():
    for i in range(3):
        print('line', i, sep='=')
    print('a', end='')
    print('b')
";
    assert_eq!(output_of(src), vec!["line=0", "line=1", "line=2", "ab"]);
}

#[test]
fn exceptions_propagate_through_calls() {
    let src = "
def main():
    try:
        check(-1)
    except AssertionError as e:
        return 'caught: ' + str(e)

def check(n):
    assert n > 0, 'n must be positive'
    return n
";
    assert_eq!(run_main(src).unwrap(), "'caught: n must be positive'");
}

#[test]
fn finally_runs_on_return() {
    let src = "
log = []

def main():
    try:
        return 'body'
    finally:
        log.append('cleanup')
        print(log)
";
    let trace = trace(src, &InputValue::Tuple(Vec::new())).unwrap();
    assert_eq!(trace.result, Some(TraceValue::from("body")));
    assert_eq!(trace.output, vec!["['cleanup']"]);
}

#[test]
fn runtime_type_errors_are_python_like() {
    let src = "
def main():
    return 'a' + 1
";
    assert_eq!(
        run_main(src).unwrap_err().to_string(),
        "TypeError: unsupported operand type(s) for +: 'str' and 'int'"
    );

    let src = "
def main():
    return [1, 2][5]
";
    assert_eq!(
        run_main(src).unwrap_err().to_string(),
        "IndexError: list index out of range"
    );
}

#[test]
fn list_methods_tolerate_the_list_as_argument() {
    let src = "
def main():
    a = [[1]]
    try:
        a.remove(a)
    except ValueError as e:
        a.append(str(e))
    a.remove([1])
    return a, a.count(a)
";
    assert_eq!(
        run_main(src).unwrap(),
        "(['list.remove(x): x not in list'], 0)"
    );
}

#[test]
fn unsupported_constructs_are_syntax_errors() {
    for src in [
        "class A:\n    pass\n",
        "import os\n",
        "def f(*args):\n    return args\n",
        "def outer():\n    def inner():\n        return 1\n    return inner()\n",
        "f = lambda x: x\n",
    ] {
        let err = check_syntax(src).unwrap_err();
        assert!(err.to_string().starts_with("SyntaxError"), "{src:?}: {err}");
    }
}
