use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const FACTORIAL: &str = "\
def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)
";

fn calltrace(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(assert_cmd::cargo::cargo_bin!("calltrace"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn calltrace");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin.as_bytes())
        .expect("write program");
    child.wait_with_output().expect("wait for calltrace")
}

fn json_stdout(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err})\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn write_program(dir: &Path, name: &str, source: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, source).expect("write program file");
    path.to_string_lossy().into_owned()
}

#[test]
fn trace_reads_program_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_program(dir.path(), "factorial.py", FACTORIAL);

    let output = calltrace(&["trace", "--source", &path, "--input", "3"], "");
    assert!(output.status.success());

    let report = json_stdout(&output);
    assert_eq!(report["ok"], json!(true));
    assert_eq!(report["function"], json!("factorial"));
    assert_eq!(report["result"], json!(6));
    assert_eq!(report["edges"], json!([[0, 1], [1, 2]]));
    assert_eq!(
        report["records"][2],
        json!({
            "index": 2,
            "depth": 2,
            "parentIndex": 1,
            "arguments": [1],
            "result": 1,
            "memoized": false
        })
    );
}

#[test]
fn trace_reports_memoized_calls_unless_disabled() {
    let src = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n";

    let report = json_stdout(&calltrace(&["trace", "--input", "4"], src));
    let memoized = report["records"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["memoized"] == json!(true))
        .count();
    assert_eq!(memoized, 2);

    let report = json_stdout(&calltrace(&["trace", "--input", "4", "--no-memo"], src));
    assert_eq!(report["records"].as_array().unwrap().len(), 9);
    assert_eq!(report["result"], json!(3));
}

#[test]
fn trace_failure_exits_non_zero_with_error_kind() {
    let output = calltrace(&["trace", "--input", "1"], "def broken(:\n    pass\n");
    assert_eq!(output.status.code(), Some(1));
    let report = json_stdout(&output);
    assert_eq!(report["ok"], json!(false));
    assert_eq!(report["errorKind"], json!("compile"));
    assert!(report["error"].as_str().unwrap().starts_with("SyntaxError"));

    let output = calltrace(
        &["trace", "--input", "3", "--recursion-limit", "2"],
        FACTORIAL,
    );
    assert_eq!(output.status.code(), Some(1));
    let report = json_stdout(&output);
    assert_eq!(report["function"], json!("factorial"));
    assert_eq!(report["errorKind"], json!("execution"));
    assert_eq!(
        report["error"],
        json!("RecursionError: maximum recursion depth exceeded")
    );
}

#[test]
fn trace_rejects_non_literal_input() {
    let output = calltrace(&["trace", "--input", "open('x')"], FACTORIAL);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json_stdout(&output)["errorKind"], json!("inputApplication"));
}

#[test]
fn locate_prints_the_first_function() {
    let output = calltrace(&["locate"], "X = 1\ndef first():\n    pass\ndef second():\n    pass\n");
    assert!(output.status.success());
    assert_eq!(
        json_stdout(&output),
        json!({"ok": true, "function": "first", "error": null})
    );

    let output = calltrace(&["locate"], "print(1)\n");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        json_stdout(&output)["error"],
        json!("No function definition found in the code.")
    );
}

#[test]
fn outline_as_json_and_text() {
    let output = calltrace(&["outline"], FACTORIAL);
    assert!(output.status.success());
    assert_eq!(
        json_stdout(&output),
        json!({
            "ok": true,
            "error": null,
            "functions": ["factorial"],
            "loops": 0,
            "variables": []
        })
    );

    let output = calltrace(&["outline", "--text"], FACTORIAL);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Functions: factorial\nNumber of Loops: 0\nVariables: None\n"
    );
}

#[test]
fn missing_source_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.py");
    let output = calltrace(
        &["trace", "--source", &missing.to_string_lossy(), "--input", "1"],
        "",
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("read program source"));
}
