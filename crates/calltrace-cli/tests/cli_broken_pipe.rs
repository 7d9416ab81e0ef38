use std::io::Write;
use std::process::{Command, Stdio};

#[test]
fn cli_does_not_panic_on_broken_pipe() {
    let mut child = Command::new(assert_cmd::cargo::cargo_bin!("calltrace"))
        .args(["trace", "--input", "20"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn calltrace");

    // Closing the read end forces stdout writes to return EPIPE / BrokenPipe.
    drop(child.stdout.take());

    let mut stdin = child.stdin.take().expect("stdin is piped");
    stdin
        .write_all(b"def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n")
        .expect("write program");
    drop(stdin);

    let output = child.wait_with_output().expect("wait for calltrace to finish");

    assert!(
        output.status.success(),
        "expected success even when stdout is closed\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
}
