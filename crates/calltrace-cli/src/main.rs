use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calltrace_runtime::{
    locate_function, outline, CallRecord, InputValue, Outline, TraceError, TraceOptions,
    TraceValue, Tracer, DEFAULT_RECURSION_LIMIT,
};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "calltrace")]
#[command(about = "Trace every call of a recursive function and emit the call tree as JSON.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the first function in the program on an input and emit the trace.
    Trace(TraceArgs),
    /// Print the name of the function `trace` would instrument.
    Locate(SourceArgs),
    /// Summarize the functions, loops and variables of a program.
    Outline(OutlineArgs),
}

#[derive(Debug, Parser)]
struct SourceArgs {
    /// Program file. If omitted, reads the program from stdin.
    #[arg(long)]
    source: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct TraceArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Input as a literal (e.g. `5`, `(2, 3)`, `[[1, 2], 'x']`).
    ///
    /// Lists and tuples are spread into positional arguments.
    #[arg(long)]
    input: String,

    /// Execute repeated identical calls instead of serving them from the tracer's cache.
    #[arg(long = "no-memo")]
    no_memo: bool,

    /// Maximum nesting of calls in the traced program.
    #[arg(long = "recursion-limit", default_value_t = DEFAULT_RECURSION_LIMIT)]
    recursion_limit: usize,
}

#[derive(Debug, Parser)]
struct OutlineArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Print a human-readable summary instead of JSON.
    #[arg(long)]
    text: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceReport {
    ok: bool,
    function: Option<String>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    records: Vec<CallRecord>,
    /// `(parent, child)` pairs, in child order.
    edges: Vec<(usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<TraceValue>,
    output: Vec<String>,
}

impl TraceReport {
    fn failed(function: Option<String>, err: &TraceError) -> Self {
        TraceReport {
            ok: false,
            function,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..TraceReport::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocateReport {
    ok: bool,
    function: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutlineReport {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    outline: Option<Outline>,
}

fn read_source(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read program source {}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("read program source from stdin")?;
            Ok(buf)
        }
    }
}

/// Write one line to stdout. A closed reader is not an error worth reporting.
fn emit(line: &str) -> Result<()> {
    let mut out = io::stdout().lock();
    match writeln!(out, "{line}").and_then(|()| out.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("write to stdout"),
    }
}

fn emit_json<T: Serialize>(report: &T) -> Result<()> {
    emit(&serde_json::to_string(report).context("serialize report")?)
}

fn run_trace(args: &TraceArgs, source: &str) -> TraceReport {
    let function = locate_function(source).ok().flatten();
    let input = match InputValue::parse(&args.input) {
        Ok(input) => input,
        Err(err) => return TraceReport::failed(function, &err),
    };
    let options = TraceOptions::default()
        .with_memoize(!args.no_memo)
        .with_recursion_limit(args.recursion_limit);
    log::debug!("tracing {function:?} with input {input}");
    match Tracer::new().with_options(options).trace(source, &input) {
        Ok(trace) => TraceReport {
            ok: true,
            function: Some(trace.function.clone()),
            error: None,
            error_kind: None,
            edges: trace.edges(),
            records: trace.records,
            result: trace.result,
            output: trace.output,
        },
        Err(err) => TraceReport::failed(function, &err),
    }
}

fn run(command: Command) -> Result<bool> {
    match command {
        Command::Trace(args) => {
            let source = read_source(args.source.source.as_deref())?;
            let report = run_trace(&args, &source);
            emit_json(&report)?;
            Ok(report.ok)
        }
        Command::Locate(args) => {
            let source = read_source(args.source.as_deref())?;
            let report = match locate_function(&source) {
                Ok(Some(function)) => LocateReport {
                    ok: true,
                    function: Some(function),
                    error: None,
                },
                Ok(None) => LocateReport {
                    ok: false,
                    function: None,
                    error: Some(TraceError::NoFunctionFound.to_string()),
                },
                Err(err) => LocateReport {
                    ok: false,
                    function: None,
                    error: Some(err.to_string()),
                },
            };
            emit_json(&report)?;
            Ok(report.ok)
        }
        Command::Outline(args) => {
            let source = read_source(args.source.source.as_deref())?;
            match outline(&source) {
                Ok(outline) if args.text => {
                    emit(&outline.to_string())?;
                    Ok(true)
                }
                Ok(outline) => {
                    emit_json(&OutlineReport {
                        ok: true,
                        error: None,
                        outline: Some(outline),
                    })?;
                    Ok(true)
                }
                Err(err) if args.text => {
                    eprintln!("{err}");
                    Ok(false)
                }
                Err(err) => {
                    emit_json(&OutlineReport {
                        ok: false,
                        error: Some(err.to_string()),
                        outline: None,
                    })?;
                    Ok(false)
                }
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    if !run(cli.command)? {
        std::process::exit(1);
    }
    Ok(())
}
