//! `calltrace-runtime` executes a small recursive program and records every invocation of its
//! target function, producing a call trace a visualizer can replay step by step.
//!
//! Programs are written in a pragmatic Python subset (functions, loops, `try`/`except`, the
//! common built-in containers). The crate is **not** a full Python implementation; it covers
//! what typical recursion exercises (Fibonacci, factorial, GCD, permutations, ...) need.
//!
//! The runtime exposes:
//! - A function locator ([`locate_function`]) that finds the traced function without running
//!   anything.
//! - An instrumented executor ([`Tracer`], [`trace`]) that runs the program with the target
//!   rebound to a recording proxy, tracking depth, parent links and tracer-injected
//!   memoization.
//! - The trace record ([`Trace`], [`CallRecord`]) plus helper views for renderers.
//! - A structural [`outline`] of the program.

mod ast;
mod lexer;
mod literal;
mod locator;
mod outline;
mod parser;
mod runtime;
mod trace;
mod tracer;
mod value;

pub use crate::literal::InputValue;
pub use crate::locator::locate_function;
pub use crate::outline::{outline, Outline};
pub use crate::parser::ParseError;
pub use crate::runtime::{FaultKind, RuntimeFault, DEFAULT_RECURSION_LIMIT};
pub use crate::trace::{CallRecord, Trace, TraceValue};
pub use crate::tracer::{
    trace, TraceError, TraceOptions, Tracer, DEFAULT_STACK_SIZE, MIN_STACK_SIZE,
};

/// Check that `source` parses, without executing it.
pub fn check_syntax(source: &str) -> Result<(), ParseError> {
    parser::parse_program(source).map(|_| ())
}
