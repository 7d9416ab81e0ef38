use crate::parser::{parse_program, ParseError};

/// Name of the first top-level function definition in `source`, in textual order.
///
/// The source is only parsed, never executed. Definitions nested in `if`/`try` blocks are not
/// considered.
pub fn locate_function(source: &str) -> Result<Option<String>, ParseError> {
    let program = parse_program(source)?;
    let name = program.functions().next().map(|def| def.name.clone());
    Ok(name)
}
