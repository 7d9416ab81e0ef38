use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{ExceptHandler, Expr, Stmt, StmtKind, Target};
use crate::parser::{parse_program, ParseError};

/// A static summary of a program's structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    /// Every `def`, at any nesting level, in textual order.
    pub functions: Vec<String>,
    /// Number of `for` and `while` statements.
    pub loops: usize,
    /// Names bound by assignment or loop targets, sorted and unique.
    pub variables: Vec<String>,
}

pub fn outline(source: &str) -> Result<Outline, ParseError> {
    let program = parse_program(source)?;
    let mut walker = Walker::default();
    walker.block(&program.body);
    Ok(Outline {
        functions: walker.functions,
        loops: walker.loops,
        variables: walker.variables.into_iter().collect(),
    })
}

impl fmt::Display for Outline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |items: &[String]| {
            if items.is_empty() {
                "None".to_string()
            } else {
                items.join(", ")
            }
        };
        writeln!(f, "Functions: {}", list(&self.functions))?;
        writeln!(f, "Number of Loops: {}", self.loops)?;
        write!(f, "Variables: {}", list(&self.variables))
    }
}

#[derive(Default)]
struct Walker {
    functions: Vec<String>,
    loops: usize,
    variables: BTreeSet<String>,
}

impl Walker {
    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.functions.push(def.name.clone());
                self.block(&def.body);
            }
            StmtKind::If {
                then_body,
                elifs,
                else_body,
                ..
            } => {
                self.block(then_body);
                for (_, body) in elifs {
                    self.block(body);
                }
                self.block(else_body);
            }
            StmtKind::While { body, .. } => {
                self.loops += 1;
                self.block(body);
            }
            StmtKind::For { target, body, iterable } => {
                self.loops += 1;
                self.target(target);
                self.expr(iterable);
                self.block(body);
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target);
                }
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target);
                self.expr(value);
            }
            StmtKind::Return(Some(expr)) | StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Try {
                body,
                handlers,
                finally_body,
            } => {
                self.block(body);
                for ExceptHandler { body, .. } in handlers {
                    self.block(body);
                }
                self.block(finally_body);
            }
            _ => {}
        }
    }

    fn target(&mut self, target: &Target) {
        match target {
            Target::Name(name) => {
                self.variables.insert(name.clone());
            }
            Target::Tuple(targets) => {
                for t in targets {
                    self.target(t);
                }
            }
            Target::Subscript { .. } => {}
        }
    }

    /// Comprehension targets also bind names.
    fn expr(&mut self, expr: &Expr) {
        if let Expr::ListComp { target, element, iterable, .. } = expr {
            self.target(target);
            self.expr(element);
            self.expr(iterable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_functions_loops_and_variables() {
        let src = "\
def gcd(a, b):
    while b:
        a, b = b, a % b
    return a

def total(xs):
    acc = 0
    for x in xs:
        acc += x
    return acc

squares = [n * n for n in range(3)]
";
        let outline = outline(src).unwrap();
        assert_eq!(
            outline,
            Outline {
                functions: vec!["gcd".to_string(), "total".to_string()],
                loops: 2,
                variables: ["a", "acc", "b", "n", "squares", "x"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        );
    }

    #[test]
    fn display_uses_none_for_empty_lists() {
        let text = outline("print(1)\n").unwrap().to_string();
        assert_eq!(text, "Functions: None\nNumber of Loops: 0\nVariables: None");
    }
}
