use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BinOp, BoolOp, CallArg, CmpOp, ExceptHandler, Expr, FStringPart, FunctionDef, ParamDef,
    Program, Stmt, StmtKind, Target, UnOp,
};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::value::Value;

/// Maximum nesting of parenthesized groups / unary operators / blocks.
///
/// Keeps pathological inputs from overflowing the Rust stack during parsing.
const MAX_NESTING: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SyntaxError: {message} (line {line}, column {col})")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    loop {
        match parser.peek_kind() {
            TokenKind::Eof => break,
            TokenKind::Newline => {
                parser.next();
            }
            TokenKind::Indent => return Err(parser.error("unexpected indent")),
            _ => body.push(parser.parse_statement()?),
        }
    }
    Ok(Program { body })
}

/// Parse a standalone expression (used for input literals and f-string holes).
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_testlist()?;
    while matches!(parser.peek_kind(), TokenKind::Newline) {
        parser.next();
    }
    if !matches!(parser.peek_kind(), TokenKind::Eof) {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    function_depth: usize,
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            function_depth: 0,
            loop_depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        let message = message.into();
        let message = match &tok.kind {
            TokenKind::Eof if message == "invalid syntax" => "unexpected EOF while parsing".into(),
            _ => message,
        };
        ParseError::new(message, tok.line, tok.col)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if k == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{keyword}'")))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Name(name) => {
                self.next();
                Ok(name)
            }
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested parentheses"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn end_of_simple_statement(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.next();
                Ok(())
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let keyword = match self.peek_kind() {
            TokenKind::Keyword(k) => Some(k.clone()),
            _ => None,
        };
        let kind = match keyword.as_deref() {
            Some("def") => self.parse_def()?,
            Some("if") => self.parse_if()?,
            Some("while") => self.parse_while()?,
            Some("for") => self.parse_for()?,
            Some("try") => self.parse_try()?,
            Some(unsupported @ ("class" | "import" | "from" | "with" | "lambda" | "yield")) => {
                return Err(self.error(format!("'{unsupported}' is not supported")));
            }
            _ => {
                let kind = self.parse_simple_statement()?;
                self.end_of_simple_statement()?;
                kind
            }
        };
        Ok(Stmt { kind })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Colon, "':'")?;
        if !matches!(self.peek_kind(), TokenKind::Newline) {
            // Single-line suite: `if x: return 1`.
            let kind = self.parse_simple_statement()?;
            self.end_of_simple_statement()?;
            return Ok(vec![Stmt { kind }]);
        }
        self.next();
        if !matches!(self.peek_kind(), TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.next();
        self.enter()?;
        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.next();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.next();
                }
                TokenKind::Indent => return Err(self.error("unexpected indent")),
                _ => body.push(self.parse_statement()?),
            }
        }
        self.leave();
        Ok(body)
    }

    fn parse_def(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.peek().line;
        if self.function_depth > 0 {
            return Err(self.error("nested function definitions are not supported"));
        }
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut params: Vec<ParamDef> = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::DoubleStar) {
                return Err(self.error("variadic parameters are not supported"));
            }
            let param = self.expect_name()?;
            if params.iter().any(|p| p.name == param) {
                return Err(self.error(format!(
                    "duplicate argument '{param}' in function definition"
                )));
            }
            if self.eat(&TokenKind::Colon) {
                // Annotations are parsed and ignored.
                self.parse_test()?;
            }
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(ParamDef {
                name: param,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        if self.eat(&TokenKind::Arrow) {
            self.parse_test()?;
        }

        self.function_depth += 1;
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_block();
        self.loop_depth = saved_loops;
        self.function_depth -= 1;
        let body = body?;

        let mut globals = Vec::new();
        collect_global_names(&body, &mut globals);

        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body,
            globals,
            line,
        })))
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("if")?;
        let cond = self.parse_test()?;
        let then_body = self.parse_block()?;
        let mut elifs = Vec::new();
        let mut else_body = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let c = self.parse_test()?;
                let b = self.parse_block()?;
                elifs.push((c, b));
            } else if self.eat_keyword("else") {
                else_body = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If {
            cond,
            then_body,
            elifs,
            else_body,
        })
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        let body = body?;
        if self.at_keyword("else") {
            return Err(self.error("loop 'else' clauses are not supported"));
        }
        Ok(body)
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("while")?;
        let cond = self.parse_test()?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("for")?;
        let target = self.parse_target_list()?;
        self.expect_keyword("in")?;
        let iterable = self.parse_testlist()?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::For {
            target,
            iterable,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("try")?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let mut kind = None;
            let mut binding = None;
            if !matches!(self.peek_kind(), TokenKind::Colon) {
                kind = Some(self.expect_name()?);
                if self.eat_keyword("as") {
                    binding = Some(self.expect_name()?);
                }
            }
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                binding,
                body,
            });
        }
        let finally_body = if self.eat_keyword("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally_body.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally_body,
        })
    }

    fn parse_simple_statement(&mut self) -> Result<StmtKind, ParseError> {
        let keyword = match self.peek_kind() {
            TokenKind::Keyword(k) => Some(k.clone()),
            _ => None,
        };
        match keyword.as_deref() {
            Some("pass") => {
                self.next();
                return Ok(StmtKind::Pass);
            }
            Some("break") => {
                if self.loop_depth == 0 {
                    return Err(self.error("'break' outside loop"));
                }
                self.next();
                return Ok(StmtKind::Break);
            }
            Some("continue") => {
                if self.loop_depth == 0 {
                    return Err(self.error("'continue' not properly in loop"));
                }
                self.next();
                return Ok(StmtKind::Continue);
            }
            Some("return") => {
                if self.function_depth == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.next();
                if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent
                ) {
                    return Ok(StmtKind::Return(None));
                }
                return Ok(StmtKind::Return(Some(self.parse_testlist()?)));
            }
            Some("raise") => {
                self.next();
                if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent
                ) {
                    return Ok(StmtKind::Raise(None));
                }
                return Ok(StmtKind::Raise(Some(self.parse_test()?)));
            }
            Some("assert") => {
                self.next();
                let cond = self.parse_test()?;
                let message = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                return Ok(StmtKind::Assert { cond, message });
            }
            Some("global") => {
                self.next();
                let mut names = vec![self.expect_name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_name()?);
                }
                return Ok(StmtKind::Global(names));
            }
            Some("del") => {
                self.next();
                let mut targets = Vec::new();
                loop {
                    let expr = self.parse_postfix()?;
                    targets.push(self.to_target(expr)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                return Ok(StmtKind::Del(targets));
            }
            _ => {}
        }

        let first = self.parse_testlist()?;

        let aug = match self.peek_kind() {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::DoubleSlashAssign => Some(BinOp::FloorDiv),
            TokenKind::PercentAssign => Some(BinOp::Mod),
            TokenKind::DoubleStarAssign => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.next();
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        // Annotated assignment `x: int = 0` keeps only the assignment.
        if matches!(self.peek_kind(), TokenKind::Colon) && matches!(first, Expr::Name(_)) {
            self.next();
            self.parse_test()?;
            if !self.eat(&TokenKind::Assign) {
                return Ok(StmtKind::Pass);
            }
            let value = self.parse_testlist()?;
            let target = self.to_target(first)?;
            return Ok(StmtKind::Assign {
                targets: vec![target],
                value,
            });
        }

        if !matches!(self.peek_kind(), TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat(&TokenKind::Assign) {
            exprs.push(self.parse_testlist()?);
        }
        let value = exprs.pop().ok_or_else(|| self.error("invalid syntax"))?;
        let targets = exprs
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ParseError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { object, index } => Ok(Target::Subscript {
                object: *object,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Expr::Literal(_) => Err(self.error("cannot assign to literal")),
            Expr::Call { .. } => Err(self.error("cannot assign to function call")),
            Expr::Attribute { .. } => Err(self.error("cannot assign to attribute")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// `for` targets: comma separated postfix expressions (names, subscripts, tuples).
    fn parse_target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.parse_postfix()?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at_keyword("in") {
                break;
            }
            items.push(self.parse_postfix()?);
        }
        self.to_target(Expr::Tuple(items))
    }

    // ---- expressions ----

    /// `test (',' test)* [',']`; a bare comma list becomes a tuple.
    fn parse_testlist(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_test()?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !starts_expression(self.peek_kind()) {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_test(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("lambda") {
            return Err(self.error("'lambda' is not supported"));
        }
        let then = self.parse_or()?;
        // Comprehension conditions are parsed with `parse_or`, so an `if` here is a ternary.
        if !self.at_keyword("if") {
            return Ok(then);
        }
        self.next();
        let cond = self.parse_or()?;
        self.expect_keyword("else")?;
        let otherwise = self.parse_test()?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            self.enter()?;
            let expr = self.parse_not();
            self.leave();
            return Ok(Expr::Unary {
                op: UnOp::Not,
                expr: Box::new(expr?),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::Ne => CmpOp::Ne,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Le => CmpOp::Le,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Ge => CmpOp::Ge,
                TokenKind::Keyword(k) if k == "in" => CmpOp::In,
                TokenKind::Keyword(k) if k == "is" => {
                    if matches!(self.peek_kind_at(1), TokenKind::Keyword(n) if n == "not") {
                        self.next();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                TokenKind::Keyword(k)
                    if k == "not"
                        && matches!(self.peek_kind_at(1), TokenKind::Keyword(n) if n == "in") =>
                {
                    self.next();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.next();
            ops.push((op, self.parse_arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.next();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Plus => Some(UnOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            self.enter()?;
            let expr = self.parse_factor();
            self.leave();
            let expr = expr?;
            // Fold negative numeric literals so `-1` is a plain literal.
            return Ok(match (op, expr) {
                (UnOp::Neg, Expr::Literal(Value::Int(n))) => Expr::Literal(Value::Int(-n)),
                (UnOp::Neg, Expr::Literal(Value::Float(n))) => Expr::Literal(Value::Float(-n)),
                (op, expr) => Expr::Unary {
                    op,
                    expr: Box::new(expr),
                },
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if !self.eat(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.parse_factor();
        self.leave();
        Ok(Expr::Binary {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent?),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.next();
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                TokenKind::LBracket => {
                    self.next();
                    let index = self.parse_subscript()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    self.next();
                    let name = self.expect_name()?;
                    expr = Expr::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        self.enter()?;
        let mut args: Vec<CallArg> = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let keyword = match (self.peek_kind(), self.peek_kind_at(1)) {
                (TokenKind::Name(name), TokenKind::Assign) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.next();
                self.next();
                if args.iter().any(|a| a.name.as_deref() == Some(name.as_str())) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                let expr = self.parse_test()?;
                args.push(CallArg {
                    name: Some(name),
                    expr,
                });
            } else {
                if args.iter().any(|a| a.name.is_some()) {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let expr = self.parse_test()?;
                if self.at_keyword("for") {
                    return Err(self.error("generator expressions are not supported"));
                }
                args.push(CallArg { name: None, expr });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.leave();
        Ok(args)
    }

    fn parse_subscript(&mut self) -> Result<Expr, ParseError> {
        let lower = if matches!(self.peek_kind(), TokenKind::Colon) {
            None
        } else {
            let expr = self.parse_testlist()?;
            if !matches!(self.peek_kind(), TokenKind::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(TokenKind::Colon, "':'")?;
        let upper = if matches!(self.peek_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(&TokenKind::Colon)
            && !matches!(self.peek_kind(), TokenKind::RBracket)
        {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Name(name) => {
                self.next();
                Ok(Expr::Name(name))
            }
            TokenKind::Int(n) => {
                self.next();
                Ok(Expr::Literal(Value::Int(n)))
            }
            TokenKind::Float(n) => {
                self.next();
                Ok(Expr::Literal(Value::Float(n)))
            }
            TokenKind::String(_) | TokenKind::FString(_) => self.parse_strings(),
            TokenKind::Keyword(ref k) if k == "True" => {
                self.next();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::Keyword(ref k) if k == "False" => {
                self.next();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Keyword(ref k) if k == "None" => {
                self.next();
                Ok(Expr::Literal(Value::None))
            }
            TokenKind::LParen => {
                self.next();
                self.enter()?;
                let expr = self.parse_paren_body();
                self.leave();
                expr
            }
            TokenKind::LBracket => {
                self.next();
                self.enter()?;
                let expr = self.parse_list_body();
                self.leave();
                expr
            }
            TokenKind::LBrace => {
                self.next();
                self.enter()?;
                let expr = self.parse_brace_body();
                self.leave();
                expr
            }
            TokenKind::Indent => Err(self.error("unexpected indent")),
            _ => Err(self.error("invalid syntax")),
        }
    }

    /// Adjacent string literals concatenate (`"a" "b"`), including f-strings.
    fn parse_strings(&mut self) -> Result<Expr, ParseError> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut has_holes = false;
        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::String(s) => {
                    self.next();
                    parts.push(FStringPart::Literal(s));
                }
                TokenKind::FString(raw) => {
                    self.next();
                    has_holes = true;
                    parts.extend(parse_fstring(&raw, tok.line, tok.col)?);
                }
                _ => break,
            }
        }
        if !has_holes {
            let joined: String = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Literal(s) => s,
                    FStringPart::Hole { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Literal(Value::str(joined)));
        }
        Ok(Expr::FString(parts))
    }

    fn parse_paren_body(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.at_keyword("for") {
            return Err(self.error("generator expressions are not supported"));
        }
        if self.eat(&TokenKind::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if matches!(self.peek_kind(), TokenKind::RParen) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Expr::Tuple(items))
    }

    fn parse_list_body(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.eat_keyword("for") {
            let target = self.parse_target_list()?;
            self.expect_keyword("in")?;
            let iterable = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat_keyword("if") {
                conditions.push(self.parse_or()?);
            }
            if self.at_keyword("for") {
                return Err(self.error("nested comprehension clauses are not supported"));
            }
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                target: Box::new(target),
                iterable: Box::new(iterable),
                conditions,
            });
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if matches!(self.peek_kind(), TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expr::List(items))
    }

    fn parse_brace_body(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_test()?;
            if self.at_keyword("for") {
                return Err(self.error("dict comprehensions are not supported"));
            }
            let mut pairs = vec![(first, value)];
            while self.eat(&TokenKind::Comma) {
                if matches!(self.peek_kind(), TokenKind::RBrace) {
                    break;
                }
                let k = self.parse_test()?;
                self.expect(TokenKind::Colon, "':'")?;
                let v = self.parse_test()?;
                pairs.push((k, v));
            }
            self.expect(TokenKind::RBrace, "'}'")?;
            return Ok(Expr::Dict(pairs));
        }
        if self.at_keyword("for") {
            return Err(self.error("set comprehensions are not supported"));
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if matches!(self.peek_kind(), TokenKind::RBrace) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Set(items))
    }
}

fn starts_expression(kind: &TokenKind) -> bool {
    match kind {
        TokenKind::Name(_)
        | TokenKind::Int(_)
        | TokenKind::Float(_)
        | TokenKind::String(_)
        | TokenKind::FString(_)
        | TokenKind::LParen
        | TokenKind::LBracket
        | TokenKind::LBrace
        | TokenKind::Minus
        | TokenKind::Plus => true,
        TokenKind::Keyword(k) => matches!(k.as_str(), "not" | "None" | "True" | "False"),
        _ => false,
    }
}

fn collect_global_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global(names) => {
                for name in names {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
            }
            StmtKind::If {
                then_body,
                elifs,
                else_body,
                ..
            } => {
                collect_global_names(then_body, out);
                for (_, b) in elifs {
                    collect_global_names(b, out);
                }
                collect_global_names(else_body, out);
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                collect_global_names(body, out)
            }
            StmtKind::Try {
                body,
                handlers,
                finally_body,
            } => {
                collect_global_names(body, out);
                for h in handlers {
                    collect_global_names(&h.body, out);
                }
                collect_global_names(finally_body, out);
            }
            _ => {}
        }
    }
}

/// Split the raw body of an f-string into literal text and `{expr[!r][:spec]}` holes.
fn parse_fstring(raw: &str, line: usize, col: usize) -> Result<Vec<FStringPart>, ParseError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(ParseError::new(
                    "f-string: single '}' is not allowed",
                    line,
                    col,
                ))
            }
            '{' => {
                let mut inner = String::new();
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match quote {
                        Some(q) => {
                            if c == q {
                                quote = None;
                            }
                        }
                        None => match c {
                            '\'' | '"' => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' if depth == 0 => {
                                closed = true;
                                break;
                            }
                            '}' => depth -= 1,
                            _ => {}
                        },
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(ParseError::new("f-string: expecting '}'", line, col));
                }
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(parse_fstring_hole(&inner, line, col)?);
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn parse_fstring_hole(inner: &str, line: usize, col: usize) -> Result<FStringPart, ParseError> {
    // Find a top-level `!r` / `:spec` split point.
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split = None;
    for (idx, c) in inner.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => {
                    split = Some(idx);
                    break;
                }
                '!' if depth == 0 && !inner[idx + 1..].starts_with('=') => {
                    split = Some(idx);
                    break;
                }
                _ => {}
            },
        }
    }

    let (expr_src, rest) = match split {
        Some(idx) => (&inner[..idx], &inner[idx..]),
        None => (inner, ""),
    };
    if expr_src.trim().is_empty() {
        return Err(ParseError::new(
            "f-string: empty expression not allowed",
            line,
            col,
        ));
    }

    let (repr, spec) = if let Some(conv) = rest.strip_prefix('!') {
        let (conv, spec) = match conv.split_once(':') {
            Some((c, s)) => (c, Some(s.to_string())),
            None => (conv, None),
        };
        match conv {
            "r" => (true, spec),
            "s" => (false, spec),
            other => {
                return Err(ParseError::new(
                    format!("f-string: invalid conversion character '{other}'"),
                    line,
                    col,
                ))
            }
        }
    } else if let Some(spec) = rest.strip_prefix(':') {
        (false, Some(spec.to_string()))
    } else {
        (false, None)
    };

    let expr = parse_expression(expr_src.trim()).map_err(|e| ParseError {
        message: format!("f-string: {}", e.message),
        line,
        col,
    })?;
    Ok(FStringPart::Hole { expr, repr, spec })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(src: &str) -> StmtKind {
        parse_program(src)
            .expect("parse")
            .body
            .into_iter()
            .next()
            .expect("statement")
            .kind
    }

    #[test]
    fn parses_function_with_defaults_and_annotations() {
        let program =
            parse_program("def gcd(a: int, b: int = 0) -> int:\n    return a if b == 0 else gcd(b, a % b)\n")
                .unwrap();
        let def = program.functions().find(|def| def.name == "gcd").expect("gcd");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params.iter().filter(|p| p.default.is_none()).count(), 1);
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(Expr::IfElse { .. }))));
    }

    #[test]
    fn ternary_binds_looser_than_addition() {
        let StmtKind::Expr(expr) = first_stmt("n if n <= 1 else f(n - 1) + f(n - 2)\n") else {
            panic!("expected expression statement");
        };
        let Expr::IfElse { otherwise, .. } = expr else {
            panic!("expected conditional expression");
        };
        assert!(matches!(*otherwise, Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn comprehension_if_is_not_a_ternary() {
        let StmtKind::Assign { value, .. } = first_stmt("xs = [x for x in ys if x > 0]\n") else {
            panic!("expected assignment");
        };
        let Expr::ListComp { conditions, .. } = value else {
            panic!("expected comprehension");
        };
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn tuple_assignment_targets() {
        let StmtKind::Assign { targets, .. } = first_stmt("a, b = b, a\n") else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn chained_comparisons_and_not_in() {
        let StmtKind::Expr(Expr::Compare { ops, .. }) = first_stmt("0 <= i < n not in seen\n")
        else {
            panic!("expected comparison");
        };
        let ops: Vec<CmpOp> = ops.into_iter().map(|(op, _)| op).collect();
        assert_eq!(ops, vec![CmpOp::Le, CmpOp::Lt, CmpOp::NotIn]);
    }

    #[test]
    fn single_line_suites() {
        let StmtKind::If { then_body, .. } = first_stmt("if x: y = 1\n") else {
            panic!("expected if");
        };
        assert_eq!(then_body.len(), 1);
    }

    #[test]
    fn fstring_holes_are_parsed() {
        let StmtKind::Expr(Expr::FString(parts)) = first_stmt("f'n={n!r:>3} {{x}}'\n") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], FStringPart::Hole { repr: true, spec: Some(s), .. } if s == ">3"));
        assert!(matches!(&parts[2], FStringPart::Literal(s) if s == " {x}"));
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = parse_program("def f(n)\n    return n\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.to_string().starts_with("SyntaxError:"), "{err}");
    }

    #[test]
    fn return_outside_function_is_rejected() {
        let err = parse_program("return 1\n").unwrap_err();
        assert!(err.message.contains("outside function"), "{err}");
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = parse_program("def f():\n    break\n").unwrap_err();
        assert!(err.message.contains("outside loop"), "{err}");
    }

    #[test]
    fn missing_indented_block_is_reported() {
        let err = parse_program("def f():\nreturn 1\n").unwrap_err();
        assert!(err.message.contains("indented block"), "{err}");
    }

    #[test]
    fn deep_nesting_is_rejected_without_overflowing() {
        let src = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
        let err = parse_program(&src).unwrap_err();
        assert!(err.message.contains("nested"), "{err}");
    }

    #[test]
    fn slices_parse_all_forms() {
        for src in ["a[1:2]\n", "a[:2]\n", "a[1:]\n", "a[::-1]\n", "a[:]\n"] {
            let StmtKind::Expr(Expr::Subscript { index, .. }) = first_stmt(src) else {
                panic!("expected subscript for {src}");
            };
            assert!(matches!(*index, Expr::Slice { .. }), "{src}");
        }
    }
}
