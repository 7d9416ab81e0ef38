use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    String(String),
    /// Raw body of an `f"..."` literal; the parser splits out the `{expr}` holes.
    FString(String),

    // Operators / punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Arrow,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    PlusAssign,
    MinusAssign,
    StarAssign,
    DoubleStarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,

    Newline,
    Indent,
    Dedent,
    Eof,

    // Keywords (case-sensitive)
    Keyword(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

const KEYWORDS: &[&str] = &[
    "def", "return", "if", "elif", "else", "while", "for", "in", "not", "and", "or", "is", "None",
    "True", "False", "pass", "break", "continue", "try", "except", "finally", "as", "raise",
    "assert", "global", "del", "lambda", "class", "import", "from", "with", "yield",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let done = tok.kind == TokenKind::Eof;
        out.push(tok);
        if done {
            return Ok(out);
        }
    }
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    pending: std::collections::VecDeque<Token>,
    /// Nesting depth of `()[]{}`; newlines and indentation are ignored while positive.
    brackets: usize,
    at_line_start: bool,
    line_has_tokens: bool,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            col: 0,
            indents: vec![0],
            pending: std::collections::VecDeque::new(),
            brackets: 0,
            at_line_start: true,
            line_has_tokens: false,
            finished: false,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next();
        if let Some(ch) = ch {
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        ch
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next()
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize) -> ParseError {
        ParseError::new(message, line, col)
    }

    fn token(kind: TokenKind, line: usize, col: usize) -> Token {
        Token { kind, line, col }
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_'
    }

    /// Measures the indentation of the next logical line, skipping blank and comment-only lines.
    /// Returns `None` at end of input.
    fn measure_indent(&mut self) -> Option<usize> {
        loop {
            let mut width = 0usize;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return None,
                Some('\n') => {
                    self.bump();
                }
                Some('\r') => {
                    self.bump();
                }
                Some('#') => self.skip_comment(),
                Some(_) => return Some(width),
            }
        }
    }

    fn handle_line_start(&mut self) -> Result<(), ParseError> {
        self.at_line_start = false;
        let Some(width) = self.measure_indent() else {
            return Ok(());
        };
        let line = self.line;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.pending
                .push_back(Self::token(TokenKind::Indent, line, 1));
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.pending
                    .push_back(Self::token(TokenKind::Dedent, line, 1));
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error(
                    "unindent does not match any outer indentation level",
                    line,
                    width + 1,
                ));
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self, first: char, line: usize, col: usize) -> Result<Token, ParseError> {
        let mut buf = String::new();
        buf.push(first);
        let mut is_float = first == '.';
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                self.bump();
                if ch != '_' {
                    buf.push(ch);
                }
            } else if ch == '.' && !is_float && !buf.contains(['e', 'E']) {
                is_float = true;
                self.bump();
                buf.push(ch);
            } else if (ch == 'e' || ch == 'E') && !buf.contains(['e', 'E']) {
                let next = self.peek_second();
                let signed = matches!(next, Some('+') | Some('-'));
                if !(next.is_some_and(|c| c.is_ascii_digit()) || signed) {
                    break;
                }
                is_float = true;
                self.bump();
                buf.push('e');
                if signed {
                    if let Some(sign) = self.bump() {
                        buf.push(sign);
                    }
                }
            } else {
                break;
            }
        }

        if let Some(ch) = self.peek() {
            if Self::is_ident_start(ch) {
                return Err(self.error("invalid decimal literal", line, col));
            }
        }

        if is_float {
            let value = buf
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid float literal `{buf}`"), line, col))?;
            return Ok(Self::token(TokenKind::Float(value), line, col));
        }
        let value = buf
            .parse::<i64>()
            .map_err(|_| self.error(format!("integer literal `{buf}` is too large"), line, col))?;
        Ok(Self::token(TokenKind::Int(value), line, col))
    }

    fn lex_identifier(&mut self, first: char, line: usize, col: usize) -> Result<Token, ParseError> {
        let mut buf = String::new();
        buf.push(first);
        while let Some(ch) = self.peek() {
            if Self::is_ident_continue(ch) {
                buf.push(ch);
                self.bump();
            } else {
                break;
            }
        }

        // String prefixes: r"..", f"..", rf"..", fr"..".
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = buf.to_ascii_lowercase();
            if matches!(lower.as_str(), "r" | "f" | "rf" | "fr" | "u") {
                let raw = lower.contains('r');
                let quote = self.bump().unwrap_or('"');
                let body = self.lex_string_body(quote, raw, line, col)?;
                let kind = if lower.contains('f') {
                    TokenKind::FString(body)
                } else {
                    TokenKind::String(body)
                };
                return Ok(Self::token(kind, line, col));
            }
        }

        if KEYWORDS.contains(&buf.as_str()) {
            Ok(Self::token(TokenKind::Keyword(buf), line, col))
        } else {
            Ok(Self::token(TokenKind::Name(buf), line, col))
        }
    }

    fn lex_string_body(
        &mut self,
        quote: char,
        raw: bool,
        line: usize,
        col: usize,
    ) -> Result<String, ParseError> {
        let triple = self.peek() == Some(quote) && self.peek_second() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut buf = String::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_second() == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    buf.push(ch);
                }
                Some('\n') if !triple => {
                    return Err(self.error("unterminated string literal", line, col));
                }
                Some('\\') if raw => {
                    buf.push('\\');
                    if let Some(next) = self.bump() {
                        buf.push(next);
                    }
                }
                Some('\\') => match self.bump() {
                    Some('n') => buf.push('\n'),
                    Some('t') => buf.push('\t'),
                    Some('r') => buf.push('\r'),
                    Some('0') => buf.push('\0'),
                    Some('\\') => buf.push('\\'),
                    Some('\'') => buf.push('\''),
                    Some('"') => buf.push('"'),
                    Some('\n') => {}
                    Some(other) => {
                        buf.push('\\');
                        buf.push(other);
                    }
                    None => return Err(self.error("unterminated string literal", line, col)),
                },
                Some(ch) => buf.push(ch),
                None => {
                    let what = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(self.error(what, line, col));
                }
            }
        }
        Ok(buf)
    }

    /// Two-character operator lookahead: `first` has been consumed; if the next char is `second`
    /// consume it and return `double`.
    fn either(&mut self, second: char, double: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek() == Some(second) {
            self.bump();
            double
        } else {
            single
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            if let Some(tok) = self.pending.pop_front() {
                return Ok(tok);
            }
            if self.finished {
                return Ok(Self::token(TokenKind::Eof, self.line, self.col + 1));
            }
            if self.at_line_start && self.brackets == 0 {
                self.handle_line_start()?;
                if !self.pending.is_empty() {
                    continue;
                }
            }

            while let Some(ch) = self.peek() {
                if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\x0c' {
                    self.bump();
                } else if ch == '\\' && self.peek_second() == Some('\n') {
                    self.bump();
                    self.bump();
                } else if ch == '\\' && self.peek_second() == Some('\r') {
                    self.bump();
                    self.bump();
                    if self.peek() == Some('\n') {
                        self.bump();
                    }
                } else {
                    break;
                }
            }

            let line = self.line;
            let col = self.col + 1;
            let Some(ch) = self.bump() else {
                self.finished = true;
                if self.line_has_tokens {
                    self.pending
                        .push_back(Self::token(TokenKind::Newline, line, col));
                }
                while self.indents.len() > 1 {
                    self.indents.pop();
                    self.pending
                        .push_back(Self::token(TokenKind::Dedent, line, col));
                }
                continue;
            };

            let kind = match ch {
                '\n' => {
                    if self.brackets > 0 {
                        continue;
                    }
                    self.at_line_start = true;
                    if !self.line_has_tokens {
                        continue;
                    }
                    self.line_has_tokens = false;
                    return Ok(Self::token(TokenKind::Newline, line, col));
                }
                '#' => {
                    self.skip_comment();
                    continue;
                }
                '"' | '\'' => TokenKind::String(self.lex_string_body(ch, false, line, col)?),
                c if c.is_ascii_digit() => {
                    self.line_has_tokens = true;
                    return self.lex_number(c, line, col);
                }
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    self.line_has_tokens = true;
                    return self.lex_number('.', line, col);
                }
                c if Self::is_ident_start(c) => {
                    self.line_has_tokens = true;
                    return self.lex_identifier(c, line, col);
                }
                '(' => {
                    self.brackets += 1;
                    TokenKind::LParen
                }
                '[' => {
                    self.brackets += 1;
                    TokenKind::LBracket
                }
                '{' => {
                    self.brackets += 1;
                    TokenKind::LBrace
                }
                ')' | ']' | '}' => {
                    if self.brackets == 0 {
                        return Err(self.error(format!("unmatched '{ch}'"), line, col));
                    }
                    self.brackets -= 1;
                    match ch {
                        ')' => TokenKind::RParen,
                        ']' => TokenKind::RBracket,
                        _ => TokenKind::RBrace,
                    }
                }
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                '.' => TokenKind::Dot,
                '+' => self.either('=', TokenKind::PlusAssign, TokenKind::Plus),
                '-' => {
                    if self.peek() == Some('>') {
                        self.bump();
                        TokenKind::Arrow
                    } else {
                        self.either('=', TokenKind::MinusAssign, TokenKind::Minus)
                    }
                }
                '*' => {
                    if self.peek() == Some('*') {
                        self.bump();
                        self.either('=', TokenKind::DoubleStarAssign, TokenKind::DoubleStar)
                    } else {
                        self.either('=', TokenKind::StarAssign, TokenKind::Star)
                    }
                }
                '/' => {
                    if self.peek() == Some('/') {
                        self.bump();
                        self.either('=', TokenKind::DoubleSlashAssign, TokenKind::DoubleSlash)
                    } else {
                        self.either('=', TokenKind::SlashAssign, TokenKind::Slash)
                    }
                }
                '%' => self.either('=', TokenKind::PercentAssign, TokenKind::Percent),
                '=' => self.either('=', TokenKind::EqEq, TokenKind::Assign),
                '!' => {
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Ne
                    } else {
                        return Err(self.error("invalid syntax", line, col));
                    }
                }
                '<' => self.either('=', TokenKind::Le, TokenKind::Lt),
                '>' => self.either('=', TokenKind::Ge, TokenKind::Gt),
                other => {
                    return Err(self.error(format!("invalid character '{other}'"), line, col));
                }
            };
            self.line_has_tokens = true;
            return Ok(Self::token(kind, line, col));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn emits_indent_and_dedent_around_blocks() {
        let toks = kinds("def f(n):\n    return n\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword("def".into()),
                TokenKind::Name("f".into()),
                TokenKind::LParen,
                TokenKind::Name("n".into()),
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Keyword("return".into()),
                TokenKind::Name("n".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 2].contains(&TokenKind::Newline));
    }

    #[test]
    fn blank_and_comment_lines_do_not_change_indentation() {
        let toks = kinds("if x:\n    a = 1\n\n    # note\n    b = 2\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!((indents, dedents), (1, 1));
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(err.to_string().contains("unindent"), "{err}");
    }

    #[test]
    fn lexes_numbers_and_operators() {
        let toks = kinds("a //= 2 ** 3.5e1 - 1_000\n");
        assert_eq!(
            toks[..7],
            [
                TokenKind::Name("a".into()),
                TokenKind::DoubleSlashAssign,
                TokenKind::Int(2),
                TokenKind::DoubleStar,
                TokenKind::Float(35.0),
                TokenKind::Minus,
                TokenKind::Int(1000),
            ]
        );
    }

    #[test]
    fn lexes_triple_quoted_and_prefixed_strings() {
        let toks = kinds("\"\"\"doc\nline\"\"\"\nf'{x}!'\n");
        assert_eq!(toks[0], TokenKind::String("doc\nline".into()));
        assert_eq!(toks[2], TokenKind::FString("{x}!".into()));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert_eq!((err.line, err.col), (1, 5));
    }
}
