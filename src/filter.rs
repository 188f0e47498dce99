//! Entry filtering and output templating
//!
//! A small expression language decides which entries reach the output,
//! and a `{{path}}` template turns an entry into a custom line for the
//! streaming sink. Expressions are parsed once into a typed AST and
//! evaluated per entry; regex operands are compiled at parse time.
//!
//! Supported operands: `request.method`, `request.url`,
//! `response.status`, `time`. Operators: `==` `!=` `<` `<=` `>` `>=`,
//! `contains`, `=~` (regex), combined with `and`/`or`/`not` and
//! parentheses.

use crate::error::{Error, Result};
use crate::har::Entry;

/// A field an expression can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Method,
    Url,
    Status,
    Time,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "request.method" => Some(Self::Method),
            "request.url" => Some(Self::Url),
            "response.status" => Some(Self::Status),
            "time" => Some(Self::Time),
            _ => None,
        }
    }

    fn string_value(self, entry: &Entry) -> Option<String> {
        match self {
            Self::Method => Some(entry.request.method.clone()),
            Self::Url => Some(entry.request.url.clone()),
            Self::Status | Self::Time => None,
        }
    }

    fn numeric_value(self, entry: &Entry) -> Option<f64> {
        match self {
            Self::Status => Some(entry.response.status as f64),
            Self::Time => Some(entry.time),
            Self::Method | Self::Url => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug)]
enum Expr {
    Compare {
        field: Field,
        op: CmpOp,
        value: Operand,
    },
    Contains {
        field: Field,
        needle: String,
    },
    Regex {
        field: Field,
        re: regex::Regex,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug)]
enum Operand {
    Str(String),
    Num(f64),
}

/// A compiled filter expression.
#[derive(Debug)]
pub struct FilterExpr {
    root: Expr,
    source: String,
}

impl FilterExpr {
    /// Parse an expression string. Errors are `Error::Validation` with a
    /// position hint.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            input,
        };
        let root = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Validation(format!(
                "unexpected trailing input in filter expression: {input}"
            )));
        }
        Ok(Self {
            root,
            source: input.to_string(),
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one entry.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        eval(&self.root, entry)
    }
}

fn eval(expr: &Expr, entry: &Entry) -> bool {
    match expr {
        Expr::And(a, b) => eval(a, entry) && eval(b, entry),
        Expr::Or(a, b) => eval(a, entry) || eval(b, entry),
        Expr::Not(inner) => !eval(inner, entry),
        Expr::Contains { field, needle } => field
            .string_value(entry)
            .is_some_and(|v| v.contains(needle.as_str())),
        Expr::Regex { field, re } => field
            .string_value(entry)
            .is_some_and(|v| re.is_match(&v)),
        Expr::Compare { field, op, value } => match value {
            Operand::Num(rhs) => field
                .numeric_value(entry)
                .is_some_and(|lhs| compare_num(lhs, *op, *rhs)),
            Operand::Str(rhs) => field.string_value(entry).is_some_and(|lhs| match op {
                CmpOp::Eq => lhs == *rhs,
                CmpOp::Ne => lhs != *rhs,
                // Ordering over strings is not meaningful here
                _ => false,
            }),
        },
    }
}

fn compare_num(lhs: f64, op: CmpOp, rhs: f64) -> bool {
    match op {
        CmpOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
        CmpOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Ge => lhs >= rhs,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(CmpOp),
    Contains,
    Match,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                let mut closed = false;
                for (_, c2) in chars.by_ref() {
                    if c2 == quote {
                        closed = true;
                        break;
                    }
                    s.push(c2);
                }
                if !closed {
                    return Err(Error::Validation(format!(
                        "unterminated string at byte {i} in filter expression"
                    )));
                }
                tokens.push(Token::Str(s));
            }
            '=' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Eq));
                }
                Some((_, '~')) => {
                    chars.next();
                    tokens.push(Token::Match);
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "lone '=' at byte {i}; use '==' or '=~'"
                    )));
                }
            },
            '!' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ne));
                }
                _ => tokens.push(Token::Not),
            },
            '<' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Le));
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                }
            }
            '>' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ge));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            c if c.is_ascii_digit() => {
                let mut num = String::from(c);
                while let Some((_, c2)) = chars.peek() {
                    if c2.is_ascii_digit() || *c2 == '.' {
                        num.push(*c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num.parse::<f64>().map_err(|_| {
                    Error::Validation(format!("bad number '{num}' in filter expression"))
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, c2)) = chars.peek() {
                    if c2.is_ascii_alphanumeric() || *c2 == '_' || *c2 == '.' {
                        ident.push(*c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "and" | "AND" => tokens.push(Token::And),
                    "or" | "OR" => tokens.push(Token::Or),
                    "not" | "NOT" => tokens.push(Token::Not),
                    "contains" => tokens.push(Token::Contains),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => {
                return Err(Error::Validation(format!(
                    "unexpected character '{other}' at byte {i} in filter expression"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(name)) => {
                let field = Field::parse(&name)
                    .ok_or_else(|| self.error(&format!("unknown field '{name}'")))?;
                match self.next() {
                    Some(Token::Op(op)) => {
                        let value = match self.next() {
                            Some(Token::Str(s)) => Operand::Str(s),
                            Some(Token::Num(n)) => Operand::Num(n),
                            Some(Token::Ident(s)) => Operand::Str(s),
                            _ => return Err(self.error("expected comparison value")),
                        };
                        Ok(Expr::Compare { field, op, value })
                    }
                    Some(Token::Contains) => match self.next() {
                        Some(Token::Str(s)) | Some(Token::Ident(s)) => Ok(Expr::Contains {
                            field,
                            needle: s,
                        }),
                        _ => Err(self.error("'contains' expects a string")),
                    },
                    Some(Token::Match) => match self.next() {
                        Some(Token::Str(s)) => {
                            let re = regex::Regex::new(&s).map_err(|source| {
                                Error::InvalidPattern { pattern: s, source }
                            })?;
                            Ok(Expr::Regex { field, re })
                        }
                        _ => Err(self.error("'=~' expects a quoted pattern")),
                    },
                    _ => Err(self.error("expected an operator after field")),
                }
            }
            _ => Err(self.error("expected a field, 'not', or '('")),
        }
    }

    fn error(&self, what: &str) -> Error {
        Error::Validation(format!(
            "filter parse error: {what} (in '{}')",
            self.input
        ))
    }
}

/// Output template with `{{path}}` placeholders resolved against the
/// entry's JSON projection (`{{response.status}}`, `{{request.url}}`,
/// `{{time}}`, any HAR field path).
#[derive(Debug, Clone)]
pub struct EntryTemplate {
    template: String,
}

impl EntryTemplate {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template; unknown paths become empty strings.
    pub fn render(&self, entry: &Entry) -> Result<String> {
        let value = serde_json::to_value(entry)
            .map_err(|e| Error::Capture(format!("entry projection failed: {e}")))?;
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let path = after[..end].trim();
            out.push_str(&lookup(&value, path));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn lookup(value: &serde_json::Value, path: &str) -> String {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Post-entry stage combining an optional filter and an optional template.
///
/// In batch mode a `None` result excludes the entry from the final HAR;
/// in streaming mode it drops the NDJSON line.
#[derive(Debug, Default)]
pub struct FilterStage {
    filter: Option<FilterExpr>,
    template: Option<EntryTemplate>,
}

impl FilterStage {
    pub fn new(filter: Option<&str>, template: Option<&str>) -> Result<Self> {
        Ok(Self {
            filter: filter.map(FilterExpr::parse).transpose()?,
            template: template.map(EntryTemplate::new),
        })
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.filter.is_none() && self.template.is_none()
    }

    /// Apply the filter. `None` means the entry is dropped.
    #[must_use]
    pub fn apply(&self, entry: Entry) -> Option<Entry> {
        match &self.filter {
            Some(expr) if !expr.matches(&entry) => None,
            _ => Some(entry),
        }
    }

    /// Render the streaming line for an admitted entry: the template if
    /// one is set, otherwise the entry as a single JSON line.
    pub fn render_line(&self, entry: &Entry) -> Result<String> {
        match &self.template {
            Some(t) => t.render(entry),
            None => serde_json::to_string(entry)
                .map_err(|e| Error::Capture(format!("NDJSON serialization failed: {e}"))),
        }
    }
}
