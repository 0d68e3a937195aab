//! Restricted boolean expression language.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := comparison ( ( "==" | "!=" | "===" | "!==" ) comparison )*
//! comparison := unary ( ( "<" | "<=" | ">" | ">=" ) unary )*
//! unary      := ( "!" | "-" ) unary | postfix
//! postfix    := primary ( "." ident | "[" or "]" )*
//! primary    := number | string | true | false | null | undefined
//!             | ident | "${" path "}" | "{{" path "}}" | "(" or ")"
//! ```
//!
//! There are no calls, assignments or arithmetic beyond unary minus.

use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

use crate::context::EvaluationContext;
use crate::error::{FlowError, FlowResult};
use super::resolver::{descend, resolve_path};
use super::value::{is_truthy, loose_equals, number_value, strict_equals, to_number};

const MAX_NESTING: usize = 64;
/// Operator and accessor nodes allowed in one expression; bounds the tree depth.
const MAX_NODES: usize = 512;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Reference(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    Minus,
    And,
    Or,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Option<Value>),
    Identifier(String),
    Reference(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> FlowResult<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FlowError::expression("empty expression"));
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            nodes: 0,
        };
        let root = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(FlowError::expression(format!(
                "unexpected token {:?}",
                parser.tokens[parser.pos]
            )));
        }

        Ok(Self { root })
    }

    /// Evaluate to a raw value against the merged context view
    pub fn evaluate(&self, context: &EvaluationContext) -> FlowResult<Option<Value>> {
        eval(&self.root, context)
    }

    /// Evaluate and coerce the result to a boolean
    pub fn evaluate_bool(&self, context: &EvaluationContext) -> FlowResult<bool> {
        Ok(is_truthy(self.evaluate(context)?.as_ref()))
    }
}

/// Parse and evaluate an expression; any failure yields `false`.
pub fn evaluate_expression(source: &str, context: &EvaluationContext) -> bool {
    match Expression::parse(source).and_then(|expr| expr.evaluate_bool(context)) {
        Ok(result) => result,
        Err(e) => {
            debug!("Expression '{}' evaluated to false: {}", source, e);
            false
        }
    }
}

fn tokenize(source: &str) -> FlowResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => i += 1,
            '$' if next == Some('{') => {
                let (path, end) = read_until(&chars, i + 2, "}")?;
                tokens.push(Token::Reference(path));
                i = end;
            }
            '{' if next == Some('{') => {
                let (path, end) = read_until(&chars, i + 2, "}}")?;
                tokens.push(Token::Reference(path));
                i = end;
            }
            '\'' | '"' => {
                let (text, end) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| FlowError::expression(format!("invalid number '{}'", literal)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let third = chars.get(i + 2).copied();
                let (token, width) = match (c, next, third) {
                    ('=', Some('='), Some('=')) => (Token::StrictEq, 3),
                    ('!', Some('='), Some('=')) => (Token::StrictNotEq, 3),
                    ('=', Some('='), _) => (Token::Eq, 2),
                    ('!', Some('='), _) => (Token::NotEq, 2),
                    ('<', Some('='), _) => (Token::Le, 2),
                    ('>', Some('='), _) => (Token::Ge, 2),
                    ('&', Some('&'), _) => (Token::And, 2),
                    ('|', Some('|'), _) => (Token::Or, 2),
                    ('<', _, _) => (Token::Lt, 1),
                    ('>', _, _) => (Token::Gt, 1),
                    ('!', _, _) => (Token::Not, 1),
                    ('-', _, _) => (Token::Minus, 1),
                    ('.', _, _) => (Token::Dot, 1),
                    ('[', _, _) => (Token::LBracket, 1),
                    (']', _, _) => (Token::RBracket, 1),
                    ('(', _, _) => (Token::LParen, 1),
                    (')', _, _) => (Token::RParen, 1),
                    _ => {
                        return Err(FlowError::expression(format!(
                            "unexpected character '{}' at {}",
                            c, i
                        )))
                    }
                };
                tokens.push(token);
                i += width;
            }
        }
    }

    Ok(tokens)
}

fn read_until(chars: &[char], start: usize, terminator: &str) -> FlowResult<(String, usize)> {
    let term: Vec<char> = terminator.chars().collect();
    let mut i = start;
    while i + term.len() <= chars.len() {
        if chars[i..i + term.len()] == term[..] {
            let inner: String = chars[start..i].iter().collect();
            return Ok((inner.trim().to_string(), i + term.len()));
        }
        i += 1;
    }
    Err(FlowError::expression("unterminated reference"))
}

fn read_string(chars: &[char], start: usize) -> FlowResult<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| FlowError::expression("unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(FlowError::expression("unterminated string"))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    nodes: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> FlowResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(FlowError::expression(format!(
                "expected {:?}, found {:?}",
                expected,
                self.peek()
            )))
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> FlowResult<T>) -> FlowResult<T> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(FlowError::expression("expression nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn node(&mut self, expr: Expr) -> FlowResult<Expr> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(FlowError::expression(format!("expression exceeds {} operators", MAX_NODES)));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> FlowResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = self.node(Expr::Or(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> FlowResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = self.node(Expr::And(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> FlowResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::StrictNotEq) => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = self.node(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn parse_comparison(&mut self) -> FlowResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = self.node(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn parse_unary(&mut self) -> FlowResult<Expr> {
        if self.eat(&Token::Not) {
            let inner = self.nested(|p| p.parse_unary())?;
            return self.node(Expr::Not(Box::new(inner)));
        }
        if self.eat(&Token::Minus) {
            let inner = self.nested(|p| p.parse_unary())?;
            return self.node(Expr::Negate(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> FlowResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => expr = self.node(Expr::Member(Box::new(expr), name))?,
                    other => {
                        return Err(FlowError::expression(format!(
                            "expected property name, found {:?}",
                            other
                        )))
                    }
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.nested(|p| p.parse_or())?;
                self.expect(Token::RBracket)?;
                expr = self.node(Expr::Index(Box::new(expr), Box::new(index)))?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> FlowResult<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Some(number_value(n)))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Some(Value::String(s)))),
            Some(Token::Reference(path)) => Ok(Expr::Reference(path)),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Some(Value::Bool(true))),
                "false" => Expr::Literal(Some(Value::Bool(false))),
                "null" => Expr::Literal(Some(Value::Null)),
                "undefined" => Expr::Literal(None),
                _ => Expr::Identifier(name),
            }),
            Some(Token::LParen) => {
                let inner = self.nested(|p| p.parse_or())?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(FlowError::expression(format!("unexpected token {:?}", other))),
        }
    }
}

fn eval(expr: &Expr, context: &EvaluationContext) -> FlowResult<Option<Value>> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Identifier(name) => context
            .lookup_root(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| FlowError::expression(format!("{} is not defined", name))),
        Expr::Reference(path) => Ok(resolve_path(context, path)),
        Expr::Member(target, name) => {
            let target = eval(target, context)?;
            member(target.as_ref(), name)
        }
        Expr::Index(target, index) => {
            let target = eval(target, context)?;
            let index = eval(index, context)?;
            let key = match &index {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                other => super::value::to_display_string(other.as_ref()),
            };
            member(target.as_ref(), &key)
        }
        Expr::Not(inner) => Ok(Some(Value::Bool(!is_truthy(eval(inner, context)?.as_ref())))),
        Expr::Negate(inner) => Ok(Some(number_value(-to_number(eval(inner, context)?.as_ref())))),
        Expr::And(left, right) => {
            let left = eval(left, context)?;
            if is_truthy(left.as_ref()) {
                eval(right, context)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, context)?;
            if is_truthy(left.as_ref()) {
                Ok(left)
            } else {
                eval(right, context)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, context)?;
            let right = eval(right, context)?;
            Ok(Some(Value::Bool(compare(*op, left.as_ref(), right.as_ref()))))
        }
    }
}

fn member(target: Option<&Value>, name: &str) -> FlowResult<Option<Value>> {
    match target {
        None | Some(Value::Null) => Err(FlowError::expression(format!(
            "cannot read property '{}' of {}",
            name,
            if target.is_none() { "undefined" } else { "null" }
        ))),
        Some(value) => Ok(descend(value, name)),
    }
}

fn compare(op: BinaryOp, left: Option<&Value>, right: Option<&Value>) -> bool {
    match op {
        BinaryOp::Eq => loose_equals(left, right),
        BinaryOp::NotEq => !loose_equals(left, right),
        BinaryOp::StrictEq => strict_equals(left, right),
        BinaryOp::StrictNotEq => !strict_equals(left, right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Some(Value::String(a)), Some(Value::String(b))) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            match ordering {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
            }
        }
    }
}
