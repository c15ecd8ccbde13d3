//! Minimal sandboxed evaluator for rewritten computed-property expressions.
//!
//! Supports a small JavaScript-like subset: literals, `dependencies[i]`,
//! member and index access, a handful of string/array methods, unary
//! `! - +`, arithmetic, comparisons, `== != === !==`, `&& || ??` and the
//! ternary operator. There are no assignments, loops or host calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use crate::expression::DEPENDENCIES_IDENT;

/// Failure while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("type error: {0}")]
    Type(String),
}

/// Evaluates a rewritten expression against positional dependency values.
///
/// Implementations must be side-effect free; the engine calls them freely
/// during recomputation.
pub trait ExpressionEvaluator {
    fn evaluate(&self, expression: &str, dependencies: &[Value]) -> Result<Value, EvalError>;
}

/// Default evaluator. Parsed expressions are cached by source text.
#[derive(Debug, Default)]
pub struct SandboxEvaluator {
    compiled: RefCell<HashMap<String, Rc<Expr>>>,
}

impl SandboxEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, expression: &str) -> Result<Rc<Expr>, EvalError> {
        if let Some(hit) = self.compiled.borrow().get(expression) {
            return Ok(Rc::clone(hit));
        }
        let expr = Rc::new(parse(expression)?);
        self.compiled
            .borrow_mut()
            .insert(expression.to_string(), Rc::clone(&expr));
        Ok(expr)
    }
}

impl ExpressionEvaluator for SandboxEvaluator {
    fn evaluate(&self, expression: &str, dependencies: &[Value]) -> Result<Value, EvalError> {
        let expr = self.compile(expression)?;
        eval(&expr, dependencies)
    }
}

/// JavaScript truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// --- AST ---

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Dependencies,
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalOp {
    And,
    Or,
    Nullish,
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "<", ">", "+", "-", "*", "/", "%",
    "!", "?", ":", "(", ")", "[", "]", ".", ",",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text.parse::<f64>().map_err(|_| EvalError::Syntax {
                position: start,
                message: format!("invalid number `{text}`"),
            })?;
            tokens.push((start, Token::Number(number)));
            continue;
        }

        if matches!(c, '\'' | '"' | '`') {
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&next) = chars.get(i) else {
                    return Err(EvalError::Syntax {
                        position: start,
                        message: "unterminated string".into(),
                    });
                };
                i += 1;
                match next {
                    '\\' => {
                        let escaped = chars.get(i).copied().unwrap_or('\\');
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    q if q == c => break,
                    other => text.push(other),
                }
            }
            tokens.push((start, Token::Str(text)));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let Some(punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) else {
            return Err(EvalError::Syntax {
                position: start,
                message: format!("unexpected character `{c}`"),
            });
        };
        i += punct.chars().count();
        tokens.push((start, Token::Punct(*punct)));
    }

    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    end: usize,
}

fn parse(source: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        cursor: 0,
        end: source.len(),
    };
    let expr = parser.parse_expr()?;
    if parser.cursor != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|(p, _)| *p)
            .unwrap_or(self.end)
    }

    fn error(&self, message: &str) -> EvalError {
        EvalError::Syntax {
            position: self.position(),
            message: message.to_string(),
        }
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{punct}`")))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        let test = self.parse_nullish()?;
        if self.eat("?") {
            let then = self.parse_expr()?;
            self.expect(":")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Conditional(
                Box::new(test),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(test)
    }

    fn parse_nullish(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_or()?;
        while self.eat("??") {
            let right = self.parse_or()?;
            left = Expr::Logical(LogicalOp::Nullish, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while self.eat("&&") {
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let Some(Token::Ident(name)) = self.peek().cloned() else {
                    return Err(self.error("expected property name"));
                };
                self.cursor += 1;
                if self.eat("(") {
                    let args = self.parse_list(")")?;
                    expr = Expr::Call(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat("[") {
                let index = self.parse_expr()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.cursor += 1;
        match token {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                DEPENDENCIES_IDENT => Ok(Expr::Dependencies),
                _ => Err(EvalError::UnknownIdentifier(name)),
            },
            Token::Punct("(") => {
                let inner = self.parse_expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => Ok(Expr::Array(self.parse_list("]")?)),
            Token::Punct(p) => {
                self.cursor -= 1;
                Err(self.error(&format!("unexpected `{p}`")))
            }
        }
    }
}

// --- Evaluation ---

fn eval(expr: &Expr, deps: &[Value]) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Dependencies => Ok(Value::Array(deps.to_vec())),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, deps))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Index(target, index) => {
            // avoid cloning the whole dependency array for the common case
            if let Expr::Dependencies = **target {
                let i = to_number(&eval(index, deps)?);
                return Ok(index_of(i, deps.len())
                    .and_then(|i| deps.get(i).cloned())
                    .unwrap_or(Value::Null));
            }
            let target = eval(target, deps)?;
            let index = eval(index, deps)?;
            member(&target, &index)
        }
        Expr::Member(target, name) => {
            let target = eval(target, deps)?;
            member(&target, &Value::String(name.clone()))
        }
        Expr::Call(target, method, args) => {
            let target = eval(target, deps)?;
            let args = args
                .iter()
                .map(|a| eval(a, deps))
                .collect::<Result<Vec<_>, _>>()?;
            call(&target, method, &args)
        }
        Expr::Unary(op, operand) => {
            let v = eval(operand, deps)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&v)),
                UnaryOp::Neg => number(-to_number(&v)),
                UnaryOp::Plus => number(to_number(&v)),
            })
        }
        Expr::Logical(op, left, right) => {
            let l = eval(left, deps)?;
            let short_circuit = match op {
                LogicalOp::And => !truthy(&l),
                LogicalOp::Or => truthy(&l),
                LogicalOp::Nullish => !l.is_null(),
            };
            if short_circuit {
                Ok(l)
            } else {
                eval(right, deps)
            }
        }
        Expr::Conditional(test, then, otherwise) => {
            if truthy(&eval(test, deps)?) {
                eval(then, deps)
            } else {
                eval(otherwise, deps)
            }
        }
        Expr::Binary(op, left, right) => {
            let l = eval(left, deps)?;
            let r = eval(right, deps)?;
            Ok(binary(*op, &l, &r))
        }
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if l.is_string() || r.is_string() {
                Value::String(format!("{}{}", to_display(l), to_display(r)))
            } else {
                number(to_number(l) + to_number(r))
            }
        }
        BinaryOp::Sub => number(to_number(l) - to_number(r)),
        BinaryOp::Mul => number(to_number(l) * to_number(r)),
        BinaryOp::Div => number(to_number(l) / to_number(r)),
        BinaryOp::Rem => number(to_number(l) % to_number(r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(l).partial_cmp(&to_number(r)),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::StrictEq => Value::Bool(strict_equals(l, r)),
        BinaryOp::StrictNe => Value::Bool(!strict_equals(l, r)),
        BinaryOp::Eq => Value::Bool(loose_equals(l, r)),
        BinaryOp::Ne => Value::Bool(!loose_equals(l, r)),
    }
}

fn strict_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn loose_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => l == r,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            l == r
        }
        _ => to_number(l) == to_number(r),
    }
}

fn member(target: &Value, key: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Null => Err(EvalError::Type(format!(
            "cannot read property {} of null",
            to_display(key)
        ))),
        Value::Array(items) => {
            if key.as_str() == Some("length") {
                return Ok(Value::from(items.len()));
            }
            Ok(index_of(to_number(key), items.len())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null))
        }
        Value::String(s) => {
            if key.as_str() == Some("length") {
                return Ok(Value::from(s.chars().count()));
            }
            Ok(index_of(to_number(key), usize::MAX)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        Value::Object(map) => Ok(map.get(&to_display(key)).cloned().unwrap_or(Value::Null)),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Null),
    }
}

fn call(target: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arg = args.first().unwrap_or(&Value::Null);
    match (target, method) {
        (Value::Array(items), "includes") => {
            Ok(Value::Bool(items.iter().any(|i| strict_equals(i, arg))))
        }
        (Value::Array(items), "indexOf") => Ok(items
            .iter()
            .position(|i| strict_equals(i, arg))
            .map(Value::from)
            .unwrap_or_else(|| Value::from(-1))),
        (Value::Array(items), "join") => {
            let sep = arg.as_str().unwrap_or(",");
            Ok(Value::String(
                items.iter().map(to_display).collect::<Vec<_>>().join(sep),
            ))
        }
        (Value::String(s), "includes") => Ok(Value::Bool(s.contains(&to_display(arg)))),
        (Value::String(s), "startsWith") => Ok(Value::Bool(s.starts_with(&to_display(arg)))),
        (Value::String(s), "endsWith") => Ok(Value::Bool(s.ends_with(&to_display(arg)))),
        (Value::String(s), "indexOf") => Ok(s
            .find(&to_display(arg))
            .map(|byte| Value::from(s[..byte].chars().count()))
            .unwrap_or_else(|| Value::from(-1))),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::Object(map), "hasOwnProperty") => {
            Ok(Value::Bool(map.contains_key(&to_display(arg))))
        }
        (_, "toString") => Ok(Value::String(to_display(target))),
        _ => Err(EvalError::Type(format!(
            "{method} is not a function on {}",
            crate::types::json_type_name(target)
        ))),
    }
}

fn index_of(n: f64, len: usize) -> Option<usize> {
    if n.fract() == 0.0 && n >= 0.0 && n < len as f64 {
        Some(n as usize)
    } else {
        None
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items.iter().map(to_display).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

/// Converts an `f64` result to JSON, keeping integral values as integers.
/// Non-finite results have no JSON form and become `null`.
fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
