//! Trigger expression language
//!
//! A small C-like language evaluated once per metric:
//!
//! ```text
//! t1 > ERROR_VALUE ? ERROR : (t1 > WARN_VALUE ? WARN : OK)
//! ```
//!
//! Variables are the target values `t1..tN`, `WARN_VALUE`, `ERROR_VALUE`
//! and `PREV_STATE`. State names evaluate to themselves. The result of an
//! expression must be a state.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{State, Trigger, TriggerType};

/// Expression errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("expression result is {0}, expected a state")]
    NotAState(String),

    #[error("trigger has neither thresholds nor an expression")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 16] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "!", "?", ":", "%",
];

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) {
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
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| ExpressionError::Syntax {
                position: start,
                message: format!("bad number '{}'", text),
            })?;
            tokens.push((start, Token::Number(value)));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            continue;
        }
        match c {
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| op.len() == 2 && **op == two)
                    .or_else(|| OPERATORS.iter().find(|op| op.len() == 1 && op.starts_with(c)))
                    .ok_or_else(|| ExpressionError::Syntax {
                        position: start,
                        message: format!("unexpected character '{}'", c),
                    })?;
                tokens.push((start, Token::Op(op)));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn ternary(&mut self) -> Result<Expr, ExpressionError> {
        let cond = self.or()?;
        if self.eat_op(&["?"]).is_none() {
            return Ok(cond);
        }
        let then = self.ternary()?;
        if self.eat_op(&[":"]).is_none() {
            return Err(self.error("expected ':'"));
        }
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["||"], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["&&"], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["==", "!=", "<=", ">=", "<", ">"], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self.peek().cloned();
        match token {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Expr::Var(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.ternary()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(other) => Err(self.error(format!("unexpected {:?}", other))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    State(State),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "number {}", n),
            Value::Bool(b) => write!(f, "bool {}", b),
            Value::State(s) => write!(f, "state {}", s),
        }
    }
}

impl Value {
    fn number(self) -> Result<f64, ExpressionError> {
        match self {
            Value::Number(n) => Ok(n),
            other => Err(ExpressionError::Type(format!("expected a number, got {}", other))),
        }
    }

    fn boolean(self) -> Result<bool, ExpressionError> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::Type(format!("expected a bool, got {}", other))),
        }
    }
}

/// Inputs of one evaluation
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Target values keyed `t1`, `t2`, ...
    pub values: BTreeMap<String, f64>,
    pub warn_value: Option<f64>,
    pub error_value: Option<f64>,
    pub prev_state: State,
}

/// Parsed trigger expression
#[derive(Debug, Clone)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let root = parser.ternary()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(Self { root })
    }

    /// The expression a trigger is evaluated with: its own for expression
    /// triggers, the threshold ladder otherwise
    pub fn for_trigger(trigger: &Trigger) -> Result<Self, ExpressionError> {
        if trigger.trigger_type == TriggerType::Expression {
            return Self::parse(trigger.expression().ok_or(ExpressionError::Empty)?);
        }
        let cmp = match trigger.trigger_type {
            TriggerType::Falling => "<=",
            _ => ">=",
        };
        let source = match (trigger.warn_value, trigger.error_value) {
            (Some(_), Some(_)) => format!(
                "t1 {cmp} ERROR_VALUE ? ERROR : (t1 {cmp} WARN_VALUE ? WARN : OK)",
                cmp = cmp
            ),
            (None, Some(_)) => format!("t1 {} ERROR_VALUE ? ERROR : OK", cmp),
            (Some(_), None) => format!("t1 {} WARN_VALUE ? WARN : OK", cmp),
            (None, None) => return Err(ExpressionError::Empty),
        };
        Self::parse(&source)
    }

    pub fn evaluate(&self, ctx: &ExpressionContext) -> Result<State, ExpressionError> {
        match eval(&self.root, ctx)? {
            Value::State(state) => Ok(state),
            other => Err(ExpressionError::NotAState(other.to_string())),
        }
    }
}

fn variable(name: &str, ctx: &ExpressionContext) -> Result<Value, ExpressionError> {
    if let Some(value) = ctx.values.get(name) {
        return Ok(Value::Number(*value));
    }
    let threshold = |value: Option<f64>| {
        value
            .map(Value::Number)
            .ok_or_else(|| ExpressionError::UnknownVariable(name.to_string()))
    };
    match name.to_ascii_uppercase().as_str() {
        "OK" => Ok(Value::State(State::Ok)),
        "WARN" => Ok(Value::State(State::Warn)),
        "ERROR" => Ok(Value::State(State::Error)),
        "NODATA" => Ok(Value::State(State::NoData)),
        "EXCEPTION" => Ok(Value::State(State::Exception)),
        "PREV_STATE" => Ok(Value::State(ctx.prev_state)),
        "WARN_VALUE" => threshold(ctx.warn_value),
        "ERROR_VALUE" => threshold(ctx.error_value),
        _ => Err(ExpressionError::UnknownVariable(name.to_string())),
    }
}

fn eval(expr: &Expr, ctx: &ExpressionContext) -> Result<Value, ExpressionError> {
    Ok(match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Var(name) => variable(name, ctx)?,
        Expr::Not(inner) => Value::Bool(!eval(inner, ctx)?.boolean()?),
        Expr::Neg(inner) => Value::Number(-eval(inner, ctx)?.number()?),
        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond, ctx)?.boolean()? {
                eval(then, ctx)?
            } else {
                eval(otherwise, ctx)?
            }
        }
        Expr::Binary("&&", left, right) => {
            Value::Bool(eval(left, ctx)?.boolean()? && eval(right, ctx)?.boolean()?)
        }
        Expr::Binary("||", left, right) => {
            Value::Bool(eval(left, ctx)?.boolean()? || eval(right, ctx)?.boolean()?)
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            match (*op, left, right) {
                ("==", l, r) => Value::Bool(l == r),
                ("!=", l, r) => Value::Bool(l != r),
                (op, l, r) => {
                    let (l, r) = (l.number()?, r.number()?);
                    match op {
                        "<" => Value::Bool(l < r),
                        "<=" => Value::Bool(l <= r),
                        ">" => Value::Bool(l > r),
                        ">=" => Value::Bool(l >= r),
                        "+" => Value::Number(l + r),
                        "-" => Value::Number(l - r),
                        "*" => Value::Number(l * r),
                        "/" => Value::Number(l / r),
                        "%" => Value::Number(l % r),
                        other => {
                            return Err(ExpressionError::Type(format!("unsupported operator {}", other)))
                        }
                    }
                }
            }
        }
    })
}
