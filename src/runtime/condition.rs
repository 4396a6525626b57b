/// Edge/route condition language
///
/// Conditions are parsed once when a flow is compiled and evaluated many times
/// against a conversation's variable store. Shape of a clause:
///
/// ```text
/// {{titulo}} exists
/// {{carrito_items_count}} greater_than 0
/// tipo_accion equals 'comprar' AND {{email}} not_empty
/// ```
///
/// Clauses chain with `AND` only. Evaluation never fails: unset variables make
/// every positive check false and every negative check (`not_exists`, `empty`,
/// `not_equals`, `not_contains`) true.

use crate::runtime::variables::{VarValue, VariableStore};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot parse `{input}`: {message}")]
pub struct ConditionParseError {
    pub input: String,
    pub message: String,
}

/// Right-hand side literal
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(f64),
    Bool(bool),
}

/// Right-hand side of a binary clause
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Literal),
    Variable(String),
}

/// Compiled condition AST
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    Never,
    Equals(String, Operand),
    NotEquals(String, Operand),
    GreaterThan(String, Operand),
    LessThan(String, Operand),
    GreaterOrEqual(String, Operand),
    LessOrEqual(String, Operand),
    Exists(String),
    NotExists(String),
    Empty(String),
    NotEmpty(String),
    Contains(String, Operand),
    NotContains(String, Operand),
    StartsWith(String, Operand),
    EndsWith(String, Operand),
    And(Vec<Condition>),
}

impl Condition {
    pub fn parse(input: &str) -> Result<Condition, ConditionParseError> {
        let fail = |message: &str| ConditionParseError {
            input: input.to_string(),
            message: message.to_string(),
        };

        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "true" | "default" | "always" => return Ok(Condition::Always),
            "false" | "never" => return Ok(Condition::Never),
            _ => {}
        }

        let tokens = tokenize(trimmed).map_err(|m| fail(&m))?;

        let mut clauses: Vec<Vec<Token>> = vec![Vec::new()];
        for token in tokens {
            match &token {
                Token::Word(w) if w.eq_ignore_ascii_case("and") => clauses.push(Vec::new()),
                Token::Word(w) if w.eq_ignore_ascii_case("or") => {
                    return Err(fail("OR is not supported; split the branch into separate edges"));
                }
                _ => {
                    if let Some(current) = clauses.last_mut() {
                        current.push(token);
                    }
                }
            }
        }

        let mut parsed = Vec::with_capacity(clauses.len());
        for clause in clauses {
            if clause.is_empty() {
                return Err(fail("empty clause around AND"));
            }
            parsed.push(parse_clause(clause).map_err(|m| fail(&m))?);
        }

        if parsed.len() == 1 {
            Ok(parsed.remove(0))
        } else {
            Ok(Condition::And(parsed))
        }
    }

    /// Evaluate against the store. Pure: same store, same answer.
    pub fn evaluate(&self, store: &VariableStore) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Equals(path, rhs) => matches_equal(&store.lookup(path), rhs, store),
            Condition::NotEquals(path, rhs) => !matches_equal(&store.lookup(path), rhs, store),
            Condition::GreaterThan(path, rhs) => compare(store, path, rhs, |l, r| l > r),
            Condition::LessThan(path, rhs) => compare(store, path, rhs, |l, r| l < r),
            Condition::GreaterOrEqual(path, rhs) => compare(store, path, rhs, |l, r| l >= r),
            Condition::LessOrEqual(path, rhs) => compare(store, path, rhs, |l, r| l <= r),
            Condition::Exists(path) => store.lookup(path).is_set(),
            Condition::NotExists(path) => !store.lookup(path).is_set(),
            Condition::Empty(path) => store.lookup(path).is_empty(),
            Condition::NotEmpty(path) => !store.lookup(path).is_empty(),
            Condition::Contains(path, rhs) => contains(&store.lookup(path), rhs, store),
            Condition::NotContains(path, rhs) => !contains(&store.lookup(path), rhs, store),
            Condition::StartsWith(path, rhs) => text_test(store, path, rhs, |l, r| l.starts_with(r)),
            Condition::EndsWith(path, rhs) => text_test(store, path, rhs, |l, r| l.ends_with(r)),
            Condition::And(all) => all.iter().all(|c| c.evaluate(store)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Placeholder(String),
    Quoted(String),
    Word(String),
    Symbol(&'static str),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '{' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut end = start;
            while end + 1 < chars.len() && !(chars[end] == '}' && chars[end + 1] == '}') {
                end += 1;
            }
            if end + 1 >= chars.len() {
                return Err("unterminated {{ placeholder".to_string());
            }
            let inner: String = chars[start..end].iter().collect();
            let inner = inner.trim().to_string();
            if inner.is_empty() {
                return Err("empty {{}} placeholder".to_string());
            }
            tokens.push(Token::Placeholder(inner));
            i = end + 2;
        } else if c == '\'' || c == '"' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end] != c {
                end += 1;
            }
            if end >= chars.len() {
                return Err(format!("unterminated {c} quote"));
            }
            tokens.push(Token::Quoted(chars[start..end].iter().collect()));
            i = end + 1;
        } else if matches!(c, '=' | '!' | '<' | '>') {
            let next = chars.get(i + 1).copied();
            let (symbol, width) = match (c, next) {
                ('=', Some('=')) => ("==", 2),
                ('=', _) => ("==", 1),
                ('!', Some('=')) => ("!=", 2),
                ('>', Some('=')) => (">=", 2),
                ('<', Some('=')) => ("<=", 2),
                ('>', _) => (">", 1),
                ('<', _) => ("<", 1),
                _ => return Err("stray '!'".to_string()),
            };
            tokens.push(Token::Symbol(symbol));
            i += width;
        } else {
            let start = i;
            while i < chars.len()
                && !chars[i].is_whitespace()
                && !matches!(chars[i], '=' | '!' | '<' | '>' | '\'' | '"')
                && !(chars[i] == '{' && chars.get(i + 1) == Some(&'{'))
            {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Exists,
    NotExists,
    Empty,
    NotEmpty,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

impl Op {
    fn from_name(name: &str) -> Option<Op> {
        Some(match name {
            "equals" | "equal" | "eq" | "==" => Op::Equals,
            "not_equals" | "not_equal" | "neq" | "!=" => Op::NotEquals,
            "greater_than" | "gt" | ">" => Op::GreaterThan,
            "less_than" | "lt" | "<" => Op::LessThan,
            "greater_or_equal" | "gte" | ">=" => Op::GreaterOrEqual,
            "less_or_equal" | "lte" | "<=" => Op::LessOrEqual,
            "exists" => Op::Exists,
            "not_exists" => Op::NotExists,
            "empty" | "is_empty" => Op::Empty,
            "not_empty" => Op::NotEmpty,
            "contains" => Op::Contains,
            "not_contains" => Op::NotContains,
            "starts_with" => Op::StartsWith,
            "ends_with" => Op::EndsWith,
            _ => return None,
        })
    }

    fn is_unary(self) -> bool {
        matches!(self, Op::Exists | Op::NotExists | Op::Empty | Op::NotEmpty)
    }
}

fn parse_clause(tokens: Vec<Token>) -> Result<Condition, String> {
    let mut iter = tokens.into_iter().peekable();

    let path = match iter.next() {
        Some(Token::Placeholder(p)) => p,
        Some(Token::Word(w)) => w,
        Some(other) => return Err(format!("expected a variable, found {other:?}")),
        None => return Err("missing variable".to_string()),
    };

    let op_name = match iter.next() {
        Some(Token::Symbol(s)) => s.to_string(),
        Some(Token::Word(w)) => {
            let w = w.to_ascii_lowercase();
            let joins_next = matches!(w.as_str(), "not" | "is")
                && matches!(iter.peek(), Some(Token::Word(_)));
            if joins_next {
                match iter.next() {
                    Some(Token::Word(next)) => format!("{w}_{}", next.to_ascii_lowercase()),
                    _ => w,
                }
            } else {
                w
            }
        }
        Some(other) => return Err(format!("expected an operator, found {other:?}")),
        None => return Err(format!("missing operator after `{path}`")),
    };
    let op = Op::from_name(&op_name).ok_or_else(|| format!("unknown operator `{op_name}`"))?;

    let rest: Vec<Token> = iter.collect();
    if op.is_unary() {
        if !rest.is_empty() {
            return Err(format!("`{op_name}` takes no value"));
        }
        return Ok(match op {
            Op::Exists => Condition::Exists(path),
            Op::NotExists => Condition::NotExists(path),
            Op::Empty => Condition::Empty(path),
            _ => Condition::NotEmpty(path),
        });
    }

    let rhs = parse_operand(rest).ok_or_else(|| format!("`{op_name}` needs a single value"))?;
    Ok(match op {
        Op::Equals => Condition::Equals(path, rhs),
        Op::NotEquals => Condition::NotEquals(path, rhs),
        Op::GreaterThan => Condition::GreaterThan(path, rhs),
        Op::LessThan => Condition::LessThan(path, rhs),
        Op::GreaterOrEqual => Condition::GreaterOrEqual(path, rhs),
        Op::LessOrEqual => Condition::LessOrEqual(path, rhs),
        Op::Contains => Condition::Contains(path, rhs),
        Op::NotContains => Condition::NotContains(path, rhs),
        Op::StartsWith => Condition::StartsWith(path, rhs),
        _ => Condition::EndsWith(path, rhs),
    })
}

fn parse_operand(tokens: Vec<Token>) -> Option<Operand> {
    if tokens.is_empty() {
        return None;
    }
    // Unquoted multi-word values: `tipo equals buscar producto`
    if tokens.len() > 1 {
        let words: Option<Vec<String>> = tokens
            .into_iter()
            .map(|t| match t {
                Token::Word(w) => Some(w),
                _ => None,
            })
            .collect();
        return words.map(|w| Operand::Literal(Literal::Text(w.join(" "))));
    }

    match tokens.into_iter().next()? {
        Token::Placeholder(p) => Some(Operand::Variable(p)),
        Token::Quoted(s) => Some(Operand::Literal(Literal::Text(s))),
        Token::Word(w) => Some(Operand::Literal(match w.as_str() {
            "true" => Literal::Bool(true),
            "false" => Literal::Bool(false),
            _ => match w.parse::<f64>() {
                Ok(n) => Literal::Number(n),
                Err(_) => Literal::Text(w),
            },
        })),
        Token::Symbol(_) => None,
    }
}

fn operand_value(rhs: &Operand, store: &VariableStore) -> VarValue {
    match rhs {
        Operand::Variable(path) => store.lookup(path),
        Operand::Literal(Literal::Text(s)) => VarValue::Set(Value::String(s.clone())),
        Operand::Literal(Literal::Bool(b)) => VarValue::Set(Value::Bool(*b)),
        Operand::Literal(Literal::Number(n)) => serde_json::Number::from_f64(*n)
            .map(|n| VarValue::Set(Value::Number(n)))
            .unwrap_or_default(),
    }
}

fn values_equal(left: &VarValue, right: &VarValue) -> bool {
    if !left.is_set() || !right.is_set() {
        return false;
    }
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return (l - r).abs() < f64::EPSILON;
    }
    left.render().trim() == right.render().trim()
}

fn matches_equal(left: &VarValue, rhs: &Operand, store: &VariableStore) -> bool {
    values_equal(left, &operand_value(rhs, store))
}

fn compare(store: &VariableStore, path: &str, rhs: &Operand, cmp: fn(f64, f64) -> bool) -> bool {
    match (store.lookup(path).as_number(), operand_value(rhs, store).as_number()) {
        (Some(l), Some(r)) => cmp(l, r),
        _ => false,
    }
}

fn contains(left: &VarValue, rhs: &Operand, store: &VariableStore) -> bool {
    let needle = operand_value(rhs, store);
    if !needle.is_set() {
        return false;
    }
    match left {
        VarValue::Unset => false,
        VarValue::Set(Value::Array(items)) => items
            .iter()
            .any(|item| values_equal(&VarValue::from(item.clone()), &needle)),
        VarValue::Set(Value::Object(map)) => map.contains_key(needle.render().trim()),
        VarValue::Set(_) => left
            .render()
            .to_lowercase()
            .contains(&needle.render().to_lowercase()),
    }
}

fn text_test(store: &VariableStore, path: &str, rhs: &Operand, test: fn(&str, &str) -> bool) -> bool {
    let left = store.lookup(path);
    let right = operand_value(rhs, store);
    if !left.is_set() || !right.is_set() {
        return false;
    }
    test(&left.render().to_lowercase(), &right.render().to_lowercase())
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Variable(p) => write!(f, "{{{{{p}}}}}"),
            Operand::Literal(Literal::Text(s)) => write!(f, "'{s}'"),
            Operand::Literal(Literal::Number(n)) => write!(f, "{n}"),
            Operand::Literal(Literal::Bool(b)) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binary = |f: &mut fmt::Formatter<'_>, p: &str, op: &str, r: &Operand| {
            write!(f, "{{{{{p}}}}} {op} {r}")
        };
        match self {
            Condition::Always => write!(f, "true"),
            Condition::Never => write!(f, "false"),
            Condition::Equals(p, r) => binary(f, p, "equals", r),
            Condition::NotEquals(p, r) => binary(f, p, "not_equals", r),
            Condition::GreaterThan(p, r) => binary(f, p, "greater_than", r),
            Condition::LessThan(p, r) => binary(f, p, "less_than", r),
            Condition::GreaterOrEqual(p, r) => binary(f, p, "greater_or_equal", r),
            Condition::LessOrEqual(p, r) => binary(f, p, "less_or_equal", r),
            Condition::Exists(p) => write!(f, "{{{{{p}}}}} exists"),
            Condition::NotExists(p) => write!(f, "{{{{{p}}}}} not_exists"),
            Condition::Empty(p) => write!(f, "{{{{{p}}}}} empty"),
            Condition::NotEmpty(p) => write!(f, "{{{{{p}}}}} not_empty"),
            Condition::Contains(p, r) => binary(f, p, "contains", r),
            Condition::NotContains(p, r) => binary(f, p, "not_contains", r),
            Condition::StartsWith(p, r) => binary(f, p, "starts_with", r),
            Condition::EndsWith(p, r) => binary(f, p, "ends_with", r),
            Condition::And(all) => {
                for (i, c) in all.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
        }
    }
}
