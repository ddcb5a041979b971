//! Task selection predicates.
//!
//! Operators select tasks with a small expression language:
//!
//! ```text
//! status == InProgress,WaitingForRecovery && recovery >= 2
//! name ~ '^DY.*' || !(status == Failed)
//! ```
//!
//! Terms are `status` (`==`/`!=` with a comma-separated list), `name`
//! (`==` for an exact name, `~` for a regular expression) and `recovery`
//! (compared against the recovery index). Terms combine with `&&`, `||`, `!`
//! and parentheses; `&&` binds tighter than `||`.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::CoreError;
use crate::task::GridTask;
use crate::TaskStatus;

/// Comparison used by numeric terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn apply(&self, lhs: u32, rhs: u32) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A boolean predicate over tasks.
#[derive(Debug, Clone)]
pub enum TaskSelection {
    /// Every task.
    All,
    /// Tasks whose status is one of the listed ones.
    Status(Vec<TaskStatus>),
    /// Tasks whose name matches the pattern.
    Name(Regex),
    /// Tasks whose recovery index satisfies the comparison.
    RecoveryIndex(Comparison, u32),
    Not(Box<TaskSelection>),
    And(Box<TaskSelection>, Box<TaskSelection>),
    Or(Box<TaskSelection>, Box<TaskSelection>),
}

impl TaskSelection {
    /// Evaluate the predicate for one task.
    pub fn matches(&self, task: &dyn GridTask) -> bool {
        match self {
            Self::All => true,
            Self::Status(statuses) => statuses.contains(&task.status()),
            Self::Name(pattern) => pattern.is_match(task.name().as_str()),
            Self::RecoveryIndex(cmp, value) => cmp.apply(task.recovery_index(), *value),
            Self::Not(inner) => !inner.matches(task),
            Self::And(lhs, rhs) => lhs.matches(task) && rhs.matches(task),
            Self::Or(lhs, rhs) => lhs.matches(task) || rhs.matches(task),
        }
    }
}

impl fmt::Display for TaskSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Status(statuses) => {
                let names: Vec<&str> = statuses.iter().map(|s| s.name()).collect();
                write!(f, "status == {}", names.join(","))
            }
            Self::Name(pattern) => write!(f, "name ~ '{}'", pattern.as_str()),
            Self::RecoveryIndex(cmp, value) => write!(f, "recovery {} {}", cmp.symbol(), value),
            Self::Not(inner) => write!(f, "!({inner})"),
            Self::And(lhs, rhs) => write!(f, "({lhs} && {rhs})"),
            Self::Or(lhs, rhs) => write!(f, "({lhs} || {rhs})"),
        }
    }
}

impl FromStr for TaskSelection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s).map_err(|reason| invalid(s, reason))?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let selection = parser.parse_or().map_err(|reason| invalid(s, reason))?;
        if parser.pos != tokens.len() {
            return Err(invalid(s, "unexpected trailing input".to_string()));
        }
        Ok(selection)
    }
}

fn invalid(expr: &str, reason: String) -> CoreError {
    CoreError::InvalidSelection {
        expr: expr.to_string(),
        reason,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Term {
        key: String,
        op: String,
        value: String,
    },
    Keyword(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(format!("expected '{c}{c}' at position {i}"));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let key: String = chars[start..i].iter().collect();
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }

                let op_len = match (chars.get(i), chars.get(i + 1)) {
                    (Some('=' | '!' | '<' | '>'), Some('=')) => 2,
                    (Some('=' | '<' | '>' | '~'), _) => 1,
                    _ => 0,
                };
                if op_len == 0 {
                    tokens.push(Token::Keyword(key));
                    continue;
                }
                let op: String = chars[i..i + op_len].iter().collect();
                i += op_len;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }

                let value = match chars.get(i) {
                    Some(quote @ ('\'' | '"')) => {
                        let quote = *quote;
                        let start = i + 1;
                        let end = chars[start..]
                            .iter()
                            .position(|&ch| ch == quote)
                            .map(|offset| start + offset)
                            .ok_or_else(|| format!("unterminated quote in term '{key}'"))?;
                        i = end + 1;
                        chars[start..end].iter().collect()
                    }
                    _ => {
                        let start = i;
                        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ')' {
                            i += 1;
                        }
                        chars[start..i].iter().collect::<String>()
                    }
                };
                if value.is_empty() {
                    return Err(format!("missing value in term '{key}'"));
                }
                tokens.push(Token::Term { key, op, value });
            }
            other => return Err(format!("unexpected character '{other}' at position {i}")),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<TaskSelection, String> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = TaskSelection::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<TaskSelection, String> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = TaskSelection::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<TaskSelection, String> {
        match self.next().cloned() {
            Some(Token::Not) => Ok(TaskSelection::Not(Box::new(self.parse_unary()?))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Keyword(word)) if word == "all" => Ok(TaskSelection::All),
            Some(Token::Keyword(word)) => Err(format!("unknown keyword '{word}'")),
            Some(Token::Term { key, op, value }) => parse_term(&key, &op, &value),
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn parse_term(key: &str, op: &str, value: &str) -> Result<TaskSelection, String> {
    match key {
        "status" => {
            let statuses = value
                .split(',')
                .map(|s| s.trim().parse::<TaskStatus>().map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            match op {
                "==" | "=" => Ok(TaskSelection::Status(statuses)),
                "!=" => Ok(TaskSelection::Not(Box::new(TaskSelection::Status(statuses)))),
                _ => Err(format!("operator '{op}' is not supported for status")),
            }
        }
        "name" => {
            let pattern = match op {
                "==" | "=" => format!("^{}$", regex::escape(value)),
                "!=" => {
                    let exact = Regex::new(&format!("^{}$", regex::escape(value)))
                        .map_err(|e| e.to_string())?;
                    return Ok(TaskSelection::Not(Box::new(TaskSelection::Name(exact))));
                }
                "~" => value.to_string(),
                _ => return Err(format!("operator '{op}' is not supported for name")),
            };
            Regex::new(&pattern)
                .map(TaskSelection::Name)
                .map_err(|e| e.to_string())
        }
        "recovery" => {
            let cmp = match op {
                "==" | "=" => Comparison::Eq,
                "!=" => Comparison::Ne,
                "<" => Comparison::Lt,
                "<=" => Comparison::Le,
                ">" => Comparison::Gt,
                ">=" => Comparison::Ge,
                _ => return Err(format!("operator '{op}' is not supported for recovery")),
            };
            let threshold = value
                .parse::<u32>()
                .map_err(|_| format!("'{value}' is not a valid recovery index"))?;
            Ok(TaskSelection::RecoveryIndex(cmp, threshold))
        }
        _ => Err(format!("unknown term '{key}'")),
    }
}
