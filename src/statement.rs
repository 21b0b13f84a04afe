//! SQL statements and the up/down statement log.

use std::fmt;

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Best-effort textual rendering, `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interprets catalog flags: booleans, non-zero integers, and the
    /// `YES` / `t` / `true` spellings used by information_schema and pg_catalog.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => matches!(
                s.to_ascii_lowercase().as_str(),
                "yes" | "y" | "t" | "true" | "1"
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, " -- PARAMETERS: [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Recorded up/down statements.
///
/// `down[i]` undoes `up[i]`; reverting therefore runs `down` back to front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlInMemory {
    pub up: Vec<Query>,
    pub down: Vec<Query>,
}

impl SqlInMemory {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    pub fn push(&mut self, up: Vec<Query>, down: Vec<Query>) {
        self.up.extend(up);
        self.down.extend(down);
    }

    /// Down queries in the order they must be executed.
    pub fn down_in_execution_order(&self) -> impl Iterator<Item = &Query> {
        self.down.iter().rev()
    }

    pub fn clear(&mut self) {
        self.up.clear();
        self.down.clear();
    }
}

/// Up/down statements synthesized for one schema change.
///
/// Same layout as [`SqlInMemory`]: `down` is meant to be executed back to front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statements {
    pub up: Vec<Query>,
    pub down: Vec<Query>,
}

impl Statements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one statement and the statement that undoes it.
    pub fn pair(&mut self, up: impl Into<String>, down: impl Into<String>) {
        self.up.push(Query::new(up));
        self.down.push(Query::new(down));
    }

    pub fn push_up(&mut self, up: Query) {
        self.up.push(up);
    }

    pub fn push_down(&mut self, down: Query) {
        self.down.push(down);
    }

    pub fn append(&mut self, mut other: Statements) {
        self.up.append(&mut other.up);
        self.down.append(&mut other.down);
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    /// The statements that undo this change, with the same layout.
    pub fn inverse(self) -> Self {
        Self {
            up: self.down.into_iter().rev().collect(),
            down: self.up.into_iter().rev().collect(),
        }
    }
}
