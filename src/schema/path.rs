use std::fmt;

use serde::{Deserialize, Serialize};

/// A possibly qualified object name: `[database.][schema.]name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablePath {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TablePath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parses a dotted name. Quotes are not interpreted.
    pub fn parse(qualified: &str) -> Self {
        let parts: Vec<&str> = qualified.split('.').collect();
        match parts.as_slice() {
            [name] => Self::new(*name),
            [schema, name] => Self::with_schema(*schema, *name),
            [database, schema, name] => Self {
                database: Some(database.to_string()),
                schema: Some(schema.to_string()),
                name: name.to_string(),
            },
            _ => {
                // More than three segments: keep the tail as the name.
                let (head, name) = qualified.rsplit_once('.').unwrap_or(("", qualified));
                Self::with_schema(head, name)
            }
        }
    }

    /// Same path with `name` replaced.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            database: self.database.clone(),
            schema: self.schema.clone(),
            name: name.into(),
        }
    }

    /// Fills in missing qualifiers.
    pub fn or_defaults(mut self, database: Option<&str>, schema: Option<&str>) -> Self {
        if self.database.is_none() {
            self.database = database.map(str::to_string);
        }
        if self.schema.is_none() {
            self.schema = schema.map(str::to_string);
        }
        self
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{}.", db)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        f.write_str(&self.name)
    }
}

impl From<&str> for TablePath {
    fn from(s: &str) -> Self {
        TablePath::parse(s)
    }
}

impl From<String> for TablePath {
    fn from(s: String) -> Self {
        TablePath::parse(&s)
    }
}

impl From<&TablePath> for TablePath {
    fn from(p: &TablePath) -> Self {
        p.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        assert_eq!(TablePath::parse("users"), TablePath::new("users"));
        assert_eq!(
            TablePath::parse("app.users"),
            TablePath::with_schema("app", "users")
        );
        let full = TablePath::parse("db.app.users");
        assert_eq!(full.database.as_deref(), Some("db"));
        assert_eq!(full.to_string(), "db.app.users");
    }

    #[test]
    fn test_or_defaults_keeps_explicit_schema() {
        let p = TablePath::with_schema("app", "users").or_defaults(None, Some("public"));
        assert_eq!(p.schema.as_deref(), Some("app"));
        let p = TablePath::new("users").or_defaults(None, Some("public"));
        assert_eq!(p.to_string(), "public.users");
    }
}
