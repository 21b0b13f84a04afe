use serde::{Deserialize, Serialize};

/// How a generated column obtains its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    Increment,
    Uuid,
    Rowid,
}

/// Storage kind of a computed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeneratedType {
    Stored,
    Virtual,
}

impl GeneratedType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            GeneratedType::Stored => "STORED",
            GeneratedType::Virtual => "VIRTUAL",
        }
    }
}

/// A column of a [`Table`](super::Table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    /// Dialect-normalized type name, e.g. `integer`, `character varying`.
    pub column_type: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub is_primary: bool,
    pub is_generated: bool,
    pub generation_strategy: Option<GenerationStrategy>,
    /// Raw SQL default expression, e.g. `0`, `'draft'`, `now()`.
    pub default: Option<String>,
    /// MySQL `ON UPDATE` expression.
    pub on_update: Option<String>,
    pub comment: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub enum_values: Vec<String>,
    pub unsigned: bool,
    /// Expression of a computed column.
    pub as_expression: Option<String>,
    pub generated_type: Option<GeneratedType>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            length: None,
            precision: None,
            scale: None,
            is_nullable: false,
            is_unique: false,
            is_primary: false,
            is_generated: false,
            generation_strategy: None,
            default: None,
            on_update: None,
            comment: None,
            charset: None,
            collation: None,
            enum_values: Vec::new(),
            unsigned: false,
            as_expression: None,
            generated_type: None,
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.is_generated = true;
        self.generation_strategy = Some(strategy);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_type = "enum".to_string();
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn computed(mut self, expression: impl Into<String>, kind: GeneratedType) -> Self {
        self.as_expression = Some(expression.into());
        self.generated_type = Some(kind);
        self
    }

    pub fn is_enum(&self) -> bool {
        !self.enum_values.is_empty()
    }

    pub fn is_computed(&self) -> bool {
        self.generated_type.is_some()
    }

    /// Auto-increment columns.
    pub fn is_increment(&self) -> bool {
        self.is_generated && self.generation_strategy == Some(GenerationStrategy::Increment)
    }

    /// Checks the column-level invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.generation_strategy.is_some() && !self.is_generated {
            return Err(format!(
                "column \"{}\" has a generation strategy but is not marked generated",
                self.name
            ));
        }
        if self.name.is_empty() {
            return Err("column name must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_implies_generated() {
        let col = TableColumn::new("id", "integer").generated(GenerationStrategy::Increment);
        assert!(col.is_increment());
        assert!(col.validate().is_ok());

        let mut broken = TableColumn::new("id", "integer");
        broken.generation_strategy = Some(GenerationStrategy::Increment);
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_enum_builder_sets_type() {
        let col = TableColumn::new("status", "varchar").enum_values(["draft", "live"]);
        assert!(col.is_enum());
        assert_eq!(col.column_type, "enum");
    }
}
