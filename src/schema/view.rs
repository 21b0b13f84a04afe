use serde::{Deserialize, Serialize};

use super::path::TablePath;

/// A view recorded in the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub path: TablePath,
    /// Defining `SELECT` statement.
    pub expression: String,
    /// PostgreSQL materialized view.
    pub materialized: bool,
}

impl View {
    pub fn new(path: impl Into<TablePath>, expression: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expression: expression.into(),
            materialized: false,
        }
    }

    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.path.name
    }

    /// Value stored in the metadata table's `type` column.
    pub fn metadata_type(&self) -> &'static str {
        if self.materialized {
            MetadataKind::MaterializedView.as_str()
        } else {
            MetadataKind::View.as_str()
        }
    }
}

/// Kinds of rows kept in the metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    View,
    MaterializedView,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::View => "VIEW",
            MetadataKind::MaterializedView => "MATERIALIZED_VIEW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VIEW" => Some(MetadataKind::View),
            "MATERIALIZED_VIEW" => Some(MetadataKind::MaterializedView),
            _ => None,
        }
    }
}
