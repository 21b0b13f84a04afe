//! Static per-dialect facts consulted by the synthesizers and introspectors.

use super::IsolationLevel;

/// What a dialect can express and how it spells things.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Name used in error messages, e.g. `postgres`.
    pub name: &'static str,
    /// Identifier quote character.
    pub quote: char,
    /// Types that accept a `(length)` argument.
    pub with_length: &'static [&'static str],
    /// Types that accept a `(precision[, scale])` argument.
    pub with_precision: &'static [&'static str],
    /// Types that accept a scale next to the precision.
    pub with_scale: &'static [&'static str],
    /// Length implied when none is declared.
    pub default_lengths: &'static [(&'static str, u32)],
    /// Precision and scale implied when none is declared.
    pub default_precisions: &'static [(&'static str, u32, Option<u32>)],
    pub isolation_levels: &'static [IsolationLevel],
    pub supports_schemas: bool,
    pub supports_databases: bool,
    /// `ALTER TABLE .. RENAME CONSTRAINT` is available.
    pub renames_constraints: bool,
    /// Column types change in place instead of by table recreation.
    pub alters_column_type: bool,
    /// Unique constraints are unique indices.
    pub uniques_as_indices: bool,
    pub supports_checks: bool,
    pub supports_exclusions: bool,
    pub supports_statement_cache: bool,
    /// Transactions restart on serialization failures.
    pub restart_on_conflict: bool,
    pub supports_comments: bool,
    /// Autoincrement may span several primary columns.
    pub composite_increment: bool,
    /// `Rowid` generation (`unique_rowid()`).
    pub supports_rowid: bool,
}

impl Capabilities {
    fn contains(list: &[&str], column_type: &str) -> bool {
        list.iter().any(|t| t.eq_ignore_ascii_case(column_type))
    }

    pub fn has_length(&self, column_type: &str) -> bool {
        Self::contains(self.with_length, column_type)
    }

    pub fn has_precision(&self, column_type: &str) -> bool {
        Self::contains(self.with_precision, column_type)
    }

    pub fn has_scale(&self, column_type: &str) -> bool {
        Self::contains(self.with_scale, column_type)
    }

    pub fn default_length(&self, column_type: &str) -> Option<u32> {
        self.default_lengths
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(column_type))
            .map(|(_, len)| *len)
    }

    pub fn default_precision(&self, column_type: &str) -> Option<(u32, Option<u32>)> {
        self.default_precisions
            .iter()
            .find(|(t, _, _)| t.eq_ignore_ascii_case(column_type))
            .map(|(_, p, s)| (*p, *s))
    }

    /// Drops a length that the type does not take or that equals its default.
    pub fn normalize_length(&self, column_type: &str, length: Option<u32>) -> Option<u32> {
        if !self.has_length(column_type) {
            return None;
        }
        match (length, self.default_length(column_type)) {
            (Some(len), Some(default)) if len == default => None,
            (len, _) => len,
        }
    }

    /// Same as [`normalize_length`](Self::normalize_length) for precision/scale.
    pub fn normalize_precision(
        &self,
        column_type: &str,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> (Option<u32>, Option<u32>) {
        if !self.has_precision(column_type) {
            return (None, None);
        }
        let scale = if self.has_scale(column_type) { scale } else { None };
        match self.default_precision(column_type) {
            Some((p, s)) if precision == Some(p) && (scale == s || scale.is_none()) => (None, None),
            _ => (precision, scale),
        }
    }

    pub fn supports_isolation(&self, level: IsolationLevel) -> bool {
        self.isolation_levels.contains(&level)
    }
}

const ALL_LEVELS: &[IsolationLevel] = &[
    IsolationLevel::ReadUncommitted,
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
];

/// PostgreSQL and CockroachDB keep microseconds unless told otherwise.
const TEMPORAL_PRECISIONS: &[(&str, u32, Option<u32>)] = &[
    ("timestamp without time zone", 6, None),
    ("timestamp with time zone", 6, None),
    ("time without time zone", 6, None),
    ("time with time zone", 6, None),
    ("interval", 6, None),
];

pub const SQLITE: Capabilities = Capabilities {
    name: "sqlite",
    quote: '"',
    with_length: &[
        "character", "varchar", "varying character", "nchar", "native character", "nvarchar", "text",
        "blob", "clob",
    ],
    with_precision: &["real", "double", "double precision", "float", "numeric", "decimal", "boolean", "date", "datetime"],
    with_scale: &["real", "double", "double precision", "float", "numeric", "decimal"],
    default_lengths: &[],
    default_precisions: &[],
    isolation_levels: &[IsolationLevel::ReadUncommitted, IsolationLevel::Serializable],
    supports_schemas: false,
    supports_databases: false,
    renames_constraints: false,
    alters_column_type: false,
    uniques_as_indices: false,
    supports_checks: true,
    supports_exclusions: false,
    supports_statement_cache: true,
    restart_on_conflict: false,
    supports_comments: false,
    composite_increment: false,
    supports_rowid: false,
};

pub const POSTGRES: Capabilities = Capabilities {
    name: "postgres",
    quote: '"',
    with_length: &["character varying", "varchar", "character", "char", "bit", "varbit", "bit varying"],
    with_precision: &[
        "numeric", "decimal", "interval", "time without time zone", "time with time zone",
        "timestamp without time zone", "timestamp with time zone", "timestamp", "timestamptz", "time",
    ],
    with_scale: &["numeric", "decimal"],
    default_lengths: &[],
    default_precisions: TEMPORAL_PRECISIONS,
    isolation_levels: ALL_LEVELS,
    supports_schemas: true,
    supports_databases: true,
    renames_constraints: true,
    alters_column_type: true,
    uniques_as_indices: false,
    supports_checks: true,
    supports_exclusions: true,
    supports_statement_cache: false,
    restart_on_conflict: false,
    supports_comments: true,
    composite_increment: true,
    supports_rowid: false,
};

pub const COCKROACH: Capabilities = Capabilities {
    name: "cockroachdb",
    quote: '"',
    with_length: &["character varying", "varchar", "character", "char", "bit", "varbit", "bit varying", "string"],
    with_precision: &[
        "numeric", "decimal", "interval", "time without time zone", "time with time zone",
        "timestamp without time zone", "timestamp with time zone", "timestamp", "timestamptz", "time",
    ],
    with_scale: &["numeric", "decimal"],
    default_lengths: &[],
    default_precisions: TEMPORAL_PRECISIONS,
    isolation_levels: &[IsolationLevel::ReadCommitted, IsolationLevel::Serializable],
    supports_schemas: true,
    supports_databases: true,
    renames_constraints: true,
    alters_column_type: true,
    uniques_as_indices: true,
    supports_checks: true,
    supports_exclusions: false,
    supports_statement_cache: false,
    restart_on_conflict: true,
    supports_comments: true,
    composite_increment: true,
    supports_rowid: true,
};

pub const MYSQL: Capabilities = Capabilities {
    name: "mysql",
    quote: '`',
    with_length: &["char", "varchar", "nvarchar", "binary", "varbinary"],
    with_precision: &["decimal", "dec", "numeric", "fixed", "float", "double", "time", "datetime", "timestamp"],
    with_scale: &["decimal", "dec", "numeric", "fixed", "float", "double"],
    default_lengths: &[("varchar", 255), ("char", 1), ("binary", 1), ("varbinary", 255)],
    default_precisions: &[
        ("decimal", 10, Some(0)),
        ("numeric", 10, Some(0)),
        ("dec", 10, Some(0)),
        ("float", 12, None),
        ("double", 22, None),
        ("datetime", 0, None),
        ("timestamp", 0, None),
        ("time", 0, None),
    ],
    isolation_levels: ALL_LEVELS,
    supports_schemas: false,
    supports_databases: true,
    renames_constraints: false,
    alters_column_type: true,
    uniques_as_indices: true,
    supports_checks: false,
    supports_exclusions: false,
    supports_statement_cache: false,
    restart_on_conflict: false,
    supports_comments: true,
    composite_increment: true,
    supports_rowid: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_length_is_normalized_away() {
        assert_eq!(MYSQL.normalize_length("varchar", Some(255)), None);
        assert_eq!(MYSQL.normalize_length("VARCHAR", Some(100)), Some(100));
        assert_eq!(MYSQL.normalize_length("int", Some(11)), None);
    }

    #[test]
    fn test_precision_only_for_supporting_types() {
        assert_eq!(POSTGRES.normalize_precision("integer", Some(32), Some(0)), (None, None));
        assert_eq!(POSTGRES.normalize_precision("numeric", Some(10), Some(2)), (Some(10), Some(2)));
        assert_eq!(MYSQL.normalize_precision("decimal", Some(10), Some(0)), (None, None));
    }

    #[test]
    fn test_isolation_support() {
        assert!(SQLITE.supports_isolation(IsolationLevel::Serializable));
        assert!(!SQLITE.supports_isolation(IsolationLevel::ReadCommitted));
        assert!(POSTGRES.supports_isolation(IsolationLevel::RepeatableRead));
    }
}
