//! Deterministic constraint and index names.

/// Derives constraint names from a table and the columns they cover.
///
/// Every method must be pure: the same inputs always produce the same name.
/// Column renames rely on this to recognize default-named constraints and
/// re-derive their names.
pub trait NamingStrategy: Send + Sync {
    fn primary_key_name(&self, table: &str, columns: &[String]) -> String;
    fn unique_constraint_name(&self, table: &str, columns: &[String]) -> String;
    fn foreign_key_name(&self, table: &str, columns: &[String]) -> String;
    fn index_name(&self, table: &str, columns: &[String], where_clause: Option<&str>) -> String;
    fn check_constraint_name(&self, table: &str, expression: &str, is_enum: bool) -> String;
    fn exclusion_constraint_name(&self, table: &str, expression: &str) -> String;
}

/// The default naming scheme: a kind prefix plus a truncated hash of
/// `<table>_<sorted columns>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamingStrategy;

impl DefaultNamingStrategy {
    fn hashed(prefix: &str, key: &str, len: usize) -> String {
        let hex = blake3::hash(key.as_bytes()).to_hex();
        format!("{}{}", prefix, &hex.as_str()[..len])
    }

    fn column_key(table: &str, columns: &[String]) -> String {
        let mut sorted: Vec<&str> = columns.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!("{}_{}", bare_table_name(table), sorted.join("_"))
    }
}

impl NamingStrategy for DefaultNamingStrategy {
    fn primary_key_name(&self, table: &str, columns: &[String]) -> String {
        Self::hashed("PK_", &Self::column_key(table, columns), 27)
    }

    fn unique_constraint_name(&self, table: &str, columns: &[String]) -> String {
        Self::hashed("UQ_", &Self::column_key(table, columns), 27)
    }

    fn foreign_key_name(&self, table: &str, columns: &[String]) -> String {
        Self::hashed("FK_", &Self::column_key(table, columns), 27)
    }

    fn index_name(&self, table: &str, columns: &[String], where_clause: Option<&str>) -> String {
        let mut key = Self::column_key(table, columns);
        if let Some(w) = where_clause.filter(|w| !w.is_empty()) {
            key.push('_');
            key.push_str(w);
        }
        Self::hashed("IDX_", &key, 26)
    }

    fn check_constraint_name(&self, table: &str, expression: &str, is_enum: bool) -> String {
        let key = format!("{}_{}", bare_table_name(table), expression);
        let name = Self::hashed("CHK_", &key, 26);
        if is_enum {
            format!("{}_ENUM", name)
        } else {
            name
        }
    }

    fn exclusion_constraint_name(&self, table: &str, expression: &str) -> String {
        let key = format!("{}_{}", bare_table_name(table), expression);
        Self::hashed("XCL_", &key, 26)
    }
}

/// Strips database/schema qualifiers: `public.users` -> `users`.
pub fn bare_table_name(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_names_are_deterministic() {
        let n = DefaultNamingStrategy;
        let a = n.unique_constraint_name("users", &cols(&["email", "tenant"]));
        let b = n.unique_constraint_name("users", &cols(&["email", "tenant"]));
        assert_eq!(a, b);
        assert!(a.starts_with("UQ_"));
        assert_eq!(a.len(), 30);
    }

    #[test]
    fn test_column_order_does_not_matter() {
        let n = DefaultNamingStrategy;
        assert_eq!(
            n.primary_key_name("t", &cols(&["a", "b"])),
            n.primary_key_name("t", &cols(&["b", "a"]))
        );
    }

    #[test]
    fn test_schema_prefix_is_ignored() {
        let n = DefaultNamingStrategy;
        assert_eq!(
            n.foreign_key_name("public.orders", &cols(&["user_id"])),
            n.foreign_key_name("orders", &cols(&["user_id"]))
        );
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let n = DefaultNamingStrategy;
        let c = cols(&["a"]);
        assert_ne!(n.unique_constraint_name("t", &c), n.primary_key_name("t", &c));
        assert_ne!(n.index_name("t", &c, None), n.index_name("t", &c, Some("a > 0")));
        assert!(n.check_constraint_name("t", "a > 0", true).ends_with("_ENUM"));
        assert!(n.exclusion_constraint_name("t", "USING gist (a WITH =)").starts_with("XCL_"));
    }
}
