use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ObjectKind, Result, RunnerError};
use crate::naming::NamingStrategy;

use super::column::TableColumn;
use super::constraint::{TableCheck, TableExclusion, TableForeignKey, TableIndex, TableUnique};
use super::path::TablePath;

/// A constraint whose name changed because a column it covers was renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintRename {
    pub kind: ObjectKind,
    pub old_name: String,
    pub new_name: String,
}

/// In-memory description of a table and its constraints.
///
/// Cached tables are shared as `Arc<Table>` snapshots; a change clones the
/// snapshot, edits the clone and publishes it once the DDL went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub path: TablePath,
    pub columns: Vec<TableColumn>,
    pub indices: Vec<TableIndex>,
    pub foreign_keys: Vec<TableForeignKey>,
    pub uniques: Vec<TableUnique>,
    pub checks: Vec<TableCheck>,
    pub exclusions: Vec<TableExclusion>,
    /// Name of the primary key constraint, when the engine names it.
    pub primary_key_name: Option<String>,
    /// Storage engine hint (MySQL).
    pub engine: Option<String>,
    pub comment: Option<String>,
    /// Set on tables created during the current session.
    pub just_created: bool,
    /// SQLite `WITHOUT ROWID` tables.
    pub without_rowid: bool,
}

impl Table {
    pub fn new(path: impl Into<TablePath>) -> Self {
        Self {
            path: path.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            exclusions: Vec::new(),
            primary_key_name: None,
            engine: None,
            comment: None,
            just_created: false,
            without_rowid: false,
        }
    }

    pub fn column(mut self, column: TableColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: TableIndex) -> Self {
        self.indices.push(index);
        self
    }

    pub fn unique(mut self, unique: TableUnique) -> Self {
        self.uniques.push(unique);
        self
    }

    pub fn check(mut self, check: TableCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn exclusion(mut self, exclusion: TableExclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    pub fn foreign_key(mut self, foreign_key: TableForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn name(&self) -> &str {
        &self.path.name
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn find_column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_column_mut(&mut self, name: &str) -> Option<&mut TableColumn> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Like [`find_column`](Self::find_column) but reports a `NotFound` error.
    pub fn require_column(&self, name: &str) -> Result<&TableColumn> {
        self.find_column(name).ok_or_else(|| {
            RunnerError::not_found(ObjectKind::Column, format!("{}.{}", self.path, name))
        })
    }

    pub fn primary_columns(&self) -> Vec<&TableColumn> {
        self.columns.iter().filter(|c| c.is_primary).collect()
    }

    pub fn primary_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn find_index(&self, name: &str) -> Option<&TableIndex> {
        self.indices.iter().find(|i| i.name.as_deref() == Some(name))
    }

    pub fn find_unique(&self, name: &str) -> Option<&TableUnique> {
        self.uniques.iter().find(|u| u.name.as_deref() == Some(name))
    }

    pub fn find_check(&self, name: &str) -> Option<&TableCheck> {
        self.checks.iter().find(|c| c.name.as_deref() == Some(name))
    }

    pub fn find_exclusion(&self, name: &str) -> Option<&TableExclusion> {
        self.exclusions.iter().find(|e| e.name.as_deref() == Some(name))
    }

    pub fn find_foreign_key(&self, name: &str) -> Option<&TableForeignKey> {
        self.foreign_keys.iter().find(|f| f.name.as_deref() == Some(name))
    }

    /// Whether an index or constraint of this table is already called `name`.
    pub fn has_constraint_named(&self, name: &str) -> bool {
        self.find_index(name).is_some()
            || self.find_unique(name).is_some()
            || self.find_check(name).is_some()
            || self.find_exclusion(name).is_some()
            || self.find_foreign_key(name).is_some()
            || (!self.primary_columns().is_empty() && self.primary_key_name.as_deref() == Some(name))
    }

    /// Single-column unique constraint or unique index on `column`.
    pub fn single_column_unique(&self, column: &str) -> Option<&TableUnique> {
        self.uniques
            .iter()
            .find(|u| u.column_names.len() == 1 && u.column_names[0] == column)
    }

    fn has_single_column_unique_index(&self, column: &str) -> bool {
        self.indices
            .iter()
            .any(|i| i.is_unique && i.column_names.len() == 1 && i.column_names[0] == column)
    }

    // ------------------------------------------------------------------
    // Mutation (applied to clones only)
    // ------------------------------------------------------------------

    pub fn add_column(&mut self, column: TableColumn) {
        self.columns.push(column);
    }

    /// Removes a column together with every constraint that covers it.
    pub fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c.name != name);
        let covers = |cols: &Vec<String>| cols.iter().any(|c| c == name);
        self.indices.retain(|i| !covers(&i.column_names));
        self.uniques.retain(|u| !covers(&u.column_names));
        self.checks.retain(|c| !covers(&c.column_names));
        self.foreign_keys.retain(|f| !covers(&f.column_names));
        if !self.columns.iter().any(|c| c.is_primary) {
            self.primary_key_name = None;
        }
    }

    pub fn replace_column(&mut self, old_name: &str, column: TableColumn) {
        if let Some(slot) = self.columns.iter_mut().find(|c| c.name == old_name) {
            *slot = column;
        }
    }

    pub fn add_unique(&mut self, unique: TableUnique) {
        if unique.column_names.len() == 1 {
            let col = unique.column_names[0].clone();
            if let Some(c) = self.find_column_mut(&col) {
                c.is_unique = true;
            }
        }
        self.uniques.push(unique);
    }

    pub fn remove_unique(&mut self, name: &str) {
        let removed: Vec<TableUnique> = self
            .uniques
            .iter()
            .filter(|u| u.name.as_deref() == Some(name))
            .cloned()
            .collect();
        self.uniques.retain(|u| u.name.as_deref() != Some(name));
        for uq in removed {
            if uq.column_names.len() == 1 {
                let col = &uq.column_names[0];
                let still_unique = self.single_column_unique(col).is_some()
                    || self.has_single_column_unique_index(col);
                if let Some(c) = self.find_column_mut(col) {
                    c.is_unique = still_unique;
                }
            }
        }
    }

    pub fn add_index(&mut self, index: TableIndex) {
        if index.is_unique && index.column_names.len() == 1 {
            let col = index.column_names[0].clone();
            if let Some(c) = self.find_column_mut(&col) {
                c.is_unique = true;
            }
        }
        self.indices.push(index);
    }

    pub fn remove_index(&mut self, name: &str) {
        let removed: Vec<TableIndex> = self
            .indices
            .iter()
            .filter(|i| i.name.as_deref() == Some(name))
            .cloned()
            .collect();
        self.indices.retain(|i| i.name.as_deref() != Some(name));
        for idx in removed {
            if idx.is_unique && idx.column_names.len() == 1 {
                let col = &idx.column_names[0];
                let still_unique = self.single_column_unique(col).is_some()
                    || self.has_single_column_unique_index(col);
                if let Some(c) = self.find_column_mut(col) {
                    c.is_unique = still_unique;
                }
            }
        }
    }

    pub fn add_check(&mut self, check: TableCheck) {
        self.checks.push(check);
    }

    pub fn remove_check(&mut self, name: &str) {
        self.checks.retain(|c| c.name.as_deref() != Some(name));
    }

    pub fn add_exclusion(&mut self, exclusion: TableExclusion) {
        self.exclusions.push(exclusion);
    }

    pub fn remove_exclusion(&mut self, name: &str) {
        self.exclusions.retain(|e| e.name.as_deref() != Some(name));
    }

    pub fn add_foreign_key(&mut self, foreign_key: TableForeignKey) {
        self.foreign_keys.push(foreign_key);
    }

    pub fn remove_foreign_key(&mut self, name: &str) {
        self.foreign_keys.retain(|f| f.name.as_deref() != Some(name));
    }

    /// Marks exactly `columns` as the primary key.
    pub fn set_primary_columns(&mut self, columns: &[String]) {
        for c in &mut self.columns {
            c.is_primary = columns.contains(&c.name);
        }
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    /// Current primary key constraint name, derived when the engine did not report one.
    pub fn primary_key_name_or_default(&self, naming: &dyn NamingStrategy) -> String {
        self.primary_key_name
            .clone()
            .unwrap_or_else(|| naming.primary_key_name(self.name(), &self.primary_column_names()))
    }

    /// Fills every missing constraint name (the primary key's included) and turns column-level `is_unique`
    /// flags into unique constraints.
    pub fn normalize(&mut self, naming: &dyn NamingStrategy) {
        let table = self.path.name.clone();

        let flagged: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.is_unique && !c.is_primary)
            .map(|c| c.name.clone())
            .collect();
        for col in flagged {
            if self.single_column_unique(&col).is_none() && !self.has_single_column_unique_index(&col) {
                let cols = vec![col];
                let name = naming.unique_constraint_name(&table, &cols);
                self.uniques.push(TableUnique::new(cols).named(name));
            }
        }

        if self.primary_key_name.is_none() && self.columns.iter().any(|c| c.is_primary) {
            self.primary_key_name = Some(naming.primary_key_name(&table, &self.primary_column_names()));
        }
        for uq in &mut self.uniques {
            if uq.name.is_none() {
                uq.name = Some(naming.unique_constraint_name(&table, &uq.column_names));
            }
            if uq.column_names.len() == 1 {
                let col = uq.column_names[0].clone();
                if let Some(c) = self.columns.iter_mut().find(|c| c.name == col) {
                    c.is_unique = true;
                }
            }
        }
        for idx in &mut self.indices {
            if idx.name.is_none() {
                idx.name = Some(naming.index_name(&table, &idx.column_names, idx.where_clause.as_deref()));
            }
        }
        for fk in &mut self.foreign_keys {
            if fk.name.is_none() {
                fk.name = Some(naming.foreign_key_name(&table, &fk.column_names));
            }
        }
        for chk in &mut self.checks {
            if chk.name.is_none() {
                chk.name = Some(naming.check_constraint_name(&table, &chk.expression, false));
            }
        }
        for xcl in &mut self.exclusions {
            if xcl.name.is_none() {
                xcl.name = Some(naming.exclusion_constraint_name(&table, &xcl.expression));
            }
        }
    }

    /// Renames a column and every reference to it.
    ///
    /// Constraints whose current name equals the default derived from the old
    /// column set are renamed to the default derived from the new column set;
    /// explicitly named constraints keep their name. Returns the renames so the
    /// dialect can emit matching statements.
    pub fn rename_column(
        &mut self,
        old: &str,
        new: &str,
        naming: &dyn NamingStrategy,
    ) -> Result<Vec<ConstraintRename>> {
        if !self.has_column(old) {
            return Err(RunnerError::not_found(
                ObjectKind::Column,
                format!("{}.{}", self.path, old),
            ));
        }
        if old != new && self.has_column(new) {
            return Err(RunnerError::invalid(format!(
                "table \"{}\" already has a column \"{}\"",
                self.path, new
            )));
        }

        let table = self.path.name.clone();
        let swap = |cols: &mut Vec<String>| {
            for c in cols.iter_mut() {
                if c == old {
                    *c = new.to_string();
                }
            }
        };
        let mut renames = Vec::new();

        let was_primary = self.find_column(old).map(|c| c.is_primary).unwrap_or(false);
        if was_primary {
            let old_default = naming.primary_key_name(&table, &self.primary_column_names());
            if let Some(c) = self.find_column_mut(old) {
                c.name = new.to_string();
            }
            let new_default = naming.primary_key_name(&table, &self.primary_column_names());
            if let Some(current) = self.primary_key_name.clone() {
                if current == old_default && current != new_default {
                    renames.push(ConstraintRename {
                        kind: ObjectKind::PrimaryKey,
                        old_name: current,
                        new_name: new_default.clone(),
                    });
                    self.primary_key_name = Some(new_default);
                }
            }
        } else if let Some(c) = self.find_column_mut(old) {
            c.name = new.to_string();
        }

        for uq in &mut self.uniques {
            if !uq.column_names.iter().any(|c| c == old) {
                continue;
            }
            let old_default = naming.unique_constraint_name(&table, &uq.column_names);
            swap(&mut uq.column_names);
            let new_default = naming.unique_constraint_name(&table, &uq.column_names);
            if uq.name.as_deref() == Some(old_default.as_str()) {
                renames.push(ConstraintRename {
                    kind: ObjectKind::Unique,
                    old_name: old_default,
                    new_name: new_default.clone(),
                });
                uq.name = Some(new_default);
            }
        }

        for idx in &mut self.indices {
            if !idx.column_names.iter().any(|c| c == old) {
                continue;
            }
            let old_default = naming.index_name(&table, &idx.column_names, idx.where_clause.as_deref());
            swap(&mut idx.column_names);
            let new_default = naming.index_name(&table, &idx.column_names, idx.where_clause.as_deref());
            if idx.name.as_deref() == Some(old_default.as_str()) {
                renames.push(ConstraintRename {
                    kind: ObjectKind::Index,
                    old_name: old_default,
                    new_name: new_default.clone(),
                });
                idx.name = Some(new_default);
            }
        }

        for fk in &mut self.foreign_keys {
            if !fk.column_names.iter().any(|c| c == old) {
                continue;
            }
            let old_default = naming.foreign_key_name(&table, &fk.column_names);
            swap(&mut fk.column_names);
            let new_default = naming.foreign_key_name(&table, &fk.column_names);
            if fk.name.as_deref() == Some(old_default.as_str()) {
                renames.push(ConstraintRename {
                    kind: ObjectKind::ForeignKey,
                    old_name: old_default,
                    new_name: new_default.clone(),
                });
                fk.name = Some(new_default);
            }
        }

        for chk in &mut self.checks {
            swap(&mut chk.column_names);
        }

        Ok(renames)
    }

    /// Moves the table to `path`.
    ///
    /// Default-named constraints are re-derived from the new table name and
    /// returned as renames; explicitly named ones are kept.
    pub fn rename(&mut self, path: TablePath, naming: &dyn NamingStrategy) -> Vec<ConstraintRename> {
        let old = self.path.name.clone();
        let new = path.name.clone();
        let mut renames = Vec::new();
        let mut track = |kind: ObjectKind, slot: &mut Option<String>, old_default: String, new_default: String| {
            if slot.as_deref() == Some(old_default.as_str()) && old_default != new_default {
                renames.push(ConstraintRename {
                    kind,
                    old_name: old_default,
                    new_name: new_default.clone(),
                });
                *slot = Some(new_default);
            }
        };

        let primary = self.primary_column_names();
        if !primary.is_empty() {
            track(
                ObjectKind::PrimaryKey,
                &mut self.primary_key_name,
                naming.primary_key_name(&old, &primary),
                naming.primary_key_name(&new, &primary),
            );
        }
        for uq in &mut self.uniques {
            track(
                ObjectKind::Unique,
                &mut uq.name,
                naming.unique_constraint_name(&old, &uq.column_names),
                naming.unique_constraint_name(&new, &uq.column_names),
            );
        }
        for idx in &mut self.indices {
            let predicate = idx.where_clause.clone();
            track(
                ObjectKind::Index,
                &mut idx.name,
                naming.index_name(&old, &idx.column_names, predicate.as_deref()),
                naming.index_name(&new, &idx.column_names, predicate.as_deref()),
            );
        }
        for fk in &mut self.foreign_keys {
            track(
                ObjectKind::ForeignKey,
                &mut fk.name,
                naming.foreign_key_name(&old, &fk.column_names),
                naming.foreign_key_name(&new, &fk.column_names),
            );
        }
        for chk in &mut self.checks {
            track(
                ObjectKind::Check,
                &mut chk.name,
                naming.check_constraint_name(&old, &chk.expression, false),
                naming.check_constraint_name(&new, &chk.expression, false),
            );
        }
        for xcl in &mut self.exclusions {
            track(
                ObjectKind::Exclusion,
                &mut xcl.name,
                naming.exclusion_constraint_name(&old, &xcl.expression),
                naming.exclusion_constraint_name(&new, &xcl.expression),
            );
        }
        self.path = path;
        renames
    }

    /// Checks the table-level invariants.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            column.validate().map_err(RunnerError::invalid)?;
            if !seen.insert(column.name.as_str()) {
                return Err(RunnerError::invalid(format!(
                    "duplicate column \"{}\" in table \"{}\"",
                    column.name, self.path
                )));
            }
        }

        let mut names = HashSet::new();
        let constraint_names = self
            .uniques
            .iter()
            .filter_map(|u| u.name.as_deref())
            .chain(self.checks.iter().filter_map(|c| c.name.as_deref()))
            .chain(self.exclusions.iter().filter_map(|e| e.name.as_deref()))
            .chain(self.foreign_keys.iter().filter_map(|f| f.name.as_deref()));
        for name in constraint_names {
            if !names.insert(name) {
                return Err(RunnerError::invalid(format!(
                    "duplicate constraint name \"{}\" in table \"{}\"",
                    name, self.path
                )));
            }
        }

        let referenced = self
            .indices
            .iter()
            .map(|i| &i.column_names)
            .chain(self.uniques.iter().map(|u| &u.column_names))
            .chain(self.foreign_keys.iter().map(|f| &f.column_names));
        for columns in referenced {
            for col in columns {
                if !self.has_column(col) {
                    return Err(RunnerError::not_found(
                        ObjectKind::Column,
                        format!("{}.{}", self.path, col),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::DefaultNamingStrategy;
    use crate::schema::GenerationStrategy;

    fn users() -> Table {
        Table::new("users")
            .column(TableColumn::new("id", "integer").primary().generated(GenerationStrategy::Increment))
            .column(TableColumn::new("a", "varchar"))
            .column(TableColumn::new("c", "varchar"))
            .unique(TableUnique::new(["a", "c"]))
            .index(TableIndex::new(["a"]))
    }

    #[test]
    fn test_constraint_names_are_found_across_kinds() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        t.normalize(&naming);
        let unique = t.uniques[0].name.clone().unwrap();
        let index = t.indices[0].name.clone().unwrap();
        let primary = t.primary_key_name.clone().unwrap();
        assert!(t.has_constraint_named(&unique));
        assert!(t.has_constraint_named(&index));
        assert!(t.has_constraint_named(&primary));
        assert!(!t.has_constraint_named("CHK_missing"));
    }

    #[test]
    fn test_normalize_fills_names() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        t.normalize(&naming);
        let cols = vec!["a".to_string(), "c".to_string()];
        assert_eq!(
            t.uniques[0].name.as_deref(),
            Some(naming.unique_constraint_name("users", &cols).as_str())
        );
        assert!(t.indices[0].name.is_some());
    }

    #[test]
    fn test_normalize_turns_unique_flag_into_constraint() {
        let naming = DefaultNamingStrategy;
        let mut t = Table::new("t").column(TableColumn::new("email", "varchar").unique());
        t.normalize(&naming);
        assert_eq!(t.uniques.len(), 1);
        assert_eq!(t.uniques[0].column_names, vec!["email".to_string()]);
        t.normalize(&naming);
        assert_eq!(t.uniques.len(), 1);
    }

    #[test]
    fn test_rename_column_cascades_to_constraints() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        t.normalize(&naming);
        let renames = t.rename_column("a", "b", &naming).unwrap();

        let expected = naming.unique_constraint_name("users", &["b".to_string(), "c".to_string()]);
        assert_eq!(t.uniques[0].column_names, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(t.uniques[0].name.as_deref(), Some(expected.as_str()));
        assert_eq!(t.indices[0].column_names, vec!["b".to_string()]);
        assert_eq!(renames.len(), 2);
        assert!(renames.iter().any(|r| r.kind == ObjectKind::Unique && r.new_name == expected));
    }

    #[test]
    fn test_rename_keeps_explicit_names() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        t.uniques[0].name = Some("uq_custom".to_string());
        t.normalize(&naming);
        let renames = t.rename_column("a", "b", &naming).unwrap();
        assert_eq!(t.uniques[0].name.as_deref(), Some("uq_custom"));
        assert!(renames.iter().all(|r| r.kind != ObjectKind::Unique));
    }

    #[test]
    fn test_rename_missing_column_is_not_found() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        let err = t.rename_column("nope", "x", &naming).unwrap_err();
        assert!(matches!(err, RunnerError::NotFound { kind: ObjectKind::Column, .. }));
    }

    #[test]
    fn test_rename_table_rederives_default_names() {
        let naming = DefaultNamingStrategy;
        let mut t = users();
        t.normalize(&naming);
        let renames = t.rename(TablePath::new("members"), &naming);
        assert_eq!(t.name(), "members");
        let expected = naming.index_name("members", &["a".to_string()], None);
        assert_eq!(t.indices[0].name.as_deref(), Some(expected.as_str()));
        assert!(renames.iter().any(|r| r.kind == ObjectKind::Unique));
        assert!(renames.iter().any(|r| r.kind == ObjectKind::Index));
    }

    #[test]
    fn test_remove_column_drops_covering_constraints() {
        let mut t = users();
        t.remove_column("c");
        assert!(t.uniques.is_empty());
        assert_eq!(t.indices.len(), 1);
    }

    #[test]
    fn test_validate_rejects_duplicate_columns() {
        let t = Table::new("t")
            .column(TableColumn::new("x", "int"))
            .column(TableColumn::new("x", "int"));
        assert!(t.validate().is_err());
    }
}
