//! In-memory schema catalog driven by SQL statements.
//!
//! Only the catalog-level effect of a statement is tracked (tables, their
//! columns, indexes). Data statements are accepted and have no catalog effect.

use crate::core::{Result, UpgradeError};
use serde::{Deserialize, Serialize};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;

const STORE: &str = "schema";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    /// Table name -> column names in declaration order.
    pub tables: BTreeMap<String, Vec<String>>,
    /// Index name -> indexed table.
    pub indexes: BTreeMap<String, String>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        let column = column.to_lowercase();
        self.tables
            .get(&table.to_lowercase())
            .is_some_and(|columns| columns.contains(&column))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(&name.to_lowercase())
    }

    /// Applies every statement in `sql`, or none of them.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| UpgradeError::adapter(STORE, format!("Parse error: {}", e)))?;

        if statements.is_empty() {
            return Err(UpgradeError::adapter(STORE, "Empty statement"));
        }

        let mut staged = self.clone();
        for statement in statements {
            staged.apply_statement(statement)?;
        }
        *self = staged;
        Ok(())
    }

    fn apply_statement(&mut self, statement: sql_ast::Statement) -> Result<()> {
        match statement {
            sql_ast::Statement::CreateTable(create) => {
                let table = object_name(&create.name)?;
                if self.tables.contains_key(&table) {
                    if create.if_not_exists {
                        return Ok(());
                    }
                    return Err(UpgradeError::adapter(
                        STORE,
                        format!("Table '{}' already exists", table),
                    ));
                }
                let columns = create
                    .columns
                    .iter()
                    .map(|col| col.name.value.to_lowercase())
                    .collect();
                self.tables.insert(table, columns);
                Ok(())
            }
            sql_ast::Statement::CreateIndex(ci) => {
                let index = match &ci.name {
                    Some(name) => object_name(name)?,
                    None => {
                        return Err(UpgradeError::adapter(STORE, "Index name is required"));
                    }
                };
                let table = object_name(&ci.table_name)?;
                if !self.tables.contains_key(&table) {
                    return Err(UpgradeError::adapter(
                        STORE,
                        format!("Table '{}' not found for index '{}'", table, index),
                    ));
                }
                if self.indexes.contains_key(&index) {
                    if ci.if_not_exists {
                        return Ok(());
                    }
                    return Err(UpgradeError::adapter(
                        STORE,
                        format!("Index '{}' already exists", index),
                    ));
                }
                self.indexes.insert(index, table);
                Ok(())
            }
            sql_ast::Statement::Drop {
                object_type,
                names,
                if_exists,
                ..
            } => {
                for name in &names {
                    let name = object_name(name)?;
                    match &object_type {
                        sql_ast::ObjectType::Table => self.drop_table(&name, if_exists)?,
                        sql_ast::ObjectType::Index => self.drop_index(&name, if_exists)?,
                        other => {
                            return Err(UpgradeError::adapter(
                                STORE,
                                format!("DROP {} is not supported", other),
                            ));
                        }
                    }
                }
                Ok(())
            }
            sql_ast::Statement::AlterTable {
                name, operations, ..
            } => {
                let table = object_name(&name)?;
                for operation in operations {
                    self.alter_table(&table, operation)?;
                }
                Ok(())
            }
            // Data statements do not change the catalog.
            _ => Ok(()),
        }
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<()> {
        if self.tables.remove(table).is_none() {
            if if_exists {
                return Ok(());
            }
            return Err(UpgradeError::adapter(
                STORE,
                format!("Table '{}' not found", table),
            ));
        }
        self.indexes.retain(|_, indexed| indexed != table);
        Ok(())
    }

    fn drop_index(&mut self, index: &str, if_exists: bool) -> Result<()> {
        if self.indexes.remove(index).is_none() && !if_exists {
            return Err(UpgradeError::adapter(
                STORE,
                format!("Index '{}' not found", index),
            ));
        }
        Ok(())
    }

    fn alter_table(&mut self, table: &str, operation: sql_ast::AlterTableOperation) -> Result<()> {
        let columns = self.tables.get_mut(table).ok_or_else(|| {
            UpgradeError::adapter(STORE, format!("Table '{}' not found", table))
        })?;

        match operation {
            sql_ast::AlterTableOperation::AddColumn { column_def, .. } => {
                let column = column_def.name.value.to_lowercase();
                if columns.contains(&column) {
                    return Err(UpgradeError::adapter(
                        STORE,
                        format!("Column '{}' already exists in '{}'", column, table),
                    ));
                }
                columns.push(column);
                Ok(())
            }
            sql_ast::AlterTableOperation::DropColumn { column_names, .. } => {
                for ident in column_names {
                    let column = ident.value.to_lowercase();
                    let before = columns.len();
                    columns.retain(|existing| existing != &column);
                    if columns.len() == before {
                        return Err(UpgradeError::adapter(
                            STORE,
                            format!("Column '{}' not found in '{}'", column, table),
                        ));
                    }
                }
                Ok(())
            }
            other => Err(UpgradeError::adapter(
                STORE,
                format!("ALTER TABLE operation '{}' is not supported", other),
            )),
        }
    }
}

fn object_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| ident.to_string().to_lowercase())
        .ok_or_else(|| UpgradeError::adapter(STORE, "Invalid object name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_drop_table() {
        let mut catalog = SchemaCatalog::new();
        catalog
            .execute("CREATE TABLE audit_log (id INTEGER, message TEXT)")
            .unwrap();
        assert!(catalog.has_table("audit_log"));
        assert!(catalog.has_column("audit_log", "message"));

        catalog.execute("DROP TABLE audit_log").unwrap();
        assert!(!catalog.has_table("audit_log"));
    }

    #[test]
    fn test_duplicate_table_fails() {
        let mut catalog = SchemaCatalog::new();
        catalog.execute("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(catalog.execute("CREATE TABLE t (id INTEGER)").is_err());
        catalog
            .execute("CREATE TABLE IF NOT EXISTS t (id INTEGER)")
            .unwrap();
    }

    #[test]
    fn test_index_lifecycle() {
        let mut catalog = SchemaCatalog::new();
        catalog.execute("CREATE TABLE users (id INTEGER, email TEXT)").unwrap();
        catalog.execute("CREATE INDEX idx_users_email ON users (email)").unwrap();
        assert!(catalog.has_index("idx_users_email"));

        catalog.execute("DROP INDEX idx_users_email").unwrap();
        assert!(!catalog.has_index("idx_users_email"));
        assert!(catalog.execute("DROP INDEX idx_users_email").is_err());
        catalog.execute("DROP INDEX IF EXISTS idx_users_email").unwrap();
    }

    #[test]
    fn test_drop_table_removes_its_indexes() {
        let mut catalog = SchemaCatalog::new();
        catalog.execute("CREATE TABLE users (id INTEGER, email TEXT)").unwrap();
        catalog.execute("CREATE INDEX idx_users_email ON users (email)").unwrap();
        catalog.execute("DROP TABLE users").unwrap();
        assert!(catalog.indexes.is_empty());
    }

    #[test]
    fn test_alter_table_columns() {
        let mut catalog = SchemaCatalog::new();
        catalog.execute("CREATE TABLE users (id INTEGER)").unwrap();
        catalog.execute("ALTER TABLE users ADD COLUMN nickname TEXT").unwrap();
        assert!(catalog.has_column("users", "nickname"));
        assert!(catalog.execute("ALTER TABLE users ADD COLUMN nickname TEXT").is_err());

        catalog.execute("ALTER TABLE users DROP COLUMN nickname").unwrap();
        assert!(!catalog.has_column("users", "nickname"));
        assert!(catalog.execute("ALTER TABLE missing ADD COLUMN x TEXT").is_err());
    }

    #[test]
    fn test_multi_statement_is_all_or_nothing() {
        let mut catalog = SchemaCatalog::new();
        let result = catalog.execute("CREATE TABLE a (id INTEGER); DROP TABLE missing");
        assert!(result.is_err());
        assert!(!catalog.has_table("a"));
    }

    #[test]
    fn test_unparsable_statement_fails() {
        let mut catalog = SchemaCatalog::new();
        assert!(catalog.execute("CREATE TABEL oops").is_err());
        assert!(catalog.execute("   ").is_err());
    }

    #[test]
    fn test_data_statements_leave_catalog_untouched() {
        let mut catalog = SchemaCatalog::new();
        catalog.execute("CREATE TABLE prefs (name TEXT, value TEXT)").unwrap();
        let before = catalog.clone();
        catalog
            .execute("INSERT INTO prefs (name, value) VALUES ('theme', 'dark')")
            .unwrap();
        assert_eq!(catalog, before);
    }
}
