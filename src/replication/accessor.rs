//! Relational database access used by export, import and table swaps.
//!
//! [`SqlAccessor`] is the seam between the replication engine and the site
//! database. [`SiteDatabase`] implements it over a SeaORM connection for the
//! MySQL production dialect and the SQLite development dialect.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, FromQueryResult, Statement};
use serde_json::Value as JsonValue;

use super::ReplicationError;

/// One row keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// MySQL data types whose values are raw bytes.
const MYSQL_BINARY_TYPES: [&str; 6] = ["binary", "varbinary", "tinyblob", "blob", "mediumblob", "longblob"];

/// A column name and whether its values are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub binary: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, binary: bool) -> Self {
        Self {
            name: name.into(),
            binary,
        }
    }
}

/// SQL dialect of the site database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_backend(backend: DatabaseBackend) -> Option<Self> {
        match backend {
            DatabaseBackend::MySql => Some(Dialect::MySql),
            DatabaseBackend::Sqlite => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    pub fn backend(&self) -> DatabaseBackend {
        match self {
            Dialect::MySql => DatabaseBackend::MySql,
            Dialect::Sqlite => DatabaseBackend::Sqlite,
        }
    }

    /// Statements opening a dump script.
    pub fn script_prelude(&self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => &[
                "SET SQL_MODE = \"NO_AUTO_VALUE_ON_ZERO\";",
                "SET FOREIGN_KEY_CHECKS = 0;",
            ],
            Dialect::Sqlite => &["PRAGMA foreign_keys = OFF;"],
        }
    }

    /// Statements closing a dump script.
    pub fn script_postlude(&self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => &["SET FOREIGN_KEY_CHECKS = 1;"],
            Dialect::Sqlite => &["PRAGMA foreign_keys = ON;"],
        }
    }

    /// Quote a string as a SQL literal.
    pub fn quote_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        match self {
            Dialect::MySql => {
                for c in value.chars() {
                    match c {
                        '\0' => out.push_str("\\0"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\x1a' => out.push_str("\\Z"),
                        _ => out.push(c),
                    }
                }
            }
            Dialect::Sqlite => {
                for c in value.chars() {
                    if c == '\'' {
                        out.push_str("''");
                    } else {
                        out.push(c);
                    }
                }
            }
        }
        out.push('\'');
        out
    }

    pub fn rename_table_sql(&self, from: &str, to: &str) -> String {
        match self {
            Dialect::MySql => format!("RENAME TABLE {} TO {}", quote_ident(from), quote_ident(to)),
            Dialect::Sqlite => format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            ),
        }
    }

    /// Whether a declared column type holds raw bytes. SQLite columns
    /// declared `BLOB`, or with no type at all, get blob affinity.
    pub fn is_binary_type(&self, data_type: &str) -> bool {
        let data_type = data_type.trim().to_ascii_lowercase();
        match self {
            Dialect::MySql => MYSQL_BINARY_TYPES.contains(&data_type.as_str()),
            Dialect::Sqlite => data_type.is_empty() || data_type.contains("blob"),
        }
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(table))
    }
}

/// Backtick-quote an identifier. Both dialects accept backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Database operations the replication engine and swap component rely on.
#[async_trait]
pub trait SqlAccessor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// All base tables, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>, ReplicationError>;

    async fn table_exists(&self, table: &str) -> Result<bool, ReplicationError>;

    /// Creation DDL, always starting with ``CREATE TABLE `name` ``.
    async fn create_statement(&self, table: &str) -> Result<String, ReplicationError>;

    /// Columns in table order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, ReplicationError>;

    async fn fetch_rows(&self, table: &str) -> Result<Vec<Row>, ReplicationError>;

    /// Execute one statement; failures carry the database's error text.
    async fn execute(&self, sql: &str) -> Result<(), ReplicationError>;
}

/// [`SqlAccessor`] over the site's SeaORM connection.
#[derive(Debug, Clone)]
pub struct SiteDatabase {
    db: DatabaseConnection,
    dialect: Dialect,
}

impl SiteDatabase {
    pub fn new(db: DatabaseConnection) -> Result<Self, ReplicationError> {
        let backend = db.get_database_backend();
        let dialect = Dialect::from_backend(backend).ok_or_else(|| {
            ReplicationError::Database(format!("unsupported database backend {backend:?}"))
        })?;
        Ok(Self { db, dialect })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn statement(&self, sql: &str, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(self.dialect.backend(), sql, values)
    }

    async fn query_strings(
        &self,
        sql: &str,
        values: Vec<sea_orm::Value>,
        column: &str,
    ) -> Result<Vec<String>, ReplicationError> {
        let rows = self.db.query_all(self.statement(sql, values)).await?;
        rows.iter()
            .map(|row| row.try_get::<String>("", column).map_err(ReplicationError::from))
            .collect()
    }
}

#[async_trait]
impl SqlAccessor for SiteDatabase {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn list_tables(&self) -> Result<Vec<String>, ReplicationError> {
        let sql = match self.dialect {
            Dialect::MySql => {
                "SELECT CAST(TABLE_NAME AS CHAR) AS name FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
            }
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
        };
        self.query_strings(sql, Vec::new(), "name").await
    }

    async fn table_exists(&self, table: &str) -> Result<bool, ReplicationError> {
        let sql = match self.dialect {
            Dialect::MySql => {
                "SELECT COUNT(*) AS cnt FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
            }
            Dialect::Sqlite => "SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = ?",
        };
        let row = self
            .db
            .query_one(self.statement(sql, vec![table.into()]))
            .await?;
        let count = match row {
            Some(row) => row.try_get::<i64>("", "cnt")?,
            None => 0,
        };
        Ok(count > 0)
    }

    async fn create_statement(&self, table: &str) -> Result<String, ReplicationError> {
        match self.dialect {
            Dialect::MySql => {
                let sql = format!("SHOW CREATE TABLE {}", quote_ident(table));
                let row = self
                    .db
                    .query_one(self.statement(&sql, Vec::new()))
                    .await?
                    .ok_or_else(|| ReplicationError::MissingDdl(table.to_string()))?;
                Ok(row.try_get::<String>("", "Create Table")?)
            }
            Dialect::Sqlite => {
                let ddl = self
                    .query_strings(
                        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                        vec![table.into()],
                        "sql",
                    )
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| ReplicationError::UnknownTable(table.to_string()))?;
                normalize_sqlite_ddl(table, &ddl)
                    .ok_or_else(|| ReplicationError::MissingDdl(table.to_string()))
            }
        }
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, ReplicationError> {
        let sql = match self.dialect {
            Dialect::MySql => {
                "SELECT CAST(COLUMN_NAME AS CHAR) AS name, CAST(DATA_TYPE AS CHAR) AS data_type \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION"
            }
            Dialect::Sqlite => "SELECT name, type AS data_type FROM pragma_table_info(?) ORDER BY cid",
        };
        let rows = self
            .db
            .query_all(self.statement(sql, vec![table.into()]))
            .await?;
        rows.iter()
            .map(|row| {
                let name = row.try_get::<String>("", "name")?;
                let data_type = row.try_get::<String>("", "data_type")?;
                Ok(ColumnInfo::new(name, self.dialect.is_binary_type(&data_type)))
            })
            .collect()
    }

    async fn fetch_rows(&self, table: &str) -> Result<Vec<Row>, ReplicationError> {
        let sql = format!("SELECT * FROM {}", quote_ident(table));
        let rows = JsonValue::find_by_statement(self.statement(&sql, Vec::new()))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn execute(&self, sql: &str) -> Result<(), ReplicationError> {
        self.db.execute_unprepared(sql).await?;
        Ok(())
    }
}

/// Rewrite SQLite's stored DDL so it starts with ``CREATE TABLE `name` ``,
/// whatever quoting the table was created with.
fn normalize_sqlite_ddl(table: &str, ddl: &str) -> Option<String> {
    let body = &ddl[ddl.find('(')?..];
    Some(format!("CREATE TABLE {} {}", quote_ident(table), body))
}
