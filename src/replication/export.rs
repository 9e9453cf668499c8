//! SQL dump generation.

use serde_json::Value as JsonValue;

use super::accessor::{ColumnInfo, Dialect, Row, SqlAccessor, quote_ident};
use super::{ReplicationError, Substitutions};
use crate::models::ReplicationSet;

/// Tables sitesync itself owns; never part of an "all tables" export.
pub const INTERNAL_TABLES: [&str; 2] = ["sitesync_state", "seaql_migrations"];

/// Column holding the key of `*options`-style rows.
const OPTION_KEY_COLUMN: &str = "option_name";
const OPTIONS_TABLE_SUFFIX: &str = "options";

/// What to export and how to rewrite it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    /// Explicit table list; empty means every table.
    pub tables: Vec<String>,
    pub substitutions: Substitutions,
    /// Tables eligible for substitution; empty means every exported table.
    pub search_only_tables: Vec<String>,
    pub exclude_option_prefix: Option<String>,
    /// Tables with these prefixes are left out of an "all tables" export.
    pub skip_prefixes: Vec<String>,
}

impl ExportOptions {
    pub fn for_set(set: &ReplicationSet) -> Self {
        Self {
            tables: set.tables.clone(),
            substitutions: set.substitutions(),
            search_only_tables: set.search_only_tables.clone(),
            exclude_option_prefix: set
                .exclude_option_prefix
                .clone()
                .filter(|prefix| !prefix.is_empty()),
            skip_prefixes: vec![set.temp_prefix.clone(), set.backup_prefix.clone()],
        }
    }

    fn substitutes_in(&self, table: &str) -> bool {
        !self.substitutions.is_empty()
            && (self.search_only_tables.is_empty()
                || self.search_only_tables.iter().any(|t| t == table))
    }

    fn excludes_row(&self, table: &str, row: &Row) -> bool {
        let Some(prefix) = self.exclude_option_prefix.as_deref() else {
            return false;
        };
        if !table.ends_with(OPTIONS_TABLE_SUFFIX) {
            return false;
        }
        matches!(row.get(OPTION_KEY_COLUMN), Some(JsonValue::String(key)) if key.starts_with(prefix))
    }
}

/// Resolve the effective table list: the explicit list when given, else
/// every table except internal and staged/backup ones.
pub async fn resolve_tables<A>(db: &A, options: &ExportOptions) -> Result<Vec<String>, ReplicationError>
where
    A: SqlAccessor + ?Sized,
{
    if !options.tables.is_empty() {
        return Ok(options.tables.clone());
    }

    let tables = db.list_tables().await?;
    Ok(tables
        .into_iter()
        .filter(|table| !INTERNAL_TABLES.contains(&table.as_str()))
        .filter(|table| {
            !options
                .skip_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && table.starts_with(prefix.as_str()))
        })
        .collect())
}

/// Dump the selected tables to a single SQL script.
///
/// Each table contributes a `DROP TABLE IF EXISTS`, its creation DDL and,
/// when it has rows, one multi-row `INSERT`. The script is bracketed by the
/// dialect's foreign-key toggles.
pub async fn export<A>(db: &A, options: &ExportOptions) -> Result<String, ReplicationError>
where
    A: SqlAccessor + ?Sized,
{
    let dialect = db.dialect();
    let tables = resolve_tables(db, options).await?;
    let mut script = String::new();

    for line in dialect.script_prelude() {
        script.push_str(line);
        script.push('\n');
    }

    let mut exported = 0usize;
    for table in &tables {
        if !db.table_exists(table).await? {
            tracing::warn!(table = %table, "Skipping missing table during export");
            continue;
        }

        let ddl = db.create_statement(table).await?;
        script.push('\n');
        script.push_str(&dialect.drop_table_sql(table));
        script.push_str(";\n");
        script.push_str(ddl.trim_end().trim_end_matches(';'));
        script.push_str(";\n");

        let columns = db.columns(table).await?;
        let rows = db.fetch_rows(table).await?;
        let substitutions = options
            .substitutes_in(table)
            .then_some(&options.substitutions);

        let values: Vec<String> = rows
            .iter()
            .filter(|row| !options.excludes_row(table, row))
            .map(|row| render_row(dialect, &columns, row, substitutions))
            .collect();

        if !values.is_empty() {
            let column_list = columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            script.push_str(&format!(
                "INSERT INTO {} ({}) VALUES\n{};\n",
                quote_ident(table),
                column_list,
                values.join(",\n")
            ));
        }

        tracing::debug!(table = %table, rows = values.len(), "Exported table");
        exported += 1;
    }

    script.push('\n');
    for line in dialect.script_postlude() {
        script.push_str(line);
        script.push('\n');
    }

    tracing::info!(tables = exported, bytes = script.len(), "Generated SQL export");
    Ok(script)
}

fn render_row(
    dialect: Dialect,
    columns: &[ColumnInfo],
    row: &Row,
    substitutions: Option<&Substitutions>,
) -> String {
    let rendered: Vec<String> = columns
        .iter()
        .map(|column| {
            let value = row.get(&column.name).unwrap_or(&JsonValue::Null);
            match column.binary.then(|| byte_array(value)).flatten() {
                Some(bytes) => render_bytes(&bytes),
                None => render_value(dialect, value, substitutions),
            }
        })
        .collect();
    format!("({})", rendered.join(", "))
}

/// Raw bytes as a hex literal, which both dialects read back as a blob.
fn render_bytes(bytes: &[u8]) -> String {
    format!("X'{}'", hex::encode_upper(bytes))
}

/// Binary values are read as JSON arrays of byte numbers.
fn byte_array(value: &JsonValue) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|byte| byte.as_u64().and_then(|byte| u8::try_from(byte).ok()))
        .collect()
}

/// Render one value as a SQL literal. Strings, including numeric-looking
/// ones, are always quoted.
pub fn render_value(
    dialect: Dialect,
    value: &JsonValue,
    substitutions: Option<&Substitutions>,
) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
        JsonValue::Number(number) => number.to_string(),
        JsonValue::String(text) => match substitutions {
            Some(subs) => dialect.quote_string(&subs.apply(text)),
            None => dialect.quote_string(text),
        },
        JsonValue::Array(_) | JsonValue::Object(_) => {
            let text = value.to_string();
            match substitutions {
                Some(subs) => dialect.quote_string(&subs.apply_literal(&text)),
                None => dialect.quote_string(&text),
            }
        }
    }
}
