//! SQL script restore, optionally staged into shadow tables.

use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose};
use regex::Regex;

use super::accessor::{SqlAccessor, quote_ident};
use super::{ReplicationError, split_statements};

static CREATE_TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?`([^`]+)`")
        .unwrap_or_else(|err| panic!("invalid CREATE TABLE pattern: {err}"))
});

/// How to restore a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Tables to stage; empty means every table the script creates.
    pub tables: Vec<String>,
    /// Prefix for shadow tables; empty imports straight into the live tables.
    pub temp_prefix: String,
    /// Leave staged tables in place instead of swapping them live.
    pub skip_rename: bool,
}

impl ImportOptions {
    pub fn staged(&self) -> bool {
        !self.temp_prefix.is_empty()
    }
}

/// Summary of a successful import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub statements: usize,
    /// Live table names that were imported into `temp_prefix + name`
    pub staged_tables: Vec<String>,
    /// Live table names whose staged copy was swapped in immediately
    pub renamed_tables: Vec<String>,
}

/// Decode an import payload sent as raw SQL or base64.
pub fn decode_payload(sql: &str, encoding: Option<&str>) -> Result<String, ReplicationError> {
    match encoding.map(str::trim) {
        Some(enc) if enc.eq_ignore_ascii_case("base64") => {
            let bytes = general_purpose::STANDARD
                .decode(sql.trim())
                .map_err(|err| ReplicationError::InvalidPayload(format!("base64: {err}")))?;
            String::from_utf8(bytes)
                .map_err(|err| ReplicationError::InvalidPayload(format!("utf-8: {err}")))
        }
        None | Some("") | Some("raw") | Some("plain") => Ok(sql.to_string()),
        Some(other) => Err(ReplicationError::InvalidPayload(format!(
            "unsupported encoding '{other}'"
        ))),
    }
}

/// Table names created by a script, in order of appearance.
pub fn created_tables(script: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for captures in CREATE_TABLE_NAME.captures_iter(script) {
        let name = captures[1].to_string();
        if !tables.contains(&name) {
            tables.push(name);
        }
    }
    tables
}

/// Rewrite every backtick-quoted occurrence of each table name to its
/// staged name, in a single pass so rewritten names are never rewritten again.
pub fn stage_table_names(script: &str, tables: &[String], temp_prefix: &str) -> String {
    if tables.is_empty() || temp_prefix.is_empty() {
        return script.to_string();
    }
    let alternation = tables
        .iter()
        .map(|t| regex::escape(&t.replace('`', "``")))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(pattern) = Regex::new(&format!("`({alternation})`")) else {
        return script.to_string();
    };
    pattern
        .replace_all(script, |caps: &regex::Captures<'_>| {
            format!("`{}{}`", temp_prefix, &caps[1])
        })
        .into_owned()
}

/// Execute `script` statement by statement.
///
/// With a temp prefix the import lands in shadow tables. The first failing
/// statement aborts the import with the database's error text; statements
/// that already ran are not rolled back. On success, unless `skip_rename`
/// is set, each staged table replaces its live table (drop, then rename).
pub async fn import<A>(
    db: &A,
    script: &str,
    options: &ImportOptions,
) -> Result<ImportOutcome, ReplicationError>
where
    A: SqlAccessor + ?Sized,
{
    let dialect = db.dialect();
    let staged_tables = if options.staged() {
        if options.tables.is_empty() {
            created_tables(script)
        } else {
            options.tables.clone()
        }
    } else {
        Vec::new()
    };

    let script = stage_table_names(script, &staged_tables, &options.temp_prefix);
    let statements = split_statements(&script, dialect);

    for (index, statement) in statements.iter().enumerate() {
        if let Err(err) = db.execute(statement).await {
            tracing::error!(
                statement = index + 1,
                total = statements.len(),
                error = %err,
                "Import statement failed; earlier statements remain applied"
            );
            return Err(err);
        }
    }

    let mut outcome = ImportOutcome {
        statements: statements.len(),
        staged_tables: Vec::new(),
        renamed_tables: Vec::new(),
    };

    for table in staged_tables {
        let staged = format!("{}{}", options.temp_prefix, table);
        if !db.table_exists(&staged).await? {
            continue;
        }
        if !options.skip_rename {
            db.execute(&dialect.drop_table_sql(&table)).await?;
            db.execute(&dialect.rename_table_sql(&staged, &table)).await?;
            tracing::info!(table = %table, staged = %quote_ident(&staged), "Swapped staged table into place");
            outcome.renamed_tables.push(table.clone());
        }
        outcome.staged_tables.push(table);
    }

    tracing::info!(
        statements = outcome.statements,
        staged = outcome.staged_tables.len(),
        renamed = outcome.renamed_tables.len(),
        "Imported SQL script"
    );
    Ok(outcome)
}
