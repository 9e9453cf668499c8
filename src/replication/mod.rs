//! # Replication Engine
//!
//! Dumps a set of tables to a single SQL script (schema + data, with string
//! substitution) and restores such a script, optionally into staged shadow
//! tables.
//!
//! Statement execution is sequential and never wrapped in a transaction: a
//! failing statement aborts the rest of the script, but statements that
//! already ran stay applied. Cleanup of staged tables is idempotent, so the
//! remedy for a half-applied import is to clean up and run a new job.

pub mod accessor;
pub mod export;
pub mod import;
pub mod php_serialized;
pub mod splitter;

use thiserror::Error;

pub use accessor::{ColumnInfo, Dialect, Row, SiteDatabase, SqlAccessor};
pub use export::{ExportOptions, export};
pub use import::{ImportOptions, ImportOutcome, import};
pub use splitter::split_statements;

/// Errors raised while exporting or importing SQL.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Database error text, reported verbatim
    #[error("{0}")]
    Database(String),
    #[error("table '{0}' does not exist")]
    UnknownTable(String),
    #[error("could not read creation DDL for table '{0}'")]
    MissingDdl(String),
    #[error("invalid SQL payload: {0}")]
    InvalidPayload(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<sea_orm::DbErr> for ReplicationError {
    fn from(error: sea_orm::DbErr) -> Self {
        ReplicationError::Database(db_error_text(&error))
    }
}

/// The database's own error message, without SeaORM's wrapping prefixes.
pub fn db_error_text(error: &sea_orm::DbErr) -> String {
    use sea_orm::{DbErr, RuntimeErr};

    match error {
        DbErr::Exec(RuntimeErr::SqlxError(inner)) | DbErr::Query(RuntimeErr::SqlxError(inner)) => {
            match inner.as_database_error() {
                Some(db_error) => db_error.message().to_string(),
                None => inner.to_string(),
            }
        }
        DbErr::Exec(RuntimeErr::Internal(message)) | DbErr::Query(RuntimeErr::Internal(message)) => {
            message.clone()
        }
        other => other.to_string(),
    }
}

/// Ordered pairwise string substitutions.
///
/// Built from parallel `search`/`replace` lists; entries without a partner
/// are dropped so a pair is never half-applied. Empty search strings are
/// dropped as well since they would match everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    pairs: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new(search: &[String], replace: &[String]) -> Self {
        let pairs = search
            .iter()
            .zip(replace.iter())
            .filter(|(from, _)| !from.is_empty())
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Literal find-and-replace of every pair, applied in order.
    pub fn apply_literal(&self, input: &str) -> String {
        let mut output = input.to_string();
        for (from, to) in &self.pairs {
            if output.contains(from.as_str()) {
                output = output.replace(from.as_str(), to);
            }
        }
        output
    }

    /// Substitute inside `input`, descending into PHP-serialized structures
    /// when the value decodes as one and falling back to a literal scan
    /// otherwise.
    pub fn apply(&self, input: &str) -> String {
        if self.is_empty() || !self.pairs.iter().any(|(from, _)| input.contains(from.as_str())) {
            return input.to_string();
        }
        php_serialized::substitute(input, self).unwrap_or_else(|| self.apply_literal(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        let search: Vec<String> = pairs.iter().map(|(s, _)| s.to_string()).collect();
        let replace: Vec<String> = pairs.iter().map(|(_, r)| r.to_string()).collect();
        Substitutions::new(&search, &replace)
    }

    #[test]
    fn unpaired_entries_are_dropped() {
        let s = Substitutions::new(
            &["a".to_string(), "b".to_string()],
            &["x".to_string()],
        );
        assert_eq!(s.len(), 1);
        assert_eq!(s.apply_literal("ab"), "xb");
    }

    #[test]
    fn pairs_apply_in_order() {
        let s = subs(&[("http://old.local", "https://new.example"), ("new", "NEW")]);
        assert_eq!(
            s.apply("see http://old.local/page"),
            "see https://NEW.example/page"
        );
    }

    #[test]
    fn serialized_values_keep_valid_lengths() {
        let s = subs(&[("http://old.local", "https://prod.example")]);
        let out = s.apply(r#"a:1:{s:3:"url";s:16:"http://old.local";}"#);
        assert_eq!(out, r#"a:1:{s:3:"url";s:20:"https://prod.example";}"#);
    }

    #[test]
    fn no_match_returns_input_unchanged() {
        let s = subs(&[("zzz", "y")]);
        assert_eq!(s.apply("s:3:\"abc\";"), "s:3:\"abc\";");
    }
}
