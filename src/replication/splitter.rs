//! Quote-aware SQL statement splitter.

use super::accessor::Dialect;

/// Split a script into statements on `;` boundaries that are outside single-
/// or double-quoted strings. A doubled quote (`''`) is treated as an escaped
/// quote. In MySQL a backslash also escapes the next character inside a
/// quoted string; SQLite keeps backslashes literal, so `'C:\dir\'` closes
/// at its last quote.
/// Returned statements are trimmed and never empty; a trailing statement
/// without a terminating semicolon is kept.
pub fn split_statements(script: &str, dialect: Dialect) -> Vec<String> {
    let backslash_escapes = dialect == Dialect::MySql;
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in script.chars() {
        match quote {
            Some(open) => {
                current.push(c);
                if escaped {
                    escaped = false;
                } else if backslash_escapes && c == '\\' {
                    escaped = true;
                } else if c == open {
                    // A doubled quote closes and immediately reopens, which
                    // leaves the scanner inside the same string.
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => push_statement(&mut statements, &mut current),
                _ => current.push(c),
            },
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}
