//! Shape check for model-generated SQL before it is executed.
//!
//! This is not a SQL parser. It strips string literals and comments, then
//! checks the remaining skeleton: a single statement, starting with
//! `SELECT` or `WITH`, no write/DDL/pragma keywords, no internal tables,
//! and a reference to the reports table. Together with the read-only
//! connection the gateway executes on, this keeps generated queries to
//! reads of the one table the prompt describes.

use crate::migrate::REPORTS_TABLE;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "REINDEX", "TRUNCATE", "GRANT", "UPSERT", "LOAD_EXTENSION",
];

const FORBIDDEN_TABLES: &[&str] = &["ingest_locks"];

/// Validate `query`, returning it without a trailing `;` when accepted.
/// The error is a short human-readable reason.
pub fn check_query(query: &str) -> Result<String, String> {
    let trimmed = query.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        return Err("empty query".to_string());
    }

    let skeleton = skeleton(trimmed)?;
    if skeleton.contains(';') {
        return Err("multiple statements".to_string());
    }

    let tokens: Vec<String> = skeleton
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect();

    match tokens.first().map(String::as_str) {
        Some("SELECT") | Some("WITH") => {}
        _ => return Err("only SELECT queries are allowed".to_string()),
    }

    if let Some(word) = tokens
        .iter()
        .find(|t| FORBIDDEN_KEYWORDS.contains(&t.as_str()))
    {
        return Err(format!("forbidden keyword {}", word));
    }

    if let Some(table) = tokens.iter().find(|t| {
        t.starts_with("SQLITE_")
            || FORBIDDEN_TABLES
                .iter()
                .any(|f| t.eq_ignore_ascii_case(f))
    }) {
        return Err(format!("reference to internal table {}", table.to_lowercase()));
    }

    if !tokens
        .iter()
        .any(|t| t.eq_ignore_ascii_case(REPORTS_TABLE))
    {
        return Err(format!("query does not read the {} table", REPORTS_TABLE));
    }

    Ok(trimmed.to_string())
}

/// `query` with string literals emptied and comments removed.
fn skeleton(query: &str) -> Result<String, String> {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // '' is an escaped quote inside a literal.
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        Some('\'') => break,
                        Some(_) => {}
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                out.push_str("''");
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err("unterminated comment".to_string());
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
