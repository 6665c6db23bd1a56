//! Query Safety
//!
//! Two gates stand between a question and the store:
//! 1. `is_destructive_intent` - a cheap substring check on the question itself,
//!    run before any SQL is generated.
//! 2. `is_select_only` - the authoritative check on the generated SQL, run on
//!    every candidate regardless of what the first gate said.
//!
//! Both are pure functions and safe to call from any number of requests.

use lazy_static::lazy_static;
use regex::Regex;

/// Keywords that must never appear as a standalone word in a generated query.
pub const FORBIDDEN_SQL_KEYWORDS: &[&str] = &[
    "delete", "update", "insert", "alter", "drop", "truncate", "create", "replace", "grant",
    "revoke", "attach", "detach", "copy", "load", "export", "pragma", "call", "vacuum", "set",
];

/// Phrases in a question that signal a request to change data.
pub const DESTRUCTIVE_INTENT_WORDS: &[&str] = &[
    "delete",
    "remove",
    "drop",
    "truncate",
    "update",
    "insert",
    "modify",
    "change",
    "alter",
    "create",
    "add column",
    "erase",
];

lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*?$").expect("valid line comment regex");
    static ref BLOCK_COMMENT: Regex =
        Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment regex");
    static ref FORBIDDEN_KEYWORD: Regex = Regex::new(&format!(
        r"\b(?:{})\b",
        FORBIDDEN_SQL_KEYWORDS.join("|")
    ))
    .expect("valid keyword regex");
}

/// Remove `-- ...` line comments, then `/* ... */` block comments.
pub fn strip_sql_comments(sql: &str) -> String {
    let without_lines = LINE_COMMENT.replace_all(sql, "");
    BLOCK_COMMENT.replace_all(&without_lines, "").into_owned()
}

/// Trim the candidate and drop a single trailing semicolon.
///
/// This is the caller-side normalisation that happens before `is_select_only`;
/// the validator itself rejects any `;` it sees.
pub fn strip_trailing_semicolon(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}

/// True only for a single read-only statement.
///
/// Keyword matching is on whole words, so identifiers such as `created_at`
/// pass while `CREATE` as a token does not. This is a blocklist and does not
/// understand dialect-specific statements or functions hidden in subqueries.
pub fn is_select_only(sql: &str) -> bool {
    let stripped = strip_sql_comments(sql);
    let s = stripped.trim().to_lowercase();

    if s.contains(';') {
        return false;
    }

    if !(s.starts_with("select") || s.starts_with("with ")) {
        return false;
    }

    !FORBIDDEN_KEYWORD.is_match(&s)
}

/// True when the question asks for something that would change data.
///
/// Deliberately looser than `is_select_only`: a false positive only turns into
/// a polite refusal.
pub fn is_destructive_intent(question: &str) -> bool {
    let q = question.to_lowercase();
    DESTRUCTIVE_INTENT_WORDS.iter().any(|w| q.contains(w))
}
