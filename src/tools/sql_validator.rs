//! Statement segmentation and read-only enforcement.
//!
//! A submitted SQL text is cut into statements on `;`. The scanner is aware of
//! quoting and comments for each backend family, so a `;` inside a string
//! literal, a quoted identifier, a comment or a Postgres dollar-quoted body
//! does not split. Each family's own reading of the text is followed: Postgres
//! `E'..'` strings take backslash escapes and block comments nest, MySQL only
//! starts a `--` comment before whitespace and runs the body of a `/*! */`
//! comment. It is not a SQL parser: statements are never validated beyond
//! their leading keyword.
//!
//! In read-only mode each statement's leading keyword, found with the
//! [sqlparser](https://docs.rs/sqlparser/) tokenizer so that leading comments
//! are skipped correctly, must be in the backend's allow-list.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

/// Read-only verbs per backend family.
mod allow_lists {
    pub const POSTGRES: &[&str] = &["select", "with", "explain", "analyze", "show"];
    pub const MYSQL: &[&str] = &[
        "select", "with", "explain", "analyze", "show", "describe", "desc",
    ];
    pub const SQLSERVER: &[&str] = &["select", "with", "explain", "showplan"];
}

/// Get the leading keywords allowed in read-only mode.
pub fn allowed_keywords(db_type: DatabaseType) -> &'static [&'static str] {
    match db_type {
        DatabaseType::Postgres => allow_lists::POSTGRES,
        DatabaseType::MySql | DatabaseType::MariaDb => allow_lists::MYSQL,
        DatabaseType::SqlServer => allow_lists::SQLSERVER,
    }
}

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySql | DatabaseType::MariaDb => Box::new(MySqlDialect {}),
        DatabaseType::SqlServer => Box::new(MsSqlDialect {}),
    }
}

/// Quoting and comment rules of one backend family.
#[derive(Debug, Clone, Copy)]
struct Lexicon {
    backslash_escapes: bool,
    backtick_identifiers: bool,
    bracket_identifiers: bool,
    hash_comments: bool,
    dollar_quotes: bool,
    /// `E'..'` strings escape with backslashes
    escape_strings: bool,
    /// `--` opens a comment only before whitespace or end of input
    dash_comment_needs_space: bool,
    /// `/*! .. */` bodies are executed, not ignored
    executable_comments: bool,
    nested_comments: bool,
}

impl Lexicon {
    fn for_type(db_type: DatabaseType) -> Self {
        let mysql_family = matches!(db_type, DatabaseType::MySql | DatabaseType::MariaDb);
        Self {
            backslash_escapes: mysql_family,
            backtick_identifiers: mysql_family,
            bracket_identifiers: db_type == DatabaseType::SqlServer,
            hash_comments: mysql_family,
            dollar_quotes: db_type == DatabaseType::Postgres,
            escape_strings: db_type == DatabaseType::Postgres,
            dash_comment_needs_space: mysql_family,
            executable_comments: mysql_family,
            nested_comments: matches!(db_type, DatabaseType::Postgres | DatabaseType::SqlServer),
        }
    }

    fn opens_dash_comment(&self, bytes: &[u8], i: usize) -> bool {
        if bytes.get(i + 1) != Some(&b'-') {
            return false;
        }
        !self.dash_comment_needs_space
            || bytes
                .get(i + 2)
                .is_none_or(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    }

    /// `E'` or `e'` standing alone, not the tail of an identifier.
    fn opens_escape_string(&self, bytes: &[u8], quote: usize) -> bool {
        if !self.escape_strings || quote == 0 || !matches!(bytes[quote - 1], b'E' | b'e') {
            return false;
        }
        let before = quote.checked_sub(2).map(|j| bytes[j]);
        !before.is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
    }
}

/// Split SQL text into trimmed, non-empty statements in source order.
///
/// # Examples
///
/// ```
/// use db_gateway_mcp::models::DatabaseType;
/// use db_gateway_mcp::tools::sql_validator::split_statements;
///
/// let stmts = split_statements("SELECT 1; SELECT ';' ;;", DatabaseType::Postgres);
/// assert_eq!(stmts, vec!["SELECT 1", "SELECT ';'"]);
/// ```
pub fn split_statements(sql: &str, db_type: DatabaseType) -> Vec<String> {
    let lex = Lexicon::for_type(db_type);
    let bytes = sql.as_bytes();
    let len = bytes.len();

    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    // Only ASCII bytes are ever matched, so every slice boundary is a char boundary.
    while i < len {
        let next = bytes.get(i + 1).copied();
        i = match bytes[i] {
            b'\'' => {
                let escapes = lex.backslash_escapes || lex.opens_escape_string(bytes, i);
                skip_quoted(bytes, i, b'\'', escapes)
            }
            b'"' => skip_quoted(bytes, i, b'"', lex.backslash_escapes),
            b'`' if lex.backtick_identifiers => skip_quoted(bytes, i, b'`', false),
            b'[' if lex.bracket_identifiers => skip_quoted(bytes, i, b']', false),
            b'-' if lex.opens_dash_comment(bytes, i) => skip_line(bytes, i),
            b'#' if lex.hash_comments => skip_line(bytes, i),
            // scan the body as ordinary text; the closing `*/` is then inert
            b'/' if next == Some(b'*') && lex.executable_comments && bytes.get(i + 2) == Some(&b'!') => i + 3,
            b'/' if next == Some(b'*') => skip_block_comment(bytes, i, lex.nested_comments),
            b'$' if lex.dollar_quotes => skip_dollar_quoted(sql, i),
            b';' => {
                push_statement(&mut statements, &sql[start..i]);
                start = i + 1;
                i + 1
            }
            _ => i + 1,
        };
    }
    push_statement(&mut statements, &sql[start.min(len)..]);

    statements
}

fn push_statement(statements: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Return the index just past the closing `close` byte (doubled closers escape).
fn skip_quoted(bytes: &[u8], open: usize, close: u8, backslash_escapes: bool) -> usize {
    let mut j = open + 1;
    while j < bytes.len() {
        let b = bytes[j];
        if backslash_escapes && b == b'\\' {
            j += 2;
            continue;
        }
        if b == close {
            if bytes.get(j + 1) == Some(&close) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], from: usize, nested: bool) -> usize {
    let mut depth = 1;
    let mut j = from + 2;
    while j + 1 < bytes.len() {
        match (bytes[j], bytes[j + 1]) {
            (b'*', b'/') => {
                depth -= 1;
                if depth == 0 {
                    return j + 2;
                }
                j += 2;
            }
            (b'/', b'*') if nested => {
                depth += 1;
                j += 2;
            }
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Skip a `$tag$ ... $tag$` body. A `$` that does not open a tag is a plain byte.
fn skip_dollar_quoted(sql: &str, from: usize) -> usize {
    let bytes = sql.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    // `a$b` is an identifier character and `$1` a positional parameter
    if from > 0 && (is_ident(bytes[from - 1]) || bytes[from - 1] == b'$') {
        return from + 1;
    }
    if bytes.get(from + 1).is_some_and(|b| b.is_ascii_digit()) {
        return from + 1;
    }

    let mut j = from + 1;
    while j < bytes.len() && is_ident(bytes[j]) {
        j += 1;
    }
    if bytes.get(j) != Some(&b'$') {
        return from + 1;
    }

    let tag = &sql[from..=j];
    match sql[j + 1..].find(tag) {
        Some(pos) => j + 1 + pos + tag.len(),
        None => bytes.len(),
    }
}

/// Get the lowercase leading keyword of a statement, skipping whitespace and comments.
///
/// Returns `None` when the statement does not start with a bare word, for
/// example a parenthesis or a quoted identifier, or when it cannot be tokenized.
pub fn leading_keyword(statement: &str, db_type: DatabaseType) -> Option<String> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), statement).tokenize().ok()?;

    match tokens
        .into_iter()
        .find(|t| !matches!(t, Token::Whitespace(_)))?
    {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_lowercase()),
        _ => None,
    }
}

/// Check one statement against the read-only allow-list.
pub fn is_read_only_statement(statement: &str, db_type: DatabaseType) -> bool {
    leading_keyword(statement, db_type)
        .is_some_and(|kw| allowed_keywords(db_type).contains(&kw.as_str()))
}

/// Validate every statement of a batch for read-only execution.
///
/// The first offending statement rejects the whole batch.
pub fn validate_readonly<S: AsRef<str>>(statements: &[S], db_type: DatabaseType) -> DbResult<()> {
    for (idx, statement) in statements.iter().enumerate() {
        let statement = statement.as_ref();
        if !is_read_only_statement(statement, db_type) {
            let keyword = leading_keyword(statement, db_type).unwrap_or_else(|| {
                statement
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_lowercase()
            });
            return Err(DbError::read_only_violation(
                keyword,
                idx + 1,
                allowed_keywords(db_type),
            ));
        }
    }
    Ok(())
}
