//! SQL statement splitter
//!
//! Tokenizes a migration's SQL with the sqlparser PostgreSQL tokenizer and
//! splits on top-level semicolons, so semicolons inside string literals,
//! quoted identifiers, dollar-quoted bodies and comments never break a
//! statement apart. Statements are cut out of the original text by token
//! position instead of being re-rendered, which keeps literals byte for byte.
//! Comments are dropped.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer, Whitespace};

/// Split raw SQL into trimmed, non-empty statements with comments removed.
///
/// Empty or comment-only input yields an empty list. Text the tokenizer
/// rejects (an unterminated literal, say) is returned as a single statement
/// so the database reports the error.
pub fn split_statements(sql: &str) -> Vec<String> {
    let dialect = PostgreSqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, submitting the text unsplit: {}", e);
            let mut statements = Vec::new();
            flush(&mut sql.to_string(), &mut statements);
            return statements;
        }
    };

    let lines = LineIndex::new(sql);
    let mut statements = Vec::new();
    let mut buffer = String::new();

    for (index, token) in tokens.iter().enumerate() {
        match &token.token {
            Token::SemiColon => flush(&mut buffer, &mut statements),
            Token::Whitespace(Whitespace::SingleLineComment { .. }) => buffer.push('\n'),
            Token::Whitespace(Whitespace::MultiLineComment(_)) => buffer.push(' '),
            Token::EOF => {}
            _ => {
                let start = lines.offset(token.location);
                let end = tokens
                    .get(index + 1)
                    .map(|next| lines.offset(next.location))
                    .unwrap_or(sql.len());
                if let Some(text) = sql.get(start..end) {
                    buffer.push_str(text);
                }
            }
        }
    }

    flush(&mut buffer, &mut statements);
    statements
}

fn flush(buffer: &mut String, statements: &mut Vec<String>) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    buffer.clear();
}

/// Maps tokenizer locations (1-based line, 1-based char column) to byte offsets
struct LineIndex<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { sql, starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = usize::try_from(location.line.saturating_sub(1)).unwrap_or(usize::MAX);
        let column = usize::try_from(location.column.saturating_sub(1)).unwrap_or(usize::MAX);

        let Some(&line_start) = self.starts.get(line) else {
            return self.sql.len();
        };
        self.sql[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.sql.len())
    }
}
