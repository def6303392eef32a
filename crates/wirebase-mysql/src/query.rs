//! Statement analysis.
//!
//! [`QueryInfo::analyze`] makes one pass over a statement and records what
//! the session needs before sending it:
//!
//! - the first keyword and whether the statement returns rows
//! - the `?` placeholders outside quotes and comments, which split the
//!   text into static segments
//! - for `INSERT`/`REPLACE`, the byte span of the `VALUES` row list, any
//!   `ON DUPLICATE KEY UPDATE` clause, and whether a batch of parameter
//!   sets can be folded into one multi-row statement
//!
//! [`QueryInfo::for_batch`] derives the multi-row variant arithmetically.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// What a statement sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    /// A result set (SELECT, SHOW, EXPLAIN, ...)
    ResultSet,
    /// An OK packet only
    NoResultSet,
    /// Either, depending on what runs (CALL, EXECUTE)
    MaybeResultSet,
    /// No keyword found (empty or comment-only text)
    None,
}

impl ReturnShape {
    fn of_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" | "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "WITH" | "TABLE" | "VALUES" => {
                ReturnShape::ResultSet
            }
            "CALL" | "EXECUTE" => ReturnShape::MaybeResultSet,
            _ => ReturnShape::NoResultSet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Placeholder,
    Punct(u8),
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Split statement text into significant tokens, dropping whitespace and
/// comments. Quoted strings and identifiers become single tokens.
fn tokenize(sql: &str, no_backslash_escapes: bool) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => {
                let start = i;
                i += 1;
                while i < len {
                    let c = bytes[i];
                    if c == b'\\' && b != b'`' && !no_backslash_escapes {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    if c == b {
                        // A doubled quote continues the literal.
                        if i < len && bytes[i] == b {
                            i += 1;
                            continue;
                        }
                        break;
                    }
                }
                let end = i.min(len);
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Quoted,
                    start,
                    end,
                });
            }
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && bytes
                    .get(i + 2)
                    .is_none_or(|c| c.is_ascii_whitespace() || c.is_ascii_control()) =>
            {
                i = skip_line(bytes, i);
            }
            b'#' => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find_subslice(bytes, i + 2, b"*/").map_or(len, |p| p + 2);
            }
            b'?' => {
                tokens.push(Token {
                    kind: TokenKind::Placeholder,
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            _ if b.is_ascii_whitespace() => i += 1,
            _ if is_word_byte(b) => {
                let start = i;
                while i < len && is_word_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    start,
                    end: i,
                });
            }
            _ => {
                tokens.push(Token {
                    kind: TokenKind::Punct(b),
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
        }
    }
    tokens
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&c| c == b'\n')
        .map_or(bytes.len(), |p| from + p + 1)
}

fn find_subslice(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Immutable analysis of one statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    sql: String,
    keyword: Option<String>,
    shape: ReturnShape,
    placeholders: Vec<usize>,
    duplicate_key_update: Option<usize>,
    rewritable: bool,
    values_span: Option<Range<usize>>,
    batch_count: usize,
}

impl QueryInfo {
    /// Analyze a statement. `no_backslash_escapes` mirrors the session's
    /// `NO_BACKSLASH_ESCAPES` SQL mode.
    pub fn analyze(sql: &str, no_backslash_escapes: bool) -> Self {
        let tokens = tokenize(sql, no_backslash_escapes);
        let word = |t: &Token, kw: &str| {
            t.kind == TokenKind::Word && sql[t.start..t.end].eq_ignore_ascii_case(kw)
        };

        let keyword = tokens
            .iter()
            .find(|t| t.kind != TokenKind::Punct(b'('))
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| sql[t.start..t.end].to_ascii_uppercase());
        let shape = keyword
            .as_deref()
            .map_or(ReturnShape::None, ReturnShape::of_keyword);

        let placeholders: Vec<usize> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Placeholder)
            .map(|t| t.start)
            .collect();

        // Anything after a `;` is a second statement.
        let multi_statement = tokens
            .iter()
            .position(|t| t.kind == TokenKind::Punct(b';'))
            .is_some_and(|p| tokens[p..].iter().any(|t| t.kind != TokenKind::Punct(b';')));

        let odku_index = tokens.windows(4).position(|w| {
            word(&w[0], "ON")
                && word(&w[1], "DUPLICATE")
                && word(&w[2], "KEY")
                && word(&w[3], "UPDATE")
        });
        let duplicate_key_update = odku_index.map(|i| tokens[i].start);

        let is_insert = matches!(keyword.as_deref(), Some("INSERT" | "REPLACE"));
        let values_span = if is_insert {
            find_values_span(sql, &tokens, odku_index)
        } else {
            None
        };

        // A sub-query anywhere after the INSERT head reads the table it writes.
        let has_subquery = tokens.iter().skip(1).any(|t| word(t, "SELECT"));
        let odku_blocks_rewrite = odku_index.is_some_and(|i| {
            tokens[i + 4..].iter().any(|t| word(t, "LAST_INSERT_ID"))
        });

        let rewritable = match &values_span {
            Some(span) => {
                !multi_statement
                    && !has_subquery
                    && !odku_blocks_rewrite
                    && placeholders.iter().all(|p| span.contains(p))
            }
            None => false,
        };

        Self {
            sql: sql.to_string(),
            keyword,
            shape,
            placeholders,
            duplicate_key_update,
            rewritable,
            values_span,
            batch_count: 1,
        }
    }

    /// The statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// First keyword, upper-cased.
    pub fn first_keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    /// Number of `?` placeholders outside quotes and comments.
    pub fn param_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Byte offsets of the placeholders.
    pub fn placeholder_offsets(&self) -> &[usize] {
        &self.placeholders
    }

    /// Static text between placeholders; always `param_count() + 1` items.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        (0..=self.placeholders.len()).map(move |i| self.segment(i))
    }

    /// The static text before placeholder `index` (or after the last one
    /// when `index == param_count()`).
    pub fn segment(&self, index: usize) -> &str {
        let start = if index == 0 {
            0
        } else {
            self.placeholders[index - 1] + 1
        };
        let end = self
            .placeholders
            .get(index)
            .copied()
            .unwrap_or(self.sql.len());
        &self.sql[start..end]
    }

    pub fn has_duplicate_key_update(&self) -> bool {
        self.duplicate_key_update.is_some()
    }

    /// Byte offset of `ON DUPLICATE KEY UPDATE`.
    pub fn duplicate_key_update_offset(&self) -> Option<usize> {
        self.duplicate_key_update
    }

    /// Can a batch of parameter sets be folded into one multi-row statement?
    pub fn is_rewritable(&self) -> bool {
        self.rewritable
    }

    /// Byte span of the `VALUES` row list, parentheses included.
    pub fn values_span(&self) -> Option<Range<usize>> {
        self.values_span.clone()
    }

    /// How many parameter sets this statement binds at once.
    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    /// Multi-row variant with the row list repeated `count` times.
    ///
    /// Placeholder offsets are shifted arithmetically instead of
    /// re-scanning the synthesized text. Returns `None` when the statement
    /// is not rewritable or `count` is zero.
    pub fn for_batch(&self, count: usize) -> Option<Self> {
        if !self.rewritable || count == 0 {
            return None;
        }
        let span = self.values_span.clone()?;
        let body = &self.sql[span.clone()];
        let stride = body.len() + 1;
        let extra = stride * (count - 1);

        let mut sql = String::with_capacity(self.sql.len() + extra);
        sql.push_str(&self.sql[..span.start]);
        for i in 0..count {
            if i > 0 {
                sql.push(',');
            }
            sql.push_str(body);
        }
        sql.push_str(&self.sql[span.end..]);

        let mut placeholders = Vec::with_capacity(self.placeholders.len() * count);
        placeholders.extend(self.placeholders.iter().filter(|p| **p < span.start));
        for i in 0..count {
            placeholders.extend(
                self.placeholders
                    .iter()
                    .filter(|p| span.contains(*p))
                    .map(|p| p + i * stride),
            );
        }
        placeholders.extend(
            self.placeholders
                .iter()
                .filter(|p| **p >= span.end)
                .map(|p| p + extra),
        );

        Some(Self {
            sql,
            keyword: self.keyword.clone(),
            shape: self.shape,
            placeholders,
            duplicate_key_update: self.duplicate_key_update.map(|o| o + extra),
            rewritable: true,
            values_span: Some(span.start..span.end + extra),
            batch_count: self.batch_count * count,
        })
    }
}

/// Locate `VALUES (..)[, (..)]*` in an INSERT/REPLACE. The keyword must not
/// follow `=` (that is the `VALUES()` function inside an update clause),
/// must sit at parenthesis depth zero and before any duplicate-key clause.
/// The row list must be followed by the end of the statement, a row alias
/// (`AS`) or `ON DUPLICATE KEY UPDATE`.
fn find_values_span(
    sql: &str,
    tokens: &[Token],
    odku_index: Option<usize>,
) -> Option<Range<usize>> {
    let limit = odku_index.unwrap_or(tokens.len());
    let mut depth = 0usize;
    let mut keyword_at = None;
    for (i, t) in tokens[..limit].iter().enumerate() {
        match t.kind {
            TokenKind::Punct(b'(') => depth += 1,
            TokenKind::Punct(b')') => depth = depth.saturating_sub(1),
            TokenKind::Word if depth == 0 => {
                let text = &sql[t.start..t.end];
                let preceded_by_eq = i > 0 && tokens[i - 1].kind == TokenKind::Punct(b'=');
                if (text.eq_ignore_ascii_case("VALUES") || text.eq_ignore_ascii_case("VALUE"))
                    && !preceded_by_eq
                {
                    keyword_at = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let mut i = keyword_at? + 1;
    let start = tokens.get(i).filter(|t| t.kind == TokenKind::Punct(b'('))?.start;
    let end;
    loop {
        // tokens[i] is an opening parenthesis of one row.
        let mut depth = 0usize;
        let mut close = None;
        for (j, t) in tokens.iter().enumerate().skip(i) {
            match t.kind {
                TokenKind::Punct(b'(') => depth += 1,
                TokenKind::Punct(b')') => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(j);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close?;
        let is_next_row = tokens
            .get(close + 1)
            .is_some_and(|t| t.kind == TokenKind::Punct(b','))
            && tokens
                .get(close + 2)
                .is_some_and(|t| t.kind == TokenKind::Punct(b'('));
        if is_next_row {
            i = close + 2;
        } else {
            end = tokens[close].end;
            i = close + 1;
            break;
        }
    }

    match tokens.get(i) {
        None => Some(start..end),
        Some(t) if t.kind == TokenKind::Punct(b';') => Some(start..end),
        Some(t)
            if t.kind == TokenKind::Word
                && (sql[t.start..t.end].eq_ignore_ascii_case("AS") || Some(i) == odku_index) =>
        {
            Some(start..end)
        }
        Some(_) => None,
    }
}

#[derive(Debug)]
struct CachedInfo {
    info: Arc<QueryInfo>,
    last_used: u64,
}

/// LRU cache of [`QueryInfo`] keyed by statement text and escape mode.
#[derive(Debug)]
pub struct QueryInfoCache {
    entries: HashMap<(String, bool), CachedInfo>,
    max_size: usize,
    clock: u64,
}

impl QueryInfoCache {
    /// Create a cache holding at most `max_size` statements.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size.min(256)),
            max_size: max_size.max(1),
            clock: 0,
        }
    }

    /// Return the cached analysis or analyze and insert it.
    pub fn get_or_analyze(&mut self, sql: &str, no_backslash_escapes: bool) -> Arc<QueryInfo> {
        self.clock += 1;
        let key = (sql.to_string(), no_backslash_escapes);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = self.clock;
            return Arc::clone(&entry.info);
        }
        if self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        let info = Arc::new(QueryInfo::analyze(sql, no_backslash_escapes));
        self.entries.insert(
            key,
            CachedInfo {
                info: Arc::clone(&info),
                last_used: self.clock,
            },
        );
        info
    }

    pub fn contains(&self, sql: &str, no_backslash_escapes: bool) -> bool {
        self.entries
            .contains_key(&(sql.to_string(), no_backslash_escapes))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
        }
    }
}

impl Default for QueryInfoCache {
    fn default() -> Self {
        Self::new(256)
    }
}
