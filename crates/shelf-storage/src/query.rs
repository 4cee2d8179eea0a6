//! Search filter compilation.
//!
//! Turns UI search parameters into a [`FilterExpression`] and renders that
//! expression as a SQL `WHERE` fragment over the `papers` table (alias `p`).
//!
//! Advanced mode accepts a small predicate language:
//!
//! ```text
//! rating >= 4 AND (title CONTAINS[c] "attention" OR tags.name == "nlp")
//! addTime > 2024-01-01@00:00:00 AND NOT flag == true
//! ```
//!
//! Relative dates are written `[N DAYS]` and resolved against the current
//! time before parsing.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use rusqlite::types::Value as SqlValue;
use tracing::{debug, warn};

use shelf_core::error::ShelfError;
use shelf_core::types::{CategorizerKind, SearchMode, SearchParams};

use crate::db::FOLD_FUNCTION;

/// Timestamp literal format of the advanced language.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d@%H:%M:%S";

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(<>|<=|>=|==|!=|<|>)?\s*\[\s*(\d+)\s*DAYS\s*\]").expect("Invalid date token regex")
});

/// Paper fields addressable in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Authors,
    Publication,
    PubTime,
    PubType,
    Doi,
    Arxiv,
    Note,
    Rating,
    Flag,
    AddTime,
    TagName,
    FolderName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Text,
    Int,
    Bool,
    Time,
}

impl Field {
    fn parse(ident: &str) -> Option<Self> {
        let field = match ident.to_ascii_lowercase().as_str() {
            "title" => Field::Title,
            "authors" => Field::Authors,
            "publication" => Field::Publication,
            "pubtime" | "pub_time" => Field::PubTime,
            "pubtype" | "pub_type" => Field::PubType,
            "doi" => Field::Doi,
            "arxiv" => Field::Arxiv,
            "note" => Field::Note,
            "rating" => Field::Rating,
            "flag" => Field::Flag,
            "addtime" | "add_time" => Field::AddTime,
            "tags.name" => Field::TagName,
            "folders.name" => Field::FolderName,
            _ => return None,
        };
        Some(field)
    }

    fn field_type(&self) -> FieldType {
        match self {
            Field::Rating | Field::PubType => FieldType::Int,
            Field::Flag => FieldType::Bool,
            Field::AddTime => FieldType::Time,
            _ => FieldType::Text,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Field::Title => "p.title",
            Field::Authors => "p.authors",
            Field::Publication => "p.publication",
            Field::PubTime => "p.pub_time",
            Field::PubType => "p.pub_type",
            Field::Doi => "p.doi",
            Field::Arxiv => "p.arxiv",
            Field::Note => "p.note",
            Field::Rating => "p.rating",
            Field::Flag => "p.flag",
            Field::AddTime => "p.add_time",
            Field::TagName | Field::FolderName => "c.name",
        }
    }

    fn categorizer_kind(&self) -> Option<CategorizerKind> {
        match self {
            Field::TagName => Some(CategorizerKind::Tag),
            Field::FolderName => Some(CategorizerKind::Folder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    BeginsWith,
    EndsWith,
    /// Wildcard match: `*` is any run of characters, `?` one character.
    Like,
}

impl CompareOp {
    fn is_string_op(&self) -> bool {
        matches!(
            self,
            CompareOp::Contains | CompareOp::BeginsWith | CompareOp::EndsWith | CompareOp::Like
        )
    }

    fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            _ => "=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
}

/// A compiled paper filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// Matches every paper.
    All,
    Compare {
        field: Field,
        op: CompareOp,
        value: Value,
        case_insensitive: bool,
    },
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Not(Box<FilterExpression>),
}

/// SQL rendering of a filter: a boolean expression plus positional params.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

/// Compile search parameters against the current time.
pub fn compile(params: &SearchParams) -> FilterExpression {
    compile_at(params, Utc::now())
}

/// Compile search parameters, resolving relative dates against `now`.
///
/// An advanced expression that fails to parse is logged and the whole search
/// falls back to [`FilterExpression::All`].
pub fn compile_at(params: &SearchParams, now: DateTime<Utc>) -> FilterExpression {
    let mut clauses = Vec::new();

    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(search) = search {
        match params.mode {
            SearchMode::General => clauses.push(general_clause(search)),
            SearchMode::Advanced => match parse_advanced(search, now) {
                Ok(expr) => clauses.push(expr),
                Err(e) => {
                    warn!(error = %e, filter = search, "Invalid advanced filter, returning all papers");
                    return FilterExpression::All;
                }
            },
            // Text matching happens against the full-text cache afterwards.
            SearchMode::Fulltext => {}
        }
    }

    if params.flag {
        clauses.push(FilterExpression::Compare {
            field: Field::Flag,
            op: CompareOp::Eq,
            value: Value::Bool(true),
            case_insensitive: false,
        });
    }
    if let Some(tag) = params.tag.as_deref() {
        clauses.push(name_equals(Field::TagName, tag));
    }
    if let Some(folder) = params.folder.as_deref() {
        clauses.push(name_equals(Field::FolderName, folder));
    }

    match clauses.len() {
        0 => FilterExpression::All,
        1 => clauses.remove(0),
        _ => FilterExpression::And(clauses),
    }
}

/// Parse an advanced expression after resolving `[N DAYS]` tokens.
pub fn parse_advanced(input: &str, now: DateTime<Utc>) -> Result<FilterExpression, ShelfError> {
    let resolved = substitute_date_tokens(input, now);
    debug!(input, resolved = %resolved, "Parsing advanced filter");
    let tokens = tokenize(&resolved)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(ShelfError::Query(format!(
            "unexpected {:?} after expression",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

/// Replace each `[N DAYS]` with the timestamp `now - N days`.
///
/// A comparison operator directly before the token is mirrored (`<` becomes
/// `>`, `<=` becomes `>=` and back).
pub fn substitute_date_tokens(input: &str, now: DateTime<Utc>) -> String {
    DATE_TOKEN
        .replace_all(input, |caps: &Captures<'_>| {
            // The pattern only matches digit runs; overlong ones clamp.
            let days: i64 = caps[2].parse().unwrap_or(i64::MAX / 86_400_000);
            let at = now - Duration::days(days.min(1_000_000));
            let stamp = at.format(TIMESTAMP_FORMAT).to_string();
            match caps.get(1).map(|m| m.as_str()) {
                Some(op) => format!("{} {}", mirror_operator(op), stamp),
                None => stamp,
            }
        })
        .into_owned()
}

// TODO: confirm with product whether the mirrored operator is intended;
// stored smart filters depend on the current behavior.
fn mirror_operator(op: &str) -> &str {
    match op {
        "<" => ">",
        ">" => "<",
        "<=" => ">=",
        ">=" => "<=",
        other => other,
    }
}

fn general_clause(search: &str) -> FilterExpression {
    let tokens: Vec<&str> = search.split_whitespace().collect();
    let pattern = format!("*{}*", tokens.join("*"));
    FilterExpression::Or(
        [Field::Title, Field::Authors, Field::Publication, Field::Note]
            .into_iter()
            .map(|field| FilterExpression::Compare {
                field,
                op: CompareOp::Like,
                value: Value::Text(pattern.clone()),
                case_insensitive: true,
            })
            .collect(),
    )
}

fn name_equals(field: Field, name: &str) -> FilterExpression {
    FilterExpression::Compare {
        field,
        op: CompareOp::Eq,
        value: Value::Text(name.to_string()),
        case_insensitive: false,
    }
}

// =============================================================================
// SQL rendering
// =============================================================================

impl FilterExpression {
    pub fn is_all(&self) -> bool {
        matches!(self, FilterExpression::All)
    }

    /// Render as a SQL boolean expression over `papers p`.
    pub fn to_sql(&self) -> SqlFilter {
        let mut params = Vec::new();
        let clause = self.render(&mut params);
        SqlFilter { clause, params }
    }

    fn render(&self, params: &mut Vec<SqlValue>) -> String {
        match self {
            FilterExpression::All => "1".to_string(),
            FilterExpression::And(parts) if parts.is_empty() => "1".to_string(),
            FilterExpression::Or(parts) if parts.is_empty() => "0".to_string(),
            FilterExpression::And(parts) => join(parts, " AND ", params),
            FilterExpression::Or(parts) => join(parts, " OR ", params),
            FilterExpression::Not(inner) => format!("NOT ({})", inner.render(params)),
            FilterExpression::Compare {
                field,
                op,
                value,
                case_insensitive,
            } => {
                let condition = render_compare(*field, *op, value, *case_insensitive, params);
                match field.categorizer_kind() {
                    Some(kind) => format!(
                        "EXISTS (SELECT 1 FROM paper_categorizers pc \
                         JOIN categorizers c ON c.id = pc.categorizer_id \
                         WHERE pc.paper_id = p.id AND c.kind = '{}' AND {})",
                        kind.as_str(),
                        condition
                    ),
                    None => condition,
                }
            }
        }
    }
}

fn join(parts: &[FilterExpression], sep: &str, params: &mut Vec<SqlValue>) -> String {
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", p.render(params)))
        .collect();
    rendered.join(sep)
}

fn render_compare(
    field: Field,
    op: CompareOp,
    value: &Value,
    case_insensitive: bool,
    params: &mut Vec<SqlValue>,
) -> String {
    let column = field.column();
    match value {
        Value::Int(n) => {
            params.push(SqlValue::Integer(*n));
            format!("COALESCE({}, 0) {} ?", column, op.sql())
        }
        Value::Bool(b) => {
            params.push(SqlValue::Integer(i64::from(*b)));
            format!("COALESCE({}, 0) {} ?", column, op.sql())
        }
        Value::Time(t) => {
            params.push(SqlValue::Integer(t.timestamp()));
            format!("COALESCE({}, 0) {} ?", column, op.sql())
        }
        Value::Text(text) => {
            let (col, arg) = if case_insensitive {
                (
                    format!("{}(COALESCE({}, ''))", FOLD_FUNCTION, column),
                    format!("{}(?)", FOLD_FUNCTION),
                )
            } else {
                (format!("COALESCE({}, '')", column), "?".to_string())
            };
            match op {
                CompareOp::Contains => {
                    params.push(SqlValue::Text(text.clone()));
                    format!("instr({}, {}) > 0", col, arg)
                }
                CompareOp::BeginsWith => {
                    params.push(SqlValue::Text(text.clone()));
                    params.push(SqlValue::Text(text.clone()));
                    format!("substr({col}, 1, length({arg})) = {arg}", col = col, arg = arg)
                }
                CompareOp::EndsWith => {
                    for _ in 0..3 {
                        params.push(SqlValue::Text(text.clone()));
                    }
                    format!(
                        "(length({arg}) <= length({col}) AND substr({col}, length({col}) - length({arg}) + 1) = {arg})",
                        col = col,
                        arg = arg
                    )
                }
                CompareOp::Like if case_insensitive => {
                    params.push(SqlValue::Text(wildcard_to_like(text)));
                    format!("{} LIKE {} ESCAPE '\\'", col, arg)
                }
                CompareOp::Like => {
                    params.push(SqlValue::Text(wildcard_to_glob(text)));
                    format!("{} GLOB ?", col)
                }
                _ => {
                    params.push(SqlValue::Text(text.clone()));
                    format!("{} {} {}", col, op.sql(), arg)
                }
            }
        }
    }
}

/// `*`/`?` wildcards to a SQL LIKE pattern with `\` as escape.
fn wildcard_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// `*`/`?` wildcards to a case-sensitive GLOB pattern.
fn wildcard_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '[' => out.push_str("[[]"),
            _ => out.push(ch),
        }
    }
    out
}

// =============================================================================
// Advanced language parser
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
    Op(CompareOp),
    CaseFlag,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ShelfError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| ShelfError::Query("unterminated '['".into()))?;
                let inner: String = chars[i + 1..i + end].iter().collect();
                if !inner.trim().eq_ignore_ascii_case("c") {
                    return Err(ShelfError::Query(format!("unknown modifier [{}]", inner)));
                }
                tokens.push(Token::CaseFlag);
                i += end + 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Le));
                i += 2;
            }
            '<' if next == Some('>') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CompareOp::Lt));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CompareOp::Gt));
                i += 1;
            }
            '"' | '\'' => {
                let quote = ch;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        None => return Err(ShelfError::Query("unterminated string".into())),
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                text.push(escaped);
                            }
                            i += 2;
                        }
                        Some(c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            text.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_timestamp = c != '-' && i - start == 4 && chars.get(i) == Some(&'-');
                if is_timestamp {
                    while i < chars.len() && matches!(chars[i], '0'..='9' | '-' | '@' | ':') {
                        i += 1;
                    }
                    let raw: String = chars[start..i].iter().collect();
                    let parsed = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
                        .map_err(|e| ShelfError::Query(format!("bad timestamp '{}': {}", raw, e)))?;
                    tokens.push(Token::Time(parsed.and_utc()));
                } else {
                    let raw: String = chars[start..i].iter().collect();
                    let n = raw
                        .parse()
                        .map_err(|e| ShelfError::Query(format!("bad number '{}': {}", raw, e)))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "TRUE" => Token::Bool(true),
                    "FALSE" => Token::Bool(false),
                    "CONTAINS" => Token::Op(CompareOp::Contains),
                    "BEGINSWITH" => Token::Op(CompareOp::BeginsWith),
                    "ENDSWITH" => Token::Op(CompareOp::EndsWith),
                    "LIKE" => Token::Op(CompareOp::Like),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(ShelfError::Query(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<FilterExpression, ShelfError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpression::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpression, ShelfError> {
        let mut parts = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpression::And(parts)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpression, ShelfError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(FilterExpression::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ShelfError::Query(format!("expected ')', found {:?}", other))),
                }
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<FilterExpression, ShelfError> {
        let field = match self.advance() {
            Some(Token::Ident(name)) => Field::parse(&name)
                .ok_or_else(|| ShelfError::Query(format!("unknown field '{}'", name)))?,
            other => return Err(ShelfError::Query(format!("expected field, found {:?}", other))),
        };
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(ShelfError::Query(format!(
                    "expected operator, found {:?}",
                    other
                )))
            }
        };
        let case_insensitive = if self.peek() == Some(&Token::CaseFlag) {
            self.pos += 1;
            true
        } else {
            false
        };
        let value = match self.advance() {
            Some(Token::Str(s)) => Value::Text(s),
            Some(Token::Int(n)) => Value::Int(n),
            Some(Token::Bool(b)) => Value::Bool(b),
            Some(Token::Time(t)) => Value::Time(t),
            other => return Err(ShelfError::Query(format!("expected value, found {:?}", other))),
        };

        let value = coerce(field, op, value)?;
        Ok(FilterExpression::Compare {
            field,
            op,
            value,
            case_insensitive,
        })
    }
}

/// Check a literal against the field type, widening where unambiguous.
fn coerce(field: Field, op: CompareOp, value: Value) -> Result<Value, ShelfError> {
    let ty = field.field_type();
    if op.is_string_op() && ty != FieldType::Text {
        return Err(ShelfError::Query(format!(
            "{:?} only applies to text fields, not {:?}",
            op, field
        )));
    }
    if ty == FieldType::Bool && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
        return Err(ShelfError::Query(format!("{:?} cannot be ordered", field)));
    }
    match (ty, value) {
        (FieldType::Text, v @ Value::Text(_)) => Ok(v),
        (FieldType::Int, v @ Value::Int(_)) => Ok(v),
        (FieldType::Bool, v @ Value::Bool(_)) => Ok(v),
        (FieldType::Bool, Value::Int(n)) if n == 0 || n == 1 => Ok(Value::Bool(n == 1)),
        (FieldType::Time, v @ Value::Time(_)) => Ok(v),
        (_, v) => Err(ShelfError::Query(format!(
            "{:?} cannot be compared with {:?}",
            field, v
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn advanced(search: &str) -> SearchParams {
        SearchParams::text(search, SearchMode::Advanced)
    }

    #[test]
    fn test_empty_params_match_all() {
        assert!(compile_at(&SearchParams::default(), now()).is_all());
        assert!(compile_at(&SearchParams::text("   ", SearchMode::General), now()).is_all());
    }

    #[test]
    fn test_general_mode_wildcards_tokens() {
        let expr = compile_at(&SearchParams::text("attention  need", SearchMode::General), now());
        let FilterExpression::Or(parts) = expr else {
            panic!("expected OR over fields");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(
            parts[0],
            FilterExpression::Compare {
                field: Field::Title,
                op: CompareOp::Like,
                value: Value::Text("*attention*need*".into()),
                case_insensitive: true,
            }
        );
    }

    #[test]
    fn test_structural_clauses_are_anded() {
        let params = SearchParams {
            flag: true,
            tag: Some("nlp".into()),
            folder: Some("reading".into()),
            ..Default::default()
        };
        let FilterExpression::And(parts) = compile_at(&params, now()) else {
            panic!("expected AND");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], name_equals(Field::TagName, "nlp"));
    }

    #[test]
    fn test_fulltext_mode_ignores_search_string() {
        let mut params = SearchParams::text("anything", SearchMode::Fulltext);
        assert!(compile_at(&params, now()).is_all());
        params.flag = true;
        assert!(!compile_at(&params, now()).is_all());
    }

    #[test]
    fn test_date_token_substitution_mirrors_operator() {
        assert_eq!(
            substitute_date_tokens("addTime < [7 DAYS]", now()),
            "addTime > 2024-03-03@12:00:00"
        );
        assert_eq!(
            substitute_date_tokens("addTime >= [1 days]", now()),
            "addTime <= 2024-03-09@12:00:00"
        );
        assert_eq!(
            substitute_date_tokens("addTime == [0 DAYS]", now()),
            "addTime == 2024-03-10@12:00:00"
        );
    }

    #[test]
    fn test_date_token_keeps_not_equal_intact() {
        assert_eq!(
            substitute_date_tokens("addTime <> [3 DAYS]", now()),
            "addTime <> 2024-03-07@12:00:00"
        );
        let expr = parse_advanced("addTime <> [3 DAYS]", now()).unwrap();
        assert_eq!(
            expr,
            FilterExpression::Compare {
                field: Field::AddTime,
                op: CompareOp::Ne,
                value: Value::Time(Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()),
                case_insensitive: false,
            }
        );
    }

    #[test]
    fn test_advanced_with_date_token() {
        let expr = compile_at(&advanced("addTime < [7 DAYS]"), now());
        assert_eq!(
            expr,
            FilterExpression::Compare {
                field: Field::AddTime,
                op: CompareOp::Gt,
                value: Value::Time(Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()),
                case_insensitive: false,
            }
        );
    }

    #[test]
    fn test_advanced_precedence() {
        let expr = parse_advanced(
            r#"rating >= 4 AND title CONTAINS[c] "deep" OR NOT flag == true"#,
            now(),
        )
        .unwrap();
        let FilterExpression::Or(parts) = expr else {
            panic!("expected OR at top level");
        };
        assert!(matches!(parts[0], FilterExpression::And(_)));
        assert!(matches!(parts[1], FilterExpression::Not(_)));
    }

    #[test]
    fn test_advanced_parentheses_and_case_flag() {
        let expr = parse_advanced(
            "(tags.name == 'nlp' || folders.name BEGINSWITH[c] 'Read') && rating > 2",
            now(),
        )
        .unwrap();
        let FilterExpression::And(parts) = expr else {
            panic!("expected AND");
        };
        let FilterExpression::Or(inner) = &parts[0] else {
            panic!("expected OR in parentheses");
        };
        assert!(matches!(
            inner[1],
            FilterExpression::Compare {
                field: Field::FolderName,
                op: CompareOp::BeginsWith,
                case_insensitive: true,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_advanced_falls_back_to_all() {
        let mut params = advanced("title CONTAINS");
        params.flag = true;
        assert!(compile_at(&params, now()).is_all());
        assert!(compile_at(&advanced("nosuchfield == 1"), now()).is_all());
        assert!(compile_at(&advanced("(rating > 1"), now()).is_all());
        assert!(compile_at(&advanced("rating CONTAINS 'x'"), now()).is_all());
    }

    #[test]
    fn test_parse_errors_are_query_errors() {
        let err = parse_advanced("title ==", now()).unwrap_err();
        assert!(matches!(err, ShelfError::Query(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_bool_accepts_zero_one() {
        let expr = parse_advanced("flag == 1", now()).unwrap();
        assert!(matches!(
            expr,
            FilterExpression::Compare {
                value: Value::Bool(true),
                ..
            }
        ));
    }

    #[test]
    fn test_sql_rendering() {
        let sql = compile_at(&SearchParams::tag("nlp"), now()).to_sql();
        assert!(sql.clause.contains("EXISTS"));
        assert!(sql.clause.contains("c.kind = 'tag'"));
        assert_eq!(sql.params, vec![SqlValue::Text("nlp".into())]);

        let all = FilterExpression::All.to_sql();
        assert_eq!(all.clause, "1");
        assert!(all.params.is_empty());
    }

    #[test]
    fn test_wildcard_translation() {
        assert_eq!(wildcard_to_like("*a_b%c?*"), "%a\\_b\\%c_%");
        assert_eq!(wildcard_to_glob("*[x]*"), "*[[]x]*");
    }
}
