//! Query language for selecting records.
//!
//! A query is a whitespace-separated list of tokens:
//!
//! - `@<field>` makes `<field>` the current field (it must be allowed)
//! - `@null` / `@notnull` test the current field for NULL
//! - `@true` / `@false` compare the current field with a boolean
//! - `@like` matches following values with SQL `LIKE`
//! - `@file` reads following tokens as files with one value per line
//! - anything else is a value for the current field
//!
//! `@like` and `@file` stay on until the field changes. Double-quoted tokens
//! are always values. Terms on the same field are OR'd, fields are AND'd:
//! `@uuid A B @warning @notnull` compiles to
//! `(uuid = ? OR uuid = ?) AND (warning IS NOT NULL)`.

use std::path::PathBuf;

use archivist_db::DbValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Missing query")]
    Empty,

    #[error("Invalid field '{0}'")]
    InvalidField(String),

    #[error("Unterminated quote in query")]
    UnterminatedQuote,

    #[error("Query file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Cannot read query file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Comparison applied by a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Is,
    IsNot,
    Eq,
    Like,
    In,
}

impl Operator {
    fn sql(&self) -> &'static str {
        match self {
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
            Operator::Eq => "=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// One `(field, value, operator)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub field: String,
    pub value: QueryValue,
    pub operator: Operator,
}

impl Term {
    fn to_sql(&self, params: &mut Vec<DbValue>) -> String {
        match &self.value {
            QueryValue::Null => format!("{} {} NULL", self.field, self.operator.sql()),
            QueryValue::Bool(value) => {
                params.push(DbValue::Boolean(*value));
                format!("{} {} ?", self.field, self.operator.sql())
            }
            QueryValue::Text(value) => {
                params.push(DbValue::Text(value.clone()));
                format!("{} {} ?", self.field, self.operator.sql())
            }
            QueryValue::List(values) => {
                params.extend(values.iter().cloned().map(DbValue::Text));
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{} {} ({})", self.field, self.operator.sql(), placeholders)
            }
        }
    }
}

/// A parsed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Compile into a WHERE clause with `?` placeholders and its parameters.
    ///
    /// Fields appear in the order they were first named.
    pub fn to_where(&self) -> (String, Vec<DbValue>) {
        let mut fields: Vec<&str> = Vec::new();
        for term in &self.terms {
            if !fields.contains(&term.field.as_str()) {
                fields.push(&term.field);
            }
        }

        let mut params = Vec::new();
        let groups: Vec<String> = fields
            .iter()
            .map(|field| {
                let alternatives: Vec<String> = self
                    .terms
                    .iter()
                    .filter(|term| term.field == *field)
                    .map(|term| term.to_sql(&mut params))
                    .collect();
                format!("({})", alternatives.join(" OR "))
            })
            .collect();

        (groups.join(" AND "), params)
    }
}

/// Parses queries against a fixed set of fields.
#[derive(Debug, Clone)]
pub struct QueryCompiler<'a> {
    fields: &'a [&'a str],
    default_field: &'a str,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(fields: &'a [&'a str], default_field: &'a str) -> Self {
        Self {
            fields,
            default_field,
        }
    }

    /// Parse `input`. An input without any term is [`QueryError::Empty`].
    pub fn parse(&self, input: &str) -> Result<Query, QueryError> {
        let mut terms = Vec::new();
        let mut field = self.default_field.to_string();
        let mut like = false;
        let mut from_file = false;

        for token in tokenize(input)? {
            let directive = match &token {
                Token::Bare(text) => text.strip_prefix('@'),
                Token::Quoted(_) => None,
            };

            match directive {
                Some("null") => terms.push(null_term(&field, Operator::Is)),
                Some("notnull") => terms.push(null_term(&field, Operator::IsNot)),
                Some("true") => terms.push(bool_term(&field, true)),
                Some("false") => terms.push(bool_term(&field, false)),
                Some("like") => like = true,
                Some("file") => from_file = true,
                Some(name) => {
                    if !self.fields.contains(&name) {
                        return Err(QueryError::InvalidField(name.to_string()));
                    }
                    field = name.to_string();
                    like = false;
                    from_file = false;
                }
                None => {
                    let value = token.into_text();
                    if from_file {
                        let lines = read_value_file(&value)?;
                        if like {
                            terms.extend(lines.into_iter().map(|line| Term {
                                field: field.clone(),
                                value: QueryValue::Text(line),
                                operator: Operator::Like,
                            }));
                        } else {
                            terms.push(Term {
                                field: field.clone(),
                                value: QueryValue::List(lines),
                                operator: Operator::In,
                            });
                        }
                    } else {
                        terms.push(Term {
                            field: field.clone(),
                            value: QueryValue::Text(value),
                            operator: if like { Operator::Like } else { Operator::Eq },
                        });
                    }
                }
            }
        }

        if terms.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Query { terms })
    }
}

fn null_term(field: &str, operator: Operator) -> Term {
    Term {
        field: field.to_string(),
        value: QueryValue::Null,
        operator,
    }
}

fn bool_term(field: &str, value: bool) -> Term {
    Term {
        field: field.to_string(),
        value: QueryValue::Bool(value),
        operator: Operator::Eq,
    }
}

fn read_value_file(path: &str) -> Result<Vec<String>, QueryError> {
    let path = PathBuf::from(path);
    let content = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            QueryError::FileNotFound(path.clone())
        } else {
            QueryError::FileRead {
                path: path.clone(),
                source,
            }
        }
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Bare(String),
    Quoted(String),
}

impl Token {
    fn into_text(self) -> String {
        match self {
            Token::Bare(text) | Token::Quoted(text) => text,
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == '"' {
                    closed = true;
                    break;
                }
                text.push(next);
            }
            if !closed {
                return Err(QueryError::UnterminatedQuote);
            }
            tokens.push(Token::Quoted(text));
            continue;
        }
        let mut text = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() {
                break;
            }
            text.push(next);
            chars.next();
        }
        tokens.push(Token::Bare(text));
    }

    Ok(tokens)
}
