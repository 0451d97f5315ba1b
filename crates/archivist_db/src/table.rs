//! Typed table access on top of [`Queryable`].
//!
//! A [`Model`] names its table and columns and converts itself to and from
//! rows. [`TableExt`] then provides select/insert/update/delete for any model
//! against either a connection or an open transaction.

use crate::connection::Queryable;
use crate::error::{DbError, Result};
use crate::value::{DbRow, DbValue};

/// A row type bound to one table.
pub trait Model: Sized {
    /// Table name.
    const TABLE: &'static str;
    /// Column names, in the order `to_values` emits them.
    const COLUMNS: &'static [&'static str];
    /// Primary key column; must appear in `COLUMNS`.
    const PRIMARY_KEY: &'static str;

    /// Column values, aligned with `COLUMNS`.
    fn to_values(&self) -> Vec<DbValue>;

    /// Build the model from a row selected with `COLUMNS`.
    fn from_row(row: &DbRow) -> Result<Self>;

    /// Primary key value.
    fn key(&self) -> DbValue {
        let index = Self::COLUMNS
            .iter()
            .position(|column| *column == Self::PRIMARY_KEY)
            .unwrap_or(0);
        self.to_values().swap_remove(index)
    }
}

/// What an insert does when it hits an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Fail with a constraint error.
    #[default]
    Abort,
    /// Leave the existing row untouched.
    Ignore,
    /// Overwrite the existing row.
    Replace,
}

impl OnConflict {
    fn verb(self) -> &'static str {
        match self {
            OnConflict::Abort => "INSERT",
            OnConflict::Ignore => "INSERT OR IGNORE",
            OnConflict::Replace => "INSERT OR REPLACE",
        }
    }
}

/// Filter, ordering and paging for a select.
#[derive(Debug, Clone, Default)]
pub struct Select {
    where_clause: Option<String>,
    params: Vec<DbValue>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict rows with a SQL condition using `?` placeholders.
    pub fn filter(mut self, clause: impl Into<String>, params: Vec<DbValue>) -> Self {
        let clause = clause.into();
        if !clause.trim().is_empty() {
            self.where_clause = Some(clause);
            self.params = params;
        }
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn params(&self) -> &[DbValue] {
        &self.params
    }

    /// Render the statement for `columns` of `table`.
    pub fn to_sql(&self, table: &str, columns: &str) -> String {
        let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(table));
        if let Some(clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        sql
    }
}

/// Model-level operations for anything that can run statements.
pub trait TableExt: Queryable + Sized {
    /// Select all rows of `M` matching `select`.
    fn select<M: Model>(&self, select: &Select) -> Result<Vec<M>> {
        let sql = select.to_sql(M::TABLE, &column_list(M::COLUMNS));
        self.query_all(&sql, select.params())?
            .iter()
            .map(M::from_row)
            .collect()
    }

    /// Look up a row by primary key.
    fn select_one<M: Model>(&self, key: impl Into<DbValue>) -> Result<Option<M>> {
        let select = Select::new()
            .filter(format!("{} = ?", quote_ident(M::PRIMARY_KEY)), vec![key.into()])
            .limit(1);
        Ok(self.select::<M>(&select)?.into_iter().next())
    }

    /// Insert a row. Returns the number of rows written.
    fn insert<M: Model>(&self, model: &M, on_conflict: OnConflict) -> Result<u64> {
        let placeholders = vec!["?"; M::COLUMNS.len()].join(", ");
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            on_conflict.verb(),
            quote_ident(M::TABLE),
            column_list(M::COLUMNS),
            placeholders
        );
        self.execute(&sql, &model.to_values())
    }

    /// Overwrite every column of the row with the model's primary key.
    fn update<M: Model>(&self, model: &M) -> Result<u64> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in M::COLUMNS.iter().zip(model.to_values()) {
            if *column == M::PRIMARY_KEY {
                continue;
            }
            assignments.push(format!("{} = ?", quote_ident(column)));
            params.push(value);
        }
        params.push(model.key());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(M::TABLE),
            assignments.join(", "),
            quote_ident(M::PRIMARY_KEY)
        );
        self.execute(&sql, &params)
    }

    /// Set `assignments` on every row of `M` matching `clause`.
    fn update_matching<M: Model>(
        &self,
        assignments: &[(&str, DbValue)],
        clause: &str,
        params: &[DbValue],
    ) -> Result<u64> {
        if assignments.is_empty() {
            return Err(DbError::invalid_input("update without assignments"));
        }
        for (column, _) in assignments {
            ensure_column::<M>(column)?;
        }
        let set = assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", quote_ident(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut all_params: Vec<DbValue> =
            assignments.iter().map(|(_, value)| value.clone()).collect();
        all_params.extend_from_slice(params);
        let sql = format!("UPDATE {} SET {} WHERE {}", quote_ident(M::TABLE), set, clause);
        self.execute(&sql, &all_params)
    }

    /// Delete the row with the model's primary key.
    fn delete<M: Model>(&self, model: &M) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(M::TABLE),
            quote_ident(M::PRIMARY_KEY)
        );
        self.execute(&sql, &[model.key()])
    }

    /// Count rows of `M` matching `clause` (all rows when empty).
    fn count<M: Model>(&self, clause: &str, params: &[DbValue]) -> Result<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(M::TABLE));
        if !clause.trim().is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        let count: i64 = self.query_scalar(&sql, params)?;
        Ok(count.max(0) as u64)
    }
}

impl<Q: Queryable> TableExt for Q {}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn ensure_column<M: Model>(column: &str) -> Result<()> {
    if M::COLUMNS.contains(&column) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "unknown column '{}' for table '{}'",
            column,
            M::TABLE
        )))
    }
}
