//! Row query description shared by both backends.
//!
//! Mirrors the subset of PostgREST the client uses: equality, case-insensitive
//! pattern, and membership filters, one ordering column, and a row limit.

use lc_core::error::{LcError, LcResult};

/// A single column filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq(String, String),
    /// `column ILIKE pattern`, `%` matches any run of characters.
    ILike(String, String),
    /// `column IN (values)`. An empty list matches nothing.
    In(String, Vec<String>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _) | Filter::ILike(c, _) | Filter::In(c, _) => c,
        }
    }

    /// PostgREST value syntax, e.g. `eq.c1` or `in.("a","b")`.
    fn postgrest_value(&self) -> String {
        match self {
            Filter::Eq(_, v) => format!("eq.{v}"),
            Filter::ILike(_, p) => format!("ilike.{p}"),
            Filter::In(_, values) => {
                let quoted: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
                    .collect();
                format!("in.({})", quoted.join(","))
            }
        }
    }
}

/// Ordering on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Filters, ordering, and limit for a select, update, or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn ilike(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column.into(), pattern.into()));
        self
    }

    pub fn is_in<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .push(Filter::In(column.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Every column name referenced by this query.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.filters
            .iter()
            .map(Filter::column)
            .chain(self.order.iter().map(|o| o.column.as_str()))
    }

    /// Reject column names that are not plain identifiers.
    pub fn validate(&self) -> LcResult<()> {
        for column in self.columns() {
            validate_identifier(column)?;
        }
        Ok(())
    }

    /// Encode as PostgREST query parameters.
    pub fn to_postgrest_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.column().to_string(), f.postgrest_value()))
            .collect();
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// Table and column names must be `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> LcResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LcError::backend(format!("invalid identifier `{name}`")))
    }
}
