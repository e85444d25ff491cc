//! In-memory tabular dataset.
//!
//! A [`Table`] is an ordered set of named, equal-length columns. It is
//! produced by an external loader and treated as read-only by the
//! pipeline: every transformation returns a new `Table`.
//!
//! Missing values are an explicit sentinel (`None`), never a silent
//! coercion. Operations that require a complete column fail with
//! [`Error::Data`] reporting how many values are missing, rather than
//! dropping rows behind the caller's back.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single column of values. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Numeric values.
    Numeric(Vec<Option<f64>>),
    /// Categorical (string-labelled) values.
    Categorical(Vec<Option<String>>),
}

impl Column {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    /// Whether the column has zero rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of missing values.
    pub fn missing_count(&self) -> usize {
        match self {
            Column::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            Column::Categorical(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Whether the column holds numeric values.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }
}

/// Ordered collection of named, equal-length columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Create a table from `(name, column)` pairs.
    ///
    /// Fails with [`Error::Data`] if names are not unique or column
    /// lengths differ.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut cols = Vec::with_capacity(columns.len());
        for (name, col) in columns {
            if names.contains(&name) {
                return Err(Error::Data(format!("duplicate column name {name:?}")));
            }
            if col.len() != n_rows {
                return Err(Error::Data(format!(
                    "column {:?} has {} rows, expected {}",
                    name,
                    col.len(),
                    n_rows
                )));
            }
            names.push(name);
            cols.push(col);
        }
        Ok(Self { names, columns: cols, n_rows })
    }

    /// Convenience constructor for fully-observed numeric columns.
    pub fn from_numeric(columns: Vec<(&str, Vec<f64>)>) -> Result<Self> {
        Self::new(
            columns
                .into_iter()
                .map(|(name, values)| {
                    (name.to_string(), Column::Numeric(values.into_iter().map(Some).collect()))
                })
                .collect(),
        )
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column names, in table order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Names of the numeric columns, in table order.
    pub fn numeric_column_names(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(&self.columns)
            .filter(|(_, c)| c.is_numeric())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names.iter().position(|n| n == name).map(|i| &self.columns[i])
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Densify a numeric column.
    ///
    /// Fails with [`Error::Data`] if the column is absent, categorical,
    /// contains missing values (the message reports how many out of how
    /// many rows), or contains non-finite values.
    pub fn numeric(&self, name: &str) -> Result<Vec<f64>> {
        let col = self
            .column(name)
            .ok_or_else(|| Error::Data(format!("column {name:?} not found in table")))?;
        let values = match col {
            Column::Numeric(v) => v,
            Column::Categorical(_) => {
                return Err(Error::Data(format!("column {name:?} is categorical, expected numeric")));
            }
        };
        let missing = col.missing_count();
        if missing > 0 {
            return Err(Error::Data(format!(
                "column {:?} has {} missing values out of {} rows",
                name, missing, self.n_rows
            )));
        }
        let dense: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        if dense.iter().any(|v| !v.is_finite()) {
            return Err(Error::Data(format!("column {name:?} contains non-finite values")));
        }
        Ok(dense)
    }

    /// Return a new table with `name` set to the given dense numeric
    /// values, replacing the column if it exists and appending it
    /// otherwise. `self` is left untouched.
    pub fn with_numeric_column(&self, name: &str, values: Vec<f64>) -> Result<Table> {
        if !self.columns.is_empty() && values.len() != self.n_rows {
            return Err(Error::Data(format!(
                "column {:?} has {} rows, expected {}",
                name,
                values.len(),
                self.n_rows
            )));
        }
        let n_rows = if self.columns.is_empty() { values.len() } else { self.n_rows };
        let col = Column::Numeric(values.into_iter().map(Some).collect());
        let mut out = self.clone();
        out.n_rows = n_rows;
        match out.names.iter().position(|n| n == name) {
            Some(i) => out.columns[i] = col,
            None => {
                out.names.push(name.to_string());
                out.columns.push(col);
            }
        }
        Ok(out)
    }
}
