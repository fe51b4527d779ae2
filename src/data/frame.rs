//! Minimal column-typed table loaded from CSV.
//!
//! A column is numeric when every non-missing cell parses as `f64`, otherwise
//! categorical. Missing cells are `None` in either representation.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Cell tokens read as missing.
pub const MISSING_TOKENS: &[&str] = &["", "?", "NA", "N/A", "NaN", "nan", "null"];

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Column::Categorical(v) => {
                Column::Categorical(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    /// Cell as text; numeric cells drop a trailing `.0`.
    pub fn text(&self, row: usize) -> Option<String> {
        match self {
            Column::Numeric(v) => v[row].map(format_number),
            Column::Categorical(v) => v[row].clone(),
        }
    }

    /// Cell as a number; categorical cells parse if they can.
    pub fn number(&self, row: usize) -> Option<f64> {
        match self {
            Column::Numeric(v) => v[row],
            Column::Categorical(v) => v[row].as_deref().and_then(|s| s.trim().parse().ok()),
        }
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell.trim())
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Frame {
    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(false).from_reader(reader);
        let names: Vec<String> = rdr
            .headers()
            .context("CSV has no header row")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); names.len()];
        for (line, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("Bad CSV record at row {}", line + 1))?;
            for (col, cell) in record.iter().enumerate() {
                raw[col].push(cell.to_string());
            }
        }

        let mut frame = Frame::default();
        for (name, cells) in names.into_iter().zip(raw) {
            frame.push_column(name, infer_column(cells))?;
        }
        Ok(frame)
    }

    /// Build from already-typed columns.
    pub fn from_columns(columns: Vec<(String, Column)>) -> Result<Self> {
        let mut frame = Frame::default();
        for (name, column) in columns {
            frame.push_column(name, column)?;
        }
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn require(&self, name: &str) -> Result<&Column> {
        match self.column(name) {
            Some(col) => Ok(col),
            None => bail!("Dataset is missing required column '{}'", name),
        }
    }

    /// Add or replace a column.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if !self.names.is_empty() && column.len() != self.n_rows {
            bail!(
                "Column '{}' has {} rows, frame has {}",
                name,
                column.len(),
                self.n_rows
            );
        }
        self.n_rows = column.len();
        if let Some(i) = self.names.iter().position(|n| *n == name) {
            self.columns[i] = column;
        } else {
            self.names.push(name);
            self.columns.push(column);
        }
        Ok(())
    }

    /// Copy without the named columns (absent names are ignored).
    pub fn without(&self, drop: &[&str]) -> Frame {
        let mut out = Frame {
            n_rows: self.n_rows,
            ..Frame::default()
        };
        for (name, col) in self.names.iter().zip(&self.columns) {
            if !drop.contains(&name.as_str()) {
                out.names.push(name.clone());
                out.columns.push(col.clone());
            }
        }
        out
    }

    /// Copy restricted to the named columns, in the given order.
    pub fn select(&self, keep: &[&str]) -> Result<Frame> {
        let mut out = Frame {
            n_rows: self.n_rows,
            ..Frame::default()
        };
        for name in keep {
            out.names.push(name.to_string());
            out.columns.push(self.require(name)?.clone());
        }
        Ok(out)
    }

    /// Rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Frame {
        Frame {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            n_rows: indices.len(),
        }
    }
}

fn infer_column(cells: Vec<String>) -> Column {
    let numeric = cells
        .iter()
        .filter(|c| !is_missing(c))
        .all(|c| c.trim().parse::<f64>().is_ok());

    if numeric {
        Column::Numeric(
            cells
                .iter()
                .map(|c| {
                    if is_missing(c) {
                        None
                    } else {
                        c.trim().parse().ok()
                    }
                })
                .collect(),
        )
    } else {
        Column::Categorical(
            cells
                .into_iter()
                .map(|c| if is_missing(&c) { None } else { Some(c.trim().to_string()) })
                .collect(),
        )
    }
}
