//! Minimal tabular data frame
//!
//! Just enough to hold a few typed rows and print them the way Spark's
//! `DataFrame.show()` does.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

/// Spark pads every column to at least this width
const MIN_COLUMN_WIDTH: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Row has {actual} value(s), expected {expected}")]
    RowWidth { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Int(i64),
    Null,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Int(n) => write!(f, "{}", n),
            Cell::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Int(n)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), FrameError> {
        if row.len() != self.columns.len() {
            return Err(FrameError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders the frame as an ASCII table, cells right-aligned
    pub fn show(&self) -> String {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                self.rows
                    .iter()
                    .map(|row| row[idx].to_string().chars().count())
                    .chain([name.chars().count(), MIN_COLUMN_WIDTH])
                    .max()
                    .unwrap_or(MIN_COLUMN_WIDTH)
            })
            .collect();

        let separator = widths.iter().fold(String::from("+"), |mut line, width| {
            line.push_str(&"-".repeat(*width));
            line.push('+');
            line
        });
        let render_row = |cells: Vec<String>| {
            let mut line = String::from("|");
            for (cell, width) in cells.iter().zip(&widths) {
                line.push_str(&format!("{:>width$}|", cell, width = width));
            }
            line
        };

        let mut out = vec![separator.clone(), render_row(self.columns.clone()), separator.clone()];
        for row in &self.rows {
            out.push(render_row(row.iter().map(ToString::to_string).collect()));
        }
        out.push(separator);
        out.join("\n") + "\n"
    }

    /// One JSON object per row
    pub fn to_json_lines(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| {
                let object: Map<String, JsonValue> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|c| serde_json::to_value(c).unwrap_or(JsonValue::Null)))
                    .collect();
                JsonValue::Object(object).to_string()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Frame {
        let mut frame = Frame::new(["name", "age"]);
        frame.push_row(vec!["Alice".into(), Cell::Int(34)]).unwrap();
        frame.push_row(vec!["Bob".into(), Cell::Int(45)]).unwrap();
        frame
    }

    #[test]
    fn test_show_matches_spark_layout() {
        let expected = "\
+-----+---+
| name|age|
+-----+---+
|Alice| 34|
|  Bob| 45|
+-----+---+
";
        assert_eq!(people().show(), expected);
    }

    #[test]
    fn test_show_empty_frame() {
        let frame = Frame::new(["id"]);
        assert_eq!(frame.show(), "+---+\n| id|\n+---+\n+---+\n");
        assert!(frame.is_empty());
    }

    #[test]
    fn test_row_width_checked() {
        let mut frame = Frame::new(["name", "age"]);
        assert_eq!(
            frame.push_row(vec!["Carol".into()]).unwrap_err(),
            FrameError::RowWidth {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(frame.len(), 0);
    }

    #[test]
    fn test_json_lines() {
        let lines = people().to_json_lines();
        assert_eq!(lines[0], r#"{"age":34,"name":"Alice"}"#);
        assert_eq!(lines.len(), 2);
    }
}
