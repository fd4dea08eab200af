use serde_json::Value;

use crate::error::MatchError;

/// Reference to a column of a [`GpsTrack`], by position or by header name.
#[derive(Clone, Debug)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ColumnRef {
    fn from(idx: usize) -> Self {
        ColumnRef::Index(idx)
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

/// Columns the engine needs from the input; everything else is passed
/// through to the points summary untouched.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub datetime: ColumnRef,
    pub latitude: ColumnRef,
    pub longitude: ColumnRef,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            datetime: ColumnRef::Index(0),
            latitude: ColumnRef::Name("Latitude".into()),
            longitude: ColumnRef::Name("Longitude".into()),
        }
    }
}

/// The tabular GPS input: named columns over rows of opaque values.
///
/// The engine only interprets the three columns named by a [`ColumnSpec`];
/// all values survive as-is for the `gps_`-prefixed passthrough in the
/// points summary.
#[derive(Clone, Debug)]
pub struct GpsTrack {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl GpsTrack {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row(&self, index: usize) -> &[Value] {
        &self.rows[index]
    }

    pub fn resolve(&self, column: &ColumnRef) -> Result<usize, MatchError> {
        match column {
            ColumnRef::Index(idx) if *idx < self.columns.len() => Ok(*idx),
            ColumnRef::Index(idx) => Err(MatchError::Input(format!(
                "column index {idx} out of range ({} columns)",
                self.columns.len()
            ))),
            ColumnRef::Name(name) => self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| MatchError::Input(format!("no column named {name:?}"))),
        }
    }

    /// Numeric view of a cell; strings holding numbers are coerced.
    pub fn number_at(&self, row: usize, col: usize) -> Result<f64, MatchError> {
        let value = &self.rows[row][col];
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| MatchError::Input(format!("non-finite number at row {row}"))),
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
                MatchError::Input(format!("cannot coerce {s:?} to a number (row {row})"))
            }),
            other => Err(MatchError::Input(format!(
                "cannot coerce {other} to a number (row {row})"
            ))),
        }
    }

    /// Text view of a cell.
    pub fn text_at(&self, row: usize, col: usize) -> String {
        match &self.rows[row][col] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track() -> GpsTrack {
        GpsTrack::new(
            vec!["Time".into(), "Latitude".into(), "Longitude".into()],
            vec![
                vec![json!("2016-03-01 20:59:46"), json!(45.09), json!("-64.36")],
                vec![json!("2016-03-01 20:59:49"), json!(45.10), json!("-64.37")],
            ],
        )
    }

    #[test]
    fn resolves_by_name_and_index() {
        let t = track();
        assert_eq!(t.resolve(&ColumnRef::Index(0)).unwrap(), 0);
        assert_eq!(t.resolve(&"Longitude".into()).unwrap(), 2);
        assert!(t.resolve(&ColumnRef::Index(9)).is_err());
        assert!(t.resolve(&"Altitude".into()).is_err());
    }

    #[test]
    fn coerces_numbers_from_strings() {
        let t = track();
        assert_eq!(t.number_at(0, 1).unwrap(), 45.09);
        assert_eq!(t.number_at(0, 2).unwrap(), -64.36);
        assert!(t.number_at(0, 0).is_err());
    }
}
