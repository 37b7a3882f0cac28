use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use serde_json::Value;

use crate::error::TcgaError;
use crate::flatten::FlatRow;

/// Scalar rendering at the assembly boundary. Conflicting value types for
/// the same field path across records all collapse to their string form so
/// a column stays homogeneous.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Accumulates flattened rows into a wide table: the column set is the union
/// of keys across rows in first-seen order, rows keep insertion order, and
/// rows identical across every column collapse to one.
#[derive(Debug)]
pub struct TableBuilder {
    columns: Vec<String>,
    known: HashSet<String>,
    rows: Vec<BTreeMap<String, String>>,
    fingerprints: HashSet<String>,
}

impl TableBuilder {
    pub fn new(key_columns: &[&str]) -> Self {
        let mut builder = Self {
            columns: Vec::new(),
            known: HashSet::new(),
            rows: Vec::new(),
            fingerprints: HashSet::new(),
        };
        for column in key_columns {
            builder.add_column(column);
        }
        builder
    }

    fn add_column(&mut self, column: &str) {
        if self.known.insert(column.to_string()) {
            self.columns.push(column.to_string());
        }
    }

    pub fn push_row(&mut self, row: &FlatRow) {
        self.push_row_with(row, &[]);
    }

    /// Push a flattened row plus extra assembled columns (e.g. a derived
    /// `patient` column or a local download path).
    pub fn push_row_with(&mut self, row: &FlatRow, extra: &[(&str, String)]) {
        let mut assembled = BTreeMap::new();
        for (key, value) in row {
            assembled.insert(key.clone(), scalar_to_string(value));
        }
        for (key, value) in extra {
            assembled.insert((*key).to_string(), value.clone());
        }
        self.push_string_row(assembled);
    }

    pub fn push_string_row(&mut self, assembled: BTreeMap<String, String>) {
        // Empty values are identity-irrelevant: a row missing a column is the
        // same row as one carrying the explicit empty marker there.
        let fingerprint = assembled
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{key}\u{1}{value}\u{2}"))
            .collect::<String>();
        if !self.fingerprints.insert(fingerprint) {
            return;
        }
        for key in assembled.keys() {
            self.add_column(key);
        }
        self.rows.push(assembled);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn finish(self) -> Table {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        Table {
            columns: self.columns,
            rows,
        }
    }
}

/// An assembled wide table. Never mutated after `TableBuilder::finish`.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Values of one column in row order; `None` when the column is absent.
    pub fn column_values(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[index].as_str()).collect())
    }

    /// First present column among the candidates, for fields whose exact
    /// path varies across projects.
    pub fn first_column<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .find(|name| self.column_index(name).is_some())
            .copied()
    }

    /// Rows as column-name maps, for re-assembly into aggregate tables.
    pub fn iter_maps(&self) -> impl Iterator<Item = BTreeMap<String, String>> + '_ {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TcgaError> {
        self.write_delimited(writer, b',')
    }

    pub fn write_tsv<W: Write>(&self, writer: W) -> Result<(), TcgaError> {
        self.write_delimited(writer, b'\t')
    }

    fn write_delimited<W: Write>(&self, writer: W, delimiter: u8) -> Result<(), TcgaError> {
        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);
        csv_writer
            .write_record(&self.columns)
            .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
        for row in &self.rows {
            csv_writer
                .write_record(row)
                .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
        }
        csv_writer
            .flush()
            .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::flatten::flatten_record;

    use super::*;

    #[test]
    fn column_union_is_monotonic() {
        let mut builder = TableBuilder::new(&["case_id"]);
        builder.push_row(&flatten_record(&json!({"case_id": "C1", "stage": "II"})));
        let columns_before = vec!["case_id".to_string(), "stage".to_string()];

        builder.push_row(&flatten_record(&json!({
            "case_id": "C2",
            "stage": "III",
            "grade": "G2",
        })));
        let table = builder.finish();

        assert_eq!(table.columns.len(), columns_before.len() + 1);
        assert_eq!(table.columns[..2], columns_before[..]);
        // The earlier row gains only the empty marker in the new column.
        assert_eq!(table.rows[0], vec!["C1", "II", ""]);
        assert_eq!(table.rows[1], vec!["C2", "III", "G2"]);
    }

    #[test]
    fn identical_rows_collapse() {
        let mut builder = TableBuilder::new(&["case_id"]);
        let row = flatten_record(&json!({"case_id": "C1", "stage": "II"}));
        builder.push_row(&row);
        builder.push_row(&row);
        let table = builder.finish();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn missing_value_and_empty_marker_are_the_same_row() {
        let mut builder = TableBuilder::new(&[]);
        builder.push_row(&flatten_record(&json!({"case_id": "C1", "stage": null})));
        builder.push_row(&flatten_record(&json!({"case_id": "C1"})));
        let table = builder.finish();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn key_columns_survive_an_empty_table() {
        let table = TableBuilder::new(&["case_id", "sample_id", "group"]).finish();
        assert_eq!(table.columns, vec!["case_id", "sample_id", "group"]);
        assert!(table.is_empty());
    }

    #[test]
    fn mixed_types_coerce_to_string() {
        let mut builder = TableBuilder::new(&[]);
        builder.push_row(&flatten_record(&json!({"case_id": "C1", "days": 800})));
        builder.push_row(&flatten_record(&json!({"case_id": "C2", "days": "900"})));
        let table = builder.finish();
        let days = table.column_values("days").unwrap();
        assert_eq!(days, vec!["800", "900"]);
    }

    #[test]
    fn csv_round_trip() {
        let mut builder = TableBuilder::new(&["case_id"]);
        builder.push_row(&flatten_record(&json!({"case_id": "C1", "note": "a,b"})));
        let table = builder.finish();

        let mut buffer = Vec::new();
        table.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "case_id,note\nC1,\"a,b\"\n");
    }

    #[test]
    fn row_order_is_insertion_order() {
        let mut builder = TableBuilder::new(&["case_id"]);
        builder.push_row(&flatten_record(&json!({"case_id": "Z"})));
        builder.push_row(&flatten_record(&json!({"case_id": "A"})));
        let table = builder.finish();
        assert_eq!(table.column_values("case_id").unwrap(), vec!["Z", "A"]);
    }
}
