use std::collections::BTreeMap;

use serde_json::Value;

/// One flattened record: dotted field path to scalar leaf.
///
/// Values are always scalar (`Null`, `Bool`, `Number` or `String`); nested
/// structure is encoded in the key. `Null` stands for an explicitly absent
/// leaf so that columns stay stable across rows.
pub type FlatRow = BTreeMap<String, Value>;

pub const JOIN_DELIMITER: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// Scalar sequences collapse into one delimiter-joined string.
    Join,
    /// Every element lands under `prefix.<index>`.
    IndexExpand,
    /// Join for all-scalar sequences, index expansion otherwise.
    Auto,
}

pub fn flatten_record(record: &Value) -> FlatRow {
    flatten_with_mode(record, SequenceMode::Auto)
}

pub fn flatten_with_mode(record: &Value, mode: SequenceMode) -> FlatRow {
    let mut out = FlatRow::new();
    flatten_into("", record, mode, &mut out);
    out
}

pub fn flatten_into(prefix: &str, node: &Value, mode: SequenceMode, out: &mut FlatRow) {
    match node {
        Value::Null => {
            out.insert(leaf_key(prefix), Value::Null);
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            out.insert(leaf_key(prefix), node.clone());
        }
        Value::Array(items) => flatten_sequence(prefix, items, mode, out),
        Value::Object(map) => {
            if map.is_empty() {
                out.insert(leaf_key(prefix), Value::Null);
                return;
            }
            for (key, value) in map {
                flatten_into(&join_key(prefix, key), value, mode, out);
            }
        }
    }
}

fn flatten_sequence(prefix: &str, items: &[Value], mode: SequenceMode, out: &mut FlatRow) {
    if items.is_empty() {
        out.insert(leaf_key(prefix), Value::Null);
        return;
    }
    let all_scalar = items.iter().all(is_scalar);
    let join = match mode {
        SequenceMode::Join => true,
        SequenceMode::IndexExpand => false,
        SequenceMode::Auto => all_scalar,
    };
    if join {
        let joined = items
            .iter()
            .map(scalar_repr)
            .collect::<Vec<_>>()
            .join(JOIN_DELIMITER);
        out.insert(leaf_key(prefix), Value::String(joined));
        return;
    }
    for (index, item) in items.iter().enumerate() {
        flatten_into(&join_key(prefix, &index.to_string()), item, mode, out);
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Best-effort string form of a sequence element. Structured elements inside
/// a joined sequence degrade to compact JSON rather than failing.
fn scalar_repr(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn leaf_key(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}
