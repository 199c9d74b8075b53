use serde_json::{Map, Value};

/// A single untyped cell value as the backend serialises it.
///
/// Numbers arrive as JSON numbers, missing values (NaN/NaT on the backend)
/// arrive as `null`, everything else as strings.
pub type CellValue = Value;

/// One dataset row keyed by column name.
///
/// Key order is not significant; the owning snapshot's column list is.
pub type Row = Map<String, CellValue>;

/// Key the backend adds to every record of a paged editor response.
pub const ROW_INDEX_KEY: &str = "_row_index";

/// Renders a cell for display: `null` becomes an empty string, strings are
/// shown without quotes and integral floats lose their trailing `.0`.
pub fn cell_display(value: &CellValue) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Coerces a cell to a float when it holds a finite number or a numeric
/// string. Anything else is a missing value.
pub fn cell_number(value: &CellValue) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Parses free text typed by a user into a cell value.
///
/// Integers and floats become numbers, `true`/`false` become booleans, an
/// empty string becomes `null`. The backend does the authoritative type
/// conversion; this only picks the most natural JSON encoding.
pub fn cell_from_input(input: &str) -> CellValue {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(input.to_string()),
    }
}

/// Strips backend bookkeeping keys from a record so the row only holds
/// dataset columns.
pub fn row_from_record(mut record: Row) -> Row {
    record.remove(ROW_INDEX_KEY);
    record
}
