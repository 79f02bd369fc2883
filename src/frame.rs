/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use polars::prelude::*;
use serde_json::{Map, Value, json};

use crate::errors::CrawlerError;

/// Row-oriented JSON (`[{col: value, ...}, ...]`) for CLI output.
pub fn df_to_json_records(df: &DataFrame) -> Result<Value, CrawlerError> {
    let columns = df.get_columns();
    let mut out = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut obj = Map::with_capacity(columns.len());
        for col in columns {
            let av = col.get(row_idx)?;
            obj.insert(col.name().to_string(), anyvalue_to_json(av));
        }
        out.push(Value::Object(obj));
    }
    Ok(Value::Array(out))
}

fn anyvalue_to_json(v: AnyValue<'_>) -> Value {
    match v {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),

        AnyValue::String(s) => json!(s),
        AnyValue::StringOwned(s) => json!(s.as_str()),

        AnyValue::Int8(x) => json!(x),
        AnyValue::Int16(x) => json!(x),
        AnyValue::Int32(x) => json!(x),
        AnyValue::Int64(x) => json!(x),

        AnyValue::UInt8(x) => json!(x),
        AnyValue::UInt16(x) => json!(x),
        AnyValue::UInt32(x) => json!(x),
        AnyValue::UInt64(x) => json!(x),

        AnyValue::Float32(x) => json!(x),
        AnyValue::Float64(x) => json!(x),

        // dates/structs are not produced here; keep them readable
        _ => json!(format!("{v}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_nulls_and_ints_keep_their_json_types() {
        let df = df!(
            "Item Name" => [Some("1. Cash"), None],
            "total_currency" => [1_234_000i64, 55_000]
        )
        .unwrap();
        let v = df_to_json_records(&df).unwrap();
        assert_eq!(
            v,
            json!([
                {"Item Name": "1. Cash", "total_currency": 1_234_000},
                {"Item Name": null, "total_currency": 55_000}
            ])
        );
    }
}
