/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use log::{debug, warn};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::errors::CrawlerError;
use crate::template::Template;

/// Leading enumeration such as `3.`, `A)`, `(a)`, `12b.` followed by the name.
static ITEM_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\(?[A-Za-z0-9]+[.)](.*)$")
        .unwrap_or_else(|e| panic!("item name regex: {e}"))
});

/// Output column names, in order.
pub const OUTPUT_COLUMNS: [&str; 7] = [
    "Section",
    "Category",
    "Subcategory",
    "item_name",
    "foreign_currency",
    "total_currency",
    "Subset",
];

/// Names of the raw asset-table columns the normalizer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerColumns {
    pub item_name: String,
    pub foreign_currency: String,
    pub total_currency: String,
}

impl Default for NormalizerColumns {
    fn default() -> Self {
        Self {
            item_name: "Item Name".into(),
            foreign_currency: "Foreign Currency".into(),
            total_currency: "Total Currency".into(),
        }
    }
}

/// What to do with a row whose amounts do not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowErrorPolicy {
    #[default]
    Abort,
    Collect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedLineItem {
    pub section: String,
    pub category: String,
    pub subcategory: String,
    pub item_name: String,
    pub foreign_currency: i64,
    pub total_currency: i64,
    pub subset: String,
}

/// A raw row left out under `RowErrorPolicy::Collect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub row: usize,
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedTable {
    pub items: Vec<NormalizedLineItem>,
    pub rejected: Vec<RejectedRow>,
}

impl NormalizedTable {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_frame(&self) -> Result<DataFrame, CrawlerError> {
        let items = &self.items;
        let df = df!(
            OUTPUT_COLUMNS[0] => items.iter().map(|i| i.section.as_str()).collect::<Vec<_>>(),
            OUTPUT_COLUMNS[1] => items.iter().map(|i| i.category.as_str()).collect::<Vec<_>>(),
            OUTPUT_COLUMNS[2] => items.iter().map(|i| i.subcategory.as_str()).collect::<Vec<_>>(),
            OUTPUT_COLUMNS[3] => items.iter().map(|i| i.item_name.as_str()).collect::<Vec<_>>(),
            OUTPUT_COLUMNS[4] => items.iter().map(|i| i.foreign_currency).collect::<Vec<i64>>(),
            OUTPUT_COLUMNS[5] => items.iter().map(|i| i.total_currency).collect::<Vec<i64>>(),
            OUTPUT_COLUMNS[6] => items.iter().map(|i| i.subset.as_str()).collect::<Vec<_>>()
        )?;
        Ok(df)
    }
}

/// Join raw asset rows to `template` by row position and type the amounts.
///
/// Raw rows without a template row (and template rows without a raw row)
/// are dropped. The input is not modified.
pub fn normalize(
    raw: &DataFrame,
    template: &Template,
    columns: &NormalizerColumns,
    policy: RowErrorPolicy,
) -> Result<NormalizedTable, CrawlerError> {
    let names = string_column(raw, &columns.item_name)?;
    let foreign = string_column(raw, &columns.foreign_currency)?;
    let total = string_column(raw, &columns.total_currency)?;

    let mut out = NormalizedTable::default();
    for row in 0..raw.height() {
        let Some(t) = template.get(row) else {
            continue;
        };

        let amounts = parse_amount(row, &columns.foreign_currency, foreign.get(row)).and_then(
            |f| parse_amount(row, &columns.total_currency, total.get(row)).map(|t| (f, t)),
        );
        let (foreign_currency, total_currency) = match amounts {
            Ok(pair) => pair,
            Err(CrawlerError::DataFormat { row, column, value })
                if policy == RowErrorPolicy::Collect =>
            {
                warn!("row {row}: rejected `{column}` value `{value}`");
                out.rejected.push(RejectedRow { row, column, value });
                continue;
            }
            Err(e) => return Err(e),
        };

        out.items.push(NormalizedLineItem {
            section: t.section.clone(),
            category: t.category.clone(),
            subcategory: t.subcategory.clone(),
            item_name: clean_item_name(names.get(row).unwrap_or_default()),
            foreign_currency,
            total_currency,
            subset: t.subset.clone(),
        });
    }

    debug!(
        "normalized {} of {} raw rows against {} V{} ({} rejected)",
        out.items.len(),
        raw.height(),
        template.statement(),
        template.version(),
        out.rejected.len()
    );
    Ok(out)
}

/// `"3. Cash and deposits"` → `"Cash and deposits"`; unnumbered labels → `""`.
pub fn clean_item_name(raw: &str) -> String {
    ITEM_NAME
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Thousands of dollars as printed (`"1,234"`) → dollars (`1234000`).
pub fn parse_amount(row: usize, column: &str, cell: Option<&str>) -> Result<i64, CrawlerError> {
    let raw = cell.unwrap_or_default();
    let bad = || CrawlerError::DataFormat {
        row,
        column: column.to_string(),
        value: raw.to_string(),
    };
    raw.trim()
        .replace(',', "")
        .parse::<i64>()
        .ok()
        .and_then(|v| v.checked_mul(1000))
        .ok_or_else(bad)
}

fn string_column(df: &DataFrame, name: &str) -> Result<StringChunked, CrawlerError> {
    let col = df.column(name).map_err(|_| {
        CrawlerError::malformed(format!("asset table has no `{name}` column"), None)
    })?;
    let col = col.cast(&DataType::String)?;
    Ok(col.str()?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{StatementType, TemplateRow};

    fn template(rows: &[(usize, &str, &str)]) -> Template {
        let rows = rows
            .iter()
            .map(|(n, category, subset)| TemplateRow {
                row_number: *n,
                section: "Assets".into(),
                category: category.to_string(),
                subcategory: String::new(),
                item: String::new(),
                subset: subset.to_string(),
            })
            .collect();
        Template::new(StatementType::BalanceSheet, 3, rows).unwrap()
    }

    fn raw(rows: &[(&str, &str, &str)]) -> DataFrame {
        df!(
            "Item Name" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "Foreign Currency" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            "Total Currency" => rows.iter().map(|r| r.2).collect::<Vec<_>>()
        )
        .unwrap()
    }

    #[test]
    fn strips_enumeration_from_item_names() {
        assert_eq!(clean_item_name("3. Cash and deposits"), "Cash and deposits");
        assert_eq!(clean_item_name("  b) Treasury bills "), "Treasury bills");
        assert_eq!(clean_item_name("(a) Treasury bills"), "Treasury bills");
        assert_eq!(clean_item_name("Total assets"), "");
    }

    #[test]
    fn amounts_are_scaled_to_dollars() {
        assert_eq!(parse_amount(0, "Total Currency", Some("1234")).unwrap(), 1_234_000);
        assert_eq!(parse_amount(0, "Total Currency", Some(" 1,234 ")).unwrap(), 1_234_000);
        assert_eq!(parse_amount(0, "Total Currency", Some("-5")).unwrap(), -5000);
        assert!(parse_amount(0, "Total Currency", Some(&i64::MAX.to_string())).is_err());
    }

    #[test]
    fn joins_by_position_and_drops_unmatched_rows() {
        let t = template(&[(0, "Cash", "Cash"), (1, "Securities", "Securities")]);
        let df = raw(&[
            ("1. Cash", "10", "1,234"),
            ("2. Securities", "0", "55"),
            ("Total assets", "10", "1,289"),
        ]);
        let out = normalize(&df, &t, &NormalizerColumns::default(), RowErrorPolicy::Abort).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.items[0].item_name, "Cash");
        assert_eq!(out.items[0].total_currency, 1_234_000);
        assert_eq!(out.items[1].category, "Securities");
        assert_eq!(out.items[1].foreign_currency, 0);
    }

    #[test]
    fn frame_has_fixed_columns() {
        let t = template(&[(0, "Cash", "Cash")]);
        let df = raw(&[("1. Cash", "1", "2")]);
        let frame = normalize(&df, &t, &NormalizerColumns::default(), RowErrorPolicy::Abort)
            .unwrap()
            .to_frame()
            .unwrap();
        let names: Vec<String> = frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, OUTPUT_COLUMNS);
        assert_eq!(frame.height(), 1);
    }

    #[test]
    fn normalizing_twice_is_identical() {
        let t = template(&[(0, "Cash", "Cash"), (1, "Securities", "Securities")]);
        let df = raw(&[("1. Cash", "10", "1,234"), ("2. Securities", "0", "55")]);
        let cols = NormalizerColumns::default();
        let a = normalize(&df, &t, &cols, RowErrorPolicy::Abort).unwrap();
        let b = normalize(&df, &t, &cols, RowErrorPolicy::Abort).unwrap();
        assert_eq!(a, b);
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn non_numeric_amount_aborts_with_location() {
        let t = template(&[(0, "Cash", "Cash"), (1, "Securities", "Securities")]);
        let df = raw(&[("1. Cash", "10", "1"), ("2. Securities", "n/a", "55")]);
        let err = normalize(&df, &t, &NormalizerColumns::default(), RowErrorPolicy::Abort).unwrap_err();
        match err {
            CrawlerError::DataFormat { row, column, value } => {
                assert_eq!(row, 1);
                assert_eq!(column, "Foreign Currency");
                assert_eq!(value, "n/a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn collect_policy_reports_rejected_rows() {
        let t = template(&[(0, "Cash", "Cash"), (1, "Securities", "Securities")]);
        let df = raw(&[("1. Cash", "10", ""), ("2. Securities", "0", "55")]);
        let out = normalize(&df, &t, &NormalizerColumns::default(), RowErrorPolicy::Collect).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.items[0].category, "Securities");
        assert_eq!(
            out.rejected,
            vec![RejectedRow {
                row: 0,
                column: "Total Currency".into(),
                value: String::new(),
            }]
        );
    }

    #[test]
    fn missing_source_column_is_malformed() {
        let t = template(&[(0, "Cash", "Cash")]);
        let df = df!("Item Name" => ["1. Cash"]).unwrap();
        let err = normalize(&df, &t, &NormalizerColumns::default(), RowErrorPolicy::Abort).unwrap_err();
        assert!(matches!(err, CrawlerError::MalformedReport { .. }));
    }
}
