/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::collections::HashMap;

use log::debug;
use polars::prelude::{Column, DataFrame};
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use time::Date;
use time::format_description;

use crate::config::DateRegion;
use crate::errors::CrawlerError;

/// What one submission produced: the report page markup and its date label.
#[derive(Debug, Clone)]
pub struct RawExtractionResult {
    pub markup: String,
    pub date: Option<String>,
}

/// The two statement tables of a balance-sheet report, untyped.
#[derive(Debug, Clone)]
pub struct ReportTables {
    pub assets: DataFrame,
    pub liabilities: DataFrame,
}

impl RawExtractionResult {
    pub fn new(markup: String, date: Option<String>) -> Self {
        Self { markup, date }
    }

    /// Exactly two tables are expected: assets first, then liabilities and equity.
    pub fn tables(&self) -> Result<ReportTables, CrawlerError> {
        let mut tables = parse_tables(&self.markup)?;
        if tables.len() != 2 {
            return Err(CrawlerError::malformed(
                format!("expected 2 tables, found {}", tables.len()),
                Some(&self.markup),
            ));
        }
        let liabilities = tables.pop().unwrap_or_default();
        let assets = tables.pop().unwrap_or_default();
        Ok(ReportTables {
            assets,
            liabilities,
        })
    }

    /// The date label, or `MalformedReport` when the date region was absent.
    pub fn require_date(&self) -> Result<&str, CrawlerError> {
        self.date
            .as_deref()
            .ok_or_else(|| CrawlerError::malformed("report date region absent", Some(&self.markup)))
    }

    pub fn digest(&self) -> String {
        markup_digest(&self.markup)
    }
}

/// Short sha256 prefix identifying a captured page.
pub fn markup_digest(markup: &str) -> String {
    let mut h = Sha256::new();
    h.update(markup.as_bytes());
    hex::encode(&h.finalize()[..8])
}

/// Cheap readiness probe for a rendered report.
pub fn has_table(markup: &str) -> bool {
    markup.to_ascii_lowercase().contains("<table")
}

/// Parse every `<table>` with at least one row into a frame of string cells.
///
/// Header names come from the last leading row made only of `<th>` cells (or
/// from `<thead>`); without one, columns are named by position.
pub fn parse_tables(markup: &str) -> Result<Vec<DataFrame>, CrawlerError> {
    let doc = Html::parse_document(markup);
    let sel_table = selector("table")?;
    let sel_tr = selector("tr")?;

    let mut out = Vec::new();
    for table in doc.select(&sel_table) {
        // rows of nested tables belong to those tables
        let rows: Vec<ElementRef> = table
            .select(&sel_tr)
            .filter(|tr| owning_table(*tr).map(|t| t.id()) == Some(table.id()))
            .collect();
        if rows.is_empty() {
            continue;
        }

        let mut header: Option<Vec<String>> = None;
        let mut body: Vec<Vec<String>> = Vec::new();
        for tr in rows {
            let (cells, all_th) = row_cells(tr);
            if cells.is_empty() {
                continue;
            }
            if body.is_empty() && (all_th || in_thead(tr)) {
                header = Some(cells);
                continue;
            }
            body.push(cells);
        }

        out.push(build_frame(header, body)?);
    }
    debug!("parsed {} tables from report", out.len());
    Ok(out)
}

/// Text of the configured date region, minus its "As At" prefix.
pub fn extract_date(markup: &str, region: &DateRegion) -> Option<String> {
    let doc = Html::parse_document(markup);
    let sel_region = Selector::parse(&region.selector).ok()?;
    let sel_p = Selector::parse("p").ok()?;
    let div = doc.select(&sel_region).next()?;
    let p = div.select(&sel_p).nth(region.paragraph)?;
    let text = norm_text(&p.text().collect::<String>());
    let text = strip_prefix_ci(&text, &region.prefix).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// `"January 31, 2000"` → 2000-01-31. Labels in other shapes yield `None`.
pub fn parse_as_of(label: &str) -> Option<Date> {
    let fmt = format_description::parse(
        "[month repr:long case_sensitive:false] [day padding:none], [year]",
    )
    .ok()?;
    Date::parse(label.trim(), fmt.as_slice()).ok()
}

/* =================== helpers =================== */

fn selector(css: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(css).map_err(|e| CrawlerError::malformed(format!("selector `{css}`: {e:?}"), None))
}

fn owning_table(el: ElementRef) -> Option<ElementRef> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "table")
}

fn in_thead(tr: ElementRef) -> bool {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| a.value().name() != "table")
        .any(|a| a.value().name() == "thead")
}

/// Direct `td`/`th` children, `colspan` expanded; also reports whether all were `th`.
fn row_cells(tr: ElementRef) -> (Vec<String>, bool) {
    let mut cells = Vec::new();
    let mut all_th = true;
    for cell in tr.children().filter_map(ElementRef::wrap) {
        let name = cell.value().name();
        if name != "td" && name != "th" {
            continue;
        }
        all_th &= name == "th";
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);
        let text = norm_text(&cell.text().collect::<String>());
        for _ in 0..span {
            cells.push(text.clone());
        }
    }
    let header_like = all_th && !cells.is_empty();
    (cells, header_like)
}

fn build_frame(header: Option<Vec<String>>, body: Vec<Vec<String>>) -> Result<DataFrame, CrawlerError> {
    let width = body
        .iter()
        .map(Vec::len)
        .chain(header.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let names = unique_names(
        (0..width)
            .map(|i| {
                header
                    .as_ref()
                    .and_then(|h| h.get(i))
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| i.to_string())
            })
            .collect(),
    );

    let columns: Vec<Column> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let values: Vec<Option<String>> = body.iter().map(|row| row.get(i).cloned()).collect();
            Column::new(name.into(), values)
        })
        .collect();

    Ok(DataFrame::new(columns)?)
}

/// Repeated header names get `.1`, `.2`, ... suffixes.
fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|n| {
            let count = seen.entry(n.clone()).or_insert(0);
            let out = if *count == 0 { n } else { format!("{n}.{count}") };
            *count += 1;
            out
        })
        .collect()
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> &'a str {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &s[prefix.len()..],
        _ => s,
    }
}

/// Collapse whitespace & trim
pub fn norm_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<html><body>
      <div class="maindiv text-center">
        <p>Balance Sheet (M4)</p>
        <p>As At   January 31, 2000</p>
      </div>
      <table id="assets">
        <tr><th>Item Name</th><th>Foreign Currency</th><th>Total Currency</th></tr>
        <tr><td>1. Cash</td><td>10</td><td>1,234</td></tr>
        <tr><td>2. Securities</td><td>0</td><td>55</td></tr>
      </table>
      <table id="liabilities">
        <thead><tr><th>Item Name</th><th>Total</th></tr></thead>
        <tbody><tr><td>Deposits</td><td>900</td></tr></tbody>
      </table>
    </body></html>"#;

    #[test]
    fn splits_assets_and_liabilities() {
        let raw = RawExtractionResult::new(REPORT.to_string(), None);
        let t = raw.tables().unwrap();
        assert_eq!(t.assets.height(), 2);
        assert_eq!(t.assets.width(), 3);
        assert_eq!(t.liabilities.height(), 1);
        let names: Vec<String> = t
            .assets
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec!["Item Name", "Foreign Currency", "Total Currency"]);
        let total = t.assets.column("Total Currency").unwrap().str().unwrap().get(0);
        assert_eq!(total, Some("1,234"));
    }

    #[test]
    fn one_table_is_malformed_with_markup() {
        let markup = "<table><tr><td>a</td></tr></table>";
        let err = RawExtractionResult::new(markup.to_string(), None)
            .tables()
            .unwrap_err();
        assert!(matches!(err, CrawlerError::MalformedReport { .. }));
        assert_eq!(err.markup(), Some(markup));
    }

    #[test]
    fn three_tables_are_malformed() {
        let t = "<table><tr><td>a</td></tr></table>";
        let markup = format!("{t}{t}{t}");
        assert!(RawExtractionResult::new(markup, None).tables().is_err());
    }

    #[test]
    fn nested_table_rows_stay_with_inner_table() {
        let markup = r#"<table><tr><td>outer</td><td>
            <table><tr><td>inner1</td></tr><tr><td>inner2</td></tr></table>
        </td></tr></table>"#;
        let tables = parse_tables(markup).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].height(), 1);
        assert_eq!(tables[1].height(), 2);
    }

    #[test]
    fn headerless_tables_get_positional_names_and_padding() {
        let markup = "<table><tr><td>a</td><td colspan=\"2\">b</td></tr><tr><td>c</td></tr></table>";
        let df = parse_tables(markup).unwrap().remove(0);
        assert_eq!(df.width(), 3);
        let c2 = df.column("2").unwrap().str().unwrap();
        assert_eq!(c2.get(0), Some("b"));
        assert_eq!(c2.get(1), None);
    }

    #[test]
    fn duplicate_headers_are_suffixed() {
        assert_eq!(
            unique_names(vec!["A".into(), "B".into(), "A".into(), "A".into()]),
            vec!["A", "B", "A.1", "A.2"]
        );
    }

    #[test]
    fn extracts_date_label() {
        let date = extract_date(REPORT, &DateRegion::default()).unwrap();
        assert_eq!(date, "January 31, 2000");
        let d = parse_as_of(&date).unwrap();
        assert_eq!((d.year(), u8::from(d.month()), d.day()), (2000, 1, 31));
    }

    #[test]
    fn missing_date_region_is_none() {
        assert_eq!(extract_date("<table></table>", &DateRegion::default()), None);
        let raw = RawExtractionResult::new("<p>x</p>".into(), None);
        assert!(matches!(
            raw.require_date(),
            Err(CrawlerError::MalformedReport { .. })
        ));
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(markup_digest("abc"), markup_digest("abc"));
        assert_ne!(markup_digest("abc"), markup_digest("abd"));
        assert_eq!(markup_digest("abc").len(), 16);
    }

    #[test]
    fn readiness_probe_is_case_insensitive() {
        assert!(has_table("<TABLE></TABLE>"));
        assert!(!has_table("<div>loading</div>"));
    }
}
