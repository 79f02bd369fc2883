/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::collections::HashSet;

use log::warn;
use serde::Serialize;

use crate::driver::SelectOption;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub code: String,
    pub label: String,
}

/// Snapshot of one dropdown's options, in form order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Empty values (placeholder options such as "-- Select --") are skipped;
    /// a repeated code keeps its first label.
    pub fn from_options(options: Vec<SelectOption>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(options.len());
        for opt in options {
            let code = opt.value.trim().to_string();
            if code.is_empty() {
                continue;
            }
            if !seen.insert(code.clone()) {
                warn!("duplicate option `{code}` ({}) ignored", opt.text);
                continue;
            }
            entries.push(CatalogEntry {
                code,
                label: opt.text,
            });
        }
        Self { entries }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.label.as_str())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.code.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(value: &str, text: &str) -> SelectOption {
        SelectOption {
            value: value.into(),
            text: text.into(),
        }
    }

    #[test]
    fn keeps_form_order_and_first_duplicate() {
        let c = Catalog::from_options(vec![
            opt("Z005", "Bank of Montreal"),
            opt("AW", "Bridgewater Bank"),
            opt("Z005", "BMO (dup)"),
        ]);
        assert_eq!(c.codes().collect::<Vec<_>>(), vec!["Z005", "AW"]);
        assert_eq!(c.label("Z005"), Some("Bank of Montreal"));
    }

    #[test]
    fn skips_placeholder_options() {
        let c = Catalog::from_options(vec![opt("", "-- Select --"), opt("1 - 2000", "January 2000")]);
        assert_eq!(c.len(), 1);
        assert!(c.contains("1 - 2000"));
        assert!(!c.contains(""));
    }
}
