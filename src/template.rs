/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use serde::Deserialize;

use crate::errors::CrawlerError;
use crate::period::Period;

/// Financial statements that have a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    BalanceSheet,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance_sheet",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementType {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balance_sheet" | "balance-sheet" => Ok(StatementType::BalanceSheet),
            other => Err(CrawlerError::Config(format!("unknown statement type `{other}`"))),
        }
    }
}

/// Semantic classification of one statement row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateRow {
    pub row_number: usize,
    #[serde(rename = "Section", default)]
    pub section: String,
    #[serde(rename = "Category", default)]
    pub category: String,
    #[serde(rename = "Subcategory", default)]
    pub subcategory: String,
    /// Name fragment as printed on the statement; informational only.
    #[serde(rename = "Item", alias = "Item Name", default)]
    pub item: String,
    #[serde(rename = "Subset", default)]
    pub subset: String,
}

/// Row position → classification, for one statement type and version.
#[derive(Debug, Clone)]
pub struct Template {
    statement: StatementType,
    version: u32,
    rows: BTreeMap<usize, TemplateRow>,
}

impl Template {
    pub fn new(
        statement: StatementType,
        version: u32,
        rows: Vec<TemplateRow>,
    ) -> Result<Self, CrawlerError> {
        let mut map = BTreeMap::new();
        for row in rows {
            let n = row.row_number;
            if map.insert(n, row).is_some() {
                return Err(CrawlerError::Template(format!(
                    "{statement} V{version}: duplicate row_number {n}"
                )));
            }
        }
        Ok(Self {
            statement,
            version,
            rows: map,
        })
    }

    pub fn statement(&self) -> StatementType {
        self.statement
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, row: usize) -> Option<&TemplateRow> {
        self.rows.get(&row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_row(&self) -> Option<usize> {
        self.rows.keys().next_back().copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &TemplateRow> {
        self.rows.values()
    }
}

/// Keyed read access to template sheets.
pub trait TemplateStore: Send + Sync {
    fn load(&self, statement: StatementType, version: u32) -> Result<Template, CrawlerError>;
}

/// Sheets exported as CSV: `<root>/<statement>/V<version>.csv`, header
/// `row_number,Section,Category,Subcategory,Item,Subset`.
#[derive(Debug, Clone)]
pub struct CsvTemplateStore {
    root: PathBuf,
}

impl CsvTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sheet_path(&self, statement: StatementType, version: u32) -> PathBuf {
        self.root
            .join(statement.as_str())
            .join(format!("{}.csv", sheet_name(version)))
    }
}

pub fn sheet_name(version: u32) -> String {
    format!("V{version}")
}

impl TemplateStore for CsvTemplateStore {
    fn load(&self, statement: StatementType, version: u32) -> Result<Template, CrawlerError> {
        let path = self.sheet_path(statement, version);
        if !path.is_file() {
            return Err(CrawlerError::TemplateNotFound {
                statement: statement.to_string(),
                version,
            });
        }
        let rows = read_rows(&path)?;
        info!(
            "loaded {statement} template {} ({} rows) from {}",
            sheet_name(version),
            rows.len(),
            path.display()
        );
        Template::new(statement, version, rows)
    }
}

fn read_rows(path: &Path) -> Result<Vec<TemplateRow>, CrawlerError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CrawlerError::Template(format!("{}: {e}", path.display())))?;
    rdr.deserialize::<TemplateRow>()
        .map(|r| r.map_err(|e| CrawlerError::Template(format!("{}: {e}", path.display()))))
        .collect()
}

/// Process-wide template cache; each (statement, version) is loaded at most once.
pub struct TemplateRegistry {
    store: Box<dyn TemplateStore>,
    cache: Mutex<HashMap<(StatementType, u32), Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new(store: impl TemplateStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, statement: StatementType, version: u32) -> Result<Arc<Template>, CrawlerError> {
        // holding the lock across the load keeps concurrent first calls from loading twice
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(t) = cache.get(&(statement, version)) {
            debug!("template {statement} V{version} served from cache");
            return Ok(Arc::clone(t));
        }
        let template = Arc::new(self.store.load(statement, version)?);
        cache.insert((statement, version), Arc::clone(&template));
        Ok(template)
    }

    /// Resolve the version for `period` through `policy`, then `get` it.
    pub fn for_period(
        &self,
        statement: StatementType,
        period: Period,
        policy: &dyn VersionPolicy,
    ) -> Result<Arc<Template>, CrawlerError> {
        let version = policy.version_for(statement, period)?;
        self.get(statement, version)
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Which template version applies to a reporting period.
pub trait VersionPolicy: Send + Sync {
    fn version_for(&self, statement: StatementType, period: Period) -> Result<u32, CrawlerError>;
}

/// Same version for every period.
#[derive(Debug, Clone, Copy)]
pub struct FixedVersion(pub u32);

impl VersionPolicy for FixedVersion {
    fn version_for(&self, _statement: StatementType, _period: Period) -> Result<u32, CrawlerError> {
        Ok(self.0)
    }
}

/// Versions that take effect from a given period onward.
#[derive(Debug, Clone)]
pub struct PeriodSchedule {
    entries: Vec<(Period, u32)>,
}

impl PeriodSchedule {
    pub fn new(mut entries: Vec<(Period, u32)>) -> Self {
        entries.sort_by_key(|(p, _)| *p);
        Self { entries }
    }

    pub fn entries(&self) -> &[(Period, u32)] {
        &self.entries
    }
}

impl VersionPolicy for PeriodSchedule {
    fn version_for(&self, statement: StatementType, period: Period) -> Result<u32, CrawlerError> {
        self.entries
            .iter()
            .rev()
            .find(|(from, _)| *from <= period)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                CrawlerError::Template(format!(
                    "no {statement} template version covers period {period}"
                ))
            })
    }
}

impl FromStr for PeriodSchedule {
    type Err = CrawlerError;

    /// `"1 - 2000=2, 11 - 2019=3"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (period, version) = part.rsplit_once('=').ok_or_else(|| {
                CrawlerError::Config(format!("expected `<M - YYYY>=<version>`, got `{part}`"))
            })?;
            let period = period
                .parse::<Period>()
                .map_err(|_| CrawlerError::Config(format!("bad period in `{part}`")))?;
            let version = version
                .trim()
                .parse::<u32>()
                .map_err(|_| CrawlerError::Config(format!("bad version in `{part}`")))?;
            entries.push((period, version));
        }
        if entries.is_empty() {
            return Err(CrawlerError::Config("empty template schedule".into()));
        }
        Ok(PeriodSchedule::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHEET: &str = "row_number,Section,Category,Subcategory,Item,Subset
0,Assets,Cash,Deposits,Cash and deposits,Cash
1,Assets,Securities,Government,Treasury bills,Securities
3,Assets,Loans,Residential,Residential mortgages,Loans
";

    fn store_with_v3() -> (tempfile::TempDir, CsvTemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        let sheet_dir = dir.path().join("balance_sheet");
        fs::create_dir_all(&sheet_dir).unwrap();
        fs::write(sheet_dir.join("V3.csv"), SHEET).unwrap();
        let store = CsvTemplateStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn loads_csv_sheet_by_row_number() {
        let (_dir, store) = store_with_v3();
        let t = store.load(StatementType::BalanceSheet, 3).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.max_row(), Some(3));
        assert_eq!(t.get(1).unwrap().category, "Securities");
        assert!(t.get(2).is_none());
    }

    #[test]
    fn missing_version_is_not_found() {
        let (_dir, store) = store_with_v3();
        let err = store.load(StatementType::BalanceSheet, 9).unwrap_err();
        assert!(matches!(
            err,
            CrawlerError::TemplateNotFound { version: 9, .. }
        ));
    }

    #[test]
    fn duplicate_rows_are_rejected() {
        let row = |n| TemplateRow {
            row_number: n,
            section: "Assets".into(),
            category: String::new(),
            subcategory: String::new(),
            item: String::new(),
            subset: String::new(),
        };
        let err = Template::new(StatementType::BalanceSheet, 1, vec![row(0), row(0)]).unwrap_err();
        assert!(matches!(err, CrawlerError::Template(_)));
    }

    struct CountingStore {
        inner: CsvTemplateStore,
        loads: Arc<AtomicUsize>,
    }

    impl TemplateStore for CountingStore {
        fn load(&self, statement: StatementType, version: u32) -> Result<Template, CrawlerError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(statement, version)
        }
    }

    #[test]
    fn registry_loads_each_version_once() {
        let (_dir, inner) = store_with_v3();
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = TemplateRegistry::new(CountingStore {
            inner,
            loads: Arc::clone(&loads),
        });

        let a = registry.get(StatementType::BalanceSheet, 3).unwrap();
        let b = registry.get(StatementType::BalanceSheet, 3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.cached(), 1);

        // failures are not cached
        assert!(registry.get(StatementType::BalanceSheet, 4).is_err());
        assert!(registry.get(StatementType::BalanceSheet, 4).is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn schedule_picks_latest_effective_version() {
        let s: PeriodSchedule = "11 - 2019=3, 1 - 2000=2".parse().unwrap();
        let v = |code: &str| s.version_for(StatementType::BalanceSheet, code.parse().unwrap());
        assert_eq!(v("1 - 2000").unwrap(), 2);
        assert_eq!(v("10 - 2019").unwrap(), 2);
        assert_eq!(v("11 - 2019").unwrap(), 3);
        assert_eq!(v("5 - 2024").unwrap(), 3);
        assert!(v("12 - 1999").is_err());
    }

    #[test]
    fn fixed_version_ignores_period() {
        let p: Period = "1 - 2000".parse().unwrap();
        assert_eq!(FixedVersion(3).version_for(StatementType::BalanceSheet, p).unwrap(), 3);
    }

    #[test]
    fn bad_schedules_are_config_errors() {
        for bad in ["", "1 - 2000", "1 - 2000=x", "Q1=2"] {
            assert!(matches!(
                bad.parse::<PeriodSchedule>(),
                Err(CrawlerError::Config(_))
            ));
        }
    }
}
