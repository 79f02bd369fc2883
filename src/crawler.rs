/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::sync::Arc;

use log::{debug, info};
use polars::prelude::DataFrame;
use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::config::CrawlerConfig;
use crate::driver::{Browser, CancelToken};
use crate::errors::CrawlerError;
use crate::frame::df_to_json_records;
use crate::normalize::{self, NormalizedTable, NormalizerColumns, RowErrorPolicy};
use crate::period::Period;
use crate::report::{self, ReportTables};
use crate::session::{Catalog, Navigator};
use crate::template::{StatementType, TemplateRegistry, VersionPolicy};

#[derive(Debug, Clone)]
pub enum Assets {
    Normalized(NormalizedTable),
    Raw(DataFrame),
}

/// One institution's balance sheet for one period.
#[derive(Debug, Clone)]
pub struct BalanceSheetResult {
    pub institution: String,
    pub period: Period,
    /// Label as printed on the report, e.g. `"January 31, 2000"`.
    pub date: String,
    pub as_of: Option<Date>,
    pub assets: Assets,
    /// Always raw; no liabilities template exists.
    pub liabilities: DataFrame,
    pub captured_at: OffsetDateTime,
    pub source_digest: String,
}

impl BalanceSheetResult {
    pub fn to_json(&self) -> Result<Value, CrawlerError> {
        let (assets, rejected, normalized) = match &self.assets {
            Assets::Normalized(t) => (df_to_json_records(&t.to_frame()?)?, json!(t.rejected), true),
            Assets::Raw(df) => (df_to_json_records(df)?, json!([]), false),
        };
        let captured_at = self
            .captured_at
            .format(&Rfc3339)
            .map_err(|e| CrawlerError::Config(format!("timestamp format: {e}")))?;
        Ok(json!({
            "institution": self.institution,
            "period": self.period.code(),
            "date": self.date,
            "as_of": self.as_of.map(|d| d.to_string()),
            "normalized": normalized,
            "assets": assets,
            "rejected": rejected,
            "liabilities": df_to_json_records(&self.liabilities)?,
            "captured_at": captured_at,
            "source_digest": self.source_digest,
        }))
    }
}

/// Query surface over one portal session.
pub struct Crawler<B: Browser> {
    nav: Navigator<B>,
    templates: Arc<TemplateRegistry>,
    versions: Arc<dyn VersionPolicy>,
    columns: NormalizerColumns,
    row_policy: RowErrorPolicy,
}

impl<B: Browser> Crawler<B> {
    pub fn new(
        nav: Navigator<B>,
        templates: Arc<TemplateRegistry>,
        versions: Arc<dyn VersionPolicy>,
    ) -> Self {
        Self {
            nav,
            templates,
            versions,
            columns: NormalizerColumns::default(),
            row_policy: RowErrorPolicy::default(),
        }
    }

    /// Open a session on `browser` and wire in the configured version policy.
    pub fn connect(
        browser: B,
        config: &CrawlerConfig,
        templates: Arc<TemplateRegistry>,
        cancel: CancelToken,
    ) -> Result<Self, CrawlerError> {
        let nav = Navigator::initialize_with_cancel(browser, config, cancel)?;
        Ok(Self::new(nav, templates, config.versioning.policy()))
    }

    pub fn with_columns(mut self, columns: NormalizerColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_row_policy(mut self, policy: RowErrorPolicy) -> Self {
        self.row_policy = policy;
        self
    }

    pub fn navigator(&self) -> &Navigator<B> {
        &self.nav
    }

    pub fn list_institutions(&mut self) -> Result<Catalog, CrawlerError> {
        self.nav.list_institutions()
    }

    /// Periods follow the selected institution on the portal, so `institution`
    /// is selected first when given.
    pub fn list_periods(&mut self, institution: Option<&str>) -> Result<Catalog, CrawlerError> {
        if let Some(code) = institution {
            self.nav.select_institution(code)?;
        }
        self.nav.list_periods()
    }

    pub fn fetch_balance_sheet(
        &mut self,
        institution: &str,
        period: &str,
        normalize: bool,
    ) -> Result<BalanceSheetResult, CrawlerError> {
        let period: Period = period.parse()?;
        let code = period.code();

        // template problems surface before the portal is touched
        let template = if normalize {
            Some(self.templates.for_period(
                StatementType::BalanceSheet,
                period,
                self.versions.as_ref(),
            )?)
        } else {
            None
        };

        self.nav.select_query(institution, &code)?;
        info!("fetching balance sheet for {institution} / {code}");
        self.nav.submit()?;
        let raw = self.nav.capture_report()?;

        let ReportTables {
            assets,
            liabilities,
        } = raw.tables()?;
        let date = raw.require_date()?.to_string();
        let as_of = report::parse_as_of(&date);
        if as_of.is_none() {
            debug!("date label `{date}` did not parse as a calendar date");
        }

        let assets = match template {
            Some(t) => Assets::Normalized(normalize::normalize(
                &assets,
                &t,
                &self.columns,
                self.row_policy,
            )?),
            None => Assets::Raw(assets),
        };

        info!("balance sheet for {institution} / {code} as at {date}");
        Ok(BalanceSheetResult {
            institution: institution.to_string(),
            period,
            date,
            as_of,
            assets,
            liabilities,
            captured_at: OffsetDateTime::now_utc(),
            source_digest: raw.digest(),
        })
    }

    pub fn shutdown(self) -> Result<(), CrawlerError> {
        self.nav.shutdown()
    }
}
