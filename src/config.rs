/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{CancelToken, Waiter};
use crate::errors::CrawlerError;
use crate::template::{FixedVersion, PeriodSchedule, VersionPolicy};

pub const DEFAULT_PORTAL_BASE: &str = "https://www.osfi-bsif.gc.ca/en/data-forms/financial-data/";
pub const DEFAULT_CATEGORY: &str = "financial-data-banks";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_TEMPLATE_VERSION: u32 = 3;

/// Element ids of the portal's selection form.
#[derive(Debug, Clone)]
pub struct FormIds {
    /// `<iframe>` hosting the form on the portal page.
    pub home_frame: String,
    pub institutions: String,
    pub periods: String,
    pub submit: String,
}

impl Default for FormIds {
    fn default() -> Self {
        Self {
            home_frame: "ctl00_ctl61_g_69670f48_11c6_4626_9f60_e63007ee266c_FINDATIFrame"
                .to_string(),
            institutions: "DTIWebPartManager_gwpDTIBankControl1_DTIBankControl1_institutionTypeCriteria_institutionsDropDownList".to_string(),
            periods: "DTIWebPartManager_gwpDTIBankControl1_DTIBankControl1_dtiReportCriteria_monthlyDatesDropDownList".to_string(),
            submit: "DTIWebPartManager_gwpDTIBankControl1_DTIBankControl1_submitButton"
                .to_string(),
        }
    }
}

/// Where the "As At ..." label lives on the rendered report.
#[derive(Debug, Clone)]
pub struct DateRegion {
    pub selector: String,
    /// Index of the `<p>` inside the region holding the label.
    pub paragraph: usize,
    pub prefix: String,
}

impl Default for DateRegion {
    fn default() -> Self {
        Self {
            selector: "div.maindiv.text-center".to_string(),
            paragraph: 1,
            prefix: "As At".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Upper bound on the post-submit settle wait.
    pub settle: Duration,
    /// Polling window for each of the two report waits (the window, then its
    /// tables). With retries each wait can run to `max_wait(report_timeout)`,
    /// so a missing report costs up to twice that before it is given up.
    pub report_timeout: Duration,
    /// Bound for the home frame to become addressable.
    pub frame_timeout: Duration,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub retries: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            report_timeout: Duration::from_secs(15),
            frame_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(500),
            retries: 1,
        }
    }
}

impl WaitConfig {
    pub fn waiter(&self, timeout: Duration, cancel: &CancelToken) -> Waiter {
        Waiter::new(timeout, self.poll_interval)
            .with_retries(self.retries, self.retry_backoff)
            .with_cancel(cancel.clone())
    }

    /// Effective bound of one wait built from `timeout`, retries included.
    pub fn max_wait(&self, timeout: Duration) -> Duration {
        Waiter::new(timeout, self.poll_interval)
            .with_retries(self.retries, self.retry_backoff)
            .max_wait()
    }
}

#[derive(Debug, Clone)]
pub enum TemplateVersioning {
    Fixed(u32),
    Schedule(PeriodSchedule),
}

impl TemplateVersioning {
    pub fn policy(&self) -> Arc<dyn VersionPolicy> {
        match self {
            TemplateVersioning::Fixed(v) => Arc::new(FixedVersion(*v)),
            TemplateVersioning::Schedule(s) => Arc::new(s.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub portal_base: String,
    /// Path segment picking the institution class, e.g. `financial-data-banks`.
    pub category: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub form: FormIds,
    pub date_region: DateRegion,
    pub template_dir: PathBuf,
    pub versioning: TemplateVersioning,
    pub waits: WaitConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            portal_base: DEFAULT_PORTAL_BASE.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            form: FormIds::default(),
            date_region: DateRegion::default(),
            template_dir: PathBuf::from("templates"),
            versioning: TemplateVersioning::Fixed(DEFAULT_TEMPLATE_VERSION),
            waits: WaitConfig::default(),
        }
    }
}

impl CrawlerConfig {
    pub fn portal_url(&self) -> String {
        format!(
            "{}/{}",
            self.portal_base.trim_end_matches('/'),
            self.category.trim_matches('/')
        )
    }

    /// Defaults overlaid with `FINDAT_*` variables; `.env` is honoured.
    pub fn from_env() -> Result<Self, CrawlerError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrawlerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = CrawlerConfig::default();

        if let Some(v) = lookup("FINDAT_PORTAL_BASE") {
            cfg.portal_base = v;
        }
        if let Some(v) = lookup("FINDAT_CATEGORY") {
            cfg.category = v;
        }
        if let Some(v) = lookup("FINDAT_WEBDRIVER_URL") {
            cfg.webdriver_url = v;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, "FINDAT_HEADLESS")? {
            cfg.headless = v;
        }
        if let Some(v) = lookup("FINDAT_TEMPLATE_DIR") {
            cfg.template_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "FINDAT_TEMPLATE_VERSION")? {
            cfg.versioning = TemplateVersioning::Fixed(v);
        }
        // a schedule wins over a fixed version
        if let Some(v) = lookup("FINDAT_TEMPLATE_SCHEDULE") {
            cfg.versioning = TemplateVersioning::Schedule(
                v.parse::<PeriodSchedule>()
                    .map_err(|e| CrawlerError::Config(format!("FINDAT_TEMPLATE_SCHEDULE: {e}")))?,
            );
        }

        let w = &mut cfg.waits;
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FINDAT_SETTLE_MS")? {
            w.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FINDAT_REPORT_TIMEOUT_MS")? {
            w.report_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FINDAT_FRAME_TIMEOUT_MS")? {
            w.frame_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FINDAT_POLL_MS")? {
            w.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "FINDAT_WAIT_RETRIES")? {
            w.retries = n;
        }

        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, CrawlerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CrawlerError::Config(format!("{key}=`{raw}`: {e}"))),
    }
}
