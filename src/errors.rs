/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::fmt;

use thiserror::Error;

use crate::driver::{DriverError, WaitError};

/// Which dropdown a rejected code was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Institution,
    Period,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::Institution => write!(f, "institution"),
            SelectorKind::Period => write!(f, "period"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CrawlerError {
    /// Frame or window not found, ambiguous child window, readiness timeout.
    /// The session is back in its home context when this is returned.
    #[error("navigation error: {0}")]
    Navigation(String),

    #[error("{kind} `{code}` is not offered by the portal form")]
    InvalidSelection { kind: SelectorKind, code: String },

    /// `markup` holds the captured page so callers can diagnose layout changes.
    #[error("malformed report: {reason}")]
    MalformedReport {
        reason: String,
        markup: Option<String>,
    },

    #[error("row {row}: column `{column}` holds non-numeric value `{value}`")]
    DataFormat {
        row: usize,
        column: String,
        value: String,
    },

    #[error("no `{statement}` template for version {version}")]
    TemplateNotFound { statement: String, version: u32 },

    #[error("template error: {0}")]
    Template(String),

    #[error("browser driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlerError {
    pub fn malformed(reason: impl Into<String>, markup: Option<&str>) -> Self {
        CrawlerError::MalformedReport {
            reason: reason.into(),
            markup: markup.map(str::to_string),
        }
    }

    /// Raw page markup captured alongside a `MalformedReport`, if any.
    pub fn markup(&self) -> Option<&str> {
        match self {
            CrawlerError::MalformedReport { markup, .. } => markup.as_deref(),
            _ => None,
        }
    }

    /// Whether re-running the whole query is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlerError::Navigation(_) | CrawlerError::Driver(_))
    }
}

impl From<WaitError> for CrawlerError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::TimedOut { what, waited } => {
                CrawlerError::Navigation(format!("{what} not ready after {waited:?}"))
            }
            WaitError::Cancelled => CrawlerError::Cancelled,
            WaitError::Driver(d) => CrawlerError::Driver(d),
        }
    }
}

pub type Result<T, E = CrawlerError> = std::result::Result<T, E>;
