/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::fmt;
use std::str::FromStr;

use crate::errors::{CrawlerError, SelectorKind};

/// A monthly reporting period as the portal encodes it: `"M - YYYY"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    // field order gives chronological Ord
    pub year: i32,
    pub month: u8,
}

impl Period {
    pub fn new(month: u8, year: i32) -> Result<Self, CrawlerError> {
        if !(1..=12).contains(&month) {
            return Err(CrawlerError::InvalidSelection {
                kind: SelectorKind::Period,
                code: format!("{month} - {year}"),
            });
        }
        Ok(Period { year, month })
    }

    /// The dropdown value for this period.
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.month, self.year)
    }
}

impl FromStr for Period {
    type Err = CrawlerError;

    /// Accepts `"1 - 2000"`; surrounding whitespace around the dash is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CrawlerError::InvalidSelection {
            kind: SelectorKind::Period,
            code: s.to_string(),
        };
        let (m, y) = s.split_once('-').ok_or_else(invalid)?;
        let month = m.trim().parse::<u8>().map_err(|_| invalid())?;
        let year = y.trim().parse::<i32>().map_err(|_| invalid())?;
        if y.trim().len() != 4 {
            return Err(invalid());
        }
        Period::new(month, year).map_err(|_| invalid())
    }
}
