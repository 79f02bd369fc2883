/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

//! Balance-sheet retrieval from the OSFI financial data portal.
//!
//! A [`session::Navigator`] drives one browser session through the portal's
//! selection form; [`crawler::Crawler`] turns a `(institution, period)` query
//! into a [`crawler::BalanceSheetResult`], normalizing the assets table against
//! a versioned [`template::Template`].

pub mod config;
pub mod crawler;
pub mod driver;
pub mod errors;
pub mod frame;
pub mod normalize;
pub mod period;
pub mod pool;
pub mod report;
pub mod session;
pub mod template;


pub use config::CrawlerConfig;
pub use crawler::{Assets, BalanceSheetResult, Crawler};
pub use errors::{CrawlerError, Result};
pub use period::Period;
