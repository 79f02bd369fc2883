/*
SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza
*/

extern crate findat;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::{Value, json};

use findat::crawler::Crawler;
use findat::driver::{CancelToken, WebDriverClient};
use findat::pool::{BulkFetcher, FetchJob};
use findat::session::Catalog;
use findat::template::{CsvTemplateStore, TemplateRegistry};
use findat::{CrawlerConfig, CrawlerError};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// WebDriver endpoint (chromedriver, geckodriver, ...)
    #[arg(long, global = true, env = "FINDAT_WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    /// Directory holding `<statement>/V<version>.csv` template sheets
    #[arg(long, global = true, env = "FINDAT_TEMPLATE_DIR")]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List institutions offered by the portal
    Institutions,

    /// List reporting periods, optionally for one institution
    Periods {
        #[arg(long)]
        institution: Option<String>,
    },

    /// Fetch one balance sheet
    Fetch {
        #[arg(long)]
        institution: String,

        /// Period code, e.g. "1 - 2000"
        #[arg(long)]
        period: String,

        /// Skip template normalization of the assets table
        #[arg(long)]
        raw: bool,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Fetch every institution × period combination
    Bulk {
        #[arg(long, value_delimiter = ',', required = true)]
        institutions: Vec<String>,

        #[arg(long, value_delimiter = ',', required = true)]
        periods: Vec<String>,

        #[arg(long, default_value_t = 2)]
        workers: usize,

        #[arg(long)]
        raw: bool,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let mut config = CrawlerConfig::from_env().context("loading configuration")?;
    if let Some(url) = args.webdriver_url.clone() {
        config.webdriver_url = url;
    }
    if let Some(dir) = args.templates.clone() {
        config.template_dir = dir;
    }
    if args.headed {
        config.headless = false;
    }

    let templates = Arc::new(TemplateRegistry::new(CsvTemplateStore::new(
        config.template_dir.clone(),
    )));

    match args.command {
        Command::Institutions => {
            let mut crawler = open(&config, &templates, CancelToken::new())?;
            let catalog = crawler.list_institutions();
            finish(crawler);
            print_catalog(&catalog?)?;
        }
        Command::Periods { institution } => {
            let mut crawler = open(&config, &templates, CancelToken::new())?;
            let catalog = crawler.list_periods(institution.as_deref());
            finish(crawler);
            print_catalog(&catalog?)?;
        }
        Command::Fetch {
            institution,
            period,
            raw,
            out,
        } => {
            let mut crawler = open(&config, &templates, CancelToken::new())?;
            let result = crawler.fetch_balance_sheet(&institution, &period, !raw);
            finish(crawler);
            let result = result.with_context(|| format!("fetching {institution} / {period}"))?;
            write_json(&result.to_json()?, out)?;
        }
        Command::Bulk {
            institutions,
            periods,
            workers,
            raw,
            out,
        } => {
            let jobs = FetchJob::grid(&institutions, &periods);
            let factory = |id: usize| -> Result<Crawler<WebDriverClient>, CrawlerError> {
                info!("worker {id}: opening session");
                let browser = WebDriverClient::connect(&config.webdriver_url, config.headless)?;
                Crawler::connect(browser, &config, Arc::clone(&templates), CancelToken::new())
            };
            let outcomes = BulkFetcher::new(factory, workers).normalize(!raw).run(jobs);

            let mut records = Vec::with_capacity(outcomes.len());
            let mut failed = 0;
            for o in outcomes {
                let body = match o.result.and_then(|r| r.to_json()) {
                    Ok(v) => json!({ "ok": v }),
                    Err(e) => {
                        failed += 1;
                        error!("{} / {}: {e}", o.job.institution, o.job.period);
                        json!({ "error": e.to_string() })
                    }
                };
                records.push(json!({
                    "institution": o.job.institution,
                    "period": o.job.period,
                    "result": body,
                }));
            }
            info!("bulk fetch done: {} ok, {failed} failed", records.len() - failed);
            write_json(&Value::Array(records), out)?;
        }
    }
    Ok(())
}

fn open(
    config: &CrawlerConfig,
    templates: &Arc<TemplateRegistry>,
    cancel: CancelToken,
) -> Result<Crawler<WebDriverClient>> {
    let browser = WebDriverClient::connect(&config.webdriver_url, config.headless)
        .with_context(|| format!("connecting to WebDriver at {}", config.webdriver_url))?;
    Crawler::connect(browser, config, Arc::clone(templates), cancel).context("opening the portal")
}

fn finish(crawler: Crawler<WebDriverClient>) {
    if let Err(e) = crawler.shutdown() {
        error!("session shutdown failed: {e}");
    }
}

fn print_catalog(catalog: &Catalog) -> Result<()> {
    write_json(&serde_json::to_value(catalog)?, None)
}

fn write_json(value: &Value, out: Option<PathBuf>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}
