/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::crawler::{BalanceSheetResult, Crawler};
use crate::driver::{Browser, CancelToken};
use crate::errors::CrawlerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchJob {
    pub institution: String,
    pub period: String,
}

impl FetchJob {
    pub fn new(institution: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            institution: institution.into(),
            period: period.into(),
        }
    }

    /// Every institution crossed with every period.
    pub fn grid(institutions: &[String], periods: &[String]) -> Vec<FetchJob> {
        institutions
            .iter()
            .flat_map(|i| periods.iter().map(move |p| FetchJob::new(i, p)))
            .collect()
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub job: FetchJob,
    pub result: Result<BalanceSheetResult, CrawlerError>,
}

type Done = (usize, Result<BalanceSheetResult, CrawlerError>);

/// Runs queries across several sessions, one per worker thread.
///
/// Each worker builds its own `Crawler` through `factory` (called with the
/// worker index) and pulls jobs from a shared queue until it is empty.
pub struct BulkFetcher<F> {
    factory: F,
    workers: usize,
    normalize: bool,
    cancel: CancelToken,
}

impl<F> BulkFetcher<F> {
    pub fn new(factory: F, workers: usize) -> Self {
        Self {
            factory,
            workers: workers.max(1),
            normalize: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Jobs not yet started when the token fires come back as `Cancelled`.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Outcomes are returned in job order.
    pub fn run<B>(&self, jobs: Vec<FetchJob>) -> Vec<FetchOutcome>
    where
        B: Browser,
        F: Fn(usize) -> Result<Crawler<B>, CrawlerError> + Sync,
    {
        let total = jobs.len();
        let workers = self.workers.min(total.max(1));
        info!("bulk fetch: {total} jobs on {workers} workers");

        let (job_tx, job_rx) = channel::unbounded::<(usize, FetchJob)>();
        let (done_tx, done_rx) = channel::unbounded::<Done>();
        for (i, job) in jobs.iter().enumerate() {
            // receiver is alive for the whole function
            let _ = job_tx.send((i, job.clone()));
        }
        drop(job_tx);

        let scoped = crossbeam::scope(|s| {
            for id in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                s.spawn(move |_| self.work::<B>(id, job_rx, done_tx));
            }
        });
        drop(done_tx);
        if scoped.is_err() {
            error!("a bulk worker panicked; its unfinished jobs are reported as failed");
        }

        let mut results: Vec<Option<Result<BalanceSheetResult, CrawlerError>>> =
            (0..total).map(|_| None).collect();
        for (i, r) in done_rx.iter() {
            results[i] = Some(r);
        }

        jobs.into_iter()
            .zip(results)
            .map(|(job, result)| FetchOutcome {
                result: result.unwrap_or_else(|| Err(self.unfinished())),
                job,
            })
            .collect()
    }

    fn work<B>(&self, id: usize, jobs: Receiver<(usize, FetchJob)>, done: Sender<Done>)
    where
        B: Browser,
        F: Fn(usize) -> Result<Crawler<B>, CrawlerError>,
    {
        let mut crawler = match (self.factory)(id) {
            Ok(c) => c,
            Err(e) => {
                error!("worker {id}: could not open a session: {e}");
                return;
            }
        };

        for (i, job) in jobs.iter() {
            let result = if self.cancel.is_cancelled() {
                Err(CrawlerError::Cancelled)
            } else {
                debug!("worker {id}: {} / {}", job.institution, job.period);
                crawler.fetch_balance_sheet(&job.institution, &job.period, self.normalize)
            };
            if let Err(e) = &result {
                warn!("worker {id}: {} / {} failed: {e}", job.institution, job.period);
            }
            if done.send((i, result)).is_err() {
                break;
            }
        }

        if let Err(e) = crawler.shutdown() {
            warn!("worker {id}: session shutdown failed: {e}");
        }
    }

    fn unfinished(&self) -> CrawlerError {
        if self.cancel.is_cancelled() {
            CrawlerError::Cancelled
        } else {
            CrawlerError::Navigation("job not run: no worker session was available".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_crosses_institutions_and_periods() {
        let jobs = FetchJob::grid(
            &["AW".to_string(), "Z005".to_string()],
            &["1 - 2000".to_string(), "2 - 2000".to_string()],
        );
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[1], FetchJob::new("AW", "2 - 2000"));
        assert_eq!(jobs[2], FetchJob::new("Z005", "1 - 2000"));
    }
}
