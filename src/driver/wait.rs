/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use super::DriverError;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("`{what}` not ready after {waited:?}")]
    TimedOut { what: String, waited: Duration },

    #[error("wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Poll-until-ready with an explicit bound.
///
/// A timed-out window is retried `retries` times, sleeping `backoff * attempt`
/// in between, before the timeout is surfaced. One `until` call can therefore
/// take up to [`Waiter::max_wait`], not just `timeout`.
#[derive(Debug, Clone)]
pub struct Waiter {
    timeout: Duration,
    interval: Duration,
    retries: u32,
    backoff: Duration,
    cancel: CancelToken,
}

impl Waiter {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Waiter {
            timeout,
            interval,
            retries: 1,
            backoff: Duration::from_millis(250),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Longest an `until` call runs before it reports a timeout:
    /// `timeout * (retries + 1) + backoff * (1 + 2 + .. + retries)`.
    pub fn max_wait(&self) -> Duration {
        let pauses = self.retries * (self.retries + 1) / 2;
        self.timeout * (self.retries + 1) + self.backoff * pauses
    }

    /// Run `probe` until it yields `Some`. Driver errors that only mean
    /// "not there yet" are swallowed; anything else aborts the wait.
    pub fn until<T, F>(&self, what: &str, mut probe: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Result<Option<T>, DriverError>,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match self.poll_window(what, &mut probe) {
                Err(WaitError::TimedOut { .. }) if attempt < self.retries => {
                    attempt += 1;
                    let pause = self.backoff * attempt;
                    warn!("`{what}` not ready, retrying in {pause:?} (attempt {attempt})");
                    self.pause(pause)?;
                }
                // report the whole wait, retries included
                Err(WaitError::TimedOut { what, .. }) => {
                    return Err(WaitError::TimedOut {
                        what,
                        waited: started.elapsed(),
                    });
                }
                other => return other,
            }
        }
    }

    fn poll_window<T, F>(&self, what: &str, probe: &mut F) -> Result<T, WaitError>
    where
        F: FnMut() -> Result<Option<T>, DriverError>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            match probe() {
                Ok(Some(v)) => return Ok(v),
                Ok(None) => {}
                Err(e) if e.is_not_ready() => debug!("`{what}` not ready: {e}"),
                Err(e) => return Err(e.into()),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::TimedOut {
                    what: what.to_string(),
                    waited: self.timeout,
                });
            }
            self.pause(self.interval.min(deadline - now))?;
        }
    }

    /// Sleep in short slices so cancellation is noticed promptly.
    fn pause(&self, total: Duration) -> Result<(), WaitError> {
        let slice = Duration::from_millis(20);
        let end = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            thread::sleep(slice.min(end - now));
        }
    }
}
