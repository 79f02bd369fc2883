/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

pub mod catalog;

use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::{CrawlerConfig, DateRegion, FormIds, WaitConfig};
use crate::driver::{Browser, CancelToken, DriverError, FrameTarget, WaitError, WindowHandle};
use crate::errors::{CrawlerError, SelectorKind};
use crate::report::{self, RawExtractionResult};

pub use catalog::{Catalog, CatalogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// The selection form is addressable.
    Home,
    /// Submit was clicked; a report window may be opening.
    Submitted,
    /// The report window is the active context.
    ReportOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveContext {
    Home,
    Report(WindowHandle),
}

/// Which window/frame the session is addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub home_window: WindowHandle,
    pub home_frame: String,
    pub active: ActiveContext,
}

/// Drives one portal session. The only place that touches window handles or
/// frame focus; every public call leaves the session in `Home` unless it is
/// `submit`, which hands over to `capture_report`.
pub struct Navigator<B: Browser> {
    browser: B,
    form: FormIds,
    date_region: DateRegion,
    waits: WaitConfig,
    cancel: CancelToken,
    context: SessionContext,
    state: SessionState,
}

impl<B: Browser> Navigator<B> {
    /// Open the portal, wait for the form's frame, and enter it.
    pub fn initialize(browser: B, config: &CrawlerConfig) -> Result<Self, CrawlerError> {
        Self::initialize_with_cancel(browser, config, CancelToken::new())
    }

    pub fn initialize_with_cancel(
        mut browser: B,
        config: &CrawlerConfig,
        cancel: CancelToken,
    ) -> Result<Self, CrawlerError> {
        let url = config.portal_url();
        info!("opening portal {url}");
        browser.navigate(&url)?;

        let frame = config.form.home_frame.clone();
        let waiter = config.waits.waiter(config.waits.frame_timeout, &cancel);
        waiter
            .until("home frame", || {
                browser.element_exists(&frame).map(|found| found.then_some(()))
            })
            .map_err(|e| match e {
                WaitError::TimedOut { waited, .. } => CrawlerError::Navigation(format!(
                    "home frame `{frame}` not found within {waited:?}"
                )),
                other => other.into(),
            })?;

        browser.switch_to_frame(&FrameTarget::Id(frame.clone()))?;
        let home_window = browser.current_window()?;
        info!("session ready (home window {home_window})");

        Ok(Self {
            browser,
            form: config.form.clone(),
            date_region: config.date_region.clone(),
            waits: config.waits.clone(),
            cancel,
            context: SessionContext {
                home_window,
                home_frame: frame,
                active: ActiveContext::Home,
            },
            state: SessionState::Home,
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    pub fn list_institutions(&mut self) -> Result<Catalog, CrawlerError> {
        self.ensure_home()?;
        let id = self.form.institutions.clone();
        Ok(Catalog::from_options(self.browser.select_options(&id)?))
    }

    pub fn list_periods(&mut self) -> Result<Catalog, CrawlerError> {
        self.ensure_home()?;
        let id = self.form.periods.clone();
        Ok(Catalog::from_options(self.browser.select_options(&id)?))
    }

    pub fn select_institution(&mut self, code: &str) -> Result<(), CrawlerError> {
        let catalog = self.list_institutions()?;
        let id = self.form.institutions.clone();
        self.select(SelectorKind::Institution, &catalog, &id, code)
    }

    /// `code` is `"M - YYYY"`.
    pub fn select_period(&mut self, code: &str) -> Result<(), CrawlerError> {
        let catalog = self.list_periods()?;
        let id = self.form.periods.clone();
        self.select(SelectorKind::Period, &catalog, &id, code)
    }

    /// Put `(institution, period)` into the form.
    ///
    /// The institution is checked before anything is touched. The period is
    /// checked against the list the portal offers once that institution is
    /// selected; if it is not there, the previous institution is put back.
    pub fn select_query(&mut self, institution: &str, period: &str) -> Result<(), CrawlerError> {
        let institutions = self.list_institutions()?;
        if !institutions.contains(institution) {
            return Err(CrawlerError::InvalidSelection {
                kind: SelectorKind::Institution,
                code: institution.to_string(),
            });
        }

        let id = self.form.institutions.clone();
        let previous = self.browser.selected_value(&id)?;
        let changed = previous.as_deref() != Some(institution);
        if changed {
            self.select(SelectorKind::Institution, &institutions, &id, institution)?;
        }

        let periods = self.list_periods()?;
        if !periods.contains(period) {
            if let (true, Some(prev)) = (changed, previous.as_deref()) {
                debug!("restoring institution `{prev}`");
                self.browser.select_by_value(&id, prev)?;
            }
            return Err(CrawlerError::InvalidSelection {
                kind: SelectorKind::Period,
                code: period.to_string(),
            });
        }
        let id = self.form.periods.clone();
        self.select(SelectorKind::Period, &periods, &id, period)
    }

    fn select(
        &mut self,
        kind: SelectorKind,
        catalog: &Catalog,
        select_id: &str,
        code: &str,
    ) -> Result<(), CrawlerError> {
        if !catalog.contains(code) {
            return Err(CrawlerError::InvalidSelection {
                kind,
                code: code.to_string(),
            });
        }
        debug!("selecting {kind} `{code}`");
        self.browser.select_by_value(select_id, code)?;
        Ok(())
    }

    /// Click submit, then give the report window up to `settle` to show up.
    /// Not seeing it yet is fine; `capture_report` does the bounded wait.
    pub fn submit(&mut self) -> Result<(), CrawlerError> {
        self.ensure_home()?;
        let id = self.form.submit.clone();
        self.browser.click(&id)?;
        self.state = SessionState::Submitted;
        info!("form submitted");

        let waiter = self
            .waits
            .waiter(self.waits.settle, &self.cancel)
            .with_retries(0, Duration::ZERO);
        let home = self.context.home_window.clone();
        let browser = &mut self.browser;
        let settled = waiter.until("report window", || {
            Ok(browser
                .window_handles()?
                .iter()
                .any(|h| *h != home)
                .then_some(()))
        });
        match settled {
            Ok(()) | Err(WaitError::TimedOut { .. }) => Ok(()),
            Err(e) => {
                self.restore_quietly();
                Err(e.into())
            }
        }
    }

    /// Switch to the report window, read it, and come back home.
    ///
    /// The session is in `Home` when this returns, whatever the outcome.
    pub fn capture_report(&mut self) -> Result<RawExtractionResult, CrawlerError> {
        if self.state != SessionState::Submitted {
            return Err(CrawlerError::Navigation(
                "capture_report without a pending submission".into(),
            ));
        }

        let handle = match self.await_report_window() {
            Ok(h) => h,
            Err(e) => {
                self.restore_quietly();
                return Err(e);
            }
        };

        let mut report = ReportContext::enter(self, handle)?;
        let captured = report.capture();
        let restored = report.release();
        let captured = captured?;
        restored?;
        Ok(captured)
    }

    /// End the browser session.
    pub fn shutdown(mut self) -> Result<(), CrawlerError> {
        info!("shutting down session");
        self.browser.quit()?;
        Ok(())
    }

    fn await_report_window(&mut self) -> Result<WindowHandle, CrawlerError> {
        let waiter = self.waits.waiter(self.waits.report_timeout, &self.cancel);
        let home = self.context.home_window.clone();
        let browser = &mut self.browser;
        let children = waiter
            .until("report window", || {
                let children: Vec<WindowHandle> = browser
                    .window_handles()?
                    .into_iter()
                    .filter(|h| *h != home)
                    .collect();
                Ok((!children.is_empty()).then_some(children))
            })
            .map_err(|e| match e {
                WaitError::TimedOut { waited, .. } => CrawlerError::Navigation(format!(
                    "no report window opened within {waited:?}"
                )),
                other => other.into(),
            })?;

        match children.as_slice() {
            [only] => Ok(only.clone()),
            many => Err(CrawlerError::Navigation(format!(
                "ambiguous child window: {} candidates",
                many.len()
            ))),
        }
    }

    /// Leave whatever context is active for the home window and frame,
    /// closing every other window on the way.
    fn restore_home(&mut self) -> Result<(), CrawlerError> {
        let home = self.context.home_window.clone();

        let mut first_err: Option<DriverError> = None;
        match self.browser.window_handles() {
            Ok(handles) => {
                for h in handles.into_iter().filter(|h| *h != home) {
                    debug!("closing window {h}");
                    let closed = self
                        .browser
                        .switch_to_window(&h)
                        .and_then(|_| self.browser.close_window());
                    if let Err(e) = closed {
                        warn!("could not close window {h}: {e}");
                        first_err.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }

        // the home switch itself must not be skipped because a close failed
        let frame = FrameTarget::Id(self.context.home_frame.clone());
        self.browser.switch_to_window(&home)?;
        self.browser.switch_to_frame(&frame)?;
        // only now is the session back home; a failed switch leaves the old
        // state so the next `ensure_home` tries again
        let was = std::mem::replace(&mut self.context.active, ActiveContext::Home);
        self.state = SessionState::Home;
        if let ActiveContext::Report(h) = was {
            debug!("left report window {h}");
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn restore_quietly(&mut self) {
        if let Err(e) = self.restore_home() {
            error!("failed to restore home context: {e}");
        }
    }

    /// Abandon a dangling submission before touching the form again.
    fn ensure_home(&mut self) -> Result<(), CrawlerError> {
        if self.state != SessionState::Home {
            warn!("session left in {:?}; restoring home context", self.state);
            self.restore_home()?;
        }
        Ok(())
    }
}

/// Scoped hold on the report window. Dropping it without `release` (early
/// return, panic) still restores the home context.
pub struct ReportContext<'a, B: Browser> {
    nav: &'a mut Navigator<B>,
    released: bool,
}

impl<'a, B: Browser> ReportContext<'a, B> {
    fn enter(nav: &'a mut Navigator<B>, handle: WindowHandle) -> Result<Self, CrawlerError> {
        nav.context.active = ActiveContext::Report(handle.clone());
        nav.state = SessionState::ReportOpen;
        let guard = ReportContext {
            nav,
            released: false,
        };
        guard.nav.browser.switch_to_window(&handle)?;
        debug!("switched to report window {handle}");
        Ok(guard)
    }

    fn capture(&mut self) -> Result<RawExtractionResult, CrawlerError> {
        let nav = &mut *self.nav;
        let waiter = nav.waits.waiter(nav.waits.report_timeout, &nav.cancel);
        let browser = &mut nav.browser;
        let markup = waiter.until("report tables", || {
            let src = browser.page_source()?;
            Ok(report::has_table(&src).then_some(src))
        })?;
        let date = report::extract_date(&markup, &nav.date_region);
        info!(
            "captured report ({} bytes, date {:?})",
            markup.len(),
            date.as_deref().unwrap_or("-")
        );
        Ok(RawExtractionResult::new(markup, date))
    }

    fn release(mut self) -> Result<(), CrawlerError> {
        self.released = true;
        self.nav.restore_home()
    }
}

impl<B: Browser> Drop for ReportContext<'_, B> {
    fn drop(&mut self) {
        if !self.released {
            self.nav.restore_quietly();
        }
    }
}
