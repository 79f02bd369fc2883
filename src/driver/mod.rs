/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::fmt;

use thiserror::Error;

pub mod wait;
pub mod webdriver;

pub use wait::{CancelToken, WaitError, Waiter};
pub use webdriver::WebDriverClient;

/// Opaque window handle as reported by the automation engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub String);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowHandle {
    fn from(s: &str) -> Self {
        WindowHandle(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameTarget {
    /// Top-level browsing context of the current window.
    Top,
    /// An `<iframe>` addressed by its `id` attribute.
    Id(String),
}

/// One `<option>` of a `<select>` control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// W3C error payload, e.g. `no such element`, `no such window`.
    #[error("{error}: {message}")]
    Protocol { error: String, message: String },

    #[error("no element matches `{0}`")]
    NoSuchElement(String),

    #[error("unexpected driver response: {0}")]
    UnexpectedResponse(String),
}

impl DriverError {
    /// Errors that mean "not there yet" while polling for readiness.
    pub fn is_not_ready(&self) -> bool {
        match self {
            DriverError::NoSuchElement(_) => true,
            DriverError::Protocol { error, .. } => matches!(
                error.as_str(),
                "no such element" | "no such frame" | "stale element reference"
            ),
            _ => false,
        }
    }
}

/// The primitives the navigator needs from a browser-automation engine.
///
/// Element lookups are by `id` attribute; the portal addresses every control
/// it cares about that way.
pub trait Browser: Send {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    fn element_exists(&mut self, id: &str) -> Result<bool, DriverError>;

    fn select_options(&mut self, select_id: &str) -> Result<Vec<SelectOption>, DriverError>;

    fn select_by_value(&mut self, select_id: &str, value: &str) -> Result<(), DriverError>;

    /// Value of the currently selected option, `None` when nothing is selected.
    fn selected_value(&mut self, select_id: &str) -> Result<Option<String>, DriverError>;

    fn click(&mut self, id: &str) -> Result<(), DriverError>;

    fn window_handles(&mut self) -> Result<Vec<WindowHandle>, DriverError>;

    fn current_window(&mut self) -> Result<WindowHandle, DriverError>;

    fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), DriverError>;

    fn switch_to_frame(&mut self, frame: &FrameTarget) -> Result<(), DriverError>;

    fn page_source(&mut self) -> Result<String, DriverError>;

    /// Close the current window. The caller must switch to another handle next.
    fn close_window(&mut self) -> Result<(), DriverError>;

    fn quit(&mut self) -> Result<(), DriverError>;
}

impl<B: Browser + ?Sized> Browser for Box<B> {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        (**self).navigate(url)
    }
    fn element_exists(&mut self, id: &str) -> Result<bool, DriverError> {
        (**self).element_exists(id)
    }
    fn select_options(&mut self, select_id: &str) -> Result<Vec<SelectOption>, DriverError> {
        (**self).select_options(select_id)
    }
    fn select_by_value(&mut self, select_id: &str, value: &str) -> Result<(), DriverError> {
        (**self).select_by_value(select_id, value)
    }
    fn selected_value(&mut self, select_id: &str) -> Result<Option<String>, DriverError> {
        (**self).selected_value(select_id)
    }
    fn click(&mut self, id: &str) -> Result<(), DriverError> {
        (**self).click(id)
    }
    fn window_handles(&mut self) -> Result<Vec<WindowHandle>, DriverError> {
        (**self).window_handles()
    }
    fn current_window(&mut self) -> Result<WindowHandle, DriverError> {
        (**self).current_window()
    }
    fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), DriverError> {
        (**self).switch_to_window(handle)
    }
    fn switch_to_frame(&mut self, frame: &FrameTarget) -> Result<(), DriverError> {
        (**self).switch_to_frame(frame)
    }
    fn page_source(&mut self) -> Result<String, DriverError> {
        (**self).page_source()
    }
    fn close_window(&mut self) -> Result<(), DriverError> {
        (**self).close_window()
    }
    fn quit(&mut self) -> Result<(), DriverError> {
        (**self).quit()
    }
}
