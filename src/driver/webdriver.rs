/*

SPDX-License-Identifier: AGPL-3.0-only
Copyright (c) 2025 Augustus Rizza

*/

use std::time::Duration as StdDuration;

use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use serde_json::{Value, json};

use super::{Browser, DriverError, FrameTarget, SelectOption, WindowHandle};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Minimal W3C WebDriver client (chromedriver, geckodriver, ...).
pub struct WebDriverClient {
    http: Client,
    base: String,
    session_id: String,
    closed: bool,
}

impl WebDriverClient {
    /// Open a new browser session against a running driver, e.g. `http://localhost:9515`.
    pub fn connect(webdriver_url: &str, headless: bool) -> Result<Self, DriverError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(StdDuration::from_secs(60))
            .build()?;

        let base = webdriver_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": capabilities(headless) });
        let value = send(http.post(format!("{base}/session")).json(&body))?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriverError::UnexpectedResponse(format!("new session without sessionId: {value}"))
            })?
            .to_string();

        info!("WebDriver session {session_id} opened on {base}");
        Ok(Self {
            http,
            base,
            session_id,
            closed: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.base, self.session_id, path)
    }

    fn get(&self, path: &str) -> Result<Value, DriverError> {
        debug!("GET {path}");
        send(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        debug!("POST {path} {body}");
        send(self.http.post(self.url(path)).json(&body))
    }

    fn find_all(&self, css: &str) -> Result<Vec<String>, DriverError> {
        let value = self.post("elements", json!({ "using": "css selector", "value": css }))?;
        let refs = value
            .as_array()
            .ok_or_else(|| DriverError::UnexpectedResponse(format!("elements: {value}")))?
            .iter()
            .filter_map(element_ref)
            .collect();
        Ok(refs)
    }

    fn find(&self, css: &str) -> Result<String, DriverError> {
        self.find_all(css)?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NoSuchElement(css.to_string()))
    }

    fn end_session(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        send(self.http.delete(format!("{}/session/{}", self.base, self.session_id)))?;
        info!("WebDriver session {} closed", self.session_id);
        Ok(())
    }
}

impl Browser for WebDriverClient {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.post("url", json!({ "url": url }))?;
        Ok(())
    }

    fn element_exists(&mut self, id: &str) -> Result<bool, DriverError> {
        Ok(!self.find_all(&id_selector(id))?.is_empty())
    }

    fn select_options(&mut self, select_id: &str) -> Result<Vec<SelectOption>, DriverError> {
        // one round trip for the whole list instead of two per option
        let el = self.find(&id_selector(select_id))?;
        let html = self.get(&format!("element/{el}/property/outerHTML"))?;
        let html = html
            .as_str()
            .ok_or_else(|| DriverError::UnexpectedResponse(format!("outerHTML: {html}")))?;
        Ok(parse_options(html))
    }

    fn select_by_value(&mut self, select_id: &str, value: &str) -> Result<(), DriverError> {
        let css = format!(
            "{} option[value=\"{}\"]",
            id_selector(select_id),
            css_escape(value)
        );
        let el = self.find(&css)?;
        self.post(&format!("element/{el}/click"), json!({}))?;
        Ok(())
    }

    fn selected_value(&mut self, select_id: &str) -> Result<Option<String>, DriverError> {
        let el = self.find(&id_selector(select_id))?;
        let value = self.get(&format!("element/{el}/property/value"))?;
        Ok(selected(&value))
    }

    fn click(&mut self, id: &str) -> Result<(), DriverError> {
        let el = self.find(&id_selector(id))?;
        self.post(&format!("element/{el}/click"), json!({}))?;
        Ok(())
    }

    fn window_handles(&mut self) -> Result<Vec<WindowHandle>, DriverError> {
        let value = self.get("window/handles")?;
        let handles = value
            .as_array()
            .ok_or_else(|| DriverError::UnexpectedResponse(format!("window/handles: {value}")))?
            .iter()
            .filter_map(Value::as_str)
            .map(WindowHandle::from)
            .collect();
        Ok(handles)
    }

    fn current_window(&mut self) -> Result<WindowHandle, DriverError> {
        let value = self.get("window")?;
        value
            .as_str()
            .map(WindowHandle::from)
            .ok_or_else(|| DriverError::UnexpectedResponse(format!("window: {value}")))
    }

    fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), DriverError> {
        self.post("window", json!({ "handle": handle.0 }))?;
        Ok(())
    }

    fn switch_to_frame(&mut self, frame: &FrameTarget) -> Result<(), DriverError> {
        let id = match frame {
            FrameTarget::Top => Value::Null,
            FrameTarget::Id(frame_id) => {
                let el = self.find(&id_selector(frame_id))?;
                json!({ ELEMENT_KEY: el })
            }
        };
        self.post("frame", json!({ "id": id }))?;
        Ok(())
    }

    fn page_source(&mut self) -> Result<String, DriverError> {
        let value = self.get("source")?;
        match value {
            Value::String(s) => Ok(s),
            other => Err(DriverError::UnexpectedResponse(format!("source: {other}"))),
        }
    }

    fn close_window(&mut self) -> Result<(), DriverError> {
        send(self.http.delete(self.url("window")))?;
        Ok(())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        self.end_session()
    }
}

impl Drop for WebDriverClient {
    fn drop(&mut self) {
        if let Err(e) = self.end_session() {
            warn!("failed to close WebDriver session {}: {e}", self.session_id);
        }
    }
}

/* =================== wire helpers =================== */

fn send(req: RequestBuilder) -> Result<Value, DriverError> {
    let body: Value = req.send()?.json()?;
    unwrap_value(body)
}

/// Every W3C response is `{"value": ...}`; failures carry `error` + `message`.
fn unwrap_value(body: Value) -> Result<Value, DriverError> {
    let value = match body {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        other => {
            return Err(DriverError::UnexpectedResponse(format!(
                "response is not an object: {other}"
            )));
        }
    };
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(DriverError::Protocol {
            error: error.to_string(),
            message,
        });
    }
    Ok(value)
}

fn element_ref(v: &Value) -> Option<String> {
    v.get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// A `<select>`'s `value` property; the empty placeholder counts as unselected.
fn selected(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn capabilities(headless: bool) -> Value {
    let mut args = vec!["--disable-gpu", "--no-sandbox"];
    if headless {
        args.push("--headless=new");
    }
    json!({
        "alwaysMatch": {
            "browserName": "chrome",
            "goog:chromeOptions": { "args": args }
        }
    })
}

fn css_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn id_selector(id: &str) -> String {
    format!("[id=\"{}\"]", css_escape(id))
}

/// Read `<option>` value/label pairs out of a `<select>`'s markup.
pub fn parse_options(select_html: &str) -> Vec<SelectOption> {
    let frag = Html::parse_fragment(select_html);
    let Ok(sel) = Selector::parse("option") else {
        return Vec::new();
    };
    frag.select(&sel)
        .map(|opt| {
            let text = opt.text().collect::<String>().trim().to_string();
            // an <option> without value submits its text
            let value = opt
                .value()
                .attr("value")
                .map(|v| v.to_string())
                .unwrap_or_else(|| text.clone());
            SelectOption { value, text }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_success_value() {
        let v = unwrap_value(json!({ "value": ["CDwindow-1", "CDwindow-2"] })).unwrap();
        assert_eq!(v, json!(["CDwindow-1", "CDwindow-2"]));
    }

    #[test]
    fn null_value_is_success() {
        assert_eq!(unwrap_value(json!({ "value": null })).unwrap(), Value::Null);
    }

    #[test]
    fn error_payload_becomes_protocol_error() {
        let err = unwrap_value(json!({
            "value": { "error": "no such window", "message": "window was closed", "stacktrace": "" }
        }))
        .unwrap_err();
        match err {
            DriverError::Protocol { error, message } => {
                assert_eq!(error, "no such window");
                assert_eq!(message, "window was closed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn placeholder_select_value_is_unselected() {
        assert_eq!(selected(&json!("AW")), Some("AW".to_string()));
        assert_eq!(selected(&json!("")), None);
        assert_eq!(selected(&Value::Null), None);
    }

    #[test]
    fn no_such_element_is_not_ready() {
        let err = DriverError::Protocol {
            error: "no such element".into(),
            message: String::new(),
        };
        assert!(err.is_not_ready());
        assert!(!DriverError::UnexpectedResponse("x".into()).is_not_ready());
    }

    #[test]
    fn reads_element_reference() {
        let v = json!({ ELEMENT_KEY: "f.1.e.7" });
        assert_eq!(element_ref(&v).as_deref(), Some("f.1.e.7"));
        assert_eq!(element_ref(&json!({})), None);
    }

    #[test]
    fn id_selector_quotes_value() {
        assert_eq!(id_selector("a_b"), "[id=\"a_b\"]");
        assert_eq!(css_escape("1 - 2000"), "1 - 2000");
        assert_eq!(css_escape("x\"y"), "x\\\"y");
    }

    #[test]
    fn headless_flag_in_capabilities() {
        let caps = capabilities(true);
        let args = caps["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
        let caps = capabilities(false);
        let args = caps["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn parses_select_markup() {
        let html = r#"<select id="banks">
            <option value="AW">Bridgewater Bank</option>
            <option value="Z005" selected>  Bank of Montreal </option>
            <option>Other</option>
        </select>"#;
        let opts = parse_options(html);
        assert_eq!(opts.len(), 3);
        assert_eq!(opts[0].value, "AW");
        assert_eq!(opts[1].text, "Bank of Montreal");
        assert_eq!(opts[2].value, "Other");
    }
}
