//! Chromium driver over the DevTools protocol.
//!
//! [`CdpDriver`] implements the blocking [`Driver`] trait on top of
//! chromiumoxide by owning a tokio runtime and bridging every call with
//! `block_on`. Do not call it from inside another async runtime.
//!
//! Element handles map to live DOM nodes through a registry kept in the page
//! (`window.__esperarRefs`). A handle is stale once its node is detached or
//! the page navigates away, which drops the registry with the old document.
//! Every lookup first evicts entries whose node is no longer connected, so
//! polling does not grow the registry or pin detached subtrees.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::driver::{Driver, ElementHandle};
use crate::locator::Selector;
use crate::result::{EsperarError, EsperarResult};

const REGISTRY: &str = "const __refs = (window.__esperarRefs = window.__esperarRefs || new Map());";

const PRUNE: &str = "for (const [key, node] of __refs) { if (!node.isConnected) __refs.delete(key); }";

const DISPLAYED: &str = "(() => { const s = getComputedStyle(el); \
     return s.display !== 'none' && s.visibility !== 'hidden' && el.getClientRects().length > 0; })()";

/// Launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    /// Run without a window
    pub headless: bool,
    /// Keep the Chromium sandbox enabled
    pub sandbox: bool,
    /// Chromium executable; auto-detected when `None`
    pub chromium_path: Option<PathBuf>,
    /// Page opened at launch
    pub start_url: String,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            chromium_path: None,
            start_url: "about:blank".to_string(),
        }
    }
}

impl CdpConfig {
    /// Show the browser window
    #[must_use]
    pub const fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Disable the sandbox (containers, CI)
    #[must_use]
    pub const fn no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Use a specific Chromium executable
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }
}

/// Blocking driver for a single Chromium page
pub struct CdpDriver {
    runtime: Runtime,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl fmt::Debug for CdpDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpDriver").finish_non_exhaustive()
    }
}

impl CdpDriver {
    /// Launch Chromium and open one page
    pub fn launch(config: &CdpConfig) -> EsperarResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(EsperarError::driver)?;

        let (browser, page, handler) = runtime.block_on(async {
            let (browser, mut handler) = Browser::launch(cdp_config)
                .await
                .map_err(|e| EsperarError::driver(format!("browser launch: {e}")))?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            let page = browser
                .new_page(config.start_url.as_str())
                .await
                .map_err(|e| EsperarError::driver(format!("new page: {e}")))?;
            Ok::<_, EsperarError>((browser, page, handler))
        })?;

        tracing::debug!(headless = config.headless, url = %config.start_url, "browser launched");
        Ok(Self {
            runtime,
            browser,
            page,
            handler,
        })
    }

    /// Close the browser and stop the event handler
    pub fn close(mut self) -> EsperarResult<()> {
        let browser = &mut self.browser;
        self.runtime.block_on(async {
            browser
                .close()
                .await
                .map_err(|e| EsperarError::driver(format!("browser close: {e}")))?;
            let _ = browser.wait().await;
            Ok::<_, EsperarError>(())
        })?;
        tracing::debug!("browser closed");
        Ok(())
    }

    fn evaluate(&self, expression: &str) -> EsperarResult<Value> {
        self.runtime.block_on(async {
            let result = self
                .page
                .evaluate(expression)
                .await
                .map_err(|e| EsperarError::script(e.to_string()))?;
            Ok(result.value().cloned().unwrap_or(Value::Null))
        })
    }

    fn query(&self, parent: Option<&ElementHandle>, selector: &Selector) -> EsperarResult<Vec<ElementHandle>> {
        let prefix = uuid::Uuid::new_v4().simple().to_string();
        let expression = query_script(parent.map(|p| p.id.as_str()), selector, &prefix);
        let value = self.evaluate(&expression)?;
        if value.get("stale").is_some() {
            let what = parent.map_or_else(|| "document".to_string(), |p| p.id.clone());
            return Err(EsperarError::stale(what));
        }
        if let Some(reason) = value.get("invalid") {
            tracing::debug!(%selector, %reason, "page rejected selector");
            return Err(EsperarError::UnsupportedSelector {
                selector: selector.css_part(),
            });
        }
        let handles = value
            .get("handles")
            .and_then(Value::as_array)
            .ok_or_else(|| EsperarError::driver(format!("unexpected query result for {selector}")))?;
        Ok(handles
            .iter()
            .filter_map(|pair| {
                let id = pair.get(0)?.as_str()?;
                let tag = pair.get(1)?.as_str()?;
                Some(ElementHandle::new(id, tag))
            })
            .collect())
    }

    /// Evaluate `body` with `el` bound to the handle's node
    fn on_element(&self, handle: &ElementHandle, body: &str) -> EsperarResult<Value> {
        let expression = format!(
            "(() => {{ {REGISTRY} \
               const el = __refs.get({id}); \
               if (!el || !el.isConnected) return {{ stale: true }}; \
               return {{ value: {body} }}; }})()",
            id = json!(handle.id),
        );
        let value = self.evaluate(&expression)?;
        if value.get("stale").is_some() {
            return Err(EsperarError::stale(format!("{} <{}>", handle.id, handle.tag_name)));
        }
        Ok(value.get("value").cloned().unwrap_or(Value::Null))
    }
}

/// Page-side lookup registering each match under `<prefix>-<n>`.
///
/// A missing or detached `parent` yields `{ stale: true }`; CSS the page
/// rejects yields `{ invalid: message }`.
fn query_script(parent: Option<&str>, selector: &Selector, prefix: &str) -> String {
    format!(
        "(() => {{ {REGISTRY} {PRUNE} \
           const parentId = {parent}; \
           const root = parentId === null ? document : __refs.get(parentId); \
           if (!root || (root !== document && !root.isConnected)) return {{ stale: true }}; \
           const text = {text}; \
           let matches; \
           try {{ matches = root.querySelectorAll({css}); }} catch (e) {{ return {{ invalid: String(e) }}; }} \
           const out = []; \
           for (const el of matches) {{ \
             if (text !== null && !(el.innerText || el.textContent || '').includes(text)) continue; \
             const id = {prefix} + '-' + out.length; \
             __refs.set(id, el); \
             out.push([id, el.tagName.toLowerCase()]); \
           }} \
           return {{ handles: out }}; }})()",
        parent = json!(parent),
        text = json!(selector.text_filter().map(str::trim)),
        css = json!(selector.css_part()),
        prefix = json!(prefix),
    )
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl Driver for CdpDriver {
    fn find_all(&self, selector: &Selector) -> EsperarResult<Vec<ElementHandle>> {
        self.query(None, selector)
    }

    fn find_within(&self, parent: &ElementHandle, selector: &Selector) -> EsperarResult<Vec<ElementHandle>> {
        self.query(Some(parent), selector)
    }

    fn attribute(&self, handle: &ElementHandle, name: &str) -> EsperarResult<Option<String>> {
        let value = self.on_element(handle, &format!("el.getAttribute({})", json!(name)))?;
        Ok(value.as_str().map(str::to_string))
    }

    fn text(&self, handle: &ElementHandle) -> EsperarResult<String> {
        let value = self.on_element(handle, "(el.innerText || el.textContent || '')")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn is_displayed(&self, handle: &ElementHandle) -> EsperarResult<bool> {
        let value = self.on_element(handle, DISPLAYED)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn click(&self, handle: &ElementHandle) -> EsperarResult<()> {
        let body = format!("(() => {{ if (!{DISPLAYED}) return false; el.click(); return true; }})()");
        match self.on_element(handle, &body)?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(EsperarError::driver(format!(
                "element {} <{}> is not displayed",
                handle.id, handle.tag_name
            ))),
        }
    }

    fn execute(&self, script: &str, args: &[Value]) -> EsperarResult<Value> {
        let expression = format!("(function() {{ {script} }}).apply(null, {})", Value::from(args.to_vec()));
        self.evaluate(&expression)
    }

    fn evaluate_async(&self, script: &str, args: &[Value], timeout: Duration) -> EsperarResult<Option<Value>> {
        let expression = format!(
            "new Promise((resolve) => {{ \
               const args = {}; \
               args.push(resolve); \
               (function() {{ {script} }}).apply(null, args); }})",
            Value::from(args.to_vec())
        );
        self.runtime.block_on(async {
            match tokio::time::timeout(timeout, self.page.evaluate(expression.as_str())).await {
                Ok(Ok(result)) => Ok(result.value().cloned().filter(|v| !v.is_null())),
                Ok(Err(e)) => Err(EsperarError::script(e.to_string())),
                Err(_) => Ok(None),
            }
        })
    }

    fn is_stale(&self, handle: &ElementHandle) -> bool {
        self.on_element(handle, "true").is_err()
    }

    fn current_url(&self) -> EsperarResult<String> {
        self.runtime.block_on(async {
            let url = self
                .page
                .url()
                .await
                .map_err(|e| EsperarError::driver(e.to_string()))?;
            Ok(url.unwrap_or_default())
        })
    }

    fn navigate(&self, url: &str) -> EsperarResult<()> {
        self.runtime.block_on(async {
            self.page
                .goto(url)
                .await
                .map_err(|e| EsperarError::driver(format!("navigate to {url}: {e}")))?;
            Ok(())
        })
    }
}
