//! Page capture for protection checks.

use crate::cdp::CdpClient;
use crate::protection::{detect, Protection};
use crate::supervisor::BrowserHandle;
use async_trait::async_trait;
use formpilot_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_JS: &str = "(() => { const e = performance.getEntriesByType('navigation')[0]; \
                         return e && e.responseStatus ? e.responseStatus : 0; })()";
const HTML_JS: &str = "document.documentElement ? document.documentElement.outerHTML : ''";

/// What the detector needs to know about a loaded page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub html: String,
}

impl PageSnapshot {
    pub fn protection(&self) -> Protection {
        detect(self.status, &self.headers, &self.html)
    }
}

#[async_trait]
pub trait PageInspector: Send + Sync {
    /// Navigate the browser to `url` and capture the loaded page.
    async fn load(&self, handle: &BrowserHandle, url: &str) -> Result<PageSnapshot>;

    /// Capture whatever page is showing. `None` while still on `about:blank`.
    async fn capture(&self, handle: &BrowserHandle) -> Result<Option<PageSnapshot>>;
}

/// Inspects pages over the DevTools protocol of the supervised browser.
pub struct CdpPageInspector {
    client: reqwest::Client,
    load_timeout: Duration,
}

impl CdpPageInspector {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            load_timeout: Duration::from_secs(30),
        }
    }

    async fn page_ws_url(&self, http_base: &str) -> Result<String> {
        let url = format!("{}/json/list", http_base);
        for attempt in 0..10 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            let Ok(resp) = self.client.get(&url).send().await else {
                continue;
            };
            let Ok(targets) = resp.json::<Vec<Value>>().await else {
                continue;
            };
            if let Some(ws) = first_page_target(&targets) {
                return Ok(ws);
            }
        }
        Err(Error::Http(format!("no page target listed at {}", url)))
    }

    async fn connect(&self, handle: &BrowserHandle) -> Result<CdpClient> {
        let ws = self.page_ws_url(&handle.http_base).await?;
        CdpClient::connect(&ws).await
    }
}

impl Default for CdpPageInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageInspector for CdpPageInspector {
    async fn load(&self, handle: &BrowserHandle, url: &str) -> Result<PageSnapshot> {
        let cdp = self.connect(handle).await?;
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Network").await?;

        let mut responses = cdp.subscribe_event("Network.responseReceived").await;
        let mut loaded = cdp.subscribe_event("Page.loadEventFired").await;

        cdp.navigate(url).await?;
        if tokio::time::timeout(self.load_timeout, loaded.recv())
            .await
            .is_err()
        {
            warn!(url = url, "Page load event not seen, capturing anyway");
        }

        let mut document = None;
        while let Ok(event) = responses.try_recv() {
            if let Some(found) = document_response(&event) {
                document = Some(found);
                break;
            }
        }

        let (status, headers) = match document {
            Some(found) => found,
            None => (navigation_status(&cdp).await, HashMap::new()),
        };
        let html = page_html(&cdp).await?;
        let current = cdp
            .evaluate_js("location.href")
            .await?
            .as_str()
            .unwrap_or(url)
            .to_string();

        debug!(url = %current, status, bytes = html.len(), "Captured page");
        Ok(PageSnapshot {
            url: current,
            status,
            headers,
            html,
        })
    }

    async fn capture(&self, handle: &BrowserHandle) -> Result<Option<PageSnapshot>> {
        let cdp = self.connect(handle).await?;
        let current = cdp
            .evaluate_js("location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string();
        if current.is_empty() || current == "about:blank" {
            return Ok(None);
        }

        let status = navigation_status(&cdp).await;
        let html = page_html(&cdp).await?;
        Ok(Some(PageSnapshot {
            url: current,
            status,
            headers: HashMap::new(),
            html,
        }))
    }
}

/// Status of the current document; 200 when the timing API has none.
async fn navigation_status(cdp: &CdpClient) -> u16 {
    match cdp.evaluate_js(STATUS_JS).await {
        Ok(v) => match v.as_u64() {
            Some(code) if code > 0 && code < 1000 => code as u16,
            _ => 200,
        },
        Err(e) => {
            debug!("navigation status unavailable: {}", e);
            200
        }
    }
}

async fn page_html(cdp: &CdpClient) -> Result<String> {
    Ok(cdp
        .evaluate_js(HTML_JS)
        .await?
        .as_str()
        .unwrap_or_default()
        .to_string())
}

/// `webSocketDebuggerUrl` of the first `page` target in a `/json/list` payload.
fn first_page_target(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Status and headers from a `Network.responseReceived` event for a document.
fn document_response(event: &Value) -> Option<(u16, HashMap<String, String>)> {
    if event.get("type").and_then(|v| v.as_str()) != Some("Document") {
        return None;
    }
    let response = event.get("response")?;
    let status = response.get("status").and_then(|v| v.as_f64())? as u16;
    let headers = response
        .get("headers")
        .and_then(|h| h.as_object())
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();
    Some((status, headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::BlockReason;
    use serde_json::json;

    #[test]
    fn test_first_page_target_skips_workers() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://x/worker"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://x/page/1"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://x/page/2"}),
        ];
        assert_eq!(first_page_target(&targets).as_deref(), Some("ws://x/page/1"));
        assert_eq!(first_page_target(&[]), None);
    }

    #[test]
    fn test_document_response_extracts_status_and_headers() {
        let event = json!({
            "type": "Document",
            "response": {
                "url": "https://apply.example.edu/",
                "status": 403,
                "headers": {"Server": "cloudflare", "cf-ray": "8a1b2c3d"}
            }
        });
        let (status, headers) = document_response(&event).unwrap();
        assert_eq!(status, 403);
        assert_eq!(headers.get("Server").map(String::as_str), Some("cloudflare"));
    }

    #[test]
    fn test_document_response_ignores_subresources() {
        let event = json!({"type": "Script", "response": {"status": 200, "headers": {}}});
        assert!(document_response(&event).is_none());
    }

    #[test]
    fn test_snapshot_protection() {
        let snapshot = PageSnapshot {
            url: "https://apply.example.edu/".into(),
            status: 429,
            headers: HashMap::new(),
            html: "too many requests".into(),
        };
        assert_eq!(
            snapshot.protection(),
            Protection::Blocked(BlockReason::RateLimited)
        );
    }
}
