//! Minimal Chrome DevTools Protocol client over WebSocket.
//!
//! Only what page inspection needs: commands with responses, event
//! subscriptions, navigation and script evaluation.

use formpilot_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    event_listeners: Listeners,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Http(format!("CDP connect to {} failed: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get(method) {
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout: Duration::from_secs(30),
            reader_handle,
            writer_handle,
        })
    }

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Http(format!("CDP send failed: {}", e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => match response.get("error") {
                Some(err) => Err(Error::Http(format!("CDP error on {}: {}", method, err))),
                None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(Error::Http("CDP response channel closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Http(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Receiver for the params of every `method` event from now on.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        let result = self
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Http(format!("navigation to {} failed: {}", url, err)));
        }
        Ok(result)
    }

    /// Evaluate an expression and return its value (`returnByValue`).
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(Error::Http(format!("script threw: {}", details)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
