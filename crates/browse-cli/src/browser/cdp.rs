//! Minimal Chrome DevTools Protocol client over a single WebSocket

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One DevTools connection. Commands are strictly request/response; events
/// arriving in between are dropped.
pub struct CdpClient {
    stream: Mutex<WsStream>,
    next_id: AtomicU64,
    command_timeout: Duration,
    endpoint: String,
}

impl CdpClient {
    /// Connect to a browser-level DevTools WebSocket
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        let endpoint = browse_core::steel::redact_cdp_url(ws_url);
        let (stream, _) = timeout(command_timeout, connect_async(ws_url))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", endpoint))?
            .with_context(|| format!("Failed to connect to {}", endpoint))?;

        debug!(endpoint = %endpoint, "DevTools connection established");
        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            command_timeout,
            endpoint,
        })
    }

    /// Send a command and wait for its result
    #[instrument(skip(self, params), fields(endpoint = %self.endpoint))]
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let command = build_command(id, method, params, session_id);

        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Text(command.to_string()))
            .await
            .with_context(|| format!("Failed to send {}", method))?;

        // One deadline for the whole command; interleaved events don't extend it
        let deadline = Instant::now() + self.command_timeout;
        loop {
            let next = timeout_at(deadline, stream.next())
                .await
                .map_err(|_| anyhow!("{} timed out after {:?}", method, self.command_timeout))?;

            let value: Value = match next {
                Some(Ok(Message::Text(text))) => {
                    serde_json::from_str(&text).context("Failed to decode DevTools message")?
                }
                Some(Ok(Message::Binary(data))) => {
                    serde_json::from_slice(&data).context("Failed to decode DevTools message")?
                }
                Some(Ok(Message::Ping(payload))) => {
                    stream.send(Message::Pong(payload)).await.ok();
                    continue;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    return Err(anyhow!(
                        "DevTools connection closed: {:?}",
                        frame.map(|f| f.reason.into_owned())
                    ));
                }
                Some(Err(e)) => return Err(anyhow!("DevTools connection error: {}", e)),
                None => return Err(anyhow!("DevTools connection closed unexpectedly")),
            };

            match match_response(&value, id) {
                Some(result) => return result.with_context(|| format!("{} failed", method)),
                None => trace!(event = ?value.get("method"), "Ignoring DevTools event"),
            }
        }
    }

    /// Close the WebSocket without touching the browser
    pub async fn disconnect(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .close(None)
            .await
            .context("Failed to close DevTools connection")
    }
}

impl std::fmt::Debug for CdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn build_command(id: u64, method: &str, params: Value, session_id: Option<&str>) -> Value {
    let mut command = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(session_id) = session_id {
        command["sessionId"] = json!(session_id);
    }
    command
}

/// `Some` when `value` answers command `id`
fn match_response(value: &Value, id: u64) -> Option<Result<Value>> {
    if value.get("id").and_then(Value::as_u64) != Some(id) {
        return None;
    }

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        return Some(Err(anyhow!("DevTools error {}: {}", code, message)));
    }

    Some(Ok(value.get("result").cloned().unwrap_or(Value::Null)))
}
