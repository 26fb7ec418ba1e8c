//! Page driving on top of a DevTools target session

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::cdp::CdpClient;

/// Operations the browser agent needs from a page
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load to settle
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Wait for a navigation triggered by the page itself
    async fn wait_for_load(&self) -> Result<()> {
        Ok(())
    }
}

/// A page target attached through a flattened DevTools session
#[derive(Debug)]
pub struct CdpPage {
    client: Arc<CdpClient>,
    session_id: String,
    target_id: String,
    load_timeout: Duration,
}

impl CdpPage {
    /// Attach to the first open page, creating one if the browser has none
    pub async fn attach(client: Arc<CdpClient>, load_timeout: Duration) -> Result<Self> {
        let targets = client.send("Target.getTargets", json!({}), None).await?;

        let target_id = match first_page_target(&targets) {
            Some(id) => id,
            None => {
                let created = client
                    .send("Target.createTarget", json!({"url": "about:blank"}), None)
                    .await?;
                created
                    .get("targetId")
                    .and_then(Value::as_str)
                    .context("Target.createTarget returned no targetId")?
                    .to_string()
            }
        };

        let attached = client
            .send(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .context("Target.attachToTarget returned no sessionId")?
            .to_string();

        debug!(target_id = %target_id, session_id = %session_id, "Attached to page");
        Ok(Self {
            client,
            session_id,
            target_id,
            load_timeout,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn ready_state(&self) -> Result<String> {
        let value = self.evaluate("document.readyState").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .client
            .send("Page.navigate", json!({"url": url}), Some(&self.session_id))
            .await?;

        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                anyhow::bail!("Navigation to {} failed: {}", url, error);
            }
        }

        self.wait_for_load().await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .client
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                Some(&self.session_id),
            )
            .await?;

        evaluation_value(result)
    }

    async fn wait_for_load(&self) -> Result<()> {
        let deadline = Instant::now() + self.load_timeout;
        // Give a pending navigation a moment to replace the old document
        tokio::time::sleep(Duration::from_millis(200)).await;

        loop {
            match self.ready_state().await {
                Ok(state) if state == "complete" => return Ok(()),
                Ok(state) => debug!(state = %state, "Waiting for page load"),
                // The execution context is torn down while navigating
                Err(e) => debug!(error = %e, "Page not ready"),
            }

            if Instant::now() >= deadline {
                warn!(timeout = ?self.load_timeout, "Page did not finish loading, continuing");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

fn first_page_target(targets: &Value) -> Option<String> {
    targets
        .get("targetInfos")?
        .as_array()?
        .iter()
        .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .and_then(|t| t.get("targetId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn evaluation_value(result: Value) -> Result<Value> {
    if let Some(details) = result.get("exceptionDetails") {
        let description = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception");
        anyhow::bail!("JavaScript exception: {}", description);
    }

    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}
