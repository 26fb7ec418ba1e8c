//! Steel remote browser sessions

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::SteelConfig;

/// Options for a new remote session
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    pub use_proxy: bool,
    pub solve_captcha: bool,
    /// Session lifetime in milliseconds (broker default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_timeout: Option<u64>,
}

/// A provisioned remote browser
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SteelSession {
    pub id: String,
    #[serde(default)]
    pub session_viewer_url: String,
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A service that provisions hosted browsers reachable over CDP
#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Provision a new browser session
    async fn create(&self, options: &SessionOptions) -> Result<SteelSession>;

    /// Release a session so the broker can tear the browser down
    async fn release(&self, session_id: &str) -> Result<()>;

    /// DevTools WebSocket URL for a session
    fn cdp_url(&self, session_id: &str) -> Result<String>;
}

/// Steel REST client
#[derive(Debug, Clone)]
pub struct SteelClient {
    config: SteelConfig,
    client: reqwest::Client,
}

impl SteelClient {
    /// Create a client with the given request timeout
    pub fn new(config: SteelConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/sessions", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SessionBroker for SteelClient {
    #[instrument(skip(self))]
    async fn create(&self, options: &SessionOptions) -> Result<SteelSession> {
        let session: SteelSession = self
            .client
            .post(self.sessions_url())
            .header("steel-api-key", &self.config.api_key)
            .json(options)
            .send()
            .await
            .context("Failed to connect to Steel")?
            .error_for_status()
            .context("Steel session creation failed")?
            .json()
            .await
            .context("Failed to parse Steel session response")?;

        info!(session_id = %session.id, status = ?session.status, "Steel session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn release(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/{}/release", self.sessions_url(), session_id);

        self.client
            .post(&url)
            .header("steel-api-key", &self.config.api_key)
            .send()
            .await
            .context("Failed to connect to Steel")?
            .error_for_status()
            .context("Steel session release failed")?;

        debug!(session_id, "Steel session released");
        Ok(())
    }

    fn cdp_url(&self, session_id: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.config.connect_url)
            .with_context(|| format!("Invalid Steel connect URL: {}", self.config.connect_url))?;
        url.query_pairs_mut()
            .append_pair("apiKey", &self.config.api_key)
            .append_pair("sessionId", session_id);
        Ok(url.to_string())
    }
}

/// Strip credentials from a CDP URL before it is printed or logged
pub fn redact_cdp_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k.eq_ignore_ascii_case("apikey") || k.eq_ignore_ascii_case("token") {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub_http::serve;

    fn client_for(api_url: &str) -> SteelClient {
        SteelClient::new(
            SteelConfig {
                api_key: "sk-test".to_string(),
                api_url: api_url.to_string(),
                connect_url: "wss://connect.steel.dev".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn client() -> SteelClient {
        client_for("https://api.steel.dev/")
    }

    #[test]
    fn test_session_options_wire_format() {
        let value = serde_json::to_value(SessionOptions::default()).unwrap();
        assert_eq!(value, serde_json::json!({"useProxy": false, "solveCaptcha": false}));

        let value = serde_json::to_value(SessionOptions {
            use_proxy: true,
            solve_captcha: true,
            session_timeout: Some(60_000),
        })
        .unwrap();
        assert_eq!(value["sessionTimeout"], 60_000);
    }

    const SESSION_JSON: &str = r#"{"id":"abc-123",
        "sessionViewerUrl":"https://app.steel.dev/sessions/abc-123",
        "status":"live","creditsUsed":0}"#;

    #[test]
    fn test_parse_session() {
        let session: SteelSession = serde_json::from_str(SESSION_JSON).unwrap();
        assert_eq!(session.id, "abc-123");
        assert_eq!(session.session_viewer_url, "https://app.steel.dev/sessions/abc-123");
        assert!(session.websocket_url.is_none());
    }

    #[test]
    fn test_cdp_url() {
        let url = client().cdp_url("abc-123").unwrap();
        assert_eq!(url, "wss://connect.steel.dev/?apiKey=sk-test&sessionId=abc-123");
        assert_eq!(client().sessions_url(), "https://api.steel.dev/v1/sessions");
    }

    #[test]
    fn test_redact_cdp_url() {
        let redacted = redact_cdp_url("wss://connect.steel.dev/?apiKey=sk-test&sessionId=abc");
        assert!(!redacted.contains("sk-test"));
        assert!(redacted.contains("sessionId=abc"));
        assert_eq!(redact_cdp_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_create_and_release_requests() {
        let (url, log) = serve(vec![(200, SESSION_JSON), (200, "{}")]).await;
        let steel = client_for(&url);

        let session = steel
            .create(&SessionOptions {
                solve_captcha: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(session.id, "abc-123");
        steel.release(&session.id).await.unwrap();

        let requests = log.lock().unwrap();
        assert!(requests[0].starts_with("POST /v1/sessions HTTP/1.1"));
        assert!(requests[0].to_ascii_lowercase().contains("steel-api-key: sk-test"));
        assert!(requests[0].contains(r#""solveCaptcha":true"#));
        assert!(requests[1].starts_with("POST /v1/sessions/abc-123/release HTTP/1.1"));
        assert!(requests[1].to_ascii_lowercase().contains("steel-api-key: sk-test"));
    }

    #[tokio::test]
    async fn test_create_rejected() {
        let (url, _log) = serve(vec![(401, r#"{"message":"bad key"}"#)]).await;

        let err = client_for(&url)
            .create(&SessionOptions::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Steel session creation failed"));
    }
}
