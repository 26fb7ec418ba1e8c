//! Browser session lifecycle: acquire a browser, run a task, always clean up

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use browse_core::process::resolve_ws_url;
use browse_core::steel::redact_cdp_url;
use browse_core::{ChromeOptions, ChromeProcess, SessionBroker, SessionOptions, SteelSession};
use serde_json::json;
use tracing::{info, warn};

use super::cdp::CdpClient;
use super::page::{CdpPage, PageDriver};

/// Where the browser comes from
#[derive(Clone)]
pub enum BrowserSource {
    /// An already running browser; it is left running afterwards
    Attach { endpoint: String },
    /// A Chrome started for this session and stopped afterwards
    Launch(ChromeOptions),
    /// A hosted browser provisioned through a session broker
    Remote {
        broker: Arc<dyn SessionBroker>,
        options: SessionOptions,
    },
}

impl std::fmt::Debug for BrowserSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserSource::Attach { endpoint } => f
                .debug_struct("Attach")
                .field("endpoint", &redact_cdp_url(endpoint))
                .finish(),
            BrowserSource::Launch(options) => f.debug_tuple("Launch").field(options).finish(),
            BrowserSource::Remote { options, .. } => {
                f.debug_struct("Remote").field("options", options).finish_non_exhaustive()
            }
        }
    }
}

/// Timeouts applied to DevTools traffic
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub command: Duration,
    pub page_load: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            page_load: Duration::from_secs(30),
        }
    }
}

/// A live browser that can hand out a page and be shut down once
#[async_trait]
pub trait BrowserConnection: Send + Sync {
    async fn open_page(&self) -> Result<Arc<dyn PageDriver>>;

    /// Close a browser we own, or just disconnect from one we don't
    async fn shutdown(&mut self) -> Result<()>;
}

/// DevTools-backed browser connection
pub struct CdpBrowser {
    client: Arc<CdpClient>,
    chrome: Option<ChromeProcess>,
    owns_browser: bool,
    page_load_timeout: Duration,
}

#[async_trait]
impl BrowserConnection for CdpBrowser {
    async fn open_page(&self) -> Result<Arc<dyn PageDriver>> {
        let page = CdpPage::attach(Arc::clone(&self.client), self.page_load_timeout).await?;
        info!(target_id = %page.target_id(), "Page ready");
        Ok(Arc::new(page))
    }

    async fn shutdown(&mut self) -> Result<()> {
        let result = if self.owns_browser {
            self.client
                .send("Browser.close", json!({}), None)
                .await
                .map(|_| ())
        } else {
            self.client.disconnect().await
        };

        if let Some(chrome) = self.chrome.take() {
            stop_chrome(chrome).await?;
        }

        result
    }
}

/// A remote session that must be released with its broker
pub struct RemoteLease {
    pub broker: Arc<dyn SessionBroker>,
    pub session: SteelSession,
}

/// What cleanup managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub browser_closed: bool,
    /// `None` when there was no remote session
    pub session_released: Option<bool>,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A browser plus whatever must be released with it
pub struct BrowserSession {
    connection: Box<dyn BrowserConnection>,
    lease: Option<RemoteLease>,
}

/// A browser could not be acquired; anything provisioned on the way was
/// cleaned up first
#[derive(Debug)]
pub struct OpenFailure {
    pub error: anyhow::Error,
    pub cleanup: CleanupReport,
}

impl From<anyhow::Error> for OpenFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            cleanup: CleanupReport::default(),
        }
    }
}

impl BrowserSession {
    /// Acquire a browser from `source`
    pub async fn open(source: BrowserSource, timeouts: SessionTimeouts) -> Result<Self> {
        Self::open_observed(source, timeouts, |_| {})
            .await
            .map_err(|failure| failure.error)
    }

    /// Acquire a browser from `source`, calling `on_created` as soon as a
    /// remote session exists
    ///
    /// A launched Chrome or a remote session that could not be connected to
    /// is stopped or released before the failure is returned, and the failure
    /// says what that cleanup did.
    pub async fn open_observed<F>(
        source: BrowserSource,
        timeouts: SessionTimeouts,
        on_created: F,
    ) -> std::result::Result<Self, OpenFailure>
    where
        F: FnOnce(&SteelSession),
    {
        match source {
            BrowserSource::Attach { endpoint } => {
                let ws_url = resolve_ws_url(&endpoint).await?;
                let client = CdpClient::connect(&ws_url, timeouts.command).await?;
                Ok(Self::from_parts(
                    Box::new(CdpBrowser {
                        client: Arc::new(client),
                        chrome: None,
                        owns_browser: false,
                        page_load_timeout: timeouts.page_load,
                    }),
                    None,
                ))
            }
            BrowserSource::Launch(options) => {
                let chrome = ChromeProcess::launch(&options).await?;
                let connected = CdpClient::connect(chrome.ws_url(), timeouts.command).await;
                let client = match connected {
                    Ok(client) => client,
                    Err(error) => {
                        let mut cleanup = CleanupReport::default();
                        match stop_chrome(chrome).await {
                            Ok(()) => cleanup.browser_closed = true,
                            Err(e) => cleanup.errors.push(format!("browser: {}", e)),
                        }
                        return Err(OpenFailure { error, cleanup });
                    }
                };
                Ok(Self::from_parts(
                    Box::new(CdpBrowser {
                        client: Arc::new(client),
                        chrome: Some(chrome),
                        owns_browser: true,
                        page_load_timeout: timeouts.page_load,
                    }),
                    None,
                ))
            }
            BrowserSource::Remote { broker, options } => {
                let session = broker.create(&options).await?;
                info!(
                    session_id = %session.id,
                    viewer = %session.session_viewer_url,
                    "Remote session created"
                );
                on_created(&session);

                let connected = async {
                    let cdp_url = broker.cdp_url(&session.id)?;
                    info!(endpoint = %redact_cdp_url(&cdp_url), "Connecting to remote browser");
                    CdpClient::connect(&cdp_url, timeouts.command).await
                }
                .await;

                match connected {
                    Ok(client) => Ok(Self::from_parts(
                        Box::new(CdpBrowser {
                            client: Arc::new(client),
                            chrome: None,
                            owns_browser: false,
                            page_load_timeout: timeouts.page_load,
                        }),
                        Some(RemoteLease { broker, session }),
                    )),
                    Err(error) => {
                        let mut cleanup = CleanupReport::default();
                        release_lease(&RemoteLease { broker, session }, &mut cleanup).await;
                        Err(OpenFailure { error, cleanup })
                    }
                }
            }
        }
    }

    pub fn from_parts(
        connection: Box<dyn BrowserConnection>,
        lease: Option<RemoteLease>,
    ) -> Self {
        Self { connection, lease }
    }

    /// The remote session, if the browser is hosted
    pub fn remote_session(&self) -> Option<&SteelSession> {
        self.lease.as_ref().map(|lease| &lease.session)
    }

    /// Run `task` against a page, then clean up whether it succeeded or not
    pub async fn run<T, F, Fut>(self, task: F) -> (Result<T>, CleanupReport)
    where
        F: FnOnce(Arc<dyn PageDriver>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = match self.connection.open_page().await {
            Ok(page) => task(page).await,
            Err(e) => Err(e),
        };

        let report = self.close().await;
        (outcome, report)
    }

    /// Shut down the browser, then release the remote session
    pub async fn close(mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.connection.shutdown().await {
            Ok(()) => report.browser_closed = true,
            Err(e) => {
                warn!(error = %e, "Failed to close browser");
                report.errors.push(format!("browser: {}", e));
            }
        }

        if let Some(lease) = self.lease.take() {
            release_lease(&lease, &mut report).await;
        }

        report
    }
}

async fn release_lease(lease: &RemoteLease, report: &mut CleanupReport) {
    let session_id = &lease.session.id;
    match lease.broker.release(session_id).await {
        Ok(()) => {
            info!(session_id = %session_id, "Remote session released");
            report.session_released = Some(true);
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to release remote session");
            report.session_released = Some(false);
            report.errors.push(format!("session {}: {}", session_id, e));
        }
    }
}

/// Stop a Chrome we launched without blocking the runtime
async fn stop_chrome(mut chrome: ChromeProcess) -> Result<()> {
    tokio::task::spawn_blocking(move || chrome.stop())
        .await
        .context("Failed to stop Chrome")
}
