//! Local Chrome process management

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Options for launching a local browser
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Explicit binary; searched when unset
    pub binary: Option<PathBuf>,
    pub debug_port: u16,
    pub headless: bool,
    /// How long to wait for the DevTools endpoint to come up
    pub startup_timeout: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            binary: None,
            debug_port: 9222,
            headless: true,
            startup_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    web_socket_debugger_url: String,
    #[serde(rename = "Browser", default)]
    browser: String,
}

/// A Chrome instance started by us with remote debugging enabled
pub struct ChromeProcess {
    child: Option<Child>,
    profile_dir: PathBuf,
    ws_url: String,
}

impl ChromeProcess {
    /// Launch Chrome and wait until its DevTools endpoint answers
    pub async fn launch(options: &ChromeOptions) -> Result<Self> {
        if is_port_in_use(options.debug_port) {
            anyhow::bail!(
                "Port {} is already in use; set BROWSER_CDP_URL to attach to a running browser",
                options.debug_port
            );
        }

        let binary = match &options.binary {
            Some(path) => path.clone(),
            None => find_chrome_binary()?,
        };

        let profile_dir = std::env::temp_dir().join(format!(
            "browse-agent-profile-{}-{}",
            std::process::id(),
            options.debug_port
        ));

        let child = Command::new(&binary)
            .args(launch_args(options, &profile_dir))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {}", binary.display()))?;

        info!(
            pid = child.id(),
            binary = %binary.display(),
            port = options.debug_port,
            "Chrome started"
        );

        let mut process = Self {
            child: Some(child),
            profile_dir,
            ws_url: String::new(),
        };

        let endpoint = format!("http://127.0.0.1:{}", options.debug_port);
        let deadline = Instant::now() + options.startup_timeout;
        loop {
            match resolve_ws_url(&endpoint).await {
                Ok(url) => {
                    process.ws_url = url;
                    return Ok(process);
                }
                Err(e) if Instant::now() < deadline && process.is_running() => {
                    debug!(error = %e, "DevTools endpoint not ready yet");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(e) => {
                    // stop() may wait for the process to exit
                    let _ = tokio::task::spawn_blocking(move || process.stop()).await;
                    return Err(e.context("Chrome did not expose a DevTools endpoint in time"));
                }
            }
        }
    }

    /// DevTools WebSocket URL of the browser target
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Check if the process is running
    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    /// Get the process ID if running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Stop the browser: SIGTERM, wait, then kill
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            unsafe {
                libc::kill(child.id() as i32, libc::SIGTERM);
            }

            let timeout = Duration::from_secs(5);
            let start = Instant::now();

            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if start.elapsed() < timeout => {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    _ => {
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }

            let _ = std::fs::remove_dir_all(&self.profile_dir);
            debug!("Chrome stopped");
        }
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChromeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeProcess")
            .field("pid", &self.pid())
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

fn launch_args(options: &ChromeOptions, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", options.debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-networking".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Turn a DevTools endpoint into a WebSocket URL
///
/// `ws://` and `wss://` URLs are returned unchanged; `http(s)://host:port` is
/// resolved through `/json/version`.
pub async fn resolve_ws_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let info: VersionInfo = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?
        .error_for_status()?
        .json()
        .await
        .context("Failed to parse DevTools version info")?;

    debug!(browser = %info.browser, "Resolved DevTools endpoint");
    Ok(info.web_socket_debugger_url)
}

/// Find a Chrome or Chromium binary
pub fn find_chrome_binary() -> Result<PathBuf> {
    let candidates = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    for path in candidates {
        if Path::new(path).exists() {
            return Ok(PathBuf::from(path));
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    anyhow::bail!("Chrome binary not found. Set CHROME_PATH or BROWSER_CDP_URL")
}

/// Check if a port is in use
pub fn is_port_in_use(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
}
