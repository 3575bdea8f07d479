//! Headless-browser capture of a rendered diagram.
//!
//! Given the address of a running visualization server, this module polls
//! the target page until the server answers, spawns a headless browser from
//! the chromium/chrome/edge family with `--screenshot`, and enforces a
//! wall-clock budget on the whole operation. On expiry the browser process
//! is killed and no partial image is reported as success.
//!
//! Captures run on the caller's thread, never on the server runtime: a
//! capture of one's own server from inside a handler would deadlock on the
//! model lock and starve other sessions.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::{Error, Result};

/// Browser binaries probed on PATH, in preference order.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "microsoft-edge",
    "msedge",
];

/// How often the readiness poll retries the server.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Parameters for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Fully-qualified page URL (e.g. `http://127.0.0.1:49999/app?id=plant`)
    pub url: String,

    /// Output image path; must end in `.png`
    pub output: PathBuf,

    /// Explicit browser binary; when unset, PATH is scanned
    pub browser: Option<PathBuf>,

    /// Wall-clock budget covering readiness polling and the browser run
    pub timeout: Duration,

    /// Browser window size in pixels
    pub window_size: (u32, u32),
}

impl CaptureOptions {
    pub fn new(url: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            browser: None,
            timeout: Duration::from_secs(30),
            window_size: (1280, 900),
        }
    }

    pub fn with_browser(mut self, browser: impl Into<PathBuf>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }
}

/// Locate a headless-capable browser binary.
///
/// An explicit path must exist; otherwise PATH directories are scanned for
/// the known candidates.
pub fn find_browser(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Capture(format!(
            "configured browser '{}' does not exist",
            path.display()
        )));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        for candidate in BROWSER_CANDIDATES {
            let full = dir.join(candidate);
            if full.is_file() {
                return Ok(full);
            }
        }
    }
    Err(Error::Capture(
        "no chromium/chrome/edge binary found on PATH; set an explicit browser path".into(),
    ))
}

/// Poll `url` until the server responds or the deadline passes.
///
/// Any HTTP response counts as ready, including error statuses - the point
/// is reachability, not page health. Transport errors (connection refused,
/// reset) are retried.
fn wait_until_ready(url: &str, deadline: Instant) -> Result<()> {
    loop {
        match ureq::get(url).timeout(Duration::from_secs(1)).call() {
            Ok(_) | Err(ureq::Error::Status(_, _)) => return Ok(()),
            Err(_) if Instant::now() + POLL_INTERVAL < deadline => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(Error::Capture(format!(
                    "server at {} not reachable within timeout: {}",
                    url, e
                )));
            }
        }
    }
}

/// Capture the diagram page at `opts.url` into `opts.output`.
///
/// Returns the output path on success. Fails with [`Error::Capture`] on an
/// unreachable server, a browser crash or nonzero exit, or timeout - in the
/// timeout case the browser child is killed and any partial output removed.
pub fn capture_diagram(opts: &CaptureOptions) -> Result<PathBuf> {
    match opts.output.extension().and_then(|e| e.to_str()) {
        Some("png") => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "capture output must be a .png path (got '{}')",
                other.unwrap_or("")
            )));
        }
    }

    let deadline = Instant::now() + opts.timeout;
    wait_until_ready(&opts.url, deadline)?;

    let browser = find_browser(opts.browser.as_deref())?;
    if let Some(parent) = opts.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let (width, height) = opts.window_size;
    tracing::debug!(browser = %browser.display(), url = %opts.url, "spawning capture browser");
    let mut child = Command::new(&browser)
        .arg("--headless")
        .arg("--disable-gpu")
        .arg("--hide-scrollbars")
        .arg(format!("--window-size={},{}", width, height))
        // Let the page's JS settle before the shot is taken
        .arg("--virtual-time-budget=4000")
        .arg(format!("--screenshot={}", opts.output.display()))
        .arg(&opts.url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::Capture(format!("failed to spawn '{}': {}", browser.display(), e)))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    match child.wait_timeout(remaining) {
        Ok(Some(status)) if status.success() => {
            if opts.output.exists() {
                Ok(opts.output.clone())
            } else {
                Err(Error::Capture(format!(
                    "browser exited cleanly but wrote no image at {}",
                    opts.output.display()
                )))
            }
        }
        Ok(Some(status)) => Err(Error::Capture(format!(
            "browser exited with {}",
            status
        ))),
        Ok(None) => {
            // Budget exhausted: tear the child down, report no partial image
            child.kill().ok();
            child.wait().ok();
            std::fs::remove_file(&opts.output).ok();
            Err(Error::Capture(format!(
                "capture timed out after {:?}",
                opts.timeout
            )))
        }
        Err(e) => {
            child.kill().ok();
            child.wait().ok();
            Err(Error::Capture(format!("waiting for browser: {}", e)))
        }
    }
}
