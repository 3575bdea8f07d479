//! Top-level entry points: visualize a flowsheet, export a diagram image.
//!
//! [`visualize`] is what a hosting script calls: it resolves the save
//! location, registers the flowsheet with a fresh server, starts that server
//! on a background thread, and returns a [`VisualizeResult`] carrying the
//! port, URL, and a stop handle. The server keeps running when the result is
//! dropped - a notebook-style session expects the diagram to outlive the
//! cell that created it - and stops on [`VisualizeResult::stop`], process
//! exit, or Ctrl-C in [`loop_forever`] mode.
//!
//! [`export_flowsheet_diagram`] is the one-call wrapper: serve headlessly,
//! capture a PNG, stop.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::capture::{CaptureOptions, capture_diagram};
use crate::config::Settings;
use crate::lifecycle::{PidInfo, ServerPidFile, bind_listener, get_data_dir};
use crate::model::Flowsheet;
use crate::server::{AppState, canonical_name, start_server};
use crate::store::{DataStore, FileDataStore, MemoryDataStore, versioned_save_path};
use crate::{Error, Result};

/// Where to persist the flowsheet layout document.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SaveMode {
    /// `<name>.json` in the save directory (versioned when it exists)
    #[default]
    Default,
    /// An explicit file path
    Path(PathBuf),
    /// Keep the document in memory only
    Disabled,
}

/// Options for [`visualize`]. `Default` matches the common notebook case.
#[derive(Debug, Clone)]
pub struct VisualizeOptions {
    pub save: SaveMode,

    /// Directory for default or relative save paths; the working directory
    /// when unset
    pub save_dir: Option<PathBuf>,

    /// Load an existing save file instead of versioning it away
    pub load_from_saved: bool,

    /// Truncate an existing save file instead of creating `name-N.json`
    pub overwrite: bool,

    /// Fixed listening port; `None` scans from the default.
    /// Port 0 asks the OS for an ephemeral port (used by tests).
    pub port: Option<u16>,

    /// Bind host override; the configured host when unset
    pub host: Option<String>,

    /// Suppress the startup message
    pub quiet: bool,

    /// Resolved settings override; `Settings::load()` when unset
    pub settings: Option<Settings>,
}

impl Default for VisualizeOptions {
    fn default() -> Self {
        Self {
            save: SaveMode::Default,
            save_dir: None,
            load_from_saved: true,
            overwrite: false,
            port: None,
            host: None,
            quiet: false,
            settings: None,
        }
    }
}

/// A running visualization server.
///
/// Dropping the handle leaves the server running; `stop` shuts it down
/// gracefully and removes the pid file.
pub struct ServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<std::thread::JoinHandle<Result<()>>>,
    pid_file: ServerPidFile,
}

impl ServerHandle {
    /// Gracefully stop the server, draining open client sessions.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let result = match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| Error::Other("server thread panicked".into()))?,
            None => Ok(()),
        };
        self.pid_file.delete().ok();
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // Keep the server alive past the handle: leaking the sender leaves
        // the shutdown channel open for the process lifetime
        if let Some(tx) = self.shutdown_tx.take() {
            std::mem::forget(tx);
        }
    }
}

/// Return value of [`visualize`].
pub struct VisualizeResult {
    /// Canonical flowsheet id (may differ from the requested name)
    pub name: String,
    pub port: u16,
    pub url: String,
    /// Description of where the layout document is persisted
    pub store_location: String,
    handle: ServerHandle,
}

impl std::fmt::Debug for VisualizeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizeResult")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("url", &self.url)
            .field("store_location", &self.store_location)
            .finish_non_exhaustive()
    }
}

impl VisualizeResult {
    /// Stop the server behind this result.
    pub fn stop(mut self) -> Result<()> {
        self.handle.stop()
    }
}

/// Serve `flowsheet` in the browser-based diagram editor.
///
/// Starts the web server on a background thread and returns immediately.
/// The URL is logged unless `quiet` is set.
///
/// # Errors
///
/// - [`Error::PortInUse`] when a requested port is taken
/// - [`Error::Datastore`] when the save location cannot be used
/// - [`Error::Extraction`] when the model cannot be walked
pub fn visualize(
    flowsheet: Flowsheet,
    name: &str,
    options: VisualizeOptions,
) -> Result<VisualizeResult> {
    let settings = match &options.settings {
        Some(settings) => settings.clone(),
        None => Settings::load()?,
    };
    let host = options.host.clone().unwrap_or_else(|| settings.host.clone());
    let id = canonical_name(name);
    if id.is_empty() {
        return Err(Error::InvalidInput(format!(
            "flowsheet name '{}' has no usable characters",
            name
        )));
    }
    if id != name {
        tracing::warn!(old = name, new = %id, "flowsheet name changed");
        if !options.quiet {
            println!("Flowsheet name changed to '{}'", id);
        }
    }

    let (store, watch_path): (Box<dyn DataStore>, Option<PathBuf>) =
        match resolve_save_path(&id, &options)? {
            Some(path) => (Box::new(FileDataStore::new(&path)), Some(path)),
            None => (Box::new(MemoryDataStore::new()), None),
        };

    // Bind before anything else so a busy port fails cleanly
    let listener = bind_listener(&host, options.port.or(settings.port))?;
    let port = listener.local_addr()?.port();

    let state = AppState::new(settings);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|e| Error::Other(format!("failed to create runtime: {}", e)))?;

    runtime.block_on(state.add_flowsheet(&id, flowsheet, store))?;
    let store_location = state
        .stores
        .location(&id)
        .unwrap_or_else(|| "memory".to_string());

    let data_dir = get_data_dir(&id)?;
    let pid_file = ServerPidFile::new(&data_dir);
    pid_file.write(&PidInfo {
        pid: std::process::id(),
        port,
        host: host.clone(),
    })?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_state = state.clone();
    let join = match std::thread::Builder::new()
        .name("flowvis-server".into())
        .spawn(move || {
            runtime.block_on(async move {
                if let Some(path) = watch_path {
                    server_state.spawn_save_watcher(path);
                }
                start_server(server_state, listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await
            })
        }) {
        Ok(join) => join,
        Err(e) => {
            pid_file.delete().ok();
            return Err(Error::Io(e));
        }
    };

    let url = format!("http://{}:{}/app?id={}", host, port, id);
    tracing::info!(%url, "flowsheet visualization ready");
    if !options.quiet {
        println!("Flowsheet visualization at: {}", url);
    }

    Ok(VisualizeResult {
        name: id,
        port,
        url,
        store_location,
        handle: ServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
            pid_file,
        },
    })
}

/// Block until Ctrl-C. Useful at the end of a script.
pub fn loop_forever(quiet: bool) {
    static INTERRUPTED: AtomicBool = AtomicBool::new(false);
    static HANDLER: OnceLock<bool> = OnceLock::new();

    let installed = *HANDLER.get_or_init(|| {
        ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
            .map_err(|e| tracing::warn!(error = %e, "could not install Ctrl-C handler"))
            .is_ok()
    });
    if !installed {
        return;
    }
    INTERRUPTED.store(false, Ordering::SeqCst);

    if !quiet {
        println!("Type ^C to stop the program");
    }
    while !INTERRUPTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    if !quiet {
        println!("Program stopped");
    }
}

/// Serve `flowsheet` headlessly, capture the diagram to `path`, stop.
///
/// The output format is determined by the file extension; only `.png` is
/// supported (a headless-browser screenshot).
pub fn export_flowsheet_diagram(
    flowsheet: Flowsheet,
    path: impl AsRef<Path>,
) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => {}
        Some(other) => {
            return Err(Error::InvalidInput(format!(
                "file extension must be '.png' (got '.{}')",
                other
            )));
        }
        None => return Err(Error::InvalidInput("file extension is required".into())),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Other(format!("cannot make directory: {}", e)))?;
        }
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidInput("output path has no file name".into()))?
        .to_string();

    let settings = Settings::load()?;
    let capture_timeout = Duration::from_secs(settings.capture_timeout_secs);
    let browser = settings.browser.clone();

    let result = visualize(
        flowsheet,
        &name,
        VisualizeOptions {
            save: SaveMode::Disabled,
            quiet: true,
            settings: Some(settings),
            ..Default::default()
        },
    )?;

    let mut capture = CaptureOptions::new(&result.url, path).with_timeout(capture_timeout);
    if let Some(browser) = browser {
        capture = capture.with_browser(browser);
    }
    let captured = capture_diagram(&capture);

    // Tear the server down whether or not the capture succeeded
    let stopped = result.stop();
    let out = captured?;
    stopped?;
    Ok(out)
}

/// Resolve the save file path, or `None` when saving is disabled.
fn resolve_save_path(id: &str, options: &VisualizeOptions) -> Result<Option<PathBuf>> {
    let save_dir = options
        .save_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let path = match &options.save {
        SaveMode::Disabled => return Ok(None),
        SaveMode::Default => save_dir.join(format!("{}.json", id)),
        SaveMode::Path(p) => {
            if p.is_absolute() {
                p.clone()
            } else {
                save_dir.join(p)
            }
        }
    };

    if path.exists() && options.load_from_saved && !options.overwrite {
        tracing::info!(path = %path.display(), "loading saved flowsheet layout");
        return Ok(Some(path));
    }
    let resolved = versioned_save_path(id, &path, options.overwrite)?;
    Ok(Some(resolved))
}
