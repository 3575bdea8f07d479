//! Server process lifecycle: pid files, port selection, data directories.
//!
//! A running server is tracked by a pid file in a per-flowsheet data
//! directory so later invocations (`fv status`, `fv stop`) can find it. The
//! file uses a simple line format:
//! ```text
//! PID=12345
//! PORT=49999
//! HOST=127.0.0.1
//! ```
//!
//! Port selection policy is explicit: a caller-specified port that is busy
//! fails with [`Error::PortInUse`] - never a silent fallback. Only when no
//! port was requested does [`bind_listener`] scan upward from
//! [`DEFAULT_PORT`] for a free one.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default listening port for the visualization server.
pub const DEFAULT_PORT: u16 = 49999;

/// How many ports above the default to probe when scanning.
const PORT_SCAN_RANGE: u16 = 100;

/// Information stored in the server pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidInfo {
    /// Process ID of the running server
    pub pid: u32,
    /// Port the server is listening on
    pub port: u16,
    /// Host/address the server is bound to
    pub host: String,
}

/// Liveness of the process a pid file points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The recorded pid is alive
    Running,
    /// The recorded pid no longer exists
    NotRunning,
    /// Liveness could not be determined on this platform
    Stale,
}

/// Check whether a process with the given pid is alive.
#[cfg(unix)]
pub fn verify_process(pid: u32) -> ProcessStatus {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // A pid outside the i32 range would alias a process group
    let Ok(pid) = i32::try_from(pid) else {
        return ProcessStatus::NotRunning;
    };

    // Signal 0: existence probe only
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => ProcessStatus::Running,
        // Alive but owned by someone else
        Err(Errno::EPERM) => ProcessStatus::Running,
        Err(Errno::ESRCH) => ProcessStatus::NotRunning,
        Err(_) => ProcessStatus::Stale,
    }
}

#[cfg(not(unix))]
pub fn verify_process(_pid: u32) -> ProcessStatus {
    ProcessStatus::Stale
}

/// Manages the server pid file for process lifecycle tracking.
#[derive(Debug)]
pub struct ServerPidFile {
    path: PathBuf,
}

impl ServerPidFile {
    /// Pid file inside the given data directory (see [`get_data_dir`]).
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("server.pid"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the pid file, creating the parent directory if needed.
    pub fn write(&self, info: &PidInfo) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = format!("PID={}\nPORT={}\nHOST={}\n", info.pid, info.port, info.host);
        let mut file = fs::File::create(&self.path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read and parse the pid file. `Ok(None)` when it does not exist.
    pub fn read(&self) -> io::Result<Option<PidInfo>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(Self::parse_contents(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the pid file if it exists.
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the pid file and classify the recorded process.
    ///
    /// `Ok(None)` when no pid file exists.
    pub fn check_running(&self) -> io::Result<Option<(ProcessStatus, PidInfo)>> {
        match self.read()? {
            None => Ok(None),
            Some(info) => {
                let status = verify_process(info.pid);
                Ok(Some((status, info)))
            }
        }
    }

    fn parse_contents(contents: &str) -> io::Result<PidInfo> {
        let mut pid: Option<u32> = None;
        let mut port: Option<u16> = None;
        let mut host: Option<String> = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                match key {
                    "PID" => {
                        pid = Some(value.parse().map_err(|_| {
                            io::Error::new(io::ErrorKind::InvalidData, "Invalid PID value")
                        })?);
                    }
                    "PORT" => {
                        port = Some(value.parse().map_err(|_| {
                            io::Error::new(io::ErrorKind::InvalidData, "Invalid PORT value")
                        })?);
                    }
                    "HOST" => {
                        host = Some(value.to_string());
                    }
                    // Unknown keys are ignored for forward compatibility
                    _ => {}
                }
            }
        }

        let pid =
            pid.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing PID field"))?;
        let port =
            port.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing PORT field"))?;
        let host =
            host.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing HOST field"))?;

        Ok(PidInfo { pid, port, host })
    }
}

/// Find a free port, probing `start`, `start+1`, ... within the scan range.
pub fn find_available_port(host: &str, start: u16) -> Option<u16> {
    for offset in 0..PORT_SCAN_RANGE {
        let port = start.checked_add(offset)?;
        if TcpListener::bind((host, port)).is_ok() {
            return Some(port);
        }
    }
    None
}

/// Bind the server's listener according to the port policy.
///
/// With `Some(port)` the port is binding-or-failing: an occupied port is
/// [`Error::PortInUse`]. With `None` the first free port at or above
/// [`DEFAULT_PORT`] is used.
pub fn bind_listener(host: &str, port: Option<u16>) -> Result<TcpListener> {
    match port {
        Some(port) => TcpListener::bind((host, port)).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                Error::PortInUse(port)
            } else {
                Error::Io(e)
            }
        }),
        None => {
            let port = find_available_port(host, DEFAULT_PORT).ok_or_else(|| {
                Error::Other(format!(
                    "no available port found starting from {}",
                    DEFAULT_PORT
                ))
            })?;
            TcpListener::bind((host, port)).map_err(Error::Io)
        }
    }
}

/// Per-flowsheet data directory: `~/.local/share/flowvis/<key-hash>`.
///
/// The `FLOWVIS_DATA_DIR` environment variable overrides the base directory
/// (used by tests and containerized runs).
pub fn get_data_dir(key: &str) -> Result<PathBuf> {
    let base = match std::env::var_os("FLOWVIS_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .ok_or_else(|| Error::Other("could not determine local data directory".into()))?
            .join("flowvis"),
    };
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let short: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    let dir = base.join(short);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
