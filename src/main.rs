//! Flowvis CLI - serve and capture process flowsheet diagrams.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use flowvis::cli::{Cli, Commands};
use flowvis::lifecycle::{ProcessStatus, ServerPidFile, get_data_dir};
use flowvis::model::Flowsheet;
use flowvis::server::canonical_name;
use flowvis::visualize::{
    SaveMode, VisualizeOptions, export_flowsheet_diagram, loop_forever, visualize,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flowvis=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    let result = match cli.command {
        Commands::Serve {
            model,
            name,
            port,
            host,
            save,
            save_dir,
            no_save,
            overwrite,
        } => run_serve(
            model, name, port, host, save, save_dir, no_save, overwrite, quiet,
        ),
        Commands::Export { model, output } => run_export(model, output, quiet),
        Commands::Status { name } => run_status(&name),
        Commands::Stop { name } => run_stop(&name, quiet),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_serve(
    model: PathBuf,
    name: Option<String>,
    port: Option<u16>,
    host: Option<String>,
    save: Option<PathBuf>,
    save_dir: Option<PathBuf>,
    no_save: bool,
    overwrite: bool,
    quiet: bool,
) -> flowvis::Result<()> {
    let flowsheet = Flowsheet::load(&model)?;
    let name = name.unwrap_or_else(|| flowsheet.name.clone());
    let id = canonical_name(&name);

    // Refuse to double-serve the same flowsheet
    let data_dir = get_data_dir(&id)?;
    let pid_file = ServerPidFile::new(&data_dir);
    if let Some((status, info)) = pid_file.check_running()? {
        match status {
            ProcessStatus::Running => {
                return Err(flowvis::Error::Other(format!(
                    "server already running for '{}' (pid: {}, port: {}); use `fv stop {}` first",
                    id, info.pid, info.port, id
                )));
            }
            ProcessStatus::NotRunning | ProcessStatus::Stale => {
                pid_file.delete().ok();
            }
        }
    }

    let save_mode = if no_save {
        SaveMode::Disabled
    } else {
        match save {
            Some(path) => SaveMode::Path(path),
            None => SaveMode::Default,
        }
    };

    let result = visualize(
        flowsheet,
        &name,
        VisualizeOptions {
            save: save_mode,
            save_dir,
            overwrite,
            port,
            host,
            quiet,
            ..Default::default()
        },
    )?;

    loop_forever(quiet);
    result.stop()
}

fn run_export(model: PathBuf, output: PathBuf, quiet: bool) -> flowvis::Result<()> {
    let flowsheet = Flowsheet::load(&model)?;
    let path = export_flowsheet_diagram(flowsheet, &output)?;
    if !quiet {
        println!("Diagram saved to {}", path.display());
    }
    Ok(())
}

fn run_status(name: &str) -> flowvis::Result<()> {
    let id = canonical_name(name);
    let data_dir = get_data_dir(&id)?;
    let pid_file = ServerPidFile::new(&data_dir);

    match pid_file.check_running()? {
        Some((ProcessStatus::Running, info)) => {
            println!("Server is running for '{}'", id);
            println!("  PID:  {}", info.pid);
            println!("  Port: {}", info.port);
            println!("  Host: {}", info.host);
            println!("  URL:  http://{}:{}/app?id={}", info.host, info.port, id);
        }
        Some((_, info)) => {
            println!("Server is not running for '{}' (stale pid file)", id);
            println!("  Last PID:  {}", info.pid);
            println!("  Last Port: {}", info.port);
        }
        None => {
            println!("No server has been started for '{}'", id);
        }
    }
    Ok(())
}

fn run_stop(name: &str, quiet: bool) -> flowvis::Result<()> {
    let id = canonical_name(name);
    let data_dir = get_data_dir(&id)?;
    let pid_file = ServerPidFile::new(&data_dir);

    let Some((status, info)) = pid_file.check_running()? else {
        return Err(flowvis::Error::NotFound(format!(
            "no server has been started for '{}'",
            id
        )));
    };

    match status {
        ProcessStatus::Running => {
            if !quiet {
                println!("Stopping server for '{}' (PID: {})...", id, info.pid);
            }
            if send_signal(info.pid, Signal::Term) {
                // Wait for graceful shutdown, then force
                const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);
                const POLL_INTERVAL: Duration = Duration::from_millis(100);
                let deadline = std::time::Instant::now() + GRACEFUL_TIMEOUT;
                loop {
                    std::thread::sleep(POLL_INTERVAL);
                    match pid_file.check_running()? {
                        Some((ProcessStatus::Running, _)) => {
                            if std::time::Instant::now() >= deadline {
                                if !quiet {
                                    println!("Graceful shutdown timed out, forcing termination...");
                                }
                                send_signal(info.pid, Signal::Kill);
                                std::thread::sleep(Duration::from_millis(500));
                                break;
                            }
                        }
                        _ => break,
                    }
                }
            }
            pid_file.delete().ok();
            if !quiet {
                println!("Server stopped");
            }
        }
        ProcessStatus::NotRunning | ProcessStatus::Stale => {
            pid_file.delete().ok();
            if !quiet {
                println!("Server was not running; removed stale pid file");
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> bool {
    use nix::sys::signal::{Signal as NixSignal, kill};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    kill(Pid::from_raw(pid as i32), Some(sig)).is_ok()
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> bool {
    false
}
