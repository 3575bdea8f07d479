//! File system watcher for externally edited save files.
//!
//! When a flowsheet's save file changes on disk (an editor, a sync tool, a
//! second process), connected clients get a `reload` notification so they
//! re-fetch the document. Events are debounced: rapid bursts of writes
//! collapse into one notification.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::protocol::ServerMessage;

/// Wait this long after the last event before notifying.
const DEBOUNCE_MS: u64 = 100;

/// Watch one save file for changes, broadcasting `reload` notifications.
///
/// Runs until the watcher or the channel is torn down; callers spawn it on
/// the server runtime.
pub async fn watch_save_file(
    save_path: PathBuf,
    update_tx: broadcast::Sender<String>,
) -> notify::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default(),
    )?;

    // Watch the parent directory: editors replace files by rename, which
    // would drop a watch on the file itself
    let watch_dir = save_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %save_path.display(), "watching save file");
    let file_name = save_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();

    let mut pending_update = false;
    let mut last_event_time = Instant::now();

    loop {
        let timeout = if pending_update {
            let debounce = Duration::from_millis(DEBOUNCE_MS);
            debounce.saturating_sub(last_event_time.elapsed())
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let touches_save_file = event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                        let relevant = matches!(
                            event.kind,
                            notify::EventKind::Create(_)
                                | notify::EventKind::Modify(_)
                                | notify::EventKind::Remove(_)
                        );
                        if touches_save_file && relevant {
                            pending_update = true;
                            last_event_time = Instant::now();
                        }
                    }
                    None => break, // Channel closed
                }
            }
            _ = tokio::time::sleep(timeout), if pending_update => {
                let _ = update_tx.send(
                    ServerMessage::Reload {
                        timestamp: chrono::Utc::now(),
                    }
                    .to_json(),
                );
                pending_update = false;
            }
        }
    }

    Ok(())
}
