//! Shared fixtures and helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::OnceLock;
use tempfile::TempDir;
use tokio::sync::oneshot;

use flowvis::config::Settings;
use flowvis::lifecycle::bind_listener;
use flowvis::model::{Flowsheet, Stream, UnitOperation, UnitType, VariableValue};
use flowvis::server::{AppState, start_server};
use flowvis::store::MemoryDataStore;

/// Global test data directory, shared by every test in the process.
///
/// `OnceLock` keeps the `TempDir` alive for the process lifetime and makes
/// sure the env var is set exactly once, before any test resolves a data
/// directory.
static TEST_DATA_DIR: OnceLock<TempDir> = OnceLock::new();

/// Point `FLOWVIS_DATA_DIR` at an isolated temp dir for this test process.
pub fn init_test_data_dir() {
    TEST_DATA_DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        // SAFETY: set_var is not thread-safe on POSIX; OnceLock ensures this
        // runs exactly once, before any test reads the variable.
        unsafe {
            std::env::set_var("FLOWVIS_DATA_DIR", dir.path());
        }
        dir
    });
}

/// Three units joined by two streams: feed -> heater -> product.
pub fn plant() -> Flowsheet {
    let mut fs = Flowsheet::new("plant");
    fs.add_unit(UnitOperation::new("F01", UnitType::Feed).with_label("Feed"))
        .unwrap();
    fs.add_unit(
        UnitOperation::new("H01", UnitType::Heater)
            .with_label("Feed heater")
            .with_variable("duty", VariableValue::with_units(1.5e5, "W")),
    )
    .unwrap();
    fs.add_unit(UnitOperation::new("P01", UnitType::Product).with_label("Product"))
        .unwrap();
    fs.add_stream(
        Stream::material("S01", "F01", "H01")
            .with_variable("flow_mol", VariableValue::with_units(100.0, "mol/s")),
    )
    .unwrap();
    fs.add_stream(Stream::material("S02", "H01", "P01")).unwrap();
    fs
}

/// Fresh state with the plant registered under an in-memory store.
pub async fn plant_state() -> (AppState, String) {
    let state = AppState::new(Settings::default());
    let id = state
        .add_flowsheet("plant", plant(), Box::new(MemoryDataStore::new()))
        .await
        .unwrap();
    (state, id)
}

/// Serve `state` on an ephemeral port; returns the address and a shutdown
/// sender.
pub async fn spawn_server(state: AppState) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = bind_listener("127.0.0.1", Some(0)).unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(start_server(state, listener, async move {
        let _ = shutdown_rx.await;
    }));
    // Give the accept loop a beat to come up
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, shutdown_tx)
}
