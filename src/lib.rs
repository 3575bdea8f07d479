//! Flowvis - a local web visualization layer for process flowsheet models.
//!
//! This library exposes a live flowsheet model (unit operations connected by
//! material and energy streams) through a local web server and a browser-based
//! diagram editor. A script or notebook-style session calls
//! [`visualize`](visualize::visualize) with a [`Flowsheet`](model::Flowsheet)
//! and gets back a handle carrying the server port and URL; the browser client
//! renders the extracted graph, lets the user rearrange it, and saves the
//! layout back through the server. A headless-browser capture service can turn
//! the rendered diagram into a PNG for embedding elsewhere.
//!
//! The crate also ships the `fv` CLI binary for serving model documents from
//! the command line.

pub mod capture;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod model;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod visualize;

pub use model::{Flowsheet, Stream, StreamType, UnitOperation, UnitType, VariableValue};
pub use snapshot::{Edge, FlowsheetGraph, Node, Position};
pub use visualize::{VisualizeOptions, VisualizeResult, visualize};

use thiserror::Error;

/// Errors that can occur during flowvis operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The model's stream graph could not be walked into a snapshot.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// No flowsheet has been loaded into the server yet.
    #[error("No flowsheet loaded")]
    NoModelLoaded,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A requested listening port is already taken.
    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// Headless-browser capture failed or timed out.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The layout datastore could not be read or written.
    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for flowvis operations.
pub type Result<T> = std::result::Result<T, Error>;
