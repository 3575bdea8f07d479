//! CLI argument definitions for the `fv` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Flowvis - serve process flowsheet models in a browser diagram editor.
#[derive(Parser, Debug)]
#[command(name = "fv")]
#[command(author, version, about = "Local web visualization for process flowsheet models", long_about = None)]
pub struct Cli {
    /// Suppress startup messages
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a flowsheet model document in the diagram editor (foreground)
    ///
    /// Loads the JSON model document, starts the web server, and blocks
    /// until Ctrl-C. The layout is saved next to the working directory
    /// unless --save or --no-save say otherwise.
    Serve {
        /// Path to the JSON model document
        model: PathBuf,

        /// Flowsheet name; the model's own name when omitted
        #[arg(long)]
        name: Option<String>,

        /// Listening port; scans from 49999 when omitted
        #[arg(short, long, env = "FLOWVIS_PORT")]
        port: Option<u16>,

        /// Bind host
        #[arg(long, env = "FLOWVIS_HOST")]
        host: Option<String>,

        /// Save the layout to this file instead of <name>.json
        #[arg(long)]
        save: Option<PathBuf>,

        /// Directory for default or relative save paths
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Keep the layout in memory only
        #[arg(long, conflicts_with = "save")]
        no_save: bool,

        /// Overwrite an existing save file instead of versioning it
        #[arg(long)]
        overwrite: bool,
    },

    /// Export a model's diagram to a PNG image via a headless browser
    Export {
        /// Path to the JSON model document
        model: PathBuf,

        /// Output image path (must end in .png)
        #[arg(short, long, default_value = "diagram.png")]
        output: PathBuf,
    },

    /// Show whether a server is running for a flowsheet
    Status {
        /// Flowsheet name
        name: String,
    },

    /// Stop the running server for a flowsheet
    Stop {
        /// Flowsheet name
        name: String,
    },
}
