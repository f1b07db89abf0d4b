use crate::config::Timeouts;
use crate::context::Paths;
use crate::error::{Result, SyncError};
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep PTZ camera presets in step with the scene mixer")]
pub struct Args {
    /// Configuration document ({ mixerConfig, cameraPtzConfig })
    #[arg(short, long, default_value = "ptz-sync.json")]
    pub config: PathBuf,

    /// Data directory for cached thumbnails and logs (default: per-user local data dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level for stdout
    #[arg(short = 'l', long = "log", default_value = "INFO")]
    pub log_level: String,

    /// Timeout in milliseconds for device queries and mixer requests
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the mixer's scenes with program and preview
    Scenes,
    /// List a camera's presets
    Presets {
        camera: String,
        /// Include hidden presets and ignore the preset limit
        #[arg(long)]
        all: bool,
    },
    /// Read a camera's current position
    Position { camera: String },
    /// Move a camera to a preset and cut it to program
    Goto {
        camera: String,
        preset: String,
        /// Stop after the preview switch
        #[arg(long)]
        preview_only: bool,
    },
    /// Load (or capture) a preset thumbnail
    Thumbnail {
        camera: String,
        preset: String,
        /// Capture again even when cached
        #[arg(long)]
        refresh: bool,
        /// Write the decoded PNG here
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Drop every cached thumbnail of a camera
    ClearThumbnails { camera: String },
    /// Save a JPEG straight from an Axis camera
    Snapshot {
        camera: String,
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Connect everything and print camera and mixer events until Ctrl-C
    Watch,
}

impl Args {
    pub fn timeouts(&self) -> Timeouts {
        let request = Duration::from_millis(self.timeout_ms);
        let defaults = Timeouts::default();
        Timeouts {
            request,
            goto: defaults.goto.max(request),
        }
    }

    pub fn paths(&self) -> Result<Paths> {
        match &self.data_dir {
            Some(dir) => Ok(Paths::new(dir)),
            None => Paths::user_default().ok_or_else(|| {
                SyncError::Config("no local data directory, pass --data-dir".to_string())
            }),
        }
    }
}

/// Bytes of a `data:<mime>;base64,<payload>` URL, or of bare base64.
pub fn decode_image(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(";base64,") {
        Some((_, encoded)) => encoded,
        None => payload,
    };
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| SyncError::protocol(format!("invalid image payload: {err}")))
}
