pub mod camera;
pub mod cli;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod http_client;
pub mod image_cache;
pub mod logging;
pub mod mixer;
pub mod monitor;
pub mod onvif_parse;
pub mod onvif_requests;
pub mod orchestrator;
pub mod ptz;
pub mod registry;
pub mod soap;
pub mod wsse;

pub use context::{Paths, SyncContext};
pub use error::{Result, SyncError};
