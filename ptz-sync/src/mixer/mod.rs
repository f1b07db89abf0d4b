//! Connection to the scene mixer (obs-websocket v5).

pub mod link;
pub mod protocol;
pub mod session;
pub mod state;

pub use link::{LinkEvent, MixerConnector, MixerLink, WsConnector};
pub use session::{MixerSession, SceneSwitcher};
pub use state::{LinkStatus, MixerScene, MixerState, SceneRef};
