use super::link::{LinkEvent, MixerConnector, MixerLink};
use super::protocol;
use super::state::{LinkStatus, MixerState};
use crate::config::MixerConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Delay between the identified handshake and the first scene list fetch.
pub const WARM_UP: Duration = Duration::from_secs(2);

/// Scene operations the orchestrator depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SceneSwitcher: Send + Sync {
    fn state(&self) -> MixerState;
    /// Skipped while the mixer is not connected.
    async fn change_program_scene(&self, scene_id: &str) -> Result<()>;
    /// Skipped while the mixer is not connected.
    async fn change_preview_scene(&self, scene_id: &str) -> Result<()>;
    /// Screenshot of the scene's output as the mixer encodes it (base64 PNG).
    async fn get_image(&self, scene_id: &str) -> Result<String>;
}

struct ActiveLink {
    config: MixerConfig,
    link: Option<Arc<dyn MixerLink>>,
    pump: Option<JoinHandle<()>>,
}

/// The single connection to the scene mixer.
pub struct MixerSession {
    connector: Arc<dyn MixerConnector>,
    warm_up: Duration,
    active: Mutex<Option<ActiveLink>>,
    state: Arc<watch::Sender<MixerState>>,
    scene_writes: Mutex<()>,
}

impl MixerSession {
    pub fn new(connector: Arc<dyn MixerConnector>) -> Self {
        Self::with_warm_up(connector, WARM_UP)
    }

    pub fn with_warm_up(connector: Arc<dyn MixerConnector>, warm_up: Duration) -> Self {
        let (state, _) = watch::channel(MixerState::default());
        Self {
            connector,
            warm_up,
            active: Mutex::new(None),
            state: Arc::new(state),
            scene_writes: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MixerState> {
        self.state.subscribe()
    }

    /// Same config keeps the current link; anything else reconnects.
    pub async fn apply_config(&self, config: Option<MixerConfig>) -> Result<()> {
        let mut active = self.active.lock().await;
        if let (Some(current), Some(next)) = (active.as_ref(), config.as_ref()) {
            if &current.config == next {
                return Ok(());
            }
        }
        self.teardown(&mut active).await;
        match config {
            Some(config) => self.open(&mut active, config).await,
            None => Ok(()),
        }
    }

    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        self.teardown(&mut active).await;
    }

    /// Reconnects a dropped link, otherwise re-reads the scene list.
    pub async fn reload_scenes(&self) -> Result<()> {
        if !self.state().is_connected() {
            let mut active = self.active.lock().await;
            let Some(config) = active.as_ref().map(|current| current.config.clone()) else {
                return Err(SyncError::NotConnected);
            };
            tracing::info!("reconnecting mixer to reload scenes");
            self.teardown(&mut active).await;
            return self.open(&mut active, config).await;
        }
        let link = self.link().await?;
        let list = protocol::parse_scene_list(link.call("GetSceneList", Value::Null).await?)?;
        self.state.send_modify(|state| state.scenes = list.scenes);
        Ok(())
    }

    async fn link(&self) -> Result<Arc<dyn MixerLink>> {
        self.active
            .lock()
            .await
            .as_ref()
            .and_then(|active| active.link.clone())
            .ok_or(SyncError::NotConnected)
    }

    async fn open(&self, active: &mut Option<ActiveLink>, config: MixerConfig) -> Result<()> {
        self.state.send_modify(|state| {
            state.clear();
            state.status = LinkStatus::Connecting;
        });
        let (events, queue) = mpsc::unbounded_channel();
        match self.connector.open(&config, events).await {
            Ok(link) => {
                tracing::info!(url = %config.url(), "mixer connected, warming up");
                let pump = tokio::spawn(pump(
                    link.clone(),
                    queue,
                    self.state.clone(),
                    self.warm_up,
                ));
                *active = Some(ActiveLink {
                    config,
                    link: Some(link),
                    pump: Some(pump),
                });
                Ok(())
            }
            Err(err) => {
                tracing::error!(url = %config.url(), error = %err, "mixer connection failed");
                self.state.send_modify(MixerState::clear);
                // Keep the config so a reload can retry.
                *active = Some(ActiveLink {
                    config,
                    link: None,
                    pump: None,
                });
                Err(err)
            }
        }
    }

    async fn teardown(&self, active: &mut Option<ActiveLink>) {
        let Some(current) = active.take() else {
            return;
        };
        if let Some(pump) = current.pump {
            pump.abort();
        }
        if let Some(link) = current.link {
            link.close().await;
            tracing::info!(url = %current.config.url(), "mixer disconnected");
        }
        self.state.send_modify(MixerState::clear);
    }

    async fn scene_request(&self, request_type: &str, scene_id: &str) -> Result<()> {
        if !self.state().is_connected() {
            tracing::debug!(request_type, scene_id, "mixer not connected, scene change skipped");
            return Ok(());
        }
        let _serial = self.scene_writes.lock().await;
        let link = self.link().await?;
        link.call(request_type, json!({ "sceneUuid": scene_id })).await?;
        Ok(())
    }
}

/// Warms up, loads the snapshot, then applies pushes until the link closes.
async fn pump(
    link: Arc<dyn MixerLink>,
    mut queue: mpsc::UnboundedReceiver<LinkEvent>,
    state: Arc<watch::Sender<MixerState>>,
    warm_up: Duration,
) {
    tokio::time::sleep(warm_up).await;
    // The start-up burst predates the snapshot; anything queued after the
    // request is applied on top of it below.
    while let Ok(event) = queue.try_recv() {
        if let LinkEvent::Closed(reason) = event {
            return closed(&state, reason);
        }
    }
    let snapshot = match link.call("GetSceneList", Value::Null).await {
        Ok(data) => protocol::parse_scene_list(data),
        Err(err) => Err(err),
    };
    match snapshot {
        Ok(list) => {
            tracing::info!(scenes = list.scenes.len(), "mixer scene list loaded");
            state.send_modify(|state| state.apply_snapshot(list));
        }
        Err(err) => {
            tracing::error!(error = %err, "mixer scene list fetch failed");
            state.send_modify(MixerState::clear);
            return;
        }
    }
    while let Some(event) = queue.recv().await {
        match event {
            LinkEvent::Event(event) => {
                tracing::debug!(?event, "mixer event");
                state.send_modify(|state| state.apply_event(event));
            }
            LinkEvent::Closed(reason) => return closed(&state, reason),
        }
    }
}

fn closed(state: &watch::Sender<MixerState>, reason: Option<String>) {
    tracing::warn!(reason = reason.as_deref().unwrap_or("-"), "mixer connection closed");
    state.send_modify(MixerState::clear);
}

#[async_trait]
impl SceneSwitcher for MixerSession {
    fn state(&self) -> MixerState {
        self.state.borrow().clone()
    }

    async fn change_program_scene(&self, scene_id: &str) -> Result<()> {
        self.scene_request("SetCurrentProgramScene", scene_id).await?;
        // Written locally too; the push event confirms it later.
        self.state.send_modify(|state| {
            if state.is_connected() {
                state.program_scene = Some(state.scene_ref(scene_id));
            }
        });
        Ok(())
    }

    async fn change_preview_scene(&self, scene_id: &str) -> Result<()> {
        self.scene_request("SetCurrentPreviewScene", scene_id).await?;
        self.state.send_modify(|state| {
            if state.is_connected() {
                state.preview_scene = Some(state.scene_ref(scene_id));
            }
        });
        Ok(())
    }

    async fn get_image(&self, scene_id: &str) -> Result<String> {
        if !self.state().is_connected() {
            return Err(SyncError::NotConnected);
        }
        let link = self.link().await?;
        let data = link
            .call(
                "GetSourceScreenshot",
                json!({ "sourceUuid": scene_id, "imageFormat": "png" }),
            )
            .await?;
        data.get("imageData")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::protocol("GetSourceScreenshot without imageData"))
    }
}
