use crate::config::CameraConfig;
use crate::error::{Result, SyncError};
use crate::image_cache::ImageCache;
use crate::mixer::{MixerState, SceneSwitcher};
use crate::monitor::PositionMonitor;
use crate::ptz::{self, PtzPosition, PtzPreset};
use crate::registry::CameraRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Terminal result of a successful preset goto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOutcome {
    pub position: PtzPosition,
    /// False when the camera already sat on the preset.
    pub moved: bool,
    pub program_switched: bool,
}

/// Last preset operation per camera, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum OperationStatus {
    #[default]
    Idle,
    InProgress,
    Succeeded(PtzPosition),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectedSlot {
    Preview,
    Program,
}

type Operations = Arc<Mutex<HashMap<String, OperationStatus>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a camera's `InProgress` slot. Whatever happens to the operation,
/// dropping the guard leaves a terminal status behind.
struct OperationGuard {
    operations: Operations,
    camera_id: String,
    status: Option<OperationStatus>,
}

impl OperationGuard {
    fn acquire(operations: &Operations, camera_id: &str) -> Result<Self> {
        let mut table = lock(operations);
        if table.get(camera_id) == Some(&OperationStatus::InProgress) {
            return Err(SyncError::Busy(camera_id.to_string()));
        }
        table.insert(camera_id.to_string(), OperationStatus::InProgress);
        Ok(Self {
            operations: operations.clone(),
            camera_id: camera_id.to_string(),
            status: None,
        })
    }

    fn finish(mut self, status: OperationStatus) {
        self.status = Some(status);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let status = self
            .status
            .take()
            .unwrap_or_else(|| OperationStatus::Failed("operation was cancelled".to_string()));
        lock(&self.operations).insert(self.camera_id.clone(), status);
    }
}

/// Moves cameras to presets in step with the mixer's preview and program.
pub struct Orchestrator {
    cameras: Arc<CameraRegistry>,
    mixer: Arc<dyn SceneSwitcher>,
    images: ImageCache,
    positions: PositionMonitor,
    operations: Operations,
}

impl Orchestrator {
    pub fn new(
        cameras: Arc<CameraRegistry>,
        mixer: Arc<dyn SceneSwitcher>,
        images: ImageCache,
    ) -> Self {
        Self {
            cameras,
            mixer,
            images,
            positions: PositionMonitor::new(),
            operations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn status(&self, camera_id: &str) -> OperationStatus {
        lock(&self.operations)
            .get(camera_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs the full goto sequence. A camera that is already busy is
    /// rejected with `SyncError::Busy`.
    pub async fn goto_preset(
        &self,
        config: &CameraConfig,
        preset: &PtzPreset,
        send_to_program: bool,
    ) -> Result<GotoOutcome> {
        let guard = OperationGuard::acquire(&self.operations, &config.id)?;
        tracing::info!(camera_id = %config.id, preset_id = %preset.id, send_to_program, "going to preset");
        match self.run_goto(config, preset, send_to_program).await {
            Ok(outcome) => {
                tracing::info!(
                    camera_id = %config.id,
                    preset_id = %preset.id,
                    moved = outcome.moved,
                    program_switched = outcome.program_switched,
                    "preset reached"
                );
                guard.finish(OperationStatus::Succeeded(outcome.position));
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(camera_id = %config.id, preset_id = %preset.id, error = %err, "failed to go to preset");
                guard.finish(OperationStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run_goto(
        &self,
        config: &CameraConfig,
        preset: &PtzPreset,
        send_to_program: bool,
    ) -> Result<GotoOutcome> {
        let camera_id = config.id.as_str();
        let scene_id = config.scene_id();

        if let Some(scene_id) = scene_id {
            let mixer = self.mixer.state();
            if mixer.is_connected() {
                let aux_scene_id = config
                    .ax_scene_id()
                    .filter(|_| mixer.is_on_program(scene_id));
                if let Some(aux_scene_id) = aux_scene_id {
                    tracing::debug!(%camera_id, scene_id = %aux_scene_id, "moving program off the camera");
                    self.mixer.change_program_scene(aux_scene_id).await?;
                }
                self.mixer.change_preview_scene(scene_id).await?;
            } else {
                tracing::debug!(%camera_id, "mixer not connected, scene changes skipped");
            }
        }

        let current = self.cameras.get_position(camera_id).await?;
        let at_preset = preset
            .position
            .is_some_and(|target| current.matches(&target, config.position_tolerance));
        let position = if at_preset {
            tracing::debug!(%camera_id, preset_id = %preset.id, "already at preset, move skipped");
            current
        } else {
            self.cameras.goto(camera_id, &preset.id).await?
        };
        self.positions.publish(camera_id, position);

        let mut program_switched = false;
        if let Some(scene_id) = scene_id.filter(|_| send_to_program) {
            if self.mixer.state().is_connected() {
                if !at_preset {
                    tokio::time::sleep(config.transition()).await;
                }
                self.mixer.change_program_scene(scene_id).await?;
                program_switched = true;
            }
        }

        Ok(GotoOutcome {
            position,
            moved: !at_preset,
            program_switched,
        })
    }

    pub fn visible_presets(config: &CameraConfig, presets: &[PtzPreset]) -> Vec<PtzPreset> {
        ptz::visible_presets(presets, &config.hidden_presets, config.preset_limit())
    }

    /// Which mixer slot shows the camera on this preset, if any.
    pub fn selected_slot(
        config: &CameraConfig,
        preset: &PtzPreset,
        position: Option<&PtzPosition>,
        mixer: &MixerState,
    ) -> Option<SelectedSlot> {
        config.position_refresh()?;
        let scene_id = config.scene_id()?;
        let (position, target) = (position?, preset.position.as_ref()?);
        if !position.matches(target, config.position_tolerance) {
            return None;
        }
        if mixer.is_on_preview(scene_id) {
            Some(SelectedSlot::Preview)
        } else if mixer.is_on_program(scene_id) {
            Some(SelectedSlot::Program)
        } else {
            None
        }
    }

    /// Last known position of the camera, updated by gotos and the monitor.
    pub fn position_feed(&self, camera_id: &str) -> watch::Receiver<Option<PtzPosition>> {
        self.positions.subscribe(camera_id)
    }

    pub fn last_position(&self, camera_id: &str) -> Option<PtzPosition> {
        self.positions.latest(camera_id)
    }

    pub fn start_position_monitor(&self, config: &CameraConfig) -> bool {
        self.positions.start(self.cameras.clone(), config)
    }

    pub fn stop_position_monitors(&self) {
        self.positions.stop_all();
    }

    /// Cached thumbnail, captured on a miss.
    pub async fn load_thumbnail(
        &self,
        config: &CameraConfig,
        preset: &PtzPreset,
    ) -> Result<String> {
        let folder = config.thumbnail_folder();
        if let Some(payload) = self.images.get(&folder, &preset.thumbnail_file()).await? {
            return Ok(String::from_utf8_lossy(&payload).into_owned());
        }
        self.refresh_thumbnail(config, preset).await
    }

    /// Moves to the preset on preview only, captures the scene and caches it.
    pub async fn refresh_thumbnail(
        &self,
        config: &CameraConfig,
        preset: &PtzPreset,
    ) -> Result<String> {
        let scene_id = config.scene_id().ok_or_else(|| {
            SyncError::Config(format!("camera {} has no scene to capture", config.id))
        })?;
        if !self.mixer.state().is_connected() {
            return Err(SyncError::NotConnected);
        }
        let guard = OperationGuard::acquire(&self.operations, &config.id)?;
        let captured: Result<(GotoOutcome, String)> = async {
            let outcome = self.run_goto(config, preset, false).await?;
            tokio::time::sleep(config.transition()).await;
            let image = self.mixer.get_image(scene_id).await?;
            self.images
                .save(&config.thumbnail_folder(), &preset.thumbnail_file(), image.as_bytes())
                .await?;
            Ok((outcome, image))
        }
        .await;
        match captured {
            Ok((outcome, image)) => {
                tracing::info!(camera_id = %config.id, preset_id = %preset.id, "thumbnail captured");
                guard.finish(OperationStatus::Succeeded(outcome.position));
                Ok(image)
            }
            Err(err) => {
                tracing::warn!(camera_id = %config.id, preset_id = %preset.id, error = %err, "thumbnail capture failed");
                guard.finish(OperationStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn clear_thumbnail(&self, config: &CameraConfig, preset: &PtzPreset) -> Result<()> {
        self.images
            .clear(&config.thumbnail_folder(), &preset.thumbnail_file())
            .await
    }

    pub async fn clear_thumbnails(&self, config: &CameraConfig) -> Result<()> {
        tracing::info!(camera_id = %config.id, "clearing thumbnails");
        self.images.clear_folder(&config.thumbnail_folder()).await
    }
}
