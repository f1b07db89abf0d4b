use crate::config::{AppConfig, CameraConfig, SettlePolicy, Timeouts};
use crate::error::{Result, SyncError};
use crate::image_cache::ImageCache;
use crate::mixer::{MixerConnector, MixerSession, MixerState, WsConnector};
use crate::orchestrator::{GotoOutcome, OperationStatus, Orchestrator};
use crate::ptz::{PtzPosition, PtzPreset};
use crate::registry::{CameraEvent, CameraRegistry, DeviceDriverFactory, DriverFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const APP_DIR: &str = "ptz-sync";

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Per-user local data directory, when the platform has one.
    pub fn user_default() -> Option<Self> {
        dirs::data_local_dir().map(|dir| Self::new(dir.join(APP_DIR)))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }
}

/// Everything the operator surface talks to, built once at start-up.
pub struct SyncContext {
    config: AppConfig,
    cameras: Arc<CameraRegistry>,
    mixer: Arc<MixerSession>,
    orchestrator: Orchestrator,
}

impl SyncContext {
    pub fn new(config: AppConfig, paths: &Paths, timeouts: Timeouts) -> Self {
        Self::with_parts(
            config,
            paths,
            Arc::new(DeviceDriverFactory::new(timeouts, SettlePolicy::default())),
            Arc::new(WsConnector::new(timeouts.request)),
        )
    }

    pub fn with_parts(
        config: AppConfig,
        paths: &Paths,
        drivers: Arc<dyn DriverFactory>,
        connector: Arc<dyn MixerConnector>,
    ) -> Self {
        let cameras = Arc::new(CameraRegistry::new(drivers));
        let mixer = Arc::new(MixerSession::new(connector));
        let orchestrator = Orchestrator::new(
            cameras.clone(),
            mixer.clone(),
            ImageCache::new(&paths.data_dir),
        );
        Self {
            config,
            cameras,
            mixer,
            orchestrator,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn camera(&self, id: &str) -> Result<&CameraConfig> {
        self.config.camera(id)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn mixer(&self) -> &MixerSession {
        &self.mixer
    }

    /// Connects the mixer and every configured camera. Individual failures
    /// are logged and left for a later `init`.
    pub async fn start(&self) {
        if let Err(err) = self.mixer.apply_config(self.config.mixer_config.clone()).await {
            tracing::error!(error = %err, "mixer unavailable at start-up");
        }
        for camera in self.config.cameras.values() {
            match self.cameras.init(camera).await {
                Ok(presets) => {
                    tracing::info!(camera_id = %camera.id, presets = presets.len(), "camera ready")
                }
                Err(err) => tracing::error!(camera_id = %camera.id, error = %err, "camera unavailable"),
            }
            self.orchestrator.start_position_monitor(camera);
        }
    }

    pub async fn shutdown(&self) {
        self.orchestrator.stop_position_monitors();
        self.mixer.disconnect().await;
        for id in self.cameras.ids().await {
            self.cameras.remove(&id).await;
        }
        tracing::info!("shut down");
    }

    /// Waits for the mixer's scene snapshot. False when `limit` ran out.
    pub async fn wait_for_mixer(&self, limit: Duration) -> bool {
        let mut state = self.mixer.subscribe();
        let ready = matches!(
            tokio::time::timeout(limit, state.wait_for(MixerState::is_connected)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// Connects the camera if needed and returns every preset it reports.
    pub async fn init(&self, id: &str) -> Result<Vec<PtzPreset>> {
        self.cameras.init(self.camera(id)?).await
    }

    pub async fn get_presets(&self, id: &str) -> Result<Vec<PtzPreset>> {
        self.init(id).await
    }

    /// Presets with the camera's hidden list and limit applied.
    pub async fn visible_presets(&self, id: &str) -> Result<Vec<PtzPreset>> {
        let presets = self.init(id).await?;
        Ok(Orchestrator::visible_presets(self.camera(id)?, &presets))
    }

    pub async fn get_position(&self, id: &str) -> Result<PtzPosition> {
        self.init(id).await?;
        self.cameras.get_position(id).await
    }

    pub async fn goto(
        &self,
        id: &str,
        preset_id: &str,
        send_to_program: bool,
    ) -> Result<GotoOutcome> {
        let config = self.camera(id)?;
        let preset = self.find_preset(config, preset_id).await?;
        self.orchestrator
            .goto_preset(config, &preset, send_to_program)
            .await
    }

    pub async fn thumbnail(&self, id: &str, preset_id: &str, refresh: bool) -> Result<String> {
        let config = self.camera(id)?;
        let preset = self.find_preset(config, preset_id).await?;
        if refresh {
            self.orchestrator.refresh_thumbnail(config, &preset).await
        } else {
            self.orchestrator.load_thumbnail(config, &preset).await
        }
    }

    pub async fn clear_thumbnails(&self, id: &str) -> Result<()> {
        self.orchestrator.clear_thumbnails(self.camera(id)?).await
    }

    pub fn status(&self, id: &str) -> OperationStatus {
        self.orchestrator.status(id)
    }

    pub fn subscribe_camera_events(&self) -> broadcast::Receiver<CameraEvent> {
        self.cameras.subscribe()
    }

    pub fn subscribe_mixer(&self) -> watch::Receiver<MixerState> {
        self.mixer.subscribe()
    }

    pub fn subscribe_position(&self, id: &str) -> watch::Receiver<Option<PtzPosition>> {
        self.orchestrator.position_feed(id)
    }

    async fn find_preset(&self, config: &CameraConfig, preset_id: &str) -> Result<PtzPreset> {
        self.cameras
            .init(config)
            .await?
            .into_iter()
            .find(|preset| preset.id == preset_id)
            .ok_or_else(|| {
                SyncError::Config(format!("camera {} has no preset {preset_id}", config.id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraDriver, MockCameraDriver};
    use crate::config::MixerConfig;
    use crate::mixer::{LinkEvent, MixerLink, SceneSwitcher};
    use crate::registry::MockDriverFactory;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct RefusingConnector;

    #[async_trait]
    impl MixerConnector for RefusingConnector {
        async fn open(
            &self,
            _config: &MixerConfig,
            _events: mpsc::UnboundedSender<LinkEvent>,
        ) -> Result<Arc<dyn MixerLink>> {
            Err(SyncError::Connection("refused".to_string()))
        }
    }

    const DOCUMENT: &str = r#"{
        "mixerConfig": { "ip": "127.0.0.1", "port": 4455, "password": "secret" },
        "cameraPtzConfig": {
            "cam-1": {
                "id": "cam-1", "name": "Stage", "user": "admin", "password": "pw",
                "ip": "10.0.0.20", "port": 80, "sceneId": "S1", "hiddenPresets": ["2"]
            },
            "cam-2": {
                "id": "cam-2", "name": "Pulpit", "user": "admin", "password": "pw",
                "ip": "10.0.0.21", "port": 80
            }
        }
    }"#;

    fn healthy_driver() -> Arc<dyn CameraDriver> {
        let mut driver = MockCameraDriver::new();
        driver.expect_is_connected().return_const(true);
        driver.expect_get_presets().returning(|| {
            Ok(vec![
                PtzPreset::new("1", "Wide", Some(PtzPosition::new(0.0, 0.0, 0.0))),
                PtzPreset::new("2", "Close", Some(PtzPosition::new(0.5, 0.1, 0.8))),
            ])
        });
        driver
            .expect_get_position()
            .returning(|| Ok(PtzPosition::new(0.0, 0.0, 0.0)));
        driver
            .expect_goto()
            .returning(|_| Ok(PtzPosition::new(0.5, 0.1, 0.8)));
        Arc::new(driver)
    }

    fn context(dir: &tempfile::TempDir) -> SyncContext {
        let config = AppConfig::from_json(DOCUMENT).unwrap();
        let stage = healthy_driver();
        let mut factory = MockDriverFactory::new();
        factory.expect_create().returning(move |config| {
            if config.id == "cam-1" {
                Ok(stage.clone())
            } else {
                Err(SyncError::Connection("no route to host".to_string()))
            }
        });
        SyncContext::with_parts(
            config,
            &Paths::new(dir.path()),
            Arc::new(factory),
            Arc::new(RefusingConnector),
        )
    }

    #[tokio::test]
    async fn start_survives_unreachable_devices() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        context.start().await;

        assert!(!context.mixer().state().is_connected());
        assert_eq!(context.get_presets("cam-1").await.unwrap().len(), 2);
        assert!(matches!(
            context.get_presets("cam-2").await,
            Err(SyncError::Connection(_))
        ));
        assert!(matches!(
            context.get_presets("cam-9").await,
            Err(SyncError::NotFound(_))
        ));
        context.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_an_unreachable_mixer_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        context.start().await;
        assert!(!context.wait_for_mixer(Duration::from_secs(3)).await);
        context.shutdown().await;
    }

    #[tokio::test]
    async fn hidden_presets_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        let visible = context.visible_presets("cam-1").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "1");
    }

    #[tokio::test]
    async fn goto_resolves_preset_ids() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);

        let outcome = context.goto("cam-1", "2", true).await.unwrap();
        assert!(outcome.moved);
        assert!(!outcome.program_switched);
        assert_eq!(
            context.status("cam-1"),
            OperationStatus::Succeeded(PtzPosition::new(0.5, 0.1, 0.8))
        );
        assert!(matches!(
            context.goto("cam-1", "7", true).await,
            Err(SyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn thumbnails_need_the_mixer() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        assert!(matches!(
            context.thumbnail("cam-1", "1", false).await,
            Err(SyncError::NotConnected)
        ));
        context.clear_thumbnails("cam-1").await.unwrap();
    }
}
