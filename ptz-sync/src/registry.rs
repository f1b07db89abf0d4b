use crate::camera::{self, CameraDriver};
use crate::config::{CameraConfig, SettlePolicy, Timeouts};
use crate::error::{Result, SyncError};
use crate::ptz::{PtzPosition, PtzPreset};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    Connected { id: String },
    Disconnected { id: String },
    Log { id: String, message: String },
}

#[cfg_attr(test, mockall::automock)]
pub trait DriverFactory: Send + Sync {
    fn create(&self, config: &CameraConfig) -> Result<Arc<dyn CameraDriver>>;
}

/// Builds the protocol driver named by the config, bounded by `timeouts`.
pub struct DeviceDriverFactory {
    timeouts: Timeouts,
    settle: SettlePolicy,
}

impl DeviceDriverFactory {
    pub fn new(timeouts: Timeouts, settle: SettlePolicy) -> Self {
        Self { timeouts, settle }
    }
}

impl DriverFactory for DeviceDriverFactory {
    fn create(&self, config: &CameraConfig) -> Result<Arc<dyn CameraDriver>> {
        camera::build_driver(config, self.timeouts, self.settle)
    }
}

/// Live camera drivers keyed by camera config id.
pub struct CameraRegistry {
    factory: Arc<dyn DriverFactory>,
    drivers: RwLock<HashMap<String, Arc<dyn CameraDriver>>>,
    events: broadcast::Sender<CameraEvent>,
}

impl CameraRegistry {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory,
            drivers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.events.subscribe()
    }

    /// Connects the camera if needed and returns its presets.
    pub async fn init(&self, config: &CameraConfig) -> Result<Vec<PtzPreset>> {
        let driver = self.driver_for(config).await?;
        if !driver.is_connected() {
            tracing::info!(camera_id = %config.id, name = %config.name, "connecting camera");
            if let Err(err) = driver.connect().await {
                tracing::error!(camera_id = %config.id, error = %err, "camera connect failed");
                self.publish(CameraEvent::Log {
                    id: config.id.clone(),
                    message: format!("connect failed: {err}"),
                });
                return Err(err);
            }
            self.publish(CameraEvent::Connected {
                id: config.id.clone(),
            });
        }
        let presets = driver.get_presets().await;
        self.track(&config.id, presets)
    }

    /// Drops the current driver (config edited) and initializes a new one.
    pub async fn reset(&self, config: &CameraConfig) -> Result<Vec<PtzPreset>> {
        self.remove(&config.id).await;
        self.init(config).await
    }

    pub async fn remove(&self, id: &str) {
        let removed = self.drivers.write().await.remove(id);
        if removed.is_some_and(|driver| driver.is_connected()) {
            self.publish(CameraEvent::Disconnected { id: id.to_string() });
        }
    }

    /// A connected driver. Callers must `init` first.
    pub async fn get(&self, id: &str) -> Result<Arc<dyn CameraDriver>> {
        self.drivers
            .read()
            .await
            .get(id)
            .filter(|driver| driver.is_connected())
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    pub async fn ids(&self) -> Vec<String> {
        self.drivers.read().await.keys().cloned().collect()
    }

    pub async fn get_presets(&self, id: &str) -> Result<Vec<PtzPreset>> {
        let driver = self.get(id).await?;
        let result = driver.get_presets().await;
        self.track(id, result)
    }

    pub async fn get_position(&self, id: &str) -> Result<PtzPosition> {
        let driver = self.get(id).await?;
        let result = driver.get_position().await;
        self.track(id, result)
    }

    pub async fn goto(&self, id: &str, preset_id: &str) -> Result<PtzPosition> {
        let driver = self.get(id).await?;
        let result = driver.goto(preset_id).await;
        self.track(id, result)
    }

    async fn driver_for(&self, config: &CameraConfig) -> Result<Arc<dyn CameraDriver>> {
        if let Some(driver) = self.drivers.read().await.get(&config.id) {
            return Ok(driver.clone());
        }
        let mut drivers = self.drivers.write().await;
        if let Some(driver) = drivers.get(&config.id) {
            return Ok(driver.clone());
        }
        let driver = self.factory.create(config)?;
        drivers.insert(config.id.clone(), driver.clone());
        Ok(driver)
    }

    fn track<T>(&self, id: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_link_failure() {
                self.publish(CameraEvent::Disconnected { id: id.to_string() });
            }
            self.publish(CameraEvent::Log {
                id: id.to_string(),
                message: err.to_string(),
            });
        }
        result
    }

    fn publish(&self, event: CameraEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
