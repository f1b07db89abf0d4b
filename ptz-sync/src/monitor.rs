use crate::config::CameraConfig;
use crate::ptz::PtzPosition;
use crate::registry::CameraRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type Feed = Arc<watch::Sender<Option<PtzPosition>>>;

/// Last known position per camera, optionally refreshed by a polling task.
#[derive(Default)]
pub struct PositionMonitor {
    feeds: Mutex<HashMap<String, Feed>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PositionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn feed(&self, camera_id: &str) -> Feed {
        lock(&self.feeds)
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(watch::channel(None).0))
            .clone()
    }

    pub fn subscribe(&self, camera_id: &str) -> watch::Receiver<Option<PtzPosition>> {
        self.feed(camera_id).subscribe()
    }

    pub fn publish(&self, camera_id: &str, position: PtzPosition) {
        self.feed(camera_id).send_replace(Some(position));
    }

    pub fn latest(&self, camera_id: &str) -> Option<PtzPosition> {
        *self.feed(camera_id).borrow()
    }

    /// Starts polling when the camera has a refresh interval. Replaces a
    /// running poller for the same camera.
    ///
    /// Polls go straight to the registry and do not take the orchestrator's
    /// per-camera operation guard, so they keep reporting while a goto is in
    /// flight and the feed shows the camera moving.
    pub fn start(&self, cameras: Arc<CameraRegistry>, config: &CameraConfig) -> bool {
        let Some(period) = config.position_refresh() else {
            self.stop(&config.id);
            return false;
        };
        let camera_id = config.id.clone();
        let feed = self.feed(&camera_id);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                match cameras.get_position(&camera_id).await {
                    Ok(position) => {
                        feed.send_if_modified(|current| {
                            let changed = *current != Some(position);
                            *current = Some(position);
                            changed
                        });
                    }
                    Err(err) => tracing::debug!(%camera_id, error = %err, "position refresh failed"),
                }
            }
        });
        tracing::debug!(camera_id = %config.id, period_ms = period.as_millis() as u64, "position monitor started");
        if let Some(previous) = lock(&self.tasks).insert(config.id.clone(), task) {
            previous.abort();
        }
        true
    }

    pub fn stop(&self, camera_id: &str) {
        if let Some(task) = lock(&self.tasks).remove(camera_id) {
            task.abort();
        }
    }

    pub fn stop_all(&self) {
        for (_, task) in lock(&self.tasks).drain() {
            task.abort();
        }
    }
}

impl Drop for PositionMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
