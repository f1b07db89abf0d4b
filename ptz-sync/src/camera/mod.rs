//! Camera drivers: one capability set, two wire protocols.

pub mod axis;
pub mod onvif;

use crate::config::{CameraConfig, CameraProtocol, SettlePolicy, Timeouts};
use crate::error::{Result, SyncError};
use crate::ptz::{PtzPosition, PtzPreset};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use axis::AxisDriver;
pub use onvif::OnvifDriver;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Handshake with the device. No-op while already connected.
    async fn connect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Fetched once per connection and memoized.
    async fn get_presets(&self) -> Result<Vec<PtzPreset>>;
    /// Always a fresh status query.
    async fn get_position(&self) -> Result<PtzPosition>;
    /// Moves to the preset and returns the position once the camera stopped.
    async fn goto(&self, preset_id: &str) -> Result<PtzPosition>;
}

/// Builds the driver selected by `config.protocol`, wrapped with timeouts.
pub fn build_driver(
    config: &CameraConfig,
    timeouts: Timeouts,
    settle: SettlePolicy,
) -> Result<Arc<dyn CameraDriver>> {
    let driver: Arc<dyn CameraDriver> = match config.protocol {
        CameraProtocol::Onvif => Arc::new(OnvifDriver::from_config(config, timeouts, settle)?),
        CameraProtocol::Axis => Arc::new(AxisDriver::from_config(config, timeouts, settle)?),
    };
    Ok(Arc::new(TimedDriver::new(driver, timeouts)))
}

/// Reads a camera may stay at the pre-command position before it counts as
/// already at the target.
pub const START_GRACE_READS: u32 = 5;

/// Reads the position until two consecutive reads agree, at most
/// `policy.max_attempts` reads. With an `origin`, agreeing reads at the
/// origin only count once the camera moved away or `START_GRACE_READS`
/// reads passed, so a camera that starts late is not reported as settled.
pub async fn wait_until_stable<F, Fut>(
    policy: SettlePolicy,
    origin: Option<PtzPosition>,
    mut read: F,
) -> Result<PtzPosition>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PtzPosition>>,
{
    let attempts = policy.max_attempts.max(2);
    let departed = |position: PtzPosition| origin.map_or(true, |origin| position != origin);
    let mut previous = read().await?;
    let mut moved = departed(previous);
    for reads in 2..=attempts {
        tokio::time::sleep(policy.interval).await;
        let current = read().await?;
        moved |= departed(current);
        if current == previous && (moved || reads >= START_GRACE_READS) {
            return Ok(current);
        }
        previous = current;
    }
    let waited = policy.interval * attempts.saturating_sub(1);
    Err(SyncError::Timeout {
        operation: "position settle".to_string(),
        millis: waited.as_millis() as u64,
    })
}

/// Connection flag shared by the drivers. Link failures flip it back to
/// disconnected so the registry reconnects on the next `init`.
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    connected: AtomicBool,
}

impl LinkState {
    pub(crate) fn is_up(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_up(&self, up: bool) {
        self.connected.store(up, Ordering::Release);
    }

    pub(crate) fn require(&self, camera_id: &str) -> Result<()> {
        if self.is_up() {
            return Ok(());
        }
        Err(SyncError::Connection(format!("camera {camera_id} is not connected")))
    }

    pub(crate) fn observe<T>(&self, camera_id: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_link_failure() && self.is_up() {
                tracing::warn!(camera_id, error = %err, "camera link lost");
                self.set_up(false);
            }
        }
        result
    }
}

/// A failed handshake is a connection failure whatever the device answered.
pub(crate) fn handshake_error(camera_id: &str, err: SyncError) -> SyncError {
    match err {
        SyncError::Protocol(message) => {
            SyncError::Connection(format!("camera {camera_id} handshake failed: {message}"))
        }
        other => other,
    }
}

/// Bounds every device call with a timer. A timed-out call reports the
/// driver as disconnected until the next successful `connect`.
pub struct TimedDriver {
    inner: Arc<dyn CameraDriver>,
    timeouts: Timeouts,
    stalled: AtomicBool,
}

impl TimedDriver {
    pub fn new(inner: Arc<dyn CameraDriver>, timeouts: Timeouts) -> Self {
        Self {
            inner,
            timeouts,
            stalled: AtomicBool::new(false),
        }
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(SyncError::Timeout { .. })) {
            self.stalled.store(true, Ordering::Release);
        }
        result
    }
}

async fn bounded<T>(
    operation: &str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, millis = limit.as_millis() as u64, "camera call timed out");
            Err(SyncError::Timeout {
                operation: operation.to_string(),
                millis: limit.as_millis() as u64,
            })
        }
    }
}

#[async_trait]
impl CameraDriver for TimedDriver {
    async fn connect(&self) -> Result<()> {
        bounded("connect", self.timeouts.request, self.inner.connect()).await?;
        self.stalled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.stalled.load(Ordering::Acquire) && self.inner.is_connected()
    }

    async fn get_presets(&self) -> Result<Vec<PtzPreset>> {
        self.track(bounded("get presets", self.timeouts.request, self.inner.get_presets()).await)
    }

    async fn get_position(&self) -> Result<PtzPosition> {
        self.track(bounded("get position", self.timeouts.request, self.inner.get_position()).await)
    }

    async fn goto(&self, preset_id: &str) -> Result<PtzPosition> {
        self.track(bounded("goto", self.timeouts.goto, self.inner.goto(preset_id)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn policy(max_attempts: u32) -> SettlePolicy {
        SettlePolicy {
            interval: Duration::from_millis(200),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stable_after_two_equal_reads() {
        let reads = Mutex::new(vec![
            PtzPosition::new(0.3, 0.0, 1.0),
            PtzPosition::new(0.3, 0.0, 1.0),
            PtzPosition::new(0.2, 0.0, 1.0),
            PtzPosition::new(0.1, 0.0, 1.0),
        ]);
        let position = wait_until_stable(policy(10), None, || {
            let next = reads.lock().unwrap().pop();
            async move { next.ok_or_else(|| SyncError::protocol("exhausted")) }
        })
        .await
        .unwrap();
        assert_eq!(position, PtzPosition::new(0.3, 0.0, 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn never_settling_camera_times_out() {
        let counter = Mutex::new(0.0);
        let err = wait_until_stable(policy(5), None, || {
            let x = {
                let mut value = counter.lock().unwrap();
                *value += 1.0;
                *value
            };
            async move { Ok(PtzPosition::new(x, 0.0, 0.0)) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { millis: 800, .. }));
        assert_eq!(*counter.lock().unwrap(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_start_is_not_taken_as_settled() {
        let origin = PtzPosition::new(0.0, 0.0, 1.0);
        let target = PtzPosition::new(50.0, 0.0, 1.0);
        let reads = Mutex::new(vec![target, target, origin, origin]);
        let position = wait_until_stable(policy(10), Some(origin), || {
            let next = reads.lock().unwrap().pop();
            async move { next.ok_or_else(|| SyncError::protocol("exhausted")) }
        })
        .await
        .unwrap();
        assert_eq!(position, target);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_already_at_target_settles_after_grace() {
        let origin = PtzPosition::new(0.0, 0.0, 1.0);
        let count = Mutex::new(0u32);
        let position = wait_until_stable(policy(10), Some(origin), || {
            *count.lock().unwrap() += 1;
            async move { Ok(origin) }
        })
        .await
        .unwrap();
        assert_eq!(position, origin);
        assert_eq!(*count.lock().unwrap(), START_GRACE_READS);
    }

    struct StalledDriver;

    #[async_trait]
    impl CameraDriver for StalledDriver {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn get_presets(&self) -> Result<Vec<PtzPreset>> {
            Ok(Vec::new())
        }

        async fn get_position(&self) -> Result<PtzPosition> {
            Ok(PtzPosition::default())
        }

        async fn goto(&self, _preset_id: &str) -> Result<PtzPosition> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PtzPosition::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_driver_maps_elapsed_goto_to_timeout() {
        let driver = TimedDriver::new(Arc::new(StalledDriver), Timeouts::default());
        let err = driver.goto("1").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { millis: 30_000, .. }));
        assert!(!driver.is_connected());

        driver.connect().await.unwrap();
        assert!(driver.is_connected());
        assert!(driver.get_position().await.is_ok());
    }
}
