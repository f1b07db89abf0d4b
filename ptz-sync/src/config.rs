use crate::error::{Result, SyncError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TRANSITION_MS: u64 = 500;
pub const DEFAULT_PRESET_LIMIT: usize = 100;
pub const DEFAULT_AXIS_CHANNEL: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraProtocol {
    /// ONVIF SOAP session (GetPresets / GetStatus / GotoPreset).
    #[default]
    Onvif,
    /// Axis VAPIX `ptz.cgi` commands behind HTTP digest auth.
    Axis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub ip: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: CameraProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ax_scene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_refresh_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_presets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(default)]
    pub position_tolerance: f64,
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        require(&self.id, "camera id")?;
        require(&self.name, "camera name")?;
        require(&self.user, "camera user")?;
        require(&self.password, "camera password")?;
        require(&self.ip, "camera ip")?;
        if self.port == 0 {
            return Err(SyncError::Config(format!(
                "camera {}: port must be between 1 and 65535",
                self.id
            )));
        }
        if self.position_tolerance < 0.0 || !self.position_tolerance.is_finite() {
            return Err(SyncError::Config(format!(
                "camera {}: position tolerance must be a non-negative number",
                self.id
            )));
        }
        Ok(())
    }

    /// Settle delay between the camera move and the program switch.
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_time.unwrap_or(DEFAULT_TRANSITION_MS))
    }

    pub fn preset_limit(&self) -> usize {
        self.preset_limit.unwrap_or(DEFAULT_PRESET_LIMIT)
    }

    pub fn position_refresh(&self) -> Option<Duration> {
        self.position_refresh_time
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn scene_id(&self) -> Option<&str> {
        non_empty(self.scene_id.as_deref())
    }

    pub fn ax_scene_id(&self) -> Option<&str> {
        non_empty(self.ax_scene_id.as_deref())
    }

    pub fn channel(&self) -> u32 {
        self.channel.unwrap_or(DEFAULT_AXIS_CHANNEL)
    }

    pub fn onvif_endpoint(&self) -> String {
        format!("http://{}:{}/onvif/device_service", self.ip, self.port)
    }

    pub fn axis_base_url(&self) -> String {
        let scheme = if self.tls.unwrap_or(true) { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.ip, self.port)
    }

    pub fn credentials(&self) -> (&str, &str) {
        (self.user.as_str(), self.password.as_str())
    }

    /// Folder of the image cache holding this camera's preset thumbnails.
    pub fn thumbnail_folder(&self) -> String {
        format!("ptz-{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerConfig {
    pub ip: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub password: String,
}

impl MixerConfig {
    pub fn validate(&self) -> Result<()> {
        require(&self.ip, "mixer ip")?;
        if self.port == 0 {
            return Err(SyncError::Config(
                "mixer port must be between 1 and 65535".to_string(),
            ));
        }
        if self.password.chars().count() < 4 {
            return Err(SyncError::Config(
                "mixer password must have at least 4 characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.ip, self.port)
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub mixer_config: Option<MixerConfig>,
    #[serde(default, rename = "cameraPtzConfig", alias = "cameraPTZConfig")]
    pub cameras: BTreeMap<String, CameraConfig>,
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(text).map_err(|err| SyncError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(mixer) = &self.mixer_config {
            mixer.validate()?;
        }
        for (key, camera) in &self.cameras {
            camera.validate()?;
            if key != &camera.id {
                return Err(SyncError::Config(format!(
                    "camera entry {key} carries mismatching id {}",
                    camera.id
                )));
            }
        }
        Ok(())
    }

    pub fn camera(&self, id: &str) -> Result<&CameraConfig> {
        self.cameras
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Queries and short commands.
    pub request: Duration,
    /// A full goto including the stable-position wait.
    pub goto: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(5),
            goto: Duration::from_secs(30),
        }
    }
}

/// Bounds for the "read position until two reads agree" loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            max_attempts: 50,
        }
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Config(format!("{field} is required")));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u64),
        Text(String),
    }

    let value = match RawPort::deserialize(deserializer)? {
        RawPort::Number(value) => value,
        RawPort::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("port must contain only digits"))?,
    };
    if !(1..=65535).contains(&value) {
        return Err(serde::de::Error::custom("port must be between 1 and 65535"));
    }
    Ok(value as u16)
}
