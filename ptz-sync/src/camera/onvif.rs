use super::{handshake_error, wait_until_stable, CameraDriver, LinkState};
use crate::config::{CameraConfig, SettlePolicy, Timeouts};
use crate::error::{Result, SyncError};
use crate::onvif_parse::{self, ServiceAddresses};
use crate::onvif_requests::{self, OnvifRequest};
use crate::ptz::{PtzPosition, PtzPreset};
use crate::http_client;
use crate::soap::{self, ReqwestSoapTransport, SoapTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
struct OnvifSession {
    media_endpoint: String,
    ptz_endpoint: String,
    profile_token: String,
}

pub struct OnvifDriver {
    camera_id: String,
    transport: Arc<dyn SoapTransport>,
    device_endpoint: String,
    user: String,
    password: String,
    settle: SettlePolicy,
    link: LinkState,
    session: RwLock<Option<OnvifSession>>,
    presets: Mutex<Option<Vec<PtzPreset>>>,
}

impl OnvifDriver {
    pub fn new(
        camera_id: impl Into<String>,
        transport: Arc<dyn SoapTransport>,
        device_endpoint: impl Into<String>,
        credentials: (&str, &str),
        settle: SettlePolicy,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            transport,
            device_endpoint: device_endpoint.into(),
            user: credentials.0.to_string(),
            password: credentials.1.to_string(),
            settle,
            link: LinkState::default(),
            session: RwLock::new(None),
            presets: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &CameraConfig,
        timeouts: Timeouts,
        settle: SettlePolicy,
    ) -> Result<Self> {
        let client = http_client::build(timeouts.request, false)?;
        Ok(Self::new(
            config.id.clone(),
            Arc::new(ReqwestSoapTransport::new(client)),
            config.onvif_endpoint(),
            config.credentials(),
            settle,
        ))
    }

    async fn send(&self, endpoint: &str, request: &OnvifRequest) -> Result<String> {
        soap::call(
            self.transport.as_ref(),
            endpoint,
            (self.user.as_str(), self.password.as_str()),
            request,
        )
        .await
    }

    async fn discover(&self) -> ServiceAddresses {
        let services = self
            .send(&self.device_endpoint, &onvif_requests::get_services())
            .await;
        let mut addresses = match services {
            Ok(body) => onvif_parse::parse_services(&body),
            Err(err) => {
                tracing::debug!(camera_id = %self.camera_id, error = %err, "GetServices unavailable");
                ServiceAddresses::default()
            }
        };
        if !addresses.is_complete() {
            let capabilities = self
                .send(&self.device_endpoint, &onvif_requests::get_capabilities())
                .await;
            match capabilities {
                Ok(body) => addresses = addresses.merge(onvif_parse::parse_capabilities(&body)),
                Err(err) => {
                    tracing::debug!(camera_id = %self.camera_id, error = %err, "GetCapabilities unavailable");
                }
            }
        }
        addresses
    }

    async fn handshake(&self) -> Result<OnvifSession> {
        let addresses = self.discover().await;
        let media_endpoint = addresses
            .media
            .unwrap_or_else(|| self.device_endpoint.clone());
        let ptz_endpoint = addresses.ptz.unwrap_or_else(|| self.device_endpoint.clone());
        let body = self.send(&media_endpoint, &onvif_requests::get_profiles()).await?;
        let profile_token = onvif_parse::parse_profile_token(&body)?;
        Ok(OnvifSession {
            media_endpoint,
            ptz_endpoint,
            profile_token,
        })
    }

    async fn session(&self) -> Result<OnvifSession> {
        self.link.require(&self.camera_id)?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                SyncError::Connection(format!("camera {} has no session", self.camera_id))
            })
    }

    async fn read_position(&self, session: &OnvifSession) -> Result<PtzPosition> {
        let body = self
            .send(&session.ptz_endpoint, &onvif_requests::get_status(&session.profile_token))
            .await?;
        onvif_parse::parse_status(&body)
    }
}

#[async_trait]
impl CameraDriver for OnvifDriver {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.write().await;
        if self.link.is_up() {
            return Ok(());
        }
        let established = self
            .handshake()
            .await
            .map_err(|err| handshake_error(&self.camera_id, err))?;
        tracing::info!(
            camera_id = %self.camera_id,
            media = %established.media_endpoint,
            ptz = %established.ptz_endpoint,
            profile = %established.profile_token,
            "onvif camera connected"
        );
        *session = Some(established);
        *self.presets.lock().await = None;
        self.link.set_up(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    async fn get_presets(&self) -> Result<Vec<PtzPreset>> {
        let session = self.session().await?;
        let mut memo = self.presets.lock().await;
        if let Some(presets) = memo.as_ref() {
            return Ok(presets.clone());
        }
        let result = self
            .send(&session.ptz_endpoint, &onvif_requests::get_presets(&session.profile_token))
            .await;
        let body = self.link.observe(&self.camera_id, result)?;
        let presets = onvif_parse::parse_presets(&body)?;
        tracing::debug!(camera_id = %self.camera_id, count = presets.len(), "presets fetched");
        *memo = Some(presets.clone());
        Ok(presets)
    }

    async fn get_position(&self) -> Result<PtzPosition> {
        let session = self.session().await?;
        let result = self.read_position(&session).await;
        self.link.observe(&self.camera_id, result)
    }

    async fn goto(&self, preset_id: &str) -> Result<PtzPosition> {
        let session = self.session().await?;
        tracing::debug!(camera_id = %self.camera_id, preset_id, "GotoPreset");
        let result = self
            .send(
                &session.ptz_endpoint,
                &onvif_requests::goto_preset(&session.profile_token, preset_id),
            )
            .await;
        self.link.observe(&self.camera_id, result)?;
        let settled = wait_until_stable(self.settle, None, || self.read_position(&session)).await;
        self.link.observe(&self.camera_id, settled)
    }
}
