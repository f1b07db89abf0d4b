use super::{handshake_error, wait_until_stable, CameraDriver, LinkState};
use crate::config::{CameraConfig, SettlePolicy, Timeouts};
use crate::error::{Result, SyncError};
use crate::http_client::{self, DigestClient, ReqwestTransport};
use crate::ptz::{PtzPosition, PtzPreset};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;

const PTZ_CGI: &str = "/axis-cgi/com/ptz.cgi";
const IMAGE_CGI: &str = "/axis-cgi/jpg/image.cgi";

/// VAPIX `ptz.cgi` driver. Presets are server presets addressed by number.
pub struct AxisDriver {
    camera_id: String,
    client: DigestClient,
    channel: u32,
    settle: SettlePolicy,
    link: LinkState,
    presets: Mutex<Option<Vec<PtzPreset>>>,
}

impl AxisDriver {
    pub fn new(
        camera_id: impl Into<String>,
        client: DigestClient,
        channel: u32,
        settle: SettlePolicy,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            client,
            channel,
            settle,
            link: LinkState::default(),
            presets: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &CameraConfig,
        timeouts: Timeouts,
        settle: SettlePolicy,
    ) -> Result<Self> {
        // Axis devices ship self-signed certificates.
        let http = http_client::build(timeouts.request, true)?;
        let (user, password) = config.credentials();
        let client = DigestClient::new(
            Arc::new(ReqwestTransport::new(http)),
            config.axis_base_url(),
            user,
            password,
        );
        Ok(Self::new(config.id.clone(), client, config.channel(), settle))
    }

    fn ptz_command(&self, args: &str) -> String {
        format!("{PTZ_CGI}?{args}&camera={}", self.channel)
    }

    async fn query(&self, what: &str) -> Result<String> {
        let command = self.ptz_command(&format!("query={what}"));
        tracing::debug!(camera_id = %self.camera_id, %command, "axis query");
        self.client.send_text(&command).await
    }

    async fn read_position(&self) -> Result<PtzPosition> {
        parse_position(&self.query("position").await?)
    }

    /// JPEG snapshot of the camera's current view.
    pub async fn snapshot(&self) -> Result<Bytes> {
        self.link.require(&self.camera_id)?;
        let command = format!("{IMAGE_CGI}?camera={}", self.channel);
        let result = self.client.send_binary(&command).await;
        self.link.observe(&self.camera_id, result)
    }

    async fn remember_position(&self, preset_id: &str, position: PtzPosition) {
        if let Some(presets) = self.presets.lock().await.as_mut() {
            if let Some(preset) = presets.iter_mut().find(|preset| preset.id == preset_id) {
                preset.position = Some(position);
            }
        }
    }
}

#[async_trait]
impl CameraDriver for AxisDriver {
    async fn connect(&self) -> Result<()> {
        if self.link.is_up() {
            return Ok(());
        }
        // A position query proves the digest login and the channel number.
        let position = self
            .read_position()
            .await
            .map_err(|err| handshake_error(&self.camera_id, err))?;
        tracing::info!(
            camera_id = %self.camera_id,
            host = %self.client.base_url(),
            channel = self.channel,
            ?position,
            "axis camera connected"
        );
        *self.presets.lock().await = None;
        self.link.set_up(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    async fn get_presets(&self) -> Result<Vec<PtzPreset>> {
        self.link.require(&self.camera_id)?;
        let mut memo = self.presets.lock().await;
        if let Some(presets) = memo.as_ref() {
            return Ok(presets.clone());
        }
        let result = self.query("presetposcam").await;
        let text = self.link.observe(&self.camera_id, result)?;
        let presets = parse_preset_list(&text)?;
        tracing::debug!(camera_id = %self.camera_id, count = presets.len(), "presets fetched");
        *memo = Some(presets.clone());
        Ok(presets)
    }

    async fn get_position(&self) -> Result<PtzPosition> {
        self.link.require(&self.camera_id)?;
        let result = self.read_position().await;
        self.link.observe(&self.camera_id, result)
    }

    async fn goto(&self, preset_id: &str) -> Result<PtzPosition> {
        self.link.require(&self.camera_id)?;
        let number: u32 = preset_id
            .parse()
            .map_err(|_| {
                SyncError::protocol(format!("axis preset id must be numeric: {preset_id}"))
            })?;
        let before = self.read_position().await;
        let origin = self.link.observe(&self.camera_id, before)?;
        let command = self.ptz_command(&format!("gotoserverpresetno={number}"));
        tracing::debug!(camera_id = %self.camera_id, %command, "axis goto");
        let result = self.client.send_command(&command).await;
        self.link.observe(&self.camera_id, result)?;
        let settled =
            wait_until_stable(self.settle, Some(origin), || self.read_position()).await;
        let position = self.link.observe(&self.camera_id, settled)?;
        // An unmoved camera may still be on its way; only a move teaches the preset.
        if position != origin {
            self.remember_position(preset_id, position).await;
        }
        Ok(position)
    }
}

/// `presetposno<N>=<name>` lines. A reply with no preset lines is only
/// accepted when it is empty or carries nothing but the VAPIX header.
pub fn parse_preset_list(text: &str) -> Result<Vec<PtzPreset>> {
    let mut presets: Vec<(u32, PtzPreset)> = text
        .lines()
        .filter_map(|line| {
            let (key, name) = line.trim().split_once('=')?;
            let number: u32 = key.trim().strip_prefix("presetposno")?.parse().ok()?;
            Some((number, PtzPreset::new(number.to_string(), name.trim(), None)))
        })
        .collect();
    if presets.is_empty() {
        let header_only = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .all(|line| line.starts_with("Preset Positions for camera"));
        if !header_only {
            return Err(SyncError::protocol(format!(
                "unexpected presetposcam reply: {}",
                text.trim().chars().take(120).collect::<String>()
            )));
        }
    }
    presets.sort_by_key(|(number, _)| *number);
    Ok(presets.into_iter().map(|(_, preset)| preset).collect())
}

/// `pan=`, `tilt=` and `zoom=` lines of `query=position`.
pub fn parse_position(text: &str) -> Result<PtzPosition> {
    let value = |key: &str| -> Result<f64> {
        let raw = text
            .lines()
            .filter_map(|line| line.trim().split_once('='))
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.trim())
            .ok_or_else(|| SyncError::protocol(format!("position reply without {key}")))?;
        raw.parse()
            .map_err(|_| SyncError::protocol(format!("invalid {key} value {raw}")))
    };
    Ok(PtzPosition::new(value("pan")?, value("tilt")?, value("zoom")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpReply, MockHttpTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const POSITION: &str = "pan=-12.5\ntilt=3.25\nzoom=1200\niris=500\nautoiris=on\n";

    fn reply(status: u16, body: &'static str) -> Result<HttpReply> {
        Ok(HttpReply {
            status,
            www_authenticate: None,
            body: Bytes::from_static(body.as_bytes()),
        })
    }

    fn driver(transport: MockHttpTransport) -> AxisDriver {
        // The mock answers directly, so no digest challenge is ever issued.
        let client = DigestClient::new(Arc::new(transport), "http://10.0.0.2", "root", "pass");
        AxisDriver::new(
            "cam-axis",
            client,
            1,
            SettlePolicy {
                interval: Duration::from_millis(10),
                max_attempts: 5,
            },
        )
    }

    #[test]
    fn preset_list_is_numbered_and_sorted() {
        let reply = "Preset Positions for camera 1\npresetposno10=Wide\npresetposno2=Stage\n";
        let presets = parse_preset_list(reply).unwrap();
        let ids: Vec<&str> = presets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "10"]);
        assert_eq!(presets[0].name, "Stage");
        assert!(presets.iter().all(|p| p.position.is_none()));
    }

    #[test]
    fn error_body_is_protocol_error() {
        assert!(matches!(
            parse_preset_list("Error: invalid camera"),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn unrelated_body_is_protocol_error() {
        let portal = "<html><head><title>Sign in</title></head><body>Welcome</body></html>";
        assert!(matches!(parse_preset_list(portal), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn camera_without_presets_lists_none() {
        assert!(parse_preset_list("Preset Positions for camera 1\n").unwrap().is_empty());
        assert!(parse_preset_list("").unwrap().is_empty());
    }

    #[test]
    fn position_reply_is_parsed() {
        assert_eq!(parse_position(POSITION).unwrap(), PtzPosition::new(-12.5, 3.25, 1200.0));
        assert!(matches!(parse_position("pan=1\ntilt=2\n"), Err(SyncError::Protocol(_))));
    }

    const AT_STAGE: &str = "pan=50\ntilt=0\nzoom=1200\n";

    /// Answers position queries with `POSITION` for the first `still` reads,
    /// then with `AT_STAGE`.
    fn moving_camera(still: usize) -> MockHttpTransport {
        let reads = AtomicUsize::new(0);
        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|url, _| url.ends_with("query=position&camera=1"))
            .returning(move |_, _| {
                if reads.fetch_add(1, Ordering::SeqCst) < still {
                    reply(200, POSITION)
                } else {
                    reply(200, AT_STAGE)
                }
            });
        transport
            .expect_get()
            .withf(|url, _| url.ends_with("query=presetposcam&camera=1"))
            .times(1)
            .returning(|_, _| reply(200, "presetposno1=Home\npresetposno3=Stage\n"));
        transport
            .expect_get()
            .withf(|url, _| url == "http://10.0.0.2/axis-cgi/com/ptz.cgi?gotoserverpresetno=3&camera=1")
            .times(1)
            .returning(|_, _| reply(204, ""));
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn goto_learns_preset_position() {
        // connect and the pre-command read see the old position
        let driver = driver(moving_camera(2));
        driver.connect().await.unwrap();
        assert_eq!(driver.get_presets().await.unwrap()[1].position, None);

        let position = driver.goto("3").await.unwrap();
        assert_eq!(position, PtzPosition::new(50.0, 0.0, 1200.0));
        let presets = driver.get_presets().await.unwrap();
        assert_eq!(presets[1].position, Some(position));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_starting_camera_is_followed_to_the_preset() {
        // connect, pre-command read and two settle reads before it moves
        let driver = driver(moving_camera(4));
        driver.connect().await.unwrap();
        driver.get_presets().await.unwrap();

        let position = driver.goto("3").await.unwrap();
        assert_eq!(position, PtzPosition::new(50.0, 0.0, 1200.0));
        assert_eq!(driver.get_presets().await.unwrap()[1].position, Some(position));
    }

    #[tokio::test(start_paused = true)]
    async fn unmoved_camera_does_not_teach_the_preset() {
        let driver = driver(moving_camera(usize::MAX));
        driver.connect().await.unwrap();
        driver.get_presets().await.unwrap();

        let position = driver.goto("3").await.unwrap();
        assert_eq!(position, PtzPosition::new(-12.5, 3.25, 1200.0));
        assert_eq!(driver.get_presets().await.unwrap()[1].position, None);
    }

    #[tokio::test]
    async fn non_numeric_preset_is_rejected_before_sending() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|url, _| url.contains("query=position"))
            .times(1)
            .returning(|_, _| reply(200, POSITION));

        let driver = driver(transport);
        driver.connect().await.unwrap();
        assert!(matches!(driver.goto("home").await, Err(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn snapshot_returns_jpeg_bytes() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|url, _| url.contains("query=position"))
            .returning(|_, _| reply(200, POSITION));
        transport
            .expect_get()
            .withf(|url, _| url == "http://10.0.0.2/axis-cgi/jpg/image.cgi?camera=1")
            .times(1)
            .returning(|_, _| reply(200, "\u{ff}jpeg"));

        let driver = driver(transport);
        driver.connect().await.unwrap();
        assert_eq!(driver.snapshot().await.unwrap(), Bytes::from_static("\u{ff}jpeg".as_bytes()));
    }

    #[tokio::test]
    async fn rejected_login_fails_connect() {
        let mut transport = MockHttpTransport::new();
        transport.expect_get().returning(|_, _| {
            Ok(HttpReply {
                status: 401,
                www_authenticate: Some(r#"Digest realm="AXIS", nonce="n", qop="auth""#.to_string()),
                body: Bytes::new(),
            })
        });

        let driver = driver(transport);
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(!driver.is_connected());
    }
}
