//! obs-websocket v5 frames.

use super::state::{MixerScene, SceneRef};
use crate::error::{Result, SyncError};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const RPC_VERSION: u32 = 1;
/// `EventSubscription::Scenes`.
pub const SCENE_EVENTS: u32 = 1 << 2;

pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

#[derive(Debug, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Value,
}

impl RequestResponse {
    pub fn into_result(self) -> Result<Value> {
        if self.request_status.result {
            return Ok(self.response_data);
        }
        Err(SyncError::Protocol(format!(
            "{} failed with code {}{}",
            self.request_type,
            self.request_status.code,
            self.request_status
                .comment
                .map(|comment| format!(": {comment}"))
                .unwrap_or_default()
        )))
    }
}

/// Push events the session cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    ProgramSceneChanged(SceneRef),
    PreviewSceneChanged(SceneRef),
    SceneListChanged(Vec<MixerScene>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScene {
    scene_uuid: String,
    scene_name: String,
    #[serde(default)]
    scene_index: Option<i64>,
}

impl From<RawScene> for MixerScene {
    fn from(raw: RawScene) -> Self {
        MixerScene {
            id: raw.scene_uuid,
            name: raw.scene_name,
            order: raw.scene_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneList {
    pub scenes: Vec<MixerScene>,
    pub program: Option<SceneRef>,
    pub preview: Option<SceneRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSceneList {
    #[serde(default)]
    scenes: Vec<RawScene>,
    #[serde(default)]
    current_program_scene_uuid: Option<String>,
    #[serde(default)]
    current_program_scene_name: Option<String>,
    #[serde(default)]
    current_preview_scene_uuid: Option<String>,
    #[serde(default)]
    current_preview_scene_name: Option<String>,
}

/// `GetSceneList` response data. Preview is absent outside studio mode.
pub fn parse_scene_list(data: Value) -> Result<SceneList> {
    let raw: RawSceneList = serde_json::from_value(data)?;
    let scene_ref = |id: Option<String>, name: Option<String>| {
        id.filter(|id| !id.is_empty()).map(|id| SceneRef {
            id,
            name: name.unwrap_or_default(),
        })
    };
    Ok(SceneList {
        scenes: raw.scenes.into_iter().map(MixerScene::from).collect(),
        program: scene_ref(raw.current_program_scene_uuid, raw.current_program_scene_name),
        preview: scene_ref(raw.current_preview_scene_uuid, raw.current_preview_scene_name),
    })
}

/// Event frame payload; `None` for event types we do not track.
pub fn parse_event(d: Value) -> Result<Option<MixerEvent>> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawEvent {
        event_type: String,
        #[serde(default)]
        event_data: Value,
    }

    #[derive(Deserialize)]
    struct RawSceneListChanged {
        scenes: Vec<RawScene>,
    }

    let raw: RawEvent = serde_json::from_value(d)?;
    let event = match raw.event_type.as_str() {
        "CurrentProgramSceneChanged" => {
            MixerEvent::ProgramSceneChanged(serde_json::from_value(raw.event_data)?)
        }
        "CurrentPreviewSceneChanged" => {
            MixerEvent::PreviewSceneChanged(serde_json::from_value(raw.event_data)?)
        }
        "SceneListChanged" => {
            let list: RawSceneListChanged = serde_json::from_value(raw.event_data)?;
            MixerEvent::SceneListChanged(list.scenes.into_iter().map(MixerScene::from).collect())
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = general_purpose::STANDARD.encode(Sha256::digest(format!("{password}{salt}")));
    general_purpose::STANDARD.encode(Sha256::digest(format!("{secret}{challenge}")))
}

pub fn identify(authentication: Option<String>) -> Value {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": SCENE_EVENTS,
    });
    if let Some(authentication) = authentication {
        d["authentication"] = Value::String(authentication);
    }
    json!({ "op": op::IDENTIFY, "d": d })
}

pub fn request(request_type: &str, request_id: &str, data: Value) -> Value {
    let mut d = json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if !data.is_null() {
        d["requestData"] = data;
    }
    json!({ "op": op::REQUEST, "d": d })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_string_matches_documented_example() {
        assert_eq!(
            auth_string(
                "supersecretpassword",
                "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
                "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY="
            ),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn identify_without_password_omits_authentication() {
        let frame = identify(None);
        assert_eq!(frame["op"], 1);
        assert!(frame["d"].get("authentication").is_none());
        assert_eq!(frame["d"]["eventSubscriptions"], SCENE_EVENTS);
    }

    #[test]
    fn request_frame_shape() {
        let frame = request("SetCurrentProgramScene", "r1", json!({ "sceneUuid": "S1" }));
        assert_eq!(frame["op"], 6);
        assert_eq!(frame["d"]["requestType"], "SetCurrentProgramScene");
        assert_eq!(frame["d"]["requestData"]["sceneUuid"], "S1");
    }

    #[test]
    fn scene_list_snapshot() {
        let list = parse_scene_list(json!({
            "currentProgramSceneName": "Stage",
            "currentProgramSceneUuid": "S1",
            "currentPreviewSceneName": null,
            "currentPreviewSceneUuid": null,
            "scenes": [
                { "sceneIndex": 1, "sceneName": "Wide", "sceneUuid": "S2" },
                { "sceneIndex": 0, "sceneName": "Stage", "sceneUuid": "S1" }
            ]
        }))
        .unwrap();
        assert_eq!(list.scenes.len(), 2);
        assert_eq!(list.scenes[0].order, Some(1));
        assert_eq!(list.program.unwrap().id, "S1");
        assert!(list.preview.is_none());
    }

    #[test]
    fn tracked_and_ignored_events() {
        let event = parse_event(json!({
            "eventType": "CurrentPreviewSceneChanged",
            "eventIntent": 4,
            "eventData": { "sceneName": "Wide", "sceneUuid": "S2" }
        }))
        .unwrap();
        assert_eq!(
            event,
            Some(MixerEvent::PreviewSceneChanged(SceneRef {
                id: "S2".to_string(),
                name: "Wide".to_string()
            }))
        );
        let ignored =
            parse_event(json!({ "eventType": "InputMuteStateChanged", "eventData": {} })).unwrap();
        assert!(ignored.is_none());
    }

    #[test]
    fn failed_request_is_protocol_error() {
        let response: RequestResponse = serde_json::from_value(json!({
            "requestType": "SetCurrentPreviewScene",
            "requestId": "r2",
            "requestStatus": { "result": false, "code": 506, "comment": "studio mode off" }
        }))
        .unwrap();
        assert!(matches!(response.into_result(), Err(SyncError::Protocol(_))));
    }
}
