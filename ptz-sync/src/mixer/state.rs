use super::protocol::{MixerEvent, SceneList};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixerScene {
    pub id: String,
    pub name: String,
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRef {
    #[serde(rename = "sceneUuid")]
    pub id: String,
    #[serde(rename = "sceneName", default)]
    pub name: String,
}

/// What the mixer is showing. Only the mixer session writes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerState {
    pub status: LinkStatus,
    pub scenes: Vec<MixerScene>,
    pub program_scene: Option<SceneRef>,
    pub preview_scene: Option<SceneRef>,
}

impl MixerState {
    pub fn is_connected(&self) -> bool {
        self.status == LinkStatus::Connected
    }

    pub fn is_on_program(&self, scene_id: &str) -> bool {
        self.program_scene
            .as_ref()
            .is_some_and(|scene| scene.id == scene_id)
    }

    pub fn is_on_preview(&self, scene_id: &str) -> bool {
        self.preview_scene
            .as_ref()
            .is_some_and(|scene| scene.id == scene_id)
    }

    pub fn scene_ref(&self, scene_id: &str) -> SceneRef {
        let name = self
            .scenes
            .iter()
            .find(|scene| scene.id == scene_id)
            .map(|scene| scene.name.clone())
            .unwrap_or_default();
        SceneRef {
            id: scene_id.to_string(),
            name,
        }
    }

    /// Full snapshot fetched after connecting; marks the link usable.
    pub fn apply_snapshot(&mut self, list: SceneList) {
        self.status = LinkStatus::Connected;
        self.scenes = list.scenes;
        self.program_scene = list.program;
        self.preview_scene = list.preview;
    }

    pub fn apply_event(&mut self, event: MixerEvent) {
        match event {
            MixerEvent::ProgramSceneChanged(scene) => self.program_scene = Some(scene),
            MixerEvent::PreviewSceneChanged(scene) => self.preview_scene = Some(scene),
            MixerEvent::SceneListChanged(scenes) => self.scenes = scenes,
        }
    }

    /// Connection closed: nothing is known about the mixer anymore.
    pub fn clear(&mut self) {
        *self = MixerState::default();
    }
}
