use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One narrative beat plus its image state.
///
/// `image` and `image_error` are mutually exclusive; both unset means the
/// scene has not been generated yet.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Scene {
    pub id: Uuid,

    pub summary: String,
    /// Character names present, matched against the registry by exact
    /// string equality when resolving reference images.
    pub characters_in_scene: Vec<String>,
    pub setting: String,
    pub action: String,
    pub emotional_beat: String,
    /// Synthesized textual prompt for the image call.
    pub image_prompt: String,

    /// Finished image as a `data:` URL.
    pub image: Option<String>,
    pub image_error: Option<String>,
}

impl Scene {
    pub fn is_pending(&self) -> bool {
        self.image.is_none() && self.image_error.is_none()
    }
}

/// Patch applied to a single scene as generation proceeds.
#[derive(Debug, Default, Clone)]
pub struct ScenePatch {
    pub image: Option<String>,
    pub image_error: Option<String>,
}

/// Ordered scene collection. Order equals deconstruction response order
/// and is preserved end-to-end; scenes are only ever replaced wholesale.
#[derive(Debug, Default, Clone)]
pub struct SceneTimeline {
    scenes: Vec<Scene>,
}

impl SceneTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic swap, used once per storyboard build.
    pub fn replace(&mut self, scenes: Vec<Scene>) {
        self.scenes = scenes;
    }

    /// Merges image/error fields into one scene without disturbing the
    /// others. Returns false when the id is unknown.
    pub fn update_one(&mut self, id: Uuid, patch: ScenePatch) -> bool {
        let Some(scene) = self.scenes.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if patch.image.is_some() {
            scene.image = patch.image;
            scene.image_error = None;
        } else if patch.image_error.is_some() {
            scene.image_error = patch.image_error;
            scene.image = None;
        }
        true
    }

    pub fn list(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn get(&self, id: Uuid) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn clear(&mut self) {
        self.scenes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(summary: &str) -> Scene {
        Scene {
            id: Uuid::new_v4(),
            summary: summary.to_string(),
            characters_in_scene: vec![],
            setting: String::new(),
            action: String::new(),
            emotional_beat: String::new(),
            image_prompt: String::new(),
            image: None,
            image_error: None,
        }
    }

    #[test]
    fn test_replace_preserves_order() {
        let mut timeline = SceneTimeline::new();
        timeline.replace(vec![scene("A"), scene("B"), scene("C")]);
        let order: Vec<&str> = timeline.list().iter().map(|s| s.summary.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_update_one_leaves_others_untouched() {
        let mut timeline = SceneTimeline::new();
        timeline.replace(vec![scene("A"), scene("B")]);
        let b_id = timeline.list()[1].id;

        assert!(timeline.update_one(
            b_id,
            ScenePatch {
                image: Some("data:image/png;base64,BBBB".to_string()),
                image_error: None,
            }
        ));

        assert!(timeline.list()[0].is_pending());
        assert_eq!(
            timeline.list()[1].image.as_deref(),
            Some("data:image/png;base64,BBBB")
        );
    }

    #[test]
    fn test_update_one_error_clears_image_and_vice_versa() {
        let mut timeline = SceneTimeline::new();
        timeline.replace(vec![scene("A")]);
        let id = timeline.list()[0].id;

        timeline.update_one(
            id,
            ScenePatch {
                image_error: Some("model refused".to_string()),
                ..Default::default()
            },
        );
        assert!(timeline.list()[0].image.is_none());

        timeline.update_one(
            id,
            ScenePatch {
                image: Some("data:image/png;base64,AAAA".to_string()),
                ..Default::default()
            },
        );
        assert!(timeline.list()[0].image_error.is_none());
        assert!(!timeline.list()[0].is_pending());
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut timeline = SceneTimeline::new();
        timeline.replace(vec![scene("A")]);
        assert!(!timeline.update_one(Uuid::new_v4(), ScenePatch::default()));
    }
}
