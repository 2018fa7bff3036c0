use crate::character::{Character, CharacterField, CharacterRegistry};
use crate::gateway::{AiGateway, ExtractedCharacter, ImageData, SceneOutline};
use crate::scene::{Scene, ScenePatch, SceneTimeline};
use crate::style::StylePreferences;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Workflow phase. Exactly one is active at a time; `Error` is reachable
/// from anywhere and only `reset` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingStoryInput,
    ExtractingCharacters,
    AwaitingCharacterConfirmation,
    GeneratingCharacterDesigns,
    AwaitingDesignApproval,
    DeconstructingStory,
    GeneratingSceneImages,
    Complete,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::AwaitingStoryInput => "awaiting story input",
            Phase::ExtractingCharacters => "extracting characters",
            Phase::AwaitingCharacterConfirmation => "awaiting character confirmation",
            Phase::GeneratingCharacterDesigns => "generating character designs",
            Phase::AwaitingDesignApproval => "awaiting design approval",
            Phase::DeconstructingStory => "deconstructing story",
            Phase::GeneratingSceneImages => "generating scene images",
            Phase::Complete => "complete",
            Phase::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Story text must not be empty")]
    EmptyStory,

    #[error("Operation not allowed while {0}")]
    InvalidPhase(Phase),

    #[error("Unknown character id")]
    UnknownCharacter,

    #[error("\"{0}\" needs a name before a design can be generated")]
    UnnamedCharacter(String),

    #[error("\"{0}\" has an approved design; clear it before editing")]
    CharacterLocked(String),

    #[error("Designs still need approval for: {}", .0.join(", "))]
    UnapprovedCharacters(Vec<String>),

    #[error("Story deconstruction produced no scenes")]
    NoScenes,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Session failed ({0}); restart required")]
    Faulted(String),

    #[error(transparent)]
    Gateway(#[from] anyhow::Error),
}

/// Progress signals for whatever presentation layer is attached.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    Status(String),
    CharacterUpdated(Uuid),
    SceneUpdated(Uuid),
}

pub trait ProgressObserver: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

struct NullObserver;

impl ProgressObserver for NullObserver {
    fn publish(&self, _event: SessionEvent) {}
}

/// The generation workflow: owns the character registry, the scene
/// timeline, and the phase state machine that sequences gateway calls.
///
/// All gateway work is strictly sequential, one await at a time; per-item
/// failures land in that item's error field and never abort the batch.
pub struct GenerationSession {
    gateway: Box<dyn AiGateway>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
    max_characters: usize,

    phase: Phase,
    story_text: String,
    style: StylePreferences,
    characters: CharacterRegistry,
    timeline: SceneTimeline,
    fault: Option<String>,
}

impl GenerationSession {
    pub fn new(gateway: Box<dyn AiGateway>, max_characters: usize) -> Self {
        Self {
            gateway,
            observer: Arc::new(NullObserver),
            cancel: CancellationToken::new(),
            max_characters,
            phase: Phase::Idle,
            story_text: String::new(),
            style: StylePreferences::default(),
            characters: CharacterRegistry::new(),
            timeline: SceneTimeline::new(),
            fault: None,
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observer = observer;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn story_text(&self) -> &str {
        &self.story_text
    }

    pub fn style(&self) -> &StylePreferences {
        &self.style
    }

    pub fn set_style(&mut self, style: StylePreferences) {
        self.style = style;
    }

    pub fn characters(&self) -> &CharacterRegistry {
        &self.characters
    }

    pub fn timeline(&self) -> &SceneTimeline {
        &self.timeline
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Aborts the in-flight gateway call, if any, and makes every
    /// subsequent call fail with `Cancelled` until `reset`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fresh session state with a new cancellation token. The style
    /// preferences survive; everything else is discarded.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.story_text.clear();
        self.characters.clear();
        self.timeline.clear();
        self.fault = None;
        self.set_phase(Phase::AwaitingStoryInput);
    }

    /// Stores the story and, when no characters exist yet, runs extraction.
    /// A failed or empty extraction downgrades to manual character entry
    /// instead of failing the session.
    pub async fn submit_story(&mut self, text: &str) -> Result<(), SessionError> {
        self.guard()?;
        if !matches!(self.phase, Phase::Idle | Phase::AwaitingStoryInput) {
            return Err(SessionError::InvalidPhase(self.phase));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyStory);
        }
        self.story_text = text.to_string();

        if !self.characters.is_empty() {
            self.set_phase(Phase::AwaitingCharacterConfirmation);
            return Ok(());
        }

        self.set_phase(Phase::ExtractingCharacters);
        self.status("Reading the story for characters...");
        let result = with_cancel(
            &self.cancel,
            self.gateway.extract_characters(&self.story_text),
        )
        .await;

        match result {
            Ok(extracted) if !extracted.is_empty() => {
                let dropped = extracted.len().saturating_sub(self.max_characters);
                for item in extracted.into_iter().take(self.max_characters) {
                    self.characters.insert(materialize(item));
                }
                if dropped > 0 {
                    log::warn!("Extraction returned too many characters, dropped {}", dropped);
                }
                self.status(&format!("Found {} characters.", self.characters.len()));
            }
            Ok(_) => {
                self.status("No characters found in the story. Add them manually.");
            }
            Err(SessionError::Cancelled) => {
                self.set_phase(Phase::AwaitingStoryInput);
                return Err(SessionError::Cancelled);
            }
            Err(e) => {
                log::warn!("Character extraction failed: {}", e);
                self.status(&format!(
                    "Character extraction failed ({}). Add characters manually.",
                    e
                ));
            }
        }
        self.set_phase(Phase::AwaitingCharacterConfirmation);
        Ok(())
    }

    pub fn add_character(&mut self) -> Result<Uuid, SessionError> {
        self.guard_editable()?;
        let id = self.characters.add();
        self.publish(SessionEvent::CharacterUpdated(id));
        Ok(id)
    }

    /// Edits one text field. Clears the provenance flag; rejected while
    /// the character holds an approved design.
    pub fn update_character(
        &mut self,
        id: Uuid,
        field: CharacterField,
        value: String,
    ) -> Result<(), SessionError> {
        self.guard_editable()?;
        let character = self
            .characters
            .get(id)
            .ok_or(SessionError::UnknownCharacter)?;
        if character.has_approved_design() {
            return Err(SessionError::CharacterLocked(character.name.clone()));
        }
        self.characters.update(id, field, value);
        self.publish(SessionEvent::CharacterUpdated(id));
        Ok(())
    }

    pub fn remove_character(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.guard_editable()?;
        if !self.characters.remove(id) {
            return Err(SessionError::UnknownCharacter);
        }
        self.publish(SessionEvent::CharacterUpdated(id));
        Ok(())
    }

    /// Unlocks a generated or approved design so the character can be
    /// edited and regenerated.
    pub fn clear_character_design(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.guard()?;
        let character = self
            .characters
            .get_mut(id)
            .ok_or(SessionError::UnknownCharacter)?;
        character.generated_design = None;
        character.approved_design = None;
        character.design_error = None;
        self.publish(SessionEvent::CharacterUpdated(id));
        Ok(())
    }

    /// Generates designs for every named character lacking approval, one
    /// at a time. An empty selection reports and stays in the current
    /// phase; otherwise the phase ends at `AwaitingDesignApproval` no
    /// matter how many individual characters failed. Returns the
    /// selection size.
    pub async fn generate_all_character_designs(&mut self) -> Result<usize, SessionError> {
        self.guard_editable()?;
        let selection: Vec<Uuid> = self
            .characters
            .list()
            .iter()
            .filter(|c| c.is_named() && !c.has_approved_design() && !c.is_design_loading)
            .map(|c| c.id)
            .collect();

        if selection.is_empty() {
            self.status("Every named character already has an approved design.");
            return Ok(0);
        }

        self.set_phase(Phase::GeneratingCharacterDesigns);
        for id in &selection {
            if let Err(e) = self.generate_design_inner(*id).await {
                // Only cancellation escapes the loop; item failures are
                // absorbed into the character's error field.
                self.set_phase(Phase::AwaitingDesignApproval);
                return Err(e);
            }
        }
        self.set_phase(Phase::AwaitingDesignApproval);
        Ok(selection.len())
    }

    /// Single-character variant; serves first generation and regeneration
    /// alike. No-op when the character is already loading or approved.
    pub async fn generate_character_design(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.guard_editable()?;
        let character = self
            .characters
            .get(id)
            .ok_or(SessionError::UnknownCharacter)?;
        if !character.is_named() {
            return Err(SessionError::UnnamedCharacter(character.id.to_string()));
        }
        self.generate_design_inner(id).await?;
        if self.phase == Phase::AwaitingCharacterConfirmation {
            self.set_phase(Phase::AwaitingDesignApproval);
        }
        Ok(())
    }

    async fn generate_design_inner(&mut self, id: Uuid) -> Result<(), SessionError> {
        // The character may have been removed between selection and call.
        let Some(character) = self.characters.get(id) else {
            return Ok(());
        };
        if character.is_design_loading || character.has_approved_design() {
            return Ok(());
        }
        let snapshot = character.clone();
        let style = self.style.clone();

        if let Some(c) = self.characters.get_mut(id) {
            c.is_design_loading = true;
            c.design_error = None;
        }
        self.publish(SessionEvent::CharacterUpdated(id));
        self.status(&format!("Designing {}...", snapshot.name));

        let result = with_cancel(
            &self.cancel,
            self.gateway.generate_character_design(&snapshot, &style),
        )
        .await;

        let Some(c) = self.characters.get_mut(id) else {
            return Ok(());
        };
        match result {
            Ok(image) => {
                c.generated_design = Some(image.to_data_url());
                c.design_error = None;
                c.is_design_loading = false;
            }
            Err(SessionError::Cancelled) => {
                c.is_design_loading = false;
                self.publish(SessionEvent::CharacterUpdated(id));
                return Err(SessionError::Cancelled);
            }
            Err(e) => {
                log::warn!("Design generation failed for {}: {}", snapshot.name, e);
                c.design_error = Some(friendly_error(&e.to_string()));
                c.is_design_loading = false;
            }
        }
        self.publish(SessionEvent::CharacterUpdated(id));
        Ok(())
    }

    /// Moves the candidate design into the approved slot. Idempotent:
    /// without a candidate this is a no-op.
    pub fn approve_character_design(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.guard()?;
        let character = self
            .characters
            .get_mut(id)
            .ok_or(SessionError::UnknownCharacter)?;
        if let Some(url) = character.generated_design.take() {
            character.approved_design = Some(url);
            character.design_error = None;
            self.publish(SessionEvent::CharacterUpdated(id));
        }
        Ok(())
    }

    /// Deconstructs the story into scenes and illustrates them in order.
    ///
    /// Hard gate first: every named character must hold an approved
    /// design, or the call rejects without touching any state. A gateway
    /// error during deconstruction is fatal; an empty scene list resets
    /// the phase so the build can be re-attempted. Scene image failures
    /// are per-scene and the phase always reaches `Complete`.
    pub async fn build_storyboard(&mut self) -> Result<(), SessionError> {
        self.guard()?;
        if !matches!(
            self.phase,
            Phase::AwaitingCharacterConfirmation | Phase::AwaitingDesignApproval | Phase::Complete
        ) {
            return Err(SessionError::InvalidPhase(self.phase));
        }
        let unapproved = self.characters.unapproved_names();
        if !unapproved.is_empty() {
            return Err(SessionError::UnapprovedCharacters(unapproved));
        }

        self.timeline.clear();
        self.set_phase(Phase::DeconstructingStory);
        self.status("Breaking the story into scenes...");

        let cast = self.characters.list().to_vec();
        let style = self.style.clone();
        let result = with_cancel(
            &self.cancel,
            self.gateway.deconstruct_story(&self.story_text, &cast, &style),
        )
        .await;

        let outlines = match result {
            Ok(outlines) => outlines,
            Err(SessionError::Cancelled) => {
                self.set_phase(Phase::AwaitingDesignApproval);
                return Err(SessionError::Cancelled);
            }
            Err(e) => {
                self.fail(e.to_string());
                return Err(e);
            }
        };

        if outlines.is_empty() {
            self.status("The story could not be broken into scenes. Try again.");
            self.set_phase(Phase::AwaitingDesignApproval);
            return Err(SessionError::NoScenes);
        }

        let scenes: Vec<Scene> = outlines.into_iter().map(materialize_scene).collect();
        self.timeline.replace(scenes);
        self.set_phase(Phase::GeneratingSceneImages);

        let ids: Vec<Uuid> = self.timeline.list().iter().map(|s| s.id).collect();
        let total = ids.len();
        for (index, id) in ids.into_iter().enumerate() {
            let scene = match self.timeline.get(id) {
                Some(scene) => scene.clone(),
                None => continue,
            };
            self.status(&format!(
                "Illustrating scene {}/{}: {}",
                index + 1,
                total,
                scene.summary
            ));
            let references = self.resolve_references(&scene);
            let result = with_cancel(
                &self.cancel,
                self.gateway
                    .generate_scene_image(&scene.image_prompt, &style, &references),
            )
            .await;

            match result {
                Ok(image) => {
                    self.timeline.update_one(
                        id,
                        ScenePatch {
                            image: Some(image.to_data_url()),
                            image_error: None,
                        },
                    );
                }
                Err(SessionError::Cancelled) => {
                    return Err(SessionError::Cancelled);
                }
                Err(e) => {
                    log::warn!("Scene image failed ({}): {}", scene.summary, e);
                    self.timeline.update_one(
                        id,
                        ScenePatch {
                            image: None,
                            image_error: Some(friendly_error(&e.to_string())),
                        },
                    );
                }
            }
            // Publish after every scene so the timeline renders
            // progressively, before the next call starts.
            self.publish(SessionEvent::SceneUpdated(id));
        }

        self.set_phase(Phase::Complete);
        Ok(())
    }

    /// Reference images for one scene: every listed name resolved against
    /// approved characters. Matching is exact string equality, first match
    /// wins; a duplicated or paraphrased name binds to the first exact
    /// match or to nothing.
    fn resolve_references(&self, scene: &Scene) -> Vec<ImageData> {
        let mut references = Vec::new();
        for name in &scene.characters_in_scene {
            let Some(character) = self.characters.find_by_name(name) else {
                log::warn!("Scene references unknown character \"{}\"", name);
                continue;
            };
            let Some(url) = &character.approved_design else {
                continue;
            };
            match ImageData::from_data_url(url) {
                Ok(image) => references.push(image),
                Err(e) => log::warn!("Bad stored design for \"{}\": {}", name, e),
            }
        }
        references
    }

    fn guard(&self) -> Result<(), SessionError> {
        if self.phase == Phase::Error {
            return Err(SessionError::Faulted(
                self.fault.clone().unwrap_or_default(),
            ));
        }
        Ok(())
    }

    fn guard_editable(&self) -> Result<(), SessionError> {
        self.guard()?;
        if !matches!(
            self.phase,
            Phase::Idle
                | Phase::AwaitingStoryInput
                | Phase::AwaitingCharacterConfirmation
                | Phase::AwaitingDesignApproval
        ) {
            return Err(SessionError::InvalidPhase(self.phase));
        }
        Ok(())
    }

    fn fail(&mut self, message: String) {
        log::error!("Session failed: {}", message);
        self.fault = Some(message);
        self.set_phase(Phase::Error);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::info!("Phase: {} -> {}", self.phase, phase);
            self.phase = phase;
            self.publish(SessionEvent::PhaseChanged(phase));
        }
    }

    fn status(&self, message: &str) {
        self.publish(SessionEvent::Status(message.to_string()));
    }

    fn publish(&self, event: SessionEvent) {
        self.observer.publish(event);
    }
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = anyhow::Result<T>>,
) -> Result<T, SessionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = fut => result.map_err(SessionError::Gateway),
    }
}

fn materialize(extracted: ExtractedCharacter) -> Character {
    let slot = |v: String| {
        if v.trim().is_empty() {
            None
        } else {
            Some(v)
        }
    };
    Character {
        id: Uuid::new_v4(),
        name: extracted.name,
        description: slot(extracted.description),
        gender: slot(extracted.gender),
        age: slot(extracted.age),
        hair_color: slot(extracted.hair_color),
        eye_color: slot(extracted.eye_color),
        build: slot(extracted.build),
        personality: slot(extracted.personality),
        clothing_style: slot(extracted.clothing_style),
        distinguishing_features: slot(extracted.distinguishing_features),
        habits_mannerisms: slot(extracted.habits_mannerisms),
        is_ai_extracted: true,
        generated_design: None,
        approved_design: None,
        is_design_loading: false,
        design_error: None,
    }
}

fn materialize_scene(outline: SceneOutline) -> Scene {
    Scene {
        id: Uuid::new_v4(),
        summary: outline.summary,
        characters_in_scene: outline.characters_in_scene,
        setting: outline.setting,
        action: outline.action,
        emotional_beat: outline.emotional_beat,
        image_prompt: outline.image_prompt,
        image: None,
        image_error: None,
    }
}

/// Swaps in friendlier wording for safety rejections. Text only; control
/// flow never branches on the message.
fn friendly_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") {
        "The content safety filter declined this request. Soften the wording and retry."
            .to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockState {
        extract_result: Mutex<Option<anyhow::Result<Vec<ExtractedCharacter>>>>,
        extract_calls: Mutex<usize>,
        design_results: Mutex<VecDeque<anyhow::Result<ImageData>>>,
        design_calls: Mutex<Vec<String>>,
        deconstruct_result: Mutex<Option<anyhow::Result<Vec<SceneOutline>>>>,
        scene_results: Mutex<VecDeque<anyhow::Result<ImageData>>>,
        scene_calls: Mutex<Vec<(String, Vec<ImageData>)>>,
    }

    // State is shared out through an Arc so tests keep a handle after the
    // gateway moves into the session.
    #[derive(Debug, Default)]
    struct MockGateway {
        state: Arc<MockState>,
    }

    fn png(data: &str) -> ImageData {
        ImageData {
            mime_type: "image/png".to_string(),
            data: data.to_string(),
        }
    }

    #[async_trait]
    impl AiGateway for MockGateway {
        async fn extract_characters(
            &self,
            _story_text: &str,
        ) -> anyhow::Result<Vec<ExtractedCharacter>> {
            *self.state.extract_calls.lock().unwrap() += 1;
            self.state
                .extract_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(vec![]))
        }

        async fn generate_character_design(
            &self,
            character: &Character,
            _style: &StylePreferences,
        ) -> anyhow::Result<ImageData> {
            self.state
                .design_calls
                .lock()
                .unwrap()
                .push(character.name.clone());
            self.state
                .design_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(png("DESIGN")))
        }

        async fn deconstruct_story(
            &self,
            _story_text: &str,
            _characters: &[Character],
            _style: &StylePreferences,
        ) -> anyhow::Result<Vec<SceneOutline>> {
            self.state
                .deconstruct_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(vec![]))
        }

        async fn generate_scene_image(
            &self,
            image_prompt: &str,
            _style: &StylePreferences,
            references: &[ImageData],
        ) -> anyhow::Result<ImageData> {
            self.state
                .scene_calls
                .lock()
                .unwrap()
                .push((image_prompt.to_string(), references.to_vec()));
            self.state
                .scene_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(png("SCENE")))
        }
    }

    fn extracted(name: &str) -> ExtractedCharacter {
        ExtractedCharacter {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn outline(summary: &str, names: &[&str]) -> SceneOutline {
        SceneOutline {
            summary: summary.to_string(),
            characters_in_scene: names.iter().map(|n| n.to_string()).collect(),
            setting: "somewhere".to_string(),
            action: "something".to_string(),
            emotional_beat: "somehow".to_string(),
            image_prompt: format!("prompt for {}", summary),
        }
    }

    fn named_character(name: &str) -> Character {
        let mut character = Character::blank();
        character.name = name.to_string();
        character
    }

    fn session(gateway: MockGateway) -> GenerationSession {
        GenerationSession::new(Box::new(gateway), 10)
    }

    #[tokio::test]
    async fn test_submit_story_rejects_empty_text() {
        let mut session = session(MockGateway::default());
        let err = session.submit_story("   ").await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyStory));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_submit_story_extracts_and_caps_characters() {
        let gateway = MockGateway::default();
        *gateway.state.extract_result.lock().unwrap() = Some(Ok((0..12)
            .map(|i| extracted(&format!("Char{}", i)))
            .collect()));
        let mut session = GenerationSession::new(Box::new(gateway), 10);

        session.submit_story("A long tale.").await.unwrap();

        assert_eq!(session.phase(), Phase::AwaitingCharacterConfirmation);
        assert_eq!(session.characters().len(), 10);
        assert!(session.characters().list().iter().all(|c| c.is_ai_extracted));
    }

    #[tokio::test]
    async fn test_submit_story_failed_extraction_downgrades_to_manual_entry() {
        let gateway = MockGateway::default();
        *gateway.state.extract_result.lock().unwrap() = Some(Err(anyhow!("model unavailable")));
        let mut session = session(gateway);

        session.submit_story("A tale.").await.unwrap();

        assert_eq!(session.phase(), Phase::AwaitingCharacterConfirmation);
        assert!(session.characters().is_empty());
    }

    #[tokio::test]
    async fn test_submit_story_skips_extraction_with_existing_characters() {
        let gateway = MockGateway::default();
        let state = gateway.state.clone();
        let mut session = session(gateway);
        let id = session.add_character().unwrap();
        session
            .update_character(id, CharacterField::Name, "Arin".to_string())
            .unwrap();

        session.submit_story("A tale.").await.unwrap();

        assert_eq!(session.phase(), Phase::AwaitingCharacterConfirmation);
        assert_eq!(*state.extract_calls.lock().unwrap(), 0);
        assert!(!session.characters().list()[0].is_ai_extracted);
    }

    #[tokio::test]
    async fn test_design_batch_isolates_failures_and_clears_loading() {
        let gateway = MockGateway::default();
        gateway.state.design_results.lock().unwrap().extend([
            Ok(png("AAAA")),
            Err(anyhow!("boom")),
            Ok(png("CCCC")),
        ]);
        let mut session = session(gateway);
        session.characters.insert(named_character("A"));
        session.characters.insert(named_character("B"));
        session.characters.insert(named_character("C"));
        session.phase = Phase::AwaitingCharacterConfirmation;

        let count = session.generate_all_character_designs().await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(session.phase(), Phase::AwaitingDesignApproval);
        let list = session.characters().list();
        assert_eq!(list[0].generated_design.as_deref(), Some("data:image/png;base64,AAAA"));
        assert!(list[1].generated_design.is_none());
        assert_eq!(list[1].design_error.as_deref(), Some("boom"));
        assert_eq!(list[2].generated_design.as_deref(), Some("data:image/png;base64,CCCC"));
        assert!(list.iter().all(|c| !c.is_design_loading));
    }

    #[tokio::test]
    async fn test_design_batch_empty_selection_keeps_phase() {
        let mut session = session(MockGateway::default());
        let mut approved = named_character("A");
        approved.approved_design = Some("data:image/png;base64,AAAA".to_string());
        session.characters.insert(approved);
        session.phase = Phase::AwaitingDesignApproval;

        let count = session.generate_all_character_designs().await.unwrap();

        assert_eq!(count, 0);
        assert_eq!(session.phase(), Phase::AwaitingDesignApproval);
    }

    #[tokio::test]
    async fn test_single_design_noop_when_already_approved() {
        let gateway = MockGateway::default();
        let state = gateway.state.clone();
        let mut session = session(gateway);
        let mut approved = named_character("A");
        approved.approved_design = Some("data:image/png;base64,AAAA".to_string());
        let id = approved.id;
        session.characters.insert(approved);
        session.phase = Phase::AwaitingDesignApproval;

        session.generate_character_design(id).await.unwrap();

        assert!(state.design_calls.lock().unwrap().is_empty());
        assert!(session.characters().get(id).unwrap().has_approved_design());
    }

    #[tokio::test]
    async fn test_single_design_advances_confirmation_phase() {
        let mut session = session(MockGateway::default());
        session.characters.insert(named_character("A"));
        let id = session.characters.list()[0].id;
        session.phase = Phase::AwaitingCharacterConfirmation;

        session.generate_character_design(id).await.unwrap();

        assert_eq!(session.phase(), Phase::AwaitingDesignApproval);
        assert!(session.characters().list()[0].generated_design.is_some());
    }

    #[tokio::test]
    async fn test_approve_is_idempotent() {
        let mut session = session(MockGateway::default());
        let mut character = named_character("A");
        character.generated_design = Some("data:image/png;base64,AAAA".to_string());
        character.design_error = Some("old error".to_string());
        let id = character.id;
        session.characters.insert(character);
        session.phase = Phase::AwaitingDesignApproval;

        session.approve_character_design(id).unwrap();
        let after_first = session.characters().get(id).unwrap().clone();
        session.approve_character_design(id).unwrap();
        let after_second = session.characters().get(id).unwrap();

        assert_eq!(
            after_first.approved_design.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert!(after_first.generated_design.is_none());
        assert!(after_first.design_error.is_none());
        assert_eq!(after_second.approved_design, after_first.approved_design);
        assert_eq!(after_second.generated_design, after_first.generated_design);
        assert_eq!(after_second.design_error, after_first.design_error);
    }

    #[tokio::test]
    async fn test_storyboard_gate_rejects_unapproved_characters() {
        let mut session = session(MockGateway::default());
        let mut approved = named_character("Arin");
        approved.approved_design = Some("data:image/png;base64,AAAA".to_string());
        session.characters.insert(approved);
        session.characters.insert(named_character("Brynn"));
        session.phase = Phase::AwaitingDesignApproval;

        let err = session.build_storyboard().await.unwrap_err();

        match err {
            SessionError::UnapprovedCharacters(names) => {
                assert_eq!(names, vec!["Brynn".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.phase(), Phase::AwaitingDesignApproval);
        assert!(session.timeline().is_empty());
    }

    #[tokio::test]
    async fn test_storyboard_preserves_scene_order() {
        let gateway = MockGateway::default();
        *gateway.state.deconstruct_result.lock().unwrap() = Some(Ok(vec![
            outline("A", &[]),
            outline("B", &[]),
            outline("C", &[]),
        ]));
        let mut session = session(gateway);
        session.story_text = "story".to_string();
        session.phase = Phase::AwaitingDesignApproval;

        session.build_storyboard().await.unwrap();

        assert_eq!(session.phase(), Phase::Complete);
        let order: Vec<&str> = session
            .timeline()
            .list()
            .iter()
            .map(|s| s.summary.as_str())
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert!(session.timeline().list().iter().all(|s| s.image.is_some()));
    }

    #[tokio::test]
    async fn test_storyboard_partial_failure_isolation() {
        let gateway = MockGateway::default();
        *gateway.state.deconstruct_result.lock().unwrap() = Some(Ok(vec![
            outline("A", &[]),
            outline("B", &[]),
            outline("C", &[]),
        ]));
        gateway.state.scene_results.lock().unwrap().extend([
            Ok(png("AAAA")),
            Err(anyhow!("render failed")),
            Ok(png("CCCC")),
        ]);
        let mut session = session(gateway);
        session.story_text = "story".to_string();
        session.phase = Phase::AwaitingDesignApproval;

        session.build_storyboard().await.unwrap();

        assert_eq!(session.phase(), Phase::Complete);
        let scenes = session.timeline().list();
        assert!(scenes[0].image.is_some());
        assert!(scenes[1].image.is_none());
        assert_eq!(scenes[1].image_error.as_deref(), Some("render failed"));
        assert!(scenes[2].image.is_some());
    }

    #[tokio::test]
    async fn test_reference_resolution_exact_name_match() {
        let gateway = MockGateway::default();
        let state = gateway.state.clone();
        *gateway.state.deconstruct_result.lock().unwrap() =
            Some(Ok(vec![outline("Meeting", &["Arin", "Nobody"])]));
        let mut session = session(gateway);
        let mut arin = named_character("Arin");
        arin.approved_design = Some("data:image/jpeg;base64,XXXX".to_string());
        session.characters.insert(arin);
        session.story_text = "story".to_string();
        session.phase = Phase::AwaitingDesignApproval;

        session.build_storyboard().await.unwrap();

        let calls = state.scene_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let references = &calls[0].1;
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].mime_type, "image/jpeg");
        assert_eq!(references[0].data, "XXXX");
    }

    #[tokio::test]
    async fn test_storyboard_empty_deconstruction_is_soft_failure() {
        let gateway = MockGateway::default();
        *gateway.state.deconstruct_result.lock().unwrap() = Some(Ok(vec![]));
        let mut session = session(gateway);
        session.story_text = "story".to_string();
        session.phase = Phase::AwaitingDesignApproval;

        let err = session.build_storyboard().await.unwrap_err();

        assert!(matches!(err, SessionError::NoScenes));
        assert_eq!(session.phase(), Phase::AwaitingDesignApproval);
    }

    #[tokio::test]
    async fn test_storyboard_deconstruction_error_is_fatal_until_reset() {
        let gateway = MockGateway::default();
        *gateway.state.deconstruct_result.lock().unwrap() = Some(Err(anyhow!("quota exhausted")));
        let mut session = session(gateway);
        session.story_text = "story".to_string();
        session.phase = Phase::AwaitingDesignApproval;

        assert!(session.build_storyboard().await.is_err());
        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(session.fault(), Some("quota exhausted"));

        let err = session.build_storyboard().await.unwrap_err();
        assert!(matches!(err, SessionError::Faulted(_)));

        session.reset();
        assert_eq!(session.phase(), Phase::AwaitingStoryInput);
        assert!(session.fault().is_none());
    }

    #[tokio::test]
    async fn test_locked_character_rejects_edits_until_cleared() {
        let mut session = session(MockGateway::default());
        let mut character = named_character("Arin");
        character.approved_design = Some("data:image/png;base64,AAAA".to_string());
        let id = character.id;
        session.characters.insert(character);
        session.phase = Phase::AwaitingDesignApproval;

        let err = session
            .update_character(id, CharacterField::Age, "30".to_string())
            .unwrap_err();
        assert!(matches!(err, SessionError::CharacterLocked(_)));

        session.clear_character_design(id).unwrap();
        session
            .update_character(id, CharacterField::Age, "30".to_string())
            .unwrap();
        assert_eq!(
            session.characters().get(id).unwrap().age.as_deref(),
            Some("30")
        );
    }

    #[tokio::test]
    async fn test_cancel_aborts_design_batch_without_stuck_loading() {
        let mut session = session(MockGateway::default());
        session.characters.insert(named_character("A"));
        session.phase = Phase::AwaitingCharacterConfirmation;

        session.cancel();
        let err = session.generate_all_character_designs().await.unwrap_err();

        assert!(matches!(err, SessionError::Cancelled));
        assert!(session.characters().list().iter().all(|c| !c.is_design_loading));
    }

    #[tokio::test]
    async fn test_safety_message_rewording() {
        let gateway = MockGateway::default();
        gateway
            .state
            .design_results
            .lock()
            .unwrap()
            .push_back(Err(anyhow!("Request blocked: SAFETY")));
        let mut session = session(gateway);
        session.characters.insert(named_character("A"));
        session.phase = Phase::AwaitingCharacterConfirmation;

        session.generate_all_character_designs().await.unwrap();

        let error = session.characters().list()[0]
            .design_error
            .as_deref()
            .unwrap();
        assert!(error.contains("safety filter"));
    }
}
