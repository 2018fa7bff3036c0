use crate::character::Character;
use crate::config::Config;
use crate::prompts;
use crate::style::StylePreferences;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Self-describing image blob as produced and consumed by the AI service.
/// Transported as `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    /// Base64-encoded payload, no wrapper.
    pub data: String,
}

impl ImageData {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("Not a data URL: {}", truncate(url)))?;
        let (mime_type, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| anyhow!("Missing base64 marker in data URL: {}", truncate(url)))?;
        if mime_type.is_empty() {
            return Err(anyhow!("Empty mime type in data URL"));
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        })
    }

    /// Raw bytes, for writing the image to disk.
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .context("Invalid base64 image payload")
    }

    /// File extension guessed from the mime type.
    pub fn extension(&self) -> &str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 64 {
        let head: String = s.chars().take(64).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Character fields as returned by extraction. Absent fields come back as
/// empty strings per the prompt contract.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractedCharacter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub hair_color: String,
    #[serde(default)]
    pub eye_color: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub clothing_style: String,
    #[serde(default)]
    pub distinguishing_features: String,
    #[serde(default)]
    pub habits_mannerisms: String,
}

/// One scene as returned by story deconstruction, before ids are assigned.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SceneOutline {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub characters_in_scene: Vec<String>,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub emotional_beat: String,
    #[serde(default)]
    pub image_prompt: String,
}

/// The external generative-AI service. Every operation is a single-shot
/// call; failures carry human-readable messages only.
#[async_trait]
pub trait AiGateway: Send + Sync + Debug {
    async fn extract_characters(&self, story_text: &str) -> Result<Vec<ExtractedCharacter>>;

    async fn generate_character_design(
        &self,
        character: &Character,
        style: &StylePreferences,
    ) -> Result<ImageData>;

    async fn deconstruct_story(
        &self,
        story_text: &str,
        characters: &[Character],
        style: &StylePreferences,
    ) -> Result<Vec<SceneOutline>>;

    async fn generate_scene_image(
        &self,
        image_prompt: &str,
        style: &StylePreferences,
        references: &[ImageData],
    ) -> Result<ImageData>;
}

pub fn create_gateway(config: &Config) -> Result<Box<dyn AiGateway>> {
    match config.ai.provider.as_str() {
        "gemini" => {
            let cfg = config.ai.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiGateway::new(
                &cfg.api_key,
                &cfg.text_model,
                &cfg.image_model,
            )))
        }
        other => Err(anyhow!("Unknown AI provider: {}", other)),
    }
}

/// Strips markdown code fences the model sometimes wraps JSON in.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiGateway {
    api_key: String,
    text_model: String,
    image_model: String,
    client: reqwest::Client,
}

impl GeminiGateway {
    fn new(api_key: &str, text_model: &str, image_model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        log::debug!("Gemini call, model={}", model);
        let resp = self.client.post(&url).json(request).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!(
                "Failed to parse Gemini response: {}. Body: {}",
                e,
                truncate(&response_text)
            )
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }
        Ok(result)
    }

    async fn generate_text(&self, system: &str, user: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::text(user)],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::text(system)],
            }),
        };

        let result = self.call(&self.text_model, &request).await?;
        let candidate = result
            .candidates
            .as_deref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response carried no candidates"))?;

        if let Some(content) = &candidate.content {
            if let Some(text) = content.parts.iter().find_map(|p| p.text.as_deref()) {
                return Ok(text.to_string());
            }
        }

        let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
        Err(anyhow!("Gemini response empty. Finish reason: {}", reason))
    }

    async fn generate_image(&self, prompt: &str, references: &[ImageData]) -> Result<ImageData> {
        let mut parts = vec![GeminiPart::text(prompt)];
        for reference in references {
            parts.push(GeminiPart::inline(reference));
        }

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: None,
        };

        let result = self.call(&self.image_model, &request).await?;
        let candidate = result
            .candidates
            .as_deref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response carried no candidates"))?;

        if let Some(content) = &candidate.content {
            if let Some(inline) = content.parts.iter().find_map(|p| p.inline_data.as_ref()) {
                return Ok(ImageData {
                    mime_type: inline.mime_type.clone(),
                    data: inline.data.clone(),
                });
            }
        }

        let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
        Err(anyhow!("Gemini returned no image. Finish reason: {}", reason))
    }
}

#[async_trait]
impl AiGateway for GeminiGateway {
    async fn extract_characters(&self, story_text: &str) -> Result<Vec<ExtractedCharacter>> {
        let user = prompts::extraction_prompt(story_text);
        let raw = self.generate_text(prompts::JSON_SYSTEM_PROMPT, &user).await?;
        let clean = strip_code_blocks(&raw);
        let parsed: ExtractionResponse = serde_json::from_str(&clean)
            .with_context(|| format!("Failed to parse extraction JSON: {}", truncate(&clean)))?;
        Ok(parsed.characters)
    }

    async fn generate_character_design(
        &self,
        character: &Character,
        style: &StylePreferences,
    ) -> Result<ImageData> {
        let prompt = prompts::design_prompt(character, style);
        self.generate_image(&prompt, &[]).await
    }

    async fn deconstruct_story(
        &self,
        story_text: &str,
        characters: &[Character],
        style: &StylePreferences,
    ) -> Result<Vec<SceneOutline>> {
        let user = prompts::deconstruction_prompt(story_text, characters, style);
        let raw = self.generate_text(prompts::JSON_SYSTEM_PROMPT, &user).await?;
        let clean = strip_code_blocks(&raw);
        let parsed: DeconstructionResponse = serde_json::from_str(&clean).with_context(|| {
            format!("Failed to parse deconstruction JSON: {}", truncate(&clean))
        })?;
        Ok(parsed.scenes)
    }

    async fn generate_scene_image(
        &self,
        image_prompt: &str,
        style: &StylePreferences,
        references: &[ImageData],
    ) -> Result<ImageData> {
        let prompt = prompts::scene_image_prompt(image_prompt, style);
        self.generate_image(&prompt, references).await
    }
}

#[derive(Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    characters: Vec<ExtractedCharacter>,
}

#[derive(Deserialize)]
struct DeconstructionResponse {
    #[serde(default)]
    scenes: Vec<SceneOutline>,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(s: &str) -> Self {
        Self {
            text: Some(s.to_string()),
            inline_data: None,
        }
    }

    fn inline(image: &ImageData) -> Self {
        Self {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String, // base64-encoded
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<GeminiInlineData>,
}
