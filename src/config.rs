use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Cap on characters taken from one extraction; extra results are
    /// dropped, not merged.
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,

    pub ai: AiConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AiConfig {
    pub provider: String, // currently "gemini"
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

fn default_output() -> String {
    "output".to_string()
}

fn default_max_characters() -> usize {
    10
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
ai:
  provider: gemini
  gemini:
    api_key: test-key
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.max_characters, 10);
        let gemini = config.ai.gemini.unwrap();
        assert_eq!(gemini.text_model, "gemini-2.5-flash");
        assert_eq!(gemini.image_model, "gemini-2.5-flash-image");
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
output_folder: boards
max_characters: 4
ai:
  provider: gemini
  gemini:
    api_key: k
    text_model: custom-text
    image_model: custom-image
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.output_folder, "boards");
        assert_eq!(config.max_characters, 4);
        assert_eq!(config.ai.gemini.unwrap().image_model, "custom-image");
    }
}
