//! Prompt templates for the four generative call kinds.

use crate::character::Character;
use crate::style::StylePreferences;

/// System instruction shared by the two structured-output text calls.
pub const JSON_SYSTEM_PROMPT: &str =
    "You are a story development assistant. Return ONLY valid JSON with no \
     commentary and no markdown fences.";

pub fn extraction_prompt(story_text: &str) -> String {
    format!(
        "Read the story below and identify every named character. For each \
         one, fill in as many fields as the text supports and leave the rest \
         as empty strings.\n\
         Return ONLY a JSON object of this exact shape:\n\
         {{ \"characters\": [ {{ \"name\": \"...\", \"description\": \"...\", \
         \"gender\": \"...\", \"age\": \"...\", \"hair_color\": \"...\", \
         \"eye_color\": \"...\", \"build\": \"...\", \"personality\": \"...\", \
         \"clothing_style\": \"...\", \"distinguishing_features\": \"...\", \
         \"habits_mannerisms\": \"...\" }} ] }}\n\n\
         Story:\n{}",
        story_text
    )
}

pub fn design_prompt(character: &Character, style: &StylePreferences) -> String {
    let descriptors = character.descriptor_text();
    let sheet = if descriptors.is_empty() {
        character.name.clone()
    } else {
        format!("{} ({})", character.name, descriptors)
    };
    format!(
        "Character design sheet for {}. Show the character from multiple \
         fixed viewpoints: full-body front, side, and back, plus a close-up \
         of the face, on a plain neutral background. Consistent proportions \
         across all views. {}",
        sheet,
        style.prompt_clause()
    )
}

pub fn deconstruction_prompt(
    story_text: &str,
    characters: &[Character],
    style: &StylePreferences,
) -> String {
    let cast: Vec<serde_json::Value> = characters
        .iter()
        .filter(|c| c.is_named())
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "description": c.descriptor_text(),
            })
        })
        .collect();
    let cast_json = serde_json::to_string(&cast).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Break the story below into an ordered list of key visual scenes, \
         one per narrative beat. Only use character names from the cast \
         list, spelled exactly as given. For each scene, synthesize an \
         \"image_prompt\": one self-contained paragraph describing the shot \
         for an image model, consistent with this style direction: {}\n\
         Return ONLY a JSON object of this exact shape:\n\
         {{ \"scenes\": [ {{ \"summary\": \"...\", \
         \"characters_in_scene\": [\"...\"], \"setting\": \"...\", \
         \"action\": \"...\", \"emotional_beat\": \"...\", \
         \"image_prompt\": \"...\" }} ] }}\n\n\
         Cast: {}\n\n\
         Story:\n{}",
        style.prompt_clause(),
        cast_json,
        story_text
    )
}

pub fn scene_image_prompt(image_prompt: &str, style: &StylePreferences) -> String {
    format!(
        "{}\n{}\nUse the attached reference images to keep each depicted \
         character's appearance consistent with their design sheet.",
        image_prompt,
        style.prompt_clause()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_embeds_story() {
        let prompt = extraction_prompt("Once upon a time, Arin left home.");
        assert!(prompt.contains("Arin left home"));
        assert!(prompt.contains("\"characters\""));
    }

    #[test]
    fn test_design_prompt_includes_descriptors_and_style() {
        let mut character = Character::blank();
        character.name = "Arin".to_string();
        character.hair_color = Some("red".to_string());
        let style = StylePreferences::default();
        let prompt = design_prompt(&character, &style);
        assert!(prompt.contains("Arin"));
        assert!(prompt.contains("hair color: red"));
        assert!(prompt.contains("storybook illustration"));
        assert!(prompt.contains("multiple"));
    }

    #[test]
    fn test_deconstruction_prompt_lists_named_cast_only() {
        let mut named = Character::blank();
        named.name = "Arin".to_string();
        let unnamed = Character::blank();
        let prompt =
            deconstruction_prompt("story", &[named, unnamed], &StylePreferences::default());
        assert!(prompt.contains("\"Arin\""));
        assert!(prompt.contains("\"scenes\""));
    }
}
