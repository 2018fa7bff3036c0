use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One story character and its design-sheet state.
///
/// Text fields are free text; only the name is ever validated (non-empty
/// marks a character "active" for gating purposes). The design sub-state
/// moves `generated_design` -> `approved_design` on approval, and an
/// approved character refuses text edits until the design is cleared.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Character {
    pub id: Uuid,

    pub name: String,
    pub description: Option<String>,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub hair_color: Option<String>,
    pub eye_color: Option<String>,
    pub build: Option<String>,
    pub personality: Option<String>,
    pub clothing_style: Option<String>,
    pub distinguishing_features: Option<String>,
    pub habits_mannerisms: Option<String>,

    /// True while the character text came from extraction untouched.
    /// Any user edit clears it, permanently.
    #[serde(default)]
    pub is_ai_extracted: bool,

    /// Candidate design sheet as a `data:` URL, awaiting approval.
    pub generated_design: Option<String>,
    /// Locked reference image as a `data:` URL.
    pub approved_design: Option<String>,
    #[serde(default)]
    pub is_design_loading: bool,
    pub design_error: Option<String>,
}

impl Character {
    pub fn blank() -> Self {
        Self {
            id: Uuid::new_v4(),
            ..Default::default()
        }
    }

    pub fn is_named(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn has_approved_design(&self) -> bool {
        self.approved_design
            .as_deref()
            .is_some_and(|url| !url.is_empty())
    }

    /// Condensed textual sheet used in design and deconstruction prompts.
    pub fn descriptor_text(&self) -> String {
        let mut parts = Vec::new();
        let fields: [(&str, &Option<String>); 10] = [
            ("description", &self.description),
            ("gender", &self.gender),
            ("age", &self.age),
            ("hair color", &self.hair_color),
            ("eye color", &self.eye_color),
            ("build", &self.build),
            ("personality", &self.personality),
            ("clothing style", &self.clothing_style),
            ("distinguishing features", &self.distinguishing_features),
            ("habits and mannerisms", &self.habits_mannerisms),
        ];
        for (label, value) in fields {
            if let Some(v) = value {
                if !v.trim().is_empty() {
                    parts.push(format!("{}: {}", label, v.trim()));
                }
            }
        }
        parts.join("; ")
    }
}

/// Editable text fields, addressed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterField {
    Name,
    Description,
    Gender,
    Age,
    HairColor,
    EyeColor,
    Build,
    Personality,
    ClothingStyle,
    DistinguishingFeatures,
    HabitsMannerisms,
}

impl CharacterField {
    pub const ALL: [CharacterField; 11] = [
        CharacterField::Name,
        CharacterField::Description,
        CharacterField::Gender,
        CharacterField::Age,
        CharacterField::HairColor,
        CharacterField::EyeColor,
        CharacterField::Build,
        CharacterField::Personality,
        CharacterField::ClothingStyle,
        CharacterField::DistinguishingFeatures,
        CharacterField::HabitsMannerisms,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CharacterField::Name => "name",
            CharacterField::Description => "description",
            CharacterField::Gender => "gender",
            CharacterField::Age => "age",
            CharacterField::HairColor => "hair color",
            CharacterField::EyeColor => "eye color",
            CharacterField::Build => "build",
            CharacterField::Personality => "personality",
            CharacterField::ClothingStyle => "clothing style",
            CharacterField::DistinguishingFeatures => "distinguishing features",
            CharacterField::HabitsMannerisms => "habits and mannerisms",
        }
    }
}

impl std::fmt::Display for CharacterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Character {
    /// Current value of one editable field, for display and edit prompts.
    pub fn field(&self, field: CharacterField) -> Option<&str> {
        match field {
            CharacterField::Name => Some(self.name.as_str()),
            CharacterField::Description => self.description.as_deref(),
            CharacterField::Gender => self.gender.as_deref(),
            CharacterField::Age => self.age.as_deref(),
            CharacterField::HairColor => self.hair_color.as_deref(),
            CharacterField::EyeColor => self.eye_color.as_deref(),
            CharacterField::Build => self.build.as_deref(),
            CharacterField::Personality => self.personality.as_deref(),
            CharacterField::ClothingStyle => self.clothing_style.as_deref(),
            CharacterField::DistinguishingFeatures => self.distinguishing_features.as_deref(),
            CharacterField::HabitsMannerisms => self.habits_mannerisms.as_deref(),
        }
    }
}

/// In-memory character collection owned by the session.
///
/// Names are not required to be unique; lookups resolve collisions by
/// first match in insertion order.
#[derive(Debug, Default, Clone)]
pub struct CharacterRegistry {
    characters: Vec<Character>,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a blank, manually-entered character and returns its id.
    pub fn add(&mut self) -> Uuid {
        let character = Character::blank();
        let id = character.id;
        self.characters.push(character);
        id
    }

    pub fn insert(&mut self, character: Character) {
        self.characters.push(character);
    }

    /// Writes one text field. Clears the provenance flag as a side effect.
    /// Returns false when the id is unknown.
    pub fn update(&mut self, id: Uuid, field: CharacterField, value: String) -> bool {
        let Some(character) = self.get_mut(id) else {
            return false;
        };
        let slot = |v: String| if v.trim().is_empty() { None } else { Some(v) };
        match field {
            CharacterField::Name => character.name = value,
            CharacterField::Description => character.description = slot(value),
            CharacterField::Gender => character.gender = slot(value),
            CharacterField::Age => character.age = slot(value),
            CharacterField::HairColor => character.hair_color = slot(value),
            CharacterField::EyeColor => character.eye_color = slot(value),
            CharacterField::Build => character.build = slot(value),
            CharacterField::Personality => character.personality = slot(value),
            CharacterField::ClothingStyle => character.clothing_style = slot(value),
            CharacterField::DistinguishingFeatures => {
                character.distinguishing_features = slot(value)
            }
            CharacterField::HabitsMannerisms => character.habits_mannerisms = slot(value),
        }
        character.is_ai_extracted = false;
        true
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.characters.len();
        self.characters.retain(|c| c.id != id);
        self.characters.len() != before
    }

    pub fn get(&self, id: Uuid) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.id == id)
    }

    /// Exact-match name lookup, first match wins.
    pub fn find_by_name(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn list(&self) -> &[Character] {
        &self.characters
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Character> {
        self.characters.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn clear(&mut self) {
        self.characters.clear();
    }

    /// Named characters still missing an approved design.
    pub fn unapproved_names(&self) -> Vec<String> {
        self.characters
            .iter()
            .filter(|c| c.is_named() && !c.has_approved_design())
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_character_never_ai_extracted() {
        let mut registry = CharacterRegistry::new();
        let id = registry.add();
        registry.update(id, CharacterField::Name, "Arin".to_string());
        registry.update(
            id,
            CharacterField::Description,
            "tall, red hair".to_string(),
        );
        assert!(!registry.get(id).unwrap().is_ai_extracted);
    }

    #[test]
    fn test_edit_clears_provenance_once_and_forever() {
        let mut registry = CharacterRegistry::new();
        let mut character = Character::blank();
        character.name = "Mira".to_string();
        character.is_ai_extracted = true;
        let id = character.id;
        registry.insert(character);

        registry.update(id, CharacterField::Age, "30".to_string());
        assert!(!registry.get(id).unwrap().is_ai_extracted);

        // Further edits must not resurrect the flag.
        registry.update(id, CharacterField::Age, "31".to_string());
        assert!(!registry.get(id).unwrap().is_ai_extracted);
    }

    #[test]
    fn test_find_by_name_first_match_wins() {
        let mut registry = CharacterRegistry::new();
        let mut first = Character::blank();
        first.name = "Twin".to_string();
        first.description = Some("the elder".to_string());
        let first_id = first.id;
        registry.insert(first);

        let mut second = Character::blank();
        second.name = "Twin".to_string();
        second.description = Some("the younger".to_string());
        registry.insert(second);

        assert_eq!(registry.find_by_name("Twin").unwrap().id, first_id);
        assert!(registry.find_by_name("twin").is_none());
    }

    #[test]
    fn test_unapproved_names_skips_unnamed_and_approved() {
        let mut registry = CharacterRegistry::new();
        registry.add(); // unnamed, ignored

        let mut approved = Character::blank();
        approved.name = "Done".to_string();
        approved.approved_design = Some("data:image/png;base64,AAAA".to_string());
        registry.insert(approved);

        let mut pending = Character::blank();
        pending.name = "Pending".to_string();
        registry.insert(pending);

        assert_eq!(registry.unapproved_names(), vec!["Pending".to_string()]);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let mut registry = CharacterRegistry::new();
        registry.add();
        assert!(!registry.remove(Uuid::new_v4()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_descriptor_text_skips_empty_fields() {
        let mut character = Character::blank();
        character.name = "Arin".to_string();
        character.hair_color = Some("red".to_string());
        character.build = Some("  ".to_string());
        let text = character.descriptor_text();
        assert_eq!(text, "hair color: red");
    }
}
