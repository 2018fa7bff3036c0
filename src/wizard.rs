//! Interactive CLI wizard driving a [`GenerationSession`].

use crate::character::{Character, CharacterField};
use crate::config::Config;
use crate::gateway::ImageData;
use crate::scene::Scene;
use crate::session::{GenerationSession, Phase, ProgressObserver, SessionError, SessionEvent};
use crate::style::{ArtStyle, ColorPalette, StylePreferences};
use anyhow::Result;
use indicatif::ProgressBar;
use inquire::{Confirm, Editor, Select, Text};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const MENU_ADD: &str = "Add a character";
const MENU_REMOVE: &str = "Remove a character";
const MENU_GENERATE_ALL: &str = "Generate all character designs";
const MENU_BUILD: &str = "Build the storyboard";
const MENU_REBUILD: &str = "Rebuild the storyboard";
const MENU_RESTART: &str = "Start over with a new story";
const MENU_QUIT: &str = "Quit";

/// Renders session progress: a spinner while the gateway works, plain
/// status lines otherwise.
struct ConsoleObserver {
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleObserver {
    fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }
}

impl ProgressObserver for ConsoleObserver {
    fn publish(&self, event: SessionEvent) {
        let Ok(mut slot) = self.spinner.lock() else {
            return;
        };
        match event {
            SessionEvent::PhaseChanged(phase) => match phase {
                Phase::ExtractingCharacters
                | Phase::GeneratingCharacterDesigns
                | Phase::DeconstructingStory
                | Phase::GeneratingSceneImages => {
                    let bar = ProgressBar::new_spinner();
                    bar.enable_steady_tick(Duration::from_millis(120));
                    *slot = Some(bar);
                }
                _ => {
                    if let Some(bar) = slot.take() {
                        bar.finish_and_clear();
                    }
                }
            },
            SessionEvent::Status(message) => match slot.as_ref() {
                Some(bar) => bar.set_message(message),
                None => println!("  {}", message),
            },
            SessionEvent::CharacterUpdated(_) | SessionEvent::SceneUpdated(_) => {}
        }
    }
}

pub struct Wizard {
    session: GenerationSession,
    output_folder: PathBuf,
}

impl Wizard {
    pub fn new(mut session: GenerationSession, config: &Config) -> Self {
        session.set_observer(Arc::new(ConsoleObserver::new()));
        Self {
            session,
            output_folder: PathBuf::from(&config.output_folder),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.collect_style()?;
        loop {
            let keep_going = match self.session.phase() {
                Phase::Idle | Phase::AwaitingStoryInput => {
                    self.collect_story().await?;
                    true
                }
                Phase::AwaitingCharacterConfirmation => self.character_menu().await?,
                Phase::AwaitingDesignApproval => self.approval_menu().await?,
                Phase::Complete => self.complete_menu().await?,
                Phase::Error => self.error_menu()?,
                other => {
                    log::warn!("Wizard reached unexpected phase: {}", other);
                    false
                }
            };
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    fn collect_style(&mut self) -> Result<()> {
        let art_options: Vec<String> = ArtStyle::ALL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let art_choice = Select::new("Art style:", art_options).prompt()?;
        let art_style = ArtStyle::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == art_choice)
            .unwrap_or_default();

        let mut palette_options = vec!["no preference".to_string()];
        palette_options.extend(ColorPalette::ALL.iter().map(|p| p.as_str().to_string()));
        let palette_choice = Select::new("Color palette:", palette_options).prompt()?;
        let color_palette = ColorPalette::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == palette_choice);

        let mood = Text::new("Mood keywords (optional):").prompt()?;
        let reference_artists = Text::new("Reference artists (optional):").prompt()?;

        self.session.set_style(StylePreferences {
            art_style,
            color_palette,
            mood,
            reference_artists,
        });
        Ok(())
    }

    async fn collect_story(&mut self) -> Result<()> {
        loop {
            let text = Editor::new("Write or paste your story:").prompt()?;
            match self.session.submit_story(&text).await {
                Ok(()) => return Ok(()),
                Err(SessionError::EmptyStory) => {
                    println!("  The story must not be empty.");
                }
                Err(SessionError::Cancelled) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn character_menu(&mut self) -> Result<bool> {
        self.print_characters();

        let characters: Vec<(Uuid, String)> = self
            .session
            .characters()
            .list()
            .iter()
            .map(|c| (c.id, display_name(c)))
            .collect();

        let mut options: Vec<String> = characters
            .iter()
            .map(|(_, name)| format!("Edit {}", name))
            .collect();
        options.push(MENU_ADD.to_string());
        if !characters.is_empty() {
            options.push(MENU_REMOVE.to_string());
            options.push(MENU_GENERATE_ALL.to_string());
        }
        options.push(MENU_BUILD.to_string());
        options.push(MENU_QUIT.to_string());

        let choice = Select::new("Cast:", options.clone()).prompt()?;
        let Some(index) = options.iter().position(|o| *o == choice) else {
            return Ok(true);
        };

        if index < characters.len() {
            self.edit_character(characters[index].0)?;
        } else if choice == MENU_ADD {
            let id = self.session.add_character()?;
            self.edit_character(id)?;
        } else if choice == MENU_REMOVE {
            self.remove_character(&characters)?;
        } else if choice == MENU_GENERATE_ALL {
            self.session.generate_all_character_designs().await?;
        } else if choice == MENU_BUILD {
            self.try_build().await?;
        } else if choice == MENU_QUIT {
            return Ok(false);
        }
        Ok(true)
    }

    async fn approval_menu(&mut self) -> Result<bool> {
        self.print_characters();

        let reviewable: Vec<(Uuid, String)> = self
            .session
            .characters()
            .list()
            .iter()
            .filter(|c| c.generated_design.is_some())
            .map(|c| (c.id, display_name(c)))
            .collect();

        let mut options: Vec<String> = reviewable
            .iter()
            .map(|(_, name)| format!("Review design for {}", name))
            .collect();
        options.push(MENU_GENERATE_ALL.to_string());
        options.push(MENU_BUILD.to_string());
        options.push(MENU_RESTART.to_string());
        options.push(MENU_QUIT.to_string());

        let choice = Select::new("Designs:", options.clone()).prompt()?;
        let Some(index) = options.iter().position(|o| *o == choice) else {
            return Ok(true);
        };

        if index < reviewable.len() {
            self.review_design(reviewable[index].0).await?;
        } else if choice == MENU_GENERATE_ALL {
            self.session.generate_all_character_designs().await?;
        } else if choice == MENU_BUILD {
            self.try_build().await?;
        } else if choice == MENU_RESTART {
            self.session.reset();
        } else if choice == MENU_QUIT {
            return Ok(false);
        }
        Ok(true)
    }

    async fn complete_menu(&mut self) -> Result<bool> {
        let index_path = export_storyboard(
            &self.output_folder,
            self.session.characters().list(),
            self.session.timeline().list(),
        )?;
        let failed = self
            .session
            .timeline()
            .list()
            .iter()
            .filter(|s| s.image_error.is_some())
            .count();
        println!("\nStoryboard written to {}", index_path.display());
        if failed > 0 {
            println!("  {} scene(s) failed; rebuild to retry them.", failed);
        }

        let options = vec![
            MENU_REBUILD.to_string(),
            MENU_RESTART.to_string(),
            MENU_QUIT.to_string(),
        ];
        let choice = Select::new("Next:", options).prompt()?;
        if choice == MENU_REBUILD {
            self.try_build().await?;
        } else if choice == MENU_RESTART {
            self.session.reset();
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn error_menu(&mut self) -> Result<bool> {
        println!(
            "\nThe session failed: {}",
            self.session.fault().unwrap_or("unknown error")
        );
        if Confirm::new("Start over?").with_default(true).prompt()? {
            self.session.reset();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn edit_character(&mut self, id: Uuid) -> Result<()> {
        loop {
            let Some(character) = self.session.characters().get(id) else {
                return Ok(());
            };
            let mut options: Vec<String> = CharacterField::ALL
                .iter()
                .map(|f| format!("{}: {}", f.label(), character.field(*f).unwrap_or("")))
                .collect();
            options.push("Done".to_string());

            let choice = Select::new("Edit field:", options.clone()).prompt()?;
            let Some(index) = options.iter().position(|o| *o == choice) else {
                return Ok(());
            };
            if index >= CharacterField::ALL.len() {
                return Ok(());
            }
            let field = CharacterField::ALL[index];
            let initial = character.field(field).unwrap_or("").to_string();
            let value = Text::new(&format!("New {}:", field.label()))
                .with_initial_value(&initial)
                .prompt()?;
            if let Err(e) = self.session.update_character(id, field, value) {
                println!("  {}", e);
                return Ok(());
            }
        }
    }

    fn remove_character(&mut self, characters: &[(Uuid, String)]) -> Result<()> {
        let options: Vec<String> = characters.iter().map(|(_, name)| name.clone()).collect();
        let choice = Select::new("Remove which character?", options.clone()).prompt()?;
        if let Some(index) = options.iter().position(|o| *o == choice) {
            self.session.remove_character(characters[index].0)?;
        }
        Ok(())
    }

    async fn review_design(&mut self, id: Uuid) -> Result<()> {
        let Some(character) = self.session.characters().get(id) else {
            return Ok(());
        };
        let name = display_name(character);
        if let Some(url) = character.generated_design.as_deref() {
            let path = write_image(&self.output_folder.join("designs"), &sanitize(&name), url)?;
            println!("  Design sheet for {} saved to {}", name, path.display());
        }

        let options = vec![
            "Approve".to_string(),
            "Regenerate".to_string(),
            "Back".to_string(),
        ];
        let choice = Select::new(&format!("Design for {}:", name), options).prompt()?;
        if choice == "Approve" {
            self.session.approve_character_design(id)?;
        } else if choice == "Regenerate" {
            self.session.generate_character_design(id).await?;
        }
        Ok(())
    }

    /// Runs the storyboard build, reporting recoverable failures instead
    /// of propagating them.
    async fn try_build(&mut self) -> Result<()> {
        match self.session.build_storyboard().await {
            Ok(()) => Ok(()),
            Err(SessionError::UnapprovedCharacters(names)) => {
                println!("  Designs still need approval for: {}", names.join(", "));
                Ok(())
            }
            Err(SessionError::NoScenes) => {
                println!("  The story could not be broken into scenes. Try again.");
                Ok(())
            }
            Err(SessionError::Cancelled) => Ok(()),
            // Fatal errors surface through the Error phase on the next
            // pass of the run loop.
            Err(SessionError::Gateway(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn print_characters(&self) {
        let characters = self.session.characters().list();
        if characters.is_empty() {
            println!("\nNo characters yet.");
            return;
        }
        println!("\nCharacters:");
        for character in characters {
            let status = if character.is_design_loading {
                "designing...".to_string()
            } else if character.has_approved_design() {
                "design approved".to_string()
            } else if character.generated_design.is_some() {
                "design awaiting approval".to_string()
            } else if let Some(error) = &character.design_error {
                format!("design failed: {}", error)
            } else {
                "no design yet".to_string()
            };
            println!("  - {} ({})", display_name(character), status);
        }
    }
}

fn display_name(character: &Character) -> String {
    if character.is_named() {
        character.name.clone()
    } else {
        "(unnamed)".to_string()
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "character".to_string()
    } else {
        cleaned
    }
}

fn write_image(dir: &Path, stem: &str, url: &str) -> Result<PathBuf> {
    let image = ImageData::from_data_url(url)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", stem, image.extension()));
    fs::write(&path, image.decode_bytes()?)?;
    Ok(path)
}

/// Writes approved design sheets, finished scene images, and a
/// `storyboard.md` index under the output folder. Returns the index path.
pub fn export_storyboard(
    output_folder: &Path,
    characters: &[Character],
    scenes: &[Scene],
) -> Result<PathBuf> {
    let designs_dir = output_folder.join("designs");
    for character in characters {
        if let Some(url) = &character.approved_design {
            write_image(&designs_dir, &sanitize(&character.name), url)?;
        }
    }

    let scenes_dir = output_folder.join("scenes");
    fs::create_dir_all(&scenes_dir)?;

    let mut index = String::from("# Storyboard\n");
    for (i, scene) in scenes.iter().enumerate() {
        index.push_str(&format!("\n## Scene {}: {}\n\n", i + 1, scene.summary));
        if !scene.emotional_beat.is_empty() {
            index.push_str(&format!("*{}*\n\n", scene.emotional_beat));
        }
        if let Some(url) = &scene.image {
            let path = write_image(&scenes_dir, &format!("scene_{:02}", i + 1), url)?;
            let file_name = path.file_name().unwrap_or_default().to_string_lossy();
            index.push_str(&format!("![Scene {}](scenes/{})\n", i + 1, file_name));
        } else if let Some(error) = &scene.image_error {
            index.push_str(&format!("Image generation failed: {}\n", error));
        } else {
            index.push_str("Image pending.\n");
        }
    }

    let index_path = output_folder.join("storyboard.md");
    fs::write(&index_path, index)?;
    Ok(index_path)
}
