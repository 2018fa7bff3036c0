use serde::{Deserialize, Serialize};

/// Visual direction shared by every image call in a session. Replaced
/// wholesale when the user edits it; captured by value at call time.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StylePreferences {
    #[serde(default)]
    pub art_style: ArtStyle,

    pub color_palette: Option<ColorPalette>,

    /// Free-text mood keywords, e.g. "melancholic, dreamlike".
    #[serde(default)]
    pub mood: String,

    /// Free-text reference artists, e.g. "Moebius, Studio Ghibli".
    #[serde(default)]
    pub reference_artists: String,
}

impl StylePreferences {
    /// One-line style clause appended to image prompts.
    pub fn prompt_clause(&self) -> String {
        let mut clause = format!("Art style: {}.", self.art_style.as_str());
        if let Some(palette) = &self.color_palette {
            clause.push_str(&format!(" Color palette: {}.", palette.as_str()));
        }
        if !self.mood.trim().is_empty() {
            clause.push_str(&format!(" Mood: {}.", self.mood.trim()));
        }
        if !self.reference_artists.trim().is_empty() {
            clause.push_str(&format!(
                " In the manner of: {}.",
                self.reference_artists.trim()
            ));
        }
        clause
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArtStyle {
    #[default]
    Storybook,
    Watercolor,
    Anime,
    ComicBook,
    PixelArt,
    LineArt,
    Cinematic,
    OilPainting,
}

impl ArtStyle {
    pub const ALL: [ArtStyle; 8] = [
        ArtStyle::Storybook,
        ArtStyle::Watercolor,
        ArtStyle::Anime,
        ArtStyle::ComicBook,
        ArtStyle::PixelArt,
        ArtStyle::LineArt,
        ArtStyle::Cinematic,
        ArtStyle::OilPainting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtStyle::Storybook => "storybook illustration",
            ArtStyle::Watercolor => "watercolor painting",
            ArtStyle::Anime => "anime",
            ArtStyle::ComicBook => "comic book",
            ArtStyle::PixelArt => "pixel art",
            ArtStyle::LineArt => "clean line art",
            ArtStyle::Cinematic => "cinematic concept art",
            ArtStyle::OilPainting => "oil painting",
        }
    }
}

impl std::fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ColorPalette {
    Vibrant,
    Pastel,
    Muted,
    Monochrome,
    Earthy,
    Neon,
}

impl ColorPalette {
    pub const ALL: [ColorPalette; 6] = [
        ColorPalette::Vibrant,
        ColorPalette::Pastel,
        ColorPalette::Muted,
        ColorPalette::Monochrome,
        ColorPalette::Earthy,
        ColorPalette::Neon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorPalette::Vibrant => "vibrant, saturated colors",
            ColorPalette::Pastel => "soft pastel tones",
            ColorPalette::Muted => "muted, desaturated tones",
            ColorPalette::Monochrome => "monochrome",
            ColorPalette::Earthy => "earthy, natural tones",
            ColorPalette::Neon => "neon accents on dark ground",
        }
    }
}

impl std::fmt::Display for ColorPalette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
