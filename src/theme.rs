use egui::Color32;
use serde::{Deserialize, Serialize};

/// Light / dark UI mode, persisted in the config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn label(&self) -> &'static str {
        match self {
            ThemeMode::Light => "Light",
            ThemeMode::Dark => "Dark",
        }
    }

    pub fn all() -> &'static [ThemeMode] {
        &[ThemeMode::Light, ThemeMode::Dark]
    }
}

/// Resolved colour palette for the grid renderer. One palette per theme mode;
/// the renderer groups its batched fills by these colours.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridPalette {
    /// Unsold, unselected cell fill.
    pub available: Color32,
    /// Cells in the user's in-progress selection.
    pub selected: Color32,
    /// Single hovered cell.
    pub hovered: Color32,
    /// Fallback fill for sold cells whose ad image has not loaded yet.
    pub sold_placeholder: Color32,
    /// Grid lines (only drawn when zoomed in far enough).
    pub grid_line: Color32,
    /// Selection / hover outline strokes.
    pub accent: Color32,
    /// Border stroked around each owned region's image.
    pub region_border: Color32,
    /// Canvas background outside the grid.
    pub background: Color32,
}

impl GridPalette {
    pub fn for_mode(mode: ThemeMode) -> Self {
        match mode {
            ThemeMode::Light => Self {
                available: Color32::from_gray(235),
                selected: Color32::from_rgb(187, 222, 251),
                hovered: Color32::from_rgb(144, 202, 249),
                sold_placeholder: Color32::from_gray(200),
                grid_line: Color32::from_gray(210),
                accent: Color32::from_rgb(25, 118, 210),
                region_border: Color32::from_gray(120),
                background: Color32::from_gray(250),
            },
            ThemeMode::Dark => Self {
                available: Color32::from_gray(38),
                selected: Color32::from_rgb(21, 67, 110),
                hovered: Color32::from_rgb(30, 90, 150),
                sold_placeholder: Color32::from_gray(70),
                grid_line: Color32::from_gray(55),
                accent: Color32::from_rgb(100, 181, 246),
                region_border: Color32::from_gray(140),
                background: Color32::from_gray(20),
            },
        }
    }
}
