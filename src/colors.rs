use crate::waves::Group;
use crossterm::style::Color;

/// Stage color before any beat sets one
pub const STAGE_DEFAULT: (u8, u8, u8) = (0, 0, 0);

/// Parse `#RRGGBB` or `#RGB` (leading `#` optional)
pub fn parse_hex(s: &str) -> Option<(u8, u8, u8)> {
    let hex = s.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Linear mix from `a` (t = 0) to `b` (t = 1)
pub fn blend(a: (u8, u8, u8), b: (u8, u8, u8), t: f32) -> (u8, u8, u8) {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * t).round() as u8;
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Perceived brightness above the midpoint
pub fn is_light(c: (u8, u8, u8)) -> bool {
    let luma = 0.299 * c.0 as f32 + 0.587 * c.1 as f32 + 0.114 * c.2 as f32;
    luma > 140.0
}

pub fn to_color(c: (u8, u8, u8)) -> Color {
    Color::Rgb { r: c.0, g: c.1, b: c.2 }
}

/// Palette derived from the stage color
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StagePalette {
    pub stage: (u8, u8, u8),
    /// Dark stages are dimmed toward black
    pub dim: f32,
}

impl StagePalette {
    pub fn new(stage: (u8, u8, u8), dim: f32) -> Self {
        Self { stage, dim }
    }

    pub fn background(&self) -> Color {
        to_color(self.stage)
    }

    /// Text color readable on this stage
    pub fn text(&self) -> Color {
        if is_light(self.stage) {
            Color::Rgb { r: 0x1E, g: 0x2A, b: 0x33 }
        } else {
            Color::Rgb { r: 0xF2, g: 0xF5, b: 0xF7 }
        }
    }

    pub fn muted(&self) -> Color {
        to_color(blend(self.stage, self.text_rgb(), 0.55))
    }

    /// Wave line color; front groups are strongest
    pub fn wave(&self, group: Group) -> Color {
        const SEA: (u8, u8, u8) = (0x4A, 0x7F, 0x9C);
        const FOAM: (u8, u8, u8) = (0xC9, 0xDD, 0xE6);
        let depth = match group {
            1 => 0.0,
            2 => 0.25,
            3 => 0.45,
            _ => 0.6,
        };
        let base = if is_light(self.stage) {
            blend(SEA, (0x1E, 0x3A, 0x4C), 0.3)
        } else {
            blend(FOAM, SEA, 0.4)
        };
        let faded = blend(base, self.stage, depth);
        to_color(blend(faded, (0, 0, 0), self.dim))
    }

    fn text_rgb(&self) -> (u8, u8, u8) {
        match self.text() {
            Color::Rgb { r, g, b } => (r, g, b),
            _ => (0xFF, 0xFF, 0xFF),
        }
    }
}
