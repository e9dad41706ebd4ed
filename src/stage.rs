//! Terminal render surface for the story.
//!
//! [`Stage`] is the engine's [`StageHost`]: it owns the wave field, the stage
//! color and the amplitude multiplier, and draws them together with the text
//! lines and the two capsules.

use crate::colors::{self, StagePalette, STAGE_DEFAULT};
use crate::narrative::StageHost;
use crate::terminal::{text_width, Terminal};
use crate::timeline::Millis;
use crate::waves::{Directive, Group, WaveField, WaveLayers};
use crossterm::style::Color;
use std::f64::consts::TAU;

/// Stage color when the story begins
pub const STORY_COLOR: &str = "#DBE7EA";
/// Chapter whose waves swell
const SWELL_CHAPTER: &str = "8";
const SWELL_SCALE: f64 = 2.2;

const WAVE_CHARS: [char; 6] = ['_', '.', '-', '~', '^', '"'];

/// Which part of the experience is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    /// Breathing guide while the layers first roll in
    Intro,
    Story,
    /// Black stage, waves only
    FinalHold,
    Closing,
}

/// Direction a wave slides in from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Below,
}

fn enter_side(id: &str) -> Side {
    match id {
        "1-3" | "1-4" | "1-5" | "2-2" | "2-4" | "3-3" | "4-3" => Side::Left,
        "1-1" | "1-2" | "2-1" | "3-1" | "3-2" | "4-1" | "4-4" | "4-5" => Side::Right,
        _ => Side::Below,
    }
}

fn suffix(id: &str) -> u32 {
    id.split('-')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Geometry and motion of one wave line
#[derive(Debug, Clone, PartialEq)]
struct WaveShape {
    /// Resting row as a fraction of the screen height
    row: f64,
    /// Swing in rows
    amp: f64,
    freq: f64,
    period_ms: f64,
    phase: f64,
    enter_delay_ms: f64,
    enter_ms: f64,
    side: Side,
}

impl WaveShape {
    fn new(group: Group, id: &str, intro: bool, amp_scale: f64) -> Self {
        let g = group as u32;
        let suf = suffix(id);

        let seed1 = (g * 997 + suf * 433) % 3000;
        let seed2 = (g * 593 + suf * 271) % 2000;

        let (ax, ay) = if id == "2-2" {
            (0.5, 1.0)
        } else if group == 1 {
            if intro {
                (1.0, 2.0)
            } else {
                (4.0, 5.0)
            }
        } else {
            let seed_x = ((g * 101 + suf * 13) % 5) as f64;
            let seed_y = ((g * 103 + suf * 17) % 5) as f64;
            let (bx, by) = match group {
                3 => (10.0 + seed_x, 8.0 + seed_y),
                4 => (12.0 + seed_x, 10.0 + seed_y),
                _ => (6.0 + seed_x, 4.0 + seed_y),
            };
            (bx * amp_scale, by * amp_scale)
        };

        let mut enter_delay = if intro {
            let max = match group {
                1 => 520,
                2 => 580,
                3 => 620,
                _ => 680,
            };
            ((g * 1337 + suf * 97) % max) as f64
        } else {
            let base = match group {
                1 => 0,
                2 => 40,
                3 => 60,
                _ => 80,
            };
            (base + (g * 31 + suf * 47) % 160) as f64
        };
        let mut enter_ms = if intro {
            let base = match group {
                1 => 1050,
                2 => 1250,
                3 => 1450,
                _ => 1650,
            };
            (base + (g * 1337 + suf * 97) % 650) as f64
        } else {
            let base = match group {
                1 => 1700,
                2 => 1900,
                3 => 2100,
                _ => 2300,
            };
            (base + (g * 37 + suf * 19) % 500) as f64
        };
        // 4-5 always lands last
        if id == "4-5" {
            enter_delay += if intro { 1100.0 } else { 900.0 };
            enter_ms += 900.0;
        }

        let row = match group {
            1 => 0.70,
            2 => 0.56,
            3 => 0.44,
            _ => 0.30,
        } + suf as f64 * 0.03;

        Self {
            row,
            amp: ay / 4.0,
            freq: 0.04 + ax * 0.004 + suf as f64 * 0.003,
            period_ms: 5000.0 + seed1 as f64,
            phase: seed2 as f64 / 2000.0 * TAU,
            enter_delay_ms: enter_delay,
            enter_ms,
            side: enter_side(id),
        }
    }

    /// Eased entrance progress `elapsed` ms after the wave became visible
    fn entrance(&self, elapsed: Millis) -> f64 {
        let p = ((elapsed as f64 - self.enter_delay_ms) / self.enter_ms).clamp(0.0, 1.0);
        1.0 - (1.0 - p).powi(3)
    }

    fn draw(&self, term: &mut Terminal, now: Millis, since: Millis, color: Color, bold: bool) {
        let eased = self.entrance(now.saturating_sub(since));
        if eased <= 0.0 {
            return;
        }
        let (w, h) = term.size();
        let wf = w as f64;
        let hf = h as f64;

        let mut base = hf * self.row;
        if self.side == Side::Below {
            base += (1.0 - eased) * hf * 0.5;
        }
        let (lo, hi) = match self.side {
            Side::Left => (0.0, wf * eased),
            Side::Right => (wf * (1.0 - eased), wf),
            Side::Below => (0.0, wf),
        };

        let time = now as f64 / self.period_ms * TAU;
        for x in 0..w {
            let fx = x as f64;
            if fx < lo || fx >= hi {
                continue;
            }
            let y = base + self.amp * (fx * self.freq + time + self.phase).sin();
            let idx = ((fx * 0.3 + time * 2.0).sin().abs() * (WAVE_CHARS.len() - 1) as f64) as usize;
            let ch = WAVE_CHARS[idx.min(WAVE_CHARS.len() - 1)];
            term.set(x as i32, y.round() as i32, ch, Some(color), bold);
        }
    }
}

/// Render state driven by the beat engine
pub struct Stage {
    field: WaveField,
    color: (u8, u8, u8),
    amp_scale: f64,
    scene: Scene,
    final_signal: bool,
}

impl Stage {
    pub fn new(layers: WaveLayers) -> Self {
        Self {
            field: WaveField::new(layers),
            color: STAGE_DEFAULT,
            amp_scale: 1.0,
            scene: Scene::Intro,
            final_signal: false,
        }
    }

    pub fn field(&self) -> &WaveField {
        &self.field
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    pub fn set_scene(&mut self, scene: Scene) {
        log::debug!("stage: {:?} -> {:?}", self.scene, scene);
        self.scene = scene;
    }

    pub fn amp_scale(&self) -> f64 {
        self.amp_scale
    }

    pub fn color(&self) -> (u8, u8, u8) {
        self.color
    }

    pub fn set_color(&mut self, hex: &str) {
        match colors::parse_hex(hex) {
            Some(rgb) => self.color = rgb,
            None => log::warn!("stage: ignoring bad color {:?}", hex),
        }
    }

    /// Apply a directive outside the engine (intro reveal)
    pub fn apply(&mut self, directive: &Directive, now: Millis) {
        self.field.apply(directive, now);
    }

    /// True once after the engine reports the end of the story
    pub fn take_final(&mut self) -> bool {
        std::mem::take(&mut self.final_signal)
    }

    pub fn advance(&mut self, now: Millis) {
        self.field.advance(now);
    }

    /// Back to a black, empty stage
    pub fn reset(&mut self) {
        self.field.clear();
        self.color = STAGE_DEFAULT;
        self.amp_scale = 1.0;
        self.scene = Scene::Intro;
        self.final_signal = false;
    }

    pub fn palette(&self) -> StagePalette {
        let dark = !colors::is_light(self.color);
        let dim = match self.scene {
            Scene::Intro => 0.0,
            Scene::Closing if dark => 0.45,
            _ if dark => 0.35,
            _ => 0.0,
        };
        StagePalette::new(self.color, dim)
    }

    /// Background and every visible wave
    pub fn draw_waves(&self, term: &mut Terminal, now: Millis) {
        let palette = self.palette();
        term.set_background(Some(palette.background()));
        term.clear();

        let intro = self.scene == Scene::Intro;
        let mut visible: Vec<(Group, &str, Millis)> = self
            .field
            .layers()
            .all_members()
            .filter_map(|(g, id)| self.field.visible_since(id).map(|since| (g, id, since)))
            .collect();
        // deepest group first so group 1 ends on top; x-1 above x-2 within a group
        visible.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        for (group, id, since) in visible {
            let shape = WaveShape::new(group, id, intro, self.amp_scale);
            shape.draw(term, now, since, palette.wave(group), group == 1);
        }
    }

    /// Centered message block; `\n` splits rows
    pub fn draw_text(&self, term: &mut Terminal, text: &str, row_frac: f64) {
        let palette = self.palette();
        let (_, h) = term.size();
        let rows: Vec<&str> = text.lines().collect();
        let top = (h as f64 * row_frac) as i32 - rows.len() as i32 / 2;
        for (i, row) in rows.iter().enumerate() {
            term.set_str_centered(top + i as i32, row, Some(palette.text()), true);
        }
    }

    /// Prompt capsule near the bottom; `seconds` shows as "N초"
    pub fn draw_prompt(&self, term: &mut Terminal, label: &str, seconds: Option<u32>) {
        let (_, h) = term.size();
        let second_row = seconds.map(|s| format!("{}초", s));
        self.draw_capsule(term, h as i32 - 6, label, second_row.as_deref());
    }

    /// Date and session count at the top
    pub fn draw_top_capsule(&self, term: &mut Terminal, date: &str, session: u64) {
        let sub = format!("{}번째 호흡", session);
        self.draw_capsule(term, 1, date, Some(&sub));
    }

    fn draw_capsule(&self, term: &mut Terminal, y: i32, main: &str, sub: Option<&str>) {
        let palette = self.palette();
        let (w, _) = term.size();
        let inner = text_width(main).max(sub.map(text_width).unwrap_or(0)) + 4;
        let x0 = (w as i32 - inner as i32 - 2) / 2;
        let rows = if sub.is_some() { 2 } else { 1 };
        let border = palette.muted();

        term.set(x0, y, '╭', Some(border), false);
        term.set(x0 + inner as i32 + 1, y, '╮', Some(border), false);
        term.set(x0, y + rows + 1, '╰', Some(border), false);
        term.set(x0 + inner as i32 + 1, y + rows + 1, '╯', Some(border), false);
        for dx in 1..=inner as i32 {
            term.set(x0 + dx, y, '─', Some(border), false);
            term.set(x0 + dx, y + rows + 1, '─', Some(border), false);
        }
        for dy in 1..=rows {
            term.set(x0, y + dy, '│', Some(border), false);
            term.set(x0 + inner as i32 + 1, y + dy, '│', Some(border), false);
            for dx in 1..=inner as i32 {
                term.set(x0 + dx, y + dy, ' ', None, false);
            }
        }
        term.set_str_centered(y + 1, main, Some(palette.text()), true);
        if let Some(sub) = sub {
            term.set_str_centered(y + 2, sub, Some(palette.muted()), false);
        }
    }
}

impl StageHost for Stage {
    fn background_changed(&mut self, color: &str) {
        self.set_color(color);
    }

    fn section_changed(&mut self, chapter: &str) {
        self.amp_scale = if chapter == SWELL_CHAPTER { SWELL_SCALE } else { 1.0 };
        log::debug!("stage: chapter {} amp x{}", chapter, self.amp_scale);
    }

    fn directive(&mut self, directive: &Directive, at: Millis) {
        self.field.apply(directive, at);
    }

    fn final_reached(&mut self) {
        self.final_signal = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_eight_swells_waves() {
        let mut stage = Stage::new(WaveLayers::default());
        stage.section_changed("7");
        assert_eq!(stage.amp_scale(), 1.0);
        stage.section_changed("8");
        assert_eq!(stage.amp_scale(), SWELL_SCALE);
        stage.section_changed("9");
        assert_eq!(stage.amp_scale(), 1.0);
    }

    #[test]
    fn bad_color_keeps_previous() {
        let mut stage = Stage::new(WaveLayers::default());
        stage.background_changed(STORY_COLOR);
        assert_eq!(stage.color(), (0xDB, 0xE7, 0xEA));
        stage.background_changed("blue-ish");
        assert_eq!(stage.color(), (0xDB, 0xE7, 0xEA));
    }

    #[test]
    fn directives_reach_the_field() {
        let mut stage = Stage::new(WaveLayers::default());
        stage.directive(
            &Directive::Show {
                groups: vec![1],
                reenter: vec![],
            },
            500,
        );
        assert!(stage.field().is_visible("1-3"));
        assert_eq!(stage.field().visible_since("1-3"), Some(500));
        assert!(!stage.field().is_visible("2-1"));
    }

    #[test]
    fn final_signal_is_taken_once() {
        let mut stage = Stage::new(WaveLayers::default());
        assert!(!stage.take_final());
        stage.final_reached();
        assert!(stage.take_final());
        assert!(!stage.take_final());
    }

    #[test]
    fn reset_returns_to_black_intro() {
        let mut stage = Stage::new(WaveLayers::default());
        stage.background_changed(STORY_COLOR);
        stage.section_changed("8");
        stage.set_scene(Scene::Closing);
        stage.apply(&Directive::Set { groups: vec![1, 2] }, 0);
        stage.reset();
        assert_eq!(stage.color(), STAGE_DEFAULT);
        assert_eq!(stage.amp_scale(), 1.0);
        assert_eq!(stage.scene(), Scene::Intro);
        assert_eq!(stage.field().visible_len(), 0);
    }

    #[test]
    fn dark_story_stage_is_dimmed() {
        let mut stage = Stage::new(WaveLayers::default());
        assert_eq!(stage.palette().dim, 0.0);
        stage.set_scene(Scene::Story);
        assert!(stage.palette().dim > 0.0);
        stage.set_color(STORY_COLOR);
        assert_eq!(stage.palette().dim, 0.0);
    }

    #[test]
    fn last_wave_enters_late_and_slow() {
        let w44 = WaveShape::new(4, "4-4", false, 1.0);
        let w45 = WaveShape::new(4, "4-5", false, 1.0);
        assert!(w45.enter_delay_ms > w44.enter_delay_ms + 800.0);
        assert!(w45.enter_ms > w44.enter_ms);
        assert_eq!(w45.side, Side::Right);
        assert_eq!(WaveShape::new(2, "2-3", false, 1.0).side, Side::Below);
    }

    #[test]
    fn entrance_eases_from_zero_to_one() {
        let shape = WaveShape::new(1, "1-1", false, 1.0);
        assert_eq!(shape.enter_delay_ms, 78.0);
        assert_eq!(shape.entrance(0), 0.0);
        let mid = shape.entrance(1000);
        assert!(mid > 0.0 && mid < 1.0);
        assert_eq!(shape.entrance(60_000), 1.0);
    }

    #[test]
    fn swell_scales_deep_layers_only() {
        let calm = WaveShape::new(3, "3-1", false, 1.0);
        let swell = WaveShape::new(3, "3-1", false, SWELL_SCALE);
        assert!((swell.amp - calm.amp * SWELL_SCALE).abs() < 1e-9);

        let front = WaveShape::new(1, "1-1", false, SWELL_SCALE);
        assert_eq!(front.amp, 5.0 / 4.0);
    }
}
