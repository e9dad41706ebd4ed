//! Narrative script: beats, wave layers and the beat-to-directive table.

use crate::error::{Error, Result};
use crate::timeline::Millis;
use crate::waves::{Directive, LayerEntry, WaveLayers};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Line duration when a beat gives none (or zero)
pub const DEFAULT_LINE_MS: Millis = 3000;
/// A beat shows at most this many lines
pub const MAX_LINES: usize = 2;
/// Minimum hold of a `pause` beat
pub const PAUSE_MIN_MS: Millis = 7000;
/// Minimum response window after a breath on an `exhale` beat
pub const RESPONSE_MIN_MS: Millis = 8000;

const BUILTIN: &str = include_str!("../../assets/narrative.toml");

/// What moves a beat forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Inhale,
    Exhale,
    Pause,
    None,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Inhale => "inhale",
            Trigger::Exhale => "exhale",
            Trigger::Pause => "pause",
            Trigger::None => "none",
        }
    }
}

/// One script entry
#[derive(Debug, Clone, Deserialize)]
pub struct Beat {
    pub id: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub line_ms: Option<Millis>,
    #[serde(default)]
    pub interlude_ms: Option<Millis>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl Beat {
    /// How long each line stays before the next one
    pub fn line_ms(&self) -> Millis {
        match self.line_ms {
            Some(ms) if ms > 0 => ms,
            _ => DEFAULT_LINE_MS,
        }
    }

    /// Lines plus interlude: the auto-advance delay for timed beats
    pub fn total_ms(&self) -> Millis {
        self.lines.len() as Millis * self.line_ms() + self.interlude_ms.unwrap_or(0)
    }

    /// How long a `pause` beat holds before moving on
    pub fn pause_hold_ms(&self) -> Millis {
        self.interlude_ms.unwrap_or(PAUSE_MIN_MS).max(PAUSE_MIN_MS)
    }

    /// Wait between an accepted breath and the next beat
    pub fn response_window_ms(&self) -> Millis {
        self.interlude_ms.unwrap_or(RESPONSE_MIN_MS).max(RESPONSE_MIN_MS)
    }

    /// Leading digits of the id (`"2-1"` is chapter `"2"`, `"i-3"` has none)
    pub fn chapter(&self) -> Option<&str> {
        let end = self
            .id
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(self.id.len(), |(i, _)| i);
        if end == 0 {
            None
        } else {
            Some(&self.id[..end])
        }
    }
}

/// When a table directive fires within its beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// On beat entry
    Enter,
    /// When line `n` (0-based) is revealed
    Line(usize),
    /// When the beat's breath lands
    Breath,
    /// This long after beat entry
    AfterMs(Millis),
}

/// Beat id to directive mapping row
#[derive(Debug, Clone, Deserialize)]
pub struct DirectiveEntry {
    pub beat: String,
    pub on: Cue,
    pub directive: Directive,
}

#[derive(Deserialize)]
struct ScriptFile {
    #[serde(default)]
    beats: Vec<Beat>,
    #[serde(default)]
    layers: Vec<LayerEntry>,
    #[serde(default)]
    directives: Vec<DirectiveEntry>,
}

/// Loaded script with hidden beats removed
#[derive(Debug, Clone)]
pub struct Script {
    beats: Vec<Beat>,
    layers: WaveLayers,
    directives: Vec<DirectiveEntry>,
    warnings: Vec<String>,
}

impl Script {
    /// The story shipped with the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Script(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: ScriptFile =
            toml::from_str(text).map_err(|e| Error::Script(e.to_string()))?;
        let layers = if file.layers.is_empty() {
            WaveLayers::default()
        } else {
            WaveLayers::from_entries(&file.layers)
        };
        Self::new(file.beats, layers, file.directives)
    }

    /// Filter hidden beats and validate what remains
    pub fn new(beats: Vec<Beat>, layers: WaveLayers, directives: Vec<DirectiveEntry>) -> Result<Self> {
        let beats: Vec<Beat> = beats.into_iter().filter(|b| !b.hidden).collect();
        if beats.is_empty() {
            return Err(Error::Script("script has no active beats".to_string()));
        }

        let mut script = Self {
            beats,
            layers,
            directives,
            warnings: Vec::new(),
        };
        script.warnings = script.validate();
        for w in &script.warnings {
            log::warn!("script: {}", w);
        }
        Ok(script)
    }

    fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        for beat in &self.beats {
            if !seen.insert(beat.id.as_str()) {
                warnings.push(format!("duplicate beat id '{}'", beat.id));
            }
            if beat.lines.len() > MAX_LINES {
                warnings.push(format!(
                    "beat '{}' has {} lines, only {} are shown",
                    beat.id,
                    beat.lines.len(),
                    MAX_LINES
                ));
            }
        }

        for entry in &self.directives {
            let beat = match self.beats.iter().find(|b| b.id == entry.beat) {
                Some(b) => b,
                None => {
                    warnings.push(format!("directive for unknown beat '{}'", entry.beat));
                    continue;
                }
            };
            if let Cue::Line(n) = entry.on {
                if n >= beat.lines.len().min(MAX_LINES) {
                    warnings.push(format!("beat '{}' has no line {}", beat.id, n));
                }
            }
            for g in entry.directive.groups() {
                if !self.layers.contains_group(g) {
                    warnings.push(format!("beat '{}' directive uses unknown group {}", beat.id, g));
                }
            }
        }
        warnings
    }

    /// Active beats in playback order
    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Beat> {
        self.beats.get(index)
    }

    pub fn last_index(&self) -> usize {
        self.beats.len().saturating_sub(1)
    }

    pub fn layers(&self) -> &WaveLayers {
        &self.layers
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn directives_len(&self) -> usize {
        self.directives.len()
    }

    /// Table rows for a beat, in file order
    pub fn directives_for<'a>(&'a self, beat_id: &'a str) -> impl Iterator<Item = &'a DirectiveEntry> + 'a {
        self.directives.iter().filter(move |d| d.beat == beat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(id: &str, trigger: Trigger) -> Beat {
        Beat {
            id: id.to_string(),
            trigger,
            lines: Vec::new(),
            line_ms: None,
            interlude_ms: None,
            audio: None,
            bg_color: None,
            hidden: false,
        }
    }

    #[test]
    fn builtin_script_loads_clean() {
        let script = Script::builtin().unwrap();
        assert!(script.len() > 20);
        assert!(script.warnings().is_empty(), "{:?}", script.warnings());
        assert_eq!(script.get(0).map(|b| b.id.as_str()), Some("1-1"));
        assert!(script.beats().iter().all(|b| !b.hidden));
        assert!(script.beats().iter().any(|b| b.trigger == Trigger::Exhale));
    }

    #[test]
    fn hidden_beats_are_filtered() {
        let mut hidden = beat("final-1", Trigger::None);
        hidden.hidden = true;
        let script = Script::new(
            vec![beat("1-1", Trigger::Inhale), hidden, beat("1-2", Trigger::Inhale)],
            WaveLayers::default(),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.last_index(), 1);
        assert_eq!(script.get(1).map(|b| b.id.as_str()), Some("1-2"));
    }

    #[test]
    fn empty_active_sequence_is_an_error() {
        let mut hidden = beat("x", Trigger::None);
        hidden.hidden = true;
        assert!(Script::new(vec![hidden], WaveLayers::default(), Vec::new()).is_err());
    }

    #[test]
    fn line_ms_falls_back_and_total_adds_interlude() {
        let mut b = beat("2-1", Trigger::Exhale);
        b.lines = vec!["a".into(), "b".into()];
        assert_eq!(b.line_ms(), DEFAULT_LINE_MS);
        b.line_ms = Some(0);
        assert_eq!(b.line_ms(), DEFAULT_LINE_MS);
        b.line_ms = Some(2000);
        b.interlude_ms = Some(500);
        assert_eq!(b.total_ms(), 4500);

        let interlude = Beat {
            line_ms: Some(0),
            interlude_ms: Some(3000),
            ..beat("i-1", Trigger::None)
        };
        assert_eq!(interlude.total_ms(), 3000);
    }

    #[test]
    fn holds_never_drop_below_their_floor() {
        let mut b = beat("i-6", Trigger::Pause);
        assert_eq!(b.pause_hold_ms(), PAUSE_MIN_MS);
        assert_eq!(b.response_window_ms(), RESPONSE_MIN_MS);
        b.interlude_ms = Some(3000);
        assert_eq!(b.pause_hold_ms(), 7000);
        assert_eq!(b.response_window_ms(), 8000);
        b.interlude_ms = Some(10_000);
        assert_eq!(b.pause_hold_ms(), 10_000);
        assert_eq!(b.response_window_ms(), 10_000);
    }

    #[test]
    fn chapter_prefix() {
        assert_eq!(beat("2-1", Trigger::Exhale).chapter(), Some("2"));
        assert_eq!(beat("12-3", Trigger::Exhale).chapter(), Some("12"));
        assert_eq!(beat("i-4", Trigger::None).chapter(), None);
        assert_eq!(beat("final", Trigger::None).chapter(), None);
    }

    #[test]
    fn parses_cues_and_reports_bad_rows() {
        let script = Script::from_toml(
            r##"
            [[beats]]
            id = "2-1"
            trigger = "exhale"
            lines = ["one", "two"]
            audio = "exhale1.mp3"
            bg_color = "#000000"

            [[beats]]
            id = "2-1"
            trigger = "inhale"

            [[directives]]
            beat = "2-1"
            on = { line = 1 }
            directive = { type = "show", groups = [1, 2], reenter = [2] }

            [[directives]]
            beat = "2-1"
            on = { after_ms = 4000 }
            directive = { type = "flash_hide", groups = [3] }

            [[directives]]
            beat = "2-1"
            on = "breath"
            directive = { type = "set", groups = [9] }

            [[directives]]
            beat = "nope"
            on = "enter"
            directive = { type = "set", groups = [1] }
            "##,
        )
        .unwrap();

        let rows: Vec<_> = script.directives_for("2-1").collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].on, Cue::Line(1));
        assert_eq!(rows[1].on, Cue::AfterMs(4000));
        assert_eq!(rows[2].on, Cue::Breath);

        let warnings = script.warnings().join("\n");
        assert!(warnings.contains("duplicate beat id '2-1'"));
        assert!(warnings.contains("unknown group 9"));
        assert!(warnings.contains("unknown beat 'nope'"));
        assert_eq!(script.get(0).and_then(|b| b.audio.as_deref()), Some("exhale1.mp3"));
    }

    #[test]
    fn malformed_file_is_a_script_error() {
        match Script::from_toml("[[beats]]\nid = 3") {
            Err(Error::Script(_)) => {}
            other => panic!("expected script error, got {:?}", other.map(|s| s.len())),
        }
    }
}
