//! Beat sequencing engine.
//!
//! Walks the script one beat at a time. Timed beats (`inhale`, `none`, `pause`)
//! advance on their own; `exhale` beats wait for a breath, then hold a response
//! window before moving on. All of a beat's deferred work lives in one
//! [`TaskGroup`] that every transition cancels, so a stale timer can never act
//! on a beat that is no longer current.
//!
//! The engine is driven from a single thread: the host calls
//! [`BeatEngine::advance`] with the current session time and forwards breath
//! events through [`BeatEngine::on_breath`].

use super::script::{Beat, Cue, Script, Trigger, MAX_LINES};
use crate::audio::AudioHandle;
use crate::timeline::{Millis, TaskGroup};
use crate::waves::Directive;

const TICK_MS: Millis = 1000;

/// Receiver of the engine's side effects
pub trait StageHost {
    fn background_changed(&mut self, color: &str);
    fn section_changed(&mut self, chapter: &str);
    fn directive(&mut self, directive: &Directive, at: Millis);
    fn final_reached(&mut self);
}

/// Prompt capsule label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Exhale,
    Inhale,
    Pause,
}

impl Prompt {
    pub fn label(&self) -> &'static str {
        match self {
            Prompt::Exhale => "숨을 불어넣기",
            Prompt::Inhale => "숨을 들이쉬기",
            Prompt::Pause => "멈춤",
        }
    }
}

#[derive(Debug, Clone)]
enum BeatTask {
    RevealLine(usize),
    CountdownTick,
    Advance,
    Directive(Directive),
}

/// What the host needs to draw the current beat
#[derive(Debug, Clone)]
pub struct BeatView<'a> {
    pub index: usize,
    pub count: usize,
    pub beat: &'a Beat,
    /// Line currently shown, if the beat has any
    pub line: Option<&'a str>,
    pub line_index: usize,
    pub prompt: Prompt,
    pub countdown: u32,
    pub show_seconds: bool,
    /// Exhale beat still waiting for its breath
    pub awaiting_breath: bool,
    pub pausing: bool,
    /// When the breath for this beat landed
    pub breath_at: Option<Millis>,
}

pub struct BeatEngine {
    script: Script,
    audio: AudioHandle,
    index: usize,
    line: usize,
    started: bool,
    finished: bool,
    /// Breath already consumed (or not accepted) for this beat
    locked: bool,
    unlocked_at: Option<Millis>,
    pausing: bool,
    countdown: u32,
    show_seconds: bool,
    breath_at: Option<Millis>,
    chapter: Option<String>,
    tasks: TaskGroup<BeatTask>,
}

impl BeatEngine {
    pub fn new(script: Script, audio: AudioHandle) -> Self {
        Self {
            script,
            audio,
            index: 0,
            line: 0,
            started: false,
            finished: false,
            locked: false,
            unlocked_at: None,
            pausing: false,
            countdown: 0,
            show_seconds: false,
            breath_at: None,
            chapter: None,
            tasks: TaskGroup::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Pending deferred work for the current beat
    #[cfg(test)]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn start(&mut self, now: Millis, host: &mut dyn StageHost) {
        log::info!("engine: start at {}ms ({} beats)", now, self.script.len());
        self.started = true;
        self.finished = false;
        self.chapter = None;
        self.transition_to(0, now, host);
    }

    /// Cancel everything and return to the unstarted state
    pub fn reset(&mut self) {
        self.tasks.cancel_all();
        self.index = 0;
        self.line = 0;
        self.started = false;
        self.finished = false;
        self.locked = false;
        self.unlocked_at = None;
        self.pausing = false;
        self.countdown = 0;
        self.show_seconds = false;
        self.breath_at = None;
        self.chapter = None;
    }

    /// Enter beat `index` at `at`
    pub fn transition_to(&mut self, index: usize, at: Millis, host: &mut dyn StageHost) {
        self.tasks.cancel_all();
        let beat = match self.script.get(index) {
            Some(b) => b.clone(),
            None => {
                log::warn!("engine: no beat at index {}, staying on {}", index, self.index);
                return;
            }
        };
        log::debug!("engine: beat {} '{}' ({:?}) at {}ms", index, beat.id, beat.trigger, at);

        self.index = index;
        self.line = 0;
        self.pausing = false;
        self.countdown = 0;
        self.breath_at = None;

        if let Some(chapter) = beat.chapter() {
            if self.chapter.as_deref() != Some(chapter) {
                self.chapter = Some(chapter.to_string());
                host.section_changed(chapter);
            }
        }
        if let Some(color) = &beat.bg_color {
            host.background_changed(color);
        }
        if beat.trigger != Trigger::Exhale {
            if let Some(cue) = &beat.audio {
                self.audio.play_once(cue);
            }
        }

        let line_ms = beat.line_ms();
        for k in 1..beat.lines.len().min(MAX_LINES) {
            self.tasks.schedule(at + line_ms * k as Millis, BeatTask::RevealLine(k));
        }

        for entry in self.script.directives_for(&beat.id) {
            match entry.on {
                Cue::Enter | Cue::Line(0) => host.directive(&entry.directive, at),
                Cue::AfterMs(ms) => self
                    .tasks
                    .schedule(at + ms, BeatTask::Directive(entry.directive.clone())),
                Cue::Line(_) | Cue::Breath => {}
            }
        }

        match beat.trigger {
            Trigger::Pause => {
                self.pausing = true;
                self.show_seconds = false;
                self.locked = false;
                self.unlocked_at = Some(at);
                self.tasks.schedule(at + beat.pause_hold_ms(), BeatTask::Advance);
            }
            Trigger::Inhale | Trigger::None => {
                self.locked = true;
                self.show_seconds = false;
                let total = beat.total_ms();
                if total > 0 {
                    self.start_countdown(total, at);
                }
                self.tasks.schedule(at + total, BeatTask::Advance);
            }
            Trigger::Exhale => {
                self.locked = false;
                self.show_seconds = true;
                self.unlocked_at = Some(at);
            }
        }
    }

    /// A breath captured at `at`
    pub fn on_breath(&mut self, at: Millis, host: &mut dyn StageHost) {
        if !self.started {
            log::info!("engine: first breath starts the story");
            self.start(at, host);
            return;
        }
        if self.finished {
            return;
        }
        // timers due by the breath's own time land first
        self.advance(at, host);
        if self.finished {
            return;
        }
        let beat = match self.script.get(self.index) {
            Some(b) => b.clone(),
            None => return,
        };
        if beat.trigger != Trigger::Exhale {
            log::trace!("engine: breath ignored on {} beat '{}'", beat.trigger.as_str(), beat.id);
            return;
        }
        if self.locked {
            log::debug!("engine: breath ignored, '{}' already answered", beat.id);
            return;
        }
        // a breath that is not strictly later than the unlock belongs to the previous beat
        if self.unlocked_at.is_some_and(|u| at <= u) {
            log::debug!("engine: breath at {}ms dropped at unlock boundary", at);
            return;
        }

        self.locked = true;
        self.breath_at = Some(at);
        log::info!("engine: breath accepted on '{}' at {}ms", beat.id, at);
        if let Some(cue) = &beat.audio {
            self.audio.play_once(cue);
        }
        self.emit(Cue::Breath, at, host);

        let window = beat.response_window_ms();
        self.start_countdown(window, at);
        self.tasks.schedule(at + window, BeatTask::Advance);
    }

    /// Manual skip forward, ignoring triggers
    pub fn next(&mut self, now: Millis, host: &mut dyn StageHost) {
        if self.finished {
            return;
        }
        if !self.started {
            self.start(now, host);
            return;
        }
        let n = (self.index + 1).min(self.script.last_index());
        self.transition_to(n, now, host);
    }

    /// Manual skip back, ignoring triggers
    pub fn prev(&mut self, now: Millis, host: &mut dyn StageHost) {
        if self.finished {
            return;
        }
        if !self.started {
            self.start(now, host);
            return;
        }
        let p = self.index.saturating_sub(1);
        self.transition_to(p, now, host);
    }

    /// Fire every task due at or before `now`, each at its own due time
    pub fn advance(&mut self, now: Millis, host: &mut dyn StageHost) {
        while let Some((due, task)) = self.tasks.pop_due(now) {
            match task {
                BeatTask::RevealLine(k) => {
                    self.line = k;
                    self.emit(Cue::Line(k), due, host);
                }
                BeatTask::CountdownTick => {
                    self.countdown = self.countdown.saturating_sub(1);
                    if self.countdown > 0 {
                        self.tasks.schedule(due + TICK_MS, BeatTask::CountdownTick);
                    }
                }
                BeatTask::Directive(d) => host.directive(&d, due),
                BeatTask::Advance => self.advance_beat(due, host),
            }
        }
    }

    pub fn view(&self) -> Option<BeatView<'_>> {
        if !self.started {
            return None;
        }
        let beat = self.script.get(self.index)?;
        let prompt = match beat.trigger {
            Trigger::Exhale => Prompt::Exhale,
            Trigger::Pause => Prompt::Pause,
            Trigger::Inhale | Trigger::None => Prompt::Inhale,
        };
        Some(BeatView {
            index: self.index,
            count: self.script.len(),
            beat,
            line: beat.lines.get(self.line).map(String::as_str),
            line_index: self.line,
            prompt,
            countdown: self.countdown,
            show_seconds: self.show_seconds,
            awaiting_breath: beat.trigger == Trigger::Exhale && !self.locked,
            pausing: self.pausing,
            breath_at: self.breath_at,
        })
    }

    fn start_countdown(&mut self, duration: Millis, at: Millis) {
        self.countdown = duration.div_ceil(TICK_MS) as u32;
        self.tasks.schedule(at + TICK_MS, BeatTask::CountdownTick);
    }

    fn advance_beat(&mut self, at: Millis, host: &mut dyn StageHost) {
        self.pausing = false;
        if self.index >= self.script.last_index() {
            self.finish(host);
        } else {
            self.transition_to(self.index + 1, at, host);
        }
    }

    fn finish(&mut self, host: &mut dyn StageHost) {
        self.tasks.cancel_all();
        if self.finished {
            return;
        }
        self.finished = true;
        self.countdown = 0;
        log::info!("engine: final beat done");
        host.final_reached();
    }

    fn emit(&self, cue: Cue, at: Millis, host: &mut dyn StageHost) {
        let Some(beat) = self.script.get(self.index) else {
            return;
        };
        for entry in self.script.directives_for(&beat.id) {
            if entry.on == cue {
                host.directive(&entry.directive, at);
            }
        }
    }
}
