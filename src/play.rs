//! The `play` screen: guide, story, final and replay.

use crate::audio::{self, AudioHandle, AudioService};
use crate::breath::capture::BreathListener;
use crate::config::PlayConfig;
use crate::error::Result;
use crate::help::{render_help_overlay, PLAY_HELP};
use crate::narrative::{BeatEngine, Prompt, Script};
use crate::session::SessionCounter;
use crate::stage::{Scene, Stage, STORY_COLOR};
use crate::terminal::Terminal;
use crate::timeline::{Clock, Millis, SystemClock, TaskGroup};
use crate::waves::Directive;
use crossterm::event::{Event, KeyCode, KeyEventKind};
use std::time::Instant;

const GUIDE_MS: Millis = 4000;
const EXHALE_HINT_MS: Millis = 3000;
/// Waves only, on black, before the closing text
const FINAL_HOLD_MS: Millis = 3000;
const CLOSING_FIRST_MS: Millis = 4000;
const FRAME_MS: u64 = 33;

const GUIDE_TEXT: &str = "4초간 들이쉬고, 잠시 멈춘 뒤\n8초 동안 '입으로' 내쉬어 보세요";
const EXHALE_HINT_TEXT: &str = "날숨은 소리가 마이크 가까이\n잘 들리도록 크게 내쉬어주세요";
const CLOSING_FIRST_TEXT: &str = "오늘 당신은\n\n파도를 잠재웠습니다.";
const CLOSING_SECOND_TEXT: &str = "한 번 더 잠재우고 싶다면,\n언제든 다시 숨을 들이쉬고,\n내쉬어 주세요.";
const CLOSING_ACTIONS: &str = "r  한 번 더      q  마침";
const BLACK: &str = "#000000";

/// Intro reveal: one group per step
const INTRO_STEPS: [(Millis, u8); 4] = [(0, 1), (1400, 2), (2500, 3), (3400, 4)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Guide { since: Millis },
    Story,
    FinalHold { until: Millis },
    Closing { since: Millis },
}

/// One run of the experience, independent of the terminal
pub struct Playthrough {
    engine: BeatEngine,
    stage: Stage,
    intro: TaskGroup<Directive>,
    phase: Phase,
    session: SessionCounter,
    audio: AudioHandle,
    bgm: Option<String>,
    bgm_volume: f32,
    start_on_breath: bool,
}

impl Playthrough {
    pub fn new(script: Script, audio: AudioHandle, session: SessionCounter, config: &PlayConfig) -> Self {
        let stage = Stage::new(script.layers().clone());
        Self {
            engine: BeatEngine::new(script, audio.clone()),
            stage,
            intro: TaskGroup::new(),
            phase: Phase::Guide { since: 0 },
            session,
            audio,
            bgm: config.bgm.clone(),
            bgm_volume: config.bgm_volume,
            start_on_breath: config.start_on_breath,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn engine(&self) -> &BeatEngine {
        &self.engine
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn session_count(&self) -> u64 {
        self.session.count()
    }

    /// Start with the breathing guide, or go straight to the story
    pub fn begin(&mut self, now: Millis, guide: bool) {
        if !guide {
            self.begin_story(now);
            return;
        }
        log::info!("play: guide");
        self.phase = Phase::Guide { since: now };
        self.stage.set_scene(Scene::Intro);
        for (offset, group) in INTRO_STEPS {
            self.intro.schedule(
                now + offset,
                Directive::Show {
                    groups: vec![group],
                    reenter: vec![],
                },
            );
        }
    }

    fn begin_story(&mut self, now: Millis) {
        let n = self.session.increment();
        log::info!("play: story begins (session {})", n);
        self.intro.cancel_all();
        self.phase = Phase::Story;
        self.stage.set_scene(Scene::Story);
        self.stage.set_color(STORY_COLOR);
        if let Some(bgm) = &self.bgm {
            self.audio.play_loop(bgm, self.bgm_volume);
        }
        if !self.start_on_breath {
            self.engine.start(now, &mut self.stage);
        }
    }

    /// Fire everything due at `now` and move between phases
    pub fn tick(&mut self, now: Millis) {
        while let Some((due, directive)) = self.intro.pop_due(now) {
            self.stage.apply(&directive, due);
        }

        match self.phase {
            Phase::Guide { since } if now >= since + GUIDE_MS + EXHALE_HINT_MS => {
                self.begin_story(now);
            }
            Phase::FinalHold { until } if now >= until => {
                self.phase = Phase::Closing { since: now };
                self.stage.set_scene(Scene::Closing);
            }
            _ => {}
        }

        self.engine.advance(now, &mut self.stage);
        self.stage.advance(now);

        if self.stage.take_final() {
            log::info!("play: final");
            self.phase = Phase::FinalHold {
                until: now + FINAL_HOLD_MS,
            };
            self.stage.set_color(BLACK);
            self.stage.set_scene(Scene::FinalHold);
        }
    }

    /// A breath from the microphone or the space bar
    pub fn breath(&mut self, at: Millis) {
        match self.phase {
            Phase::Story => self.engine.on_breath(at, &mut self.stage),
            Phase::Closing { since } if at >= since + CLOSING_FIRST_MS => self.restart(at),
            _ => log::trace!("play: breath at {}ms ignored in {:?}", at, self.phase),
        }
    }

    pub fn next(&mut self, now: Millis) {
        if self.phase == Phase::Story {
            self.engine.next(now, &mut self.stage);
        }
    }

    pub fn prev(&mut self, now: Millis) {
        if self.phase == Phase::Story {
            self.engine.prev(now, &mut self.stage);
        }
    }

    /// Play again from the closing screen
    pub fn restart(&mut self, now: Millis) {
        if !matches!(self.phase, Phase::Closing { .. }) {
            return;
        }
        log::info!("play: again");
        self.engine.reset();
        self.stage.reset();
        self.audio.resume_loop();
        self.begin_story(now);
    }

    pub fn draw(&self, term: &mut Terminal, now: Millis, date: &str) {
        self.stage.draw_waves(term, now);

        match self.phase {
            Phase::Guide { since } => {
                let text = if now < since + GUIDE_MS {
                    GUIDE_TEXT
                } else {
                    EXHALE_HINT_TEXT
                };
                self.stage.draw_text(term, text, 0.45);
            }
            Phase::Story => {
                self.stage.draw_top_capsule(term, date, self.session.count());
                match self.engine.view() {
                    Some(view) => {
                        if let Some(line) = view.line {
                            self.stage.draw_text(term, line, 0.45);
                        }
                        let seconds = (view.show_seconds && view.countdown > 0).then_some(view.countdown);
                        self.stage.draw_prompt(term, view.prompt.label(), seconds);
                    }
                    // waiting for the first exhale
                    None => self.stage.draw_prompt(term, Prompt::Exhale.label(), None),
                }
            }
            Phase::FinalHold { .. } => {}
            Phase::Closing { since } => {
                self.stage.draw_top_capsule(term, date, self.session.count());
                if now < since + CLOSING_FIRST_MS {
                    self.stage.draw_text(term, CLOSING_FIRST_TEXT, 0.45);
                } else {
                    self.stage.draw_text(term, CLOSING_SECOND_TEXT, 0.45);
                    self.stage.draw_text(term, CLOSING_ACTIONS, 0.75);
                }
            }
        }
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y.%m.%d").to_string()
}

pub fn run(config: PlayConfig) -> Result<()> {
    let script = match &config.script {
        Some(path) => Script::load(path)?,
        None => Script::builtin()?,
    };
    let service = AudioService::new(audio::open_backend(config.audio), config.audio_dir.clone());
    log::info!("audio: {} backend, cues from {}", service.backend_name(), config.audio_dir.display());

    let clock = SystemClock::new();
    let (tx, rx) = crossbeam_channel::unbounded::<Instant>();
    let listener = if config.mic {
        BreathListener::start_or_silent(config.detector.clone(), false, move |event| {
            let _ = tx.send(event.at);
        })
    } else {
        None
    };
    if listener.is_none() {
        log::info!("play: no microphone, space bar breathes");
    }

    let mut term = Terminal::new(true)?;
    let mut play = Playthrough::new(script, service.acquire(), SessionCounter::load(), &config);
    let date = today();
    let mut show_help = false;

    play.begin(clock.now(), config.guide);

    'main: loop {
        // the first poll doubles as the frame delay
        let mut timeout = FRAME_MS;
        while let Some(event) = term.poll_event(timeout)? {
            timeout = 0;
            let now = clock.now();
            match event {
                Event::Key(key) if key.kind != KeyEventKind::Release => {
                    if show_help {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Esc => break 'main,
                            _ => show_help = false,
                        }
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break 'main,
                        KeyCode::Char('?') => show_help = true,
                        KeyCode::Right | KeyCode::Char('l') => play.next(now),
                        KeyCode::Left | KeyCode::Char('h') => play.prev(now),
                        KeyCode::Char(' ') => play.breath(now),
                        KeyCode::Char('r') => play.restart(now),
                        _ => {}
                    }
                }
                Event::FocusGained => {
                    log::debug!("play: focus regained, resuming loop");
                    play.audio.resume_loop();
                }
                Event::Resize(w, h) => {
                    term.resize(w, h);
                    term.clear_screen()?;
                }
                _ => {}
            }
        }

        for at in rx.try_iter() {
            play.breath(clock.millis_at(at));
        }

        let now = clock.now();
        play.tick(now);

        play.draw(&mut term, now, &date);
        if show_help {
            render_help_overlay(&mut term, PLAY_HELP);
        }
        term.present()?;
    }

    drop(listener);
    log::info!("play: quit after {} sessions", play.session_count());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingBackend;
    use crate::narrative::{Beat, Trigger};
    use crate::settings::Settings;
    use crate::waves::WaveLayers;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Rig {
        play: Playthrough,
        audio: Rc<RefCell<Vec<String>>>,
        _service: AudioService,
        _dir: tempfile::TempDir,
    }

    fn beat(id: &str, trigger: Trigger) -> Beat {
        Beat {
            id: id.to_string(),
            trigger,
            lines: vec![format!("{} line", id)],
            line_ms: Some(1000),
            interlude_ms: None,
            audio: None,
            bg_color: None,
            hidden: false,
        }
    }

    fn rig(start_on_breath: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::default();
        let audio = Rc::clone(&backend.calls);
        let service = AudioService::new(Box::new(backend), "/snd");
        let script = Script::new(
            vec![beat("1-1", Trigger::Inhale), beat("2-1", Trigger::Exhale)],
            WaveLayers::default(),
            Vec::new(),
        )
        .unwrap();
        let mut config = PlayConfig::from_settings(&Settings::default(), None);
        config.start_on_breath = start_on_breath;
        let session = SessionCounter::load_from(dir.path().join("state.toml"));
        Rig {
            play: Playthrough::new(script, service.acquire(), session, &config),
            audio,
            _service: service,
            _dir: dir,
        }
    }

    #[test]
    fn guide_reveals_layers_then_starts_story() {
        let mut r = rig(false);
        r.play.begin(0, true);
        r.play.tick(0);
        assert!(r.play.stage().field().is_visible("1-1"));
        assert!(!r.play.stage().field().is_visible("2-1"));

        r.play.tick(1400);
        assert!(r.play.stage().field().is_visible("2-1"));
        r.play.breath(2000);
        assert!(!r.play.engine().is_started());

        r.play.tick(6999);
        assert_eq!(r.play.phase(), Phase::Guide { since: 0 });
        assert_eq!(r.play.session_count(), 0);

        r.play.tick(7000);
        assert_eq!(r.play.phase(), Phase::Story);
        assert!(r.play.engine().is_started());
        assert_eq!(r.play.session_count(), 1);
        assert_eq!(r.play.stage().color(), (0xDB, 0xE7, 0xEA));
        assert_eq!(r.audio.borrow().clone(), vec!["loop /snd/bgm.mp3 0.6".to_string()]);
    }

    #[test]
    fn start_on_breath_waits_for_first_exhale() {
        let mut r = rig(true);
        r.play.begin(0, false);
        assert_eq!(r.play.phase(), Phase::Story);
        r.play.tick(60_000);
        assert!(!r.play.engine().is_started());

        r.play.breath(60_100);
        assert!(r.play.engine().is_started());
        assert_eq!(r.play.engine().index(), 0);
    }

    #[test]
    fn final_holds_then_closes_and_replays() {
        let mut r = rig(false);
        r.play.begin(0, false);
        r.play.tick(1000);
        assert_eq!(r.play.engine().index(), 1);
        r.play.breath(1500);
        r.play.tick(9500);
        assert_eq!(r.play.phase(), Phase::FinalHold { until: 12_500 });
        assert_eq!(r.play.stage().color(), (0, 0, 0));

        // no replay while the waves hold
        r.play.restart(10_000);
        assert_eq!(r.play.session_count(), 1);

        r.play.tick(12_500);
        assert_eq!(r.play.phase(), Phase::Closing { since: 12_500 });

        r.play.restart(13_000);
        assert_eq!(r.play.phase(), Phase::Story);
        assert_eq!(r.play.session_count(), 2);
        assert!(r.play.engine().is_started());
        assert!(!r.play.engine().is_finished());
        assert_eq!(r.play.engine().index(), 0);
        assert_eq!(r.play.stage().color(), (0xDB, 0xE7, 0xEA));
    }

    #[test]
    fn breath_between_frames_reaches_the_new_exhale_beat() {
        let mut r = rig(false);
        r.play.begin(0, false);
        r.play.tick(990);
        assert_eq!(r.play.engine().index(), 0);

        r.play.breath(1010);
        r.play.tick(1030);
        assert_eq!(r.play.engine().index(), 1);
        assert!(r.play.engine().is_locked());
        assert!(!r.play.engine().view().unwrap().awaiting_breath);

        r.play.tick(9010);
        assert_eq!(r.play.phase(), Phase::FinalHold { until: 12_010 });
    }

    #[test]
    fn breath_on_second_closing_page_replays() {
        let mut r = rig(false);
        r.play.begin(0, false);
        r.play.tick(1000);
        r.play.breath(1500);
        r.play.tick(9500);
        r.play.tick(12_500);

        r.play.breath(13_000);
        assert!(matches!(r.play.phase(), Phase::Closing { .. }));
        r.play.breath(16_500);
        assert_eq!(r.play.phase(), Phase::Story);
        assert_eq!(r.play.session_count(), 2);
    }

    #[test]
    fn navigation_only_during_story() {
        let mut r = rig(false);
        r.play.begin(0, true);
        r.play.next(100);
        assert!(!r.play.engine().is_started());
        r.play.tick(7000);
        r.play.next(7100);
        assert_eq!(r.play.engine().index(), 1);
        r.play.prev(7200);
        assert_eq!(r.play.engine().index(), 0);
    }
}
