use crate::breath::{DetectorConfig, Platform};
use crate::settings::Settings;
use std::path::PathBuf;

/// Default background loop file
pub const DEFAULT_BGM: &str = "bgm.mp3";
pub const DEFAULT_BGM_VOLUME: f32 = 0.6;

/// Configuration for the full experience
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub detector: DetectorConfig,
    pub mic: bool,
    pub audio: bool,
    pub audio_dir: PathBuf,
    pub bgm: Option<String>,
    pub bgm_volume: f32,
    pub start_on_breath: bool,
    pub guide: bool,
    pub script: Option<PathBuf>,
}

impl PlayConfig {
    /// Settings file values; CLI flags are applied on top by the caller
    pub fn from_settings(settings: &Settings, platform: Option<Platform>) -> Self {
        let bgm = match settings.audio.bgm.as_deref() {
            Some("") => None,
            Some(name) => Some(name.to_string()),
            None => Some(DEFAULT_BGM.to_string()),
        };
        Self {
            detector: settings.detector.resolve(platform),
            mic: true,
            audio: settings.audio.enabled.unwrap_or(true),
            audio_dir: settings
                .audio
                .dir
                .clone()
                .unwrap_or_else(Settings::default_audio_dir),
            bgm,
            bgm_volume: settings
                .audio
                .bgm_volume
                .unwrap_or(DEFAULT_BGM_VOLUME)
                .clamp(0.0, 1.0),
            start_on_breath: settings.play.start_on_breath,
            guide: settings.play.guide.unwrap_or(true),
            script: settings.play.script.clone(),
        }
    }
}

/// Configuration for the microphone test screen
#[derive(Clone, Debug)]
pub struct DetectConfig {
    pub detector: DetectorConfig,
}

impl DetectConfig {
    pub fn from_settings(
        settings: &Settings,
        platform: Option<Platform>,
        threshold_delta: Option<f32>,
        cooldown_ms: Option<u64>,
    ) -> Self {
        let mut detector = settings.detector.resolve(platform);
        if let Some(v) = threshold_delta {
            detector.threshold_delta = v;
        }
        if let Some(v) = cooldown_ms {
            detector.cooldown_ms = v;
        }
        Self { detector }
    }
}
