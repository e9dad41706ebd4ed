use crate::breath::{DetectorConfig, Platform, MAX_FRAME_SIZE};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub play: PlaySettings,
}

/// Overrides on top of the platform profile
#[derive(Debug, Default, Deserialize)]
pub struct DetectorSettings {
    pub platform: Option<Platform>,
    pub threshold_delta: Option<f32>,
    pub abs_min_rms: Option<f32>,
    pub hold_frames: Option<u32>,
    pub cooldown_ms: Option<u64>,
    pub arm_after_ms: Option<u64>,
    pub frame_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioSettings {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,     // Where cue files live (default: <data dir>/manpa/audio)
    pub bgm: Option<String>,      // Background loop file name
    pub bgm_volume: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaySettings {
    #[serde(default)]
    pub start_on_breath: bool,
    pub guide: Option<bool>,
    pub script: Option<PathBuf>,
}

impl DetectorSettings {
    /// Profile for `platform` (CLI wins over the file) with file overrides applied
    pub fn resolve(&self, platform: Option<Platform>) -> DetectorConfig {
        let platform = platform.or(self.platform).unwrap_or_default();
        let mut config = DetectorConfig::for_platform(platform);
        if let Some(v) = self.threshold_delta {
            config.threshold_delta = v;
        }
        if let Some(v) = self.abs_min_rms {
            config.abs_min_rms = v;
        }
        if let Some(v) = self.hold_frames {
            config.hold_frames = v.max(1);
        }
        if let Some(v) = self.cooldown_ms {
            config.cooldown_ms = v;
        }
        if let Some(v) = self.arm_after_ms {
            config.arm_after_ms = v;
        }
        if let Some(v) = self.frame_size {
            config.frame_size = v;
        }
        config
    }
}

impl Settings {
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.frame_size.is_some_and(|n| n == 0 || n > MAX_FRAME_SIZE) {
            return Err(Error::Config(format!(
                "detector.frame_size must be between 1 and {}",
                MAX_FRAME_SIZE
            )));
        }
        if d.threshold_delta.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(Error::Config("detector.threshold_delta must be >= 0".to_string()));
        }
        if d.abs_min_rms.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(Error::Config("detector.abs_min_rms must be >= 0".to_string()));
        }
        if self.audio.bgm_volume.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Config("audio.bgm_volume must be a number".to_string()));
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manpa")
            .join("config.toml")
    }

    pub fn default_audio_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manpa")
            .join("audio")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.detector.resolve(None), DetectorConfig::default());
        assert!(settings.audio.enabled.is_none());
        assert!(!settings.play.start_on_breath);
    }

    #[test]
    fn file_overrides_profile_and_cli_platform_wins() {
        let settings: Settings = toml::from_str(
            r#"
            [detector]
            platform = "desktop"
            cooldown_ms = 1800
            hold_frames = 0

            [audio]
            bgm = "bgm (1).mp3"
            bgm_volume = 0.4

            [play]
            start_on_breath = true
            "#,
        )
        .unwrap();

        let desktop = settings.detector.resolve(None);
        assert_eq!(desktop.cooldown_ms, 1800);
        assert_eq!(desktop.hold_frames, 1);

        let mobile = settings.detector.resolve(Some(Platform::Mobile));
        assert_eq!(mobile.abs_min_rms, Platform::Mobile.abs_min_rms());
        assert_eq!(mobile.cooldown_ms, 1800);

        assert_eq!(settings.audio.bgm.as_deref(), Some("bgm (1).mp3"));
        assert!(settings.play.start_on_breath);
    }

    #[test]
    fn unparsable_file_is_an_error_for_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[detector\ncooldown_ms = ").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[detector]\nframe_size = 0").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));

        fs::write(&path, "[detector]\nthreshold_delta = -0.1").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));

        fs::write(&path, "[detector]\nframe_size = 1099511627776").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));

        fs::write(&path, "[detector]\nframe_size = 512").unwrap();
        assert_eq!(Settings::load_from(&path).unwrap().detector.resolve(None).frame_size, 512);
    }
}
