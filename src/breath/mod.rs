//! Breath detection from microphone energy.
//!
//! # Algorithm
//! Each audio frame is reduced to its RMS level. A slow exponential moving
//! average of that level tracks the ambient noise floor. A frame qualifies when
//! its RMS is above both `baseline + threshold_delta` and the absolute floor
//! `abs_min_rms`; `hold_frames` consecutive qualifying frames fire one breath
//! event. After firing, the detector needs the level to fall back under a lower
//! release threshold (hysteresis) and the cooldown window to pass before it can
//! fire again. Frames during the arm delay after stream start are ignored.

pub mod capture;

use serde::Deserialize;

/// Detector configuration constants
mod constants {
    /// Initial noise floor estimate
    pub const BASELINE_SEED: f32 = 0.01;
    /// Share of the previous baseline kept per frame
    pub const BASELINE_RETAIN: f32 = 0.995;
    /// Release threshold as a fraction of `threshold_delta` above baseline
    pub const RELEASE_RATIO: f32 = 0.6;

    pub const DEFAULT_THRESHOLD_DELTA: f32 = 0.07;
    pub const DEFAULT_COOLDOWN_MS: u64 = 900;
    pub const DEFAULT_ARM_AFTER_MS: u64 = 500;
    pub const DEFAULT_FRAME_SIZE: usize = 1024;
    /// Largest frame the capture path accepts
    pub const MAX_FRAME_SIZE: usize = 1 << 16;

    /// Calibration proposes `mean * CALIBRATION_FACTOR` as the absolute floor
    pub const CALIBRATION_FACTOR: f32 = 4.0;
    pub const CALIBRATION_MIN: f32 = 0.01;
    pub const CALIBRATION_MAX: f32 = 0.25;
    /// Length of a quiet-room calibration run
    pub const CALIBRATION_MS: u64 = 2000;
}

pub use constants::{CALIBRATION_MS, MAX_FRAME_SIZE};
use constants::*;

/// Microphone gain profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    /// Quieter mic gain: shorter hold and lower absolute floor
    Mobile,
}

impl Platform {
    pub fn hold_frames(&self) -> u32 {
        match self {
            Platform::Desktop => 3,
            Platform::Mobile => 2,
        }
    }

    pub fn abs_min_rms(&self) -> f32 {
        match self {
            Platform::Desktop => 0.02,
            Platform::Mobile => 0.012,
        }
    }
}

/// Tuning for [`BreathDetector`]
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Energy above the adaptive baseline needed to qualify
    pub threshold_delta: f32,
    /// Absolute RMS floor a frame must also exceed
    pub abs_min_rms: f32,
    /// Consecutive qualifying frames before an event fires
    pub hold_frames: u32,
    /// Minimum time between two events
    pub cooldown_ms: u64,
    /// Ignore everything this long after the stream starts
    pub arm_after_ms: u64,
    /// Samples per analysis frame
    pub frame_size: usize,
}

impl DetectorConfig {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            threshold_delta: DEFAULT_THRESHOLD_DELTA,
            abs_min_rms: platform.abs_min_rms(),
            hold_frames: platform.hold_frames(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            arm_after_ms: DEFAULT_ARM_AFTER_MS,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::for_platform(Platform::Desktop)
    }
}

/// Root-mean-square of a normalized sample block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Frame-by-frame breath event detector
pub struct BreathDetector {
    config: DetectorConfig,
    baseline: f32,
    run: u32,
    /// Cleared after firing until the level drops below the release threshold
    released: bool,
    last_fire: Option<u64>,
    last_rms: f32,
}

impl BreathDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            baseline: BASELINE_SEED,
            run: 0,
            released: true,
            last_fire: None,
            last_rms: 0.0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Current noise floor estimate
    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    /// Level a frame must exceed right now
    pub fn threshold(&self) -> f32 {
        (self.baseline + self.config.threshold_delta).max(self.config.abs_min_rms)
    }

    pub fn last_rms(&self) -> f32 {
        self.last_rms
    }

    /// Replace the absolute floor (calibration)
    pub fn set_abs_min_rms(&mut self, value: f32) {
        self.config.abs_min_rms = value;
    }

    /// Feed one frame of samples observed at `t_ms` (ms since stream start).
    /// Returns true when this frame fires a breath event.
    pub fn process_frame(&mut self, samples: &[f32], t_ms: u64) -> bool {
        self.process_rms(rms(samples), t_ms)
    }

    /// Feed one frame's RMS level observed at `t_ms`
    pub fn process_rms(&mut self, level: f32, t_ms: u64) -> bool {
        self.last_rms = level;
        if t_ms < self.config.arm_after_ms {
            return false;
        }

        self.baseline = self.baseline * BASELINE_RETAIN + level * (1.0 - BASELINE_RETAIN);

        let release = self.baseline + self.config.threshold_delta * RELEASE_RATIO;
        if level <= release {
            self.released = true;
        }

        let qualifies = level > self.baseline + self.config.threshold_delta
            && level > self.config.abs_min_rms;
        if !qualifies {
            self.run = 0;
            return false;
        }

        self.run = self.run.saturating_add(1);
        if self.run < self.config.hold_frames || !self.released {
            return false;
        }

        let cooled = self
            .last_fire
            .map_or(true, |last| t_ms.saturating_sub(last) >= self.config.cooldown_ms);
        if !cooled {
            return false;
        }

        self.last_fire = Some(t_ms);
        self.released = false;
        self.run = 0;
        true
    }
}

/// Quiet-room calibration accumulator
#[derive(Default)]
pub struct Calibration {
    sum: f32,
    frames: u32,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: f32) {
        self.sum += level;
        self.frames += 1;
    }

    pub fn mean(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            self.sum / self.frames as f32
        }
    }

    /// Proposed absolute floor for the measured room
    pub fn proposed_abs_min(&self) -> f32 {
        (self.mean() * CALIBRATION_FACTOR).clamp(CALIBRATION_MIN, CALIBRATION_MAX)
    }
}
