//! Live microphone capture feeding the breath detector.
//!
//! The detector runs inside the cpal input callback, so detection cadence is
//! set by the audio device rather than by the render loop. Detector time is
//! derived from the number of samples seen, which keeps cooldown and arm delay
//! exact regardless of callback jitter.

use super::{BreathDetector, DetectorConfig, MAX_FRAME_SIZE};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use spectrum_analyzer::scaling::divide_by_N_sqrt;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{samples_fft_to_spectrum, FrequencyLimit};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Lower bound of the centroid analysis band (Hz)
const CENTROID_MIN_HZ: f32 = 20.0;
/// Upper bound of the centroid analysis band (Hz)
const CENTROID_MAX_HZ: f32 = 16000.0;

/// One detected breath
#[derive(Debug, Clone, Copy)]
pub struct BreathEvent {
    /// When the firing frame was analysed
    pub at: Instant,
    /// RMS of the firing frame
    pub rms: f32,
}

/// Snapshot of the analysis state for level meters
#[derive(Debug, Clone, Default)]
pub struct MeterReading {
    pub rms: f32,
    pub baseline: f32,
    pub threshold: f32,
    /// Smoothed spectral centroid, 0 when spectrum analysis is off
    pub centroid_hz: f32,
    pub events: u32,
    pub last_event: Option<Instant>,
    /// Still inside the arm delay
    pub arming: bool,
}

/// RAII guard to suppress stderr during ALSA device enumeration
/// Restores stderr when dropped
struct StderrSuppressor {
    saved_fd: i32,
    _dev_null: File,
}

impl StderrSuppressor {
    fn new() -> Option<Self> {
        let dev_null = File::open("/dev/null").ok()?;

        let saved_fd = unsafe { libc::dup(2) };
        if saved_fd < 0 {
            return None;
        }

        if unsafe { libc::dup2(dev_null.as_raw_fd(), 2) } < 0 {
            unsafe {
                libc::close(saved_fd);
            }
            return None;
        }

        Some(Self {
            saved_fd,
            _dev_null: dev_null,
        })
    }
}

impl Drop for StderrSuppressor {
    fn drop(&mut self) {
        unsafe {
            libc::dup2(self.saved_fd, 2);
            libc::close(self.saved_fd);
        }
    }
}

/// Spectral centroid of a frame in Hz (0 for silence)
fn spectral_centroid(samples: &[f32], sample_rate: u32) -> f32 {
    let windowed = hann_window(samples);
    let spectrum = match samples_fft_to_spectrum(
        &windowed,
        sample_rate,
        FrequencyLimit::Range(CENTROID_MIN_HZ, CENTROID_MAX_HZ),
        Some(&divide_by_N_sqrt),
    ) {
        Ok(s) => s,
        Err(_) => return 0.0,
    };

    let (weighted, total) = spectrum
        .data()
        .iter()
        .fold((0.0f32, 0.0f32), |(w, t), (freq, val)| {
            (w + freq.val() * val.val(), t + val.val())
        });
    if total <= 1e-9 {
        0.0
    } else {
        weighted / total
    }
}

/// Frame accumulator plus detector, shared with the audio callback
struct Analysis {
    detector: BreathDetector,
    frame: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
    samples_seen: u64,
    spectrum: bool,
    meter: MeterReading,
}

impl Analysis {
    fn new(config: DetectorConfig, sample_rate: u32, spectrum: bool) -> Self {
        // FFT needs a power of two
        let frame_size = config.frame_size.clamp(64, MAX_FRAME_SIZE).next_power_of_two();
        Self {
            detector: BreathDetector::new(config),
            frame: Vec::with_capacity(frame_size),
            frame_size,
            sample_rate,
            samples_seen: 0,
            spectrum,
            meter: MeterReading {
                arming: true,
                ..MeterReading::default()
            },
        }
    }

    /// Push mono samples, returning the RMS of every frame that fired
    fn push(&mut self, mono: &[f32], fired: &mut Vec<f32>) {
        for &sample in mono {
            self.frame.push(sample);
            self.samples_seen += 1;
            if self.frame.len() == self.frame_size {
                let t_ms = self.samples_seen * 1000 / self.sample_rate.max(1) as u64;
                if self.detector.process_frame(&self.frame, t_ms) {
                    fired.push(self.detector.last_rms());
                    self.meter.events += 1;
                    self.meter.last_event = Some(Instant::now());
                }
                self.update_meter(t_ms);
                self.frame.clear();
            }
        }
    }

    fn update_meter(&mut self, t_ms: u64) {
        self.meter.rms = self.detector.last_rms();
        self.meter.baseline = self.detector.baseline();
        self.meter.threshold = self.detector.threshold();
        self.meter.arming = t_ms < self.detector.config().arm_after_ms;
        if self.spectrum {
            let c = spectral_centroid(&self.frame, self.sample_rate);
            let prev = if self.meter.centroid_hz > 0.0 { self.meter.centroid_hz } else { c };
            self.meter.centroid_hz = prev + 0.18 * (c - prev);
        }
    }
}

/// Open microphone stream with a running breath detector.
///
/// Dropping the listener stops the stream and releases the input device.
pub struct BreathListener {
    stream: cpal::Stream,
    analysis: Arc<Mutex<Analysis>>,
    device_name: String,
    sample_rate: u32,
}

impl BreathListener {
    /// Open the default input device and start detecting.
    ///
    /// `on_breath` runs on the audio thread once per detected breath.
    pub fn start<F>(config: DetectorConfig, spectrum: bool, on_breath: F) -> Result<Self>
    where
        F: FnMut(BreathEvent) + Send + 'static,
    {
        // ALSA prints device probing noise straight to stderr
        let stderr_guard = StderrSuppressor::new();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::SensorUnavailable("no default input device".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| Error::SensorUnavailable(format!("no supported config: {}", e)))?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        if stream_config.channels == 0 {
            return Err(Error::SensorUnavailable(
                "input device reported 0 channels".to_string(),
            ));
        }
        let sample_rate = stream_config.sample_rate.0;

        log::info!(
            "mic: {} @ {}Hz, {} channels, {:?}",
            device_name,
            sample_rate,
            stream_config.channels,
            sample_format
        );

        let analysis = Arc::new(Mutex::new(Analysis::new(config, sample_rate, spectrum)));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32, F>(&device, &stream_config, Arc::clone(&analysis), on_breath)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16, F>(&device, &stream_config, Arc::clone(&analysis), on_breath)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16, F>(&device, &stream_config, Arc::clone(&analysis), on_breath)
            }
            other => {
                return Err(Error::SensorUnavailable(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        }
        .map_err(|e| Error::SensorUnavailable(format!("failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| Error::SensorUnavailable(format!("failed to start stream: {}", e)))?;

        drop(stderr_guard);

        Ok(Self {
            stream,
            analysis,
            device_name,
            sample_rate,
        })
    }

    /// Like [`start`](Self::start), but a missing or denied microphone only logs.
    /// The caller falls back to manual controls on `None`.
    pub fn start_or_silent<F>(config: DetectorConfig, spectrum: bool, on_breath: F) -> Option<Self>
    where
        F: FnMut(BreathEvent) + Send + 'static,
    {
        match Self::start(config, spectrum, on_breath) {
            Ok(listener) => Some(listener),
            Err(e) => {
                log::warn!("breath detection disabled: {}", e);
                None
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current analysis snapshot
    pub fn meter(&self) -> MeterReading {
        self.analysis
            .lock()
            .map(|a| a.meter.clone())
            .unwrap_or_default()
    }

    /// Apply a calibrated absolute floor to the running detector
    pub fn set_abs_min_rms(&self, value: f32) {
        if let Ok(mut a) = self.analysis.lock() {
            a.detector.set_abs_min_rms(value);
        }
    }

    /// Stop capture and release the device
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for BreathListener {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::debug!("mic pause on teardown failed: {}", e);
        }
        log::info!("mic released: {}", self.device_name);
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    analysis: Arc<Mutex<Analysis>>,
    mut on_breath: F,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
    F: FnMut(BreathEvent) + Send + 'static,
{
    let channels = config.channels as usize;
    let mut mono: Vec<f32> = Vec::new();
    let mut fired: Vec<f32> = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            mono.clear();
            mono.extend(data.chunks(channels).map(|frame| {
                let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                sum / frame.len() as f32
            }));

            fired.clear();
            if let Ok(mut analysis) = analysis.lock() {
                analysis.push(&mono, &mut fired);
            }
            for &rms in &fired {
                on_breath(BreathEvent {
                    at: Instant::now(),
                    rms,
                });
            }
        },
        |err| log::error!("mic stream error: {}", err),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(sample_rate: u32) -> Analysis {
        analysis_with_frame(sample_rate, 1000)
    }

    fn analysis_with_frame(sample_rate: u32, frame_size: usize) -> Analysis {
        let config = DetectorConfig {
            threshold_delta: 0.07,
            abs_min_rms: 0.02,
            hold_frames: 3,
            cooldown_ms: 900,
            arm_after_ms: 500,
            frame_size,
        };
        Analysis::new(config, sample_rate, false)
    }

    #[test]
    fn frame_size_rounds_to_power_of_two() {
        let a = analysis(48_000);
        assert_eq!(a.frame_size, 1024);
        assert_eq!(analysis_with_frame(48_000, usize::MAX).frame_size, MAX_FRAME_SIZE);
        assert_eq!(analysis_with_frame(48_000, 1).frame_size, 64);
    }

    #[test]
    fn loud_stream_fires_after_arm_delay() {
        let mut a = analysis(10_240);
        let mut fired = Vec::new();

        // 1s of quiet: 10 frames of 100ms, the first 5 inside the arm delay
        a.push(&vec![0.01; 10_240], &mut fired);
        assert!(fired.is_empty());
        assert!(!a.meter.arming);

        // three loud frames
        a.push(&vec![0.3; 3 * 1024], &mut fired);
        assert_eq!(fired.len(), 1);
        assert!((fired[0] - 0.3).abs() < 1e-4);
        assert_eq!(a.meter.events, 1);
    }

    #[test]
    fn partial_frames_carry_over() {
        let mut a = analysis(48_000);
        let mut fired = Vec::new();
        a.push(&[0.0; 1000], &mut fired);
        assert_eq!(a.frame.len(), 1000);
        a.push(&[0.0; 100], &mut fired);
        assert_eq!(a.frame.len(), 1100 - 1024);
        assert_eq!(a.samples_seen, 1100);
    }

    #[test]
    fn centroid_of_silence_is_zero() {
        assert_eq!(spectral_centroid(&[0.0; 1024], 48_000), 0.0);
    }
}
