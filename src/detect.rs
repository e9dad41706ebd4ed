//! Microphone test screen: live level meter for tuning the breath detector.

use crate::breath::capture::{BreathListener, MeterReading};
use crate::breath::{Calibration, CALIBRATION_MS};
use crate::config::DetectConfig;
use crate::error::Result;
use crate::help::{render_help_overlay, DETECT_HELP};
use crate::terminal::Terminal;
use crossterm::event::{Event, KeyCode, KeyEventKind};
use crossterm::style::Color;
use std::time::{Duration, Instant};

/// RMS shown at the right edge of the meter
const FULL_SCALE_RMS: f32 = 0.3;
/// How long the BREATH flag stays lit
const FLASH_MS: u64 = 400;
const FRAME_MS: u64 = 33;

/// Cells of a `width`-wide meter filled by `level`
fn meter_cells(level: f32, width: usize) -> usize {
    let ratio = (level / FULL_SCALE_RMS).clamp(0.0, 1.0);
    (ratio * width as f32).round() as usize
}

/// A quiet-room calibration in progress
struct CalibrationRun {
    calibration: Calibration,
    started: Instant,
}

impl CalibrationRun {
    fn new(started: Instant) -> Self {
        Self {
            calibration: Calibration::new(),
            started,
        }
    }

    /// Feed a level; returns the proposed floor once the run is over
    fn push(&mut self, level: f32, now: Instant) -> Option<f32> {
        if now.saturating_duration_since(self.started) >= Duration::from_millis(CALIBRATION_MS) {
            return Some(self.calibration.proposed_abs_min());
        }
        self.calibration.push(level);
        None
    }

    fn remaining_ms(&self, now: Instant) -> u64 {
        CALIBRATION_MS.saturating_sub(now.saturating_duration_since(self.started).as_millis() as u64)
    }
}

fn draw_meter(term: &mut Terminal, x: i32, y: i32, width: usize, reading: &MeterReading) {
    let filled = meter_cells(reading.rms, width);
    let threshold = meter_cells(reading.threshold, width);
    let baseline = meter_cells(reading.baseline, width);

    for i in 0..width {
        let color = if i >= threshold {
            Color::Red
        } else if i >= baseline {
            Color::Yellow
        } else {
            Color::Green
        };
        let (ch, c) = if i < filled { ('█', color) } else { ('·', Color::DarkGrey) };
        term.set(x + i as i32, y, ch, Some(c), false);
    }
    term.set(x + baseline.min(width.saturating_sub(1)) as i32, y + 1, '^', Some(Color::Yellow), false);
    term.set(x + threshold.min(width.saturating_sub(1)) as i32, y + 1, '▲', Some(Color::Red), true);
}

fn display_error_and_wait(term: &mut Terminal, lines: &[&str]) -> Result<()> {
    term.set_background(None);
    term.clear();
    let (_, height) = term.size();
    let start_y = height as i32 / 2 - lines.len() as i32 / 2;
    for (i, line) in lines.iter().enumerate() {
        term.set_str_centered(start_y + i as i32, line, None, i == 0);
    }
    term.present()?;

    loop {
        if let Some(KeyCode::Char('q') | KeyCode::Esc) = term.wait_key(100)? {
            return Ok(());
        }
    }
}

pub fn run(config: DetectConfig) -> Result<()> {
    let listener = BreathListener::start(config.detector.clone(), true, |event| {
        log::info!("detect: breath rms={:.3}", event.rms);
    });

    let mut term = Terminal::new(true)?;
    let listener = match listener {
        Ok(l) => l,
        Err(e) => {
            let message = e.to_string();
            return display_error_and_wait(
                &mut term,
                &["No microphone", message.as_str(), "", "Press q to quit"],
            );
        }
    };

    let mut show_help = false;
    let mut events_offset = 0u32;
    let mut calibrating: Option<CalibrationRun> = None;
    let mut abs_min = config.detector.abs_min_rms;
    let mut status = String::from("c: calibrate   ?: help   q: quit");

    'main: loop {
        let mut timeout = FRAME_MS;
        while let Some(event) = term.poll_event(timeout)? {
            timeout = 0;
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
                        KeyCode::Char('c') if calibrating.is_none() => {
                            calibrating = Some(CalibrationRun::new(Instant::now()));
                        }
                        KeyCode::Char(' ') => events_offset = listener.meter().events,
                        _ => {}
                    }
                }
                Event::Resize(w, h) => {
                    term.resize(w, h);
                    term.clear_screen()?;
                }
                _ => {}
            }
        }

        let reading = listener.meter();
        let now = Instant::now();

        if let Some(run) = calibrating.as_mut() {
            if let Some(proposed) = run.push(reading.rms, now) {
                listener.set_abs_min_rms(proposed);
                log::info!("detect: calibrated abs_min_rms {:.3} -> {:.3}", abs_min, proposed);
                status = format!("abs_min_rms set to {:.3} (put it in [detector] to keep it)", proposed);
                abs_min = proposed;
                calibrating = None;
            }
        }

        term.set_background(None);
        term.clear();
        let (w, h) = term.size();
        let width = (w as usize).saturating_sub(8).min(72);
        let x = (w as i32 - width as i32) / 2;
        let mut y = (h as i32 / 2 - 7).max(0);

        term.set_str_centered(y, "manpa detect", Some(Color::White), true);
        y += 1;
        let device = format!("{} @ {} Hz", listener.device_name(), listener.sample_rate());
        term.set_str_centered(y, &device, Some(Color::DarkGrey), false);
        y += 2;

        draw_meter(&mut term, x, y, width, &reading);
        y += 3;

        let flashing = reading
            .last_event
            .is_some_and(|t| now.saturating_duration_since(t) < Duration::from_millis(FLASH_MS));
        let rows = [
            format!("rms        {:.4}", reading.rms),
            format!("baseline   {:.4}", reading.baseline),
            format!("threshold  {:.4}", reading.threshold),
            format!("abs min    {:.4}", abs_min),
            format!("centroid   {:.0} Hz", reading.centroid_hz),
            format!("events     {}", reading.events.saturating_sub(events_offset)),
            format!("cooldown   {} ms", config.detector.cooldown_ms),
        ];
        for row in &rows {
            term.set_str(x, y, row, Some(Color::Grey), false);
            y += 1;
        }
        y += 1;

        if reading.arming {
            term.set_str_centered(y, "arming…", Some(Color::DarkGrey), false);
        } else if flashing {
            term.set_str_centered(y, "BREATH", Some(Color::Cyan), true);
        }
        y += 2;

        match &calibrating {
            Some(run) => {
                let line = format!("calibrating, stay quiet… {:.1}s", run.remaining_ms(now) as f32 / 1000.0);
                term.set_str_centered(y, &line, Some(Color::Yellow), true);
            }
            None => term.set_str_centered(y, &status, Some(Color::DarkGrey), false),
        }

        if show_help {
            render_help_overlay(&mut term, DETECT_HELP);
        }
        term.present()?;
    }

    listener.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_scales_and_clamps() {
        assert_eq!(meter_cells(0.0, 60), 0);
        assert_eq!(meter_cells(0.15, 60), 30);
        assert_eq!(meter_cells(5.0, 60), 60);
        assert_eq!(meter_cells(-1.0, 60), 0);
    }

    #[test]
    fn calibration_run_proposes_after_two_seconds() {
        let start = Instant::now();
        let mut run = CalibrationRun::new(start);
        for i in 0..100 {
            let at = start + Duration::from_millis(i * 19);
            assert_eq!(run.push(0.01, at), None);
        }
        assert_eq!(run.remaining_ms(start + Duration::from_millis(1500)), 500);

        let proposed = run.push(0.9, start + Duration::from_millis(CALIBRATION_MS)).unwrap();
        assert!((proposed - 0.04).abs() < 1e-4);
    }

    #[test]
    fn calibration_of_silence_hits_the_floor() {
        let start = Instant::now();
        let mut run = CalibrationRun::new(start);
        run.push(0.0, start);
        let proposed = run.push(0.0, start + Duration::from_secs(3)).unwrap();
        assert!((proposed - 0.01).abs() < 1e-6);
    }
}
