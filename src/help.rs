use crate::terminal::{text_width, Terminal};
use crossterm::style::Color;

pub const PLAY_HELP: &str = "\
manpa

  →  l      next beat
  ←  h      previous beat
  space     breathe (manual)
  r         play again (after the end)
  ?         close this help
  q  Esc    quit";

pub const DETECT_HELP: &str = "\
manpa detect

  c         calibrate (stay quiet 2s)
  space     reset event counter
  ?         close this help
  q  Esc    quit";

/// Render a centered help overlay box with the provided text.
pub fn render_help_overlay(term: &mut Terminal, help_text: &str) {
    if help_text.is_empty() {
        return;
    }
    let (width, height) = term.size();

    let lines: Vec<&str> = help_text.lines().collect();
    let max_width = lines.iter().map(|l| text_width(l)).max().unwrap_or(0);
    let box_width = max_width + 4; // 2 chars padding each side
    let box_height = lines.len() + 2; // 1 row padding top/bottom

    // Center the box
    let start_x = (width as usize).saturating_sub(box_width) / 2;
    let start_y = (height as usize).saturating_sub(box_height) / 2;

    let border_color = Color::White;
    let text_color = Color::Grey;
    let fill = Color::Rgb { r: 0x12, g: 0x16, b: 0x1A };

    for dy in 0..box_height {
        for dx in 0..box_width {
            let (x, y) = ((start_x + dx) as i32, (start_y + dy) as i32);
            term.set(x, y, ' ', None, false);
            term.set_bg(x, y, fill);
        }
    }

    // Draw top border: ┌─────┐
    term.set(start_x as i32, start_y as i32, '┌', Some(border_color), false);
    for x in 1..box_width - 1 {
        term.set((start_x + x) as i32, start_y as i32, '─', Some(border_color), false);
    }
    term.set((start_x + box_width - 1) as i32, start_y as i32, '┐', Some(border_color), false);

    // Content rows with side borders
    for (i, line) in lines.iter().enumerate() {
        let y = (start_y + 1 + i) as i32;
        term.set(start_x as i32, y, '│', Some(border_color), false);
        term.set_str((start_x + 2) as i32, y, line, Some(text_color), i == 0);
        term.set((start_x + box_width - 1) as i32, y, '│', Some(border_color), false);
    }

    // Draw bottom border: └─────┘
    let bottom_y = start_y + box_height - 1;
    term.set(start_x as i32, bottom_y as i32, '└', Some(border_color), false);
    for x in 1..box_width - 1 {
        term.set((start_x + x) as i32, bottom_y as i32, '─', Some(border_color), false);
    }
    term.set((start_x + box_width - 1) as i32, bottom_y as i32, '┘', Some(border_color), false);
}
