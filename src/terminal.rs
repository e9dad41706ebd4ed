use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{poll, read, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        disable_raw_mode, enable_raw_mode, size, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use std::io::{self, stdout, Write};
use std::time::Duration;

/// Placeholder occupying the right half of a double-width glyph
const WIDE_TAIL: char = '\0';

/// Terminal abstraction for rendering
pub struct Terminal {
    width: u16,
    height: u16,
    buffer: Vec<Vec<Cell>>,
    background: Option<Color>,
    alternate_screen: bool,
}

/// A single cell in the terminal buffer
#[derive(Clone, PartialEq)]
pub struct Cell {
    pub ch: char,
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: None,
            bg: None,
            bold: false,
        }
    }
}

/// Display columns of a character (Hangul and CJK take two)
pub fn char_width(ch: char) -> usize {
    let c = ch as u32;
    let wide = matches!(c,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xA960..=0xA97F
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
    );
    if wide {
        2
    } else {
        1
    }
}

/// Display columns of a string
pub fn text_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

impl Terminal {
    /// Initialize the terminal for drawing
    pub fn new(alternate_screen: bool) -> io::Result<Self> {
        let (width, height) = size()?;

        if alternate_screen {
            enable_raw_mode()?;
            execute!(stdout(), EnterAlternateScreen, Hide, EnableFocusChange)?;
        }

        let buffer = vec![vec![Cell::default(); width as usize]; height as usize];

        Ok(Self {
            width,
            height,
            buffer,
            background: None,
            alternate_screen,
        })
    }

    /// Get terminal dimensions
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Reallocate the buffer after a terminal resize
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.buffer = vec![vec![Cell::default(); width as usize]; height as usize];
    }

    /// Background used by [`clear`](Self::clear)
    pub fn set_background(&mut self, color: Option<Color>) {
        self.background = color;
    }

    /// Clear the buffer to the current background
    pub fn clear(&mut self) {
        let blank = Cell {
            bg: self.background,
            ..Cell::default()
        };
        for row in &mut self.buffer {
            for cell in row {
                *cell = blank.clone();
            }
        }
    }

    /// Clear the actual terminal
    pub fn clear_screen(&self) -> io::Result<()> {
        execute!(stdout(), Clear(ClearType::All))?;
        Ok(())
    }

    /// Set a character at position with optional color, keeping the cell background
    pub fn set(&mut self, x: i32, y: i32, ch: char, fg: Option<Color>, bold: bool) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            let cell = &mut self.buffer[y as usize][x as usize];
            cell.ch = ch;
            cell.fg = fg;
            cell.bold = bold;
        }
    }

    /// Paint a cell background
    pub fn set_bg(&mut self, x: i32, y: i32, bg: Color) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize][x as usize].bg = Some(bg);
        }
    }

    /// Set a string starting at position; returns the columns used
    pub fn set_str(&mut self, x: i32, y: i32, s: &str, fg: Option<Color>, bold: bool) -> usize {
        let mut col = x;
        for ch in s.chars() {
            let w = char_width(ch) as i32;
            // a wide glyph that would straddle the right edge is dropped
            if w == 2 && col + 1 >= self.width as i32 {
                break;
            }
            self.set(col, y, ch, fg, bold);
            if w == 2 {
                self.set(col + 1, y, WIDE_TAIL, fg, bold);
            }
            col += w;
        }
        (col - x).max(0) as usize
    }

    /// Write `s` centered on row `y`
    pub fn set_str_centered(&mut self, y: i32, s: &str, fg: Option<Color>, bold: bool) {
        let x = (self.width as i32 - text_width(s) as i32) / 2;
        self.set_str(x.max(0), y, s, fg, bold);
    }

    /// Render the entire buffer to screen
    pub fn present(&self) -> io::Result<()> {
        let mut out = stdout();
        let mut fg: Option<Color> = None;
        let mut bg: Option<Color> = None;
        let mut bold = false;
        queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;

        for (y, row) in self.buffer.iter().enumerate() {
            queue!(out, MoveTo(0, y as u16))?;

            for cell in row {
                if cell.ch == WIDE_TAIL {
                    continue;
                }
                if cell.bold != bold {
                    // Reset clears colors too
                    if cell.bold {
                        queue!(out, SetAttribute(Attribute::Bold))?;
                    } else {
                        queue!(out, SetAttribute(Attribute::Reset))?;
                        fg = None;
                        bg = None;
                    }
                    bold = cell.bold;
                }
                if cell.bg != bg {
                    queue!(out, SetBackgroundColor(cell.bg.unwrap_or(Color::Reset)))?;
                    bg = cell.bg;
                }
                if cell.fg != fg {
                    queue!(out, SetForegroundColor(cell.fg.unwrap_or(Color::Reset)))?;
                    fg = cell.fg;
                }
                queue!(out, Print(cell.ch))?;
            }
        }

        queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;
        out.flush()?;
        Ok(())
    }

    /// Next input event within `timeout_ms`
    pub fn poll_event(&self, timeout_ms: u64) -> io::Result<Option<Event>> {
        if poll(Duration::from_millis(timeout_ms))? {
            return Ok(Some(read()?));
        }
        Ok(None)
    }

    /// Wait for a keypress with timeout
    pub fn wait_key(&self, timeout_ms: u64) -> io::Result<Option<KeyCode>> {
        match self.poll_event(timeout_ms)? {
            Some(Event::Key(key)) if key.kind != KeyEventKind::Release => Ok(Some(key.code)),
            _ => Ok(None),
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if self.alternate_screen {
            let _ = execute!(stdout(), DisableFocusChange, ResetColor, Show, LeaveAlternateScreen);
            let _ = disable_raw_mode();
        }
    }
}
