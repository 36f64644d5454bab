//! Local terminal state: raw mode, window size, screen clearing

use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;

use crossterm::cursor::MoveTo;
use crossterm::terminal::{self, Clear, ClearType};
use parking_lot::Mutex;
use thiserror::Error;

use crate::pty::WindowSize;

/// Errors from local terminal operations
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to change terminal mode: {0}")]
    Mode(#[source] io::Error),
}

/// Save slot for the terminal mode a session switched away from.
///
/// The mode is entered at most once and restored at most once; a second
/// `restore` is a no-op so every exit path can call it. Entering and
/// restoring hold the same lock, so a restore never interleaves with a
/// half-finished switch to raw mode.
#[derive(Debug, Default)]
pub struct TerminalMode {
    raw: Mutex<bool>,
}

impl TerminalMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the controlling terminal to raw mode
    pub fn enter_raw(&self) -> Result<(), TerminalError> {
        let mut raw = self.raw.lock();
        if *raw {
            return Ok(());
        }
        terminal::enable_raw_mode().map_err(TerminalError::Mode)?;
        *raw = true;
        tracing::debug!("Entered raw terminal mode");
        Ok(())
    }

    /// Put back the saved mode. Returns `true` if anything was restored.
    pub fn restore(&self) -> Result<bool, TerminalError> {
        let mut raw = self.raw.lock();
        if !*raw {
            return Ok(false);
        }
        *raw = false;
        terminal::disable_raw_mode().map_err(TerminalError::Mode)?;
        tracing::debug!("Restored terminal mode");
        Ok(true)
    }
}

impl Drop for TerminalMode {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Current size of the local terminal, including pixel dimensions when
/// the terminal reports them
pub fn window_size() -> Option<WindowSize> {
    if let Ok(size) = terminal::window_size() {
        if size.rows > 0 && size.columns > 0 {
            return Some(WindowSize {
                rows: size.rows,
                cols: size.columns,
                x: size.width,
                y: size.height,
            });
        }
    }

    match terminal::size() {
        Ok((cols, rows)) if rows > 0 && cols > 0 => Some(WindowSize {
            rows,
            cols,
            x: 0,
            y: 0,
        }),
        _ => None,
    }
}

/// Clear `out` and move the cursor home
pub fn clear_screen(out: &mut impl Write) -> io::Result<()> {
    crossterm::execute!(out, Clear(ClearType::All), MoveTo(0, 0))
}

/// Whether stdin is attached to a terminal
pub fn stdin_is_terminal() -> bool {
    io::stdin().is_terminal()
}

/// Source of the local window size
pub type SizeSource = Arc<dyn Fn() -> Option<WindowSize> + Send + Sync>;

/// The local end of a session: where keystrokes come from, where output
/// goes and how big the window is
pub struct LocalTerminal {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
    pub window_size: SizeSource,
    /// Switch to raw mode while the session runs
    pub raw_mode: bool,
}

impl LocalTerminal {
    /// The process's own stdin, stdout and controlling terminal
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::stdin()),
            output: Box::new(io::stdout()),
            window_size: Arc::new(window_size),
            raw_mode: stdin_is_terminal(),
        }
    }
}
