//! Pseudo-terminal process handle
//!
//! The session engine only talks to the [`Pty`] trait so tests can swap in
//! an in-memory double. [`NativePty`] is the real thing, backed by
//! `portable-pty`.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

/// Errors from pty operations
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to query pty size: {0}")]
    Size(String),

    #[error("failed to resize pty: {0}")]
    Resize(String),
}

/// Terminal window geometry. `x`/`y` are the pixel width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub x: u16,
    pub y: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            x: 0,
            y: 0,
        }
    }
}

impl From<WindowSize> for PtySize {
    fn from(size: WindowSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: size.x,
            pixel_height: size.y,
        }
    }
}

impl From<PtySize> for WindowSize {
    fn from(size: PtySize) -> Self {
        Self {
            rows: size.rows,
            cols: size.cols,
            x: size.pixel_width,
            y: size.pixel_height,
        }
    }
}

/// Program and arguments to run on the pty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Split an argv-style vector into program and arguments
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A process attached to a pty
pub trait Pty: Send + Sync {
    /// Write bytes to the process (its terminal input)
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// Current window size
    fn size(&self) -> Result<WindowSize, PtyError>;

    /// Change the window size
    fn resize(&self, size: WindowSize) -> Result<(), PtyError>;

    /// A blocking reader over the process output
    fn reader(&self) -> Result<Box<dyn Read + Send>, PtyError>;

    /// Terminate the process. Blocked readers see EOF afterwards.
    fn kill(&self);
}

/// Starts processes on new ptys
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, command: &CommandSpec, size: WindowSize) -> Result<Arc<dyn Pty>, PtyError>;
}

/// Spawns [`NativePty`] processes
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSpawner;

impl PtySpawner for NativeSpawner {
    fn spawn(&self, command: &CommandSpec, size: WindowSize) -> Result<Arc<dyn Pty>, PtyError> {
        Ok(Arc::new(NativePty::spawn(command, size)?))
    }
}

/// A child process on an OS pty
pub struct NativePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl NativePty {
    /// Open a pty of the given size and run `command` on it
    pub fn spawn(command: &CommandSpec, size: WindowSize) -> Result<Self, PtyError> {
        let spawn_error = |message: String| PtyError::Spawn {
            command: command.to_string(),
            message,
        };

        let pair = native_pty_system()
            .openpty(size.into())
            .map_err(|e| spawn_error(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(e.to_string()))?;
        // The slave end must be closed here or readers never see EOF.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to take writer: {e}")))?;

        tracing::debug!(
            command = %command,
            pid = child.process_id().unwrap_or(0),
            rows = size.rows,
            cols = size.cols,
            "Spawned pty process"
        );

        Ok(Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
        })
    }

    /// Exit code if the child has already exited
    pub fn try_wait(&self) -> Option<u32> {
        match self.child.lock().try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }
}

impl Pty for NativePty {
    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn size(&self) -> Result<WindowSize, PtyError> {
        self.master
            .lock()
            .get_size()
            .map(WindowSize::from)
            .map_err(|e| PtyError::Size(e.to_string()))
    }

    fn resize(&self, size: WindowSize) -> Result<(), PtyError> {
        self.master
            .lock()
            .resize(size.into())
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master
            .lock()
            .try_clone_reader()
            .map_err(|e| PtyError::Io(std::io::Error::other(e.to_string())))
    }

    fn kill(&self) {
        let mut child = self.child.lock();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(e) = child.kill() {
            tracing::debug!("Failed to kill pty child: {}", e);
        }
    }
}
