//! Client side: drives a remote terminal from the local one

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;

use super::cleanup::Coordinator;
use super::{
    protocol_violation, spawn_interrupt_watcher, Completion, SessionError, SessionResult,
    SessionState,
};
use crate::protocol::{ControlMessage, Payload};
use crate::terminal::{self, LocalTerminal, SizeSource, TerminalMode};
use crate::transport::{ChannelEvent, DataChannel, EventStream, TransportError};

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Put the local terminal in raw mode and forward keystrokes and resizes
    pub interactive: bool,
    /// Treat unexpected control messages as fatal
    pub strict_protocol: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            interactive: true,
            strict_protocol: false,
        }
    }
}

/// One client session attached to a remote host
pub struct ClientSession {
    options: ClientOptions,
    channel: Arc<dyn DataChannel>,
    completion: Completion,
    terminal: Arc<TerminalMode>,
    input: Mutex<Option<Box<dyn Read + Send>>>,
    output: Mutex<Box<dyn Write + Send>>,
    window_size: SizeSource,
    raw_mode: bool,
    state: Mutex<SessionState>,
    resize: Mutex<Option<JoinHandle<()>>>,
    coordinator: Coordinator,
}

impl ClientSession {
    /// Session attached to the process's own terminal
    pub fn new(options: ClientOptions, channel: Arc<dyn DataChannel>) -> Arc<Self> {
        Self::with_terminal(options, channel, LocalTerminal::stdio())
    }

    /// Session reading keystrokes from and writing output to `local`
    pub fn with_terminal(
        options: ClientOptions,
        channel: Arc<dyn DataChannel>,
        local: LocalTerminal,
    ) -> Arc<Self> {
        let completion = Completion::new();
        let terminal = Arc::new(TerminalMode::new());
        let coordinator = Coordinator::new(channel.clone(), completion.clone(), terminal.clone());
        Arc::new(Self {
            options,
            channel,
            completion,
            terminal,
            input: Mutex::new(Some(local.input)),
            output: Mutex::new(local.output),
            window_size: local.window_size,
            raw_mode: local.raw_mode,
            state: Mutex::new(SessionState::AwaitingChannel),
            resize: Mutex::new(None),
            coordinator,
        })
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(?state, "Client session state");
        *self.state.lock() = state;
    }

    /// Run the session until it ends, then clean up
    pub async fn run(self: Arc<Self>, events: EventStream) -> SessionResult {
        let interrupt = spawn_interrupt_watcher(self.completion.clone());
        let dispatcher = tokio::spawn(self.clone().dispatch(events));

        let result = self
            .coordinator
            .finish(|| {
                if let Some(resize) = self.resize.lock().take() {
                    resize.abort();
                }
            })
            .await;
        self.set_state(SessionState::Terminated);

        interrupt.abort();
        if let Err(e) = dispatcher.await {
            tracing::debug!("Dispatcher ended abnormally: {}", e);
        }
        result
    }

    async fn dispatch(self: Arc<Self>, mut events: EventStream) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.completion.fired() => break,
                event = events.recv() => event,
            };

            let outcome = match event {
                Some(ChannelEvent::Open) => self.on_open(),
                Some(ChannelEvent::Message(payload)) => self.handle_message(payload),
                Some(ChannelEvent::Close) | None => Err(SessionError::ChannelClosed),
                Some(ChannelEvent::Error(e)) => Err(TransportError::Failed(e).into()),
            };
            if let Err(e) = outcome {
                self.completion.fire(Err(e));
                break;
            }
        }
    }

    fn on_open(self: &Arc<Self>) -> SessionResult {
        self.set_state(SessionState::Ready);
        if !self.options.interactive {
            return Ok(());
        }

        if self.raw_mode {
            self.terminal.enter_raw()?;
            // Cleanup may already have restored the mode.
            if self.completion.is_fired() {
                self.terminal.restore()?;
                return Ok(());
            }
        }
        terminal::clear_screen(&mut *self.output.lock())?;

        // Watch for resizes before the first report so none is missed.
        let winch = match signal(SignalKind::window_change()) {
            Ok(winch) => Some(winch),
            Err(e) => {
                tracing::warn!("Failed to watch window size changes: {}", e);
                None
            }
        };
        send_window_size(self.channel.as_ref(), &self.window_size)?;
        self.spawn_stdin_pump();
        if let Some(winch) = winch {
            *self.resize.lock() = Some(self.spawn_resize_pump(winch));
        }
        Ok(())
    }

    fn handle_message(&self, payload: Payload) -> SessionResult {
        if self.completion.is_fired() {
            tracing::debug!("Discarding message after session end");
            return Ok(());
        }

        match payload {
            Payload::Binary(data) => {
                let mut output = self.output.lock();
                output.write_all(&data)?;
                output.flush()?;
            }
            Payload::Text(text) => match ControlMessage::parse(&text) {
                ControlMessage::Quit => {
                    if let Err(e) = self.terminal.restore() {
                        tracing::warn!("Failed to restore terminal mode: {}", e);
                    }
                    tracing::info!("Host ended the session");
                    self.completion.fire(Ok(()));
                }
                // set_size and stdin only flow towards the host
                _ => protocol_violation(self.options.strict_protocol, text)?,
            },
        }
        Ok(())
    }

    /// Local keystrokes to the channel
    fn spawn_stdin_pump(&self) {
        let Some(mut input) = self.input.lock().take() else {
            return;
        };
        let channel = self.channel.clone();
        let completion = self.completion.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while !completion.is_fired() {
                match input.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("Local stdin closed");
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = channel.send(Payload::binary(buf[..n].to_vec())) {
                            completion.fire(Err(e.into()));
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        completion.fire(Err(e.into()));
                        break;
                    }
                }
            }
        });
    }

    /// Send the window size after every SIGWINCH
    fn spawn_resize_pump(&self, mut winch: Signal) -> JoinHandle<()> {
        let channel = self.channel.clone();
        let completion = self.completion.clone();
        let window_size = self.window_size.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = winch.recv() => if changed.is_none() { return },
                    _ = completion.fired() => return,
                }
                if let Err(e) = send_window_size(channel.as_ref(), &window_size) {
                    completion.fire(Err(e));
                    return;
                }
            }
        })
    }
}

fn send_window_size(channel: &dyn DataChannel, window_size: &SizeSource) -> SessionResult {
    if let Some(size) = window_size() {
        let message = ControlMessage::set_size(size).to_wire();
        channel.send(Payload::Text(message))?;
    }
    Ok(())
}
