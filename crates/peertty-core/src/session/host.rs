//! Host side: runs a command on a pty and serves it over the channel

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::cleanup::Coordinator;
use super::{
    is_pty_eof, protocol_violation, spawn_interrupt_watcher, Completion, ReadyGate, SessionError,
    SessionResult, SessionState,
};
use crate::protocol::{ControlMessage, Payload, QUIT};
use crate::pty::{CommandSpec, Pty, PtySpawner};
use crate::terminal::{self, LocalTerminal, SizeSource, TerminalMode};
use crate::transport::{ChannelEvent, DataChannel, EventStream, TransportError};

/// Bytes read from the pty per outgoing message
const OUTPUT_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub command: CommandSpec,
    /// Neither echo the session locally nor forward local stdin
    pub non_interactive: bool,
    /// Treat unmatched control messages as fatal
    pub strict_protocol: bool,
}

/// One hosted terminal session
pub struct HostSession {
    options: HostOptions,
    channel: Arc<dyn DataChannel>,
    spawner: Arc<dyn PtySpawner>,
    completion: Completion,
    pty: ReadyGate<Arc<dyn Pty>>,
    terminal: Arc<TerminalMode>,
    input: Mutex<Option<Box<dyn Read + Send>>>,
    output: Arc<Mutex<Box<dyn Write + Send>>>,
    window_size: SizeSource,
    raw_mode: bool,
    state: Mutex<SessionState>,
    coordinator: Coordinator,
}

impl HostSession {
    /// Session echoing to and reading from the process's own terminal
    pub fn new(
        options: HostOptions,
        channel: Arc<dyn DataChannel>,
        spawner: Arc<dyn PtySpawner>,
    ) -> Arc<Self> {
        Self::with_terminal(options, channel, spawner, LocalTerminal::stdio())
    }

    /// Session whose local side is `local`
    pub fn with_terminal(
        options: HostOptions,
        channel: Arc<dyn DataChannel>,
        spawner: Arc<dyn PtySpawner>,
        local: LocalTerminal,
    ) -> Arc<Self> {
        let completion = Completion::new();
        let terminal = Arc::new(TerminalMode::new());
        let coordinator = Coordinator::new(channel.clone(), completion.clone(), terminal.clone());
        Arc::new(Self {
            options,
            channel,
            spawner,
            completion,
            pty: ReadyGate::new(),
            terminal,
            input: Mutex::new(Some(local.input)),
            output: Arc::new(Mutex::new(local.output)),
            window_size: local.window_size,
            raw_mode: local.raw_mode,
            state: Mutex::new(SessionState::AwaitingChannel),
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
        tracing::debug!(?state, "Host session state");
        *self.state.lock() = state;
    }

    /// Serve the session until it ends, then clean up
    pub async fn run(self: Arc<Self>, events: EventStream) -> SessionResult {
        let interrupt = spawn_interrupt_watcher(self.completion.clone());
        let dispatcher = tokio::spawn(self.clone().dispatch(events));

        let result = self.coordinator.finish(|| self.release()).await;
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

            match event {
                Some(ChannelEvent::Open) => self.on_open(),
                Some(ChannelEvent::Message(payload)) => self.handle_message(payload).await,
                Some(ChannelEvent::Close) | None => {
                    self.completion.fire(Err(SessionError::ChannelClosed));
                    break;
                }
                Some(ChannelEvent::Error(e)) => {
                    self.completion
                        .fire(Err(TransportError::Failed(e).into()));
                    break;
                }
            }
        }
    }

    fn on_open(self: &Arc<Self>) {
        self.set_state(SessionState::ProcessNotReady);
        let session = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = session.start_process() {
                tracing::warn!(command = %session.options.command, "Failed to start process: {}", e);
                session.completion.fire(Err(e));
            }
        });
    }

    fn start_process(&self) -> SessionResult {
        if self.completion.is_fired() {
            return Ok(());
        }
        let interactive = !self.options.non_interactive;
        if interactive {
            terminal::clear_screen(&mut *self.output.lock())?;
        }

        let size = (self.window_size)().unwrap_or_default();
        let pty = self.spawner.spawn(&self.options.command, size)?;
        let reader = pty.reader()?;
        self.pty.open(pty.clone());

        // Cleanup may have looked for the pty before it was published.
        if self.completion.is_fired() {
            pty.kill();
            return Ok(());
        }
        self.set_state(SessionState::Ready);
        tracing::info!(command = %self.options.command, rows = size.rows, cols = size.cols, "Terminal session started");

        if interactive {
            if self.raw_mode {
                self.terminal.enter_raw()?;
                // Cleanup may already have restored the mode.
                if self.completion.is_fired() {
                    self.terminal.restore()?;
                    return Ok(());
                }
            }
            self.spawn_stdin_pump(pty);
        }
        self.spawn_output_pump(reader);
        Ok(())
    }

    /// Local keyboard to the pty
    fn spawn_stdin_pump(&self, pty: Arc<dyn Pty>) {
        let Some(mut input) = self.input.lock().take() else {
            return;
        };
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
                        if let Err(e) = pty.write(&buf[..n]) {
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

    /// Pty output to local stdout and the channel; ends the session on EOF
    fn spawn_output_pump(&self, mut reader: Box<dyn Read + Send>) {
        let channel = self.channel.clone();
        let completion = self.completion.clone();
        let echo = (!self.options.non_interactive).then(|| self.output.clone());
        thread::spawn(move || {
            let result = pump_output(reader.as_mut(), channel.as_ref(), echo.as_deref());
            if result.is_ok() {
                tracing::info!("Process exited");
            }
            completion.fire(result);
        });
    }

    async fn handle_message(self: &Arc<Self>, payload: Payload) {
        if self.completion.is_fired() {
            tracing::debug!("Discarding message after session end");
            return;
        }

        // Quit must not wait for a process that may never start.
        if matches!(&payload, Payload::Text(text) if text == QUIT) {
            tracing::info!("Peer quit");
            self.completion.fire(Ok(()));
            return;
        }

        let Some(pty) = self.wait_for_process().await else {
            return;
        };
        // Pty writes block when the child stops reading.
        let session = self.clone();
        let applied = tokio::task::spawn_blocking(move || session.apply(pty.as_ref(), payload)).await;
        let result = applied.unwrap_or_else(|e| Err(io::Error::other(e).into()));
        if let Err(e) = result {
            self.completion.fire(Err(e));
        }
    }

    async fn wait_for_process(&self) -> Option<Arc<dyn Pty>> {
        if let Some(pty) = self.pty.get() {
            return Some(pty);
        }
        tokio::select! {
            pty = self.pty.ready() => pty,
            _ = self.completion.fired() => None,
        }
    }

    fn apply(&self, pty: &dyn Pty, payload: Payload) -> SessionResult {
        let text = match payload {
            Payload::Binary(data) => return Ok(pty.write(&data)?),
            Payload::Text(text) => text,
        };

        match ControlMessage::parse(&text) {
            ControlMessage::Quit => {
                self.completion.fire(Ok(()));
            }
            resize @ ControlMessage::SetSize { .. } => {
                let current = pty.size()?;
                if let Some(size) = resize.resized(current) {
                    pty.resize(size)?;
                    tracing::debug!(rows = size.rows, cols = size.cols, x = size.x, y = size.y, "Resized pty");
                }
            }
            ControlMessage::Stdin(data) => {
                if !data.is_empty() {
                    pty.write(data.as_bytes())?;
                }
            }
            ControlMessage::Unmatched(raw) => protocol_violation(self.options.strict_protocol, raw)?,
        }
        Ok(())
    }

    fn release(&self) {
        if let Some(pty) = self.pty.get() {
            pty.kill();
        }
    }
}

fn pump_output(
    reader: &mut dyn Read,
    channel: &dyn DataChannel,
    echo: Option<&Mutex<Box<dyn Write + Send>>>,
) -> SessionResult {
    let mut buf = [0u8; OUTPUT_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_eof(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if let Some(out) = echo {
            let mut out = out.lock();
            out.write_all(&buf[..n])?;
            out.flush()?;
        }
        channel.send(Payload::binary(buf[..n].to_vec()))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{PtyError, WindowSize};
    use crate::transport::{memory, Connection};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Pty double: records input, emits scripted output until killed
    struct FakePty {
        written: Mutex<Vec<u8>>,
        size: Mutex<WindowSize>,
        output_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        output_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
        killed: AtomicBool,
        write_gate: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl FakePty {
        fn new(size: WindowSize) -> Arc<Self> {
            let (tx, rx) = mpsc::channel();
            Arc::new(Self {
                written: Mutex::new(Vec::new()),
                size: Mutex::new(size),
                output_tx: Mutex::new(Some(tx)),
                output_rx: Mutex::new(Some(rx)),
                killed: AtomicBool::new(false),
                write_gate: Mutex::new(None),
            })
        }

        fn emit(&self, data: &[u8]) {
            if let Some(tx) = self.output_tx.lock().as_ref() {
                let _ = tx.send(data.to_vec());
            }
        }

        /// Child exits: readers see EOF
        fn exit(&self) {
            self.output_tx.lock().take();
        }

        fn written(&self) -> Vec<u8> {
            self.written.lock().clone()
        }
    }

    struct ChannelReader {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    impl Pty for FakePty {
        fn write(&self, data: &[u8]) -> Result<(), PtyError> {
            let gate = self.write_gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            self.written.lock().extend_from_slice(data);
            Ok(())
        }

        fn size(&self) -> Result<WindowSize, PtyError> {
            Ok(*self.size.lock())
        }

        fn resize(&self, size: WindowSize) -> Result<(), PtyError> {
            *self.size.lock() = size;
            Ok(())
        }

        fn reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
            let rx = self
                .output_rx
                .lock()
                .take()
                .ok_or_else(|| PtyError::Io(io::Error::other("reader taken")))?;
            Ok(Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
            }))
        }

        fn kill(&self) {
            self.killed.store(true, Ordering::SeqCst);
            self.exit();
        }
    }

    struct FakeSpawner {
        pty: Arc<FakePty>,
        delay: Duration,
        fail: bool,
        spawned: AtomicUsize,
        spawned_size: Arc<Mutex<Option<WindowSize>>>,
        end_during_spawn: Mutex<Option<Completion>>,
    }

    impl FakeSpawner {
        fn new(pty: Arc<FakePty>) -> Self {
            Self {
                pty,
                delay: Duration::ZERO,
                fail: false,
                spawned: AtomicUsize::new(0),
                spawned_size: Arc::new(Mutex::new(None)),
                end_during_spawn: Mutex::new(None),
            }
        }
    }

    impl PtySpawner for FakeSpawner {
        fn spawn(&self, command: &CommandSpec, size: WindowSize) -> Result<Arc<dyn Pty>, PtyError> {
            thread::sleep(self.delay);
            if self.fail {
                return Err(PtyError::Spawn {
                    command: command.to_string(),
                    message: "no such file".to_string(),
                });
            }
            self.spawned.fetch_add(1, Ordering::SeqCst);
            *self.spawned_size.lock() = Some(size);
            if let Some(completion) = self.end_during_spawn.lock().take() {
                completion.fire(Ok(()));
            }
            Ok(self.pty.clone())
        }
    }

    struct Harness {
        session: Arc<HostSession>,
        peer: Connection,
        run: tokio::task::JoinHandle<SessionResult>,
    }

    /// Output sink that tests can read back
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn idle_terminal() -> LocalTerminal {
        LocalTerminal {
            input: Box::new(io::empty()),
            output: Box::new(io::sink()),
            window_size: Arc::new(|| None),
            raw_mode: false,
        }
    }

    fn options(non_interactive: bool, strict: bool) -> HostOptions {
        HostOptions {
            command: CommandSpec {
                program: "bash".to_string(),
                args: Vec::new(),
            },
            non_interactive,
            strict_protocol: strict,
        }
    }

    fn start_with(spawner: FakeSpawner, options: HostOptions, local: LocalTerminal) -> Harness {
        let (host, peer) = memory::pair();
        let session = HostSession::with_terminal(options, host.channel, Arc::new(spawner), local);
        let run = tokio::spawn(session.clone().run(host.events));
        Harness { session, peer, run }
    }

    fn start(spawner: FakeSpawner, strict: bool) -> Harness {
        start_with(spawner, options(true, strict), idle_terminal())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn finish(run: tokio::task::JoinHandle<SessionResult>) -> SessionResult {
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("session did not end")
            .unwrap()
    }

    #[tokio::test]
    async fn test_binary_passthrough() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), false);

        h.peer.channel.send(Payload::binary(b"s".to_vec())).unwrap();
        eventually(|| !pty.written().is_empty()).await;
        assert_eq!(pty.written(), b"s");
        assert_eq!(h.session.state(), SessionState::Ready);

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
        assert_eq!(pty.written(), b"s");
        assert!(pty.killed.load(Ordering::SeqCst));
        assert_eq!(h.session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_quit_stops_processing() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), false);

        h.peer.channel.send(Payload::quit()).unwrap();
        h.peer.channel.send(Payload::binary(b"x".to_vec())).unwrap();

        assert!(finish(h.run).await.is_ok());
        assert!(h.session.completion().is_fired());
        assert!(!h.session.completion().fire(Ok(())));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pty.written().is_empty());
    }

    #[tokio::test]
    async fn test_set_size_keeps_pixels_when_absent() {
        let pty = FakePty::new(WindowSize {
            rows: 24,
            cols: 80,
            x: 7,
            y: 9,
        });
        let h = start(FakeSpawner::new(pty.clone()), false);

        h.peer.channel.send(Payload::text(r#"["set_size", 20, 30]"#)).unwrap();
        eventually(|| pty.size.lock().rows == 20).await;
        assert_eq!(
            *pty.size.lock(),
            WindowSize {
                rows: 20,
                cols: 30,
                x: 7,
                y: 9
            }
        );

        h.peer
            .channel
            .send(Payload::text(r#"["set_size", 20, 30, 10, 11]"#))
            .unwrap();
        eventually(|| pty.size.lock().x == 10).await;
        assert_eq!(
            *pty.size.lock(),
            WindowSize {
                rows: 20,
                cols: 30,
                x: 10,
                y: 11
            }
        );

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
    }

    #[tokio::test]
    async fn test_stdin_control_message() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), false);

        h.peer.channel.send(Payload::text(r#"["stdin", ""]"#)).unwrap();
        h.peer.channel.send(Payload::text(r#"["stdin", "ls\r"]"#)).unwrap();
        eventually(|| !pty.written().is_empty()).await;
        assert_eq!(pty.written(), b"ls\r");

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
    }

    #[tokio::test]
    async fn test_messages_wait_for_process() {
        let pty = FakePty::new(WindowSize::default());
        let mut spawner = FakeSpawner::new(pty.clone());
        spawner.delay = Duration::from_millis(150);
        let h = start(spawner, false);

        h.peer.channel.send(Payload::binary(b"early".to_vec())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.state(), SessionState::ProcessNotReady);
        assert!(pty.written().is_empty());

        eventually(|| !pty.written().is_empty()).await;
        assert_eq!(pty.written(), b"early");

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
    }

    #[tokio::test]
    async fn test_output_forwarded_until_exit() {
        let pty = FakePty::new(WindowSize::default());
        let mut h = start(FakeSpawner::new(pty.clone()), false);

        eventually(|| h.session.state() == SessionState::Ready).await;
        pty.emit(b"hello");
        pty.exit();

        assert!(finish(h.run).await.is_ok());
        assert_eq!(h.peer.events.recv().await, Some(ChannelEvent::Open));
        assert_eq!(
            h.peer.events.recv().await,
            Some(ChannelEvent::Message(Payload::binary(b"hello".to_vec())))
        );
        assert_eq!(
            h.peer.events.recv().await,
            Some(ChannelEvent::Message(Payload::quit()))
        );
    }

    #[tokio::test]
    async fn test_unmatched_ignored_by_default() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), false);

        h.peer.channel.send(Payload::text("garbage")).unwrap();
        h.peer.channel.send(Payload::binary(b"ok".to_vec())).unwrap();
        eventually(|| !pty.written().is_empty()).await;
        assert_eq!(pty.written(), b"ok");
        assert!(!h.session.completion().is_fired());

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
    }

    #[tokio::test]
    async fn test_unmatched_fatal_when_strict() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), true);

        h.peer.channel.send(Payload::text("garbage")).unwrap();
        match finish(h.run).await {
            Err(SessionError::UnmatchedMessage(raw)) => assert_eq!(raw, "garbage"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let pty = FakePty::new(WindowSize::default());
        let h = start(FakeSpawner::new(pty.clone()), false);

        eventually(|| h.session.state() == SessionState::Ready).await;
        h.peer.channel.close();
        assert!(matches!(finish(h.run).await, Err(SessionError::ChannelClosed)));
        assert!(pty.killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_failure_ends_session() {
        let pty = FakePty::new(WindowSize::default());
        let mut spawner = FakeSpawner::new(pty);
        spawner.fail = true;
        let h = start(spawner, false);

        assert!(matches!(
            finish(h.run).await,
            Err(SessionError::Pty(PtyError::Spawn { .. }))
        ));
    }

    #[tokio::test]
    async fn test_interactive_host_echoes_and_forwards_keystrokes() {
        let pty = FakePty::new(WindowSize::default());
        let spawner = FakeSpawner::new(pty.clone());
        let spawned_size = spawner.spawned_size.clone();
        let sink = SharedSink::default();
        let local_size = WindowSize {
            rows: 30,
            cols: 100,
            x: 0,
            y: 0,
        };
        let local = LocalTerminal {
            input: Box::new(io::Cursor::new(b"whoami\r".to_vec())),
            output: Box::new(sink.clone()),
            window_size: Arc::new(move || Some(local_size)),
            raw_mode: false,
        };
        let mut h = start_with(spawner, options(false, false), local);

        eventually(|| pty.written() == b"whoami\r").await;
        assert_eq!(*spawned_size.lock(), Some(local_size));

        pty.emit(b"alice\r\n");
        pty.exit();
        assert!(finish(h.run).await.is_ok());

        let echoed = String::from_utf8_lossy(&sink.0.lock()).into_owned();
        assert!(echoed.starts_with("\x1b[2J"));
        assert!(echoed.ends_with("alice\r\n"));
        assert_eq!(h.peer.events.recv().await, Some(ChannelEvent::Open));
        assert_eq!(
            h.peer.events.recv().await,
            Some(ChannelEvent::Message(Payload::binary(b"alice\r\n".to_vec())))
        );
    }

    #[test]
    fn test_session_ending_during_spawn_leaves_terminal_alone() {
        let pty = FakePty::new(WindowSize::default());
        let spawner = Arc::new(FakeSpawner::new(pty.clone()));
        let (host, _peer) = memory::pair();
        let local = LocalTerminal {
            raw_mode: true,
            ..idle_terminal()
        };
        let session = HostSession::with_terminal(options(false, false), host.channel, spawner.clone(), local);
        *spawner.end_during_spawn.lock() = Some(session.completion.clone());

        assert!(session.start_process().is_ok());
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
        assert!(pty.killed.load(Ordering::SeqCst));
        assert_ne!(session.state(), SessionState::Ready);
        // Raw mode was never entered, so there is nothing to restore.
        assert!(!session.terminal.restore().unwrap());
    }

    #[tokio::test]
    async fn test_stalled_pty_write_keeps_runtime_responsive() {
        let pty = FakePty::new(WindowSize::default());
        let (release, gate) = mpsc::channel();
        *pty.write_gate.lock() = Some(gate);
        let h = start(FakeSpawner::new(pty.clone()), false);

        let sent = std::time::Instant::now();
        h.peer.channel.send(Payload::binary(b"a".to_vec())).unwrap();
        eventually(|| pty.write_gate.lock().is_none()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pty.written().is_empty());

        release.send(()).unwrap();
        eventually(|| pty.written() == b"a").await;
        assert!(sent.elapsed() < Duration::from_secs(4));

        h.peer.channel.send(Payload::quit()).unwrap();
        assert!(finish(h.run).await.is_ok());
    }
}
