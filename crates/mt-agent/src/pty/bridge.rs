//! Terminal bridge
//!
//! Owns one shell session and pumps bytes between it and two bounded
//! queues. The inbound pump applies [`SessionMessage`]s to the terminal;
//! the outbound pump reads terminal output into the outbound queue. When the
//! shell dies, either pump replaces it with a fresh one (a reset) without
//! tearing the bridge down.
//!
//! # Resets
//!
//! Every session is tagged with a generation number. A pump that sees its
//! session fail asks for a reset of that generation; if the session has
//! already been replaced the request is dropped. The reset gate itself is a
//! `try_lock`, so a second reset that arrives while one is running is skipped
//! rather than queued.
//!
//! # Shutdown
//!
//! [`Bridge::close`] cancels the shutdown token, closes the device, kills and
//! reaps the shell, then waits for both pumps up to the shutdown deadline.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mt_core::config::{
    AgentConfig, BackoffConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use mt_core::SpawnError;
use mt_protocol::{SessionMessage, TerminalSize};

use super::terminal::{lock, PtySpawner, ShellCommand, Terminal, TerminalSpawner};
use crate::backoff::RetryDelay;

/// Recovery action reported after a successful reset
pub const RECOVERY_RESET: &str = "reset tty";

/// Recovery action reported when the replacement shell failed to start
pub const RECOVERY_RESET_FAILED: &str = "reset tty failed";

/// Longest single sleep of the outbound pump while it waits to retry
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Settings for a [`Bridge`]
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub shell: ShellCommand,
    pub size: TerminalSize,
    pub queue_capacity: usize,
    pub read_chunk_size: usize,
    pub shutdown_timeout: Duration,
    pub reset_backoff: BackoffConfig,
}

impl BridgeOptions {
    /// Options for a shell command line with everything else defaulted
    pub fn new(command: Option<&str>) -> Self {
        Self {
            shell: ShellCommand::resolve(command, vec![]),
            size: TerminalSize::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reset_backoff: BackoffConfig::reset(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            shell: ShellCommand::resolve(config.shell(), config.env.clone()),
            size: config.size,
            queue_capacity: config.queue_capacity,
            read_chunk_size: config.read_chunk_size,
            shutdown_timeout: config.shutdown_timeout,
            reset_backoff: config.reset_backoff.clone(),
        }
    }
}

/// Result of a reset request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// A new shell is installed
    Replaced,
    /// The new shell could not be started; no session is installed
    Failed,
    /// Nothing done: shutting down, another reset is running, or the failed
    /// session was already replaced
    Skipped,
}

/// How `close` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Both pumps stopped within the deadline
    Drained,
    /// The deadline passed first
    TimedOut,
}

/// The installed session and its generation
#[derive(Clone)]
struct Session {
    generation: u64,
    terminal: Arc<dyn Terminal>,
}

/// State shared by the bridge handle and both pumps
struct BridgeCore {
    spawner: Arc<dyn TerminalSpawner>,
    shell: ShellCommand,
    size: Mutex<TerminalSize>,
    session: RwLock<Option<Session>>,
    next_generation: AtomicU64,
    reset_gate: Mutex<()>,
    shutdown: CancellationToken,
}

impl BridgeCore {
    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap(&self, session: Option<Session>) -> Option<Session> {
        let mut slot = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, session)
    }

    /// Start a shell at the stored size, returning the size it got
    fn spawn_session(&self) -> Result<(Session, TerminalSize), SpawnError> {
        let size = *lock(&self.size);
        let terminal = self.spawner.spawn(&self.shell, size)?;
        let session = Session {
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            terminal,
        };
        Ok((session, size))
    }

    /// Replace the session of generation `failed` (or a missing session when
    /// `failed` is `None`) with a fresh shell.
    fn reset(&self, failed: Option<u64>) -> ResetOutcome {
        if self.shutdown.is_cancelled() {
            return ResetOutcome::Skipped;
        }
        let _gate = match self.reset_gate.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Reset already in progress, skipping");
                return ResetOutcome::Skipped;
            }
        };
        if self.shutdown.is_cancelled() {
            return ResetOutcome::Skipped;
        }
        if let Some(current) = self.current() {
            if Some(current.generation) != failed {
                tracing::debug!("Session {} is live, skipping reset", current.generation);
                return ResetOutcome::Skipped;
            }
        }

        tracing::info!("Resetting terminal...");
        if let Some(old) = self.swap(None) {
            retire(&old);
        }

        let (session, spawned_with) = match self.spawn_session() {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!("Terminal reset failed: {}", e);
                return ResetOutcome::Failed;
            }
        };

        let terminal = Arc::clone(&session.terminal);
        let generation = session.generation;
        self.swap(Some(session));

        // A resize may have landed while the shell was starting.
        let latest = *lock(&self.size);
        if latest != spawned_with {
            if let Err(e) = terminal.resize(latest) {
                tracing::warn!("Failed to reapply terminal size: {}", e);
            }
        }

        tracing::info!(
            "Terminal reset done (session {}, pid {:?}) rows: {} cols: {}",
            generation,
            terminal.pid(),
            latest.rows,
            latest.cols
        );
        ResetOutcome::Replaced
    }

    /// Write input to the current session; failure triggers a reset and the
    /// input is dropped.
    fn write(&self, data: &[u8]) {
        let Some(session) = self.current() else {
            tracing::warn!("No live terminal, dropping {} bytes of input", data.len());
            self.reset(None);
            return;
        };
        if let Err(e) = session.terminal.write(data) {
            if self.shutdown.is_cancelled() {
                return;
            }
            tracing::warn!("Writing to terminal failed: {}", e);
            self.reset(Some(session.generation));
        }
    }

    fn resize(&self, size: TerminalSize) {
        *lock(&self.size) = size;
        if let Some(session) = self.current() {
            if let Err(e) = session.terminal.resize(size) {
                tracing::warn!("Failed to resize terminal: {}", e);
                return;
            }
        }
        tracing::info!("Set terminal rows: {} cols: {}", size.rows, size.cols);
    }

    /// Recovery to report for `failed` when its reset lost the race to
    /// another one. Waits for that reset to finish first.
    fn settled_recovery(&self, failed: Option<u64>) -> &'static str {
        drop(lock(&self.reset_gate));
        match self.current() {
            Some(session) if Some(session.generation) != failed => RECOVERY_RESET,
            _ => RECOVERY_RESET_FAILED,
        }
    }

    /// Close the device and kill the shell for good
    fn teardown(&self) {
        // Wait out a reset that is already past its shutdown check.
        let _gate = lock(&self.reset_gate);
        if let Some(session) = self.swap(None) {
            retire(&session);
        }
    }

    /// Sleep up to `delay`, returning early on shutdown
    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.shutdown.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Close a session's device and kill its shell
fn retire(session: &Session) {
    session.terminal.close();
    match session.terminal.kill() {
        Ok(code) => tracing::debug!(
            "Session {} (pid {:?}) exited with {:?}",
            session.generation,
            session.terminal.pid(),
            code
        ),
        Err(e) => tracing::warn!(
            "Failed to reap session {} (pid {:?}): {}",
            session.generation,
            session.terminal.pid(),
            e
        ),
    }
}

/// A shell exposed through an inbound and an outbound message queue
pub struct Bridge {
    core: Arc<BridgeCore>,
    input: mpsc::Sender<SessionMessage>,
    output: Option<mpsc::Receiver<SessionMessage>>,
    pumps: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Bridge {
    /// Start a shell on a native PTY and begin pumping.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(options: BridgeOptions) -> Result<Self, SpawnError> {
        Self::with_spawner(options, Arc::new(PtySpawner))
    }

    /// Start a bridge whose sessions come from `spawner`
    pub fn with_spawner(
        options: BridgeOptions,
        spawner: Arc<dyn TerminalSpawner>,
    ) -> Result<Self, SpawnError> {
        let core = Arc::new(BridgeCore {
            spawner,
            shell: options.shell,
            size: Mutex::new(options.size),
            session: RwLock::new(None),
            next_generation: AtomicU64::new(0),
            reset_gate: Mutex::new(()),
            shutdown: CancellationToken::new(),
        });

        let (session, _) = core.spawn_session()?;
        core.swap(Some(session));

        let capacity = options.queue_capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);

        let reader = {
            let core = Arc::clone(&core);
            let chunk = options.read_chunk_size.max(1);
            let backoff = RetryDelay::from_config(&options.reset_backoff);
            tokio::task::spawn_blocking(move || read_terminal(core, output_tx, chunk, backoff))
        };
        let writer = tokio::spawn(write_terminal(Arc::clone(&core), input_rx));

        Ok(Self {
            core,
            input: input_tx,
            output: Some(output_rx),
            pumps: vec![reader, writer],
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    /// Sender for the inbound queue
    pub fn input(&self) -> mpsc::Sender<SessionMessage> {
        self.input.clone()
    }

    /// Take the receiver for the outbound queue
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<SessionMessage>> {
        self.output.take()
    }

    /// Last requested terminal size
    pub fn size(&self) -> TerminalSize {
        *lock(&self.core.size)
    }

    /// Window size reported by the live terminal, if there is one
    pub fn window_size(&self) -> Option<TerminalSize> {
        let session = self.core.current()?;
        match session.terminal.window_size() {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::debug!("Failed to query window size: {}", e);
                None
            }
        }
    }

    /// Process id of the live shell
    pub fn pid(&self) -> Option<u32> {
        self.core.current().and_then(|s| s.terminal.pid())
    }

    /// Whether a shell is currently installed
    pub fn is_live(&self) -> bool {
        self.core.current().is_some()
    }

    /// Replace the current shell with a fresh one
    pub fn reset(&self) -> ResetOutcome {
        let generation = self.core.current().map(|s| s.generation);
        self.core.reset(generation)
    }

    /// Stop the pumps, kill the shell and wait for the pumps to finish, giving
    /// up after the shutdown deadline.
    pub async fn close(mut self) -> CloseOutcome {
        tracing::info!("Stopping terminal bridge...");
        self.core.shutdown.cancel();

        let core = Arc::clone(&self.core);
        let teardown = tokio::task::spawn_blocking(move || core.teardown());
        let pumps = std::mem::take(&mut self.pumps);

        let drained = tokio::time::timeout(self.shutdown_timeout, async move {
            if let Err(e) = teardown.await {
                tracing::error!("Terminal teardown panicked: {}", e);
            }
            for result in futures::future::join_all(pumps).await {
                if let Err(e) = result {
                    tracing::error!("Bridge pump panicked: {}", e);
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("Terminal bridge stopped");
                CloseOutcome::Drained
            }
            Err(_) => {
                tracing::warn!(
                    "Terminal bridge stop timed out after {:?}, exiting anyway",
                    self.shutdown_timeout
                );
                CloseOutcome::TimedOut
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.core.shutdown.is_cancelled() {
            return;
        }
        tracing::debug!("Bridge dropped without close, stopping shell");
        self.core.shutdown.cancel();

        let core = Arc::clone(&self.core);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(move || core.teardown())),
            Err(_) => core.teardown(),
        }
    }
}

/// Inbound pump: apply queued messages to the terminal in order
async fn write_terminal(core: Arc<BridgeCore>, mut input: mpsc::Receiver<SessionMessage>) {
    loop {
        let message = tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => break,
            message = input.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            SessionMessage::Data(data) => {
                let core = Arc::clone(&core);
                if let Err(e) = tokio::task::spawn_blocking(move || core.write(&data)).await {
                    tracing::error!("Terminal write task failed: {}", e);
                }
            }
            SessionMessage::Resize(size) => core.resize(size),
            SessionMessage::Fault { error, .. } => {
                tracing::debug!("Ignoring fault on inbound queue: {}", error);
            }
        }
    }
    tracing::info!("Terminal write pump stopping...");
}

/// Outbound pump: read terminal output into the outbound queue
fn read_terminal(
    core: Arc<BridgeCore>,
    output: mpsc::Sender<SessionMessage>,
    chunk_size: usize,
    mut backoff: RetryDelay,
) {
    let mut buf = vec![0u8; chunk_size];
    // Generation whose failure has been reported but not yet replaced
    let mut dead: Option<u64> = None;

    while !core.shutdown.is_cancelled() {
        let live = core.current().filter(|s| Some(s.generation) != dead);
        let Some(session) = live else {
            match core.reset(dead) {
                ResetOutcome::Replaced => backoff.reset(),
                ResetOutcome::Failed | ResetOutcome::Skipped => core.pause(backoff.next_delay()),
            }
            continue;
        };

        let error = match session.terminal.read(&mut buf) {
            Ok(n) if n > 0 => {
                let message = SessionMessage::Data(Bytes::copy_from_slice(&buf[..n]));
                if output.blocking_send(message).is_err() {
                    tracing::trace!("Output queue closed, discarding terminal output");
                }
                continue;
            }
            Ok(_) => io::Error::new(io::ErrorKind::UnexpectedEof, "terminal hung up"),
            Err(e) => e,
        };

        if core.shutdown.is_cancelled() {
            break;
        }
        tracing::warn!("Reading terminal failed: {}", error);
        dead = Some(session.generation);

        let recovery = match core.reset(dead) {
            ResetOutcome::Replaced => {
                backoff.reset();
                RECOVERY_RESET
            }
            ResetOutcome::Failed => RECOVERY_RESET_FAILED,
            ResetOutcome::Skipped => core.settled_recovery(dead),
        };
        let fault = SessionMessage::fault(error.to_string(), recovery);
        if output.blocking_send(fault).is_err() {
            tracing::trace!("Output queue closed, discarding fault");
        }
    }
    tracing::info!("Terminal read pump stopping...");
}
