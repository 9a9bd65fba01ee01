//! Terminal sessions: a shell process attached to a pseudo-terminal
//!
//! The bridge talks to sessions through the [`Terminal`] and
//! [`TerminalSpawner`] traits. [`PtySpawner`] is the real implementation on
//! top of portable-pty.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use mt_core::SpawnError;
use mt_protocol::TerminalSize;

/// Environment every shell is started with, ahead of any configured extras
const BASE_ENV: &[(&str, &str)] = &[("TERM", "xterm")];

/// The program and arguments to run as the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    /// Build from a command line; empty means the platform default shell.
    ///
    /// The command line is split on whitespace, so `bash -l` runs bash with
    /// `-l`.
    pub fn resolve(command: Option<&str>, env: Vec<(String, String)>) -> Self {
        let mut words = command
            .map(|c| c.split_whitespace().map(String::from).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();

        let program = words.next().unwrap_or_else(default_shell);

        let mut full_env: Vec<(String, String)> = BASE_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        full_env.extend(env);

        Self {
            program,
            args: words.collect(),
            env: full_env,
        }
    }

    fn builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// `$SHELL`, then bash (`cmd.exe` on Windows)
fn default_shell() -> String {
    if cfg!(windows) {
        return "cmd.exe".to_string();
    }
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "bash".to_string())
}

/// A live shell session on a terminal device.
///
/// Methods take `&self` so the outbound pump can sit in a blocking `read`
/// while the inbound pump writes and resizes.
pub trait Terminal: Send + Sync {
    /// Process id of the shell
    fn pid(&self) -> Option<u32>;

    /// Blocking read of terminal output. `Ok(0)` means the device hung up.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` to the terminal
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Apply a window size
    fn resize(&self, size: TerminalSize) -> io::Result<()>;

    /// Current window size as reported by the device
    fn window_size(&self) -> io::Result<TerminalSize>;

    /// Close our end of the device
    fn close(&self);

    /// Kill the shell and reap it, returning its exit code
    fn kill(&self) -> io::Result<Option<u32>>;
}

/// Creates terminal sessions
pub trait TerminalSpawner: Send + Sync + 'static {
    fn spawn(
        &self,
        shell: &ShellCommand,
        size: TerminalSize,
    ) -> Result<Arc<dyn Terminal>, SpawnError>;
}

/// Spawns shells on native pseudo-terminals
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl TerminalSpawner for PtySpawner {
    fn spawn(
        &self,
        shell: &ShellCommand,
        size: TerminalSize,
    ) -> Result<Arc<dyn Terminal>, SpawnError> {
        Ok(Arc::new(PtyTerminal::spawn(shell, size)?))
    }
}

/// A shell running on a native PTY
pub struct PtyTerminal {
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl PtyTerminal {
    /// Open a PTY and start the shell on it
    pub fn spawn(shell: &ShellCommand, size: TerminalSize) -> Result<Self, SpawnError> {
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SpawnError::PtyAllocation(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(shell.builder())
            .map_err(|e| SpawnError::Process {
                shell: shell.program.clone(),
                reason: e.to_string(),
            })?;
        // Only the child holds the slave from here on, so its exit hangs up
        // the master and fails our read.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Handle(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Handle(e.to_string()))?;

        let pid = child.process_id();
        tracing::info!(
            "Spawned shell {} (pid {:?}) at {}x{}",
            shell.program,
            pid,
            size.cols,
            size.rows
        );

        Ok(Self {
            pid,
            master: Mutex::new(Some(pair.master)),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
        })
    }
}

impl Terminal for PtyTerminal {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.reader).read(buf)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        let writer = writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))?;
        writer.write_all(data)?;
        writer.flush()
    }

    fn resize(&self, size: TerminalSize) -> io::Result<()> {
        let master = lock(&self.master);
        let master = master
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))?;
        master.resize(pty_size(size)).map_err(io::Error::other)
    }

    fn window_size(&self) -> io::Result<TerminalSize> {
        let master = lock(&self.master);
        let master = master
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))?;
        let size = master.get_size().map_err(io::Error::other)?;
        Ok(TerminalSize::new(size.rows, size.cols))
    }

    fn close(&self) {
        lock(&self.writer).take();
        lock(&self.master).take();
    }

    fn kill(&self) -> io::Result<Option<u32>> {
        let mut child = lock(&self.child);
        if let Err(e) = child.kill() {
            // Already exited; wait() below still reaps it.
            tracing::debug!("Kill of pid {:?} failed: {}", self.pid, e);
        }
        let status = child.wait()?;
        Ok(Some(status.exit_code()))
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
