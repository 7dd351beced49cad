//! PTY-backed process session using portable-pty.
//!
//! One `PtySession` owns exactly one spawned process attached to a
//! pseudo-terminal. Output and exit are exposed as explicit event channels
//! rather than stored callbacks: `spawn` returns the session handle plus a
//! `SessionEvents` pair the owner consumes. Nothing outside this type may
//! signal or write to the process.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use ptycast_core::{CastError, CastResult};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Grace interval between the interrupt byte and the hard kill.
pub const STOP_GRACE: Duration = Duration::from_millis(150);

/// Delay before the out-of-band process-tree kill on platforms where a
/// single kill does not reach the whole group.
pub const HARD_KILL_DELAY: Duration = Duration::from_millis(100);

/// Read size for the blocking PTY reader.
const READ_BUFFER_SIZE: usize = 4096;

/// Interrupt control byte written at the start of a stop (Ctrl-C).
const INTERRUPT_BYTE: u8 = 0x03;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyDimensions {
    pub cols: u16,
    pub rows: u16,
}

/// Timings for the two-phase stop sequence. Tests shrink these to zero to
/// drive the full sequence without real waits.
#[derive(Debug, Clone, Copy)]
pub struct StopTimings {
    pub grace: Duration,
    pub hard_kill_delay: Duration,
}

impl Default for StopTimings {
    fn default() -> Self {
        Self {
            grace: STOP_GRACE,
            hard_kill_delay: HARD_KILL_DELAY,
        }
    }
}

/// Event streams produced by a spawned session: each output chunk in arrival
/// order, and a one-shot exit notification.
pub struct SessionEvents {
    pub output: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<u32>,
}

/// A process attached to a pseudo-terminal.
pub struct PtySession {
    /// The master side, kept for resize (Mutex because MasterPty is not Sync).
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    dims: Mutex<PtyDimensions>,
    /// Cleared by the waiter task once the process is no longer alive.
    alive: Arc<AtomicBool>,
    timings: StopTimings,
}

impl PtySession {
    /// Spawn `command args` on a fresh PTY sized `cols`x`rows`.
    ///
    /// `cwd` defaults to the server's working directory. On spawn failure the
    /// error propagates and nothing is left running. Must be called from a
    /// tokio runtime: the PTY reader and process waiter run on blocking
    /// threads and report through the returned [`SessionEvents`].
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: Option<&Path>,
        cols: u16,
        rows: u16,
        output_capacity: usize,
        timings: StopTimings,
    ) -> CastResult<(Self, SessionEvents)> {
        if command.is_empty() {
            return Err(CastError::Spawn("empty command".into()));
        }

        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| CastError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CastError::Spawn(format!("failed to spawn {command:?}: {e}")))?;

        let pid = child.process_id();
        info!(command, pid, cols, rows, "PTY spawned");

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CastError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CastError::Spawn(format!("failed to take PTY writer: {e}")))?;
        let killer = child.clone_killer();

        let alive = Arc::new(AtomicBool::new(true));

        // Reader: blocking loop, one chunk per read, in arrival order. Ends
        // at EOF (process gone) or when the receiving side is dropped.
        let (output_tx, output_rx) = mpsc::channel::<String>(output_capacity.max(1));
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if output_tx.blocking_send(chunk).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("PTY reader ended");
        });

        // Waiter: resolves the exit event exactly once, however the process
        // terminates, and clears the liveness flag first.
        let (exit_tx, exit_rx) = oneshot::channel::<u32>();
        let alive_flag = alive.clone();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code(),
                Err(e) => {
                    warn!(error = %e, "PTY child wait failed");
                    u32::MAX
                }
            };
            alive_flag.store(false, Ordering::SeqCst);
            debug!(code, "PTY child exited");
            let _ = exit_tx.send(code);
        });

        let session = Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            pid,
            dims: Mutex::new(PtyDimensions { cols, rows }),
            alive,
            timings,
        };
        let events = SessionEvents {
            output: output_rx,
            exit: exit_rx,
        };
        Ok((session, events))
    }

    /// Whether the process has not yet been observed to exit.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn dimensions(&self) -> PtyDimensions {
        self.dims
            .lock()
            .map(|d| *d)
            .unwrap_or(PtyDimensions { cols: 0, rows: 0 })
    }

    /// Forward raw bytes to the process input. No-op once the process died.
    pub fn write(&self, data: &[u8]) -> CastResult<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CastError::Other("PTY writer lock poisoned".into()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Update stored dimensions and propagate them to the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> CastResult<()> {
        {
            let mut dims = self
                .dims
                .lock()
                .map_err(|_| CastError::Other("PTY dims lock poisoned".into()))?;
            *dims = PtyDimensions { cols, rows };
        }
        let master = self
            .master
            .lock()
            .map_err(|_| CastError::Other("PTY master lock poisoned".into()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CastError::Other(format!("PTY resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    /// Best-effort two-phase shutdown: interrupt byte, grace interval, hard
    /// kill, and with `force` on Windows a delayed out-of-band kill of the
    /// whole process tree. Idempotent; the grace wait never blocks the
    /// runtime.
    pub async fn stop(&self, force: bool) {
        if !self.is_alive() {
            return;
        }

        let _ = self.write(&[INTERRUPT_BYTE]);
        tokio::time::sleep(self.timings.grace).await;

        if self.is_alive() {
            if let Ok(mut killer) = self.killer.lock() {
                if let Err(e) = killer.kill() {
                    debug!(error = %e, "PTY kill failed");
                }
            }
        }

        if force && self.is_alive() {
            #[cfg(windows)]
            if let Some(pid) = self.pid {
                tokio::time::sleep(self.timings.hard_kill_delay).await;
                let _ = tokio::process::Command::new("taskkill")
                    .args(["/PID", &pid.to_string(), "/T", "/F"])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .spawn();
            }
        }
    }
}
