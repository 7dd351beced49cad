//! Single-session lifecycle management.
//!
//! The manager is the global single-writer gate over the one PTY session: it
//! enforces single-flight start/stop, owns the bounded replay history, and
//! fans sanitized output out to subscribers through a broadcast stream.

use super::history::HistoryBuffer;
use super::pty::{PtyDimensions, PtySession, SessionEvents, StopTimings};
use ptycast_core::{strip_device_attributes, CastError, CastResult, SessionStatus};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Notice fanned out to listeners when the process terminates. Never stored
/// in history: replay stays a pure transcript of process output.
const EXIT_NOTICE: &str = "\r\n[Process exited]\r\n";

/// How long `stop` keeps confirming process death before giving up on the
/// liveness flag and freeing the slot anyway.
const DEATH_CONFIRM_TIMEOUT: Duration = Duration::from_millis(500);
const DEATH_CONFIRM_POLL: Duration = Duration::from_millis(10);

/// Parameters for starting a session.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

/// What a successful start reports back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct StartInfo {
    pub session_id: String,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportedDimensions {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// Live status, computed on request.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    pub pid: Option<u32>,
    pub uptime_seconds: u64,
    pub dimensions: ReportedDimensions,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
}

struct ManagerState {
    session: Option<Arc<PtySession>>,
    session_id: Option<String>,
    started_at: Option<Instant>,
    cwd: Option<PathBuf>,
    history: HistoryBuffer,
    /// Bumped on every successful start; a stale output pump stops touching
    /// history (and suppresses its exit notice) once its epoch is behind.
    epoch: u64,
}

/// Owns the single active session, its replay history, and the output fan-out.
pub struct SessionManager {
    state: Arc<Mutex<ManagerState>>,
    output_tx: broadcast::Sender<String>,
    output_queue: usize,
    timings: StopTimings,
}

impl SessionManager {
    pub fn new(history_max_bytes: usize, history_max_chunks: usize, output_queue: usize) -> Self {
        Self::with_stop_timings(
            history_max_bytes,
            history_max_chunks,
            output_queue,
            StopTimings::default(),
        )
    }

    /// Construction with explicit stop timings, for tests that drive the
    /// shutdown sequence without real waits.
    pub fn with_stop_timings(
        history_max_bytes: usize,
        history_max_chunks: usize,
        output_queue: usize,
        timings: StopTimings,
    ) -> Self {
        let (output_tx, _) = broadcast::channel(output_queue.max(1));
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                session: None,
                session_id: None,
                started_at: None,
                cwd: None,
                history: HistoryBuffer::new(history_max_bytes, history_max_chunks),
                epoch: 0,
            })),
            output_tx,
            output_queue,
            timings,
        }
    }

    /// Subscribe to the sanitized output stream (history append order). A
    /// lagging or dropped subscriber never affects the others.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.output_tx.subscribe()
    }

    /// Snapshot the replay history and subscribe to live output in one step,
    /// under the same lock the output pump appends under. Every chunk lands
    /// in exactly one of the two: already in the snapshot, or delivered on
    /// the returned stream.
    pub async fn attach(&self) -> (Vec<String>, broadcast::Receiver<String>) {
        let st = self.state.lock().await;
        (st.history.snapshot(), self.output_tx.subscribe())
    }

    /// Start a new session.
    ///
    /// Rejected with [`CastError::SessionAlreadyRunning`] while the current
    /// process is still observably alive, including during the stop grace
    /// window, so two processes can never be live under one manager. A
    /// present-but-dead session is reaped here. History is reset only once
    /// the new process actually spawned.
    pub async fn start(&self, opts: StartOptions) -> CastResult<StartInfo> {
        let mut st = self.state.lock().await;

        if let Some(existing) = &st.session {
            if existing.is_alive() {
                return Err(CastError::SessionAlreadyRunning);
            }
            st.session = None;
            st.session_id = None;
            st.started_at = None;
        }

        let (session, events) = PtySession::spawn(
            &opts.command,
            &opts.args,
            opts.cwd.as_deref(),
            opts.cols,
            opts.rows,
            self.output_queue,
            self.timings,
        )?;
        let session = Arc::new(session);

        st.history.clear();
        st.epoch += 1;
        let epoch = st.epoch;

        let session_id = generate_session_id();
        let pid = session.pid();
        st.session = Some(session);
        st.session_id = Some(session_id.clone());
        st.started_at = Some(Instant::now());
        st.cwd = opts.cwd.clone();
        drop(st);

        self.spawn_output_pump(epoch, events);

        info!(session_id = %session_id, pid, command = %opts.command, "session started");
        Ok(StartInfo {
            session_id,
            pid,
            cols: opts.cols,
            rows: opts.rows,
        })
    }

    /// Drive session output: sanitize, append to history, fan out. After the
    /// output stream drains (process EOF), fan out the exit notice.
    fn spawn_output_pump(&self, epoch: u64, events: SessionEvents) {
        let state = self.state.clone();
        let output_tx = self.output_tx.clone();
        tokio::spawn(async move {
            let SessionEvents { mut output, exit } = events;
            let mut stale = false;

            while let Some(chunk) = output.recv().await {
                let cleaned = strip_device_attributes(&chunk);
                if cleaned.is_empty() {
                    continue;
                }
                let cleaned = cleaned.into_owned();
                // Append and broadcast under the same lock `attach` snapshots
                // under, so a joiner sees each chunk exactly once.
                let mut st = state.lock().await;
                if st.epoch != epoch {
                    stale = true;
                    break;
                }
                st.history.push(cleaned.clone());
                let _ = output_tx.send(cleaned);
            }

            if !stale && exit.await.is_ok() {
                debug!("session output drained, announcing exit");
                let _ = output_tx.send(EXIT_NOTICE.to_string());
            }
        });
    }

    /// Stop the current session, if any. The slot and its identity free only
    /// once the process fails its liveness check, so a concurrent `start`
    /// mid-shutdown sees a conflict rather than a free slot, and a status
    /// probe during the grace window still reports a coherent running
    /// session.
    pub async fn stop(&self, force: bool) {
        let session = {
            let st = self.state.lock().await;
            match st.session.clone() {
                Some(s) => s,
                None => return,
            }
        };

        session.stop(force).await;

        let deadline = Instant::now() + DEATH_CONFIRM_TIMEOUT;
        while session.is_alive() && Instant::now() < deadline {
            tokio::time::sleep(DEATH_CONFIRM_POLL).await;
        }
        if session.is_alive() {
            warn!("process still alive after stop sequence");
        }

        let mut st = self.state.lock().await;
        if let Some(current) = &st.session {
            if Arc::ptr_eq(current, &session) {
                st.session = None;
                st.session_id = None;
                st.started_at = None;
            }
        }
        info!("session stopped");
    }

    /// Forward raw input to the live session; silently ignored otherwise.
    /// The PTY write can block on a full input buffer, so it happens after
    /// the manager lock is released.
    pub async fn write(&self, data: &str) {
        let session = {
            let st = self.state.lock().await;
            st.session.clone()
        };
        if let Some(session) = session {
            if session.is_alive() {
                if let Err(e) = session.write(data.as_bytes()) {
                    debug!(error = %e, "PTY write failed");
                }
            }
        }
    }

    /// Resize the session's terminal; dimensions stick even if the process
    /// already died, and the call is ignored with no session at all. The
    /// ioctl runs outside the manager lock.
    pub async fn resize(&self, cols: u16, rows: u16) {
        let session = {
            let st = self.state.lock().await;
            st.session.clone()
        };
        if let Some(session) = session {
            if let Err(e) = session.resize(cols, rows) {
                debug!(error = %e, "PTY resize failed");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        let st = self.state.lock().await;
        st.session.as_ref().is_some_and(|s| s.is_alive())
    }

    pub async fn status(&self) -> StatusReport {
        let st = self.state.lock().await;
        let running = st.session.as_ref().is_some_and(|s| s.is_alive());
        let pid = if running {
            st.session.as_ref().and_then(|s| s.pid())
        } else {
            None
        };
        let dimensions = match &st.session {
            Some(s) => {
                let PtyDimensions { cols, rows } = s.dimensions();
                ReportedDimensions {
                    cols: Some(cols),
                    rows: Some(rows),
                }
            }
            None => ReportedDimensions {
                cols: None,
                rows: None,
            },
        };
        let uptime_seconds = match (running, st.started_at) {
            (true, Some(at)) => at.elapsed().as_secs(),
            _ => 0,
        };

        StatusReport {
            status: if running {
                SessionStatus::Running
            } else {
                SessionStatus::Stopped
            },
            pid,
            uptime_seconds,
            dimensions,
            session_id: st.session_id.clone(),
            cwd: st.cwd.as_ref().map(|p| p.display().to_string()),
        }
    }

    /// Immutable copy of the replay history, oldest chunk first.
    pub async fn history_snapshot(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.history.snapshot()
    }

    /// Process-wide teardown: force-stop whatever is running.
    pub async fn shutdown(&self) {
        self.stop(true).await;
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
