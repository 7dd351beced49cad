//! Terminal control operations: start, restart, stop, status.
//!
//! This is the surface a request-handling layer invokes. It fills defaults
//! from configuration, gates caller-supplied working directories through the
//! workspace allow-list, and announces state changes to every attached
//! observer. Conflict and spawn failures propagate to the caller; everything
//! else is best-effort.

use crate::server::connections::ConnectionManager;
use crate::session::{SessionManager, StartInfo, StartOptions, StatusReport};
use crate::workspace;
use ptycast_core::{CastError, CastResult, ServerMessage, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Defaults applied to start requests that leave fields unset.
#[derive(Debug, Clone)]
pub struct TerminalDefaults {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

/// A start/restart request with every field optional.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

pub struct TerminalControl {
    sessions: Arc<SessionManager>,
    connections: Arc<ConnectionManager>,
    defaults: TerminalDefaults,
    workspace_roots: Vec<PathBuf>,
}

impl TerminalControl {
    pub fn new(
        sessions: Arc<SessionManager>,
        connections: Arc<ConnectionManager>,
        defaults: TerminalDefaults,
        workspace_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            sessions,
            connections,
            defaults,
            workspace_roots,
        }
    }

    /// Start a session; rejects a disallowed cwd before anything spawns.
    pub async fn start(&self, req: StartRequest) -> CastResult<StartInfo> {
        if let Some(cwd) = &req.cwd {
            if !workspace::is_allowed_path(cwd, &self.workspace_roots) {
                return Err(CastError::PathNotAllowed(cwd.clone()));
            }
        }

        let opts = StartOptions {
            command: req
                .command
                .unwrap_or_else(|| self.defaults.command.clone()),
            args: if req.args.is_empty() {
                self.defaults.args.clone()
            } else {
                req.args
            },
            cwd: req.cwd,
            cols: req.cols.unwrap_or(self.defaults.cols),
            rows: req.rows.unwrap_or(self.defaults.rows),
        };

        let info = self.sessions.start(opts).await?;
        self.connections.broadcast(&ServerMessage::Status {
            status: SessionStatus::Running,
            pid: info.pid,
            message: Some("Process started".into()),
        });
        Ok(info)
    }

    /// Stop whatever is running, then start fresh with the given request.
    pub async fn restart(&self, req: StartRequest) -> CastResult<StartInfo> {
        if self.sessions.is_running().await {
            info!("restart requested while running, stopping first");
            self.stop(true).await;
        }
        self.start(req).await
    }

    /// Stop the session and announce it. A no-op stop still announces, so
    /// observers converge on the same state.
    pub async fn stop(&self, force: bool) {
        self.sessions.stop(force).await;
        self.connections.broadcast(&ServerMessage::Status {
            status: SessionStatus::Stopped,
            pid: None,
            message: Some("Process stopped".into()),
        });
    }

    pub async fn status(&self) -> StatusReport {
        self.sessions.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_with_roots(roots: Vec<PathBuf>) -> TerminalControl {
        let sessions = Arc::new(SessionManager::new(500_000, 2000, 200));
        let connections = ConnectionManager::new();
        TerminalControl::new(
            sessions,
            connections,
            TerminalDefaults {
                command: "sh".into(),
                args: vec!["-c".into(), "sleep 5".into()],
                cols: 80,
                rows: 24,
            },
            roots,
        )
    }

    #[tokio::test]
    async fn disallowed_cwd_is_rejected_before_spawn() {
        let ctl = control_with_roots(vec![]);
        let err = ctl
            .start(StartRequest {
                cwd: Some(std::env::temp_dir()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::PathNotAllowed(_)));
        assert!(matches!(
            ctl.status().await.status,
            SessionStatus::Stopped
        ));
    }

    #[tokio::test]
    async fn allowed_cwd_starts_with_defaults_filled() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = control_with_roots(vec![dir.path().to_path_buf()]);

        let info = ctl
            .start(StartRequest {
                cwd: Some(dir.path().to_path_buf()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(info.cols, 80);
        assert_eq!(info.rows, 24);

        let st = ctl.status().await;
        assert!(matches!(st.status, SessionStatus::Running));
        assert_eq!(st.session_id.as_deref(), Some(info.session_id.as_str()));

        ctl.stop(true).await;
    }

    #[tokio::test]
    async fn restart_replaces_the_running_session() {
        let ctl = control_with_roots(vec![]);
        let first = ctl.start(StartRequest::default()).await.unwrap();
        let second = ctl.restart(StartRequest::default()).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(matches!(
            ctl.status().await.status,
            SessionStatus::Running
        ));
        ctl.stop(true).await;
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let ctl = control_with_roots(vec![]);
        ctl.stop(false).await;
        assert!(matches!(
            ctl.status().await.status,
            SessionStatus::Stopped
        ));
    }
}
