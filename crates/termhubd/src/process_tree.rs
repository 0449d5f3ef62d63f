//! Advisory "does this shell have children?" query.
//!
//! Used to annotate `list-sessions` so a front end can warn before closing
//! a session with a running program. The answer is best-effort: a scan
//! that fails or exceeds its time budget reports unknown (`None`), never
//! `false`.
//!
//! # Async Safety
//!
//! The process table scan runs via `spawn_blocking`. At most one scan is in
//! flight at a time; a scan that outlives its timeout keeps its permit
//! until it finishes, so queries never pile up behind a slow `/proc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use termhub_core::SessionInfo;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Answers child-process queries under a time budget.
#[derive(Debug, Clone)]
pub struct ChildProbe {
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ChildProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scans the process table for `pids`.
    ///
    /// Returns `None` on timeout or failure; otherwise every requested pid
    /// is present in the map.
    pub async fn query(&self, pids: Vec<u32>) -> Option<HashMap<u32, bool>> {
        if pids.is_empty() {
            return Some(HashMap::new());
        }

        let permits = Arc::clone(&self.permits);
        let scan = async move {
            let permit = permits.acquire_owned().await.ok()?;
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                scan_children(&pids)
            })
            .await;
            match result {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!(error = %e, "Process scan task failed");
                    None
                }
            }
        };

        match timeout(self.timeout, scan).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "Process scan timed out");
                None
            }
        }
    }

    /// Fills in `has_child_processes` for every session.
    ///
    /// Dead sessions report `Some(false)`; sessions without a pid, or any
    /// alive session when the scan fails, report `None`.
    pub async fn annotate(&self, sessions: &mut [SessionInfo]) {
        let pids: Vec<u32> = sessions
            .iter()
            .filter(|s| s.alive)
            .filter_map(|s| s.pid)
            .collect();

        let children = self.query(pids).await;

        for session in sessions.iter_mut() {
            session.has_child_processes = if !session.alive {
                Some(false)
            } else {
                match (session.pid, &children) {
                    (Some(pid), Some(map)) => map.get(&pid).copied(),
                    _ => None,
                }
            };
        }
    }
}

/// Blocking scan: for each of `pids`, whether any process names it as
/// parent. Any descendant implies a direct child, so one level suffices.
pub fn scan_children(pids: &[u32]) -> HashMap<u32, bool> {
    let mut system = System::new();
    // Pid and parent only; no cpu, memory or disk stats
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

    let mut result: HashMap<u32, bool> = pids.iter().map(|&pid| (pid, false)).collect();
    for process in system.processes().values() {
        // Threads show up as tasks of their process, not as children
        if process.thread_kind().is_some() {
            continue;
        }
        let Some(parent) = process.parent() else {
            continue;
        };
        if let Some(has_children) = result.get_mut(&parent.as_u32()) {
            *has_children = true;
        }
    }
    result
}
