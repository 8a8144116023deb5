//! Bounded per-switch shell pool and the executor retry policy.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use nos_fabric_common::{FabricError, FabricResult, SwitchConnection};

use super::shell::{ShellConnector, ShellSession};

/// Concurrent shells per switch.
pub const MAX_SESSIONS: usize = 5;

/// A shell checked out of a [`ShellPool`].
///
/// Hand it back with [`ShellPool::release`] after success or
/// [`ShellPool::discard`] after a failure.
pub struct PooledShell {
    session: Box<dyn ShellSession>,
    _permit: OwnedSemaphorePermit,
}

impl PooledShell {
    pub fn session(&mut self) -> &mut dyn ShellSession {
        self.session.as_mut()
    }
}

pub struct ShellPool {
    switch: String,
    idle: Mutex<Vec<Box<dyn ShellSession>>>,
    permits: Arc<Semaphore>,
}

impl ShellPool {
    pub fn new(switch: impl Into<String>, max_sessions: usize) -> Self {
        Self {
            switch: switch.into(),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_sessions)),
        }
    }

    /// Waits for a free slot, then hands out an idle live shell or opens
    /// a new one. Idle shells whose transport died are discarded.
    pub async fn acquire(
        &self,
        connector: &dyn ShellConnector,
        conn: &SwitchConnection,
    ) -> FabricResult<PooledShell> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FabricError::connect_failed(self.switch.clone(), "shell pool closed"))?;

        loop {
            let idle = self.idle.lock().await.pop();
            let Some(mut session) = idle else { break };
            if session.is_alive() {
                return Ok(PooledShell {
                    session,
                    _permit: permit,
                });
            }
            debug!(switch = %self.switch, "Discarding dead shell");
            session.close().await;
        }

        let session = connector.open(&self.switch, conn).await?;
        Ok(PooledShell {
            session,
            _permit: permit,
        })
    }

    /// Returns a shell for reuse.
    pub async fn release(&self, shell: PooledShell) {
        let PooledShell { mut session, _permit } = shell;
        if session.is_alive() {
            self.idle.lock().await.push(session);
        } else {
            session.close().await;
        }
    }

    /// Closes a shell whose last command failed; it is never reused.
    pub async fn discard(&self, shell: PooledShell) {
        let PooledShell { mut session, _permit } = shell;
        debug!(switch = %self.switch, "Closing failed shell");
        session.close().await;
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}

/// Attempts and random back-off between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// A random delay in `[min_backoff, max_backoff]`.
    pub fn backoff(&self) -> Duration {
        if self.max_backoff <= self.min_backoff {
            return self.min_backoff;
        }
        let secs = rand::thread_rng()
            .gen_range(self.min_backoff.as_secs_f64()..=self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
