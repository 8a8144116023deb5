//! CLI-over-SSH driver.
//!
//! Commands are framed with `configure terminal` / `end` and typed into an
//! interactive shell one line at a time. Shells come from a bounded
//! per-switch pool; a failed run is retried on a fresh shell after a
//! random back-off.

pub mod client;
pub mod pool;
pub mod shell;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use nos_fabric_common::{FabricError, FabricResult, Interface, SwitchConnection, VlanId};

use crate::cli::{self, CliDialect};
use crate::driver::{DriverContext, NosDriver};
use crate::membership::{plan_disable, plan_enable};

pub use pool::{PooledShell, RetryPolicy, ShellPool, MAX_SESSIONS};
pub use shell::{ends_with_prompt, RusshShellConnector, ShellConnector, ShellSession};

/// [`NosDriver`] typing CLI into an SSH shell.
pub struct SshDriver {
    ctx: DriverContext,
    connector: Arc<dyn ShellConnector>,
    pools: DashMap<String, Arc<ShellPool>>,
    retry: RetryPolicy,
}

impl SshDriver {
    pub fn new(ctx: DriverContext) -> Self {
        let connector = Arc::new(RusshShellConnector::new(ctx.timeouts.clone()));
        Self::with_connector(ctx, connector)
    }

    pub fn with_connector(ctx: DriverContext, connector: Arc<dyn ShellConnector>) -> Self {
        let retry = RetryPolicy::new(ctx.timeouts.ssh_attempts);
        Self {
            ctx,
            connector,
            pools: DashMap::new(),
            retry,
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn pool(&self, switch: &str) -> Arc<ShellPool> {
        self.pools
            .entry(switch.to_string())
            .or_insert_with(|| Arc::new(ShellPool::new(switch, MAX_SESSIONS)))
            .clone()
    }

    /// Runs a configuration snippet, retrying on a fresh shell.
    async fn exec_cfg_session(&self, switch: &str, snippet: &str) -> FabricResult<()> {
        let text = cli::config_session(snippet);
        let conn = self.ctx.switch(switch)?;
        let pool = self.pool(switch);
        debug!(switch, commands = %text, "CLI session");

        let mut last = None;
        for attempt in 1..=self.retry.attempts {
            match self.run_once(&pool, conn, switch, &text).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(switch, attempt, error = %err, "CLI session failed");
                    last = Some(err);
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.backoff()).await;
                    }
                }
            }
        }

        let err = match last {
            Some(err) if err.is_connectivity() => err,
            Some(err) => FabricError::config_failed(switch, text.clone(), err),
            None => FabricError::config_failed(switch, text.clone(), "not attempted"),
        };
        error!(switch, error = %err, "Giving up on CLI session");
        Err(err)
    }

    async fn run_once(
        &self,
        pool: &ShellPool,
        conn: &SwitchConnection,
        switch: &str,
        text: &str,
    ) -> FabricResult<()> {
        let mut shell = pool.acquire(self.connector.as_ref(), conn).await?;
        for line in text.lines() {
            let sent = shell
                .session()
                .send_line(line, self.ctx.timeouts.prompt())
                .await;
            if let Err(err) = sent {
                pool.discard(shell).await;
                return Err(err);
            }
        }
        pool.release(shell).await;
        debug!(switch, "CLI session done");
        Ok(())
    }

    fn dialect(&self, switch: &str) -> FabricResult<CliDialect> {
        Ok(self.ctx.switch(switch)?.os.into())
    }
}

#[async_trait]
impl NosDriver for SshDriver {
    fn name(&self) -> &'static str {
        "ssh"
    }

    #[instrument(skip(self))]
    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        let snippet = format!(
            "{}\n{}",
            cli::vlan_create(vlan_id, vlan_name),
            cli::vlan_no_shutdown(vlan_id)
        );
        self.exec_cfg_session(switch, &snippet).await
    }

    #[instrument(skip(self))]
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        self.exec_cfg_session(switch, &cli::vlan_delete(vlan_id)).await
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let first = self.ctx.is_first_vlan(switch, interface).await?;
        let current = self.ctx.prior_membership(switch, interface, vlan_id).await?;
        let plan = plan_enable(&current, vlan_id, first);
        match cli::interface_membership(self.dialect(switch)?, interface, &plan) {
            Some(snippet) => self.exec_cfg_session(switch, &snippet).await,
            None => Ok(()),
        }
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let current = self.ctx.stored_membership(switch, interface, vlan_id).await?;
        let plan = plan_disable(&current, vlan_id, switch, &interface.port_id())?;
        match cli::interface_membership(self.dialect(switch)?, interface, &plan) {
            Some(snippet) => self.exec_cfg_session(switch, &snippet).await,
            None => Ok(()),
        }
    }
}
