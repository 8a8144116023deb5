//! Interactive CLI shells.
//!
//! A shell has no exit status: a command is considered done once the
//! accumulated output ends in a prompt. Errors the CLI prints are not
//! detected.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::trace;

use nos_fabric_common::{FabricResult, SwitchConnection, TimeoutConfig};

use super::client::{open_channel, ChannelKind, SshChannel};

static PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#>]\s*$").expect("Invalid regex pattern"));

/// True when `output` ends in a CLI prompt (`#` or `>`).
pub fn ends_with_prompt(output: &str) -> bool {
    PROMPT.is_match(output)
}

/// One interactive shell.
#[async_trait]
pub trait ShellSession: Send {
    /// True while the transport is up.
    fn is_alive(&self) -> bool;

    /// Sends one line and waits for the prompt; returns the echoed output.
    async fn send_line(&mut self, line: &str, prompt_timeout: Duration) -> FabricResult<String>;

    /// Ends the shell before it is dropped.
    async fn close(&mut self) {}
}

/// Opens shells.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn open(&self, switch: &str, conn: &SwitchConnection) -> FabricResult<Box<dyn ShellSession>>;
}

pub struct RusshShell {
    switch: String,
    channel: SshChannel,
}

#[async_trait]
impl ShellSession for RusshShell {
    fn is_alive(&self) -> bool {
        self.channel.is_open()
    }

    async fn send_line(&mut self, line: &str, prompt_timeout: Duration) -> FabricResult<String> {
        self.channel
            .send(&self.switch, format!("{}\n", line).as_bytes())
            .await?;
        let output = self
            .channel
            .read_until(&self.switch, prompt_timeout, ends_with_prompt)
            .await?;
        trace!(switch = %self.switch, line, output = %output, "CLI line done");
        Ok(output)
    }

    async fn close(&mut self) {
        self.channel.close(&self.switch).await;
    }
}

/// Opens a pty shell over SSH and waits for the first prompt.
pub struct RusshShellConnector {
    timeouts: TimeoutConfig,
}

impl RusshShellConnector {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl ShellConnector for RusshShellConnector {
    async fn open(&self, switch: &str, conn: &SwitchConnection) -> FabricResult<Box<dyn ShellSession>> {
        let mut channel = open_channel(switch, conn, &self.timeouts, ChannelKind::Shell).await?;
        channel
            .read_until(switch, self.timeouts.prompt(), ends_with_prompt)
            .await?;
        Ok(Box::new(RusshShell {
            switch: switch.to_string(),
            channel,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_detection() {
        assert!(ends_with_prompt("configure terminal\r\nswitch(config)#"));
        assert!(ends_with_prompt("switch> "));
        assert!(ends_with_prompt("switch(config-if)# \r\n"));
        assert!(!ends_with_prompt("Password:"));
        assert!(!ends_with_prompt("vlan 100\r\n"));
    }
}
