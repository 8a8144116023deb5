//! SSH connection setup shared by the NETCONF and shell transports.

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use nos_fabric_common::{FabricError, FabricResult, SwitchConnection, TimeoutConfig};

/// Client handler. Switch host keys are not pinned.
pub struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH connection with one open session channel.
pub struct SshChannel {
    pub handle: Handle<AcceptAnyHostKey>,
    pub channel: Channel<Msg>,
}

impl SshChannel {
    /// True while the transport is up.
    pub fn is_open(&self) -> bool {
        !self.handle.is_closed()
    }

    /// Sends raw bytes on the channel.
    pub async fn send(&mut self, switch: &str, bytes: &[u8]) -> FabricResult<()> {
        self.channel
            .data(bytes)
            .await
            .map_err(|e| FabricError::connect_failed(switch, e))
    }

    /// Reads from the channel until `done` accepts the accumulated text.
    ///
    /// Fails if the channel closes first or `timeout` elapses.
    pub async fn read_until(
        &mut self,
        switch: &str,
        timeout: Duration,
        done: impl Fn(&str) -> bool,
    ) -> FabricResult<String> {
        let mut buffer = String::new();
        let read = async {
            loop {
                match self.channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        buffer.push_str(&String::from_utf8_lossy(&data));
                        if done(&buffer) {
                            return Ok(());
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        return Err(FabricError::connect_failed(switch, "channel closed"));
                    }
                    Some(_) => {}
                }
            }
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| FabricError::timeout(switch, "SSH read", timeout))??;
        Ok(buffer)
    }

    /// Disconnects; a failure only means the peer is already gone.
    pub async fn close(&self, switch: &str) {
        if let Err(err) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(switch, error = %err, "SSH disconnect failed");
        }
    }
}

/// What to start on the session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// The `netconf` subsystem
    Netconf,
    /// An interactive shell on a pseudo terminal
    Shell,
}

/// Connects, authenticates with the switch's password and opens a channel.
#[instrument(skip(conn, timeouts))]
pub async fn open_channel(
    switch: &str,
    conn: &SwitchConnection,
    timeouts: &TimeoutConfig,
    kind: ChannelKind,
) -> FabricResult<SshChannel> {
    let config = Arc::new(client::Config {
        keepalive_interval: Some(timeouts.keepalive()),
        inactivity_timeout: None,
        ..Default::default()
    });

    let setup = async {
        let mut handle = client::connect(config, (switch, conn.ssh_port), AcceptAnyHostKey)
            .await
            .map_err(|e| FabricError::connect_failed(switch, e))?;

        let authenticated = handle
            .authenticate_password(conn.username.as_str(), conn.password.expose())
            .await
            .map_err(|e| FabricError::connect_failed(switch, e))?;
        if !authenticated {
            return Err(FabricError::connect_failed(
                switch,
                format!("authentication rejected for user {}", conn.username),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| FabricError::connect_failed(switch, e))?;
        match kind {
            ChannelKind::Netconf => channel.request_subsystem(true, "netconf").await,
            ChannelKind::Shell => {
                channel
                    .request_pty(false, "vt100", 511, 24, 0, 0, &[])
                    .await
                    .map_err(|e| FabricError::connect_failed(switch, e))?;
                channel.request_shell(true).await
            }
        }
        .map_err(|e| FabricError::connect_failed(switch, e))?;

        debug!(switch, port = conn.ssh_port, ?kind, "SSH channel open");
        Ok(SshChannel { handle, channel })
    };

    tokio::time::timeout(timeouts.connect(), setup)
        .await
        .map_err(|_| FabricError::timeout(switch, "SSH connect", timeouts.connect()))?
}
