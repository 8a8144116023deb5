//! NETCONF 1.0 sessions over the SSH `netconf` subsystem.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

use nos_fabric_common::{FabricError, FabricResult, SwitchConnection, TimeoutConfig};

use crate::ssh::client::{open_channel, ChannelKind, SshChannel};

/// End-of-message marker of NETCONF 1.0 framing.
pub const FRAME_END: &str = "]]>]]>";

const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

static ERROR_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?error-message[^>]*>(.*?)</(?:\w+:)?error-message>")
        .expect("Invalid regex pattern")
});

static RPC_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?rpc-error[\s>]").expect("Invalid regex pattern"));

/// A live management session to one switch.
#[async_trait]
pub trait NetconfSession: Send {
    /// True while the underlying transport is up.
    fn is_connected(&self) -> bool;

    /// Runs `<edit-config>` against the running datastore.
    ///
    /// An `<rpc-error>` reply is returned as `ConfigFailed` carrying the
    /// device's error message.
    async fn edit_config(&mut self, config: &str) -> FabricResult<()>;

    /// Ends the session before it is dropped.
    async fn close(&mut self) {}
}

/// Opens sessions.
#[async_trait]
pub trait NetconfConnector: Send + Sync {
    async fn connect(
        &self,
        switch: &str,
        conn: &SwitchConnection,
    ) -> FabricResult<Box<dyn NetconfSession>>;
}

fn client_hello() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><hello xmlns="{}"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>{}"#,
        BASE_NS, FRAME_END
    )
}

/// Builds an `<edit-config>` RPC targeting the running datastore.
pub fn edit_config_rpc(message_id: u64, config: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rpc message-id="{}" xmlns="{}"><edit-config><target><running/></target>{}</edit-config></rpc>{}"#,
        message_id, BASE_NS, config, FRAME_END
    )
}

/// Extracts the failure from an `<rpc-reply>`, if it carries one.
pub fn rpc_reply_error(reply: &str) -> Option<String> {
    if !RPC_ERROR.is_match(reply) {
        return None;
    }
    let messages: Vec<String> = ERROR_MESSAGE
        .captures_iter(reply)
        .map(|c| c[1].trim().to_string())
        .collect();
    if messages.is_empty() {
        Some(reply.trim_end_matches(FRAME_END).trim().to_string())
    } else {
        Some(messages.join("; "))
    }
}

/// [`NetconfSession`] on a russh channel.
pub struct RusshNetconfSession {
    switch: String,
    channel: SshChannel,
    timeouts: TimeoutConfig,
    message_id: u64,
}

impl RusshNetconfSession {
    async fn exchange(&mut self, message: &str) -> FabricResult<String> {
        self.channel.send(&self.switch, message.as_bytes()).await?;
        self.channel
            .read_until(&self.switch, self.timeouts.request(), |text| {
                text.contains(FRAME_END)
            })
            .await
    }
}

#[async_trait]
impl NetconfSession for RusshNetconfSession {
    fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    async fn edit_config(&mut self, config: &str) -> FabricResult<()> {
        self.message_id += 1;
        let rpc = edit_config_rpc(self.message_id, config);
        let reply = self.exchange(&rpc).await?;
        match rpc_reply_error(&reply) {
            Some(reason) => Err(FabricError::config_failed(
                self.switch.clone(),
                config,
                reason,
            )),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.channel.close(&self.switch).await;
    }
}

/// Connects over SSH and exchanges hellos.
pub struct RusshNetconfConnector {
    timeouts: TimeoutConfig,
}

impl RusshNetconfConnector {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl NetconfConnector for RusshNetconfConnector {
    #[instrument(skip(self, conn))]
    async fn connect(
        &self,
        switch: &str,
        conn: &SwitchConnection,
    ) -> FabricResult<Box<dyn NetconfSession>> {
        let channel = open_channel(switch, conn, &self.timeouts, ChannelKind::Netconf).await?;
        let mut session = RusshNetconfSession {
            switch: switch.to_string(),
            channel,
            timeouts: self.timeouts.clone(),
            message_id: 0,
        };
        // the server hello arrives unsolicited
        let server_hello = session.exchange(&client_hello()).await?;
        debug!(switch, bytes = server_hello.len(), "NETCONF hello exchanged");
        Ok(Box::new(session))
    }
}
