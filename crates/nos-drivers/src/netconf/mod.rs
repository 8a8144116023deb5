//! NETCONF driver.
//!
//! Vendor CLI text is wrapped in an exec-configure envelope and pushed with
//! `<edit-config>`. One session is kept per switch and reused while its
//! transport reports itself connected; a dead session is replaced on the
//! next call.

pub mod session;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use nos_fabric_common::{FabricResult, Interface, VlanId};

use crate::cli::{self, CliDialect};
use crate::driver::{DriverContext, NosDriver};
use crate::membership::{plan_disable, plan_enable};

pub use session::{
    NetconfConnector, NetconfSession, RusshNetconfConnector, RusshNetconfSession,
};

/// Device errors a `no shutdown` on a new VLAN may raise although the VLAN
/// is already in the wanted state.
pub const NO_SHUTDOWN_IGNORABLE: &[&str] = &[
    "Can't modify state for extended",
    "Command is only allowed on VLAN",
];

/// Escapes text for an XML element body.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Wraps CLI text in the `<config>` envelope the switch executes in
/// configuration mode.
pub fn exec_config(cli_text: &str) -> String {
    format!(
        r#"<config xmlns:xc="urn:ietf:params:xml:ns:netconf:base:1.0"><configure><__XML__MODE__exec_configure>{}</__XML__MODE__exec_configure></configure></config>"#,
        xml_escape(cli_text)
    )
}

type SessionSlot = Arc<Mutex<Option<Box<dyn NetconfSession>>>>;

/// [`NosDriver`] speaking NETCONF over SSH.
pub struct NetconfDriver {
    ctx: DriverContext,
    connector: Arc<dyn NetconfConnector>,
    sessions: DashMap<String, SessionSlot>,
}

impl NetconfDriver {
    pub fn new(ctx: DriverContext) -> Self {
        let connector = Arc::new(RusshNetconfConnector::new(ctx.timeouts.clone()));
        Self::with_connector(ctx, connector)
    }

    pub fn with_connector(ctx: DriverContext, connector: Arc<dyn NetconfConnector>) -> Self {
        Self {
            ctx,
            connector,
            sessions: DashMap::new(),
        }
    }

    fn dialect(&self, switch: &str) -> FabricResult<CliDialect> {
        Ok(self.ctx.switch(switch)?.os.into())
    }

    /// Pushes `cli_text`, treating errors that contain any of `ignorable`
    /// as success.
    async fn edit_config(&self, switch: &str, cli_text: &str, ignorable: &[&str]) -> FabricResult<()> {
        let config = exec_config(cli_text);
        debug!(switch, config = %config, "edit-config");

        let slot = self.sessions.entry(switch.to_string()).or_default().clone();
        let mut guard = slot.lock().await;

        let session = match guard.take() {
            Some(session) if session.is_connected() => session,
            stale => {
                if let Some(mut stale) = stale {
                    info!(switch, "NETCONF session lost, reconnecting");
                    stale.close().await;
                }
                let conn = self.ctx.switch(switch)?;
                self.connector.connect(switch, conn).await?
            }
        };
        let session = guard.insert(session);

        match session.edit_config(&config).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = err.to_string();
                if let Some(matched) = ignorable.iter().find(|s| reason.contains(*s)) {
                    warn!(switch, matched, "Ignoring device error");
                    return Ok(());
                }
                if err.is_connectivity() {
                    if let Some(mut dead) = guard.take() {
                        dead.close().await;
                    }
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl NosDriver for NetconfDriver {
    fn name(&self) -> &'static str {
        "netconf"
    }

    #[instrument(skip(self))]
    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        self.edit_config(switch, &cli::vlan_create(vlan_id, vlan_name), &[])
            .await?;
        self.edit_config(switch, &cli::vlan_no_shutdown(vlan_id), NO_SHUTDOWN_IGNORABLE)
            .await
    }

    #[instrument(skip(self))]
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        self.edit_config(switch, &cli::vlan_delete(vlan_id), &[]).await
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
            Some(text) => self.edit_config(switch, &text, &[]).await,
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
            Some(text) => self.edit_config(switch, &text, &[]).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_binding_store::{BindingKey, BindingStore, MemoryBindingStore};
    use nos_fabric_common::{
        FabricError, OsFamily, Protocol, Secret, SwitchConnection, SwitchInventory,
        TimeoutConfig,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const SW: &str = "10.0.0.2";

    /// Records every config and rejects those containing a trigger.
    #[derive(Default)]
    struct FakeDevice {
        configs: StdMutex<Vec<String>>,
        connects: AtomicUsize,
        closes: AtomicUsize,
        alive: AtomicBool,
        reject: StdMutex<Vec<(String, String)>>,
    }

    impl FakeDevice {
        fn reject(&self, trigger: &str, message: &str) {
            self.reject
                .lock()
                .unwrap()
                .push((trigger.to_string(), message.to_string()));
        }

        fn configs(&self) -> Vec<String> {
            self.configs.lock().unwrap().clone()
        }
    }

    struct FakeSession(Arc<FakeDevice>);

    #[async_trait]
    impl NetconfSession for FakeSession {
        fn is_connected(&self) -> bool {
            self.0.alive.load(Ordering::SeqCst)
        }

        async fn edit_config(&mut self, config: &str) -> FabricResult<()> {
            let rejected = self
                .0
                .reject
                .lock()
                .unwrap()
                .iter()
                .find(|(trigger, _)| config.contains(trigger.as_str()))
                .map(|(_, message)| message.clone());
            if let Some(message) = rejected {
                return Err(FabricError::config_failed(SW, config, message));
            }
            self.0.configs.lock().unwrap().push(config.to_string());
            Ok(())
        }

        async fn close(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector(Arc<FakeDevice>);

    #[async_trait]
    impl NetconfConnector for FakeConnector {
        async fn connect(
            &self,
            _switch: &str,
            _conn: &SwitchConnection,
        ) -> FabricResult<Box<dyn NetconfSession>> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            self.0.alive.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    fn harness() -> (Arc<FakeDevice>, Arc<MemoryBindingStore>, NetconfDriver) {
        let mut inventory = SwitchInventory::new();
        inventory.insert(
            SW,
            SwitchConnection {
                username: "admin".to_string(),
                password: Secret::new("admin"),
                os: OsFamily::Enos,
                protocol: Some(Protocol::Netconf),
                ..Default::default()
            },
        );
        let device = Arc::new(FakeDevice::default());
        let store = Arc::new(MemoryBindingStore::new());
        let ctx = DriverContext::new(Arc::new(inventory), store.clone(), TimeoutConfig::default());
        let driver = NetconfDriver::with_connector(ctx, Arc::new(FakeConnector(device.clone())));
        (device, store, driver)
    }

    #[test]
    fn test_exec_config_envelope() {
        assert_eq!(
            exec_config("vlan 5\nname a&b\nexit"),
            "<config xmlns:xc=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><configure>\
             <__XML__MODE__exec_configure>vlan 5\nname a&amp;b\nexit\
             </__XML__MODE__exec_configure></configure></config>"
        );
    }

    #[tokio::test]
    async fn test_create_vlan_is_two_edits_on_one_session() {
        let (device, _, driver) = harness();
        driver.create_vlan(SW, 100, "q-100").await.unwrap();

        let configs = device.configs();
        assert_eq!(configs.len(), 2);
        assert!(configs[0].contains("vlan 100\nname q-100\nexit"));
        assert!(configs[1].contains("vlan 100\nno shutdown\nexit"));
        assert_eq!(device.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignorable_no_shutdown_error() {
        let (device, _, driver) = harness();
        device.reject("no shutdown", "Can't modify state for extended VLAN 4000");
        driver.create_vlan(SW, 4000, "q-4000").await.unwrap();
        assert_eq!(device.configs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let (device, _, driver) = harness();
        device.reject("name q-100", "Invalid VLAN name");
        let err = driver
            .create_and_trunk_vlan(SW, 100, "q-100", Some(&Interface::port("10")))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::ConfigFailed { .. }));
        assert!(err.to_string().contains("Invalid VLAN name"));

        let configs = device.configs();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].contains("no vlan 100"));
    }

    #[tokio::test]
    async fn test_dead_session_is_replaced() {
        let (device, _, driver) = harness();
        driver.delete_vlan(SW, 100).await.unwrap();
        driver.delete_vlan(SW, 101).await.unwrap();
        assert_eq!(device.connects.load(Ordering::SeqCst), 1);

        device.alive.store(false, Ordering::SeqCst);
        driver.delete_vlan(SW, 102).await.unwrap();
        assert_eq!(device.connects.load(Ordering::SeqCst), 2);
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_vlan_initializes_trunk() {
        let (device, store, driver) = harness();
        store
            .add_binding(&BindingKey::new("port:10", 100, SW, "vm-1"))
            .await
            .unwrap();
        driver
            .enable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();
        assert!(device.configs()[0].contains(
            "interface port 10\nswitchport mode trunk\nswitchport trunk native vlan 1\n\
             switchport trunk allowed vlan 1,100\nexit"
        ));
    }

    #[tokio::test]
    async fn test_second_vlan_appends() {
        let (device, store, driver) = harness();
        for (vlan, vm) in [(100, "vm-1"), (200, "vm-2")] {
            store
                .add_binding(&BindingKey::new("portchannel:3", vlan, SW, vm))
                .await
                .unwrap();
        }
        driver
            .enable_vlan_on_trunk_int(SW, 200, &Interface::port_channel("3"))
            .await
            .unwrap();
        assert!(device.configs()[0]
            .contains("interface portchannel 3\nswitchport trunk allowed vlan add 200\nexit"));
    }

    #[tokio::test]
    async fn test_disable_recomputes_mode() {
        let (device, _, driver) = harness();
        driver
            .disable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();
        assert!(device.configs()[0].contains(
            "switchport trunk allowed vlan remove 100\nswitchport mode access\n\
             switchport access vlan 1"
        ));
    }
}
