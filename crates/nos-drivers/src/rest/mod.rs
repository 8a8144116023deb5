//! REST driver for CNOS switches.
//!
//! VLANs are CRUD objects under `nos/api/cfg/vlan/`; an interface's bridge
//! port mode, PVID and member list live in one object under
//! `nos/api/cfg/vlan_interface/<ifname>`. Membership changes read that object,
//! plan the transition and write it back.
//!
//! Legacy firmware (`compat_mode`) expects the complete member list on
//! write. Newer firmware takes a list of `add`/`remove` operations.

pub mod client;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use url::form_urlencoded;

use nos_fabric_common::{FabricResult, Interface, InterfaceType, VlanId};

use crate::driver::{DriverContext, NosDriver};
use crate::membership::{plan_disable, plan_enable, MembershipPlan, PlanAction, PortMode, VlanMembership};

pub use client::{JsonDocument, RestClient, LOGIN_ATTEMPTS, LOGIN_OBJ};

pub const VLAN_OBJ: &str = "nos/api/cfg/vlan/";
pub const VLAN_IFACE_OBJ: &str = "nos/api/cfg/vlan_interface/";

/// Interface name as the REST API spells it.
pub fn rest_interface_name(interface: &Interface) -> String {
    match interface.kind {
        InterfaceType::Port => format!("Ethernet{}", interface.number),
        InterfaceType::PortChannel => format!("po{}", interface.number),
    }
}

fn interface_obj(if_name: &str) -> String {
    let escaped: String = form_urlencoded::byte_serialize(if_name.as_bytes()).collect();
    format!("{}{}", VLAN_IFACE_OBJ, escaped)
}

/// Reads mode, PVID and members out of a `vlan_interface` document.
pub fn membership_from_json(doc: &JsonDocument) -> FabricResult<VlanMembership> {
    let vlans = doc
        .field("vlans")?
        .as_array()
        .ok_or_else(|| doc.missing("vlans"))?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|v| VlanId::try_from(v).ok())
                .ok_or_else(|| doc.missing("vlans"))
        })
        .collect::<FabricResult<Vec<VlanId>>>()?;
    let pvid = doc
        .field("pvid")?
        .as_u64()
        .and_then(|v| VlanId::try_from(v).ok())
        .ok_or_else(|| doc.missing("pvid"))?;

    let mut membership = VlanMembership::new(pvid, vlans);
    match doc.json.get("bridgeport_mode").and_then(Value::as_str) {
        Some("access") => membership.mode = PortMode::Access,
        Some("trunk") => membership.mode = PortMode::Trunk,
        _ => {}
    }
    Ok(membership)
}

/// Request body moving an interface to `plan.after`.
pub fn membership_body(if_name: &str, plan: &MembershipPlan, full_list: bool) -> Value {
    let vlans: Vec<Value> = if full_list {
        plan.after.vlans.iter().map(|v| json!(v)).collect()
    } else {
        plan.removed()
            .into_iter()
            .map(|v| json!({"op": "remove", "vlan_id": v}))
            .chain(
                plan.added()
                    .into_iter()
                    .map(|v| json!({"op": "add", "vlan_id": v})),
            )
            .collect()
    };
    json!({
        "if_name": if_name,
        "bridgeport_mode": plan.after.mode.as_str(),
        "pvid": plan.after.pvid,
        "vlans": vlans,
    })
}

/// [`NosDriver`] speaking the CNOS REST API.
pub struct RestDriver {
    ctx: DriverContext,
}

impl RestDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    /// Opens a logged-in session.
    async fn connect(&self, switch: &str) -> FabricResult<RestClient> {
        let conn = self.ctx.switch(switch)?;
        let client = RestClient::new(switch, conn, &self.ctx.timeouts)?;
        client.login().await?;
        Ok(client)
    }

    /// Reads the interface, plans with `plan` and writes the result back.
    async fn update_interface(
        &self,
        client: &RestClient,
        switch: &str,
        interface: &Interface,
        plan: impl FnOnce(&VlanMembership) -> FabricResult<MembershipPlan>,
    ) -> FabricResult<()> {
        let full_list = self.ctx.switch(switch)?.compat_mode;
        let if_name = rest_interface_name(interface);
        let obj = interface_obj(&if_name);

        let current = membership_from_json(&client.get(&obj).await?)?;
        let plan = plan(&current)?;
        if plan.action == PlanAction::NoChange {
            debug!(switch, %interface, "Interface already in target state");
            return Ok(());
        }
        client
            .put(&obj, &membership_body(&if_name, &plan, full_list))
            .await
    }

    async fn enable_on(
        &self,
        client: &RestClient,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let first = self.ctx.is_first_vlan(switch, interface).await?;
        self.update_interface(client, switch, interface, |current| {
            Ok(plan_enable(current, vlan_id, first))
        })
        .await
    }

    /// Create, rollback and trunk all go through `client`.
    async fn create_and_trunk_on(
        &self,
        client: &RestClient,
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Option<&Interface>,
    ) -> FabricResult<()> {
        if let Err(err) = create_vlan_object(client, vlan_id, vlan_name).await {
            error!(switch, vlan_id, error = %err, "VLAN create failed, rolling back");
            if let Err(cleanup) = delete_vlan_object(client, vlan_id).await {
                warn!(switch, vlan_id, error = %cleanup, "Rollback delete failed");
            }
            return Err(err);
        }
        info!(switch, vlan_id, vlan_name, "Created VLAN");

        if let Some(interface) = interface {
            self.enable_on(client, switch, vlan_id, interface).await?;
        }
        Ok(())
    }
}

async fn create_vlan_object(client: &RestClient, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
    client
        .post(
            VLAN_OBJ,
            &json!({
                "vlan_id": vlan_id,
                "vlan_name": vlan_name,
                "admin_state": "up",
            }),
        )
        .await
}

async fn delete_vlan_object(client: &RestClient, vlan_id: VlanId) -> FabricResult<()> {
    client.delete(&format!("{}{}", VLAN_OBJ, vlan_id)).await
}

/// Every operation is one session: login, requests, close.
#[async_trait]
impl NosDriver for RestDriver {
    fn name(&self) -> &'static str {
        "rest"
    }

    #[instrument(skip(self))]
    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        let client = self.connect(switch).await?;
        let result = create_vlan_object(&client, vlan_id, vlan_name).await;
        client.close();
        result
    }

    #[instrument(skip(self))]
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        let client = self.connect(switch).await?;
        let result = delete_vlan_object(&client, vlan_id).await;
        client.close();
        result
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let client = self.connect(switch).await?;
        let result = self.enable_on(&client, switch, vlan_id, interface).await;
        client.close();
        result
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let label = interface.port_id();
        let client = self.connect(switch).await?;
        let result = self
            .update_interface(&client, switch, interface, |current| {
                plan_disable(current, vlan_id, switch, &label)
            })
            .await;
        client.close();
        result
    }

    #[instrument(skip(self, interface))]
    async fn create_and_trunk_vlan(
        &self,
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Option<&Interface>,
    ) -> FabricResult<()> {
        let client = self.connect(switch).await?;
        let result = self
            .create_and_trunk_on(&client, switch, vlan_id, vlan_name, interface)
            .await;
        client.close();
        result
    }
}
