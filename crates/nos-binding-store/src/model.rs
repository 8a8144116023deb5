//! Binding rows and lookup filters.

use nos_fabric_common::VlanId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unique 4-tuple identifying a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingKey {
    /// `"{interface_type}:{interface_number}"`
    pub port_id: String,
    /// VLAN id
    pub vlan_id: VlanId,
    /// Switch management address
    pub switch_ip: String,
    /// Owning workload
    pub instance_id: String,
}

impl BindingKey {
    /// Creates a binding key.
    pub fn new(
        port_id: impl Into<String>,
        vlan_id: VlanId,
        switch_ip: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            port_id: port_id.into(),
            vlan_id,
            switch_ip: switch_ip.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Filter matching exactly this key.
    pub fn filter(&self) -> BindingFilter {
        BindingFilter::new()
            .port_id(&self.port_id)
            .vlan_id(self.vlan_id)
            .switch_ip(&self.switch_ip)
            .instance_id(&self.instance_id)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port_id={}, vlan_id={}, switch_ip={}, instance_id={}",
            self.port_id, self.vlan_id, self.switch_ip, self.instance_id
        )
    }
}

/// A persisted binding row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Surrogate primary key
    pub binding_id: u64,
    /// `"{interface_type}:{interface_number}"`
    pub port_id: String,
    /// VLAN id
    pub vlan_id: VlanId,
    /// Switch management address
    pub switch_ip: String,
    /// Owning workload
    pub instance_id: String,
    /// Set once the switch side effect was confirmed
    #[serde(default)]
    pub processed: bool,
}

impl PortBinding {
    /// Builds an unprocessed row from a key.
    pub fn from_key(binding_id: u64, key: &BindingKey) -> Self {
        Self {
            binding_id,
            port_id: key.port_id.clone(),
            vlan_id: key.vlan_id,
            switch_ip: key.switch_ip.clone(),
            instance_id: key.instance_id.clone(),
            processed: false,
        }
    }

    /// Returns the unique key of this row.
    pub fn key(&self) -> BindingKey {
        BindingKey::new(
            self.port_id.clone(),
            self.vlan_id,
            self.switch_ip.clone(),
            self.instance_id.clone(),
        )
    }
}

/// Column equality filter; unset columns match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingFilter {
    pub port_id: Option<String>,
    pub vlan_id: Option<VlanId>,
    pub switch_ip: Option<String>,
    pub instance_id: Option<String>,
    pub processed: Option<bool>,
}

impl BindingFilter {
    /// Creates a filter matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port_id(mut self, port_id: impl Into<String>) -> Self {
        self.port_id = Some(port_id.into());
        self
    }

    pub fn vlan_id(mut self, vlan_id: VlanId) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    pub fn switch_ip(mut self, switch_ip: impl Into<String>) -> Self {
        self.switch_ip = Some(switch_ip.into());
        self
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn processed(mut self, processed: bool) -> Self {
        self.processed = Some(processed);
        self
    }

    /// Returns true if the row satisfies every set column.
    pub fn matches(&self, row: &PortBinding) -> bool {
        self.port_id.as_ref().map_or(true, |v| *v == row.port_id)
            && self.vlan_id.map_or(true, |v| v == row.vlan_id)
            && self.switch_ip.as_ref().map_or(true, |v| *v == row.switch_ip)
            && self.instance_id.as_ref().map_or(true, |v| *v == row.instance_id)
            && self.processed.map_or(true, |v| v == row.processed)
    }
}

impl fmt::Display for BindingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = &self.port_id {
            parts.push(format!("port_id={}", v));
        }
        if let Some(v) = self.vlan_id {
            parts.push(format!("vlan_id={}", v));
        }
        if let Some(v) = &self.switch_ip {
            parts.push(format!("switch_ip={}", v));
        }
        if let Some(v) = &self.instance_id {
            parts.push(format!("instance_id={}", v));
        }
        if let Some(v) = self.processed {
            parts.push(format!("processed={}", v));
        }
        f.write_str(&parts.join(", "))
    }
}
