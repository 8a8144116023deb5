//! Error types for fabric agent operations.
//!
//! Every failure the agent can surface is a variant of [`FabricError`].
//! The variants group into connectivity errors, configuration rejections,
//! protocol-specific failures (SNMP, REST) and domain/state errors.
//! `BindingNotFound` is a normal control-flow signal, not a fault.

use std::time::Duration;
use thiserror::Error;

use crate::types::VlanId;

/// Result type alias for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors that can occur while reconciling VLAN intent onto switches.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Could not open a session or transport to the switch.
    #[error("Unable to connect to switch {switch}: {reason}")]
    ConnectFailed {
        /// Management address of the switch.
        switch: String,
        /// Underlying transport error.
        reason: String,
    },

    /// The switch rejected a configuration command.
    #[error("Failed to configure switch {switch}: {config}: {reason}")]
    ConfigFailed {
        /// Management address of the switch.
        switch: String,
        /// The command or operation that was attempted.
        config: String,
        /// Underlying cause reported by the device or transport.
        reason: String,
    },

    /// An SNMP request failed or the agent reported an error status.
    #[error("SNMP operation '{operation}' to '{switch}' failed: {detail}")]
    SnmpFailure {
        /// Management address of the switch.
        switch: String,
        /// "GET" or "SET".
        operation: String,
        /// Error indication or pretty-printed error status.
        detail: String,
        /// Error status reported in the response PDU, if any.
        error_status: Option<u32>,
        /// Error index reported in the response PDU, if any.
        error_index: Option<u32>,
    },

    /// A REST call returned a non-success status.
    #[error("REST HTTP error {status} ({reason}) when {method} {url}: {body}")]
    RestHttp {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
        /// HTTP method of the request.
        method: String,
        /// Request URL.
        url: String,
        /// Response body.
        body: String,
    },

    /// A REST response lacked a field the driver needs.
    #[error("Expected JSON field '{field}' not found when accessing {url}; the JSON received: {json}")]
    JsonFieldNotFound {
        /// Missing field name.
        field: String,
        /// Request URL.
        url: String,
        /// The JSON document received.
        json: String,
    },

    /// A port event lacked fields needed to configure the switch.
    #[error("Missing required field(s) to configure switch: {fields}")]
    MissingRequiredFields {
        /// Space separated list of missing fields.
        fields: String,
    },

    /// Removing the VLAN would leave the interface in no VLAN at all.
    #[error("Interface {interface} on {switch} would be left without any VLAN after removing VLAN {vlan_id}")]
    EmptyVlanSet {
        /// Management address of the switch.
        switch: String,
        /// Interface identifier.
        interface: String,
        /// The VLAN whose removal was rejected.
        vlan_id: VlanId,
    },

    /// The device description did not match any known model.
    #[error("Unrecognized device model on {switch}: '{description}'")]
    UnknownDeviceModel {
        /// Management address of the switch.
        switch: String,
        /// The system description string that was probed.
        description: String,
    },

    /// Interface type other than `port` or `portchannel`.
    #[error("Unknown interface type: {intf_type}")]
    UnknownInterfaceType {
        /// The unrecognized type string.
        intf_type: String,
    },

    /// Interface number that cannot be used on the wire.
    #[error("Invalid interface '{interface}': {message}")]
    InvalidInterface {
        /// The interface as given.
        interface: String,
        /// Why it was rejected.
        message: String,
    },

    /// No driver exists for the configured operating system and protocol.
    #[error("Cannot find driver for protocol {protocol} on {os}")]
    InvalidOsProtocol {
        /// Operating system family.
        os: String,
        /// Management protocol.
        protocol: String,
    },

    /// The compute host has no switch connections configured.
    #[error("Connection to {host} is not configured")]
    ComputeHostNotConfigured {
        /// Host identifier.
        host: String,
    },

    /// The switch is not present in the inventory.
    #[error("Switch {switch} is not configured")]
    UnknownSwitch {
        /// Management address of the switch.
        switch: String,
    },

    /// A port-channel update reached only some member ports.
    #[error("VLAN {vlan_id} change on {switch} applied to ports {applied:?} but failed on {failed:?}")]
    PartialApply {
        /// Management address of the switch.
        switch: String,
        /// VLAN being changed.
        vlan_id: VlanId,
        /// Member ports that were updated.
        applied: Vec<u32>,
        /// Member ports that failed, with the cause.
        failed: Vec<(u32, String)>,
    },

    /// A network call did not complete in time.
    #[error("{operation} on {switch} timed out after {after:?}")]
    Timeout {
        /// Management address of the switch.
        switch: String,
        /// The operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// No binding matched the lookup filter.
    #[error("Port binding ({filters}) is not present")]
    BindingNotFound {
        /// Rendered lookup filter.
        filters: String,
    },

    /// The binding 4-tuple already exists.
    #[error("Port binding ({binding}) already exists")]
    DuplicateBinding {
        /// Rendered binding key.
        binding: String,
    },

    /// The binding store backend failed.
    #[error("Binding store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl FabricError {
    /// Creates a connect failure.
    pub fn connect_failed(switch: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            switch: switch.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a configuration rejection.
    pub fn config_failed(
        switch: impl Into<String>,
        config: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::ConfigFailed {
            switch: switch.into(),
            config: config.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an SNMP failure without PDU error details.
    pub fn snmp(
        switch: impl Into<String>,
        operation: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Self::SnmpFailure {
            switch: switch.into(),
            operation: operation.into(),
            detail: detail.to_string(),
            error_status: None,
            error_index: None,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(switch: impl Into<String>, operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            switch: switch.into(),
            operation: operation.into(),
            after,
        }
    }

    /// Creates a binding store error.
    pub fn store(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for the expected "no such binding" condition.
    pub fn is_benign(&self) -> bool {
        matches!(self, FabricError::BindingNotFound { .. })
    }

    /// Returns true if the switch could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            FabricError::ConnectFailed { .. } | FabricError::Timeout { .. }
        )
    }

    /// Returns true if the device received the request and refused it.
    pub fn is_config_rejection(&self) -> bool {
        matches!(
            self,
            FabricError::ConfigFailed { .. }
                | FabricError::RestHttp { .. }
                | FabricError::SnmpFailure {
                    error_status: Some(_),
                    ..
                }
        )
    }
}
