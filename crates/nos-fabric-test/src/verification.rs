//! Verification helpers for binding store and switch state

use std::collections::BTreeSet;
use thiserror::Error;

use nos_binding_store::{BindingFilter, BindingKey, BindingStore, StoreError};
use nos_drivers::PortMode;
use nos_fabric_common::{Interface, VlanId};

use crate::switch::SimulatedFabric;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Expected bindings {expected:?}, found {actual:?}")]
    BindingsMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Expected {expected} processed={processed} bindings, found {actual}")]
    ProcessedMismatch {
        processed: bool,
        expected: usize,
        actual: usize,
    },

    #[error("Expected VLANs {expected:?} on {switch}, found {actual:?}")]
    VlansMismatch {
        switch: String,
        expected: Vec<VlanId>,
        actual: Vec<VlanId>,
    },

    #[error("Expected {interface} on {switch} to carry {expected:?} as {mode}, found {actual:?} as {actual_mode}")]
    MembershipMismatch {
        switch: String,
        interface: String,
        expected: Vec<VlanId>,
        mode: PortMode,
        actual: Vec<VlanId>,
        actual_mode: PortMode,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Binding store verification helper
pub struct BindingVerifier<'a> {
    store: &'a dyn BindingStore,
}

impl<'a> BindingVerifier<'a> {
    pub fn new(store: &'a dyn BindingStore) -> Self {
        Self { store }
    }

    /// Verify the store holds exactly these bindings
    pub async fn assert_exactly(&self, expected: &[BindingKey]) -> VerifyResult<()> {
        let actual: BTreeSet<String> = self
            .store
            .find(&BindingFilter::new())
            .await?
            .iter()
            .map(|row| row.key().to_string())
            .collect();
        let expected: BTreeSet<String> = expected.iter().map(ToString::to_string).collect();

        if actual != expected {
            return Err(VerificationError::BindingsMismatch {
                expected: expected.into_iter().collect(),
                actual: actual.into_iter().collect(),
            });
        }
        Ok(())
    }

    /// Verify the number of rows with the given processed flag
    pub async fn assert_processed_count(&self, processed: bool, expected: usize) -> VerifyResult<()> {
        let actual = self
            .store
            .find(&BindingFilter::new().processed(processed))
            .await?
            .len();
        if actual != expected {
            return Err(VerificationError::ProcessedMismatch {
                processed,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Simulated switch verification helper
pub struct FabricVerifier<'a> {
    fabric: &'a SimulatedFabric,
}

impl<'a> FabricVerifier<'a> {
    pub fn new(fabric: &'a SimulatedFabric) -> Self {
        Self { fabric }
    }

    /// Verify the VLAN objects present on a switch
    pub fn assert_vlans(&self, switch: &str, expected: &[VlanId]) -> VerifyResult<()> {
        let actual = self.fabric.vlans(switch);
        if actual != expected {
            return Err(VerificationError::VlansMismatch {
                switch: switch.to_string(),
                expected: expected.to_vec(),
                actual,
            });
        }
        Ok(())
    }

    /// Verify an interface's member VLANs; the mode follows from the count
    pub fn assert_members(
        &self,
        switch: &str,
        interface: &Interface,
        expected: &[VlanId],
    ) -> VerifyResult<()> {
        let membership = self.fabric.membership(switch, interface);
        let actual: Vec<VlanId> = membership.vlans.iter().copied().collect();
        let mut wanted = expected.to_vec();
        wanted.sort_unstable();
        let mode = PortMode::for_member_count(wanted.len());

        if actual != wanted || membership.mode != mode {
            return Err(VerificationError::MembershipMismatch {
                switch: switch.to_string(),
                interface: interface.to_string(),
                expected: wanted,
                mode,
                actual,
                actual_mode: membership.mode,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_binding_store::MemoryBindingStore;
    use nos_drivers::NosDriver;

    #[tokio::test]
    async fn test_binding_verifier() {
        let store = MemoryBindingStore::new();
        let key = BindingKey::new("port:10", 100, "10.0.0.1", "vm-1");
        store.add_binding(&key).await.unwrap();

        let verifier = BindingVerifier::new(&store);
        verifier.assert_exactly(&[key.clone()]).await.unwrap();
        verifier.assert_processed_count(false, 1).await.unwrap();
        assert!(verifier.assert_exactly(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_fabric_verifier() {
        let fabric = SimulatedFabric::new();
        let port = Interface::port("10");
        fabric
            .create_and_trunk_vlan("sw", 100, "q-100", Some(&port))
            .await
            .unwrap();

        let verifier = FabricVerifier::new(&fabric);
        verifier.assert_vlans("sw", &[100]).unwrap();
        verifier.assert_members("sw", &port, &[100, 1]).unwrap();
        assert!(verifier.assert_members("sw", &port, &[100]).is_err());
    }
}
