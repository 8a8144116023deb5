//! Binding store for the NOS fabric agent.
//!
//! A binding records that workload `instance_id` reaches VLAN `vlan_id`
//! through interface `port_id` on switch `switch_ip`. The reconciliation
//! engine derives every create/trunk/remove/delete decision from the
//! bindings present here.
//!
//! # Backends
//!
//! - [`MemoryBindingStore`]: process-local, used by tests and dry runs
//! - [`RedisBindingStore`]: one Redis hash per binding plus a uniqueness key
//!
//! # Example
//!
//! ```ignore
//! use nos_binding_store::{BindingKey, BindingStore, MemoryBindingStore};
//!
//! let store = MemoryBindingStore::new();
//! store.add_binding(&BindingKey::new("port:10", 100, "10.0.0.1", "vm-1")).await?;
//! let rows = store.get_vlan_bindings(100, "10.0.0.1").await?;
//! assert_eq!(rows.len(), 1);
//! ```

pub mod error;
pub mod memory;
pub mod model;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBindingStore;
pub use model::{BindingFilter, BindingKey, PortBinding};
pub use redis_store::RedisBindingStore;
pub use store::BindingStore;
