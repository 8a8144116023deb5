//! nos-mechd - reconciles port lifecycle events onto top-of-rack switches
//!
//! Bindings of (port, VLAN, switch, workload) are recorded in the binding
//! store; the first binding of a VLAN on a switch creates the VLAN, the
//! last one to leave deletes it.

mod events;
mod mechanism;

pub use events::{parse_event, run_events, EventStats};
pub use mechanism::{Attachment, Intent, NosMechanism};
