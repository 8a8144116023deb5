//! Test infrastructure for the NOS fabric agent
//!
//! Provides:
//! - Port event and switch inventory builders
//! - A recording driver that captures engine decisions
//! - Simulated switches that keep VLAN and membership state
//! - Binding store and switch state verification helpers

pub mod fixtures;
pub mod recording;
pub mod switch;
mod verification;

pub use fixtures::*;
pub use recording::{DriverCall, RecordingDriver};
pub use switch::{DriverOp, SimulatedFabric, SwitchState};
pub use verification::*;
