pub mod killswitch;
pub mod policy;

pub use killswitch::{HaltState, KillSwitch, KillSwitchConfig};
pub use policy::{PolicyOutcome, RiskPolicy};
