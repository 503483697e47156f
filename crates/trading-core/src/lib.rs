pub mod traits;
pub mod types;

pub use traits::{MarketSnapshotProvider, OrderFill, PositionStore};
pub use types::*;
