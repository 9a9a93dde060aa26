//! Resilient log shipping for MDStudio components.
//!
//! Records are buffered in memory, shipped to the active session with
//! per-failure retry, and persisted to a recovery file when no session is
//! available.

pub mod config;
pub mod layer;
pub mod record;
pub mod recovery;
pub mod shipper;

pub use config::ShipperConfig;
pub use layer::ShipperLayer;
pub use record::Record;
pub use shipper::{LogSession, LogShipper, NAMESPACE};
