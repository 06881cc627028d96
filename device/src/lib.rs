//! ==============================================================================
//! mesh-device - a device node of the two-tier sensor mesh
//! ==============================================================================
//!
//! sensor peers push readings over the internal overlay; device nodes swap
//! their aggregated records over the external overlay. the node merges both
//! into one store and snapshots it to disk after every change.
//!
//! ```text
//!     sensor peer ──internal──► InternalHandler ─┐
//!                                                ├─► AggregationStore ─► data.json
//!     device peer ──external──► ExternalHandler ─┘
//! ```
//!
//! ==============================================================================

pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod node;
pub mod overlay;
pub mod persist;
pub mod store;
pub mod tls;

pub use config::{Cli, NodeConfig};
pub use domain::{DeviceData, MessageRequest, SensorData};
pub use error::{NodeError, NodeResult};
pub use node::Node;
pub use store::AggregationStore;
