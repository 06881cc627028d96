//! ==============================================================================
//! bridge.rs - the two inbound message handlers
//! ==============================================================================
//!
//! purpose:
//!     translates overlay messages into store mutations.
//!
//! ```text
//!     internal overlay (local sensor peers):
//!         payload = SensorData
//!         store[self].Data[sender] = payload
//!
//!     external overlay (other device nodes):
//!         payload = DeviceData
//!         store[sender] = payload        (whole record replaced, no merge)
//! ```
//!
//! delivery is fire-and-forget. a payload that does not decode is logged and
//! dropped; the sender is never told. a failed snapshot write is logged too,
//! the in-memory update stays.
//!
//! relationships:
//!     - used by: overlay.rs (calls dispatch() for every POST /message)
//!     - uses: store.rs
//!
//! ==============================================================================

use crate::domain::{DeviceData, MessageRequest, SensorData};
use crate::error::{NodeError, NodeResult};
use crate::store::AggregationStore;

use std::sync::Arc;

/// something an overlay server hands every inbound message to
///
/// `handle` may block (store lock, snapshot write); overlay.rs runs it on
/// the blocking pool.
pub trait MessageHandler: Send + Sync + 'static {
    /// overlay name used in log fields
    fn overlay(&self) -> &'static str;

    fn handle(&self, req: &MessageRequest) -> NodeResult<()>;
}

/// run `handler` on `req` and log the outcome; errors stop here
pub fn dispatch(handler: &dyn MessageHandler, req: &MessageRequest) {
    match handler.handle(req) {
        Ok(()) => {
            tracing::debug!(overlay = handler.overlay(), sender = %req.sender_name, "message applied");
        }
        Err(e @ NodeError::Persist { .. }) | Err(e @ NodeError::Snapshot(_)) => {
            tracing::error!(overlay = handler.overlay(), sender = %req.sender_name, error = %e, "snapshot not written");
        }
        Err(e) => {
            tracing::error!(overlay = handler.overlay(), sender = %req.sender_name, error = %e, "message dropped");
        }
    }
}

// ==============================================================================
// internal overlay
// ==============================================================================

#[derive(Clone)]
pub struct InternalHandler {
    store: Arc<AggregationStore>,
}

impl InternalHandler {
    pub fn new(store: Arc<AggregationStore>) -> Self {
        Self { store }
    }
}

impl MessageHandler for InternalHandler {
    fn overlay(&self) -> &'static str {
        "internal"
    }

    fn handle(&self, req: &MessageRequest) -> NodeResult<()> {
        let reading = SensorData::decode(&req.data).map_err(|source| NodeError::Decode {
            kind: "sensor data",
            sender: req.sender_name.clone(),
            source,
        })?;
        self.store.put_sensor(&req.sender_name, reading)
    }
}

// ==============================================================================
// external overlay
// ==============================================================================

#[derive(Clone)]
pub struct ExternalHandler {
    store: Arc<AggregationStore>,
    verify_sender_name: bool,
}

impl ExternalHandler {
    pub fn new(store: Arc<AggregationStore>) -> Self {
        Self {
            store,
            verify_sender_name: false,
        }
    }

    /// reject records whose Name differs from the envelope's sender
    pub fn with_sender_verification(mut self, enabled: bool) -> Self {
        self.verify_sender_name = enabled;
        self
    }
}

impl MessageHandler for ExternalHandler {
    fn overlay(&self) -> &'static str {
        "external"
    }

    fn handle(&self, req: &MessageRequest) -> NodeResult<()> {
        let record = DeviceData::decode(&req.data).map_err(|source| NodeError::Decode {
            kind: "device data",
            sender: req.sender_name.clone(),
            source,
        })?;

        if self.verify_sender_name && record.name != req.sender_name {
            return Err(NodeError::SenderMismatch {
                sender: req.sender_name.clone(),
                claimed: record.name,
            });
        }

        self.store.put_device(&req.sender_name, record)
    }
}
