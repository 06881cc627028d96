//! ==============================================================================
//! store.rs - aggregation store (this device + every device learned remotely)
//! ==============================================================================
//!
//! purpose:
//!     the single shared mutable object of the node. maps device name to
//!     DeviceData. starts with exactly one entry keyed by this node's
//!     external host name, with no sensors.
//!
//! concurrency:
//!     both overlay handlers mutate the store from whichever task is serving
//!     the connection, so the map lives behind a mutex. every mutation
//!     serializes the snapshot and writes it BEFORE the lock is released:
//!     - no lost updates between concurrent senders
//!     - the file on disk always ends at the latest in-memory state
//!
//! ```text
//!     the methods here block (mutex + file io). async callers go through
//!     tokio::task::spawn_blocking, see bridge.rs.
//! ```
//!
//! ==============================================================================

use crate::domain::{DeviceData, SensorData};
use crate::error::NodeResult;
use crate::persist::SnapshotWriter;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type DeviceMap = BTreeMap<String, DeviceData>;

#[derive(Debug)]
pub struct AggregationStore {
    self_name: String,
    devices: Mutex<DeviceMap>,
    writer: SnapshotWriter,
}

impl AggregationStore {
    /// fresh store holding only this device's empty record
    ///
    /// nothing is read back from a previous snapshot.
    pub fn new(self_name: impl Into<String>, writer: SnapshotWriter) -> Self {
        let self_name = self_name.into();
        let mut devices = DeviceMap::new();
        devices.insert(self_name.clone(), DeviceData::empty(self_name.clone()));

        Self {
            self_name,
            devices: Mutex::new(devices),
            writer,
        }
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// replace one sensor's reading in this device's record, then persist
    ///
    /// the in-memory update stands even if persisting fails.
    pub fn put_sensor(&self, sensor: &str, reading: SensorData) -> NodeResult<()> {
        let mut devices = self.lock();
        devices
            .entry(self.self_name.clone())
            .or_insert_with(|| DeviceData::empty(self.self_name.clone()))
            .data
            .insert(sensor.to_string(), reading);
        self.writer.write(&devices)
    }

    /// replace a whole device record, then persist
    pub fn put_device(&self, name: &str, record: DeviceData) -> NodeResult<()> {
        let mut devices = self.lock();
        devices.insert(name.to_string(), record);
        self.writer.write(&devices)
    }

    /// copy of the whole map
    pub fn snapshot(&self) -> DeviceMap {
        self.lock().clone()
    }

    pub fn device(&self, name: &str) -> Option<DeviceData> {
        self.lock().get(name).cloned()
    }

    /// this device's own record
    pub fn own_record(&self) -> DeviceData {
        self.device(&self.self_name)
            .unwrap_or_else(|| DeviceData::empty(self.self_name.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, DeviceMap> {
        // a panic mid-insert cannot leave the map half-written
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
