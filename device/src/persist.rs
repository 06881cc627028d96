//! ==============================================================================
//! persist.rs - snapshot writer for the aggregation store
//! ==============================================================================
//!
//! purpose:
//!     writes the whole store as json to `<dir>/data.json` after every
//!     mutation. the file is replaced atomically: bytes go to a temp file in
//!     the same directory, get fsynced, then the temp file is renamed over
//!     the target. a crash mid-write leaves the previous snapshot intact.
//!
//! relationships:
//!     - used by: store.rs (called while the store lock is held, so writes
//!       are already serialized and land in mutation order)
//!
//! ==============================================================================

use crate::domain::DeviceData;
use crate::error::{NodeError, NodeResult};

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// serialize `devices` and atomically replace the snapshot file
    pub fn write(&self, devices: &BTreeMap<String, DeviceData>) -> NodeResult<()> {
        let bytes = serde_json::to_vec(devices)?;
        self.write_bytes(&bytes).map_err(|source| NodeError::Persist {
            path: self.path.clone(),
            source,
        })
    }

    fn write_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.as_file_mut().write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// read the snapshot back
    pub fn load(&self) -> NodeResult<BTreeMap<String, DeviceData>> {
        let raw = std::fs::read(&self.path).map_err(|source| NodeError::Persist {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorData;

    fn sample() -> BTreeMap<String, DeviceData> {
        let mut device = DeviceData::empty("rasp-019");
        let mut reading = serde_json::Map::new();
        reading.insert("value".into(), serde_json::json!(21.5));
        device.data.insert("temp-01".into(), SensorData(reading));

        let mut map = BTreeMap::new();
        map.insert("rasp-019".to_string(), device);
        map.insert("rasp-020".to_string(), DeviceData::empty("rasp-020"));
        map
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("data.json"));

        writer.write(&sample()).unwrap();
        assert_eq!(writer.load().unwrap(), sample());
    }

    #[test]
    fn write_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("data.json"));

        writer.write(&sample()).unwrap();
        let mut smaller = BTreeMap::new();
        smaller.insert("solo".to_string(), DeviceData::empty("solo"));
        writer.write(&smaller).unwrap();

        assert_eq!(writer.load().unwrap(), smaller);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("data.json"));
        for _ in 0..5 {
            writer.write(&sample()).unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("data.json")]);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("missing").join("data.json"));

        let err = writer.write(&sample()).unwrap_err();
        assert!(matches!(err, NodeError::Persist { .. }));
    }
}
