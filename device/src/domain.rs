//! ==============================================================================
//! domain.rs - wire and storage types shared by both overlays
//! ==============================================================================
//!
//! purpose:
//!     the three shapes that move through the node:
//!     - SensorData: one sensor's latest reading (opaque json object)
//!     - DeviceData: one device's aggregated view (sensor name -> reading)
//!     - MessageRequest: the envelope an overlay peer posts to /message
//!
//! field names on the wire are capitalised ("Name", "Data") and the sender
//! field is camel-cased ("senderName"); peers in the mesh already speak this
//! format so the serde renames must not change.
//!
//! ==============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// explicit `null` decodes to the field's default, as a missing field does
///
/// peers written in go send `"Data": null` for a nil map.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// a single sensor reading
///
/// the schema belongs to the sensor. the node only requires that the
/// payload is a json object, e.g.
/// - {"value": 21.5}
/// - {"temperature": 22.5, "humidity": 45.0}
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorData(pub serde_json::Map<String, serde_json::Value>);

impl SensorData {
    /// decode a reading from the serialized payload of a message
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// one device's aggregated view
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    /// device identity (its external host name)
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,

    /// sensor name -> latest reading, last write wins
    #[serde(rename = "Data", default, deserialize_with = "null_as_default")]
    pub data: BTreeMap<String, SensorData>,
}

impl DeviceData {
    /// an empty record for `name`
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// envelope delivered by an overlay peer
///
/// `data` is itself a serialized json document, decoded by whichever
/// handler the overlay is bound to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(rename = "senderName")]
    pub sender_name: String,

    #[serde(rename = "Data")]
    pub data: String,
}

impl MessageRequest {
    pub fn new(sender_name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_data_uses_capitalised_wire_names() {
        let raw = r#"{"Name":"rasp-020","Data":{"temp-01":{"value":21.5}}}"#;
        let device = DeviceData::decode(raw).unwrap();
        assert_eq!(device.name, "rasp-020");
        assert_eq!(device.data["temp-01"].0["value"], serde_json::json!(21.5));

        let back = serde_json::to_string(&device).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn device_data_tolerates_missing_fields() {
        let device = DeviceData::decode("{}").unwrap();
        assert_eq!(device, DeviceData::default());
    }

    #[test]
    fn device_data_null_fields_decode_as_empty() {
        let device = DeviceData::decode(r#"{"Name":"rasp-020","Data":null}"#).unwrap();
        assert_eq!(device, DeviceData::empty("rasp-020"));

        let device = DeviceData::decode(r#"{"Name":null,"Data":{}}"#).unwrap();
        assert_eq!(device, DeviceData::default());
    }

    #[test]
    fn sensor_data_must_be_an_object() {
        assert!(SensorData::decode(r#"{"value": 1}"#).is_ok());
        assert!(SensorData::decode("not json").is_err());
        assert!(SensorData::decode("42").is_err());
        assert!(SensorData::decode("[1,2]").is_err());
    }

    #[test]
    fn message_request_envelope_format() {
        let req: MessageRequest =
            serde_json::from_str(r#"{"senderName":"temp-01","Data":"{\"value\":21.5}"}"#).unwrap();
        assert_eq!(req, MessageRequest::new("temp-01", r#"{"value":21.5}"#));
    }
}
