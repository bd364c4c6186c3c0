//! Transmitter control messages
//!
//! The server exchanges transmitter state as small JSON objects, one key per
//! setting (`{"transmitStatus": true}`), sent as NUL-terminated strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One transmitter setting, either pushed to the server or reported by it
#[derive(Debug, Clone, PartialEq)]
pub enum TransmitAction {
    TransmitStatus(bool),
    TransmitSoftwareGain(u8),
    TransmitHardwareGain(u8),
    TransmitFrequency(i32),
    PaEnabled(bool),
    /// Key this client does not know about; kept for logging only
    Unknown(String),
}

impl TransmitAction {
    pub fn key(&self) -> &str {
        match self {
            Self::TransmitStatus(_) => "transmitStatus",
            Self::TransmitSoftwareGain(_) => "transmitSoftwareGain",
            Self::TransmitHardwareGain(_) => "transmitHardwareGain",
            Self::TransmitFrequency(_) => "transmitFrequency",
            Self::PaEnabled(_) => "paEnabled",
            Self::Unknown(key) => key,
        }
    }

    fn value(&self) -> Option<Value> {
        match self {
            Self::TransmitStatus(v) | Self::PaEnabled(v) => Some(Value::from(*v)),
            Self::TransmitSoftwareGain(v) | Self::TransmitHardwareGain(v) => Some(Value::from(*v)),
            Self::TransmitFrequency(v) => Some(Value::from(*v)),
            Self::Unknown(_) => None,
        }
    }

    /// JSON object for this action. `Unknown` actions are never sent.
    pub fn to_json(&self) -> Option<String> {
        let value = self.value()?;
        let mut map = serde_json::Map::new();
        map.insert(self.key().to_string(), value);
        Some(Value::Object(map).to_string())
    }

    /// NUL-terminated command arguments
    pub fn to_wire(&self) -> Option<Vec<u8>> {
        let mut data = self.to_json()?.into_bytes();
        data.push(0);
        Some(data)
    }

    /// Parse every key of a server report. Keys with unexpected value
    /// types are reported as `Unknown`.
    pub fn parse_all(payload: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        let map: serde_json::Map<String, Value> = serde_json::from_slice(trim_nul(payload))
            .map_err(|e| ProtocolError::Malformed(format!("transmit action: {e}")))?;

        Ok(map
            .into_iter()
            .map(|(key, value)| Self::from_entry(key, &value))
            .collect())
    }

    fn from_entry(key: String, value: &Value) -> Self {
        let gain = || value.as_u64().and_then(|v| u8::try_from(v).ok());
        let parsed = match key.as_str() {
            "transmitStatus" => value.as_bool().map(Self::TransmitStatus),
            "transmitSoftwareGain" => gain().map(Self::TransmitSoftwareGain),
            "transmitHardwareGain" => gain().map(Self::TransmitHardwareGain),
            "transmitFrequency" => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Self::TransmitFrequency),
            "paEnabled" => value.as_bool().map(Self::PaEnabled),
            _ => None,
        };
        parsed.unwrap_or(Self::Unknown(key))
    }
}

/// Capabilities advertised with SET_TRANSMITTER_SUPPORTED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransmitterDescriptor {
    pub normal_zone: i32,
    pub red_zone: i32,
    pub reflected_power: f32,
    pub transmit_power: f32,
    pub swr: f32,
    pub hardware_gain: u8,
    pub transmitter_name: String,
}

impl Default for TransmitterDescriptor {
    fn default() -> Self {
        Self {
            normal_zone: 5,
            red_zone: 10,
            reflected_power: 0.0,
            transmit_power: 0.0,
            swr: 0.0,
            hardware_gain: 0,
            transmitter_name: "not set".to_string(),
        }
    }
}

impl TransmitterDescriptor {
    /// Parse the advertisement, falling back to defaults on malformed JSON
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json::from_slice(trim_nul(payload)) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("Unparseable transmitter descriptor: {}", e);
                Self::default()
            }
        }
    }
}

fn trim_nul(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &payload[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        let wire = TransmitAction::TransmitStatus(true).to_wire().unwrap();
        assert_eq!(wire.last(), Some(&0));
        assert_eq!(&wire[..wire.len() - 1], br#"{"transmitStatus":true}"#);

        let wire = TransmitAction::TransmitHardwareGain(42).to_json().unwrap();
        assert_eq!(wire, r#"{"transmitHardwareGain":42}"#);

        assert!(TransmitAction::Unknown("x".into()).to_wire().is_none());
    }

    #[test]
    fn test_parse_server_report() {
        let actions =
            TransmitAction::parse_all(b"{\"transmitStatus\":false,\"fanSpeed\":3}\0").unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&TransmitAction::TransmitStatus(false)));
        assert!(actions.contains(&TransmitAction::Unknown("fanSpeed".into())));

        // wrong value type degrades to unknown
        let actions = TransmitAction::parse_all(br#"{"paEnabled":"yes"}"#).unwrap();
        assert_eq!(actions, vec![TransmitAction::Unknown("paEnabled".into())]);

        assert!(TransmitAction::parse_all(b"not json").is_err());
    }

    #[test]
    fn test_descriptor_parse() {
        let descriptor = TransmitterDescriptor::parse(
            br#"{"normalZone":3,"redZone":8,"reflectedPower":0.5,"transmitPower":5.0,"swr":1.2,"hardwareGain":17,"transmitterName":"HL2"}"#,
        );
        assert_eq!(descriptor.normal_zone, 3);
        assert_eq!(descriptor.red_zone, 8);
        assert_eq!(descriptor.hardware_gain, 17);
        assert_eq!(descriptor.transmitter_name, "HL2");
    }

    #[test]
    fn test_descriptor_defaults() {
        let partial = TransmitterDescriptor::parse(b"{\"swr\":2.5}\0");
        assert_eq!(partial.swr, 2.5);
        assert_eq!(partial.normal_zone, 5);
        assert_eq!(partial.transmitter_name, "not set");

        assert_eq!(TransmitterDescriptor::parse(b"{"), TransmitterDescriptor::default());
    }
}
