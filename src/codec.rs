//! Record body encoding.
//!
//! Record keys carry identity; bodies carry content. A codec must round-trip
//! exactly: decoding an encoded record yields an equal record.

use crate::models::{BindingRecord, RoleBindingRecord};
use crate::{Error, Result};

/// Encodes and decodes record bodies.
pub trait BindingCodec {
    fn encode_record(&self, record: &BindingRecord) -> Result<String>;

    fn decode_record(&self, text: &str) -> Result<BindingRecord>;

    fn encode_role(&self, record: &RoleBindingRecord) -> Result<String>;

    /// Decode a role record body. The role itself comes from the key.
    fn decode_role(&self, role: &str, text: &str) -> Result<RoleBindingRecord>;
}

/// Codec writing compact JSON with serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BindingCodec for JsonCodec {
    fn encode_record(&self, record: &BindingRecord) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    fn decode_record(&self, text: &str) -> Result<BindingRecord> {
        serde_json::from_str(text).map_err(|e| Error::Parse(format!("binding record: {}", e)))
    }

    fn encode_role(&self, record: &RoleBindingRecord) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    fn decode_role(&self, role: &str, text: &str) -> Result<RoleBindingRecord> {
        let mut record: RoleBindingRecord = serde_json::from_str(text)
            .map_err(|e| Error::Parse(format!("role record '{}': {}", role, e)))?;
        record.role = role.to_string();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisRange, DeviceKind};
    use crate::test_utils::{axis, button};

    #[test]
    fn test_binding_record_roundtrip() {
        let mut record = BindingRecord::new(DeviceKind::Joystick, 1, 0);
        record.add_binding(&button(5, 0));
        record.add_binding(&axis(6, 2, AxisRange::Negative, true));
        record.modified = false;

        let codec = JsonCodec;
        let decoded = codec.decode_record(&codec.encode_record(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_role_decode_takes_role_from_caller() {
        let mut record = RoleBindingRecord::new("south");
        record.push(&button(5, 0));

        let codec = JsonCodec;
        let text = codec.encode_role(&record).unwrap();
        assert_eq!(codec.decode_role("south", &text).unwrap(), record);
    }

    #[test]
    fn test_malformed_text_is_parse_error() {
        let codec = JsonCodec;
        assert!(matches!(codec.decode_record("[1,2"), Err(Error::Parse(_))));
        assert!(matches!(codec.decode_role("south", "{\"entries\": 3}"), Err(Error::Parse(_))));
    }
}
