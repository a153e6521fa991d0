//! Canonical payload construction and signed envelopes.
//!
//! The collector recomputes the signature over the exact payload bytes, so the
//! key order, the absence of whitespace and the two-digit value formatting are
//! all part of the wire contract.

use thiserror::Error;

use crate::crypto::sign_base64;
use crate::types::SensorReading;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Reading value is not finite: {0}")]
    NonFiniteValue(f32),
}

/// Build the canonical JSON payload:
/// `{"sensorId":..,"type":..,"value":N.NN,"timestamp":E}`
pub fn build_payload(
    sensor_id: &str,
    kind: &str,
    value: f32,
    epoch: u64,
) -> Result<String, CodecError> {
    let value = format_value(value)?;
    Ok(format!(
        "{{\"sensorId\":{},\"type\":{},\"value\":{},\"timestamp\":{}}}",
        json_string(sensor_id),
        json_string(kind),
        value,
        epoch
    ))
}

/// Bytes covered by the signature: payload followed by the decimal epoch
pub fn build_signing_message(payload: &str, epoch: u64) -> Vec<u8> {
    let epoch = epoch.to_string();
    let mut message = Vec::with_capacity(payload.len() + epoch.len());
    message.extend_from_slice(payload.as_bytes());
    message.extend_from_slice(epoch.as_bytes());
    message
}

/// Format with exactly two fraction digits, rounding half away from zero.
///
/// An f32 has a 24-bit mantissa, so `value as f64 * 100.0` is exact and the
/// rounding acts on the true stored value.
fn format_value(value: f32) -> Result<String, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NonFiniteValue(value));
    }

    let scaled = (f64::from(value).abs() * 100.0).round();
    let digits = format!("{:03.0}", scaled);
    let (whole, fraction) = digits.split_at(digits.len() - 2);
    let sign = if value < 0.0 && scaled != 0.0 { "-" } else { "" };

    Ok(format!("{}{}.{}", sign, whole, fraction))
}

fn json_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Payload plus its signature and timestamp, as transmitted.
///
/// Only constructible through [`SignedEnvelope::seal`]; there are no setters,
/// so a changed reading always means a fresh envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    payload: String,
    signature: String,
    timestamp: u64,
}

impl SignedEnvelope {
    /// Build and sign the envelope for `reading`
    pub fn seal(
        sensor_id: &str,
        reading: &SensorReading,
        secret_key: &[u8],
    ) -> Result<Self, CodecError> {
        let payload = build_payload(sensor_id, &reading.kind, reading.value, reading.measured_at)?;
        let message = build_signing_message(&payload, reading.measured_at);
        let signature = sign_base64(secret_key, &message);

        Ok(Self {
            payload,
            signature,
            timestamp: reading.measured_at,
        })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The bytes the signature was computed over
    pub fn signing_message(&self) -> Vec<u8> {
        build_signing_message(&self.payload, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;

    const KEY: &[u8] = b"hydronode-shared-secret";

    #[test]
    fn test_canonical_payload_rounds_half_up() {
        let payload = build_payload("abc123", "ph", 7.125, 1_700_000_000).unwrap();
        assert_eq!(
            payload,
            r#"{"sensorId":"abc123","type":"ph","value":7.13,"timestamp":1700000000}"#
        );
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(format_value(0.0).unwrap(), "0.00");
        assert_eq!(format_value(0.004).unwrap(), "0.00");
        assert_eq!(format_value(0.125).unwrap(), "0.13");
        assert_eq!(format_value(0.375).unwrap(), "0.38");
        assert_eq!(format_value(6.5).unwrap(), "6.50");
        assert_eq!(format_value(1234.5).unwrap(), "1234.50");
        assert_eq!(format_value(-7.125).unwrap(), "-7.13");
        assert_eq!(format_value(-0.001).unwrap(), "0.00");
        assert_eq!(format_value(16_777_216.0).unwrap(), "16777216.00");
    }

    #[test]
    fn test_non_finite_value_rejected() {
        assert_eq!(
            build_payload("abc123", "ph", f32::INFINITY, 1),
            Err(CodecError::NonFiniteValue(f32::INFINITY))
        );
        assert!(build_payload("abc123", "ph", f32::NAN, 1).is_err());
    }

    #[test]
    fn test_strings_are_escaped() {
        let payload = build_payload("a\"b", "t\\", 1.0, 5).unwrap();
        assert_eq!(payload, r#"{"sensorId":"a\"b","type":"t\\","value":1.00,"timestamp":5}"#);
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["sensorId"], "a\"b");
    }

    #[test]
    fn test_signing_message_appends_epoch() {
        let message = build_signing_message("{}", 1_700_000_000);
        assert_eq!(message, b"{}1700000000");
        assert_eq!(build_signing_message("p", 0), b"p0");
    }

    #[test]
    fn test_signing_message_is_deterministic_and_field_sensitive() {
        let base = |id: &str, kind: &str, value: f32, epoch: u64| {
            let payload = build_payload(id, kind, value, epoch).unwrap();
            build_signing_message(&payload, epoch)
        };

        let reference = base("abc123", "ph", 7.125, 1_700_000_000);
        assert_eq!(reference, base("abc123", "ph", 7.125, 1_700_000_000));

        assert_ne!(reference, base("abc124", "ph", 7.125, 1_700_000_000));
        assert_ne!(reference, base("abc123", "ec", 7.125, 1_700_000_000));
        assert_ne!(reference, base("abc123", "ph", 7.135, 1_700_000_000));
        assert_ne!(reference, base("abc123", "ph", 7.125, 1_700_000_001));
    }

    #[test]
    fn test_seal_is_reproducible() {
        let reading = SensorReading::new("ph", 7.125, 1_700_000_000);
        let first = SignedEnvelope::seal("abc123", &reading, KEY).unwrap();
        let second = SignedEnvelope::seal("abc123", &reading, KEY).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.timestamp(), 1_700_000_000);
        assert_eq!(
            first.payload(),
            r#"{"sensorId":"abc123","type":"ph","value":7.13,"timestamp":1700000000}"#
        );
    }

    #[test]
    fn test_envelope_signature_covers_payload_and_timestamp() {
        let reading = SensorReading::new("ph", 7.125, 1_700_000_000);
        let envelope = SignedEnvelope::seal("abc123", &reading, KEY).unwrap();

        let message = envelope.signing_message();
        assert!(verify_signature(KEY, &message, envelope.signature()).unwrap());

        // Same payload, different timestamp suffix
        let shifted = build_signing_message(envelope.payload(), 1_700_000_001);
        assert!(!verify_signature(KEY, &shifted, envelope.signature()).unwrap());

        // Reformatted payload
        let spaced = envelope.payload().replace(',', ", ");
        let respaced = build_signing_message(&spaced, envelope.timestamp());
        assert!(!verify_signature(KEY, &respaced, envelope.signature()).unwrap());
    }
}
