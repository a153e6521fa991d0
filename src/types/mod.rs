//! Core data types for the HydroNode client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the access-point name shown during device setup
pub const SETUP_AP_PREFIX: &str = "HydroNode-Setup-";

/// A single measurement taken by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Short tag naming the measured quantity (e.g. "ph", "ec")
    #[serde(rename = "type")]
    pub kind: String,
    /// Measured value
    pub value: f32,
    /// Unix timestamp in seconds
    pub measured_at: u64,
}

impl SensorReading {
    pub fn new(kind: impl Into<String>, value: f32, measured_at: u64) -> Self {
        Self { kind: kind.into(), value, measured_at }
    }
}

/// Who this node is and where it reports to. Fixed for the node's lifetime.
#[derive(Clone)]
pub struct NodeIdentity {
    sensor_id: String,
    secret_key: Vec<u8>,
    host: String,
    path: String,
    port: u16,
}

impl NodeIdentity {
    pub fn new(
        sensor_id: impl Into<String>,
        secret_key: impl Into<Vec<u8>>,
        host: impl Into<String>,
        path: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            secret_key: secret_key.into(),
            host: host.into(),
            path: path.into(),
            port,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Full HTTPS endpoint for reports
    pub fn endpoint(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        if self.port == 443 {
            format!("https://{}{}", self.host, path)
        } else {
            format!("https://{}:{}{}", self.host, self.port, path)
        }
    }

    /// Name of the provisioning access point: prefix plus the last four
    /// characters of the sensor id (the whole id if it is shorter).
    pub fn setup_ap_name(&self) -> String {
        let chars: Vec<char> = self.sensor_id.chars().collect();
        let start = chars.len().saturating_sub(4);
        let suffix: String = chars[start..].iter().collect();
        format!("{}{}", SETUP_AP_PREFIX, suffix)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("sensor_id", &self.sensor_id)
            .field("secret_key", &"<redacted>")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("port", &self.port)
            .finish()
    }
}
