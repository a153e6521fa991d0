//! HydroNode Sensor Client Library
//!
//! Reports sensor readings to a collector over HTTPS, authenticated with
//! HMAC-SHA256, and routes commands returned in the response.
//!
//! ## Modules
//!
//! - `types` - Core data structures (SensorReading, NodeIdentity)
//! - `crypto` - HMAC-SHA256 signing and verification
//! - `codec` - Canonical payload and signed envelope construction
//! - `clock` - Epoch sources (SNTP, system clock)
//! - `transport` - Report framing and HTTPS delivery
//! - `dispatch` - Response command decoding and handler registry
//! - `node` - The reporting client
//! - `config` - Node configuration

pub mod types;
pub mod crypto;
pub mod codec;
pub mod clock;
pub mod transport;
pub mod dispatch;
pub mod node;
pub mod config;

pub use types::*;
pub use codec::SignedEnvelope;
pub use dispatch::{CommandValue, HandlerRegistry};
pub use node::{HydroNode, ReportOutcome};
