//! The reporting client.
//!
//! `HydroNode` ties the pieces together for one report:
//! clock -> canonical payload -> HMAC signature -> HTTPS POST -> command dispatch.
//! Delivery is fire-and-forget: failures are folded into [`ReportOutcome`]
//! and logged, never propagated.

use std::fmt;
use tracing::{debug, info, warn};

use crate::clock::{ClockError, ClockSource};
use crate::codec::{CodecError, SignedEnvelope};
use crate::dispatch::{CommandHandler, DecodeError, FromCommandValue, HandlerRegistry};
use crate::transport::{ReportRequest, Transport, TransportError};
use crate::types::{NodeIdentity, SensorReading};

/// What happened to a single report
#[derive(Debug)]
pub enum ReportOutcome {
    /// HTTP 200 with a decodable body; `handled` handlers ran
    Acknowledged { handled: usize },
    /// Sent, but the collector answered with a non-200 status or an empty body
    Unacknowledged { status: u16 },
    /// HTTP 200, but the body could not be decoded
    ResponseRejected(DecodeError),
    /// Connection, TLS or timeout failure
    TransportFailed(TransportError),
    /// No synced timestamp available even after a forced resync
    ClockUnavailable(ClockError),
    /// The reading cannot be encoded
    InvalidReading(CodecError),
}

impl ReportOutcome {
    /// Whether the collector accepted the report
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged { handled } => write!(f, "acknowledged ({} commands)", handled),
            Self::Unacknowledged { status } => write!(f, "unacknowledged (HTTP {})", status),
            Self::ResponseRejected(e) => write!(f, "response rejected: {}", e),
            Self::TransportFailed(e) => write!(f, "transport failed: {}", e),
            Self::ClockUnavailable(e) => write!(f, "clock unavailable: {}", e),
            Self::InvalidReading(e) => write!(f, "invalid reading: {}", e),
        }
    }
}

/// A sensor node reporting to one collector.
///
/// The clock is owned elsewhere and borrowed for the node's lifetime.
/// `report` takes `&mut self`, so one node never has two reports in flight.
pub struct HydroNode<'c, C: ClockSource, T: Transport> {
    identity: NodeIdentity,
    clock: &'c mut C,
    transport: T,
    commands: HandlerRegistry,
}

impl<'c, C: ClockSource, T: Transport> HydroNode<'c, C, T> {
    pub fn new(identity: NodeIdentity, clock: &'c mut C, transport: T) -> Self {
        Self {
            identity,
            clock,
            transport,
            commands: HandlerRegistry::new(),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Access point name used during provisioning
    pub fn setup_ap_name(&self) -> String {
        self.identity.setup_ap_name()
    }

    /// Register a command handler, replacing any previous one for `key`
    pub fn on<H>(&mut self, key: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.commands.on(key, handler);
    }

    /// Register a handler that receives the command value as `V`
    pub fn on_typed<V, F>(&mut self, key: impl Into<String>, handler: F)
    where
        V: FromCommandValue,
        F: FnMut(V) + 'static,
    {
        self.commands.on_typed(key, handler);
    }

    /// Bound the size of response bodies accepted for command decoding
    pub fn set_response_buffer_budget(&mut self, bytes: usize) {
        self.commands.set_buffer_budget(bytes);
    }

    /// Sign and send one reading, then route any commands in the answer.
    pub async fn report(&mut self, kind: &str, value: f32) -> ReportOutcome {
        let epoch = match self.synced_epoch().await {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!("⏱️ Skipping {} report: {}", kind, e);
                return ReportOutcome::ClockUnavailable(e);
            }
        };

        let reading = SensorReading::new(kind, value, epoch);
        let envelope = match SignedEnvelope::seal(
            self.identity.sensor_id(),
            &reading,
            self.identity.secret_key(),
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping {} report: {}", kind, e);
                return ReportOutcome::InvalidReading(e);
            }
        };

        let request = ReportRequest::new(&self.identity, &envelope);
        debug!("📤 POST {} {}", request.url, request.body);

        let response = match self.transport.post(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Report delivery failed: {}", e);
                return ReportOutcome::TransportFailed(e);
            }
        };

        if response.status != 200 || response.body.is_empty() {
            warn!(
                "Report not acknowledged: HTTP {} ({} byte body)",
                response.status,
                response.body.len()
            );
            return ReportOutcome::Unacknowledged { status: response.status };
        }

        match self.commands.dispatch(&response.body) {
            Ok(handled) => {
                info!("✅ {} = {:.2} reported at {} ({} commands)", kind, value, epoch, handled);
                ReportOutcome::Acknowledged { handled }
            }
            Err(e) => {
                warn!("Ignoring collector response: {}", e);
                ReportOutcome::ResponseRejected(e)
            }
        }
    }

    /// Current epoch, forcing a resync if the clock is stale or unsynced
    async fn synced_epoch(&mut self) -> Result<u64, ClockError> {
        match self.clock.current_epoch() {
            Ok(epoch) => Ok(epoch),
            Err(e) => {
                debug!("Clock not fresh ({}), forcing resync", e);
                self.clock.force_resync().await?;
                self.clock.current_epoch()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;
    use crate::transport::TransportResponse;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Mutex;

    const SECRET: &str = "hydronode-shared-secret";

    /// Clock that is stale until resynced a configurable number of times
    struct MockClock {
        epoch: u64,
        fresh: bool,
        resync_succeeds: bool,
        resyncs: usize,
    }

    impl MockClock {
        fn fresh(epoch: u64) -> Self {
            Self { epoch, fresh: true, resync_succeeds: true, resyncs: 0 }
        }

        fn stale(epoch: u64, resync_succeeds: bool) -> Self {
            Self { epoch, fresh: false, resync_succeeds, resyncs: 0 }
        }
    }

    impl ClockSource for MockClock {
        fn current_epoch(&self) -> Result<u64, ClockError> {
            if self.fresh {
                Ok(self.epoch)
            } else {
                Err(ClockError::Stale(120))
            }
        }

        async fn force_resync(&mut self) -> Result<(), ClockError> {
            self.resyncs += 1;
            if self.resync_succeeds {
                self.fresh = true;
                Ok(())
            } else {
                Err(ClockError::Timeout(std::time::Duration::from_secs(5)))
            }
        }
    }

    enum Reply {
        Respond(u16, &'static str),
        Fail,
    }

    struct MockTransport {
        reply: Reply,
        sent: Mutex<Vec<ReportRequest>>,
    }

    impl MockTransport {
        fn new(reply: Reply) -> Self {
            Self { reply, sent: Mutex::new(Vec::new()) }
        }

        fn sent(&self) -> Vec<ReportRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        async fn post(&self, request: &ReportRequest) -> Result<TransportResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            match self.reply {
                Reply::Respond(status, body) => Ok(TransportResponse {
                    status,
                    body: body.to_string(),
                }),
                Reply::Fail => Err(TransportError::InvalidHeader(
                    "connect".to_string(),
                    "connection refused".to_string(),
                )),
            }
        }
    }

    fn identity() -> NodeIdentity {
        NodeIdentity::new("abc123", SECRET, "collector.example", "/api/webhook/sensor-value", 443)
    }

    #[tokio::test]
    async fn test_report_sends_signed_request() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Respond(200, "{}")));

        let outcome = node.report("ph", 7.125).await;
        assert!(matches!(outcome, ReportOutcome::Acknowledged { handled: 0 }));

        let sent = node.transport().sent();
        assert_eq!(sent.len(), 1);
        let req = &sent[0];

        assert_eq!(req.url, "https://collector.example/api/webhook/sensor-value");
        assert_eq!(
            req.body,
            r#"{"sensorId":"abc123","type":"ph","value":7.13,"timestamp":1700000000}"#
        );
        assert_eq!(req.header("X-Sensor-Id"), Some("abc123"));
        assert_eq!(req.header("X-Timestamp"), Some("1700000000"));

        let mut message = req.body.clone().into_bytes();
        message.extend_from_slice(b"1700000000");
        let signature = req.header("X-Signature").unwrap();
        assert!(verify_signature(SECRET.as_bytes(), &message, signature).unwrap());
    }

    #[tokio::test]
    async fn test_acknowledged_response_dispatches_commands() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let transport = MockTransport::new(Reply::Respond(200, r#"{"setInterval": 30, "unknownKey": true}"#));
        let mut node = HydroNode::new(identity(), &mut clock, transport);

        let interval = Rc::new(RefCell::new(Vec::new()));
        let sink = interval.clone();
        node.on_typed("setInterval", move |secs: u64| sink.borrow_mut().push(secs));

        let outcome = node.report("ph", 6.8).await;

        assert!(outcome.is_acknowledged());
        assert_eq!(*interval.borrow(), vec![30]);
    }

    #[tokio::test]
    async fn test_stale_clock_forces_resync() {
        let mut clock = MockClock::stale(1_700_000_500, true);
        {
            let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Respond(200, "{}")));
            let outcome = node.report("ec", 1.2).await;
            assert!(outcome.is_acknowledged());
            assert_eq!(node.transport().sent()[0].header("X-Timestamp"), Some("1700000500"));
        }
        assert_eq!(clock.resyncs, 1);
    }

    #[tokio::test]
    async fn test_failed_resync_sends_nothing() {
        let mut clock = MockClock::stale(1_700_000_500, false);
        let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Respond(200, "{}")));

        let outcome = node.report("ph", 7.0).await;

        assert!(matches!(outcome, ReportOutcome::ClockUnavailable(ClockError::Timeout(_))));
        assert!(node.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_200_is_not_dispatched() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let transport = MockTransport::new(Reply::Respond(500, r#"{"setInterval": 30}"#));
        let mut node = HydroNode::new(identity(), &mut clock, transport);

        let calls = Rc::new(RefCell::new(0));
        let sink = calls.clone();
        node.on("setInterval", move |_: &crate::dispatch::CommandValue| *sink.borrow_mut() += 1);

        let outcome = node.report("ph", 7.0).await;

        assert!(matches!(outcome, ReportOutcome::Unacknowledged { status: 500 }));
        assert_eq!(*calls.borrow(), 0);
    }

    #[tokio::test]
    async fn test_empty_body_is_unacknowledged() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Respond(200, "")));

        let outcome = node.report("ph", 7.0).await;
        assert!(matches!(outcome, ReportOutcome::Unacknowledged { status: 200 }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_absorbed() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Fail));

        let outcome = node.report("ph", 7.0).await;
        assert!(matches!(outcome, ReportOutcome::TransportFailed(_)));
        assert_eq!(node.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_is_rejected() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let transport = MockTransport::new(Reply::Respond(200, r#"{"setInterval":"#));
        let mut node = HydroNode::new(identity(), &mut clock, transport);

        let outcome = node.report("ph", 7.0).await;
        assert!(matches!(outcome, ReportOutcome::ResponseRejected(DecodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_response_budget_applies() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let transport = MockTransport::new(Reply::Respond(200, r#"{"setInterval": 30}"#));
        let mut node = HydroNode::new(identity(), &mut clock, transport);
        node.set_response_buffer_budget(8);

        let outcome = node.report("ph", 7.0).await;
        assert!(matches!(
            outcome,
            ReportOutcome::ResponseRejected(DecodeError::BudgetExceeded { budget: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_finite_reading_is_not_sent() {
        let mut clock = MockClock::fresh(1_700_000_000);
        let mut node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Respond(200, "{}")));

        let outcome = node.report("ph", f32::NAN).await;
        assert!(matches!(outcome, ReportOutcome::InvalidReading(_)));
        assert!(node.transport().sent().is_empty());
        assert_eq!(outcome.to_string().split(':').next(), Some("invalid reading"));
    }

    #[test]
    fn test_setup_ap_name() {
        let mut clock = MockClock::fresh(0);
        let node = HydroNode::new(identity(), &mut clock, MockTransport::new(Reply::Fail));
        assert_eq!(node.setup_ap_name(), "HydroNode-Setup-c123");
    }
}
