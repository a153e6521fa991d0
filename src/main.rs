//! HydroNode Sensor Client
//!
//! Periodically reports a reading to the collector and applies commands from
//! its answers.
//!
//! Usage:
//!   hydro-node --sensor-id <ID> [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML configuration file
//!   --secret <KEY>        Shared secret (or HYDRO_NODE_SECRET)
//!   --host <HOST>         Collector host (default: hydronode.texhfexlabs.de)
//!   --path <PATH>         Collector path (default: /api/webhook/sensor-value)
//!   --port <PORT>         Collector port (default: 443)
//!   --type <TAG>          Reading type tag (default: ph)
//!   --interval <SECS>     Reporting interval (default: 60)
//!   --ntp-server <ADDR>   SNTP server (default: pool.ntp.org:123)
//!   --insecure            Accept invalid TLS certificates
//!   --simulate            Report simulated readings
//!   --log-level <LEVEL>   Log level (default: info)

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use hydro_node::{
    clock::{ClockSource, SntpClock},
    config::{NodeConfig, SECRET_ENV_VAR},
    transport::HttpsTransport,
    HydroNode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_args(
        std::env::args().skip(1),
        std::env::var(SECRET_ENV_VAR).ok(),
    )?;

    // Initialize logging
    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    config.validate()?;

    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   💧  HYDRONODE SENSOR CLIENT                             ║
    ║       Signed readings over HTTPS                          ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);

    let identity = config.identity();
    info!("Starting HydroNode...");
    info!("  Sensor ID: {}", identity.sensor_id());
    info!("  Setup AP: {}", identity.setup_ap_name());
    info!("  Endpoint: {}", identity.endpoint());
    info!("  Interval: {}s", config.interval_seconds);
    info!("  NTP Server: {}", config.ntp_server);

    let mut clock = SntpClock::new(config.ntp_server.clone())
        .with_update_interval(config.ntp_update_interval())
        .with_offset(config.time_offset_seconds);
    if let Err(e) = clock.force_resync().await {
        warn!("Initial clock sync failed: {} (will retry before each report)", e);
    }

    let transport = HttpsTransport::new(&config.https())?;
    let mut node = HydroNode::new(identity, &mut clock, transport);
    node.set_response_buffer_budget(config.response_buffer_budget);

    // Collector may change the reporting interval
    let interval = Rc::new(Cell::new(config.interval_seconds));
    let interval_handle = interval.clone();
    node.on_typed("setInterval", move |secs: u64| {
        if secs == 0 {
            warn!("Ignoring setInterval of 0s");
            return;
        }
        info!("⚙️ Reporting interval set to {}s", secs);
        interval_handle.set(secs);
    });

    let mut sampler = Sampler::new(config.simulate);
    loop {
        let value = sampler.sample();
        let outcome = node.report(&config.reading_type, value).await;
        if !outcome.is_acknowledged() {
            warn!("Reading {:.2} {}", value, outcome);
        }

        tokio::time::sleep(Duration::from_secs(interval.get())).await;
    }
}

/// Produces readings: a drifting simulated pH value, or a constant when not
/// simulating.
struct Sampler {
    simulate: bool,
    current: f32,
    rng: rand::rngs::StdRng,
}

impl Sampler {
    fn new(simulate: bool) -> Self {
        use rand::SeedableRng;

        if simulate {
            info!("🎭 Simulating readings");
        }
        Self {
            simulate,
            current: 7.0,
            rng: rand::rngs::StdRng::from_entropy(),
        }
    }

    fn sample(&mut self) -> f32 {
        use rand::Rng;

        if self.simulate {
            let drift: f32 = self.rng.gen_range(-0.05..0.05);
            self.current = (self.current + drift).clamp(5.5, 8.5);
        }
        self.current
    }
}
