//! Wall-clock sources for report timestamps.
//!
//! A report must never carry an unsynced timestamp, so sources distinguish a
//! fresh epoch from a stale one and expose an explicit resync.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Default SNTP server
pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org:123";

/// How long a sync stays fresh before a resync is wanted
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted update interval; a sync is always fresh for this long
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Seconds between the NTP era (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
const NTP_PACKET_LEN: usize = 48;
/// LI = 0, version = 3, mode = 3 (client)
const NTP_CLIENT_HEADER: u8 = 0x1B;
const NTP_MODE_SERVER: u8 = 4;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Clock has never been synchronized")]
    NotSynced,
    #[error("Clock sync is stale ({0}s since last sync)")]
    Stale(u64),
    #[error("Time server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Time server did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Invalid time server response: {0}")]
    InvalidResponse(String),
}

/// Source of the current Unix epoch in seconds.
#[allow(async_fn_in_trait)]
pub trait ClockSource {
    /// Current epoch, or an error if the source is unsynced or stale
    fn current_epoch(&self) -> Result<u64, ClockError>;

    /// Resynchronize now, regardless of freshness
    async fn force_resync(&mut self) -> Result<(), ClockError>;
}

/// Host wall clock. Always considered fresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn current_epoch(&self) -> Result<u64, ClockError> {
        let now = chrono::Utc::now().timestamp();
        u64::try_from(now).map_err(|_| ClockError::NotSynced)
    }

    async fn force_resync(&mut self) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Simple SNTP client (RFC 4330) tracking elapsed time since the last sync
/// with a monotonic clock.
#[derive(Debug)]
pub struct SntpClock {
    server: String,
    update_interval: Duration,
    offset_secs: i64,
    timeout: Duration,
    last_sync: Option<(u64, Instant)>,
}

impl SntpClock {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            offset_secs: 0,
            timeout: Duration::from_secs(5),
            last_sync: None,
        }
    }

    /// Freshness window of a sync, clamped to [`MIN_UPDATE_INTERVAL`]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval.max(MIN_UPDATE_INTERVAL);
        self
    }

    /// Fixed offset applied to the reported epoch
    pub fn with_offset(mut self, offset_secs: i64) -> Self {
        self.offset_secs = offset_secs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_synced(&self) -> bool {
        self.last_sync.is_some()
    }

    fn record_sync(&mut self, epoch: u64) {
        self.last_sync = Some((epoch, Instant::now()));
    }

    async fn query(&self) -> Result<u64, ClockError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;
        socket.send(&build_request()).await?;

        let mut buf = [0u8; NTP_PACKET_LEN];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ClockError::Timeout(self.timeout))??;

        parse_response(&buf[..len])
    }
}

impl ClockSource for SntpClock {
    fn current_epoch(&self) -> Result<u64, ClockError> {
        let (synced_epoch, synced_at) = self.last_sync.ok_or(ClockError::NotSynced)?;
        let elapsed = synced_at.elapsed();
        if elapsed >= self.update_interval {
            return Err(ClockError::Stale(elapsed.as_secs()));
        }

        let epoch = synced_epoch as i64 + elapsed.as_secs() as i64 + self.offset_secs;
        u64::try_from(epoch).map_err(|_| ClockError::InvalidResponse(format!("epoch {} out of range", epoch)))
    }

    async fn force_resync(&mut self) -> Result<(), ClockError> {
        let epoch = self.query().await?;
        info!("🕒 Clock synced via {} (epoch {})", self.server, epoch);
        self.record_sync(epoch);
        Ok(())
    }
}

/// 48-byte SNTP client request
fn build_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = NTP_CLIENT_HEADER;
    packet
}

/// Extract the Unix epoch from the transmit timestamp of a server reply
fn parse_response(packet: &[u8]) -> Result<u64, ClockError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(ClockError::InvalidResponse(format!(
            "short packet ({} bytes)",
            packet.len()
        )));
    }

    let mode = packet[0] & 0x07;
    if mode != NTP_MODE_SERVER {
        return Err(ClockError::InvalidResponse(format!("unexpected mode {}", mode)));
    }

    // Stratum 0 is a kiss-of-death packet
    let stratum = packet[1];
    if stratum == 0 {
        return Err(ClockError::InvalidResponse("kiss-of-death".to_string()));
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]) as u64;
    debug!("NTP transmit seconds: {}", seconds);
    seconds
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or_else(|| ClockError::InvalidResponse(format!("timestamp {} before Unix epoch", seconds)))
}
