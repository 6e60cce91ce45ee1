//! Client↔server clock synchronization.
//!
//! # Protocol
//!
//! ```text
//! client ──── {type:"ping", t0} ─────────────────► server
//! client ◄─── {type:"pong", t0, server_now} ────── server
//!
//! rtt    = t2 - t0                    (t2 = local receive time)
//! offset = server_now - (t0 + rtt/2)
//! ```
//!
//! A four-timestamp form is also supported for servers that report both
//! receive and send times (`latency.pong`), removing server processing
//! time from the estimate:
//!
//! ```text
//! rtt    = (t3 - t0) - (t2 - t1)
//! offset = ((t1 + t2) - (t0 + t3)) / 2
//! ```
//!
//! Both estimates feed exponential moving averages rather than replacing
//! the previous value, which damps jitter from individual round trips.
//! The offset is used to map server-stamped timestamps onto the local
//! clock (`server_ts - offset`); the resulting one-way delay is diagnostic
//! and must never move a playback head backward.

use tracing::debug;

/// Default EMA smoothing factor.
const DEFAULT_ALPHA: f64 = 0.2;

/// EMA estimates of round-trip time and server clock offset.
///
/// One instance per active session; `reset()` when a new session starts.
#[derive(Debug, Clone)]
pub struct ClockSync {
    offset_ms: f64,
    rtt_ms: f64,
    alpha: f64,
    samples: u64,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl ClockSync {
    pub fn new(alpha: f64) -> Self {
        Self {
            offset_ms: 0.0,
            rtt_ms: 0.0,
            alpha,
            samples: 0,
        }
    }

    /// Ingest a simple pong: `t0` is the client send time, `server_now` the
    /// server's send time, `t2` the local receive time (all ms).
    pub fn on_pong(&mut self, t0: f64, server_now: f64, t2: f64) {
        let rtt = t2 - t0;
        let offset = server_now - (t0 + rtt / 2.0);
        self.absorb(rtt, offset);
    }

    /// Ingest a four-timestamp pong: `t0`/`t3` client send/receive,
    /// `t1`/`t2` server receive/send (all ms).
    pub fn on_pong4(&mut self, t0: f64, t1: f64, t2: f64, t3: f64) {
        let rtt = (t3 - t0) - (t2 - t1);
        let offset = ((t1 + t2) - (t0 + t3)) / 2.0;
        self.absorb(rtt, offset);
    }

    fn absorb(&mut self, rtt: f64, offset: f64) {
        self.rtt_ms = (1.0 - self.alpha) * self.rtt_ms + self.alpha * rtt;
        self.offset_ms = (1.0 - self.alpha) * self.offset_ms + self.alpha * offset;
        self.samples += 1;
        debug!(
            rtt_ms = self.rtt_ms,
            offset_ms = self.offset_ms,
            samples = self.samples,
            "clock sample absorbed"
        );
    }

    /// Estimated server-minus-client clock offset (ms).
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Smoothed round-trip time (ms).
    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ms
    }

    /// Number of pongs absorbed since the last reset.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Map a server-stamped timestamp onto the local clock (ms).
    pub fn server_to_client(&self, server_ts: f64) -> f64 {
        server_ts - self.offset_ms
    }

    /// One-way delay of a server-stamped message received at `local_recv`.
    pub fn one_way_ms(&self, server_ts: f64, local_recv: f64) -> f64 {
        local_recv - self.server_to_client(server_ts)
    }

    /// Forget all state for a fresh session.
    pub fn reset(&mut self) {
        self.offset_ms = 0.0;
        self.rtt_ms = 0.0;
        self.samples = 0;
    }
}

/// Wall-clock milliseconds since the Unix epoch, as the wire contract's
/// timestamp base.
pub fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
