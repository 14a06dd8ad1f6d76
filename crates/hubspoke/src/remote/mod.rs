//! Spokes over TCP.
//!
//! The serving side ([`serve_connection`], [`Listener`]) turns each accepted
//! connection into a local spoke of the requested hub and pumps frames
//! between the two. The dialing side ([`dial`]) produces a
//! [`RemoteSpoke`] with the same contract as a local one.
//!
//! Each side sends a keepalive frame after `keepalive_interval` of
//! outbound silence and a leave frame before closing its half.
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

mod client;
mod listener;
mod server;

pub use client::{attach, dial, RemoteSpoke};
pub use listener::Listener;
pub use server::serve_connection;

/// Ticker for outbound keepalives. The first tick is one full period away;
/// reset it whenever real data goes out.
fn keepalive_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
