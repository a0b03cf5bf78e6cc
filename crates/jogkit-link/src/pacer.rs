//! Jog pacer
//!
//! Issues an oscillating relative-move sequence at a cadence derived from
//! the physical motion parameters. The board executes each move plus a
//! matching firmware dwell; the host waits out the same span before the
//! next command, so the stream can never outrun the board's input buffer.
//! Under-pacing risks overflowing that buffer; over-pacing only costs
//! throughput.

use crate::controller::{gated_send, ListenerSet};
use crate::transport::SerialLink;
use jogkit_core::ShutdownToken;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Gap between a move command and its dwell.
pub const COMMAND_GAP: Duration = Duration::from_millis(30);

/// Fixed margin added to every move-time estimate.
const MOVE_TIME_BUFFER_MS: u64 = 50;

/// Floor for the move-time estimate.
const MIN_MOVE_MS: u64 = 50;

/// Estimate used when the feed rate is non-positive.
const FALLBACK_MOVE_MS: u64 = 200;

/// Floor for the host-side pacing delay.
const MIN_PACE_MS: u64 = 25;

/// Margin on top of move + dwell before the next command goes out.
const PACE_MARGIN_MS: u64 = 10;

/// One-time setup before pacing: enable motors, permit unhomed motion,
/// switch to relative positioning.
pub const SETUP_COMMANDS: [&str; 3] = ["M17", "M211 S0", "G91"];

/// Issued on stop to return the board to absolute positioning.
pub const RESTORE_ABSOLUTE: &str = "G90";

/// Jog pacer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Relative move distance per stroke in mm
    pub distance_mm: f64,
    /// Feed rate at startup in mm/min
    pub initial_feed: f64,
    /// Lower feed clamp in mm/min
    pub feed_min: f64,
    /// Upper feed clamp in mm/min
    pub feed_max: f64,
    /// Feed adjustment step in mm/min
    pub feed_step: f64,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            distance_mm: 20.0,
            initial_feed: 3000.0,
            feed_min: 10.0,
            feed_max: 6000.0,
            feed_step: 100.0,
        }
    }
}

/// Estimated wall-clock time for one relative move, in milliseconds.
///
/// `ceil(|distance| / feed * 60000)` plus a fixed buffer, floored at a
/// minimum; a non-positive feed falls back to a fixed estimate plus the
/// same buffer.
pub fn move_duration_ms(distance_mm: f64, feed_mm_min: f64) -> u64 {
    if feed_mm_min <= 0.0 {
        return FALLBACK_MOVE_MS + MOVE_TIME_BUFFER_MS;
    }
    let travel_ms = (distance_mm.abs() / feed_mm_min * 60_000.0).ceil() as u64;
    (travel_ms + MOVE_TIME_BUFFER_MS).max(MIN_MOVE_MS)
}

/// Host-side delay before the next command after a move and its dwell.
pub fn pace_delay_ms(move_ms: u64, dwell_ms: u64) -> u64 {
    (move_ms + dwell_ms + PACE_MARGIN_MS).max(MIN_PACE_MS)
}

/// Relative move command for one stroke
pub fn move_command(distance_mm: f64, feed_mm_min: f64) -> String {
    format!("G1 X{:.3} F{:.0}", distance_mm, feed_mm_min)
}

/// Firmware dwell matching the estimated move duration
pub fn dwell_command(ms: u64) -> String {
    format!("G4 P{}", ms)
}

/// Everything the pacing loop needs from its controller.
pub(crate) struct PacerContext {
    pub link: Arc<SerialLink>,
    pub gate: Arc<Mutex<()>>,
    pub listeners: ListenerSet,
    pub distance_mm: f64,
    pub feed: Arc<RwLock<f64>>,
}

/// The pacing loop body. Runs until shutdown is requested or a send fails;
/// exit is a normal return either way.
pub(crate) async fn run_pacer_loop(ctx: PacerContext, mut token: ShutdownToken) {
    let mut outward = true;

    loop {
        if token.is_shutdown() {
            break;
        }

        // Timing follows the feed in effect right now, so mid-run feed
        // adjustments take hold on the next stroke.
        let feed = *ctx.feed.read();
        let move_ms = move_duration_ms(ctx.distance_mm, feed);
        let dwell_ms = move_ms;
        let pace_ms = pace_delay_ms(move_ms, dwell_ms);
        let distance = if outward {
            ctx.distance_mm
        } else {
            -ctx.distance_mm
        };

        if gated_send(&ctx.link, &ctx.gate, &ctx.listeners, &move_command(distance, feed))
            .await
            .is_err()
        {
            break;
        }
        if pause(&mut token, COMMAND_GAP).await {
            break;
        }
        if gated_send(&ctx.link, &ctx.gate, &ctx.listeners, &dwell_command(dwell_ms))
            .await
            .is_err()
        {
            break;
        }
        if pause(&mut token, Duration::from_millis(pace_ms)).await {
            break;
        }

        outward = !outward;
    }

    tracing::debug!("pacer loop stopped");
}

/// Sleep that also listens for shutdown. Returns true when shutdown fired.
async fn pause(token: &mut ShutdownToken, dur: Duration) -> bool {
    tokio::select! {
        _ = token.wait() => true,
        _ = tokio::time::sleep(dur) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_estimate_follows_feed() {
        // 20 mm at 3000 mm/min travels in 400 ms; +50 buffer.
        assert_eq!(move_duration_ms(20.0, 3000.0), 450);
        // Direction does not change the estimate.
        assert_eq!(move_duration_ms(-20.0, 3000.0), 450);
    }

    #[test]
    fn move_estimate_floors_tiny_moves() {
        assert_eq!(move_duration_ms(0.01, 6000.0), 51);
        assert_eq!(move_duration_ms(0.0, 6000.0), 50);
    }

    #[test]
    fn move_estimate_falls_back_on_bad_feed() {
        assert_eq!(move_duration_ms(20.0, 0.0), 250);
        assert_eq!(move_duration_ms(20.0, -100.0), 250);
    }

    #[test]
    fn pace_delay_covers_move_and_dwell() {
        assert_eq!(pace_delay_ms(450, 450), 910);
        assert_eq!(pace_delay_ms(250, 250), 510);
        assert_eq!(pace_delay_ms(0, 0), 25);
    }

    #[test]
    fn move_command_formats_signed_distance() {
        assert_eq!(move_command(20.0, 3000.0), "G1 X20.000 F3000");
        assert_eq!(move_command(-20.0, 3000.0), "G1 X-20.000 F3000");
    }

    #[test]
    fn dwell_command_takes_milliseconds() {
        assert_eq!(dwell_command(450), "G4 P450");
    }
}
