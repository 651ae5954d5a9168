//! Flood relay — jittered rebroadcast of packets with hop budget left.
//!
//! A relayed frame is the received frame with one byte rewritten: the ttl.
//! The signature bytes travel untouched, which is why signatures only
//! verify on the first hop. The random delay spreads rebroadcasts out in
//! time so a clique of nodes does not key up simultaneously.

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::broadcast;

use weft_core::wire;

use crate::link::{Link, LinkHandle};

/// Schedule a relay of `frame` with `new_ttl` patched in.
///
/// Spawns a task that sleeps a uniform jitter in `[jitter_min_ms,
/// jitter_max_ms]`, then writes the patched frame to every neighbor the
/// link reports at fire time, except the one the frame arrived on.
/// The task exits early on shutdown.
pub fn schedule(
    link: Arc<dyn Link>,
    mut frame: Vec<u8>,
    new_ttl: u8,
    inbound: Option<LinkHandle>,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    wire::patch_ttl(&mut frame, new_ttl);
    let frame = Bytes::from(frame);

    let delay_ms = if jitter_max_ms > jitter_min_ms {
        rand::thread_rng().gen_range(jitter_min_ms..=jitter_max_ms)
    } else {
        jitter_min_ms
    };

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
            _ = shutdown.recv() => return,
        }

        for neighbor in link.neighbors() {
            if Some(neighbor) == inbound {
                continue;
            }
            if let Err(e) = link.write(neighbor, frame.clone()).await {
                tracing::debug!(neighbor, error = %e, "relay write failed");
            }
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
