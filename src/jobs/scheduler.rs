//! Periodic poll scheduling.
//!
//! The scheduler is deliberately dumb: it enqueues one fan-out job per
//! period and lets the handler expand it against current store state, so a
//! source registered between ticks is picked up on the next tick without
//! any scheduler bookkeeping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::AppContext;

use super::Job;

/// Enqueues a poll fan-out every poll interval until cancelled.
///
/// The first tick is staggered by a node-name hash so a fleet of nodes
/// restarting together does not poll every remote at the same instant.
pub async fn run_scheduler(ctx: Arc<AppContext>, cancel: CancellationToken) {
    let interval = ctx.config.poll_interval;
    let stagger = stagger_for(&ctx.config.node_name, interval);
    info!(target: "aptforge::jobs", ?interval, ?stagger, "scheduler started");

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(stagger) => {}
    }

    loop {
        debug!(target: "aptforge::jobs", "poll tick");
        ctx.queue.enqueue(Job::PollAll);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Deterministic per-node offset in `[0, interval)`.
fn stagger_for(node_name: &str, interval: Duration) -> Duration {
    let mut hasher = DefaultHasher::new();
    node_name.hash(&mut hasher);
    let millis = interval.as_millis().max(1) as u64;
    Duration::from_millis(hasher.finish() % millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_is_deterministic_and_bounded() {
        let interval = Duration::from_secs(600);
        let a = stagger_for("node-a", interval);
        assert_eq!(a, stagger_for("node-a", interval));
        assert!(a < interval);
        assert!(stagger_for("node-b", interval) < interval);
    }
}
