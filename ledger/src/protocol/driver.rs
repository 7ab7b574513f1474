//! Periodic driver: the node's own initiative.
//!
//! On every tick the node rolls a number in `[1, 100)` and, depending on the
//! roll, syncs with a validator, asks to be admitted as one, places a buy
//! request, or waits. Actions go through the same [`Node`] methods a
//! collaborator would use, so they queue behind inbound messages on the
//! node lock.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::types::Address;

use super::node::Node;

/// Configuration for the periodic driver.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub enabled: bool,
    /// Time between two ticks.
    pub tick: Duration,
    /// Range buy amounts are drawn from.
    pub buy_amount: Range<f64>,
    /// Range buy rates are drawn from.
    pub buy_rate: Range<f64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick: Duration::from_secs(5),
            buy_amount: 1.0..10.0,
            buy_rate: 1.0..10.0,
        }
    }
}

/// What the node sees when it decides what to do on a tick.
#[derive(Clone, Debug, Default)]
pub struct TickContext {
    pub validator_count: usize,
    pub is_validator: bool,
    /// Connected validators other than this node.
    pub validator_peers: Vec<Address>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DriverAction {
    /// Nothing to do: the registry is empty or no peer fits the roll.
    Skip,
    Sync(Address),
    RequestAdmission,
    Buy {
        producer: Address,
        amount: f64,
        rate: f64,
    },
    Wait,
}

/// Maps a roll in `[1, 100)` to an action.
pub fn choose_action<R: Rng>(
    roll: u32,
    ctx: &TickContext,
    cfg: &DriverConfig,
    rng: &mut R,
) -> DriverAction {
    if ctx.validator_count == 0 {
        return DriverAction::Skip;
    }

    let peer = ctx.validator_peers.choose(rng).cloned();
    match roll {
        0..10 => peer.map_or(DriverAction::Skip, DriverAction::Sync),
        10..20 if ctx.is_validator || peer.is_none() => DriverAction::Skip,
        10..20 => DriverAction::RequestAdmission,
        20..30 => match peer {
            Some(producer) => DriverAction::Buy {
                producer,
                amount: two_decimals(rng.gen_range(cfg.buy_amount.clone())),
                rate: two_decimals(rng.gen_range(cfg.buy_rate.clone())),
            },
            None => DriverAction::Skip,
        },
        _ => DriverAction::Wait,
    }
}

/// Runs the driver until the task is dropped.
pub async fn run_driver(node: Arc<Node>, cfg: DriverConfig) {
    let mut ticker = tokio::time::interval(cfg.tick.max(Duration::from_millis(100)));
    ticker.tick().await;
    info!(tick_ms = cfg.tick.as_millis() as u64, "driver running");

    loop {
        ticker.tick().await;

        let ctx = TickContext {
            validator_count: node.validators().await.len(),
            is_validator: node.is_validator().await,
            validator_peers: node.connected_validators().await,
        };
        let action = {
            let mut rng = rand::thread_rng();
            let roll = rng.gen_range(1..100);
            choose_action(roll, &ctx, &cfg, &mut rng)
        };

        let result = match &action {
            DriverAction::Skip | DriverAction::Wait => {
                debug!(?action, "driver idle this tick");
                Ok(())
            }
            DriverAction::Sync(peer) => node.send_sync_request(peer).await,
            DriverAction::RequestAdmission => node.send_admission_request().await.map(|_| ()),
            DriverAction::Buy {
                producer,
                amount,
                rate,
            } => node
                .send_buy_request(producer, *amount, *rate)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!(?action, error = %e, "driver action failed");
        }
    }
}

fn two_decimals(x: f64) -> f64 {
    (x * 100.0).floor() / 100.0
}
