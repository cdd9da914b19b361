//! The top-level synchronization loop
//!
//! One cooperative task: read the local head, detect divergence from the
//! remote chain, then either revert one block or fetch and apply the next.
//! Apply and revert each run inside one store transaction owned by the
//! engine; this loop only decides which one happens on a given tick.

use crate::events::ChainEvent;
use std::time::Duration;
use tessera_common::{BlockBundle, IndexError, Level};
use tessera_module_chain_rpc::{ChainSource, QuoteFeed};
use tessera_module_protocol_engine::ProtocolEngine;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Consecutive non-transient failures tolerated before giving up
const MAX_FAILURE_STREAK: u32 = 10;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Applied(Level),
    Reverted(Level),
    /// Remote has nothing new
    Idle,
}

pub struct SyncController<S> {
    source: S,
    engine: ProtocolEngine,
    quotes: Box<dyn QuoteFeed>,
    events: broadcast::Sender<ChainEvent>,
    config: SyncConfig,
    shutdown: watch::Receiver<bool>,
}

impl<S: ChainSource> SyncController<S> {
    pub fn new(
        source: S,
        engine: ProtocolEngine,
        quotes: Box<dyn QuoteFeed>,
        config: SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, broadcast::Receiver<ChainEvent>) {
        let (events, receiver) = broadcast::channel(64);
        (
            Self {
                source,
                engine,
                quotes,
                events,
                config,
                shutdown,
            },
            receiver,
        )
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Loop forever, backing off while idle, until shutdown or a fatal error
    pub async fn run(mut self) -> anyhow::Result<()> {
        match self.source.head().await {
            Ok(head) => info!(remote = head.level, local = self.engine.app_state().level, "Sync starting"),
            Err(err) => warn!(%err, "Remote head not reachable yet"),
        }

        let mut backoff = self.config.min_backoff;
        let mut failures = 0u32;
        loop {
            if *self.shutdown.borrow() {
                info!("Shutdown requested, stopping sync");
                return Ok(());
            }

            let mut shutdown = self.shutdown.clone();
            let outcome = tokio::select! {
                _ = shutdown.changed() => continue,
                outcome = self.tick() => outcome,
            };

            match outcome {
                Ok(Tick::Applied(_)) | Ok(Tick::Reverted(_)) => {
                    backoff = self.config.min_backoff;
                    failures = 0;
                }
                Ok(Tick::Idle) => {
                    self.sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(err) if err.is_fatal() => {
                    error!(%err, "Fatal indexing error, writer exiting");
                    return Err(err.into());
                }
                Err(err) if err.is_transient() => {
                    warn!(%err, "Transient failure, backing off");
                    self.sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(err) => {
                    failures += 1;
                    error!(%err, failures, "Step failed, retrying next tick");
                    if failures >= MAX_FAILURE_STREAK {
                        error!("Persistent failure, surfacing to operator");
                        return Err(err.into());
                    }
                    self.sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }
    }

    async fn sleep(&mut self, duration: Duration) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    /// One step of the loop: revert on divergence, apply the next block,
    /// or report idleness
    pub async fn tick(&mut self) -> Result<Tick, IndexError> {
        let app = self.engine.app_state().clone();

        // Reorg detection against the remote chain at our own level
        if let Some(local_hash) = &app.hash {
            match self.source.header_at(app.level).await? {
                Some(remote) if remote.hash != *local_hash => {
                    info!(
                        level = app.level,
                        local = %local_hash,
                        remote = %remote.hash,
                        "Reorg detected, reverting head"
                    );
                    let level = self.engine.revert_block()?;
                    let _ = self.events.send(ChainEvent::Reorg { level });
                    return Ok(Tick::Reverted(level));
                }
                Some(_) => {}
                // Remote does not even have our level; wait it out
                None => return Ok(Tick::Idle),
            }
        }

        let next = app.level + 1;
        if self.source.header_at(next).await?.is_none() {
            return Ok(Tick::Idle);
        }

        let block = self.source.block_at(next).await?;
        let mut bundle = BlockBundle::plain(block);

        // Side data the engine cannot fetch itself (it never awaits)
        let protocol_changed = app.protocol.as_ref() != Some(&bundle.block.protocol);
        if protocol_changed {
            bundle.constants = Some(self.source.constants_at(next).await?);
        }
        if bundle.block.cycle_position == 0 {
            bundle.cycle =
                Some(self.source.cycle_bundle(next, bundle.block.cycle).await?);
        }
        if bundle.block.voting_period_position == 0 {
            bundle.voter_listings = Some(self.source.voter_listings(next).await?);
        }
        match self.quotes.quote_at(next, bundle.block.timestamp).await {
            Ok(quote) => bundle.quote = quote,
            // Quotes are advisory; never hold up the chain for them
            Err(err) => warn!(%err, "Quote feed failed"),
        }

        let hash = bundle.block.hash.clone();
        let protocol = bundle.block.protocol.clone();
        self.engine.apply_block(&bundle)?;

        if protocol_changed && app.protocol.is_some() {
            let _ = self.events.send(ChainEvent::ProtocolChange { hash: protocol });
        }
        let _ = self.events.send(ChainEvent::Applied { level: next, hash });
        Ok(Tick::Applied(next))
    }
}
