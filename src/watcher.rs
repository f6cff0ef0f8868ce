use crate::chain::ChainSource;
use crate::config::WatchedContract;
use crate::error::ChainError;
use crate::events::{decode_transfer, Decoded};
use crate::storage::ledger::BalanceLedger;
use crate::utils::error::compact_error;
use alloy::primitives::Address;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Upper bound on blocks per log query; keeps responses under RPC range
/// limits.
pub const SCAN_CHUNK_SIZE: u64 = 10_000;
/// Sleep between head polls when the chain has not advanced.
pub const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(13);
/// First retry delay after a transient RPC failure.
pub const TRANSIENT_RETRY_BASE_MS: u64 = 10_000;
/// Backoff ceiling; a dead node costs at most one probe per 5 minutes.
pub const TRANSIENT_RETRY_CAP_MS: u64 = 300_000;
/// Consecutive transient failures before the watcher reports Degraded.
pub const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Healthy,
    Degraded,
}

impl WatcherState {
    fn as_str(self) -> &'static str {
        match self {
            WatcherState::Healthy => "healthy",
            WatcherState::Degraded => "degraded",
        }
    }
}

/// Shared, lock-free view of one watcher's liveness. The owning watcher
/// writes; the API reads.
#[derive(Debug)]
pub struct WatcherHealth {
    name: String,
    contract: Address,
    state: AtomicU8,
    cursor: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl WatcherHealth {
    fn new(name: String, contract: Address, cursor: u64) -> Self {
        Self {
            name,
            contract,
            state: AtomicU8::new(0),
            cursor: AtomicU64::new(cursor),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> WatcherState {
        if self.state.load(Ordering::Relaxed) == 0 {
            WatcherState::Healthy
        } else {
            WatcherState::Degraded
        }
    }

    fn set_state(&self, state: WatcherState) {
        let raw = match state {
            WatcherState::Healthy => 0,
            WatcherState::Degraded => 1,
        };
        self.state.store(raw, Ordering::Relaxed);
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub contract: String,
    pub state: &'static str,
    pub cursor: u64,
    pub consecutive_failures: u32,
}

/// Registry of every watcher's health handle, served by `GET /health`.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    watchers: DashMap<Address, Arc<WatcherHealth>>,
}

impl HealthRegistry {
    pub fn register(&self, name: &str, contract: Address, cursor: u64) -> Arc<WatcherHealth> {
        let health = Arc::new(WatcherHealth::new(name.to_string(), contract, cursor));
        self.watchers.insert(contract, health.clone());
        health
    }

    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut out: Vec<HealthSnapshot> = self
            .watchers
            .iter()
            .map(|entry| {
                let h = entry.value();
                HealthSnapshot {
                    name: h.name.clone(),
                    contract: format!("{:#x}", h.contract),
                    state: h.state().as_str(),
                    cursor: h.cursor(),
                    consecutive_failures: h.consecutive_failures.load(Ordering::Relaxed),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn any_degraded(&self) -> bool {
        self.watchers
            .iter()
            .any(|entry| entry.value().state() == WatcherState::Degraded)
    }
}

/// Outcome of one scan iteration; tells the run loop how long to sleep.
#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    /// Chain head has not advanced past the cursor.
    Quiet,
    /// A chunk was fetched, processed and the cursor advanced past it.
    Advanced { from: u64, to: u64, logs: usize },
    /// A transient RPC failure; retry the same work after this delay.
    Backoff(Duration),
}

/// One independent scan loop per watched contract. Drives a cursor forward
/// in bounded chunks, feeding decoded transfers to the ledger. The cursor
/// only ever moves forward, and never past `latest + 1`.
pub struct Watcher {
    name: String,
    contract: Address,
    cursor: u64,
    chunk_size: u64,
    chain: Arc<dyn ChainSource>,
    ledger: Arc<BalanceLedger>,
    health: Arc<WatcherHealth>,
    failure_streak: u32,
}

impl Watcher {
    pub fn new(
        watched: &WatchedContract,
        chain: Arc<dyn ChainSource>,
        ledger: Arc<BalanceLedger>,
        registry: &HealthRegistry,
    ) -> Self {
        // Resume from the persisted cursor when it is ahead of the
        // configured start; a cursor behind the start block means the
        // operator deliberately rewound the config.
        let cursor = match ledger.load_cursor(watched.address) {
            Ok(Some(persisted)) if persisted >= watched.start_block => {
                tracing::info!(
                    "[SCAN] {}: resuming at persisted cursor {} (configured start {})",
                    watched.name,
                    persisted,
                    watched.start_block
                );
                persisted
            }
            Ok(_) => watched.start_block,
            Err(err) => {
                tracing::warn!(
                    "[SCAN] {}: failed to load persisted cursor, starting at {}: {}",
                    watched.name,
                    watched.start_block,
                    err
                );
                watched.start_block
            }
        };

        let health = registry.register(&watched.name, watched.address, cursor);
        Self {
            name: watched.name.clone(),
            contract: watched.address,
            cursor,
            chunk_size: SCAN_CHUNK_SIZE,
            chain,
            ledger,
            health,
            failure_streak: 0,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Run one step of the scan state machine: poll the head, fetch at most
    /// one chunk, decode and apply its logs, advance the cursor.
    pub async fn tick(&mut self) -> Tick {
        let latest = match self.chain.latest_height().await {
            Ok(latest) => latest,
            Err(err) => return self.transient_failure("latest_height", &err),
        };

        if latest <= self.cursor {
            self.mark_recovered();
            return Tick::Quiet;
        }

        let end_block = (self.cursor + self.chunk_size).min(latest);
        let logs = match self
            .chain
            .filter_logs(self.contract, self.cursor, end_block)
            .await
        {
            Ok(logs) => logs,
            Err(err) => return self.transient_failure("filter_logs", &err),
        };
        self.mark_recovered();

        let from_block = self.cursor;
        let mut applied = 0usize;
        for log in &logs {
            match decode_transfer(log) {
                Ok(Decoded::Transfer(event)) => {
                    if let Err(err) = self.ledger.apply_transfer(self.contract, &event) {
                        // Skippable by design: one failed record must not
                        // stall the contract's scan.
                        tracing::error!(
                            "[SCAN] {}: skipping transfer at block {:?}: {}",
                            self.name,
                            log.block_number,
                            err
                        );
                        continue;
                    }
                    applied += 1;
                }
                Ok(Decoded::NotATransfer) => {}
                Err(err) => {
                    tracing::warn!(
                        "[SCAN] {}: skipping undecodable log at block {:?}: {}",
                        self.name,
                        log.block_number,
                        err
                    );
                }
            }
        }

        self.cursor = end_block + 1;
        self.health.cursor.store(self.cursor, Ordering::Relaxed);
        if let Err(err) = self.ledger.store_cursor(self.contract, self.cursor) {
            // The cursor row is a resume hint; scanning continues on the
            // in-memory cursor either way.
            tracing::warn!("[SCAN] {}: failed to persist cursor: {}", self.name, err);
        }

        if applied > 0 {
            tracing::info!(
                "[SCAN] {}: applied {} transfer(s) in blocks [{}, {}]",
                self.name,
                applied,
                from_block,
                end_block
            );
        }
        Tick::Advanced {
            from: from_block,
            to: end_block,
            logs: logs.len(),
        }
    }

    fn transient_failure(&mut self, context: &str, err: &ChainError) -> Tick {
        self.failure_streak = self.failure_streak.saturating_add(1);
        self.health
            .consecutive_failures
            .store(self.failure_streak, Ordering::Relaxed);

        let delay_ms = bounded_exponential_backoff_ms(
            TRANSIENT_RETRY_BASE_MS,
            self.failure_streak - 1,
            TRANSIENT_RETRY_CAP_MS,
        );

        if self.failure_streak == DEGRADED_FAILURE_THRESHOLD {
            self.health.set_state(WatcherState::Degraded);
            tracing::warn!(
                "[SCAN] {}: {} failed {} times in a row, marking degraded: {}",
                self.name,
                context,
                self.failure_streak,
                compact_error(err)
            );
        } else {
            tracing::warn!(
                "[SCAN] {}: transient {} failure (streak {}), retrying in {}ms: {}",
                self.name,
                context,
                self.failure_streak,
                delay_ms,
                compact_error(err)
            );
        }

        Tick::Backoff(Duration::from_millis(delay_ms))
    }

    fn mark_recovered(&mut self) {
        if self.failure_streak == 0 {
            return;
        }
        if self.health.state() == WatcherState::Degraded {
            tracing::info!(
                "[SCAN] {}: endpoint recovered after {} failure(s)",
                self.name,
                self.failure_streak
            );
        }
        self.failure_streak = 0;
        self.health.consecutive_failures.store(0, Ordering::Relaxed);
        self.health.set_state(WatcherState::Healthy);
    }

    /// Loop `tick` until the shutdown signal fires. Cancellation is
    /// cooperative: it is observed between iterations and during sleeps,
    /// never mid-RPC, so shutdown latency is bounded by one outstanding
    /// call.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "[SCAN] {}: watching {:#x} from block {}",
            self.name,
            self.contract,
            self.cursor
        );
        loop {
            let delay = match self.tick().await {
                Tick::Quiet => HEAD_POLL_INTERVAL,
                Tick::Backoff(delay) => delay,
                Tick::Advanced { .. } => Duration::ZERO,
            };

            if delay.is_zero() {
                match shutdown.try_recv() {
                    Err(broadcast::error::TryRecvError::Empty) => continue,
                    _ => break,
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(delay) => {}
            }
        }
        tracing::info!("[SCAN] {}: shutdown signal received, stopping", self.name);
    }
}
