//! The initiating side of the protocol, as an explicit state machine.
//!
//! A cycle runs `Idle → ExchangingClocks → DiffingTries →
//! TransferringMessages → DiffingTries → … → Idle`. Suspension points are
//! exactly the transport round trips. Every step is safe to repeat:
//! applying a message twice is a no-op and trie inserts never mutate shared
//! nodes, so a cycle aborted at any point can simply be run again.

use crate::error::{Result, SyncError};
use crate::proto::{SyncRequest, SyncResponse};
use crate::transport::SyncTransport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_hlc::Timestamp;
use tally_merkle::{BucketKey, DiffStep, Hash};
use tally_store::Replica;
use tracing::{debug, info, info_span, warn, Instrument};
use ulid::Ulid;

/// Default bound on transfer rounds per cycle.
pub const DEFAULT_MAX_ROUNDS: usize = 100;

/// Default number of messages per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Configuration for reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Transfer rounds allowed before giving up with `OutOfSync`.
    pub max_rounds: usize,
    /// Messages per push or fetch request.
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.config.max_rounds = rounds.max(1);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size.max(1);
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a reconciler is within a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    ExchangingClocks,
    DiffingTries,
    TransferringMessages,
}

/// Outcome of one completed cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncReport {
    pub cycle_id: Ulid,
    /// Transfer rounds run.
    pub rounds: usize,
    /// Pushed messages that were new to the peer.
    pub sent: usize,
    /// Fetched messages that were new locally.
    pub received: usize,
    /// Divergence point of each round, in order.
    pub divergences: Vec<BucketKey>,
    /// Local root hash at the end of the cycle.
    pub merkle: Hash,
}

impl SyncReport {
    fn new(cycle_id: Ulid) -> Self {
        SyncReport {
            cycle_id,
            rounds: 0,
            sent: 0,
            received: 0,
            divergences: Vec::new(),
            merkle: Hash::zero(),
        }
    }

    /// True if the replicas already agreed.
    pub fn was_in_sync(&self) -> bool {
        self.rounds == 0
    }
}

/// Drives reconciliation of a local replica against one peer.
pub struct Reconciler<T: SyncTransport> {
    replica: Arc<Replica>,
    transport: T,
    config: SyncConfig,
    state: SyncState,
    last_divergence: Option<BucketKey>,
    last_synced: Option<Timestamp>,
}

impl<T: SyncTransport> Reconciler<T> {
    pub fn new(replica: Arc<Replica>, transport: T) -> Self {
        Self::with_config(replica, transport, SyncConfig::default())
    }

    pub fn with_config(replica: Arc<Replica>, transport: T, config: SyncConfig) -> Self {
        Reconciler {
            replica,
            transport,
            config,
            state: SyncState::Idle,
            last_divergence: None,
            last_synced: None,
        }
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Divergence point of an interrupted transfer; the next cycle resumes
    /// there.
    pub fn last_divergence(&self) -> Option<&BucketKey> {
        self.last_divergence.as_ref()
    }

    /// Local timestamp at the end of the last successful cycle.
    pub fn last_synced(&self) -> Option<&Timestamp> {
        self.last_synced.as_ref()
    }

    /// Run one full cycle. On any error the machine is back in `Idle`.
    pub async fn run_cycle(&mut self) -> Result<SyncReport> {
        let cycle_id = Ulid::new();
        let span = info_span!("cycle", id = %cycle_id, node = %self.replica.node());
        let result = self.drive(cycle_id).instrument(span).await;
        self.state = SyncState::Idle;

        if let Err(e) = &result {
            warn!(
                cycle = %cycle_id,
                error = %e,
                retryable = e.is_retryable(),
                resume = ?self.last_divergence,
                "Sync cycle aborted"
            );
        }
        result
    }

    async fn drive(&mut self, cycle_id: Ulid) -> Result<SyncReport> {
        let mut report = SyncReport::new(cycle_id);

        self.state = SyncState::ExchangingClocks;
        self.exchange_clocks().await?;

        let mut pending = self.last_divergence.clone();
        let mut repaired = false;
        loop {
            let resumed = pending.is_some();
            let divergence = match pending.take() {
                Some(key) => Some(key),
                None => {
                    self.state = SyncState::DiffingTries;
                    self.find_divergence().await?
                }
            };
            let Some(key) = divergence else {
                break;
            };

            if report.rounds >= self.config.max_rounds {
                return Err(SyncError::OutOfSync {
                    rounds: report.rounds,
                });
            }
            report.rounds += 1;
            report.divergences.push(key.clone());
            self.last_divergence = Some(key.clone());

            self.state = SyncState::TransferringMessages;
            let moved = self.transfer(&key, &mut report).await?;
            debug!(round = report.rounds, divergence = %key, moved, "Transfer round complete");

            if moved == 0 && !resumed {
                // Both sides hold the same messages since `key` yet the tries
                // still differ: the local trie no longer matches the log.
                if repaired {
                    return Err(SyncError::OutOfSync {
                        rounds: report.rounds,
                    });
                }
                repaired = true;
                if self.replica.rebuild_merkle()? {
                    warn!(divergence = %key, "Rebuilt local trie during sync");
                }
            }
        }

        self.last_divergence = None;
        self.last_synced = Some(self.replica.timestamp());
        report.merkle = self.replica.merkle().hash();

        info!(
            rounds = report.rounds,
            sent = report.sent,
            received = report.received,
            merkle = %report.merkle.short(),
            "Sync cycle complete"
        );
        Ok(report)
    }

    async fn call(&self, request: SyncRequest) -> Result<SyncResponse> {
        let kind = request.kind();
        match self.transport.request(request).await? {
            SyncResponse::Rejected { reason, message } => {
                Err(SyncError::Rejected { reason, message })
            }
            response => {
                debug!(request = kind, response = response.kind(), "Round trip");
                Ok(response)
            }
        }
    }

    async fn exchange_clocks(&mut self) -> Result<()> {
        let timestamp = self.replica.timestamp();
        match self.call(SyncRequest::Clock { timestamp }).await? {
            SyncResponse::Clock { timestamp } => {
                self.replica.observe(&timestamp)?;
                Ok(())
            }
            other => Err(unexpected("clock", &other)),
        }
    }

    /// Walk the peer's trie from the root, one summary per round trip,
    /// against a snapshot of the local trie.
    async fn find_divergence(&mut self) -> Result<Option<BucketKey>> {
        let local = self.replica.merkle();
        let mut prefix = BucketKey::root();

        loop {
            let request = SyncRequest::Summary {
                prefix: prefix.clone(),
            };
            let summary = match self.call(request).await? {
                SyncResponse::Summary { summary } if summary.prefix == prefix => summary,
                other => return Err(unexpected("summary", &other)),
            };

            match local.diff_step(&summary) {
                DiffStep::Agree if prefix.is_root() => return Ok(None),
                // the peer changed between round trips
                DiffStep::Agree => return Ok(Some(prefix)),
                DiffStep::Descend(child) => prefix = child,
                DiffStep::Diverged(key) => return Ok(Some(key)),
            }
        }
    }

    /// Push local messages since `key`, then fetch the peer's. Returns how
    /// many messages were new to either side.
    async fn transfer(&mut self, key: &BucketKey, report: &mut SyncReport) -> Result<usize> {
        let since = key.to_millis();
        let mut moved = 0;

        let mut cursor = None;
        loop {
            let page = self
                .replica
                .messages_since(since, cursor.as_ref(), self.config.page_size);
            if !page.messages.is_empty() {
                let request = SyncRequest::Push {
                    messages: page.messages,
                };
                match self.call(request).await? {
                    SyncResponse::Pushed { applied } => {
                        report.sent += applied;
                        moved += applied;
                    }
                    other => return Err(unexpected("push", &other)),
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut cursor = None;
        loop {
            let request = SyncRequest::MessagesSince {
                since,
                cursor: cursor.clone(),
                limit: self.config.page_size,
            };
            let (messages, next_cursor) = match self.call(request).await? {
                SyncResponse::Messages {
                    messages,
                    next_cursor,
                } => (messages, next_cursor),
                other => return Err(unexpected("messages_since", &other)),
            };
            if !messages.is_empty() {
                let applied = self.replica.receive(messages)?.applied();
                report.received += applied;
                moved += applied;
            }
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(moved)
    }
}

fn unexpected(request: &'static str, response: &SyncResponse) -> SyncError {
    SyncError::Protocol {
        request,
        response: response.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SyncConfigBuilder::new().max_rounds(0).page_size(25).build();
        assert_eq!(config.max_rounds, 1);
        assert_eq!(config.page_size, 25);

        let defaults = SyncConfig::default();
        assert_eq!(defaults.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(defaults.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_report_starts_empty() {
        let report = SyncReport::new(Ulid::new());
        assert!(report.was_in_sync());
        assert!(report.merkle.is_zero());
    }
}
