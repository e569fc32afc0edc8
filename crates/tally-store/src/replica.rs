//! A replica: clock, trie and message store behind one lock.
//!
//! All clock mutation (`send` for local edits, `recv` for remote timestamps)
//! and every trie update happens while holding the replica's mutex, so no
//! two local operations can ever be issued the same timestamp. Readers of
//! the trie get an owned snapshot and never block writers for long.
//!
//! Each mutating call works on copies of the clock and trie, persists the
//! new messages and then the new clock, and only then swaps the copies in.
//! A failure before the log append leaves the in-memory replica exactly as
//! it was. Once the append has landed the batch is durable, so it is
//! committed in memory even if the clock save then fails (the error is
//! still returned): the advanced clock must survive, or a later edit would
//! reissue a timestamp that is already in the log.

use crate::clock::{deserialize_clock, serialize_clock, Clock};
use crate::error::{Result, StoreError};
use crate::message::{CellAddress, Message};
use crate::persistence::Persistence;
use crate::store::{ApplyOutcome, MessageStore};
use crate::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tally_hlc::{ClockConfig, ClockError, Hlc, NodeId, Timestamp, WallClock};
use tally_merkle::MerkleTrie;
use tracing::{debug, info, warn};

/// Configuration for a replica.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Identity for a replica with no persisted clock. A random id is drawn
    /// when unset. Ignored once a clock has been saved.
    pub node_id: Option<NodeId>,
    /// Clock drift tolerance.
    pub clock: ClockConfig,
    /// Children kept per trie level after each batch; `None` disables
    /// pruning.
    pub prune_keep: Option<usize>,
    /// Rebuild the trie from the log on open and repair it if it disagrees.
    pub verify_merkle_on_open: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            clock: ClockConfig::default(),
            prune_keep: Some(2),
            verify_merkle_on_open: false,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn node_id(mut self, node: NodeId) -> Self {
        self.config.node_id = Some(node);
        self
    }

    pub fn max_drift(mut self, ms: u64) -> Self {
        self.config.clock.max_drift_ms = ms;
        self
    }

    pub fn prune_keep(mut self, keep: Option<usize>) -> Self {
        self.config.prune_keep = keep;
        self
    }

    pub fn verify_merkle_on_open(mut self, enabled: bool) -> Self {
        self.config.verify_merkle_on_open = enabled;
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-outcome counts for one applied batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub visible: usize,
    pub stale: usize,
    pub duplicate: usize,
}

impl ApplyReport {
    /// Messages that were new to this replica.
    pub fn applied(&self) -> usize {
        self.visible + self.stale
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Visible => self.visible += 1,
            ApplyOutcome::Stale => self.stale += 1,
            ApplyOutcome::Duplicate => self.duplicate += 1,
        }
    }
}

/// One page of a `messages_since` scan.
#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Pass back to fetch the next page; `None` on the last page.
    pub next_cursor: Option<Timestamp>,
}

struct ReplicaState {
    clock: Clock,
    store: MessageStore,
}

/// A single-writer replica of the message log.
pub struct Replica {
    state: Mutex<ReplicaState>,
    persistence: Box<dyn Persistence>,
    wall: Arc<dyn WallClock>,
    config: ReplicaConfig,
}

impl Replica {
    /// Load a replica from `persistence`, or start a fresh one.
    ///
    /// If the log holds timestamps newer than the saved clock (an
    /// interrupted write), the clock is moved past them. If the log's
    /// timestamps do not hash to the saved trie's root, older messages landed
    /// without their clock save, and the trie is rebuilt from the log.
    pub fn open(
        persistence: impl Persistence + 'static,
        wall: Arc<dyn WallClock>,
        config: ReplicaConfig,
    ) -> Result<Self> {
        let persisted = persistence.load()?;

        let mut store = MessageStore::new();
        for message in persisted.messages {
            store.apply(message);
        }

        let (mut clock, mut verify, mut dirty) = match persisted.clock {
            Some(doc) => {
                let clock = deserialize_clock(&doc, config.clock.clone())?;
                (clock, config.verify_merkle_on_open, false)
            }
            None => {
                let node = config.node_id.clone().unwrap_or_else(NodeId::random);
                (Clock::fresh(node, config.clock.clone()), !store.is_empty(), true)
            }
        };

        if let Some(node) = &config.node_id {
            if node != clock.hlc.node() {
                warn!(configured = %node, persisted = %clock.hlc.node(), "Ignoring configured node id");
            }
        }

        if let Some(latest) = store.latest_timestamp() {
            if latest > clock.timestamp() {
                warn!(clock = %clock.timestamp(), log = %latest, "Log is ahead of saved clock");
                let resumed = Timestamp::new(latest.millis(), latest.counter(), clock.hlc.node().clone());
                clock.hlc = Hlc::new(resumed, config.clock.clone());
                verify = true;
                dirty = true;
            }
        }

        if store.log_hash() != clock.merkle.hash() {
            warn!(saved = %clock.merkle.hash().short(), "Log does not match saved trie");
            verify = true;
        }

        if verify {
            let rebuilt = shrink(store.rebuild_trie(), config.prune_keep);
            if rebuilt.hash() != clock.merkle.hash() {
                warn!(
                    saved = %clock.merkle.hash().short(),
                    rebuilt = %rebuilt.hash().short(),
                    "Repairing Merkle trie from message log"
                );
                clock.merkle = rebuilt;
                dirty = true;
            }
        }

        if dirty {
            persistence.save_clock(&serialize_clock(&clock)?)?;
        }

        info!(
            node = %clock.hlc.node(),
            messages = store.len(),
            merkle = %clock.merkle.hash().short(),
            "Opened replica"
        );

        Ok(Replica {
            state: Mutex::new(ReplicaState { clock, store }),
            persistence: Box::new(persistence),
            wall,
            config,
        })
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn node(&self) -> NodeId {
        self.state.lock().clock.hlc.node().clone()
    }

    /// The last timestamp issued or observed.
    pub fn timestamp(&self) -> Timestamp {
        self.state.lock().clock.timestamp().clone()
    }

    /// A snapshot of the current trie.
    pub fn merkle(&self) -> MerkleTrie {
        self.state.lock().clock.merkle.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().store.is_empty()
    }

    fn now(&self) -> i64 {
        self.wall.now_millis()
    }

    /// Write one cell.
    pub fn edit(&self, address: CellAddress, value: impl Into<Value>) -> Result<Message> {
        let mut messages = self.edit_batch(vec![(address, value.into())])?;
        Ok(messages.remove(0))
    }

    /// Write several cells, each with its own timestamp, as one batch.
    pub fn edit_batch(
        &self,
        edits: impl IntoIterator<Item = (CellAddress, Value)>,
    ) -> Result<Vec<Message>> {
        let mut state = self.state.lock();
        let now = self.now();
        let mut hlc = state.clock.hlc.clone();

        let messages = edits
            .into_iter()
            .map(|(address, value)| Ok(Message::new(address, value, hlc.send(now)?)))
            .collect::<Result<Vec<_>>>()?;

        let report = self.commit(&mut state, hlc, messages.clone())?;
        debug!(count = messages.len(), visible = report.visible, "Applied local edits");
        Ok(messages)
    }

    /// Fold a peer's latest timestamp into the clock.
    pub fn observe(&self, remote: &Timestamp) -> Result<Timestamp> {
        let mut state = self.state.lock();
        let mut hlc = state.clock.hlc.clone();
        let observed = hlc.recv(remote, self.now())?;
        self.commit(&mut state, hlc, Vec::new())?;
        Ok(observed)
    }

    /// Apply messages received from a peer.
    ///
    /// Every new foreign timestamp passes through `recv` before anything is
    /// applied; one bad timestamp rejects the whole batch. Messages stamped
    /// with this replica's own node id are echoes of its history and skip
    /// `recv`, unless they claim a time this replica never reached, which
    /// means another replica is using the same id.
    pub fn receive(&self, messages: Vec<Message>) -> Result<ApplyReport> {
        let mut state = self.state.lock();
        let now = self.now();
        let mut hlc = state.clock.hlc.clone();

        for message in &messages {
            if state.store.contains(message) {
                continue;
            }
            if message.timestamp.node() == hlc.node() {
                if message.timestamp > *state.clock.timestamp() {
                    return Err(ClockError::DuplicateNode(hlc.node().clone()).into());
                }
                continue;
            }
            hlc.recv(&message.timestamp, now)?;
        }

        let report = self.commit(&mut state, hlc, messages)?;
        if report.applied() > 0 {
            debug!(
                visible = report.visible,
                stale = report.stale,
                duplicate = report.duplicate,
                "Applied remote messages"
            );
        }
        Ok(report)
    }

    /// Sort, dedupe, persist and apply one batch under the lock.
    fn commit(
        &self,
        state: &mut ReplicaState,
        hlc: Hlc,
        mut messages: Vec<Message>,
    ) -> Result<ApplyReport> {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut report = ApplyReport::default();
        let mut batch = BTreeSet::new();
        let mut fresh: Vec<Message> = Vec::with_capacity(messages.len());
        let mut merkle = state.clock.merkle.clone();

        for message in messages {
            if state.store.contains(&message) || !batch.insert(message.log_key()) {
                report.duplicate += 1;
                continue;
            }
            let known = state.store.contains_timestamp(&message.timestamp)
                || fresh.last().is_some_and(|prev| prev.timestamp == message.timestamp);
            if !known {
                merkle = merkle.insert(&message.timestamp);
            }
            fresh.push(message);
        }

        if fresh.is_empty() && hlc == state.clock.hlc {
            return Ok(report);
        }

        if !fresh.is_empty() {
            merkle = shrink(merkle, self.config.prune_keep);
            self.persistence.append_messages(&fresh)?;
        }
        let clock = Clock { hlc, merkle };
        let saved = serialize_clock(&clock)
            .and_then(|doc| self.persistence.save_clock(&doc).map_err(StoreError::from));
        if saved.is_err() && fresh.is_empty() {
            return saved.map(|()| report);
        }

        let appended = fresh.len();
        state.clock = clock;
        for message in fresh {
            report.record(state.store.apply(message));
        }
        match saved {
            Ok(()) => Ok(report),
            Err(e) => {
                warn!(error = %e, messages = appended, "Clock save failed after log append");
                Err(e)
            }
        }
    }

    /// Rebuild the trie from the message log and replace it if it differs.
    ///
    /// Returns whether a repair was needed.
    pub fn rebuild_merkle(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let rebuilt = shrink(state.store.rebuild_trie(), self.config.prune_keep);
        if rebuilt.hash() == state.clock.merkle.hash() {
            return Ok(false);
        }

        warn!(
            saved = %state.clock.merkle.hash().short(),
            rebuilt = %rebuilt.hash().short(),
            "Repairing Merkle trie from message log"
        );
        let clock = Clock {
            hlc: state.clock.hlc.clone(),
            merkle: rebuilt,
        };
        self.persistence.save_clock(&serialize_clock(&clock)?)?;
        state.clock = clock;
        Ok(true)
    }

    pub fn value(&self, address: &CellAddress) -> Option<Value> {
        self.state.lock().store.value(address).cloned()
    }

    pub fn winner(&self, address: &CellAddress) -> Option<Message> {
        self.state.lock().store.winner(address).cloned()
    }

    /// Every message ever applied at `address`, oldest first.
    pub fn history(&self, address: &CellAddress) -> Vec<Message> {
        self.state.lock().store.history(address).cloned().collect()
    }

    pub fn row(&self, dataset: &str, row: &str) -> BTreeMap<String, Value> {
        self.state.lock().store.row(dataset, row)
    }

    /// Visible value of every cell.
    pub fn cells(&self) -> BTreeMap<CellAddress, Value> {
        self.state
            .lock()
            .store
            .cells()
            .map(|(addr, value)| (addr.clone(), value.clone()))
            .collect()
    }

    /// Up to `limit` messages at or after `millis`, resuming after `cursor`.
    ///
    /// Messages sharing a timestamp are never split across pages, so a page
    /// may exceed `limit` by the size of one such group.
    pub fn messages_since(
        &self,
        millis: u64,
        cursor: Option<&Timestamp>,
        limit: usize,
    ) -> MessagePage {
        let state = self.state.lock();
        let limit = limit.max(1);
        let mut messages: Vec<Message> = Vec::new();

        for message in state.store.messages_after(millis, cursor) {
            if messages.len() >= limit {
                if let Some(last) = messages.last() {
                    if last.timestamp != message.timestamp {
                        let next_cursor = Some(last.timestamp.clone());
                        return MessagePage {
                            messages,
                            next_cursor,
                        };
                    }
                }
            }
            messages.push(message.clone());
        }

        MessagePage {
            messages,
            next_cursor: None,
        }
    }
}

/// Bound the trie's size after a batch.
fn shrink(merkle: MerkleTrie, prune_keep: Option<usize>) -> MerkleTrie {
    match prune_keep {
        Some(keep) => merkle.prune(keep),
        None => merkle.maybe_compact(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use tally_hlc::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn replica(node: &str) -> (Replica, Arc<MemoryPersistence>, Arc<ManualClock>) {
        let persistence = Arc::new(MemoryPersistence::new());
        let wall = Arc::new(ManualClock::new(NOW));
        let config = ReplicaConfigBuilder::new()
            .node_id(NodeId::new(node).unwrap())
            .build();
        let replica = Replica::open(Arc::clone(&persistence), wall.clone(), config).unwrap();
        (replica, persistence, wall)
    }

    fn amount() -> CellAddress {
        CellAddress::new("budget1", "cat7", "amount")
    }

    #[test]
    fn test_fresh_replica_persists_identity() {
        let (replica, persistence, _) = replica("A1");
        assert_eq!(replica.node(), NodeId::new("A1").unwrap());
        assert_eq!(replica.timestamp(), Timestamp::new(0, 0, replica.node()));
        assert!(persistence.snapshot().clock.is_some());
    }

    #[test]
    fn test_edit_issues_increasing_timestamps() {
        let (replica, _, _) = replica("A1");
        let first = replica.edit(amount(), 500i64).unwrap();
        let second = replica.edit(amount(), 600i64).unwrap();
        assert!(second.timestamp > first.timestamp);
        assert_eq!(replica.value(&amount()), Some(Value::Number(600.0)));
        assert_eq!(replica.history(&amount()).len(), 2);
        assert_eq!(replica.timestamp(), second.timestamp);
    }

    #[test]
    fn test_edit_batch_uses_distinct_timestamps() {
        let (replica, _, _) = replica("A1");
        let messages = replica
            .edit_batch(vec![
                (CellAddress::new("d", "r", "a"), Value::from(1i64)),
                (CellAddress::new("d", "r", "b"), Value::from(2i64)),
            ])
            .unwrap();
        assert!(messages[0].timestamp < messages[1].timestamp);
        assert_eq!(replica.row("d", "r").len(), 2);
    }

    #[test]
    fn test_receive_is_idempotent() {
        let (a, _, _) = replica("A1");
        let (b, _, _) = replica("B2");
        let sent = a.edit(amount(), 500i64).unwrap();

        let first = b.receive(vec![sent.clone()]).unwrap();
        assert_eq!(first.visible, 1);
        let hash = b.merkle().hash();
        let ts = b.timestamp();

        let second = b.receive(vec![sent.clone(), sent]).unwrap();
        assert_eq!(second.duplicate, 2);
        assert_eq!(b.merkle().hash(), hash);
        assert_eq!(b.timestamp(), ts);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_receive_rejects_drift_without_changes() {
        let (replica, persistence, _) = replica("A1");
        let far = Timestamp::new(NOW as u64 + 10 * 60 * 1000, 0, NodeId::new("B2").unwrap());
        let msg = Message::new(amount(), 1i64, far);
        let saved = persistence.snapshot().clock;

        let err = replica.receive(vec![msg]).unwrap_err();
        assert!(matches!(err, StoreError::Clock(ref e) if e.is_drift()));
        assert!(replica.is_empty());
        assert_eq!(replica.timestamp(), Timestamp::new(0, 0, replica.node()));
        assert_eq!(persistence.snapshot().clock, saved);
    }

    #[test]
    fn test_observe_detects_duplicate_node() {
        let (replica, _, _) = replica("A1");
        let clash = Timestamp::new(NOW as u64, 0, NodeId::new("A1").unwrap());
        assert!(matches!(
            replica.observe(&clash),
            Err(StoreError::Clock(ClockError::DuplicateNode(_)))
        ));
    }

    #[test]
    fn test_own_echo_accepted_but_impostor_rejected() {
        let (a, _, _) = replica("A1");
        let mine = a.edit(amount(), 1i64).unwrap();
        assert_eq!(a.receive(vec![mine]).unwrap().duplicate, 1);

        let ahead = a.timestamp().millis() + 1;
        let impostor = Message::new(amount(), 2i64, Timestamp::new(ahead, 0, a.node()));
        assert!(matches!(
            a.receive(vec![impostor]),
            Err(StoreError::Clock(ClockError::DuplicateNode(_)))
        ));
    }

    #[test]
    fn test_failed_save_leaves_state_untouched() {
        let (replica, persistence, _) = replica("A1");
        replica.edit(amount(), 500i64).unwrap();
        let hash = replica.merkle().hash();
        let ts = replica.timestamp();

        persistence.set_failing(true);
        let err = replica.edit(amount(), 300i64).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(replica.value(&amount()), Some(Value::Number(500.0)));
        assert_eq!(replica.merkle().hash(), hash);
        assert_eq!(replica.timestamp(), ts);

        persistence.set_failing(false);
        replica.edit(amount(), 300i64).unwrap();
        assert_eq!(replica.value(&amount()), Some(Value::Number(300.0)));
    }

    #[test]
    fn test_reopen_restores_state() {
        let (replica, persistence, wall) = replica("A1");
        replica.edit(amount(), 500i64).unwrap();
        let ts = replica.timestamp();
        let hash = replica.merkle().hash();
        drop(replica);

        let reopened = Replica::open(persistence, wall, ReplicaConfig::default()).unwrap();
        assert_eq!(reopened.node(), NodeId::new("A1").unwrap());
        assert_eq!(reopened.timestamp(), ts);
        assert_eq!(reopened.merkle().hash(), hash);
        assert_eq!(reopened.value(&amount()), Some(Value::Number(500.0)));
    }

    #[test]
    fn test_failed_clock_save_never_reuses_timestamps() {
        let (a, persistence, wall) = replica("A1");
        let x = CellAddress::new("budget1", "cat7", "x");
        let y = CellAddress::new("budget1", "cat7", "y");

        // the log append lands, the clock save does not
        persistence.set_failing_clock_saves(true);
        assert!(a.edit(x.clone(), 1i64).unwrap_err().is_retryable());
        persistence.set_failing_clock_saves(false);
        assert_eq!(a.value(&x), Some(Value::Number(1.0)));

        // same wall time as the failed edit
        let second = a.edit(y, 2i64).unwrap();
        let logged = persistence.snapshot().messages;
        assert_eq!(logged.len(), 2);
        assert!(logged[0].timestamp < second.timestamp);

        let (peer, _, _) = replica("B2");
        peer.receive(vec![second]).unwrap();
        drop(a);

        let reopened = Replica::open(Arc::clone(&persistence), wall, ReplicaConfig::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_ne!(reopened.merkle().hash(), peer.merkle().hash());
    }

    #[test]
    fn test_failed_clock_save_on_observe_changes_nothing() {
        let (replica, persistence, _) = replica("A1");
        let ts = replica.timestamp();
        persistence.set_failing_clock_saves(true);
        let remote = Timestamp::new(NOW as u64, 3, NodeId::new("B2").unwrap());
        assert!(replica.observe(&remote).is_err());
        assert_eq!(replica.timestamp(), ts);
    }

    #[test]
    fn test_reopen_rebuilds_trie_for_unsaved_older_messages() {
        let (a, persistence, wall) = replica("A1");
        let (b, _, _) = replica("B2");
        let older = b.edit(amount(), 300i64).unwrap();
        wall.advance(60_000);
        a.edit(amount(), 500i64).unwrap();

        persistence.set_failing_clock_saves(true);
        assert!(a.receive(vec![older]).is_err());
        persistence.set_failing_clock_saves(false);
        drop(a);

        let reopened = Replica::open(Arc::clone(&persistence), wall, ReplicaConfig::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        let mut store = MessageStore::new();
        for message in persistence.snapshot().messages {
            store.apply(message);
        }
        assert_eq!(reopened.merkle().hash(), store.log_hash());
        assert!(!reopened.rebuild_merkle().unwrap());
    }

    #[test]
    fn test_reopen_after_torn_write_repairs_clock() {
        let (replica, persistence, wall) = replica("A1");
        replica.edit(amount(), 500i64).unwrap();

        // the log append lands, the clock save does not
        persistence.set_failing_clock_saves(true);
        assert!(replica.edit(amount(), 300i64).is_err());
        persistence.set_failing_clock_saves(false);
        drop(replica);

        let reopened = Replica::open(Arc::clone(&persistence), wall, ReplicaConfig::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        let mut store = MessageStore::new();
        for message in persistence.snapshot().messages {
            store.apply(message);
        }
        assert_eq!(reopened.merkle().hash(), store.rebuild_trie().hash());

        let next = reopened.edit(amount(), 100i64).unwrap();
        let logged = reopened.history(&amount());
        assert!(logged[..2].iter().all(|m| m.timestamp < next.timestamp));
    }

    #[test]
    fn test_rebuild_merkle_noop_when_consistent() {
        let (replica, _, _) = replica("A1");
        replica.edit(amount(), 1i64).unwrap();
        assert!(!replica.rebuild_merkle().unwrap());
    }

    #[test]
    fn test_messages_since_pages() {
        let (replica, _, wall) = replica("A1");
        for i in 0..5 {
            wall.advance(1_000);
            replica
                .edit(CellAddress::new("d", format!("r{}", i), "c"), i as i64)
                .unwrap();
        }

        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let page = replica.messages_since(0, cursor.as_ref(), 2);
            assert!(page.messages.len() <= 2);
            seen.extend(page.messages);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(replica.messages_since(NOW as u64 + 4_000, None, 10).messages.len(), 2);
    }
}
