//! The message log and last-writer-wins applier.
//!
//! Every message ever applied is kept, ordered by timestamp. The visible
//! value of a cell is the value of the message with the greatest timestamp
//! at that address; older messages stay in the log so they can still be
//! served to peers that have not seen them.

use crate::message::{CellAddress, Message};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use tally_hlc::Timestamp;
use tally_merkle::{BucketKey, Hash, Hasher, MerkleTrie};

/// How a message relates to the store's current contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New, and now the visible value of its cell.
    Visible,
    /// New, but an existing message at the same address is newer. Stored
    /// for history only.
    Stale,
    /// Already present; applying it changes nothing.
    Duplicate,
}

impl ApplyOutcome {
    /// True if the message is not already in the log.
    pub fn is_new(&self) -> bool {
        !matches!(self, ApplyOutcome::Duplicate)
    }
}

/// In-memory message log with per-cell indexes.
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    log: BTreeMap<(Timestamp, CellAddress), Message>,
    cells: BTreeMap<CellAddress, BTreeSet<Timestamp>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Classify a message without storing it.
    pub fn classify(&self, message: &Message) -> ApplyOutcome {
        let address = message.address();
        match self.cells.get(&address) {
            Some(stamps) if stamps.contains(&message.timestamp) => ApplyOutcome::Duplicate,
            Some(stamps) if stamps.last().is_some_and(|latest| *latest > message.timestamp) => {
                ApplyOutcome::Stale
            }
            _ => ApplyOutcome::Visible,
        }
    }

    /// Store a message. Idempotent: a second application is reported as
    /// `Duplicate` and leaves the store unchanged.
    pub fn apply(&mut self, message: Message) -> ApplyOutcome {
        let outcome = self.classify(&message);
        if outcome.is_new() {
            self.cells
                .entry(message.address())
                .or_default()
                .insert(message.timestamp.clone());
            self.log.insert(message.log_key(), message);
        }
        outcome
    }

    /// Alias of [`apply`](Self::apply).
    pub fn append(&mut self, message: Message) -> ApplyOutcome {
        self.apply(message)
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.log.contains_key(&message.log_key())
    }

    /// True if any message in the log carries this timestamp.
    pub fn contains_timestamp(&self, timestamp: &Timestamp) -> bool {
        self.log
            .range((timestamp.clone(), CellAddress::default())..)
            .next()
            .is_some_and(|((ts, _), _)| ts == timestamp)
    }

    /// The greatest timestamp in the log.
    pub fn latest_timestamp(&self) -> Option<&Timestamp> {
        self.log.keys().next_back().map(|(ts, _)| ts)
    }

    /// The message currently visible at `address`.
    pub fn winner(&self, address: &CellAddress) -> Option<&Message> {
        let latest = self.cells.get(address)?.last()?;
        self.log.get(&(latest.clone(), address.clone()))
    }

    /// The visible value at `address`.
    pub fn value(&self, address: &CellAddress) -> Option<&Value> {
        self.winner(address).map(|m| &m.value)
    }

    /// Every message ever applied at `address`, oldest first.
    pub fn history<'a>(&'a self, address: &'a CellAddress) -> impl Iterator<Item = &'a Message> + 'a {
        self.cells
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(move |ts| self.log.get(&(ts.clone(), address.clone())))
    }

    /// Visible values of one record, keyed by column.
    pub fn row(&self, dataset: &str, row: &str) -> BTreeMap<String, Value> {
        self.cells
            .range(CellAddress::row_start(dataset, row)..)
            .take_while(|(addr, _)| addr.dataset == dataset && addr.row == row)
            .filter_map(|(addr, _)| {
                self.value(addr)
                    .map(|value| (addr.column.clone(), value.clone()))
            })
            .collect()
    }

    /// Messages with a timestamp at or after `millis`, in timestamp order.
    ///
    /// The iterator borrows the store; calling again restarts from the
    /// beginning.
    pub fn messages_since(&self, millis: u64) -> impl Iterator<Item = &Message> + '_ {
        self.log
            .range((Timestamp::since(millis), CellAddress::default())..)
            .map(|(_, message)| message)
    }

    /// Resume [`messages_since`](Self::messages_since) after a page that
    /// ended at `cursor`: messages at or after `millis` and strictly after
    /// every message stamped `cursor`.
    pub fn messages_after(
        &self,
        millis: u64,
        cursor: Option<&Timestamp>,
    ) -> impl Iterator<Item = &Message> + '_ {
        let floor = Timestamp::since(millis);
        let (start, skip) = match cursor {
            Some(cursor) if *cursor >= floor => (cursor.clone(), Some(cursor.clone())),
            _ => (floor, None),
        };
        self.log
            .range((start, CellAddress::default())..)
            .skip_while(move |((ts, _), _)| Some(ts) == skip.as_ref())
            .map(|(_, message)| message)
    }

    /// Messages whose bucket is at or after a divergence point.
    pub fn messages_since_key(&self, key: &BucketKey) -> impl Iterator<Item = &Message> + '_ {
        self.messages_since(key.to_millis())
    }

    /// Visible value of every cell, in address order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellAddress, &Value)> + '_ {
        self.cells
            .keys()
            .filter_map(|addr| self.value(addr).map(|value| (addr, value)))
    }

    /// Every message, in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.log.values()
    }

    /// Build a trie over the whole log from scratch.
    pub fn rebuild_trie(&self) -> MerkleTrie {
        MerkleTrie::rebuild(self.timestamps())
    }

    /// Root hash a trie over the whole log would have, without building it.
    pub fn log_hash(&self) -> Hash {
        self.timestamps()
            .into_iter()
            .fold(Hash::zero(), |acc, ts| acc ^ Hasher::timestamp(ts))
    }

    fn timestamps(&self) -> BTreeSet<&Timestamp> {
        self.log.keys().map(|(ts, _)| ts).collect()
    }
}
