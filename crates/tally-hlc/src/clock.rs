//! Hybrid Logical Clock.
//!
//! The clock combines physical wall time with a logical counter so that
//! timestamps issued by independently clocked replicas are totally ordered
//! and respect causality: anything a replica issues after observing a remote
//! timestamp sorts after that timestamp.
//!
//! [`Hlc`] is plain mutable state. Callers that share one clock between
//! tasks must serialize `send`/`recv` behind a single lock; the replica
//! layer does exactly that.

use crate::error::{ClockError, Result};
use crate::node::NodeId;
use crate::timestamp::{Timestamp, MAX_COUNTER, MAX_MILLIS};
use serde::{Deserialize, Serialize};

/// Default tolerance for clocks running ahead of the local wall clock.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Configuration for clock drift checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// How far (in milliseconds) any timestamp may run ahead of wall time.
    pub max_drift_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
        }
    }
}

/// Builder for clock configuration.
pub struct ClockConfigBuilder {
    config: ClockConfig,
}

impl ClockConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClockConfig::default(),
        }
    }

    pub fn max_drift(mut self, ms: u64) -> Self {
        self.config.max_drift_ms = ms;
        self
    }

    pub fn build(self) -> ClockConfig {
        self.config
    }
}

impl Default for ClockConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The last issued or observed timestamp of one replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hlc {
    last: Timestamp,
    config: ClockConfig,
}

impl Hlc {
    /// Seed a clock from a persisted timestamp, or from
    /// `Timestamp::new(0, 0, node)` on first run.
    pub fn new(last: Timestamp, config: ClockConfig) -> Self {
        Hlc { last, config }
    }

    /// A fresh clock for `node` that has issued nothing yet.
    pub fn fresh(node: NodeId, config: ClockConfig) -> Self {
        Hlc::new(Timestamp::new(0, 0, node), config)
    }

    /// The last issued or observed timestamp.
    pub fn timestamp(&self) -> &Timestamp {
        &self.last
    }

    pub fn node(&self) -> &NodeId {
        self.last.node()
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Issue the next local timestamp given wall time `now`.
    ///
    /// The clock state is left untouched when an error is returned.
    pub fn send(&mut self, now: i64) -> Result<Timestamp> {
        let l_old = self.last.millis() as i64;
        let c_old = u32::from(self.last.counter());

        let l_new = l_old.max(now);
        let c_new = if l_new == l_old { c_old + 1 } else { 0 };

        self.check(l_new, c_new, now)?;
        self.last = Timestamp::new(l_new as u64, c_new as u16, self.node().clone());
        Ok(self.last.clone())
    }

    /// Fold a remote timestamp into the clock given wall time `now`.
    ///
    /// The returned timestamp is strictly after both the previous local
    /// state and `remote`. The clock state is left untouched when an
    /// error is returned.
    pub fn recv(&mut self, remote: &Timestamp, now: i64) -> Result<Timestamp> {
        if remote.node() == self.node() {
            return Err(ClockError::DuplicateNode(remote.node().clone()));
        }

        let l_msg = remote.millis() as i64;
        if l_msg.saturating_sub(now) > self.max_drift() {
            return Err(ClockError::Drift {
                millis: remote.millis(),
                wall: now,
                max_drift_ms: self.config.max_drift_ms,
            });
        }

        let l_old = self.last.millis() as i64;
        let c_old = u32::from(self.last.counter());
        let c_msg = u32::from(remote.counter());

        let l_new = l_old.max(now).max(l_msg);
        let c_new = if l_new == l_old && l_new == l_msg {
            c_old.max(c_msg) + 1
        } else if l_new == l_old {
            c_old + 1
        } else if l_new == l_msg {
            c_msg + 1
        } else {
            0
        };

        self.check(l_new, c_new, now)?;
        self.last = Timestamp::new(l_new as u64, c_new as u16, self.node().clone());
        Ok(self.last.clone())
    }

    fn max_drift(&self) -> i64 {
        i64::try_from(self.config.max_drift_ms).unwrap_or(i64::MAX)
    }

    fn check(&self, l_new: i64, c_new: u32, now: i64) -> Result<()> {
        if l_new.saturating_sub(now) > self.max_drift() || l_new as u64 > MAX_MILLIS {
            return Err(ClockError::Drift {
                millis: l_new as u64,
                wall: now,
                max_drift_ms: self.config.max_drift_ms,
            });
        }
        if c_new > u32::from(MAX_COUNTER) {
            return Err(ClockError::Overflow {
                millis: l_new as u64,
                max: MAX_COUNTER,
            });
        }
        Ok(())
    }
}
